//! CP866 ("DOS Cyrillic") codec for short directory names (§4.7).
//!
//! Grounded on `original_source/service_classes.py`'s `.decode('cp866', ...)`/
//! `.encode(encoding='cp866')` calls; the table itself is the standard CP866
//! code page, reproduced here since no dependency in the teacher's or pack's
//! stack carries it.

const HIGH_HALF: [char; 128] = [
    'А', 'Б', 'В', 'Г', 'Д', 'Е', 'Ж', 'З', 'И', 'Й', 'К', 'Л', 'М', 'Н', 'О', 'П', // 0x80
    'Р', 'С', 'Т', 'У', 'Ф', 'Х', 'Ц', 'Ч', 'Ш', 'Щ', 'Ъ', 'Ы', 'Ь', 'Э', 'Ю', 'Я', // 0x90
    'а', 'б', 'в', 'г', 'д', 'е', 'ж', 'з', 'и', 'й', 'к', 'л', 'м', 'н', 'о', 'п', // 0xA0
    '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐', // 0xB0
    '└', '┴', '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧', // 0xC0
    '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀', // 0xD0
    'р', 'с', 'т', 'у', 'ф', 'х', 'ц', 'ч', 'ш', 'щ', 'ъ', 'ы', 'ь', 'э', 'ю', 'я', // 0xE0
    'Ё', 'ё', 'Є', 'є', 'Ї', 'ї', 'Ў', 'ў', '°', '∙', '·', '√', '№', '¤', '■', '\u{A0}', // 0xF0
];

/// Decode CP866 bytes into a `String`. Bytes below 0x80 map to ASCII (§4.7).
pub fn decode(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| {
            if b < 0x80 {
                b as char
            } else {
                HIGH_HALF[(b - 0x80) as usize]
            }
        })
        .collect()
}

/// Encode a `&str` into CP866 bytes. Returns `None` if any character has no
/// representation in the code page (§4.7 `INVALID_NAME` path).
pub fn encode(s: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(s.len());
    for ch in s.chars() {
        if (ch as u32) < 0x80 {
            out.push(ch as u8);
            continue;
        }
        match HIGH_HALF.iter().position(|&c| c == ch) {
            Some(idx) => out.push(0x80 + idx as u8),
            None => return None,
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_roundtrips() {
        let bytes = encode("REPORT.TXT").unwrap();
        assert_eq!(decode(&bytes), "REPORT.TXT");
    }

    #[test]
    fn cyrillic_roundtrips() {
        let bytes = encode("ПРИВЕТ").unwrap();
        assert_eq!(decode(&bytes), "ПРИВЕТ");
    }
}
