//! Byte-addressable backing store for a FAT image.
//!
//! Grounded on the teacher's `device.rs`/`block_device.rs` split `BlockDevice`
//! trait, generalized from fixed-size block transfers to arbitrary byte
//! ranges since the engine works directly against a single image file rather
//! than a block-oriented device.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// A random-access backing store for one FAT image.
pub trait BlockDevice {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()>;
    fn len(&mut self) -> io::Result<u64>;
}

/// The real on-disk image, opened read/write.
pub struct ImageFile {
    file: File,
}

impl ImageFile {
    pub fn open(file: File) -> Self {
        Self { file }
    }
}

impl BlockDevice for ImageFile {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)
    }

    fn len(&mut self) -> io::Result<u64> {
        self.file.seek(SeekFrom::End(0))
    }
}

/// An in-memory image, used by tests so synthetic FAT images never touch disk.
pub struct MemoryDevice {
    pub data: Vec<u8>,
}

impl MemoryDevice {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl BlockDevice for MemoryDevice {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "read past end of image"));
        }
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn len(&mut self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }
}
