//! `fatctl`: a small CLI front end over the engine, for manual inspection,
//! fragmentation demos and error-injection testing.
//!
//! Grounded on the other example repos' `clap`-derive CLI layout (subcommand
//! enum + `env_logger::init()` + a `run()` returning the crate's own error
//! type so `main` just prints and sets an exit code) — the teacher itself
//! ships no binary to imitate here.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use fatfsck::{OpenOptions, RepairPolicy, Result, Session};

#[derive(Parser)]
#[command(name = "fatctl", about = "Inspect, repair, fragment and defragment FAT12/16/32 disk images")]
struct Cli {
    /// Path to the disk image file.
    image: String,

    /// Journal file path (defaults to fat_journal.log next to the image).
    #[arg(long)]
    journal: Option<PathBuf>,

    /// How to dispose of files with a structurally broken cluster chain.
    #[arg(long, value_enum, default_value_t = Policy::Quarantine)]
    on_corruption: Policy,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    Remove,
    Quarantine,
}

impl From<Policy> for RepairPolicy {
    fn from(p: Policy) -> Self {
        match p {
            Policy::Remove => RepairPolicy::Remove,
            Policy::Quarantine => RepairPolicy::Quarantine,
        }
    }
}

#[derive(Subcommand)]
enum Mode {
    /// Print volume layout, free space, and any repairs made while opening.
    Info,
    /// Report the current fragmentation ratio.
    Frag,
    /// Defragment the volume in place and report the before/after ratio.
    Defrag,
    /// Scramble every file's cluster order, for fragmentation demos.
    Fragment,
    /// Inject a structural error directly into the FAT, for testing.
    Error {
        #[command(subcommand)]
        kind: ErrorKind,
    },
}

#[derive(Subcommand)]
enum ErrorKind {
    /// Desynchronize one FAT copy's entry from the rest.
    Table {
        #[arg(long)]
        cluster: u32,
        #[arg(long)]
        copy: u32,
        #[arg(long)]
        value: u32,
    },
    /// Mark a cluster's own FAT entry as the bad-cluster sentinel.
    Bad {
        #[arg(long)]
        cluster: u32,
    },
    /// Make a cluster point at itself.
    SelfLoop {
        #[arg(long)]
        cluster: u32,
    },
    /// Make a cluster point at one already claimed by another chain.
    Intersection {
        #[arg(long)]
        cluster: u32,
        #[arg(long)]
        target: u32,
    },
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("fatctl: {}", e);
        std::process::exit(1);
    }
}

fn open_options(cli: &Cli) -> OpenOptions {
    OpenOptions {
        on_corruption: cli.on_corruption.into(),
        default_fat_copy: Some(0),
        disambiguate: Box::new(|diffs| Ok(diffs[0].0)),
        journal_path: cli.journal.clone(),
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let options = open_options(&cli);

    match &cli.mode {
        Mode::Info => {
            let session = Session::open(&cli.image, options)?;
            print_info(&session);
        }
        Mode::Frag => {
            let session = Session::open(&cli.image, options)?;
            println!("fragmentation ratio: {:.2}%", session.fragmentation_ratio());
        }
        Mode::Defrag => {
            let mut session = Session::open(&cli.image, options)?;
            let before = session.fragmentation_ratio();
            session.defragment()?;
            let after = session.fragmentation_ratio();
            println!("fragmentation ratio: {:.2}% -> {:.2}%", before, after);
            session.close()?;
        }
        Mode::Fragment => {
            let mut session = Session::open(&cli.image, options)?;
            let before = session.fragmentation_ratio();
            session.fragment()?;
            let after = session.fragmentation_ratio();
            println!("fragmentation ratio: {:.2}% -> {:.2}%", before, after);
            session.close()?;
        }
        Mode::Error { kind } => {
            let mut session = Session::open(&cli.image, options)?;
            match *kind {
                ErrorKind::Table { cluster, copy, value } => {
                    session.inject_single_table_corruption(cluster, copy, value)?;
                }
                ErrorKind::Bad { cluster } => session.inject_bad_cluster(cluster)?,
                ErrorKind::SelfLoop { cluster } => session.inject_self_loop(cluster)?,
                ErrorKind::Intersection { cluster, target } => {
                    session.inject_intersection(cluster, target)?;
                }
            }
            session.close()?;
            println!("injected error; reopen with `info` to see it detected and repaired");
        }
    }
    Ok(())
}

fn print_info(session: &Session) {
    let info = session.info();
    println!("variant: {:?}", info.variant);
    println!("bytes/sector: {}", info.bytes_per_sector);
    println!("sectors/cluster: {}", info.sectors_per_cluster);
    println!("FAT copies: {}", info.num_fats);
    println!("data clusters: {}", info.data_cluster_count);
    println!("free clusters: {}", info.free_cluster_count);
    if let Some(hint) = session.fs_info_hint() {
        println!("FSInfo free-cluster hint: {}", hint.free_cluster_hint);
    }
    if session.last_repairs().is_empty() {
        println!("no repairs were necessary");
    } else {
        for r in session.last_repairs() {
            println!("repaired {:?} ({:?} -> {:?})", r.name, r.kind, r.action);
        }
    }
}
