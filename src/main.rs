// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023
// - Volker Schwaberow <volker@schwaberow.de>

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use adfvol::{
    load_adf_from_zip, Adf, DiskType, EntryKind, FsType, HostEntry, HostKind, Volume,
    VolumeConfig,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "adfvol", version, author = "Volker Schwaberow <volker@schwaberow.de>")]
#[command(about = "Builds, checks and converts Amiga OFS/FFS disk images")]
struct Cli {
    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Creates a new formatted ADF file
    Create {
        file: PathBuf,
        /// File system (OFS, FFS)
        #[arg(short, long, default_value = "FFS")]
        fs: FsType,
        /// Disk geometry (dd, dd81..dd84, hd)
        #[arg(short, long, default_value = "dd")]
        disk: DiskType,
        #[arg(short, long, default_value = "Empty")]
        name: String,
        /// Use international name hashing
        #[arg(long)]
        intl: bool,
        /// Leave the boot block empty
        #[arg(long)]
        no_boot: bool,
    },
    /// Displays information about an ADF file
    Info { file: PathBuf },
    /// Lists the contents of a directory
    List {
        file: PathBuf,
        #[arg(short, long, default_value = "/")]
        dir: String,
        #[arg(short, long)]
        recursive: bool,
    },
    /// Checks the integrity of an ADF file
    Check {
        file: PathBuf,
        /// Also check links, extents, bitmap and reachability
        #[arg(short, long)]
        strict: bool,
    },
    /// Extracts a file from an ADF
    Extract {
        file: PathBuf,
        /// Path of the file inside the volume
        path: String,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Creates a directory
    Mkdir { file: PathBuf, path: String },
    /// Copies a host file into the volume
    Put {
        file: PathBuf,
        host_file: PathBuf,
        #[arg(short, long, default_value = "/")]
        dir: String,
        /// Name inside the volume (default: host file name)
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Copies a host directory tree into the volume
    Import {
        file: PathBuf,
        host_dir: PathBuf,
        #[arg(short, long, default_value = "/")]
        dir: String,
    },
    /// Copies a volume directory tree to the host
    Export {
        file: PathBuf,
        host_dir: PathBuf,
        #[arg(short, long, default_value = "/")]
        dir: String,
    },
}

fn open(path: &Path) -> Result<Volume, Box<dyn std::error::Error>> {
    let is_zip = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"));
    let adf = if is_zip {
        load_adf_from_zip(&std::fs::read(path)?, None)?
    } else {
        Adf::from_file(path)?
    };
    Ok(adf.volume()?)
}

fn save(vol: &Volume, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    Adf::from_volume(vol)?.write_to_file(path)?;
    Ok(())
}

/// Enters every component of a `/`-separated path, starting at the root.
fn enter(vol: &mut Volume, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    vol.change_dir("/")?;
    for part in path.split('/').filter(|p| !p.is_empty()) {
        vol.change_dir(part)?;
    }
    Ok(())
}

/// Splits `a/b/c` into `("a/b", "c")`.
fn split_path(path: &str) -> (&str, &str) {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some((dir, name)) => (dir, name),
        None => ("", path),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Create {
            file,
            fs,
            disk,
            name,
            intl,
            no_boot,
        } => {
            let config = VolumeConfig::default()
                .with_fs_type(fs)
                .with_capacity(disk.capacity())
                .with_name(&name)
                .with_intl(intl);
            let mut vol = Volume::new(config)?;
            if !no_boot {
                vol.install_boot_block()?;
            }
            save(&vol, &file)?;
            println!(
                "Created {} ({} {}, name {})",
                file.display(),
                disk,
                fs,
                name
            );
        }
        Command::Info { file } => {
            let vol = open(&file)?;
            let info = vol.info()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("ADF Information for {}:\n{}", file.display(), info);
            }
        }
        Command::List {
            file,
            dir,
            recursive,
        } => {
            let mut vol = open(&file)?;
            enter(&mut vol, &dir)?;
            let entries = vol.list(recursive)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                println!("Directory of {}", vol.path()?);
                println!("{:<40} {:>8}  Block", "Name", "Size");
                for entry in &entries {
                    let size = match entry.kind {
                        EntryKind::Dir => "(dir)".to_string(),
                        EntryKind::File => entry.size.to_string(),
                    };
                    let name = if recursive { &entry.path } else { &entry.name };
                    println!("{:<40} {:>8}  {}", name, size, entry.block);
                }
                println!("{} entries", entries.len());
            }
        }
        Command::Check { file, strict } => {
            let vol = open(&file)?;
            let report = vol.check(strict);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{report}");
            }
            if !report.corrupted.is_empty() {
                std::process::exit(1);
            }
        }
        Command::Extract { file, path, output } => {
            let mut vol = open(&file)?;
            let (dir, name) = split_path(&path);
            enter(&mut vol, dir)?;
            let nr = vol
                .seek(name)?
                .ok_or_else(|| adfvol::FsError::NotFound(path.clone()))?;
            let contents = vol.read_file(nr)?;
            match output {
                Some(out) => File::create(out)?.write_all(&contents)?,
                None => std::io::stdout().write_all(&contents)?,
            }
        }
        Command::Mkdir { file, path } => {
            let mut vol = open(&file)?;
            let (dir, name) = split_path(&path);
            enter(&mut vol, dir)?;
            vol.make_dir(name)?;
            save(&vol, &file)?;
        }
        Command::Put {
            file,
            host_file,
            dir,
            name,
        } => {
            let mut vol = open(&file)?;
            enter(&mut vol, &dir)?;
            let bytes = std::fs::read(&host_file)?;
            let name = match name {
                Some(name) => name,
                None => host_file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or("host file has no name")?,
            };
            let nr = vol.make_file(&name, &bytes)?;
            save(&vol, &file)?;
            println!("Stored {} bytes as {}", bytes.len(), vol.path_of(nr)?);
        }
        Command::Import {
            file,
            host_dir,
            dir,
        } => {
            let mut vol = open(&file)?;
            enter(&mut vol, &dir)?;
            let children = match HostEntry::from_path(&host_dir)?.kind {
                HostKind::Dir(children) => children,
                kind @ HostKind::File(_) => vec![HostEntry {
                    name: host_dir
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    kind,
                }],
            };
            vol.import_tree(&children)?;
            save(&vol, &file)?;
        }
        Command::Export {
            file,
            host_dir,
            dir,
        } => {
            let mut vol = open(&file)?;
            enter(&mut vol, &dir)?;
            std::fs::create_dir_all(&host_dir)?;
            for entry in vol.export_tree()? {
                entry.write_to(&host_dir)?;
            }
        }
    }

    Ok(())
}
