use std::error::Error;
use std::fs::{self, File};
use std::io::{self, Seek};
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use log::{info, warn};

use kcf::archive::{ArchiveOptions, DEFAULT_CHUNK_SIZE};
use kcf::{Archive, FileInfo, FileType, KcfError, ReaderState, Mode};

#[derive(Parser)]
#[command(name = "kcf", version, about = "The KCF archive container CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack files and directories into a KCF archive
    #[command(visible_alias = "c")]
    Pack {
        #[arg(short, long)]
        output: PathBuf,
        /// Read buffer size in KiB
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE / 1024)]
        chunk_size: usize,
        /// Do not store a CRC-32C for each file payload
        #[arg(long)]
        no_crc: bool,
        #[arg(required = true, num_args = 1..)]
        input: Vec<PathBuf>,
    },
    /// Unpack a KCF archive
    #[command(visible_alias = "x")]
    Unpack {
        input: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// List archive contents
    List {
        input: PathBuf,
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },
    /// Dump every record in the archive
    Records {
        input: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match Cli::parse().command {

        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack { output, chunk_size, no_crc, input } => {
            let opts = ArchiveOptions {
                chunk_size:  chunk_size.max(1) * 1024,
                payload_crc: !no_crc,
            };
            let mut ar = Archive::create_with_options(&output, opts)?;
            ar.init_archive()?;
            for path in &input {
                let name = entry_name(path)
                    .ok_or_else(|| format!("cannot derive an entry name from {}", path.display()))?;
                add_path(&mut ar, path, name)?;
            }
            ar.close()?;
            println!("Created: {}", output.display());
        }

        // ── Unpack ───────────────────────────────────────────────────────────
        Commands::Unpack { input, output_dir } => {
            let mut ar = Archive::open(&input)?;
            ar.read_archive_header()?;
            loop {
                let info = match ar.get_current_file_info() {
                    Ok(info) => info,
                    Err(KcfError::Eof) => break,
                    Err(e) => return Err(e.into()),
                };
                let Some(rel) = safe_path(&info.file_name) else {
                    warn!("skipping entry with unsafe name {:?}", info.file_name);
                    ar.skip_file()?;
                    continue;
                };
                let dest = output_dir.join(rel);
                match info.file_type {
                    FileType::Directory => {
                        fs::create_dir_all(&dest)?;
                        ar.skip_file()?;
                    }
                    FileType::Regular => {
                        if let Some(parent) = dest.parent() {
                            fs::create_dir_all(parent)?;
                        }
                        let mut out = File::create(&dest)?;
                        let n = ar.extract(&mut out)?;
                        info!("extracted {} ({n} bytes)", dest.display());
                        println!("  unpacked {}", info.file_name);
                    }
                    FileType::Unknown(t) => {
                        warn!("skipping {:?}: unknown file type {t:#04x}", info.file_name);
                        ar.skip_file()?;
                    }
                }
            }
            println!("Unpacked to: {}", output_dir.display());
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { input, json } => {
            let mut ar = Archive::open(&input)?;
            let header = ar.read_archive_header()?;
            let mut entries = Vec::new();
            loop {
                match ar.get_current_file_info() {
                    Ok(info) => entries.push(info),
                    Err(KcfError::Eof) => break,
                    Err(e) => return Err(e.into()),
                }
                ar.skip_file()?;
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                println!("Archive: {} (version {})", input.display(), header.archive_version);
                println!("{:<40} {:<5} {:>12} {:>10}  Modified", "Name", "Type", "Size", "CRC32C");
                for e in &entries {
                    println!(
                        "{:<40} {:<5} {:>12} {:>10}  {}",
                        e.file_name,
                        type_label(e.file_type),
                        e.unpacked_size.map_or_else(|| "-".into(), |s| s.to_string()),
                        e.file_crc32.map_or_else(|| "-".into(), |c| format!("{c:08x}")),
                        e.time_stamp.map_or_else(|| "-".into(), format_time),
                    );
                }
            }
        }

        // ── Records ──────────────────────────────────────────────────────────
        Commands::Records { input } => {
            let mut ar = Archive::open(&input)?;
            let skipped = ar.find_marker()? - kcf::marker::MARKER.len() as u64;
            println!("marker at offset {skipped}");
            loop {
                let offset = ar.get_mut().stream_position()?;
                let record = match ar.read_record() {
                    Ok(r) => r,
                    Err(KcfError::Eof) => break,
                    Err(e) => return Err(e.into()),
                };
                let shown = &record.data[..record.data.len().min(16)];
                println!(
                    "{offset:>10}  {:<14} flags={:#04x} head_size={:<5} added_size={:<10} {}  {}{}",
                    format!("{:?}", record.head_type),
                    record.head_flags,
                    record.head_size,
                    record.added_size,
                    if record.validate() { "ok " } else { "BAD" },
                    hex::encode(shown),
                    if shown.len() < record.data.len() { "…" } else { "" },
                );
                if ar.mode() == Mode::Reading(ReaderState::AtAddedData) {
                    ar.skip_record()?;
                }
            }
        }
    }
    Ok(())
}

/// Add a file, or a directory and everything under it.
fn add_path(ar: &mut Archive<File>, path: &Path, name: String) -> Result<(), Box<dyn Error>> {
    let meta = fs::metadata(path)?;
    let modified = meta
        .modified()
        .ok()
        .and_then(|t| u64::try_from(DateTime::<Utc>::from(t).timestamp()).ok());

    if meta.is_dir() {
        let mut info = FileInfo::directory(name.as_str());
        info.time_stamp = modified;
        ar.add_file(&info, &[])?;
        println!("  added   {name}/");

        let mut children = fs::read_dir(path)?.collect::<io::Result<Vec<_>>>()?;
        children.sort_by_key(|c| c.file_name());
        for child in children {
            let child_name = format!("{name}/{}", child.file_name().to_string_lossy());
            add_path(ar, &child.path(), child_name)?;
        }
    } else {
        let mut info = FileInfo::regular(name.as_str()).with_unpacked_size(meta.len());
        info.time_stamp = modified;
        let mut file = File::open(path)?;
        ar.begin_file(&info)?;
        ar.insert_file_data(&mut file)?;
        ar.end_file()?;
        println!("  packed  {}", path.display());
    }
    Ok(())
}

/// Archive name for a command-line path: its normal components joined by `/`.
fn entry_name(path: &Path) -> Option<String> {
    let parts: Vec<String> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Relative path for an archived name, or `None` if it could escape the
/// output directory.
fn safe_path(name: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for c in Path::new(name).components() {
        match c {
            Component::Normal(s) => out.push(s),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!out.as_os_str().is_empty()).then_some(out)
}

fn type_label(t: FileType) -> String {
    match t {
        FileType::Regular    => "file".into(),
        FileType::Directory  => "dir".into(),
        FileType::Unknown(v) => format!("{v:#04x}"),
    }
}

fn format_time(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::<Utc>::from_timestamp(s, 0))
        .map_or_else(|| secs.to_string(), |dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
}
