//! Metrichist CLI
//!
//! Create, inspect, verify and convert history files.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use metrichist_core::file::{flags, format_timestamp};
use metrichist_core::{
    Compression, FileConfig, ListFile, SimpleCollection, SyncPolicy, TimeSeriesCollection,
};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "metrichist")]
#[command(about = "Metrichist - append-only metric history files", long_about = None)]
#[command(version = metrichist_core::VERSION)]
struct Cli {
    /// Verbose mode
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty history file
    Create {
        file: PathBuf,

        /// Payload compression (gzip, lz4, none)
        #[arg(long, default_value = "gzip")]
        compression: Compression,
    },

    /// Print header fields and record counts
    Info { file: PathBuf },

    /// Write every collection as a JSON line
    Dump {
        file: PathBuf,

        /// Newest collection first
        #[arg(long)]
        reverse: bool,
    },

    /// Append JSON-line collections as a single batch
    Import {
        file: PathBuf,

        /// Input file; stdin if omitted
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// Decode every record, stopping at the first error
    Verify { file: PathBuf },

    /// Rewrite a file into a new, normalized one
    Convert {
        src: PathBuf,
        dst: PathBuf,

        /// Compression of the new file; defaults to that of `src`
        #[arg(long)]
        compression: Option<Compression>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(cli.verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Commands::Create { file, compression } => create(&file, compression),
        Commands::Info { file } => print_info(&file),
        Commands::Dump { file, reverse } => dump(&file, reverse),
        Commands::Import { file, input } => import(&file, input.as_deref()),
        Commands::Verify { file } => verify(&file),
        Commands::Convert {
            src,
            dst,
            compression,
        } => convert(&src, &dst, compression),
    }
}

/// Log directives used when `RUST_LOG` is unset
fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "warn"
    }
}

fn open_read_only(path: &Path) -> Result<ListFile> {
    ListFile::open_read_only(path).with_context(|| format!("Failed to open {}", path.display()))
}

fn create(path: &Path, compression: Compression) -> Result<()> {
    let file = ListFile::create(path, FileConfig::default().with_compression(compression))
        .with_context(|| format!("Failed to create {}", path.display()))?;
    info!("Created {:?} with {} compression", file.path(), compression);
    Ok(())
}

fn print_info(path: &Path) -> Result<()> {
    let file = open_read_only(path)?;
    let header = file.header();

    let mut flag_names = Vec::new();
    if header.is_sorted() {
        flag_names.push("sorted");
    }
    if header.is_distinct() {
        flag_names.push("distinct");
    }

    println!("File:        {}", path.display());
    println!("Version:     {}.{}", metrichist_core::config::MAJOR, header.minor);
    println!("Compression: {}", file.compression()?);
    println!("Flags:       {:#06x} [{}]", header.flags, flag_names.join(", "));
    println!(
        "Kind:        {}",
        if header.kind() == flags::KIND_LIST { "list" } else { "unknown" }
    );
    println!("Records:     {}", file.raw_stream().len());
    println!("Timestamps:  {}", file.size());
    println!("Begin:       {}", format_timestamp(file.get_begin()));
    println!("End:         {}", format_timestamp(file.get_end()));
    println!("Dict ref:    {}", header.dict_ref);
    println!("File size:   {} ({} on disk)", header.file_size, file.get_file_size()?);
    Ok(())
}

fn dump(path: &Path, reverse: bool) -> Result<()> {
    let file = open_read_only(path)?;
    let stream = if reverse {
        file.stream_reverse()
    } else {
        file.stream()
    };

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for tsc in stream.iter() {
        let simple = tsc
            .to_simple()
            .with_context(|| format!("Failed to decode collection at {}", tsc.timestamp()))?;
        serde_json::to_writer(&mut out, &simple)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

fn read_collections(reader: impl BufRead) -> Result<Vec<SimpleCollection>> {
    let mut collections = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let tsc: SimpleCollection = serde_json::from_str(&line)
            .with_context(|| format!("Invalid collection on line {}", lineno + 1))?;
        collections.push(tsc);
    }
    Ok(collections)
}

fn import(path: &Path, input: Option<&Path>) -> Result<()> {
    let collections = match input {
        Some(input) => {
            let reader = File::open(input)
                .with_context(|| format!("Failed to open {}", input.display()))?;
            read_collections(BufReader::new(reader))?
        }
        None => read_collections(io::stdin().lock())?,
    };

    let file = ListFile::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    file.add_all(&collections)
        .with_context(|| format!("Failed to append to {}", path.display()))?;
    info!("Imported {} collections into {:?}", collections.len(), file.path());
    Ok(())
}

fn verify(path: &Path) -> Result<()> {
    let file = open_read_only(path)?;
    let records = file.raw_stream();

    for (i, tsc) in records.iter().enumerate() {
        debug!("Verifying record {} at {}", i, tsc.timestamp());
        if let Err(e) = tsc.to_simple() {
            bail!(
                "record {} ({}) failed to decode: {}",
                i,
                format_timestamp(tsc.timestamp()),
                e
            );
        }
    }

    println!("{}: {} records OK", path.display(), records.len());
    Ok(())
}

fn convert(src: &Path, dst: &Path, compression: Option<Compression>) -> Result<()> {
    let source = open_read_only(src)?;
    let compression = match compression {
        Some(compression) => compression,
        None => source.compression()?,
    };

    let collections = source
        .stream()
        .iter()
        .map(|tsc| tsc.to_simple())
        .collect::<metrichist_core::Result<Vec<_>>>()
        .with_context(|| format!("Failed to decode {}", src.display()))?;

    let config = FileConfig::default()
        .with_compression(compression)
        .with_sync_policy(SyncPolicy::None);
    let target = ListFile::create(dst, config)
        .with_context(|| format!("Failed to create {}", dst.display()))?;
    target.add_all(&collections)?;

    info!(
        "Converted {} collections from {:?} to {:?} ({})",
        collections.len(),
        src,
        dst,
        compression
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_collections_skips_blank_lines() {
        let input = "{\"timestamp\":1,\"values\":[]}\n\n{\"timestamp\":2,\"values\":[]}\n";
        let collections = read_collections(input.as_bytes()).unwrap();
        assert_eq!(collections.len(), 2);
        assert_eq!(collections[1].timestamp(), 2);
    }

    #[test]
    fn test_read_collections_reports_line() {
        let err = read_collections("{\"timestamp\":1,\"values\":[]}\nnot json\n".as_bytes())
            .unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_default_filter() {
        assert_eq!(default_filter(true), "debug");
        assert_eq!(default_filter(false), "warn");
        assert!(EnvFilter::try_new(default_filter(false)).is_ok());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["metrichist", "create", "f", "--compression", "lz4"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Create {
                compression: Compression::Lz4,
                ..
            }
        ));
        assert!(Cli::try_parse_from(["metrichist", "create", "f", "--compression", "zstd"]).is_err());
    }
}
