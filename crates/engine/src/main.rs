//! SFiles CLI
//!
//! Runs file manager operations against a storage root from the shell.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use engine::config::default_config_path;
use engine::{Actor, Config, EngineError, FileManager, AUDIT_TARGET};
use protocol::{to_json_pretty, Listing, RenameKind};
use serde::Serialize;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// SFiles - sandboxed file manager operations on a storage root.
#[derive(Parser, Debug)]
#[command(name = "sfiles")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Storage root (overrides config and SFILES_ROOT)
    #[arg(long, global = true, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// User id recorded in audit records
    #[arg(long, global = true, value_name = "ID")]
    pub actor: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    #[command(flatten)]
    Storage(StorageCommands),

    /// Inspect or create the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Commands that act on the storage root.
#[derive(Subcommand, Debug, Clone)]
pub enum StorageCommands {
    /// List a directory
    List {
        /// Directory relative to the root (defaults to the root)
        path: Option<String>,

        /// Page number, starting at 1
        #[arg(long, short, default_value = "1")]
        page: usize,
    },

    /// Create a folder
    Mkdir {
        /// Folder path relative to the root
        path: String,
    },

    /// Delete a file
    Rm {
        /// File path relative to the root
        path: String,
    },

    /// Delete a folder and everything in it
    Rmdir {
        /// Folder path relative to the root
        path: String,
    },

    /// Rename a file or folder in place
    Rename {
        /// What is being renamed
        #[arg(long, short, value_enum, default_value = "file")]
        kind: KindArg,

        /// Current path relative to the root
        path: String,

        /// New name (a single path segment)
        new_name: String,
    },

    /// Upload a local file into a directory
    Upload {
        /// Local file to upload
        local_file: PathBuf,

        /// Target directory relative to the root
        #[arg(long, short)]
        dir: Option<String>,
    },

    /// Download a folder as a zip archive
    ZipFolder {
        /// Folder path relative to the root
        path: String,

        /// Output file (defaults to the archive name in the current directory)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Download a set of files as a zip archive
    ZipFiles {
        /// File paths relative to the root
        #[arg(required = true)]
        paths: Vec<String>,

        /// Output file (defaults to the archive name in the current directory)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

/// Subcommands for configuration management.
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },
}

/// Rename target kind.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindArg {
    /// A regular file
    File,
    /// A directory
    Dir,
}

impl From<KindArg> for RenameKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::File => RenameKind::File,
            KindArg::Dir => RenameKind::Directory,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load(&config_path)?;

    // Apply environment variable and flag overrides
    config.apply_env_overrides();
    if let Some(root) = &cli.root {
        config.storage.root = root.clone();
    }

    // Validate configuration
    config.validate()?;

    let _audit_guard = init_tracing(&cli, &config)?;
    tracing::debug!(config = ?config_path, "Configuration loaded");

    let command = match &cli.command {
        Commands::Config(cmd) => return run_config(cmd, &config_path, &config),
        Commands::Storage(command) => command,
    };

    let actor = match &cli.actor {
        Some(id) => Actor::user(id.clone()),
        None => Actor::anonymous(),
    };

    let manager = FileManager::new(config)?;

    if let Err(e) = run(&manager, command, &actor, cli.json) {
        report_error(&e, cli.json);
        std::process::exit(1);
    }

    Ok(())
}

/// Install the console subscriber, plus a daily rolling audit log when an
/// audit directory is configured.
///
/// The returned guard flushes the audit writer and must outlive the command.
fn init_tracing(cli: &Cli, config: &Config) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.logging.log_level.to_lowercase()))
    };

    let console = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_filter(filter);

    let (audit, guard) = match (&config.logging.audit_dir, config.logging.audit_enabled) {
        (Some(dir), true) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create audit directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "audit.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(Targets::new().with_target(AUDIT_TARGET, tracing::Level::INFO));
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(audit)
        .init();

    Ok(guard)
}

fn run(manager: &FileManager, command: &StorageCommands, actor: &Actor, json: bool) -> anyhow::Result<()> {
    match command {
        StorageCommands::List { path, page } => {
            let listing = manager.list(path.as_deref(), *page, actor)?;
            if json {
                print_json(&listing)?;
            } else {
                print_listing(&listing);
            }
        }
        StorageCommands::Mkdir { path } => {
            let entry = manager.create_folder(Some(path.as_str()), actor)?;
            if json {
                print_json(&entry)?;
            } else {
                println!("Created {}", entry.relative_path);
            }
        }
        StorageCommands::Rm { path } => {
            manager.delete_file(Some(path.as_str()), actor)?;
            if !json {
                println!("Deleted {}", path);
            }
        }
        StorageCommands::Rmdir { path } => {
            manager.delete_folder(Some(path.as_str()), actor)?;
            if !json {
                println!("Deleted {}", path);
            }
        }
        StorageCommands::Rename {
            kind,
            path,
            new_name,
        } => {
            let outcome = manager.rename((*kind).into(), Some(path.as_str()), new_name, actor)?;
            if json {
                print_json(&outcome)?;
            } else if outcome.is_noop() {
                println!("Unchanged {}", outcome.old_path);
            } else {
                println!("Renamed {} -> {}", outcome.old_path, outcome.new_path);
            }
        }
        StorageCommands::Upload { local_file, dir } => {
            let name = local_file
                .file_name()
                .and_then(|n| n.to_str())
                .with_context(|| format!("Invalid file name: {}", local_file.display()))?;
            let bytes = fs::read(local_file)
                .with_context(|| format!("Failed to read {}", local_file.display()))?;

            let outcome = manager.upload(dir.as_deref(), name, &bytes, actor)?;
            if json {
                print_json(&outcome)?;
            } else {
                println!(
                    "Uploaded {} ({} bytes) -> {}",
                    outcome.filename, outcome.size, outcome.public_path
                );
            }
        }
        StorageCommands::ZipFolder { path, output } => {
            let archive = manager.build_folder_archive(Some(path.as_str()), actor)?;
            write_archive(archive, output.as_deref(), json)?;
        }
        StorageCommands::ZipFiles { paths, output } => {
            let archive = manager.build_files_archive(paths, actor)?;
            write_archive(archive, output.as_deref(), json)?;
        }
    }

    Ok(())
}

fn run_config(cmd: &ConfigCommands, path: &Path, config: &Config) -> anyhow::Result<()> {
    match cmd {
        ConfigCommands::Show => {
            print!("{}", config.to_toml()?);
        }
        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                eprintln!("Config file already exists: {}", path.display());
                eprintln!("Use --force to overwrite it.");
                std::process::exit(1);
            }
            Config::default().save(path)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}

fn write_archive(
    mut archive: engine::Archive,
    output: Option<&Path>,
    json: bool,
) -> anyhow::Result<()> {
    let target = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(&archive.info.file_name));

    let mut file = File::create(&target)
        .with_context(|| format!("Failed to create {}", target.display()))?;
    io::copy(&mut archive.stream, &mut file)
        .with_context(|| format!("Failed to write {}", target.display()))?;

    if json {
        print_json(&archive.info)?;
    } else {
        println!(
            "Wrote {} ({} entries, {} bytes)",
            target.display(),
            archive.info.entries,
            archive.info.size
        );
    }
    Ok(())
}

fn print_listing(listing: &Listing) {
    if let Some(error) = &listing.error {
        eprintln!("Warning: {}", error);
    }
    for dir in &listing.directories {
        println!("{:>12}  {}/", "-", dir.name);
    }
    for file in &listing.files {
        let size = file
            .size
            .map(|s| s.to_string())
            .unwrap_or_else(|| "?".to_string());
        println!("{:>12}  {}", size, file.name);
    }
    let p = &listing.pagination;
    println!();
    println!("Page {} of {} ({} entries)", p.page, p.total_pages, p.total);
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", to_json_pretty(value)?);
    Ok(())
}

fn report_error(error: &anyhow::Error, json: bool) {
    let Some(engine_error) = error.downcast_ref::<EngineError>() else {
        eprintln!("Error: {:#}", error);
        return;
    };

    let message = engine_error.to_error_message(None);
    if json {
        match to_json_pretty(&message) {
            Ok(body) => println!("{}", body),
            Err(_) => eprintln!("Error: {}", message.message),
        }
    } else {
        eprintln!("Error: {}", message.message);
        if message.recoverable {
            eprintln!("The operation may succeed if retried.");
        }
    }
}
