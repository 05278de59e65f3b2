// Wormhole Linux host: link tool, settings and downloads import on top of wormhole-core.

mod config;
mod logging;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{debug, info};
use wormhole_core::link::{host_link, relay_link, transfer_link};
use wormhole_core::{
    mime_type_for, parse_link, Committer, Config, DownloadCommitter, DownloadsDir, TransferCode,
};

#[derive(Parser, Debug)]
#[command(name = "wormhole", version, about = "Wormhole transfer client tools")]
struct Args {
    /// Directory holding wormhole-william.json
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Where received files are saved
    #[arg(long, global = true)]
    download_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a link, scanned QR payload or typed code and print it as JSON
    Resolve { text: String },
    /// Build a shareable link for a code
    Link {
        code: String,
        /// Rendezvous endpoint (or host for --format host); defaults to the configured one
        #[arg(long)]
        rendezvous: Option<String>,
        #[arg(long, value_enum, default_value_t = LinkFormat::Transfer)]
        format: LinkFormat,
    },
    /// Show or change persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Import a received file into the downloads directory
    Save {
        path: PathBuf,
        /// Name to save under; defaults to the file's own name
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        mime: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Show,
    Set {
        /// Empty string restores the engine default
        #[arg(long)]
        rendezvous_url: Option<String>,
        /// Words in generated codes; 0 restores the engine default
        #[arg(long, allow_negative_numbers = true)]
        code_length: Option<i64>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LinkFormat {
    /// wormhole-transfer:<code>?rendezvous=<url>
    Transfer,
    /// wormhole:<url>?code=<code> (QR payload)
    Relay,
    /// wormhole://<host>?code=<code>
    Host,
}

#[derive(Serialize)]
struct ShownConfig<'a> {
    data_dir: &'a Path,
    download_dir: &'a Path,
    config_file: PathBuf,
    rendezvous_url: &'a str,
    code_len: i64,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    logging::init(&args.log_level)?;

    let settings = config::load(&config::Overrides {
        data_dir: args.data_dir.clone(),
        download_dir: args.download_dir.clone(),
    });
    debug!(data_dir = %settings.data_dir.display(), "settings loaded");

    match args.command {
        Command::Resolve { text } => match resolve_json(&text)? {
            Some(json) => println!("{json}"),
            None => {
                eprintln!("no wormhole link or code found");
                return Ok(ExitCode::from(1));
            }
        },
        Command::Link {
            code,
            rendezvous,
            format,
        } => {
            let configured = settings.config.rendezvous_url.as_str();
            let endpoint = rendezvous.as_deref().unwrap_or(configured);
            println!("{}", build_link(&TransferCode::normalize(&code), format, endpoint)?);
        }
        Command::Config { action } => match action {
            ConfigAction::Show => {
                let shown = ShownConfig {
                    data_dir: &settings.data_dir,
                    download_dir: &settings.download_dir,
                    config_file: Config::path(&settings.data_dir),
                    rendezvous_url: &settings.config.rendezvous_url,
                    code_len: settings.config.code_length,
                };
                println!("{}", serde_json::to_string_pretty(&shown)?);
            }
            ConfigAction::Set {
                rendezvous_url,
                code_length,
            } => {
                // Start from what is on disk so env overrides are not persisted.
                let mut stored = Config::load(&settings.data_dir);
                apply_changes(&mut stored, rendezvous_url, code_length);
                stored.save(&settings.data_dir)?;
                info!(path = %Config::path(&settings.data_dir).display(), "settings saved");
            }
        },
        Command::Save { path, name, mime } => {
            let committer = DownloadCommitter::new(DownloadsDir::new(&settings.download_dir));
            let saved = save_file(&committer, &path, name.as_deref(), mime.as_deref())?;
            println!("{}", saved.display());
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn resolve_json(text: &str) -> Result<Option<String>> {
    match parse_link(text) {
        Some(link) => Ok(Some(serde_json::to_string(&link)?)),
        None => Ok(None),
    }
}

fn build_link(code: &TransferCode, format: LinkFormat, endpoint: &str) -> Result<String> {
    if code.is_empty() {
        bail!("code is empty");
    }
    let endpoint = endpoint.trim();
    match format {
        LinkFormat::Transfer => Ok(transfer_link(code, Some(endpoint))),
        LinkFormat::Relay | LinkFormat::Host if endpoint.is_empty() => {
            bail!("--rendezvous is required when no rendezvous URL is configured")
        }
        LinkFormat::Relay => Ok(relay_link(endpoint, code)),
        LinkFormat::Host => Ok(host_link(endpoint, code)),
    }
}

fn apply_changes(config: &mut Config, rendezvous_url: Option<String>, code_length: Option<i64>) {
    if let Some(url) = rendezvous_url {
        config.rendezvous_url = url.trim().to_string();
    }
    if let Some(n) = code_length {
        config.code_length = n;
    }
}

fn save_file(
    committer: &dyn Committer,
    path: &Path,
    name: Option<&str>,
    mime: Option<&str>,
) -> Result<PathBuf> {
    let size = std::fs::metadata(path)
        .with_context(|| format!("cannot read {}", path.display()))?
        .len();
    let name = match name {
        Some(n) => n.to_string(),
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", path.display()))?,
    };
    let mime = mime.unwrap_or_else(|| mime_type_for(path));
    let saved = committer
        .commit(&name, path, mime, size)
        .with_context(|| format!("failed to save {}", path.display()))?;
    Ok(saved.location)
}
