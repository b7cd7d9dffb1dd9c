//! CLI argument parsing with clap

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// minitile - download, install and start games from your library
#[derive(Parser, Debug)]
#[command(name = "minitile")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Settings file (defaults to ~/.config/minitile/settings.json)
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Catalog file listing the library's items
    #[arg(long, global = true, default_value = "catalog.json")]
    pub catalog: PathBuf,

    /// Ask this API for download links instead of the catalog file
    #[arg(long, global = true, env = "MINITILE_API")]
    pub api: Option<String>,

    /// Bearer token for --api
    #[arg(long, global = true, env = "MINITILE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List items and their install state
    List(ListArgs),

    /// Download and install an item
    Install(ItemArgs),

    /// Start an installed item and wait for it to exit
    Run(ItemArgs),

    /// Show or change settings
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only show installed items
    #[arg(long, conflicts_with = "available")]
    pub installed: bool,

    /// Only show items that are not installed
    #[arg(long)]
    pub available: bool,
}

#[derive(Args, Debug)]
pub struct ItemArgs {
    /// Catalog item id
    pub id: u64,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Directory games are installed into
    #[arg(long)]
    pub library_root: Option<PathBuf>,

    /// Cache directory for downloads and extraction
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Install one item somewhere else: <ID>=<DIR>
    #[arg(long, value_parser = parse_override)]
    pub install_dir: Option<(u64, PathBuf)>,
}

fn parse_override(s: &str) -> Result<(u64, PathBuf), String> {
    let (id, dir) = s
        .split_once('=')
        .ok_or_else(|| format!("expected <ID>=<DIR>, got '{s}'"))?;
    let id = id
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("invalid item id '{id}': {e}"))?;
    Ok((id, PathBuf::from(dir)))
}
