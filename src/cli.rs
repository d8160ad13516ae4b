use std::path::PathBuf;

use clap::{Parser, Subcommand};
use http::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::orchestrator::MissStrategy;
use crate::util::parse_header_arg;

#[derive(Debug, Clone, Parser)]
#[command(name = "offline-cache", about = "Offline resource cache manager")]
pub struct Cli {
    /// Path to the configuration file (defaults to ./offline-cache.toml if present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Never touch the network.
    #[arg(long, global = true)]
    pub offline: bool,

    /// Print metrics in Prometheus text format to stderr when done.
    #[arg(long, global = true)]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Fetch every URL and store all of them, or none.
    Populate {
        cache: String,
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Serve a URL from the cache, falling back according to the strategy.
    Get {
        cache: String,
        url: String,
        /// On a miss: `fetch`, `throw` or `store`.
        #[arg(long, default_value = "fetch", value_parser = parse_strategy)]
        strategy: MissStrategy,
    },
    /// Re-fetch a cached URL when stale.
    Refresh {
        cache: String,
        url: String,
        #[arg(long)]
        force: bool,
    },
    Has {
        cache: String,
        url: String,
    },
    /// Store a response read from a file.
    Put {
        cache: String,
        url: String,
        /// File holding the response body.
        #[arg(long)]
        body: Option<PathBuf>,
        #[arg(long, default_value_t = 200)]
        status: u16,
        /// Response header as `Name: value`; may be repeated.
        #[arg(long = "header", value_parser = parse_header_arg)]
        headers: Vec<(HeaderName, HeaderValue)>,
    },
    Delete {
        cache: String,
        url: String,
        #[arg(long)]
        ignore_search: bool,
        #[arg(long)]
        ignore_method: bool,
    },
    /// Delete every cache.
    Purge,
    /// List cache names, or the entries of one cache.
    List { cache: Option<String> },
    /// Answer JSON-line commands on stdin until it closes.
    Serve,
}

fn parse_strategy(value: &str) -> Result<MissStrategy, String> {
    value.parse().map_err(|err| format!("{err}"))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}
