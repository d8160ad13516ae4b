pub mod backend;
pub mod cache_control;
pub mod cli;
pub mod client;
pub mod command;
pub mod error;
pub mod fetch;
pub mod freshness;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod registry;
pub mod resource;
pub mod settings;
pub mod store;
pub mod util;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use http::StatusCode;
use tokio::io::BufReader;
use tracing::info;

pub use crate::client::CacheClient;
pub use crate::error::{CacheError, CacheResult};
pub use crate::orchestrator::{CacheOrchestrator, MissStrategy};
pub use crate::resource::{CacheRequest, CacheResponse, CachedEntry, QueryOptions, RequestRef};

use crate::{
    backend::{DiskBackend, MemoryBackend, NamedCacheBackend},
    cli::{Cli, Command},
    command::{CacheCommand, CacheReply, WireRequest, WireResponse},
    fetch::HttpFetcher,
    settings::{BackendKind, Settings},
};

pub async fn build_client(settings: &Settings) -> Result<CacheClient> {
    let backend: Arc<dyn NamedCacheBackend> = match settings.backend {
        BackendKind::Disk => Arc::new(DiskBackend::new(settings.cache_dir.clone()).await?),
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
    };
    let fetcher = HttpFetcher::new(
        settings.base_url.as_deref(),
        &settings.user_agent,
        settings.offline,
    )?;
    info!(
        backend = ?settings.backend,
        cache_dir = %settings.cache_dir.display(),
        offline = settings.offline,
        "cache client ready"
    );
    Ok(CacheClient::with_backend(
        backend,
        Arc::new(fetcher),
        settings.fetch_timeout(),
    ))
}

pub async fn run(cli: Cli, settings: Settings) -> Result<()> {
    let client = build_client(&settings).await?;
    let outcome = match cli.command {
        Command::Serve => {
            let stdin = BufReader::new(tokio::io::stdin());
            command::serve_lines(&client, stdin, tokio::io::stdout()).await
        }
        other => run_once(&client, other).await,
    };
    if cli.metrics {
        eprint!("{}", String::from_utf8_lossy(&metrics::gather()));
    }
    outcome
}

async fn run_once(client: &CacheClient, command: Command) -> Result<()> {
    let command = to_cache_command(command).await?;
    let reply = client.handle(command).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&reply).context("failed to encode reply")?
    );
    if let CacheReply::Error { kind, message } = reply {
        bail!("{kind}: {message}");
    }
    Ok(())
}

async fn to_cache_command(command: Command) -> Result<CacheCommand> {
    let command = match command {
        Command::Populate { cache, urls } => CacheCommand::PopulateCache {
            cache,
            requests: urls.into_iter().map(WireRequest::Url).collect(),
        },
        Command::Get {
            cache,
            url,
            strategy,
        } => CacheCommand::RespondFromCache {
            cache,
            request: WireRequest::Url(url),
            strategy,
        },
        Command::Refresh { cache, url, force } => CacheCommand::RefreshCacheEntry {
            cache,
            request: WireRequest::Url(url),
            force,
        },
        Command::Has { cache, url } => CacheCommand::HasCacheEntry {
            cache,
            request: WireRequest::Url(url),
        },
        Command::Put {
            cache,
            url,
            body,
            status,
            headers,
        } => {
            let body = match body {
                Some(path) => tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("failed to read body from {}", path.display()))?,
                None => String::new(),
            };
            let mut response = CacheResponse::new(url.clone(), StatusCode::from_u16(status)?)
                .body(body);
            for (name, value) in headers {
                response = response.header(name, value);
            }
            CacheCommand::PutCacheEntry {
                cache,
                request: WireRequest::Url(url),
                response: WireResponse::from(&response),
            }
        }
        Command::Delete {
            cache,
            url,
            ignore_search,
            ignore_method,
        } => CacheCommand::DeleteCacheEntry {
            cache,
            request: WireRequest::Url(url),
            options: QueryOptions {
                ignore_search,
                ignore_method,
            },
        },
        Command::Purge => CacheCommand::DeleteAllCaches,
        Command::List { cache } => CacheCommand::Keys { cache },
        Command::Serve => bail!("serve is not a single command"),
    };
    Ok(command)
}
