use std::{future::Future, time::Duration};

use tokio::time::timeout;

use crate::fetch::FetchError;

/// Bounds a network fetch by `limit` when one is configured. Without a limit
/// the future runs to completion however long it takes.
pub async fn fetch_with_timeout<F, T>(
    limit: Option<Duration>,
    url: &str,
    future: F,
) -> Result<T, FetchError>
where
    F: Future<Output = Result<T, FetchError>>,
{
    let Some(limit) = limit else {
        return future.await;
    };
    timeout(limit, future)
        .await
        .map_err(|_| FetchError::Timeout {
            url: url.to_string(),
            after: limit,
        })?
}

/// Splits a `Name: value` header line as accepted on the command line.
pub fn parse_header_arg(value: &str) -> anyhow::Result<(http::HeaderName, http::HeaderValue)> {
    let (name, value) = value
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("header {value:?} must look like 'Name: value'"))?;
    let name = http::HeaderName::from_bytes(name.trim().as_bytes())
        .map_err(|err| anyhow::anyhow!("invalid header name {name:?}: {err}"))?;
    let value = http::HeaderValue::from_str(value.trim())
        .map_err(|err| anyhow::anyhow!("invalid header value {value:?}: {err}"))?;
    Ok((name, value))
}
