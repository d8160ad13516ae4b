use std::time::Duration;

use anyhow::{Result, anyhow};
use time::OffsetDateTime;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogFormat;

const DEFAULT_FILTER: &str = "info";

pub fn init_logger(format: LogFormat) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    match format {
        LogFormat::Json => fmt::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .try_init()
            .map_err(|err| anyhow!(err))?,
        LogFormat::Text => fmt::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
            .try_init()
            .map_err(|err| anyhow!(err))?,
    }

    Ok(())
}

/// One line per strategy invocation, describing what the cache did.
#[derive(Debug, Clone)]
pub struct CacheEvent {
    pub operation: &'static str,
    pub cache: String,
    pub url: String,
    pub lookup: Option<&'static str>,
    pub store: Option<&'static str>,
    pub source: Option<&'static str>,
    pub elapsed_ms: u128,
    pub error_kind: Option<&'static str>,
    pub error_detail: Option<String>,
}

#[derive(Debug)]
pub struct CacheEventBuilder {
    event: CacheEvent,
}

impl CacheEventBuilder {
    pub fn new(operation: &'static str, cache: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            event: CacheEvent {
                operation,
                cache: cache.into(),
                url: url.into(),
                lookup: None,
                store: None,
                source: None,
                elapsed_ms: 0,
                error_kind: None,
                error_detail: None,
            },
        }
    }

    pub fn lookup(mut self, value: &'static str) -> Self {
        self.event.lookup = Some(value);
        self
    }

    pub fn store(mut self, value: &'static str) -> Self {
        self.event.store = Some(value);
        self
    }

    /// Where the returned response came from: `cache`, `network` or `stale`.
    pub fn source(mut self, value: &'static str) -> Self {
        self.event.source = Some(value);
        self
    }

    pub fn elapsed(mut self, elapsed: Duration) -> Self {
        self.event.elapsed_ms = elapsed.as_millis();
        self
    }

    pub fn error(mut self, kind: &'static str, detail: impl Into<String>) -> Self {
        self.event.error_kind = Some(kind);
        self.event.error_detail = Some(detail.into());
        self
    }

    pub fn build(self) -> CacheEvent {
        self.event
    }

    pub fn log(self) {
        log_cache_event(self.build());
    }
}

pub fn log_cache_event(event: CacheEvent) {
    let CacheEvent {
        operation,
        cache,
        url,
        lookup,
        store,
        source,
        elapsed_ms,
        error_kind,
        error_detail,
    } = event;

    let now = OffsetDateTime::now_utc();
    let (year, month, day) = now.to_calendar_date();
    let (hour, minute, second) = now.to_hms();
    let millisecond = now.millisecond();
    let month_number: u8 = month.into();
    let ts = format!(
        "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{millisecond:03}Z",
        month = month_number
    );

    tracing::info!(
        target: "cache_event",
        ts,
        operation,
        cache,
        url,
        lookup,
        store,
        source,
        elapsed_ms,
        error_kind,
        error_detail = error_detail.as_deref(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone)]
    struct BufferWriter {
        buf: Arc<Mutex<Vec<u8>>>,
    }

    impl Write for BufferWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.buf.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for BufferWriter {
        type Writer = BufferWriter;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn cache_event_includes_outcome_fields() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = BufferWriter {
            buf: buffer.clone(),
        };
        let subscriber = tracing_subscriber::fmt()
            .with_writer(writer)
            .with_target(false)
            .with_ansi(false)
            .without_time()
            .compact()
            .finish();

        let event = CacheEventBuilder::new("respond", "assets", "/a.js")
            .lookup("miss")
            .store("stored")
            .source("network")
            .build();

        tracing::subscriber::with_default(subscriber, || {
            log_cache_event(event);
        });

        let output = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(
            output.contains("lookup=\"miss\""),
            "missing lookup in output: {output}"
        );
        assert!(
            output.contains("store=\"stored\""),
            "missing store in output: {output}"
        );
        assert!(
            output.contains("cache=\"assets\""),
            "missing cache in output: {output}"
        );
    }
}
