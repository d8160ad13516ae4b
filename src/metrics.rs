use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static CACHE_LOOKUP_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("cache_lookup_total", "Cache lookups by result");
    let vec = IntCounterVec::new(opts, &["result"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register cache_lookup_total");
    vec
});

static CACHE_STORE_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("cache_store_total", "Cache put calls by outcome");
    let vec = IntCounterVec::new(opts, &["outcome"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register cache_store_total");
    vec
});

static CACHE_OPEN_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("cache_open_total", "Underlying named cache opens")
        .expect("create cache_open_total");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_open_total");
    counter
});

static NETWORK_FETCH_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("network_fetch_total", "Network fetches by outcome");
    let vec = IntCounterVec::new(opts, &["outcome"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register network_fetch_total");
    vec
});

static CACHE_POPULATION_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("cache_population_total", "Bulk cache populations by outcome");
    let vec = IntCounterVec::new(opts, &["outcome"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register cache_population_total");
    vec
});

static STALE_SERVED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "stale_served_total",
        "Stale entries served because a refresh could not reach the network",
    )
    .expect("create stale_served_total");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register stale_served_total");
    counter
});

pub fn record_cache_lookup(hit: bool) {
    let label = if hit { "hit" } else { "miss" };
    CACHE_LOOKUP_TOTAL.with_label_values(&[label]).inc();
}

pub fn record_cache_store(stored: bool) {
    let label = if stored { "stored" } else { "refused" };
    CACHE_STORE_TOTAL.with_label_values(&[label]).inc();
}

pub fn record_cache_store_error() {
    CACHE_STORE_TOTAL.with_label_values(&["error"]).inc();
}

pub fn record_cache_open() {
    CACHE_OPEN_TOTAL.inc();
}

pub fn record_network_fetch(ok: bool) {
    let label = if ok { "ok" } else { "error" };
    NETWORK_FETCH_TOTAL.with_label_values(&[label]).inc();
}

pub fn record_population(ok: bool) {
    let label = if ok { "ok" } else { "failed" };
    CACHE_POPULATION_TOTAL.with_label_values(&[label]).inc();
}

pub fn record_stale_served() {
    STALE_SERVED_TOTAL.inc();
}

pub fn gather() -> Vec<u8> {
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("encode metrics");
    buffer
}
