#![no_main]

use http::HeaderValue;
use http::header::{CACHE_CONTROL, DATE, EXPIRES};
use libfuzzer_sys::fuzz_target;

use offline_cache::{
    CacheResponse,
    cache_control::{parse_directives, response_is_cacheable},
    freshness::staleness,
};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let payload = &data[1..];
    let split = (data[0] as usize) % (payload.len() + 1);
    let (directive_bytes, date_bytes) = payload.split_at(split);
    let directives = String::from_utf8_lossy(directive_bytes);

    let parsed = parse_directives(Some(directives.as_ref()));
    for (name, _) in parsed.iter() {
        assert_eq!(name.trim(), name);
    }

    let mut response = CacheResponse::ok("/fuzz");
    if let Ok(value) = HeaderValue::from_bytes(directive_bytes) {
        response = response.header(CACHE_CONTROL, value);
    }
    if let Ok(value) = HeaderValue::from_bytes(date_bytes) {
        response = response
            .header(DATE, value.clone())
            .header(EXPIRES, value);
    }

    let _ = response_is_cacheable(&response);
    let _ = staleness(&response);
});
