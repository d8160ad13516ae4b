//! Staleness arithmetic over `Expires`, `Date` and `max-age`.
//!
//! All comparisons happen on whole seconds since the Unix epoch; sub-second
//! parts are truncated, never rounded.

use std::time::{SystemTime, UNIX_EPOCH};

use http::header::{DATE, EXPIRES};

use crate::cache_control::{MAX_AGE, directives_of, header_text};
use crate::error::{CacheError, CacheResult};
use crate::resource::CacheResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalenessVerdict {
    Fresh,
    Stale,
    /// Neither `Expires` nor `Cache-Control` is present.
    Indeterminate,
}

impl StalenessVerdict {
    pub fn is_stale(self) -> bool {
        matches!(self, Self::Stale)
    }
}

fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

fn parse_date(value: &str, header: &'static str) -> CacheResult<SystemTime> {
    httpdate::parse_http_date(value.trim()).map_err(|_| CacheError::InvalidDate {
        header,
        value: value.to_string(),
    })
}

pub fn is_expired(response: &CacheResponse) -> CacheResult<bool> {
    is_expired_at(response, SystemTime::now())
}

pub fn is_expired_at(response: &CacheResponse, now: SystemTime) -> CacheResult<bool> {
    let value = header_text(&response.headers, &EXPIRES)?
        .ok_or(CacheError::MissingHeader("Expires header"))?;
    let expires = parse_date(&value, "Expires")?;
    Ok(unix_secs(now) > unix_secs(expires))
}

pub fn has_max_age_lapsed(response: &CacheResponse) -> CacheResult<bool> {
    has_max_age_lapsed_at(response, SystemTime::now())
}

pub fn has_max_age_lapsed_at(response: &CacheResponse, now: SystemTime) -> CacheResult<bool> {
    let cc = directives_of(&response.headers)?
        .ok_or(CacheError::MissingHeader("Cache-Control header"))?;
    let max_age = cc
        .get(MAX_AGE)
        .ok_or(CacheError::MissingHeader("max-age directive"))?
        .unwrap_or_default();
    let date = header_text(&response.headers, &DATE)?
        .ok_or(CacheError::MissingHeader("Date header"))?;

    let date = parse_date(&date, "Date")?;
    let max_age = max_age
        .parse::<u64>()
        .map_err(|_| CacheError::InvalidNumber {
            directive: MAX_AGE,
            value: max_age.to_string(),
        })?;
    Ok(unix_secs(now) > unix_secs(date).saturating_add(max_age))
}

pub fn staleness(response: &CacheResponse) -> CacheResult<StalenessVerdict> {
    staleness_at(response, SystemTime::now())
}

/// `Expires` wins over `Cache-Control`; a response carrying neither is
/// [`StalenessVerdict::Indeterminate`].
pub fn staleness_at(response: &CacheResponse, now: SystemTime) -> CacheResult<StalenessVerdict> {
    let lapsed = if response.headers.contains_key(EXPIRES) {
        is_expired_at(response, now)?
    } else if response.headers.contains_key(http::header::CACHE_CONTROL) {
        has_max_age_lapsed_at(response, now)?
    } else {
        return Ok(StalenessVerdict::Indeterminate);
    };
    Ok(if lapsed {
        StalenessVerdict::Stale
    } else {
        StalenessVerdict::Fresh
    })
}

/// Indeterminate responses are reported as not stale.
pub fn is_stale(response: &CacheResponse) -> CacheResult<bool> {
    Ok(staleness(response)?.is_stale())
}

pub fn is_stale_at(response: &CacheResponse, now: SystemTime) -> CacheResult<bool> {
    Ok(staleness_at(response, now)?.is_stale())
}
