use std::collections::HashMap;

use http::HeaderMap;
use http::header::{CACHE_CONTROL, EXPIRES, HeaderName};

use crate::error::{CacheError, CacheResult};
use crate::resource::{CacheRequest, CacheResponse};

pub const NO_STORE: &str = "no-store";
pub const MAX_AGE: &str = "max-age";

/// Parsed `Cache-Control` directives. Names are kept exactly as written;
/// `No-Store` and `no-store` are different directives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheDirectives {
    directives: HashMap<String, Option<String>>,
}

impl CacheDirectives {
    pub fn contains(&self, name: &str) -> bool {
        self.directives.contains_key(name)
    }

    /// Value of a directive. `None` when absent, `Some(None)` when present
    /// without `=`.
    pub fn get(&self, name: &str) -> Option<Option<&str>> {
        self.directives.get(name).map(|value| value.as_deref())
    }

    pub fn len(&self) -> usize {
        self.directives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.directives
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_deref()))
    }
}

pub fn parse_directives(value: Option<&str>) -> CacheDirectives {
    let mut directives = HashMap::new();
    let Some(value) = value else {
        return CacheDirectives { directives };
    };

    for part in value.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.split_once('=') {
            Some((name, value)) => {
                directives.insert(name.trim().to_string(), Some(value.trim().to_string()));
            }
            None => {
                directives.insert(part.to_string(), None);
            }
        }
    }
    CacheDirectives { directives }
}

/// Text of a header, joining repeated fields with `", "`. Values that are
/// not visible ASCII make the message malformed.
pub(crate) fn header_text(headers: &HeaderMap, name: &HeaderName) -> CacheResult<Option<String>> {
    let mut joined: Option<String> = None;
    for value in headers.get_all(name) {
        let text = value
            .to_str()
            .map_err(|_| CacheError::invalid(format!("{name} header is not valid text")))?;
        match joined.as_mut() {
            Some(existing) => {
                existing.push_str(", ");
                existing.push_str(text);
            }
            None => joined = Some(text.to_string()),
        }
    }
    Ok(joined)
}

pub(crate) fn directives_of(headers: &HeaderMap) -> CacheResult<Option<CacheDirectives>> {
    Ok(header_text(headers, &CACHE_CONTROL)?.map(|text| parse_directives(Some(&text))))
}

fn ensure_request_shape(request: &CacheRequest) -> CacheResult<()> {
    let url = request.url.trim();
    if url.is_empty() {
        return Err(CacheError::invalid("request URL must not be empty"));
    }
    if url.chars().any(char::is_whitespace) {
        return Err(CacheError::invalid(format!(
            "request URL {:?} contains whitespace",
            request.url
        )));
    }
    Ok(())
}

pub fn request_is_cacheable(request: &CacheRequest) -> CacheResult<bool> {
    ensure_request_shape(request)?;
    let directives = directives_of(&request.headers)?;
    Ok(!directives.is_some_and(|cc| cc.contains(NO_STORE)))
}

/// Responses without `Cache-Control` are cacheable. With it, `no-store`
/// forbids caching and otherwise an explicit lifetime (`max-age` or
/// `Expires`) is required.
pub fn response_is_cacheable(response: &CacheResponse) -> CacheResult<bool> {
    let Some(cc) = directives_of(&response.headers)? else {
        return Ok(true);
    };
    if cc.contains(NO_STORE) {
        return Ok(false);
    }
    if cc.contains(MAX_AGE) {
        return Ok(true);
    }
    Ok(header_text(&response.headers, &EXPIRES)?.is_some())
}
