//! Single-shared-secret authentication for the HTTP and MCP boundaries.
//!
//! A configured key is compared against `X-MCP-API-Key` or an
//! `Authorization: Bearer <token>` header. When no key is configured, every
//! request is refused unless `MCP_API_KEY_ALLOW_INSECURE_LOCAL` is set AND
//! the request originates from a loopback address.

use std::net::IpAddr;

const HEADER_API_KEY: &str = "x-mcp-api-key";
const HEADER_AUTHORIZATION: &str = "authorization";

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub api_key: Option<String>,
    pub allow_insecure_local: bool,
}

impl AuthConfig {
    pub fn from_env() -> Self {
        let api_key = std::env::var("MCP_API_KEY").ok().filter(|s| !s.is_empty());
        let allow_insecure_local = std::env::var("MCP_API_KEY_ALLOW_INSECURE_LOCAL")
            .ok()
            .is_some_and(|v| crate::config::parse_bool_flag(&v));
        Self { api_key, allow_insecure_local }
    }
}

/// Byte-length- and content-independent comparison: always walks the full
/// length of both strings, so a timing side-channel can't shorten a guess.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        // Still scan to avoid an early branch revealing length via timing.
        let probe = if a.is_empty() { b } else { a };
        let mut acc = 0u8;
        for byte in probe {
            acc |= *byte;
        }
        let _ = acc;
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn extract_presented_key(headers: &dyn HeaderLookup) -> Option<String> {
    if let Some(key) = headers.get(HEADER_API_KEY) {
        return Some(key.to_string());
    }
    headers
        .get(HEADER_AUTHORIZATION)
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(|s| s.to_string())
}

/// Minimal abstraction over header lookup so this module doesn't depend on
/// the HTTP or MCP transport's concrete request types.
pub trait HeaderLookup {
    fn get(&self, name: &str) -> Option<&str>;
}

pub fn authorize(config: &AuthConfig, headers: &dyn HeaderLookup, remote_addr: Option<IpAddr>) -> bool {
    match &config.api_key {
        Some(configured) => match extract_presented_key(headers) {
            Some(presented) => constant_time_eq(configured, &presented),
            None => false,
        },
        None => {
            config.allow_insecure_local && remote_addr.is_some_and(|addr| addr.is_loopback())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapHeaders(HashMap<String, String>);
    impl HeaderLookup for MapHeaders {
        fn get(&self, name: &str) -> Option<&str> {
            self.0.get(name).map(|s| s.as_str())
        }
    }

    #[test]
    fn rejects_missing_key_when_configured() {
        let config = AuthConfig { api_key: Some("secret".into()), allow_insecure_local: false };
        let headers = MapHeaders(HashMap::new());
        assert!(!authorize(&config, &headers, None));
    }

    #[test]
    fn accepts_matching_x_mcp_api_key_header() {
        let config = AuthConfig { api_key: Some("secret".into()), allow_insecure_local: false };
        let mut map = HashMap::new();
        map.insert(HEADER_API_KEY.to_string(), "secret".to_string());
        assert!(authorize(&config, &MapHeaders(map), None));
    }

    #[test]
    fn accepts_matching_bearer_token() {
        let config = AuthConfig { api_key: Some("secret".into()), allow_insecure_local: false };
        let mut map = HashMap::new();
        map.insert(HEADER_AUTHORIZATION.to_string(), "Bearer secret".to_string());
        assert!(authorize(&config, &MapHeaders(map), None));
    }

    #[test]
    fn rejects_wrong_key() {
        let config = AuthConfig { api_key: Some("secret".into()), allow_insecure_local: false };
        let mut map = HashMap::new();
        map.insert(HEADER_API_KEY.to_string(), "wrong".to_string());
        assert!(!authorize(&config, &MapHeaders(map), None));
    }

    #[test]
    fn no_key_configured_allows_loopback_only_when_override_set() {
        let config = AuthConfig { api_key: None, allow_insecure_local: true };
        let headers = MapHeaders(HashMap::new());
        assert!(authorize(&config, &headers, Some("127.0.0.1".parse().unwrap())));
        assert!(!authorize(&config, &headers, Some("10.0.0.5".parse().unwrap())));
    }

    #[test]
    fn no_key_configured_refuses_everything_without_override() {
        let config = AuthConfig { api_key: None, allow_insecure_local: false };
        let headers = MapHeaders(HashMap::new());
        assert!(!authorize(&config, &headers, Some("127.0.0.1".parse().unwrap())));
    }
}
