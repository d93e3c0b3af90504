//! Outbound request construction and request identity

use super::ReplayConfig;
use crate::error::{ReverbError, Result};
use crate::model::LogEntry;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use http::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use http::Method;
use sha2::{Digest, Sha256};

/// Product token sent when the log entry carries no User-Agent.
pub const USER_AGENT_TOKEN: &str = concat!("reverb/", env!("CARGO_PKG_VERSION"));

/// Decode the entry body: base64 when it decodes, literal bytes otherwise.
pub fn decode_body(entry: &LogEntry) -> Option<Vec<u8>> {
    if !entry.has_body() {
        return None;
    }

    Some(
        BASE64
            .decode(entry.body.as_bytes())
            .unwrap_or_else(|_| entry.body.clone().into_bytes()),
    )
}

/// Build the outbound request for one (entry, target) pair.
///
/// Entry headers are added in sorted-name, sorted-value order so multi-valued
/// headers are preserved deterministically; the auth value, user-supplied
/// headers, and the Content-Type/User-Agent defaults are applied on top.
pub fn build_request(
    client: &reqwest::Client,
    entry: &LogEntry,
    target: &str,
    config: &ReplayConfig,
) -> Result<reqwest::Request> {
    let scheme = if config.tls { "https" } else { "http" };
    let raw_url = if target.contains("://") {
        format!("{}{}", target, entry.path)
    } else {
        format!("{}://{}{}", scheme, target, entry.path)
    };

    let url = reqwest::Url::parse(&raw_url)
        .map_err(|e| ReverbError::Build(format!("invalid URL {}: {}", raw_url, e)))?;

    let method = Method::from_bytes(entry.method.as_bytes())
        .map_err(|e| ReverbError::Build(format!("invalid method {}: {}", entry.method, e)))?;

    let mut headers = HeaderMap::new();

    let mut names: Vec<&String> = entry.headers.keys().collect();
    names.sort();
    for name in names {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ReverbError::Build(format!("invalid header name {}: {}", name, e)))?;

        let mut values = entry.headers[name].clone();
        values.sort();
        for value in &values {
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| ReverbError::Build(format!("invalid header value: {}", e)))?;
            headers.append(header_name.clone(), header_value);
        }
    }

    if let Some(auth) = config.auth.as_deref().filter(|a| !a.is_empty()) {
        let value = HeaderValue::from_str(auth)
            .map_err(|e| ReverbError::Build(format!("invalid auth header: {}", e)))?;
        headers.insert(AUTHORIZATION, value);
    }

    for header in &config.headers {
        if let Some((name, value)) = header.split_once(':') {
            let header_name = HeaderName::from_bytes(name.trim().as_bytes())
                .map_err(|e| ReverbError::Build(format!("invalid header name: {}", e)))?;
            let header_value = HeaderValue::from_str(value.trim())
                .map_err(|e| ReverbError::Build(format!("invalid header value: {}", e)))?;
            headers.insert(header_name, header_value);
        }
    }

    let body = decode_body(entry);

    if body.is_some() && !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }

    if !headers.contains_key(USER_AGENT) {
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_TOKEN));
    }

    let mut builder = client.request(method, url).headers(headers);
    if let Some(bytes) = body {
        builder = builder.body(bytes);
    }

    builder
        .build()
        .map_err(|e| ReverbError::Build(e.to_string()))
}

/// Stable request identity: the first 16 hex chars of SHA-256 over method,
/// path, body, and the canonicalized headers. Pure function.
pub fn fingerprint(entry: &LogEntry) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entry.method.as_bytes());
    hasher.update(entry.path.as_bytes());
    hasher.update(entry.body.as_bytes());

    let mut names: Vec<&String> = entry.headers.keys().collect();
    names.sort();

    for name in names {
        let mut values = entry.headers[name].clone();
        values.sort();

        for value in &values {
            hasher.update(name.as_bytes());
            hasher.update(value.as_bytes());
        }
    }

    hasher
        .finalize()
        .iter()
        .take(8)
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn entry(method: &str, path: &str) -> LogEntry {
        LogEntry {
            method: method.to_string(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    fn test_config() -> ReplayConfig {
        ReplayConfig {
            targets: vec!["127.0.0.1:9999".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_body_base64() {
        let mut e = entry("POST", "/");
        e.body = BASE64.encode(b"{\"a\":1}");
        assert_eq!(decode_body(&e).unwrap(), b"{\"a\":1}");
    }

    #[test]
    fn test_decode_body_literal_fallback() {
        let mut e = entry("POST", "/");
        e.body = "not base64!!".to_string();
        assert_eq!(decode_body(&e).unwrap(), b"not base64!!");
    }

    #[test]
    fn test_build_request_url_and_method() {
        let client = reqwest::Client::new();
        let req = build_request(
            &client,
            &entry("GET", "/users?page=2"),
            "127.0.0.1:9999",
            &test_config(),
        )
        .unwrap();

        assert_eq!(req.method(), Method::GET);
        assert_eq!(req.url().as_str(), "http://127.0.0.1:9999/users?page=2");
    }

    #[test]
    fn test_build_request_target_with_scheme() {
        let client = reqwest::Client::new();
        let req = build_request(
            &client,
            &entry("GET", "/u"),
            "https://api.example.com",
            &test_config(),
        )
        .unwrap();

        assert_eq!(req.url().scheme(), "https");
    }

    #[test]
    fn test_build_request_invalid_method() {
        let client = reqwest::Client::new();
        let err = build_request(
            &client,
            &entry("GE T", "/"),
            "127.0.0.1:9999",
            &test_config(),
        );
        assert!(matches!(err, Err(ReverbError::Build(_))));
    }

    #[test]
    fn test_multi_valued_headers_preserved() {
        let client = reqwest::Client::new();
        let mut e = entry("GET", "/");
        e.headers.insert(
            "Accept".to_string(),
            vec!["text/html".to_string(), "application/json".to_string()],
        );

        let req = build_request(&client, &e, "127.0.0.1:9999", &test_config()).unwrap();
        let values: Vec<&str> = req
            .headers()
            .get_all("accept")
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        // Values are added in sorted order.
        assert_eq!(values, vec!["application/json", "text/html"]);
    }

    #[test]
    fn test_auth_overrides_entry_header() {
        let client = reqwest::Client::new();
        let mut e = entry("GET", "/");
        e.headers
            .insert("Authorization".to_string(), vec!["old".to_string()]);

        let mut config = test_config();
        config.auth = Some("Bearer token123".to_string());

        let req = build_request(&client, &e, "127.0.0.1:9999", &config).unwrap();
        assert_eq!(req.headers()[AUTHORIZATION], "Bearer token123");
    }

    #[test]
    fn test_user_headers_override() {
        let client = reqwest::Client::new();
        let mut config = test_config();
        config.headers = vec!["X-Env:  staging ".to_string()];

        let req = build_request(&client, &entry("GET", "/"), "127.0.0.1:9999", &config).unwrap();
        assert_eq!(req.headers()["x-env"], "staging");
    }

    #[test]
    fn test_content_type_default_only_with_body() {
        let client = reqwest::Client::new();

        let req =
            build_request(&client, &entry("GET", "/"), "127.0.0.1:9999", &test_config()).unwrap();
        assert!(!req.headers().contains_key(CONTENT_TYPE));

        let mut e = entry("POST", "/");
        e.body = "payload".to_string();
        let req = build_request(&client, &e, "127.0.0.1:9999", &test_config()).unwrap();
        assert_eq!(req.headers()[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn test_content_type_not_overridden() {
        let client = reqwest::Client::new();
        let mut e = entry("POST", "/");
        e.body = "payload".to_string();
        e.headers
            .insert("Content-Type".to_string(), vec!["text/plain".to_string()]);

        let req = build_request(&client, &e, "127.0.0.1:9999", &test_config()).unwrap();
        assert_eq!(req.headers()[CONTENT_TYPE], "text/plain");
    }

    #[test]
    fn test_user_agent_default() {
        let client = reqwest::Client::new();
        let req =
            build_request(&client, &entry("GET", "/"), "127.0.0.1:9999", &test_config()).unwrap();
        assert_eq!(req.headers()[USER_AGENT], USER_AGENT_TOKEN);
    }

    #[test]
    fn test_fingerprint_length_and_stability() {
        let e = entry("GET", "/users");
        let fp = fingerprint(&e);
        assert_eq!(fp.len(), 16);
        assert_eq!(fp, fingerprint(&e));
    }

    #[test]
    fn test_fingerprint_stable_under_header_reordering() {
        let mut headers1 = HashMap::new();
        headers1.insert("B".to_string(), vec!["2".to_string(), "1".to_string()]);
        headers1.insert("A".to_string(), vec!["x".to_string()]);

        let mut headers2 = HashMap::new();
        headers2.insert("A".to_string(), vec!["x".to_string()]);
        headers2.insert("B".to_string(), vec!["1".to_string(), "2".to_string()]);

        let mut e1 = entry("GET", "/");
        e1.headers = headers1;
        let mut e2 = entry("GET", "/");
        e2.headers = headers2;

        assert_eq!(fingerprint(&e1), fingerprint(&e2));
    }

    #[test]
    fn test_fingerprint_sensitive_to_content() {
        let e1 = entry("GET", "/a");
        let e2 = entry("GET", "/b");
        assert_ne!(fingerprint(&e1), fingerprint(&e2));

        let e3 = entry("POST", "/a");
        assert_ne!(fingerprint(&e1), fingerprint(&e3));
    }
}
