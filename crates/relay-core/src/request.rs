//! Outbound request description.
//!
//! A `RequestSpec` is immutable once handed to the client. Header names are
//! matched case-insensitively but kept in insertion order with their original
//! spelling.

use crate::error::{RelayError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Head,
    Options,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Methods that never change server state.
    ///
    /// Not the cacheability test: HEAD and OPTIONS would share GET's
    /// URL-keyed cache entry, so `RequestSpec::cacheable` admits GET only.
    pub fn is_read_only(&self) -> bool {
        matches!(self, HttpMethod::Get | HttpMethod::Head | HttpMethod::Options)
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(RelayError::InvalidRequest {
                message: format!("unsupported method {:?}", other),
            }),
        }
    }
}

/// Ordered header map with case-insensitive names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing any existing value under the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let idx = self.0.iter().position(|(k, _)| k.eq_ignore_ascii_case(name))?;
        Some(self.0.remove(idx).1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

/// Immutable description of an outbound call.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub id: String,
    pub url: String,
    pub method: HttpMethod,
    pub headers: Headers,
    pub body: Option<Bytes>,
    /// Per-attempt deadline. `None` uses the client's `default_timeout_ms`.
    pub timeout: Option<Duration>,
}

impl RequestSpec {
    /// Build a spec with a fresh id.
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.into(),
            method,
            headers: Headers::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, url)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Attach a JSON body and set the content type.
    pub fn with_json<T: Serialize>(self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(self
            .with_header("Content-Type", "application/json")
            .with_body(body))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The deadline for one attempt.
    pub fn effective_timeout(&self, default: Duration) -> Duration {
        self.timeout.unwrap_or(default)
    }

    /// Only GET responses are cached; the cache is keyed by URL alone.
    pub fn cacheable(&self) -> bool {
        self.method == HttpMethod::Get
    }

    /// Reject specs that must never reach the network.
    pub fn validate(&self) -> Result<()> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(RelayError::InvalidRequest {
                message: "url is empty".to_string(),
            });
        }
        let lowered = url.to_ascii_lowercase();
        if lowered.contains("<script") || lowered.starts_with("javascript:") {
            return Err(RelayError::InvalidRequest {
                message: "url contains a script payload".to_string(),
            });
        }
        if self.id.is_empty() {
            return Err(RelayError::InvalidRequest {
                message: "request id is empty".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientDefaults;

    #[test]
    fn test_headers_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/plain");
        headers.insert("content-type", "application/json");
        headers.insert("Accept", "*/*");

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("CONTENT-TYPE"), Some("application/json"));
        let names: Vec<&str> = headers.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["Content-Type", "Accept"]);

        assert_eq!(headers.remove("accept"), Some("*/*".to_string()));
        assert!(!headers.contains("Accept"));
    }

    #[test]
    fn test_cacheable_only_for_get() {
        assert!(RequestSpec::get("/users").cacheable());
        assert!(!RequestSpec::post("/users").cacheable());
        assert!(!RequestSpec::new(HttpMethod::Head, "/users").cacheable());
        assert!(HttpMethod::Head.is_read_only());
        assert!(!HttpMethod::Delete.is_read_only());
    }

    #[test]
    fn test_defaults() {
        let spec = RequestSpec::get("/x");
        assert_eq!(
            spec.effective_timeout(ClientDefaults::REQUEST_TIMEOUT),
            Duration::from_secs(30)
        );
        let spec = spec.with_timeout(Duration::from_secs(2));
        assert_eq!(spec.effective_timeout(ClientDefaults::REQUEST_TIMEOUT), Duration::from_secs(2));
        assert!(spec.body.is_none());
        assert!(!spec.id.is_empty());
        assert_ne!(spec.id, RequestSpec::get("/x").id);
    }

    #[test]
    fn test_validate_rejects_script_payloads() {
        assert!(RequestSpec::get("").validate().is_err());
        assert!(RequestSpec::get("   ").validate().is_err());
        assert!(RequestSpec::get("javascript:alert(1)").validate().is_err());
        assert!(RequestSpec::get("  JavaScript:alert(1)").validate().is_err());
        assert!(RequestSpec::get("/search?q=<SCRIPT>x</script>")
            .validate()
            .is_err());
        assert!(RequestSpec::get("/environments/123/users").validate().is_ok());
    }

    #[test]
    fn test_with_json_sets_content_type() {
        let spec = RequestSpec::post("/users")
            .with_json(&serde_json::json!({"username": "ada"}))
            .unwrap();
        assert_eq!(spec.headers.get("content-type"), Some("application/json"));
        let body: serde_json::Value = serde_json::from_slice(spec.body.as_ref().unwrap()).unwrap();
        assert_eq!(body["username"], "ada");
    }

    #[test]
    fn test_method_parse() {
        assert_eq!("patch".parse::<HttpMethod>().unwrap(), HttpMethod::Patch);
        assert!("BREW".parse::<HttpMethod>().is_err());
    }
}
