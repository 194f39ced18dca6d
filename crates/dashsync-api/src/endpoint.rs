// Endpoint descriptor and per-call options.

use std::time::Duration;

use reqwest::Method;
use serde_json::Value;

use crate::auth::Credential;

/// One logical call: method, path, optional JSON body, optional timeout.
///
/// Built fresh by the caller for every call and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Endpoint {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
    timeout: Option<Duration>,
}

impl Endpoint {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Override the executor's timeout for this endpoint only.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn json_body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Per-call overrides for the executor's defaults.
///
/// Precedence for the timeout: options, then the endpoint, then the executor.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Additional attempts after the first. Default: executor setting (2).
    pub retries: Option<u32>,
    /// Per-attempt timeout. Must be non-zero; zero falls back to the default.
    pub timeout: Option<Duration>,
    /// Use this token instead of the one in the credential store.
    pub credential: Option<Credential>,
}

impl RequestOptions {
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_collects_parts() {
        let ep = Endpoint::post("/reports")
            .body(json!({ "title": "weekly" }))
            .query("draft", "true")
            .timeout(Duration::from_secs(5));

        assert_eq!(ep.method(), &Method::POST);
        assert_eq!(ep.path(), "/reports");
        assert_eq!(ep.query_pairs(), &[("draft".to_owned(), "true".to_owned())]);
        assert_eq!(ep.json_body(), Some(&json!({ "title": "weekly" })));
        assert_eq!(ep.timeout_override(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn options_default_to_executor_settings() {
        let opts = RequestOptions::default();
        assert!(opts.retries.is_none());
        assert!(opts.timeout.is_none());
        assert!(opts.credential.is_none());
    }
}
