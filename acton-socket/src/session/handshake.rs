use std::collections::HashMap;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};

/// Request metadata captured when the session was created
#[derive(Debug, Clone)]
pub struct HandshakeData {
    /// Request headers, names lowercased
    pub headers: HashMap<String, String>,
    /// Peer address, if the transport knows it
    pub remote_address: Option<SocketAddr>,
    /// Request URL
    pub url: String,
    /// Query parameters, multi-valued
    pub query: HashMap<String, Vec<String>>,
    /// Whether the handshake came from another origin
    pub xdomain: bool,
    /// Whether the handshake came over TLS
    pub secure: bool,
    /// When the handshake happened
    pub issued_at: DateTime<Utc>,
}

impl HandshakeData {
    /// Create handshake data for a request URL
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            headers: HashMap::new(),
            remote_address: None,
            url: url.into(),
            query: HashMap::new(),
            xdomain: false,
            secure: false,
            issued_at: Utc::now(),
        }
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Add a query parameter value
    #[must_use]
    pub fn with_query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.entry(name.into()).or_default().push(value.into());
        self
    }

    /// Set the peer address
    #[must_use]
    pub fn with_remote_address(mut self, address: SocketAddr) -> Self {
        self.remote_address = Some(address);
        self
    }

    /// Mark the handshake as secure
    #[must_use]
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Header value by case-insensitive name
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The `Origin` header
    #[must_use]
    pub fn origin(&self) -> Option<&str> {
        self.header("origin")
    }

    /// First value of a query parameter
    #[must_use]
    pub fn single_query_param(&self, name: &str) -> Option<&str> {
        self.query
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}

impl Default for HandshakeData {
    fn default() -> Self {
        Self::new("/")
    }
}
