use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use crate::status::CallError;

/// Fully-qualified RPC method name in `/package.Service/Method` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodName {
    full: String,
    split: usize,
}

impl MethodName {
    /// Parses a fully-qualified method name.
    ///
    /// # Errors
    ///
    /// Returns `CallError::InvalidArgument`-coded status when the name lacks a
    /// leading slash, has more or fewer than one separator, or has an empty
    /// service or method part.
    pub fn parse(full: &str) -> Result<Self, CallError> {
        let invalid = || CallError::invalid_argument(format!("malformed method name: {full:?}"));

        let rest = full.strip_prefix('/').ok_or_else(invalid)?;
        let (service, method) = rest.split_once('/').ok_or_else(invalid)?;
        if service.is_empty() || method.is_empty() || method.contains('/') {
            return Err(invalid());
        }

        Ok(Self {
            full: full.to_string(),
            split: service.len() + 1,
        })
    }

    /// Builds a method name from its service and method parts.
    ///
    /// # Errors
    ///
    /// Same conditions as [`MethodName::parse`].
    pub fn from_parts(service: &str, method: &str) -> Result<Self, CallError> {
        Self::parse(&format!("/{service}/{method}"))
    }

    /// The full `/package.Service/Method` string.
    #[must_use]
    pub fn full(&self) -> &str {
        &self.full
    }

    /// The `package.Service` part.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.full[1..self.split]
    }

    /// The bare `Method` part.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.full[self.split + 1..]
    }
}

impl fmt::Display for MethodName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

/// Call metadata: string key/value pairs with lower-cased keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: BTreeMap<String, String>,
}

impl Metadata {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entry, replacing any previous value for the key.
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .insert(key.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Looks up a value; the key is matched case-insensitively.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut metadata = Self::new();
        for (k, v) in iter {
            metadata.insert(k, v);
        }
        metadata
    }
}

/// Per-call context threaded through every interceptor and the handler.
///
/// Carries identity (call id, method), caller-supplied metadata, and the
/// deadline propagated by the transport. Holds no mutable per-call state.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Server-assigned, monotonically increasing call identifier.
    pub call_id: u64,
    /// Fully-qualified method being invoked.
    pub method: MethodName,
    /// Caller-supplied metadata (transport headers).
    pub metadata: Metadata,
    /// Remote peer address, when known.
    pub peer: Option<SocketAddr>,
    /// Instant after which the caller no longer waits for a response.
    pub deadline: Option<Instant>,
}

impl CallContext {
    #[must_use]
    pub fn new(call_id: u64, method: MethodName) -> Self {
        Self {
            call_id,
            method,
            metadata: Metadata::new(),
            peer: None,
            deadline: None,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Returns `true` once the deadline, if any, has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}
