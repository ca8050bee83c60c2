//! Request fingerprints
//!
//! The key correlating a recorded fetch with the same fetch issued during
//! replay. Two requests that agree on method, URL, resource type, streaming
//! mode, origin and credentials mode are the same logical resource.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Credentials mode of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialsMode {
    Omit,
    #[default]
    SameOrigin,
    Include,
}

impl CredentialsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialsMode::Omit => "omit",
            CredentialsMode::SameOrigin => "same-origin",
            CredentialsMode::Include => "include",
        }
    }
}

/// Deterministic resource key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestFingerprint(String);

impl RequestFingerprint {
    /// Wrap an already-derived key, e.g. `"GET|https://x/y.png"`
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Short hex digest for log output
    pub fn digest(&self) -> String {
        let hash = Sha256::digest(self.0.as_bytes());
        hex::encode(&hash[..8])
    }
}

impl fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestFingerprint {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// The request attributes a fingerprint is derived from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub resource_type: String,
    #[serde(default)]
    pub use_stream: bool,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub credentials: CredentialsMode,
}

impl RequestDescriptor {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            resource_type: String::new(),
            use_stream: false,
            origin: None,
            credentials: CredentialsMode::default(),
        }
    }

    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = resource_type.into();
        self
    }

    pub fn with_stream(mut self, use_stream: bool) -> Self {
        self.use_stream = use_stream;
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_credentials(mut self, credentials: CredentialsMode) -> Self {
        self.credentials = credentials;
        self
    }

    /// Derive the fingerprint.
    ///
    /// A plain GET/POST with no resource type, origin or streaming and the
    /// default credentials mode collapses to `METHOD|url`; the remaining
    /// attributes are appended only when set.
    pub fn fingerprint(&self) -> RequestFingerprint {
        let mut key = format!("{}|{}", self.method.to_ascii_uppercase(), self.url);
        let plain = self.resource_type.is_empty()
            && !self.use_stream
            && self.origin.is_none()
            && self.credentials == CredentialsMode::default();
        if !plain {
            key.push('|');
            key.push_str(&self.resource_type);
            key.push('|');
            key.push_str(if self.use_stream { "stream" } else { "buffer" });
            key.push('|');
            key.push_str(self.origin.as_deref().unwrap_or(""));
            key.push('|');
            key.push_str(self.credentials.as_str());
        }
        RequestFingerprint(key)
    }
}
