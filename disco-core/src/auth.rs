//! API key handling and the `Authorization` header derived from it.
//!
//! The disco API authenticates with HTTP Basic auth: the API key is the user
//! name and the password is empty.

use std::fmt;
use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};
use secrecy::{ExposeSecret, SecretString};

/// Opaque API key. Cloning shares the same secret; `Debug` never prints it.
#[derive(Clone)]
pub struct ApiKey(Arc<SecretString>);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(Arc::new(SecretString::from(key.into())))
    }

    pub(crate) fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// `"Basic " + base64(key + ":")`.
pub fn basic_auth_header(key: &ApiKey) -> String {
    let raw = format!("{}:", key.expose());
    format!("Basic {}", STANDARD.encode(raw))
}
