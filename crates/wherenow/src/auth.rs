//! Bearer token authentication.

use axum::http::HeaderValue;
use subtle::ConstantTimeEq;
use tracing::debug;

/// Checks `Authorization: Bearer <token>` headers against one shared secret.
#[derive(Clone)]
pub struct BearerAuth {
    secret: String,
}

impl std::fmt::Debug for BearerAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerAuth").finish_non_exhaustive()
    }
}

impl BearerAuth {
    /// Create a gate for the given shared secret.
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Whether the header carries the configured token.
    ///
    /// The scheme is matched case-insensitively and the token is compared in
    /// constant time.
    #[must_use]
    pub fn verify(&self, header: Option<&HeaderValue>) -> bool {
        let Some(token) = header
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
        else {
            debug!("missing or malformed bearer token");
            return false;
        };

        if self.secret.is_empty() {
            return false;
        }

        let matches: bool = token.as_bytes().ct_eq(self.secret.as_bytes()).into();
        if !matches {
            debug!("bearer token mismatch");
        }
        matches
    }
}

/// Extract the token from a `Bearer <token>` header value.
fn bearer_token(raw: &str) -> Option<&str> {
    let raw = raw.trim();
    let (scheme, rest) = raw.split_once(char::is_whitespace)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = rest.trim_start();
    (!token.is_empty()).then_some(token)
}
