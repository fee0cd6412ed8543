use std::fmt;

use async_trait::async_trait;
use parking_lot::RwLock;

/// Storage for the session credential, supplied per platform.
///
/// Implementations may be backed by memory, a keychain or browser storage.
/// Reads may suspend; the executor re-reads the token on every attempt.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Returns the current token, if any.
    async fn token(&self) -> Option<String>;
    /// Replaces the stored token.
    async fn set_token(&self, token: String);
    /// Forgets the stored token.
    async fn clear_token(&self);
}

/// In-process [`TokenStore`].
#[derive(Default)]
pub struct MemoryTokenStore {
    token: RwLock<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `token`.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }
}

impl fmt::Debug for MemoryTokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = self.token.read().is_some().then_some("<redacted>");
        f.debug_struct("MemoryTokenStore")
            .field("token", &token)
            .finish()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    async fn set_token(&self, token: String) {
        *self.token.write() = Some(token);
    }

    async fn clear_token(&self) {
        *self.token.write() = None;
    }
}

/// Builds an `Authorization` value, adding the `Bearer ` prefix when missing.
pub(crate) fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}
