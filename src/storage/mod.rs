//! Credential storage and the token-provider seam
//!
//! Credential acquisition (login flows, browser imports) lives outside this
//! crate; providers only see `TokenProvider`, and absence of a token means
//! the provider contributes nothing.

mod keyring;

pub use keyring::{KeyringError, SecureStorage};

use std::collections::HashMap;

use crate::providers::ProviderId;

/// Supplies session credentials for API-backed providers
pub trait TokenProvider: Send + Sync {
    fn session_token(&self, provider: ProviderId) -> Option<String>;
}

/// Token provider backed by the OS keychain
pub struct KeyringTokenProvider {
    storage: SecureStorage,
}

impl KeyringTokenProvider {
    pub fn new() -> Self {
        Self {
            storage: SecureStorage::new(),
        }
    }

    fn key_for(provider: ProviderId) -> String {
        format!("{}_session_token", provider.as_str())
    }

    /// Store (or clear, with `None`) a provider session token
    pub fn set_session_token(
        &self,
        provider: ProviderId,
        token: Option<&str>,
    ) -> Result<(), KeyringError> {
        let key = Self::key_for(provider);
        match token {
            Some(token) => self.storage.store(&key, token),
            None => match self.storage.delete(&key) {
                Ok(()) | Err(KeyringError::NotFound) => Ok(()),
                Err(err) => Err(err),
            },
        }
    }
}

impl Default for KeyringTokenProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenProvider for KeyringTokenProvider {
    fn session_token(&self, provider: ProviderId) -> Option<String> {
        match self.storage.get(&Self::key_for(provider)) {
            Ok(token) => Some(token),
            Err(KeyringError::NotFound) => None,
            Err(err) => {
                tracing::debug!("Keyring lookup failed for {:?}: {err}", provider);
                None
            }
        }
    }
}

/// Fixed in-memory token set, for tests and embedders that manage their own
/// credential storage
#[derive(Default)]
pub struct StaticTokenProvider {
    tokens: HashMap<ProviderId, String>,
}

impl StaticTokenProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, provider: ProviderId, token: impl Into<String>) -> Self {
        self.tokens.insert(provider, token.into());
        self
    }
}

impl TokenProvider for StaticTokenProvider {
    fn session_token(&self, provider: ProviderId) -> Option<String> {
        self.tokens.get(&provider).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_tokens_answer_only_for_their_provider() {
        let tokens = StaticTokenProvider::new().with_token(ProviderId::Cursor, "tok_123");
        assert_eq!(
            tokens.session_token(ProviderId::Cursor).as_deref(),
            Some("tok_123")
        );
        assert!(tokens.session_token(ProviderId::Claude).is_none());
    }
}
