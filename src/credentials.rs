//! Credential Accessor (C1): read-only lookup of per-account provider tokens.
//!
//! This is an external collaborator — the OAuth handshake and the vault that backs
//! it live outside the core. Only the contract the sync engine depends on is
//! modeled here: look up a live token bundle for an account, refreshing if the
//! access token has expired, and report failure when the account's credentials
//! cannot be produced (the sync pass then aborts with `auth_required`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("account {0} is not connected")]
    NotConnected(String),
    #[error("token refresh failed for account {0}")]
    RefreshFailed(String),
}

/// A usable access token plus its expiry, as handed back by the vault.
#[derive(Debug, Clone)]
pub struct TokenBundle {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenBundle {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Contract the Mailbox Sync Engine depends on. The vault, the refresh flow, and
/// the OAuth handshake that populate it are out of scope for the core.
#[async_trait]
pub trait CredentialAccessor: Send + Sync {
    /// Look up a live token bundle for `account_id`, refreshing on expiry.
    async fn token_for(&self, account_id: &str) -> Result<TokenBundle, CredentialError>;

    /// List accounts this accessor currently holds credentials for.
    ///
    /// Backs `GET /api/accounts` (C11), since the core owns no `accounts` table of
    /// its own — account lifecycle is entirely external (§3).
    async fn list_accounts(&self) -> Vec<String>;

    /// Delegate disconnect to the external account-lifecycle layer.
    async fn disconnect(&self, account_id: &str);
}

/// A minimal, environment-backed accessor sufficient to exercise the contract
/// above without a real OAuth vault. Accounts are declared via a comma-separated
/// `KNOWN_ACCOUNTS` environment variable; every declared account is treated as
/// perpetually connected with a static bearer token read from
/// `PROVIDER_STATIC_TOKEN`. Production deployments are expected to swap this
/// implementation out for a real vault client without touching the sync engine.
pub struct StaticCredentialAccessor {
    accounts: dashmap::DashSet<String>,
    static_token: Option<String>,
}

impl StaticCredentialAccessor {
    pub fn from_env() -> Self {
        let accounts = dashmap::DashSet::new();
        if let Ok(raw) = std::env::var("KNOWN_ACCOUNTS") {
            for account in raw.split(',') {
                let account = account.trim();
                if !account.is_empty() {
                    accounts.insert(account.to_string());
                }
            }
        }
        Self {
            accounts,
            static_token: std::env::var("PROVIDER_STATIC_TOKEN").ok(),
        }
    }
}

#[async_trait]
impl CredentialAccessor for StaticCredentialAccessor {
    async fn token_for(&self, account_id: &str) -> Result<TokenBundle, CredentialError> {
        if !self.accounts.contains(account_id) {
            return Err(CredentialError::NotConnected(account_id.to_string()));
        }
        let access_token = self
            .static_token
            .clone()
            .ok_or_else(|| CredentialError::RefreshFailed(account_id.to_string()))?;
        Ok(TokenBundle {
            access_token,
            expires_at: Utc::now() + chrono::Duration::hours(1),
        })
    }

    async fn list_accounts(&self) -> Vec<String> {
        self.accounts.iter().map(|entry| entry.clone()).collect()
    }

    async fn disconnect(&self, account_id: &str) {
        self.accounts.remove(account_id);
    }
}
