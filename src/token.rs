use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tokens and metadata for one authenticated session.
///
/// # Example
/// ```
/// use passflow::token::CredentialBundle;
///
/// let bundle = CredentialBundle {
///     username: "alice".to_string(),
///     id_token: "id".to_string(),
///     access_token: "access".to_string(),
///     refresh_token: Some("refresh".to_string()),
///     expire_at: None,
///     token_scopes: Some("openid email".to_string()),
/// };
/// assert!(bundle.refresh_token.is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBundle {
    pub username: String,
    pub id_token: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expire_at: Option<DateTime<Utc>>,
    pub token_scopes: Option<String>,
}

/// Partial token update produced by a refresh cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokensFromRefresh {
    pub id_token: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expire_at: Option<DateTime<Utc>>,
}

impl CredentialBundle {
    /// Overlay a refresh result on this bundle; fields present in `update` win.
    pub fn merge(&self, update: &TokensFromRefresh) -> Self {
        Self {
            username: self.username.clone(),
            id_token: update.id_token.clone().unwrap_or_else(|| self.id_token.clone()),
            access_token: update
                .access_token
                .clone()
                .unwrap_or_else(|| self.access_token.clone()),
            refresh_token: update
                .refresh_token
                .clone()
                .or_else(|| self.refresh_token.clone()),
            expire_at: update.expire_at.or(self.expire_at),
            token_scopes: self.token_scopes.clone(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_at.is_some_and(|exp| exp <= now)
    }
}
