use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::KeyValueStorage;
use crate::config::FlowConfig;
use crate::error::FlowError;
use crate::token::CredentialBundle;

/// Number of storage keys a single signed-in session occupies.
pub const SESSION_KEY_COUNT: usize = 8;

/// Maps [`CredentialBundle`]s onto the provider's legacy key namespace.
///
/// Tokens live under `<prefix>.<client_id>.<username>.<field>`, with a
/// `LastAuthUser` pointer naming the current user. Clones share one write
/// lock, so a bundle write and a session removal never interleave.
#[derive(Clone)]
pub struct CredentialStore {
    storage: Arc<dyn KeyValueStorage>,
    client_id: String,
    key_prefix: String,
    custom_prefix: String,
    write_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("client_id", &self.client_id)
            .field("key_prefix", &self.key_prefix)
            .field("custom_prefix", &self.custom_prefix)
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>, config: &FlowConfig) -> Self {
        Self {
            storage,
            client_id: config.client_id.clone(),
            key_prefix: config.storage_key_prefix.clone(),
            custom_prefix: config.custom_key_prefix.clone(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    fn user_key(&self, username: &str, field: &str) -> String {
        format!("{}.{}.{username}.{field}", self.key_prefix, self.client_id)
    }

    fn custom_key(&self, username: &str, field: &str) -> String {
        format!("{}.{}.{username}.{field}", self.custom_prefix, self.client_id)
    }

    fn last_auth_user_key(&self) -> String {
        format!("{}.{}.LastAuthUser", self.key_prefix, self.client_id)
    }

    /// Every key a session for `username` may occupy.
    pub fn session_keys(&self, username: &str) -> [String; SESSION_KEY_COUNT] {
        [
            self.user_key(username, "idToken"),
            self.user_key(username, "accessToken"),
            self.user_key(username, "refreshToken"),
            self.user_key(username, "tokenScopesString"),
            self.user_key(username, "userData"),
            self.last_auth_user_key(),
            self.custom_key(username, "expireAt"),
            self.custom_key(username, "refreshingTokens"),
        ]
    }

    /// Load the bundle for the last authenticated user, if complete.
    pub async fn retrieve(&self) -> Result<Option<CredentialBundle>, FlowError> {
        let Some(username) = self.storage.get_item(&self.last_auth_user_key()).await? else {
            return Ok(None);
        };
        let id_key = self.user_key(&username, "idToken");
        let access_key = self.user_key(&username, "accessToken");
        let refresh_key = self.user_key(&username, "refreshToken");
        let scopes_key = self.user_key(&username, "tokenScopesString");
        let expire_key = self.custom_key(&username, "expireAt");
        let (id_token, access_token, refresh_token, token_scopes, expire_at) = futures::try_join!(
            self.storage.get_item(&id_key),
            self.storage.get_item(&access_key),
            self.storage.get_item(&refresh_key),
            self.storage.get_item(&scopes_key),
            self.storage.get_item(&expire_key),
        )?;
        let (Some(id_token), Some(access_token)) = (id_token, access_token) else {
            return Ok(None);
        };
        let expire_at = expire_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc));
        Ok(Some(CredentialBundle {
            username,
            id_token,
            access_token,
            refresh_token,
            expire_at,
            token_scopes,
        }))
    }

    /// Persist a bundle; all writes are issued together and awaited as a set.
    pub async fn store(&self, bundle: &CredentialBundle) -> Result<(), FlowError> {
        let _guard = self.write_lock.lock().await;
        self.write_bundle(bundle).await
    }

    /// Persist a bundle unless `abort` has fired by the time the write lock
    /// is held. Returns whether the bundle was written.
    pub async fn store_unless_aborted(
        &self,
        bundle: &CredentialBundle,
        abort: &CancellationToken,
    ) -> Result<bool, FlowError> {
        let _guard = self.write_lock.lock().await;
        if abort.is_cancelled() {
            return Ok(false);
        }
        self.write_bundle(bundle).await?;
        Ok(true)
    }

    async fn write_bundle(&self, bundle: &CredentialBundle) -> Result<(), FlowError> {
        let mut writes = vec![
            (self.last_auth_user_key(), bundle.username.clone()),
            (self.user_key(&bundle.username, "idToken"), bundle.id_token.clone()),
            (
                self.user_key(&bundle.username, "accessToken"),
                bundle.access_token.clone(),
            ),
        ];
        if let Some(refresh_token) = &bundle.refresh_token {
            writes.push((
                self.user_key(&bundle.username, "refreshToken"),
                refresh_token.clone(),
            ));
        }
        if let Some(scopes) = &bundle.token_scopes {
            writes.push((self.user_key(&bundle.username, "tokenScopesString"), scopes.clone()));
        }
        if let Some(expire_at) = bundle.expire_at {
            writes.push((
                self.custom_key(&bundle.username, "expireAt"),
                expire_at.to_rfc3339(),
            ));
        }
        let results = join_all(
            writes
                .iter()
                .map(|(key, value)| self.storage.set_item(key, value)),
        )
        .await;
        results.into_iter().collect()
    }

    pub async fn remove_item(&self, key: &str) -> Result<(), FlowError> {
        self.storage.remove_item(key).await
    }

    /// Remove every session key for `username`.
    ///
    /// Removals run concurrently and all of them are awaited before the
    /// first failure (if any) is reported. Waits for any bundle write in
    /// progress to land first.
    pub async fn remove_session(&self, username: &str) -> Result<(), FlowError> {
        let _guard = self.write_lock.lock().await;
        let keys = self.session_keys(username);
        let results = join_all(keys.iter().map(|key| self.remove_item(key))).await;
        results.into_iter().collect()
    }
}
