//! Hooks fired around cache access

use async_trait::async_trait;

use super::serialization::CacheSerializer;
use crate::{error::BoxError, result::Account, ClientId, ClientIdRef};

/// Context handed to each cache notification
#[derive(Debug, Clone)]
pub struct TokenCacheNotificationArgs {
    cache: CacheSerializer,
    client_id: ClientId,
    account: Option<Account>,
    has_state_changed: bool,
    is_app_cache: bool,
    has_tokens: bool,
    suggested_key: Option<String>,
}

impl TokenCacheNotificationArgs {
    pub(crate) fn new(
        cache: CacheSerializer,
        client_id: ClientId,
        account: Option<Account>,
        is_app_cache: bool,
        has_tokens: bool,
        suggested_key: Option<String>,
    ) -> Self {
        Self {
            cache,
            client_id,
            account,
            has_state_changed: false,
            is_app_cache,
            has_tokens,
            suggested_key,
        }
    }

    pub(crate) fn with_state_changed(mut self, has_state_changed: bool) -> Self {
        self.has_state_changed = has_state_changed;
        self
    }

    /// Loads and saves the cache contents
    #[inline]
    pub fn cache(&self) -> &CacheSerializer {
        &self.cache
    }

    /// The client that owns the cache
    #[inline]
    pub fn client_id(&self) -> &ClientIdRef {
        &self.client_id
    }

    /// The account the request is for, if known
    #[inline]
    pub fn account(&self) -> Option<&Account> {
        self.account.as_ref()
    }

    /// Whether the cache was modified and should be persisted
    #[inline]
    pub fn has_state_changed(&self) -> bool {
        self.has_state_changed
    }

    /// Whether the cache holds application rather than user tokens
    #[inline]
    pub fn is_app_cache(&self) -> bool {
        self.is_app_cache
    }

    /// Whether the cache held any access or refresh token when the hook fired
    #[inline]
    pub fn has_tokens(&self) -> bool {
        self.has_tokens
    }

    /// A hint for partitioning external storage
    ///
    /// This is the account identifier for user requests, or the client and
    /// tenant for application requests. It is only a hint: correctness never
    /// depends on how storage is partitioned.
    #[inline]
    pub fn suggested_key(&self) -> Option<&str> {
        self.suggested_key.as_deref()
    }
}

/// Hooks that let an application synchronize the cache with durable storage
///
/// `before_access` and `after_access` bracket reads at most once per request.
/// Writes fire `before_access`, `before_write` and then `after_access` with
/// [`has_state_changed`][TokenCacheNotificationArgs::has_state_changed] set.
#[async_trait]
pub trait CacheNotifications: Send + Sync {
    /// Called before the cache is read or written
    async fn before_access(&self, _args: &TokenCacheNotificationArgs) -> Result<(), BoxError> {
        Ok(())
    }

    /// Called after the cache has been read or written
    async fn after_access(&self, _args: &TokenCacheNotificationArgs) -> Result<(), BoxError> {
        Ok(())
    }

    /// Called before the cache is modified
    async fn before_write(&self, _args: &TokenCacheNotificationArgs) -> Result<(), BoxError> {
        Ok(())
    }
}
