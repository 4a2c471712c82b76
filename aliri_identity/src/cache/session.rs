//! Per-request access to the token cache
//!
//! Loading a cache from durable storage is expensive, and a single silent
//! request may read accounts, access tokens, refresh tokens and ID tokens in
//! turn. A [`CacheSessionManager`] makes sure the application's access hooks
//! fire at most once for all of those reads.

use std::sync::atomic::{AtomicBool, Ordering};

use super::{
    items::{AccessTokenItem, IdTokenItem, RefreshTokenItem},
    token_cache::{CacheRequest, Hook, SavedTokens, TokenCache},
};
use crate::{
    authority::Authority,
    error::{AcquireTokenError, CacheError, ClientError},
    protocol::TokenResponse,
    result::Account,
    FamilyIdRef,
};

/// Reads and writes the cache on behalf of one request
#[derive(Debug)]
pub struct CacheSessionManager<'a> {
    cache: &'a TokenCache,
    request: CacheRequest,
    refreshed_for_read: AtomicBool,
}

impl<'a> CacheSessionManager<'a> {
    /// Starts a session for the given request
    pub fn new(cache: &'a TokenCache, request: CacheRequest) -> Self {
        Self {
            cache,
            request,
            refreshed_for_read: AtomicBool::new(false),
        }
    }

    /// The request this session serves
    pub fn request(&self) -> &CacheRequest {
        &self.request
    }

    /// Narrows the request to a resolved account and its tenanted authority
    ///
    /// The session stays synchronized; no further access hooks fire for reads.
    pub(crate) fn resolve(&mut self, account: Account, authority: Authority) {
        self.request = CacheRequest::new(authority, self.request.scopes().clone(), Some(account));
    }

    async fn refresh_cache_for_read(&self) -> Result<(), CacheError> {
        if self.refreshed_for_read.load(Ordering::Acquire) {
            return Ok(());
        }

        let _guard = self.cache.lock_access().await;

        if self.refreshed_for_read.load(Ordering::Acquire) {
            return Ok(());
        }

        let key = self
            .cache
            .suggested_key(self.request.authority().tenant(), self.request.account());
        let args = self
            .cache
            .notification_args(self.request.account(), key, false);

        let before = self.cache.notify(Hook::BeforeAccess, &args).await;
        self.cache.finish_access(&args, before).await?;

        self.refreshed_for_read.store(true, Ordering::Release);
        tracing::trace!("token cache synchronized for this request");
        Ok(())
    }

    /// Finds the best cached access token for the request, even if it has expired
    pub async fn find_access_token(&self) -> Result<Option<AccessTokenItem>, CacheError> {
        self.refresh_cache_for_read().await?;
        self.cache.find_access_token(&self.request)
    }

    /// Finds the application's own refresh token for the account
    pub async fn find_refresh_token(&self) -> Result<Option<RefreshTokenItem>, CacheError> {
        self.refresh_cache_for_read().await?;
        self.cache.find_refresh_token(&self.request).await
    }

    /// Finds a refresh token shared by the given family
    pub async fn find_family_refresh_token(
        &self,
        family_id: &FamilyIdRef,
    ) -> Result<Option<RefreshTokenItem>, AcquireTokenError> {
        if family_id.as_str().is_empty() {
            return Err(ClientError::EmptyFamilyId.into());
        }

        self.refresh_cache_for_read().await?;
        Ok(self
            .cache
            .find_family_refresh_token(&self.request, family_id)?)
    }

    /// Looks up an ID token by its canonical key
    pub async fn get_id_token(&self, key: &str) -> Result<Option<IdTokenItem>, CacheError> {
        self.refresh_cache_for_read().await?;
        self.cache.get_id_token(key)
    }

    /// Lists the accounts known on the request's host
    pub async fn get_accounts(&self) -> Result<Vec<Account>, CacheError> {
        self.refresh_cache_for_read().await?;
        self.cache.get_accounts(&self.request).await
    }

    /// Whether the application is known to belong to the family
    ///
    /// `None` means membership has not been observed yet.
    pub async fn is_app_foci_member(
        &self,
        family_id: &FamilyIdRef,
    ) -> Result<Option<bool>, CacheError> {
        self.refresh_cache_for_read().await?;
        self.cache.is_app_foci_member(&self.request, family_id)
    }

    /// Persists a token response
    ///
    /// Every write fires its own notification sequence.
    pub(crate) async fn save_token_response(
        &self,
        response: &TokenResponse,
    ) -> Result<SavedTokens, CacheError> {
        self.cache
            .save_token_response(&self.request, response)
            .await
    }
}
