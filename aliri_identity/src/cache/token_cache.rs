//! The token cache shared by every request an application makes

use std::{
    fmt,
    future::Future,
    sync::{Arc, Mutex},
};

use aliri_clock::UnixTime;

use super::{
    accessor::CacheAccessor,
    items::{
        AccessTokenItem, AccountItem, AppMetadataItem, CredentialHeader, CredentialType,
        IdTokenItem, RefreshTokenItem,
    },
    keys,
    notifications::{CacheNotifications, TokenCacheNotificationArgs},
    serialization::{lock, CacheSerializer, SharedStore, Store},
    session::CacheSessionManager,
};
use crate::{
    authority::{Authority, COMMON_TENANT},
    claims::{ClientInfo, IdTokenClaims},
    config::ApplicationConfig,
    error::{storage, CacheError},
    legacy::{LegacyCacheBridge, LegacyCachePersistence},
    protocol::TokenResponse,
    result::Account,
    scopes::ScopeSet,
    FamilyIdRef, HomeAccountId, TenantId, TenantIdRef,
};

/// The parts of a token request that select cache entries
#[derive(Clone, Debug)]
pub struct CacheRequest {
    authority: Authority,
    scopes: ScopeSet,
    account: Option<Account>,
}

impl CacheRequest {
    /// Constructs a cache request
    pub fn new(authority: Authority, scopes: ScopeSet, account: Option<Account>) -> Self {
        Self {
            authority,
            scopes,
            account,
        }
    }

    /// The authority, tenanted once the account is known
    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// The requested scopes
    pub fn scopes(&self) -> &ScopeSet {
        &self.scopes
    }

    /// The account, once resolved
    pub fn account(&self) -> Option<&Account> {
        self.account.as_ref()
    }
}

/// The items written for a token response
#[derive(Clone, Debug)]
pub(crate) struct SavedTokens {
    pub(crate) access_token: AccessTokenItem,
    pub(crate) id_token: Option<IdTokenItem>,
    pub(crate) account: Option<Account>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Hook {
    BeforeAccess,
    AfterAccess,
    BeforeWrite,
}

impl Hook {
    const fn name(self) -> &'static str {
        match self {
            Self::BeforeAccess => "before_access",
            Self::AfterAccess => "after_access",
            Self::BeforeWrite => "before_write",
        }
    }
}

fn is_specific_tenant(tenant: &TenantIdRef) -> bool {
    !["common", "organizations", "consumers"]
        .iter()
        .any(|t| tenant.as_str().eq_ignore_ascii_case(t))
}

/// Server-supplied lifetimes saturate instead of overflowing
fn offset(now: UnixTime, secs: u64) -> UnixTime {
    UnixTime(now.0.saturating_add(secs))
}

fn same_tenant(a: Option<&TenantIdRef>, b: Option<&TenantIdRef>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.as_str().eq_ignore_ascii_case(b.as_str()),
        (None, None) => true,
        _ => false,
    }
}

/// An application's token cache
///
/// All requests made by an application share one cache. Reads and writes are
/// bracketed by the application's [`CacheNotifications`] so that the in-memory
/// view can be synchronized with durable storage. Use a
/// [`CacheSessionManager`] to read the cache on behalf of a single request.
pub struct TokenCache {
    config: ApplicationConfig,
    store: SharedStore,
    notifications: Option<Arc<dyn CacheNotifications>>,
    access: tokio::sync::Mutex<()>,
    legacy: Option<LegacyCacheBridge>,
}

impl fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenCache")
            .field("client_id", &self.config.client_id())
            .field("has_notifications", &self.notifications.is_some())
            .field("legacy", &self.legacy)
            .finish_non_exhaustive()
    }
}

impl TokenCache {
    /// Constructs an empty in-memory token cache
    pub fn new(config: ApplicationConfig) -> Self {
        Self {
            config,
            store: Arc::new(Mutex::new(Store::default())),
            notifications: None,
            access: tokio::sync::Mutex::new(()),
            legacy: None,
        }
    }

    /// Stores items through the given accessor
    pub fn with_accessor(mut self, accessor: impl CacheAccessor + 'static) -> Self {
        self.store = Arc::new(Mutex::new(Store::new(Box::new(accessor))));
        self
    }

    /// Fires the given hooks around cache access
    pub fn with_notifications(mut self, notifications: Arc<dyn CacheNotifications>) -> Self {
        self.notifications = Some(notifications);
        self
    }

    /// Mirrors refresh tokens into the legacy cache
    ///
    /// Ignored unless the legacy cache is enabled in the configuration.
    pub fn with_legacy_persistence(mut self, persistence: Arc<dyn LegacyCachePersistence>) -> Self {
        if self.config.legacy_cache_enabled() {
            self.legacy = Some(LegacyCacheBridge::new(persistence));
        } else {
            tracing::debug!(
                client_id = %self.config.client_id(),
                "legacy cache is disabled, ignoring legacy persistence"
            );
        }
        self
    }

    /// The configuration of the owning application
    pub fn config(&self) -> &ApplicationConfig {
        &self.config
    }

    /// A serializer over this cache's contents
    pub fn serializer(&self) -> CacheSerializer {
        CacheSerializer::new(self.store.clone())
    }

    pub(crate) fn now(&self) -> UnixTime {
        self.config.clock().now()
    }

    /// Lists the accounts known to the cache on the configured authority's host
    pub async fn accounts(&self) -> Result<Vec<Account>, CacheError> {
        let request = CacheRequest::new(self.config.authority().clone(), ScopeSet::empty(), None);
        CacheSessionManager::new(self, request).get_accounts().await
    }

    /// Removes an account and every token issued to it
    pub async fn remove_account(&self, account: &Account) -> Result<(), CacheError> {
        self.write_cycle(account.home_tenant(), Some(account), async {
            self.remove_account_items(account)?;

            if let Some(legacy) = &self.legacy {
                legacy
                    .remove_user(
                        self.config.client_id(),
                        Some(account.username.as_str()),
                        Some(&*account.home_account_id),
                    )
                    .await;
            }

            Ok(())
        })
        .await
    }

    /// Removes every item from the cache
    pub async fn clear(&self) -> Result<(), CacheError> {
        self.write_cycle(None, None, async {
            lock(&self.store).accessor.clear().map_err(storage)
        })
        .await
    }

    pub(crate) fn suggested_key(
        &self,
        tenant: Option<&TenantIdRef>,
        account: Option<&Account>,
    ) -> Option<String> {
        if self.config.is_app_cache() {
            let tenant = tenant.map_or(COMMON_TENANT, |t| t.as_str());
            Some(format!("{}_{}", self.config.client_id(), tenant))
        } else {
            account.map(|a| a.home_account_id.as_str().to_owned())
        }
    }

    pub(crate) fn notification_args(
        &self,
        account: Option<&Account>,
        suggested_key: Option<String>,
        has_state_changed: bool,
    ) -> TokenCacheNotificationArgs {
        let has_tokens = match lock(&self.store).accessor.has_tokens() {
            Ok(has_tokens) => has_tokens,
            Err(error) => {
                tracing::warn!(
                    error = (&*error as &dyn std::error::Error),
                    "unable to tell whether the cache holds tokens, reporting none"
                );
                false
            }
        };

        TokenCacheNotificationArgs::new(
            self.serializer(),
            self.config.client_id().to_owned(),
            account.cloned(),
            self.config.is_app_cache(),
            has_tokens,
            suggested_key,
        )
        .with_state_changed(has_state_changed)
    }

    pub(crate) async fn notify(
        &self,
        hook: Hook,
        args: &TokenCacheNotificationArgs,
    ) -> Result<(), CacheError> {
        let notifications = match &self.notifications {
            Some(n) => n,
            None => return Ok(()),
        };

        let result = match hook {
            Hook::BeforeAccess => notifications.before_access(args).await,
            Hook::AfterAccess => notifications.after_access(args).await,
            Hook::BeforeWrite => notifications.before_write(args).await,
        };

        result.map_err(|source| CacheError::Notification {
            hook: hook.name(),
            source,
        })
    }

    /// Fires `after_access` once the guarded operation has finished
    ///
    /// The operation's own error wins over a failure of the hook.
    pub(crate) async fn finish_access<T, E>(
        &self,
        args: &TokenCacheNotificationArgs,
        outcome: Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<CacheError>,
    {
        let after = self.notify(Hook::AfterAccess, args).await;

        match (outcome, after) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(error)) => Err(error.into()),
            (Err(error), Ok(())) => Err(error),
            (Err(error), Err(after_error)) => {
                tracing::warn!(
                    error = (&after_error as &dyn std::error::Error),
                    "after_access notification failed while another error was pending"
                );
                Err(error)
            }
        }
    }

    pub(crate) async fn lock_access(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.access.lock().await
    }

    async fn write_cycle<T, F>(
        &self,
        tenant: Option<&TenantIdRef>,
        account: Option<&Account>,
        mutate: F,
    ) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        let _guard = self.lock_access().await;
        let key = self.suggested_key(tenant, account);

        let outcome = async {
            let args = self.notification_args(account, key.clone(), false);
            self.notify(Hook::BeforeAccess, &args).await?;

            let args = self.notification_args(account, key.clone(), true);
            self.notify(Hook::BeforeWrite, &args).await?;

            mutate.await
        }
        .await;

        let args = self.notification_args(account, key, true);
        self.finish_access(&args, outcome).await
    }

    /// Finds the best access token for the request, expired or not
    ///
    /// An exact key match wins. Otherwise the token whose scopes cover the
    /// requested scopes and that expires last is returned.
    pub(crate) fn find_access_token(
        &self,
        request: &CacheRequest,
    ) -> Result<Option<AccessTokenItem>, CacheError> {
        let account = match request.account() {
            Some(a) => a,
            None => return Ok(None),
        };

        let authority = request.authority();
        let client_id = self.config.client_id();
        let tenant = authority.tenant().filter(|t| is_specific_tenant(t));
        let store = lock(&self.store);

        if let Some(tenant) = tenant {
            let key = keys::access_token(
                &account.home_account_id,
                authority.host(),
                client_id,
                Some(tenant),
                request.scopes(),
                "Bearer",
            );

            if let Some(item) = store.accessor.get_access_token(&key).map_err(storage)? {
                return Ok(Some(item));
            }
        }

        let requested = request.scopes().without_reserved();
        let best = store
            .accessor
            .all_access_tokens()
            .map_err(storage)?
            .into_iter()
            .filter(|at| {
                at.header.home_account_id.matches(&account.home_account_id)
                    && at.header.environment.matches(authority.host())
                    && at.header.client_id.matches(client_id)
                    && at.token_type.eq_ignore_ascii_case("bearer")
                    && tenant.map_or(true, |t| same_tenant(at.tenant.as_deref(), Some(t)))
                    && at.scopes.without_reserved().contains_all(&requested)
            })
            .max_by_key(|at| at.expires_on);

        Ok(best)
    }

    /// Finds the refresh token issued to this application for the account
    ///
    /// Family refresh tokens are never returned, even when issued to this
    /// client. Falls back to the legacy cache when enabled.
    pub(crate) async fn find_refresh_token(
        &self,
        request: &CacheRequest,
    ) -> Result<Option<RefreshTokenItem>, CacheError> {
        let account = match request.account() {
            Some(a) => a,
            None => return Ok(None),
        };

        let env = request.authority().host();
        let client_id = self.config.client_id();

        let found = {
            let store = lock(&self.store);
            store
                .accessor
                .all_refresh_tokens()
                .map_err(storage)?
                .into_iter()
                .filter(|rt| {
                    rt.header.home_account_id.matches(&account.home_account_id)
                        && rt.header.environment.matches(env)
                        && rt.header.client_id.matches(client_id)
                        && !rt.is_family_token()
                })
                .next()
        };

        if found.is_some() {
            return Ok(found);
        }

        match &self.legacy {
            Some(legacy) => {
                let unique_id = account.home_account_id.as_str().split('.').next();
                Ok(legacy
                    .get_entry_for_client(
                        env,
                        &[env],
                        client_id,
                        Some(account.username.as_str()),
                        unique_id,
                    )
                    .await)
            }
            None => Ok(None),
        }
    }

    pub(crate) fn find_family_refresh_token(
        &self,
        request: &CacheRequest,
        family_id: &FamilyIdRef,
    ) -> Result<Option<RefreshTokenItem>, CacheError> {
        let account = match request.account() {
            Some(a) => a,
            None => return Ok(None),
        };

        let env = request.authority().host();
        let store = lock(&self.store);

        Ok(store
            .accessor
            .all_refresh_tokens()
            .map_err(storage)?
            .into_iter()
            .find(|rt| {
                rt.header.home_account_id.matches(&account.home_account_id)
                    && rt.header.environment.matches(env)
                    && rt.family_id.as_deref().map(|f| f.as_str()) == Some(family_id.as_str())
            }))
    }

    /// `None` when membership has not been learned yet
    pub(crate) fn is_app_foci_member(
        &self,
        request: &CacheRequest,
        family_id: &FamilyIdRef,
    ) -> Result<Option<bool>, CacheError> {
        let key = keys::app_metadata(request.authority().host(), self.config.client_id());
        let metadata = lock(&self.store)
            .accessor
            .get_app_metadata(&key)
            .map_err(storage)?;

        Ok(metadata.map(|m| m.is_member_of(family_id)))
    }

    pub(crate) fn get_id_token(&self, key: &str) -> Result<Option<IdTokenItem>, CacheError> {
        lock(&self.store).accessor.get_id_token(key).map_err(storage)
    }

    pub(crate) async fn get_accounts(
        &self,
        request: &CacheRequest,
    ) -> Result<Vec<Account>, CacheError> {
        let env = request.authority().host();

        let mut accounts: Vec<Account> = lock(&self.store)
            .accessor
            .all_accounts()
            .map_err(storage)?
            .iter()
            .filter(|a| a.environment.matches(env))
            .map(Account::from)
            .collect();

        if let Some(legacy) = &self.legacy {
            for user in legacy.get_all_users(self.config.client_id()).await {
                if let Some(account) = user.to_account() {
                    let known = accounts
                        .iter()
                        .any(|a| a.home_account_id.matches(&account.home_account_id));
                    if !known && account.environment.matches(env) {
                        accounts.push(account);
                    }
                }
            }
        }

        Ok(accounts)
    }

    /// Persists the tokens from a successful exchange
    ///
    /// Previously cached access tokens with overlapping scopes are replaced.
    pub(crate) async fn save_token_response(
        &self,
        request: &CacheRequest,
        response: &TokenResponse,
    ) -> Result<SavedTokens, CacheError> {
        let authority = request.authority();
        let now = self.now();

        let client_info = response
            .client_info
            .as_deref()
            .and_then(|raw| match ClientInfo::parse(raw) {
                Ok(info) => Some(info),
                Err(error) => {
                    tracing::warn!(
                        error = (&error as &dyn std::error::Error),
                        "ignoring malformed client info in token response"
                    );
                    None
                }
            });

        let claims = response
            .id_token
            .as_deref()
            .and_then(|raw| match IdTokenClaims::parse(raw) {
                Ok(claims) => Some(claims),
                Err(error) => {
                    tracing::warn!(
                        error = (&error as &dyn std::error::Error),
                        "ignoring undecodable id token in token response"
                    );
                    None
                }
            });

        let home_account_id = client_info
            .as_ref()
            .map(ClientInfo::to_account_identifier)
            .or_else(|| request.account().map(|a| a.home_account_id.clone()))
            .unwrap_or_else(|| HomeAccountId::new(String::new()));

        let tenant = claims
            .as_ref()
            .and_then(|c| c.tid.clone())
            .map(TenantId::new)
            .or_else(|| authority.tenant().filter(|t| is_specific_tenant(t)).map(ToOwned::to_owned));

        let env = authority.host().to_owned();
        let client_id = self.config.client_id().to_owned();

        let scopes = if response.scope.is_empty() {
            request.scopes().clone()
        } else {
            response.scope.clone()
        };

        let mut access_token = AccessTokenItem::new(
            CredentialHeader::new(
                CredentialType::AccessToken,
                home_account_id.clone(),
                env.clone(),
                client_id.clone(),
                response.access_token.clone(),
            ),
            tenant.clone(),
            scopes,
            now,
            offset(now, response.expires_in),
        )
        .with_extended_expires_on(
            offset(now, response.ext_expires_in.unwrap_or(response.expires_in)),
        )
        .with_token_type(response.token_type.clone());

        if let Some(refresh_in) = response.refresh_in {
            access_token = access_token.with_refresh_on(offset(now, refresh_in));
        }

        let refresh_token = response.refresh_token.clone().map(|secret| {
            RefreshTokenItem::new(
                CredentialHeader::new(
                    CredentialType::RefreshToken,
                    home_account_id.clone(),
                    env.clone(),
                    client_id.clone(),
                    secret,
                ),
                response.foci.clone(),
            )
        });

        let id_token = response.id_token.clone().map(|secret| {
            IdTokenItem::new(
                CredentialHeader::new(
                    CredentialType::IdToken,
                    home_account_id.clone(),
                    env.clone(),
                    client_id.clone(),
                    secret,
                ),
                tenant.clone(),
            )
        });

        let account_item = claims.as_ref().map(|claims| {
            let mut item = AccountItem::new(home_account_id.clone(), env.clone(), "")
                .with_claims(claims);
            item.client_info = response.client_info.clone();
            item
        });

        let app_metadata = AppMetadataItem::new(client_id.clone(), env.clone(), response.foci.clone());

        let account = account_item
            .as_ref()
            .map(Account::from)
            .or_else(|| request.account().cloned());

        self.write_cycle(authority.tenant(), account.as_ref(), async {
            {
                let mut store = lock(&self.store);
                let accessor = &mut store.accessor;
                let new_scopes = access_token.scopes.without_reserved();

                let replaced: Vec<String> = accessor
                    .all_access_tokens()
                    .map_err(storage)?
                    .into_iter()
                    .filter(|old| {
                        old.header.home_account_id.matches(&home_account_id)
                            && old.header.environment.matches(&env)
                            && old.header.client_id.matches(&client_id)
                            && same_tenant(old.tenant.as_deref(), tenant.as_deref())
                            && old.scopes.without_reserved().intersects(&new_scopes)
                    })
                    .map(|old| old.cache_key())
                    .collect();

                for key in replaced {
                    accessor.delete_access_token(&key).map_err(storage)?;
                }

                accessor
                    .save_access_token(access_token.clone())
                    .map_err(storage)?;
                if let Some(rt) = &refresh_token {
                    accessor.save_refresh_token(rt.clone()).map_err(storage)?;
                }
                if let Some(idt) = &id_token {
                    accessor.save_id_token(idt.clone()).map_err(storage)?;
                }
                if let Some(acct) = &account_item {
                    accessor.save_account(acct.clone()).map_err(storage)?;
                }
                accessor.save_app_metadata(app_metadata).map_err(storage)?;
            }

            if let Some(legacy) = &self.legacy {
                legacy
                    .write_refresh_token(
                        refresh_token.as_ref(),
                        id_token.as_ref(),
                        response.client_info.as_deref(),
                        &authority.canonical(),
                        claims.as_ref().and_then(|c| c.object_id()),
                        &access_token.scopes.normalized(),
                    )
                    .await;
            }

            Ok(())
        })
        .await?;

        Ok(SavedTokens {
            access_token,
            id_token,
            account,
        })
    }

    fn remove_account_items(&self, account: &Account) -> Result<(), CacheError> {
        let client_id = self.config.client_id();
        let mut store = lock(&self.store);
        let accessor = &mut store.accessor;

        let owned_by = |hai: &HomeAccountId, env: &crate::Environment| {
            hai.matches(&account.home_account_id) && env.matches(&account.environment)
        };

        for at in accessor.all_access_tokens().map_err(storage)? {
            if owned_by(&at.header.home_account_id, &at.header.environment)
                && at.header.client_id.matches(client_id)
            {
                accessor
                    .delete_access_token(&at.cache_key())
                    .map_err(storage)?;
            }
        }

        for rt in accessor.all_refresh_tokens().map_err(storage)? {
            if owned_by(&rt.header.home_account_id, &rt.header.environment)
                && (rt.header.client_id.matches(client_id) || rt.is_family_token())
            {
                accessor
                    .delete_refresh_token(&rt.cache_key())
                    .map_err(storage)?;
            }
        }

        for idt in accessor.all_id_tokens().map_err(storage)? {
            if owned_by(&idt.header.home_account_id, &idt.header.environment)
                && idt.header.client_id.matches(client_id)
            {
                accessor.delete_id_token(&idt.cache_key()).map_err(storage)?;
            }
        }

        accessor
            .delete_account(&keys::account(
                &account.home_account_id,
                &account.environment,
            ))
            .map_err(storage)?;

        tracing::debug!(
            home_account_id = %account.home_account_id,
            "removed account from token cache"
        );
        Ok(())
    }
}
