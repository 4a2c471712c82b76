//! Silent token acquisition
//!
//! A silent request never prompts the user. It is served from the cache when
//! a usable access token exists and otherwise redeems a cached refresh token,
//! preferring a family refresh token when the application may belong to a
//! family of clients. When that is impossible the caller receives a
//! [`UiRequiredError`][crate::error::UiRequiredError] and should fall back to
//! an interactive flow.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    authority::Authority,
    cache::{
        items::{AccessTokenItem, RefreshTokenItem},
        keys, CacheRequest, CacheSessionManager, TokenCache,
    },
    error::{ui_required, AcquireTokenError, ClientError, ErrorClassification, UiRequiredCode},
    protocol::{TokenExchange, TokenRequest, TokenResponse},
    result::{Account, AuthenticationResult, TokenSource},
    scopes::ScopeSet,
    FamilyIdRef,
};

/// The only family of client IDs issued today
const FAMILY_ID: &str = "1";

/// A request for a token without user interaction
#[derive(Clone, Debug)]
pub struct SilentRequest {
    account: Option<Account>,
    login_hint: Option<String>,
    scopes: ScopeSet,
    force_refresh: bool,
    claims: Option<String>,
    cancellation: CancellationToken,
}

impl SilentRequest {
    /// A request for the given scopes
    ///
    /// Either an account or a login hint must be supplied before the request
    /// is sent.
    pub fn new(scopes: ScopeSet) -> Self {
        Self {
            account: None,
            login_hint: None,
            scopes,
            force_refresh: false,
            claims: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Requests a token for a known account
    pub fn with_account(mut self, account: Account) -> Self {
        self.account = Some(account);
        self
    }

    /// Requests a token for the cached account with this username
    pub fn with_login_hint(mut self, login_hint: impl Into<String>) -> Self {
        self.login_hint = Some(login_hint.into());
        self
    }

    /// Bypasses cached access tokens
    pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }

    /// Forwards a claims challenge, which also bypasses cached access tokens
    pub fn with_claims(mut self, claims: impl Into<String>) -> Self {
        self.claims = Some(claims.into());
        self
    }

    /// Allows the request to be cancelled before each token exchange
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// The requested scopes
    pub fn scopes(&self) -> &ScopeSet {
        &self.scopes
    }

    fn bypasses_cache(&self) -> bool {
        self.force_refresh || self.claims.is_some()
    }
}

/// Acquires tokens silently from a token cache and an identity provider
#[derive(Debug)]
pub struct SilentAuthStrategy<E> {
    cache: Arc<TokenCache>,
    exchange: E,
}

impl<E> SilentAuthStrategy<E>
where
    E: TokenExchange,
{
    /// Constructs a strategy over a shared cache
    pub fn new(cache: Arc<TokenCache>, exchange: E) -> Self {
        Self { cache, exchange }
    }

    /// The cache tokens are read from and written to
    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    /// Acquires a token without user interaction
    #[tracing::instrument(
        err,
        skip(self, request),
        fields(
            client_id = %self.cache.config().client_id(),
            scopes = %request.scopes.normalized(),
            force_refresh = request.force_refresh,
            has_claims = request.claims.is_some(),
        ),
    )]
    pub async fn acquire_token(
        &self,
        request: &SilentRequest,
    ) -> Result<AuthenticationResult, AcquireTokenError> {
        let config = self.cache.config();
        let mut session = CacheSessionManager::new(
            &self.cache,
            CacheRequest::new(
                config.authority().clone(),
                request.scopes.clone(),
                request.account.clone(),
            ),
        );

        let account = match (&request.account, &request.login_hint) {
            (Some(account), _) => account.clone(),
            (None, Some(hint)) => account_for_login_hint(&session, hint).await?,
            (None, None) => return Err(ClientError::MissingAccountOrLoginHint.into()),
        };

        let authority = config.authority().with_tenant(account.home_tenant());
        session.resolve(account.clone(), authority.clone());

        if authority.is_b2c() && request.scopes.without_reserved().is_empty() {
            return Err(ui_required(UiRequiredCode::ScopesRequired).into());
        }

        let cached = if request.bypasses_cache() {
            tracing::debug!("skipping cached access tokens");
            None
        } else {
            session.find_access_token().await?
        };

        if let Some(at) = &cached {
            let now = self.cache.now();
            if !at.is_expired(now) && !at.needs_refresh(now) {
                tracing::debug!(expires_on = at.expires_on.0, "returning cached access token");
                return self.from_cache(&session, at.clone(), account).await;
            }
            tracing::debug!(
                expires_on = at.expires_on.0,
                "cached access token is expired or due for refresh"
            );
        }

        let response = match self.refresh(&session, request, &authority).await {
            Ok(response) => response,
            Err(AcquireTokenError::Service(error)) => {
                match (error.classification(), cached) {
                    (ErrorClassification::BadToken, _) => {
                        tracing::warn!(
                            home_account_id = %account.home_account_id,
                            "refresh token rejected as bad, removing account"
                        );
                        if let Err(removal) = self.cache.remove_account(&account).await {
                            tracing::error!(
                                error = (&removal as &dyn std::error::Error),
                                "unable to remove account after bad token"
                            );
                        }
                    }
                    (ErrorClassification::BackendUnavailable, Some(stale)) => {
                        tracing::warn!(
                            error = (&error as &dyn std::error::Error),
                            "identity provider unavailable, returning cached access token"
                        );
                        return self.from_cache(&session, stale, account).await;
                    }
                    _ => {}
                }
                return Err(error.into());
            }
            Err(other) => return Err(other),
        };

        let saved = session.save_token_response(&response).await?;

        Ok(AuthenticationResult::new(
            saved.access_token,
            saved.id_token,
            saved.account.or(Some(account)),
            TokenSource::IdentityProvider,
        ))
    }

    async fn from_cache(
        &self,
        session: &CacheSessionManager<'_>,
        at: AccessTokenItem,
        account: Account,
    ) -> Result<AuthenticationResult, AcquireTokenError> {
        let id_token_key = keys::id_token(
            &at.header.home_account_id,
            &at.header.environment,
            &at.header.client_id,
            at.tenant.as_deref(),
        );
        let id_token = session.get_id_token(&id_token_key).await?;

        Ok(AuthenticationResult::new(
            at,
            id_token,
            Some(account),
            TokenSource::Cache,
        ))
    }

    async fn refresh(
        &self,
        session: &CacheSessionManager<'_>,
        request: &SilentRequest,
        authority: &Authority,
    ) -> Result<TokenResponse, AcquireTokenError> {
        if self.cache.config().foci_enabled() {
            if let Some(response) = self.try_family_refresh(session, request, authority).await? {
                return Ok(response);
            }
        }

        let rt = session
            .find_refresh_token()
            .await?
            .ok_or_else(|| ui_required(UiRequiredCode::NoTokensFound))?;

        tracing::debug!("redeeming application refresh token");
        self.redeem(request, authority, &rt).await
    }

    /// `None` when the family path does not apply and the normal path should run
    async fn try_family_refresh(
        &self,
        session: &CacheSessionManager<'_>,
        request: &SilentRequest,
        authority: &Authority,
    ) -> Result<Option<TokenResponse>, AcquireTokenError> {
        let family = FamilyIdRef::from_str(FAMILY_ID);

        if session.is_app_foci_member(family).await? == Some(false) {
            tracing::debug!("application is not a family member, skipping family refresh token");
            return Ok(None);
        }

        let frt = match session.find_family_refresh_token(family).await? {
            Some(frt) => frt,
            None => return Ok(None),
        };

        tracing::debug!(family_id = FAMILY_ID, "redeeming family refresh token");
        match self.redeem(request, authority, &frt).await {
            Ok(response) => Ok(Some(response)),
            Err(AcquireTokenError::Service(error))
                if error.classification() == ErrorClassification::ClientMismatch =>
            {
                tracing::debug!("application is not part of the family, falling back");
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    async fn redeem(
        &self,
        request: &SilentRequest,
        authority: &Authority,
        rt: &RefreshTokenItem,
    ) -> Result<TokenResponse, AcquireTokenError> {
        if request.cancellation.is_cancelled() {
            return Err(AcquireTokenError::Cancelled);
        }

        let grant = TokenRequest {
            authority: authority.clone(),
            client_id: self.cache.config().client_id().to_owned(),
            scopes: request.scopes.clone(),
            refresh_token: rt.header.secret.clone(),
            claims: request.claims.clone(),
        };

        let mut response = self.exchange.exchange(&grant).await?;

        if response.refresh_token.is_none() {
            response.refresh_token = Some(rt.header.secret.clone());
        }

        Ok(response)
    }
}

async fn account_for_login_hint(
    session: &CacheSessionManager<'_>,
    login_hint: &str,
) -> Result<Account, AcquireTokenError> {
    let mut matching = session
        .get_accounts()
        .await?
        .into_iter()
        .filter(|a| !a.username.is_empty() && a.username.eq_ignore_ascii_case(login_hint));

    match (matching.next(), matching.next()) {
        (Some(account), None) => Ok(account),
        (None, _) => Err(ui_required(UiRequiredCode::NoAccountForLoginHint).into()),
        (Some(_), Some(_)) => Err(ui_required(UiRequiredCode::MultipleAccountsForLoginHint).into()),
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::Mutex};

    use aliri_clock::{DurationSecs, TestClock, UnixTime};
    use async_trait::async_trait;
    use color_eyre::{eyre::eyre, Result};
    use serde_json::Value;

    use super::*;
    use crate::{
        cache::{
            items::{AccountItem, AppMetadataItem, CredentialHeader, CredentialType},
            test_support::RecordingNotifications,
            CacheAccessor, InMemoryCacheAccessor,
        },
        claims::test_support,
        config::ApplicationConfig,
        error::{codes, ServiceError},
        AccessToken, ClientId, Environment, FamilyId, HomeAccountId, RefreshToken, TenantId,
    };

    const NOW: UnixTime = UnixTime(1_000_000);
    const ENV: &str = "login.example.com";

    #[derive(Default)]
    struct ScriptedExchange {
        responses: Mutex<VecDeque<Result<TokenResponse, ServiceError>>>,
        requests: Mutex<Vec<TokenRequest>>,
    }

    impl ScriptedExchange {
        fn replying(responses: Vec<Result<TokenResponse, ServiceError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::default(),
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().map(|r| r.len()).unwrap_or_default()
        }

        fn refresh_tokens_sent(&self) -> Vec<String> {
            self.requests
                .lock()
                .map(|r| {
                    r.iter()
                        .map(|g| g.refresh_token.as_str().to_owned())
                        .collect()
                })
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl TokenExchange for ScriptedExchange {
        async fn exchange(&self, request: &TokenRequest) -> Result<TokenResponse, ServiceError> {
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(request.clone());
            }
            self.responses
                .lock()
                .ok()
                .and_then(|mut r| r.pop_front())
                .unwrap_or_else(|| Err(ServiceError::new("unexpected_call")))
        }
    }

    fn account() -> Account {
        Account::new(
            HomeAccountId::from_static("uid.utid"),
            Environment::from_static(ENV),
            "user@example.com",
        )
    }

    fn config() -> Result<ApplicationConfig> {
        Ok(ApplicationConfig::new(
            ClientId::from_static("client"),
            Authority::parse("https://login.example.com/common")?,
        )
        .with_clock(TestClock::new(NOW)))
    }

    fn access_token(scopes: &str, expires_on: UnixTime) -> AccessTokenItem {
        AccessTokenItem::new(
            CredentialHeader::new(
                CredentialType::AccessToken,
                HomeAccountId::from_static("uid.utid"),
                Environment::from_static(ENV),
                ClientId::from_static("client"),
                AccessToken::from_static("cached-at"),
            ),
            Some(TenantId::from_static("utid")),
            ScopeSet::parse(scopes),
            UnixTime(NOW.0 - 60),
            expires_on,
        )
    }

    fn refresh_token(client: &'static str, secret: &'static str, family: Option<&'static str>) -> RefreshTokenItem {
        RefreshTokenItem::new(
            CredentialHeader::new(
                CredentialType::RefreshToken,
                HomeAccountId::from_static("uid.utid"),
                Environment::from_static(ENV),
                ClientId::from_static(client),
                RefreshToken::from_static(secret),
            ),
            family.map(FamilyId::from_static),
        )
    }

    fn account_item(hai: &'static str, username: &str) -> AccountItem {
        AccountItem::new(
            HomeAccountId::from_static(hai),
            Environment::from_static(ENV),
            username,
        )
    }

    fn fresh_response(at: &'static str) -> TokenResponse {
        let mut response = TokenResponse::new(AccessToken::from_static(at), 3600);
        response.refresh_token = Some(RefreshToken::from_static("rotated-rt"));
        response.id_token = Some(test_support::id_token("oid", "utid", "user@example.com"));
        response.client_info = Some(test_support::client_info("uid", "utid"));
        response.scope = ScopeSet::parse("a b");
        response
    }

    fn stored(result: std::result::Result<(), crate::error::BoxError>) -> Result<()> {
        result.map_err(|e| eyre!(e))
    }

    fn strategy(
        accessor: InMemoryCacheAccessor,
        exchange: Arc<ScriptedExchange>,
    ) -> Result<SilentAuthStrategy<Arc<ScriptedExchange>>> {
        let cache = TokenCache::new(config()?).with_accessor(accessor);
        Ok(SilentAuthStrategy::new(Arc::new(cache), exchange))
    }

    fn for_account(scopes: &str) -> SilentRequest {
        SilentRequest::new(ScopeSet::parse(scopes)).with_account(account())
    }

    fn ui_code(error: &AcquireTokenError) -> Option<UiRequiredCode> {
        error.as_ui_required().map(|e| e.code())
    }

    #[tokio::test]
    async fn cached_token_is_returned_for_reordered_scopes() -> Result<()> {
        let mut accessor = InMemoryCacheAccessor::new();
        stored(accessor.save_access_token(access_token("a b", UnixTime(NOW.0 + 3600))))?;
        let exchange = ScriptedExchange::replying(vec![]);
        let strategy = strategy(accessor, exchange.clone())?;

        let result = strategy.acquire_token(&for_account("B A")).await?;

        assert_eq!(result.source(), TokenSource::Cache);
        assert_eq!(result.access_token().as_str(), "cached-at");
        assert_eq!(exchange.calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn refresh_token_is_redeemed_and_persisted() -> Result<()> {
        let mut accessor = InMemoryCacheAccessor::new();
        stored(accessor.save_refresh_token(refresh_token("client", "old-rt", None)))?;
        let exchange = ScriptedExchange::replying(vec![Ok(fresh_response("new-at"))]);
        let strategy = strategy(accessor, exchange.clone())?;

        let result = strategy.acquire_token(&for_account("a b")).await?;

        assert_eq!(result.source(), TokenSource::IdentityProvider);
        assert_eq!(result.access_token().as_str(), "new-at");
        assert!(result.id_token().is_some());
        assert_eq!(exchange.refresh_tokens_sent(), vec!["old-rt"]);

        let again = strategy.acquire_token(&for_account("a b")).await?;
        assert_eq!(again.source(), TokenSource::Cache);
        assert_eq!(again.access_token().as_str(), "new-at");
        assert_eq!(again.unique_id(), Some("oid"));
        assert_eq!(exchange.calls(), 1);

        let document: Value = serde_json::from_slice(&strategy.cache().serializer().serialize()?)?;
        let rts = document["RefreshToken"]
            .as_object()
            .ok_or_else(|| eyre!("no refresh tokens"))?;
        assert_eq!(rts.len(), 1);
        assert!(rts.values().all(|rt| rt["secret"] == "rotated-rt"));
        Ok(())
    }

    #[tokio::test]
    async fn original_refresh_token_is_kept_when_not_rotated() -> Result<()> {
        let mut accessor = InMemoryCacheAccessor::new();
        stored(accessor.save_refresh_token(refresh_token("client", "old-rt", None)))?;
        let mut response = fresh_response("new-at");
        response.refresh_token = None;
        let exchange = ScriptedExchange::replying(vec![Ok(response)]);
        let strategy = strategy(accessor, exchange.clone())?;

        strategy.acquire_token(&for_account("a b")).await?;

        let document: Value = serde_json::from_slice(&strategy.cache().serializer().serialize()?)?;
        let rts = document["RefreshToken"]
            .as_object()
            .ok_or_else(|| eyre!("no refresh tokens"))?;
        assert_eq!(rts.len(), 1);
        assert!(rts.values().all(|rt| rt["secret"] == "old-rt"));
        Ok(())
    }

    #[tokio::test]
    async fn family_client_mismatch_without_app_token_requires_ui() -> Result<()> {
        let mut accessor = InMemoryCacheAccessor::new();
        stored(accessor.save_refresh_token(refresh_token("sibling", "frt", Some("1"))))?;
        let exchange = ScriptedExchange::replying(vec![Err(ServiceError::new(codes::INVALID_GRANT)
            .with_sub_error(codes::CLIENT_MISMATCH)
            .with_status_code(400))]);
        let strategy = strategy(accessor, exchange.clone())?;

        let error = strategy
            .acquire_token(&for_account("a b"))
            .await
            .err()
            .ok_or_else(|| eyre!("expected an error"))?;

        assert_eq!(ui_code(&error), Some(UiRequiredCode::NoTokensFound));
        assert_eq!(exchange.refresh_tokens_sent(), vec!["frt"]);
        Ok(())
    }

    #[tokio::test]
    async fn own_family_token_is_not_redeemed_twice() -> Result<()> {
        let mut accessor = InMemoryCacheAccessor::new();
        stored(accessor.save_refresh_token(refresh_token("client", "frt", Some("1"))))?;
        let exchange = ScriptedExchange::replying(vec![
            Err(ServiceError::new(codes::INVALID_GRANT).with_sub_error(codes::CLIENT_MISMATCH)),
            Ok(fresh_response("new-at")),
        ]);
        let strategy = strategy(accessor, exchange.clone())?;

        let error = strategy
            .acquire_token(&for_account("a b"))
            .await
            .err()
            .ok_or_else(|| eyre!("expected an error"))?;

        assert_eq!(ui_code(&error), Some(UiRequiredCode::NoTokensFound));
        assert_eq!(exchange.refresh_tokens_sent(), vec!["frt"]);
        Ok(())
    }

    #[tokio::test]
    async fn family_client_mismatch_falls_back_to_app_token() -> Result<()> {
        let mut accessor = InMemoryCacheAccessor::new();
        stored(accessor.save_refresh_token(refresh_token("sibling", "frt", Some("1"))))?;
        stored(accessor.save_refresh_token(refresh_token("client", "app-rt", None)))?;
        let exchange = ScriptedExchange::replying(vec![
            Err(ServiceError::new(codes::INVALID_GRANT).with_sub_error(codes::CLIENT_MISMATCH)),
            Ok(fresh_response("new-at")),
        ]);
        let strategy = strategy(accessor, exchange.clone())?;

        let result = strategy.acquire_token(&for_account("a b")).await?;

        assert_eq!(result.source(), TokenSource::IdentityProvider);
        assert_eq!(exchange.refresh_tokens_sent(), vec!["frt", "app-rt"]);
        Ok(())
    }

    #[tokio::test]
    async fn family_token_is_preferred_when_membership_is_unknown() -> Result<()> {
        let mut accessor = InMemoryCacheAccessor::new();
        stored(accessor.save_refresh_token(refresh_token("sibling", "frt", Some("1"))))?;
        stored(accessor.save_refresh_token(refresh_token("client", "app-rt", None)))?;
        let mut response = fresh_response("new-at");
        response.foci = Some(FamilyId::from_static("1"));
        let exchange = ScriptedExchange::replying(vec![Ok(response)]);
        let strategy = strategy(accessor, exchange.clone())?;

        strategy.acquire_token(&for_account("a b")).await?;

        assert_eq!(exchange.refresh_tokens_sent(), vec!["frt"]);
        Ok(())
    }

    #[tokio::test]
    async fn known_non_member_skips_family_token() -> Result<()> {
        let mut accessor = InMemoryCacheAccessor::new();
        stored(accessor.save_refresh_token(refresh_token("sibling", "frt", Some("1"))))?;
        stored(accessor.save_refresh_token(refresh_token("client", "app-rt", None)))?;
        stored(accessor.save_app_metadata(AppMetadataItem::new(
            ClientId::from_static("client"),
            Environment::from_static(ENV),
            None,
        )))?;
        let exchange = ScriptedExchange::replying(vec![Ok(fresh_response("new-at"))]);
        let strategy = strategy(accessor, exchange.clone())?;

        strategy.acquire_token(&for_account("a b")).await?;

        assert_eq!(exchange.refresh_tokens_sent(), vec!["app-rt"]);
        Ok(())
    }

    #[tokio::test]
    async fn family_tokens_are_ignored_when_disabled() -> Result<()> {
        let mut accessor = InMemoryCacheAccessor::new();
        stored(accessor.save_refresh_token(refresh_token("sibling", "frt", Some("1"))))?;
        stored(accessor.save_refresh_token(refresh_token("client", "app-rt", None)))?;
        let exchange = ScriptedExchange::replying(vec![Ok(fresh_response("new-at"))]);
        let cache = TokenCache::new(config()?.with_foci_enabled(false)).with_accessor(accessor);
        let strategy = SilentAuthStrategy::new(Arc::new(cache), exchange.clone());

        strategy.acquire_token(&for_account("a b")).await?;

        assert_eq!(exchange.refresh_tokens_sent(), vec!["app-rt"]);
        Ok(())
    }

    #[tokio::test]
    async fn other_family_failures_are_fatal() -> Result<()> {
        let mut accessor = InMemoryCacheAccessor::new();
        stored(accessor.save_refresh_token(refresh_token("sibling", "frt", Some("1"))))?;
        stored(accessor.save_refresh_token(refresh_token("client", "app-rt", None)))?;
        let exchange = ScriptedExchange::replying(vec![Err(ServiceError::new(
            codes::INTERACTION_REQUIRED,
        )
        .with_status_code(400))]);
        let strategy = strategy(accessor, exchange.clone())?;

        let error = strategy
            .acquire_token(&for_account("a b"))
            .await
            .err()
            .ok_or_else(|| eyre!("expected an error"))?;

        assert!(error
            .as_service_error()
            .map_or(false, ServiceError::requires_interaction));
        assert_eq!(exchange.calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn stale_token_is_returned_when_backend_is_unavailable() -> Result<()> {
        let mut accessor = InMemoryCacheAccessor::new();
        stored(accessor.save_access_token(access_token("a b", UnixTime(NOW.0 - 10))))?;
        stored(accessor.save_refresh_token(refresh_token("client", "app-rt", None)))?;
        let exchange = ScriptedExchange::replying(vec![Err(ServiceError::new(
            "temporarily_unavailable",
        )
        .with_status_code(503))]);
        let strategy = strategy(accessor, exchange.clone())?;

        let result = strategy.acquire_token(&for_account("a b")).await?;

        assert_eq!(result.source(), TokenSource::Cache);
        assert_eq!(result.access_token().as_str(), "cached-at");
        assert_eq!(exchange.calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn backend_unavailable_without_cached_token_propagates() -> Result<()> {
        let mut accessor = InMemoryCacheAccessor::new();
        stored(accessor.save_refresh_token(refresh_token("client", "app-rt", None)))?;
        let exchange = ScriptedExchange::replying(vec![Err(ServiceError::new(
            codes::SERVICE_NOT_AVAILABLE,
        ))]);
        let strategy = strategy(accessor, exchange)?;

        let error = strategy
            .acquire_token(&for_account("a b"))
            .await
            .err()
            .ok_or_else(|| eyre!("expected an error"))?;

        assert_eq!(
            error.as_service_error().map(ServiceError::classification),
            Some(ErrorClassification::BackendUnavailable)
        );
        Ok(())
    }

    #[tokio::test]
    async fn bad_token_evicts_the_account() -> Result<()> {
        let mut accessor = InMemoryCacheAccessor::new();
        stored(accessor.save_access_token(access_token("a b", UnixTime(NOW.0 - 10))))?;
        stored(accessor.save_refresh_token(refresh_token("client", "app-rt", None)))?;
        stored(accessor.save_account(account_item("uid.utid", "user@example.com")))?;
        let exchange = ScriptedExchange::replying(vec![Err(ServiceError::new(
            codes::INVALID_GRANT,
        )
        .with_sub_error(codes::BAD_TOKEN)
        .with_status_code(400))]);
        let strategy = strategy(accessor, exchange)?;

        let error = strategy
            .acquire_token(&for_account("a b"))
            .await
            .err()
            .ok_or_else(|| eyre!("expected an error"))?;

        assert_eq!(
            error.as_service_error().map(ServiceError::classification),
            Some(ErrorClassification::BadToken)
        );

        let document: Value = serde_json::from_slice(&strategy.cache().serializer().serialize()?)?;
        for section in ["AccessToken", "RefreshToken", "IdToken", "Account"] {
            assert_eq!(
                document[section].as_object().map(|m| m.len()),
                Some(0),
                "{}",
                section
            );
        }
        Ok(())
    }

    #[tokio::test]
    async fn token_due_for_refresh_is_refreshed() -> Result<()> {
        let mut accessor = InMemoryCacheAccessor::new();
        stored(accessor.save_access_token(
            access_token("a b", UnixTime(NOW.0 + 3600)).with_refresh_on(UnixTime(NOW.0 - 1)),
        ))?;
        stored(accessor.save_refresh_token(refresh_token("client", "app-rt", None)))?;
        let exchange = ScriptedExchange::replying(vec![Ok(fresh_response("new-at"))]);
        let strategy = strategy(accessor, exchange.clone())?;

        let result = strategy.acquire_token(&for_account("a b")).await?;

        assert_eq!(result.source(), TokenSource::IdentityProvider);
        assert_eq!(exchange.calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn token_inside_expiry_buffer_is_refreshed() -> Result<()> {
        let mut accessor = InMemoryCacheAccessor::new();
        stored(accessor.save_access_token(access_token(
            "a b",
            UnixTime(NOW.0) + DurationSecs(120),
        )))?;
        stored(accessor.save_refresh_token(refresh_token("client", "app-rt", None)))?;
        let exchange = ScriptedExchange::replying(vec![Ok(fresh_response("new-at"))]);
        let strategy = strategy(accessor, exchange.clone())?;

        let result = strategy.acquire_token(&for_account("a b")).await?;

        assert_eq!(result.source(), TokenSource::IdentityProvider);
        Ok(())
    }

    #[tokio::test]
    async fn force_refresh_and_claims_bypass_the_cache() -> Result<()> {
        let mut accessor = InMemoryCacheAccessor::new();
        stored(accessor.save_access_token(access_token("a b", UnixTime(NOW.0 + 3600))))?;
        stored(accessor.save_refresh_token(refresh_token("client", "app-rt", None)))?;
        let exchange = ScriptedExchange::replying(vec![
            Ok(fresh_response("forced-at")),
            Ok(fresh_response("claims-at")),
        ]);
        let strategy = strategy(accessor, exchange.clone())?;

        let forced = strategy
            .acquire_token(&for_account("a b").with_force_refresh(true))
            .await?;
        assert_eq!(forced.access_token().as_str(), "forced-at");

        let challenged = strategy
            .acquire_token(&for_account("a b").with_claims(r#"{"access_token":{"nbf":{"essential":true}}}"#))
            .await?;
        assert_eq!(challenged.access_token().as_str(), "claims-at");
        assert_eq!(exchange.calls(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn login_hint_resolves_a_unique_account() -> Result<()> {
        let mut accessor = InMemoryCacheAccessor::new();
        stored(accessor.save_account(account_item("uid.utid", "User@Example.com")))?;
        stored(accessor.save_account(account_item("other.utid", "")))?;
        stored(accessor.save_access_token(access_token("a b", UnixTime(NOW.0 + 3600))))?;
        let strategy = strategy(accessor, ScriptedExchange::replying(vec![]))?;

        let request = SilentRequest::new(ScopeSet::parse("a b")).with_login_hint("user@example.COM");
        let result = strategy.acquire_token(&request).await?;

        assert_eq!(
            result.account().map(|a| a.home_account_id.as_str()),
            Some("uid.utid")
        );
        Ok(())
    }

    #[tokio::test]
    async fn login_hint_must_match_exactly_one_account() -> Result<()> {
        let mut accessor = InMemoryCacheAccessor::new();
        stored(accessor.save_account(account_item("one.utid", "shared@example.com")))?;
        stored(accessor.save_account(account_item("two.utid", "shared@example.com")))?;
        let strategy = strategy(accessor, ScriptedExchange::replying(vec![]))?;

        let ambiguous = strategy
            .acquire_token(&SilentRequest::new(ScopeSet::parse("a")).with_login_hint("shared@example.com"))
            .await
            .err()
            .ok_or_else(|| eyre!("expected an error"))?;
        assert_eq!(
            ui_code(&ambiguous),
            Some(UiRequiredCode::MultipleAccountsForLoginHint)
        );

        let unknown = strategy
            .acquire_token(&SilentRequest::new(ScopeSet::parse("a")).with_login_hint("nobody@example.com"))
            .await
            .err()
            .ok_or_else(|| eyre!("expected an error"))?;
        assert_eq!(ui_code(&unknown), Some(UiRequiredCode::NoAccountForLoginHint));
        Ok(())
    }

    #[tokio::test]
    async fn account_or_login_hint_is_required() -> Result<()> {
        let strategy = strategy(InMemoryCacheAccessor::new(), ScriptedExchange::replying(vec![]))?;

        let error = strategy
            .acquire_token(&SilentRequest::new(ScopeSet::parse("a")))
            .await
            .err()
            .ok_or_else(|| eyre!("expected an error"))?;

        assert!(matches!(
            error,
            AcquireTokenError::Client(ClientError::MissingAccountOrLoginHint)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn b2c_requires_scopes() -> Result<()> {
        let exchange = ScriptedExchange::replying(vec![]);
        let config = ApplicationConfig::new(
            ClientId::from_static("client"),
            Authority::parse("https://login.example.com/tfp/contoso.onmicrosoft.com/b2c_1_signin/")?,
        )
        .with_clock(TestClock::new(NOW));
        let strategy = SilentAuthStrategy::new(Arc::new(TokenCache::new(config)), exchange.clone());

        let error = strategy
            .acquire_token(&SilentRequest::new(ScopeSet::parse("openid offline_access")).with_account(account()))
            .await
            .err()
            .ok_or_else(|| eyre!("expected an error"))?;

        assert_eq!(ui_code(&error), Some(UiRequiredCode::ScopesRequired));
        assert_eq!(exchange.calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_request_never_reaches_the_network() -> Result<()> {
        let mut accessor = InMemoryCacheAccessor::new();
        stored(accessor.save_refresh_token(refresh_token("client", "app-rt", None)))?;
        let exchange = ScriptedExchange::replying(vec![Ok(fresh_response("new-at"))]);
        let strategy = strategy(accessor, exchange.clone())?;

        let cancellation = CancellationToken::new();
        cancellation.cancel();

        let error = strategy
            .acquire_token(&for_account("a b").with_cancellation(cancellation))
            .await
            .err()
            .ok_or_else(|| eyre!("expected an error"))?;

        assert!(matches!(error, AcquireTokenError::Cancelled));
        assert_eq!(exchange.calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn one_notification_pair_per_request() -> Result<()> {
        let mut accessor = InMemoryCacheAccessor::new();
        stored(accessor.save_account(account_item("uid.utid", "user@example.com")))?;
        stored(accessor.save_refresh_token(refresh_token("client", "app-rt", None)))?;
        let recorder = Arc::new(RecordingNotifications::default());
        let cache = TokenCache::new(config()?)
            .with_accessor(accessor)
            .with_notifications(recorder.clone());
        let exchange = ScriptedExchange::replying(vec![Ok(fresh_response("new-at"))]);
        let strategy = SilentAuthStrategy::new(Arc::new(cache), exchange);

        let request = SilentRequest::new(ScopeSet::parse("a b")).with_login_hint("user@example.com");
        strategy.acquire_token(&request).await?;

        assert_eq!(
            recorder.events(),
            vec![
                "before_access",
                "after_access",
                "before_access",
                "before_write:changed",
                "after_access:changed",
            ]
        );
        Ok(())
    }
}
