use std::{path::PathBuf, sync::Arc};

use aliri_identity::{
    authority::Authority,
    cache::TokenCache,
    config::ApplicationConfig,
    file::{FileCacheNotifications, FileLegacyPersistence},
    protocol::oauth2::OAuth2TokenExchange,
    scopes::ScopeSet,
    AcquireTokenError, ClientId, SilentAuthStrategy, SilentRequest,
};
use clap::Parser;

#[derive(Debug, Parser)]
struct Opts {
    /// The authority that issued the cached tokens
    #[arg(short, long, env, default_value = "https://login.microsoftonline.com/common")]
    authority: String,

    /// The client ID of the application
    #[arg(short, long, env)]
    client_id: ClientId,

    /// The username of the cached account to acquire a token for
    #[arg(short, long, env)]
    login_hint: String,

    /// The scopes to request, separated by spaces
    #[arg(short, long, env, default_value = "User.Read")]
    scopes: String,

    /// Ignore cached access tokens
    #[arg(long)]
    force_refresh: bool,

    /// The local file holding the token cache
    #[arg(short = 'f', long, env, default_value = ".token_cache.json")]
    cache_file: PathBuf,

    /// The local file holding the legacy cache, if it should be kept in sync
    #[arg(long, env)]
    legacy_cache_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let config = ApplicationConfig::new(opts.client_id, Authority::parse(&opts.authority)?)
        .with_legacy_cache_enabled(opts.legacy_cache_file.is_some());

    let mut cache = TokenCache::new(config)
        .with_notifications(Arc::new(FileCacheNotifications::new(opts.cache_file)));

    if let Some(path) = opts.legacy_cache_file {
        cache = cache.with_legacy_persistence(Arc::new(FileLegacyPersistence::new(path)));
    }

    let client = reqwest::Client::builder().https_only(true).build()?;
    let strategy = SilentAuthStrategy::new(Arc::new(cache), OAuth2TokenExchange::new(client));

    let request = SilentRequest::new(ScopeSet::parse(&opts.scopes))
        .with_login_hint(opts.login_hint)
        .with_force_refresh(opts.force_refresh);

    match strategy.acquire_token(&request).await {
        Ok(result) => {
            tracing::info!(
                token = format_args!("{:#?}", result.access_token()),
                source = ?result.source(),
                expires_on = result.expires_on().0,
                "acquired access token"
            );
        }
        Err(AcquireTokenError::UiRequired(error)) => {
            tracing::warn!(
                code = error.code().as_str(),
                "interactive sign-in is required"
            );
        }
        Err(error) => return Err(error.into()),
    }

    Ok(())
}
