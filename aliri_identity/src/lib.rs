//! Client-side token caching and silent authentication for OAuth2/OIDC
//!
//! This library keeps the tokens an application receives from an identity
//! provider in a shared cache and uses them to obtain new access tokens
//! without prompting the user again.
//!
//! A [`TokenCache`][cache::TokenCache] stores access tokens, refresh tokens,
//! ID tokens, accounts and application metadata. Applications that persist the
//! cache elsewhere register [`CacheNotifications`][cache::CacheNotifications]
//! which are told before the cache is read and after it has changed, so the
//! persisted copy can be loaded and saved. Within a single request, the access
//! hooks fire at most once no matter how many lookups the request performs.
//!
//! The [`SilentAuthStrategy`][silent::SilentAuthStrategy] serves requests from
//! the cache when it can and otherwise redeems a refresh token. When the
//! application belongs to a family of clients, a family refresh token issued
//! to a sibling application is tried first. If the identity provider is
//! unavailable, a cached token that has passed its refresh point is still
//! returned, and if the provider reports the refresh token as bad, the account
//! is removed from the cache.
//!
//! # General Flow
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use aliri_identity::{
//!     authority::Authority,
//!     cache::TokenCache,
//!     config::ApplicationConfig,
//!     file::FileCacheNotifications,
//!     protocol::oauth2::OAuth2TokenExchange,
//!     scopes::ScopeSet,
//!     silent::{SilentAuthStrategy, SilentRequest},
//!     ClientId,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ApplicationConfig::new(
//!     ClientId::from_static("00000000-0000-0000-0000-000000000000"),
//!     Authority::parse("https://login.example.com/common")?,
//! );
//!
//! let cache = TokenCache::new(config).with_notifications(Arc::new(
//!     FileCacheNotifications::new("token_cache.json".into()),
//! ));
//!
//! let strategy = SilentAuthStrategy::new(
//!     Arc::new(cache),
//!     OAuth2TokenExchange::new(reqwest::Client::new()),
//! );
//!
//! let request = SilentRequest::new(ScopeSet::parse("User.Read"))
//!     .with_login_hint("user@example.com");
//!
//! let result = strategy.acquire_token(&request).await?;
//!
//! tracing::info!(
//!     token = format_args!("{:#?}", result.access_token()),
//!     source = ?result.source(),
//!     "access token"
//! );
//! # Ok(())
//! # }
//! ```
//!
//! When acquisition fails with
//! [`AcquireTokenError::UiRequired`][error::AcquireTokenError::UiRequired],
//! the application must fall back to an interactive flow.
//!
//! # Features
//!
//! The following features are supported by this crate, all of which are enabled by default:
//!
//! * `oauth2`: Provides a token exchange that redeems refresh tokens at an
//!   OAuth2 token endpoint using [reqwest].
//! * `file`: Provides cache notifications and legacy cache persistence
//!   backed by the local filesystem.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod authority;
mod braids;
pub mod cache;
pub mod claims;
pub mod config;
pub mod error;
#[cfg(feature = "file")]
pub mod file;
pub mod legacy;
pub mod protocol;
pub mod result;
pub mod scopes;
pub mod silent;

pub use braids::*;
pub use error::AcquireTokenError;
pub use result::{Account, AuthenticationResult, TokenSource};
pub use silent::{SilentAuthStrategy, SilentRequest};
