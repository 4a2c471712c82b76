//! The token cache
//!
//! Items are stored through a pluggable [`CacheAccessor`]. A [`TokenCache`]
//! owns the accessor for an application, and each request reads it through a
//! [`CacheSessionManager`].

mod accessor;
mod in_memory;
pub mod items;
pub mod keys;
mod notifications;
mod serialization;
mod session;
mod token_cache;

pub use accessor::CacheAccessor;
pub use in_memory::InMemoryCacheAccessor;
pub use notifications::{CacheNotifications, TokenCacheNotificationArgs};
pub use serialization::CacheSerializer;
pub use session::CacheSessionManager;
pub use token_cache::{CacheRequest, TokenCache};

#[cfg(test)]
pub(crate) use notifications::test_support;
