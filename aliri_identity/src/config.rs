//! Application-level settings shared by the cache and the silent flow

use std::{fmt, sync::Arc};

use aliri_clock::{Clock, System};

use crate::{authority::Authority, ClientId, ClientIdRef};

/// A shareable clock
pub type SharedClock = Arc<dyn Clock + Send + Sync>;

/// Settings describing the application that owns a token cache
#[derive(Clone)]
pub struct ApplicationConfig {
    client_id: ClientId,
    authority: Authority,
    foci_enabled: bool,
    legacy_cache_enabled: bool,
    is_app_cache: bool,
    clock: SharedClock,
}

impl ApplicationConfig {
    /// Constructs a configuration for the given client and authority
    ///
    /// Family refresh tokens are enabled and the legacy cache is disabled by
    /// default. Time is read from the system clock.
    pub fn new(client_id: ClientId, authority: Authority) -> Self {
        Self {
            client_id,
            authority,
            foci_enabled: true,
            legacy_cache_enabled: false,
            is_app_cache: false,
            clock: Arc::new(System),
        }
    }

    /// Sets whether family refresh tokens may be used on this platform
    pub fn with_foci_enabled(mut self, enabled: bool) -> Self {
        self.foci_enabled = enabled;
        self
    }

    /// Sets whether tokens are mirrored into the legacy cache format
    pub fn with_legacy_cache_enabled(mut self, enabled: bool) -> Self {
        self.legacy_cache_enabled = enabled;
        self
    }

    /// Marks the cache as holding application (rather than user) tokens
    pub fn with_app_cache(mut self, is_app_cache: bool) -> Self {
        self.is_app_cache = is_app_cache;
        self
    }

    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock(mut self, clock: impl Clock + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// The application's client ID
    #[inline]
    pub fn client_id(&self) -> &ClientIdRef {
        &self.client_id
    }

    /// The authority configured for the application
    #[inline]
    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Whether family refresh tokens may be used
    #[inline]
    pub fn foci_enabled(&self) -> bool {
        self.foci_enabled
    }

    /// Whether the legacy cache is kept in sync
    #[inline]
    pub fn legacy_cache_enabled(&self) -> bool {
        self.legacy_cache_enabled
    }

    /// Whether the cache holds application tokens
    #[inline]
    pub fn is_app_cache(&self) -> bool {
        self.is_app_cache
    }

    /// The clock used for expiry decisions
    #[inline]
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }
}

impl fmt::Debug for ApplicationConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ApplicationConfig")
            .field("client_id", &self.client_id)
            .field("authority", &self.authority)
            .field("foci_enabled", &self.foci_enabled)
            .field("legacy_cache_enabled", &self.legacy_cache_enabled)
            .field("is_app_cache", &self.is_app_cache)
            .field("now", &self.clock.now())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use aliri_clock::{TestClock, UnixTime};
    use color_eyre::Result;

    use super::*;

    #[test]
    fn defaults_enable_foci_only() -> Result<()> {
        let config = ApplicationConfig::new(
            ClientId::from_static("client"),
            Authority::parse("https://login.example.com/common")?,
        );

        assert!(config.foci_enabled());
        assert!(!config.legacy_cache_enabled());
        assert!(!config.is_app_cache());
        Ok(())
    }

    #[test]
    fn custom_clock_is_used() -> Result<()> {
        let config = ApplicationConfig::new(
            ClientId::from_static("client"),
            Authority::parse("https://login.example.com/common")?,
        )
        .with_clock(TestClock::new(UnixTime(1_000)));

        assert_eq!(config.clock().now(), UnixTime(1_000));
        Ok(())
    }
}
