//! File-backed persistence for the token cache and the legacy cache

use std::{io, path::PathBuf};

use async_trait::async_trait;
use tokio::fs::OpenOptions;

use crate::{
    cache::{CacheNotifications, TokenCacheNotificationArgs},
    error::BoxError,
    legacy::LegacyCachePersistence,
};

async fn read_file(path: &PathBuf) -> Result<Option<Vec<u8>>, io::Error> {
    use tokio::io::AsyncReadExt;

    let mut file = match OpenOptions::new().read(true).open(path).await {
        Ok(file) => file,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(error),
    };

    let mut data = Vec::new();
    file.read_to_end(&mut data).await?;
    Ok(Some(data))
}

async fn write_file(path: &PathBuf, data: &[u8]) -> Result<(), io::Error> {
    use tokio::io::AsyncWriteExt;

    let mut file_opts = OpenOptions::new();

    file_opts.create(true).truncate(true).write(true);

    #[cfg(unix)]
    file_opts.mode(0o600);

    let mut file = file_opts.open(path).await?;
    file.write_all(data).await?;
    file.flush().await?;
    Ok(())
}

/// Keeps the token cache in sync with a local file
///
/// The file is loaded before the cache is accessed and rewritten after the
/// cache has changed. A missing file is treated as an empty cache.
#[derive(Debug)]
pub struct FileCacheNotifications {
    path: PathBuf,
}

impl FileCacheNotifications {
    /// Constructs file-backed notifications
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl CacheNotifications for FileCacheNotifications {
    async fn before_access(&self, args: &TokenCacheNotificationArgs) -> Result<(), BoxError> {
        if let Some(data) = read_file(&self.path).await? {
            args.cache().deserialize(&data, true)?;
            tracing::trace!(path = %self.path.display(), "loaded token cache from file");
        }
        Ok(())
    }

    async fn after_access(&self, args: &TokenCacheNotificationArgs) -> Result<(), BoxError> {
        if args.has_state_changed() {
            let data = args.cache().serialize()?;
            write_file(&self.path, &data).await?;
            tracing::debug!(path = %self.path.display(), "persisted token cache to file");
        }
        Ok(())
    }
}

/// Stores the legacy cache blob in a local file
#[derive(Debug)]
pub struct FileLegacyPersistence {
    path: PathBuf,
}

impl FileLegacyPersistence {
    /// Constructs file-backed legacy persistence
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl LegacyCachePersistence for FileLegacyPersistence {
    async fn load(&self) -> Result<Option<Vec<u8>>, BoxError> {
        Ok(read_file(&self.path).await?)
    }

    async fn write(&self, data: &[u8]) -> Result<(), BoxError> {
        Ok(write_file(&self.path, data).await?)
    }
}
