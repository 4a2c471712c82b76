//! An in-memory cache accessor

use std::collections::HashMap;

use super::{
    accessor::CacheAccessor,
    items::{AccessTokenItem, AccountItem, AppMetadataItem, IdTokenItem, RefreshTokenItem},
};
use crate::error::BoxError;

/// An in-memory cache accessor
///
/// This is the default storage for a token cache. Durable storage is layered on
/// top by loading and saving the whole cache from notification hooks.
#[derive(Default, Debug, Clone)]
pub struct InMemoryCacheAccessor {
    access_tokens: HashMap<String, AccessTokenItem>,
    refresh_tokens: HashMap<String, RefreshTokenItem>,
    id_tokens: HashMap<String, IdTokenItem>,
    accounts: HashMap<String, AccountItem>,
    app_metadata: HashMap<String, AppMetadataItem>,
}

impl InMemoryCacheAccessor {
    /// Constructs a new, empty in-memory accessor
    pub fn new() -> Self {
        Self::default()
    }
}

fn values<T: Clone>(map: &HashMap<String, T>) -> Result<Vec<T>, BoxError> {
    Ok(map.values().cloned().collect())
}

impl CacheAccessor for InMemoryCacheAccessor {
    fn save_access_token(&mut self, item: AccessTokenItem) -> Result<(), BoxError> {
        self.access_tokens.insert(item.cache_key(), item);
        Ok(())
    }

    fn save_refresh_token(&mut self, item: RefreshTokenItem) -> Result<(), BoxError> {
        self.refresh_tokens.insert(item.cache_key(), item);
        Ok(())
    }

    fn save_id_token(&mut self, item: IdTokenItem) -> Result<(), BoxError> {
        self.id_tokens.insert(item.cache_key(), item);
        Ok(())
    }

    fn save_account(&mut self, item: AccountItem) -> Result<(), BoxError> {
        self.accounts.insert(item.cache_key(), item);
        Ok(())
    }

    fn save_app_metadata(&mut self, item: AppMetadataItem) -> Result<(), BoxError> {
        self.app_metadata.insert(item.cache_key(), item);
        Ok(())
    }

    fn delete_access_token(&mut self, key: &str) -> Result<(), BoxError> {
        self.access_tokens.remove(key);
        Ok(())
    }

    fn delete_refresh_token(&mut self, key: &str) -> Result<(), BoxError> {
        self.refresh_tokens.remove(key);
        Ok(())
    }

    fn delete_id_token(&mut self, key: &str) -> Result<(), BoxError> {
        self.id_tokens.remove(key);
        Ok(())
    }

    fn delete_account(&mut self, key: &str) -> Result<(), BoxError> {
        self.accounts.remove(key);
        Ok(())
    }

    fn delete_app_metadata(&mut self, key: &str) -> Result<(), BoxError> {
        self.app_metadata.remove(key);
        Ok(())
    }

    fn get_access_token(&self, key: &str) -> Result<Option<AccessTokenItem>, BoxError> {
        Ok(self.access_tokens.get(key).cloned())
    }

    fn get_refresh_token(&self, key: &str) -> Result<Option<RefreshTokenItem>, BoxError> {
        Ok(self.refresh_tokens.get(key).cloned())
    }

    fn get_id_token(&self, key: &str) -> Result<Option<IdTokenItem>, BoxError> {
        Ok(self.id_tokens.get(key).cloned())
    }

    fn get_account(&self, key: &str) -> Result<Option<AccountItem>, BoxError> {
        Ok(self.accounts.get(key).cloned())
    }

    fn get_app_metadata(&self, key: &str) -> Result<Option<AppMetadataItem>, BoxError> {
        Ok(self.app_metadata.get(key).cloned())
    }

    fn all_access_tokens(&self) -> Result<Vec<AccessTokenItem>, BoxError> {
        values(&self.access_tokens)
    }

    fn all_refresh_tokens(&self) -> Result<Vec<RefreshTokenItem>, BoxError> {
        values(&self.refresh_tokens)
    }

    fn all_id_tokens(&self) -> Result<Vec<IdTokenItem>, BoxError> {
        values(&self.id_tokens)
    }

    fn all_accounts(&self) -> Result<Vec<AccountItem>, BoxError> {
        values(&self.accounts)
    }

    fn all_app_metadata(&self) -> Result<Vec<AppMetadataItem>, BoxError> {
        values(&self.app_metadata)
    }

    fn clear(&mut self) -> Result<(), BoxError> {
        self.access_tokens.clear();
        self.refresh_tokens.clear();
        self.id_tokens.clear();
        self.accounts.clear();
        self.app_metadata.clear();
        Ok(())
    }

    fn has_tokens(&self) -> Result<bool, BoxError> {
        Ok(!self.access_tokens.is_empty() || !self.refresh_tokens.is_empty())
    }
}
