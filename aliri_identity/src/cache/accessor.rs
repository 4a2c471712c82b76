//! Pluggable storage for cache items

use std::fmt;

use super::items::{AccessTokenItem, AccountItem, AppMetadataItem, IdTokenItem, RefreshTokenItem};
use crate::error::BoxError;

/// Key/value storage for each kind of cache item
///
/// Items are addressed by their canonical key. Saving an item replaces any item
/// stored under the same key wholesale. The storage medium is opaque to the
/// cache: memory, an encrypted file or an OS keystore all fit behind this trait.
pub trait CacheAccessor: fmt::Debug + Send + Sync {
    /// Stores an access token
    fn save_access_token(&mut self, item: AccessTokenItem) -> Result<(), BoxError>;
    /// Stores a refresh token
    fn save_refresh_token(&mut self, item: RefreshTokenItem) -> Result<(), BoxError>;
    /// Stores an ID token
    fn save_id_token(&mut self, item: IdTokenItem) -> Result<(), BoxError>;
    /// Stores an account
    fn save_account(&mut self, item: AccountItem) -> Result<(), BoxError>;
    /// Stores application metadata
    fn save_app_metadata(&mut self, item: AppMetadataItem) -> Result<(), BoxError>;

    /// Removes an access token
    fn delete_access_token(&mut self, key: &str) -> Result<(), BoxError>;
    /// Removes a refresh token
    fn delete_refresh_token(&mut self, key: &str) -> Result<(), BoxError>;
    /// Removes an ID token
    fn delete_id_token(&mut self, key: &str) -> Result<(), BoxError>;
    /// Removes an account
    fn delete_account(&mut self, key: &str) -> Result<(), BoxError>;
    /// Removes application metadata
    fn delete_app_metadata(&mut self, key: &str) -> Result<(), BoxError>;

    /// Looks up an access token
    fn get_access_token(&self, key: &str) -> Result<Option<AccessTokenItem>, BoxError>;
    /// Looks up a refresh token
    fn get_refresh_token(&self, key: &str) -> Result<Option<RefreshTokenItem>, BoxError>;
    /// Looks up an ID token
    fn get_id_token(&self, key: &str) -> Result<Option<IdTokenItem>, BoxError>;
    /// Looks up an account
    fn get_account(&self, key: &str) -> Result<Option<AccountItem>, BoxError>;
    /// Looks up application metadata
    fn get_app_metadata(&self, key: &str) -> Result<Option<AppMetadataItem>, BoxError>;

    /// Lists every access token
    fn all_access_tokens(&self) -> Result<Vec<AccessTokenItem>, BoxError>;
    /// Lists every refresh token
    fn all_refresh_tokens(&self) -> Result<Vec<RefreshTokenItem>, BoxError>;
    /// Lists every ID token
    fn all_id_tokens(&self) -> Result<Vec<IdTokenItem>, BoxError>;
    /// Lists every account
    fn all_accounts(&self) -> Result<Vec<AccountItem>, BoxError>;
    /// Lists every application metadata record
    fn all_app_metadata(&self) -> Result<Vec<AppMetadataItem>, BoxError>;

    /// Removes every item
    fn clear(&mut self) -> Result<(), BoxError>;

    /// Whether any access or refresh token is stored
    fn has_tokens(&self) -> Result<bool, BoxError> {
        Ok(!self.all_access_tokens()?.is_empty() || !self.all_refresh_tokens()?.is_empty())
    }
}
