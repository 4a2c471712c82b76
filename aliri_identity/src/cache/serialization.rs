//! The persisted cache document
//!
//! The whole cache is written as one JSON object with a section per item type.
//! Each section maps canonical keys to items. Sections this crate does not know
//! about are remembered and written back unchanged.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use super::{accessor::CacheAccessor, in_memory::InMemoryCacheAccessor};
use crate::error::{storage, CacheError};

const ACCESS_TOKEN: &str = "AccessToken";
const REFRESH_TOKEN: &str = "RefreshToken";
const ID_TOKEN: &str = "IdToken";
const ACCOUNT: &str = "Account";
const APP_METADATA: &str = "AppMetadata";

/// The storage behind a token cache and the unknown sections read with it
#[derive(Debug)]
pub(crate) struct Store {
    pub(crate) accessor: Box<dyn CacheAccessor>,
    unknown_sections: Map<String, Value>,
}

impl Store {
    pub(crate) fn new(accessor: Box<dyn CacheAccessor>) -> Self {
        Self {
            accessor,
            unknown_sections: Map::new(),
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(Box::new(InMemoryCacheAccessor::new()))
    }
}

pub(crate) type SharedStore = Arc<Mutex<Store>>;

pub(crate) fn lock(store: &Mutex<Store>) -> MutexGuard<'_, Store> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reads and writes the whole cache as a JSON document
///
/// A serializer is handed to notification hooks so that they can load the
/// cache from durable storage before it is read and save it after it changes.
#[derive(Clone)]
pub struct CacheSerializer {
    store: SharedStore,
}

impl fmt::Debug for CacheSerializer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CacheSerializer").finish_non_exhaustive()
    }
}

fn section<T: Serialize>(
    items: Vec<T>,
    key: impl Fn(&T) -> String,
) -> Result<Value, serde_json::Error> {
    let mut map = Map::new();
    for item in items {
        map.insert(key(&item), serde_json::to_value(&item)?);
    }
    Ok(Value::Object(map))
}

fn read_section<T: DeserializeOwned>(
    document: &mut Map<String, Value>,
    name: &str,
) -> Result<Vec<T>, serde_json::Error> {
    match document.remove(name) {
        Some(Value::Object(map)) => map
            .into_iter()
            .map(|(_, v)| serde_json::from_value(v))
            .collect(),
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected `{}` to be an object, found {}",
            name, other
        ))),
    }
}

impl CacheSerializer {
    pub(crate) fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Serializes the whole cache
    pub fn serialize(&self) -> Result<Vec<u8>, CacheError> {
        let store = lock(&self.store);
        let accessor = &store.accessor;

        let mut document = store.unknown_sections.clone();
        document.insert(
            ACCESS_TOKEN.to_owned(),
            section(accessor.all_access_tokens().map_err(storage)?, |i| i.cache_key())?,
        );
        document.insert(
            REFRESH_TOKEN.to_owned(),
            section(accessor.all_refresh_tokens().map_err(storage)?, |i| i.cache_key())?,
        );
        document.insert(
            ID_TOKEN.to_owned(),
            section(accessor.all_id_tokens().map_err(storage)?, |i| i.cache_key())?,
        );
        document.insert(
            ACCOUNT.to_owned(),
            section(accessor.all_accounts().map_err(storage)?, |i| i.cache_key())?,
        );
        document.insert(
            APP_METADATA.to_owned(),
            section(accessor.all_app_metadata().map_err(storage)?, |i| i.cache_key())?,
        );

        Ok(serde_json::to_vec(&Value::Object(document))?)
    }

    /// Loads a serialized cache
    ///
    /// When `clear_existing` is set the current contents are dropped first;
    /// otherwise the loaded items are merged in, replacing items with the same
    /// key. An empty blob is ignored.
    pub fn deserialize(&self, data: &[u8], clear_existing: bool) -> Result<(), CacheError> {
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }

        let mut document: Map<String, Value> = serde_json::from_slice(data)?;

        let access_tokens = read_section(&mut document, ACCESS_TOKEN)?;
        let refresh_tokens = read_section(&mut document, REFRESH_TOKEN)?;
        let id_tokens = read_section(&mut document, ID_TOKEN)?;
        let accounts = read_section(&mut document, ACCOUNT)?;
        let app_metadata = read_section(&mut document, APP_METADATA)?;

        let mut store = lock(&self.store);
        if clear_existing {
            store.accessor.clear().map_err(storage)?;
            store.unknown_sections.clear();
        }

        let accessor = &mut store.accessor;
        for item in access_tokens {
            accessor.save_access_token(item).map_err(storage)?;
        }
        for item in refresh_tokens {
            accessor.save_refresh_token(item).map_err(storage)?;
        }
        for item in id_tokens {
            accessor.save_id_token(item).map_err(storage)?;
        }
        for item in accounts {
            accessor.save_account(item).map_err(storage)?;
        }
        for item in app_metadata {
            accessor.save_app_metadata(item).map_err(storage)?;
        }

        store.unknown_sections.extend(document);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use serde_json::json;

    use super::*;

    fn serializer() -> CacheSerializer {
        CacheSerializer::new(Arc::new(Mutex::new(Store::default())))
    }

    fn document() -> Value {
        json!({
            "AccessToken": {
                "uid.utid-login.example.com-accesstoken-client-utid-a b-bearer": {
                    "home_account_id": "uid.utid",
                    "environment": "login.example.com",
                    "client_id": "client",
                    "credential_type": "AccessToken",
                    "secret": "at",
                    "realm": "utid",
                    "target": "a b",
                    "cached_at": "100",
                    "expires_on": "3700",
                    "token_type": "Bearer",
                    "x_future": true
                }
            },
            "RefreshToken": {
                "uid.utid-login.example.com-refreshtoken-client-": {
                    "home_account_id": "uid.utid",
                    "environment": "login.example.com",
                    "client_id": "client",
                    "credential_type": "RefreshToken",
                    "secret": "rt"
                }
            },
            "AppMetadata": {
                "appmetadata-login.example.com-client": {
                    "client_id": "client",
                    "environment": "login.example.com",
                    "family_id": "1"
                }
            },
            "SomethingNew": { "kept": [1, 2] }
        })
    }

    #[test]
    fn round_trip_preserves_unknown_sections_and_fields() -> Result<()> {
        let s = serializer();
        s.deserialize(&serde_json::to_vec(&document())?, true)?;

        let written: Value = serde_json::from_slice(&s.serialize()?)?;

        assert_eq!(written["SomethingNew"], json!({ "kept": [1, 2] }));
        assert_eq!(
            written["AccessToken"]["uid.utid-login.example.com-accesstoken-client-utid-a b-bearer"]
                ["x_future"],
            json!(true)
        );
        assert_eq!(
            written["AppMetadata"]["appmetadata-login.example.com-client"]["family_id"],
            json!("1")
        );
        assert_eq!(written["IdToken"], json!({}));
        Ok(())
    }

    #[test]
    fn deserialize_without_clear_merges() -> Result<()> {
        let s = serializer();
        s.deserialize(&serde_json::to_vec(&document())?, true)?;
        s.deserialize(br#"{ "Account": {} }"#, false)?;

        let written: Value = serde_json::from_slice(&s.serialize()?)?;
        assert_eq!(written["RefreshToken"].as_object().map(|m| m.len()), Some(1));
        Ok(())
    }

    #[test]
    fn empty_blob_is_ignored() -> Result<()> {
        let s = serializer();
        s.deserialize(b"", true)?;
        s.deserialize(b"  ", true)?;
        Ok(())
    }

    #[test]
    fn malformed_blob_is_rejected() {
        let s = serializer();
        assert!(s.deserialize(b"{ not json", true).is_err());
        assert!(s.deserialize(br#"{ "AccessToken": [] }"#, true).is_err());
    }
}
