// devdash - Caching API proxy for a weather, GitHub, and AI developer dashboard
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

//! Expiring cache kept in a `Storage`, used by the terminal client.

use crate::clock::Clock;
use crate::error::StorageError;
use crate::storage::Storage;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const CACHE_PREFIX: &str = "devdash_cache_";

/// Stored form of a cached value. Valid while `now < expiry_time`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalEntry {
    pub data: Value,
    pub timestamp: i64,
    pub expiry_time: i64,
}

impl LocalEntry {
    pub fn is_valid(&self, now_millis: i64) -> bool {
        now_millis < self.expiry_time
    }
}

pub struct LocalCache<S> {
    storage: S,
    clock: Arc<dyn Clock>,
}

impl<S: Storage> LocalCache<S> {
    pub fn new(storage: S, clock: Arc<dyn Clock>) -> Self {
        LocalCache { storage, clock }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// True if a valid entry exists for `key`. Expired entries are removed.
    pub fn has(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entry(key)?.is_some())
    }

    /// Cached value for `key` if it exists and has not expired.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.entry(key)? {
            Some(entry) => match serde_json::from_value(entry.data) {
                Ok(v) => Ok(Some(v)),
                Err(e) => {
                    tracing::debug!(message = "cached value has unexpected shape", key = key, error = %e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Store `value` for `key` until `ttl` from now, sweeping expired entries first.
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), StorageError> {
        self.clean_cache()?;

        let now = self.clock.now_millis();
        let entry = LocalEntry {
            data: serde_json::to_value(value)?,
            timestamp: now,
            expiry_time: now + ttl.as_millis() as i64,
        };

        self.storage.set(&storage_key(key), &serde_json::to_string(&entry)?)
    }

    pub fn clear(&self, key: &str) -> Result<(), StorageError> {
        self.storage.remove(&storage_key(key))
    }

    /// Remove every cache entry, leaving other keys in the store alone.
    pub fn clear_all(&self) -> Result<usize, StorageError> {
        let mut removed = 0;
        for key in self.storage.keys()? {
            if key.starts_with(CACHE_PREFIX) {
                self.storage.remove(&key)?;
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// Remove expired or unreadable cache entries, returning how many were removed.
    pub fn clean_cache(&self) -> Result<usize, StorageError> {
        let now = self.clock.now_millis();
        let mut removed = 0;

        for key in self.storage.keys()? {
            if !key.starts_with(CACHE_PREFIX) {
                continue;
            }

            let keep = match self.storage.get(&key)? {
                Some(raw) => serde_json::from_str::<LocalEntry>(&raw).map_or(false, |e| e.is_valid(now)),
                None => true,
            };

            if !keep {
                self.storage.remove(&key)?;
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::debug!(message = "removed expired cache entries", removed = removed);
        }

        Ok(removed)
    }

    fn entry(&self, key: &str) -> Result<Option<LocalEntry>, StorageError> {
        let full_key = storage_key(key);
        let raw = match self.storage.get(&full_key)? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        match serde_json::from_str::<LocalEntry>(&raw) {
            Ok(entry) if entry.is_valid(self.clock.now_millis()) => Ok(Some(entry)),
            Ok(_) => {
                self.storage.remove(&full_key)?;
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(message = "removing unreadable cache entry", key = key, error = %e);
                self.storage.remove(&full_key)?;
                Ok(None)
            }
        }
    }
}

fn storage_key(key: &str) -> String {
    format!("{}{}", CACHE_PREFIX, key)
}
