//! C2 — Shared State Store Gateway.
//!
//! A `redis`-backed implementation of equipment settings, job status, and
//! advisory locks, mirroring the teacher's `hub::db` pool-construction shape
//! (one process-wide connection manager, typed errors, a log line on
//! connect) but speaking Redis instead of Postgres.

use crate::types::{Equipment, EquipmentSettings, JobStatus};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StateStoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A held advisory lock. Dropping this without calling `release` leaves the
/// lock to expire via its TTL — locks here are advisory by design.
pub struct LockHandle {
    pub key: String,
    pub token: String,
}

#[async_trait]
pub trait SharedStateStore: Send + Sync {
    async fn get_settings(&self, equipment_id: &str) -> Result<Option<EquipmentSettings>, StateStoreError>;
    async fn put_settings(
        &self,
        equipment_id: &str,
        settings: &EquipmentSettings,
    ) -> Result<(), StateStoreError>;

    async fn get_status(&self, job_id: &str) -> Result<Option<JobStatus>, StateStoreError>;
    async fn put_status(&self, status: &JobStatus, ttl_secs: u64) -> Result<(), StateStoreError>;

    /// Attempt to acquire an advisory lock, returning `None` if already held
    /// (lock contention is a successful skip, not an error).
    async fn acquire_lock(&self, key: &str, ttl_secs: u64) -> Result<Option<LockHandle>, StateStoreError>;
    async fn release_lock(&self, handle: &LockHandle) -> Result<(), StateStoreError>;

    async fn get_equipment_list_cache(&self) -> Result<Option<Vec<Equipment>>, StateStoreError>;
    async fn put_equipment_list_cache(&self, list: &[Equipment], ttl_secs: u64) -> Result<(), StateStoreError>;

    async fn get_equipment_result_cache(&self, equipment_id: &str) -> Result<Option<serde_json::Value>, StateStoreError>;
    async fn put_equipment_result_cache(
        &self,
        equipment_id: &str,
        value: &serde_json::Value,
        ttl_secs: u64,
    ) -> Result<(), StateStoreError>;
}

fn settings_key(equipment_id: &str) -> String {
    format!("settings:{equipment_id}")
}
fn status_key(job_id: &str) -> String {
    format!("status:{job_id}")
}
fn result_cache_key(equipment_id: &str) -> String {
    format!("cache:equipment_result:{equipment_id}")
}
const EQUIPMENT_LIST_CACHE_KEY: &str = "cache:equipment_list";

/// Compare-and-delete Lua script so a lock is only released by the holder
/// that acquired it, never by a stale caller racing a fresh acquisition.
const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

pub struct RedisStateStore {
    conn: ConnectionManager,
}

impl RedisStateStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StateStoreError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        info!(redis_url, "Connected to shared state store");
        Ok(Self { conn })
    }
}

#[async_trait]
impl SharedStateStore for RedisStateStore {
    async fn get_settings(&self, equipment_id: &str) -> Result<Option<EquipmentSettings>, StateStoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(settings_key(equipment_id)).await?;
        Ok(match raw {
            Some(s) => Some(serde_json::from_str(&s)?),
            None => None,
        })
    }

    async fn put_settings(
        &self,
        equipment_id: &str,
        settings: &EquipmentSettings,
    ) -> Result<(), StateStoreError> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(settings)?;
        let _: () = conn.set(settings_key(equipment_id), raw).await?;
        Ok(())
    }

    async fn get_status(&self, job_id: &str) -> Result<Option<JobStatus>, StateStoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(status_key(job_id)).await?;
        Ok(match raw {
            Some(s) => Some(serde_json::from_str(&s)?),
            None => None,
        })
    }

    async fn put_status(&self, status: &JobStatus, ttl_secs: u64) -> Result<(), StateStoreError> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(status)?;
        let _: () = conn.set_ex(status_key(&status.job_id), raw, ttl_secs).await?;
        Ok(())
    }

    async fn acquire_lock(&self, key: &str, ttl_secs: u64) -> Result<Option<LockHandle>, StateStoreError> {
        let mut conn = self.conn.clone();
        let token = Uuid::new_v4().to_string();
        let full_key = format!("lock:{key}");

        let acquired: bool = redis::cmd("SET")
            .arg(&full_key)
            .arg(&token)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async::<_, Option<String>>(&mut conn)
            .await?
            .is_some();

        Ok(if acquired {
            Some(LockHandle { key: full_key, token })
        } else {
            None
        })
    }

    async fn release_lock(&self, handle: &LockHandle) -> Result<(), StateStoreError> {
        let mut conn = self.conn.clone();
        let _: i32 = redis::Script::new(RELEASE_LOCK_SCRIPT)
            .key(&handle.key)
            .arg(&handle.token)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_equipment_list_cache(&self) -> Result<Option<Vec<Equipment>>, StateStoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(EQUIPMENT_LIST_CACHE_KEY).await?;
        Ok(match raw {
            Some(s) => Some(serde_json::from_str(&s)?),
            None => None,
        })
    }

    async fn put_equipment_list_cache(&self, list: &[Equipment], ttl_secs: u64) -> Result<(), StateStoreError> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(list)?;
        let _: () = conn.set_ex(EQUIPMENT_LIST_CACHE_KEY, raw, ttl_secs).await?;
        Ok(())
    }

    async fn get_equipment_result_cache(&self, equipment_id: &str) -> Result<Option<serde_json::Value>, StateStoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(result_cache_key(equipment_id)).await?;
        Ok(match raw {
            Some(s) => Some(serde_json::from_str(&s)?),
            None => None,
        })
    }

    async fn put_equipment_result_cache(
        &self,
        equipment_id: &str,
        value: &serde_json::Value,
        ttl_secs: u64,
    ) -> Result<(), StateStoreError> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(value)?;
        let _: () = conn.set_ex(result_cache_key(equipment_id), raw, ttl_secs).await?;
        Ok(())
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod fakes {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory fake used across gate/processor/worker/leadlag unit tests.
    #[derive(Default)]
    pub struct FakeStateStore {
        settings: Mutex<HashMap<String, EquipmentSettings>>,
        statuses: Mutex<HashMap<String, JobStatus>>,
        locks: Mutex<HashMap<String, String>>,
        equipment_list: Mutex<Option<Vec<Equipment>>>,
        result_cache: Mutex<HashMap<String, serde_json::Value>>,
    }

    #[async_trait]
    impl SharedStateStore for FakeStateStore {
        async fn get_settings(&self, equipment_id: &str) -> Result<Option<EquipmentSettings>, StateStoreError> {
            Ok(self.settings.lock().unwrap().get(equipment_id).cloned())
        }

        async fn put_settings(
            &self,
            equipment_id: &str,
            settings: &EquipmentSettings,
        ) -> Result<(), StateStoreError> {
            self.settings
                .lock()
                .unwrap()
                .insert(equipment_id.to_string(), settings.clone());
            Ok(())
        }

        async fn get_status(&self, job_id: &str) -> Result<Option<JobStatus>, StateStoreError> {
            Ok(self.statuses.lock().unwrap().get(job_id).cloned())
        }

        async fn put_status(&self, status: &JobStatus, _ttl_secs: u64) -> Result<(), StateStoreError> {
            self.statuses
                .lock()
                .unwrap()
                .insert(status.job_id.clone(), status.clone());
            Ok(())
        }

        async fn acquire_lock(&self, key: &str, _ttl_secs: u64) -> Result<Option<LockHandle>, StateStoreError> {
            let mut locks = self.locks.lock().unwrap();
            if locks.contains_key(key) {
                return Ok(None);
            }
            let token = Uuid::new_v4().to_string();
            locks.insert(key.to_string(), token.clone());
            Ok(Some(LockHandle {
                key: key.to_string(),
                token,
            }))
        }

        async fn release_lock(&self, handle: &LockHandle) -> Result<(), StateStoreError> {
            let mut locks = self.locks.lock().unwrap();
            if locks.get(&handle.key) == Some(&handle.token) {
                locks.remove(&handle.key);
            }
            Ok(())
        }

        async fn get_equipment_list_cache(&self) -> Result<Option<Vec<Equipment>>, StateStoreError> {
            Ok(self.equipment_list.lock().unwrap().clone())
        }

        async fn put_equipment_list_cache(&self, list: &[Equipment], _ttl_secs: u64) -> Result<(), StateStoreError> {
            *self.equipment_list.lock().unwrap() = Some(list.to_vec());
            Ok(())
        }

        async fn get_equipment_result_cache(&self, equipment_id: &str) -> Result<Option<serde_json::Value>, StateStoreError> {
            Ok(self.result_cache.lock().unwrap().get(equipment_id).cloned())
        }

        async fn put_equipment_result_cache(
            &self,
            equipment_id: &str,
            value: &serde_json::Value,
            _ttl_secs: u64,
        ) -> Result<(), StateStoreError> {
            self.result_cache
                .lock()
                .unwrap()
                .insert(equipment_id.to_string(), value.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::FakeStateStore;
    use super::*;

    #[tokio::test]
    async fn settings_roundtrip_refreshes_last_modified() {
        let store = FakeStateStore::default();
        let s1 = EquipmentSettings::new("operator-1");
        store.put_settings("E1", &s1).await.unwrap();
        let got = store.get_settings("E1").await.unwrap().unwrap();
        assert_eq!(got.last_modified, s1.last_modified);
        assert_eq!(got.modified_by, "operator-1");
    }

    #[tokio::test]
    async fn second_lock_attempt_is_contention_not_error() {
        let store = FakeStateStore::default();
        let first = store.acquire_lock("batch", 180).await.unwrap();
        assert!(first.is_some());
        let second = store.acquire_lock("batch", 180).await.unwrap();
        assert!(second.is_none(), "lock held elsewhere must be a skip, not an error");
    }

    #[tokio::test]
    async fn release_then_reacquire_succeeds() {
        let store = FakeStateStore::default();
        let lock = store.acquire_lock("batch", 180).await.unwrap().unwrap();
        store.release_lock(&lock).await.unwrap();
        let reacquired = store.acquire_lock("batch", 180).await.unwrap();
        assert!(reacquired.is_some());
    }
}
