use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use indexmap::IndexMap;
use thiserror::Error;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::data::{Entry, RequestedId, Stream, StreamEntry, StreamError, StreamId, Value};
use crate::rdb::RdbEntry;
use crate::resp::Resp;
use crate::utils::to_epoch_ms;

pub type Db = Arc<Store>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// The keyspace. Each method takes the lock for exactly one logical operation.
#[derive(Debug)]
pub struct Store {
    inner: RwLock<HashMap<String, Entry>>,
    appended: Notify,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            appended: Notify::new(),
        }
    }

    /// Woken after every successful XADD.
    pub fn appended(&self) -> &Notify {
        &self.appended
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn set(
        &self,
        key: String,
        value: impl Into<Bytes>,
        expires_at: Option<SystemTime>,
    ) {
        self.inner
            .write()
            .await
            .insert(key, Entry::new(Value::Str(value.into()), expires_at));
    }

    pub async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let now = SystemTime::now();
        {
            let db = self.inner.read().await;
            match db.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => {
                    return match &entry.value {
                        Value::Str(value) => Ok(Some(value.clone())),
                        Value::Stream(_) => Err(StoreError::WrongType),
                    };
                }
                Some(_) => {}
            }
        }

        let mut db = self.inner.write().await;
        if db.get(key).is_some_and(|entry| entry.is_expired(now)) {
            db.remove(key);
            debug!(key, "evicted expired key");
        }
        Ok(None)
    }

    pub async fn keys(&self, pattern: &str) -> Vec<String> {
        let now = SystemTime::now();
        self.inner
            .read()
            .await
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .filter(|(key, _)| pattern == "*" || glob_match(pattern.as_bytes(), key.as_bytes()))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub async fn type_of(&self, key: &str) -> &'static str {
        let now = SystemTime::now();
        match self.inner.read().await.get(key) {
            Some(entry) if !entry.is_expired(now) => entry.value.type_name(),
            _ => "none",
        }
    }

    pub async fn xadd(
        &self,
        key: &str,
        requested: RequestedId,
        fields: IndexMap<String, String>,
    ) -> Result<StreamId, StoreError> {
        let now = SystemTime::now();
        let now_ms = to_epoch_ms(now);
        let mut db = self.inner.write().await;
        if db.get(key).is_some_and(|entry| entry.is_expired(now)) {
            db.remove(key);
        }

        let id = match db.get_mut(key).map(|entry| &mut entry.value) {
            Some(Value::Stream(stream)) => stream.insert(requested, fields, now_ms)?,
            Some(Value::Str(_)) => return Err(StoreError::WrongType),
            None => {
                let mut stream = Stream::new();
                let id = stream.insert(requested, fields, now_ms)?;
                db.insert(key.to_string(), Entry::new(Value::Stream(stream), None));
                id
            }
        };
        drop(db);

        self.appended.notify_waiters();
        Ok(id)
    }

    pub async fn xrange(
        &self,
        key: &str,
        start: StreamId,
        end: StreamId,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        self.with_stream(key, |stream| stream.range(start, end))
            .await
            .map(Option::unwrap_or_default)
    }

    pub async fn xread(&self, key: &str, after: StreamId) -> Result<Vec<StreamEntry>, StoreError> {
        self.with_stream(key, |stream| stream.after(after))
            .await
            .map(Option::unwrap_or_default)
    }

    pub async fn last_stream_id(&self, key: &str) -> Result<Option<StreamId>, StoreError> {
        self.with_stream(key, Stream::last_id)
            .await
            .map(Option::flatten)
    }

    async fn with_stream<T>(
        &self,
        key: &str,
        f: impl FnOnce(&Stream) -> T,
    ) -> Result<Option<T>, StoreError> {
        let now = SystemTime::now();
        match self.inner.read().await.get(key) {
            Some(entry) if !entry.is_expired(now) => match &entry.value {
                Value::Stream(stream) => Ok(Some(f(stream))),
                Value::Str(_) => Err(StoreError::WrongType),
            },
            _ => Ok(None),
        }
    }

    /// Inserts snapshot entries, replacing existing keys of the same name.
    pub async fn load(&self, entries: Vec<RdbEntry>) -> usize {
        let mut db = self.inner.write().await;
        let mut loaded = 0;
        for RdbEntry {
            key,
            value,
            expires_at,
        } in entries
        {
            match Value::try_from(value) {
                Ok(value) => {
                    db.insert(key, Entry::new(value, expires_at));
                    loaded += 1;
                }
                Err(value) => warn!(%key, ?value, "skipping snapshot value without a string form"),
            }
        }
        loaded
    }

    /// Live string keys in snapshot form. Streams have no snapshot encoding.
    pub async fn dump(&self) -> Vec<RdbEntry> {
        let now = SystemTime::now();
        self.inner
            .read()
            .await
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .filter_map(|(key, entry)| match &entry.value {
                Value::Str(value) => Some(RdbEntry {
                    key: key.clone(),
                    value: Resp::BulkString(value.clone()),
                    expires_at: entry.expires_at,
                }),
                Value::Stream(_) => None,
            })
            .collect()
    }

    pub async fn purge_expired(&self) -> usize {
        let now = SystemTime::now();
        let mut db = self.inner.write().await;
        let before = db.len();
        db.retain(|_, entry| !entry.is_expired(now));
        before - db.len()
    }

    /// Periodically drops expired keys. The task ends once the store is dropped.
    pub fn spawn_expiry_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store: Weak<Store> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let purged = store.purge_expired().await;
                if purged > 0 {
                    debug!(purged, "expiry sweep");
                }
            }
        })
    }
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern, text) {
        ([], []) => true,
        ([], _) => false,
        ([b'*', rest @ ..], _) => {
            glob_match(rest, text) || (!text.is_empty() && glob_match(pattern, &text[1..]))
        }
        (_, []) => false,
        ([b'?', p_rest @ ..], [_, t_rest @ ..]) => glob_match(p_rest, t_rest),
        ([p, p_rest @ ..], [t, t_rest @ ..]) => p == t && glob_match(p_rest, t_rest),
    }
}
