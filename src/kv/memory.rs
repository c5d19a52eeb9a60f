//! In-memory key/value backend.
//!
//! Implements the same contracts as the Redis backend, including pipeline
//! atomicity (a single mutex held across the whole pipeline) and pub/sub
//! fan-out through the shared registry. Used by tests and local development
//! without a Redis instance.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::subscriber::SubscriberRegistry;
use super::{KvBackend, KvError, KvOp, KvReply, KvResult, Subscription};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    List(VecDeque<String>),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
}

impl State {
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        if self.entries.get(key).is_some_and(Entry::expired) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn upsert(&mut self, key: &str, default: Value) -> &mut Entry {
        if self.entries.get(key).is_some_and(Entry::expired) {
            self.entries.remove(key);
        }
        self.entries.entry(key.to_string()).or_insert(Entry {
            value: default,
            expires_at: None,
        })
    }
}

/// Redis-semantics index resolution for LRANGE/LTRIM.
fn resolve_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let mut start = if start < 0 { len + start } else { start };
    let mut stop = if stop < 0 { len + stop } else { stop };
    start = start.max(0);
    stop = stop.min(len - 1);
    if start > stop || len == 0 {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

#[derive(Default)]
pub struct MemoryKv {
    state: Mutex<State>,
    registry: RegistryHolder,
}

struct RegistryHolder(Arc<SubscriberRegistry>);

impl Default for RegistryHolder {
    fn default() -> Self {
        Self(SubscriberRegistry::new(None))
    }
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn op_on(state: &mut State, op: &KvOp) -> KvResult<KvReply> {
        match op {
            KvOp::HGet { key, field } => Ok(match Self::hget_sync(state, key, field) {
                Some(v) => KvReply::Str(v),
                None => KvReply::Nil,
            }),
            KvOp::HSet { key, field, value } => {
                let created = Self::hset_sync(state, key, field, value.clone())?;
                Ok(KvReply::Int(created as i64))
            },
            KvOp::HIncrBy { key, field, delta } => {
                Ok(KvReply::Int(Self::hincr_sync(state, key, field, *delta)?))
            },
            KvOp::HGetAll { key } => Ok(KvReply::Map(Self::hget_all_sync(state, key))),
            KvOp::LPush { key, value } => {
                Ok(KvReply::Int(Self::lpush_sync(state, key, value.clone())? as i64))
            },
            KvOp::LTrim { key, start, stop } => {
                Self::ltrim_sync(state, key, *start, *stop);
                Ok(KvReply::Ok)
            },
            KvOp::SAdd { key, member } => {
                let added = Self::sadd_sync(state, key, member)?;
                Ok(KvReply::Int(added as i64))
            },
            KvOp::SRem { key, member } => {
                let removed = Self::srem_sync(state, key, member);
                Ok(KvReply::Int(removed as i64))
            },
            KvOp::Expire { key, ttl_secs } => {
                let applied = Self::expire_sync(state, key, *ttl_secs);
                Ok(KvReply::Int(applied as i64))
            },
        }
    }

    fn hget_sync(state: &mut State, key: &str, field: &str) -> Option<String> {
        match state.live(key) {
            Some(Entry {
                value: Value::Hash(map),
                ..
            }) => map.get(field).cloned(),
            _ => None,
        }
    }

    fn hset_sync(state: &mut State, key: &str, field: &str, value: String) -> KvResult<bool> {
        let entry = state.upsert(key, Value::Hash(HashMap::new()));
        match &mut entry.value {
            Value::Hash(map) => Ok(map.insert(field.to_string(), value).is_none()),
            _ => Err(KvError::Other(format!("WRONGTYPE key {key} is not a hash"))),
        }
    }

    fn hget_all_sync(state: &mut State, key: &str) -> HashMap<String, String> {
        match state.live(key) {
            Some(Entry {
                value: Value::Hash(map),
                ..
            }) => map.clone(),
            _ => HashMap::new(),
        }
    }

    fn hincr_sync(state: &mut State, key: &str, field: &str, delta: i64) -> KvResult<i64> {
        let entry = state.upsert(key, Value::Hash(HashMap::new()));
        match &mut entry.value {
            Value::Hash(map) => {
                let current: i64 = map
                    .get(field)
                    .map(|v| v.parse())
                    .transpose()
                    .map_err(|_| KvError::Other("hash value is not an integer".to_string()))?
                    .unwrap_or(0);
                let next = current + delta;
                map.insert(field.to_string(), next.to_string());
                Ok(next)
            },
            _ => Err(KvError::Other(format!("WRONGTYPE key {key} is not a hash"))),
        }
    }

    fn lpush_sync(state: &mut State, key: &str, value: String) -> KvResult<u64> {
        let entry = state.upsert(key, Value::List(VecDeque::new()));
        match &mut entry.value {
            Value::List(list) => {
                list.push_front(value);
                Ok(list.len() as u64)
            },
            _ => Err(KvError::Other(format!("WRONGTYPE key {key} is not a list"))),
        }
    }

    fn ltrim_sync(state: &mut State, key: &str, start: i64, stop: i64) {
        if let Some(Entry {
            value: Value::List(list),
            ..
        }) = state.live(key)
        {
            match resolve_range(list.len(), start, stop) {
                Some((start, stop)) => {
                    let kept: VecDeque<String> =
                        list.iter().skip(start).take(stop - start + 1).cloned().collect();
                    *list = kept;
                },
                None => {
                    list.clear();
                },
            }
        }
    }

    fn sadd_sync(state: &mut State, key: &str, member: &str) -> KvResult<bool> {
        let entry = state.upsert(key, Value::Set(HashSet::new()));
        match &mut entry.value {
            Value::Set(set) => Ok(set.insert(member.to_string())),
            _ => Err(KvError::Other(format!("WRONGTYPE key {key} is not a set"))),
        }
    }

    fn srem_sync(state: &mut State, key: &str, member: &str) -> bool {
        match state.live(key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => set.remove(member),
            _ => false,
        }
    }

    fn expire_sync(state: &mut State, key: &str, ttl_secs: u64) -> bool {
        match state.live(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
                true
            },
            None => false,
        }
    }
}

#[async_trait]
impl KvBackend for MemoryKv {
    async fn set(&self, key: &str, value: String, ttl_secs: Option<u64>) -> KvResult<()> {
        let mut state = self.lock();
        state.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value),
                expires_at: ttl_secs.map(|ttl| Instant::now() + Duration::from_secs(ttl)),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let mut state = self.lock();
        Ok(match state.live(key) {
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Some(s.clone()),
            _ => None,
        })
    }

    async fn del(&self, key: &str) -> KvResult<()> {
        self.lock().entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> KvResult<bool> {
        Ok(self.lock().live(key).is_some())
    }

    async fn ttl(&self, key: &str) -> KvResult<i64> {
        let mut state = self.lock();
        Ok(match state.live(key) {
            Some(entry) => match entry.expires_at {
                Some(at) => at.saturating_duration_since(Instant::now()).as_secs() as i64,
                None => -1,
            },
            None => -2,
        })
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> KvResult<bool> {
        Ok(Self::expire_sync(&mut self.lock(), key, ttl_secs))
    }

    async fn hset(&self, key: &str, field: &str, value: String) -> KvResult<bool> {
        Self::hset_sync(&mut self.lock(), key, field, value)
    }

    async fn hget(&self, key: &str, field: &str) -> KvResult<Option<String>> {
        Ok(Self::hget_sync(&mut self.lock(), key, field))
    }

    async fn hget_all(&self, key: &str) -> KvResult<HashMap<String, String>> {
        Ok(Self::hget_all_sync(&mut self.lock(), key))
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> KvResult<i64> {
        Self::hincr_sync(&mut self.lock(), key, field, delta)
    }

    async fn lpush(&self, key: &str, value: String) -> KvResult<u64> {
        Self::lpush_sync(&mut self.lock(), key, value)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> KvResult<Vec<String>> {
        let mut state = self.lock();
        Ok(match state.live(key) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => match resolve_range(list.len(), start, stop) {
                Some((start, stop)) => {
                    list.iter().skip(start).take(stop - start + 1).cloned().collect()
                },
                None => Vec::new(),
            },
            _ => Vec::new(),
        })
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> KvResult<()> {
        Self::ltrim_sync(&mut self.lock(), key, start, stop);
        Ok(())
    }

    async fn llen(&self, key: &str) -> KvResult<u64> {
        let mut state = self.lock();
        Ok(match state.live(key) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => list.len() as u64,
            _ => 0,
        })
    }

    async fn sadd(&self, key: &str, member: &str) -> KvResult<bool> {
        Self::sadd_sync(&mut self.lock(), key, member)
    }

    async fn srem(&self, key: &str, member: &str) -> KvResult<bool> {
        Ok(Self::srem_sync(&mut self.lock(), key, member))
    }

    async fn smembers(&self, key: &str) -> KvResult<Vec<String>> {
        let mut state = self.lock();
        Ok(match state.live(key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => set.iter().cloned().collect(),
            _ => Vec::new(),
        })
    }

    async fn publish(&self, channel: &str, message: String) -> KvResult<()> {
        self.registry.0.dispatch(channel, message);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> KvResult<Subscription> {
        Ok(self.registry.0.subscribe(channel))
    }

    async fn pipeline(&self, ops: Vec<KvOp>) -> KvResult<Vec<KvReply>> {
        // One lock held across the whole pipeline gives the same atomicity
        // as MULTI/EXEC.
        let mut state = self.lock();
        let mut replies = Vec::with_capacity(ops.len());
        for op in &ops {
            replies.push(Self::op_on(&mut state, op)?);
        }
        Ok(replies)
    }

    async fn ping(&self) -> KvResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::KvGateway;
    use std::sync::Arc;

    fn gateway() -> KvGateway {
        KvGateway::new(Arc::new(MemoryKv::new()))
    }

    #[tokio::test]
    async fn strings_round_trip_with_json() {
        let kv = gateway();
        kv.set_json("k", &vec![1, 2, 3], None).await.unwrap();
        let got: Vec<u32> = kv.get_json("k").await.unwrap().unwrap();
        assert_eq!(got, vec![1, 2, 3]);

        kv.del("k").await.unwrap();
        assert!(!kv.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn list_push_trim_range() {
        let kv = gateway();
        for i in 0..10 {
            kv.lpush("list", &i.to_string()).await.unwrap();
        }
        // Newest first.
        assert_eq!(kv.lrange("list", 0, 1).await.unwrap(), vec!["9", "8"]);

        kv.ltrim("list", 0, 4).await.unwrap();
        assert_eq!(kv.llen("list").await.unwrap(), 5);
        assert_eq!(
            kv.lrange("list", 0, -1).await.unwrap(),
            vec!["9", "8", "7", "6", "5"]
        );
    }

    #[tokio::test]
    async fn hash_incr_and_defaults() {
        let kv = gateway();
        assert_eq!(kv.hincr_by("h", "like", 2).await.unwrap(), 2);
        assert_eq!(kv.hincr_by("h", "like", 3).await.unwrap(), 5);
        assert_eq!(kv.hget("h", "like").await.unwrap().unwrap(), "5");
        assert!(kv.hget("h", "love").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_membership_is_idempotent() {
        let kv = gateway();
        assert!(kv.sadd("s", "a").await.unwrap());
        assert!(!kv.sadd("s", "a").await.unwrap());
        assert!(kv.srem("s", "a").await.unwrap());
        assert!(!kv.srem("s", "a").await.unwrap());
    }

    #[tokio::test]
    async fn pipeline_returns_replies_in_order() {
        let kv = gateway();
        let replies = kv
            .pipeline(vec![
                KvOp::HIncrBy {
                    key: "emoji:0xt".into(),
                    field: "like".into(),
                    delta: 1,
                },
                KvOp::HGetAll {
                    key: "emoji:0xt".into(),
                },
            ])
            .await
            .unwrap();

        assert_eq!(replies[0], KvReply::Int(1));
        let map = replies[1].as_map().unwrap();
        assert_eq!(map.get("like").map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn publish_reaches_subscribers() {
        let kv = gateway();
        let mut sub = kv.subscribe("ch").await.unwrap();
        kv.publish("ch", "payload").await.unwrap();
        assert_eq!(sub.recv().await.unwrap(), "payload");
    }
}
