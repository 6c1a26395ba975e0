use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use super::{
    AuthCodeMeta, MagicToken, PendingAuthRequest, ResumeToken, SessionStore,
    StoreResult, UpstreamState,
};

/// Single-process `SessionStore` used in development and tests. Every map
/// entry carries its deadline; expired entries are dropped on access.
#[derive(Default)]
pub struct MemoryStore {
    pending: Mutex<HashMap<String, PendingAuthRequest>>,
    magic: Mutex<HashMap<String, MagicToken>>,
    upstream: Mutex<HashMap<String, UpstreamState>>,
    code_meta: Mutex<HashMap<String, Expiring<AuthCodeMeta>>>,
    refresh_meta: Mutex<HashMap<String, Expiring<String>>>,
    resume: Mutex<HashMap<String, ResumeToken>>,
    seen: Mutex<HashMap<String, OffsetDateTime>>,
    windows: Mutex<HashMap<String, Vec<OffsetDateTime>>>,
}

struct Expiring<T> {
    value: T,
    expires_at: OffsetDateTime,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn deadline(ttl_secs: u64) -> OffsetDateTime {
    OffsetDateTime::now_utc() + Duration::seconds(ttl_secs as i64)
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn put_pending(&self, p: &PendingAuthRequest) -> StoreResult<()> {
        self.pending
            .lock()
            .unwrap()
            .insert(p.rid.clone(), p.clone());
        Ok(())
    }

    async fn get_pending(
        &self,
        rid: &str,
    ) -> StoreResult<Option<PendingAuthRequest>> {
        let now = OffsetDateTime::now_utc();
        let mut pending = self.pending.lock().unwrap();
        match pending.get(rid) {
            Some(p) if p.is_expired(now) => {
                pending.remove(rid);
                Ok(None)
            }
            Some(p) => Ok(Some(p.clone())),
            None => Ok(None),
        }
    }

    async fn set_pending_user(
        &self,
        rid: &str,
        user_id: Uuid,
    ) -> StoreResult<Option<PendingAuthRequest>> {
        let now = OffsetDateTime::now_utc();
        let mut pending = self.pending.lock().unwrap();
        match pending.get_mut(rid) {
            Some(p) if !p.is_expired(now) => {
                p.user_id = Some(user_id);
                Ok(Some(p.clone()))
            }
            _ => {
                pending.remove(rid);
                Ok(None)
            }
        }
    }

    async fn complete_pending(&self, rid: &str) -> StoreResult<()> {
        if let Some(p) = self.pending.lock().unwrap().get_mut(rid) {
            p.completed = true;
        }
        Ok(())
    }

    async fn remove_pending(&self, rid: &str) -> StoreResult<()> {
        self.pending.lock().unwrap().remove(rid);
        Ok(())
    }

    async fn put_magic(&self, token: &str, m: &MagicToken) -> StoreResult<()> {
        self.magic
            .lock()
            .unwrap()
            .insert(token.to_string(), m.clone());
        Ok(())
    }

    async fn take_magic(
        &self,
        token: &str,
    ) -> StoreResult<Option<MagicToken>> {
        let now = OffsetDateTime::now_utc();
        let taken = self.magic.lock().unwrap().remove(token);
        Ok(taken.filter(|m| m.expires_at > now))
    }

    async fn put_upstream(
        &self,
        state: &str,
        u: &UpstreamState,
    ) -> StoreResult<()> {
        self.upstream
            .lock()
            .unwrap()
            .insert(state.to_string(), u.clone());
        Ok(())
    }

    async fn take_upstream(
        &self,
        state: &str,
    ) -> StoreResult<Option<UpstreamState>> {
        let now = OffsetDateTime::now_utc();
        let taken = self.upstream.lock().unwrap().remove(state);
        Ok(taken.filter(|u| u.expires_at > now))
    }

    async fn put_code_meta(
        &self,
        code: &str,
        meta: &AuthCodeMeta,
    ) -> StoreResult<()> {
        self.code_meta.lock().unwrap().insert(
            code.to_string(),
            Expiring {
                value: meta.clone(),
                expires_at: deadline(super::ttl::CODE_META_SECS),
            },
        );
        Ok(())
    }

    async fn get_code_meta(
        &self,
        code: &str,
    ) -> StoreResult<Option<AuthCodeMeta>> {
        let now = OffsetDateTime::now_utc();
        let mut map = self.code_meta.lock().unwrap();
        match map.get(code) {
            Some(e) if e.expires_at > now => Ok(Some(e.value.clone())),
            Some(_) => {
                map.remove(code);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn take_code_meta(
        &self,
        code: &str,
    ) -> StoreResult<Option<AuthCodeMeta>> {
        let now = OffsetDateTime::now_utc();
        let taken = self.code_meta.lock().unwrap().remove(code);
        Ok(taken.filter(|e| e.expires_at > now).map(|e| e.value))
    }

    async fn put_refresh_meta(
        &self,
        token: &str,
        scope: &str,
    ) -> StoreResult<()> {
        self.refresh_meta.lock().unwrap().insert(
            token.to_string(),
            Expiring {
                value: scope.to_string(),
                expires_at: deadline(super::ttl::REFRESH_META_SECS),
            },
        );
        Ok(())
    }

    async fn get_refresh_meta(
        &self,
        token: &str,
    ) -> StoreResult<Option<String>> {
        let now = OffsetDateTime::now_utc();
        let map = self.refresh_meta.lock().unwrap();
        Ok(map
            .get(token)
            .filter(|e| e.expires_at > now)
            .map(|e| e.value.clone()))
    }

    async fn remove_refresh_meta(&self, token: &str) -> StoreResult<()> {
        self.refresh_meta.lock().unwrap().remove(token);
        Ok(())
    }

    async fn put_resume(
        &self,
        token: &str,
        r: &ResumeToken,
    ) -> StoreResult<()> {
        self.resume
            .lock()
            .unwrap()
            .insert(token.to_string(), r.clone());
        Ok(())
    }

    async fn take_resume(
        &self,
        token: &str,
    ) -> StoreResult<Option<ResumeToken>> {
        let now = OffsetDateTime::now_utc();
        let taken = self.resume.lock().unwrap().remove(token);
        Ok(taken.filter(|r| r.expires_at > now))
    }

    async fn mark_seen_once(
        &self,
        key: &str,
        ttl_secs: u64,
    ) -> StoreResult<bool> {
        let now = OffsetDateTime::now_utc();
        let mut seen = self.seen.lock().unwrap();
        seen.retain(|_, deadline| *deadline > now);
        if seen.contains_key(key) {
            return Ok(false);
        }
        seen.insert(key.to_string(), deadline(ttl_secs));
        Ok(true)
    }

    async fn incr_window(
        &self,
        key: &str,
        window_secs: u64,
    ) -> StoreResult<u64> {
        let now = OffsetDateTime::now_utc();
        let floor = now - Duration::seconds(window_secs as i64);
        let mut windows = self.windows.lock().unwrap();
        let hits = windows.entry(key.to_string()).or_default();
        hits.retain(|t| *t > floor);
        hits.push(now);
        Ok(hits.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn pending(rid: &str, ttl_secs: i64) -> PendingAuthRequest {
        PendingAuthRequest {
            rid: rid.to_string(),
            tenant_id: Uuid::new_v4(),
            client_db_id: Uuid::new_v4(),
            client_id: "c1".into(),
            redirect_uri: "https://rp/cb".into(),
            scope: "openid email".into(),
            state: Some("xyz".into()),
            nonce: None,
            code_challenge: None,
            code_challenge_method: None,
            user_id: None,
            completed: false,
            expires_at: OffsetDateTime::now_utc()
                + Duration::seconds(ttl_secs),
        }
    }

    #[tokio::test]
    async fn magic_token_is_single_use() {
        let store = MemoryStore::new();
        let m = MagicToken {
            tenant_id: Uuid::new_v4(),
            rid: "rid1".into(),
            email: "user@example.com".into(),
            expires_at: OffsetDateTime::now_utc() + Duration::minutes(10),
        };
        store.put_magic("tok", &m).await.unwrap();
        assert_eq!(store.take_magic("tok").await.unwrap(), Some(m));
        assert_eq!(store.take_magic("tok").await.unwrap(), None);
    }

    #[tokio::test]
    async fn magic_token_consumed_by_at_most_one_caller() {
        let store = Arc::new(MemoryStore::new());
        let m = MagicToken {
            tenant_id: Uuid::new_v4(),
            rid: "rid1".into(),
            email: "user@example.com".into(),
            expires_at: OffsetDateTime::now_utc() + Duration::minutes(10),
        };
        store.put_magic("tok", &m).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.take_magic("tok").await.unwrap().is_some()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn expired_pending_is_collected_on_read() {
        let store = MemoryStore::new();
        store.put_pending(&pending("r1", -1)).await.unwrap();
        assert_eq!(store.get_pending("r1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_pending_user_advances_state() {
        let store = MemoryStore::new();
        store.put_pending(&pending("r1", 300)).await.unwrap();
        let user_id = Uuid::new_v4();
        let updated =
            store.set_pending_user("r1", user_id).await.unwrap().unwrap();
        assert_eq!(updated.user_id, Some(user_id));
        let read = store.get_pending("r1").await.unwrap().unwrap();
        assert_eq!(read.user_id, Some(user_id));
    }

    #[tokio::test]
    async fn replay_guard_flags_second_sighting() {
        let store = MemoryStore::new();
        assert!(store.mark_seen_once("h1", 60).await.unwrap());
        assert!(!store.mark_seen_once("h1", 60).await.unwrap());
        assert!(store.mark_seen_once("h2", 60).await.unwrap());
    }

    #[tokio::test]
    async fn window_counter_counts_hits() {
        let store = MemoryStore::new();
        assert_eq!(store.incr_window("k", 60).await.unwrap(), 1);
        assert_eq!(store.incr_window("k", 60).await.unwrap(), 2);
        assert_eq!(store.incr_window("other", 60).await.unwrap(), 1);
    }
}
