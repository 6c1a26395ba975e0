use async_trait::async_trait;
use redis::aio::ConnectionManager;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    AuthCodeMeta, MagicToken, PendingAuthRequest, ResumeToken, SessionStore,
    StoreError, StoreResult, UpstreamState, ttl,
};

/// Fast-store backed `SessionStore`. Keys are namespaced per record kind;
/// single-use semantics come from `GETDEL`, the replay guard from
/// `SET NX EX`, and rate windows from `INCR` + first-hit `EXPIRE`.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self { conn })
    }

    async fn set_json<T: serde::Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> StoreResult<()> {
        let payload = serde_json::to_string(value)?;
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(payload)
            .arg("EX")
            .arg(ttl_secs.max(1))
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> StoreResult<Option<T>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Atomic get-and-delete.
    async fn take_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> StoreResult<Option<T>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GETDEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

fn remaining_secs(expires_at: OffsetDateTime) -> u64 {
    let now = OffsetDateTime::now_utc();
    (expires_at - now).whole_seconds().max(1) as u64
}

fn pending_key(rid: &str) -> String {
    format!("pending:{rid}")
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn put_pending(&self, p: &PendingAuthRequest) -> StoreResult<()> {
        self.set_json(&pending_key(&p.rid), p, remaining_secs(p.expires_at))
            .await
    }

    async fn get_pending(
        &self,
        rid: &str,
    ) -> StoreResult<Option<PendingAuthRequest>> {
        self.get_json(&pending_key(rid)).await
    }

    async fn set_pending_user(
        &self,
        rid: &str,
        user_id: Uuid,
    ) -> StoreResult<Option<PendingAuthRequest>> {
        let Some(mut p) = self
            .get_json::<PendingAuthRequest>(&pending_key(rid))
            .await?
        else {
            return Ok(None);
        };
        p.user_id = Some(user_id);
        self.put_pending(&p).await?;
        Ok(Some(p))
    }

    async fn complete_pending(&self, rid: &str) -> StoreResult<()> {
        if let Some(mut p) = self
            .get_json::<PendingAuthRequest>(&pending_key(rid))
            .await?
        {
            p.completed = true;
            self.put_pending(&p).await?;
        }
        Ok(())
    }

    async fn remove_pending(&self, rid: &str) -> StoreResult<()> {
        self.remove(&pending_key(rid)).await
    }

    async fn put_magic(&self, token: &str, m: &MagicToken) -> StoreResult<()> {
        self.set_json(
            &format!("magic:{token}"),
            m,
            remaining_secs(m.expires_at),
        )
        .await
    }

    async fn take_magic(
        &self,
        token: &str,
    ) -> StoreResult<Option<MagicToken>> {
        self.take_json(&format!("magic:{token}")).await
    }

    async fn put_upstream(
        &self,
        state: &str,
        u: &UpstreamState,
    ) -> StoreResult<()> {
        self.set_json(
            &format!("upstream:{state}"),
            u,
            remaining_secs(u.expires_at),
        )
        .await
    }

    async fn take_upstream(
        &self,
        state: &str,
    ) -> StoreResult<Option<UpstreamState>> {
        self.take_json(&format!("upstream:{state}")).await
    }

    async fn put_code_meta(
        &self,
        code: &str,
        meta: &AuthCodeMeta,
    ) -> StoreResult<()> {
        self.set_json(&format!("codemeta:{code}"), meta, ttl::CODE_META_SECS)
            .await
    }

    async fn get_code_meta(
        &self,
        code: &str,
    ) -> StoreResult<Option<AuthCodeMeta>> {
        self.get_json(&format!("codemeta:{code}")).await
    }

    async fn take_code_meta(
        &self,
        code: &str,
    ) -> StoreResult<Option<AuthCodeMeta>> {
        self.take_json(&format!("codemeta:{code}")).await
    }

    async fn put_refresh_meta(
        &self,
        token: &str,
        scope: &str,
    ) -> StoreResult<()> {
        self.set_json(
            &format!("refreshmeta:{token}"),
            &scope.to_string(),
            ttl::REFRESH_META_SECS,
        )
        .await
    }

    async fn get_refresh_meta(
        &self,
        token: &str,
    ) -> StoreResult<Option<String>> {
        self.get_json(&format!("refreshmeta:{token}")).await
    }

    async fn remove_refresh_meta(&self, token: &str) -> StoreResult<()> {
        self.remove(&format!("refreshmeta:{token}")).await
    }

    async fn put_resume(
        &self,
        token: &str,
        r: &ResumeToken,
    ) -> StoreResult<()> {
        self.set_json(
            &format!("resume:{token}"),
            r,
            remaining_secs(r.expires_at),
        )
        .await
    }

    async fn take_resume(
        &self,
        token: &str,
    ) -> StoreResult<Option<ResumeToken>> {
        self.take_json(&format!("resume:{token}")).await
    }

    async fn mark_seen_once(
        &self,
        key: &str,
        ttl_secs: u64,
    ) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let set: Option<String> = redis::cmd("SET")
            .arg(format!("seen:{key}"))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(set.is_some())
    }

    async fn incr_window(
        &self,
        key: &str,
        window_secs: u64,
    ) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let full_key = format!("rl:{key}");
        let count: u64 = redis::cmd("INCR")
            .arg(&full_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        if count == 1 {
            redis::cmd("EXPIRE")
                .arg(&full_key)
                .arg(window_secs.max(1))
                .query_async::<()>(&mut conn)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        Ok(count)
    }
}
