use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

pub const EVENT_CONSENT_REQUIRED: &str = "consentRequired";
pub const EVENT_LOGIN_COMPLETE: &str = "loginComplete";

/// One named event delivered to the waiting device.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SseMessage {
    pub event: String,
    pub data: Value,
}

/// Wire envelope used on the fast-store channel so a process can skip its
/// own publishes when they come back around.
#[derive(Serialize, Deserialize)]
struct BridgeEnvelope {
    origin: Uuid,
    rid: String,
    event: String,
    data: Value,
}

/// Tracks SSE subscribers per pending-request rid and fans published events
/// out to all of them.
///
/// Send strategy:
/// - collect target senders under a read lock
/// - drop lock before `send`
/// - prune stale subscribers under a write lock after failed sends
///
/// With a fast store configured, publishes are mirrored onto a per-rid
/// channel so subscribers held by other processes see them too; the backing
/// channel preserves per-channel ordering.
#[derive(Clone)]
pub struct SseBroker {
    inner: Arc<RwLock<HashMap<String, Vec<Subscriber>>>>,
    origin: Uuid,
    publisher: Option<ConnectionManager>,
}

struct Subscriber {
    id: Uuid,
    sender: mpsc::UnboundedSender<SseMessage>,
}

impl SseBroker {
    pub fn new(publisher: Option<ConnectionManager>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            origin: Uuid::new_v4(),
            publisher,
        }
    }

    /// Register a subscriber for `rid`. Returns the subscriber id and the
    /// receiving half to drive the response stream.
    pub async fn subscribe(
        &self,
        rid: &str,
    ) -> (Uuid, mpsc::UnboundedReceiver<SseMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.inner
            .write()
            .await
            .entry(rid.to_string())
            .or_default()
            .push(Subscriber { id, sender });
        (id, receiver)
    }

    pub async fn unsubscribe(&self, rid: &str, id: Uuid) {
        let mut inner = self.inner.write().await;
        if let Some(subs) = inner.get_mut(rid) {
            subs.retain(|s| s.id != id);
            if subs.is_empty() {
                inner.remove(rid);
            }
        }
    }

    /// Publish an event to every current subscriber of `rid`, local and (via
    /// the fast store) remote. Returns the local delivery count.
    pub async fn publish(&self, rid: &str, event: &str, data: Value) -> usize {
        let delivered = self
            .publish_local(
                rid,
                SseMessage { event: event.to_string(), data: data.clone() },
            )
            .await;

        if let Some(publisher) = &self.publisher {
            let envelope = BridgeEnvelope {
                origin: self.origin,
                rid: rid.to_string(),
                event: event.to_string(),
                data,
            };
            if let Ok(payload) = serde_json::to_string(&envelope) {
                let mut conn = publisher.clone();
                let channel = format!("sse:{rid}");
                if let Err(error) = redis::cmd("PUBLISH")
                    .arg(channel)
                    .arg(payload)
                    .query_async::<()>(&mut conn)
                    .await
                {
                    log::warn!("SSE fast-store publish failed: {error}");
                }
            }
        }

        delivered
    }

    async fn publish_local(&self, rid: &str, message: SseMessage) -> usize {
        let targets = {
            let inner = self.inner.read().await;
            inner
                .get(rid)
                .into_iter()
                .flat_map(|subs| subs.iter())
                .map(|s| (s.id, s.sender.clone()))
                .collect::<Vec<_>>()
        };

        let mut sent = 0usize;
        let mut stale = Vec::new();
        for (id, sender) in targets {
            if sender.send(message.clone()).is_ok() {
                sent += 1;
            } else {
                stale.push(id);
            }
        }

        if !stale.is_empty() {
            let mut inner = self.inner.write().await;
            if let Some(subs) = inner.get_mut(rid) {
                subs.retain(|s| !stale.contains(&s.id));
                if subs.is_empty() {
                    inner.remove(rid);
                }
            }
        }

        sent
    }

    /// Run the fast-store bridge: deliver events published by other
    /// processes to local subscribers. Spawned once at startup.
    pub async fn run_bridge(self, client: redis::Client) {
        loop {
            match client.get_async_pubsub().await {
                Ok(mut pubsub) => {
                    if let Err(error) = pubsub.psubscribe("sse:*").await {
                        log::warn!("SSE bridge subscribe failed: {error}");
                    } else {
                        let mut stream = pubsub.on_message();
                        while let Some(msg) = stream.next().await {
                            let Ok(payload) = msg.get_payload::<String>()
                            else {
                                continue;
                            };
                            let Ok(envelope) = serde_json::from_str::<
                                BridgeEnvelope,
                            >(&payload) else {
                                continue;
                            };
                            if envelope.origin == self.origin {
                                continue;
                            }
                            self.publish_local(
                                &envelope.rid,
                                SseMessage {
                                    event: envelope.event,
                                    data: envelope.data,
                                },
                            )
                            .await;
                        }
                    }
                }
                Err(error) => {
                    log::warn!("SSE bridge connection failed: {error}");
                }
            }
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_reaches_all_subscribers_in_order() {
        let broker = SseBroker::new(None);
        let (_, mut rx1) = broker.subscribe("rid1").await;
        let (_, mut rx2) = broker.subscribe("rid1").await;

        broker
            .publish("rid1", EVENT_CONSENT_REQUIRED, json!({"rid": "rid1"}))
            .await;
        broker
            .publish(
                "rid1",
                EVENT_LOGIN_COMPLETE,
                json!({"redirect": "https://rp/cb?code=x"}),
            )
            .await;

        for rx in [&mut rx1, &mut rx2] {
            let first = rx.recv().await.unwrap();
            assert_eq!(first.event, EVENT_CONSENT_REQUIRED);
            let second = rx.recv().await.unwrap();
            assert_eq!(second.event, EVENT_LOGIN_COMPLETE);
        }
    }

    #[tokio::test]
    async fn publish_is_scoped_to_the_rid() {
        let broker = SseBroker::new(None);
        let (_, mut rx_other) = broker.subscribe("other").await;
        broker.subscribe("rid1").await;

        broker.publish("rid1", EVENT_LOGIN_COMPLETE, json!({})).await;
        assert!(rx_other.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_subscribers_are_pruned() {
        let broker = SseBroker::new(None);
        let (_, rx) = broker.subscribe("rid1").await;
        drop(rx);
        let delivered =
            broker.publish("rid1", EVENT_LOGIN_COMPLETE, json!({})).await;
        assert_eq!(delivered, 0);
        assert!(broker.inner.read().await.get("rid1").is_none());
    }

    #[tokio::test]
    async fn unsubscribe_removes_only_the_caller() {
        let broker = SseBroker::new(None);
        let (id1, rx1) = broker.subscribe("rid1").await;
        let (_, mut rx2) = broker.subscribe("rid1").await;
        drop(rx1);
        broker.unsubscribe("rid1", id1).await;

        broker.publish("rid1", EVENT_LOGIN_COMPLETE, json!({})).await;
        assert!(rx2.recv().await.is_some());
    }
}
