//! Канал звонка: общий документ `{offer, answer}` и две очереди кандидатов.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::CallError;
use crate::peer::ice::candidate_record;
use crate::peer::state::Role;
use crate::peer::types::{Candidate, SdpType, SessionDescription};
use crate::store::{Document, QueueChange, SignalingStore, Snapshot, Subscription};

/// Содержимое документа канала
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelRecord {
    #[serde(default)]
    pub offer: Option<SessionDescription>,
    #[serde(default)]
    pub answer: Option<SessionDescription>,
}

impl ChannelRecord {
    pub fn from_document(doc: &Document) -> Result<Self, CallError> {
        let record: ChannelRecord = serde_json::from_value(Value::Object(doc.clone())).map_err(|e| {
            CallError::InvalidRecord {
                what: "channel",
                reason: e.to_string(),
            }
        })?;
        if matches!(&record.offer, Some(d) if d.kind != SdpType::Offer) {
            return Err(CallError::InvalidRecord {
                what: "offer",
                reason: "description type is not offer".into(),
            });
        }
        if matches!(&record.answer, Some(d) if d.kind != SdpType::Answer) {
            return Err(CallError::InvalidRecord {
                what: "answer",
                reason: "description type is not answer".into(),
            });
        }
        Ok(record)
    }
}

pub struct Channel<S> {
    id: String,
    collection: String,
    store: Arc<S>,
}

impl<S: SignalingStore> Channel<S> {
    /// Offerer: новый канал, id выдаёт хранилище
    pub async fn create(store: Arc<S>, collection: &str) -> Result<Self, CallError> {
        let id = store
            .create_document(collection)
            .await
            .map_err(|e| CallError::StoreWrite {
                what: "channel",
                reason: e.to_string(),
            })?;
        debug!(channel_id = %id, "channel created");
        Ok(Self {
            id,
            collection: collection.to_string(),
            store,
        })
    }

    /// Answerer: существующий канал и его текущее содержимое
    pub async fn open(
        store: Arc<S>,
        collection: &str,
        id: &str,
    ) -> Result<(Self, ChannelRecord), CallError> {
        let doc = store
            .get_document(collection, id)
            .await?
            .ok_or_else(|| CallError::ChannelNotFound(id.to_string()))?;
        let record = ChannelRecord::from_document(&doc)?;
        let channel = Self {
            id: id.to_string(),
            collection: collection.to_string(),
            store,
        };
        Ok((channel, record))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Единственная запись offerer'а: `{offer}`
    pub async fn publish_offer(&self, offer: &SessionDescription) -> Result<(), CallError> {
        let fields = description_fields("offer", offer)?;
        self.store
            .set_fields(&self.collection, &self.id, fields)
            .await
            .map_err(|e| CallError::StoreWrite {
                what: "offer",
                reason: e.to_string(),
            })
    }

    /// Слияние `{answer}`; поле `offer` остаётся нетронутым
    pub async fn publish_answer(&self, answer: &SessionDescription) -> Result<(), CallError> {
        let fields = description_fields("answer", answer)?;
        self.store
            .update_fields(&self.collection, &self.id, fields)
            .await
            .map_err(|e| CallError::StoreWrite {
                what: "answer",
                reason: e.to_string(),
            })
    }

    /// Дописывает локальный кандидат в очередь своей роли
    pub async fn append_candidate(&self, role: Role, candidate: &Candidate) -> Result<String, CallError> {
        let record = candidate_record(candidate)?;
        self.store
            .append_to_queue(&self.collection, &self.id, role.local_queue(), record)
            .await
            .map_err(|e| CallError::StoreWrite {
                what: "candidate",
                reason: e.to_string(),
            })
    }

    pub async fn subscribe(&self) -> Result<Subscription<Snapshot>, CallError> {
        Ok(self.store.subscribe_document(&self.collection, &self.id).await?)
    }

    /// Подписка на очередь собеседника для данной роли
    pub async fn subscribe_peer_candidates(&self, role: Role) -> Result<Subscription<QueueChange>, CallError> {
        Ok(self
            .store
            .subscribe_queue(&self.collection, &self.id, role.remote_queue())
            .await?)
    }
}

fn description_fields(name: &str, desc: &SessionDescription) -> Result<Document, CallError> {
    let value = serde_json::to_value(desc).map_err(|e| CallError::InvalidRecord {
        what: "description",
        reason: e.to_string(),
    })?;
    let mut fields = Document::new();
    fields.insert(name.to_string(), value);
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::state::{ANSWER_CANDIDATES, OFFER_CANDIDATES};
    use crate::store::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn offer_then_answer_yields_both_fields() {
        let store = Arc::new(MemoryStore::new());
        let channel = Channel::create(store.clone(), "channels").await.unwrap();
        channel.publish_offer(&SessionDescription::offer("D1")).await.unwrap();
        assert_eq!(
            store.document("channels", channel.id()).unwrap(),
            *json!({ "offer": { "type": "offer", "sdp": "D1" } }).as_object().unwrap()
        );

        let (joined, record) = Channel::open(store.clone(), "channels", channel.id()).await.unwrap();
        assert_eq!(record.offer, Some(SessionDescription::offer("D1")));
        assert_eq!(record.answer, None);

        joined.publish_answer(&SessionDescription::answer("D2")).await.unwrap();
        let record = ChannelRecord::from_document(&store.document("channels", channel.id()).unwrap()).unwrap();
        assert_eq!(record.offer, Some(SessionDescription::offer("D1")));
        assert_eq!(record.answer, Some(SessionDescription::answer("D2")));
    }

    #[tokio::test]
    async fn open_missing_channel_fails_without_writes() {
        let store = Arc::new(MemoryStore::new());
        let err = Channel::open(store.clone(), "channels", "C404").await.err().unwrap();
        assert_eq!(err, CallError::ChannelNotFound("C404".into()));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn candidates_go_to_role_queue() {
        let store = Arc::new(MemoryStore::new());
        let channel = Channel::create(store.clone(), "channels").await.unwrap();
        channel
            .append_candidate(Role::Offerer, &Candidate::new("candidate:o"))
            .await
            .unwrap();
        channel
            .append_candidate(Role::Answerer, &Candidate::new("candidate:a"))
            .await
            .unwrap();

        let offers = store.queue("channels", channel.id(), OFFER_CANDIDATES);
        let answers = store.queue("channels", channel.id(), ANSWER_CANDIDATES);
        assert_eq!(offers[0]["candidate"], json!("candidate:o"));
        assert_eq!(answers[0]["candidate"], json!("candidate:a"));
    }

    #[test]
    fn mislabeled_offer_is_rejected() {
        let doc = json!({ "offer": { "type": "answer", "sdp": "x" } });
        let err = ChannelRecord::from_document(doc.as_object().unwrap()).unwrap_err();
        assert!(matches!(err, CallError::InvalidRecord { what: "offer", .. }));
    }
}
