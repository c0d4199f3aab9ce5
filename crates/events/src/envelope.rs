use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fundledger_core::UserId;

use crate::Event;

/// Stored form of one transition in a record's history.
///
/// `sequence_number` is the record version the transition produced, so it
/// increases by one per stream and gaps indicate lost writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    stream_id: Uuid,
    stream_type: String,
    sequence_number: u64,
    event_type: String,
    actor: UserId,
    occurred_at: DateTime<Utc>,
    payload: E,
}

impl<E> EventEnvelope<E> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_id: Uuid,
        stream_id: Uuid,
        stream_type: impl Into<String>,
        sequence_number: u64,
        event_type: impl Into<String>,
        actor: UserId,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            stream_id,
            stream_type: stream_type.into(),
            sequence_number,
            event_type: event_type.into(),
            actor,
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn stream_id(&self) -> Uuid {
        self.stream_id
    }

    pub fn stream_type(&self) -> &str {
        &self.stream_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn actor(&self) -> UserId {
        self.actor
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }

    pub fn map_payload<F, U>(self, f: F) -> EventEnvelope<U>
    where
        F: FnOnce(E) -> U,
    {
        EventEnvelope {
            event_id: self.event_id,
            stream_id: self.stream_id,
            stream_type: self.stream_type,
            sequence_number: self.sequence_number,
            event_type: self.event_type,
            actor: self.actor,
            occurred_at: self.occurred_at,
            payload: f(self.payload),
        }
    }
}

impl<E: Event> EventEnvelope<E> {
    /// Wrap a typed event, taking its name, actor and time from the event.
    pub fn record(
        stream_id: Uuid,
        stream_type: impl Into<String>,
        sequence_number: u64,
        event: E,
    ) -> Self {
        Self::new(
            Uuid::now_v7(),
            stream_id,
            stream_type,
            sequence_number,
            event.event_type(),
            event.actor(),
            event.occurred_at(),
            event,
        )
    }
}

impl<E: Serialize> EventEnvelope<E> {
    /// Erase the payload type for storage as JSON.
    pub fn to_json(&self) -> Result<EventEnvelope<serde_json::Value>, serde_json::Error> {
        Ok(EventEnvelope {
            event_id: self.event_id,
            stream_id: self.stream_id,
            stream_type: self.stream_type.clone(),
            sequence_number: self.sequence_number,
            event_type: self.event_type.clone(),
            actor: self.actor,
            occurred_at: self.occurred_at,
            payload: serde_json::to_value(&self.payload)?,
        })
    }
}
