//! Wire format sent to the collection endpoint.

use crate::event::{EventType, PARENT_ATTRIBUTE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Serialized event: `{ "t": <rank>, "i": "<uuid>", "a": { "parent": "<uuid>" } }`.
///
/// `a` is omitted entirely for visitors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishEvent {
    /// Event type
    pub t: EventType,
    /// Event id
    pub i: Uuid,
    /// Optional string attributes; carries `parent` for every non-visitor event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a: Option<BTreeMap<String, String>>,
}

impl PublishEvent {
    /// Parent id carried in the attributes, if present and well formed.
    #[must_use]
    pub fn parent_id(&self) -> Option<Uuid> {
        self.a
            .as_ref()
            .and_then(|attrs| attrs.get(PARENT_ATTRIBUTE))
            .and_then(|parent| Uuid::parse_str(parent).ok())
    }
}
