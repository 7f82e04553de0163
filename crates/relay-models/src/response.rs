//! Response item types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ResponseId, WorkId};
use crate::work::WorkItem;

/// Delivery state of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    #[default]
    Pending,
    /// Claimed by a channel consumer; not yet acknowledged.
    Delivering,
    Acked,
}

/// Channel side effects requested alongside a response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    /// Text the channel should speak aloud, if it supports voice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speak: Option<String>,

    /// Close the channel session after sending.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub terminate: bool,
}

impl ResponseMetadata {
    pub fn is_empty(&self) -> bool {
        self.speak.is_none() && !self.terminate
    }
}

/// Agent output waiting to be delivered back to a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseItem {
    pub id: ResponseId,

    /// Work item this response answers.
    pub work_id: WorkId,

    pub channel: String,

    /// Who should receive the response.
    pub destination: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_id: Option<String>,

    pub body: String,

    /// Agent (or swarm) that produced the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,

    #[serde(default, skip_serializing_if = "ResponseMetadata::is_empty")]
    pub metadata: ResponseMetadata,

    #[serde(default)]
    pub status: ResponseStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResponseItem {
    /// Creates a pending response addressed to whoever sent `work`.
    pub fn reply_to(work: &WorkItem, body: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ResponseId::new(),
            work_id: work.id.clone(),
            channel: work.channel.clone(),
            destination: work.sender.clone(),
            destination_id: work.sender_id.clone(),
            body: body.into(),
            agent: None,
            files: Vec::new(),
            metadata: ResponseMetadata::default(),
            status: ResponseStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = files;
        self
    }

    pub fn with_metadata(mut self, metadata: ResponseMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn set_status(&mut self, status: ResponseStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_to_addresses_sender() {
        let work = WorkItem::new("discord", "alice", "hi").with_sender_id("u-1");
        let resp = ResponseItem::reply_to(&work, "hello").with_agent("coder");

        assert_eq!(resp.work_id, work.id);
        assert_eq!(resp.channel, "discord");
        assert_eq!(resp.destination, "alice");
        assert_eq!(resp.destination_id.as_deref(), Some("u-1"));
        assert_eq!(resp.agent.as_deref(), Some("coder"));
        assert_eq!(resp.status, ResponseStatus::Pending);
    }

    #[test]
    fn test_metadata_omitted_when_empty() {
        let work = WorkItem::new("http", "bob", "hi");
        let resp = ResponseItem::reply_to(&work, "ok");
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("metadata").is_none());
        assert_eq!(json["workId"], work.id.as_str());
    }

    #[test]
    fn test_metadata_serialized() {
        let work = WorkItem::new("http", "bob", "hi");
        let resp = ResponseItem::reply_to(&work, "bye").with_metadata(ResponseMetadata {
            speak: Some("goodbye".into()),
            terminate: true,
        });
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["metadata"]["speak"], "goodbye");
        assert_eq!(json["metadata"]["terminate"], true);
    }
}
