//! Delivery message model
//!
//! The notification instantiation of the durable queue pattern. A
//! `DeliveryMessage` follows the same state machine and retry discipline as
//! an `Operation`, with recipient/channel/priority/category fields in place
//! of entity/payload.

use crate::types::{ItemStatus, MessageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outbound channel a message is delivered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    /// Email in the attendance deployment.
    Primary,
    /// SMS in the attendance deployment.
    Secondary,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Primary => "primary",
            Channel::Secondary => "secondary",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessagePriority {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageCategory {
    Attendance,
    Security,
    System,
}

/// One queued outbound notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryMessage {
    pub id: MessageId,
    pub recipient: String,
    pub channel: Channel,
    pub priority: MessagePriority,
    pub category: MessageCategory,
    pub subject: String,
    pub body: String,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    pub status: ItemStatus,
    pub last_error: Option<String>,
}

impl DeliveryMessage {
    pub fn new(
        recipient: impl Into<String>,
        channel: Channel,
        priority: MessagePriority,
        category: MessageCategory,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            recipient: recipient.into(),
            channel,
            priority,
            category,
            subject: subject.into(),
            body: body.into(),
            enqueued_at: Utc::now(),
            retry_count: 0,
            status: ItemStatus::Pending,
            last_error: None,
        }
    }
}
