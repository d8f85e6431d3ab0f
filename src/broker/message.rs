use chrono::{DateTime, SecondsFormat, Utc};

use crate::transport::frame::Frame;

/// Represents a published message in the Pub/Sub system.
///
/// A message carries the topic it was published to, the opaque payload, the
/// identity of the publishing session and the broker-assigned publish time.
/// Retained messages are stored in this form and replayed verbatim, original
/// timestamp included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: String,
    pub from_client: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Stamp a new message with the current time.
    pub fn new(
        topic: impl Into<String>,
        payload: impl Into<String>,
        from_client: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            from_client: from_client.into(),
            timestamp: Utc::now(),
        }
    }

    /// The outbound `message` frame delivered to subscribers.
    pub fn to_frame(&self) -> Frame {
        Frame::Message {
            topic: self.topic.clone(),
            payload: self.payload.clone(),
            timestamp: format_timestamp(self.timestamp),
            from_client: self.from_client.clone(),
        }
    }
}

/// RFC 3339 with millisecond precision, as used on every outbound frame.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
