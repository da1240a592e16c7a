// Live event model and raw payload normalization
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Category of an audience interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Comment,
    Gift,
    Follow,
    Like,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Comment => "comment",
            EventKind::Gift => "gift",
            EventKind::Follow => "follow",
            EventKind::Like => "like",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "comment" => Some(EventKind::Comment),
            "gift" => Some(EventKind::Gift),
            "follow" => Some(EventKind::Follow),
            "like" => Some(EventKind::Like),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific data carried by an event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventPayload {
    Comment {
        comment: String,
    },
    Gift {
        #[serde(rename = "giftName")]
        gift_name: String,
        count: u32,
    },
    Follow,
    Like {
        count: u32,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Comment { .. } => EventKind::Comment,
            EventPayload::Gift { .. } => EventKind::Gift,
            EventPayload::Follow => EventKind::Follow,
            EventPayload::Like { .. } => EventKind::Like,
        }
    }
}

/// A normalized audience interaction.
///
/// Created by the event buffer once a raw message normalizes cleanly and
/// never mutated afterwards. `sequence` is the only ordering key; `received_at`
/// is informational.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveEvent {
    pub sequence: u64,
    pub nickname: String,
    #[serde(flatten)]
    pub payload: EventPayload,
    pub received_at: DateTime<Utc>,
}

impl LiveEvent {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Comment text, if this is a comment
    pub fn comment(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Comment { comment } => Some(comment.as_str()),
            _ => None,
        }
    }

    /// Normalize a raw source message, stamping it with `sequence`.
    pub fn normalize(raw: &RawEvent, sequence: u64) -> Result<Self, MalformedEvent> {
        let kind = EventKind::parse(raw.kind.trim())
            .ok_or_else(|| MalformedEvent::UnknownKind(raw.kind.clone()))?;

        let data = match &raw.data {
            Value::Object(map) => map,
            Value::Null => return Err(MalformedEvent::MissingField("nickname")),
            _ => return Err(MalformedEvent::NotAnObject),
        };

        let nickname = non_blank(data.get("nickname"))
            .or_else(|| non_blank(data.get("uniqueId")))
            .ok_or(MalformedEvent::MissingField("nickname"))?;

        let payload = match kind {
            EventKind::Comment => EventPayload::Comment {
                comment: non_blank(data.get("comment"))
                    .ok_or(MalformedEvent::MissingField("comment"))?,
            },
            EventKind::Gift => EventPayload::Gift {
                gift_name: non_blank(data.get("giftName"))
                    .ok_or(MalformedEvent::MissingField("giftName"))?,
                count: count_field(data.get("count"))?,
            },
            EventKind::Follow => EventPayload::Follow,
            EventKind::Like => EventPayload::Like {
                count: count_field(data.get("count"))?,
            },
        };

        Ok(Self {
            sequence,
            nickname,
            payload,
            received_at: Utc::now(),
        })
    }
}

/// Raw, source-specific message: `{"type": "...", "data": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl RawEvent {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    pub fn comment(nickname: &str, text: &str) -> Self {
        Self::new(
            "comment",
            serde_json::json!({ "nickname": nickname, "comment": text }),
        )
    }

    pub fn gift(nickname: &str, gift_name: &str, count: u32) -> Self {
        Self::new(
            "gift",
            serde_json::json!({ "nickname": nickname, "giftName": gift_name, "count": count }),
        )
    }

    pub fn follow(nickname: &str) -> Self {
        Self::new("follow", serde_json::json!({ "nickname": nickname }))
    }

    pub fn like(nickname: &str, count: u32) -> Self {
        Self::new(
            "like",
            serde_json::json!({ "nickname": nickname, "count": count }),
        )
    }
}

/// Why a raw message could not be normalized
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MalformedEvent {
    #[error("unknown event type '{0}'")]
    UnknownKind(String),

    #[error("event data is not an object")]
    NotAnObject,

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid count: {0}")]
    InvalidCount(String),

    #[error("unparsable payload: {0}")]
    Unparsable(String),
}

fn non_blank(v: Option<&Value>) -> Option<String> {
    v.and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// Absent count means a single interaction
fn count_field(v: Option<&Value>) -> Result<u32, MalformedEvent> {
    match v {
        None | Some(Value::Null) => Ok(1),
        Some(Value::Number(n)) => n
            .as_u64()
            .filter(|c| *c >= 1)
            .and_then(|c| u32::try_from(c).ok())
            .ok_or_else(|| MalformedEvent::InvalidCount(n.to_string())),
        Some(other) => Err(MalformedEvent::InvalidCount(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_each_kind() {
        let c = LiveEvent::normalize(&RawEvent::comment("JaneDoe", "hello"), 1).unwrap();
        assert_eq!(c.kind(), EventKind::Comment);
        assert_eq!(c.comment(), Some("hello"));
        assert_eq!(c.sequence, 1);

        let g = LiveEvent::normalize(&RawEvent::gift("JohnS", "Rose", 3), 2).unwrap();
        assert_eq!(
            g.payload,
            EventPayload::Gift {
                gift_name: "Rose".into(),
                count: 3
            }
        );

        let f = LiveEvent::normalize(&RawEvent::follow("StreamFan"), 3).unwrap();
        assert_eq!(f.payload, EventPayload::Follow);

        let l = LiveEvent::normalize(&RawEvent::like("Liker123", 50), 4).unwrap();
        assert_eq!(l.payload, EventPayload::Like { count: 50 });
    }

    #[test]
    fn accepts_unique_id_alias() {
        let raw = RawEvent::new("comment", json!({ "uniqueId": "viewer_1", "comment": "yo" }));
        let ev = LiveEvent::normalize(&raw, 7).unwrap();
        assert_eq!(ev.nickname, "viewer_1");
    }

    #[test]
    fn count_defaults_to_one() {
        let raw = RawEvent::new("gift", json!({ "nickname": "a", "giftName": "Heart" }));
        let ev = LiveEvent::normalize(&raw, 1).unwrap();
        assert_eq!(
            ev.payload,
            EventPayload::Gift {
                gift_name: "Heart".into(),
                count: 1
            }
        );
    }

    #[test]
    fn rejects_malformed_payloads() {
        let missing_nick = RawEvent::new("comment", json!({ "comment": "hi" }));
        assert_eq!(
            LiveEvent::normalize(&missing_nick, 1),
            Err(MalformedEvent::MissingField("nickname"))
        );

        let blank_text = RawEvent::new("comment", json!({ "nickname": "a", "comment": "  " }));
        assert_eq!(
            LiveEvent::normalize(&blank_text, 1),
            Err(MalformedEvent::MissingField("comment"))
        );

        let unknown = RawEvent::new("share", json!({ "nickname": "a" }));
        assert!(matches!(
            LiveEvent::normalize(&unknown, 1),
            Err(MalformedEvent::UnknownKind(_))
        ));

        let zero = RawEvent::new("like", json!({ "nickname": "a", "count": 0 }));
        assert!(matches!(
            LiveEvent::normalize(&zero, 1),
            Err(MalformedEvent::InvalidCount(_))
        ));

        let scalar = RawEvent::new("follow", json!("StreamFan"));
        assert_eq!(
            LiveEvent::normalize(&scalar, 1),
            Err(MalformedEvent::NotAnObject)
        );
    }

    #[test]
    fn serializes_flat_with_type_tag() {
        let ev = LiveEvent::normalize(&RawEvent::gift("Alice", "Heart", 10), 5).unwrap();
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "gift");
        assert_eq!(v["nickname"], "Alice");
        assert_eq!(v["giftName"], "Heart");
        assert_eq!(v["count"], 10);
        assert_eq!(v["sequence"], 5);
    }

    #[test]
    fn raw_event_parses_wire_shape() {
        let raw: RawEvent =
            serde_json::from_str(r#"{"type":"follow","data":{"nickname":"StreamFan"}}"#).unwrap();
        assert_eq!(raw.kind, "follow");
        assert!(LiveEvent::normalize(&raw, 1).is_ok());
    }
}
