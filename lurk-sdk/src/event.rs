//! Events the session emits for the UI layer to consume.
//!
//! At most one event comes out of each inbound message. Batched history is
//! delivered as a single aggregate event when the batch closes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// How bad a server-reported problem is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Fail,
    Warn,
    Note,
}

impl Severity {
    /// Classify a numeric reply: 4xx and 5xx are errors, the rest informative.
    pub fn from_reply(code: u16) -> Self {
        match code {
            400..=599 => Severity::Fail,
            _ => Severity::Note,
        }
    }
}

/// A PRIVMSG or NOTICE.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageEvent {
    pub user: String,
    /// Channel display name when sent to a joined channel, otherwise the
    /// target as received.
    pub target: String,
    pub target_is_channel: bool,
    /// `PRIVMSG` or `NOTICE`.
    pub command: String,
    pub content: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Registration is complete and the server's features are known.
    Registered,

    /// Our own nick changed.
    SelfNick {
        former_nick: String,
    },
    UserNick {
        user: String,
        former_nick: String,
        time: DateTime<Utc>,
    },

    /// We finished joining a channel (end of NAMES). `requested` is set when
    /// the join followed a [`crate::Session::join`] call.
    SelfJoin {
        channel: String,
        requested: bool,
        topic: String,
    },
    UserJoin {
        user: String,
        channel: String,
        time: DateTime<Utc>,
    },

    /// We left a channel, by PART or KICK.
    SelfPart {
        channel: String,
    },
    /// Someone left a channel, by PART or KICK.
    UserPart {
        user: String,
        channel: String,
        time: DateTime<Utc>,
    },
    UserQuit {
        user: String,
        /// Channels we shared with the user. Empty when played back.
        channels: Vec<String>,
        time: DateTime<Utc>,
    },

    /// A monitored user came online.
    UserOnline {
        user: String,
    },
    /// A monitored user went offline.
    UserOffline {
        user: String,
    },

    TopicChange {
        channel: String,
        topic: String,
        time: DateTime<Utc>,
    },
    ModeChange {
        channel: String,
        mode: String,
        time: DateTime<Utc>,
    },
    Invite {
        inviter: String,
        invitee: String,
        channel: String,
    },

    Message(MessageEvent),

    /// Read marker of a target (`soju.im/read`).
    Read {
        target: String,
        timestamp: DateTime<Utc>,
    },

    /// A network offered by the bouncer (`soju.im/bouncer-networks`).
    BouncerNetwork {
        id: String,
        name: Option<String>,
    },

    /// A closed `chathistory` batch.
    History {
        target: String,
        events: Vec<Event>,
    },
    /// A closed `draft/chathistory-targets` batch: target → latest message time.
    HistoryTargets {
        targets: BTreeMap<String, DateTime<Utc>>,
    },
    /// A closed `soju.im/search` batch.
    Search {
        messages: Vec<MessageEvent>,
    },

    /// FAIL/WARN/NOTE, or a numeric reply the session has no use for.
    Error {
        severity: Severity,
        code: String,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn reply_severity() {
        assert_eq!(Severity::from_reply(433), Severity::Fail);
        assert_eq!(Severity::from_reply(502), Severity::Fail);
        assert_eq!(Severity::from_reply(2), Severity::Note);
        assert_eq!(Severity::from_reply(904), Severity::Note);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let ev = Event::SelfJoin {
            channel: "#lurk".into(),
            requested: true,
            topic: "hi".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "self_join");
        assert_eq!(json["channel"], "#lurk");
        assert_eq!(json["requested"], true);

        let ev = Event::Message(MessageEvent {
            user: "alice".into(),
            target: "#lurk".into(),
            target_is_channel: true,
            command: "PRIVMSG".into(),
            content: "hello".into(),
            time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        });
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["content"], "hello");
    }
}
