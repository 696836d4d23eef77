//! Events pushed by the chat platform for the bot to consume.
//!
//! Delivery is at-least-once and ordered per connection. Consumers must
//! tolerate duplicates.

use serde::{Deserialize, Serialize};

use crate::types::{Member, Presence, VoiceChannel};

/// Events that the platform bridge emits to the consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    /// Successfully connected to the bridge.
    Connected,

    /// The platform session is ready. Carries a snapshot of the current
    /// state so memory-resident bookkeeping can be rebuilt after a restart.
    Ready {
        #[serde(default)]
        presences: Vec<(Member, Presence)>,
        #[serde(default)]
        voice_channels: Vec<VoiceChannel>,
    },

    /// A member's rich presence changed.
    PresenceChanged {
        member: Member,
        #[serde(default)]
        old: Option<Presence>,
        new: Presence,
    },

    /// A member joined, left, or moved between voice channels.
    ///
    /// Channel snapshots reflect the channel state *after* the change.
    VoiceStateChanged {
        member: Member,
        #[serde(default)]
        old_channel: Option<VoiceChannel>,
        #[serde(default)]
        new_channel: Option<VoiceChannel>,
    },

    /// A chat message in a text channel.
    Message {
        from: Member,
        channel: String,
        text: String,
    },

    /// Connection was closed.
    Disconnected {
        reason: String,
    },
}

/// Discriminant of [`Event`], used as the dispatch table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Ready,
    PresenceChanged,
    VoiceStateChanged,
    Message,
    Disconnected,
}

impl EventKind {
    /// Every kind the platform can emit.
    pub const ALL: [EventKind; 6] = [
        EventKind::Connected,
        EventKind::Ready,
        EventKind::PresenceChanged,
        EventKind::VoiceStateChanged,
        EventKind::Message,
        EventKind::Disconnected,
    ];
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Connected => write!(f, "connected"),
            EventKind::Ready => write!(f, "ready"),
            EventKind::PresenceChanged => write!(f, "presence_changed"),
            EventKind::VoiceStateChanged => write!(f, "voice_state_changed"),
            EventKind::Message => write!(f, "message"),
            EventKind::Disconnected => write!(f, "disconnected"),
        }
    }
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Connected => EventKind::Connected,
            Event::Ready { .. } => EventKind::Ready,
            Event::PresenceChanged { .. } => EventKind::PresenceChanged,
            Event::VoiceStateChanged { .. } => EventKind::VoiceStateChanged,
            Event::Message { .. } => EventKind::Message,
            Event::Disconnected { .. } => EventKind::Disconnected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_event_from_bridge_json() {
        let json = r#"{
            "kind": "presence_changed",
            "member": {"id": "42", "name": "alice"},
            "new": {"activities": [{"kind": "streaming", "name": "Twitch",
                "url": "https://www.twitch.tv/alice", "details": "speedrun"}]}
        }"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind(), EventKind::PresenceChanged);
        let Event::PresenceChanged { member, old, new } = event else {
            panic!("wrong variant");
        };
        assert_eq!(member.id.as_str(), "42");
        assert!(old.is_none());
        assert_eq!(new.activities[0].details.as_deref(), Some("speedrun"));
    }

    #[test]
    fn voice_state_defaults_missing_channels() {
        let json = r#"{"kind": "voice_state_changed", "member": {"id": "1", "name": "bob"},
            "new_channel": {"id": "900", "name": "raid night"}}"#;
        let event: Event = serde_json::from_str(json).unwrap();
        let Event::VoiceStateChanged { old_channel, new_channel, .. } = event else {
            panic!("wrong variant");
        };
        assert!(old_channel.is_none());
        let channel = new_channel.unwrap();
        assert!(channel.is_empty());
        assert_eq!(channel.parent, None);
    }

    #[test]
    fn kinds_cover_every_variant() {
        let events = [
            Event::Connected,
            Event::Ready { presences: vec![], voice_channels: vec![] },
            Event::PresenceChanged {
                member: Member::new("1", "a"),
                old: None,
                new: Presence::default(),
            },
            Event::VoiceStateChanged {
                member: Member::new("1", "a"),
                old_channel: None,
                new_channel: None,
            },
            Event::Message {
                from: Member::new("1", "a"),
                channel: "general".into(),
                text: "hi".into(),
            },
            Event::Disconnected { reason: "bye".into() },
        ];
        let kinds: Vec<EventKind> = events.iter().map(Event::kind).collect();
        assert_eq!(kinds, EventKind::ALL.to_vec());
    }
}
