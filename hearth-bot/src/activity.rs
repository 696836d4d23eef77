//! Recognizing "live on stream" in a member's presence.

use std::sync::LazyLock;

use hearth_sdk::types::{ActivityKind, Presence};
use regex::Regex;
use serde::Serialize;

/// `https://twitch.tv/<login>` with optional `www.`/`m.` and trailing slash.
static STREAM_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:www\.|m\.)?twitch\.tv/([A-Za-z0-9_]{3,25})/?$")
        .expect("stream URL pattern is valid")
});

/// What we keep about a stream from the presence payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityMetadata {
    pub title: Option<String>,
    pub game: Option<String>,
    pub url: String,
}

/// A recognized live-stream activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveActivity {
    pub metadata: ActivityMetadata,
    /// Streaming-platform channel (login), lowercased.
    pub platform_channel: String,
}

/// Extract the streaming-platform channel name from a stream URL.
pub fn platform_channel_from_url(url: &str) -> Option<String> {
    STREAM_URL
        .captures(url.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
}

/// Find the first streaming activity with a recognized URL.
pub fn live_activity(presence: &Presence) -> Option<LiveActivity> {
    presence
        .activities
        .iter()
        .filter(|a| a.kind == ActivityKind::Streaming)
        .find_map(|a| {
            let url = a.url.as_deref()?;
            let platform_channel = platform_channel_from_url(url)?;
            Some(LiveActivity {
                metadata: ActivityMetadata {
                    title: a.details.clone(),
                    game: a.state.clone(),
                    url: url.to_string(),
                },
                platform_channel,
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_sdk::types::Activity;

    fn activity(kind: ActivityKind, url: Option<&str>) -> Activity {
        Activity {
            kind,
            name: "Twitch".into(),
            details: Some("Any% practice".into()),
            state: Some("Celeste".into()),
            url: url.map(str::to_string),
        }
    }

    #[test]
    fn extracts_channel_from_url_shapes() {
        assert_eq!(
            platform_channel_from_url("https://www.twitch.tv/Alice_99"),
            Some("alice_99".into())
        );
        assert_eq!(platform_channel_from_url("https://twitch.tv/bob/"), Some("bob".into()));
        assert_eq!(platform_channel_from_url("http://m.twitch.tv/carol"), Some("carol".into()));
        assert_eq!(platform_channel_from_url("https://www.youtube.com/watch?v=x"), None);
        assert_eq!(platform_channel_from_url("https://twitch.tv/videos/12345/extra"), None);
        assert_eq!(platform_channel_from_url("https://twitch.tv/"), None);
    }

    #[test]
    fn only_streaming_activities_count() {
        let playing = Presence {
            activities: vec![activity(ActivityKind::Playing, Some("https://twitch.tv/alice"))],
        };
        assert_eq!(live_activity(&playing), None);

        let streaming = Presence {
            activities: vec![
                activity(ActivityKind::Custom, None),
                activity(ActivityKind::Streaming, Some("https://www.twitch.tv/alice")),
            ],
        };
        let live = live_activity(&streaming).unwrap();
        assert_eq!(live.platform_channel, "alice");
        assert_eq!(live.metadata.title.as_deref(), Some("Any% practice"));
        assert_eq!(live.metadata.game.as_deref(), Some("Celeste"));
    }

    #[test]
    fn streaming_to_unknown_platform_is_not_live() {
        let presence = Presence {
            activities: vec![activity(ActivityKind::Streaming, Some("https://example.com/live"))],
        };
        assert_eq!(live_activity(&presence), None);
        assert_eq!(live_activity(&Presence::default()), None);
    }
}
