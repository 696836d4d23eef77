//! Chat commands:
//!
//!   !voice [name]   Create a temporary voice channel (once per rate-limit window)
//!   !live           List members who are live right now
//!   !help           List commands
//!
//! Commands await their side effects and report platform failures back to
//! the member as a chat reply.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use hearth_sdk::gateway::Gateway;
use hearth_sdk::types::{Member, MemberId};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::channels::ChannelLifecycle;
use crate::output;
use crate::streamers::StreamerRotation;

/// Longest channel name the platform accepts.
const MAX_CHANNEL_NAME: usize = 100;

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create a voice channel, optionally with a chosen name.
    Voice(Option<String>),
    Live,
    Help,
}

/// Parse `text` as a command. `None` for plain chat and unknown commands.
pub fn parse(prefix: &str, text: &str) -> Option<Command> {
    let body = text.trim().strip_prefix(prefix)?;
    let (name, args) = match body.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (body, ""),
    };
    match name.to_lowercase().as_str() {
        "voice" | "vc" => Some(Command::Voice((!args.is_empty()).then(|| args.to_string()))),
        "live" | "streams" => Some(Command::Live),
        "help" | "h" => Some(Command::Help),
        _ => None,
    }
}

/// Executes commands against the two managers.
#[derive(Clone)]
pub struct Commands {
    gateway: Arc<dyn Gateway>,
    channels: Arc<ChannelLifecycle>,
    streamers: Arc<StreamerRotation>,
    prefix: String,
    /// Creators whose `!voice` is still waiting on the platform.
    creating: Arc<Mutex<HashSet<MemberId>>>,
}

impl Commands {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        channels: Arc<ChannelLifecycle>,
        streamers: Arc<StreamerRotation>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            channels,
            streamers,
            prefix: prefix.into(),
            creating: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn parse(&self, text: &str) -> Option<Command> {
        parse(&self.prefix, text)
    }

    pub async fn execute(&self, from: &Member, channel: &str, command: Command) -> Result<()> {
        tracing::debug!(member = %from.id, channel, ?command, "Command");
        match command {
            Command::Voice(name) => self.voice(from, channel, name).await,
            Command::Live => self.live(channel).await,
            Command::Help => self.help(channel).await,
        }
    }

    async fn voice(&self, from: &Member, channel: &str, name: Option<String>) -> Result<()> {
        let name = name.unwrap_or_else(|| format!("{}'s channel", from.name));
        if name.chars().count() > MAX_CHANNEL_NAME {
            let text = format!("Channel names can be at most {MAX_CHANNEL_NAME} characters.");
            return self.reply(channel, &text).await;
        }

        if !self.channels.can_create(&from.id) {
            return self.rate_limited(from, channel).await;
        }
        if !self.creating.lock().insert(from.id.clone()) {
            return self.reply(channel, "Still creating your last channel, hang on.").await;
        }
        let created = self.channels.create(&from.id, &name).await;
        self.creating.lock().remove(&from.id);

        match created {
            Ok(vc) => {
                let text = format!(
                    "Created voice channel **{}**. It is removed once it stays empty for a while.",
                    vc.name
                );
                self.reply(channel, &text).await
            }
            Err(e) => self.reply(channel, &format!("Couldn't create that channel: {e}")).await,
        }
    }

    async fn rate_limited(&self, from: &Member, channel: &str) -> Result<()> {
        let wait = self
            .channels
            .record(&from.id)
            .map(|r| r.rate_limit_expiry.saturating_duration_since(Instant::now()))
            .unwrap_or_default();
        let mut text = format!(
            "You can create another channel in {}.",
            format_wait(wait.as_secs().max(1))
        );
        match self.channels.get_created_channel(&from.id).await {
            Ok(Some(existing)) => {
                text.push_str(&format!(" Your channel is **{}**.", existing.name));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(member = %from.id, error = %e, "Created channel lookup failed");
            }
        }
        self.reply(channel, &text).await
    }

    async fn live(&self, channel: &str) -> Result<()> {
        let streamers = self.streamers.list_live_streamers();
        if streamers.is_empty() {
            return self.reply(channel, "Nobody is live right now.").await;
        }
        let lines: Vec<String> = streamers
            .iter()
            .map(|s| {
                let marker = if s.featured { "★" } else { "•" };
                match &s.title {
                    Some(title) => format!("{marker} {}: {title} <{}>", s.name, s.url),
                    None => format!("{marker} {} <{}>", s.name, s.url),
                }
            })
            .collect();
        self.reply(channel, &lines.join("\n")).await
    }

    async fn help(&self, channel: &str) -> Result<()> {
        let p = &self.prefix;
        let text = format!(
            "Commands:\n\
             {p}voice [name]  Create a temporary voice channel\n\
             {p}live          Who is streaming right now\n\
             {p}help          This message"
        );
        self.reply(channel, &text).await
    }

    async fn reply(&self, channel: &str, text: &str) -> Result<()> {
        output::say(self.gateway.as_ref(), channel, text).await?;
        Ok(())
    }
}

fn format_wait(secs: u64) -> String {
    match (secs / 60, secs % 60) {
        (0, s) => format!("{s}s"),
        (m, 0) => format!("{m}m"),
        (m, s) => format!("{m}m {s}s"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityMetadata;
    use crate::config::{StreamSettings, VoiceSettings};
    use hearth_sdk::testing::RecordingGateway;
    use std::time::Duration;

    fn setup() -> (Arc<RecordingGateway>, Commands) {
        let gateway = Arc::new(RecordingGateway::new());
        let channels = Arc::new(ChannelLifecycle::new(gateway.clone(), VoiceSettings::default()));
        let streamers = Arc::new(StreamerRotation::new(gateway.clone(), StreamSettings::default()));
        let commands = Commands::new(gateway.clone(), channels, streamers, "!");
        (gateway, commands)
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse("!", "!voice"), Some(Command::Voice(None)));
        assert_eq!(
            parse("!", "!VC  late night  "),
            Some(Command::Voice(Some("late night".into())))
        );
        assert_eq!(parse("!", "!live"), Some(Command::Live));
        assert_eq!(parse("!", "!help"), Some(Command::Help));
        assert_eq!(parse("!", "!dance"), None);
        assert_eq!(parse("!", "voice"), None);
        assert_eq!(parse("?", "?live"), Some(Command::Live));
    }

    #[test]
    fn wait_formatting() {
        assert_eq!(format_wait(45), "45s");
        assert_eq!(format_wait(120), "2m");
        assert_eq!(format_wait(299), "4m 59s");
    }

    #[tokio::test(start_paused = true)]
    async fn voice_creates_then_rate_limits() {
        let (gateway, commands) = setup();
        let alice = Member::new("alice", "Alice");

        commands.execute(&alice, "lobby", Command::Voice(None)).await.unwrap();
        assert!(gateway.messages()[0].1.contains("Alice's channel"));

        tokio::time::sleep(Duration::from_secs(60)).await;
        commands
            .execute(&alice, "lobby", Command::Voice(Some("again".into())))
            .await
            .unwrap();
        assert_eq!(gateway.count("create_channel"), 1);
        let reply = &gateway.messages()[1].1;
        assert!(reply.contains("4m"), "{reply}");
        assert!(reply.contains("Alice's channel"), "{reply}");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_create_is_reported() {
        let (gateway, commands) = setup();
        gateway.fail("create_channel");
        let alice = Member::new("alice", "Alice");

        commands.execute(&alice, "lobby", Command::Voice(None)).await.unwrap();
        assert!(gateway.messages()[0].1.starts_with("Couldn't create that channel"));
    }

    #[tokio::test(start_paused = true)]
    async fn overlong_name_is_refused() {
        let (gateway, commands) = setup();
        let alice = Member::new("alice", "Alice");
        commands
            .execute(&alice, "lobby", Command::Voice(Some("x".repeat(101))))
            .await
            .unwrap();
        assert_eq!(gateway.count("create_channel"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn live_lists_featured_first() {
        let (gateway, commands) = setup();
        commands.execute(&Member::new("x", "X"), "lobby", Command::Live).await.unwrap();
        assert_eq!(gateway.messages()[0].1, "Nobody is live right now.");

        let activity = |login: &str| ActivityMetadata {
            title: Some(format!("{login} plays")),
            game: None,
            url: format!("https://twitch.tv/{login}"),
        };
        commands
            .streamers
            .add(&Member::new("a", "Ann"), &activity("ann"), "ann", false)
            .await
            .unwrap();
        commands
            .streamers
            .add(&Member::new("b", "Bo"), &activity("bo"), "bo", false)
            .await
            .unwrap();

        commands.execute(&Member::new("x", "X"), "lobby", Command::Live).await.unwrap();
        let text = &gateway.messages()[1].1;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("★ Ann"));
        assert!(lines[1].starts_with("• Bo"));
    }
}
