//! In-memory [`Gateway`] that records every call, for tests.
//!
//! Holds a tiny fake of the platform: a list of voice channels and a table
//! of live streams. Individual operations can be made to fail.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::{PlatformError, PlatformResult};
use crate::gateway::Gateway;
use crate::types::{ChannelId, MemberId, RichContent, StreamMetadata, VoiceChannel};

/// One recorded gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateChannel { name: String, parent_category: String },
    DeleteChannel(ChannelId),
    SetChannelPermission { channel: ChannelId, subject: MemberId, allow: bool },
    FindChannel(ChannelId),
    FindChannelByName(String),
    GrantRole { member: MemberId, role: String },
    RevokeRole { member: MemberId, role: String },
    SendMessage { channel: String, text: String },
    SendAnnouncement { channel: String, content: RichContent },
    FetchStreamMetadata(String),
    HostChannel { host_channel: String, target_channel: String },
}

impl Call {
    pub fn op(&self) -> &'static str {
        match self {
            Call::CreateChannel { .. } => "create_channel",
            Call::DeleteChannel(_) => "delete_channel",
            Call::SetChannelPermission { .. } => "set_channel_permission",
            Call::FindChannel(_) => "find_channel",
            Call::FindChannelByName(_) => "find_channel_by_name",
            Call::GrantRole { .. } => "grant_role",
            Call::RevokeRole { .. } => "revoke_role",
            Call::SendMessage { .. } => "send_message",
            Call::SendAnnouncement { .. } => "send_announcement",
            Call::FetchStreamMetadata(_) => "fetch_stream_metadata",
            Call::HostChannel { .. } => "host_channel",
        }
    }
}

#[derive(Default)]
struct State {
    calls: Vec<(Instant, Call)>,
    channels: Vec<VoiceChannel>,
    streams: HashMap<String, StreamMetadata>,
    failing: HashSet<&'static str>,
    next_channel: u64,
}

/// Recording fake of the platform gateway.
#[derive(Default)]
pub struct RecordingGateway {
    state: Mutex<State>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing voice channel.
    pub fn insert_channel(&self, channel: VoiceChannel) {
        let mut state = self.state.lock();
        state.channels.retain(|c| c.id != channel.id);
        state.channels.push(channel);
    }

    /// Change how many members the platform reports in a channel.
    pub fn set_member_count(&self, channel: &ChannelId, count: usize) {
        let mut state = self.state.lock();
        if let Some(c) = state.channels.iter_mut().find(|c| &c.id == channel) {
            c.member_count = count;
        }
    }

    /// Delete a channel out from under the bot.
    pub fn remove_channel(&self, channel: &ChannelId) {
        self.state.lock().channels.retain(|c| &c.id != channel);
    }

    pub fn has_channel(&self, channel: &ChannelId) -> bool {
        self.state.lock().channels.iter().any(|c| &c.id == channel)
    }

    /// Make a stream visible to metadata lookups.
    pub fn insert_stream(&self, metadata: StreamMetadata) {
        self.state.lock().streams.insert(metadata.login.clone(), metadata);
    }

    /// Make every future call of `op` fail.
    pub fn fail(&self, op: &'static str) {
        self.state.lock().failing.insert(op);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.iter().map(|(_, c)| c.clone()).collect()
    }

    /// Calls of one operation, with the (tokio) instant each was made.
    pub fn timed_calls(&self, op: &str) -> Vec<(Instant, Call)> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(_, c)| c.op() == op)
            .cloned()
            .collect()
    }

    pub fn count(&self, op: &str) -> usize {
        self.state.lock().calls.iter().filter(|(_, c)| c.op() == op).count()
    }

    pub fn announcements(&self) -> Vec<(String, RichContent)> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|(_, c)| match c {
                Call::SendAnnouncement { channel, content } => {
                    Some((channel.clone(), content.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|(_, c)| match c {
                Call::SendMessage { channel, text } => Some((channel.clone(), text.clone())),
                _ => None,
            })
            .collect()
    }

    /// Record a call; returns the injected failure, if any.
    fn record(&self, call: Call) -> PlatformResult<()> {
        let mut state = self.state.lock();
        let op = call.op();
        state.calls.push((Instant::now(), call));
        if state.failing.contains(op) {
            return Err(PlatformError::request(op, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl Gateway for RecordingGateway {
    async fn create_channel(
        &self,
        name: &str,
        parent_category: &str,
    ) -> PlatformResult<VoiceChannel> {
        self.record(Call::CreateChannel {
            name: name.to_string(),
            parent_category: parent_category.to_string(),
        })?;
        let mut state = self.state.lock();
        state.next_channel += 1;
        let channel = VoiceChannel {
            id: ChannelId(format!("ch-{}", state.next_channel)),
            name: name.to_string(),
            parent: Some(parent_category.to_string()),
            member_count: 0,
        };
        state.channels.push(channel.clone());
        Ok(channel)
    }

    async fn delete_channel(&self, channel: &ChannelId) -> PlatformResult<()> {
        self.record(Call::DeleteChannel(channel.clone()))?;
        let mut state = self.state.lock();
        let before = state.channels.len();
        state.channels.retain(|c| &c.id != channel);
        if state.channels.len() == before {
            return Err(PlatformError::request("delete_channel", "Unknown Channel"));
        }
        Ok(())
    }

    async fn set_channel_permission(
        &self,
        channel: &ChannelId,
        subject: &MemberId,
        allow: bool,
    ) -> PlatformResult<()> {
        self.record(Call::SetChannelPermission {
            channel: channel.clone(),
            subject: subject.clone(),
            allow,
        })
    }

    async fn find_channel(&self, channel: &ChannelId) -> PlatformResult<Option<VoiceChannel>> {
        self.record(Call::FindChannel(channel.clone()))?;
        Ok(self.state.lock().channels.iter().find(|c| &c.id == channel).cloned())
    }

    async fn find_channel_by_name(&self, name: &str) -> PlatformResult<Option<VoiceChannel>> {
        self.record(Call::FindChannelByName(name.to_string()))?;
        Ok(self.state.lock().channels.iter().rev().find(|c| c.name == name).cloned())
    }

    async fn grant_role(&self, member: &MemberId, role: &str) -> PlatformResult<()> {
        self.record(Call::GrantRole {
            member: member.clone(),
            role: role.to_string(),
        })
    }

    async fn revoke_role(&self, member: &MemberId, role: &str) -> PlatformResult<()> {
        self.record(Call::RevokeRole {
            member: member.clone(),
            role: role.to_string(),
        })
    }

    async fn send_message(&self, channel: &str, text: &str) -> PlatformResult<()> {
        self.record(Call::SendMessage {
            channel: channel.to_string(),
            text: text.to_string(),
        })
    }

    async fn send_announcement(&self, channel: &str, content: &RichContent) -> PlatformResult<()> {
        self.record(Call::SendAnnouncement {
            channel: channel.to_string(),
            content: content.clone(),
        })
    }

    async fn fetch_stream_metadata(
        &self,
        platform_channel: &str,
    ) -> PlatformResult<Option<StreamMetadata>> {
        self.record(Call::FetchStreamMetadata(platform_channel.to_string()))?;
        Ok(self.state.lock().streams.get(platform_channel).cloned())
    }

    async fn host_channel(&self, host_channel: &str, target_channel: &str) -> PlatformResult<()> {
        self.record(Call::HostChannel {
            host_channel: host_channel.to_string(),
            target_channel: target_channel.to_string(),
        })
    }
}
