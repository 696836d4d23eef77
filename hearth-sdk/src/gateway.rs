//! The platform gateway: every side-effecting remote call the bot issues.

use async_trait::async_trait;

use crate::error::PlatformResult;
use crate::types::{ChannelId, MemberId, RichContent, StreamMetadata, VoiceChannel};

/// Remote operations on the chat and streaming platforms.
///
/// All calls may fail independently of the bot's own state. Lookups return
/// `Ok(None)` when the target does not exist; that is not an error.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Create a voice channel under `parent_category`.
    async fn create_channel(
        &self,
        name: &str,
        parent_category: &str,
    ) -> PlatformResult<VoiceChannel>;

    /// Delete a channel. Fails if it is already gone.
    async fn delete_channel(&self, channel: &ChannelId) -> PlatformResult<()>;

    /// Allow or deny `subject` management rights on a channel.
    async fn set_channel_permission(
        &self,
        channel: &ChannelId,
        subject: &MemberId,
        allow: bool,
    ) -> PlatformResult<()>;

    /// Look up a channel by id against live platform state.
    async fn find_channel(&self, channel: &ChannelId) -> PlatformResult<Option<VoiceChannel>>;

    /// Look up a voice channel by name against live platform state.
    async fn find_channel_by_name(&self, name: &str) -> PlatformResult<Option<VoiceChannel>>;

    /// Granting a role the member already holds is a no-op downstream.
    async fn grant_role(&self, member: &MemberId, role: &str) -> PlatformResult<()>;

    async fn revoke_role(&self, member: &MemberId, role: &str) -> PlatformResult<()>;

    /// Post a plain text message to a text channel.
    async fn send_message(&self, channel: &str, text: &str) -> PlatformResult<()>;

    /// Post rich content to a text channel.
    async fn send_announcement(&self, channel: &str, content: &RichContent) -> PlatformResult<()>;

    /// Fetch live stream metadata for a streaming-platform channel.
    async fn fetch_stream_metadata(
        &self,
        platform_channel: &str,
    ) -> PlatformResult<Option<StreamMetadata>>;

    /// Have `host_channel` host `target_channel` on the streaming platform.
    async fn host_channel(&self, host_channel: &str, target_channel: &str) -> PlatformResult<()>;
}
