//! Self-provisioned voice channels.
//!
//! Members may create a temporary voice channel once per rate-limit window.
//! Any managed channel that sits empty for the configured timeout is
//! deleted. Both windows are debounced [`Alarms`]: a new empty signal for a
//! channel resets its deadline instead of stacking a second deletion, and an
//! occupied signal cancels it.
//!
//! Local bookkeeping is applied optimistically and never rolled back when a
//! platform call fails; the platform's own channel list is authoritative.

use std::collections::HashMap;
use std::sync::Arc;

use hearth_sdk::PlatformResult;
use hearth_sdk::gateway::Gateway;
use hearth_sdk::types::{ChannelId, MemberId, VoiceChannel};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::alarm::Alarms;
use crate::config::VoiceSettings;

/// Rate-limit bookkeeping for one creator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedChannelRecord {
    pub creator: MemberId,
    /// Last channel this creator provisioned.
    pub channel_name: String,
    pub rate_limit_expiry: Instant,
}

/// Owns the creator records and the empty-channel deletion timers.
pub struct ChannelLifecycle {
    gateway: Arc<dyn Gateway>,
    settings: VoiceSettings,
    records: Arc<Mutex<HashMap<MemberId, CreatedChannelRecord>>>,
    rate_limits: Alarms<MemberId>,
    deletions: Alarms<ChannelId>,
}

impl ChannelLifecycle {
    pub fn new(gateway: Arc<dyn Gateway>, settings: VoiceSettings) -> Self {
        Self {
            gateway,
            settings,
            records: Arc::new(Mutex::new(HashMap::new())),
            rate_limits: Alarms::new(),
            deletions: Alarms::new(),
        }
    }

    /// Whether `creator` may provision a channel right now.
    pub fn can_create(&self, creator: &MemberId) -> bool {
        !self.records.lock().contains_key(creator)
    }

    pub fn record(&self, creator: &MemberId) -> Option<CreatedChannelRecord> {
        self.records.lock().get(creator).cloned()
    }

    /// Create a voice channel for `creator`.
    ///
    /// A failed platform create is returned to the caller unretried and
    /// leaves no record behind. The rate limit is not checked here; callers
    /// consult [`can_create`](Self::can_create) first.
    pub async fn create(&self, creator: &MemberId, name: &str) -> PlatformResult<VoiceChannel> {
        let channel = self
            .gateway
            .create_channel(name, &self.settings.parent_category)
            .await
            .inspect_err(|e| {
                tracing::warn!(
                    creator = %creator,
                    name,
                    error = %e,
                    "Failed to create voice channel"
                );
            })?;

        tracing::info!(
            creator = %creator,
            channel = %channel.id,
            name = %channel.name,
            "Created voice channel"
        );

        let expiry = Instant::now() + self.settings.rate_limit();
        self.records.lock().insert(
            creator.clone(),
            CreatedChannelRecord {
                creator: creator.clone(),
                channel_name: channel.name.clone(),
                rate_limit_expiry: expiry,
            },
        );
        let records = Arc::clone(&self.records);
        let expired = creator.clone();
        self.rate_limits.schedule_at(creator.clone(), expiry, async move {
            records.lock().remove(&expired);
            tracing::debug!(creator = %expired, "Channel creation rate limit expired");
        });

        self.mark_empty_voice_channel(&channel, channel.is_empty());

        if let Err(e) = self
            .gateway
            .set_channel_permission(&channel.id, creator, true)
            .await
        {
            tracing::warn!(
                creator = %creator,
                channel = %channel.id,
                error = %e,
                "Failed to grant creator permissions on voice channel"
            );
        }

        Ok(channel)
    }

    /// The creator's most recent channel, looked up by name on the platform.
    ///
    /// `Ok(None)` when the creator has no active record or the channel is
    /// already gone.
    pub async fn get_created_channel(
        &self,
        creator: &MemberId,
    ) -> PlatformResult<Option<VoiceChannel>> {
        let name = match self.records.lock().get(creator) {
            Some(record) => record.channel_name.clone(),
            None => return Ok(None),
        };
        self.gateway.find_channel_by_name(&name).await
    }

    /// Whether lifecycle management applies to `channel` at all.
    pub fn is_managed(&self, channel: &VoiceChannel) -> bool {
        if channel.name.eq_ignore_ascii_case(&self.settings.general_channel) {
            return false;
        }
        if self.settings.restrict_to_category {
            return channel.parent.as_deref() == Some(self.settings.parent_category.as_str());
        }
        true
    }

    /// Start (or restart) the deletion timer of an empty channel, or cancel
    /// it when the channel is occupied.
    pub fn mark_empty_voice_channel(&self, channel: &VoiceChannel, is_empty: bool) {
        if !self.is_managed(channel) {
            return;
        }
        if is_empty {
            let deadline = self.deletions.schedule(
                channel.id.clone(),
                self.settings.empty_timeout(),
                reclaim(Arc::clone(&self.gateway), channel.id.clone()),
            );
            tracing::debug!(
                channel = %channel.id,
                name = %channel.name,
                in_secs = deadline.saturating_duration_since(Instant::now()).as_secs(),
                "Voice channel empty, deletion scheduled"
            );
        } else if self.deletions.cancel(&channel.id) {
            tracing::debug!(
                channel = %channel.id,
                name = %channel.name,
                "Voice channel occupied, deletion cancelled"
            );
        }
    }

    /// React to a member joining, leaving or moving between channels.
    ///
    /// Occupancy comes from each channel's current member count, not from the
    /// direction of the move.
    pub fn handle_voice_state(&self, old: Option<&VoiceChannel>, new: Option<&VoiceChannel>) {
        if let Some(old) = old {
            self.mark_empty_voice_channel(old, old.is_empty());
        }
        if let Some(new) = new
            && old.is_none_or(|old| old.id != new.id)
        {
            self.mark_empty_voice_channel(new, new.is_empty());
        }
    }

    /// Rebuild deletion timers from a platform snapshot after a restart.
    pub fn restore(&self, channels: &[VoiceChannel]) {
        for channel in channels {
            self.mark_empty_voice_channel(channel, channel.is_empty());
        }
        tracing::info!(
            channels = channels.len(),
            pending = self.deletions.len(),
            "Restored voice channel timers"
        );
    }

    pub fn pending_deletions(&self) -> usize {
        self.deletions.len()
    }

    pub fn deletion_deadline(&self, channel: &ChannelId) -> Option<Instant> {
        self.deletions.deadline(channel)
    }
}

/// Deletion alarm body. Re-reads the channel first: it may be gone already
/// or have filled up again while no voice event reached us. If the platform
/// cannot be read the channel is kept; the next `Ready` snapshot or voice
/// event for it starts a fresh timer.
async fn reclaim(gateway: Arc<dyn Gateway>, channel: ChannelId) {
    match gateway.find_channel(&channel).await {
        Ok(None) => {
            tracing::debug!(channel = %channel, "Empty voice channel already gone");
            return;
        }
        Ok(Some(current)) if !current.is_empty() => {
            tracing::debug!(
                channel = %channel,
                members = current.member_count,
                "Voice channel occupied again, keeping it"
            );
            return;
        }
        Ok(Some(_)) => {}
        Err(e) => {
            tracing::warn!(
                channel = %channel,
                error = %e,
                "Channel lookup failed, keeping it until its state is known"
            );
            return;
        }
    }

    match gateway.delete_channel(&channel).await {
        Ok(()) => tracing::info!(channel = %channel, "Deleted empty voice channel"),
        Err(e) => tracing::warn!(
            channel = %channel,
            error = %e,
            "Failed to delete empty voice channel (already deleted?)"
        ),
    }
}
