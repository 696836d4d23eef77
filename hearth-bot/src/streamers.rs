//! Live streamer tracking and the featured-streamer rotation.
//!
//! Every operation applies its state transition synchronously when called
//! and hands back a [`SideEffects`] future holding only the platform calls
//! (role changes, announcement, host). Command callers await it and see the
//! first [`PlatformError`]; the dispatcher spawns it and logs. State is never
//! rolled back when a side effect fails, and each side effect re-checks state
//! after suspending, since a later event may have moved things on.
//!
//! Exactly one live streamer is featured at a time. When the featured
//! streamer goes offline the slot passes to the live streamer featured least
//! recently; members never featured come first, in the order they went live.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use hearth_sdk::gateway::Gateway;
use hearth_sdk::types::{Member, MemberId, Presence};
use hearth_sdk::{PlatformError, PlatformResult};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::activity::{self, ActivityMetadata, LiveActivity};
use crate::config::StreamSettings;
use crate::output;

/// Platform calls left to make after a state transition.
pub type SideEffects = BoxFuture<'static, PlatformResult<()>>;

/// One currently-live member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamerRecord {
    pub member: Member,
    pub activity: ActivityMetadata,
    pub platform_channel: String,
    /// Wall-clock time of the `add` that made this member live.
    pub live_since: DateTime<Utc>,
    /// Order in which members went live; FIFO tie-break for featuring.
    seq: u64,
}

/// Read-only view of a live streamer for the web layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveStreamer {
    pub member_id: MemberId,
    pub name: String,
    pub platform_channel: String,
    pub title: Option<String>,
    pub game: Option<String>,
    pub url: String,
    pub live_since: DateTime<Utc>,
    pub featured: bool,
}

#[derive(Default)]
struct Rotation {
    live: HashMap<MemberId, StreamerRecord>,
    featured: Option<MemberId>,
    /// Member ids, most recently featured last. No duplicates.
    fairness_queue: Vec<MemberId>,
    last_announced: HashMap<MemberId, Instant>,
    next_seq: u64,
}

impl Rotation {
    /// Insert or refresh a live record. Returns the previous platform channel
    /// when the member was already live.
    fn upsert(
        &mut self,
        member: &Member,
        activity: &ActivityMetadata,
        platform_channel: &str,
    ) -> Option<String> {
        match self.live.get_mut(&member.id) {
            Some(record) => {
                record.member = member.clone();
                record.activity = activity.clone();
                Some(std::mem::replace(
                    &mut record.platform_channel,
                    platform_channel.to_string(),
                ))
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.live.insert(
                    member.id.clone(),
                    StreamerRecord {
                        member: member.clone(),
                        activity: activity.clone(),
                        platform_channel: platform_channel.to_string(),
                        live_since: Utc::now(),
                        seq,
                    },
                );
                None
            }
        }
    }

    /// Forget members who have been offline for a whole throttle window.
    /// Their fairness history goes with them.
    fn prune(&mut self, now: Instant, window: Duration) {
        let live = &self.live;
        self.last_announced
            .retain(|m, at| live.contains_key(m) || now.saturating_duration_since(*at) < window);
        let recent = &self.last_announced;
        self.fairness_queue
            .retain(|m| live.contains_key(m) || recent.contains_key(m));
    }

    /// Refresh the throttle timestamp; true if an announcement may go out.
    fn touch_throttle(&mut self, member: &MemberId, now: Instant, window: Duration) -> bool {
        let allowed = match self.last_announced.get(member) {
            Some(&last) => now.saturating_duration_since(last) >= window,
            None => true,
        };
        self.last_announced.insert(member.clone(), now);
        allowed
    }

    fn set_featured(&mut self, member: &MemberId) {
        self.featured = Some(member.clone());
        self.fairness_queue.retain(|m| m != member);
        self.fairness_queue.push(member.clone());
    }

    /// Live streamer with the lowest fairness score.
    fn next_candidate(&self) -> Option<&StreamerRecord> {
        self.live
            .values()
            .min_by_key(|record| (self.fairness_score(&record.member.id), record.seq))
    }

    /// 0 for never featured, otherwise 1 + position in the queue.
    fn fairness_score(&self, member: &MemberId) -> usize {
        self.fairness_queue
            .iter()
            .position(|m| m == member)
            .map_or(0, |i| i + 1)
    }
}

/// Owns the live set, the featured slot and the announcement throttle.
pub struct StreamerRotation {
    gateway: Arc<dyn Gateway>,
    settings: StreamSettings,
    state: Arc<Mutex<Rotation>>,
}

impl StreamerRotation {
    pub fn new(gateway: Arc<dyn Gateway>, settings: StreamSettings) -> Self {
        Self {
            gateway,
            settings,
            state: Arc::new(Mutex::new(Rotation::default())),
        }
    }

    /// A member is live: record it, tag it, maybe feature and announce it.
    ///
    /// Repeated calls for a member already live only refresh the record and
    /// the throttle timestamp. If nobody is featured the member is featured
    /// straight away, throttled or not.
    pub fn add(
        &self,
        member: &Member,
        activity: &ActivityMetadata,
        platform_channel: &str,
        notify: bool,
    ) -> SideEffects {
        let (announce, feature_now) = {
            let mut state = self.state.lock();
            let now = Instant::now();
            let window = self.settings.throttle();
            let previous = state.upsert(member, activity, platform_channel);
            state.prune(now, window);
            let announce = state.touch_throttle(&member.id, now, window);
            let moved = previous.is_some_and(|p| p != platform_channel);
            let feature_now = match &state.featured {
                None => true,
                Some(featured) => moved && featured == &member.id,
            };
            (announce, feature_now)
        };

        tracing::info!(
            member = %member.id,
            name = %member.name,
            platform_channel,
            announce = notify && announce,
            "Streamer live"
        );
        if !announce {
            tracing::debug!(member = %member.id, "Announcement throttled");
        }

        let feature = feature_now.then(|| self.feature(&member.id, platform_channel));

        let gateway = Arc::clone(&self.gateway);
        let state = Arc::clone(&self.state);
        let live_role = self.settings.live_role.clone();
        let streamer_role = self.settings.streamer_role.clone();
        let announce_channel = self.settings.announce_channel.clone();
        let member = member.clone();
        let activity = activity.clone();
        let platform_channel = platform_channel.to_string();

        async move {
            let mut first_error: Option<PlatformError> = None;

            let still_live = state.lock().live.contains_key(&member.id);
            let roles = if still_live {
                vec![live_role, streamer_role]
            } else {
                tracing::debug!(member = %member.id, "Went offline before the role grant");
                vec![streamer_role]
            };
            for role in &roles {
                if let Err(e) = gateway.grant_role(&member.id, role).await {
                    tracing::warn!(
                        member = %member.id,
                        role = %role,
                        error = %e,
                        "Failed to grant role"
                    );
                    first_error.get_or_insert(e);
                }
            }

            if let Some(feature) = feature
                && let Err(e) = feature.await
            {
                first_error.get_or_insert(e);
            }

            if notify
                && announce
                && let Err(e) = announce_stream(
                    gateway.as_ref(),
                    &state,
                    &announce_channel,
                    &member,
                    &activity,
                    &platform_channel,
                )
                .await
            {
                tracing::warn!(
                    member = %member.id,
                    error = %e,
                    "Failed to send stream announcement"
                );
                first_error.get_or_insert(e);
            }

            first_error.map_or(Ok(()), Err)
        }
        .boxed()
    }

    /// Put `member` in the featured slot and host their stream.
    ///
    /// The host call is best-effort: its failure is logged and the featured
    /// slot keeps the new member. Featuring a member who is not live is
    /// refused with a warning.
    pub fn feature(&self, member: &MemberId, platform_channel: &str) -> SideEffects {
        {
            let mut state = self.state.lock();
            if !state.live.contains_key(member) {
                tracing::warn!(member = %member, "Refusing to feature a member who is not live");
                return futures::future::ready(Ok(())).boxed();
            }
            state.set_featured(member);
        }
        tracing::info!(member = %member, platform_channel, "Featured streamer changed");

        let Some(host) = self.settings.host_channel.clone() else {
            return futures::future::ready(Ok(())).boxed();
        };
        let gateway = Arc::clone(&self.gateway);
        let state = Arc::clone(&self.state);
        let member = member.clone();
        let target = platform_channel.to_string();

        async move {
            let still_featured = state.lock().featured.as_ref() == Some(&member);
            if !still_featured {
                tracing::debug!(member = %member, "Feature moved on before host, skipping");
                return Ok(());
            }
            if let Err(e) = gateway.host_channel(&host, &target).await {
                tracing::warn!(host = %host, target = %target, error = %e, "Host call failed");
            }
            Ok(())
        }
        .boxed()
    }

    /// A member stopped streaming.
    ///
    /// Revokes the live role even for members we do not track, since the
    /// role may be left over from before a restart.
    pub fn remove(&self, member: &MemberId) -> SideEffects {
        let (was_featured, next) = {
            let mut state = self.state.lock();
            if state.live.remove(member).is_none() {
                tracing::debug!(member = %member, "Remove for a member who is not live");
            }
            if state.featured.as_ref() == Some(member) {
                state.fairness_queue.retain(|m| m != member);
                state.featured = None;
                let next = state
                    .next_candidate()
                    .map(|record| (record.member.id.clone(), record.platform_channel.clone()));
                (true, next)
            } else {
                (false, None)
            }
        };

        tracing::info!(member = %member, "Streamer offline");
        if was_featured && next.is_none() {
            tracing::debug!("No streamers live, featured slot cleared");
        }

        let feature = next.map(|(next_member, platform_channel)| {
            self.feature(&next_member, &platform_channel)
        });

        let gateway = Arc::clone(&self.gateway);
        let state = Arc::clone(&self.state);
        let live_role = self.settings.live_role.clone();
        let member = member.clone();

        async move {
            let live_again = state.lock().live.contains_key(&member);
            let revoked = if live_again {
                tracing::debug!(member = %member, "Live again before the role revoke, skipping");
                Ok(())
            } else {
                gateway.revoke_role(&member, &live_role).await
            };
            if let Err(e) = &revoked {
                tracing::warn!(
                    member = %member,
                    role = %live_role,
                    error = %e,
                    "Failed to revoke role"
                );
            }
            if let Some(feature) = feature {
                feature.await?;
            }
            revoked
        }
        .boxed()
    }

    /// React to a presence update. Returns side effects when the live state
    /// of the member changed.
    pub fn handle_presence(&self, member: &Member, presence: &Presence) -> Option<SideEffects> {
        let live = activity::live_activity(presence);
        let current = self.platform_channel_of(&member.id);
        match (live, current) {
            (Some(live), None) => {
                Some(self.add(member, &live.metadata, &live.platform_channel, true))
            }
            (Some(live), Some(current)) if current != live.platform_channel => {
                Some(self.add(member, &live.metadata, &live.platform_channel, true))
            }
            (Some(live), Some(_)) => {
                self.refresh(&member.id, &live.metadata);
                None
            }
            (None, Some(_)) => Some(self.remove(&member.id)),
            (None, None) => None,
        }
    }

    /// Rebuild the live set from a platform snapshot, without announcing.
    ///
    /// Tracked members who are absent from the snapshot or no longer
    /// streaming are removed; new or moved streams are added.
    pub fn restore(&self, presences: &[(Member, Presence)]) -> Vec<SideEffects> {
        let streaming: Vec<(&Member, LiveActivity)> = presences
            .iter()
            .filter_map(|(member, presence)| Some((member, activity::live_activity(presence)?)))
            .collect();
        let streaming_ids: HashSet<&MemberId> =
            streaming.iter().map(|(member, _)| &member.id).collect();

        let stale: Vec<MemberId> = self
            .state
            .lock()
            .live
            .keys()
            .filter(|id| !streaming_ids.contains(id))
            .cloned()
            .collect();
        let mut effects: Vec<SideEffects> = stale.iter().map(|id| self.remove(id)).collect();

        for (member, live) in &streaming {
            let current = self.platform_channel_of(&member.id);
            if current.as_deref() != Some(live.platform_channel.as_str()) {
                effects.push(self.add(member, &live.metadata, &live.platform_channel, false));
            }
        }

        tracing::info!(
            live = self.live_count(),
            dropped = stale.len(),
            "Restored live streamers"
        );
        effects
    }

    /// Title or game changed mid-stream: no side effects.
    fn refresh(&self, member: &MemberId, activity: &ActivityMetadata) {
        if let Some(record) = self.state.lock().live.get_mut(member) {
            record.activity = activity.clone();
        }
    }

    pub fn is_live(&self, member: &MemberId) -> bool {
        self.state.lock().live.contains_key(member)
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn featured(&self) -> Option<MemberId> {
        self.state.lock().featured.clone()
    }

    pub fn fairness_queue(&self) -> Vec<MemberId> {
        self.state.lock().fairness_queue.clone()
    }

    pub fn record(&self, member: &MemberId) -> Option<StreamerRecord> {
        self.state.lock().live.get(member).cloned()
    }

    fn platform_channel_of(&self, member: &MemberId) -> Option<String> {
        self.state
            .lock()
            .live
            .get(member)
            .map(|record| record.platform_channel.clone())
    }

    /// Everyone live, featured streamer first, then in the order they went live.
    pub fn list_live_streamers(&self) -> Vec<LiveStreamer> {
        let state = self.state.lock();
        let mut records: Vec<&StreamerRecord> = state.live.values().collect();
        records.sort_by_key(|record| {
            (state.featured.as_ref() != Some(&record.member.id), record.seq)
        });
        records
            .into_iter()
            .map(|record| LiveStreamer {
                member_id: record.member.id.clone(),
                name: record.member.name.clone(),
                platform_channel: record.platform_channel.clone(),
                title: record.activity.title.clone(),
                game: record.activity.game.clone(),
                url: record.activity.url.clone(),
                live_since: record.live_since,
                featured: state.featured.as_ref() == Some(&record.member.id),
            })
            .collect()
    }
}

/// Fetch stream metadata and post the announcement. A stream the platform
/// does not know (yet) is skipped, not an error.
async fn announce_stream(
    gateway: &dyn Gateway,
    state: &Mutex<Rotation>,
    announce_channel: &str,
    member: &Member,
    activity: &ActivityMetadata,
    platform_channel: &str,
) -> PlatformResult<()> {
    let metadata = match gateway.fetch_stream_metadata(platform_channel).await {
        Ok(Some(metadata)) => metadata,
        Ok(None) => {
            tracing::info!(
                member = %member.id,
                platform_channel,
                "No stream metadata found, skipping announcement"
            );
            return Ok(());
        }
        Err(e) => {
            tracing::warn!(
                member = %member.id,
                platform_channel,
                error = %e,
                "Stream metadata lookup failed, skipping announcement"
            );
            return Ok(());
        }
    };

    let still_live = state.lock().live.contains_key(&member.id);
    if !still_live {
        tracing::debug!(member = %member.id, "Went offline before the announcement, skipping");
        return Ok(());
    }

    let content = output::stream_announcement(&member.name, activity, &metadata);
    gateway.send_announcement(announce_channel, &content).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_sdk::testing::{Call, RecordingGateway};
    use hearth_sdk::types::StreamMetadata;
    use std::time::Duration;

    fn settings() -> StreamSettings {
        StreamSettings {
            host_channel: Some("hearthtv".into()),
            ..StreamSettings::default()
        }
    }

    fn setup() -> (Arc<RecordingGateway>, StreamerRotation) {
        let gateway = Arc::new(RecordingGateway::new());
        for login in ["a", "b", "c", "m"] {
            gateway.insert_stream(StreamMetadata {
                login: login.into(),
                display_name: login.to_uppercase(),
                title: format!("{login} streaming"),
                game: None,
                viewer_count: 1,
                thumbnail_url: None,
                profile_image_url: None,
                started_at: None,
            });
        }
        let rotation = StreamerRotation::new(gateway.clone(), settings());
        (gateway, rotation)
    }

    fn member(id: &str) -> Member {
        Member::new(id, id.to_uppercase())
    }

    fn activity(login: &str) -> ActivityMetadata {
        ActivityMetadata {
            title: Some("title".into()),
            game: None,
            url: format!("https://twitch.tv/{login}"),
        }
    }

    async fn add(rotation: &StreamerRotation, id: &str, notify: bool) -> PlatformResult<()> {
        rotation.add(&member(id), &activity(id), id, notify).await
    }

    fn live_role_calls(gateway: &RecordingGateway) -> Vec<Call> {
        gateway
            .calls()
            .into_iter()
            .filter(|c| match c {
                Call::GrantRole { role, .. } | Call::RevokeRole { role, .. } => role == "Live",
                _ => false,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn first_streamer_is_featured_and_tagged() {
        let (gateway, rotation) = setup();
        add(&rotation, "a", true).await.unwrap();

        assert_eq!(rotation.featured(), Some(MemberId::from("a")));
        assert_eq!(rotation.fairness_queue(), vec![MemberId::from("a")]);
        let calls = gateway.calls();
        assert!(calls.contains(&Call::GrantRole { member: "a".into(), role: "Live".into() }));
        assert!(calls.contains(&Call::GrantRole { member: "a".into(), role: "Streamers".into() }));
        assert!(calls.contains(&Call::HostChannel {
            host_channel: "hearthtv".into(),
            target_channel: "a".into(),
        }));
        assert_eq!(gateway.announcements().len(), 1);
        assert_eq!(gateway.announcements()[0].0, "streams");
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_add_keeps_one_record_and_one_announcement() {
        let (gateway, rotation) = setup();
        add(&rotation, "m", true).await.unwrap();
        add(&rotation, "m", true).await.unwrap();

        assert_eq!(rotation.live_count(), 1);
        assert_eq!(gateway.announcements().len(), 1);
        assert_eq!(rotation.fairness_queue(), vec![MemberId::from("m")]);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_refreshes_without_announcing() {
        let (gateway, rotation) = setup();
        add(&rotation, "m", true).await.unwrap();
        assert_eq!(gateway.announcements().len(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        add(&rotation, "m", true).await.unwrap();
        assert_eq!(gateway.announcements().len(), 1);

        // 300s after the first, 240s after the refresh: still throttled.
        tokio::time::sleep(Duration::from_secs(240)).await;
        add(&rotation, "m", true).await.unwrap();
        assert_eq!(gateway.announcements().len(), 1);

        tokio::time::sleep(Duration::from_secs(300)).await;
        add(&rotation, "m", true).await.unwrap();
        assert_eq!(gateway.announcements().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn notify_false_never_announces() {
        let (gateway, rotation) = setup();
        add(&rotation, "a", false).await.unwrap();
        assert!(gateway.announcements().is_empty());
        assert_eq!(gateway.count("fetch_stream_metadata"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn removing_featured_rotates_to_never_featured_in_fifo_order() {
        let (_gateway, rotation) = setup();
        add(&rotation, "a", true).await.unwrap();
        add(&rotation, "b", true).await.unwrap();
        add(&rotation, "c", true).await.unwrap();
        assert_eq!(rotation.featured(), Some(MemberId::from("a")));

        rotation.remove(&MemberId::from("a")).await.unwrap();
        assert_eq!(rotation.featured(), Some(MemberId::from("b")));
        assert_eq!(rotation.fairness_queue(), vec![MemberId::from("b")]);

        rotation.remove(&MemberId::from("b")).await.unwrap();
        assert_eq!(rotation.featured(), Some(MemberId::from("c")));
    }

    #[tokio::test(start_paused = true)]
    async fn rotation_prefers_least_recently_featured() {
        let (_gateway, rotation) = setup();
        add(&rotation, "a", false).await.unwrap();
        add(&rotation, "b", false).await.unwrap();
        add(&rotation, "c", false).await.unwrap();

        // History: a, then c, then b (most recent).
        rotation.feature(&MemberId::from("c"), "c").await.unwrap();
        rotation.feature(&MemberId::from("b"), "b").await.unwrap();
        assert_eq!(
            rotation.fairness_queue(),
            vec![MemberId::from("a"), MemberId::from("c"), MemberId::from("b")]
        );

        rotation.remove(&MemberId::from("b")).await.unwrap();
        // a was featured longer ago than c.
        assert_eq!(rotation.featured(), Some(MemberId::from("a")));
        assert_eq!(rotation.fairness_queue(), vec![MemberId::from("c"), MemberId::from("a")]);
    }

    #[tokio::test(start_paused = true)]
    async fn removing_last_streamer_clears_feature() {
        let (gateway, rotation) = setup();
        add(&rotation, "a", true).await.unwrap();
        rotation.remove(&MemberId::from("a")).await.unwrap();

        assert_eq!(rotation.featured(), None);
        assert_eq!(rotation.live_count(), 0);
        assert!(gateway.calls().contains(&Call::RevokeRole {
            member: "a".into(),
            role: "Live".into(),
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn removing_unfeatured_keeps_feature() {
        let (_gateway, rotation) = setup();
        add(&rotation, "a", false).await.unwrap();
        add(&rotation, "b", false).await.unwrap();
        rotation.remove(&MemberId::from("b")).await.unwrap();
        assert_eq!(rotation.featured(), Some(MemberId::from("a")));
    }

    #[tokio::test(start_paused = true)]
    async fn host_failure_keeps_feature() {
        let (gateway, rotation) = setup();
        gateway.fail("host_channel");
        assert!(add(&rotation, "a", false).await.is_ok());
        assert_eq!(rotation.featured(), Some(MemberId::from("a")));
    }

    #[tokio::test(start_paused = true)]
    async fn role_failure_propagates_but_state_stays() {
        let (gateway, rotation) = setup();
        gateway.fail("grant_role");
        let err = add(&rotation, "a", true).await.unwrap_err();
        assert!(matches!(err, PlatformError::Request { op: "grant_role", .. }));
        assert!(rotation.is_live(&MemberId::from("a")));
        assert_eq!(rotation.featured(), Some(MemberId::from("a")));
        // The announcement still went out.
        assert_eq!(gateway.announcements().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_stream_skips_announcement() {
        let (gateway, rotation) = setup();
        rotation
            .add(&member("z"), &activity("zed"), "zed", true)
            .await
            .unwrap();
        assert_eq!(gateway.count("fetch_stream_metadata"), 1);
        assert!(gateway.announcements().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn metadata_failure_skips_announcement() {
        let (gateway, rotation) = setup();
        gateway.fail("fetch_stream_metadata");
        assert!(add(&rotation, "a", true).await.is_ok());
        assert!(gateway.announcements().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn side_effects_recheck_state_after_suspension() {
        let (gateway, rotation) = setup();
        // State changes immediately; the effects are only run afterwards.
        let went_live = rotation.add(&member("a"), &activity("a"), "a", true);
        let went_offline = rotation.remove(&MemberId::from("a"));
        assert_eq!(rotation.featured(), None);

        went_live.await.unwrap();
        went_offline.await.unwrap();
        assert!(gateway.announcements().is_empty());
        assert_eq!(gateway.count("host_channel"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn feature_refuses_members_not_live() {
        let (gateway, rotation) = setup();
        rotation.feature(&MemberId::from("ghost"), "ghost").await.unwrap();
        assert_eq!(rotation.featured(), None);
        assert_eq!(gateway.count("host_channel"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn presence_drives_add_and_remove() {
        use hearth_sdk::types::{Activity, ActivityKind};

        let (gateway, rotation) = setup();
        let a = member("a");
        let streaming = Presence {
            activities: vec![Activity {
                kind: ActivityKind::Streaming,
                name: "Twitch".into(),
                details: Some("title".into()),
                state: None,
                url: Some("https://twitch.tv/a".into()),
            }],
        };

        rotation.handle_presence(&a, &streaming).unwrap().await.unwrap();
        assert!(rotation.is_live(&a.id));
        assert_eq!(rotation.record(&a.id).unwrap().platform_channel, "a");

        // Same stream again: no side effects at all.
        let calls_before = gateway.calls().len();
        assert!(rotation.handle_presence(&a, &streaming).is_none());
        assert_eq!(gateway.calls().len(), calls_before);

        rotation.handle_presence(&a, &Presence::default()).unwrap().await.unwrap();
        assert!(!rotation.is_live(&a.id));
        assert!(rotation.handle_presence(&a, &Presence::default()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn list_puts_featured_first_then_fifo() {
        let (_gateway, rotation) = setup();
        add(&rotation, "a", false).await.unwrap();
        add(&rotation, "b", false).await.unwrap();
        add(&rotation, "c", false).await.unwrap();
        rotation.feature(&MemberId::from("c"), "c").await.unwrap();

        let ids: Vec<String> = rotation
            .list_live_streamers()
            .into_iter()
            .map(|s| s.member_id.0)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert!(rotation.list_live_streamers()[0].featured);
        assert!(!rotation.list_live_streamers()[1].featured);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_serializes_for_the_web_layer() {
        let (_gateway, rotation) = setup();
        add(&rotation, "a", false).await.unwrap();

        let json = serde_json::to_value(rotation.list_live_streamers()).unwrap();
        let entry = &json[0];
        assert_eq!(entry["member_id"], "a");
        assert_eq!(entry["name"], "A");
        assert_eq!(entry["platform_channel"], "a");
        assert_eq!(entry["url"], "https://twitch.tv/a");
        assert_eq!(entry["featured"], true);
        assert!(entry["live_since"].is_string());
    }

    #[tokio::test(start_paused = true)]
    async fn restore_adds_without_announcing() {
        use hearth_sdk::types::{Activity, ActivityKind};

        let (gateway, rotation) = setup();
        let presence = |login: &str| Presence {
            activities: vec![Activity {
                kind: ActivityKind::Streaming,
                name: "Twitch".into(),
                details: None,
                state: None,
                url: Some(format!("https://twitch.tv/{login}")),
            }],
        };
        let effects = rotation.restore(&[
            (member("a"), presence("a")),
            (member("b"), Presence::default()),
            (member("c"), presence("c")),
        ]);
        assert_eq!(effects.len(), 2);
        for effect in effects {
            effect.await.unwrap();
        }
        assert_eq!(rotation.live_count(), 2);
        assert_eq!(rotation.featured(), Some(MemberId::from("a")));
        assert!(gateway.announcements().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn restarted_stream_keeps_live_role_when_effects_reorder() {
        let (gateway, rotation) = setup();
        add(&rotation, "a", false).await.unwrap();

        let offline = rotation.remove(&MemberId::from("a"));
        let online = rotation.add(&member("a"), &activity("a"), "a", false);
        online.await.unwrap();
        offline.await.unwrap();

        assert!(rotation.is_live(&MemberId::from("a")));
        assert_eq!(
            live_role_calls(&gateway).last(),
            Some(&Call::GrantRole { member: "a".into(), role: "Live".into() })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn ended_stream_keeps_no_live_role_when_effects_reorder() {
        let (gateway, rotation) = setup();
        let online = rotation.add(&member("a"), &activity("a"), "a", false);
        let offline = rotation.remove(&MemberId::from("a"));
        offline.await.unwrap();
        online.await.unwrap();

        assert!(!rotation.is_live(&MemberId::from("a")));
        assert_eq!(
            live_role_calls(&gateway),
            vec![Call::RevokeRole { member: "a".into(), role: "Live".into() }]
        );
        // The streamer tag is permanent and still granted.
        assert!(gateway.calls().contains(&Call::GrantRole {
            member: "a".into(),
            role: "Streamers".into(),
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn second_snapshot_drops_streams_that_ended() {
        use hearth_sdk::types::{Activity, ActivityKind};

        let (gateway, rotation) = setup();
        let streaming = |login: &str| Presence {
            activities: vec![Activity {
                kind: ActivityKind::Streaming,
                name: "Twitch".into(),
                details: None,
                state: None,
                url: Some(format!("https://twitch.tv/{login}")),
            }],
        };
        let first = [(member("a"), streaming("a")), (member("b"), streaming("b"))];
        for effect in rotation.restore(&first) {
            effect.await.unwrap();
        }
        assert_eq!(rotation.featured(), Some(MemberId::from("a")));

        // a stopped during the outage, c started, b is missing entirely.
        let effects = rotation.restore(&[
            (member("a"), Presence::default()),
            (member("c"), streaming("c")),
        ]);
        for effect in effects {
            effect.await.unwrap();
        }
        assert!(!rotation.is_live(&MemberId::from("a")));
        assert!(!rotation.is_live(&MemberId::from("b")));
        assert!(rotation.is_live(&MemberId::from("c")));
        assert_eq!(rotation.featured(), Some(MemberId::from("c")));
        assert!(gateway.calls().contains(&Call::RevokeRole {
            member: "a".into(),
            role: "Live".into(),
        }));
        assert!(gateway.announcements().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn featured_stream_moving_channel_is_rehosted() {
        let (gateway, rotation) = setup();
        add(&rotation, "a", false).await.unwrap();
        add(&rotation, "b", false).await.unwrap();

        rotation.add(&member("a"), &activity("m"), "m", false).await.unwrap();
        // b moving does not touch the host.
        rotation.add(&member("b"), &activity("c"), "c", false).await.unwrap();

        let hosts: Vec<Call> = gateway
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::HostChannel { .. }))
            .collect();
        assert_eq!(
            hosts,
            vec![
                Call::HostChannel { host_channel: "hearthtv".into(), target_channel: "a".into() },
                Call::HostChannel { host_channel: "hearthtv".into(), target_channel: "m".into() },
            ]
        );
        assert_eq!(rotation.featured(), Some(MemberId::from("a")));
    }

    #[tokio::test(start_paused = true)]
    async fn members_offline_for_a_window_are_forgotten() {
        let (_gateway, rotation) = setup();
        add(&rotation, "a", false).await.unwrap();
        add(&rotation, "b", false).await.unwrap();
        rotation.remove(&MemberId::from("a")).await.unwrap();
        assert_eq!(rotation.fairness_queue(), vec![MemberId::from("b")]);
        rotation.feature(&MemberId::from("b"), "b").await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        add(&rotation, "c", false).await.unwrap();
        // a went offline recently: still remembered by the throttle.
        assert!(rotation.state.lock().last_announced.contains_key(&MemberId::from("a")));

        rotation.remove(&MemberId::from("b")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(301)).await;
        add(&rotation, "m", false).await.unwrap();

        let state = rotation.state.lock();
        let mut remembered: Vec<&str> = state.last_announced.keys().map(|m| m.as_str()).collect();
        remembered.sort();
        assert_eq!(remembered, vec!["c", "m"]);
        assert_eq!(state.fairness_queue, vec![MemberId::from("c")]);
    }
}
