//! Client for the platform bridge.
//!
//! The chat and streaming platform SDKs run in a sidecar process (the
//! "bridge"). This client keeps one TCP connection to it, turns inbound
//! event frames into [`Event`]s, and implements [`Gateway`] by sending
//! request frames and matching replies by id.
//!
//! ## Reconnection
//!
//! [`connect`] supervises the connection: when it drops, in-flight requests
//! fail with [`PlatformError::Disconnected`], an [`Event::Disconnected`] is
//! emitted, and the client reconnects with exponential backoff and jitter.
//! The [`ClientHandle`] stays valid across reconnects.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use crate::error::{PlatformError, PlatformResult};
use crate::event::Event;
use crate::gateway::Gateway;
use crate::types::{ChannelId, MemberId, RichContent, StreamMetadata, VoiceChannel};
use crate::wire::{self, Inbound, Request, RequestFrame};

/// Configuration for connecting to the platform bridge.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Bridge address (host:port).
    pub bridge_addr: String,
    /// How long a gateway call waits for its reply.
    pub request_timeout: Duration,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            bridge_addr: "127.0.0.1:7878".to_string(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// Backoff policy between reconnect attempts.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before first reconnect attempt.
    pub initial_delay: Duration,
    /// Maximum delay between reconnect attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Next delay after `current`, with up to 25% jitter, capped at `max_delay`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let base = (current.as_millis() as f64 * self.backoff_factor) as u64;
        let jitter = rand_jitter(current.as_millis() as u64 / 4);
        Duration::from_millis((base + jitter).min(self.max_delay.as_millis() as u64))
    }
}

type ReplySender = oneshot::Sender<(Option<serde_json::Value>, Option<String>)>;
type Pending = Arc<Mutex<HashMap<u64, ReplySender>>>;

/// A handle to the bridge connection. Cheap to clone.
#[derive(Clone)]
pub struct ClientHandle {
    cmd_tx: mpsc::Sender<RequestFrame>,
    pending: Pending,
    next_id: Arc<AtomicU64>,
    request_timeout: Duration,
}

impl ClientHandle {
    /// Send one request and wait for its reply.
    async fn call<T: DeserializeOwned>(&self, request: Request) -> PlatformResult<T> {
        let op = request.op();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        if self.cmd_tx.send(RequestFrame { id, request }).await.is_err() {
            self.pending.lock().remove(&id);
            return Err(PlatformError::Disconnected);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok((ok, error))) => wire::reply_into(op, ok, error),
            // Sender dropped: the connection went away with this request in flight.
            Ok(Err(_)) => Err(PlatformError::Disconnected),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(PlatformError::Timeout { op })
            }
        }
    }
}

#[async_trait]
impl Gateway for ClientHandle {
    async fn create_channel(
        &self,
        name: &str,
        parent_category: &str,
    ) -> PlatformResult<VoiceChannel> {
        self.call(Request::CreateChannel {
            name: name.to_string(),
            parent_category: parent_category.to_string(),
        })
        .await
    }

    async fn delete_channel(&self, channel: &ChannelId) -> PlatformResult<()> {
        self.call(Request::DeleteChannel { channel: channel.clone() }).await
    }

    async fn set_channel_permission(
        &self,
        channel: &ChannelId,
        subject: &MemberId,
        allow: bool,
    ) -> PlatformResult<()> {
        self.call(Request::SetChannelPermission {
            channel: channel.clone(),
            subject: subject.clone(),
            allow,
        })
        .await
    }

    async fn find_channel(&self, channel: &ChannelId) -> PlatformResult<Option<VoiceChannel>> {
        self.call(Request::FindChannel { channel: channel.clone() }).await
    }

    async fn find_channel_by_name(&self, name: &str) -> PlatformResult<Option<VoiceChannel>> {
        self.call(Request::FindChannelByName { name: name.to_string() }).await
    }

    async fn grant_role(&self, member: &MemberId, role: &str) -> PlatformResult<()> {
        self.call(Request::GrantRole {
            member: member.clone(),
            role: role.to_string(),
        })
        .await
    }

    async fn revoke_role(&self, member: &MemberId, role: &str) -> PlatformResult<()> {
        self.call(Request::RevokeRole {
            member: member.clone(),
            role: role.to_string(),
        })
        .await
    }

    async fn send_message(&self, channel: &str, text: &str) -> PlatformResult<()> {
        self.call(Request::SendMessage {
            channel: channel.to_string(),
            text: text.to_string(),
        })
        .await
    }

    async fn send_announcement(&self, channel: &str, content: &RichContent) -> PlatformResult<()> {
        self.call(Request::SendAnnouncement {
            channel: channel.to_string(),
            content: content.clone(),
        })
        .await
    }

    async fn fetch_stream_metadata(
        &self,
        platform_channel: &str,
    ) -> PlatformResult<Option<StreamMetadata>> {
        self.call(Request::FetchStreamMetadata {
            platform_channel: platform_channel.to_string(),
        })
        .await
    }

    async fn host_channel(&self, host_channel: &str, target_channel: &str) -> PlatformResult<()> {
        self.call(Request::HostChannel {
            host_channel: host_channel.to_string(),
            target_channel: target_channel.to_string(),
        })
        .await
    }
}

/// Establish the TCP connection to the bridge.
pub async fn establish_connection(config: &ConnectConfig) -> Result<TcpStream> {
    tracing::debug!("Connecting to bridge at {}...", config.bridge_addr);
    let tcp = TcpStream::connect(&config.bridge_addr)
        .await
        .with_context(|| format!("TCP connect to {} failed", config.bridge_addr))?;
    tcp.set_nodelay(true)?;
    tracing::debug!("Connected to bridge at {}", config.bridge_addr);
    Ok(tcp)
}

/// Connect to the bridge and keep reconnecting until every handle is dropped.
///
/// Returns a handle implementing [`Gateway`] and a receiver for events.
/// The connection runs in a spawned task.
pub fn connect(
    config: ConnectConfig,
    reconnect: ReconnectConfig,
) -> (ClientHandle, mpsc::Receiver<Event>) {
    let (event_tx, event_rx) = mpsc::channel(4096);
    let (cmd_tx, cmd_rx) = mpsc::channel(256);
    let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

    let handle = ClientHandle {
        cmd_tx,
        pending: Arc::clone(&pending),
        next_id: Arc::new(AtomicU64::new(1)),
        request_timeout: config.request_timeout,
    };

    tokio::spawn(supervise(config, reconnect, pending, event_tx, cmd_rx));

    (handle, event_rx)
}

async fn supervise(
    config: ConnectConfig,
    reconnect: ReconnectConfig,
    pending: Pending,
    event_tx: mpsc::Sender<Event>,
    mut cmd_rx: mpsc::Receiver<RequestFrame>,
) {
    let mut delay = reconnect.initial_delay;
    let mut consecutive_failures = 0u32;

    loop {
        let stream = match establish_connection(&config).await {
            Ok(s) => {
                consecutive_failures = 0;
                delay = reconnect.initial_delay;
                s
            }
            Err(e) => {
                consecutive_failures += 1;
                tracing::warn!(
                    error = %e,
                    attempt = consecutive_failures,
                    delay_secs = delay.as_secs(),
                    "Bridge connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = reconnect.next_delay(delay);
                continue;
            }
        };

        if event_tx.send(Event::Connected).await.is_err() {
            return;
        }

        let outcome = run_session(stream, &pending, &event_tx, &mut cmd_rx).await;

        // Dropping the senders fails every in-flight call with Disconnected.
        pending.lock().clear();

        let reason = match outcome {
            Ok(SessionEnd::HandlesDropped) => {
                tracing::info!("All client handles dropped, closing bridge connection");
                return;
            }
            Ok(SessionEnd::Closed) => "bridge closed the connection".to_string(),
            Err(e) => e.to_string(),
        };
        if event_tx.send(Event::Disconnected { reason }).await.is_err() {
            return;
        }

        tracing::info!(delay_secs = delay.as_secs(), "Disconnected, will reconnect");
        tokio::time::sleep(delay).await;
        delay = reconnect.next_delay(delay);
    }
}

enum SessionEnd {
    Closed,
    HandlesDropped,
}

async fn run_session(
    stream: TcpStream,
    pending: &Pending,
    event_tx: &mpsc::Sender<Event>,
    cmd_rx: &mut mpsc::Receiver<RequestFrame>,
) -> Result<SessionEnd> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(SessionEnd::Closed);
                };
                if line.trim().is_empty() {
                    continue;
                }
                match wire::decode_inbound(&line) {
                    Ok(Inbound::Event { event }) => {
                        if event_tx.send(event).await.is_err() {
                            return Ok(SessionEnd::HandlesDropped);
                        }
                    }
                    Ok(Inbound::Reply { id, ok, error }) => {
                        let waiter = pending.lock().remove(&id);
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send((ok, error));
                            }
                            None => tracing::debug!(id, "Reply for unknown or expired request"),
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Ignoring malformed bridge frame"),
                }
            }
            frame = cmd_rx.recv() => {
                let Some(frame) = frame else {
                    return Ok(SessionEnd::HandlesDropped);
                };
                // Requests whose caller already timed out are not worth sending.
                if !pending.lock().contains_key(&frame.id) {
                    continue;
                }
                let line = wire::encode_request(&frame)?;
                writer.write_all(line.as_bytes()).await?;
            }
        }
    }
}

/// Random value in `0..max`.
fn rand_jitter(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn backoff_grows_and_caps() {
        let reconnect = ReconnectConfig::default();
        let next = reconnect.next_delay(Duration::from_secs(2));
        assert!(next >= Duration::from_secs(4));
        assert!(next < Duration::from_millis(4500));
        assert_eq!(reconnect.next_delay(Duration::from_secs(60)), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn request_reply_and_event_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Fake bridge: push one event, answer one request.
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let event = concat!(
                r#"{"type":"event","event":{"kind":"message","#,
                r#""from":{"id":"1","name":"amy"},"channel":"lobby","text":"hi"}}"#,
                "\n"
            );
            writer.write_all(event.as_bytes()).await.unwrap();
            let mut lines = BufReader::new(reader).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let frame: RequestFrame = serde_json::from_str(&line).unwrap();
            assert_eq!(frame.request.op(), "find_channel_by_name");
            let reply = format!(
                concat!(
                    r#"{{"type":"reply","id":{},"#,
                    r#""ok":{{"id":"5","name":"duo","member_count":2}}}}"#,
                    "\n"
                ),
                frame.id
            );
            writer.write_all(reply.as_bytes()).await.unwrap();
            // Keep the connection open until the client is done.
            let _ = lines.next_line().await;
        });

        let config = ConnectConfig {
            bridge_addr: addr.to_string(),
            request_timeout: Duration::from_secs(5),
        };
        let (handle, mut events) = connect(config, ReconnectConfig::default());

        assert_eq!(events.recv().await, Some(Event::Connected));
        assert_eq!(
            events.recv().await,
            Some(Event::Message {
                from: crate::types::Member::new("1", "amy"),
                channel: "lobby".into(),
                text: "hi".into(),
            })
        );

        let channel = handle.find_channel_by_name("duo").await.unwrap().unwrap();
        assert_eq!(channel.id, ChannelId::from("5"));
        assert_eq!(channel.member_count, 2);
    }
}
