//! Newline-delimited JSON frames spoken with the platform bridge.
//!
//! Inbound (bridge → bot):
//!   {"type":"event","event":{"kind":"presence_changed",...}}
//!   {"type":"reply","id":7,"ok":{...}}
//!   {"type":"reply","id":8,"error":"Missing Permissions"}
//!
//! Outbound (bot → bridge):
//!   {"id":7,"request":{"op":"delete_channel","channel":"900"}}

use serde::{Deserialize, Serialize};

use crate::error::PlatformError;
use crate::event::Event;
use crate::types::{ChannelId, MemberId, RichContent};

/// A gateway operation the bot asks the bridge to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CreateChannel { name: String, parent_category: String },
    DeleteChannel { channel: ChannelId },
    SetChannelPermission { channel: ChannelId, subject: MemberId, allow: bool },
    FindChannel { channel: ChannelId },
    FindChannelByName { name: String },
    GrantRole { member: MemberId, role: String },
    RevokeRole { member: MemberId, role: String },
    SendMessage { channel: String, text: String },
    SendAnnouncement { channel: String, content: RichContent },
    FetchStreamMetadata { platform_channel: String },
    HostChannel { host_channel: String, target_channel: String },
}

impl Request {
    /// Operation name used in logs and errors.
    pub fn op(&self) -> &'static str {
        match self {
            Request::CreateChannel { .. } => "create_channel",
            Request::DeleteChannel { .. } => "delete_channel",
            Request::SetChannelPermission { .. } => "set_channel_permission",
            Request::FindChannel { .. } => "find_channel",
            Request::FindChannelByName { .. } => "find_channel_by_name",
            Request::GrantRole { .. } => "grant_role",
            Request::RevokeRole { .. } => "revoke_role",
            Request::SendMessage { .. } => "send_message",
            Request::SendAnnouncement { .. } => "send_announcement",
            Request::FetchStreamMetadata { .. } => "fetch_stream_metadata",
            Request::HostChannel { .. } => "host_channel",
        }
    }
}

/// Outbound frame: a request tagged with its correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    pub request: Request,
}

/// Inbound frame from the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    Event {
        event: Event,
    },
    Reply {
        id: u64,
        #[serde(default)]
        ok: Option<serde_json::Value>,
        #[serde(default)]
        error: Option<String>,
    },
}

/// Encode a request frame as one line (trailing newline included).
pub fn encode_request(frame: &RequestFrame) -> Result<String, PlatformError> {
    let mut line =
        serde_json::to_string(frame).map_err(|e| PlatformError::Protocol(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

/// Decode one inbound line. Blank lines are the caller's to skip.
pub fn decode_inbound(line: &str) -> Result<Inbound, PlatformError> {
    serde_json::from_str(line.trim_end()).map_err(|e| PlatformError::Protocol(e.to_string()))
}

/// Turn a reply payload into the caller's expected type.
///
/// A reply carrying `error` maps to [`PlatformError::Request`]. A reply with
/// neither field decodes as JSON `null`, which is how `()` and `None`
/// results arrive.
pub fn reply_into<T: serde::de::DeserializeOwned>(
    op: &'static str,
    ok: Option<serde_json::Value>,
    error: Option<String>,
) -> Result<T, PlatformError> {
    if let Some(reason) = error {
        return Err(PlatformError::request(op, reason));
    }
    let value = ok.unwrap_or(serde_json::Value::Null);
    serde_json::from_value(value)
        .map_err(|e| PlatformError::Protocol(format!("{op}: bad reply payload: {e}")))
}
