//! hearth-bot: the community bot's resource-lifecycle core.
//!
//! - Ephemeral voice channels: rate-limited self-provisioning and
//!   reclamation of channels left empty
//! - Live streamers: role tagging, de-duplicated announcements and a
//!   single featured streamer chosen by fairness rotation
//! - Chat commands and the event dispatch table tying it together

pub mod activity;
pub mod alarm;
pub mod channels;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod output;
pub mod streamers;
