//! Formatting for what the bot posts: stream announcements and chat replies.

use hearth_sdk::PlatformResult;
use hearth_sdk::gateway::Gateway;
use hearth_sdk::types::{RichContent, StreamMetadata};

use crate::activity::ActivityMetadata;

/// Longest message the chat platform accepts.
pub const MAX_MESSAGE_LEN: usize = 2000;

/// Accent color of stream announcements.
const STREAM_COLOR: u32 = 0x9146FF;

/// Post a reply, split across several messages if it is too long.
pub async fn say(gateway: &dyn Gateway, channel: &str, text: &str) -> PlatformResult<()> {
    for chunk in wrap_lines(text, MAX_MESSAGE_LEN) {
        gateway.send_message(channel, &chunk).await?;
    }
    Ok(())
}

/// Build the "went live" announcement for a member.
pub fn stream_announcement(
    member_name: &str,
    activity: &ActivityMetadata,
    stream: &StreamMetadata,
) -> RichContent {
    let title = if stream.title.is_empty() {
        activity.title.clone().unwrap_or_default()
    } else {
        stream.title.clone()
    };
    let mut content = RichContent::new(format!("{member_name} is now live!"));
    content.description = (!title.is_empty()).then_some(title);
    content.url = Some(activity.url.clone());
    content.color = Some(STREAM_COLOR);
    content.thumbnail_url = stream.profile_image_url.clone();
    content.image_url = stream
        .thumbnail_url
        .as_ref()
        .map(|t| t.replace("{width}", "1280").replace("{height}", "720"));
    content.timestamp = stream.started_at;

    let game = stream.game.clone().or_else(|| activity.game.clone());
    if let Some(game) = game {
        content = content.field("Playing", game, true);
    }
    content.field("Viewers", stream.viewer_count.to_string(), true)
}

/// Wrap text into chunks of at most `max_len` bytes, keeping whole lines
/// together where possible and breaking on word boundaries otherwise.
fn wrap_lines(text: &str, max_len: usize) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        for piece in split_long_line(line, max_len) {
            if !current.is_empty() && current.len() + 1 + piece.len() > max_len {
                result.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(&piece);
        }
    }
    if !current.is_empty() {
        result.push(current);
    }
    result
}

fn split_long_line(line: &str, max_len: usize) -> Vec<String> {
    if line.len() <= max_len {
        return vec![line.to_string()];
    }
    let mut pieces = Vec::new();
    let mut current = String::new();
    for word in line.split_whitespace() {
        if current.len() + word.len() + 1 > max_len && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}
