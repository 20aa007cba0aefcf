//! Conversation compression: past the threshold, keep the leading system
//! message and the most recent tail.

use wf_domain::tool::{Message, Role};

pub fn compress_messages(messages: &[Message], above: usize, keep_tail: usize) -> Vec<Message> {
    if messages.len() <= above {
        return messages.to_vec();
    }

    let tail_start = messages.len().saturating_sub(keep_tail);
    let mut out = Vec::with_capacity(keep_tail + 1);
    if let Some(first) = messages.first() {
        if first.role == Role::System && tail_start > 0 {
            out.push(first.clone());
        }
    }
    out.extend(messages[tail_start..].iter().cloned());
    tracing::debug!(
        original = messages.len(),
        compressed = out.len(),
        "conversation compressed"
    );
    out
}
