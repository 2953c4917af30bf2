//! Event log compaction for storage and replay.

use std::collections::HashMap;

use crate::types::Event;

#[derive(Hash, PartialEq, Eq)]
enum DeltaKey<'a> {
    Message(&'a str),
    ToolCall(&'a str),
}

fn delta_of(event: &Event) -> Option<(DeltaKey<'_>, &str)> {
    match event {
        Event::TextMessageContent { message_id, delta } => {
            Some((DeltaKey::Message(message_id), delta))
        }
        Event::ToolCallArgs {
            tool_call_id,
            delta,
        } => Some((DeltaKey::ToolCall(tool_call_id), delta)),
        _ => None,
    }
}

/// Merge every content/args delta of an entity into its first delta event.
///
/// All other events keep their relative order; the rebuilt messages and tool
/// calls are identical to those of the original log.
pub fn compact_events(events: &[Event]) -> Vec<Event> {
    let mut merged: HashMap<DeltaKey<'_>, String> = HashMap::new();
    for event in events {
        if let Some((key, delta)) = delta_of(event) {
            merged.entry(key).or_default().push_str(delta);
        }
    }

    let mut compacted = Vec::with_capacity(events.len());
    for event in events {
        let Some((key, _)) = delta_of(event) else {
            compacted.push(event.clone());
            continue;
        };
        // First occurrence takes the merged text; later ones find it gone.
        let Some(text) = merged.remove(&key) else {
            continue;
        };
        compacted.push(match key {
            DeltaKey::Message(id) => Event::text_message_content(id, text),
            DeltaKey::ToolCall(id) => Event::tool_call_args(id, text),
        });
    }
    compacted
}
