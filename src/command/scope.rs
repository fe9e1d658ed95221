use indexmap::IndexSet;

use crate::device::types::Capability;

pub fn sanitize_tag(tag: &str) -> String {
    tag.trim().to_lowercase()
}

/// Trims and lower-cases tags, dropping empty and duplicate ones.
pub fn sanitize_tags(tags: Vec<String>) -> Vec<String> {
    tags.iter()
        .map(|t| sanitize_tag(t))
        .filter(|t| !t.is_empty())
        .collect::<IndexSet<String>>()
        .into_iter()
        .collect()
}

/// True if a device subscribed to `subscribed` is addressed by `requested`. Both sides are
/// expected to be sanitized, so blank tags never match anything.
pub fn matches_events(subscribed: &[String], requested: &[String]) -> bool {
    requested.iter().any(|tag| subscribed.contains(tag))
}

/// True if a device with `capabilities` and `subscribed` tags takes a vibrate command scoped
/// to `requested` tags. Independent of connection state.
pub fn accepts_vibrate(capabilities: &[Capability], subscribed: &[String], requested: &[String]) -> bool {
    capabilities.contains(&Capability::Vibrate) && matches_events(subscribed, requested)
}
