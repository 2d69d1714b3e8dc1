//! Source selection policy.
//!
//! When a holder carries copies from several sources, exactly one copy is
//! exposed as the selected view. The ordering over sources is the only
//! configurable piece of the holder; it is injected at registry
//! construction.

use std::collections::HashMap;

use roster_types::{InstanceInfo, Origin, Source};

/// Chooses the selected copy among a holder's sources.
///
/// Implementations must be total and deterministic: for any non-empty copy
/// map the same source is chosen every time.
pub trait SourceSelector: Send + Sync {
    fn select<'a>(&self, copies: &'a HashMap<Source, InstanceInfo>) -> Option<&'a Source>;
}

/// Default policy: local truth wins over replicated echo, newer wins over
/// older, source name breaks remaining ties.
///
/// Origin precedence is `Local > Replicated > Bootstrap > Interested`;
/// among equal origins the copy with the highest version wins; among equal
/// versions the lexicographically smallest source name wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct OriginSelector;

fn origin_rank(origin: Origin) -> u8 {
    match origin {
        Origin::Local => 0,
        Origin::Replicated => 1,
        Origin::Bootstrap => 2,
        Origin::Interested => 3,
    }
}

impl SourceSelector for OriginSelector {
    fn select<'a>(&self, copies: &'a HashMap<Source, InstanceInfo>) -> Option<&'a Source> {
        copies
            .iter()
            .min_by(|(a_src, a_info), (b_src, b_info)| {
                origin_rank(a_src.origin())
                    .cmp(&origin_rank(b_src.origin()))
                    .then(b_info.version().cmp(&a_info.version()))
                    .then(a_src.name().cmp(b_src.name()))
            })
            .map(|(source, _)| source)
    }
}
