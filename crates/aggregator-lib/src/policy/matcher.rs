//! Policy trace matching

use super::{PolicyHit, PolicyMatch, PolicyTrace, TraceSelector};

/// Whether any hit in the selected lists of `trace` satisfies `criterion`.
///
/// Tier, kind and action are compared against the hit itself. Namespace and
/// name are compared against the hit's identity, which for end-of-tier hits
/// is the triggering rule.
pub fn matches(trace: &PolicyTrace, criterion: &PolicyMatch) -> bool {
    let hits: Box<dyn Iterator<Item = &PolicyHit>> = match criterion.trace {
        TraceSelector::Any => Box::new(trace.hits()),
        TraceSelector::Enforced => Box::new(trace.enforced.iter()),
        TraceSelector::Pending => Box::new(trace.pending.iter()),
    };

    hits.into_iter().any(|hit| hit_matches(hit, criterion))
}

fn hit_matches(hit: &PolicyHit, criterion: &PolicyMatch) -> bool {
    if criterion.kind.is_some_and(|kind| kind != hit.kind) {
        return false;
    }
    if !criterion.tier.is_empty() && criterion.tier != hit.tier {
        return false;
    }
    if criterion.action.is_some_and(|action| action != hit.action) {
        return false;
    }
    if !criterion.specifies_identity() {
        return true;
    }

    match hit.identity() {
        Some(identity) => {
            (criterion.namespace.is_empty() || criterion.namespace == identity.namespace)
                && (criterion.name.is_empty() || criterion.name == identity.name)
        }
        None => false,
    }
}
