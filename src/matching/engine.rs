//! Match engine — decides whether one parsed posting satisfies one rule.
//!
//! The policy is an explicit value passed per evaluation, never ambient
//! state, so the canonical and legacy behaviors are testable side by side.
//! The destination is always the last stop regardless of policy.

use crate::matching::rule::{OriginScope, SubscriberRule};
use crate::matching::stops::Posting;

/// Which stops are eligible for the origin check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPolicy {
    /// Canonical: origin is the first stop only. The only policy that
    /// also consults `origin_states`.
    FirstStopOnly,
    /// Legacy `first2` scope: origin may match either of the first two stops.
    FirstTwoStops,
    /// Legacy `any` scope: origin may match any stop.
    AnyStop,
}

impl MatchPolicy {
    /// Map a rule's persisted legacy scope flag to its policy.
    pub fn for_scope(scope: OriginScope) -> Self {
        match scope {
            OriginScope::FirstTwo => Self::FirstTwoStops,
            OriginScope::Any => Self::AnyStop,
        }
    }
}

/// True if `posting` satisfies `rule` under `policy`.
///
/// Both sides are pre-normalized at parse/store time; nothing is
/// re-normalized here.
pub fn matches(posting: &Posting, rule: &SubscriberRule, policy: MatchPolicy) -> bool {
    let stops = posting.stops();
    if stops.len() < 2 {
        return false;
    }

    let origin_eligible = match policy {
        MatchPolicy::FirstStopOnly => &stops[..1],
        MatchPolicy::FirstTwoStops => &stops[..2],
        MatchPolicy::AnyStop => stops,
    };

    let origin_ok = origin_eligible
        .iter()
        .any(|stop| rule.origin_cities.contains(stop))
        || (policy == MatchPolicy::FirstStopOnly
            && rule.origin_states.contains(&stops[0].state));

    // Short-circuit: destination is never evaluated on origin miss.
    if !origin_ok {
        return false;
    }

    rule.destination_all
        || rule
            .destination_states
            .contains(&stops[stops.len() - 1].state)
}
