//! Subscriber rule representation and mutation-input validation.
//!
//! A rule is owned by exactly one subscriber and mutated only through the
//! `RuleStore`. Validation happens here, before the store boundary, so a
//! rejected input never touches the persisted rule.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::RuleError;
use crate::matching::stops::Stop;

/// Legacy per-subscriber origin scope flag.
///
/// Earlier revisions of the matcher compared origin points against either
/// of the first two stops (`FirstTwo`) or against every stop (`Any`).
/// Persisted per rule; the dispatcher decides whether it is honored
/// (see `DispatchPolicy`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginScope {
    #[default]
    #[serde(rename = "first2")]
    FirstTwo,
    Any,
}

impl OriginScope {
    /// The string form persisted in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstTwo => "first2",
            Self::Any => "any",
        }
    }

    /// Parse the persisted/user-supplied form.
    pub fn parse(s: &str) -> Result<Self, RuleError> {
        match s.trim().to_lowercase().as_str() {
            "first2" => Ok(Self::FirstTwo),
            "any" => Ok(Self::Any),
            other => Err(RuleError::InvalidScope(other.to_string())),
        }
    }
}

/// One subscriber's origin/destination alerting rule.
///
/// All members are pre-normalized (uppercase, trimmed) so the match path
/// never re-normalizes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberRule {
    /// Exact-match origin points.
    pub origin_cities: BTreeSet<Stop>,
    /// State-only origin match (first-stop-only policy).
    pub origin_states: BTreeSet<String>,
    /// If true, any destination state matches.
    pub destination_all: bool,
    /// Consulted only when `destination_all` is false.
    pub destination_states: BTreeSet<String>,
    /// Legacy origin scope flag.
    pub origin_scope: OriginScope,
}

impl SubscriberRule {
    /// A rule with no origin points and no origin states can never match
    /// and is excluded from dispatch.
    pub fn is_inert(&self) -> bool {
        self.origin_cities.is_empty() && self.origin_states.is_empty()
    }
}

// ── Mutation-input validation ───────────────────────────────────────

/// Validate and normalize a 2-letter state code.
pub fn normalize_state(raw: &str) -> Result<String, RuleError> {
    let state = raw.trim().to_uppercase();
    if state.len() == 2 && state.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(state)
    } else {
        Err(RuleError::InvalidState(raw.trim().to_string()))
    }
}

/// Validate and normalize a city name.
pub fn normalize_city(raw: &str) -> Result<String, RuleError> {
    let city = raw.trim().to_uppercase();
    if city.chars().next().is_some_and(|c| c.is_alphabetic()) {
        Ok(city)
    } else {
        Err(RuleError::InvalidCity(raw.trim().to_string()))
    }
}

/// Parse a subscriber-supplied "City, ST" argument into a normalized stop.
///
/// Accepts `"Louisville, KY"` or `"Louisville KY"`.
pub fn parse_city_state(raw: &str) -> Result<Stop, RuleError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(RuleError::InvalidCityStateArg("missing value".into()));
    }

    let (city_part, state_part) = if let Some((city, rest)) = text.split_once(',') {
        let state = rest.split_whitespace().next().unwrap_or("");
        (city, state)
    } else {
        let Some((city, state)) = text.rsplit_once(char::is_whitespace) else {
            return Err(RuleError::InvalidCityStateArg(text.to_string()));
        };
        (city, state)
    };

    let city = normalize_city(city_part)?;
    let state = normalize_state(state_part)?;
    Ok(Stop { city, state })
}
