//! Stop extraction from raw posting text.
//!
//! A posting looks like:
//!
//! ```text
//! 🚚 USPS load
//! 📍 LOUISVILLE, KY
//! 📍 DENVER, CO
//! ```
//!
//! Each 📍 marker is followed by a city token and a 2-letter state code.
//! Extraction is non-overlapping, left-to-right, and order-preserving.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Subscriber identity (Telegram numeric user id).
pub type SubscriberId = i64;

/// A normalized (city, state) waypoint extracted from posting text.
///
/// City and state are trimmed and upper-cased at construction; equality
/// is exact on the normalized pair. Title-casing for display is a
/// presentation concern (`bot::commands::title_city`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stop {
    pub city: String,
    pub state: String,
}

impl Stop {
    /// Build a stop, normalizing both parts.
    pub fn new(city: &str, state: &str) -> Self {
        Self {
            city: city.trim().to_uppercase(),
            state: state.trim().to_uppercase(),
        }
    }
}

impl fmt::Display for Stop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.city, self.state)
    }
}

/// The ordered stop sequence parsed from one inbound message.
///
/// A posting with fewer than 2 stops carries no directional information
/// and is never actionable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Posting {
    stops: Vec<Stop>,
}

impl Posting {
    pub fn new(stops: Vec<Stop>) -> Self {
        Self { stops }
    }

    pub fn stops(&self) -> &[Stop] {
        &self.stops
    }

    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    /// A load needs at least an origin and a destination.
    pub fn is_actionable(&self) -> bool {
        self.stops.len() >= 2
    }

    /// First stop — the origin under the canonical policy.
    pub fn origin(&self) -> Option<&Stop> {
        self.stops.first()
    }

    /// Last stop — always the destination.
    pub fn destination(&self) -> Option<&Stop> {
        self.stops.last()
    }
}

/// Extracts ordered stops from raw posting text.
///
/// Holds the compiled marker regex; construct once and reuse.
pub struct StopParser {
    marker: Regex,
}

impl Default for StopParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StopParser {
    pub fn new() -> Self {
        // 📍 CITY, ST — city starts with an uppercase letter and may
        // contain letters, spaces, periods, apostrophes, hyphens.
        let marker = Regex::new(r"📍\s*([A-Z][A-Za-z\s\.'\-]+?),\s*([A-Z]{2})")
            .expect("stop marker regex is valid");
        Self { marker }
    }

    /// Parse all waypoint stops from `text`, in textual order.
    ///
    /// Returns an empty posting when fewer than 2 markers are found —
    /// absence of a match is a normal, silent outcome, never an error.
    pub fn parse(&self, text: &str) -> Posting {
        let stops: Vec<Stop> = self
            .marker
            .captures_iter(text)
            .map(|cap| Stop::new(&cap[1], &cap[2]))
            .collect();

        if stops.len() < 2 {
            if !stops.is_empty() {
                debug!(count = stops.len(), "Posting has fewer than 2 stops — not actionable");
            }
            return Posting::default();
        }

        Posting::new(stops)
    }
}
