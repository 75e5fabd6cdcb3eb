//! Stop extraction and multi-subscriber rule matching.

pub mod dispatcher;
pub mod engine;
pub mod rule;
pub mod stops;

pub use dispatcher::{Alert, DispatchPolicy, Dispatcher};
pub use engine::{MatchPolicy, matches};
pub use rule::{OriginScope, SubscriberRule, normalize_city, normalize_state, parse_city_state};
pub use stops::{Posting, Stop, StopParser, SubscriberId};
