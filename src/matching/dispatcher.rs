//! Dispatcher — fans a single parsed posting out across all subscribers.
//!
//! Parsing happens once per event; matching happens once per non-inert
//! rule. Delivery failures are isolated per subscriber: one failed send
//! never blocks or skips the rest.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::channels::SubscriberChannel;
use crate::error::Result;
use crate::matching::engine::{self, MatchPolicy};
use crate::matching::rule::SubscriberRule;
use crate::matching::stops::{StopParser, SubscriberId};
use crate::store::RuleStore;

/// How the dispatcher selects the match policy for each rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPolicy {
    /// One policy for every rule. The canonical configuration is
    /// `Fixed(MatchPolicy::FirstStopOnly)`.
    Fixed(MatchPolicy),
    /// Legacy-compatibility mode: honor each rule's persisted
    /// `origin_scope` flag.
    PerRuleScope,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self::Fixed(MatchPolicy::FirstStopOnly)
    }
}

/// One alert ready for delivery.
#[derive(Debug, Clone)]
pub struct Alert {
    pub subscriber_id: SubscriberId,
    pub payload: String,
}

/// Render the alert payload for a matched posting.
fn render_alert(text: &str) -> String {
    format!("🚚 LOAD MATCH\n\n{text}")
}

/// Fans postings out across all subscriber rules.
pub struct Dispatcher {
    store: Arc<dyn RuleStore>,
    parser: StopParser,
    policy: DispatchPolicy,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn RuleStore>, policy: DispatchPolicy) -> Self {
        Self {
            store,
            parser: StopParser::new(),
            policy,
        }
    }

    /// The effective match policy for one rule under this dispatcher's
    /// configuration.
    pub fn policy_for(&self, rule: &SubscriberRule) -> MatchPolicy {
        match self.policy {
            DispatchPolicy::Fixed(policy) => policy,
            DispatchPolicy::PerRuleScope => MatchPolicy::for_scope(rule.origin_scope),
        }
    }

    /// Evaluate one posting against every non-inert rule.
    ///
    /// Parses once; a posting with fewer than 2 stops returns empty
    /// without touching the store. Store errors are fatal and propagate;
    /// retry policy belongs to the caller.
    pub async fn dispatch(&self, text: &str) -> Result<Vec<Alert>> {
        let posting = self.parser.parse(text);
        if !posting.is_actionable() {
            debug!("Posting not actionable — no dispatch");
            return Ok(Vec::new());
        }

        let rules = self.store.enumerate_active().await?;
        if rules.is_empty() {
            return Ok(Vec::new());
        }

        let payload = render_alert(text);
        let alerts: Vec<Alert> = rules
            .iter()
            .filter(|(_, rule)| engine::matches(&posting, rule, self.policy_for(rule)))
            .map(|(subscriber_id, _)| Alert {
                subscriber_id: *subscriber_id,
                payload: payload.clone(),
            })
            .collect();

        info!(
            stops = posting.len(),
            rules = rules.len(),
            matched = alerts.len(),
            "Dispatched posting"
        );
        Ok(alerts)
    }

    /// Deliver alerts through the sink, one subscriber at a time.
    ///
    /// A failure for one subscriber is logged and swallowed. Returns the
    /// number of successful deliveries.
    pub async fn deliver_all(&self, sink: &dyn SubscriberChannel, alerts: &[Alert]) -> usize {
        let mut delivered = 0;
        for alert in alerts {
            match sink.deliver(alert.subscriber_id, &alert.payload).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        subscriber_id = alert.subscriber_id,
                        error = %e,
                        "Alert delivery failed — continuing with remaining subscribers"
                    );
                }
            }
        }
        delivered
    }

    /// Evaluate a batch of historical texts against a single rule.
    ///
    /// Returns the indices of matching texts. Used by the "test last N
    /// postings" command; fetching the history is the transport's job.
    pub fn probe(&self, texts: &[String], rule: &SubscriberRule, policy: MatchPolicy) -> Vec<usize> {
        if rule.is_inert() {
            return Vec::new();
        }
        texts
            .iter()
            .enumerate()
            .filter(|(_, text)| engine::matches(&self.parser.parse(text), rule, policy))
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;
    // `super::*` brings in the crate's one-parameter `Result` alias;
    // the mock trait impls below need the two-parameter std form.
    use std::result::Result;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error::{ChannelError, StoreError};
    use crate::matching::rule::OriginScope;
    use crate::matching::stops::Stop;

    /// In-memory store stub: pre-seeded rules, no mutation support.
    struct FixedRuleStore {
        rules: BTreeMap<SubscriberId, SubscriberRule>,
        fail: bool,
    }

    impl FixedRuleStore {
        fn new(rules: Vec<(SubscriberId, SubscriberRule)>) -> Self {
            Self {
                rules: rules.into_iter().collect(),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                rules: BTreeMap::new(),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl RuleStore for FixedRuleStore {
        async fn run_migrations(&self) -> Result<(), StoreError> {
            Ok(())
        }

        async fn load_rule(&self, id: SubscriberId) -> Result<SubscriberRule, StoreError> {
            Ok(self.rules.get(&id).cloned().unwrap_or_default())
        }

        async fn enumerate_active(
            &self,
        ) -> Result<Vec<(SubscriberId, SubscriberRule)>, StoreError> {
            if self.fail {
                return Err(StoreError::Query("store unavailable".into()));
            }
            Ok(self
                .rules
                .iter()
                .filter(|(_, r)| !r.is_inert())
                .map(|(id, r)| (*id, r.clone()))
                .collect())
        }

        async fn add_origin_city(&self, _: SubscriberId, _: &Stop) -> Result<(), StoreError> {
            unimplemented!("read-only test store")
        }
        async fn remove_origin_city(&self, _: SubscriberId, _: &Stop) -> Result<(), StoreError> {
            unimplemented!("read-only test store")
        }
        async fn clear_origin_cities(&self, _: SubscriberId) -> Result<(), StoreError> {
            unimplemented!("read-only test store")
        }
        async fn add_origin_state(&self, _: SubscriberId, _: &str) -> Result<(), StoreError> {
            unimplemented!("read-only test store")
        }
        async fn remove_origin_state(&self, _: SubscriberId, _: &str) -> Result<(), StoreError> {
            unimplemented!("read-only test store")
        }
        async fn clear_origin_states(&self, _: SubscriberId) -> Result<(), StoreError> {
            unimplemented!("read-only test store")
        }
        async fn add_destination_state(&self, _: SubscriberId, _: &str) -> Result<(), StoreError> {
            unimplemented!("read-only test store")
        }
        async fn remove_destination_state(
            &self,
            _: SubscriberId,
            _: &str,
        ) -> Result<(), StoreError> {
            unimplemented!("read-only test store")
        }
        async fn clear_destination_states(&self, _: SubscriberId) -> Result<(), StoreError> {
            unimplemented!("read-only test store")
        }
        async fn set_destination_all(&self, _: SubscriberId, _: bool) -> Result<(), StoreError> {
            unimplemented!("read-only test store")
        }
        async fn set_origin_scope(
            &self,
            _: SubscriberId,
            _: OriginScope,
        ) -> Result<(), StoreError> {
            unimplemented!("read-only test store")
        }
    }

    /// Delivery sink that records sends and can fail for chosen subscribers.
    struct RecordingSink {
        delivered: Mutex<Vec<SubscriberId>>,
        fail_for: Vec<SubscriberId>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                delivered: Mutex::new(Vec::new()),
                fail_for: Vec::new(),
            }
        }

        fn failing_for(ids: Vec<SubscriberId>) -> Self {
            Self {
                delivered: Mutex::new(Vec::new()),
                fail_for: ids,
            }
        }
    }

    #[async_trait]
    impl SubscriberChannel for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn deliver(&self, id: SubscriberId, _text: &str) -> Result<(), ChannelError> {
            if self.fail_for.contains(&id) {
                return Err(ChannelError::DeliveryFailed {
                    name: "recording".into(),
                    reason: "injected failure".into(),
                });
            }
            self.delivered.lock().unwrap().push(id);
            Ok(())
        }

        async fn health_check(&self) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    fn city_rule(city: &str, state: &str, dest_all: bool) -> SubscriberRule {
        let mut rule = SubscriberRule::default();
        rule.origin_cities.insert(Stop::new(city, state));
        rule.destination_all = dest_all;
        rule
    }

    const POSTING: &str = "New load\n📍 LOUISVILLE, KY\n📍 DENVER, CO";

    #[tokio::test]
    async fn matching_subscribers_collected_once_each() {
        let store = Arc::new(FixedRuleStore::new(vec![
            (1, city_rule("LOUISVILLE", "KY", true)),
            (2, city_rule("CINCINNATI", "OH", true)),
            (3, city_rule("LOUISVILLE", "KY", true)),
        ]));
        let dispatcher = Dispatcher::new(store, DispatchPolicy::default());

        let mut ids: Vec<SubscriberId> = dispatcher
            .dispatch(POSTING)
            .await
            .unwrap()
            .iter()
            .map(|a| a.subscriber_id)
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn alert_payload_carries_original_text() {
        let store = Arc::new(FixedRuleStore::new(vec![(
            1,
            city_rule("LOUISVILLE", "KY", true),
        )]));
        let dispatcher = Dispatcher::new(store, DispatchPolicy::default());

        let alerts = dispatcher.dispatch(POSTING).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].payload.contains("LOAD MATCH"));
        assert!(alerts[0].payload.contains(POSTING));
    }

    #[tokio::test]
    async fn single_stop_posting_skips_store() {
        // A failing store proves dispatch never reached enumerate_active.
        let store = Arc::new(FixedRuleStore::failing());
        let dispatcher = Dispatcher::new(store, DispatchPolicy::default());

        let alerts = dispatcher.dispatch("📍 LOUISVILLE, KY only").await.unwrap();
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn store_failure_is_fatal_for_actionable_posting() {
        let store = Arc::new(FixedRuleStore::failing());
        let dispatcher = Dispatcher::new(store, DispatchPolicy::default());
        assert!(dispatcher.dispatch(POSTING).await.is_err());
    }

    #[tokio::test]
    async fn inert_rules_excluded_from_dispatch() {
        let mut dest_only = SubscriberRule::default();
        dest_only.destination_all = true;
        let store = Arc::new(FixedRuleStore::new(vec![
            (1, dest_only),
            (2, city_rule("LOUISVILLE", "KY", true)),
        ]));
        let dispatcher = Dispatcher::new(store, DispatchPolicy::default());

        let alerts = dispatcher.dispatch(POSTING).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].subscriber_id, 2);
    }

    #[tokio::test]
    async fn per_rule_scope_honors_legacy_flag() {
        // Origin city is the *third* stop: beyond the first two, so only
        // the `any` scope sees it.
        let mut any_rule = city_rule("DENVER", "CO", true);
        any_rule.origin_scope = OriginScope::Any;
        let first2_rule = city_rule("DENVER", "CO", true);

        let store = Arc::new(FixedRuleStore::new(vec![(1, any_rule), (2, first2_rule)]));
        let dispatcher = Dispatcher::new(store, DispatchPolicy::PerRuleScope);

        let posting = "📍 LOUISVILLE, KY\n📍 COLUMBUS, OH\n📍 DENVER, CO";
        let alerts = dispatcher.dispatch(posting).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].subscriber_id, 1);
    }

    #[tokio::test]
    async fn delivery_failure_does_not_block_others() {
        let store = Arc::new(FixedRuleStore::new(vec![
            (1, city_rule("LOUISVILLE", "KY", true)),
            (2, city_rule("LOUISVILLE", "KY", true)),
            (3, city_rule("LOUISVILLE", "KY", true)),
        ]));
        let dispatcher = Dispatcher::new(store, DispatchPolicy::default());
        let alerts = dispatcher.dispatch(POSTING).await.unwrap();
        assert_eq!(alerts.len(), 3);

        let sink = RecordingSink::failing_for(vec![2]);
        let delivered = dispatcher.deliver_all(&sink, &alerts).await;
        assert_eq!(delivered, 2);

        let mut got = sink.delivered.lock().unwrap().clone();
        got.sort_unstable();
        assert_eq!(got, vec![1, 3]);
    }

    #[tokio::test]
    async fn deliver_all_counts_successes() {
        let store = Arc::new(FixedRuleStore::new(vec![(
            7,
            city_rule("LOUISVILLE", "KY", true),
        )]));
        let dispatcher = Dispatcher::new(store, DispatchPolicy::default());
        let alerts = dispatcher.dispatch(POSTING).await.unwrap();

        let sink = RecordingSink::new();
        assert_eq!(dispatcher.deliver_all(&sink, &alerts).await, 1);
    }

    #[tokio::test]
    async fn probe_returns_matching_indices() {
        let store = Arc::new(FixedRuleStore::new(vec![]));
        let dispatcher = Dispatcher::new(store, DispatchPolicy::default());

        let texts = vec![
            "📍 LOUISVILLE, KY\n📍 DENVER, CO".to_string(),
            "no stops here".to_string(),
            "📍 CINCINNATI, OH\n📍 DALLAS, TX".to_string(),
            "📍 LOUISVILLE, KY\n📍 AUSTIN, TX".to_string(),
        ];
        let rule = city_rule("LOUISVILLE", "KY", true);

        let hits = dispatcher.probe(&texts, &rule, MatchPolicy::FirstStopOnly);
        assert_eq!(hits, vec![0, 3]);
    }

    #[tokio::test]
    async fn probe_inert_rule_matches_nothing() {
        let store = Arc::new(FixedRuleStore::new(vec![]));
        let dispatcher = Dispatcher::new(store, DispatchPolicy::default());

        let texts = vec!["📍 LOUISVILLE, KY\n📍 DENVER, CO".to_string()];
        let hits = dispatcher.probe(
            &texts,
            &SubscriberRule::default(),
            MatchPolicy::FirstStopOnly,
        );
        assert!(hits.is_empty());
    }
}
