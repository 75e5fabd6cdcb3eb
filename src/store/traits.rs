//! `RuleStore` trait — single async interface for subscriber rule persistence.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::matching::rule::{OriginScope, SubscriberRule};
use crate::matching::stops::{Stop, SubscriberId};

/// Backend-agnostic store for per-subscriber alerting rules.
///
/// The store is the sole writer of rule records; validation of mutation
/// input happens before this boundary (`matching::rule`), so every value
/// arriving here is already normalized. All mutations are idempotent:
/// adding a present member or removing an absent one is a no-op.
///
/// Reads return defensive copies — an enumeration sees a consistent
/// snapshot per rule record, never a half-mutated rule.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), StoreError>;

    /// Load one subscriber's rule, creating an all-empty default record
    /// on first access.
    async fn load_rule(&self, subscriber_id: SubscriberId) -> Result<SubscriberRule, StoreError>;

    /// Enumerate all non-inert rules (subscribers with at least one
    /// origin city or origin state).
    async fn enumerate_active(&self)
        -> Result<Vec<(SubscriberId, SubscriberRule)>, StoreError>;

    // ── Origin cities ───────────────────────────────────────────────

    async fn add_origin_city(
        &self,
        subscriber_id: SubscriberId,
        stop: &Stop,
    ) -> Result<(), StoreError>;

    async fn remove_origin_city(
        &self,
        subscriber_id: SubscriberId,
        stop: &Stop,
    ) -> Result<(), StoreError>;

    async fn clear_origin_cities(&self, subscriber_id: SubscriberId) -> Result<(), StoreError>;

    // ── Origin states ───────────────────────────────────────────────

    async fn add_origin_state(
        &self,
        subscriber_id: SubscriberId,
        state: &str,
    ) -> Result<(), StoreError>;

    async fn remove_origin_state(
        &self,
        subscriber_id: SubscriberId,
        state: &str,
    ) -> Result<(), StoreError>;

    async fn clear_origin_states(&self, subscriber_id: SubscriberId) -> Result<(), StoreError>;

    // ── Destination states ──────────────────────────────────────────

    async fn add_destination_state(
        &self,
        subscriber_id: SubscriberId,
        state: &str,
    ) -> Result<(), StoreError>;

    async fn remove_destination_state(
        &self,
        subscriber_id: SubscriberId,
        state: &str,
    ) -> Result<(), StoreError>;

    async fn clear_destination_states(
        &self,
        subscriber_id: SubscriberId,
    ) -> Result<(), StoreError>;

    // ── Flags ───────────────────────────────────────────────────────

    async fn set_destination_all(
        &self,
        subscriber_id: SubscriberId,
        enabled: bool,
    ) -> Result<(), StoreError>;

    async fn set_origin_scope(
        &self,
        subscriber_id: SubscriberId,
        scope: OriginScope,
    ) -> Result<(), StoreError>;
}
