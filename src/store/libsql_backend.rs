//! libSQL backend — async `RuleStore` trait implementation.
//!
//! Supports local file and in-memory databases. Every mutation first
//! ensures the subscriber's config row exists, so rules are lazily
//! instantiated with all-empty defaults.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;

use crate::error::StoreError;
use crate::matching::rule::{OriginScope, SubscriberRule};
use crate::matching::stops::{Stop, SubscriberId};
use crate::store::migrations;
use crate::store::traits::RuleStore;

/// libSQL rule store backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use;
/// per-subscriber rule records are the unit of atomicity.
pub struct LibSqlRuleStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlRuleStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Open(format!("Failed to create store directory: {e}")))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&store.conn).await?;
        info!(path = %path.display(), "Rule store opened");
        Ok(store)
    }

    /// Create an in-memory store (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&store.conn).await?;
        Ok(store)
    }

    /// Create the subscriber's config row if it doesn't exist yet.
    async fn ensure_subscriber(&self, subscriber_id: SubscriberId) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO subscriber_config (subscriber_id) VALUES (?1)",
                params![subscriber_id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn touch(&self, subscriber_id: SubscriberId) -> Result<(), StoreError> {
        self.conn
            .execute(
                "UPDATE subscriber_config SET updated_at = datetime('now') WHERE subscriber_id = ?1",
                params![subscriber_id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }
}

fn query_err(e: libsql::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

fn scope_from_db(s: &str) -> OriginScope {
    // Unknown values fall back to the default rather than failing a read.
    OriginScope::parse(s).unwrap_or_default()
}

#[async_trait]
impl RuleStore for LibSqlRuleStore {
    async fn run_migrations(&self) -> Result<(), StoreError> {
        migrations::run_migrations(&self.conn).await
    }

    async fn load_rule(&self, subscriber_id: SubscriberId) -> Result<SubscriberRule, StoreError> {
        self.ensure_subscriber(subscriber_id).await?;

        let mut rows = self
            .conn
            .query(
                "SELECT destination_all, origin_scope FROM subscriber_config WHERE subscriber_id = ?1",
                params![subscriber_id],
            )
            .await
            .map_err(query_err)?;
        let row = rows
            .next()
            .await
            .map_err(query_err)?
            .ok_or_else(|| StoreError::Query("subscriber row missing after ensure".into()))?;

        let destination_all: i64 = row.get(0).map_err(query_err)?;
        let scope_str: String = row.get(1).map_err(query_err)?;

        let mut rule = SubscriberRule {
            destination_all: destination_all != 0,
            origin_scope: scope_from_db(&scope_str),
            ..Default::default()
        };

        let mut rows = self
            .conn
            .query(
                "SELECT city, state FROM origin_cities WHERE subscriber_id = ?1",
                params![subscriber_id],
            )
            .await
            .map_err(query_err)?;
        while let Some(row) = rows.next().await.map_err(query_err)? {
            let city: String = row.get(0).map_err(query_err)?;
            let state: String = row.get(1).map_err(query_err)?;
            rule.origin_cities.insert(Stop { city, state });
        }

        let mut rows = self
            .conn
            .query(
                "SELECT state FROM origin_states WHERE subscriber_id = ?1",
                params![subscriber_id],
            )
            .await
            .map_err(query_err)?;
        while let Some(row) = rows.next().await.map_err(query_err)? {
            let state: String = row.get(0).map_err(query_err)?;
            rule.origin_states.insert(state);
        }

        let mut rows = self
            .conn
            .query(
                "SELECT state FROM destination_states WHERE subscriber_id = ?1",
                params![subscriber_id],
            )
            .await
            .map_err(query_err)?;
        while let Some(row) = rows.next().await.map_err(query_err)? {
            let state: String = row.get(0).map_err(query_err)?;
            rule.destination_states.insert(state);
        }

        Ok(rule)
    }

    async fn enumerate_active(
        &self,
    ) -> Result<Vec<(SubscriberId, SubscriberRule)>, StoreError> {
        let mut configs: HashMap<SubscriberId, SubscriberRule> = HashMap::new();

        let mut rows = self
            .conn
            .query(
                "SELECT subscriber_id, destination_all, origin_scope FROM subscriber_config",
                (),
            )
            .await
            .map_err(query_err)?;
        while let Some(row) = rows.next().await.map_err(query_err)? {
            let id: i64 = row.get(0).map_err(query_err)?;
            let destination_all: i64 = row.get(1).map_err(query_err)?;
            let scope_str: String = row.get(2).map_err(query_err)?;
            configs.insert(
                id,
                SubscriberRule {
                    destination_all: destination_all != 0,
                    origin_scope: scope_from_db(&scope_str),
                    ..Default::default()
                },
            );
        }

        let mut rows = self
            .conn
            .query("SELECT subscriber_id, city, state FROM origin_cities", ())
            .await
            .map_err(query_err)?;
        while let Some(row) = rows.next().await.map_err(query_err)? {
            let id: i64 = row.get(0).map_err(query_err)?;
            let city: String = row.get(1).map_err(query_err)?;
            let state: String = row.get(2).map_err(query_err)?;
            if let Some(rule) = configs.get_mut(&id) {
                rule.origin_cities.insert(Stop { city, state });
            }
        }

        let mut rows = self
            .conn
            .query("SELECT subscriber_id, state FROM origin_states", ())
            .await
            .map_err(query_err)?;
        while let Some(row) = rows.next().await.map_err(query_err)? {
            let id: i64 = row.get(0).map_err(query_err)?;
            let state: String = row.get(1).map_err(query_err)?;
            if let Some(rule) = configs.get_mut(&id) {
                rule.origin_states.insert(state);
            }
        }

        let mut rows = self
            .conn
            .query("SELECT subscriber_id, state FROM destination_states", ())
            .await
            .map_err(query_err)?;
        while let Some(row) = rows.next().await.map_err(query_err)? {
            let id: i64 = row.get(0).map_err(query_err)?;
            let state: String = row.get(1).map_err(query_err)?;
            if let Some(rule) = configs.get_mut(&id) {
                rule.destination_states.insert(state);
            }
        }

        // Inert rules are excluded here, so dispatch never sees them.
        Ok(configs
            .into_iter()
            .filter(|(_, rule)| !rule.is_inert())
            .collect())
    }

    async fn add_origin_city(
        &self,
        subscriber_id: SubscriberId,
        stop: &Stop,
    ) -> Result<(), StoreError> {
        self.ensure_subscriber(subscriber_id).await?;
        self.conn
            .execute(
                "INSERT OR IGNORE INTO origin_cities (subscriber_id, city, state) VALUES (?1, ?2, ?3)",
                params![subscriber_id, stop.city.as_str(), stop.state.as_str()],
            )
            .await
            .map_err(query_err)?;
        self.touch(subscriber_id).await
    }

    async fn remove_origin_city(
        &self,
        subscriber_id: SubscriberId,
        stop: &Stop,
    ) -> Result<(), StoreError> {
        self.ensure_subscriber(subscriber_id).await?;
        self.conn
            .execute(
                "DELETE FROM origin_cities WHERE subscriber_id = ?1 AND city = ?2 AND state = ?3",
                params![subscriber_id, stop.city.as_str(), stop.state.as_str()],
            )
            .await
            .map_err(query_err)?;
        self.touch(subscriber_id).await
    }

    async fn clear_origin_cities(&self, subscriber_id: SubscriberId) -> Result<(), StoreError> {
        self.ensure_subscriber(subscriber_id).await?;
        self.conn
            .execute(
                "DELETE FROM origin_cities WHERE subscriber_id = ?1",
                params![subscriber_id],
            )
            .await
            .map_err(query_err)?;
        self.touch(subscriber_id).await
    }

    async fn add_origin_state(
        &self,
        subscriber_id: SubscriberId,
        state: &str,
    ) -> Result<(), StoreError> {
        self.ensure_subscriber(subscriber_id).await?;
        self.conn
            .execute(
                "INSERT OR IGNORE INTO origin_states (subscriber_id, state) VALUES (?1, ?2)",
                params![subscriber_id, state],
            )
            .await
            .map_err(query_err)?;
        self.touch(subscriber_id).await
    }

    async fn remove_origin_state(
        &self,
        subscriber_id: SubscriberId,
        state: &str,
    ) -> Result<(), StoreError> {
        self.ensure_subscriber(subscriber_id).await?;
        self.conn
            .execute(
                "DELETE FROM origin_states WHERE subscriber_id = ?1 AND state = ?2",
                params![subscriber_id, state],
            )
            .await
            .map_err(query_err)?;
        self.touch(subscriber_id).await
    }

    async fn clear_origin_states(&self, subscriber_id: SubscriberId) -> Result<(), StoreError> {
        self.ensure_subscriber(subscriber_id).await?;
        self.conn
            .execute(
                "DELETE FROM origin_states WHERE subscriber_id = ?1",
                params![subscriber_id],
            )
            .await
            .map_err(query_err)?;
        self.touch(subscriber_id).await
    }

    async fn add_destination_state(
        &self,
        subscriber_id: SubscriberId,
        state: &str,
    ) -> Result<(), StoreError> {
        self.ensure_subscriber(subscriber_id).await?;
        self.conn
            .execute(
                "INSERT OR IGNORE INTO destination_states (subscriber_id, state) VALUES (?1, ?2)",
                params![subscriber_id, state],
            )
            .await
            .map_err(query_err)?;
        self.touch(subscriber_id).await
    }

    async fn remove_destination_state(
        &self,
        subscriber_id: SubscriberId,
        state: &str,
    ) -> Result<(), StoreError> {
        self.ensure_subscriber(subscriber_id).await?;
        self.conn
            .execute(
                "DELETE FROM destination_states WHERE subscriber_id = ?1 AND state = ?2",
                params![subscriber_id, state],
            )
            .await
            .map_err(query_err)?;
        self.touch(subscriber_id).await
    }

    async fn clear_destination_states(
        &self,
        subscriber_id: SubscriberId,
    ) -> Result<(), StoreError> {
        self.ensure_subscriber(subscriber_id).await?;
        self.conn
            .execute(
                "DELETE FROM destination_states WHERE subscriber_id = ?1",
                params![subscriber_id],
            )
            .await
            .map_err(query_err)?;
        self.touch(subscriber_id).await
    }

    async fn set_destination_all(
        &self,
        subscriber_id: SubscriberId,
        enabled: bool,
    ) -> Result<(), StoreError> {
        self.ensure_subscriber(subscriber_id).await?;
        self.conn
            .execute(
                "UPDATE subscriber_config SET destination_all = ?1, updated_at = datetime('now') WHERE subscriber_id = ?2",
                params![if enabled { 1i64 } else { 0i64 }, subscriber_id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn set_origin_scope(
        &self,
        subscriber_id: SubscriberId,
        scope: OriginScope,
    ) -> Result<(), StoreError> {
        self.ensure_subscriber(subscriber_id).await?;
        self.conn
            .execute(
                "UPDATE subscriber_config SET origin_scope = ?1, updated_at = datetime('now') WHERE subscriber_id = ?2",
                params![scope.as_str(), subscriber_id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> LibSqlRuleStore {
        LibSqlRuleStore::new_memory().await.unwrap()
    }

    #[tokio::test]
    async fn load_rule_creates_empty_default() {
        let s = store().await;
        let rule = s.load_rule(100).await.unwrap();
        assert_eq!(rule, SubscriberRule::default());
        assert!(rule.is_inert());
    }

    #[tokio::test]
    async fn add_origin_city_round_trips() {
        let s = store().await;
        s.add_origin_city(1, &Stop::new("Louisville", "KY"))
            .await
            .unwrap();

        let rule = s.load_rule(1).await.unwrap();
        assert!(rule.origin_cities.contains(&Stop::new("LOUISVILLE", "KY")));
        assert!(!rule.is_inert());
    }

    #[tokio::test]
    async fn adding_same_origin_city_twice_is_noop() {
        let s = store().await;
        let stop = Stop::new("LOUISVILLE", "KY");
        s.add_origin_city(1, &stop).await.unwrap();
        s.add_origin_city(1, &stop).await.unwrap();

        let rule = s.load_rule(1).await.unwrap();
        assert_eq!(rule.origin_cities.len(), 1);
    }

    #[tokio::test]
    async fn removing_absent_state_is_noop() {
        let s = store().await;
        s.add_destination_state(1, "CO").await.unwrap();
        s.remove_destination_state(1, "TX").await.unwrap();

        let rule = s.load_rule(1).await.unwrap();
        assert_eq!(rule.destination_states.len(), 1);
        assert!(rule.destination_states.contains("CO"));
    }

    #[tokio::test]
    async fn clear_operations_empty_their_sets() {
        let s = store().await;
        s.add_origin_city(1, &Stop::new("LOUISVILLE", "KY"))
            .await
            .unwrap();
        s.add_origin_state(1, "KY").await.unwrap();
        s.add_destination_state(1, "CO").await.unwrap();

        s.clear_origin_cities(1).await.unwrap();
        s.clear_origin_states(1).await.unwrap();
        s.clear_destination_states(1).await.unwrap();

        let rule = s.load_rule(1).await.unwrap();
        assert!(rule.origin_cities.is_empty());
        assert!(rule.origin_states.is_empty());
        assert!(rule.destination_states.is_empty());
        assert!(rule.is_inert());
    }

    #[tokio::test]
    async fn enumerate_active_excludes_inert_rules() {
        let s = store().await;
        // Subscriber 1: active via origin city.
        s.add_origin_city(1, &Stop::new("LOUISVILLE", "KY"))
            .await
            .unwrap();
        // Subscriber 2: active via origin state only.
        s.add_origin_state(2, "OH").await.unwrap();
        // Subscriber 3: destination-only — inert.
        s.add_destination_state(3, "CO").await.unwrap();
        s.set_destination_all(3, true).await.unwrap();
        // Subscriber 4: touched but empty — inert.
        let _ = s.load_rule(4).await.unwrap();

        let mut active = s.enumerate_active().await.unwrap();
        active.sort_by_key(|(id, _)| *id);
        let ids: Vec<i64> = active.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn enumerate_returns_full_rule_records() {
        let s = store().await;
        s.add_origin_city(7, &Stop::new("LOUISVILLE", "KY"))
            .await
            .unwrap();
        s.add_destination_state(7, "CO").await.unwrap();
        s.set_destination_all(7, false).await.unwrap();
        s.set_origin_scope(7, OriginScope::Any).await.unwrap();

        let active = s.enumerate_active().await.unwrap();
        assert_eq!(active.len(), 1);
        let (id, rule) = &active[0];
        assert_eq!(*id, 7);
        assert!(rule.origin_cities.contains(&Stop::new("LOUISVILLE", "KY")));
        assert!(rule.destination_states.contains("CO"));
        assert!(!rule.destination_all);
        assert_eq!(rule.origin_scope, OriginScope::Any);
    }

    #[tokio::test]
    async fn destination_all_toggle_persists() {
        let s = store().await;
        s.set_destination_all(5, true).await.unwrap();
        assert!(s.load_rule(5).await.unwrap().destination_all);
        s.set_destination_all(5, false).await.unwrap();
        assert!(!s.load_rule(5).await.unwrap().destination_all);
    }

    #[tokio::test]
    async fn scope_persists() {
        let s = store().await;
        s.set_origin_scope(6, OriginScope::Any).await.unwrap();
        assert_eq!(s.load_rule(6).await.unwrap().origin_scope, OriginScope::Any);
    }

    #[tokio::test]
    async fn rules_are_isolated_per_subscriber() {
        let s = store().await;
        s.add_origin_city(1, &Stop::new("LOUISVILLE", "KY"))
            .await
            .unwrap();
        s.add_origin_city(2, &Stop::new("CINCINNATI", "OH"))
            .await
            .unwrap();

        let rule1 = s.load_rule(1).await.unwrap();
        let rule2 = s.load_rule(2).await.unwrap();
        assert_eq!(rule1.origin_cities.len(), 1);
        assert_eq!(rule2.origin_cities.len(), 1);
        assert!(rule1.origin_cities.contains(&Stop::new("LOUISVILLE", "KY")));
        assert!(rule2.origin_cities.contains(&Stop::new("CINCINNATI", "OH")));
    }

    #[tokio::test]
    async fn local_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.db");

        {
            let s = LibSqlRuleStore::new_local(&path).await.unwrap();
            s.add_origin_city(9, &Stop::new("LOUISVILLE", "KY"))
                .await
                .unwrap();
        }

        let s = LibSqlRuleStore::new_local(&path).await.unwrap();
        let rule = s.load_rule(9).await.unwrap();
        assert!(rule.origin_cities.contains(&Stop::new("LOUISVILLE", "KY")));
    }
}
