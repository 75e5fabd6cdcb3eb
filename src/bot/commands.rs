//! Subscriber command surface.
//!
//! Routes direct-message text to rule mutations. Validation failures
//! become reply text for the subscriber; only store failures propagate
//! as errors.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::error::Result;
use crate::matching::dispatcher::Dispatcher;
use crate::matching::rule::{self, OriginScope, SubscriberRule};
use crate::matching::stops::SubscriberId;
use crate::store::RuleStore;

use super::session::{SessionState, Sessions};

/// How many recent postings are kept for `/testlast`.
const POSTING_HISTORY_LEN: usize = 10;

const HELP_TEXT: &str = "\
Load alert commands:

Origin points (where loads start):
/addfrom City, ST — alert on loads picking up here
/removefrom City, ST — remove an origin point
/clearfrom — remove all origin points
/addfromstate ST — alert on any pickup in a state
/removefromstate ST — remove an origin state
/clearfromstates — remove all origin states
/fromscope first2|any — legacy origin matching scope

Destinations (where loads end):
/addto ST — alert on loads delivering to a state
/removeto ST — remove a destination state
/clearto — remove all destination states
/toall [on|off] — match every destination

Other:
/list — show your current rule
/testlast [N] — replay the last N postings against your rule
/cancel — abandon a pending prompt";

/// Routes subscriber commands to rule mutations and renders replies.
pub struct CommandRouter {
    store: Arc<dyn RuleStore>,
    dispatcher: Arc<Dispatcher>,
    sessions: Sessions,
    recent_postings: Mutex<VecDeque<String>>,
}

impl CommandRouter {
    pub fn new(store: Arc<dyn RuleStore>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            sessions: Sessions::new(),
            recent_postings: Mutex::new(VecDeque::new()),
        }
    }

    /// Record a channel posting for later `/testlast` replay.
    pub fn record_posting(&self, text: &str) {
        let mut recent = self.recent_postings.lock().expect("history lock poisoned");
        if recent.len() == POSTING_HISTORY_LEN {
            recent.pop_front();
        }
        recent.push_back(text.to_string());
    }

    /// Handle one direct message and return the reply text.
    pub async fn handle(&self, subscriber_id: SubscriberId, text: &str) -> Result<String> {
        let text = text.trim();

        // Any slash command cancels a pending prompt.
        if text.starts_with('/') {
            self.sessions.take(subscriber_id);
            return self.handle_command(subscriber_id, text).await;
        }

        match self.sessions.take(subscriber_id) {
            SessionState::Idle => Ok("Unrecognized input. Send /help for commands.".to_string()),
            SessionState::AwaitingOriginCity => self.finish_add_origin_city(subscriber_id, text).await,
            SessionState::AwaitingOriginState => {
                self.finish_add_origin_state(subscriber_id, text).await
            }
            SessionState::AwaitingDestinationState => {
                self.finish_add_destination_state(subscriber_id, text).await
            }
        }
    }

    async fn handle_command(&self, subscriber_id: SubscriberId, text: &str) -> Result<String> {
        let (command, arg) = match text.split_once(char::is_whitespace) {
            Some((cmd, rest)) => (cmd, rest.trim()),
            None => (text, ""),
        };
        let command = command.to_lowercase();
        info!(subscriber_id, command = %command, "Handling command");

        match command.as_str() {
            "/start" | "/help" => Ok(HELP_TEXT.to_string()),
            "/cancel" => Ok("Cancelled. Send /help for commands.".to_string()),
            "/list" => {
                let rule = self.store.load_rule(subscriber_id).await?;
                Ok(format_view(&rule))
            }

            // ── Origin cities ───────────────────────────────────────
            "/addfrom" => {
                if arg.is_empty() {
                    self.sessions.set(subscriber_id, SessionState::AwaitingOriginCity);
                    return Ok("Send the origin point as City, ST (e.g. Louisville, KY). \
                               /cancel to abort."
                        .to_string());
                }
                self.finish_add_origin_city(subscriber_id, arg).await
            }
            "/removefrom" => {
                if arg.is_empty() {
                    return Ok("Usage: /removefrom City, ST".to_string());
                }
                let stop = match rule::parse_city_state(arg) {
                    Ok(stop) => stop,
                    Err(e) => return Ok(e.to_string()),
                };
                self.store.remove_origin_city(subscriber_id, &stop).await?;
                Ok(format!("Removed origin point {stop}."))
            }
            "/clearfrom" => {
                self.store.clear_origin_cities(subscriber_id).await?;
                Ok("Cleared all origin points.".to_string())
            }
            "/fromscope" => {
                if arg.is_empty() {
                    return Ok("Usage: /fromscope first2|any".to_string());
                }
                let scope = match OriginScope::parse(arg) {
                    Ok(scope) => scope,
                    Err(e) => return Ok(e.to_string()),
                };
                self.store.set_origin_scope(subscriber_id, scope).await?;
                Ok(format!("Origin scope set to {}.", scope.as_str()))
            }

            // ── Origin states ───────────────────────────────────────
            "/addfromstate" => {
                if arg.is_empty() {
                    self.sessions
                        .set(subscriber_id, SessionState::AwaitingOriginState);
                    return Ok(
                        "Send the origin state as 2 letters (e.g. KY). /cancel to abort."
                            .to_string(),
                    );
                }
                self.finish_add_origin_state(subscriber_id, arg).await
            }
            "/removefromstate" => {
                if arg.is_empty() {
                    return Ok("Usage: /removefromstate ST".to_string());
                }
                let state = match rule::normalize_state(arg) {
                    Ok(state) => state,
                    Err(e) => return Ok(e.to_string()),
                };
                self.store.remove_origin_state(subscriber_id, &state).await?;
                Ok(format!("Removed origin state {state}."))
            }
            "/clearfromstates" => {
                self.store.clear_origin_states(subscriber_id).await?;
                Ok("Cleared all origin states.".to_string())
            }

            // ── Destination states ──────────────────────────────────
            "/addto" => {
                if arg.is_empty() {
                    self.sessions
                        .set(subscriber_id, SessionState::AwaitingDestinationState);
                    return Ok(
                        "Send the destination state as 2 letters (e.g. CO). /cancel to abort."
                            .to_string(),
                    );
                }
                self.finish_add_destination_state(subscriber_id, arg).await
            }
            "/removeto" => {
                if arg.is_empty() {
                    return Ok("Usage: /removeto ST".to_string());
                }
                let state = match rule::normalize_state(arg) {
                    Ok(state) => state,
                    Err(e) => return Ok(e.to_string()),
                };
                self.store
                    .remove_destination_state(subscriber_id, &state)
                    .await?;
                Ok(format!("Removed destination state {state}."))
            }
            "/clearto" => {
                self.store.clear_destination_states(subscriber_id).await?;
                Ok("Cleared all destination states.".to_string())
            }
            "/toall" => {
                // Bare /toall toggles; an explicit on/off sets.
                let enabled = match arg.to_lowercase().as_str() {
                    "" => !self.store.load_rule(subscriber_id).await?.destination_all,
                    "on" => true,
                    "off" => false,
                    _ => return Ok("Usage: /toall [on|off]".to_string()),
                };
                self.store.set_destination_all(subscriber_id, enabled).await?;
                Ok(if enabled {
                    "Now matching loads to ALL destination states.".to_string()
                } else {
                    "Now matching only your listed destination states.".to_string()
                })
            }

            "/testlast" => self.test_last(subscriber_id, arg).await,

            _ => Ok("Unknown command. Send /help for commands.".to_string()),
        }
    }

    // ── Prompted-input completions ──────────────────────────────────

    async fn finish_add_origin_city(
        &self,
        subscriber_id: SubscriberId,
        input: &str,
    ) -> Result<String> {
        let stop = match rule::parse_city_state(input) {
            Ok(stop) => stop,
            Err(e) => {
                self.sessions
                    .set(subscriber_id, SessionState::AwaitingOriginCity);
                return Ok(format!("{e}\nTry again, or /cancel."));
            }
        };
        self.store.add_origin_city(subscriber_id, &stop).await?;
        Ok(format!("Added origin point {stop}."))
    }

    async fn finish_add_origin_state(
        &self,
        subscriber_id: SubscriberId,
        input: &str,
    ) -> Result<String> {
        let state = match rule::normalize_state(input) {
            Ok(state) => state,
            Err(e) => {
                self.sessions
                    .set(subscriber_id, SessionState::AwaitingOriginState);
                return Ok(format!("{e}\nTry again, or /cancel."));
            }
        };
        self.store.add_origin_state(subscriber_id, &state).await?;
        Ok(format!("Added origin state {state}."))
    }

    async fn finish_add_destination_state(
        &self,
        subscriber_id: SubscriberId,
        input: &str,
    ) -> Result<String> {
        let state = match rule::normalize_state(input) {
            Ok(state) => state,
            Err(e) => {
                self.sessions
                    .set(subscriber_id, SessionState::AwaitingDestinationState);
                return Ok(format!("{e}\nTry again, or /cancel."));
            }
        };
        self.store
            .add_destination_state(subscriber_id, &state)
            .await?;
        Ok(format!("Added destination state {state}."))
    }

    // ── /testlast ───────────────────────────────────────────────────

    async fn test_last(&self, subscriber_id: SubscriberId, arg: &str) -> Result<String> {
        let count = if arg.is_empty() {
            POSTING_HISTORY_LEN
        } else {
            match arg.parse::<usize>() {
                Ok(n) => n.clamp(1, 200),
                Err(_) => return Ok("Usage: /testlast [N]".to_string()),
            }
        };

        let rule = self.store.load_rule(subscriber_id).await?;
        if rule.is_inert() {
            return Ok(
                "Your rule has no origin points yet, so nothing can match. \
                 Add one with /addfrom."
                    .to_string(),
            );
        }

        let texts: Vec<String> = {
            let recent = self.recent_postings.lock().expect("history lock poisoned");
            let skip = recent.len().saturating_sub(count);
            recent.iter().skip(skip).cloned().collect()
        };
        if texts.is_empty() {
            return Ok("No postings seen since startup.".to_string());
        }

        let policy = self.dispatcher.policy_for(&rule);
        let hits = self.dispatcher.probe(&texts, &rule, policy);
        if hits.is_empty() {
            return Ok(format!(
                "None of the last {} postings match your rule.",
                texts.len()
            ));
        }

        let mut reply = format!(
            "{} of the last {} postings match your rule:",
            hits.len(),
            texts.len()
        );
        for i in hits {
            reply.push_str("\n\n---\n");
            reply.push_str(&texts[i]);
        }
        Ok(reply)
    }
}

// ── Rule rendering ──────────────────────────────────────────────────

/// Title-case a stored (uppercase) city name for display.
fn title_city(city: &str) -> String {
    city.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_string() + &chars.as_str().to_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render a subscriber's rule for the `/list` reply.
fn format_view(rule: &SubscriberRule) -> String {
    let mut out = String::from("Your load alert rule:\n");

    out.push_str("\nOrigin points:\n");
    if rule.origin_cities.is_empty() {
        out.push_str("  (none)\n");
    } else {
        for stop in &rule.origin_cities {
            out.push_str(&format!("  {}, {}\n", title_city(&stop.city), stop.state));
        }
    }

    if !rule.origin_states.is_empty() {
        out.push_str("\nOrigin states:\n");
        for state in &rule.origin_states {
            out.push_str(&format!("  {state}\n"));
        }
    }

    out.push_str("\nDestinations:\n");
    if rule.destination_all {
        out.push_str("  ALL STATES\n");
    } else if rule.destination_states.is_empty() {
        out.push_str("  (none)\n");
    } else {
        for state in &rule.destination_states {
            out.push_str(&format!("  {state}\n"));
        }
    }

    out.push_str(&format!("\nOrigin scope: {}", rule.origin_scope.as_str()));

    if rule.is_inert() {
        out.push_str("\n\n⚠️ No origin points or states — you will not receive alerts.");
    }
    out
}
