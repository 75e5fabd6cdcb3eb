//! Load Alerts — Telegram load-posting alert service.
//!
//! Watches a load-board channel, extracts 📍 stop waypoints from each
//! posting, evaluates them against per-subscriber origin/destination
//! rules, and delivers match alerts by direct message.

pub mod bot;
pub mod channels;
pub mod config;
pub mod error;
pub mod matching;
pub mod store;
