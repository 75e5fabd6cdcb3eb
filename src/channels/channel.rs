//! Channel abstraction — event source and delivery sink traits.
//!
//! Transports are pure I/O: they convert their native update format into
//! `InboundEvent`s and push approved alert text back out. Parsing and
//! matching live in `matching`.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;

use crate::error::ChannelError;
use crate::matching::stops::SubscriberId;

/// A new load posting observed on the watched channel.
#[derive(Debug, Clone)]
pub struct PostingEvent {
    /// Raw posting text.
    pub text: String,
    /// When the transport saw it.
    pub received_at: DateTime<Utc>,
}

/// A direct message from a subscriber (command surface).
#[derive(Debug, Clone)]
pub struct CommandEvent {
    pub subscriber_id: SubscriberId,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

/// Unified inbound event from a transport.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    Posting(PostingEvent),
    Command(CommandEvent),
}

/// Stream of inbound events. Ends only when the transport shuts down —
/// a fatal condition for the listening process, not for the matching core.
pub type EventStream = Pin<Box<dyn Stream<Item = InboundEvent> + Send>>;

/// Source of inbound events (channel postings + subscriber commands).
#[async_trait]
pub trait PostingSource: Send + Sync {
    /// Transport name (e.g. "telegram").
    fn name(&self) -> &str;

    /// Begin listening and return the event stream.
    async fn start(&self) -> Result<EventStream, ChannelError>;
}

/// Outbound delivery sink for per-subscriber alert and reply text.
#[async_trait]
pub trait SubscriberChannel: Send + Sync {
    /// Transport name (e.g. "telegram").
    fn name(&self) -> &str;

    /// Deliver `text` to one subscriber. Failure is per-subscriber and
    /// non-fatal to the caller's loop.
    async fn deliver(&self, subscriber_id: SubscriberId, text: &str)
        -> Result<(), ChannelError>;

    /// Verify the transport is reachable.
    async fn health_check(&self) -> Result<(), ChannelError>;
}
