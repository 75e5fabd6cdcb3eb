//! Transport layer — inbound event sources and outbound delivery sinks.

pub mod channel;
pub mod telegram;

pub use channel::{
    CommandEvent, EventStream, InboundEvent, PostingEvent, PostingSource, SubscriberChannel,
};
pub use telegram::TelegramChannel;
