//! Notification pipeline: appointment change events land in the
//! `notification_outbox` table (written in the same transaction as the
//! appointment itself), a background worker routes each event to a trigger
//! condition, resolves the active templates for it, and hands the rendered
//! message to the channel dispatcher. Every dispatch leaves exactly one
//! `sent_messages` row.
//!
//! Nothing in here ever propagates an error back to the booking path.

pub mod channel;
pub mod outbox;
pub mod template;
pub mod trigger;

pub use channel::{Channel, ChannelSender, Delivery, Dispatcher, EmailSender, TelegramSender};
pub use trigger::{EventType, TriggerCondition};
