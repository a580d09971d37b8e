//! Notification distribution for workflow lifecycle events.
//!
//! `EventBus` broadcasts `Notification`s to in-process subscribers via a
//! `tokio::sync::broadcast` channel. `FanoutNotifier` forwards each
//! publication to several notifiers (e.g. the bus plus a webhook).

pub mod bus;
pub mod fanout;

pub use bus::EventBus;
pub use fanout::FanoutNotifier;
