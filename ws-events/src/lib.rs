//! Lifecycle event bus.

pub mod bus;
pub mod event;

pub use bus::{BackpressurePolicy, BusConfig, EventBus, Subscription, SubscriptionId, DEFAULT_CAPACITY};
pub use event::{Event, EventName, EventPayload};
