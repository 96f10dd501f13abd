//! Named, durable event queues
//!
//! A [`QueueStore`] is a single ordered buffer of pending events with its own
//! append/readiness policy and snapshot file; the [`QueueRegistry`] owns the
//! identifier-to-store mapping and is the single serialization point for
//! registry-shape mutations.

mod registry;
mod store;

pub use registry::QueueRegistry;
pub use store::QueueStore;
