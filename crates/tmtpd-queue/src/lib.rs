//! Per-node delivery queues and the presence mesh.
//!
//! Each authenticated node owns one durable queue backed by its on-disk
//! directory of hardlinked messages. A queue admits at most one attached
//! connection, delivers in id order, and removes a queue entry only
//! after the client acknowledges it. Presence (OHI) events ride the same
//! driver task but are advisory and unordered with respect to
//! deliveries.

mod doors;
mod ohi;
mod queue;
mod registry;
mod slot;

pub use doors::Doors;
pub use ohi::{OhiRegistry, OhiSet};
pub use queue::{OhiEvent, Queue, ACK_HANDOFF_TIMEOUT, OHI_FORWARD_TIMEOUT, QUEUE_ACK_TIMEOUT};
pub use registry::{NodeEntry, Registry};
pub use slot::{Conn, ConnSlot};
