//! The TMTP server engine.
//!
//! Wires the protocol state machine (`link`) to the message store, the
//! user directory, and the per-node queues, and fronts it all with a
//! TLS listener. The binary entry point lives in `main.rs`; everything
//! here is also driven in-process by the test harness.

pub mod clock;
pub mod config;
pub mod deadline;
pub mod error;
pub mod link;
pub mod listener;
pub mod post;
pub mod tls;

pub use clock::Clock;
pub use config::Config;
pub use error::{ServerError, ServerResult};
pub use link::{spawn_link, LinkCtx};
pub use listener::serve;
