//! Test infrastructure for the TMTP server.
//!
//! `client` is a synthetic TMTP client speaking the framed protocol
//! over any async stream; `harness` boots a real server (store,
//! directory, queues, TLS listener) on a loopback port against
//! scratch directories. The scenario modules exercise the end-to-end
//! delivery, group, presence, and durability guarantees.

pub mod client;
pub mod harness;

mod durability;
mod groups;
mod liveness;
mod presence;
mod scenarios;
