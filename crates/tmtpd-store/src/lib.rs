//! Durable message store.
//!
//! A message is written once to `temp/<id>` and hardlinked into each
//! recipient node's queue directory, so fan-out costs file-system
//! metadata only. Every state change ends by fsyncing the directory that
//! now references the new name; recovery after a crash finds either the
//! state before the operation or after it, never a torn middle.

mod error;
mod idstore;
mod store;

pub use error::{StoreError, StoreResult};
pub use idstore::STORE_ID_INCR;
pub use store::Store;
