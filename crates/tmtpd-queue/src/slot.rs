//! Single-slot holder for a queue's attached connection.

use std::sync::{Arc, Mutex};

use tokio::io::AsyncWrite;
use tokio::sync::Notify;

/// The write side of an attached connection, shared between the link's
/// dispatch path and the queue's delivery driver. The mutex spans whole
/// frames, so concurrent writers never interleave mid-frame.
pub type Conn = Arc<tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Holds at most one attached connection.
///
/// The attachment CAS on the queue guarantees a single producer, so
/// `put` never displaces a live connection. Readers either peek (presence
/// forwarding, which drops events when no one is attached) or wait
/// (delivery, which must not proceed without a consumer).
#[derive(Default)]
pub struct ConnSlot {
    inner: Mutex<Option<Conn>>,
    notify: Notify,
}

impl ConnSlot {
    /// Creates an empty slot.
    pub fn new() -> ConnSlot {
        ConnSlot::default()
    }

    /// Publishes the attached connection and wakes waiters.
    pub fn put(&self, conn: Conn) {
        *self.inner.lock().expect("lock poisoned") = Some(conn);
        self.notify.notify_waiters();
    }

    /// Detaches, returning the connection if one was attached.
    pub fn take(&self) -> Option<Conn> {
        self.inner.lock().expect("lock poisoned").take()
    }

    /// The current connection without detaching it.
    pub fn peek(&self) -> Option<Conn> {
        self.inner.lock().expect("lock poisoned").clone()
    }

    /// Waits until a connection is attached and returns it, leaving it
    /// in the slot.
    pub async fn wait_conn(&self) -> Conn {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(conn) = self.peek() {
                return conn;
            }
            notified.await;
        }
    }
}
