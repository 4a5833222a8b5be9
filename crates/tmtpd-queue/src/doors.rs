//! Process-wide quiescence doors.

use std::sync::Arc;

use tokio::sync::RwLock;

/// Two read/write locks read-acquired on the hot paths: `send` around
/// each delivery, `recv` around each request dispatch. Only
/// [`Doors::suspend`] ever write-acquires them, blocking all further
/// traffic so shutdown can proceed with the disk quiet.
#[derive(Clone, Default)]
pub struct Doors {
    /// Guards deliveries to clients.
    pub send: Arc<RwLock<()>>,
    /// Guards inbound request dispatch.
    pub recv: Arc<RwLock<()>>,
}

impl Doors {
    /// Creates open doors.
    pub fn new() -> Doors {
        Doors::default()
    }

    /// Closes both doors permanently. Returns once every in-flight
    /// dispatch and delivery has drained.
    pub async fn suspend(&self) {
        std::mem::forget(self.send.clone().write_owned().await);
        std::mem::forget(self.recv.clone().write_owned().await);
    }
}
