//! Monotonic message-id allocation with crash-safe persistence.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::error;

use crate::error::{StoreError, StoreResult};

/// Flush interval for the id counter. The persisted value carries a
/// `2 * STORE_ID_INCR` margin, so a counter recovered from disk is always
/// ahead of any id handed out before the crash.
pub const STORE_ID_INCR: u64 = 1000;

const NEXTID_FILE: &str = "NEXTID";

#[derive(Debug)]
pub(crate) struct IdStore {
    next_id: Arc<AtomicU64>,
    flush_tx: mpsc::UnboundedSender<u64>,
}

impl IdStore {
    /// Loads (or creates) the NEXTID file, writes the recovery margin,
    /// and starts the background flush task.
    pub fn open(root: &Path) -> StoreResult<IdStore> {
        let path = root.join(NEXTID_FILE);
        let initial = match std::fs::read_to_string(&path) {
            Ok(text) => u64::from_str_radix(text.trim_end(), 16).map_err(|_| {
                StoreError::NextIdCorrupt { content: text }
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => 0,
            Err(err) => return Err(err.into()),
        };

        let mut file = OpenOptions::new().write(true).create(true).open(&path)?;
        write_counter(&mut file, initial)?;

        let next_id = Arc::new(AtomicU64::new(initial));
        let (flush_tx, mut flush_rx) = mpsc::unbounded_channel::<u64>();
        tokio::spawn(async move {
            while let Some(mut id) = flush_rx.recv().await {
                // Collapse a backlog to the newest value.
                while let Ok(newer) = flush_rx.try_recv() {
                    id = newer;
                }
                if let Err(err) = write_counter(&mut file, id) {
                    error!(error = %err, "NEXTID flush failed");
                }
            }
        });

        Ok(IdStore { next_id, flush_tx })
    }

    /// Allocates the next id as a 16-hex-digit string.
    pub fn make_id(&self) -> String {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        if id % STORE_ID_INCR == 0 {
            let _ = self.flush_tx.send(id);
        }
        format!("{id:016x}")
    }
}

fn write_counter(file: &mut std::fs::File, id: u64) -> StoreResult<()> {
    file.seek(SeekFrom::Start(0))?;
    file.write_all(format!("{:016x}", id + 2 * STORE_ID_INCR).as_bytes())?;
    file.sync_all()?;
    Ok(())
}
