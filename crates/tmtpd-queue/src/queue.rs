//! The per-node queue: elastic buffer and delivery driver.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use tmtpd_proto::{pack_msg, OhiNote};
use tmtpd_store::{Store, StoreResult};

use crate::doors::Doors;
use crate::slot::{Conn, ConnSlot};

/// How long the driver waits for a client ack before releasing the send
/// door and parking the delivery.
pub const QUEUE_ACK_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a presence event may wait for room in a queue's ohi channel.
pub const OHI_FORWARD_TIMEOUT: Duration = Duration::from_millis(200);

/// How long a link waits to hand an ack to the driver.
pub const ACK_HANDOFF_TIMEOUT: Duration = Duration::from_secs(2);

const ACK_CHANNEL_CAP: usize = 10;
const OHI_CHANNEL_CAP: usize = 100;

/// A presence transition on its way to an attached connection.
#[derive(Debug, Clone)]
pub struct OhiEvent {
    /// The publishing uid.
    pub from: String,
    /// On/off status value for the wire.
    pub status: i8,
}

/// One node's delivery queue. Created lazily at first login and kept
/// for the life of the process.
pub struct Queue {
    node: String,
    pub(crate) slot: ConnSlot,
    has_conn: AtomicBool,
    ack_tx: mpsc::Sender<String>,
    in_tx: mpsc::Sender<String>,
    ohi_tx: mpsc::Sender<OhiEvent>,
}

impl Queue {
    /// Replays the node's directory into the elastic buffer and starts
    /// the buffer and driver tasks.
    pub(crate) fn start(store: Store, doors: Doors, node: &str) -> StoreResult<Arc<Queue>> {
        let backlog: VecDeque<String> = store.get_dir(node)?.into();
        let (ack_tx, ack_rx) = mpsc::channel(ACK_CHANNEL_CAP);
        let (in_tx, in_rx) = mpsc::channel(1);
        let (out_tx, out_rx) = mpsc::channel(1);
        let (ohi_tx, ohi_rx) = mpsc::channel(OHI_CHANNEL_CAP);

        let queue = Arc::new(Queue {
            node: node.to_string(),
            slot: ConnSlot::new(),
            has_conn: AtomicBool::new(false),
            ack_tx,
            in_tx,
            ohi_tx,
        });
        info!(node = %queue.node, backlog = backlog.len(), "queue created");

        tokio::spawn(run_elastic(queue.node.clone(), in_rx, out_tx, backlog));
        tokio::spawn(run_queue(queue.clone(), store, doors, out_rx, ack_rx, ohi_rx));
        Ok(queue)
    }

    /// The queue's node id.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Claims the single attachment slot; fails if a connection is
    /// already attached.
    pub(crate) fn claim(&self) -> bool {
        self.has_conn
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Publishes the attached connection to the driver.
    pub(crate) fn attach_conn(&self, conn: Conn) {
        self.slot.put(conn);
    }

    /// Detaches the current connection and frees the attachment slot.
    pub fn unlink(&self) {
        self.slot.take();
        self.has_conn.store(false, Ordering::Release);
    }

    /// Feeds a freshly linked message id to the elastic buffer.
    pub async fn enqueue(&self, msgid: String) {
        if self.in_tx.send(msgid).await.is_err() {
            error!(node = %self.node, "queue input closed");
        }
    }

    /// Hands a client ack to the driver, bounded by
    /// [`ACK_HANDOFF_TIMEOUT`]. Returns false on a lapse.
    pub async fn forward_ack(&self, ack_id: String) -> bool {
        match self.ack_tx.send_timeout(ack_id, ACK_HANDOFF_TIMEOUT).await {
            Ok(()) => true,
            Err(_) => {
                warn!(node = %self.node, "timed out forwarding ack to queue");
                false
            }
        }
    }

    /// Offers a presence event, bounded by [`OHI_FORWARD_TIMEOUT`].
    pub async fn send_ohi(&self, event: OhiEvent) {
        if self
            .ohi_tx
            .send_timeout(event, OHI_FORWARD_TIMEOUT)
            .await
            .is_err()
        {
            warn!(node = %self.node, "ohi channel full, event dropped");
        }
    }
}

// Bridges the bounded `in` channel to the bounded `out` channel through
// an unbounded in-memory deque so producers never block on a slow
// consumer. On close of `in`, drains and closes `out`.
async fn run_elastic(
    node: String,
    mut in_rx: mpsc::Receiver<String>,
    out_tx: mpsc::Sender<String>,
    mut buf: VecDeque<String>,
) {
    loop {
        if buf.is_empty() {
            match in_rx.recv().await {
                Some(id) => buf.push_back(id),
                None => break,
            }
        }
        tokio::select! {
            received = in_rx.recv() => match received {
                Some(id) => {
                    buf.push_back(id);
                    if buf.len() % 100 == 0 {
                        warn!(node = %node, backlog = buf.len(), "queue backlog growing");
                    }
                }
                None => break,
            },
            permit = out_tx.reserve() => match permit {
                Ok(permit) => {
                    if let Some(id) = buf.pop_front() {
                        permit.send(id);
                    }
                }
                Err(_) => return,
            },
        }
    }
    for id in buf {
        if out_tx.send(id).await.is_err() {
            return;
        }
    }
}

// The delivery driver: one message in flight at a time, sent under the
// send door's read lock, acked before its hardlink is removed. Presence
// events interleave at every wait point.
async fn run_queue(
    queue: Arc<Queue>,
    store: Store,
    doors: Doors,
    mut out_rx: mpsc::Receiver<String>,
    mut ack_rx: mpsc::Receiver<String>,
    mut ohi_rx: mpsc::Receiver<OhiEvent>,
) {
    let Some(mut msg_id) = wait_for_msg(&queue, &mut out_rx, &mut ohi_rx).await else {
        return;
    };
    'attach: loop {
        let conn = queue.slot.wait_conn().await;
        let door = doors.send.read().await;
        'send: loop {
            let sent = {
                let mut sink = conn.lock().await;
                store.send_file(&queue.node, &msg_id, &mut *sink).await
            };
            if let Err(err) = sent {
                drop(door);
                if is_not_found(&err) {
                    // The queue entry vanished out from under us; the
                    // on-disk state no longer matches the driver.
                    error!(node = %queue.node, msgid = %msg_id, "queue entry missing");
                    std::process::exit(2);
                }
                warn!(node = %queue.node, msgid = %msg_id, error = %err, "send failed");
                continue 'attach;
            }
            debug!(node = %queue.node, msgid = %msg_id, "delivery sent");

            let timeout = tokio::time::sleep(QUEUE_ACK_TIMEOUT);
            tokio::pin!(timeout);
            loop {
                tokio::select! {
                    event = ohi_rx.recv() => {
                        if let Some(event) = event {
                            try_ohi(&queue, &event).await;
                        }
                    }
                    ack = ack_rx.recv() => {
                        let Some(ack_id) = ack else { return };
                        if ack_id != msg_id {
                            warn!(node = %queue.node, got = %ack_id, want = %msg_id,
                                  "mismatched ack, resending");
                            continue 'send;
                        }
                        if let Err(err) = store.rm_link(&queue.node, &msg_id) {
                            warn!(node = %queue.node, msgid = %msg_id, error = %err,
                                  "failed to remove acked entry");
                        }
                        drop(door);
                        match wait_for_msg(&queue, &mut out_rx, &mut ohi_rx).await {
                            Some(next) => {
                                msg_id = next;
                                continue 'attach;
                            }
                            None => return,
                        }
                    }
                    _ = &mut timeout => {
                        drop(door);
                        warn!(node = %queue.node, msgid = %msg_id, "timed out awaiting ack");
                        continue 'attach;
                    }
                }
            }
        }
    }
}

// Waits for the next deliverable id, forwarding presence events as they
// arrive.
async fn wait_for_msg(
    queue: &Queue,
    out_rx: &mut mpsc::Receiver<String>,
    ohi_rx: &mut mpsc::Receiver<OhiEvent>,
) -> Option<String> {
    loop {
        tokio::select! {
            id = out_rx.recv() => return id,
            event = ohi_rx.recv() => {
                if let Some(event) = event {
                    try_ohi(queue, &event).await;
                }
            }
        }
    }
}

// Forwards a presence event to the attached connection, or drops it
// when none is attached.
async fn try_ohi(queue: &Queue, event: &OhiEvent) {
    let Some(conn) = queue.slot.peek() else { return };
    let frame = match pack_msg(&OhiNote::new(&event.from, event.status), &[]) {
        Ok(frame) => frame,
        Err(err) => {
            error!(error = %err, "ohi frame serialization");
            return;
        }
    };
    let mut sink = conn.lock().await;
    if let Err(err) = sink.write_all(&frame).await {
        warn!(node = %queue.node, error = %err, "ohi write failed");
    } else if let Err(err) = sink.flush().await {
        warn!(node = %queue.node, error = %err, "ohi flush failed");
    }
}

fn is_not_found(err: &tmtpd_store::StoreError) -> bool {
    matches!(err, tmtpd_store::StoreError::Io(io) if io.kind() == ErrorKind::NotFound)
}
