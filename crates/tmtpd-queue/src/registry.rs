//! Process-wide node registry and the attachment protocol.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use tmtpd_proto::{pack_msg, Info};
use tmtpd_store::{Store, StoreResult};

use crate::doors::Doors;
use crate::ohi::OhiRegistry;
use crate::queue::{OhiEvent, Queue};
use crate::slot::Conn;

/// One registered node: the directory lock, and the queue once the node
/// has logged in. Read-holding the lock pins the node's queue directory
/// and queue pointer during fan-out; write-holding it creates the queue.
#[derive(Default)]
pub struct NodeEntry {
    /// The node's queue, populated at first login.
    pub queue: tokio::sync::RwLock<Option<Arc<Queue>>>,
}

/// Map from node id to its in-memory state. Nodes are created on first
/// reference (login or fan-out) and never evicted.
#[derive(Default)]
pub struct Registry {
    nodes: RwLock<HashMap<String, Arc<NodeEntry>>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Returns the node's entry, creating it if absent.
    pub fn get_node(&self, node: &str) -> Arc<NodeEntry> {
        if let Some(entry) = self.nodes.read().expect("lock poisoned").get(node) {
            return entry.clone();
        }
        let mut nodes = self.nodes.write().expect("lock poisoned");
        match nodes.get(node) {
            Some(raced) => raced.clone(),
            None => {
                info!(node = %node, "registering node");
                let entry = Arc::new(NodeEntry::default());
                nodes.insert(node.to_string(), entry.clone());
                entry
            }
        }
    }

    /// Attaches `conn` to `node`'s queue, creating the queue on first
    /// login. On success the login-ok frame (carrying the current
    /// presence publishers for `uid`, when any) has been written and the
    /// delivery driver owns the connection; returns `None` when another
    /// connection already holds the attachment.
    pub async fn attach(
        &self,
        store: &Store,
        doors: &Doors,
        ohi: &OhiRegistry,
        node: &str,
        conn: Conn,
        uid: &str,
    ) -> StoreResult<Option<Arc<Queue>>> {
        let entry = self.get_node(node);

        let queue = {
            let existing = entry.queue.read().await.clone();
            match existing {
                Some(queue) => queue,
                None => {
                    let mut slot = entry.queue.write().await;
                    match &*slot {
                        Some(raced) => raced.clone(),
                        None => {
                            let queue = Queue::start(store.clone(), doors.clone(), node)?;
                            *slot = Some(queue.clone());
                            queue
                        }
                    }
                }
            }
        };

        if !queue.claim() {
            return Ok(None);
        }

        let mut login_ok = Info::login_ok();
        let publishers = ohi.get_ohi_to(uid);
        if !publishers.is_empty() {
            login_ok.ohi = Some(publishers);
        }
        match pack_msg(&login_ok, &[]) {
            Ok(frame) => {
                let mut sink = conn.lock().await;
                if let Err(err) = sink.write_all(&frame).await {
                    warn!(node = %node, error = %err, "login-ok write failed");
                } else if let Err(err) = sink.flush().await {
                    warn!(node = %node, error = %err, "login-ok flush failed");
                }
            }
            Err(err) => warn!(error = %err, "login-ok serialization"),
        }

        queue.attach_conn(conn);
        Ok(Some(queue))
    }

    /// Offers a presence transition to each listed node's queue, where
    /// one exists.
    pub async fn send_ohi(&self, nodes: &[String], from: &str, status: i8) {
        for node in nodes {
            let entry = self.get_node(node);
            let guard = entry.queue.read().await;
            if let Some(queue) = &*guard {
                queue
                    .send_ohi(OhiEvent {
                        from: from.to_string(),
                        status,
                    })
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWrite};

    fn pipe_conn() -> (Conn, tokio::io::DuplexStream) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let sink: Box<dyn AsyncWrite + Send + Unpin> = Box::new(server);
        (Arc::new(tokio::sync::Mutex::new(sink)), client)
    }

    async fn read_frame(stream: &mut tokio::io::DuplexStream) -> (serde_json::Value, Vec<u8>) {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.unwrap();
        let len = usize::from_str_radix(std::str::from_utf8(&len_buf).unwrap(), 16).unwrap();
        let mut head = vec![0u8; len];
        stream.read_exact(&mut head).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&head).unwrap();
        let data_len = value.get("datalen").and_then(|v| v.as_u64()).unwrap_or(0);
        let mut data = vec![0u8; data_len as usize];
        stream.read_exact(&mut data).await.unwrap();
        (value, data)
    }

    async fn stage_message(store: &Store, node: &str, body: &[u8]) -> String {
        let id = store.make_id();
        let framed = pack_msg(
            &serde_json::json!({"op":"delivery","datalen": body.len()}),
            &[],
        )
        .unwrap();
        let mut stream = &body[..];
        store
            .recv_file(&id, &framed, &[], &mut stream, body.len() as u64)
            .await
            .unwrap();
        store.put_link(&id, node, &id).unwrap();
        store.rm_file(&id).unwrap();
        id
    }

    #[tokio::test]
    async fn attach_is_exclusive_until_unlink() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let registry = Registry::new();
        let doors = Doors::new();
        let ohi = OhiRegistry::new();

        let (conn_a, mut client_a) = pipe_conn();
        let queue = registry
            .attach(&store, &doors, &ohi, "N.01", conn_a, "u1")
            .await
            .unwrap()
            .expect("first attach succeeds");
        let (info, _) = read_frame(&mut client_a).await;
        assert_eq!(info["op"], "info");
        assert_eq!(info["info"], "login ok");

        let (conn_b, _client_b) = pipe_conn();
        assert!(registry
            .attach(&store, &doors, &ohi, "N.01", conn_b, "u1")
            .await
            .unwrap()
            .is_none());

        queue.unlink();
        let (conn_c, mut client_c) = pipe_conn();
        assert!(registry
            .attach(&store, &doors, &ohi, "N.01", conn_c, "u1")
            .await
            .unwrap()
            .is_some());
        let (info, _) = read_frame(&mut client_c).await;
        assert_eq!(info["op"], "info");
    }

    #[tokio::test]
    async fn backlog_replays_in_order_and_acks_unlink() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let registry = Registry::new();
        let doors = Doors::new();
        let ohi = OhiRegistry::new();

        let first = stage_message(&store, "N.01", b"one").await;
        let second = stage_message(&store, "N.01", b"two").await;

        let (conn, mut client) = pipe_conn();
        let queue = registry
            .attach(&store, &doors, &ohi, "N.01", conn, "u1")
            .await
            .unwrap()
            .expect("attach");
        let (info, _) = read_frame(&mut client).await;
        assert_eq!(info["op"], "info");

        let (_, data) = read_frame(&mut client).await;
        assert_eq!(data, b"one");
        assert!(queue.forward_ack(first.clone()).await);

        let (_, data) = read_frame(&mut client).await;
        assert_eq!(data, b"two");
        assert!(queue.forward_ack(second.clone()).await);

        // Give the driver a moment to unlink the acked entries.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(store.get_dir("N.01").unwrap().is_empty());
    }

    #[tokio::test]
    async fn live_enqueue_reaches_attached_client() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let registry = Registry::new();
        let doors = Doors::new();
        let ohi = OhiRegistry::new();

        let (conn, mut client) = pipe_conn();
        let queue = registry
            .attach(&store, &doors, &ohi, "N.01", conn, "u1")
            .await
            .unwrap()
            .expect("attach");
        let _ = read_frame(&mut client).await;

        let id = stage_message(&store, "N.01", b"live").await;
        queue.enqueue(id.clone()).await;

        let (_, data) = read_frame(&mut client).await;
        assert_eq!(data, b"live");
        assert!(queue.forward_ack(id).await);
    }

    #[tokio::test]
    async fn ohi_events_reach_attached_client() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let registry = Registry::new();
        let doors = Doors::new();
        let ohi = OhiRegistry::new();

        let (conn, mut client) = pipe_conn();
        registry
            .attach(&store, &doors, &ohi, "N.01", conn, "u1")
            .await
            .unwrap()
            .expect("attach");
        let _ = read_frame(&mut client).await;

        registry
            .send_ohi(&["N.01".to_string()], "u2", tmtpd_proto::OHI_ON)
            .await;
        let (note, _) = read_frame(&mut client).await;
        assert_eq!(note["op"], "ohi");
        assert_eq!(note["from"], "u2");
        assert_eq!(note["status"], 1);
    }
}
