//! Durability and fan-out invariants: hardlink sharing, redelivery of
//! unacked messages, and restart recovery.

#[cfg(test)]
mod tests {
    use std::os::unix::fs::MetadataExt;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use tmtpd_queue::{Doors, OhiRegistry, Registry};
    use tmtpd_server::link::{spawn_link, LinkCtx};
    use tmtpd_server::Clock;
    use tmtpd_store::Store;
    use tmtpd_userdb::UserDb;

    use crate::client::TestClient;
    use crate::harness::TestServer;

    fn node_dir(qstore: &Path, qid: &str) -> PathBuf {
        let lower = qid.to_lowercase();
        qstore.join(&lower[..4]).join(&lower)
    }

    #[tokio::test]
    async fn fan_out_links_one_inode_per_recipient() {
        let server = TestServer::start().await;

        let mut sender = server.connect().await;
        sender.negotiate().await;
        let (sender_uid, _) = sender.register("_").await;

        let mut recipients = Vec::new();
        for _ in 0..2 {
            let mut client = server.connect().await;
            client.negotiate().await;
            let (uid, _) = client.register("_").await;
            recipients.push(uid);
            drop(client);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let selectors: Vec<(&str, i8)> =
            recipients.iter().map(|uid| (uid.as_str(), 1)).collect();
        let ack = sender.post("f1", &selectors, b"fan").await;
        assert!(ack.get("error").is_none(), "{ack}");
        let msgid = ack["msgid"].as_str().expect("msgid");

        let qstore = server.qstore_path();
        let mut inodes = Vec::new();
        for uid in &recipients {
            let dir = node_dir(&qstore, &format!("{uid}.01"));
            let entries: Vec<_> = std::fs::read_dir(&dir)
                .expect("recipient queue dir")
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            assert_eq!(entries, vec![msgid.to_string()], "exactly one new entry");
            let meta = std::fs::metadata(dir.join(msgid)).unwrap();
            assert_eq!(meta.nlink(), 2, "one link per recipient, temp removed");
            inodes.push(meta.ino());
        }
        assert_eq!(inodes[0], inodes[1], "recipients share the stored file");

        // The staged copy is gone, and the sender's own node saw
        // nothing.
        assert_eq!(std::fs::read_dir(qstore.join("temp")).unwrap().count(), 0);
        let sender_dir = node_dir(&qstore, &format!("{sender_uid}.01"));
        let sender_entries = match std::fs::read_dir(&sender_dir) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        };
        assert_eq!(sender_entries, 0);
    }

    #[tokio::test]
    async fn unacked_delivery_survives_restart() {
        let server = TestServer::start().await;
        let mut client = server.connect().await;
        client.negotiate().await;
        let (uid, nodeid) = client.register("_").await;

        // Post to self; read the ack and the delivery but never ack the
        // delivery.
        client
            .send(&json!({"Op": 7, "Id": "p1", "DataLen": 4,
                          "For": [{"Id": uid, "Type": 1}]}), b"keep")
            .await;
        let (first, _) = client.read_frame().await;
        let (second, _) = client.read_frame().await;
        let delivery = if first["op"] == "ack" { &second } else { &first };
        let msgid = delivery["id"].as_str().expect("msgid").to_string();
        drop(client);

        // Restart the server over the same directories.
        let root = server.into_root();
        let server = TestServer::start_at(root).await;

        let mut client = server.connect().await;
        client.negotiate().await;
        client.login(&uid, &nodeid).await;

        // The unacked message is redelivered first, then the login
        // announcement.
        let (redelivered, body) = client.take_delivery().await;
        assert_eq!(redelivered["id"], msgid.as_str());
        assert_eq!(body, b"keep");
        let (announce, _) = client.take_delivery().await;
        assert_eq!(announce["op"], "login");
    }

    #[tokio::test(start_paused = true)]
    async fn unacked_delivery_is_resent_on_reattach() {
        let root = tempfile::tempdir().unwrap();
        let ctx = Arc::new(LinkCtx {
            store: Store::open(root.path().join("qstore")).unwrap(),
            udb: Arc::new(UserDb::open(root.path().join("userdb")).unwrap()),
            registry: Arc::new(Registry::new()),
            ohi: Arc::new(OhiRegistry::new()),
            doors: Doors::new(),
            clock: Clock::system(),
        });

        let (local, remote) = tokio::io::duplex(256 * 1024);
        spawn_link(ctx.clone(), remote);
        let mut client = TestClient::new(local);
        client.negotiate().await;
        let (uid, nodeid) = client.register("_").await;

        client
            .send(&json!({"Op": 7, "Id": "p1", "DataLen": 4,
                          "For": [{"Id": uid, "Type": 1}]}), b"once")
            .await;
        let (first, _) = client.read_frame().await;
        let (second, _) = client.read_frame().await;
        let delivery = if first["op"] == "ack" { &second } else { &first };
        let msgid = delivery["id"].as_str().expect("msgid").to_string();

        // Disconnect without acking; the driver holds the delivery.
        drop(client);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (local, remote) = tokio::io::duplex(256 * 1024);
        spawn_link(ctx.clone(), remote);
        let mut client = TestClient::new(local);
        client.negotiate().await;
        client.login(&uid, &nodeid).await;

        // After the ack timeout lapses, the same message arrives again.
        let (redelivered, body) = client.take_delivery().await;
        assert_eq!(redelivered["id"], msgid.as_str());
        assert_eq!(body, b"once");
    }
}
