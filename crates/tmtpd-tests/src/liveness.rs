//! Connection liveness: pulse heartbeats, idle timeouts, and orderly
//! logout.

#[cfg(test)]
mod tests {
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

    fn pipe_ctx(root: &tempfile::TempDir) -> Arc<LinkCtx> {
        Arc::new(LinkCtx {
            store: Store::open(root.path().join("qstore")).unwrap(),
            udb: Arc::new(UserDb::open(root.path().join("userdb")).unwrap()),
            registry: Arc::new(Registry::new()),
            ohi: Arc::new(OhiRegistry::new()),
            doors: Doors::new(),
            clock: Clock::system(),
        })
    }

    #[tokio::test]
    async fn quit_op_logs_out() {
        let server = TestServer::start().await;
        let mut client = server.connect().await;
        client.negotiate().await;
        client.register("_").await;
        client.send(&json!({"Op": 11}), b"").await;
        let (quit, _) = client.expect_op("quit").await;
        assert_eq!(quit["error"], "logout ok");
    }

    #[tokio::test(start_paused = true)]
    async fn unauthenticated_connection_times_out() {
        let root = tempfile::tempdir().unwrap();
        let (local, remote) = tokio::io::duplex(64 * 1024);
        spawn_link(pipe_ctx(&root), remote);
        let mut client = TestClient::new(local);
        // Never negotiate; the login window lapses.
        let (quit, _) = client.expect_op("quit").await;
        assert_eq!(quit["error"], "connection timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn pulse_keeps_an_idle_link_alive() {
        let root = tempfile::tempdir().unwrap();
        let ctx = pipe_ctx(&root);
        let (local, remote) = tokio::io::duplex(64 * 1024);
        spawn_link(ctx.clone(), remote);
        let mut client = TestClient::new(local);
        client.negotiate().await;
        client.register("_").await;

        // Stay quiet for well past the pulse window, heartbeating under
        // it each time.
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_secs(100)).await;
            client.send(&json!({"Op": 10}), b"").await;
        }

        // The link is still authenticated and serving.
        client
            .send(&json!({"Op": 8, "Id": "p", "To": "nobody_x9", "DataLen": 1}), b"!")
            .await;
        let (ack, _) = client.expect_op("ack").await;
        assert!(ack["error"].as_str().is_some());

        // Going fully quiet closes the link with a timeout.
        let (quit, _) = client.expect_op("quit").await;
        assert_eq!(quit["error"], "connection timeout");
    }
}
