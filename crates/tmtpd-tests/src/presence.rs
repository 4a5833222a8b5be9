//! Presence (OHI) subscription scenarios.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use crate::harness::TestServer;

    #[tokio::test]
    async fn presence_transitions_reach_subscribers() {
        let server = TestServer::start().await;

        let mut watcher = server.connect().await;
        watcher.negotiate().await;
        let (watcher_uid, watcher_node) = watcher.register("ohi_watcher1").await;

        let mut friend = server.connect().await;
        friend.negotiate().await;
        let (friend_uid, _friend_node) = friend.register("ohi_friend22").await;

        // The friend starts notifying the watcher; the watcher sees an
        // online note immediately.
        friend
            .send(
                &json!({"Op": 4, "Id": "o1", "Type": "add",
                        "For": [{"Id": watcher_uid, "Type": 1}]}),
                b"",
            )
            .await;
        let (ack, _) = friend.expect_op("ack").await;
        assert!(ack.get("error").is_none(), "{ack}");
        // The first edit only seeds the set; no self-delivery yet.
        assert_eq!(ack["msgid"], "");

        let (note, _) = watcher.read_frame().await;
        assert_eq!(note["op"], "ohi");
        assert_eq!(note["from"], friend_uid.as_str());
        assert_eq!(note["status"], 1);

        // A subscriber logging in while the publisher is online gets
        // the publisher list in its login-ok frame.
        drop(watcher);
        tokio::time::sleep(Duration::from_millis(200)).await;
        let mut watcher = server.connect().await;
        watcher.negotiate().await;
        let info = watcher.login(&watcher_uid, &watcher_node).await;
        let publishers = info["ohi"].as_array().expect("publisher list");
        assert!(publishers.iter().any(|p| p == friend_uid.as_str()));
        // Drain the login announcement delivery.
        let (announce, _) = watcher.take_delivery().await;
        assert_eq!(announce["op"], "login");

        // The publisher's last node disconnecting flips the watcher to
        // offline.
        drop(friend);
        let (note, _) = watcher.read_frame().await;
        assert_eq!(note["op"], "ohi");
        assert_eq!(note["from"], friend_uid.as_str());
        assert_eq!(note["status"], 2);
    }

    #[tokio::test]
    async fn repeat_edits_announce_to_own_nodes() {
        let server = TestServer::start().await;
        let mut watcher = server.connect().await;
        watcher.negotiate().await;
        let (watcher_uid, _) = watcher.register("_").await;

        let mut friend = server.connect().await;
        friend.negotiate().await;
        let (_friend_uid, _) = friend.register("_").await;

        let edit = json!({"Op": 4, "Id": "o1", "Type": "add",
                          "For": [{"Id": watcher_uid, "Type": 1}]});
        friend.send(&edit, b"").await;
        let (first_ack, _) = friend.expect_op("ack").await;
        assert_eq!(first_ack["msgid"], "");
        let (note, _) = watcher.read_frame().await;
        assert_eq!(note["op"], "ohi");

        // The second edit posts an `ohiedit` record to the editor's own
        // nodes; no transition happened, so the watcher hears nothing.
        friend
            .send(
                &json!({"Op": 4, "Id": "o2", "Type": "drop",
                        "For": [{"Id": watcher_uid, "Type": 1}]}),
                b"",
            )
            .await;
        let (note, _) = watcher.read_frame().await;
        assert_eq!(note["status"], 2, "drop transition notifies off");

        let (ack, (record, _)) = friend.read_ack_and_delivery().await;
        assert!(ack["msgid"].as_str().is_some_and(|m| !m.is_empty()));
        assert_eq!(record["op"], "ohiedit");
        assert_eq!(record["type"], "drop");
    }

    #[tokio::test]
    async fn edits_for_unknown_users_fail() {
        let server = TestServer::start().await;
        let mut client = server.connect().await;
        client.negotiate().await;
        client.register("_").await;
        client
            .send(
                &json!({"Op": 4, "Id": "o1", "Type": "add",
                        "For": [{"Id": "NOBODY", "Type": 1}]}),
                b"",
            )
            .await;
        let (ack, _) = client.expect_op("ack").await;
        assert!(ack["error"].as_str().is_some());
    }
}
