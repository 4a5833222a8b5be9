//! Group membership and fan-out scenarios.

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::client::TestClient;
    use crate::harness::TestServer;

    async fn joined_user(
        server: &TestServer,
        alias: &str,
    ) -> (TestClient<tokio_rustls::client::TlsStream<tokio::net::TcpStream>>, String) {
        let mut client = server.connect().await;
        client.negotiate().await;
        let (uid, _) = client.register(alias).await;
        (client, uid)
    }

    #[tokio::test]
    async fn invite_join_and_exclusive_post() {
        let server = TestServer::start().await;
        let (mut alice, alice_uid) = joined_user(&server, "group_alice").await;
        let (mut bobby, bobby_uid) = joined_user(&server, "group_bobby").await;
        let (mut carol, _carol_uid) = joined_user(&server, "group_carol").await;

        // First invite creates the group with alice joined; bobby gets
        // the invite delivery, alice the membership announcement.
        alice
            .send(
                &json!({"Op": 5, "Id": "i1", "DataLen": 8, "Gid": "party",
                        "From": "group_alice", "To": "group_bobby"}),
                b"join us!",
            )
            .await;
        let (ack, (member, _)) = alice.read_ack_and_delivery().await;
        assert!(ack.get("error").is_none(), "{ack}");
        assert_eq!(member["op"], "member");
        assert_eq!(member["act"], "invite");
        assert_eq!(member["alias"], "group_bobby");

        let (invite, body) = bobby.take_delivery().await;
        assert_eq!(invite["op"], "invite");
        assert_eq!(invite["gid"], "party");
        assert_eq!(invite["from"], alice_uid.as_str());
        assert_eq!(body, b"join us!");

        // Bobby joins; both members hear about it.
        bobby
            .send(&json!({"Op": 6, "Id": "j1", "Act": "join", "Gid": "party"}), b"")
            .await;
        let (ack, (member, _)) = bobby.read_ack_and_delivery().await;
        assert!(ack.get("error").is_none(), "{ack}");
        assert_eq!(member["act"], "join");
        let (member, _) = alice.take_delivery().await;
        assert_eq!(member["op"], "member");
        assert_eq!(member["act"], "join");
        assert_eq!(member["alias"], "group_bobby");

        // Carol is invited and joins.
        alice
            .send(
                &json!({"Op": 5, "Id": "i2", "DataLen": 4, "Gid": "party",
                        "From": "group_alice", "To": "group_carol"}),
                b"you2",
            )
            .await;
        let (ack, (_member, _)) = alice.read_ack_and_delivery().await;
        assert!(ack.get("error").is_none(), "{ack}");
        let (member, _) = bobby.take_delivery().await;
        assert_eq!(member["act"], "invite");
        let (invite, _) = carol.take_delivery().await;
        assert_eq!(invite["op"], "invite");

        carol
            .send(&json!({"Op": 6, "Id": "j2", "Act": "join", "Gid": "party"}), b"")
            .await;
        let (ack, (_member, _)) = carol.read_ack_and_delivery().await;
        assert!(ack.get("error").is_none(), "{ack}");
        let (member, _) = alice.take_delivery().await;
        assert_eq!(member["act"], "join");
        let (member, _) = bobby.take_delivery().await;
        assert_eq!(member["act"], "join");

        // An exclusive post reaches the other members but not the
        // sender.
        let ack = alice.post("x1", &[("party", 3)], b"hi all").await;
        assert!(ack.get("error").is_none(), "{ack}");
        let excl_msgid = ack["msgid"].as_str().expect("msgid").to_string();

        let (delivery, body) = bobby.take_delivery().await;
        assert_eq!(delivery["id"], excl_msgid.as_str());
        assert_eq!(delivery["from"], alice_uid.as_str());
        assert_eq!(body, b"hi all");
        let (delivery, body) = carol.take_delivery().await;
        assert_eq!(delivery["id"], excl_msgid.as_str());
        assert_eq!(body, b"hi all");

        // Alice sees nothing from the exclusive post: the next frame
        // she receives is her own later self-ping.
        alice
            .send(&json!({"Op": 8, "Id": "p1", "To": "group_alice", "DataLen": 1}), b".")
            .await;
        let (ping_ack, (next, _)) = alice.read_ack_and_delivery().await;
        assert_eq!(next["op"], "ping");
        assert_eq!(next["id"], ping_ack["msgid"]);

        // A group-wide post reaches everyone, sender included.
        alice
            .send(&json!({"Op": 7, "Id": "x2", "DataLen": 5,
                          "For": [{"Id": "party", "Type": 2}]}), b"again")
            .await;
        let (ack, (own, own_body)) = alice.read_ack_and_delivery().await;
        let all_msgid = ack["msgid"].as_str().expect("msgid").to_string();
        assert_eq!(own["id"], all_msgid.as_str());
        assert_eq!(own_body, b"again");
        for client in [&mut bobby, &mut carol] {
            let (delivery, body) = client.take_delivery().await;
            assert_eq!(delivery["id"], all_msgid.as_str());
            assert_eq!(body, b"again");
        }
    }

    #[tokio::test]
    async fn invites_from_non_members_are_refused() {
        let server = TestServer::start().await;
        let (mut alice, _) = joined_user(&server, "solo_alice").await;
        let (mut mallory, _) = joined_user(&server, "mallory_mal").await;
        let (_bobby, _) = joined_user(&server, "solo_bobby").await;

        alice
            .send(
                &json!({"Op": 5, "Id": "i1", "DataLen": 2, "Gid": "club",
                        "From": "solo_alice", "To": "solo_bobby"}),
                b"in",
            )
            .await;
        let (ack, _) = alice.read_ack_and_delivery().await;
        assert!(ack.get("error").is_none(), "{ack}");

        // Mallory never joined and cannot invite.
        mallory
            .send(
                &json!({"Op": 5, "Id": "i2", "DataLen": 2, "Gid": "club",
                        "From": "mallory_mal", "To": "solo_bobby"}),
                b"in",
            )
            .await;
        let (ack, _) = mallory.read_frame().await;
        assert_eq!(ack["op"], "ack");
        assert!(ack["error"].as_str().is_some());
    }

    #[tokio::test]
    async fn group_invite_payload_must_be_utf8() {
        let server = TestServer::start().await;
        let (mut alice, _) = joined_user(&server, "utf8_alice").await;
        let (_bobby, _) = joined_user(&server, "utf8_bobby").await;

        alice
            .send(
                &json!({"Op": 5, "Id": "i1", "DataLen": 2, "Gid": "club",
                        "From": "utf8_alice", "To": "utf8_bobby"}),
                &[0xFF, 0xFE],
            )
            .await;
        let (quit, _) = alice.expect_op("quit").await;
        assert_eq!(quit["error"], "data not valid UTF8");
    }
}
