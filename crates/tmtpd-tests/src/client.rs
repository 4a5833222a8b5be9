//! A synthetic TMTP client for exercising the server.

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Drives the framed protocol over any async stream (TLS socket or
/// in-process duplex).
pub struct TestClient<S> {
    stream: S,
}

impl<S: AsyncRead + AsyncWrite + Unpin> TestClient<S> {
    /// Wraps a connected stream.
    pub fn new(stream: S) -> TestClient<S> {
        TestClient { stream }
    }

    /// Consumes the client, returning the stream (to close or leak).
    pub fn into_stream(self) -> S {
        self.stream
    }

    /// Sends one framed request.
    pub async fn send(&mut self, header: &Value, data: &[u8]) {
        let head = serde_json::to_vec(header).expect("header json");
        let mut frame = format!("{:04x}", head.len()).into_bytes();
        frame.extend_from_slice(&head);
        frame.extend_from_slice(data);
        self.stream.write_all(&frame).await.expect("send frame");
        self.stream.flush().await.expect("flush frame");
    }

    /// Reads one server frame: the JSON header plus, for deliveries,
    /// the `datalen` payload bytes.
    pub async fn read_frame(&mut self) -> (Value, Vec<u8>) {
        let mut len_buf = [0u8; 4];
        self.stream.read_exact(&mut len_buf).await.expect("frame length");
        let text = std::str::from_utf8(&len_buf).expect("hex length");
        let len = usize::from_str_radix(text, 16).expect("hex length");
        let mut head = vec![0u8; len];
        self.stream.read_exact(&mut head).await.expect("frame header");
        let header: Value = serde_json::from_slice(&head).expect("header json");
        let data_len = header.get("datalen").and_then(Value::as_u64).unwrap_or(0);
        let mut data = vec![0u8; data_len as usize];
        self.stream.read_exact(&mut data).await.expect("frame payload");
        (header, data)
    }

    /// Reads a frame and asserts its `op`.
    pub async fn expect_op(&mut self, op: &str) -> (Value, Vec<u8>) {
        let (header, data) = self.read_frame().await;
        assert_eq!(header["op"], op, "unexpected frame: {header}");
        (header, data)
    }

    /// Negotiates the protocol revision.
    pub async fn negotiate(&mut self) {
        self.send(&json!({"Op": 0, "Id": "1"}), b"").await;
        let (header, _) = self.expect_op("tmtprev").await;
        assert_eq!(header["id"], "1");
    }

    /// Registers a fresh user (alias `_` skips the alias), waits for the
    /// attachment to complete, and returns `(uid, nodeid)`.
    pub async fn register(&mut self, alias: &str) -> (String, String) {
        self.send(&json!({"Op": 1, "NewNode": "1", "NewAlias": alias}), b"")
            .await;
        let (header, _) = self.expect_op("registered").await;
        assert!(
            header.get("error").is_none(),
            "registration error: {header}"
        );
        let uid = header["uid"].as_str().expect("uid").to_string();
        let nodeid = header["nodeid"].as_str().expect("nodeid").to_string();
        let (info, _) = self.expect_op("info").await;
        assert_eq!(info["info"], "login ok");
        (uid, nodeid)
    }

    /// Logs in an existing node and waits for login-ok. Returns the
    /// info frame (which may carry the initial presence list).
    pub async fn login(&mut self, uid: &str, nodeid: &str) -> Value {
        self.send(&json!({"Op": 2, "Uid": uid, "Node": nodeid}), b"")
            .await;
        let (info, _) = self.expect_op("info").await;
        assert_eq!(info["info"], "login ok");
        info
    }

    /// Posts `body` to the given `(id, type)` selectors; returns the
    /// ack.
    pub async fn post(&mut self, req_id: &str, selectors: &[(&str, i8)], body: &[u8]) -> Value {
        let for_list: Vec<Value> = selectors
            .iter()
            .map(|(id, kind)| json!({"Id": id, "Type": kind}))
            .collect();
        self.send(
            &json!({"Op": 7, "Id": req_id, "DataLen": body.len(), "For": for_list}),
            body,
        )
        .await;
        let (ack, _) = self.expect_op("ack").await;
        assert_eq!(ack["id"], req_id);
        ack
    }

    /// Pings an alias; returns the ack.
    pub async fn ping(&mut self, req_id: &str, to: &str, body: &[u8]) -> Value {
        self.send(
            &json!({"Op": 8, "Id": req_id, "To": to, "DataLen": body.len()}),
            body,
        )
        .await;
        let (ack, _) = self.expect_op("ack").await;
        assert_eq!(ack["id"], req_id);
        ack
    }

    /// Acknowledges a delivery by msgid.
    pub async fn ack_delivery(&mut self, msgid: &str) {
        self.send(&json!({"Op": 9, "Id": msgid, "Type": "ok"}), b"")
            .await;
    }

    /// Reads a delivery frame, acks it, and returns it.
    pub async fn take_delivery(&mut self) -> (Value, Vec<u8>) {
        let (header, data) = self.read_frame().await;
        let msgid = header["id"].as_str().expect("delivery id").to_string();
        self.ack_delivery(&msgid).await;
        (header, data)
    }

    /// Reads the ack for a request and a concurrent delivery, in
    /// whichever order they arrive; the delivery is acked.
    pub async fn read_ack_and_delivery(&mut self) -> (Value, (Value, Vec<u8>)) {
        let (first, first_data) = self.read_frame().await;
        if first["op"] == "ack" {
            let delivery = self.take_delivery().await;
            return (first, delivery);
        }
        let msgid = first["id"].as_str().expect("delivery id").to_string();
        self.ack_delivery(&msgid).await;
        let (ack, _) = self.expect_op("ack").await;
        (ack, (first, first_data))
    }
}
