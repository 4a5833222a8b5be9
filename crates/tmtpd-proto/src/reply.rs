//! Outbound headers, one structure per reply shape.
//!
//! Stored delivery headers carry a `headsum` over the framed header; the
//! sum is computed on the canonical serialization with `headsum` absent
//! and then injected, so a receiver can strip the field and recompute.

use serde::{Deserialize, Serialize};

use crate::checksum::crc32c;
use crate::error::ProtoResult;
use crate::frame::pack_msg;
use crate::header::ForEntry;

/// Reply to `TmtpRev`.
#[derive(Debug, Serialize)]
pub struct TmtpRev<'a> {
    pub op: &'static str,
    pub id: &'a str,
}

impl<'a> TmtpRev<'a> {
    /// Builds the negotiation reply for the agreed revision.
    pub fn new(id: &'a str) -> TmtpRev<'a> {
        TmtpRev { op: "tmtprev", id }
    }
}

/// Reply to `Register` carrying the fresh credentials.
#[derive(Debug, Serialize)]
pub struct Registered {
    pub op: &'static str,
    pub uid: String,
    pub nodeid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Registered {
    /// Builds the registration reply.
    pub fn new(uid: String, nodeid: String) -> Registered {
        Registered {
            op: "registered",
            uid,
            nodeid,
            error: None,
        }
    }
}

/// Unsolicited informational frame; sent on successful attachment with
/// the current presence publishers, when any.
#[derive(Debug, Serialize)]
pub struct Info {
    pub op: &'static str,
    pub info: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ohi: Option<Vec<String>>,
}

impl Info {
    /// The login-ok announcement.
    pub fn login_ok() -> Info {
        Info {
            op: "info",
            info: "login ok",
            ohi: None,
        }
    }
}

/// Response to every client request that carries an `Id`.
#[derive(Debug, Serialize)]
pub struct RequestAck {
    pub op: &'static str,
    pub id: String,
    pub msgid: String,
    pub posted: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RequestAck {
    /// Builds an ack; `error` turns it into a content failure report.
    pub fn new(id: &str, msgid: String, posted: String, error: Option<String>) -> RequestAck {
        RequestAck {
            op: "ack",
            id: id.to_string(),
            msgid,
            posted,
            error,
        }
    }
}

/// Presence transition pushed to a subscriber's connection.
#[derive(Debug, Serialize)]
pub struct OhiNote<'a> {
    pub op: &'static str,
    pub from: &'a str,
    pub status: i8,
}

/// Presence status values carried in [`OhiNote::status`].
pub const OHI_ON: i8 = 1;
/// See [`OHI_ON`].
pub const OHI_OFF: i8 = 2;

impl<'a> OhiNote<'a> {
    /// Builds a presence note from publisher `from`.
    pub fn new(from: &'a str, status: i8) -> OhiNote<'a> {
        OhiNote {
            op: "ohi",
            from,
            status,
        }
    }
}

/// Terminal frame written before the server closes a connection.
#[derive(Debug, Clone, Serialize)]
pub struct Quit {
    pub error: String,
    pub op: String,
}

impl Quit {
    fn quit(error: &str) -> Quit {
        Quit {
            error: error.to_string(),
            op: "quit".to_string(),
        }
    }

    /// Clean end-of-stream from the client.
    pub fn eof() -> Quit {
        Quit {
            error: String::new(),
            op: "eof".to_string(),
        }
    }

    /// Connection-level failure; `temporary` reports whether a retry
    /// might have succeeded.
    pub fn fail(temporary: bool, error: &str) -> Quit {
        Quit {
            error: format!("(tmp {temporary}) {error}"),
            op: "fail".to_string(),
        }
    }

    /// Read deadline expired.
    pub fn timeout() -> Quit {
        Quit::quit("connection timeout")
    }
    /// The 4-hex length prefix was malformed.
    pub fn length_bad() -> Quit {
        Quit::quit("invalid header length")
    }
    /// The JSON header was malformed or failed its template.
    pub fn header_bad() -> Quit {
        Quit::quit("invalid header")
    }
    /// A base32 credential failed to decode.
    pub fn base32_bad() -> Quit {
        Quit::quit("corrupt base32 value")
    }
    /// `TmtpRev` was repeated.
    pub fn op_redundant() -> Quit {
        Quit::quit("disallowed op repetition")
    }
    /// An authenticated-only op arrived before login.
    pub fn op_disallowed_off() -> Quit {
        Quit::quit("disallowed op on unauthenticated link")
    }
    /// `Register`/`Login` arrived on an authenticated link.
    pub fn op_disallowed_on() -> Quit {
        Quit::quit("disallowed op on connected link")
    }
    /// The first frame was not `TmtpRev`.
    pub fn need_tmtprev() -> Quit {
        Quit::quit("tmtprev was omitted")
    }
    /// Registration could not create the user.
    pub fn register_failure() -> Quit {
        Quit::quit("register failure")
    }
    /// Credentials did not verify.
    pub fn login_failure() -> Quit {
        Quit::quit("login failed")
    }
    /// The node's queue is already attached elsewhere.
    pub fn node_online() -> Quit {
        Quit::quit("node already connected")
    }
    /// Orderly logout in response to `Quit`.
    pub fn logout() -> Quit {
        Quit::quit("logout ok")
    }
    /// Payload exceeds the limit for the request type.
    pub fn datalen_limit() -> Quit {
        Quit::quit("data too long for request type")
    }
    /// Payload failed UTF-8 validation.
    pub fn data_not_utf8() -> Quit {
        Quit::quit("data not valid UTF8")
    }
}

/// Header of a stored (and later delivered) message.
///
/// Optional fields absent from a given operation are omitted from the
/// serialization entirely, keeping the checksum canonical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub op: String,
    pub id: String,
    pub from: String,
    pub datalen: i64,
    pub posted: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub datahead: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub datasum: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub gid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub act: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub newalias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub nodeid: Option<String>,
    #[serde(rename = "for", skip_serializing_if = "Option::is_none", default)]
    pub for_: Option<Vec<ForEntry>>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none", default)]
    pub type_: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub headsum: Option<u32>,
}

impl Delivery {
    /// Starts a delivery header with the always-present fields.
    pub fn new(op: &str, msgid: &str, from: &str, datalen: i64, posted: &str) -> Delivery {
        Delivery {
            op: op.to_string(),
            id: msgid.to_string(),
            from: from.to_string(),
            datalen,
            posted: posted.to_string(),
            datahead: None,
            datasum: None,
            to: None,
            gid: None,
            act: None,
            alias: None,
            newalias: None,
            node: None,
            nodeid: None,
            for_: None,
            type_: None,
            headsum: None,
        }
    }

    /// Computes `headsum` over the framed header without it, injects the
    /// sum, and returns the final framed header bytes.
    pub fn seal(mut self) -> ProtoResult<Vec<u8>> {
        self.headsum = None;
        let unsummed = pack_msg(&self, &[])?;
        self.headsum = Some(crc32c(&unsummed));
        pack_msg(&self, &[])
    }
}
