//! TMTP wire protocol primitives.
//!
//! This crate holds everything both ends of a TMTP connection agree on:
//! the text framing (`HHHH` + JSON header + payload), the inbound request
//! header model with its per-operation required-field templates, the
//! outbound reply headers as a tagged sum with canonical serialization,
//! and the identifier toolbox (vowel-free base32, uid/node-id generation,
//! the iterated node hash, CRC32C, on-disk name escaping).

pub mod base32;
pub mod checksum;
pub mod error;
pub mod escape;
pub mod frame;
pub mod header;
pub mod ids;
pub mod reply;

pub use error::ProtoError;
pub use frame::{pack_msg, FrameBuf, ParsedFrame, MSG_HEADER_MAX_LEN, MSG_HEADER_MIN_LEN};
pub use header::{ForEntry, ForType, Header, Op};
pub use reply::{Delivery, Info, OhiNote, Quit, Registered, RequestAck, TmtpRev, OHI_OFF, OHI_ON};

/// Maximum payload for `Ping` and `GroupInvite` message bodies.
pub const PING_DATA_MAX: u64 = 140;

/// Minimum length of an alias requested at registration.
pub const ALIAS_MIN_LEN: usize = 8;

/// Sentinel uid that retired aliases resolve to.
pub const DEFUNCT_UID: &str = "*defunct";
