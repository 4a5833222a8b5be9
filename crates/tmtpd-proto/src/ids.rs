//! Identifier generation: uids, node ids, and the iterated node hash.

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::base32;
use crate::error::ProtoResult;

/// Byte length of the random node-id secret.
pub const NODE_ID_LEN: usize = 25;

/// Rounds of SHA-256 applied after the first when deriving a node's
/// storage name from its wire id.
pub const NODE_SHA_ITERATIONS: usize = 22_388;

/// Derives a fresh uid from a seed string (typically a store id plus a
/// timestamp). The result is an opaque 32-character base32 value.
pub fn make_uid(seed: &str) -> String {
    let digest = Sha256::digest(seed.as_bytes());
    base32::encode(&digest[..20])
}

/// Generates a new node id, returning the wire form (40-character base32
/// of 25 random bytes) and its storage hash.
pub fn make_node_id() -> (String, String) {
    let mut raw = [0u8; NODE_ID_LEN];
    OsRng.fill_bytes(&mut raw);
    (base32::encode(&raw), node_to_sha(&raw))
}

/// Recovers the storage hash for a wire node id received at login.
pub fn node_sha_from_wire(node: &str) -> ProtoResult<String> {
    let raw = base32::decode(node)?;
    Ok(node_to_sha(&raw))
}

// SHA-256 iterated to make brute-forcing a leaked storage name
// impractical; the trailing padding of the 32-byte encoding is dropped.
fn node_to_sha(raw: &[u8]) -> String {
    let mut digest = Sha256::digest(raw);
    for _ in 0..NODE_SHA_ITERATIONS {
        digest = Sha256::digest(digest);
    }
    let mut text = base32::encode(&digest);
    text.truncate(text.len() - 4);
    text
}

/// Formats the queue identifier for one of a user's nodes.
pub fn qid(uid: &str, num: u8) -> String {
    format!("{uid}.{num:02x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_is_opaque_base32() {
        let uid = make_uid("0000000000000001 12 345678");
        assert_eq!(uid.len(), 32);
        assert!(uid.bytes().all(|b| base32::ALPHABET.contains(&b)));
        assert_ne!(uid, make_uid("0000000000000002 12 345678"));
    }

    #[test]
    fn node_id_round_trips_to_same_sha() {
        let (wire, sha) = make_node_id();
        assert_eq!(wire.len(), 40);
        assert_eq!(sha.len(), 52);
        assert_eq!(node_sha_from_wire(&wire).unwrap(), sha);
    }

    #[test]
    fn distinct_nodes_hash_apart() {
        let (_, a) = make_node_id();
        let (_, b) = make_node_id();
        assert_ne!(a, b);
    }

    #[test]
    fn qid_format() {
        assert_eq!(qid("XYZ", 1), "XYZ.01");
        assert_eq!(qid("XYZ", 100), "XYZ.64");
    }
}
