//! On-disk record shapes.
//!
//! `User` and `Group` serialize to JSON with a `CheckSum` field holding a
//! CRC32C over the record serialized with the field zeroed. Maps are
//! ordered so serialization is canonical and the sum reproducible.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tmtpd_proto::ids::qid;

/// Maximum nodes a user may accumulate, defunct ones included.
pub const USER_NODE_MAX: usize = 100;

/// One node entry on a user record, keyed by the node's storage hash.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeRef {
    /// Retired nodes stay on the record but cannot log in.
    pub defunct: bool,
    /// Ordinal 1..=100; names the node's queue via [`qid`].
    pub num: u8,
}

/// One alias entry on a user record: a native-script name, an ASCII
/// name, or both. Touched bits mark symlinks the next commit must
/// rewrite.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AliasEntry {
    pub en: String,
    pub nat: String,
    pub en_defunct: bool,
    pub nat_defunct: bool,
    pub en_touched: bool,
    pub nat_touched: bool,
}

/// A user record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct User {
    /// Node storage hash → node entry.
    pub nodes: BTreeMap<String, NodeRef>,
    pub non_defunct_nodes_count: u32,
    pub aliases: Vec<AliasEntry>,
    /// Opaque authentication blob, carried but not interpreted here.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub auth: Option<serde_json::Value>,
    pub check_sum: u32,
}

impl User {
    /// Clears all touched bits; called before a mutation marks its own.
    pub fn clear_touched(&mut self) {
        for alias in &mut self.aliases {
            alias.en_touched = false;
            alias.nat_touched = false;
        }
    }

    /// Queue ids of all non-defunct nodes.
    pub fn open_qids(&self, uid: &str) -> Vec<String> {
        self.nodes
            .values()
            .filter(|n| !n.defunct)
            .map(|n| qid(uid, n.num))
            .collect()
    }
}

/// Membership status within a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MemberStatus {
    /// Invited but not yet joined; receives the invite delivery only.
    Invited = 1,
    /// Full member; receives group posts.
    Joined = 2,
    /// Removed by another member; excluded until re-invited.
    Barred = 3,
}

impl From<MemberStatus> for u8 {
    fn from(status: MemberStatus) -> u8 {
        status as u8
    }
}

impl TryFrom<u8> for MemberStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<MemberStatus, String> {
        match value {
            1 => Ok(MemberStatus::Invited),
            2 => Ok(MemberStatus::Joined),
            3 => Ok(MemberStatus::Barred),
            other => Err(format!("invalid member status {other}")),
        }
    }
}

/// One member entry on a group record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Member {
    /// The alias the member was invited or joined under.
    pub alias: String,
    pub status: MemberStatus,
}

/// A group record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Group {
    /// Member uid → membership entry.
    pub uid: BTreeMap<String, Member>,
    pub check_sum: u32,
}

/// The record types stored under the directory root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    User,
    Alias,
    Group,
}

impl RecordKind {
    /// Subdirectory name for this kind; doubles as the staged-file
    /// prefix in `temp/`.
    pub fn dir(self) -> &'static str {
        match self {
            RecordKind::User => "user",
            RecordKind::Alias => "alias",
            RecordKind::Group => "group",
        }
    }

    /// Parses a staged-file prefix back to a kind.
    pub fn from_dir(name: &str) -> Option<RecordKind> {
        match name {
            "user" => Some(RecordKind::User),
            "alias" => Some(RecordKind::Alias),
            "group" => Some(RecordKind::Group),
            _ => None,
        }
    }
}

/// A record loaded from disk, one variant per kind.
#[derive(Debug)]
pub enum Record {
    User(User),
    Group(Group),
    /// An alias symlink's target: a uid or the defunct sentinel.
    AliasLink(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_status_round_trips() {
        for status in [MemberStatus::Invited, MemberStatus::Joined, MemberStatus::Barred] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(serde_json::from_str::<MemberStatus>(&json).unwrap(), status);
        }
        assert!(serde_json::from_str::<MemberStatus>("0").is_err());
        assert!(serde_json::from_str::<MemberStatus>("4").is_err());
    }

    #[test]
    fn user_serialization_is_canonical() {
        let mut user = User::default();
        user.nodes.insert("B".into(), NodeRef { defunct: false, num: 2 });
        user.nodes.insert("A".into(), NodeRef { defunct: false, num: 1 });
        user.non_defunct_nodes_count = 2;
        let a = serde_json::to_vec(&user).unwrap();
        let b = serde_json::to_vec(&user).unwrap();
        assert_eq!(a, b);
        // Map keys serialize in order regardless of insertion.
        let text = String::from_utf8(a).unwrap();
        assert!(text.find("\"A\"").unwrap() < text.find("\"B\"").unwrap());
    }

    #[test]
    fn open_qids_skips_defunct() {
        let mut user = User::default();
        user.nodes.insert("A".into(), NodeRef { defunct: false, num: 1 });
        user.nodes.insert("B".into(), NodeRef { defunct: true, num: 2 });
        user.non_defunct_nodes_count = 1;
        assert_eq!(user.open_qids("U"), vec!["U.01".to_string()]);
    }
}
