//! Inbound request headers and their per-operation field templates.

use serde::{Deserialize, Serialize};

/// The operations a client may request, identified on the wire by their
/// ordinal in the `Op` header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    /// Protocol revision negotiation; must be the first frame.
    TmtpRev = 0,
    /// Create a user with a fresh uid and node.
    Register = 1,
    /// Authenticate an existing node.
    Login = 2,
    /// Add a node or alias to the logged-in user.
    UserEdit = 3,
    /// Edit the set of users notified of this user's presence.
    OhiEdit = 4,
    /// Invite an alias into a group, creating it on first use.
    GroupInvite = 5,
    /// Join / re-alias / drop membership in a group.
    GroupEdit = 6,
    /// Post a message to users and groups.
    Post = 7,
    /// Post a short UTF-8 note to a single alias.
    Ping = 8,
    /// Acknowledge receipt of a delivery.
    Ack = 9,
    /// Heartbeat; resets the read deadline.
    Pulse = 10,
    /// Orderly logout.
    Quit = 11,
}

impl Op {
    /// Maps a wire ordinal to an operation.
    pub fn from_wire(value: u8) -> Option<Op> {
        Some(match value {
            0 => Op::TmtpRev,
            1 => Op::Register,
            2 => Op::Login,
            3 => Op::UserEdit,
            4 => Op::OhiEdit,
            5 => Op::GroupInvite,
            6 => Op::GroupEdit,
            7 => Op::Post,
            8 => Op::Ping,
            9 => Op::Ack,
            10 => Op::Pulse,
            11 => Op::Quit,
            _ => return None,
        })
    }

    /// The `op` string stamped on stored deliveries originating from this
    /// operation.
    pub fn delivery_op(self) -> &'static str {
        match self {
            Op::Register => "registered",
            Op::Login => "login",
            Op::UserEdit => "user",
            Op::OhiEdit => "ohiedit",
            Op::GroupInvite => "invite",
            Op::GroupEdit => "member",
            Op::Post => "delivery",
            Op::Ping => "ping",
            _ => "",
        }
    }
}

/// Recipient selector kinds in a `For` list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForType {
    /// A single user by uid.
    User,
    /// Every joined member of a group.
    GroupAll,
    /// Every joined member of a group except the sender.
    GroupExcl,
    /// The sender's own uid; appended implicitly to every post.
    SelfUid,
}

impl ForType {
    fn from_wire(value: i8) -> Option<ForType> {
        Some(match value {
            1 => ForType::User,
            2 => ForType::GroupAll,
            3 => ForType::GroupExcl,
            4 => ForType::SelfUid,
            _ => return None,
        })
    }
}

/// One recipient selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForEntry {
    /// Target uid or gid.
    #[serde(default, rename = "Id")]
    pub id: String,
    /// Selector kind ordinal; see [`ForType`].
    #[serde(default, rename = "Type")]
    pub kind: i8,
}

impl ForEntry {
    /// Builds a selector targeting a single user.
    pub fn user(id: impl Into<String>) -> ForEntry {
        ForEntry { id: id.into(), kind: 1 }
    }

    /// Builds the implicit sender selector.
    pub fn self_uid(id: impl Into<String>) -> ForEntry {
        ForEntry { id: id.into(), kind: 4 }
    }

    /// The selector kind, if the ordinal is valid.
    pub fn for_type(&self) -> Option<ForType> {
        ForType::from_wire(self.kind)
    }
}

/// A parsed request header. All fields are optional at the serde level;
/// [`Header::check`] enforces the per-operation template.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase", deny_unknown_fields)]
pub struct Header {
    /// Operation ordinal. `None` when the field was omitted.
    pub op: Option<u8>,
    pub data_len: i64,
    pub data_head: i64,
    pub data_sum: u64,
    pub uid: String,
    pub gid: String,
    pub id: String,
    pub node: String,
    pub new_node: String,
    pub new_alias: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "Type")]
    pub type_: String,
    pub act: String,
    #[serde(rename = "For")]
    pub for_: Vec<ForEntry>,
}

// Required-field template per operation: which string fields must be
// non-empty, whether DataLen must be non-zero, and whether a For list is
// required.
struct Template {
    data_len: bool,
    uid: bool,
    gid: bool,
    id: bool,
    node: bool,
    new_node: bool,
    new_alias: bool,
    from: bool,
    to: bool,
    type_: bool,
    act: bool,
    for_: bool,
}

const fn template() -> Template {
    Template {
        data_len: false,
        uid: false,
        gid: false,
        id: false,
        node: false,
        new_node: false,
        new_alias: false,
        from: false,
        to: false,
        type_: false,
        act: false,
        for_: false,
    }
}

fn template_for(op: Op) -> Template {
    let mut t = template();
    match op {
        Op::TmtpRev => t.id = true,
        Op::Register => {
            t.new_node = true;
            t.new_alias = true;
        }
        Op::Login => {
            t.uid = true;
            t.node = true;
        }
        Op::UserEdit => t.id = true,
        Op::OhiEdit => {
            t.id = true;
            t.for_ = true;
            t.type_ = true;
        }
        Op::GroupInvite => {
            t.id = true;
            t.data_len = true;
            t.gid = true;
            t.from = true;
            t.to = true;
        }
        Op::GroupEdit => {
            t.id = true;
            t.act = true;
            t.gid = true;
        }
        Op::Post => {
            t.id = true;
            t.data_len = true;
            t.for_ = true;
        }
        Op::Ping => {
            t.id = true;
            t.data_len = true;
            t.to = true;
        }
        Op::Ack => {
            t.id = true;
            t.type_ = true;
        }
        Op::Pulse | Op::Quit => {}
    }
    t
}

impl Header {
    /// The parsed operation, if the ordinal names one.
    pub fn op(&self) -> Option<Op> {
        Op::from_wire(self.op?)
    }

    /// Validates the header against its operation's template. Ops whose
    /// template omits `DataLen` must carry none; ops requiring it must
    /// carry a positive value covering `DataHead`.
    pub fn check(&self) -> bool {
        let Some(op) = self.op() else { return false };
        let t = template_for(op);
        let fail = self.data_len < 0
            || self.data_len < self.data_head
            || t.data_len != (self.data_len != 0)
            || (t.uid && self.uid.is_empty())
            || (t.gid && self.gid.is_empty())
            || (t.id && self.id.is_empty())
            || (t.node && self.node.is_empty())
            || (t.new_node && self.new_node.is_empty())
            || (t.new_alias && self.new_alias.is_empty())
            || (t.from && self.from.is_empty())
            || (t.to && self.to.is_empty())
            || (t.type_ && self.type_.is_empty())
            || (t.act && self.act.is_empty())
            || (t.for_ && self.for_.is_empty());
        if fail {
            return false;
        }
        self.for_.iter().all(|entry| {
            !entry.id.is_empty()
                && (op != Op::Post
                    || matches!(
                        entry.for_type(),
                        Some(ForType::User | ForType::GroupAll | ForType::GroupExcl)
                    ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Header {
        serde_json::from_str(json).expect("header json")
    }

    #[test]
    fn tmtprev_requires_id() {
        assert!(parse(r#"{"Op":0,"Id":"1"}"#).check());
        assert!(!parse(r#"{"Op":0}"#).check());
    }

    #[test]
    fn missing_op_fails() {
        assert!(!parse(r#"{"Id":"1"}"#).check());
        assert!(!parse(r#"{"Op":99,"Id":"1"}"#).check());
    }

    #[test]
    fn post_requires_valid_for_types() {
        assert!(parse(r#"{"Op":7,"Id":"p","DataLen":5,"For":[{"Id":"u1","Type":1}]}"#).check());
        // Self selector is reserved for the server side.
        assert!(!parse(r#"{"Op":7,"Id":"p","DataLen":5,"For":[{"Id":"u1","Type":4}]}"#).check());
        assert!(!parse(r#"{"Op":7,"Id":"p","DataLen":5,"For":[{"Id":"","Type":1}]}"#).check());
    }

    #[test]
    fn data_len_must_match_template() {
        // Ping requires a payload.
        assert!(!parse(r#"{"Op":8,"Id":"p","To":"a","DataLen":0}"#).check());
        // UserEdit must not carry one.
        assert!(!parse(r#"{"Op":3,"Id":"e","DataLen":3}"#).check());
        // DataHead may not exceed DataLen.
        assert!(!parse(r#"{"Op":8,"Id":"p","To":"a","DataLen":3,"DataHead":9}"#).check());
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(serde_json::from_str::<Header>(r#"{"Op":10,"Bogus":1}"#).is_err());
    }

    #[test]
    fn pulse_and_quit_take_no_fields() {
        assert!(parse(r#"{"Op":10}"#).check());
        assert!(parse(r#"{"Op":11}"#).check());
    }
}
