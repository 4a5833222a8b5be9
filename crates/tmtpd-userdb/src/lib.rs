//! User, alias, and group directory.
//!
//! Records live as CRC-protected JSON files under `user/` and `group/`;
//! aliases are symlinks resolving to the owning uid. Every write stages
//! in `temp/` and commits by hardlink plus directory fsync, so a crash
//! at any point leaves a state the startup recovery pass can finish or
//! discard. In memory, each record is cached behind its own lock; the
//! cache maps have their own.

mod db;
mod error;
mod records;

pub use db::{NodesGuard, UserDb};
pub use error::{UserDbError, UserDbResult};
pub use records::{
    AliasEntry, Group, Member, MemberStatus, NodeRef, Record, RecordKind, User, USER_NODE_MAX,
};
