//! The directory proper: caches, record I/O, and the public operations.
//!
//! Every operation is idempotent on success: retrying with identical
//! parameters after a completed call returns the same result without
//! error. Content failures surface as [`UserDbError`] variants whose
//! messages are safe to echo to clients.

use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tokio::sync::OwnedRwLockReadGuard;
use tracing::warn;

use tmtpd_proto::checksum::crc32c;
use tmtpd_proto::escape::{escape_name, unescape_name};
use tmtpd_proto::ids::qid;
use tmtpd_proto::DEFUNCT_UID;

use crate::error::{UserDbError, UserDbResult};
use crate::records::{
    AliasEntry, Group, Member, MemberStatus, NodeRef, Record, RecordKind, User, USER_NODE_MAX,
};

type UserRef = Arc<tokio::sync::RwLock<User>>;
type GroupRef = Arc<tokio::sync::RwLock<Group>>;

/// The user/alias/group directory.
pub struct UserDb {
    root: PathBuf,
    temp: PathBuf,
    users: RwLock<HashMap<String, UserRef>>,
    aliases: RwLock<HashMap<String, String>>,
    groups: RwLock<HashMap<String, GroupRef>>,
}

/// Read hold on a user's node set, returned by [`UserDb::open_nodes`].
///
/// The user record stays read-locked until the guard drops, so the qid
/// list cannot go stale while a fan-out is in flight.
pub struct NodesGuard {
    qids: Vec<String>,
    _guard: OwnedRwLockReadGuard<User>,
}

impl Deref for NodesGuard {
    type Target = [String];

    fn deref(&self) -> &[String] {
        &self.qids
    }
}

impl UserDb {
    /// Opens the directory at `path`, creating its subdirectories, and
    /// runs crash recovery over `temp/`. Must complete before the
    /// listener accepts.
    pub fn open(path: impl Into<PathBuf>) -> UserDbResult<UserDb> {
        let root = path.into();
        let temp = root.join("temp");
        for dir in ["temp", "user", "alias", "group"] {
            fs::create_dir_all(root.join(dir))?;
        }

        let db = UserDb {
            root,
            temp,
            users: RwLock::new(HashMap::new()),
            aliases: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
        };
        db.recover()?;
        Ok(db)
    }

    // Finish or discard writes interrupted by a crash. Entries still in
    // `.tmp` form never committed and are dropped; others re-run the
    // finalizer.
    fn recover(&self) -> UserDbResult<()> {
        for entry in fs::read_dir(&self.temp)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".tmp") {
                fs::remove_file(entry.path())?;
                continue;
            }
            let parsed = name
                .split_once('_')
                .and_then(|(kind, escaped)| Some((RecordKind::from_dir(kind)?, escaped)));
            let Some((kind, escaped)) = parsed else {
                warn!(file = %name, "unexpected staged file");
                continue;
            };
            match unescape_name(escaped) {
                Ok(record_name) => self.complete(kind, &record_name, None)?,
                Err(err) => warn!(file = %name, error = %err, "unreadable staged name"),
            }
        }
        Ok(())
    }

    // ----- public operations -----

    /// Creates a user with one node. Succeeds idempotently if the uid
    /// already exists carrying exactly `new_node` as its first node.
    pub async fn add_user(&self, uid: &str, new_node: &str) -> UserDbResult<String> {
        if uid.is_empty() || uid.chars().any(char::is_control) {
            return Err(UserDbError::Argument(format!("unprintable uid {uid:?}")));
        }
        let user_ref = self.fetch_user(uid, true)?.ok_or_else(|| unreachable_user(uid))?;
        let mut user = user_ref.write().await;

        let first_qid = qid(uid, 1);
        if !user.nodes.is_empty() {
            if user.nodes.get(new_node).map(|n| n.num) != Some(1) {
                return Err(UserDbError::MissingNode {
                    uid: uid.to_string(),
                    node: new_node.to_string(),
                });
            }
            return Ok(first_qid);
        }

        user.nodes
            .insert(new_node.to_string(), NodeRef { defunct: false, num: 1 });
        user.non_defunct_nodes_count += 1;
        self.put_user(uid, &mut user)?;
        Ok(first_qid)
    }

    /// Appends a node to an existing user, assigning the next ordinal.
    pub async fn add_node(&self, uid: &str, new_node: &str) -> UserDbResult<String> {
        let user_ref = self
            .fetch_user(uid, false)?
            .ok_or_else(|| UserDbError::UserInvalid(uid.to_string()))?;
        let mut user = user_ref.write().await;

        if let Some(node) = user.nodes.get(new_node) {
            return Ok(qid(uid, node.num));
        }
        if user.non_defunct_nodes_count as usize == USER_NODE_MAX {
            return Err(UserDbError::MaxNodes(uid.to_string()));
        }

        let num = user.nodes.len() as u8 + 1;
        user.nodes
            .insert(new_node.to_string(), NodeRef { defunct: false, num });
        user.non_defunct_nodes_count += 1;
        user.clear_touched();
        self.put_user(uid, &mut user)?;
        Ok(qid(uid, num))
    }

    /// Marks a node defunct. The last non-defunct node cannot be
    /// dropped.
    pub async fn drop_node(&self, uid: &str, node: &str) -> UserDbResult<String> {
        let user_ref = self
            .fetch_user(uid, false)?
            .ok_or_else(|| UserDbError::UserInvalid(uid.to_string()))?;
        let mut user = user_ref.write().await;

        let Some(entry) = user.nodes.get(node).copied() else {
            return Err(UserDbError::NodeInvalid(uid.to_string()));
        };
        let node_qid = qid(uid, entry.num);
        if entry.defunct {
            return Ok(node_qid);
        }
        if user.non_defunct_nodes_count <= 1 {
            return Err(UserDbError::LastNode(uid.to_string()));
        }

        user.nodes
            .insert(node.to_string(), NodeRef { defunct: true, num: entry.num });
        user.non_defunct_nodes_count -= 1;
        user.clear_touched();
        self.put_user(uid, &mut user)?;
        Ok(node_qid)
    }

    /// Adds an alias pair (native and/or ASCII form) to a user. Both
    /// names must be unused across users and groups.
    pub async fn add_alias(&self, uid: &str, nat: &str, en: &str) -> UserDbResult<()> {
        if nat == en {
            return Err(UserDbError::Argument(format!(
                "nat and en aliases both {nat:?}"
            )));
        }
        if !en.is_empty() && !en.chars().all(|c| c.is_ascii() && !c.is_control()) {
            return Err(UserDbError::Argument(format!("unprintable alias {en:?}")));
        }
        if !nat.is_empty() && nat.chars().any(char::is_control) {
            return Err(UserDbError::Argument(format!("unprintable alias {nat:?}")));
        }

        let user_ref = self
            .fetch_user(uid, false)?
            .ok_or_else(|| UserDbError::UserInvalid(uid.to_string()))?;

        // Retry after success is a no-op.
        let added = [nat, en]
            .iter()
            .filter(|alias| {
                alias.is_empty() || self.lookup(alias).ok().as_deref() == Some(uid)
            })
            .count();
        if added == 2 {
            return Ok(());
        }

        // A group of the same name occupies the shared namespace.
        for alias in [nat, en] {
            if !alias.is_empty() && self.fetch_group(alias, false)?.is_some() {
                return Err(UserDbError::AliasTaken(alias.to_string()));
            }
        }

        let mut user = user_ref.write().await;
        let mut aliases = self.aliases.write().expect("alias cache poisoned");
        for alias in [nat, en] {
            if !alias.is_empty() {
                if let Some(owner) = aliases.get(alias) {
                    if owner != uid {
                        return Err(UserDbError::AliasTaken(alias.to_string()));
                    }
                }
            }
        }
        if !nat.is_empty() {
            aliases.insert(nat.to_string(), uid.to_string());
        }
        if !en.is_empty() {
            aliases.insert(en.to_string(), uid.to_string());
        }
        drop(aliases);

        user.clear_touched();
        user.aliases.push(AliasEntry {
            en: en.to_string(),
            nat: nat.to_string(),
            en_touched: !en.is_empty(),
            nat_touched: !nat.is_empty(),
            ..AliasEntry::default()
        });
        self.put_user(uid, &mut user)?;
        Ok(())
    }

    /// Retires an alias; its symlink is retargeted to the defunct
    /// sentinel.
    pub async fn drop_alias(&self, uid: &str, alias: &str) -> UserDbResult<()> {
        let user_ref = self
            .fetch_user(uid, false)?
            .ok_or_else(|| UserDbError::UserInvalid(uid.to_string()))?;
        let mut user = user_ref.write().await;

        for entry in &user.aliases {
            if (alias == entry.nat && entry.nat_defunct) || (alias == entry.en && entry.en_defunct)
            {
                return Ok(());
            }
        }

        if self.lookup(alias).ok().as_deref() != Some(uid) {
            return Err(UserDbError::AliasInvalid(alias.to_string()));
        }

        self.aliases
            .write()
            .expect("alias cache poisoned")
            .insert(alias.to_string(), DEFUNCT_UID.to_string());

        user.clear_touched();
        for entry in &mut user.aliases {
            if alias == entry.nat {
                entry.nat_defunct = true;
                entry.nat_touched = true;
                break;
            }
            if alias == entry.en {
                entry.en_defunct = true;
                entry.en_touched = true;
                break;
            }
        }
        self.put_user(uid, &mut user)?;
        Ok(())
    }

    /// Returns the queue id for a live node, authenticating a login.
    pub async fn verify(&self, uid: &str, node: &str) -> UserDbResult<String> {
        let user_ref = self
            .fetch_user(uid, false)?
            .ok_or_else(|| UserDbError::UserInvalid(uid.to_string()))?;
        let user = user_ref.read().await;
        match user.nodes.get(node) {
            Some(entry) if !entry.defunct => Ok(qid(uid, entry.num)),
            _ => Err(UserDbError::NodeInvalid(uid.to_string())),
        }
    }

    /// Returns the queue ids of a user's live nodes, holding the record
    /// read-locked until the guard drops.
    pub async fn open_nodes(&self, uid: &str) -> UserDbResult<NodesGuard> {
        let user_ref = self
            .fetch_user(uid, false)?
            .ok_or_else(|| UserDbError::UserInvalid(uid.to_string()))?;
        let guard = user_ref.read_owned().await;
        let qids = guard.open_qids(uid);
        Ok(NodesGuard { qids, _guard: guard })
    }

    /// Resolves an alias to its owning uid, or the defunct sentinel.
    pub fn lookup(&self, alias: &str) -> UserDbResult<String> {
        if alias.is_empty() {
            return Err(UserDbError::Argument("empty alias".to_string()));
        }
        if let Some(uid) = self.aliases.read().expect("alias cache poisoned").get(alias) {
            return Ok(uid.clone());
        }
        let Some(Record::AliasLink(target)) = self.get_record(RecordKind::Alias, alias)? else {
            return Err(UserDbError::UnknownAlias(alias.to_string()));
        };
        let mut aliases = self.aliases.write().expect("alias cache poisoned");
        Ok(match aliases.get(alias) {
            Some(raced) => raced.clone(),
            None => {
                aliases.insert(alias.to_string(), target.clone());
                target
            }
        })
    }

    /// Invites `alias` into `gid`, creating the group on first use with
    /// the invitor joined under `by_alias`.
    pub async fn group_invite(
        &self,
        gid: &str,
        alias: &str,
        by_alias: &str,
        by_uid: &str,
    ) -> UserDbResult<String> {
        let uid = self
            .lookup(alias)
            .map_err(|_| UserDbError::AliasInvalid(alias.to_string()))?;

        let group_ref = self.fetch_group(gid, true)?.ok_or_else(|| unreachable_group(gid))?;
        let mut group = group_ref.write().await;

        if group.uid.is_empty() {
            // First invite creates the group; the invitor must present
            // one of their own aliases, and the gid must not collide
            // with an existing alias.
            let invitor = self.lookup(by_alias).ok();
            if invitor.as_deref() != Some(by_uid) {
                self.groups.write().expect("group cache poisoned").remove(gid);
                return Err(UserDbError::AliasInvalid(by_alias.to_string()));
            }
            if self.lookup(gid).is_ok() {
                self.groups.write().expect("group cache poisoned").remove(gid);
                return Err(UserDbError::AliasTaken(gid.to_string()));
            }
            group.uid.insert(
                by_uid.to_string(),
                Member {
                    alias: by_alias.to_string(),
                    status: MemberStatus::Joined,
                },
            );
        } else {
            if group.uid.get(by_uid).map(|m| m.status) != Some(MemberStatus::Joined) {
                return Err(UserDbError::UserInvalid(by_uid.to_string()));
            }
            match group.uid.get(&uid).map(|m| m.status) {
                Some(MemberStatus::Invited) => return Ok(uid),
                Some(MemberStatus::Joined) => {
                    return Err(UserDbError::MemberJoined(alias.to_string()))
                }
                _ => {}
            }
        }
        group.uid.insert(
            uid.clone(),
            Member {
                alias: alias.to_string(),
                status: MemberStatus::Invited,
            },
        );
        self.put_group(gid, &mut group)?;
        Ok(uid)
    }

    /// Marks an invited (or joined) member as joined, optionally under a
    /// different alias of theirs. Returns the effective alias.
    pub async fn group_join(
        &self,
        gid: &str,
        uid: &str,
        new_alias: &str,
    ) -> UserDbResult<String> {
        let group_ref = self
            .fetch_group(gid, false)?
            .ok_or_else(|| UserDbError::GroupInvalid(gid.to_string()))?;
        let mut group = group_ref.write().await;

        let member = group.uid.get(uid).cloned();
        if let Some(member) = &member {
            if member.status == MemberStatus::Joined
                && (new_alias.is_empty() || new_alias == member.alias)
            {
                return Ok(member.alias.clone());
            }
        }
        let Some(member) = member.filter(|m| {
            matches!(m.status, MemberStatus::Invited | MemberStatus::Joined)
        }) else {
            return Err(UserDbError::UserInvalid(uid.to_string()));
        };

        let alias = if new_alias.is_empty() {
            member.alias
        } else {
            if self.lookup(new_alias).ok().as_deref() != Some(uid) {
                return Err(UserDbError::AliasInvalid(new_alias.to_string()));
            }
            new_alias.to_string()
        };
        group.uid.insert(
            uid.to_string(),
            Member {
                alias: alias.clone(),
                status: MemberStatus::Joined,
            },
        );
        self.put_group(gid, &mut group)?;
        Ok(alias)
    }

    /// Replaces a joined member's stored alias. Returns the previous
    /// alias.
    pub async fn group_alias(
        &self,
        gid: &str,
        uid: &str,
        new_alias: &str,
    ) -> UserDbResult<String> {
        let group_ref = self
            .fetch_group(gid, false)?
            .ok_or_else(|| UserDbError::GroupInvalid(gid.to_string()))?;
        let mut group = group_ref.write().await;

        let Some(member) = group
            .uid
            .get(uid)
            .filter(|m| m.status == MemberStatus::Joined)
            .cloned()
        else {
            return Err(UserDbError::UserInvalid(uid.to_string()));
        };
        if new_alias == member.alias {
            return Ok(member.alias);
        }
        if self.lookup(new_alias).ok().as_deref() != Some(uid) {
            return Err(UserDbError::AliasInvalid(new_alias.to_string()));
        }
        group.uid.insert(
            uid.to_string(),
            Member {
                alias: new_alias.to_string(),
                status: member.status,
            },
        );
        self.put_group(gid, &mut group)?;
        Ok(member.alias)
    }

    /// Quits or ejects a member. Quitting oneself reverts to invited;
    /// ejecting a joined member bars them. Returns the affected uid.
    pub async fn group_quit(
        &self,
        gid: &str,
        alias: &str,
        by_uid: &str,
    ) -> UserDbResult<String> {
        let group_ref = self
            .fetch_group(gid, false)?
            .ok_or_else(|| UserDbError::GroupInvalid(gid.to_string()))?;
        let mut group = group_ref.write().await;

        let uid = self.lookup(alias).unwrap_or_default();
        let Some(member) = group.uid.get(&uid).filter(|m| m.alias == alias).cloned() else {
            return Err(UserDbError::AliasInvalid(alias.to_string()));
        };

        let status = if by_uid == uid {
            if member.status == MemberStatus::Invited {
                return Ok(uid);
            }
            MemberStatus::Invited
        } else {
            if group.uid.get(by_uid).map(|m| m.status) != Some(MemberStatus::Joined) {
                return Err(UserDbError::UserInvalid(by_uid.to_string()));
            }
            if member.status == MemberStatus::Barred {
                return Ok(uid);
            }
            MemberStatus::Barred
        };
        group.uid.insert(
            uid.clone(),
            Member {
                alias: alias.to_string(),
                status,
            },
        );
        self.put_group(gid, &mut group)?;
        Ok(uid)
    }

    /// Lists the joined members of a group; the caller must be invited
    /// or joined.
    pub async fn group_get_users(&self, gid: &str, by_uid: &str) -> UserDbResult<Vec<String>> {
        let group_ref = self
            .fetch_group(gid, false)?
            .ok_or_else(|| UserDbError::GroupInvalid(gid.to_string()))?;
        let group = group_ref.read().await;

        if !matches!(
            group.uid.get(by_uid).map(|m| m.status),
            Some(MemberStatus::Joined | MemberStatus::Invited)
        ) {
            return Err(UserDbError::UserInvalid(by_uid.to_string()));
        }
        Ok(group
            .uid
            .iter()
            .filter(|(_, m)| m.status == MemberStatus::Joined)
            .map(|(uid, _)| uid.clone())
            .collect())
    }

    // ----- cache and record plumbing -----

    fn fetch_user(&self, uid: &str, make: bool) -> UserDbResult<Option<UserRef>> {
        if let Some(user) = self.users.read().expect("user cache poisoned").get(uid) {
            return Ok(Some(user.clone()));
        }
        let loaded = match self.get_record(RecordKind::User, uid)? {
            Some(Record::User(user)) => user,
            Some(_) => return Err(UserDbError::Checksum(format!("user/{uid}"))),
            None if make => User::default(),
            None => return Ok(None),
        };
        let mut users = self.users.write().expect("user cache poisoned");
        Ok(Some(match users.get(uid) {
            Some(raced) => raced.clone(),
            None => {
                let user = Arc::new(tokio::sync::RwLock::new(loaded));
                users.insert(uid.to_string(), user.clone());
                user
            }
        }))
    }

    fn fetch_group(&self, gid: &str, make: bool) -> UserDbResult<Option<GroupRef>> {
        if let Some(group) = self.groups.read().expect("group cache poisoned").get(gid) {
            return Ok(Some(group.clone()));
        }
        let loaded = match self.get_record(RecordKind::Group, gid)? {
            Some(Record::Group(group)) => group,
            Some(_) => return Err(UserDbError::Checksum(format!("group/{gid}"))),
            None if make => Group::default(),
            None => return Ok(None),
        };
        let mut groups = self.groups.write().expect("group cache poisoned");
        Ok(Some(match groups.get(gid) {
            Some(raced) => raced.clone(),
            None => {
                let group = Arc::new(tokio::sync::RwLock::new(loaded));
                groups.insert(gid.to_string(), group.clone());
                group
            }
        }))
    }

    // Loads one record from disk, verifying its checksum. Absent records
    // read as `None`.
    fn get_record(&self, kind: RecordKind, name: &str) -> UserDbResult<Option<Record>> {
        let path = self.root.join(kind.dir()).join(escape_name(name));
        if kind == RecordKind::Alias {
            return match fs::read_link(&path) {
                Ok(target) => Ok(Some(Record::AliasLink(
                    target.to_string_lossy().into_owned(),
                ))),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
                Err(err) => Err(err.into()),
            };
        }

        let buf = match fs::read(&path) {
            Ok(buf) => buf,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let what = format!("{}/{}", kind.dir(), name);
        match kind {
            RecordKind::User => {
                let mut user: User =
                    serde_json::from_slice(&buf).map_err(|_| UserDbError::Checksum(what.clone()))?;
                let saved = user.check_sum;
                user.check_sum = 0;
                if crc32c(&serde_json::to_vec(&user)?) != saved {
                    return Err(UserDbError::Checksum(what));
                }
                user.check_sum = saved;
                Ok(Some(Record::User(user)))
            }
            RecordKind::Group => {
                let mut group: Group =
                    serde_json::from_slice(&buf).map_err(|_| UserDbError::Checksum(what.clone()))?;
                let saved = group.check_sum;
                group.check_sum = 0;
                if crc32c(&serde_json::to_vec(&group)?) != saved {
                    return Err(UserDbError::Checksum(what));
                }
                group.check_sum = saved;
                Ok(Some(Record::Group(group)))
            }
            RecordKind::Alias => unreachable!("handled above"),
        }
    }

    fn put_user(&self, uid: &str, user: &mut User) -> UserDbResult<()> {
        user.check_sum = 0;
        let unsummed = serde_json::to_vec(&*user)?;
        user.check_sum = crc32c(&unsummed);
        let bytes = serde_json::to_vec(&*user)?;
        self.write_record(RecordKind::User, uid, &bytes, Some(user))
    }

    fn put_group(&self, gid: &str, group: &mut Group) -> UserDbResult<()> {
        group.check_sum = 0;
        let unsummed = serde_json::to_vec(&*group)?;
        group.check_sum = crc32c(&unsummed);
        let bytes = serde_json::to_vec(&*group)?;
        self.write_record(RecordKind::Group, gid, &bytes, None)
    }

    // Stage-and-commit: write `temp/<kind>_<name>.tmp` exclusively,
    // fsync, hardlink to the committed staged name, fsync `temp/`, then
    // finalize. A crash after the hardlink is finished by recovery.
    fn write_record(
        &self,
        kind: RecordKind,
        name: &str,
        bytes: &[u8],
        user: Option<&User>,
    ) -> UserDbResult<()> {
        let escaped = escape_name(name);
        let staged = self.temp.join(format!("{}_{}", kind.dir(), escaped));
        let tmp = self.temp.join(format!("{}_{}.tmp", kind.dir(), escaped));

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);

        fs::hard_link(&tmp, &staged)?;
        sync_dir(&self.temp)?;
        self.complete(kind, name, user)
    }

    // Move the committed staged file into its type directory, update any
    // touched alias symlinks, then clear the staging entries.
    fn complete(&self, kind: RecordKind, name: &str, user: Option<&User>) -> UserDbResult<()> {
        let escaped = escape_name(name);
        let staged = self.temp.join(format!("{}_{}", kind.dir(), escaped));
        let tmp = self.temp.join(format!("{}_{}.tmp", kind.dir(), escaped));
        let kind_dir = self.root.join(kind.dir());
        let final_path = kind_dir.join(&escaped);

        remove_if_present(&final_path)?;
        fs::hard_link(&staged, &final_path)?;
        sync_dir(&kind_dir)?;

        if kind == RecordKind::User {
            let loaded;
            let user = match user {
                Some(user) => user,
                None => {
                    let buf = fs::read(&final_path)?;
                    loaded = serde_json::from_slice::<User>(&buf)?;
                    &loaded
                }
            };
            let alias_dir = self.root.join(RecordKind::Alias.dir());
            let mut dirty = false;
            for entry in &user.aliases {
                if entry.en_touched {
                    relink_alias(&alias_dir, &entry.en, name, entry.en_defunct)?;
                    dirty = true;
                }
                if entry.nat_touched {
                    relink_alias(&alias_dir, &entry.nat, name, entry.nat_defunct)?;
                    dirty = true;
                }
            }
            if dirty {
                sync_dir(&alias_dir)?;
            }
        }

        fs::remove_file(&staged)?;
        remove_if_present(&tmp)?;
        Ok(())
    }
}

fn relink_alias(alias_dir: &Path, alias: &str, uid: &str, defunct: bool) -> UserDbResult<()> {
    let target = if defunct { DEFUNCT_UID } else { uid };
    let path = alias_dir.join(escape_name(alias));
    remove_if_present(&path)?;
    std::os::unix::fs::symlink(target, &path)?;
    Ok(())
}

fn remove_if_present(path: &Path) -> UserDbResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn sync_dir(path: &Path) -> UserDbResult<()> {
    let dir = fs::File::open(path)?;
    dir.sync_all()?;
    Ok(())
}

// fetch with make=true only returns None through a logic error; keep the
// message specific if that ever changes.
fn unreachable_user(uid: &str) -> UserDbError {
    UserDbError::UserInvalid(uid.to_string())
}

fn unreachable_group(gid: &str) -> UserDbError {
    UserDbError::GroupInvalid(gid.to_string())
}
