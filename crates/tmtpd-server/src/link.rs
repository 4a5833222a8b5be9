//! One client connection: framed reads, the connection state machine,
//! and dispatch into the store, directory, queues, and presence mesh.

use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use tmtpd_proto::header::{ForEntry, Header, Op};
use tmtpd_proto::ids::{make_node_id, make_uid, node_sha_from_wire};
use tmtpd_proto::reply::{Quit, Registered, RequestAck, TmtpRev};
use tmtpd_proto::{pack_msg, FrameBuf, ParsedFrame, ProtoError, ALIAS_MIN_LEN, OHI_OFF, OHI_ON, PING_DATA_MAX};
use tmtpd_queue::{Conn, Doors, OhiRegistry, OhiSet, Queue, Registry};
use tmtpd_store::{Store, StoreError};
use tmtpd_userdb::UserDb;

use crate::clock::Clock;
use crate::deadline::DeadlineReader;
use crate::post::{post_msg, Etc, PostError, Posted};

/// The connection must authenticate within this window.
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(5);

/// After login, each read must complete within this window; `Pulse`
/// frames exist to keep it satisfied.
pub const PULSE_TIMEOUT: Duration = Duration::from_secs(120);

/// Shared server state handed to every link.
pub struct LinkCtx {
    pub store: Store,
    pub udb: Arc<UserDb>,
    pub registry: Arc<Registry>,
    pub ohi: Arc<OhiRegistry>,
    pub doors: Doors,
    pub clock: Clock,
}

/// Spawns the reader task for a fresh connection.
pub fn spawn_link<S>(ctx: Arc<LinkCtx>, stream: S)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    tokio::spawn(run_link(ctx, stream));
}

struct Link {
    ctx: Arc<LinkCtx>,
    conn: Conn,
    tmtprev: String,
    uid: String,
    node_qid: String,
    queue: Option<Arc<Queue>>,
    ohi_set: Option<Arc<OhiSet>>,
}

// How the handling of one acked request resolves toward the client.
enum Outcome {
    /// Ack with msgid/posted.
    Done(Posted),
    /// Ack carrying an error message; the connection stays open.
    Failed(String),
}

async fn run_link<S>(ctx: Arc<LinkCtx>, stream: S)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let sink: Box<dyn AsyncWrite + Send + Unpin> = Box::new(write_half);
    let mut link = Link {
        ctx,
        conn: Arc::new(tokio::sync::Mutex::new(sink)),
        tmtprev: String::new(),
        uid: String::new(),
        node_qid: String::new(),
        queue: None,
        ohi_set: None,
    };
    let mut reader = DeadlineReader::until(read_half, Instant::now() + LOGIN_TIMEOUT);
    let mut frames = FrameBuf::new();

    let quit = 'conn: loop {
        let n = match reader.read(frames.space()).await {
            Ok(0) => break Quit::eof(),
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::TimedOut => break Quit::timeout(),
            Err(err) => break Quit::fail(is_temporary(&err), &err.to_string()),
        };
        frames.advance(n);
        loop {
            let parsed = match frames.parse() {
                Ok(None) => break,
                Ok(Some(parsed)) => parsed,
                Err(ProtoError::LengthBad) => break 'conn Quit::length_bad(),
                Err(_) => break 'conn Quit::header_bad(),
            };
            let data_len = parsed.header.data_len as usize;
            match link.handle_msg(&mut reader, parsed).await {
                Some(quit) => break 'conn quit,
                None => frames.release(data_len),
            }
        }
    };

    if quit.op == "eof" {
        info!(uid = %link.uid, "link closed by peer");
    } else {
        warn!(uid = %link.uid, op = %quit.op, error = %quit.error, "link closing");
        if quit.op == "quit" {
            link.write_frame(&quit).await;
        }
    }
    {
        let mut sink = link.conn.lock().await;
        let _ = sink.shutdown().await;
    }
    if let Some(queue) = &link.queue {
        queue.unlink();
    }
    if link.ohi_set.is_some() {
        for target in link.ctx.ohi.unref_publisher(&link.uid) {
            match link.ctx.udb.open_nodes(&target).await {
                Ok(nodes) => link.ctx.registry.send_ohi(&nodes, &link.uid, OHI_OFF).await,
                Err(err) => {
                    warn!(uid = %link.uid, target = %target, error = %err,
                          "offline notification skipped");
                }
            }
        }
    }
}

impl Link {
    async fn handle_msg<R>(
        &mut self,
        reader: &mut DeadlineReader<R>,
        frame: ParsedFrame,
    ) -> Option<Quit>
    where
        R: AsyncRead + Unpin,
    {
        let ctx = self.ctx.clone();
        let _recv_door = ctx.doors.recv.read().await;
        let header = frame.header;
        let mut data = frame.data;
        let op = match header.op() {
            Some(op) => op,
            None => return Some(Quit::header_bad()),
        };

        match op {
            Op::TmtpRev => {
                if !self.tmtprev.is_empty() {
                    return Some(Quit::op_redundant());
                }
            }
            Op::Register | Op::Login => {
                if self.tmtprev.is_empty() {
                    return Some(Quit::need_tmtprev());
                }
                if !self.node_qid.is_empty() {
                    return Some(Quit::op_disallowed_on());
                }
            }
            _ => {
                if self.node_qid.is_empty() {
                    return Some(Quit::op_disallowed_off());
                }
            }
        }

        match op {
            Op::TmtpRev => {
                self.tmtprev = if header.id == "1" {
                    header.id.clone()
                } else {
                    "1".to_string()
                };
                let rev = TmtpRev::new(&self.tmtprev);
                self.write_frame(&rev).await;
                None
            }
            Op::Register | Op::Login => self.handle_auth(reader, op, header).await,
            Op::UserEdit => self.handle_user_edit(reader, &header).await,
            Op::OhiEdit => self.handle_ohi_edit(reader, &header).await,
            Op::GroupInvite | Op::GroupEdit => {
                self.handle_group(reader, op, &header, &mut data).await
            }
            Op::Post => {
                let result = post_msg(
                    &self.ctx,
                    &self.uid,
                    &self.node_qid,
                    Op::Post,
                    header.data_len,
                    header.data_head,
                    header.data_sum,
                    header.for_.clone(),
                    Etc::default(),
                    &data,
                    reader,
                )
                .await;
                let outcome = match result {
                    Ok(posted) => Outcome::Done(posted),
                    Err(PostError::Conn(err)) => return Some(conn_quit(err)),
                    Err(PostError::Content(err)) => {
                        warn!(uid = %self.uid, error = %err, "post rejected");
                        Outcome::Failed(err.to_string())
                    }
                };
                self.send_ack(&header.id, outcome).await;
                None
            }
            Op::Ping => {
                if let Some(quit) = self.read_short_payload(reader, &header, &mut data).await {
                    return Some(quit);
                }
                let outcome = match self.ctx.udb.lookup(&header.to) {
                    Ok(uid) => {
                        let etc = Etc {
                            to: Some(header.to.clone()),
                            ..Etc::default()
                        };
                        let result = post_msg(
                            &self.ctx,
                            &self.uid,
                            &self.node_qid,
                            Op::Ping,
                            header.data_len,
                            header.data_head,
                            header.data_sum,
                            vec![ForEntry::user(uid)],
                            etc,
                            &data,
                            reader,
                        )
                        .await;
                        match result {
                            Ok(posted) => Outcome::Done(posted),
                            Err(PostError::Conn(err)) => return Some(conn_quit(err)),
                            Err(PostError::Content(err)) => Outcome::Failed(err.to_string()),
                        }
                    }
                    Err(err) => Outcome::Failed(err.to_string()),
                };
                self.send_ack(&header.id, outcome).await;
                None
            }
            Op::Ack => {
                if let Some(queue) = &self.queue {
                    queue.forward_ack(header.id.clone()).await;
                }
                None
            }
            Op::Pulse => None,
            Op::Quit => Some(Quit::logout()),
        }
    }

    // Register creates credentials then falls into the login path with
    // them; Login verifies the presented ones.
    async fn handle_auth<R>(
        &mut self,
        reader: &mut DeadlineReader<R>,
        op: Op,
        mut header: Header,
    ) -> Option<Quit>
    where
        R: AsyncRead + Unpin,
    {
        if op == Op::Register {
            let seed = format!(
                "{} {}",
                self.ctx.store.make_id(),
                self.ctx.clock.now().timestamp_nanos_opt().unwrap_or_default()
            );
            let uid = make_uid(&seed);
            let (node_id, node_sha) = make_node_id();
            if let Err(err) = self.ctx.udb.add_user(&uid, &node_sha).await {
                error!(uid = %uid, error = %err, "register failed");
                return Some(Quit::register_failure());
            }
            let mut ack = Registered::new(uid.clone(), node_id.clone());
            if header.new_alias != "_" {
                if header.new_alias.chars().count() < ALIAS_MIN_LEN {
                    ack.error = Some(format!("newalias must be {ALIAS_MIN_LEN}+ characters"));
                } else if let Err(err) =
                    self.ctx.udb.add_alias(&uid, "", &header.new_alias).await
                {
                    ack.error = Some(err.to_string());
                }
            }
            self.write_frame(&ack).await;
            header.uid = uid;
            header.node = node_id;
        }

        let node_sha = match node_sha_from_wire(&header.node) {
            Ok(sha) => sha,
            Err(_) => return Some(Quit::base32_bad()),
        };
        let qid = match self.ctx.udb.verify(&header.uid, &node_sha).await {
            Ok(qid) => qid,
            Err(err) => {
                warn!(uid = %header.uid, error = %err, "login verify failed");
                return Some(Quit::login_failure());
            }
        };
        let attached = match self
            .ctx
            .registry
            .attach(
                &self.ctx.store,
                &self.ctx.doors,
                &self.ctx.ohi,
                &qid,
                self.conn.clone(),
                &header.uid,
            )
            .await
        {
            Ok(attached) => attached,
            Err(err) => {
                error!(node = %qid, error = %err, "queue start failed");
                return Some(Quit::login_failure());
            }
        };
        let Some(queue) = attached else {
            return Some(Quit::node_online());
        };

        reader.roll(PULSE_TIMEOUT);
        self.uid = header.uid.clone();
        self.node_qid = qid;
        self.queue = Some(queue);

        if op == Op::Login {
            // Announce the login to the user's own nodes through the
            // normal posting path.
            let etc = Etc {
                node: Some("tbd".to_string()),
                ..Etc::default()
            };
            let result = post_msg(
                &self.ctx,
                &self.uid,
                &self.node_qid,
                Op::Login,
                0,
                0,
                0,
                vec![ForEntry::user(&self.uid)],
                etc,
                &[],
                reader,
            )
            .await;
            match result {
                Ok(_) => {}
                Err(PostError::Conn(err)) => return Some(conn_quit(err)),
                Err(PostError::Content(err)) => {
                    error!(uid = %self.uid, error = %err, "login announcement failed");
                }
            }
        }
        info!(uid = %self.uid, node = %short(&self.node_qid), "login");
        None
    }

    async fn handle_user_edit<R>(
        &mut self,
        reader: &mut DeadlineReader<R>,
        header: &Header,
    ) -> Option<Quit>
    where
        R: AsyncRead + Unpin,
    {
        let adds_node = !header.new_node.is_empty();
        let adds_alias = !header.new_alias.is_empty();
        if adds_node == adds_alias {
            return Some(Quit::header_bad());
        }

        let mut etc = Etc::default();
        let failure = if adds_alias {
            match self.ctx.udb.add_alias(&self.uid, "", &header.new_alias).await {
                Ok(()) => {
                    etc.newalias = Some(header.new_alias.clone());
                    None
                }
                Err(err) => Some(err),
            }
        } else {
            // The wire NewNode value only signals intent; the server
            // mints the credential.
            let (node_id, node_sha) = make_node_id();
            match self.ctx.udb.add_node(&self.uid, &node_sha).await {
                Ok(new_qid) => {
                    if let Err(err) = self.ctx.store.copy_dir(&self.node_qid, &new_qid) {
                        error!(from = %self.node_qid, to = %new_qid, error = %err,
                               "backlog inheritance failed");
                        std::process::exit(2);
                    }
                    etc.nodeid = Some(node_id);
                    None
                }
                Err(err) => Some(err),
            }
        };

        let outcome = match failure {
            Some(err) => {
                warn!(uid = %self.uid, error = %err, "useredit rejected");
                Outcome::Failed(err.to_string())
            }
            None => {
                let result = post_msg(
                    &self.ctx,
                    &self.uid,
                    &self.node_qid,
                    Op::UserEdit,
                    0,
                    0,
                    0,
                    vec![ForEntry::user(&self.uid)],
                    etc,
                    &[],
                    reader,
                )
                .await;
                match result {
                    Ok(posted) => Outcome::Done(posted),
                    Err(PostError::Conn(err)) => return Some(conn_quit(err)),
                    Err(PostError::Content(err)) => Outcome::Failed(err.to_string()),
                }
            }
        };
        self.send_ack(&header.id, outcome).await;
        None
    }

    async fn handle_ohi_edit<R>(
        &mut self,
        reader: &mut DeadlineReader<R>,
        header: &Header,
    ) -> Option<Quit>
    where
        R: AsyncRead + Unpin,
    {
        let subscribe = match header.type_.as_str() {
            "add" => true,
            "drop" => false,
            _ => return Some(Quit::header_bad()),
        };

        // Every target must be a known user before any edit applies.
        let mut failure = None;
        for target in &header.for_ {
            if let Err(err) = self.ctx.udb.open_nodes(&target.id).await {
                failure = Some(err);
                break;
            }
        }

        let outcome = match failure {
            Some(err) => Outcome::Failed(err.to_string()),
            None => {
                let first_edit = self.ohi_set.is_none();
                let set = match &self.ohi_set {
                    Some(set) => set.clone(),
                    None => {
                        let set = self.ctx.ohi.ref_publisher(&self.uid);
                        self.ohi_set = Some(set.clone());
                        set
                    }
                };
                let status = if subscribe { OHI_ON } else { OHI_OFF };
                for target in &header.for_ {
                    if set.edit(&target.id, subscribe) {
                        if let Ok(nodes) = self.ctx.udb.open_nodes(&target.id).await {
                            self.ctx.registry.send_ohi(&nodes, &self.uid, status).await;
                        }
                    }
                }
                if first_edit {
                    Outcome::Done(Posted {
                        msgid: String::new(),
                        posted: String::new(),
                    })
                } else {
                    let etc = Etc {
                        for_: Some(header.for_.clone()),
                        type_: Some(header.type_.clone()),
                        ..Etc::default()
                    };
                    let result = post_msg(
                        &self.ctx,
                        &self.uid,
                        &self.node_qid,
                        Op::OhiEdit,
                        0,
                        0,
                        0,
                        vec![ForEntry::user(&self.uid)],
                        etc,
                        &[],
                        reader,
                    )
                    .await;
                    match result {
                        Ok(posted) => Outcome::Done(posted),
                        Err(PostError::Conn(err)) => return Some(conn_quit(err)),
                        Err(PostError::Content(err)) => Outcome::Failed(err.to_string()),
                    }
                }
            }
        };
        self.send_ack(&header.id, outcome).await;
        None
    }

    async fn handle_group<R>(
        &mut self,
        reader: &mut DeadlineReader<R>,
        op: Op,
        header: &Header,
        data: &mut Vec<u8>,
    ) -> Option<Quit>
    where
        R: AsyncRead + Unpin,
    {
        let act = if op == Op::GroupInvite {
            "invite"
        } else {
            header.act.as_str()
        };

        let mut newalias = None;
        let acted: Result<String, tmtpd_userdb::UserDbError> = match act {
            "invite" => {
                if let Some(quit) = self.read_short_payload(reader, header, data).await {
                    return Some(quit);
                }
                match self
                    .ctx
                    .udb
                    .group_invite(&header.gid, &header.to, &header.from, &self.uid)
                    .await
                {
                    Ok(invited_uid) => {
                        let etc = Etc {
                            gid: Some(header.gid.clone()),
                            to: Some(header.to.clone()),
                            ..Etc::default()
                        };
                        let result = post_msg(
                            &self.ctx,
                            &self.uid,
                            &self.node_qid,
                            Op::GroupInvite,
                            header.data_len,
                            header.data_head,
                            header.data_sum,
                            vec![ForEntry::user(invited_uid)],
                            etc,
                            data,
                            reader,
                        )
                        .await;
                        match result {
                            Ok(_) => Ok(header.to.clone()),
                            Err(PostError::Conn(err)) => return Some(conn_quit(err)),
                            Err(PostError::Content(err)) => Err(err),
                        }
                    }
                    Err(err) => Err(err),
                }
            }
            "join" => {
                self.ctx
                    .udb
                    .group_join(&header.gid, &self.uid, &header.new_alias)
                    .await
            }
            "alias" => {
                if header.new_alias.is_empty() {
                    return Some(Quit::header_bad());
                }
                newalias = Some(header.new_alias.clone());
                self.ctx
                    .udb
                    .group_alias(&header.gid, &self.uid, &header.new_alias)
                    .await
            }
            "drop" => {
                if header.to.is_empty() {
                    return Some(Quit::header_bad());
                }
                self.ctx
                    .udb
                    .group_quit(&header.gid, &header.to, &self.uid)
                    .await
                    .map(|_| header.to.clone())
            }
            _ => return Some(Quit::header_bad()),
        };

        let outcome = match acted {
            Ok(alias) => {
                // Announce the membership change to the whole group.
                let etc = Etc {
                    gid: Some(header.gid.clone()),
                    act: Some(act.to_string()),
                    alias: Some(alias),
                    newalias,
                    ..Etc::default()
                };
                let result = post_msg(
                    &self.ctx,
                    &self.uid,
                    &self.node_qid,
                    Op::GroupEdit,
                    0,
                    0,
                    0,
                    vec![ForEntry {
                        id: header.gid.clone(),
                        kind: 2,
                    }],
                    etc,
                    &[],
                    reader,
                )
                .await;
                match result {
                    Ok(posted) => Outcome::Done(posted),
                    Err(PostError::Conn(err)) => return Some(conn_quit(err)),
                    Err(PostError::Content(err)) => Outcome::Failed(err.to_string()),
                }
            }
            Err(err) => {
                warn!(uid = %self.uid, gid = %header.gid, act = %act, error = %err,
                      "group edit rejected");
                Outcome::Failed(err.to_string())
            }
        };
        self.send_ack(&header.id, outcome).await;
        None
    }

    // Pings and invites carry short inline payloads: bounded length,
    // read fully before dispatch, and valid UTF-8.
    async fn read_short_payload<R>(
        &self,
        reader: &mut DeadlineReader<R>,
        header: &Header,
        data: &mut Vec<u8>,
    ) -> Option<Quit>
    where
        R: AsyncRead + Unpin,
    {
        if header.data_len > PING_DATA_MAX as i64 {
            return Some(Quit::datalen_limit());
        }
        let wanted = header.data_len as usize;
        while data.len() < wanted {
            let mut chunk = vec![0u8; wanted - data.len()];
            match reader.read(&mut chunk).await {
                Ok(0) => return Some(Quit::eof()),
                Ok(n) => data.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == ErrorKind::TimedOut => return Some(Quit::timeout()),
                Err(err) => return Some(Quit::fail(is_temporary(&err), &err.to_string())),
            }
        }
        if std::str::from_utf8(data).is_err() {
            return Some(Quit::data_not_utf8());
        }
        None
    }

    async fn send_ack(&self, id: &str, outcome: Outcome) {
        let ack = match outcome {
            Outcome::Done(posted) => RequestAck::new(id, posted.msgid, posted.posted, None),
            Outcome::Failed(error) => {
                RequestAck::new(id, String::new(), String::new(), Some(error))
            }
        };
        self.write_frame(&ack).await;
    }

    async fn write_frame<T: Serialize>(&self, head: &T) {
        let framed = match pack_msg(head, &[]) {
            Ok(framed) => framed,
            Err(err) => {
                error!(error = %err, "response serialization");
                return;
            }
        };
        let mut sink = self.conn.lock().await;
        if let Err(err) = sink.write_all(&framed).await {
            debug!(uid = %self.uid, error = %err, "response write failed");
        } else if let Err(err) = sink.flush().await {
            debug!(uid = %self.uid, error = %err, "response flush failed");
        }
    }
}

fn conn_quit(err: StoreError) -> Quit {
    match err {
        StoreError::UnexpectedEof { .. } => Quit::eof(),
        StoreError::Io(io) if io.kind() == ErrorKind::TimedOut => Quit::timeout(),
        StoreError::Io(io) => Quit::fail(is_temporary(&io), &io.to_string()),
        other => Quit::fail(false, &other.to_string()),
    }
}

fn is_temporary(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::WouldBlock | ErrorKind::Interrupted | ErrorKind::TimedOut
    )
}

fn short(node: &str) -> &str {
    &node[..node.len().min(7)]
}
