//! The posting path: store a message once, hardlink it into every
//! recipient node's queue, and wake the live queues.

use std::collections::HashSet;

use tokio::io::AsyncRead;
use tracing::error;

use tmtpd_proto::header::{ForEntry, ForType, Op};
use tmtpd_proto::reply::Delivery;
use tmtpd_store::StoreError;
use tmtpd_userdb::UserDbError;

use crate::link::LinkCtx;

/// Operation-specific fields spliced into a delivery header.
#[derive(Debug, Default)]
pub struct Etc {
    pub to: Option<String>,
    pub gid: Option<String>,
    pub act: Option<String>,
    pub alias: Option<String>,
    pub newalias: Option<String>,
    pub node: Option<String>,
    pub nodeid: Option<String>,
    pub for_: Option<Vec<ForEntry>>,
    pub type_: Option<String>,
}

/// A completed post.
#[derive(Debug, Clone)]
pub struct Posted {
    /// The allocated message id.
    pub msgid: String,
    /// The `posted` timestamp stamped on the delivery header.
    pub posted: String,
}

/// Why a post did not complete.
#[derive(Debug)]
pub enum PostError {
    /// The client stream failed while supplying the payload; the link
    /// must close.
    Conn(StoreError),
    /// Recipient validation failed; reported in the request's ack.
    Content(UserDbError),
}

/// Stores one message and fans it out to every node selected by
/// `entries` plus the sender's own uid. The sender's attached node is
/// skipped unless a non-self selector also named the sender.
#[allow(clippy::too_many_arguments)]
pub async fn post_msg<R>(
    ctx: &LinkCtx,
    uid: &str,
    node_qid: &str,
    op: Op,
    data_len: i64,
    data_head: i64,
    data_sum: u64,
    entries: Vec<ForEntry>,
    etc: Etc,
    data: &[u8],
    reader: &mut R,
) -> Result<Posted, PostError>
where
    R: AsyncRead + Unpin,
{
    let msgid = ctx.store.make_id();
    let posted = ctx.clock.posted();

    let mut head = Delivery::new(op.delivery_op(), &msgid, uid, data_len, &posted);
    if data_head != 0 {
        head.datahead = Some(data_head);
    }
    if data_sum != 0 {
        head.datasum = Some(data_sum);
    }
    head.to = etc.to;
    head.gid = etc.gid;
    head.act = etc.act;
    head.alias = etc.alias;
    head.newalias = etc.newalias;
    head.node = etc.node;
    head.nodeid = etc.nodeid;
    head.for_ = etc.for_;
    head.type_ = etc.type_;

    let framed = match head.seal() {
        Ok(framed) => framed,
        Err(err) => {
            error!(error = %err, "delivery header unserializable");
            std::process::exit(2);
        }
    };

    if let Err(err) = ctx
        .store
        .recv_file(&msgid, &framed, data, reader, data_len as u64)
        .await
    {
        let _ = ctx.store.rm_file(&msgid);
        return Err(PostError::Conn(err));
    }

    let result = fan_out(ctx, uid, node_qid, &msgid, entries).await;
    if let Err(err) = ctx.store.rm_file(&msgid) {
        error!(msgid = %msgid, error = %err, "staged message cleanup failed");
    }
    result.map_err(PostError::Content)?;
    Ok(Posted { msgid, posted })
}

// Expands selectors into a deduplicated node set, then links and wakes
// each node under its directory read lock. Recipient node sets stay
// read-locked (via open_nodes guards) until every link is on disk.
async fn fan_out(
    ctx: &LinkCtx,
    uid: &str,
    node_qid: &str,
    msgid: &str,
    mut entries: Vec<ForEntry>,
) -> Result<(), UserDbError> {
    entries.push(ForEntry::self_uid(uid));

    let mut for_nodes = HashSet::new();
    let mut for_my_uid = false;
    let mut guards = Vec::new();
    for entry in &entries {
        let kind = entry.for_type().unwrap_or(ForType::User);
        let uids = match kind {
            ForType::GroupAll | ForType::GroupExcl => {
                ctx.udb.group_get_users(&entry.id, uid).await?
            }
            _ => vec![entry.id.clone()],
        };
        for target in uids {
            if kind == ForType::GroupExcl && target == uid {
                continue;
            }
            let nodes = ctx.udb.open_nodes(&target).await?;
            for qid in nodes.iter() {
                for_nodes.insert(qid.clone());
            }
            for_my_uid = for_my_uid || (target == uid && kind != ForType::SelfUid);
            guards.push(nodes);
        }
    }

    for node in &for_nodes {
        if node == node_qid && !for_my_uid {
            continue;
        }
        let entry = ctx.registry.get_node(node);
        let dir_lock = entry.queue.read().await;
        let linked = ctx
            .store
            .put_link(msgid, node, msgid)
            .and_then(|()| ctx.store.sync_dirs(node));
        if let Err(err) = linked {
            // The hardlink fan-out is the durability contract; a store
            // that cannot honor it has no good continuation.
            error!(node = %node, msgid = %msgid, error = %err, "fan-out link failed");
            std::process::exit(2);
        }
        if let Some(queue) = &*dir_lock {
            queue.enqueue(msgid.to_string()).await;
        }
    }
    Ok(())
}
