//! Message file operations: staging, hardlink fan-out, directory sync.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::idstore::IdStore;

/// Handle to the on-disk message store. Clones share the id allocator.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
    temp: PathBuf,
    ids: Arc<IdStore>,
}

impl Store {
    /// Opens the store at `root`, creating `temp/` and the NEXTID
    /// counter, and starts the id flush task.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Store> {
        let root = root.into();
        let temp = root.join("temp");
        fs::create_dir_all(&temp)?;
        let ids = Arc::new(IdStore::open(&root)?);
        Ok(Store { root, temp, ids })
    }

    /// Allocates the next message id, a 16-hex-digit monotonic counter.
    pub fn make_id(&self) -> String {
        self.ids.make_id()
    }

    /// Stages a message: creates `temp/<id>` exclusively, writes the
    /// framed header and any buffered payload, then copies exactly the
    /// remaining declared bytes from `stream` and fsyncs.
    pub async fn recv_file<R>(
        &self,
        id: &str,
        head: &[u8],
        data: &[u8],
        stream: &mut R,
        declared_len: u64,
    ) -> StoreResult<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.temp.join(id))
            .await?;
        file.write_all(head).await?;
        file.write_all(data).await?;
        let remaining = declared_len.saturating_sub(data.len() as u64);
        if remaining > 0 {
            let copied = tokio::io::copy(&mut stream.take(remaining), &mut file).await?;
            if copied < remaining {
                return Err(StoreError::UnexpectedEof {
                    wanted: declared_len,
                    got: data.len() as u64 + copied,
                });
            }
        }
        file.sync_all().await?;
        Ok(())
    }

    /// Hardlinks the staged message `src_id` into `node`'s queue
    /// directory as `dest_id`, creating the directory if needed.
    pub fn put_link(&self, src_id: &str, node: &str, dest_id: &str) -> StoreResult<()> {
        let dir = self.node_dir(node);
        fs::create_dir_all(&dir)?;
        fs::hard_link(self.temp.join(src_id), dir.join(dest_id))?;
        Ok(())
    }

    /// Fsyncs the directories referencing `node`'s queue entries: the
    /// store root, the bucket directory, and the node directory, in that
    /// order.
    pub fn sync_dirs(&self, node: &str) -> StoreResult<()> {
        sync_dir(&self.root)?;
        sync_dir(&self.bucket_dir(node))?;
        sync_dir(&self.node_dir(node))?;
        Ok(())
    }

    /// Streams the message `id` from `node`'s queue directory to `sink`.
    pub async fn send_file<W>(&self, node: &str, id: &str, sink: &mut W) -> StoreResult<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut file = tokio::fs::File::open(self.node_dir(node).join(id)).await?;
        let sent = tokio::io::copy(&mut file, sink).await?;
        sink.flush().await?;
        Ok(sent)
    }

    /// Removes the queue entry for `id` under `node`.
    pub fn rm_link(&self, node: &str, id: &str) -> StoreResult<()> {
        fs::remove_file(self.node_dir(node).join(id))?;
        Ok(())
    }

    /// Removes the staged file for `id`.
    pub fn rm_file(&self, id: &str) -> StoreResult<()> {
        fs::remove_file(self.temp.join(id))?;
        Ok(())
    }

    /// Lists `node`'s queue directory in ascending id order; absent
    /// directories read as empty.
    pub fn get_dir(&self, node: &str) -> StoreResult<Vec<String>> {
        let dir = self.node_dir(node);
        debug!(dir = %dir.display(), "read queue directory");
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort_unstable();
        Ok(names)
    }

    /// Hardlinks every entry of `node`'s queue directory into
    /// `to_node`'s, so a new node inherits its sibling's backlog.
    /// Entries acked or already copied in a previous attempt are skipped.
    pub fn copy_dir(&self, node: &str, to_node: &str) -> StoreResult<()> {
        let ids = self.get_dir(node)?;
        if ids.is_empty() {
            return Ok(());
        }
        let from_dir = self.node_dir(node);
        let to_dir = self.node_dir(to_node);
        fs::create_dir_all(&to_dir)?;
        for id in &ids {
            match fs::hard_link(from_dir.join(id), to_dir.join(id)) {
                Ok(()) => {}
                Err(err)
                    if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::AlreadyExists) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn bucket_dir(&self, node: &str) -> PathBuf {
        let bucket: String = node.chars().take(4).collect::<String>().to_lowercase();
        self.root.join(bucket)
    }

    fn node_dir(&self, node: &str) -> PathBuf {
        self.bucket_dir(node).join(node.to_lowercase())
    }
}

fn sync_dir(path: &Path) -> StoreResult<()> {
    let dir = fs::File::open(path)?;
    dir.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;

    async fn stage(store: &Store, id: &str, body: &[u8]) {
        let mut stream = &body[..];
        store
            .recv_file(id, b"0008{\"op\":1}", &[], &mut stream, body.len() as u64)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn recv_then_link_shares_one_inode() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let id = store.make_id();
        stage(&store, &id, b"hello").await;

        store.put_link(&id, "NODE1.01", &id).unwrap();
        store.put_link(&id, "NODE2.01", &id).unwrap();
        store.sync_dirs("NODE1.01").unwrap();

        let a = fs::metadata(dir.path().join("node").join("node1.01").join(&id)).unwrap();
        let b = fs::metadata(dir.path().join("node").join("node2.01").join(&id)).unwrap();
        assert_eq!(a.ino(), b.ino());
        assert_eq!(a.nlink(), 3);

        store.rm_file(&id).unwrap();
        let a = fs::metadata(dir.path().join("node").join("node1.01").join(&id)).unwrap();
        assert_eq!(a.nlink(), 2);
    }

    #[tokio::test]
    async fn recv_file_rejects_short_stream() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let mut stream = &b"ab"[..];
        let err = store
            .recv_file("0000000000000001", b"head", &[], &mut stream, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnexpectedEof { wanted: 10, got: 2 }));
    }

    #[tokio::test]
    async fn recv_file_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        stage(&store, "0000000000000001", b"x").await;
        let mut stream = &b"x"[..];
        assert!(store
            .recv_file("0000000000000001", b"h", &[], &mut stream, 1)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn send_file_streams_header_and_payload() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let id = store.make_id();
        stage(&store, &id, b"body!").await;
        store.put_link(&id, "N.01", &id).unwrap();

        let mut sink = Vec::new();
        let sent = store.send_file("N.01", &id, &mut sink).await.unwrap();
        assert_eq!(sent as usize, sink.len());
        assert_eq!(&sink, b"0008{\"op\":1}body!");
    }

    #[tokio::test]
    async fn get_dir_sorts_and_tolerates_absence() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        assert!(store.get_dir("GHOST.01").unwrap().is_empty());

        for _ in 0..3 {
            let id = store.make_id();
            stage(&store, &id, b"m").await;
            store.put_link(&id, "N.01", &id).unwrap();
        }
        let ids = store.get_dir("N.01").unwrap();
        assert_eq!(ids.len(), 3);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn copy_dir_inherits_backlog() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        for _ in 0..2 {
            let id = store.make_id();
            stage(&store, &id, b"m").await;
            store.put_link(&id, "N.01", &id).unwrap();
        }
        store.copy_dir("N.01", "N.02").unwrap();
        assert_eq!(store.get_dir("N.02").unwrap(), store.get_dir("N.01").unwrap());
        // Retry is harmless.
        store.copy_dir("N.01", "N.02").unwrap();
        assert_eq!(store.get_dir("N.02").unwrap().len(), 2);
    }
}
