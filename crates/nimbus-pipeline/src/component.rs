//! The pipeline stage contract.
//!
//! Every stage (kernel binding, caches, backend) implements [`Component`]
//! and (except the backend) forwards to the next stage through the same
//! trait. Callers cannot tell from the interface whether a result came from a
//! cache or a round trip to cloud storage.

use std::path::Path;

use async_trait::async_trait;

use crate::attr::Attributes;
use crate::error::FsResult;

/// Opaque reference to an open file, passed back into `write_file`,
/// `sync_file` and `flush_file`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handle {
    /// Relative path the handle was opened on.
    pub path: String,
}

impl Handle {
    /// Creates a handle for `path`.
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// One token-addressed slice of a directory listing.
#[derive(Debug, Clone, Default)]
pub struct DirPage {
    /// Attributes of the entries on this page.
    pub entries: Vec<Attributes>,
    /// Token for the next page; `None` on the final page.
    pub next_token: Option<String>,
}

impl DirPage {
    /// Whether this is the last page of the listing.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.next_token.is_none()
    }
}

/// One async method per filesystem operation.
///
/// Paths are relative to the mount point (see [`crate::path`]). All methods
/// return [`FsResult`]; implementations must surface the distinguished
/// not-found value for missing entries and pass any other backend error
/// through unchanged.
#[async_trait]
pub trait Component: Send + Sync {
    /// Creates a directory.
    async fn create_dir(&self, name: &str, mode: u32) -> FsResult<()>;

    /// Deletes a directory and its contents.
    async fn delete_dir(&self, name: &str) -> FsResult<()>;

    /// Returns one page of a directory listing. `token` is `""` for the
    /// first page, otherwise the `next_token` of the previous page.
    async fn stream_dir(&self, name: &str, token: &str) -> FsResult<DirPage>;

    /// Fetches the attributes of one entry.
    async fn get_attr(&self, name: &str) -> FsResult<Attributes>;

    /// Creates an empty file and opens it.
    async fn create_file(&self, name: &str, mode: u32) -> FsResult<Handle>;

    /// Deletes a file.
    async fn delete_file(&self, name: &str) -> FsResult<()>;

    /// Renames a file. The destination is overwritten if it exists.
    async fn rename_file(&self, src: &str, dst: &str) -> FsResult<()>;

    /// Renames a directory and its contents.
    async fn rename_dir(&self, src: &str, dst: &str) -> FsResult<()>;

    /// Opens an existing file.
    async fn open_file(&self, name: &str, flags: i32, mode: u32) -> FsResult<Handle>;

    /// Writes `data` at `offset`, returning the number of bytes written.
    async fn write_file(&self, handle: &Handle, offset: u64, data: &[u8]) -> FsResult<usize>;

    /// Truncates (or extends) a file to `size` bytes.
    async fn truncate_file(&self, name: &str, size: u64) -> FsResult<()>;

    /// Downloads the object `name` into the local file at `target`.
    async fn copy_to_file(&self, name: &str, target: &Path) -> FsResult<()>;

    /// Uploads the local file at `source` as the object `name`.
    async fn copy_from_file(&self, name: &str, source: &Path) -> FsResult<()>;

    /// Commits buffered writes for an open file.
    async fn sync_file(&self, handle: &Handle) -> FsResult<()>;

    /// Commits buffered state for a directory subtree.
    async fn sync_dir(&self, name: &str) -> FsResult<()>;

    /// Flushes an open file on close.
    async fn flush_file(&self, handle: &Handle) -> FsResult<()>;

    /// Changes the mode bits of an entry.
    async fn chmod(&self, name: &str, mode: u32) -> FsResult<()>;

    /// Changes the ownership of an entry.
    async fn chown(&self, name: &str, uid: u32, gid: u32) -> FsResult<()>;

    /// Creates a symbolic link at `name` pointing at `target`.
    async fn create_link(&self, name: &str, target: &str) -> FsResult<()>;

    /// Commits staged data blocks for `name`.
    async fn commit_data(&self, name: &str) -> FsResult<()>;
}
