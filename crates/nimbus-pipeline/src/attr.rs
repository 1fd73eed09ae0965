//! Object attributes served by `get_attr` and directory listings.

use std::collections::HashMap;
use std::time::SystemTime;

use bitflags::bitflags;

use crate::path;

bitflags! {
    /// Property flags attached to an object's attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AttrFlags: u8 {
        /// The object is a directory.
        const DIR = 1 << 0;
        /// The object is a symbolic link.
        const SYMLINK = 1 << 1;
        /// The mode was synthesized from mount defaults, not read from the
        /// backend.
        const MODE_DEFAULT = 1 << 2;
        /// Free-form metadata was fetched along with the attributes. Listing
        /// APIs generally do not return metadata, so listing-derived
        /// attributes leave this unset.
        const METADATA_RETRIEVED = 1 << 3;
    }
}

/// Metadata for one object, keyed by its relative path.
///
/// This is the unit of exchange between pipeline stages: `get_attr` returns
/// one, `stream_dir` returns a page of them, and caching stages store them.
#[derive(Debug, Clone, PartialEq)]
pub struct Attributes {
    /// Relative path, normalized (no trailing separator).
    pub path: String,
    /// Object size in bytes. Zero for directories.
    pub size: u64,
    /// POSIX mode bits.
    pub mode: u32,
    /// Last access time.
    pub atime: SystemTime,
    /// Last content modification time.
    pub mtime: SystemTime,
    /// Last attribute change time.
    pub ctime: SystemTime,
    /// Creation time.
    pub crtime: SystemTime,
    /// Property flags.
    pub flags: AttrFlags,
    /// Free-form backend metadata (user tags, content type, ...).
    pub metadata: HashMap<String, String>,
}

impl Attributes {
    fn base(path: impl Into<String>, mode: u32, flags: AttrFlags) -> Self {
        let now = SystemTime::now();
        Self {
            path: path::trim_dir(&path.into()).to_owned(),
            size: 0,
            mode,
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
            flags,
            metadata: HashMap::new(),
        }
    }

    /// A regular file with default mode bits.
    #[must_use]
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        let mut attr = Self::base(path, 0o644, AttrFlags::MODE_DEFAULT);
        attr.size = size;
        attr
    }

    /// A directory with default mode bits.
    #[must_use]
    pub fn dir(path: impl Into<String>) -> Self {
        Self::base(path, 0o775, AttrFlags::DIR | AttrFlags::MODE_DEFAULT)
    }

    /// A symbolic link pointing at `target`.
    #[must_use]
    pub fn symlink(path: impl Into<String>, target: &str) -> Self {
        let mut attr = Self::base(
            path,
            0o777,
            AttrFlags::SYMLINK | AttrFlags::MODE_DEFAULT,
        );
        attr.size = target.len() as u64;
        attr
    }

    /// The final path component.
    #[must_use]
    pub fn name(&self) -> &str {
        path::base_name(&self.path)
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.flags.contains(AttrFlags::DIR)
    }

    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.flags.contains(AttrFlags::SYMLINK)
    }

    /// Whether free-form metadata was fetched along with these attributes.
    #[must_use]
    pub fn metadata_retrieved(&self) -> bool {
        self.flags.contains(AttrFlags::METADATA_RETRIEVED)
    }

    /// Marks the metadata as fetched and returns self, for building
    /// authoritative attributes in one expression.
    #[must_use]
    pub fn with_metadata_retrieved(mut self) -> Self {
        self.flags |= AttrFlags::METADATA_RETRIEVED;
        self
    }
}
