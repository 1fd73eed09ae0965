//! A single node of the cache tree: cached knowledge about one path.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant, SystemTime};

use nimbus_pipeline::Attributes;

/// What the cache knows about an entry's existence.
///
/// `Present` and `Absent` are both *valid* knowledge. An `Absent` entry is a
/// tombstone that lets "not found" be answered without a backend call.
/// `Unknown` means the cached data is unusable and existence is meaningless
/// until refetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Nothing usable cached; a refetch is required.
    Unknown,
    /// The entry exists with the cached attributes.
    Present,
    /// The entry is known not to exist (tombstone).
    Absent,
}

/// One cached directory-listing page, keyed by its request token.
#[derive(Debug, Clone)]
pub struct ListingPage {
    /// The merged entries served for this page.
    pub entries: Vec<Attributes>,
    /// Continuation token of the page, `None` on the final page.
    pub next_token: Option<String>,
    /// When the page was assembled. Page freshness is judged against this,
    /// independent of the owning entry's own age.
    pub cached_at: Instant,
}

impl ListingPage {
    /// Whether the page may still be served under `ttl`.
    #[must_use]
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        !ttl.is_zero() && self.cached_at.elapsed() < ttl
    }
}

/// Cached metadata for one path.
///
/// Items live in the [`CacheTree`](crate::tree::CacheTree) arena; the parent
/// link is the item's parent path (a map key, never a raw reference), and
/// `children` holds the base names of owned children.
#[derive(Debug, Clone)]
pub struct CacheItem {
    /// Last known attributes. Meaningful only while `presence` is `Present`.
    pub attr: Attributes,
    /// Timestamp of the last authoritative refresh; drives TTL expiry.
    pub cached_at: Instant,
    presence: Presence,
    /// Directory-only: set when no object known to exist in the backend sits
    /// under this directory. Cloud object stores do not represent empty
    /// directories, so such a directory exists only in this cache.
    not_in_cloud: bool,
    /// Cached listing pages, present only on directories that served
    /// `stream_dir`.
    pub listing: HashMap<String, ListingPage>,
    /// Base names of the children owned by this directory.
    pub children: BTreeSet<String>,
}

impl CacheItem {
    /// Creates an item from freshly learned attributes.
    #[must_use]
    pub fn new(attr: Attributes, exists: bool, when: Instant) -> Self {
        Self {
            attr,
            cached_at: when,
            presence: if exists {
                Presence::Present
            } else {
                Presence::Absent
            },
            not_in_cloud: false,
            listing: HashMap::new(),
            children: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn presence(&self) -> Presence {
        self.presence
    }

    /// Whether the cached data is usable without a refetch.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.presence != Presence::Unknown
    }

    /// Whether the entry exists. Only meaningful while [`valid`](Self::valid).
    #[must_use]
    pub fn exists(&self) -> bool {
        self.presence == Presence::Present
    }

    /// Whether this is a tombstone.
    #[must_use]
    pub fn deleted(&self) -> bool {
        self.presence == Presence::Absent
    }

    /// Whether the entry is younger than `ttl`. A zero `ttl` disables
    /// serving from cache, so nothing is ever fresh.
    #[must_use]
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        !ttl.is_zero() && self.cached_at.elapsed() < ttl
    }

    /// Whether the backend is known to hold an object under this path.
    /// Non-directory objects are always backed; a directory is backed unless
    /// flagged otherwise.
    #[must_use]
    pub fn in_cloud(&self) -> bool {
        !self.attr.is_dir() || !self.not_in_cloud
    }

    /// Toggles the cloud-presence flag. No-op on non-directory items.
    pub fn set_in_cloud(&mut self, in_cloud: bool) {
        if self.attr.is_dir() {
            self.not_in_cloud = !in_cloud;
        }
    }

    /// Turns the item into a tombstone: valid, non-existing, stamped with
    /// `when`. Any cached listing pages are dropped.
    pub(crate) fn tombstone(&mut self, when: Instant) {
        self.presence = Presence::Absent;
        self.cached_at = when;
        self.listing.clear();
    }

    /// Marks the cached data unusable. Existence becomes meaningless until
    /// the entry is refetched; the entry itself is not removed.
    pub(crate) fn invalidate_entry(&mut self) {
        self.presence = Presence::Unknown;
        self.listing.clear();
    }

    /// Refreshes attributes in place after an insert for a path that is
    /// already cached. Children and cloud presence survive; listing pages
    /// are dropped on a tombstone insert.
    pub(crate) fn refresh(&mut self, attr: Attributes, exists: bool, when: Instant) {
        self.attr = attr;
        self.presence = if exists {
            Presence::Present
        } else {
            Presence::Absent
        };
        self.cached_at = when;
        if !exists {
            self.listing.clear();
        }
    }

    /// Records the size after a local write or truncate, touching the
    /// modification time so a round trip is unnecessary.
    pub fn set_size(&mut self, size: u64) {
        self.attr.size = size;
        self.attr.mtime = SystemTime::now();
        self.cached_at = Instant::now();
    }

    /// Records new mode bits after a local chmod.
    pub fn set_mode(&mut self, mode: u32) {
        self.attr.mode = mode;
        self.attr.ctime = SystemTime::now();
        self.cached_at = Instant::now();
    }
}
