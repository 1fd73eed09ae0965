//! The cache tree: a bounded, path-indexed arena of [`CacheItem`]s.
//!
//! Every node lives in one flat map keyed by normalized path, so lookup is
//! O(1) and no reference cycles exist: the hierarchy is expressed by each
//! item's `children` name set plus the parent path computed from the item's
//! own path. The root (path `""`) represents the mount point; it is always
//! valid, always exists, and is exempt from eviction and expiry.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use nimbus_pipeline::{path, Attributes};
use tracing::{trace, warn};

use crate::item::CacheItem;

/// Path of the permanent root item.
pub const ROOT_PATH: &str = "";

/// Bounded collection of cache items, addressable by full path and by
/// parent/child links.
#[derive(Debug)]
pub struct CacheTree {
    by_path: HashMap<String, CacheItem>,
    capacity: usize,
}

impl CacheTree {
    /// Creates a tree holding only the root, bounded at `capacity` non-root
    /// entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let mut by_path = HashMap::new();
        by_path.insert(
            ROOT_PATH.to_owned(),
            CacheItem::new(Attributes::dir(ROOT_PATH), true, Instant::now()),
        );
        Self { by_path, capacity }
    }

    /// Number of cached entries, excluding the permanent root.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.by_path.len().saturating_sub(1)
    }

    /// Maximum number of non-root entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Flat lookup. Callers normalize trailing separators first.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&CacheItem> {
        self.by_path.get(path)
    }

    /// Flat lookup for mutation. Callers normalize trailing separators first.
    pub fn get_mut(&mut self, path: &str) -> Option<&mut CacheItem> {
        self.by_path.get_mut(path)
    }

    /// Inserts (or refreshes) the entry for `attr.path`.
    ///
    /// Missing ancestors are synthesized as directories sharing the new
    /// entry's existence and timestamp. Returns `false` without touching the
    /// tree when the path is the root or when the new entry plus its
    /// synthesized ancestors would exceed capacity. Unless the insert came
    /// from a directory listing (`from_listing`), inserting an existing entry
    /// clears the parent's cached listing pages: an externally caused
    /// mutation invalidates any page in flight, while a listing-derived
    /// insert must not invalidate the very listing it populates.
    pub fn insert(
        &mut self,
        attr: Attributes,
        exists: bool,
        when: Instant,
        from_listing: bool,
    ) -> bool {
        let path = path::trim_dir(&attr.path).to_owned();
        if path == ROOT_PATH {
            return false;
        }

        let mut missing = Vec::new();
        let mut ancestor = path::parent_dir(&path).to_owned();
        while ancestor != ROOT_PATH && !self.by_path.contains_key(&ancestor) {
            missing.push(ancestor.clone());
            ancestor = path::parent_dir(&ancestor).to_owned();
        }
        let new_nodes = missing.len() + usize::from(!self.by_path.contains_key(&path));
        if self.entry_count() + new_nodes > self.capacity {
            trace!(path = %path, "attribute cache at capacity, insert rejected");
            return false;
        }

        for ancestor in missing.into_iter().rev() {
            let dir = CacheItem::new(Attributes::dir(ancestor.as_str()), exists, when);
            self.link(ancestor, dir);
        }

        let mut attr = attr;
        attr.path.clone_from(&path);
        if let Some(existing) = self.by_path.get_mut(&path) {
            existing.refresh(attr, exists, when);
        } else {
            self.link(path.clone(), CacheItem::new(attr, exists, when));
        }

        if !from_listing && exists {
            let parent = path::parent_dir(&path).to_owned();
            if let Some(parent_item) = self.by_path.get_mut(&parent) {
                parent_item.listing.clear();
            }
        }
        true
    }

    /// Inserts `item` into the map and its parent's child set. The parent
    /// must already be present.
    fn link(&mut self, path: String, item: CacheItem) {
        let parent = path::parent_dir(&path).to_owned();
        let name = path::base_name(&path).to_owned();
        match self.by_path.get_mut(&parent) {
            Some(parent_item) => {
                parent_item.children.insert(name);
            }
            None => warn!(path = %path, "linking entry with no cached parent"),
        }
        self.by_path.insert(path, item);
    }

    /// Removes `path` from the map and from its parent's child set.
    fn unlink(&mut self, path: &str) {
        self.by_path.remove(path);
        let parent = path::parent_dir(path).to_owned();
        let name = path::base_name(path);
        if let Some(parent_item) = self.by_path.get_mut(&parent) {
            parent_item.children.remove(name);
        }
    }

    /// Paths of `root` and every descendant, parents before children.
    fn subtree_paths(&self, root: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut queue = VecDeque::from([root.to_owned()]);
        while let Some(current) = queue.pop_front() {
            if let Some(item) = self.by_path.get(&current) {
                for name in &item.children {
                    queue.push_back(path::join(&current, name));
                }
            }
            out.push(current);
        }
        out
    }

    /// Tombstones `path` and its whole subtree with the same timestamp and
    /// clears the parent's cached listing pages. No-op on the root, on
    /// uncached paths, and on entries already marked deleted.
    pub fn mark_deleted(&mut self, path: &str, when: Instant) {
        let path = path::trim_dir(path);
        if path == ROOT_PATH {
            return;
        }
        match self.by_path.get(path) {
            None => {
                trace!(path, "delete for uncached path ignored");
                return;
            }
            Some(item) if item.deleted() => return,
            Some(_) => {}
        }
        for subpath in self.subtree_paths(path) {
            if let Some(item) = self.by_path.get_mut(&subpath) {
                item.tombstone(when);
            }
        }
        let parent = path::parent_dir(path).to_owned();
        if let Some(parent_item) = self.by_path.get_mut(&parent) {
            parent_item.listing.clear();
        }
    }

    /// Invalidates `path` and its whole subtree. The parent's listing pages
    /// are cleared only when the entry still exists, since an invalidated-but-
    /// existing entry may still change the listing once refetched. No-op on
    /// the root, on uncached paths, and on entries already invalid.
    pub fn invalidate(&mut self, path: &str) {
        let path = path::trim_dir(path);
        if path == ROOT_PATH {
            return;
        }
        let was_existing = match self.by_path.get(path) {
            None => return,
            Some(item) if !item.valid() => return,
            Some(item) => item.exists(),
        };
        for subpath in self.subtree_paths(path) {
            if let Some(item) = self.by_path.get_mut(&subpath) {
                item.invalidate_entry();
            }
        }
        if was_existing {
            let parent = path::parent_dir(path).to_owned();
            if let Some(parent_item) = self.by_path.get_mut(&parent) {
                parent_item.listing.clear();
            }
        }
    }

    /// Invalidates only the non-directory items under `path`, leaving nested
    /// directory state intact, and drops the directory's own listing pages.
    ///
    /// This asymmetry is deliberate: recursively invalidating directory
    /// entries would destroy cloud-presence knowledge that only listings can
    /// rebuild.
    pub fn invalidate_files(&mut self, path: &str) {
        let path = path::trim_dir(path);
        for subpath in self.subtree_paths(path) {
            if let Some(item) = self.by_path.get_mut(&subpath) {
                if item.attr.is_dir() {
                    item.listing.clear();
                } else {
                    item.invalidate_entry();
                }
            }
        }
    }

    /// Toggles the cloud-presence flag of a directory entry. The root can
    /// never be marked out of cloud.
    pub fn mark_in_cloud(&mut self, path: &str, in_cloud: bool) {
        let path = path::trim_dir(path);
        if path == ROOT_PATH && !in_cloud {
            warn!("refusing to mark the mount root out of cloud");
            return;
        }
        if let Some(item) = self.by_path.get_mut(path) {
            item.set_in_cloud(in_cloud);
        }
    }

    /// Marks `path` and its ancestors as backed by cloud storage, stopping at
    /// the first ancestor already marked (fixed point). Called when an object
    /// under the chain is confirmed to exist in the backend. Missing
    /// ancestors are synthesized; the cache never fails on an inconsistent
    /// chain.
    pub fn mark_ancestors_in_cloud(&mut self, path: &str, when: Instant) {
        let mut current = path::trim_dir(path).to_owned();
        while current != ROOT_PATH {
            let existed = self.by_path.contains_key(&current);
            if !existed {
                warn!(path = %current, "ancestor missing from attribute cache, synthesizing");
                if !self.insert(Attributes::dir(current.as_str()), true, when, false) {
                    return;
                }
            }
            let Some(item) = self.by_path.get_mut(&current) else {
                return;
            };
            if existed && item.in_cloud() {
                break;
            }
            item.set_in_cloud(true);
            current = path::parent_dir(&current).to_owned();
        }
    }

    /// Recomputes cloud presence for `path` and its ancestors after an
    /// object was removed or found missing, stopping at the first ancestor
    /// whose recomputed value is unchanged (fixed point).
    pub fn update_ancestors_in_cloud(&mut self, path: &str, when: Instant) {
        let mut current = path::trim_dir(path).to_owned();
        while current != ROOT_PATH {
            if !self.by_path.contains_key(&current) {
                warn!(path = %current, "ancestor missing from attribute cache, synthesizing");
                if !self.insert(Attributes::dir(current.as_str()), true, when, false) {
                    return;
                }
            }
            let any_in_cloud = self.any_child_in_cloud(&current);
            let Some(item) = self.by_path.get_mut(&current) else {
                return;
            };
            if item.in_cloud() == any_in_cloud {
                break;
            }
            item.set_in_cloud(any_in_cloud);
            current = path::parent_dir(&current).to_owned();
        }
    }

    fn any_child_in_cloud(&self, dir: &str) -> bool {
        let Some(item) = self.by_path.get(dir) else {
            return false;
        };
        item.children.iter().any(|name| {
            self.by_path
                .get(&path::join(dir, name))
                .is_some_and(|child| child.valid() && child.exists() && child.in_cloud())
        })
    }

    /// Attributes of children of `dir` that exist purely in the cache:
    /// live directory entries not known to the backend.
    #[must_use]
    pub fn local_only_children(&self, dir: &str) -> Vec<Attributes> {
        let dir = path::trim_dir(dir);
        let Some(item) = self.by_path.get(dir) else {
            return Vec::new();
        };
        item.children
            .iter()
            .filter_map(|name| self.by_path.get(&path::join(dir, name)))
            .filter(|child| {
                child.valid() && child.exists() && child.attr.is_dir() && !child.in_cloud()
            })
            .map(|child| child.attr.clone())
            .collect()
    }

    /// Snapshot of the live entries under `root` (parents before children):
    /// path, attributes, and cloud presence. Used by rename to copy a
    /// subtree onto new paths.
    #[must_use]
    pub fn live_subtree(&self, root: &str) -> Vec<(String, Attributes, bool)> {
        self.subtree_paths(path::trim_dir(root))
            .into_iter()
            .filter_map(|subpath| {
                let item = self.by_path.get(&subpath)?;
                (item.valid() && item.exists())
                    .then(|| (subpath, item.attr.clone(), item.in_cloud()))
            })
            .collect()
    }

    /// Collects the paths of entries older than `ttl`, root excluded. Read
    /// pass of the sweeper's double-checked scan; never mutates.
    #[must_use]
    pub fn expired_paths(&self, ttl: Duration) -> Vec<String> {
        self.by_path
            .iter()
            .filter(|(p, _)| p.as_str() != ROOT_PATH)
            .filter(|(_, item)| item.cached_at.elapsed() >= ttl)
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Deletes previously collected expiry candidates, re-checking each
    /// entry's age first, since entries may have been refreshed between the scan
    /// and this pass. Deletion is leaf-only: a candidate that still has
    /// children is skipped this sweep so a fresh descendant keeps its
    /// ancestor chain intact. Returns the number of entries removed.
    pub fn remove_expired(&mut self, candidates: &[String], ttl: Duration) -> usize {
        let mut ordered: Vec<&String> = candidates.iter().collect();
        ordered.sort_by_key(|p| std::cmp::Reverse(p.matches('/').count()));

        let mut removed = 0;
        for candidate in ordered {
            if candidate.as_str() == ROOT_PATH {
                continue;
            }
            let Some(item) = self.by_path.get(candidate.as_str()) else {
                continue;
            };
            if item.cached_at.elapsed() < ttl || !item.children.is_empty() {
                continue;
            }
            self.unlink(candidate);
            removed += 1;
        }
        removed
    }
}
