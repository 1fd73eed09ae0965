//! The attribute-cache pipeline stage.
//!
//! Every operation follows the same template: consult the cache where the
//! contract allows, call the next component, then update the cache from the
//! outcome. Downstream calls are always awaited *before* the tree's write
//! lock is taken, so a slow backend never blocks concurrent cache reads; the
//! `parking_lot` guards are scoped so they can never be held across an
//! `.await`.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use nimbus_pipeline::{path, Attributes, Component, DirPage, FsError, FsResult, Handle};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::item::ListingPage;
use crate::settings::CacheSettings;
use crate::sweeper::Sweeper;
use crate::tree::CacheTree;

/// Read-only view of one cached entry, for stats and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryView {
    /// Whether the cached data is usable without a refetch.
    pub valid: bool,
    /// Whether the entry exists (meaningful only while `valid`).
    pub exists: bool,
    /// Whether the backend is known to hold an object under this path.
    pub in_cloud: bool,
}

/// Outcome of a cache lookup on the `get_attr` fast path.
enum AttrLookup {
    Hit(Attributes),
    Tombstone,
    Miss,
}

/// Attribute caching stage.
///
/// Construct with [`AttrCache::new`], wire into a pipeline as an
/// `Arc<dyn Component>`, and call [`AttrCache::start`] to launch the expiry
/// sweeper. [`AttrCache::shutdown`] stops the sweeper and blocks until it
/// acknowledges.
pub struct AttrCache {
    next: Arc<dyn Component>,
    settings: CacheSettings,
    tree: Arc<RwLock<CacheTree>>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl AttrCache {
    /// Creates the cache in front of `next`.
    #[must_use]
    pub fn new(next: Arc<dyn Component>, settings: CacheSettings) -> Self {
        let tree = Arc::new(RwLock::new(CacheTree::new(settings.max_entries)));
        Self {
            next,
            settings,
            tree,
            sweeper: Mutex::new(None),
        }
    }

    /// Launches the background expiry sweeper. Idempotent.
    pub fn start(&self) {
        let mut guard = self.sweeper.lock();
        if guard.is_none() {
            *guard = Some(Sweeper::spawn(
                Arc::clone(&self.tree),
                self.settings.timeout,
                self.settings.sweep_interval(),
            ));
        }
    }

    /// Stops the sweeper and waits for its completion signal. The stage is
    /// still usable afterwards (as a pass-through with lazy expiry only).
    pub async fn shutdown(&self) {
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.shutdown().await;
        }
    }

    /// Number of cached entries (root excluded).
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.tree.read().entry_count()
    }

    /// Snapshot of one entry's state, if cached.
    #[must_use]
    pub fn entry_view(&self, name: &str) -> Option<EntryView> {
        let tree = self.tree.read();
        let item = tree.get(path::trim_dir(name))?;
        Some(EntryView {
            valid: item.valid(),
            exists: item.exists(),
            in_cloud: item.in_cloud(),
        })
    }

    /// Whether a live (valid, existing) entry is cached for `name`.
    fn live_in_cache(&self, name: &str) -> bool {
        self.tree
            .read()
            .get(path::trim_dir(name))
            .is_some_and(|item| item.valid() && item.exists())
    }

    /// Cache-side of `get_attr`: decide whether the entry can be served
    /// without a downstream call.
    fn lookup_attr(&self, name: &str) -> AttrLookup {
        let tree = self.tree.read();
        let Some(item) = tree.get(path::trim_dir(name)) else {
            return AttrLookup::Miss;
        };
        if !item.valid() || !item.is_fresh(self.settings.timeout) {
            return AttrLookup::Miss;
        }
        if item.deleted() {
            return AttrLookup::Tombstone;
        }
        // Entries whose metadata was never fetched (listing-derived) are only
        // served when the symlink shortcut allows skipping metadata.
        if item.attr.metadata_retrieved() || self.settings.no_symlinks {
            AttrLookup::Hit(item.attr.clone())
        } else {
            AttrLookup::Miss
        }
    }

    /// Rewrites `src_path`-prefixed `path` onto the `dst_path` prefix.
    fn rebase(src_prefix: &str, dst_prefix: &str, subpath: &str) -> String {
        format!("{dst_prefix}{}", &subpath[src_prefix.len()..])
    }
}

#[async_trait]
impl Component for AttrCache {
    async fn create_dir(&self, name: &str, mode: u32) -> FsResult<()> {
        trace!(name, "create_dir");
        if self.settings.track_dirs && self.live_in_cache(name) {
            // A live tracked entry answers the conflict locally; neither the
            // backend nor the cache is touched.
            return Err(FsError::already_exists(path::trim_dir(name)));
        }

        self.next.create_dir(name, mode).await?;

        let when = Instant::now();
        let mut tree = self.tree.write();
        if self.settings.track_dirs {
            let dir = path::trim_dir(name).to_owned();
            let mut attr = Attributes::dir(dir.as_str()).with_metadata_retrieved();
            attr.mode = mode;
            tree.insert(attr, true, when, false);
            // A freshly created directory is empty; object stores hold no
            // object for it.
            tree.mark_in_cloud(&dir, false);
        } else {
            tree.invalidate(name);
        }
        Ok(())
    }

    async fn delete_dir(&self, name: &str) -> FsResult<()> {
        trace!(name, "delete_dir");
        self.next.delete_dir(name).await?;

        let when = Instant::now();
        let mut tree = self.tree.write();
        tree.mark_deleted(name, when);
        if self.settings.track_dirs {
            tree.update_ancestors_in_cloud(path::parent_dir(name), when);
        }
        Ok(())
    }

    async fn stream_dir(&self, name: &str, token: &str) -> FsResult<DirPage> {
        trace!(name, token, "stream_dir");
        let dir = path::trim_dir(name).to_owned();

        // Step 1: serve the requested page straight from the listing cache.
        // An expired page falls through, but its entries are carried into the
        // merge below.
        let mut carried: Vec<Attributes> = Vec::new();
        if self.settings.cache_on_list {
            let tree = self.tree.read();
            if let Some(page) = tree.get(&dir).and_then(|item| item.listing.get(token)) {
                if page.is_fresh(self.settings.timeout) {
                    debug!(name, token, "listing page served from cache");
                    return Ok(DirPage {
                        entries: page.entries.clone(),
                        next_token: page.next_token.clone(),
                    });
                }
                carried.clone_from(&page.entries);
            }
        }

        let page = self.next.stream_dir(name, token).await?;

        let when = Instant::now();
        let mut tree = self.tree.write();

        // Step 2: cache every returned attribute as a listing-derived insert.
        if self.settings.cache_on_list {
            for attr in &page.entries {
                tree.insert(attr.clone(), true, when, true);
            }
        }
        if self.settings.track_dirs && !page.entries.is_empty() {
            tree.mark_ancestors_in_cloud(&dir, when);
        }

        // Steps 3-5: merge, sort, and deduplicate. Candidates are assembled
        // stale-first so the final keep-last pass prefers the freshest
        // source for any duplicated path.
        let mut combined = carried;
        if page.is_final() && self.settings.track_dirs {
            // Cache-only directories are merged on the final page only, so
            // they cannot be duplicated across pages.
            combined.extend(tree.local_only_children(&dir));
        }
        combined.extend(page.entries);
        combined.sort_by(|a, b| a.path.cmp(&b.path));
        combined.reverse();
        combined.dedup_by(|a, b| a.path == b.path);
        combined.reverse();

        // Step 6: remember the merged page under the request token.
        if self.settings.cache_on_list {
            if let Some(item) = tree.get_mut(&dir) {
                item.listing.insert(
                    token.to_owned(),
                    ListingPage {
                        entries: combined.clone(),
                        next_token: page.next_token.clone(),
                        cached_at: when,
                    },
                );
            }
        }

        Ok(DirPage {
            entries: combined,
            next_token: page.next_token,
        })
    }

    async fn get_attr(&self, name: &str) -> FsResult<Attributes> {
        trace!(name, "get_attr");
        match self.lookup_attr(name) {
            AttrLookup::Hit(attr) => {
                debug!(name, "attributes served from cache");
                return Ok(attr);
            }
            AttrLookup::Tombstone => {
                debug!(name, "tombstone served from cache");
                return Err(FsError::not_found(path::trim_dir(name)));
            }
            AttrLookup::Miss => {}
        }

        let result = self.next.get_attr(name).await;

        let when = Instant::now();
        let mut tree = self.tree.write();
        match result {
            Ok(attr) => {
                tree.insert(attr.clone(), true, when, false);
                if self.settings.track_dirs {
                    tree.mark_ancestors_in_cloud(path::parent_dir(name), when);
                }
                Ok(attr)
            }
            Err(err) if err.is_not_found() => {
                // Cache the definite negative so repeats are served locally.
                tree.insert(Attributes::file(path::trim_dir(name), 0), false, when, false);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    async fn create_file(&self, name: &str, mode: u32) -> FsResult<Handle> {
        trace!(name, "create_file");
        let handle = self.next.create_file(name, mode).await?;

        let when = Instant::now();
        let mut tree = self.tree.write();
        let mut attr = Attributes::file(path::trim_dir(name), 0).with_metadata_retrieved();
        attr.mode = mode;
        tree.insert(attr, true, when, false);
        if self.settings.track_dirs {
            tree.mark_ancestors_in_cloud(path::parent_dir(name), when);
        }
        Ok(handle)
    }

    async fn delete_file(&self, name: &str) -> FsResult<()> {
        trace!(name, "delete_file");
        self.next.delete_file(name).await?;

        let when = Instant::now();
        let mut tree = self.tree.write();
        let has_valid = tree
            .get(path::trim_dir(name))
            .is_some_and(|item| item.valid());
        if !has_valid {
            // Synthesize an entry so the tombstone below has uniform
            // semantics whether or not the path was cached.
            tree.insert(Attributes::file(path::trim_dir(name), 0), true, when, false);
        }
        tree.mark_deleted(name, when);
        if self.settings.track_dirs {
            tree.update_ancestors_in_cloud(path::parent_dir(name), when);
        }
        Ok(())
    }

    async fn rename_file(&self, src: &str, dst: &str) -> FsResult<()> {
        trace!(src, dst, "rename_file");
        self.next.rename_file(src, dst).await?;

        let when = Instant::now();
        let mut tree = self.tree.write();
        let src_attr = tree
            .get(path::trim_dir(src))
            .filter(|item| item.valid() && item.exists())
            .map(|item| item.attr.clone());
        match src_attr {
            Some(mut attr) => {
                // Carry the source attributes over so the destination can be
                // served without a refetch.
                attr.path = path::trim_dir(dst).to_owned();
                tree.insert(attr, true, when, false);
            }
            None => tree.invalidate(dst),
        }
        tree.mark_deleted(src, when);
        if self.settings.track_dirs {
            tree.update_ancestors_in_cloud(path::parent_dir(src), when);
            tree.mark_ancestors_in_cloud(path::parent_dir(dst), when);
        }
        Ok(())
    }

    async fn rename_dir(&self, src: &str, dst: &str) -> FsResult<()> {
        trace!(src, dst, "rename_dir");
        if self.settings.track_dirs && self.live_in_cache(dst) {
            return Err(FsError::already_exists(path::trim_dir(dst)));
        }

        self.next.rename_dir(src, dst).await?;

        let src_dir = path::trim_dir(src).to_owned();
        let dst_dir = path::trim_dir(dst).to_owned();
        let when = Instant::now();
        let mut tree = self.tree.write();

        if self.settings.track_dirs {
            // Copy the live source subtree onto the destination paths,
            // carrying each entry's cloud presence.
            let snapshot = tree.live_subtree(&src_dir);
            let moved_anything = !snapshot.is_empty();
            let mut moved_in_cloud = false;
            for (src_path, mut attr, in_cloud) in snapshot {
                let dst_path = Self::rebase(&src_dir, &dst_dir, &src_path);
                moved_in_cloud |= in_cloud;
                attr.path.clone_from(&dst_path);
                tree.insert(attr, true, when, false);
                tree.mark_in_cloud(&dst_path, in_cloud);
            }
            if !moved_anything {
                // Nothing cached under the source; still record the
                // destination as a cache-only directory.
                tree.insert(Attributes::dir(dst_dir.as_str()), true, when, false);
                tree.mark_in_cloud(&dst_dir, false);
            }
            tree.mark_deleted(&src_dir, when);
            tree.update_ancestors_in_cloud(path::parent_dir(&src_dir), when);
            if moved_in_cloud {
                tree.mark_ancestors_in_cloud(&dst_dir, when);
            }
        } else {
            tree.mark_deleted(&src_dir, when);
            tree.invalidate(&dst_dir);
        }
        Ok(())
    }

    async fn open_file(&self, name: &str, flags: i32, mode: u32) -> FsResult<Handle> {
        trace!(name, flags, "open_file");
        match self.next.open_file(name, flags, mode).await {
            Ok(handle) => Ok(handle),
            Err(err) if err.is_not_found() => {
                // The object vanished out of band; tombstone whatever we had.
                let mut tree = self.tree.write();
                tree.mark_deleted(name, Instant::now());
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    async fn write_file(&self, handle: &Handle, offset: u64, data: &[u8]) -> FsResult<usize> {
        trace!(path = %handle.path, offset, len = data.len(), "write_file");
        let written = self.next.write_file(handle, offset, data).await?;

        let name = path::trim_dir(&handle.path).to_owned();
        let new_end = offset + written as u64;
        let when = Instant::now();
        let mut tree = self.tree.write();
        let live = tree.get(&name).is_some_and(|item| item.valid() && item.exists());
        if live {
            if let Some(item) = tree.get_mut(&name) {
                let size = item.attr.size.max(new_end);
                item.set_size(size);
            }
        } else {
            let attr = Attributes::file(name.as_str(), new_end).with_metadata_retrieved();
            tree.insert(attr, true, when, false);
        }
        Ok(written)
    }

    async fn truncate_file(&self, name: &str, size: u64) -> FsResult<()> {
        trace!(name, size, "truncate_file");
        self.next.truncate_file(name, size).await?;

        let name = path::trim_dir(name).to_owned();
        let when = Instant::now();
        let mut tree = self.tree.write();
        let live = tree.get(&name).is_some_and(|item| item.valid() && item.exists());
        if live {
            if let Some(item) = tree.get_mut(&name) {
                item.set_size(size);
            }
        } else {
            let attr = Attributes::file(name.as_str(), size).with_metadata_retrieved();
            tree.insert(attr, true, when, false);
        }
        Ok(())
    }

    async fn copy_to_file(&self, name: &str, target: &Path) -> FsResult<()> {
        trace!(name, target = %target.display(), "copy_to_file");
        // A download changes no object state; nothing to cache.
        self.next.copy_to_file(name, target).await
    }

    async fn copy_from_file(&self, name: &str, source: &Path) -> FsResult<()> {
        trace!(name, source = %source.display(), "copy_from_file");
        self.next.copy_from_file(name, source).await?;

        let when = Instant::now();
        let mut tree = self.tree.write();
        if self.settings.track_dirs {
            // The upload behaves like a create: the chain now holds an
            // object.
            tree.mark_ancestors_in_cloud(path::parent_dir(name), when);
        }
        // Size and times now belong to the uploaded content; force a
        // refetch.
        tree.invalidate(name);
        Ok(())
    }

    async fn sync_file(&self, handle: &Handle) -> FsResult<()> {
        trace!(path = %handle.path, "sync_file");
        self.next.sync_file(handle).await?;
        self.tree.write().invalidate(&handle.path);
        Ok(())
    }

    async fn sync_dir(&self, name: &str) -> FsResult<()> {
        trace!(name, "sync_dir");
        self.next.sync_dir(name).await?;

        let mut tree = self.tree.write();
        if self.settings.track_dirs {
            tree.invalidate_files(name);
        } else {
            tree.invalidate(name);
        }
        Ok(())
    }

    async fn flush_file(&self, handle: &Handle) -> FsResult<()> {
        trace!(path = %handle.path, "flush_file");
        self.next.flush_file(handle).await?;
        self.tree.write().invalidate(&handle.path);
        Ok(())
    }

    async fn chmod(&self, name: &str, mode: u32) -> FsResult<()> {
        trace!(name, mode, "chmod");
        self.next.chmod(name, mode).await?;

        let mut tree = self.tree.write();
        if let Some(item) = tree.get_mut(path::trim_dir(name)) {
            if item.valid() && item.exists() {
                item.set_mode(mode);
            }
        }
        Ok(())
    }

    async fn chown(&self, name: &str, uid: u32, gid: u32) -> FsResult<()> {
        trace!(name, uid, gid, "chown");
        // Ownership is not represented in object storage; pass through.
        self.next.chown(name, uid, gid).await
    }

    async fn create_link(&self, name: &str, target: &str) -> FsResult<()> {
        trace!(name, target, "create_link");
        self.next.create_link(name, target).await?;

        let when = Instant::now();
        let mut tree = self.tree.write();
        let attr = Attributes::symlink(path::trim_dir(name), target).with_metadata_retrieved();
        tree.insert(attr, true, when, false);
        if self.settings.track_dirs {
            tree.mark_ancestors_in_cloud(path::parent_dir(name), when);
        }
        Ok(())
    }

    async fn commit_data(&self, name: &str) -> FsResult<()> {
        trace!(name, "commit_data");
        self.next.commit_data(name).await?;
        self.tree.write().invalidate(name);
        Ok(())
    }
}
