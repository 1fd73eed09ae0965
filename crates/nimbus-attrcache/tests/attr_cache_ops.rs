//! Behavioral tests for the attribute-cache stage against a scripted
//! backend.
//!
//! The mock records how often each downstream method is hit, so every test
//! can assert not just the result but whether it was served from cache.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nimbus_attrcache::{AttrCache, CacheSettings};
use nimbus_pipeline::{path, Attributes, Component, DirPage, FsError, FsResult, Handle};
use parking_lot::Mutex;

#[derive(Default)]
struct MockBackend {
    attrs: Mutex<HashMap<String, Attributes>>,
    pages: Mutex<HashMap<(String, String), DirPage>>,
    failing: Mutex<Vec<String>>,
    get_attr_calls: AtomicU64,
    stream_dir_calls: AtomicU64,
    create_dir_calls: AtomicU64,
    rename_dir_calls: AtomicU64,
    open_file_calls: AtomicU64,
}

impl MockBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn put_attr(&self, attr: Attributes) {
        self.attrs.lock().insert(attr.path.clone(), attr);
    }

    fn drop_attr(&self, name: &str) {
        self.attrs.lock().remove(name);
    }

    fn put_page(&self, dir: &str, token: &str, entries: Vec<Attributes>, next: Option<&str>) {
        self.pages.lock().insert(
            (dir.to_owned(), token.to_owned()),
            DirPage {
                entries,
                next_token: next.map(str::to_owned),
            },
        );
    }

    fn fail_path(&self, name: &str) {
        self.failing.lock().push(name.to_owned());
    }

    fn get_attr_count(&self) -> u64 {
        self.get_attr_calls.load(Ordering::Relaxed)
    }

    fn stream_dir_count(&self) -> u64 {
        self.stream_dir_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Component for MockBackend {
    async fn create_dir(&self, _name: &str, _mode: u32) -> FsResult<()> {
        self.create_dir_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delete_dir(&self, _name: &str) -> FsResult<()> {
        Ok(())
    }

    async fn stream_dir(&self, name: &str, token: &str) -> FsResult<DirPage> {
        self.stream_dir_calls.fetch_add(1, Ordering::Relaxed);
        let key = (path::trim_dir(name).to_owned(), token.to_owned());
        Ok(self.pages.lock().get(&key).cloned().unwrap_or_default())
    }

    async fn get_attr(&self, name: &str) -> FsResult<Attributes> {
        self.get_attr_calls.fetch_add(1, Ordering::Relaxed);
        let name = path::trim_dir(name);
        if self.failing.lock().iter().any(|p| p == name) {
            return Err(FsError::backend("injected failure"));
        }
        self.attrs
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| FsError::not_found(name))
    }

    async fn create_file(&self, name: &str, _mode: u32) -> FsResult<Handle> {
        Ok(Handle::new(name))
    }

    async fn delete_file(&self, _name: &str) -> FsResult<()> {
        Ok(())
    }

    async fn rename_file(&self, _src: &str, _dst: &str) -> FsResult<()> {
        Ok(())
    }

    async fn rename_dir(&self, _src: &str, _dst: &str) -> FsResult<()> {
        self.rename_dir_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn open_file(&self, name: &str, _flags: i32, _mode: u32) -> FsResult<Handle> {
        self.open_file_calls.fetch_add(1, Ordering::Relaxed);
        let name = path::trim_dir(name);
        if self.attrs.lock().contains_key(name) {
            Ok(Handle::new(name))
        } else {
            Err(FsError::not_found(name))
        }
    }

    async fn write_file(&self, _handle: &Handle, _offset: u64, data: &[u8]) -> FsResult<usize> {
        Ok(data.len())
    }

    async fn truncate_file(&self, _name: &str, _size: u64) -> FsResult<()> {
        Ok(())
    }

    async fn copy_to_file(&self, _name: &str, _target: &Path) -> FsResult<()> {
        Ok(())
    }

    async fn copy_from_file(&self, _name: &str, _source: &Path) -> FsResult<()> {
        Ok(())
    }

    async fn sync_file(&self, _handle: &Handle) -> FsResult<()> {
        Ok(())
    }

    async fn sync_dir(&self, _name: &str) -> FsResult<()> {
        Ok(())
    }

    async fn flush_file(&self, _handle: &Handle) -> FsResult<()> {
        Ok(())
    }

    async fn chmod(&self, _name: &str, _mode: u32) -> FsResult<()> {
        Ok(())
    }

    async fn chown(&self, _name: &str, _uid: u32, _gid: u32) -> FsResult<()> {
        Ok(())
    }

    async fn create_link(&self, _name: &str, _target: &str) -> FsResult<()> {
        Ok(())
    }

    async fn commit_data(&self, _name: &str) -> FsResult<()> {
        Ok(())
    }
}

fn cache_over(mock: &Arc<MockBackend>, settings: CacheSettings) -> AttrCache {
    AttrCache::new(Arc::clone(mock) as Arc<dyn Component>, settings)
}

fn known_file(path: &str, size: u64) -> Attributes {
    Attributes::file(path, size).with_metadata_retrieved()
}

// ---- get_attr ------------------------------------------------------------

#[tokio::test]
async fn getattr_served_from_cache_on_second_call() {
    let mock = MockBackend::new();
    mock.put_attr(known_file("docs/q3.txt", 42));
    let cache = cache_over(&mock, CacheSettings::default());

    let first = cache.get_attr("docs/q3.txt").await.unwrap();
    let second = cache.get_attr("docs/q3.txt").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(mock.get_attr_count(), 1, "second call must not hit backend");
}

#[tokio::test]
async fn getattr_caches_tombstone_for_missing_entry() {
    let mock = MockBackend::new();
    let cache = cache_over(&mock, CacheSettings::default());

    assert!(cache.get_attr("nope").await.unwrap_err().is_not_found());
    assert!(cache.get_attr("nope").await.unwrap_err().is_not_found());
    assert_eq!(
        mock.get_attr_count(),
        1,
        "repeat not-found must be served from the tombstone"
    );
}

#[tokio::test]
async fn zero_timeout_disables_serving_from_cache() {
    let mock = MockBackend::new();
    mock.put_attr(known_file("f", 1));
    let cache = cache_over(&mock, CacheSettings::default().timeout(Duration::ZERO));

    cache.get_attr("f").await.unwrap();
    cache.get_attr("f").await.unwrap();
    assert_eq!(mock.get_attr_count(), 2);
}

#[tokio::test]
async fn stale_entry_refetched_after_ttl() {
    let mock = MockBackend::new();
    mock.put_attr(known_file("f", 1));
    let cache = cache_over(&mock, CacheSettings::default().timeout(Duration::from_millis(40)));

    cache.get_attr("f").await.unwrap();
    cache.get_attr("f").await.unwrap();
    assert_eq!(mock.get_attr_count(), 1, "fresh entry is a cache hit");

    tokio::time::sleep(Duration::from_millis(60)).await;
    cache.get_attr("f").await.unwrap();
    assert_eq!(mock.get_attr_count(), 2, "stale entry forces a refetch");
}

#[tokio::test]
async fn opaque_backend_error_leaves_cache_untouched() {
    let mock = MockBackend::new();
    mock.fail_path("broken");
    let cache = cache_over(&mock, CacheSettings::default());

    let err = cache.get_attr("broken").await.unwrap_err();
    assert!(!err.is_not_found());
    assert!(
        cache.entry_view("broken").is_none(),
        "ambiguous failures must not be recorded"
    );
    // And it is not served from cache either.
    cache.get_attr("broken").await.unwrap_err();
    assert_eq!(mock.get_attr_count(), 2);
}

#[tokio::test]
async fn listing_entries_need_metadata_unless_symlink_shortcut() {
    // Listing-derived attributes carry no metadata, so get_attr refetches.
    let mock = MockBackend::new();
    mock.put_page("d", "", vec![Attributes::file("d/x", 1)], None);
    mock.put_attr(known_file("d/x", 1));
    let cache = cache_over(&mock, CacheSettings::default());
    cache.stream_dir("d", "").await.unwrap();
    cache.get_attr("d/x").await.unwrap();
    assert_eq!(mock.get_attr_count(), 1);

    // With the symlink shortcut enabled the metadata fetch is skippable.
    let mock = MockBackend::new();
    mock.put_page("d", "", vec![Attributes::file("d/x", 1)], None);
    let cache = cache_over(&mock, CacheSettings::default().no_symlinks(true));
    cache.stream_dir("d", "").await.unwrap();
    cache.get_attr("d/x").await.unwrap();
    assert_eq!(mock.get_attr_count(), 0, "served from the listing insert");
}

// ---- deletes and tombstones ----------------------------------------------

#[tokio::test]
async fn delete_file_serves_tombstone_without_backend() {
    let mock = MockBackend::new();
    mock.put_attr(known_file("f", 7));
    let cache = cache_over(&mock, CacheSettings::default());

    cache.get_attr("f").await.unwrap();
    cache.delete_file("f").await.unwrap();

    // The backend still knows the file; the cache must not ask it.
    assert!(cache.get_attr("f").await.unwrap_err().is_not_found());
    assert_eq!(mock.get_attr_count(), 1);
}

#[tokio::test]
async fn delete_dir_tombstones_whole_subtree() {
    let mock = MockBackend::new();
    let cache = cache_over(&mock, CacheSettings::default());

    cache.create_file("a/f1", 0o644).await.unwrap();
    cache.create_file("a/sub/f2", 0o644).await.unwrap();
    cache.delete_dir("a").await.unwrap();

    for p in ["a", "a/f1", "a/sub", "a/sub/f2"] {
        let view = cache.entry_view(p).unwrap();
        assert!(view.valid && !view.exists, "{p} should be tombstoned");
    }
    assert!(cache.get_attr("a/sub/f2").await.unwrap_err().is_not_found());
    assert_eq!(mock.get_attr_count(), 0);
}

#[tokio::test]
async fn open_file_not_found_tombstones_stale_entry() {
    let mock = MockBackend::new();
    mock.put_attr(known_file("f", 3));
    let cache = cache_over(&mock, CacheSettings::default());
    cache.get_attr("f").await.unwrap();

    // Out-of-band deletion by another client.
    mock.drop_attr("f");
    assert!(cache.open_file("f", 0, 0).await.unwrap_err().is_not_found());

    assert!(cache.get_attr("f").await.unwrap_err().is_not_found());
    assert_eq!(mock.get_attr_count(), 1, "tombstone replaced the stale entry");
}

// ---- creates, conflicts, cloud presence ----------------------------------

#[tokio::test]
async fn create_dir_conflict_answered_locally() {
    let mock = MockBackend::new();
    let cache = cache_over(&mock, CacheSettings::default());

    cache.create_dir("d", 0o755).await.unwrap();
    let err = cache.create_dir("d", 0o755).await.unwrap_err();
    assert!(matches!(err, FsError::AlreadyExists { .. }));
    assert_eq!(
        mock.create_dir_calls.load(Ordering::Relaxed),
        1,
        "conflict must be answered without a downstream call"
    );
}

#[tokio::test]
async fn created_dir_is_cache_only_until_object_appears() {
    let mock = MockBackend::new();
    let cache = cache_over(&mock, CacheSettings::default());

    cache.create_dir("d", 0o755).await.unwrap();
    let view = cache.entry_view("d").unwrap();
    assert!(view.exists);
    assert!(!view.in_cloud, "empty directories have no backing object");

    cache.create_file("d/f", 0o644).await.unwrap();
    assert!(cache.entry_view("d").unwrap().in_cloud);
}

#[tokio::test]
async fn ancestor_presence_follows_create_delete_recreate() {
    let mock = MockBackend::new();
    let cache = cache_over(&mock, CacheSettings::default());

    cache.create_file("a/b/c", 0o644).await.unwrap();
    for p in ["a", "a/b"] {
        let view = cache.entry_view(p).unwrap();
        assert!(view.exists && view.in_cloud, "{p} should be live in cloud");
    }

    cache.delete_file("a/b/c").await.unwrap();
    for p in ["a", "a/b"] {
        let view = cache.entry_view(p).unwrap();
        assert!(view.exists, "{p} still exists");
        assert!(!view.in_cloud, "{p} no longer holds any object");
    }

    cache.create_file("a/b/c", 0o644).await.unwrap();
    for p in ["a", "a/b"] {
        assert!(cache.entry_view(p).unwrap().in_cloud, "{p} restored");
    }
}

// ---- renames -------------------------------------------------------------

#[tokio::test]
async fn rename_dir_onto_existing_destination_rejected_locally() {
    let mock = MockBackend::new();
    let cache = cache_over(&mock, CacheSettings::default());

    cache.create_dir("a", 0o755).await.unwrap();
    cache.create_dir("ab", 0o755).await.unwrap();

    let err = cache.rename_dir("a", "ab").await.unwrap_err();
    assert!(matches!(err, FsError::AlreadyExists { .. }));
    assert_eq!(mock.rename_dir_calls.load(Ordering::Relaxed), 0);
    // Both directories are untouched.
    assert!(cache.entry_view("a").unwrap().exists);
    assert!(cache.entry_view("ab").unwrap().exists);
}

#[tokio::test]
async fn rename_dir_copies_subtree_and_tombstones_source() {
    let mock = MockBackend::new();
    let cache = cache_over(&mock, CacheSettings::default());

    cache.create_dir("a", 0o755).await.unwrap();
    cache.create_file("a/f", 0o644).await.unwrap();

    cache.rename_dir("a", "b").await.unwrap();

    let moved = cache.entry_view("b/f").unwrap();
    assert!(moved.valid && moved.exists);
    assert!(cache.entry_view("b").unwrap().in_cloud);

    let old = cache.entry_view("a").unwrap();
    assert!(old.valid && !old.exists, "source is tombstoned");
    assert!(cache.get_attr("a/f").await.unwrap_err().is_not_found());

    // Destination attributes were carried over, not refetched.
    cache.get_attr("b/f").await.unwrap();
    assert_eq!(mock.get_attr_count(), 0);
}

#[tokio::test]
async fn rename_file_carries_attributes_to_destination() {
    let mock = MockBackend::new();
    let cache = cache_over(&mock, CacheSettings::default());

    cache.create_file("src.txt", 0o644).await.unwrap();
    cache.rename_file("src.txt", "dst.txt").await.unwrap();

    assert!(cache.get_attr("src.txt").await.unwrap_err().is_not_found());
    let attr = cache.get_attr("dst.txt").await.unwrap();
    assert_eq!(attr.path, "dst.txt");
    assert_eq!(mock.get_attr_count(), 0, "destination served from cache");
}

// ---- local size/mode refresh ---------------------------------------------

#[tokio::test]
async fn write_and_truncate_refresh_size_without_round_trip() {
    let mock = MockBackend::new();
    let cache = cache_over(&mock, CacheSettings::default());

    let handle = cache.create_file("f", 0o644).await.unwrap();
    cache.write_file(&handle, 0, b"hello").await.unwrap();
    assert_eq!(cache.get_attr("f").await.unwrap().size, 5);

    // A write further in extends the size.
    cache.write_file(&handle, 10, b"world").await.unwrap();
    assert_eq!(cache.get_attr("f").await.unwrap().size, 15);

    cache.truncate_file("f", 2).await.unwrap();
    assert_eq!(cache.get_attr("f").await.unwrap().size, 2);
    assert_eq!(mock.get_attr_count(), 0);
}

#[tokio::test]
async fn chmod_updates_mode_in_place() {
    let mock = MockBackend::new();
    let cache = cache_over(&mock, CacheSettings::default());

    cache.create_file("f", 0o644).await.unwrap();
    cache.chmod("f", 0o600).await.unwrap();
    assert_eq!(cache.get_attr("f").await.unwrap().mode, 0o600);
    assert_eq!(mock.get_attr_count(), 0);
}

#[tokio::test]
async fn sync_dir_invalidates_files_but_not_nested_directories() {
    let mock = MockBackend::new();
    let cache = cache_over(&mock, CacheSettings::default());

    cache.create_dir("d/sub", 0o755).await.unwrap();
    cache.create_file("d/f", 0o644).await.unwrap();

    cache.sync_dir("d").await.unwrap();
    assert!(!cache.entry_view("d/f").unwrap().valid);
    assert!(cache.entry_view("d/sub").unwrap().valid);
}

// ---- directory listings --------------------------------------------------

#[tokio::test]
async fn listing_round_trip_matches_uncached_listing() {
    let pages = [
        ("", vec![("d/c", 3u64), ("d/a", 1u64)], Some("p2")),
        ("p2", vec![("d/b", 2u64)], None),
    ];
    let load = |mock: &Arc<MockBackend>| {
        for (token, entries, next) in &pages {
            let attrs = entries
                .iter()
                .map(|(p, s)| Attributes::file(*p, *s))
                .collect();
            mock.put_page("d", token, attrs, *next);
        }
    };

    let fetch_all = |cache: AttrCache| async move {
        let mut all = Vec::new();
        let mut token = String::new();
        loop {
            let page = cache.stream_dir("d", &token).await.unwrap();
            all.extend(page.entries.iter().map(|a| a.path.clone()));
            match page.next_token {
                Some(next) => token = next,
                None => break,
            }
        }
        all.sort();
        all.dedup();
        all
    };

    let mock = MockBackend::new();
    load(&mock);
    let cached = fetch_all(cache_over(&mock, CacheSettings::default())).await;

    let mock = MockBackend::new();
    load(&mock);
    let uncached = fetch_all(cache_over(
        &mock,
        CacheSettings::default().cache_on_list(false).track_dirs(false),
    ))
    .await;

    assert_eq!(cached, uncached);
    assert_eq!(cached, ["d/a", "d/b", "d/c"]);
}

#[tokio::test]
async fn listing_pages_served_from_cache_once_fetched() {
    let mock = MockBackend::new();
    mock.put_page("d", "", vec![Attributes::file("d/a", 1)], None);
    let cache = cache_over(&mock, CacheSettings::default());

    cache.stream_dir("d", "").await.unwrap();
    let again = cache.stream_dir("d", "").await.unwrap();
    assert_eq!(again.entries.len(), 1);
    assert_eq!(mock.stream_dir_count(), 1, "second page request is a cache hit");
}

#[tokio::test]
async fn listing_merges_cache_only_dirs_on_final_page_only() {
    let mock = MockBackend::new();
    mock.put_page("d", "", vec![Attributes::file("d/x", 1)], Some("p2"));
    mock.put_page("d", "p2", vec![Attributes::file("d/y", 2)], None);
    let cache = cache_over(&mock, CacheSettings::default());

    // A directory that exists only in the cache.
    cache.create_dir("d/local", 0o755).await.unwrap();

    let first = cache.stream_dir("d", "").await.unwrap();
    let first_paths: Vec<&str> = first.entries.iter().map(|a| a.path.as_str()).collect();
    assert_eq!(first_paths, ["d/x"], "cache-only entries wait for the final page");

    let last = cache.stream_dir("d", "p2").await.unwrap();
    let last_paths: Vec<&str> = last.entries.iter().map(|a| a.path.as_str()).collect();
    assert_eq!(last_paths, ["d/local", "d/y"]);
}

#[tokio::test]
async fn expired_listing_page_carries_entries_and_prefers_fresh() {
    let mock = MockBackend::new();
    mock.put_page(
        "d",
        "",
        vec![Attributes::file("d/x", 1), Attributes::file("d/gone", 1)],
        None,
    );
    let cache = cache_over(&mock, CacheSettings::default().timeout(Duration::from_millis(40)));

    cache.stream_dir("d", "").await.unwrap();

    // Backend listing changes while the cached page ages out.
    mock.put_page("d", "", vec![Attributes::file("d/x", 2)], None);
    tokio::time::sleep(Duration::from_millis(60)).await;

    let merged = cache.stream_dir("d", "").await.unwrap();
    let by_path: HashMap<&str, u64> = merged
        .entries
        .iter()
        .map(|a| (a.path.as_str(), a.size))
        .collect();
    assert_eq!(by_path.get("d/x"), Some(&2), "fresh downstream entry wins");
    assert!(by_path.contains_key("d/gone"), "stale entries are carried over");
    // Sorted, deduplicated output.
    let mut sorted = merged.entries.iter().map(|a| a.path.clone()).collect::<Vec<_>>();
    let plain = sorted.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(plain, sorted);
}

// ---- capacity and lifecycle ----------------------------------------------

#[tokio::test]
async fn capacity_caps_entry_count_and_degrades_to_passthrough() {
    let mock = MockBackend::new();
    for i in 0..4 {
        mock.put_attr(known_file(&format!("f{i}"), i));
    }
    let cache = cache_over(&mock, CacheSettings::default().max_entries(2));

    for i in 0..4 {
        cache.get_attr(&format!("f{i}")).await.unwrap();
    }
    assert_eq!(cache.entry_count(), 2);

    // Uncached paths keep working, just without caching.
    cache.get_attr("f3").await.unwrap();
    assert_eq!(mock.get_attr_count(), 5);
}

#[tokio::test]
async fn sweeper_start_and_shutdown_handshake() {
    let mock = MockBackend::new();
    let cache = cache_over(&mock, CacheSettings::default());

    cache.start();
    cache.start(); // idempotent

    tokio::time::timeout(Duration::from_secs(2), cache.shutdown())
        .await
        .expect("shutdown must complete once the sweeper acknowledges");
}
