use bytes::Bytes;
use std::{
    ffi::OsStr,
    fs, io,
    io::Write,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::SystemTime,
};
use tracing::{debug, info, warn};

use super::TrackTags;
use crate::{
    error::{PlaybackError, PlaybackResult},
    sources::SourceId,
};

/// Extension of transcoded artifacts; only these count towards capacity.
pub const ARTIFACT_EXTENSION: &str = "dca";
const TAGS_EXTENSION: &str = "json";

/// Disk-backed store of transcoded tracks, one file per source id, bounded by
/// count. The file modification time is the access clock.
#[derive(Debug)]
pub struct MediaCache {
    dir: PathBuf,
    max_entries: usize,
    stats: CacheStats,
}

#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

impl MediaCache {
    pub async fn open(dir: impl Into<PathBuf>, max_entries: usize) -> PlaybackResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| PlaybackError::Cache(format!("{}: {}", dir.display(), e)))?;

        info!("📁 Media cache at {} ({} entries max)", dir.display(), max_entries);
        Ok(Self {
            dir,
            max_entries,
            stats: CacheStats::default(),
        })
    }

    pub fn artifact_path(&self, id: &SourceId) -> PathBuf {
        self.dir.join(format!("{}.{}", id.as_str(), ARTIFACT_EXTENSION))
    }

    fn tags_path(&self, id: &SourceId) -> PathBuf {
        self.dir.join(format!("{}.{}", id.as_str(), TAGS_EXTENSION))
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Returns the cached artifact and refreshes its access time, or `None`
    /// on a miss. A file that disappears between the two steps is a miss.
    pub async fn get(&self, id: &SourceId) -> Option<Bytes> {
        let path = self.artifact_path(id);

        let touch_path = path.clone();
        match tokio::task::spawn_blocking(move || touch(&touch_path)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                debug!("❌ Cache miss for {}", id);
                return None;
            }
            Ok(Err(e)) => warn!("Non-fatal error refreshing {}: {}", path.display(), e),
            Err(e) => warn!("Non-fatal error refreshing {}: {}", path.display(), e),
        }

        match tokio::fs::read(&path).await {
            Ok(data) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                debug!("✅ Cache hit for {}", id);
                Some(Bytes::from(data))
            }
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Non-fatal error reading {}: {}", path.display(), e);
                }
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Writes an artifact through a temp file and an atomic rename, so
    /// concurrent builds of one id end with one intact file.
    pub async fn store(&self, id: &SourceId, data: Bytes) -> PlaybackResult<PathBuf> {
        let dir = self.dir.clone();
        let path = self.artifact_path(id);
        let target = path.clone();

        tokio::task::spawn_blocking(move || write_atomic(&dir, &target, &data))
            .await
            .map_err(|e| PlaybackError::Cache(e.to_string()))?
            .map_err(|e| PlaybackError::Cache(format!("{}: {}", path.display(), e)))?;

        debug!("💾 Cached {}", path.display());
        Ok(path)
    }

    /// Sidecar with display metadata for an artifact.
    pub async fn write_tags(&self, id: &SourceId, tags: &TrackTags) -> PlaybackResult<()> {
        let json = serde_json::to_vec_pretty(tags).map_err(|e| PlaybackError::Cache(e.to_string()))?;
        let dir = self.dir.clone();
        let path = self.tags_path(id);
        let target = path.clone();

        tokio::task::spawn_blocking(move || write_atomic(&dir, &target, &json))
            .await
            .map_err(|e| PlaybackError::Cache(e.to_string()))?
            .map_err(|e| PlaybackError::Cache(format!("{}: {}", path.display(), e)))
    }

    /// Deletes least-recently-accessed artifacts until at most `max_entries`
    /// remain. Returns how many were removed.
    pub async fn evict(&self) -> PlaybackResult<usize> {
        let dir = self.dir.clone();
        let max_entries = self.max_entries;

        let removed = tokio::task::spawn_blocking(move || evict_oldest(&dir, max_entries))
            .await
            .map_err(|e| PlaybackError::Cache(e.to_string()))?
            .map_err(|e| PlaybackError::Cache(format!("eviction failed: {}", e)))?;

        for path in &removed {
            info!("🗑️ Evicted {}", path.display());
        }
        self.stats
            .evictions
            .fetch_add(removed.len() as u64, Ordering::Relaxed);
        Ok(removed.len())
    }
}

fn touch(path: &Path) -> io::Result<()> {
    fs::OpenOptions::new()
        .write(true)
        .open(path)?
        .set_modified(SystemTime::now())
}

fn write_atomic(dir: &Path, target: &Path, data: &[u8]) -> io::Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

fn evict_oldest(dir: &Path, max_entries: usize) -> io::Result<Vec<PathBuf>> {
    let mut artifacts = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension() != Some(OsStr::new(ARTIFACT_EXTENSION)) {
            continue;
        }
        // Another room may have evicted it already.
        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        artifacts.push((modified, path));
    }

    if artifacts.len() <= max_entries {
        return Ok(Vec::new());
    }

    artifacts.sort_by_key(|(modified, _)| *modified);
    let excess = artifacts.len() - max_entries;

    let mut removed = Vec::with_capacity(excess);
    for (_, path) in artifacts.into_iter().take(excess) {
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        }
        let _ = fs::remove_file(path.with_extension(TAGS_EXTENSION));
        removed.push(path);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::test_support;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::TempDir;

    fn id(raw: &str) -> SourceId {
        SourceId::new(raw).unwrap()
    }

    fn set_age(path: &Path, seconds_ago: u64) {
        fs::OpenOptions::new()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(seconds_ago))
            .unwrap();
    }

    fn artifact_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".dca"))
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn store_then_get_hits() {
        let dir = TempDir::new().unwrap();
        let cache = MediaCache::open(dir.path(), 5).await.unwrap();

        assert!(cache.get(&id("abc")).await.is_none());
        cache.store(&id("abc"), Bytes::from_static(b"\x01\x00x")).await.unwrap();

        assert_eq!(cache.get(&id("abc")).await.unwrap(), Bytes::from_static(b"\x01\x00x"));
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
    }

    #[tokio::test]
    async fn get_refreshes_access_time() {
        let dir = TempDir::new().unwrap();
        let cache = MediaCache::open(dir.path(), 5).await.unwrap();
        let path = cache.store(&id("old"), Bytes::from_static(b"data")).await.unwrap();
        set_age(&path, 3600);

        cache.get(&id("old")).await.unwrap();

        let age = SystemTime::now()
            .duration_since(fs::metadata(&path).unwrap().modified().unwrap())
            .unwrap_or_default();
        assert!(age < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn eviction_removes_exactly_the_oldest() {
        let dir = TempDir::new().unwrap();
        let cache = MediaCache::open(dir.path(), 3).await.unwrap();

        // Five artifacts, "a" oldest, "e" newest.
        for (age, name) in [(500, "a"), (400, "b"), (300, "c"), (200, "d"), (100, "e")] {
            let path = cache.store(&id(name), Bytes::from_static(b"x")).await.unwrap();
            set_age(&path, age);
        }
        cache
            .write_tags(&id("a"), &TrackTags::from(&test_support::track("a", "A", 1)))
            .await
            .unwrap();

        assert_eq!(cache.evict().await.unwrap(), 2);
        assert_eq!(artifact_names(dir.path()), vec!["c.dca", "d.dca", "e.dca"]);
        assert!(!dir.path().join("a.json").exists());
        assert_eq!(cache.stats().evictions(), 2);
    }

    #[tokio::test]
    async fn eviction_within_bound_is_noop_and_ignores_other_files() {
        let dir = TempDir::new().unwrap();
        let cache = MediaCache::open(dir.path(), 2).await.unwrap();
        cache.store(&id("a"), Bytes::from_static(b"x")).await.unwrap();
        cache.store(&id("b"), Bytes::from_static(b"x")).await.unwrap();
        fs::write(dir.path().join("notes.txt"), "keep me").unwrap();
        fs::write(dir.path().join("a.json"), "{}").unwrap();

        assert_eq!(cache.evict().await.unwrap(), 0);
        assert!(dir.path().join("notes.txt").exists());
        assert_eq!(artifact_names(dir.path()).len(), 2);
    }

    #[tokio::test]
    async fn tags_are_written_as_json() {
        let dir = TempDir::new().unwrap();
        let cache = MediaCache::open(dir.path(), 2).await.unwrap();
        let tags = TrackTags::from(&test_support::track("song", "Song", 225));
        cache.write_tags(&id("song"), &tags).await.unwrap();

        let raw = fs::read_to_string(dir.path().join("song.json")).unwrap();
        let back: TrackTags = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, tags);
        assert_eq!(back.duration_secs, 225);
        assert_eq!(back.url, "https://media.test/watch/song");
    }
}
