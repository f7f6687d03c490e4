use crate::database::Database;
use crate::metadata::{extract_record, GenerationRecord};
use crate::scanner::{read_image_info, ScannedImage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Outcome of one bulk metadata refresh pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct RefreshStats {
    pub examined: usize,
    pub refreshed: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Handle to a refresh pass running on its own worker thread.
pub struct RefreshHandle {
    cancel: Arc<AtomicBool>,
    thread: JoinHandle<RefreshStats>,
}

impl RefreshHandle {
    /// Requests a stop; the worker checks the flag between images, so the
    /// current image still finishes.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn join(self) -> RefreshStats {
        match self.thread.join() {
            Ok(stats) => stats,
            Err(_) => {
                log::error!("metadata refresh worker panicked");
                RefreshStats::default()
            }
        }
    }
}

/// Spawns the bulk metadata refresh on a background worker thread so a full
/// library rescan never blocks the interface thread.
pub fn spawn_refresh(db: Database, images: Vec<ScannedImage>) -> RefreshHandle {
    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_for_worker = Arc::clone(&cancel);
    let thread = std::thread::Builder::new()
        .name("metadata-refresh".into())
        .spawn(move || refresh_cache(&db, &images, &cancel_for_worker))
        .expect("failed to spawn metadata refresh worker");

    RefreshHandle { cancel, thread }
}

/// Refreshes the cached record of every image whose file is newer than its
/// cache entry. Runs synchronously; `spawn_refresh` is the threaded wrapper.
///
/// Extraction failures are not fatal: the image gets an empty record so the
/// gallery stays usable with partial or foreign metadata.
pub fn refresh_cache(db: &Database, images: &[ScannedImage], cancel: &AtomicBool) -> RefreshStats {
    let mut stats = RefreshStats::default();

    for image in images {
        if cancel.load(Ordering::Relaxed) {
            stats.cancelled = true;
            break;
        }
        stats.examined += 1;

        let path = image.path.to_string_lossy();
        let cached_mtime = match db.image_state(&path) {
            Ok(state) => state.cached_mtime,
            Err(error) => {
                log::error!("cache state read failed for {}: {}", path, error);
                stats.failed += 1;
                continue;
            }
        };
        let up_to_date = matches!(
            (image.mtime, cached_mtime),
            (Some(on_disk), Some(cached)) if on_disk <= cached
        );
        if up_to_date {
            continue;
        }

        let record = match read_image_info(&image.path) {
            Ok(info) => extract_record(&info),
            Err(error) => {
                log::warn!("metadata read failed for {}: {}", path, error);
                GenerationRecord::default()
            }
        };

        match db.write_cache(&path, &record, image.mtime.unwrap_or(0)) {
            Ok(()) => stats.refreshed += 1,
            Err(error) => {
                log::error!("cache write failed for {}: {}", path, error);
                stats.failed += 1;
            }
        }
    }

    if stats.cancelled {
        log::info!(
            "metadata refresh cancelled after {} of {} images",
            stats.examined,
            images.len()
        );
    } else {
        log::info!(
            "metadata refresh complete: {} examined, {} refreshed, {} failed",
            stats.examined,
            stats.refreshed,
            stats.failed
        );
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    struct TempLibrary {
        dir: PathBuf,
        db_path: PathBuf,
    }

    impl Drop for TempLibrary {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.dir);
            let _ = fs::remove_file(&self.db_path);
            let _ = fs::remove_file(self.db_path.with_extension("db-wal"));
            let _ = fs::remove_file(self.db_path.with_extension("db-shm"));
        }
    }

    fn temp_library(label: &str) -> (TempLibrary, Database) {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "prompt_gallery_worker_test_{}_{}_{}",
            label,
            std::process::id(),
            stamp
        ));
        fs::create_dir_all(&dir).expect("failed to create temp dir");
        let db_path = dir.join("gallery.db");
        let db = Database::new(&db_path).expect("failed to open temp database");
        (TempLibrary { dir: dir.clone(), db_path }, db)
    }

    fn seed_images(db: &Database, dir: &std::path::Path, names: &[&str]) -> Vec<ScannedImage> {
        let mut images = Vec::new();
        let mut paths = Vec::new();
        for (index, name) in names.iter().enumerate() {
            let path = dir.join(name);
            fs::write(&path, b"not really an image").expect("write failed");
            paths.push(path.to_string_lossy().to_string());
            images.push(ScannedImage {
                path,
                mtime: Some(1000 + index as i64),
            });
        }
        db.sync_files(&paths).expect("sync failed");
        images
    }

    #[test]
    fn test_refresh_writes_cache_and_skips_unchanged() {
        let (library, db) = temp_library("refresh");
        let images = seed_images(&db, &library.dir, &["a.jpg", "b.jpg"]);

        let cancel = AtomicBool::new(false);
        let stats = refresh_cache(&db, &images, &cancel);
        assert_eq!(stats.examined, 2);
        assert_eq!(stats.refreshed, 2);
        assert!(!stats.cancelled);

        let state = db
            .image_state(&images[0].path.to_string_lossy())
            .expect("state failed");
        assert_eq!(state.cached_mtime, Some(1000));

        // Second pass sees current mtimes and rewrites nothing.
        let stats = refresh_cache(&db, &images, &cancel);
        assert_eq!(stats.examined, 2);
        assert_eq!(stats.refreshed, 0);
    }

    #[test]
    fn test_cancellation_stops_between_iterations() {
        let (library, db) = temp_library("cancel");
        let images = seed_images(&db, &library.dir, &["a.jpg", "b.jpg", "c.jpg"]);

        let cancel = AtomicBool::new(true);
        let stats = refresh_cache(&db, &images, &cancel);
        assert!(stats.cancelled);
        assert_eq!(stats.examined, 0);
        assert_eq!(stats.refreshed, 0);
    }

    #[test]
    fn test_spawned_refresh_joins_with_stats() {
        let (library, db) = temp_library("spawn");
        let images = seed_images(&db, &library.dir, &["a.jpg"]);

        let handle = spawn_refresh(db, images);
        let stats = handle.join();
        assert_eq!(stats.examined, 1);
        assert_eq!(stats.refreshed, 1);
    }
}
