use crate::metadata::GenerationRecord;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use std::collections::HashSet;
use std::path::Path;

const DB_POOL_SIZE: u32 = 4;

/// Thread-safe gallery store backed by an r2d2 connection pool.
///
/// The core treats this as a synchronous key-value collaborator: each call
/// is individually atomic, and no transaction state leaks across calls.
#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

fn pool_error<E>(err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::ToSqlConversionFailure(Box::new(err))
}

fn apply_connection_pragmas(conn: &Connection) -> SqlResult<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys=ON;
         PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA busy_timeout=5000;",
    )?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Album {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

/// Favorite flag and cached-metadata mtime for one image.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageState {
    pub favorite: bool,
    pub cached_mtime: Option<i64>,
}

impl Database {
    /// Opens or creates the gallery database at the given path.
    pub fn new(db_path: &Path) -> SqlResult<Self> {
        let manager =
            SqliteConnectionManager::file(db_path).with_init(|conn| apply_connection_pragmas(conn));
        let pool = Pool::builder()
            .max_size(DB_POOL_SIZE)
            .build(manager)
            .map_err(pool_error)?;

        let db = Database { pool };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> SqlResult<()> {
        let conn = self.pool.get().map_err(pool_error)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS images (
                path TEXT PRIMARY KEY,
                positive_prompt TEXT NOT NULL DEFAULT '',
                negative_prompt TEXT NOT NULL DEFAULT '',
                other_params TEXT NOT NULL DEFAULT '',
                is_favorite INTEGER NOT NULL DEFAULT 0,
                mtime INTEGER
            );
            CREATE TABLE IF NOT EXISTS albums (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT UNIQUE NOT NULL,
                position INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS album_images (
                album_id INTEGER NOT NULL,
                image_path TEXT NOT NULL,
                PRIMARY KEY (album_id, image_path),
                FOREIGN KEY(album_id) REFERENCES albums(id) ON DELETE CASCADE,
                FOREIGN KEY(image_path) REFERENCES images(path) ON DELETE CASCADE
            );
            CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT UNIQUE NOT NULL
            );
            CREATE TABLE IF NOT EXISTS image_tags (
                image_path TEXT NOT NULL,
                tag_id INTEGER NOT NULL,
                PRIMARY KEY (image_path, tag_id),
                FOREIGN KEY(image_path) REFERENCES images(path) ON DELETE CASCADE,
                FOREIGN KEY(tag_id) REFERENCES tags(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_images_mtime ON images(mtime);
            CREATE INDEX IF NOT EXISTS idx_image_tags_tag_id ON image_tags(tag_id);",
        )
    }

    // ── Library sync and metadata cache ──

    /// Reconciles the images table with the file paths found on disk:
    /// new paths are inserted with an empty record, vanished paths removed.
    pub fn sync_files(&self, file_paths: &[String]) -> SqlResult<()> {
        let mut conn = self.pool.get().map_err(pool_error)?;
        let on_disk: HashSet<&str> = file_paths.iter().map(String::as_str).collect();
        let known = {
            let mut statement = conn.prepare("SELECT path FROM images")?;
            let rows = statement.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<SqlResult<Vec<String>>>()?
        };

        let tx = conn.transaction()?;
        for path in &known {
            if !on_disk.contains(path.as_str()) {
                tx.execute("DELETE FROM images WHERE path=?1", params![path])?;
            }
        }
        let known: HashSet<&str> = known.iter().map(String::as_str).collect();
        for path in file_paths {
            if !known.contains(path.as_str()) {
                tx.execute(
                    "INSERT OR IGNORE INTO images (path) VALUES (?1)",
                    params![path],
                )?;
            }
        }
        tx.commit()
    }

    /// All known image paths, newest cached mtime first.
    pub fn list_all_image_paths(&self) -> SqlResult<Vec<String>> {
        let conn = self.pool.get().map_err(pool_error)?;
        let mut statement =
            conn.prepare("SELECT path FROM images ORDER BY mtime IS NULL, mtime DESC")?;
        let rows = statement.query_map([], |row| row.get(0))?;
        rows.collect()
    }

    pub fn write_cache(&self, path: &str, record: &GenerationRecord, mtime: i64) -> SqlResult<()> {
        let conn = self.pool.get().map_err(pool_error)?;
        conn.execute(
            "UPDATE images SET positive_prompt=?1, negative_prompt=?2, other_params=?3, mtime=?4
             WHERE path=?5",
            params![
                record.prompt,
                record.negative_prompt,
                record.other_parameters,
                mtime,
                path
            ],
        )?;
        Ok(())
    }

    /// Cached positive/negative prompt pair; empty strings for unknown paths.
    pub fn cached_prompts(&self, path: &str) -> SqlResult<(String, String)> {
        let conn = self.pool.get().map_err(pool_error)?;
        let row = conn
            .query_row(
                "SELECT positive_prompt, negative_prompt FROM images WHERE path=?1",
                params![path],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row.unwrap_or_default())
    }

    pub fn cached_record(&self, path: &str) -> SqlResult<GenerationRecord> {
        let conn = self.pool.get().map_err(pool_error)?;
        let row = conn
            .query_row(
                "SELECT positive_prompt, negative_prompt, other_params FROM images WHERE path=?1",
                params![path],
                |row| {
                    Ok(GenerationRecord {
                        prompt: row.get(0)?,
                        negative_prompt: row.get(1)?,
                        other_parameters: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row.unwrap_or_default())
    }

    pub fn image_state(&self, path: &str) -> SqlResult<ImageState> {
        let conn = self.pool.get().map_err(pool_error)?;
        let row = conn
            .query_row(
                "SELECT is_favorite, mtime FROM images WHERE path=?1",
                params![path],
                |row| {
                    Ok(ImageState {
                        favorite: row.get::<_, i64>(0)? != 0,
                        cached_mtime: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(row.unwrap_or_default())
    }

    // ── Favorites ──

    pub fn set_favorite(&self, path: &str, favorite: bool) -> SqlResult<()> {
        let conn = self.pool.get().map_err(pool_error)?;
        conn.execute(
            "UPDATE images SET is_favorite=?1 WHERE path=?2",
            params![favorite as i64, path],
        )?;
        Ok(())
    }

    pub fn favorites(&self) -> SqlResult<HashSet<String>> {
        let conn = self.pool.get().map_err(pool_error)?;
        let mut statement = conn.prepare("SELECT path FROM images WHERE is_favorite=1")?;
        let rows = statement.query_map([], |row| row.get(0))?;
        rows.collect()
    }

    // ── Albums ──

    pub fn create_album(&self, name: &str) -> SqlResult<i64> {
        let conn = self.pool.get().map_err(pool_error)?;
        let next_position: i64 = conn.query_row(
            "SELECT COALESCE(MAX(position), 0) + 1 FROM albums",
            [],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT INTO albums (name, position) VALUES (?1, ?2)",
            params![name, next_position],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn rename_album(&self, album_id: i64, new_name: &str) -> SqlResult<()> {
        let conn = self.pool.get().map_err(pool_error)?;
        conn.execute(
            "UPDATE albums SET name=?1 WHERE id=?2",
            params![new_name, album_id],
        )?;
        Ok(())
    }

    pub fn delete_album(&self, album_id: i64) -> SqlResult<()> {
        let conn = self.pool.get().map_err(pool_error)?;
        conn.execute("DELETE FROM albums WHERE id=?1", params![album_id])?;
        Ok(())
    }

    pub fn albums(&self) -> SqlResult<Vec<Album>> {
        let conn = self.pool.get().map_err(pool_error)?;
        let mut statement = conn.prepare("SELECT id, name FROM albums ORDER BY position")?;
        let rows = statement.query_map([], |row| {
            Ok(Album {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        rows.collect()
    }

    pub fn add_image_to_album(&self, album_id: i64, path: &str) -> SqlResult<()> {
        let conn = self.pool.get().map_err(pool_error)?;
        conn.execute(
            "INSERT OR IGNORE INTO album_images (album_id, image_path) VALUES (?1, ?2)",
            params![album_id, path],
        )?;
        Ok(())
    }

    pub fn remove_image_from_album(&self, album_id: i64, path: &str) -> SqlResult<()> {
        let conn = self.pool.get().map_err(pool_error)?;
        conn.execute(
            "DELETE FROM album_images WHERE album_id=?1 AND image_path=?2",
            params![album_id, path],
        )?;
        Ok(())
    }

    pub fn album_images(&self, album_id: i64) -> SqlResult<HashSet<String>> {
        let conn = self.pool.get().map_err(pool_error)?;
        let mut statement =
            conn.prepare("SELECT image_path FROM album_images WHERE album_id=?1")?;
        let rows = statement.query_map(params![album_id], |row| row.get(0))?;
        rows.collect()
    }

    // ── Tags ──

    /// Attaches a tag to an image, creating the tag on first use.
    /// Tag names are normalized to trimmed lowercase; blanks are ignored.
    pub fn add_tag_to_image(&self, path: &str, tag_name: &str) -> SqlResult<()> {
        let normalized = tag_name.trim().to_lowercase();
        if normalized.is_empty() {
            return Ok(());
        }

        let conn = self.pool.get().map_err(pool_error)?;
        conn.execute(
            "INSERT OR IGNORE INTO tags (name) VALUES (?1)",
            params![normalized],
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO image_tags (image_path, tag_id)
             SELECT ?1, id FROM tags WHERE name=?2",
            params![path, normalized],
        )?;
        Ok(())
    }

    pub fn remove_tag_from_image(&self, path: &str, tag_id: i64) -> SqlResult<()> {
        let conn = self.pool.get().map_err(pool_error)?;
        conn.execute(
            "DELETE FROM image_tags WHERE image_path=?1 AND tag_id=?2",
            params![path, tag_id],
        )?;
        Ok(())
    }

    pub fn rename_tag(&self, tag_id: i64, new_name: &str) -> SqlResult<()> {
        let conn = self.pool.get().map_err(pool_error)?;
        conn.execute(
            "UPDATE tags SET name=?1 WHERE id=?2",
            params![new_name.trim().to_lowercase(), tag_id],
        )?;
        Ok(())
    }

    pub fn delete_tag(&self, tag_id: i64) -> SqlResult<()> {
        let conn = self.pool.get().map_err(pool_error)?;
        conn.execute("DELETE FROM tags WHERE id=?1", params![tag_id])?;
        Ok(())
    }

    pub fn all_tags(&self) -> SqlResult<Vec<Tag>> {
        let conn = self.pool.get().map_err(pool_error)?;
        let mut statement = conn.prepare("SELECT id, name FROM tags ORDER BY name")?;
        let rows = statement.query_map([], |row| {
            Ok(Tag {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        rows.collect()
    }

    pub fn tags_for_image(&self, path: &str) -> SqlResult<Vec<Tag>> {
        let conn = self.pool.get().map_err(pool_error)?;
        let mut statement = conn.prepare(
            "SELECT t.id, t.name FROM tags t
             JOIN image_tags it ON t.id = it.tag_id
             WHERE it.image_path = ?1
             ORDER BY t.name",
        )?;
        let rows = statement.query_map(params![path], |row| {
            Ok(Tag {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        rows.collect()
    }

    pub fn images_by_tag(&self, tag_id: i64) -> SqlResult<HashSet<String>> {
        let conn = self.pool.get().map_err(pool_error)?;
        let mut statement = conn.prepare("SELECT image_path FROM image_tags WHERE tag_id=?1")?;
        let rows = statement.query_map(params![tag_id], |row| row.get(0))?;
        rows.collect()
    }

    /// Paths carrying at least one of the named tags. Used for blacklist
    /// filtering against the configured hidden-tag list.
    pub fn images_with_any_tags(&self, tag_names: &[String]) -> SqlResult<HashSet<String>> {
        if tag_names.is_empty() {
            return Ok(HashSet::new());
        }

        let conn = self.pool.get().map_err(pool_error)?;
        let placeholders = vec!["?"; tag_names.len()].join(",");
        let query = format!(
            "SELECT DISTINCT image_path FROM image_tags
             WHERE tag_id IN (SELECT id FROM tags WHERE name IN ({}))",
            placeholders
        );
        let mut statement = conn.prepare(&query)?;
        let rows = statement.query_map(
            rusqlite::params_from_iter(tag_names.iter()),
            |row| row.get(0),
        )?;
        rows.collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    struct TempDb {
        db: Database,
        path: std::path::PathBuf,
    }

    impl Drop for TempDb {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
            let _ = std::fs::remove_file(self.path.with_extension("db-wal"));
            let _ = std::fs::remove_file(self.path.with_extension("db-shm"));
        }
    }

    fn open_temp_db(label: &str) -> TempDb {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "prompt_gallery_db_test_{}_{}_{}.db",
            label,
            std::process::id(),
            stamp
        ));
        let db = Database::new(&path).expect("failed to open temp database");
        TempDb { db, path }
    }

    fn sample_record() -> GenerationRecord {
        GenerationRecord {
            prompt: "1girl, red hair".to_string(),
            negative_prompt: "lowres".to_string(),
            other_parameters: "Seed: 42".to_string(),
        }
    }

    #[test]
    fn test_sync_adds_and_removes_paths() {
        let temp = open_temp_db("sync");
        temp.db
            .sync_files(&["a.png".to_string(), "b.png".to_string()])
            .expect("sync failed");
        temp.db
            .sync_files(&["b.png".to_string(), "c.png".to_string()])
            .expect("sync failed");

        let paths = temp.db.list_all_image_paths().expect("list failed");
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(sorted, vec!["b.png".to_string(), "c.png".to_string()]);
    }

    #[test]
    fn test_cache_round_trip_and_state() {
        let temp = open_temp_db("cache");
        temp.db
            .sync_files(&["a.png".to_string()])
            .expect("sync failed");
        temp.db
            .write_cache("a.png", &sample_record(), 1234)
            .expect("write failed");

        let (prompt, negative) = temp.db.cached_prompts("a.png").expect("read failed");
        assert_eq!(prompt, "1girl, red hair");
        assert_eq!(negative, "lowres");

        let record = temp.db.cached_record("a.png").expect("read failed");
        assert_eq!(record, sample_record());

        let state = temp.db.image_state("a.png").expect("state failed");
        assert_eq!(state.cached_mtime, Some(1234));
        assert!(!state.favorite);
    }

    #[test]
    fn test_unknown_path_reads_as_empty() {
        let temp = open_temp_db("unknown");
        let (prompt, negative) = temp.db.cached_prompts("ghost.png").expect("read failed");
        assert!(prompt.is_empty());
        assert!(negative.is_empty());
        let state = temp.db.image_state("ghost.png").expect("state failed");
        assert!(state.cached_mtime.is_none());
    }

    #[test]
    fn test_favorites_round_trip() {
        let temp = open_temp_db("favorites");
        temp.db
            .sync_files(&["a.png".to_string(), "b.png".to_string()])
            .expect("sync failed");
        temp.db.set_favorite("a.png", true).expect("set failed");

        let favorites = temp.db.favorites().expect("list failed");
        assert!(favorites.contains("a.png"));
        assert!(!favorites.contains("b.png"));
    }

    #[test]
    fn test_album_membership() {
        let temp = open_temp_db("albums");
        temp.db
            .sync_files(&["a.png".to_string()])
            .expect("sync failed");
        let album_id = temp.db.create_album("portraits").expect("create failed");
        temp.db
            .add_image_to_album(album_id, "a.png")
            .expect("add failed");

        assert!(temp
            .db
            .album_images(album_id)
            .expect("list failed")
            .contains("a.png"));

        temp.db.rename_album(album_id, "people").expect("rename failed");
        let albums = temp.db.albums().expect("list failed");
        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0].name, "people");

        temp.db.delete_album(album_id).expect("delete failed");
        assert!(temp.db.albums().expect("list failed").is_empty());
    }

    #[test]
    fn test_tags_are_normalized_and_filterable() {
        let temp = open_temp_db("tags");
        temp.db
            .sync_files(&["a.png".to_string(), "b.png".to_string()])
            .expect("sync failed");
        temp.db
            .add_tag_to_image("a.png", "  NSFW ")
            .expect("tag failed");
        temp.db.add_tag_to_image("a.png", "").expect("tag failed");

        let tags = temp.db.tags_for_image("a.png").expect("list failed");
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].name, "nsfw");

        let blacklisted = temp
            .db
            .images_with_any_tags(&["nsfw".to_string()])
            .expect("filter failed");
        assert!(blacklisted.contains("a.png"));
        assert!(!blacklisted.contains("b.png"));

        temp.db
            .remove_tag_from_image("a.png", tags[0].id)
            .expect("remove failed");
        assert!(temp.db.tags_for_image("a.png").expect("list failed").is_empty());
    }
}
