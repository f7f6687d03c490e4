use serde::{Deserialize, Serialize};
use std::path::Path;

/// User-editable gallery settings, stored as pretty-printed JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GalleryConfig {
    pub image_folder: String,
    /// Tags whose images are hidden from every view.
    pub filtered_tags: Vec<String>,
    pub database_file: String,
}

impl Default for GalleryConfig {
    fn default() -> Self {
        GalleryConfig {
            image_folder: "images".to_string(),
            filtered_tags: Vec::new(),
            database_file: "gallery.db".to_string(),
        }
    }
}

impl GalleryConfig {
    /// Loads settings, falling back to defaults when the file is missing or
    /// unreadable. A malformed config never blocks startup.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return GalleryConfig::default(),
        };

        serde_json::from_str(&content).unwrap_or_else(|error| {
            log::warn!("ignoring malformed config {}: {}", path.display(), error);
            GalleryConfig::default()
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), String> {
        let payload = serde_json::to_string_pretty(self)
            .map_err(|error| format!("failed to serialize config: {}", error))?;
        std::fs::write(path, payload)
            .map_err(|error| format!("failed to save config to {}: {}", path.display(), error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_config_path(label: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::env::temp_dir().join(format!(
            "prompt_gallery_config_test_{}_{}_{}.json",
            label,
            std::process::id(),
            stamp
        ))
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = GalleryConfig::load(Path::new("/nonexistent/config.json"));
        assert_eq!(config, GalleryConfig::default());
    }

    #[test]
    fn test_malformed_json_yields_defaults() {
        let path = temp_config_path("malformed");
        std::fs::write(&path, "{ not json").expect("write failed");

        let config = GalleryConfig::load(&path);
        assert_eq!(config, GalleryConfig::default());

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_round_trip_and_partial_configs() {
        let path = temp_config_path("roundtrip");
        let config = GalleryConfig {
            image_folder: "/mnt/outputs".to_string(),
            filtered_tags: vec!["nsfw".to_string()],
            database_file: "library.db".to_string(),
        };
        config.save(&path).expect("save failed");
        assert_eq!(GalleryConfig::load(&path), config);

        // Unknown/missing keys fall back field by field.
        std::fs::write(&path, r#"{"image_folder": "elsewhere"}"#).expect("write failed");
        let partial = GalleryConfig::load(&path);
        assert_eq!(partial.image_folder, "elsewhere");
        assert_eq!(partial.database_file, "gallery.db");

        let _ = std::fs::remove_file(path);
    }
}
