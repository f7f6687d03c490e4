//! Core engine for a local AI-generated image prompt gallery.
//!
//! The crate turns embedded image metadata into a canonical
//! [`GenerationRecord`], caches records in SQLite, and ranks similar images
//! by prompt-tag overlap. Window management, pixel decoding, and translation
//! live in the surrounding application, not here.

pub mod config;
pub mod database;
pub mod graph;
pub mod metadata;
pub mod scanner;
pub mod similarity;
pub mod worker;

pub use config::GalleryConfig;
pub use database::Database;
pub use metadata::{extract_record, GenerationRecord, ImageInfo};
pub use similarity::{rank_similar, SimilarityHit};
pub use worker::{spawn_refresh, RefreshHandle, RefreshStats};
