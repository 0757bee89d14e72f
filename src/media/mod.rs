//! Media records: metadata for generated artifacts stored in a backend

pub mod probe;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::StorageProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    #[default]
    Image,
    Video,
    Audio,
}

/// Persisted metadata for one generated artifact
///
/// The bytes themselves live in the storage backend under `storage_path`;
/// once written they are immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRecord {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub media_type: MediaType,

    /// Backend-relative key of the stored object
    pub storage_path: String,
    /// Public URL when the backend exposes one
    pub storage_url: Option<String>,

    pub file_size_bytes: Option<u64>,
    pub mime_type: Option<String>,
    pub file_extension: Option<String>,

    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_seconds: Option<f64>,

    pub generation_model_name: Option<String>,
    pub generation_model_version: Option<String>,
    /// Immutable snapshot of the parameters the artifact was generated with
    pub generation_params: Option<Value>,

    pub storage_provider: StorageProvider,
    pub bucket_name: Option<String>,
    pub etag: Option<String>,
    pub extra_metadata: Option<Value>,

    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl MediaRecord {
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() > at)
    }

    pub fn aspect_ratio(&self) -> Option<f64> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if h > 0 => Some(w as f64 / h as f64),
            _ => None,
        }
    }
}

/// Map a content type onto the artifact file extension
///
/// Unknown image types fall back to `.png`.
pub fn extension_for_mime(content_type: &str) -> &'static str {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase();

    if essence.contains("jpeg") || essence.contains("jpg") {
        ".jpg"
    } else if essence.contains("webp") {
        ".webp"
    } else {
        ".png"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record() -> MediaRecord {
        MediaRecord {
            id: Uuid::now_v7(),
            media_type: MediaType::Image,
            storage_path: "generated/test.png".to_string(),
            storage_url: None,
            file_size_bytes: Some(1024),
            mime_type: Some("image/png".to_string()),
            file_extension: Some(".png".to_string()),
            width: Some(512),
            height: Some(256),
            duration_seconds: None,
            generation_model_name: None,
            generation_model_version: None,
            generation_params: None,
            storage_provider: StorageProvider::Local,
            bucket_name: None,
            etag: None,
            extra_metadata: None,
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    #[test]
    fn test_expiry() {
        let mut media = record();
        assert!(!media.is_expired());

        media.expires_at = Some(Utc::now() - Duration::hours(1));
        assert!(media.is_expired());

        media.expires_at = Some(Utc::now() + Duration::hours(1));
        assert!(!media.is_expired());
    }

    #[test]
    fn test_aspect_ratio() {
        let media = record();
        assert_eq!(media.aspect_ratio(), Some(2.0));
    }

    #[test]
    fn test_extension_mapping() {
        assert_eq!(extension_for_mime("image/jpeg"), ".jpg");
        assert_eq!(extension_for_mime("image/jpg"), ".jpg");
        assert_eq!(extension_for_mime("image/png"), ".png");
        assert_eq!(extension_for_mime("image/webp"), ".webp");
        assert_eq!(extension_for_mime("image/png; charset=binary"), ".png");
        assert_eq!(extension_for_mime("application/octet-stream"), ".png");
    }

    #[test]
    fn test_media_type_serde() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json.get("type").unwrap(), "image");
    }
}
