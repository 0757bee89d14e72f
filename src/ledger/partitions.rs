/// Key layout and encoding utilities for Fjall partitions
///
/// Partition structure:
/// - `jobs`: job:{uuid} -> Job (JSON)
/// - `media`: media:{uuid} -> MediaRecord (JSON)
/// - `metadata`: meta:{key} -> value (string)
use uuid::Uuid;

/// Encode a job key: job:{uuid}
pub fn encode_job_key(id: &Uuid) -> Vec<u8> {
    format!("job:{}", id).into_bytes()
}

/// Encode a media key: media:{uuid}
pub fn encode_media_key(id: &Uuid) -> Vec<u8> {
    format!("media:{}", id).into_bytes()
}

/// Encode a metadata key: meta:{key}
pub fn encode_meta_key(key: &str) -> Vec<u8> {
    format!("meta:{}", key).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_key_encoding() {
        let id = Uuid::nil();
        let key = encode_job_key(&id);
        assert_eq!(key, b"job:00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn test_media_key_encoding() {
        let id = Uuid::nil();
        let key = encode_media_key(&id);
        assert_eq!(key, b"media:00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn test_meta_key_encoding() {
        assert_eq!(encode_meta_key("last_cleanup"), b"meta:last_cleanup");
    }
}
