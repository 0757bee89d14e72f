use thiserror::Error;

use super::models::{Config, StorageProvider};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("storage bucket must not be empty when the s3 backend is selected")]
    MissingBucket,

    #[error("queue.workers must be at least 1")]
    NoWorkers,

    #[error("retry.backoff_base must be at least 1")]
    InvalidBackoffBase,

    #[error("provider.model must not be empty")]
    MissingModel,
}

/// Validate cross-field constraints that serde defaults cannot express
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    if config.storage.provider == StorageProvider::S3 && config.storage.bucket.is_empty() {
        return Err(ValidationError::MissingBucket);
    }

    if config.queue.workers == 0 {
        return Err(ValidationError::NoWorkers);
    }

    if config.retry.backoff_base == 0 {
        return Err(ValidationError::InvalidBackoffBase);
    }

    if config.provider.model.trim().is_empty() {
        return Err(ValidationError::MissingModel);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_s3_requires_bucket() {
        let mut config = Config::default();
        config.storage.provider = StorageProvider::S3;
        config.storage.bucket = String::new();

        assert!(matches!(
            validate(&config),
            Err(ValidationError::MissingBucket)
        ));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = Config::default();
        config.queue.workers = 0;

        assert!(matches!(validate(&config), Err(ValidationError::NoWorkers)));
    }
}
