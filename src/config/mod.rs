use std::env;
use std::path::{Path, PathBuf};

/// Runtime configuration for the slot store and its HTTP surface
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the committed `<slot>.jpg` assets (default: "public")
    pub public_dir: PathBuf,

    /// Directory receiving in-flight uploads (default: "temp_uploads")
    pub staging_dir: PathBuf,

    /// Fixed set of slot names (default: tom, jerry, dog)
    pub allowed_slots: Vec<String>,

    /// Maximum upload size in bytes (default: 10 MB)
    pub max_file_size: usize,

    /// Multipart field carrying the image (default: "image")
    pub upload_field: String,

    /// Serialize concurrent replaces of the same slot (default: false)
    pub serialize_replaces: bool,

    /// Staging files older than this are swept while running (default: 1 hour)
    pub staging_cleanup_age_secs: u64,

    /// Interval between background sweeps (default: 10 minutes)
    pub sweep_interval_secs: u64,

    /// Allowed CORS Origins (comma separated)
    pub allowed_origins: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            public_dir: PathBuf::from("public"),
            staging_dir: PathBuf::from("temp_uploads"),
            allowed_slots: vec!["tom".to_string(), "jerry".to_string(), "dog".to_string()],
            max_file_size: 10 * 1024 * 1024, // 10 MB
            upload_field: "image".to_string(),
            serialize_replaces: false,
            staging_cleanup_age_secs: 60 * 60,
            sweep_interval_secs: 10 * 60,
            allowed_origins: vec![
                "http://localhost:5173".to_string(), // Vite default
                "http://127.0.0.1:5173".to_string(),
            ],
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            public_dir: env::var("PUBLIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.public_dir),

            staging_dir: env::var("STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.staging_dir),

            allowed_slots: env::var("ALLOWED_SLOTS")
                .ok()
                .map(|v| parse_list(&v, true))
                .unwrap_or(default.allowed_slots),

            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            upload_field: env::var("UPLOAD_FIELD")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(default.upload_field),

            serialize_replaces: env::var("SERIALIZE_REPLACES")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(default.serialize_replaces),

            staging_cleanup_age_secs: env::var("STAGING_CLEANUP_AGE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.staging_cleanup_age_secs),

            sweep_interval_secs: env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v: &u64| *v > 0)
                .unwrap_or(default.sweep_interval_secs),

            allowed_origins: env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| parse_list(&v, false))
                .unwrap_or(default.allowed_origins),
        }
    }

    /// Default configuration rooted at the given directories.
    /// Used by tests and local tooling to keep fixtures isolated.
    pub fn for_dirs(public_dir: impl AsRef<Path>, staging_dir: impl AsRef<Path>) -> Self {
        Self {
            public_dir: public_dir.as_ref().to_path_buf(),
            staging_dir: staging_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }
}

fn parse_list(raw: &str, lowercase: bool) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| if lowercase { s.to_lowercase() } else { s.to_string() })
        .collect()
}
