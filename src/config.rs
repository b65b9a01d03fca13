//! Environment-derived configuration for the CLI entry point.
//!
//! Kept outside the library's domain modules on purpose: none of `broker`,
//! `store`, `extractor`, etc. read the environment directly, only
//! `main.rs`/`cli.rs` do, through this struct.

/// Runtime configuration read once at process startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database file path.
    pub database_path: String,
    /// Root directory [`crate::storage::FilesystemStorage`] copies artifacts into.
    pub storage_dir: String,
    /// Extraction subprocess binary name.
    pub extractor_bin: String,
    /// oEmbed endpoint queried as `{endpoint}?url={url}`.
    pub oembed_endpoint: String,
}

impl Config {
    /// Reads configuration from the environment, falling back to defaults
    /// for any unset variable.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            database_path: std::env::var("DATABASE_PATH").unwrap_or_else(|_| "downloader.db".to_string()),
            storage_dir: std::env::var("STORAGE_DIR").unwrap_or_else(|_| "./storage".to_string()),
            extractor_bin: std::env::var("EXTRACTOR_BIN").unwrap_or_else(|_| "yt-dlp".to_string()),
            oembed_endpoint: std::env::var("OEMBED_ENDPOINT")
                .unwrap_or_else(|_| "https://www.youtube.com/oembed".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_env_unset() {
        // SAFETY (test-only): no other test in this process reads these
        // vars concurrently with a mutation of them.
        unsafe {
            std::env::remove_var("DATABASE_PATH");
            std::env::remove_var("STORAGE_DIR");
            std::env::remove_var("EXTRACTOR_BIN");
            std::env::remove_var("OEMBED_ENDPOINT");
        }
        let config = Config::from_env();
        assert_eq!(config.database_path, "downloader.db");
        assert_eq!(config.storage_dir, "./storage");
        assert_eq!(config.extractor_bin, "yt-dlp");
        assert_eq!(config.oembed_endpoint, "https://www.youtube.com/oembed");
    }
}
