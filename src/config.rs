use std::path::PathBuf;

/// Configuration for a serializer instance.
#[derive(Debug, Clone)]
pub struct SerializerConfig {
    /// Directory holding the data file, index log, and lock file.
    pub dir: PathBuf,

    /// Fixed block size in bytes (default: 4KB).
    pub block_size: usize,

    /// Sync the data device before committing an index batch (default: true).
    /// Disabling trades the durability ordering guarantee for commit latency.
    pub data_sync: bool,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./reefdb"),
            block_size: 4096,
            data_sync: true,
        }
    }
}

impl SerializerConfig {
    /// Create a new config with the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the block size
    pub fn block_size(mut self, size: usize) -> Self {
        assert!(size > 0, "block size must be non-zero");
        self.block_size = size;
        self
    }

    /// Enable or disable the pre-commit data sync
    pub fn data_sync(mut self, enabled: bool) -> Self {
        self.data_sync = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SerializerConfig::default();
        assert_eq!(config.dir, PathBuf::from("./reefdb"));
        assert_eq!(config.block_size, 4096);
        assert!(config.data_sync);
    }

    #[test]
    fn test_config_builder() {
        let config = SerializerConfig::new("/tmp/test")
            .block_size(16 * 1024)
            .data_sync(false);

        assert_eq!(config.dir, PathBuf::from("/tmp/test"));
        assert_eq!(config.block_size, 16 * 1024);
        assert!(!config.data_sync);
    }

    #[test]
    #[should_panic(expected = "block size must be non-zero")]
    fn test_zero_block_size_panics() {
        SerializerConfig::default().block_size(0);
    }
}
