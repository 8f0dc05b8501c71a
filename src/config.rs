use serde::Deserialize;

use std::path::Path;

use crate::errors::*;

const DEFAULT_BATCH_SIZE: usize = 256;
const DEFAULT_BUFFER_SIZE: usize = 16;
const DEFAULT_QUALITY_SHIFT: u8 = 33;

/// Run-wide settings, built once and handed to every pipeline constructor.
///
/// Can be deserialized from YAML:
/// ```yaml
/// batch_size: 500
/// n_workers: 4
/// no_input_order: true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Records per batch.
    pub batch_size: usize,
    /// Worker threads per parallel stage.
    pub n_workers: usize,
    /// Channel capacity between stages, in batches.
    pub buffer_size: usize,
    /// ASCII offset of quality scores at the I/O boundary.
    pub quality_shift: u8,
    /// Allow stages to emit batches as soon as they are done.
    pub no_input_order: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            n_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            buffer_size: DEFAULT_BUFFER_SIZE,
            quality_shift: DEFAULT_QUALITY_SHIFT,
            no_input_order: false,
        }
    }
}

impl RunConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: RunConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| Error::FileIo {
            file: path.display().to_string(),
            source: Box::new(e),
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_workers(mut self, n_workers: usize) -> Self {
        self.n_workers = n_workers;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_quality_shift(mut self, quality_shift: u8) -> Self {
        self.quality_shift = quality_shift;
        self
    }

    pub fn with_no_input_order(mut self, no_input_order: bool) -> Self {
        self.no_input_order = no_input_order;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("batch_size", self.batch_size),
            ("n_workers", self.n_workers),
            ("buffer_size", self.buffer_size),
        ];

        for (parameter, value) in positive {
            if value == 0 {
                return Err(Error::InvalidParameter {
                    parameter,
                    reason: "must be >= 1".to_owned(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_partial() {
        let config = RunConfig::from_yaml_str("batch_size: 10\nno_input_order: true\n").unwrap();
        assert_eq!(config.batch_size, 10);
        assert!(config.no_input_order);
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(config.quality_shift, 33);
    }

    #[test]
    fn test_yaml_rejects_unknown_and_zero() {
        assert!(RunConfig::from_yaml_str("batchsize: 10\n").is_err());
        assert!(RunConfig::from_yaml_str("n_workers: 0\n").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.yaml");
        std::fs::write(&path, "n_workers: 3\nbuffer_size: 2\n").unwrap();
        let config = RunConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.n_workers, 3);
        assert_eq!(config.buffer_size, 2);
    }
}
