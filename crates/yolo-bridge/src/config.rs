//! Engine construction settings

use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{InteropError, Result};
use crate::runtime::EngineParams;

/// Settings fixed for the lifetime of one engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Place the model on an accelerator device
    pub use_accelerator: bool,
    /// Run in reduced (half) precision; only meaningful on an accelerator
    pub reduced_precision: bool,
    /// Model input height in pixels
    pub height: u32,
    /// Model input width in pixels
    pub width: u32,
    /// Minimum confidence for a detection to be reported, in (0, 1]
    pub confidence_threshold: f32,
    /// Overlap above which boxes are merged by non-max suppression, in (0, 1]
    pub iou_threshold: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            use_accelerator: false,
            reduced_precision: false,
            height: 640,
            width: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn with_input_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_thresholds(mut self, confidence: f32, iou: f32) -> Self {
        self.confidence_threshold = confidence;
        self.iou_threshold = iou;
        self
    }

    pub fn with_accelerator(mut self, reduced_precision: bool) -> Self {
        self.use_accelerator = true;
        self.reduced_precision = reduced_precision;
        self
    }

    /// Check every field before anything is sent to the native side.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("width", self.width), ("height", self.height)] {
            if value == 0 {
                return Err(InteropError::InvalidConfig(format!("{} must be positive", name)));
            }
            if i32::try_from(value).is_err() {
                return Err(InteropError::InvalidConfig(format!(
                    "{} {} exceeds the native range",
                    name, value
                )));
            }
        }
        for (name, value) in [
            ("confidence_threshold", self.confidence_threshold),
            ("iou_threshold", self.iou_threshold),
        ] {
            // NaN fails this comparison too.
            if !(value > 0.0 && value <= 1.0) {
                return Err(InteropError::InvalidConfig(format!(
                    "{} must be in (0, 1], got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Native parameter block. Call after `validate`.
    pub(crate) fn to_params(&self) -> EngineParams {
        EngineParams {
            use_accelerator: self.use_accelerator,
            reduced_precision: self.reduced_precision,
            height: self.height as i32,
            width: self.width as i32,
            confidence_threshold: self.confidence_threshold,
            iou_threshold: self.iou_threshold,
        }
    }
}

/// Where a model artifact comes from.
pub enum ModelSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
    /// Drained to the end before the engine is created
    Reader(Box<dyn Read + Send>),
}

impl ModelSource {
    pub fn reader(reader: impl Read + Send + 'static) -> Self {
        Self::Reader(Box::new(reader))
    }
}

impl fmt::Debug for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Self::Reader(_) => f.write_str("Reader"),
        }
    }
}

impl From<PathBuf> for ModelSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for ModelSource {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<Vec<u8>> for ModelSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.width, 640);
        assert_eq!(config.height, 640);
        assert_eq!(config.confidence_threshold, 0.25);
        assert_eq!(config.iou_threshold, 0.45);
        assert!(!config.use_accelerator);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = EngineConfig::from_json_str(r#"{"width": 320, "use_accelerator": true}"#).unwrap();
        assert_eq!(
            config,
            EngineConfig {
                width: 320,
                use_accelerator: true,
                ..EngineConfig::default()
            }
        );
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        fs::write(&path, r#"{"height": 480, "iou_threshold": 0.5}"#).unwrap();

        let config = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.height, 480);
        assert_eq!(config.iou_threshold, 0.5);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            EngineConfig::default().with_input_size(0, 640),
            EngineConfig::default().with_input_size(640, u32::MAX),
            EngineConfig::default().with_thresholds(0.0, 0.45),
            EngineConfig::default().with_thresholds(0.25, 1.5),
            EngineConfig::default().with_thresholds(f32::NAN, 0.45),
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(InteropError::InvalidConfig(_))),
                "{:?}",
                config
            );
        }
        assert!(EngineConfig::default().with_thresholds(1.0, 1.0).validate().is_ok());
    }

    #[test]
    fn test_to_params() {
        let params = EngineConfig::default()
            .with_input_size(416, 320)
            .with_accelerator(true)
            .to_params();
        assert_eq!(params.width, 416);
        assert_eq!(params.height, 320);
        assert!(params.use_accelerator);
        assert!(params.reduced_precision);
    }

    #[test]
    fn test_model_source_debug_hides_bytes() {
        let source = ModelSource::from(vec![0u8; 1024]);
        assert_eq!(format!("{:?}", source), "Bytes(1024 bytes)");
    }
}
