use crate::grid::Extents;
use crate::kernel::KernelMode;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON parse error in {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("every extent must be at least 1, got {0:?}")]
    EmptyExtents(Extents),
    #[error("{0:?} has more cells than a 32-bit index can address")]
    ExtentsTooLarge(Extents),
    #[error("`output_path` must not be empty")]
    EmptyOutputPath,
}

/// Everything a run is parameterized by.
///
/// The defaults reproduce the fixed behavior: a `4 x 8 x 16` launch, inputs
/// filled with `100.0` and `101.0`, coordinates written to `output.txt`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub extents: Extents,
    /// Fill values of `input1` and `input2`.
    pub fill: [f32; 2],
    pub output_path: PathBuf,
    pub mode: KernelMode,
    /// Comma separated backend list (`vulkan,metal,dx12,gl`), all backends when unset.
    pub backends: Option<String>,
    /// Compare the device results with the host evaluation of the kernel.
    pub verify: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            extents: Extents::DEFAULT,
            fill: [100.0, 101.0],
            output_path: PathBuf::from("output.txt"),
            mode: KernelMode::default(),
            backends: None,
            verify: false,
        }
    }
}

impl Config {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.extents.is_valid() {
            return Err(ConfigError::EmptyExtents(self.extents));
        }
        if self.extents.checked_len().is_none() {
            return Err(ConfigError::ExtentsTooLarge(self.extents));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyOutputPath);
        }
        Ok(())
    }
}
