use crate::config::ConfigError;
use glam::UVec3;
use std::{borrow::Cow, io, path::PathBuf};
use thiserror::Error;

/// A failed step of the compute runtime.
///
/// Each variant maps to a stable negative status code, see [`RuntimeError::code`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("no compute platform available")]
    NoPlatform,
    #[error("no accelerator device found")]
    DeviceNotFound,
    #[error("device not available: {0}")]
    DeviceNotAvailable(String),
    #[error("device memory allocation failed: {0}")]
    OutOfMemory(String),
    #[error("out of resources: {0}")]
    OutOfResources(String),
    #[error("program build failed")]
    BuildFailure,
    #[error("buffer mapping failed: {0}")]
    MapFailure(String),
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("command queue unusable: {0}")]
    InvalidCommandQueue(String),
    #[error("no kernel entry point named `{0}`")]
    InvalidKernelName(String),
    #[error("kernel `{entry_point}` cannot be used: {reason}")]
    InvalidKernelDefinition { entry_point: String, reason: String },
    #[error("kernel argument index {index} out of range (kernel takes {count})")]
    InvalidArgIndex { index: u32, count: usize },
    #[error("kernel argument {index}: {reason}")]
    InvalidArgValue { index: u32, reason: String },
    #[error("kernel argument {0} was never set")]
    InvalidKernelArgs(u32),
    #[error("local size {local:?} does not match the kernel work-group size {expected:?}")]
    InvalidWorkGroupSize { local: [u32; 3], expected: [u32; 3] },
    #[error("operation rejected by the device: {0}")]
    InvalidOperation(String),
    #[error("invalid buffer size {0}")]
    InvalidBufferSize(u64),
    #[error("invalid global size {global:?}: {reason}")]
    InvalidGlobalWorkSize { global: [u32; 3], reason: String },
}

impl RuntimeError {
    pub const DEVICE_NOT_FOUND: i32 = -1;
    pub const DEVICE_NOT_AVAILABLE: i32 = -2;
    pub const MEM_ALLOCATION_FAILURE: i32 = -4;
    pub const OUT_OF_RESOURCES: i32 = -5;
    pub const BUILD_PROGRAM_FAILURE: i32 = -11;
    pub const MAP_FAILURE: i32 = -12;
    pub const INVALID_VALUE: i32 = -30;
    pub const INVALID_COMMAND_QUEUE: i32 = -36;
    pub const INVALID_KERNEL_NAME: i32 = -46;
    pub const INVALID_KERNEL_DEFINITION: i32 = -47;
    pub const INVALID_ARG_INDEX: i32 = -49;
    pub const INVALID_ARG_VALUE: i32 = -50;
    pub const INVALID_KERNEL_ARGS: i32 = -52;
    pub const INVALID_WORK_GROUP_SIZE: i32 = -54;
    pub const INVALID_OPERATION: i32 = -59;
    pub const INVALID_BUFFER_SIZE: i32 = -61;
    pub const INVALID_GLOBAL_WORK_SIZE: i32 = -63;

    pub fn code(&self) -> i32 {
        match self {
            Self::NoPlatform | Self::DeviceNotFound => Self::DEVICE_NOT_FOUND,
            Self::DeviceNotAvailable(_) => Self::DEVICE_NOT_AVAILABLE,
            Self::OutOfMemory(_) => Self::MEM_ALLOCATION_FAILURE,
            Self::OutOfResources(_) => Self::OUT_OF_RESOURCES,
            Self::BuildFailure => Self::BUILD_PROGRAM_FAILURE,
            Self::MapFailure(_) => Self::MAP_FAILURE,
            Self::InvalidValue(_) => Self::INVALID_VALUE,
            Self::InvalidCommandQueue(_) => Self::INVALID_COMMAND_QUEUE,
            Self::InvalidKernelName(_) => Self::INVALID_KERNEL_NAME,
            Self::InvalidKernelDefinition { .. } => Self::INVALID_KERNEL_DEFINITION,
            Self::InvalidArgIndex { .. } => Self::INVALID_ARG_INDEX,
            Self::InvalidArgValue { .. } => Self::INVALID_ARG_VALUE,
            Self::InvalidKernelArgs(_) => Self::INVALID_KERNEL_ARGS,
            Self::InvalidWorkGroupSize { .. } => Self::INVALID_WORK_GROUP_SIZE,
            Self::InvalidOperation(_) => Self::INVALID_OPERATION,
            Self::InvalidBufferSize(_) => Self::INVALID_BUFFER_SIZE,
            Self::InvalidGlobalWorkSize { .. } => Self::INVALID_GLOBAL_WORK_SIZE,
        }
    }
}

/// Any failure that aborts a run.
///
/// Displays as `ERROR: {tag} Error Code: {code}`; the cause is kept as the
/// error source.
#[derive(Debug, Error)]
pub enum FatalSetupError {
    #[error("ERROR: {tag} Error Code: {code}", code = .source.code())]
    Runtime {
        tag: Cow<'static, str>,
        #[source]
        source: RuntimeError,
    },
    #[error("ERROR: configuration Error Code: {code}", code = RuntimeError::INVALID_VALUE)]
    Config(#[from] ConfigError),
    #[error("ERROR: {tag} Error Code: {code}", code = io_code(.source))]
    Io {
        tag: Cow<'static, str>,
        path: Option<PathBuf>,
        #[source]
        source: io::Error,
    },
    #[error("ERROR: verify output{grid} Error Code: -1")]
    Verification {
        grid: usize,
        at: UVec3,
        expected: f32,
        found: f32,
    },
}

fn io_code(err: &io::Error) -> i32 {
    err.raw_os_error().unwrap_or(-1)
}

impl FatalSetupError {
    pub fn runtime(tag: impl Into<Cow<'static, str>>, source: RuntimeError) -> Self {
        Self::Runtime {
            tag: tag.into(),
            source,
        }
    }

    pub fn io(tag: impl Into<Cow<'static, str>>, source: io::Error) -> Self {
        Self::Io {
            tag: tag.into(),
            path: None,
            source,
        }
    }

    /// Short name of the operation that failed.
    pub fn tag(&self) -> Cow<'_, str> {
        match self {
            Self::Runtime { tag, .. } | Self::Io { tag, .. } => Cow::Borrowed(tag.as_ref()),
            Self::Config(_) => Cow::Borrowed("configuration"),
            Self::Verification { grid, .. } => Cow::Owned(format!("verify output{grid}")),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Runtime { source, .. } => source.code(),
            Self::Config(_) => RuntimeError::INVALID_VALUE,
            Self::Io { source, .. } => io_code(source),
            Self::Verification { .. } => -1,
        }
    }

    /// The runtime cause, if this failure came from the compute runtime.
    pub fn runtime_error(&self) -> Option<&RuntimeError> {
        match self {
            Self::Runtime { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Attaches an operation tag to runtime results, the way every pipeline step reports.
pub(crate) trait Tagged<T> {
    fn tagged(self, tag: impl Into<Cow<'static, str>>) -> Result<T, FatalSetupError>;
}

impl<T> Tagged<T> for Result<T, RuntimeError> {
    fn tagged(self, tag: impl Into<Cow<'static, str>>) -> Result<T, FatalSetupError> {
        self.map_err(|source| FatalSetupError::runtime(tag, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_line_carries_tag_and_code() {
        let err = FatalSetupError::runtime("enumerate platforms", RuntimeError::NoPlatform);
        assert_eq!(err.to_string(), "ERROR: enumerate platforms Error Code: -1");
        assert_eq!(err.tag(), "enumerate platforms");
        assert_eq!(err.code(), -1);
    }

    #[test]
    fn runtime_source_is_preserved() {
        let err: Result<(), _> = Err(RuntimeError::BuildFailure);
        let err = err.tagged("build program").unwrap_err();
        assert_eq!(err.to_string(), "ERROR: build program Error Code: -11");
        assert_eq!(err.runtime_error(), Some(&RuntimeError::BuildFailure));
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("program build failed"));
    }

    #[test]
    fn codes_are_distinct_per_failure_kind() {
        let errors = [
            RuntimeError::DeviceNotFound,
            RuntimeError::DeviceNotAvailable(String::new()),
            RuntimeError::OutOfMemory(String::new()),
            RuntimeError::BuildFailure,
            RuntimeError::InvalidKernelName("main".into()),
            RuntimeError::InvalidKernelArgs(3),
            RuntimeError::InvalidWorkGroupSize {
                local: [2, 1, 1],
                expected: [1, 1, 1],
            },
            RuntimeError::InvalidBufferSize(0),
        ];
        let mut codes: Vec<i32> = errors.iter().map(RuntimeError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(codes.iter().all(|&c| c < 0));
    }

    #[test]
    fn io_errors_report_os_code() {
        let err = FatalSetupError::io("write output", io::Error::from_raw_os_error(13));
        assert_eq!(err.code(), 13);
        assert_eq!(err.to_string(), "ERROR: write output Error Code: 13");
    }
}
