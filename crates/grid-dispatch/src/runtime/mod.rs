//! The compute runtime seen by the pipeline.
//!
//! Every step is synchronous and either succeeds or reports a [`RuntimeError`].
//! [`wgpu::WgpuRuntime`] drives a real adapter; tests use a scripted runtime
//! that runs the kernel on the host.

use crate::error::RuntimeError;
use glam::UVec3;
use std::{fmt::Write as _, sync::Arc};

#[cfg(test)]
pub(crate) mod fake;
pub mod wgpu;

/// Anything the selector reports by name.
pub trait Named {
    fn name(&self) -> &str;
}

pub trait ComputeRuntime {
    type Platform: Named;
    type Device: Named;
    type Context: ComputeContext;

    /// All platforms, in enumeration order. An empty list is not an error here.
    fn platforms(&self) -> Result<Vec<Self::Platform>, RuntimeError>;

    /// Accelerator-class devices of `platform`.
    ///
    /// May report [`RuntimeError::DeviceNotFound`] instead of an empty list.
    fn accelerators(&self, platform: &Self::Platform) -> Result<Vec<Self::Device>, RuntimeError>;

    /// Opens `device`. Errors not captured by a later operation go to `on_error`.
    fn create_context(
        &self,
        device: Self::Device,
        on_error: Arc<dyn ContextErrorHandler>,
    ) -> Result<Self::Context, RuntimeError>;
}

pub trait ComputeContext {
    type Program;
    type Kernel;
    type Buffer;

    fn build_program(&self, source: &str) -> BuildOutput<Self::Program>;

    fn create_kernel(
        &self,
        program: &Self::Program,
        signature: &KernelSignature<'_>,
    ) -> Result<Self::Kernel, RuntimeError>;

    /// Allocates `len` floats, initialized from `contents` when given.
    fn create_buffer(
        &self,
        label: &str,
        access: BufferAccess,
        len: usize,
        contents: Option<&[f32]>,
    ) -> Result<Self::Buffer, RuntimeError>;

    fn set_arg(
        &self,
        kernel: &mut Self::Kernel,
        index: u32,
        buffer: &Self::Buffer,
    ) -> Result<(), RuntimeError>;

    /// Launches `kernel` over `global` work-items in groups of `local` and
    /// waits for it to finish.
    fn enqueue(&self, kernel: &Self::Kernel, global: UVec3, local: UVec3)
    -> Result<(), RuntimeError>;

    /// Blocking copy of the whole buffer into `out`.
    fn read_buffer(&self, buffer: &Self::Buffer, out: &mut [f32]) -> Result<(), RuntimeError>;
}

/// Receives asynchronous errors of a context.
pub trait ContextErrorHandler: Send + Sync + 'static {
    fn context_error(&self, info: &str);
}

impl<F> ContextErrorHandler for F
where
    F: Fn(&str) + Send + Sync + 'static,
{
    fn context_error(&self, info: &str) {
        self(info);
    }
}

/// Result of a program build. The log is produced whether the build succeeds or not.
#[derive(Debug)]
pub struct BuildOutput<P> {
    pub program: Result<P, RuntimeError>,
    pub log: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferAccess {
    /// Written by the host, read by the kernel.
    ReadOnly,
    /// Written by the kernel, read back by the host.
    WriteOnly,
}

/// How a kernel is called: entry point, argument accesses and work-group size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelSignature<'a> {
    pub entry_point: &'a str,
    pub args: &'a [BufferAccess],
    pub workgroup_size: [u32; 3],
}

/// An entry point found in WGSL source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPointInfo {
    pub name: String,
    pub compute: bool,
    pub workgroup_size: [u32; 3],
}

/// Parses and validates WGSL, returning its entry points or the rendered diagnostics.
pub fn reflect_wgsl(source: &str) -> Result<Vec<EntryPointInfo>, String> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| e.emit_to_string(source))?;
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::empty(),
    )
    .validate(&module)
    .map_err(|e| e.emit_to_string(source))?;
    Ok(module
        .entry_points
        .iter()
        .map(|ep| EntryPointInfo {
            name: ep.name.clone(),
            compute: ep.stage == naga::ShaderStage::Compute,
            workgroup_size: ep.workgroup_size,
        })
        .collect())
}

/// One line per entry point, used as the log of a successful build.
pub(crate) fn entry_point_summary(entry_points: &[EntryPointInfo]) -> String {
    let mut log = String::new();
    for ep in entry_points {
        let stage = if ep.compute { "compute" } else { "non-compute" };
        let [x, y, z] = ep.workgroup_size;
        let _ = writeln!(log, "{stage} entry point `{}` workgroup_size({x}, {y}, {z})", ep.name);
    }
    log
}

/// Looks up `signature.entry_point` and checks it can be launched as described.
pub(crate) fn check_signature(
    entry_points: &[EntryPointInfo],
    signature: &KernelSignature<'_>,
) -> Result<(), RuntimeError> {
    let ep = entry_points
        .iter()
        .find(|ep| ep.name == signature.entry_point)
        .ok_or_else(|| RuntimeError::InvalidKernelName(signature.entry_point.to_owned()))?;
    let invalid = |reason: String| RuntimeError::InvalidKernelDefinition {
        entry_point: ep.name.clone(),
        reason,
    };
    if !ep.compute {
        return Err(invalid("not a compute entry point".to_owned()));
    }
    if ep.workgroup_size != signature.workgroup_size {
        return Err(invalid(format!(
            "declares workgroup_size {:?}, expected {:?}",
            ep.workgroup_size, signature.workgroup_size
        )));
    }
    Ok(())
}

/// Checks an argument binding against the kernel signature.
pub(crate) fn check_arg(
    args: &[BufferAccess],
    index: u32,
    access: BufferAccess,
) -> Result<(), RuntimeError> {
    let expected = args
        .get(index as usize)
        .ok_or(RuntimeError::InvalidArgIndex {
            index,
            count: args.len(),
        })?;
    if *expected != access {
        return Err(RuntimeError::InvalidArgValue {
            index,
            reason: format!("expected a {expected:?} buffer, got {access:?}"),
        });
    }
    Ok(())
}

/// Validates a launch and returns the number of work-groups per dimension.
pub(crate) fn check_launch(
    bound: &[bool],
    workgroup_size: [u32; 3],
    global: UVec3,
    local: UVec3,
    max_groups: u32,
) -> Result<UVec3, RuntimeError> {
    if let Some(unset) = bound.iter().position(|bound| !bound) {
        return Err(RuntimeError::InvalidKernelArgs(unset as u32));
    }
    if local.to_array() != workgroup_size {
        return Err(RuntimeError::InvalidWorkGroupSize {
            local: local.to_array(),
            expected: workgroup_size,
        });
    }
    let invalid_global = |reason: String| RuntimeError::InvalidGlobalWorkSize {
        global: global.to_array(),
        reason,
    };
    if global.min_element() == 0 {
        return Err(invalid_global("empty dimension".to_owned()));
    }
    if global % local != UVec3::ZERO {
        return Err(invalid_global(format!(
            "not a multiple of the local size {local}"
        )));
    }
    let groups = global / local;
    if groups.max_element() > max_groups {
        return Err(invalid_global(format!(
            "{groups} work-groups exceed the device limit of {max_groups} per dimension"
        )));
    }
    Ok(groups)
}
