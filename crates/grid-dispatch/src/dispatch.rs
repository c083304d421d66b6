use crate::error::{FatalSetupError, Tagged as _};
use crate::grid::{DeviceOutputs, HostInputs};
use crate::kernel::{KernelMode, SOURCE, WORKGROUP_SIZE};
use crate::pipeline::Console;
use crate::runtime::{BufferAccess, ComputeContext};
use glam::UVec3;
use tracing::{debug, trace};

/// Compiles the kernel, binds the five buffers, launches over the grid extents
/// and reads the three outputs back in order.
///
/// The build log goes to `console` before the build result is looked at.
pub fn dispatch<C: ComputeContext>(
    ctx: &C,
    inputs: &HostInputs,
    mode: KernelMode,
    console: &mut Console<'_>,
) -> Result<DeviceOutputs, FatalSetupError> {
    let extents = inputs.extents();
    let len = extents.len();

    let build = ctx.build_program(SOURCE);
    console.err_text(format_args!("Kernel compilation:\n {} \n", build.log))?;
    let program = build.program.tagged("build program")?;

    let mut kernel = ctx
        .create_kernel(&program, &mode.signature())
        .tagged("create kernel")?;

    let input1 = ctx
        .create_buffer(
            "input1",
            BufferAccess::ReadOnly,
            len,
            Some(inputs.input1.as_slice()),
        )
        .tagged("create buffer(input1)")?;
    let input2 = ctx
        .create_buffer(
            "input2",
            BufferAccess::ReadOnly,
            len,
            Some(inputs.input2.as_slice()),
        )
        .tagged("create buffer(input2)")?;
    let output1 = ctx
        .create_buffer("output1", BufferAccess::WriteOnly, len, None)
        .tagged("create buffer(output1)")?;
    let output2 = ctx
        .create_buffer("output2", BufferAccess::WriteOnly, len, None)
        .tagged("create buffer(output2)")?;
    let output3 = ctx
        .create_buffer("output3", BufferAccess::WriteOnly, len, None)
        .tagged("create buffer(output3)")?;
    trace!(len, "allocated buffers");

    for (index, buffer) in (0u32..).zip([&input1, &input2, &output1, &output2, &output3]) {
        ctx.set_arg(&mut kernel, index, buffer)
            .tagged("set kernel arg")?;
    }

    let global = extents.as_uvec3();
    ctx.enqueue(&kernel, global, UVec3::from_array(WORKGROUP_SIZE))
        .tagged("enqueue kernel")?;
    debug!(%global, entry_point = mode.entry_point(), "dispatched");

    let mut outputs = DeviceOutputs::zeroed(extents);
    for ((n, buffer), grid) in (1..)
        .zip([&output1, &output2, &output3])
        .zip(outputs.grids_mut())
    {
        ctx.read_buffer(buffer, grid.as_mut_slice())
            .tagged(format!("read buffer - {n}"))?;
    }
    Ok(outputs)
}
