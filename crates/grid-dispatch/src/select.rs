use crate::error::{FatalSetupError, RuntimeError, Tagged as _};
use crate::pipeline::Console;
use crate::runtime::{ComputeRuntime, Named};
use tracing::{debug, info};

/// The platform and accelerator a run executes on.
pub struct Selected<R: ComputeRuntime> {
    pub platform: R::Platform,
    pub device: R::Device,
}

/// Picks the first accelerator of the first platform, reporting counts on `console`.
///
/// There is no fallback to other platforms or to non-accelerator devices.
pub fn select_device<R: ComputeRuntime>(
    runtime: &R,
    console: &mut Console<'_>,
) -> Result<Selected<R>, FatalSetupError> {
    let platforms = runtime.platforms().tagged("enumerate platforms")?;
    let count = platforms.len();
    let Some(platform) = platforms.into_iter().next() else {
        return Err(FatalSetupError::runtime(
            "enumerate platforms",
            RuntimeError::NoPlatform,
        ));
    };
    console.out_line(format_args!("=== {count} compute platform(s) found: ==="))?;
    console.out_line(format_args!("  NAME = {}", platform.name()))?;

    let (devices, query_error) = match runtime.accelerators(&platform) {
        Ok(devices) => (devices, None),
        Err(RuntimeError::DeviceNotFound) => (Vec::new(), None),
        Err(err) => (Vec::new(), Some(err)),
    };
    console.out_line(format_args!("=== {} compute devices: ===", devices.len()))?;
    if let Some(err) = query_error {
        return Err(FatalSetupError::runtime("query devices", err));
    }
    debug!(
        platform = platform.name(),
        devices = ?devices.iter().map(Named::name).collect::<Vec<_>>(),
        "accelerators"
    );

    let Some(device) = devices.into_iter().next() else {
        console.out_line(format_args!("No accelerator device found"))?;
        return Err(FatalSetupError::runtime(
            "select device",
            RuntimeError::DeviceNotFound,
        ));
    };
    info!(platform = platform.name(), device = device.name(), "selected device");
    Ok(Selected { platform, device })
}
