use crate::config::Config;
use crate::dispatch::dispatch;
use crate::dump;
use crate::error::{FatalSetupError, Tagged as _};
use crate::grid::{DeviceOutputs, HostInputs};
use crate::kernel::evaluate_on_host;
use crate::runtime::{ComputeRuntime, ContextErrorHandler, Named};
use crate::select::select_device;
use std::{fmt, io::Write, path::PathBuf, sync::Arc};
use tracing::{debug, error, info};

/// Where the report lines and the build log are written.
///
/// Stdout carries only the selector's report; everything else goes to stderr.
pub struct Console<'a> {
    out: &'a mut dyn Write,
    err: &'a mut dyn Write,
}

impl<'a> Console<'a> {
    pub fn new(out: &'a mut dyn Write, err: &'a mut dyn Write) -> Self {
        Self { out, err }
    }

    pub(crate) fn out_line(&mut self, line: fmt::Arguments<'_>) -> Result<(), FatalSetupError> {
        writeln!(self.out, "{line}").map_err(|e| FatalSetupError::io("write stdout", e))
    }

    pub(crate) fn err_text(&mut self, text: fmt::Arguments<'_>) -> Result<(), FatalSetupError> {
        self.err
            .write_fmt(text)
            .and_then(|()| self.err.flush())
            .map_err(|e| FatalSetupError::io("write stderr", e))
    }
}

/// What a successful run produced.
#[derive(Debug)]
pub struct RunSummary {
    pub platform: String,
    pub device: String,
    pub output_path: PathBuf,
    pub outputs: DeviceOutputs,
}

/// Runs every stage against `runtime`: fill the inputs, select a device, open a
/// context, dispatch, optionally verify, and write the dump.
///
/// Nothing is written to `config.output_path` unless every earlier stage succeeds.
pub fn run<R: ComputeRuntime>(
    runtime: &R,
    config: &Config,
    on_context_error: Arc<dyn ContextErrorHandler>,
    console: &mut Console<'_>,
) -> Result<RunSummary, FatalSetupError> {
    let result = run_stages(runtime, config, on_context_error, console);
    if let Err(err) = &result {
        error!(tag = %err.tag(), code = err.code(), cause = ?std::error::Error::source(err), "run failed");
    }
    result
}

fn run_stages<R: ComputeRuntime>(
    runtime: &R,
    config: &Config,
    on_context_error: Arc<dyn ContextErrorHandler>,
    console: &mut Console<'_>,
) -> Result<RunSummary, FatalSetupError> {
    config.validate()?;
    debug!(?config, "starting run");

    let inputs = HostInputs::filled(config.extents, config.fill);

    let selected = select_device(runtime, console)?;
    let platform = selected.platform.name().to_owned();
    let device = selected.device.name().to_owned();

    let ctx = runtime
        .create_context(selected.device, on_context_error)
        .tagged("create context")?;
    let outputs = dispatch(&ctx, &inputs, config.mode, console)?;

    if config.verify {
        verify(&outputs, &evaluate_on_host(config.mode, &inputs))?;
        info!("device results match the host evaluation");
    }

    dump::write_file(&config.output_path, &outputs)?;
    info!(path = %config.output_path.display(), %device, "run complete");
    Ok(RunSummary {
        platform,
        device,
        output_path: config.output_path.clone(),
        outputs,
    })
}

/// Fails on the first cell where `found` differs from `expected`.
pub fn verify(found: &DeviceOutputs, expected: &DeviceOutputs) -> Result<(), FatalSetupError> {
    let pairs = found.grids().into_iter().zip(expected.grids());
    for (grid, (found, expected)) in (1..).zip(pairs) {
        let mismatch = found
            .as_slice()
            .iter()
            .zip(expected.as_slice())
            .position(|(f, e)| f.to_bits() != e.to_bits());
        if let Some(index) = mismatch {
            return Err(FatalSetupError::Verification {
                grid,
                at: found.extents().coords(index),
                expected: expected.as_slice()[index],
                found: found.as_slice()[index],
            });
        }
    }
    Ok(())
}
