#![allow(clippy::exit)]

//! Runs the coordinate kernel on the first accelerator found and writes the
//! three grids to `output.txt`.

use anyhow::Result;
use clap::Parser;
use grid_dispatch::runtime::wgpu::{WgpuRuntime, backends_from_list};
use grid_dispatch::{Config, ConfigError, FatalSetupError, KernelMode};
use std::{io, path::PathBuf, process, sync::Arc};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug, Clone, Default)]
#[command(about = "Writes per-element 3-D coordinates computed on a GPU to a text file")]
struct Options {
    /// JSON configuration file; flags given here override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// where the grids are written
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long)]
    depth: Option<u32>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// which kernel entry point to launch
    #[arg(short, long, value_enum)]
    mode: Option<KernelMode>,

    /// comma separated wgpu backends, e.g. `vulkan,metal`; defaults to `WGPU_BACKEND` or all
    #[arg(long)]
    backends: Option<String>,

    /// compare the device results with the host evaluation before writing
    #[arg(long)]
    verify: bool,
}

impl Options {
    fn into_config(self) -> Result<Config, ConfigError> {
        let mut config = match &self.config {
            Some(path) => Config::from_path(path)?,
            None => Config::default(),
        };
        if let Some(output) = self.output {
            config.output_path = output;
        }
        if let Some(depth) = self.depth {
            config.extents.depth = depth;
        }
        if let Some(width) = self.width {
            config.extents.width = width;
        }
        if let Some(height) = self.height {
            config.extents.height = height;
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if self.backends.is_some() {
            config.backends = self.backends;
        }
        config.verify |= self.verify;
        Ok(config)
    }
}

fn exit_on_context_error(info: &str) {
    println!("Error in context: {info}");
    process::exit(1);
}

/// The `ERROR:` line followed by one `  caused by:` line per source.
fn report(err: &FatalSetupError) -> String {
    let mut text = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        text.push_str(&format!("\n  caused by: {cause}"));
        source = cause.source();
    }
    text
}

fn fail(err: &FatalSetupError) -> ! {
    eprintln!("{}", report(err));
    process::exit(1);
}

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match Options::parse().into_config() {
        Ok(config) => config,
        Err(err) => fail(&err.into()),
    };
    tracing::debug!(?config, "configuration");

    let runtime = WgpuRuntime::new(backends_from_list(config.backends.as_deref()));
    let result = grid_dispatch::run(
        &runtime,
        &config,
        Arc::new(exit_on_context_error),
        &mut grid_dispatch::Console::new(&mut io::stdout(), &mut io::stderr()),
    );
    match result {
        Ok(summary) => {
            tracing::info!(
                device = %summary.device,
                path = %summary.output_path.display(),
                "done"
            );
            Ok(())
        }
        Err(err) => fail(&err),
    }
}
