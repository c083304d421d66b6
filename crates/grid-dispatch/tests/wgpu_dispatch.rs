//! Runs the pipeline on a real adapter. Skips when the machine has no accelerator.

use grid_dispatch::runtime::ComputeRuntime;
use grid_dispatch::runtime::wgpu::{WgpuRuntime, backends_from_list};
use grid_dispatch::{Config, Console, Extents, KernelMode, dump};
use std::sync::{Arc, Mutex};

fn runtime_with_accelerator() -> Option<WgpuRuntime> {
    let runtime = WgpuRuntime::new(backends_from_list(None));
    let platforms = runtime.platforms().ok()?;
    // The pipeline only ever looks at the first platform.
    let has_accelerator = platforms
        .first()
        .is_some_and(|platform| runtime.accelerators(platform).is_ok());
    if !has_accelerator {
        eprintln!("no accelerator adapter available, skipping");
        return None;
    }
    Some(runtime)
}

fn run(runtime: &WgpuRuntime, config: &Config) -> grid_dispatch::RunSummary {
    let context_errors = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = context_errors.clone();
    let (mut out, mut err) = (Vec::new(), Vec::new());
    let summary = grid_dispatch::run(
        runtime,
        config,
        Arc::new(move |info: &str| sink.lock().unwrap().push(info.to_owned())),
        &mut Console::new(&mut out, &mut err),
    )
    .unwrap_or_else(|e| panic!("{e}: {:?}", std::error::Error::source(&e)));
    assert!(context_errors.lock().unwrap().is_empty());
    assert!(String::from_utf8(err).unwrap().starts_with("Kernel compilation:\n"));
    summary
}

#[test]
fn device_writes_coordinates() {
    let Some(runtime) = runtime_with_accelerator() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    for extents in [Extents::DEFAULT, Extents::new(3, 5, 7), Extents::new(1, 1, 1)] {
        let config = Config {
            extents,
            output_path: dir.path().join("output.txt"),
            verify: true,
            ..Config::default()
        };
        let summary = run(&runtime, &config);
        for at in extents.iter() {
            assert_eq!(summary.outputs.output1.get(at), Some(at.x as f32));
            assert_eq!(summary.outputs.output2.get(at), Some(at.y as f32));
            assert_eq!(summary.outputs.output3.get(at), Some(at.z as f32));
        }
        let text = std::fs::read_to_string(&config.output_path).unwrap();
        assert_eq!(text, dump::render(&summary.outputs));
    }
}

#[test]
fn device_sums_inputs() {
    let Some(runtime) = runtime_with_accelerator() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        mode: KernelMode::SumInputs,
        output_path: dir.path().join("output.txt"),
        verify: true,
        ..Config::default()
    };
    let summary = run(&runtime, &config);
    assert!(summary.outputs.output1.as_slice().iter().all(|&v| v == 201.0));
}
