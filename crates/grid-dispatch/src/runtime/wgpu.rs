//! [`ComputeRuntime`] on top of `wgpu`.
//!
//! Backends act as platforms and adapters as devices. Every operation runs
//! inside a validation and out-of-memory error scope so its failure is reported
//! by the operation itself; anything else reaches the context error handler.

use super::{
    BufferAccess, BuildOutput, ComputeContext, ComputeRuntime, ContextErrorHandler,
    EntryPointInfo, KernelSignature, Named, check_arg, check_launch, check_signature,
    entry_point_summary, reflect_wgsl,
};
use crate::error::RuntimeError;
use futures::executor::block_on;
use glam::UVec3;
use std::{borrow::Cow, fmt::Write as _, sync::Arc};
use tracing::{debug, info, trace, warn};
use wgpu::util::DeviceExt;

/// Discrete, integrated and virtual GPUs. CPU and unknown adapters are not accelerators.
pub fn is_accelerator(device_type: wgpu::DeviceType) -> bool {
    matches!(
        device_type,
        wgpu::DeviceType::DiscreteGpu | wgpu::DeviceType::IntegratedGpu | wgpu::DeviceType::VirtualGpu
    )
}

/// Parses a comma separated backend list, falling back to `WGPU_BACKEND` and then
/// to every backend.
pub fn backends_from_list(list: Option<&str>) -> wgpu::Backends {
    match list {
        Some(list) => {
            let backends = wgpu::Backends::from_comma_list(list);
            if backends.is_empty() {
                warn!("no known backend in {list:?}");
            }
            backends
        }
        None => wgpu::Backends::from_env().unwrap_or(wgpu::Backends::all()),
    }
}

pub struct WgpuRuntime {
    instance: wgpu::Instance,
    backends: wgpu::Backends,
}

impl WgpuRuntime {
    pub fn new(backends: wgpu::Backends) -> Self {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends,
            flags: Default::default(),
            backend_options: Default::default(),
        });
        Self { instance, backends }
    }
}

#[derive(Debug, Clone)]
pub struct WgpuPlatform {
    backend: wgpu::Backend,
    name: String,
}

impl WgpuPlatform {
    pub fn backend(&self) -> wgpu::Backend {
        self.backend
    }
}

impl Named for WgpuPlatform {
    fn name(&self) -> &str {
        &self.name
    }
}

pub struct WgpuDevice {
    adapter: wgpu::Adapter,
    info: wgpu::AdapterInfo,
}

impl WgpuDevice {
    pub fn info(&self) -> &wgpu::AdapterInfo {
        &self.info
    }
}

impl Named for WgpuDevice {
    fn name(&self) -> &str {
        &self.info.name
    }
}

impl ComputeRuntime for WgpuRuntime {
    type Platform = WgpuPlatform;
    type Device = WgpuDevice;
    type Context = WgpuContext;

    fn platforms(&self) -> Result<Vec<WgpuPlatform>, RuntimeError> {
        let mut platforms: Vec<WgpuPlatform> = Vec::new();
        for adapter in self.instance.enumerate_adapters(self.backends) {
            let backend = adapter.get_info().backend;
            if platforms.iter().all(|p| p.backend != backend) {
                platforms.push(WgpuPlatform {
                    backend,
                    name: format!("{backend:?}"),
                });
            }
        }
        debug!(count = platforms.len(), backends = ?self.backends, "enumerated platforms");
        Ok(platforms)
    }

    fn accelerators(&self, platform: &WgpuPlatform) -> Result<Vec<WgpuDevice>, RuntimeError> {
        let devices: Vec<WgpuDevice> = self
            .instance
            .enumerate_adapters(wgpu::Backends::from(platform.backend))
            .into_iter()
            .filter_map(|adapter| {
                let info = adapter.get_info();
                trace!(name = %info.name, device_type = ?info.device_type, "adapter");
                is_accelerator(info.device_type).then_some(WgpuDevice { adapter, info })
            })
            .collect();
        if devices.is_empty() {
            return Err(RuntimeError::DeviceNotFound);
        }
        Ok(devices)
    }

    fn create_context(
        &self,
        device: WgpuDevice,
        on_error: Arc<dyn ContextErrorHandler>,
    ) -> Result<WgpuContext, RuntimeError> {
        let limits = device.adapter.limits();
        let (wgpu_device, queue) = block_on(device.adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("three_dim_array device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits.clone(),
            memory_hints: Default::default(),
            trace: Default::default(),
        }))
        .map_err(|e| RuntimeError::DeviceNotAvailable(e.to_string()))?;
        wgpu_device.on_uncaptured_error(Box::new(move |err: wgpu::Error| {
            on_error.context_error(&err.to_string());
        }));
        info!(
            adapter = %device.info.name,
            backend = ?device.info.backend,
            driver = %device.info.driver,
            "opened device"
        );
        Ok(WgpuContext {
            device: wgpu_device,
            queue,
            limits,
        })
    }
}

pub struct WgpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    limits: wgpu::Limits,
}

pub struct WgpuProgram {
    module: wgpu::ShaderModule,
    entry_points: Vec<EntryPointInfo>,
}

pub struct WgpuKernel {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    access: Vec<BufferAccess>,
    workgroup_size: [u32; 3],
    args: Vec<Option<Arc<wgpu::Buffer>>>,
}

#[derive(Clone)]
pub struct WgpuBuffer {
    buffer: Arc<wgpu::Buffer>,
    access: BufferAccess,
    len: usize,
}

/// Maps a scoped error, keeping allocation failures distinct.
fn scoped_error(err: &wgpu::Error, otherwise: impl FnOnce(String) -> RuntimeError) -> RuntimeError {
    match err {
        wgpu::Error::OutOfMemory { .. } => RuntimeError::OutOfMemory(err.to_string()),
        _ => otherwise(err.to_string()),
    }
}

impl WgpuContext {
    /// Runs `f` inside validation and out-of-memory error scopes.
    fn scoped<T>(&self, f: impl FnOnce() -> T) -> (T, Option<wgpu::Error>) {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        let validation = block_on(self.device.pop_error_scope());
        let out_of_memory = block_on(self.device.pop_error_scope());
        (value, validation.or(out_of_memory))
    }

    fn wait(&self) -> Result<(), RuntimeError> {
        self.device
            .poll(wgpu::PollType::Wait)
            .map(drop)
            .map_err(|e| RuntimeError::InvalidCommandQueue(e.to_string()))
    }
}

impl ComputeContext for WgpuContext {
    type Program = WgpuProgram;
    type Kernel = WgpuKernel;
    type Buffer = WgpuBuffer;

    fn build_program(&self, source: &str) -> BuildOutput<WgpuProgram> {
        let entry_points = match reflect_wgsl(source) {
            Ok(entry_points) => entry_points,
            Err(log) => {
                return BuildOutput {
                    program: Err(RuntimeError::BuildFailure),
                    log,
                };
            }
        };
        let mut log = entry_point_summary(&entry_points);
        let (module, error) = self.scoped(|| {
            self.device
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some("three_dim_array kernels"),
                    source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
                })
        });
        for message in block_on(module.get_compilation_info()).messages {
            let _ = writeln!(log, "{:?}: {}", message.message_type, message.message);
        }
        let program = match error {
            Some(err) => {
                let _ = writeln!(log, "{err}");
                Err(scoped_error(&err, |_| RuntimeError::BuildFailure))
            }
            None => Ok(WgpuProgram {
                module,
                entry_points,
            }),
        };
        BuildOutput { program, log }
    }

    fn create_kernel(
        &self,
        program: &WgpuProgram,
        signature: &KernelSignature<'_>,
    ) -> Result<WgpuKernel, RuntimeError> {
        check_signature(&program.entry_points, signature)?;
        let entries: Vec<wgpu::BindGroupLayoutEntry> = (0u32..)
            .zip(signature.args)
            .map(|(binding, access)| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage {
                        read_only: *access == BufferAccess::ReadOnly,
                    },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();
        let ((pipeline, layout), error) = self.scoped(|| {
            let layout = self
                .device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("kernel arguments"),
                    entries: &entries,
                });
            let pipeline_layout =
                self.device
                    .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                        label: Some("kernel layout"),
                        bind_group_layouts: &[&layout],
                        push_constant_ranges: &[],
                    });
            let pipeline = self
                .device
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(signature.entry_point),
                    layout: Some(&pipeline_layout),
                    module: &program.module,
                    entry_point: Some(signature.entry_point),
                    compilation_options: Default::default(),
                    cache: None,
                });
            (pipeline, layout)
        });
        if let Some(err) = error {
            return Err(scoped_error(&err, |reason| {
                RuntimeError::InvalidKernelDefinition {
                    entry_point: signature.entry_point.to_owned(),
                    reason,
                }
            }));
        }
        debug!(entry_point = signature.entry_point, "created kernel");
        Ok(WgpuKernel {
            pipeline,
            layout,
            access: signature.args.to_vec(),
            workgroup_size: signature.workgroup_size,
            args: vec![None; signature.args.len()],
        })
    }

    fn create_buffer(
        &self,
        label: &str,
        access: BufferAccess,
        len: usize,
        contents: Option<&[f32]>,
    ) -> Result<WgpuBuffer, RuntimeError> {
        let size = (len * size_of::<f32>()) as u64;
        let max_size = self
            .limits
            .max_buffer_size
            .min(u64::from(self.limits.max_storage_buffer_binding_size));
        if size == 0 || size > max_size {
            return Err(RuntimeError::InvalidBufferSize(size));
        }
        if let Some(contents) = contents {
            if contents.len() != len {
                return Err(RuntimeError::InvalidValue(format!(
                    "{label}: {} initial values for {len} elements",
                    contents.len()
                )));
            }
        }
        let usage = wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST;
        let (buffer, error) = self.scoped(|| match contents {
            Some(contents) => self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents: bytemuck::cast_slice(contents),
                    usage,
                }),
            None => self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage,
                mapped_at_creation: false,
            }),
        });
        if let Some(err) = error {
            return Err(scoped_error(&err, RuntimeError::InvalidOperation));
        }
        trace!(label, size, ?access, "created buffer");
        Ok(WgpuBuffer {
            buffer: Arc::new(buffer),
            access,
            len,
        })
    }

    fn set_arg(
        &self,
        kernel: &mut WgpuKernel,
        index: u32,
        buffer: &WgpuBuffer,
    ) -> Result<(), RuntimeError> {
        check_arg(&kernel.access, index, buffer.access)?;
        kernel.args[index as usize] = Some(buffer.buffer.clone());
        Ok(())
    }

    fn enqueue(
        &self,
        kernel: &WgpuKernel,
        global: UVec3,
        local: UVec3,
    ) -> Result<(), RuntimeError> {
        let bound: Vec<bool> = kernel.args.iter().map(Option::is_some).collect();
        let groups = check_launch(
            &bound,
            kernel.workgroup_size,
            global,
            local,
            self.limits.max_compute_workgroups_per_dimension,
        )?;
        let entries: Vec<wgpu::BindGroupEntry<'_>> = (0u32..)
            .zip(&kernel.args)
            .filter_map(|(binding, buffer)| {
                buffer.as_ref().map(|buffer| wgpu::BindGroupEntry {
                    binding,
                    resource: buffer.as_entire_binding(),
                })
            })
            .collect();
        let ((), error) = self.scoped(|| {
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("kernel arguments"),
                layout: &kernel.layout,
                entries: &entries,
            });
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("dispatch"),
                });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("dispatch"),
                    timestamp_writes: Default::default(),
                });
                pass.set_pipeline(&kernel.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(groups.x, groups.y, groups.z);
            }
            self.queue.submit(Some(encoder.finish()));
        });
        if let Some(err) = error {
            return Err(scoped_error(&err, RuntimeError::InvalidOperation));
        }
        self.wait()?;
        debug!(%global, %groups, "kernel finished");
        Ok(())
    }

    fn read_buffer(&self, buffer: &WgpuBuffer, out: &mut [f32]) -> Result<(), RuntimeError> {
        if out.len() != buffer.len {
            return Err(RuntimeError::InvalidValue(format!(
                "destination holds {} elements, buffer holds {}",
                out.len(),
                buffer.len
            )));
        }
        let size = buffer.buffer.size();
        let (staging, error) = self.scoped(|| {
            let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("staging"),
                size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("read back"),
                });
            encoder.copy_buffer_to_buffer(&buffer.buffer, 0, &staging, 0, size);
            self.queue.submit(Some(encoder.finish()));
            staging
        });
        if let Some(err) = error {
            return Err(scoped_error(&err, RuntimeError::InvalidOperation));
        }

        let slice = staging.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = sender.send(res);
        });
        self.wait()?;
        block_on(receiver)
            .map_err(|_canceled| RuntimeError::MapFailure("mapping canceled".to_owned()))?
            .map_err(|e| RuntimeError::MapFailure(e.to_string()))?;
        {
            let data = slice.get_mapped_range();
            bytemuck::cast_slice_mut::<f32, u8>(out).copy_from_slice(&data);
        }
        staging.unmap();
        Ok(())
    }
}
