//! Scripted in-process runtime executing the kernel semantics on the host.

use super::{
    BufferAccess, BuildOutput, ComputeContext, ComputeRuntime, ContextErrorHandler,
    EntryPointInfo, KernelSignature, Named, check_arg, check_launch, check_signature,
    entry_point_summary, reflect_wgsl,
};
use crate::error::RuntimeError;
use crate::grid::Extents;
use crate::kernel::{KernelMode, work_item};
use glam::UVec3;
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    sync::Arc,
};

/// A step at which the scripted runtime fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailPoint {
    Context,
    Build,
    Kernel,
    /// The n-th buffer allocation, counting from zero.
    Buffer(usize),
    SetArg,
    Enqueue,
    /// The n-th buffer read, counting from zero.
    Read(usize),
    /// Report an asynchronous error through the context handler during the launch.
    ContextError,
}

pub(crate) struct FakeRuntime {
    pub platforms: Result<Vec<String>, RuntimeError>,
    pub devices: Result<Vec<String>, RuntimeError>,
    pub fail: Option<FailPoint>,
    pub max_groups: u32,
    /// Every runtime call, in order.
    pub journal: Rc<RefCell<Vec<String>>>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self {
            platforms: Ok(vec!["Fake Platform".to_owned()]),
            devices: Ok(vec!["Fake GPU 0".to_owned(), "Fake GPU 1".to_owned()]),
            fail: None,
            max_groups: 65_535,
            journal: Rc::default(),
        }
    }
}

impl FakeRuntime {
    pub fn failing_at(fail: FailPoint) -> Self {
        Self {
            fail: Some(fail),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.journal.borrow().clone()
    }
}

pub(crate) struct FakeNamed(String);

impl Named for FakeNamed {
    fn name(&self) -> &str {
        &self.0
    }
}

impl ComputeRuntime for FakeRuntime {
    type Platform = FakeNamed;
    type Device = FakeNamed;
    type Context = FakeContext;

    fn platforms(&self) -> Result<Vec<FakeNamed>, RuntimeError> {
        self.journal.borrow_mut().push("platforms".to_owned());
        let names = self.platforms.clone()?;
        Ok(names.into_iter().map(FakeNamed).collect())
    }

    fn accelerators(&self, platform: &FakeNamed) -> Result<Vec<FakeNamed>, RuntimeError> {
        self.journal
            .borrow_mut()
            .push(format!("accelerators({})", platform.0));
        let names = self.devices.clone()?;
        Ok(names.into_iter().map(FakeNamed).collect())
    }

    fn create_context(
        &self,
        device: FakeNamed,
        on_error: Arc<dyn ContextErrorHandler>,
    ) -> Result<FakeContext, RuntimeError> {
        self.journal
            .borrow_mut()
            .push(format!("create_context({})", device.0));
        if self.fail == Some(FailPoint::Context) {
            return Err(RuntimeError::DeviceNotAvailable(device.0));
        }
        Ok(FakeContext {
            fail: self.fail,
            max_groups: self.max_groups,
            on_error,
            buffers: Cell::new(0),
            reads: Cell::new(0),
            journal: self.journal.clone(),
        })
    }
}

pub(crate) struct FakeContext {
    fail: Option<FailPoint>,
    max_groups: u32,
    on_error: Arc<dyn ContextErrorHandler>,
    buffers: Cell<usize>,
    reads: Cell<usize>,
    journal: Rc<RefCell<Vec<String>>>,
}

pub(crate) struct FakeKernel {
    mode: KernelMode,
    access: Vec<BufferAccess>,
    workgroup_size: [u32; 3],
    args: Vec<Option<FakeBuffer>>,
}

#[derive(Clone)]
pub(crate) struct FakeBuffer {
    data: Rc<RefCell<Vec<f32>>>,
    access: BufferAccess,
}

impl FakeContext {
    fn record(&self, call: String) {
        self.journal.borrow_mut().push(call);
    }

    /// Bumps `counter` and reports whether this call is the scripted failure.
    fn nth(counter: &Cell<usize>, fail: Option<usize>) -> bool {
        let n = counter.get();
        counter.set(n + 1);
        fail == Some(n)
    }
}

impl ComputeContext for FakeContext {
    type Program = Vec<EntryPointInfo>;
    type Kernel = FakeKernel;
    type Buffer = FakeBuffer;

    fn build_program(&self, source: &str) -> BuildOutput<Vec<EntryPointInfo>> {
        self.record("build_program".to_owned());
        if self.fail == Some(FailPoint::Build) {
            return BuildOutput {
                program: Err(RuntimeError::BuildFailure),
                log: "fake compiler: refusing to build".to_owned(),
            };
        }
        match reflect_wgsl(source) {
            Ok(entry_points) => BuildOutput {
                log: entry_point_summary(&entry_points),
                program: Ok(entry_points),
            },
            Err(log) => BuildOutput {
                program: Err(RuntimeError::BuildFailure),
                log,
            },
        }
    }

    fn create_kernel(
        &self,
        program: &Vec<EntryPointInfo>,
        signature: &KernelSignature<'_>,
    ) -> Result<FakeKernel, RuntimeError> {
        self.record(format!("create_kernel({})", signature.entry_point));
        if self.fail == Some(FailPoint::Kernel) {
            return Err(RuntimeError::InvalidKernelDefinition {
                entry_point: signature.entry_point.to_owned(),
                reason: "scripted failure".to_owned(),
            });
        }
        check_signature(program, signature)?;
        let mode = KernelMode::from_entry_point(signature.entry_point)
            .ok_or_else(|| RuntimeError::InvalidKernelName(signature.entry_point.to_owned()))?;
        Ok(FakeKernel {
            mode,
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
    ) -> Result<FakeBuffer, RuntimeError> {
        self.record(format!("create_buffer({label})"));
        let fail = match self.fail {
            Some(FailPoint::Buffer(n)) => Some(n),
            _ => None,
        };
        if Self::nth(&self.buffers, fail) {
            return Err(RuntimeError::OutOfMemory(label.to_owned()));
        }
        if len == 0 {
            return Err(RuntimeError::InvalidBufferSize(0));
        }
        let data = match contents {
            Some(contents) if contents.len() == len => contents.to_vec(),
            Some(contents) => {
                return Err(RuntimeError::InvalidValue(format!(
                    "{} values for {len} elements",
                    contents.len()
                )));
            }
            None => vec![0.0; len],
        };
        Ok(FakeBuffer {
            data: Rc::new(RefCell::new(data)),
            access,
        })
    }

    fn set_arg(
        &self,
        kernel: &mut FakeKernel,
        index: u32,
        buffer: &FakeBuffer,
    ) -> Result<(), RuntimeError> {
        self.record(format!("set_arg({index})"));
        if self.fail == Some(FailPoint::SetArg) {
            return Err(RuntimeError::InvalidArgValue {
                index,
                reason: "scripted failure".to_owned(),
            });
        }
        check_arg(&kernel.access, index, buffer.access)?;
        kernel.args[index as usize] = Some(buffer.clone());
        Ok(())
    }

    fn enqueue(
        &self,
        kernel: &FakeKernel,
        global: UVec3,
        local: UVec3,
    ) -> Result<(), RuntimeError> {
        self.record(format!("enqueue({global})"));
        if self.fail == Some(FailPoint::Enqueue) {
            return Err(RuntimeError::OutOfResources("scripted failure".to_owned()));
        }
        let bound: Vec<bool> = kernel.args.iter().map(Option::is_some).collect();
        check_launch(&bound, kernel.workgroup_size, global, local, self.max_groups)?;
        if self.fail == Some(FailPoint::ContextError) {
            self.on_error.context_error("fake device lost");
        }

        let args: Vec<&FakeBuffer> = kernel.args.iter().flatten().collect();
        let input1 = args[0].data.borrow().clone();
        let input2 = args[1].data.borrow().clone();
        for id in Extents::new(global.x, global.y, global.z).iter() {
            let item = work_item(kernel.mode, id, global, [input1.as_slice(), input2.as_slice()]);
            for (output, value) in args[2..].iter().zip(item.values) {
                output.data.borrow_mut()[item.index] = value;
            }
        }
        Ok(())
    }

    fn read_buffer(&self, buffer: &FakeBuffer, out: &mut [f32]) -> Result<(), RuntimeError> {
        self.record("read_buffer".to_owned());
        let fail = match self.fail {
            Some(FailPoint::Read(n)) => Some(n),
            _ => None,
        };
        if Self::nth(&self.reads, fail) {
            return Err(RuntimeError::MapFailure("scripted failure".to_owned()));
        }
        let data = buffer.data.borrow();
        if data.len() != out.len() {
            return Err(RuntimeError::InvalidValue(format!(
                "destination holds {} elements, buffer holds {}",
                out.len(),
                data.len()
            )));
        }
        out.copy_from_slice(&data);
        Ok(())
    }
}
