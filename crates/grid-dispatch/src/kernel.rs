//! The device kernel and its host-side reference semantics.

use crate::grid::{DeviceOutputs, HostInputs};
use crate::runtime::{BufferAccess, KernelSignature};
use glam::UVec3;
use serde::{Deserialize, Serialize};

/// WGSL source compiled at run time.
///
/// Bindings `0` and `1` are the inputs, `2..=4` the outputs. Each work-item
/// derives the global size from `num_workgroups` and the fixed work-group size.
pub const SOURCE: &str = r#"
const WORKGROUP_SIZE: vec3<u32> = vec3<u32>(1u, 1u, 1u);

@group(0) @binding(0) var<storage, read> input1: array<f32>;
@group(0) @binding(1) var<storage, read> input2: array<f32>;
@group(0) @binding(2) var<storage, read_write> output1: array<f32>;
@group(0) @binding(3) var<storage, read_write> output2: array<f32>;
@group(0) @binding(4) var<storage, read_write> output3: array<f32>;

fn flat_index(id: vec3<u32>, size: vec3<u32>) -> u32 {
    return id.x * size.y * size.z + id.y * size.z + id.z;
}

@compute @workgroup_size(1, 1, 1)
fn three_dim_array(
    @builtin(global_invocation_id) id: vec3<u32>,
    @builtin(num_workgroups) groups: vec3<u32>,
) {
    let idx = flat_index(id, groups * WORKGROUP_SIZE);
    output1[idx] = f32(id.x);
    output2[idx] = f32(id.y);
    output3[idx] = f32(id.z);
}

@compute @workgroup_size(1, 1, 1)
fn three_dim_array_sum_inputs(
    @builtin(global_invocation_id) id: vec3<u32>,
    @builtin(num_workgroups) groups: vec3<u32>,
) {
    let idx = flat_index(id, groups * WORKGROUP_SIZE);
    output1[idx] = input1[idx] + input2[idx];
    output2[idx] = f32(id.y);
    output3[idx] = f32(id.z);
}
"#;

/// Access of each kernel argument, by argument index.
pub const ARGS: [BufferAccess; 5] = [
    BufferAccess::ReadOnly,
    BufferAccess::ReadOnly,
    BufferAccess::WriteOnly,
    BufferAccess::WriteOnly,
    BufferAccess::WriteOnly,
];

pub const WORKGROUP_SIZE: [u32; 3] = [1, 1, 1];

/// Which entry point of [`SOURCE`] is launched.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum KernelMode {
    /// Every output holds the coordinate along its own axis.
    #[default]
    Coordinates,
    /// `output1` holds `input1 + input2`; the other outputs hold `y` and `z`.
    SumInputs,
}

impl KernelMode {
    pub const ALL: [Self; 2] = [Self::Coordinates, Self::SumInputs];

    pub fn entry_point(self) -> &'static str {
        match self {
            Self::Coordinates => "three_dim_array",
            Self::SumInputs => "three_dim_array_sum_inputs",
        }
    }

    pub fn from_entry_point(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.entry_point() == name)
    }

    pub fn signature(self) -> KernelSignature<'static> {
        KernelSignature {
            entry_point: self.entry_point(),
            args: &ARGS,
            workgroup_size: WORKGROUP_SIZE,
        }
    }
}

/// What a single work-item writes: the flat index and one value per output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkItem {
    pub index: usize,
    pub values: [f32; 3],
}

/// Host rendition of one invocation at `id` in a launch of `size`.
pub fn work_item(mode: KernelMode, id: UVec3, size: UVec3, inputs: [&[f32]; 2]) -> WorkItem {
    let index = (id.x * size.y * size.z + id.y * size.z + id.z) as usize;
    let first = match mode {
        KernelMode::Coordinates => id.x as f32,
        KernelMode::SumInputs => inputs[0][index] + inputs[1][index],
    };
    WorkItem {
        index,
        values: [first, id.y as f32, id.z as f32],
    }
}

/// The outputs a correct device produces for `inputs`.
pub fn evaluate_on_host(mode: KernelMode, inputs: &HostInputs) -> DeviceOutputs {
    let extents = inputs.extents();
    let size = extents.as_uvec3();
    let mut outputs = DeviceOutputs::zeroed(extents);
    for id in extents.iter() {
        let item = work_item(
            mode,
            id,
            size,
            [inputs.input1.as_slice(), inputs.input2.as_slice()],
        );
        for (grid, value) in outputs.grids_mut().into_iter().zip(item.values) {
            grid.as_mut_slice()[item.index] = value;
        }
    }
    outputs
}
