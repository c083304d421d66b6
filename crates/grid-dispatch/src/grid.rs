//! Flat, contiguous storage for the three-dimensional grids shared by host and device.
//!
//! A grid has a `depth x width x height` shape and is indexed `(x, y, z)` with `x`
//! over depth, `y` over width and `z` over height. The device kernel flattens
//! coordinates the same way, see [`Extents::flat_index`].

use glam::UVec3;
use serde::{Deserialize, Serialize};

/// Shape of every grid in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extents {
    pub depth: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for Extents {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl Extents {
    /// Different sizes on each axis make misattributed indices easy to spot in a dump.
    pub const DEFAULT: Self = Self::new(4, 8, 16);

    pub const fn new(depth: u32, width: u32, height: u32) -> Self {
        Self {
            depth,
            width,
            height,
        }
    }

    /// `true` when no axis is empty.
    pub fn is_valid(&self) -> bool {
        self.depth > 0 && self.width > 0 && self.height > 0
    }

    /// Number of cells, or `None` if it does not fit in a `u32`.
    ///
    /// The kernel computes indices in 32-bit arithmetic, so larger grids cannot
    /// be addressed on the device.
    pub fn checked_len(&self) -> Option<u32> {
        self.depth
            .checked_mul(self.width)
            .and_then(|n| n.checked_mul(self.height))
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.depth as usize * self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Launch size in `(depth, width, height)` order.
    pub fn as_uvec3(&self) -> UVec3 {
        UVec3::new(self.depth, self.width, self.height)
    }

    pub fn contains(&self, at: UVec3) -> bool {
        at.x < self.depth && at.y < self.width && at.z < self.height
    }

    /// `x * (width * height) + y * height + z`.
    pub fn flat_index(&self, at: UVec3) -> usize {
        let (w, h) = (self.width as usize, self.height as usize);
        at.x as usize * (w * h) + at.y as usize * h + at.z as usize
    }

    /// Inverse of [`Self::flat_index`].
    pub fn coords(&self, index: usize) -> UVec3 {
        let (w, h) = (self.width as usize, self.height as usize);
        let x = index / (w * h);
        let y = (index / h) % w;
        let z = index % h;
        UVec3::new(x as u32, y as u32, z as u32)
    }

    /// All coordinates in storage order: `x` outermost, `z` innermost.
    pub fn iter(&self) -> impl Iterator<Item = UVec3> + use<> {
        let Self {
            depth,
            width,
            height,
        } = *self;
        (0..depth).flat_map(move |x| {
            (0..width).flat_map(move |y| (0..height).map(move |z| UVec3::new(x, y, z)))
        })
    }
}

/// A `depth x width x height` grid of `f32` stored as one flat buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    extents: Extents,
    data: Vec<f32>,
}

impl Grid {
    pub fn filled(extents: Extents, value: f32) -> Self {
        Self {
            extents,
            data: vec![value; extents.len()],
        }
    }

    pub fn zeroed(extents: Extents) -> Self {
        Self::filled(extents, 0.0)
    }

    pub fn extents(&self) -> Extents {
        self.extents
    }

    pub fn get(&self, at: UVec3) -> Option<f32> {
        self.extents
            .contains(at)
            .then(|| self.data[self.extents.flat_index(at)])
    }

    /// Panics if `at` lies outside the extents, even when its flat index would fit.
    pub fn set(&mut self, at: UVec3, value: f32) {
        assert!(
            self.extents.contains(at),
            "{at} is outside {:?}",
            self.extents
        );
        let index = self.extents.flat_index(at);
        self.data[index] = value;
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    /// Rows of `height` values, one per `(x, y)` pair, in storage order.
    ///
    /// Empty when any axis is empty.
    pub fn rows(&self) -> std::slice::Chunks<'_, f32> {
        self.data.chunks(self.extents.height.max(1) as usize)
    }
}

/// The two constant-filled grids copied to the device before dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct HostInputs {
    pub input1: Grid,
    pub input2: Grid,
}

impl HostInputs {
    pub fn filled(extents: Extents, fill: [f32; 2]) -> Self {
        Self {
            input1: Grid::filled(extents, fill[0]),
            input2: Grid::filled(extents, fill[1]),
        }
    }

    pub fn extents(&self) -> Extents {
        self.input1.extents()
    }
}

/// The three grids read back from the device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceOutputs {
    pub output1: Grid,
    pub output2: Grid,
    pub output3: Grid,
}

impl DeviceOutputs {
    pub fn zeroed(extents: Extents) -> Self {
        Self {
            output1: Grid::zeroed(extents),
            output2: Grid::zeroed(extents),
            output3: Grid::zeroed(extents),
        }
    }

    pub fn extents(&self) -> Extents {
        self.output1.extents()
    }

    /// The grids in dump order.
    pub fn grids(&self) -> [&Grid; 3] {
        [&self.output1, &self.output2, &self.output3]
    }

    pub fn grids_mut(&mut self) -> [&mut Grid; 3] {
        [&mut self.output1, &mut self.output2, &mut self.output3]
    }
}
