//! Device API seam used by the geometry cache
//!
//! The cache never talks to a concrete ray-tracing API. It uploads byte
//! buffers and requests acceleration-structure builds through
//! [`AccelDevice`], on the caller-supplied stream.

use thiserror::Error;

/// Opaque device context handle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DeviceContext(pub u64);

/// Opaque execution stream handle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct StreamHandle(pub u64);

/// Device memory address
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DevicePtr(pub u64);

impl DevicePtr {
    /// Address 0 marks an absent buffer
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

/// Handle the device uses to traverse a built acceleration structure
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TraversableHandle(pub u64);

/// Failures reported by the device API
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("out of device memory allocating {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("acceleration structure build failed: {0}")]
    BuildFailed(String),
}

/// One geometry input to an acceleration-structure build
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildInput {
    /// Indexed triangles; vertices are `[f32; 3]`, indices are `[u32; 3]`
    Triangles {
        vertices: DevicePtr,
        num_vertices: u32,
        indices: DevicePtr,
        num_triangles: u32,
    },
    /// Spheres given as `[f32; 3]` centers and `f32` radii
    Spheres {
        centers: DevicePtr,
        radii: DevicePtr,
        count: u32,
    },
}

impl BuildInput {
    /// Primitives this input contributes
    pub fn num_primitives(&self) -> u32 {
        match *self {
            BuildInput::Triangles { num_triangles, .. } => num_triangles,
            BuildInput::Spheres { count, .. } => count,
        }
    }
}

/// Result of a successful build
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccelBuild {
    /// Output buffer owning the acceleration structure
    pub buffer: DevicePtr,
    pub traversable: TraversableHandle,
    pub size_bytes: usize,
}

/// Device operations the geometry cache needs.
///
/// Work is enqueued on `stream`; callers synchronize the stream before
/// reading results from the host or another stream.
pub trait AccelDevice: Send + Sync {
    /// Allocate device memory and copy `bytes` into it
    fn upload(&self, context: DeviceContext, stream: StreamHandle, bytes: &[u8]) -> Result<DevicePtr, DeviceError>;

    /// Build one acceleration structure over all `inputs`, in order.
    ///
    /// Primitive indices are assigned contiguously across inputs.
    fn build(
        &self,
        context: DeviceContext,
        stream: StreamHandle,
        inputs: &[BuildInput],
    ) -> Result<AccelBuild, DeviceError>;

    /// Release memory returned by `upload` or `build`
    fn free(&self, context: DeviceContext, ptr: DevicePtr);
}
