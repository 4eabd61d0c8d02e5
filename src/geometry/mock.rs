//! In-process device for tests and tools
//!
//! Hands out increasing fake device addresses and traversable handles and
//! records every call, so cache behavior can be checked without a GPU.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::device::{
    AccelBuild, AccelDevice, BuildInput, DeviceContext, DeviceError, DevicePtr, StreamHandle,
    TraversableHandle,
};

/// Base of the fake address range; keeps every pointer non-null
const ADDRESS_BASE: u64 = 0x1000_0000;
/// Allocation alignment, matching the usual device requirement for BVH buffers
const ALIGNMENT: u64 = 128;
/// Fixed overhead charged per acceleration structure
const ACCEL_HEADER_BYTES: usize = 256;
/// Bytes charged per primitive in a built acceleration structure
const ACCEL_BYTES_PER_PRIMITIVE: usize = 64;

/// Failure to inject into the next matching call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MockFailure {
    None,
    OutOfMemory,
    BuildFailure,
}

/// Recording fake of [`AccelDevice`]
pub struct MockDevice {
    next_address: AtomicU64,
    next_traversable: AtomicU64,
    num_uploads: AtomicUsize,
    num_builds: AtomicUsize,
    num_frees: AtomicUsize,
    bytes_uploaded: AtomicUsize,
    failure: Mutex<MockFailure>,
    builds: Mutex<Vec<Vec<BuildInput>>>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            next_address: AtomicU64::new(ADDRESS_BASE),
            next_traversable: AtomicU64::new(1),
            num_uploads: AtomicUsize::new(0),
            num_builds: AtomicUsize::new(0),
            num_frees: AtomicUsize::new(0),
            bytes_uploaded: AtomicUsize::new(0),
            failure: Mutex::new(MockFailure::None),
            builds: Mutex::new(Vec::new()),
        }
    }

    /// Make subsequent calls fail until reset with [`MockFailure::None`]
    pub fn set_failure(&self, failure: MockFailure) {
        if let Ok(mut f) = self.failure.lock() {
            *f = failure;
        }
    }

    pub fn num_uploads(&self) -> usize {
        self.num_uploads.load(Ordering::SeqCst)
    }

    pub fn num_builds(&self) -> usize {
        self.num_builds.load(Ordering::SeqCst)
    }

    pub fn num_frees(&self) -> usize {
        self.num_frees.load(Ordering::SeqCst)
    }

    pub fn bytes_uploaded(&self) -> usize {
        self.bytes_uploaded.load(Ordering::SeqCst)
    }

    /// Inputs of every build so far, in call order
    pub fn builds(&self) -> Vec<Vec<BuildInput>> {
        self.builds.lock().map(|b| b.clone()).unwrap_or_default()
    }

    fn failure(&self) -> MockFailure {
        self.failure.lock().map(|f| *f).unwrap_or(MockFailure::None)
    }

    fn allocate(&self, size: usize) -> DevicePtr {
        let aligned = (size as u64).div_ceil(ALIGNMENT).max(1) * ALIGNMENT;
        DevicePtr(self.next_address.fetch_add(aligned, Ordering::SeqCst))
    }
}

impl AccelDevice for MockDevice {
    fn upload(&self, _context: DeviceContext, _stream: StreamHandle, bytes: &[u8]) -> Result<DevicePtr, DeviceError> {
        if self.failure() == MockFailure::OutOfMemory {
            return Err(DeviceError::OutOfMemory { requested: bytes.len() });
        }
        self.num_uploads.fetch_add(1, Ordering::SeqCst);
        self.bytes_uploaded.fetch_add(bytes.len(), Ordering::SeqCst);
        Ok(self.allocate(bytes.len()))
    }

    fn build(
        &self,
        _context: DeviceContext,
        _stream: StreamHandle,
        inputs: &[BuildInput],
    ) -> Result<AccelBuild, DeviceError> {
        let primitives: usize = inputs.iter().map(|i| i.num_primitives() as usize).sum();
        let size_bytes = ACCEL_HEADER_BYTES + primitives * ACCEL_BYTES_PER_PRIMITIVE;
        match self.failure() {
            MockFailure::OutOfMemory => return Err(DeviceError::OutOfMemory { requested: size_bytes }),
            MockFailure::BuildFailure => return Err(DeviceError::BuildFailed("injected failure".into())),
            MockFailure::None => {}
        }
        self.num_builds.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut builds) = self.builds.lock() {
            builds.push(inputs.to_vec());
        }
        Ok(AccelBuild {
            buffer: self.allocate(size_bytes),
            traversable: TraversableHandle(self.next_traversable.fetch_add(1, Ordering::SeqCst)),
            size_bytes,
        })
    }

    fn free(&self, _context: DeviceContext, ptr: DevicePtr) {
        log::trace!("MockDevice: free {:#x}", ptr.0);
        self.num_frees.fetch_add(1, Ordering::SeqCst);
    }
}
