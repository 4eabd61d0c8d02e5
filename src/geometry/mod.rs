//! Acceleration structures, the device seam and the geometry cache

pub mod cache;
pub mod device;
pub mod instance;
pub mod mock;

pub use cache::{DeviceGeometryCache, GeometryCache, GeometryCacheEntry, GeometryCacheStatistics, ObjectKey, ShapeKey};
pub use device::{AccelBuild, AccelDevice, BuildInput, DeviceContext, DeviceError, DevicePtr, StreamHandle, TraversableHandle};
pub use instance::{GeometryInstance, HitGroupIndex, InstanceRecord, MaterialGroup, PhongMaterial};
pub use mock::{MockDevice, MockFailure};
