//! Geometry cache: at most one acceleration-structure build per distinct key
//!
//! Keys are content identities. A shape is keyed by the exact bytes of its
//! geometry payload, so two bit-identical shapes placed with different
//! transforms or materials share one build. An object partition is keyed by
//! the object name plus the geometry and transform of each member shape,
//! its primitive kind and material flags.
//!
//! The key table is guarded by one mutex that is held only long enough to
//! find or insert the key's slot. Each slot has its own mutex held for the
//! duration of the build, so concurrent requests for one key wait for the
//! single build while distinct keys build side by side.
//!
//! The cache owns every device buffer it allocates for the process lifetime.
//! Entries hand out plain handles.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::core::error::Error;
use crate::core::types::{Mat4, Result, Vec2, Vec3};
use crate::scene::description::ObjectDefinition;
use crate::scene::shape::{
    GeometryPrimitive, MaterialFlags, MeshInfo, ShapeDefinition, ShapeGeometry, TriangleMeshData,
};

use super::device::{AccelDevice, BuildInput, DeviceContext, DevicePtr, StreamHandle, TraversableHandle};

/// Cached result of building one shape or object partition
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GeometryCacheEntry {
    /// Buffer holding the acceleration structure
    pub accel_buffer: DevicePtr,
    pub traversable: TraversableHandle,
    /// Per-triangle normals (three per triangle), indexed by primitive index
    pub dev_normals: Option<DevicePtr>,
    /// Per-triangle texture coordinates (three per triangle), indexed by primitive index
    pub dev_uvs: Option<DevicePtr>,
    pub primitive: GeometryPrimitive,
    /// End (exclusive) primitive index of each constituent shape, in order
    pub primitive_group_end_indices: Vec<u32>,
}

/// Point-in-time cache counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GeometryCacheStatistics {
    /// Distinct keys with a built entry
    pub num_entries: usize,
    pub num_triangle_builds: usize,
    pub num_sphere_builds: usize,
    pub num_normal_buffers: usize,
    pub num_uv_buffers: usize,
    /// Requests answered from an existing entry
    pub num_hits: usize,
    /// Device memory held by the cache
    pub device_memory_bytes: usize,
}

/// Build-or-fetch access to acceleration structures
pub trait GeometryCache: Send + Sync {
    /// Entry for a single shape, built in shape-local space
    fn get_shape(
        &self,
        context: DeviceContext,
        stream: StreamHandle,
        shape: &ShapeDefinition,
    ) -> Result<GeometryCacheEntry>;

    /// Entry for the shapes of one object partition, built in object space.
    ///
    /// Every shape must have `primitive` and `flags`; the entry records one
    /// primitive group per shape, in order.
    fn get_object(
        &self,
        context: DeviceContext,
        stream: StreamHandle,
        object: &ObjectDefinition,
        shapes: &[&ShapeDefinition],
        primitive: GeometryPrimitive,
        flags: MaterialFlags,
    ) -> Result<GeometryCacheEntry>;

    fn statistics(&self) -> GeometryCacheStatistics;
}

/// Exact identity of a shape's geometry payload
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShapeKey {
    primitive: GeometryPrimitive,
    geometry: Vec<u8>,
}

impl ShapeKey {
    pub fn new(shape: &ShapeDefinition) -> Self {
        let mut geometry = Vec::new();
        match &shape.geometry {
            ShapeGeometry::TriangleMesh(mesh) => {
                geometry.push(0u8);
                push_section(&mut geometry, bytemuck::cast_slice(&mesh.indices));
                push_section(&mut geometry, bytemuck::cast_slice(&mesh.points));
                push_section(&mut geometry, bytemuck::cast_slice(&mesh.normals));
                push_section(&mut geometry, bytemuck::cast_slice(&mesh.uvs));
            }
            ShapeGeometry::LoadedMesh(mesh) => {
                geometry.push(1u8);
                push_section(&mut geometry, mesh.file_name.as_bytes());
            }
            ShapeGeometry::Sphere(sphere) => {
                geometry.push(2u8);
                let params = [sphere.radius, sphere.z_min, sphere.z_max, sphere.phi_max];
                push_section(&mut geometry, bytemuck::bytes_of(&params));
            }
        }
        Self { primitive: shape.primitive(), geometry }
    }
}

/// Length-prefixed so adjacent sections cannot alias
fn push_section(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    out.extend_from_slice(bytes);
}

/// Identity of an object partition
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    object: String,
    /// Member geometry with the shape-to-object transform bits
    members: Vec<(ShapeKey, [u32; 16])>,
    primitive: GeometryPrimitive,
    flags: MaterialFlags,
}

impl ObjectKey {
    pub fn new(
        object: &ObjectDefinition,
        shapes: &[&ShapeDefinition],
        primitive: GeometryPrimitive,
        flags: MaterialFlags,
    ) -> Self {
        let members = shapes
            .iter()
            .map(|s| {
                let bits: [u32; 16] = bytemuck::cast(s.transform.to_cols_array());
                (ShapeKey::new(s), bits)
            })
            .collect();
        Self { object: object.name.clone(), members, primitive, flags }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum CacheKey {
    Shape(ShapeKey),
    Object(ObjectKey),
}

impl CacheKey {
    fn kind(&self) -> &'static str {
        match self {
            CacheKey::Shape(_) => "shape",
            CacheKey::Object(_) => "object",
        }
    }
}

/// Empty until the single build for the key succeeds
type Slot = Arc<Mutex<Option<GeometryCacheEntry>>>;

/// Device buffer owned by the cache
#[derive(Clone, Copy, Debug)]
struct Allocation {
    ptr: DevicePtr,
    size: usize,
}

/// Uploads made during one build; freed on drop unless committed
struct Staging<'a, D: AccelDevice> {
    device: &'a D,
    context: DeviceContext,
    stream: StreamHandle,
    allocations: Vec<Allocation>,
}

impl<'a, D: AccelDevice> Staging<'a, D> {
    fn new(device: &'a D, context: DeviceContext, stream: StreamHandle) -> Self {
        Self { device, context, stream, allocations: Vec::new() }
    }

    fn upload(&mut self, bytes: &[u8]) -> Result<DevicePtr> {
        let ptr = self.device.upload(self.context, self.stream, bytes)?;
        self.allocations.push(Allocation { ptr, size: bytes.len() });
        Ok(ptr)
    }

    fn build(&mut self, inputs: &[BuildInput]) -> Result<(DevicePtr, TraversableHandle)> {
        let build = self.device.build(self.context, self.stream, inputs)?;
        self.allocations.push(Allocation { ptr: build.buffer, size: build.size_bytes });
        Ok((build.buffer, build.traversable))
    }

    fn commit(mut self) -> Vec<Allocation> {
        std::mem::take(&mut self.allocations)
    }
}

impl<D: AccelDevice> Drop for Staging<'_, D> {
    fn drop(&mut self) {
        for allocation in self.allocations.drain(..) {
            self.device.free(self.context, allocation.ptr);
        }
    }
}

/// Triangle data of one shape ready for upload
struct TriangleParts<'a> {
    mesh: Cow<'a, TriangleMeshData>,
    /// Shape-to-object transform baked into the vertices, if any
    transform: Option<Mat4>,
}

impl TriangleParts<'_> {
    fn points(&self) -> Cow<'_, [Vec3]> {
        match self.transform {
            None => Cow::Borrowed(&self.mesh.points),
            Some(m) => Cow::Owned(self.mesh.points.iter().map(|p| m.transform_point3(*p)).collect()),
        }
    }

    /// Three normals per triangle, zeros when the mesh has none
    fn triangle_normals(&self) -> Vec<Vec3> {
        if self.mesh.normals.is_empty() {
            return vec![Vec3::ZERO; self.mesh.indices.len()];
        }
        let normal_matrix = self
            .transform
            .map(|m| glam::Mat3::from_mat4(m).inverse().transpose());
        self.mesh
            .indices
            .iter()
            .map(|&i| {
                let n = self.mesh.normals[i as usize];
                match normal_matrix {
                    Some(nm) => (nm * n).normalize_or_zero(),
                    None => n,
                }
            })
            .collect()
    }

    /// Three texture coordinates per triangle, zeros when the mesh has none
    fn triangle_uvs(&self) -> Vec<Vec2> {
        if self.mesh.uvs.is_empty() {
            return vec![Vec2::ZERO; self.mesh.indices.len()];
        }
        self.mesh.indices.iter().map(|&i| self.mesh.uvs[i as usize]).collect()
    }
}

/// Load (if external) and check a triangle shape's mesh
fn triangle_mesh(shape: &ShapeDefinition) -> Result<Cow<'_, TriangleMeshData>> {
    let mesh = match &shape.geometry {
        ShapeGeometry::TriangleMesh(mesh) => Cow::Borrowed(mesh),
        ShapeGeometry::LoadedMesh(loaded) => {
            let mesh = loaded.loader.load().map_err(|e| {
                Error::Mesh(format!("failed to load '{}': {}", loaded.file_name, e))
            })?;
            let declared = loaded.loader.mesh_info();
            let actual = MeshInfo::of(&mesh);
            if declared != actual {
                return Err(Error::Mesh(format!(
                    "'{}' declared {:?} but loaded {:?}",
                    loaded.file_name, declared, actual
                )));
            }
            Cow::Owned(mesh)
        }
        ShapeGeometry::Sphere(_) => {
            return Err(Error::InconsistentScene("sphere shape where triangles expected".into()));
        }
    };
    if mesh.indices.len() % 3 != 0 {
        return Err(Error::InconsistentScene(format!(
            "triangle mesh index count {} is not a multiple of 3",
            mesh.indices.len()
        )));
    }
    let num_points = mesh.points.len();
    if let Some(&bad) = mesh.indices.iter().find(|&&i| i as usize >= num_points) {
        return Err(Error::InconsistentScene(format!(
            "triangle mesh index {} out of range ({} points)",
            bad, num_points
        )));
    }
    for (name, len) in [("normals", mesh.normals.len()), ("uvs", mesh.uvs.len())] {
        if len != 0 && len != num_points {
            return Err(Error::InconsistentScene(format!(
                "triangle mesh has {} {} for {} points",
                len, name, num_points
            )));
        }
    }
    Ok(mesh)
}

/// Geometry cache backed by an [`AccelDevice`]
pub struct DeviceGeometryCache<D: AccelDevice> {
    device: Arc<D>,
    slots: Mutex<HashMap<CacheKey, Slot>>,
    allocations: Mutex<Vec<Allocation>>,
    num_entries: AtomicUsize,
    num_triangle_builds: AtomicUsize,
    num_sphere_builds: AtomicUsize,
    num_normal_buffers: AtomicUsize,
    num_uv_buffers: AtomicUsize,
    num_hits: AtomicUsize,
}

impl<D: AccelDevice> DeviceGeometryCache<D> {
    pub fn new(device: Arc<D>) -> Self {
        Self {
            device,
            slots: Mutex::new(HashMap::new()),
            allocations: Mutex::new(Vec::new()),
            num_entries: AtomicUsize::new(0),
            num_triangle_builds: AtomicUsize::new(0),
            num_sphere_builds: AtomicUsize::new(0),
            num_normal_buffers: AtomicUsize::new(0),
            num_uv_buffers: AtomicUsize::new(0),
            num_hits: AtomicUsize::new(0),
        }
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// Return the key's entry, running `build` only if no entry exists yet.
    ///
    /// A failed build leaves the slot empty; the next request for the key
    /// builds again. An empty slot nobody is waiting on is dropped from the
    /// table so keys that keep failing do not accumulate.
    fn get_or_build(
        &self,
        key: CacheKey,
        build: impl FnOnce(&mut Staging<'_, D>) -> Result<GeometryCacheEntry>,
        context: DeviceContext,
        stream: StreamHandle,
    ) -> Result<GeometryCacheEntry> {
        let kind = key.kind();
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            match slots.get(&key) {
                Some(slot) => Arc::clone(slot),
                None => {
                    let slot = Slot::default();
                    slots.insert(key.clone(), Arc::clone(&slot));
                    slot
                }
            }
        };

        let mut entry = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = entry.as_ref() {
            self.num_hits.fetch_add(1, Ordering::Relaxed);
            log::trace!("Geometry cache hit ({}): traversable {:#x}", kind, existing.traversable.0);
            return Ok(existing.clone());
        }

        let mut staging = Staging::new(self.device.as_ref(), context, stream);
        let built = match build(&mut staging) {
            Ok(built) => built,
            Err(e) => {
                log::warn!("Geometry cache {} build failed: {}", kind, e);
                let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
                // Held by the table and this request only: no waiter will retry it
                if Arc::strong_count(&slot) == 2 {
                    slots.remove(&key);
                }
                return Err(e);
            }
        };
        let owned = staging.commit();
        let bytes: usize = owned.iter().map(|a| a.size).sum();
        self.allocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(owned);

        match built.primitive {
            GeometryPrimitive::Triangle => self.num_triangle_builds.fetch_add(1, Ordering::Relaxed),
            GeometryPrimitive::Sphere => self.num_sphere_builds.fetch_add(1, Ordering::Relaxed),
        };
        if built.dev_normals.is_some() {
            self.num_normal_buffers.fetch_add(1, Ordering::Relaxed);
        }
        if built.dev_uvs.is_some() {
            self.num_uv_buffers.fetch_add(1, Ordering::Relaxed);
        }
        self.num_entries.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "Built {} {:?} acceleration structure: {} groups, {} bytes",
            kind,
            built.primitive,
            built.primitive_group_end_indices.len(),
            bytes
        );

        *entry = Some(built.clone());
        Ok(built)
    }
}

/// Upload triangle shapes and build one acceleration structure over them
fn build_triangles<D: AccelDevice>(
    staging: &mut Staging<'_, D>,
    parts: &[TriangleParts<'_>],
) -> Result<GeometryCacheEntry> {
    let mut inputs = Vec::with_capacity(parts.len());
    let mut group_ends = Vec::with_capacity(parts.len());
    let mut end = 0u32;
    for part in parts {
        let points = part.points();
        let vertices = staging.upload(bytemuck::cast_slice(&points))?;
        let indices = staging.upload(bytemuck::cast_slice(&part.mesh.indices))?;
        let num_triangles = part.mesh.num_triangles();
        inputs.push(BuildInput::Triangles {
            vertices,
            num_vertices: points.len() as u32,
            indices,
            num_triangles,
        });
        end += num_triangles;
        group_ends.push(end);
    }
    let (accel_buffer, traversable) = staging.build(&inputs)?;

    let dev_normals = if parts.iter().any(|p| !p.mesh.normals.is_empty()) {
        let normals: Vec<Vec3> = parts.iter().flat_map(|p| p.triangle_normals()).collect();
        Some(staging.upload(bytemuck::cast_slice(&normals))?)
    } else {
        None
    };
    let dev_uvs = if parts.iter().any(|p| !p.mesh.uvs.is_empty()) {
        let uvs: Vec<Vec2> = parts.iter().flat_map(|p| p.triangle_uvs()).collect();
        Some(staging.upload(bytemuck::cast_slice(&uvs))?)
    } else {
        None
    };

    Ok(GeometryCacheEntry {
        accel_buffer,
        traversable,
        dev_normals,
        dev_uvs,
        primitive: GeometryPrimitive::Triangle,
        primitive_group_end_indices: group_ends,
    })
}

/// Upload sphere centers and radii and build one acceleration structure
fn build_spheres<D: AccelDevice>(
    staging: &mut Staging<'_, D>,
    centers: &[Vec3],
    radii: &[f32],
) -> Result<GeometryCacheEntry> {
    let dev_centers = staging.upload(bytemuck::cast_slice(centers))?;
    let dev_radii = staging.upload(bytemuck::cast_slice(radii))?;
    let count = centers.len() as u32;
    let (accel_buffer, traversable) = staging.build(&[BuildInput::Spheres {
        centers: dev_centers,
        radii: dev_radii,
        count,
    }])?;
    Ok(GeometryCacheEntry {
        accel_buffer,
        traversable,
        dev_normals: None,
        dev_uvs: None,
        primitive: GeometryPrimitive::Sphere,
        primitive_group_end_indices: (1..=count).collect(),
    })
}

impl<D: AccelDevice> GeometryCache for DeviceGeometryCache<D> {
    fn get_shape(
        &self,
        context: DeviceContext,
        stream: StreamHandle,
        shape: &ShapeDefinition,
    ) -> Result<GeometryCacheEntry> {
        let key = CacheKey::Shape(ShapeKey::new(shape));
        self.get_or_build(
            key,
            |staging| match &shape.geometry {
                ShapeGeometry::Sphere(sphere) => build_spheres(staging, &[Vec3::ZERO], &[sphere.radius]),
                ShapeGeometry::TriangleMesh(_) | ShapeGeometry::LoadedMesh(_) => {
                    let part = TriangleParts { mesh: triangle_mesh(shape)?, transform: None };
                    build_triangles(staging, std::slice::from_ref(&part))
                }
            },
            context,
            stream,
        )
    }

    fn get_object(
        &self,
        context: DeviceContext,
        stream: StreamHandle,
        object: &ObjectDefinition,
        shapes: &[&ShapeDefinition],
        primitive: GeometryPrimitive,
        flags: MaterialFlags,
    ) -> Result<GeometryCacheEntry> {
        if shapes.is_empty() {
            return Err(Error::InconsistentScene(format!(
                "object '{}' partition {:?}/{:?} has no shapes",
                object.name, primitive, flags
            )));
        }
        if let Some(index) = shapes
            .iter()
            .position(|s| s.primitive() != primitive || s.material_flags() != flags)
        {
            return Err(Error::InconsistentScene(format!(
                "object '{}' shape {} does not belong to partition {:?}/{:?}",
                object.name, index, primitive, flags
            )));
        }

        let key = CacheKey::Object(ObjectKey::new(object, shapes, primitive, flags));
        self.get_or_build(
            key,
            |staging| match primitive {
                GeometryPrimitive::Triangle => {
                    let parts = shapes
                        .iter()
                        .map(|&s| {
                            Ok(TriangleParts {
                                mesh: triangle_mesh(s)?,
                                transform: Some(s.transform),
                            })
                        })
                        .collect::<Result<Vec<_>>>()?;
                    build_triangles(staging, &parts)
                }
                GeometryPrimitive::Sphere => {
                    let mut centers = Vec::with_capacity(shapes.len());
                    let mut radii = Vec::with_capacity(shapes.len());
                    for &shape in shapes {
                        if let ShapeGeometry::Sphere(sphere) = &shape.geometry {
                            centers.push(shape.transform.transform_point3(Vec3::ZERO));
                            let scale = shape.transform.transform_vector3(Vec3::X).length();
                            radii.push(sphere.radius * scale);
                        }
                    }
                    build_spheres(staging, &centers, &radii)
                }
            },
            context,
            stream,
        )
    }

    fn statistics(&self) -> GeometryCacheStatistics {
        let device_memory_bytes = self
            .allocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|a| a.size)
            .sum();
        GeometryCacheStatistics {
            num_entries: self.num_entries.load(Ordering::Relaxed),
            num_triangle_builds: self.num_triangle_builds.load(Ordering::Relaxed),
            num_sphere_builds: self.num_sphere_builds.load(Ordering::Relaxed),
            num_normal_buffers: self.num_normal_buffers.load(Ordering::Relaxed),
            num_uv_buffers: self.num_uv_buffers.load(Ordering::Relaxed),
            num_hits: self.num_hits.load(Ordering::Relaxed),
            device_memory_bytes,
        }
    }
}
