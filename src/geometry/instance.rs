//! Renderable geometry handed to the rendering layer

use bytemuck::{Pod, Zeroable};

use crate::core::types::Vec3;
use crate::math::IDENTITY_3X4;
use crate::scene::shape::{GeometryPrimitive, MaterialFlags, PlasticMaterial};

use super::device::{DevicePtr, TraversableHandle};

/// Hit-group records in the shader binding table.
///
/// Proxy materials shade geometry whose textures are not resident yet;
/// resolved materials are selected once the material layer has them.
/// Record 0 is the demand-loading proxy hit group, owned by the paging layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum HitGroupIndex {
    ProxyMaterialTriangle = 1,
    ProxyMaterialSphere = 2,
    ResolvedMaterialTriangle = 3,
    ResolvedMaterialSphere = 4,
}

impl HitGroupIndex {
    /// Hit group for a materialized primitive
    pub fn for_primitive(primitive: GeometryPrimitive, resolved: bool) -> Self {
        match (primitive, resolved) {
            (GeometryPrimitive::Triangle, false) => HitGroupIndex::ProxyMaterialTriangle,
            (GeometryPrimitive::Sphere, false) => HitGroupIndex::ProxyMaterialSphere,
            (GeometryPrimitive::Triangle, true) => HitGroupIndex::ResolvedMaterialTriangle,
            (GeometryPrimitive::Sphere, true) => HitGroupIndex::ResolvedMaterialSphere,
        }
    }

    pub fn sbt_offset(self) -> u32 {
        self as u32
    }
}

/// Shading coefficients in the layout the hit programs read
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PhongMaterial {
    pub ka: Vec3,
    pub kd: Vec3,
    pub ks: Vec3,
    pub flags: MaterialFlags,
}

/// Material of a contiguous range of primitives
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MaterialGroup {
    pub material: PhongMaterial,
    pub diffuse_map: Option<String>,
    pub alpha_map: Option<String>,
    /// One past the last primitive index using this material
    pub primitive_index_end: u32,
}

impl MaterialGroup {
    /// Group for `material`, flagged with `flags`, ending at `primitive_index_end`
    pub fn from_plastic(material: &PlasticMaterial, flags: MaterialFlags, primitive_index_end: u32) -> Self {
        Self {
            material: PhongMaterial {
                ka: material.ka,
                kd: material.kd,
                ks: material.ks,
                flags,
            },
            diffuse_map: material.diffuse_map.clone(),
            alpha_map: material.alpha_map.clone(),
            primitive_index_end,
        }
    }
}

/// Instance record in device layout: 3x4 row-major transform, ids, mask
/// and the traversable it places.
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct InstanceRecord {
    pub transform: [f32; 12],
    pub instance_id: u32,
    pub sbt_offset: u32,
    pub visibility_mask: u32,
    pub flags: u32,
    pub traversable_handle: u64,
    pub pad: [u32; 2],
}

impl Default for InstanceRecord {
    fn default() -> Self {
        Self {
            transform: IDENTITY_3X4,
            ..<Self as Zeroable>::zeroed()
        }
    }
}

impl InstanceRecord {
    pub fn traversable(&self) -> TraversableHandle {
        TraversableHandle(self.traversable_handle)
    }
}

/// Materialized geometry for one terminal proxy
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GeometryInstance {
    /// Acceleration structure buffer, owned by the geometry cache
    pub accel_buffer: DevicePtr,
    pub primitive: GeometryPrimitive,
    pub instance: InstanceRecord,
    pub groups: Vec<MaterialGroup>,
    /// Three normals per triangle, indexed by primitive index, if the geometry has them
    pub dev_normals: Option<DevicePtr>,
    /// Three texture coordinates per triangle, indexed by primitive index, if the geometry has them
    pub dev_uvs: Option<DevicePtr>,
}

impl GeometryInstance {
    /// Material group containing `primitive_index`
    pub fn group_for_primitive(&self, primitive_index: u32) -> Option<&MaterialGroup> {
        self.groups.iter().find(|g| primitive_index < g.primitive_index_end)
    }
}
