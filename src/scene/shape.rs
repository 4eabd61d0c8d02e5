//! Shape definitions: one primitive with its transform, material and payload
//!
//! Shapes are produced by the external scene parser and are immutable from
//! then on. Everything the proxy layer needs to know about a shape (its
//! primitive kind, material flags, world bounds) is derived here so that
//! partitioning and materialization agree.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::core::types::{Mat4, Result, Vec2, Vec3};
use crate::math::Aabb;

/// Geometric type of a shape as seen by the acceleration-structure builder
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryPrimitive {
    #[default]
    Triangle,
    Sphere,
}

bitflags! {
    /// Which optional texture maps a material uses
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct MaterialFlags: u32 {
        const ALPHA_MAP = 1 << 0;
        const DIFFUSE_MAP = 1 << 1;
    }
}

/// Plastic material: ambient, diffuse and specular coefficients plus optional maps
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlasticMaterial {
    pub ka: Vec3,
    pub kd: Vec3,
    pub ks: Vec3,
    /// Alpha (cutout) texture file
    pub alpha_map: Option<String>,
    /// Diffuse texture file
    pub diffuse_map: Option<String>,
}

impl PlasticMaterial {
    pub fn new(ka: Vec3, kd: Vec3, ks: Vec3) -> Self {
        Self { ka, kd, ks, ..Default::default() }
    }

    pub fn with_alpha_map(mut self, file_name: impl Into<String>) -> Self {
        self.alpha_map = Some(file_name.into());
        self
    }

    pub fn with_diffuse_map(mut self, file_name: impl Into<String>) -> Self {
        self.diffuse_map = Some(file_name.into());
        self
    }

    /// Flags derived from which maps are present
    pub fn flags(&self) -> MaterialFlags {
        let mut flags = MaterialFlags::empty();
        if self.alpha_map.as_deref().is_some_and(|f| !f.is_empty()) {
            flags |= MaterialFlags::ALPHA_MAP;
        }
        if self.diffuse_map.as_deref().is_some_and(|f| !f.is_empty()) {
            flags |= MaterialFlags::DIFFUSE_MAP;
        }
        flags
    }
}

/// Inline triangle mesh. Normals and uvs are per-vertex and may be empty.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TriangleMeshData {
    pub indices: Vec<u32>,
    pub points: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub uvs: Vec<Vec2>,
}

impl TriangleMeshData {
    pub fn new(indices: Vec<u32>, points: Vec<Vec3>) -> Self {
        Self { indices, points, ..Default::default() }
    }

    pub fn num_triangles(&self) -> u32 {
        (self.indices.len() / 3) as u32
    }
}

/// Sphere centered at the shape origin.
///
/// The z-range and sweep angle describe partial spheres; the builder only
/// consumes the radius.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SphereData {
    pub radius: f32,
    pub z_min: f32,
    pub z_max: f32,
    /// Sweep angle in degrees
    pub phi_max: f32,
}

impl SphereData {
    /// Full sphere of the given radius
    pub fn full(radius: f32) -> Self {
        Self { radius, z_min: -radius, z_max: radius, phi_max: 360.0 }
    }
}

/// Mesh metadata available without loading vertex data
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MeshInfo {
    pub num_vertices: u32,
    pub num_triangles: u32,
    pub has_normals: bool,
    pub has_uvs: bool,
}

impl MeshInfo {
    /// Metadata describing an already loaded mesh
    pub fn of(mesh: &TriangleMeshData) -> Self {
        Self {
            num_vertices: mesh.points.len() as u32,
            num_triangles: mesh.num_triangles(),
            has_normals: !mesh.normals.is_empty(),
            has_uvs: !mesh.uvs.is_empty(),
        }
    }
}

/// Source of an externally stored mesh (e.g. a PLY file)
pub trait MeshLoader: Send + Sync {
    /// Counts and attribute presence; cheap to call repeatedly
    fn mesh_info(&self) -> MeshInfo;

    /// Load the full mesh
    fn load(&self) -> Result<TriangleMeshData>;
}

/// Reference to a mesh loaded on demand through a [`MeshLoader`]
#[derive(Clone)]
pub struct LoadedMeshData {
    pub file_name: String,
    pub loader: Arc<dyn MeshLoader>,
}

impl fmt::Debug for LoadedMeshData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedMeshData")
            .field("file_name", &self.file_name)
            .finish_non_exhaustive()
    }
}

/// Primitive-specific payload of a shape
#[derive(Clone, Debug)]
pub enum ShapeGeometry {
    TriangleMesh(TriangleMeshData),
    LoadedMesh(LoadedMeshData),
    Sphere(SphereData),
}

/// One primitive placed in its parent's space
#[derive(Clone, Debug)]
pub struct ShapeDefinition {
    /// Shape-to-parent transform
    pub transform: Mat4,
    pub material: PlasticMaterial,
    /// Bounds in shape-local space
    pub bounds: Aabb,
    pub geometry: ShapeGeometry,
}

impl ShapeDefinition {
    /// Triangle mesh with bounds computed from its points
    pub fn triangle_mesh(transform: Mat4, material: PlasticMaterial, mesh: TriangleMeshData) -> Self {
        let bounds = Aabb::from_points(mesh.points.iter().copied());
        Self { transform, material, bounds, geometry: ShapeGeometry::TriangleMesh(mesh) }
    }

    /// Full sphere with bounds of its radius
    pub fn sphere(transform: Mat4, material: PlasticMaterial, sphere: SphereData) -> Self {
        let r = Vec3::splat(sphere.radius);
        Self {
            transform,
            material,
            bounds: Aabb::new(-r, r),
            geometry: ShapeGeometry::Sphere(sphere),
        }
    }

    /// Externally stored mesh; bounds come from the scene file
    pub fn loaded_mesh(
        transform: Mat4,
        material: PlasticMaterial,
        bounds: Aabb,
        file_name: impl Into<String>,
        loader: Arc<dyn MeshLoader>,
    ) -> Self {
        Self {
            transform,
            material,
            bounds,
            geometry: ShapeGeometry::LoadedMesh(LoadedMeshData { file_name: file_name.into(), loader }),
        }
    }

    /// Externally loaded meshes build as triangles
    pub fn primitive(&self) -> GeometryPrimitive {
        match self.geometry {
            ShapeGeometry::TriangleMesh(_) | ShapeGeometry::LoadedMesh(_) => GeometryPrimitive::Triangle,
            ShapeGeometry::Sphere(_) => GeometryPrimitive::Sphere,
        }
    }

    pub fn material_flags(&self) -> MaterialFlags {
        self.material.flags()
    }

    /// Local bounds carried into the parent's space by the shape transform
    pub fn transformed_bounds(&self) -> Aabb {
        self.bounds.transformed(&self.transform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedMesh(MeshInfo);

    impl MeshLoader for FixedMesh {
        fn mesh_info(&self) -> MeshInfo {
            self.0
        }

        fn load(&self) -> Result<TriangleMeshData> {
            Ok(TriangleMeshData::default())
        }
    }

    fn triangle() -> TriangleMeshData {
        TriangleMeshData::new(vec![0, 1, 2], vec![Vec3::ZERO, Vec3::X, Vec3::ONE])
    }

    #[test]
    fn test_material_flags() {
        let m = PlasticMaterial::default();
        assert_eq!(m.flags(), MaterialFlags::empty());
        assert_eq!(m.clone().with_alpha_map("a.png").flags(), MaterialFlags::ALPHA_MAP);
        assert_eq!(m.clone().with_diffuse_map("d.png").flags(), MaterialFlags::DIFFUSE_MAP);
        assert_eq!(
            m.with_alpha_map("a.png").with_diffuse_map("d.png").flags(),
            MaterialFlags::ALPHA_MAP | MaterialFlags::DIFFUSE_MAP
        );
    }

    #[test]
    fn test_empty_map_name_is_absent() {
        let m = PlasticMaterial::default().with_alpha_map("");
        assert_eq!(m.flags(), MaterialFlags::empty());
    }

    #[test]
    fn test_triangle_mesh_bounds_and_counts() {
        let shape = ShapeDefinition::triangle_mesh(
            Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)),
            PlasticMaterial::default(),
            triangle(),
        );
        assert_eq!(shape.bounds, Aabb::new(Vec3::ZERO, Vec3::ONE));
        assert_eq!(
            shape.transformed_bounds(),
            Aabb::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(2.0, 3.0, 4.0))
        );
        assert_eq!(shape.primitive(), GeometryPrimitive::Triangle);
        assert_eq!(shape.material_flags(), MaterialFlags::empty());
    }

    #[test]
    fn test_sphere_shape() {
        let shape = ShapeDefinition::sphere(Mat4::IDENTITY, PlasticMaterial::default(), SphereData::full(1.25));
        assert_eq!(shape.primitive(), GeometryPrimitive::Sphere);
        assert_eq!(shape.bounds, Aabb::new(Vec3::splat(-1.25), Vec3::splat(1.25)));
    }

    #[test]
    fn test_mesh_info_of_loaded_data() {
        let mut mesh = triangle();
        mesh.uvs = vec![Vec2::ZERO; 3];
        assert_eq!(
            MeshInfo::of(&mesh),
            MeshInfo { num_vertices: 3, num_triangles: 1, has_normals: false, has_uvs: true }
        );
    }

    #[test]
    fn test_loaded_mesh_is_triangle_primitive() {
        let info = MeshInfo { num_vertices: 8, num_triangles: 12, has_normals: true, has_uvs: false };
        let shape = ShapeDefinition::loaded_mesh(
            Mat4::IDENTITY,
            PlasticMaterial::default(),
            Aabb::new(Vec3::ZERO, Vec3::ONE),
            "cube-mesh.ply",
            Arc::new(FixedMesh(info)),
        );
        assert_eq!(shape.primitive(), GeometryPrimitive::Triangle);
        assert_eq!(shape.transformed_bounds(), Aabb::new(Vec3::ZERO, Vec3::ONE));
    }
}
