//! Scene description consumed by the proxy layer

pub mod config;
pub mod description;
pub mod shape;

pub use config::{Options, ProxyGranularity};
pub use description::{ObjectDefinition, ObjectInstanceDefinition, SceneDescription, ShapeList};
pub use shape::{
    GeometryPrimitive, LoadedMeshData, MaterialFlags, MeshInfo, MeshLoader, PlasticMaterial,
    ShapeDefinition, ShapeGeometry, SphereData, TriangleMeshData,
};
