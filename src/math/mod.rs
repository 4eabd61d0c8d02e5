//! Bounding volumes and transform helpers

pub mod aabb;
pub mod transform;

pub use aabb::Aabb;
pub use transform::{to_row_major_3x4, IDENTITY_3X4};
