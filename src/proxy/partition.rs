//! Grouping of an object's shapes by primitive kind and material flags
//!
//! Shared by the decomposability check and by decomposition so both always
//! agree on partition boundaries.

use crate::scene::shape::{GeometryPrimitive, MaterialFlags, ShapeDefinition};

/// (primitive kind, material flags) pair identifying a partition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    pub primitive: GeometryPrimitive,
    pub flags: MaterialFlags,
}

impl PartitionKey {
    pub fn new(primitive: GeometryPrimitive, flags: MaterialFlags) -> Self {
        Self { primitive, flags }
    }

    pub fn of(shape: &ShapeDefinition) -> Self {
        Self::new(shape.primitive(), shape.material_flags())
    }
}

/// Shapes of one partition, as indices into the object's shape list
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    pub key: PartitionKey,
    /// Ascending, so original shape order is preserved
    pub shape_indices: Vec<usize>,
}

impl Partition {
    /// Member shapes in object order
    pub fn shapes<'a>(&'a self, shapes: &'a [ShapeDefinition]) -> impl Iterator<Item = &'a ShapeDefinition> + 'a {
        self.shape_indices.iter().map(move |&i| &shapes[i])
    }
}

/// Distinct partitions in order of first appearance
pub fn partition_shapes(shapes: &[ShapeDefinition]) -> Vec<Partition> {
    let mut partitions: Vec<Partition> = Vec::new();
    for (index, shape) in shapes.iter().enumerate() {
        let key = PartitionKey::of(shape);
        match partitions.iter_mut().find(|p| p.key == key) {
            Some(partition) => partition.shape_indices.push(index),
            None => partitions.push(Partition { key, shape_indices: vec![index] }),
        }
    }
    partitions
}

/// Members of the partition with `key`, empty if no shape matches
pub fn partition_for(shapes: &[ShapeDefinition], key: PartitionKey) -> Partition {
    Partition {
        key,
        shape_indices: shapes
            .iter()
            .enumerate()
            .filter(|(_, s)| PartitionKey::of(s) == key)
            .map(|(i, _)| i)
            .collect(),
    }
}
