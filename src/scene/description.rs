//! Scene description: free shapes, reusable objects and their instances
//!
//! Built once by the scene parser and read-only afterwards. The builder
//! methods keep the derived fields (object bounds, instance counts, scene
//! bounds) consistent so callers cannot assemble a description whose boxes
//! disagree with its contents.

use std::collections::HashMap;

use crate::core::error::Error;
use crate::core::types::{Mat4, Result};
use crate::math::Aabb;
use crate::scene::shape::ShapeDefinition;

/// Ordered list of shapes
pub type ShapeList = Vec<ShapeDefinition>;

/// A named, reusable group of shapes
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectDefinition {
    pub name: String,
    /// Union of the shapes' transformed bounds, in object space
    pub bounds: Aabb,
}

/// Placement of an object in the world
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectInstanceDefinition {
    /// Name of the instanced object
    pub name: String,
    /// Object-to-world transform
    pub transform: Mat4,
    /// World-space bounds: union of the shapes' bounds under `transform`
    pub bounds: Aabb,
}

impl ObjectInstanceDefinition {
    /// Place an object made of `shapes`.
    ///
    /// Each shape box is carried to world space on its own and the results
    /// are merged, so the instance bounds equal the union of the bounds its
    /// per-shape and per-partition children get, rotated or not.
    pub fn new(name: impl Into<String>, transform: Mat4, shapes: &[ShapeDefinition]) -> Self {
        let bounds = shapes
            .iter()
            .fold(Aabb::EMPTY, |acc, s| acc.union(&s.transformed_bounds().transformed(&transform)));
        Self { name: name.into(), transform, bounds }
    }

    /// World bounds of one of the instanced object's shapes
    pub fn shape_bounds(&self, shape: &ShapeDefinition) -> Aabb {
        shape.transformed_bounds().transformed(&self.transform)
    }
}

/// Root aggregate of a parsed scene
#[derive(Clone, Debug)]
pub struct SceneDescription {
    /// Shapes placed directly in the world
    pub free_shapes: ShapeList,
    pub objects: HashMap<String, ObjectDefinition>,
    pub object_shapes: HashMap<String, ShapeList>,
    pub object_instances: Vec<ObjectInstanceDefinition>,
    pub instance_counts: HashMap<String, u32>,
    /// Union of free-shape and instance world bounds
    pub bounds: Aabb,
}

impl Default for SceneDescription {
    fn default() -> Self {
        Self {
            free_shapes: Vec::new(),
            objects: HashMap::new(),
            object_shapes: HashMap::new(),
            object_instances: Vec::new(),
            instance_counts: HashMap::new(),
            bounds: Aabb::EMPTY,
        }
    }
}

impl SceneDescription {
    /// Create an empty scene
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a shape placed directly in the world
    pub fn add_free_shape(&mut self, shape: ShapeDefinition) {
        self.bounds = self.bounds.union(&shape.transformed_bounds());
        self.free_shapes.push(shape);
    }

    /// Define a reusable object; its bounds are the union of its shapes.
    ///
    /// Redefining an existing name with live instances is rejected since the
    /// instances' bounds were computed from the old definition.
    pub fn add_object(&mut self, name: impl Into<String>, shapes: ShapeList) -> Result<&ObjectDefinition> {
        let name = name.into();
        if shapes.is_empty() {
            return Err(Error::InconsistentScene(format!("object '{}' has no shapes", name)));
        }
        if self.instance_counts.get(&name).copied().unwrap_or(0) > 0 {
            return Err(Error::InconsistentScene(format!(
                "object '{}' redefined after being instanced",
                name
            )));
        }
        let bounds = shapes
            .iter()
            .fold(Aabb::EMPTY, |acc, s| acc.union(&s.transformed_bounds()));
        self.object_shapes.insert(name.clone(), shapes);
        let object = self
            .objects
            .entry(name.clone())
            .or_insert_with(|| ObjectDefinition { name: name.clone(), bounds });
        object.bounds = bounds;
        Ok(object)
    }

    /// Instance a previously defined object; returns the instance index
    pub fn add_instance(&mut self, name: &str, transform: Mat4) -> Result<usize> {
        let shapes = self
            .object_shapes
            .get(name)
            .filter(|_| self.objects.contains_key(name))
            .ok_or_else(|| Error::InconsistentScene(format!("instance of unknown object '{}'", name)))?;
        let instance = ObjectInstanceDefinition::new(name, transform, shapes);
        self.bounds = self.bounds.union(&instance.bounds);
        *self.instance_counts.entry(name.to_string()).or_insert(0) += 1;
        self.object_instances.push(instance);
        Ok(self.object_instances.len() - 1)
    }

    /// Number of leaves (free shapes plus instances) at the scene root
    pub fn num_root_children(&self) -> usize {
        self.free_shapes.len() + self.object_instances.len()
    }

    /// Look up an instance together with its object and shapes
    pub fn instance(&self, index: usize) -> Result<(&ObjectInstanceDefinition, &ObjectDefinition, &ShapeList)> {
        let instance = self.object_instances.get(index).ok_or_else(|| {
            Error::InconsistentScene(format!(
                "instance index {} out of range ({} instances)",
                index,
                self.object_instances.len()
            ))
        })?;
        let object = self.objects.get(&instance.name).ok_or_else(|| {
            Error::InconsistentScene(format!(
                "instance {} references unknown object '{}'",
                index, instance.name
            ))
        })?;
        let shapes = self.object_shapes.get(&instance.name).ok_or_else(|| {
            Error::InconsistentScene(format!("object '{}' has no shape list", instance.name))
        })?;
        if shapes.is_empty() {
            return Err(Error::InconsistentScene(format!("object '{}' has no shapes", instance.name)));
        }
        Ok((instance, object, shapes))
    }

    /// Union of all free-shape and instance world bounds
    pub fn compute_bounds(&self) -> Aabb {
        let shapes = self.free_shapes.iter().map(|s| s.transformed_bounds());
        let instances = self.object_instances.iter().map(|i| i.bounds);
        shapes.chain(instances).fold(Aabb::EMPTY, |acc, b| acc.union(&b))
    }

    /// Check every instance resolves and the stored bounds match the contents
    pub fn validate(&self) -> Result<()> {
        if self.num_root_children() == 0 {
            return Err(Error::InconsistentScene("scene has no shapes or instances".into()));
        }
        let mut actual_counts: HashMap<&str, u32> = HashMap::new();
        for index in 0..self.object_instances.len() {
            let (instance, _, shapes) = self.instance(index)?;
            let expected = ObjectInstanceDefinition::new(instance.name.as_str(), instance.transform, shapes);
            if expected.bounds != instance.bounds {
                return Err(Error::InconsistentScene(format!(
                    "instance {} bounds {:?} do not match its shapes {:?}",
                    index, instance.bounds, expected.bounds
                )));
            }
            *actual_counts.entry(instance.name.as_str()).or_insert(0) += 1;
        }
        let recorded = self.instance_counts.values().filter(|&&c| c > 0).count();
        if recorded != actual_counts.len() {
            return Err(Error::InconsistentScene(format!(
                "{} objects have recorded instances but {} are instanced",
                recorded,
                actual_counts.len()
            )));
        }
        for (name, actual) in &actual_counts {
            let count = self.instance_counts.get(*name).copied().unwrap_or(0);
            if count != *actual {
                return Err(Error::InconsistentScene(format!(
                    "object '{}' instance count {} but {} instances present",
                    name, count, actual
                )));
            }
        }
        let expected = self.compute_bounds();
        if expected != self.bounds {
            return Err(Error::InconsistentScene(format!(
                "scene bounds {:?} do not match contents {:?}",
                self.bounds, expected
            )));
        }
        Ok(())
    }
}
