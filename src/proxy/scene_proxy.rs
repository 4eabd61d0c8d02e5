//! The decomposable unit handed to the demand-paging layer
//!
//! A proxy is created Pending and moves once to Decomposed or Materialized.
//! A failed materialization leaves it Pending so the page can be requested
//! again.

use std::sync::Arc;

use crate::core::error::Error;
use crate::core::types::{Mat4, Result};
use crate::geometry::cache::{GeometryCache, GeometryCacheEntry};
use crate::geometry::device::{DeviceContext, StreamHandle};
use crate::geometry::instance::{GeometryInstance, HitGroupIndex, InstanceRecord, MaterialGroup};
use crate::math::{Aabb, to_row_major_3x4};
use crate::scene::config::{Options, ProxyGranularity};
use crate::scene::description::SceneDescription;
use crate::scene::shape::ShapeDefinition;

use super::factory::{ProxyFactory, ProxyPlan};
use super::partition::{PartitionKey, partition_for, partition_shapes};

/// What part of the scene a proxy stands for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProxyKind {
    /// All free shapes and instances
    WholeScene,
    /// One free shape
    Shape { shape_index: usize },
    /// One object instance with all its shapes
    Instance { instance_index: usize },
    /// One shape of an object instance
    InstanceShape { instance_index: usize, shape_index: usize },
    /// The shapes of an instance in one primitive/material partition
    InstancePrimitive { instance_index: usize, key: PartitionKey },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProxyState {
    #[default]
    Pending,
    Decomposed,
    Materialized,
}

/// Terminal geometry resolved from a proxy kind
enum Target<'a> {
    Shape {
        instance_transform: Mat4,
        shape: &'a ShapeDefinition,
    },
    Partition {
        instance_index: usize,
        key: PartitionKey,
    },
}

pub struct SceneProxy {
    page_id: u32,
    kind: ProxyKind,
    bounds: Aabb,
    decomposable: bool,
    state: ProxyState,
    scene: Arc<SceneDescription>,
    options: Options,
    cache: Arc<dyn GeometryCache>,
}

impl std::fmt::Debug for SceneProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneProxy")
            .field("page_id", &self.page_id)
            .field("kind", &self.kind)
            .field("bounds", &self.bounds)
            .field("decomposable", &self.decomposable)
            .field("state", &self.state)
            .finish()
    }
}

impl SceneProxy {
    pub(crate) fn new(
        page_id: u32,
        plan: ProxyPlan,
        scene: Arc<SceneDescription>,
        options: Options,
        cache: Arc<dyn GeometryCache>,
    ) -> Self {
        Self {
            page_id,
            kind: plan.kind,
            bounds: plan.bounds,
            decomposable: plan.decomposable,
            state: ProxyState::Pending,
            scene,
            options,
            cache,
        }
    }

    /// Id assigned by the page table when this proxy was registered
    pub fn page_id(&self) -> u32 {
        self.page_id
    }

    /// World-space bounds of everything this proxy represents
    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    pub fn is_decomposable(&self) -> bool {
        self.decomposable
    }

    pub fn kind(&self) -> ProxyKind {
        self.kind
    }

    pub fn state(&self) -> ProxyState {
        self.state
    }

    /// Split into registered child proxies.
    ///
    /// A whole scene yields its free shapes in order, then its instances.
    /// An instance yields one child per shape under fine granularity, or one
    /// per partition in first-encounter order under coarse granularity.
    pub fn decompose(&mut self, factory: &ProxyFactory) -> Result<Vec<SceneProxy>> {
        self.check_pending("decompose")?;
        if !self.decomposable {
            return Err(Error::InvalidOperation(format!(
                "decompose called on terminal {:?} proxy (page {})",
                self.kind, self.page_id
            )));
        }
        let plans = match self.kind {
            ProxyKind::WholeScene => factory.plan_scene_children(&self.scene)?,
            ProxyKind::Instance { instance_index } => factory.plan_instance_children(&self.scene, instance_index)?,
            kind => {
                return Err(Error::InvalidOperation(format!("{:?} proxies cannot be decomposed", kind)));
            }
        };
        let children: Vec<SceneProxy> = plans.into_iter().map(|plan| factory.create(&self.scene, plan)).collect();
        self.state = ProxyState::Decomposed;
        log::debug!(
            "Decomposed {:?} proxy (page {}) into {} children",
            self.kind,
            self.page_id,
            children.len()
        );
        Ok(children)
    }

    /// Build or fetch the acceleration structure and wrap it for rendering
    pub fn create_geometry(&mut self, context: DeviceContext, stream: StreamHandle) -> Result<GeometryInstance> {
        self.check_pending("create_geometry")?;
        if self.decomposable {
            return Err(Error::InvalidOperation(format!(
                "create_geometry called on decomposable {:?} proxy (page {})",
                self.kind, self.page_id
            )));
        }
        let geometry = match self.target()? {
            Target::Shape { instance_transform, shape } => {
                let entry = self.cache.get_shape(context, stream, shape)?;
                let groups = entry
                    .primitive_group_end_indices
                    .iter()
                    .map(|&end| MaterialGroup::from_plastic(&shape.material, shape.material_flags(), end))
                    .collect();
                self.geometry_instance(entry, instance_transform * shape.transform, groups)
            }
            Target::Partition { instance_index, key } => {
                let (instance, object, shapes) = self.scene.instance(instance_index)?;
                let partition = partition_for(shapes, key);
                let members: Vec<&ShapeDefinition> = partition.shapes(shapes).collect();
                let entry = self
                    .cache
                    .get_object(context, stream, object, &members, key.primitive, key.flags)?;
                if entry.primitive_group_end_indices.len() != members.len() {
                    return Err(Error::InconsistentScene(format!(
                        "object '{}' entry has {} primitive groups for {} shapes",
                        object.name,
                        entry.primitive_group_end_indices.len(),
                        members.len()
                    )));
                }
                let groups = members
                    .iter()
                    .zip(&entry.primitive_group_end_indices)
                    .map(|(shape, &end)| MaterialGroup::from_plastic(&shape.material, key.flags, end))
                    .collect();
                self.geometry_instance(entry, instance.transform, groups)
            }
        };
        self.state = ProxyState::Materialized;
        Ok(geometry)
    }

    fn check_pending(&self, operation: &str) -> Result<()> {
        if self.state != ProxyState::Pending {
            return Err(Error::InvalidOperation(format!(
                "{} called on {:?} proxy (page {}) already {:?}",
                operation, self.kind, self.page_id, self.state
            )));
        }
        Ok(())
    }

    /// Geometry a terminal proxy materializes as
    fn target(&self) -> Result<Target<'_>> {
        let scene = &*self.scene;
        match self.kind {
            ProxyKind::WholeScene => {
                if scene.free_shapes.len() == 1 && scene.object_instances.is_empty() {
                    Ok(Target::Shape {
                        instance_transform: Mat4::IDENTITY,
                        shape: &scene.free_shapes[0],
                    })
                } else if scene.free_shapes.is_empty() && scene.object_instances.len() == 1 {
                    self.instance_target(0)
                } else {
                    Err(Error::InvalidOperation(format!(
                        "whole-scene proxy (page {}) covers {} root children",
                        self.page_id,
                        scene.num_root_children()
                    )))
                }
            }
            ProxyKind::Shape { shape_index } => {
                let shape = scene.free_shapes.get(shape_index).ok_or_else(|| {
                    Error::InconsistentScene(format!("free shape index {} out of range", shape_index))
                })?;
                Ok(Target::Shape {
                    instance_transform: Mat4::IDENTITY,
                    shape,
                })
            }
            ProxyKind::Instance { instance_index } => self.instance_target(instance_index),
            ProxyKind::InstanceShape { instance_index, shape_index } => {
                let (instance, object, shapes) = scene.instance(instance_index)?;
                let shape = shapes.get(shape_index).ok_or_else(|| {
                    Error::InconsistentScene(format!("object '{}' has no shape {}", object.name, shape_index))
                })?;
                Ok(Target::Shape {
                    instance_transform: instance.transform,
                    shape,
                })
            }
            ProxyKind::InstancePrimitive { instance_index, key } => Ok(Target::Partition { instance_index, key }),
        }
    }

    /// An atomic instance: its only shape (fine) or its only partition (coarse)
    fn instance_target(&self, instance_index: usize) -> Result<Target<'_>> {
        let (instance, object, shapes) = self.scene.instance(instance_index)?;
        match self.options.proxy_granularity {
            ProxyGranularity::Fine => {
                let shape = shapes
                    .first()
                    .ok_or_else(|| Error::InconsistentScene(format!("object '{}' has no shapes", object.name)))?;
                Ok(Target::Shape {
                    instance_transform: instance.transform,
                    shape,
                })
            }
            ProxyGranularity::Coarse => {
                let partition = partition_shapes(shapes).into_iter().next().ok_or_else(|| {
                    Error::InconsistentScene(format!("object '{}' has no shapes", object.name))
                })?;
                Ok(Target::Partition {
                    instance_index,
                    key: partition.key,
                })
            }
        }
    }

    fn geometry_instance(&self, entry: GeometryCacheEntry, world: Mat4, groups: Vec<MaterialGroup>) -> GeometryInstance {
        let hit_group = HitGroupIndex::for_primitive(entry.primitive, self.options.use_resolved_materials);
        GeometryInstance {
            accel_buffer: entry.accel_buffer,
            primitive: entry.primitive,
            instance: InstanceRecord {
                transform: to_row_major_3x4(&world),
                instance_id: self.page_id,
                sbt_offset: hit_group.sbt_offset(),
                visibility_mask: u32::from(self.options.visibility_mask),
                traversable_handle: entry.traversable.0,
                ..Default::default()
            },
            groups,
            dev_normals: entry.dev_normals,
            dev_uvs: entry.dev_uvs,
        }
    }
}
