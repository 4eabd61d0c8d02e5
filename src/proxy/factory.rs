//! Proxy factory: creates proxies and registers their bounds
//!
//! Every proxy is registered with the page table before it is handed out,
//! so its page id is known from the moment it exists. Decomposition plans
//! all children first and registers them afterwards; a plan that fails
//! leaves the page table untouched.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::geometry::cache::GeometryCache;
use crate::math::Aabb;
use crate::scene::config::{Options, ProxyGranularity};
use crate::scene::description::SceneDescription;
use crate::scene::shape::{GeometryPrimitive, MaterialFlags, ShapeDefinition};

use super::page_table::ProxyPageTable;
use super::partition::{PartitionKey, partition_for, partition_shapes};
use super::scene_proxy::{ProxyKind, SceneProxy};

/// Counts of proxies created, by kind
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProxyFactoryStatistics {
    pub num_scene_proxies_created: usize,
    pub num_shape_proxies_created: usize,
    pub num_instance_proxies_created: usize,
    pub num_instance_shape_proxies_created: usize,
    pub num_instance_primitive_proxies_created: usize,
    /// All of the above
    pub num_geometry_proxies_created: usize,
}

/// A proxy that has been validated but not yet registered
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct ProxyPlan {
    pub kind: ProxyKind,
    pub bounds: Aabb,
    pub decomposable: bool,
}

pub struct ProxyFactory {
    options: Options,
    page_table: Arc<dyn ProxyPageTable>,
    cache: Arc<dyn GeometryCache>,
    num_scene: AtomicUsize,
    num_shape: AtomicUsize,
    num_instance: AtomicUsize,
    num_instance_shape: AtomicUsize,
    num_instance_primitive: AtomicUsize,
}

impl ProxyFactory {
    pub fn new(options: Options, page_table: Arc<dyn ProxyPageTable>, cache: Arc<dyn GeometryCache>) -> Self {
        Self {
            options,
            page_table,
            cache,
            num_scene: AtomicUsize::new(0),
            num_shape: AtomicUsize::new(0),
            num_instance: AtomicUsize::new(0),
            num_instance_shape: AtomicUsize::new(0),
            num_instance_primitive: AtomicUsize::new(0),
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn cache(&self) -> &Arc<dyn GeometryCache> {
        &self.cache
    }

    /// Root proxy for a scene.
    ///
    /// A scene made of one free shape yields that shape's terminal proxy.
    /// Anything else yields a whole-scene proxy bounded by the scene bounds.
    pub fn scene(&self, scene: &Arc<SceneDescription>) -> Result<SceneProxy> {
        scene.validate()?;
        let plan = if scene.free_shapes.len() == 1 && scene.object_instances.is_empty() {
            self.plan_shape(scene, 0)?
        } else {
            let decomposable = if scene.free_shapes.is_empty() && scene.object_instances.len() == 1 {
                self.plan_instance(scene, 0)?.decomposable
            } else {
                scene.num_root_children() > 1
            };
            ProxyPlan {
                kind: ProxyKind::WholeScene,
                bounds: scene.bounds,
                decomposable,
            }
        };
        Ok(self.create(scene, plan))
    }

    /// Proxy for one whole object instance
    pub fn scene_instance(&self, scene: &Arc<SceneDescription>, instance_index: usize) -> Result<SceneProxy> {
        let plan = self.plan_instance(scene, instance_index)?;
        Ok(self.create(scene, plan))
    }

    /// Proxy for the shapes of one instance matching a primitive kind and
    /// material flag set
    pub fn scene_instance_primitive(
        &self,
        scene: &Arc<SceneDescription>,
        instance_index: usize,
        primitive: GeometryPrimitive,
        flags: MaterialFlags,
    ) -> Result<SceneProxy> {
        let plan = self.plan_instance_primitive(scene, instance_index, PartitionKey::new(primitive, flags))?;
        Ok(self.create(scene, plan))
    }

    pub fn statistics(&self) -> ProxyFactoryStatistics {
        let num_scene = self.num_scene.load(Ordering::Relaxed);
        let num_shape = self.num_shape.load(Ordering::Relaxed);
        let num_instance = self.num_instance.load(Ordering::Relaxed);
        let num_instance_shape = self.num_instance_shape.load(Ordering::Relaxed);
        let num_instance_primitive = self.num_instance_primitive.load(Ordering::Relaxed);
        ProxyFactoryStatistics {
            num_scene_proxies_created: num_scene,
            num_shape_proxies_created: num_shape,
            num_instance_proxies_created: num_instance,
            num_instance_shape_proxies_created: num_instance_shape,
            num_instance_primitive_proxies_created: num_instance_primitive,
            num_geometry_proxies_created: num_scene
                + num_shape
                + num_instance
                + num_instance_shape
                + num_instance_primitive,
        }
    }

    /// Whether an object's shapes must be split before materializing
    pub(crate) fn instance_decomposable(&self, shapes: &[ShapeDefinition]) -> bool {
        match self.options.proxy_granularity {
            ProxyGranularity::Fine => shapes.len() > 1,
            ProxyGranularity::Coarse => partition_shapes(shapes).len() > 1,
        }
    }

    /// Children of a whole-scene proxy: free shapes first, then instances
    pub(crate) fn plan_scene_children(&self, scene: &SceneDescription) -> Result<Vec<ProxyPlan>> {
        if scene.free_shapes.is_empty() && scene.object_instances.len() == 1 {
            return self.plan_instance_children(scene, 0);
        }
        let shapes = (0..scene.free_shapes.len()).map(|i| self.plan_shape(scene, i));
        let instances = (0..scene.object_instances.len()).map(|j| self.plan_instance(scene, j));
        shapes.chain(instances).collect()
    }

    /// Children of an instance proxy: one per shape (fine) or per partition (coarse)
    pub(crate) fn plan_instance_children(&self, scene: &SceneDescription, instance_index: usize) -> Result<Vec<ProxyPlan>> {
        let (_, _, shapes) = scene.instance(instance_index)?;
        match self.options.proxy_granularity {
            ProxyGranularity::Fine => (0..shapes.len())
                .map(|k| self.plan_instance_shape(scene, instance_index, k))
                .collect(),
            ProxyGranularity::Coarse => partition_shapes(shapes)
                .into_iter()
                .map(|p| self.plan_instance_primitive(scene, instance_index, p.key))
                .collect(),
        }
    }

    fn plan_shape(&self, scene: &SceneDescription, shape_index: usize) -> Result<ProxyPlan> {
        let shape = scene.free_shapes.get(shape_index).ok_or_else(|| {
            Error::InconsistentScene(format!(
                "free shape index {} out of range ({} shapes)",
                shape_index,
                scene.free_shapes.len()
            ))
        })?;
        Ok(ProxyPlan {
            kind: ProxyKind::Shape { shape_index },
            bounds: shape.transformed_bounds(),
            decomposable: false,
        })
    }

    fn plan_instance(&self, scene: &SceneDescription, instance_index: usize) -> Result<ProxyPlan> {
        let (instance, _, shapes) = scene.instance(instance_index)?;
        Ok(ProxyPlan {
            kind: ProxyKind::Instance { instance_index },
            bounds: instance.bounds,
            decomposable: self.instance_decomposable(shapes),
        })
    }

    fn plan_instance_shape(&self, scene: &SceneDescription, instance_index: usize, shape_index: usize) -> Result<ProxyPlan> {
        let (instance, object, shapes) = scene.instance(instance_index)?;
        let shape = shapes.get(shape_index).ok_or_else(|| {
            Error::InconsistentScene(format!(
                "object '{}' has no shape {} ({} shapes)",
                object.name,
                shape_index,
                shapes.len()
            ))
        })?;
        Ok(ProxyPlan {
            kind: ProxyKind::InstanceShape { instance_index, shape_index },
            bounds: instance.shape_bounds(shape),
            decomposable: false,
        })
    }

    fn plan_instance_primitive(&self, scene: &SceneDescription, instance_index: usize, key: PartitionKey) -> Result<ProxyPlan> {
        let (instance, object, shapes) = scene.instance(instance_index)?;
        let partition = partition_for(shapes, key);
        if partition.shape_indices.is_empty() {
            return Err(Error::InconsistentScene(format!(
                "object '{}' has no {:?} shapes with flags {:?}",
                object.name, key.primitive, key.flags
            )));
        }
        let bounds = partition
            .shapes(shapes)
            .fold(Aabb::EMPTY, |acc, s| acc.union(&instance.shape_bounds(s)));
        Ok(ProxyPlan {
            kind: ProxyKind::InstancePrimitive { instance_index, key },
            bounds,
            decomposable: false,
        })
    }

    /// Register a planned proxy and count it
    pub(crate) fn create(&self, scene: &Arc<SceneDescription>, plan: ProxyPlan) -> SceneProxy {
        let page_id = self.page_table.add(&plan.bounds);
        let counter = match plan.kind {
            ProxyKind::WholeScene => &self.num_scene,
            ProxyKind::Shape { .. } => &self.num_shape,
            ProxyKind::Instance { .. } => &self.num_instance,
            ProxyKind::InstanceShape { .. } => &self.num_instance_shape,
            ProxyKind::InstancePrimitive { .. } => &self.num_instance_primitive,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "Created {:?} proxy: page {}, bounds {:?}, decomposable {}",
            plan.kind,
            page_id,
            plan.bounds,
            plan.decomposable
        );
        SceneProxy::new(
            page_id,
            plan,
            Arc::clone(scene),
            self.options.clone(),
            Arc::clone(&self.cache),
        )
    }
}
