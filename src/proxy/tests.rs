//! Scenario tests for proxy creation, decomposition and materialization

use std::sync::Arc;

use rayon::prelude::*;

use crate::core::error::Error;
use crate::core::types::{Mat4, Vec3};
use crate::geometry::cache::{DeviceGeometryCache, GeometryCache};
use crate::geometry::device::{DeviceContext, StreamHandle};
use crate::geometry::instance::HitGroupIndex;
use crate::geometry::mock::{MockDevice, MockFailure};
use crate::math::Aabb;
use crate::scene::config::{Options, ProxyGranularity};
use crate::scene::description::{ObjectInstanceDefinition, SceneDescription};
use crate::scene::shape::{
    GeometryPrimitive, MaterialFlags, PlasticMaterial, ShapeDefinition, SphereData, TriangleMeshData,
};

use super::*;

const CONTEXT: DeviceContext = DeviceContext(1);
const STREAM: StreamHandle = StreamHandle(2);
const FIRST_PAGE: u32 = 100;

struct Harness {
    device: Arc<MockDevice>,
    cache: Arc<DeviceGeometryCache<MockDevice>>,
    page_table: Arc<RecordingPageTable>,
    factory: ProxyFactory,
}

fn harness(options: Options) -> Harness {
    crate::core::logging::try_init();
    let device = Arc::new(MockDevice::new());
    let cache = Arc::new(DeviceGeometryCache::new(Arc::clone(&device)));
    let page_table = Arc::new(RecordingPageTable::new(FIRST_PAGE));
    let factory = ProxyFactory::new(options, page_table.clone(), cache.clone());
    Harness { device, cache, page_table, factory }
}

fn fine() -> Harness {
    harness(Options::default())
}

fn coarse() -> Harness {
    harness(Options::default().with_granularity(ProxyGranularity::Coarse))
}

fn coefficients(k: f32) -> PlasticMaterial {
    PlasticMaterial::new(Vec3::splat(k), Vec3::splat(k + 0.1), Vec3::splat(k + 0.2))
}

fn triangle(translation: Vec3) -> ShapeDefinition {
    ShapeDefinition::triangle_mesh(
        Mat4::from_translation(translation),
        coefficients(0.1),
        TriangleMeshData::new(vec![0, 1, 2], vec![Vec3::ZERO, Vec3::X, Vec3::Y]),
    )
}

fn quad(translation: Vec3, material: PlasticMaterial) -> ShapeDefinition {
    ShapeDefinition::triangle_mesh(
        Mat4::from_translation(translation),
        material,
        TriangleMeshData::new(
            vec![0, 1, 2, 0, 2, 3],
            vec![Vec3::ZERO, Vec3::X, Vec3::new(1.0, 1.0, 0.0), Vec3::Y],
        ),
    )
}

fn sphere(translation: Vec3, radius: f32) -> ShapeDefinition {
    ShapeDefinition::sphere(Mat4::from_translation(translation), coefficients(0.5), SphereData::full(radius))
}

fn union(proxies: &[SceneProxy]) -> Aabb {
    proxies.iter().fold(Aabb::EMPTY, |acc, p| acc.union(&p.bounds()))
}

/// Scene holding one instance of an object made of `shapes`
fn instanced_scene(shapes: Vec<ShapeDefinition>, transform: Mat4) -> Arc<SceneDescription> {
    let mut scene = SceneDescription::new();
    scene.add_object("object", shapes).unwrap();
    scene.add_instance("object", transform).unwrap();
    Arc::new(scene)
}

#[test]
fn test_single_free_shape_scene_is_terminal() {
    let h = fine();
    let shape = triangle(Vec3::new(1.0, 2.0, 3.0));
    let expected = shape.transformed_bounds();
    let mut scene = SceneDescription::new();
    scene.add_free_shape(shape);
    let scene = Arc::new(scene);

    let proxy = h.factory.scene(&scene).unwrap();

    assert!(!proxy.is_decomposable());
    assert_eq!(proxy.kind(), ProxyKind::Shape { shape_index: 0 });
    assert_eq!(proxy.bounds(), expected);
    assert_eq!(proxy.page_id(), FIRST_PAGE);
    assert_eq!(h.page_table.added(), vec![(FIRST_PAGE, expected)]);
    let stats = h.factory.statistics();
    assert_eq!(stats.num_shape_proxies_created, 1);
    assert_eq!(stats.num_scene_proxies_created, 0);
    assert_eq!(stats.num_geometry_proxies_created, 1);
}

#[test]
fn test_two_free_shapes_decompose_in_order() {
    let h = fine();
    let a = triangle(Vec3::new(1.0, 2.0, 3.0));
    let b = triangle(Vec3::new(-1.0, -2.0, -3.0));
    let (bounds_a, bounds_b) = (a.transformed_bounds(), b.transformed_bounds());
    let mut scene = SceneDescription::new();
    scene.add_free_shape(a);
    scene.add_free_shape(b);
    let scene = Arc::new(scene);

    let mut root = h.factory.scene(&scene).unwrap();
    assert!(root.is_decomposable());
    assert_eq!(root.kind(), ProxyKind::WholeScene);
    assert_eq!(root.bounds(), scene.bounds);

    let children = root.decompose(&h.factory).unwrap();
    assert_eq!(root.state(), ProxyState::Decomposed);
    assert_eq!(children.len(), 2);
    assert_eq!(children[0].bounds(), bounds_a);
    assert_eq!(children[1].bounds(), bounds_b);
    assert!(children.iter().all(|c| !c.is_decomposable()));
    assert_eq!(union(&children), root.bounds());
    assert_eq!(children[0].page_id(), FIRST_PAGE + 1);
    assert_eq!(children[1].page_id(), FIRST_PAGE + 2);

    let stats = h.factory.statistics();
    assert_eq!(stats.num_scene_proxies_created, 1);
    assert_eq!(stats.num_shape_proxies_created, 2);
    assert_eq!(stats.num_geometry_proxies_created, 3);
}

#[test]
fn test_free_shapes_precede_instances() {
    let h = fine();
    let mut scene = SceneDescription::new();
    scene.add_object("pair", vec![triangle(Vec3::ZERO), triangle(Vec3::X)]).unwrap();
    scene.add_instance("pair", Mat4::from_translation(Vec3::splat(5.0))).unwrap();
    scene.add_free_shape(triangle(Vec3::splat(-5.0)));
    scene.add_free_shape(sphere(Vec3::splat(-8.0), 1.0));
    let scene = Arc::new(scene);

    let mut root = h.factory.scene(&scene).unwrap();
    let children = root.decompose(&h.factory).unwrap();

    let kinds: Vec<_> = children.iter().map(|c| c.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            ProxyKind::Shape { shape_index: 0 },
            ProxyKind::Shape { shape_index: 1 },
            ProxyKind::Instance { instance_index: 0 },
        ]
    );
    assert!(children[2].is_decomposable());
    assert_eq!(children[2].bounds(), scene.object_instances[0].bounds);
    assert_eq!(union(&children), root.bounds());
}

#[test]
fn test_children_registered_in_yield_order() {
    let h = fine();
    let mut scene = SceneDescription::new();
    for i in 0..5 {
        scene.add_free_shape(triangle(Vec3::splat(i as f32)));
    }
    let scene = Arc::new(scene);

    let mut root = h.factory.scene(&scene).unwrap();
    let children = root.decompose(&h.factory).unwrap();

    let registered = h.page_table.added();
    assert_eq!(registered.len(), 6);
    assert_eq!(registered[0].0, root.page_id());
    for (child, (page_id, bounds)) in children.iter().zip(&registered[1..]) {
        assert_eq!(child.page_id(), *page_id);
        assert_eq!(child.bounds(), *bounds);
    }
}

#[test]
fn test_fine_instance_decomposes_per_shape() {
    let h = fine();
    let shapes = vec![triangle(Vec3::ZERO), quad(Vec3::X, coefficients(0.2)), sphere(Vec3::Z * 3.0, 0.5)];
    let transform = Mat4::from_translation(Vec3::new(4.0, 0.0, -2.0));
    let expected: Vec<Aabb> = shapes
        .iter()
        .map(|s| s.transformed_bounds().transformed(&transform))
        .collect();
    let scene = instanced_scene(shapes, transform);

    let mut instance = h.factory.scene_instance(&scene, 0).unwrap();
    assert!(instance.is_decomposable());
    let err = instance.create_geometry(CONTEXT, STREAM).unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));
    assert_eq!(instance.state(), ProxyState::Pending);

    let children = instance.decompose(&h.factory).unwrap();
    assert_eq!(children.len(), 3);
    for (k, child) in children.iter().enumerate() {
        assert_eq!(child.kind(), ProxyKind::InstanceShape { instance_index: 0, shape_index: k });
        assert_eq!(child.bounds(), expected[k]);
        assert!(!child.is_decomposable());
    }
    assert_eq!(union(&children), instance.bounds());
    assert_eq!(h.factory.statistics().num_instance_shape_proxies_created, 3);
}

#[test]
fn test_rotated_instance_children_cover_parent_exactly() {
    let rotation = Mat4::from_rotation_z(std::f32::consts::FRAC_PI_4);
    for h in [fine(), coarse()] {
        let mut alpha = triangle(Vec3::new(3.0, 3.0, 0.0));
        alpha.material = coefficients(0.1).with_alpha_map("alpha.png");
        let scene = instanced_scene(vec![triangle(Vec3::ZERO), alpha], rotation);

        let mut root = h.factory.scene(&scene).unwrap();
        assert_eq!(root.bounds(), scene.object_instances[0].bounds);
        let children = root.decompose(&h.factory).unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(union(&children), root.bounds());

        let mut instance = h.factory.scene_instance(&scene, 0).unwrap();
        let children = instance.decompose(&h.factory).unwrap();
        assert_eq!(union(&children), instance.bounds());
    }
}

#[test]
fn test_instance_shape_transform_composition() {
    let h = fine();
    let scene = instanced_scene(
        vec![triangle(Vec3::ONE), triangle(Vec3::ZERO)],
        Mat4::from_translation(Vec3::splat(10.0)),
    );
    let mut instance = h.factory.scene_instance(&scene, 0).unwrap();
    let mut children = instance.decompose(&h.factory).unwrap();

    let geometry = children[0].create_geometry(CONTEXT, STREAM).unwrap();

    let t = geometry.instance.transform;
    assert_eq!([t[3], t[7], t[11]], [11.0, 11.0, 11.0]);
    assert_eq!([t[0], t[5], t[10]], [1.0, 1.0, 1.0]);
    let direct = Mat4::from_translation(Vec3::splat(10.0)) * Mat4::from_translation(Vec3::ONE);
    assert_eq!(t, crate::math::to_row_major_3x4(&direct));
    assert_eq!(children[0].state(), ProxyState::Materialized);
}

#[test]
fn test_free_shape_geometry_instance() {
    let h = fine();
    let mut scene = SceneDescription::new();
    scene.add_free_shape(quad(Vec3::new(1.0, 2.0, 3.0), coefficients(0.3).with_diffuse_map("wood.png")));
    let scene = Arc::new(scene);

    let mut proxy = h.factory.scene(&scene).unwrap();
    let geometry = proxy.create_geometry(CONTEXT, STREAM).unwrap();

    assert_eq!(geometry.primitive, GeometryPrimitive::Triangle);
    assert_eq!(geometry.instance.sbt_offset, HitGroupIndex::ProxyMaterialTriangle.sbt_offset());
    assert_eq!(geometry.instance.visibility_mask, 255);
    assert_eq!(geometry.instance.instance_id, proxy.page_id());
    assert_eq!([geometry.instance.transform[3], geometry.instance.transform[7]], [1.0, 2.0]);
    assert_eq!(geometry.groups.len(), 1);
    let group = &geometry.groups[0];
    assert_eq!(group.primitive_index_end, 2);
    assert_eq!(group.material.flags, MaterialFlags::DIFFUSE_MAP);
    assert_eq!(group.material.kd, coefficients(0.3).kd);
    assert_eq!(group.diffuse_map.as_deref(), Some("wood.png"));
    assert_eq!(group.alpha_map, None);
    assert_eq!(geometry.dev_normals, None);
    assert_eq!(geometry.dev_uvs, None);
    assert!(!geometry.accel_buffer.is_null());
    assert_eq!(h.device.num_builds(), 1);
}

#[test]
fn test_hit_group_follows_primitive_not_maps() {
    let h = fine();
    let mut scene = SceneDescription::new();
    scene.add_free_shape(ShapeDefinition::triangle_mesh(
        Mat4::IDENTITY,
        coefficients(0.1).with_alpha_map("leaf_alpha.png"),
        TriangleMeshData::new(vec![0, 1, 2], vec![Vec3::ZERO, Vec3::X, Vec3::Y]),
    ));
    scene.add_free_shape(sphere(Vec3::splat(3.0), 1.0));
    let scene = Arc::new(scene);

    let mut root = h.factory.scene(&scene).unwrap();
    let mut children = root.decompose(&h.factory).unwrap();
    let leaf = children[0].create_geometry(CONTEXT, STREAM).unwrap();
    let ball = children[1].create_geometry(CONTEXT, STREAM).unwrap();

    assert_eq!(leaf.instance.sbt_offset, HitGroupIndex::ProxyMaterialTriangle.sbt_offset());
    assert_eq!(leaf.groups[0].material.flags, MaterialFlags::ALPHA_MAP);
    assert_eq!(leaf.groups[0].alpha_map.as_deref(), Some("leaf_alpha.png"));
    assert_eq!(ball.instance.sbt_offset, HitGroupIndex::ProxyMaterialSphere.sbt_offset());
    assert_eq!(ball.primitive, GeometryPrimitive::Sphere);
}

#[test]
fn test_options_select_resolved_hit_groups_and_mask() {
    let options = Options {
        use_resolved_materials: true,
        visibility_mask: 0x0f,
        ..Options::default()
    };
    let h = harness(options);
    let mut scene = SceneDescription::new();
    scene.add_free_shape(sphere(Vec3::ZERO, 2.0));
    let scene = Arc::new(scene);

    let geometry = h.factory.scene(&scene).unwrap().create_geometry(CONTEXT, STREAM).unwrap();

    assert_eq!(geometry.instance.sbt_offset, HitGroupIndex::ResolvedMaterialSphere.sbt_offset());
    assert_eq!(geometry.instance.visibility_mask, 0x0f);
}

#[test]
fn test_coarse_single_partition_materializes_whole_instance() {
    let h = coarse();
    let shapes = vec![
        triangle(Vec3::ZERO),
        quad(Vec3::X * 2.0, coefficients(0.6)),
        triangle(Vec3::Y * 2.0),
    ];
    let scene = instanced_scene(shapes, Mat4::from_translation(Vec3::splat(10.0)));

    let mut instance = h.factory.scene_instance(&scene, 0).unwrap();
    assert!(!instance.is_decomposable());
    let err = instance.decompose(&h.factory).unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));

    let geometry = instance.create_geometry(CONTEXT, STREAM).unwrap();
    let ends: Vec<u32> = geometry.groups.iter().map(|g| g.primitive_index_end).collect();
    assert_eq!(ends, vec![1, 3, 4]);
    assert_eq!(geometry.groups[1].material.ka, Vec3::splat(0.6));
    assert_eq!(geometry.group_for_primitive(2).map(|g| g.material.ka), Some(Vec3::splat(0.6)));
    let t = geometry.instance.transform;
    assert_eq!([t[3], t[7], t[11]], [10.0, 10.0, 10.0]);
    assert_eq!(h.device.num_builds(), 1);
    assert_eq!(h.cache.statistics().num_entries, 1);
}

#[test]
fn test_coarse_instance_decomposes_per_partition() {
    let h = coarse();
    let alpha = coefficients(0.2).with_alpha_map("alpha.png");
    let mut alpha_triangle = triangle(Vec3::new(0.0, -4.0, 0.0));
    alpha_triangle.material = alpha.clone();
    let shapes = vec![
        triangle(Vec3::ZERO),
        sphere(Vec3::new(0.0, 0.0, 4.0), 1.0),
        quad(Vec3::new(3.0, 0.0, 0.0), alpha),
        quad(Vec3::new(-3.0, 0.0, 0.0), coefficients(0.7)),
        triangle(Vec3::new(0.0, 5.0, 0.0)),
        alpha_triangle,
    ];
    let transform = Mat4::from_translation(Vec3::new(1.0, 1.0, 1.0));
    let shape_bounds: Vec<Aabb> = shapes.iter().map(|s| s.transformed_bounds().transformed(&transform)).collect();
    let scene = instanced_scene(shapes, transform);

    let mut instance = h.factory.scene_instance(&scene, 0).unwrap();
    assert!(instance.is_decomposable());
    let mut children = instance.decompose(&h.factory).unwrap();

    let plain = PartitionKey::new(GeometryPrimitive::Triangle, MaterialFlags::empty());
    let spheres = PartitionKey::new(GeometryPrimitive::Sphere, MaterialFlags::empty());
    let alpha_key = PartitionKey::new(GeometryPrimitive::Triangle, MaterialFlags::ALPHA_MAP);
    let kinds: Vec<_> = children.iter().map(|c| c.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            ProxyKind::InstancePrimitive { instance_index: 0, key: plain },
            ProxyKind::InstancePrimitive { instance_index: 0, key: spheres },
            ProxyKind::InstancePrimitive { instance_index: 0, key: alpha_key },
        ]
    );
    let plain_bounds = Aabb::union_all([&shape_bounds[0], &shape_bounds[3], &shape_bounds[4]]);
    assert_eq!(children[0].bounds(), plain_bounds);
    assert_eq!(children[1].bounds(), shape_bounds[1]);
    assert_eq!(children[2].bounds(), shape_bounds[2].union(&shape_bounds[5]));
    assert_eq!(union(&children), instance.bounds());

    let geometry = children[0].create_geometry(CONTEXT, STREAM).unwrap();
    let ends: Vec<u32> = geometry.groups.iter().map(|g| g.primitive_index_end).collect();
    assert_eq!(ends, vec![1, 3, 4]);
    assert!(geometry.groups.iter().all(|g| g.material.flags == MaterialFlags::empty()));

    let alpha_geometry = children[2].create_geometry(CONTEXT, STREAM).unwrap();
    assert_eq!(alpha_geometry.groups.len(), 2);
    assert!(alpha_geometry.groups.iter().all(|g| g.material.flags == MaterialFlags::ALPHA_MAP));

    let spheres_geometry = children[1].create_geometry(CONTEXT, STREAM).unwrap();
    assert_eq!(spheres_geometry.primitive, GeometryPrimitive::Sphere);
    assert_eq!(spheres_geometry.instance.sbt_offset, HitGroupIndex::ProxyMaterialSphere.sbt_offset());
    assert_eq!(h.factory.statistics().num_instance_primitive_proxies_created, 3);
}

#[test]
fn test_scene_instance_primitive() {
    let h = fine();
    let transform = Mat4::from_translation(Vec3::splat(2.0));
    let shapes = vec![triangle(Vec3::ZERO), sphere(Vec3::X * 4.0, 1.0), triangle(Vec3::Y * 3.0)];
    let expected = shapes[0]
        .transformed_bounds()
        .transformed(&transform)
        .union(&shapes[2].transformed_bounds().transformed(&transform));
    let scene = instanced_scene(shapes, transform);

    let mut proxy = h
        .factory
        .scene_instance_primitive(&scene, 0, GeometryPrimitive::Triangle, MaterialFlags::empty())
        .unwrap();
    assert!(!proxy.is_decomposable());
    assert_eq!(proxy.bounds(), expected);
    assert_eq!(h.factory.statistics().num_instance_primitive_proxies_created, 1);

    let geometry = proxy.create_geometry(CONTEXT, STREAM).unwrap();
    assert_eq!(geometry.groups.len(), 2);

    let err = h
        .factory
        .scene_instance_primitive(&scene, 0, GeometryPrimitive::Sphere, MaterialFlags::DIFFUSE_MAP)
        .unwrap_err();
    assert!(matches!(err, Error::InconsistentScene(_)));
    assert_eq!(h.page_table.len(), 1);
}

#[test]
fn test_single_instance_scene_delegates_to_instance() {
    let h = fine();
    let scene = instanced_scene(vec![triangle(Vec3::ZERO), triangle(Vec3::X)], Mat4::IDENTITY);

    let mut root = h.factory.scene(&scene).unwrap();
    assert_eq!(root.kind(), ProxyKind::WholeScene);
    assert!(root.is_decomposable());
    let children = root.decompose(&h.factory).unwrap();
    assert_eq!(children.len(), 2);
    assert!(matches!(children[0].kind(), ProxyKind::InstanceShape { instance_index: 0, shape_index: 0 }));
    assert_eq!(union(&children), root.bounds());
}

#[test]
fn test_single_atomic_instance_scene_materializes() {
    let h = fine();
    let scene = instanced_scene(vec![sphere(Vec3::ZERO, 1.0)], Mat4::from_translation(Vec3::splat(10.0)));

    let mut root = h.factory.scene(&scene).unwrap();
    assert!(!root.is_decomposable());
    assert!(matches!(root.decompose(&h.factory), Err(Error::InvalidOperation(_))));

    let geometry = root.create_geometry(CONTEXT, STREAM).unwrap();
    assert_eq!(geometry.primitive, GeometryPrimitive::Sphere);
    assert_eq!(geometry.instance.transform[3], 10.0);
}

#[test]
fn test_proxy_transitions_once() {
    let h = fine();
    let mut scene = SceneDescription::new();
    scene.add_free_shape(triangle(Vec3::ZERO));
    scene.add_free_shape(triangle(Vec3::ONE));
    let scene = Arc::new(scene);

    let mut root = h.factory.scene(&scene).unwrap();
    root.decompose(&h.factory).unwrap();
    assert!(matches!(root.decompose(&h.factory), Err(Error::InvalidOperation(_))));
    assert_eq!(h.page_table.len(), 3);

    let mut leaf = h.factory.scene_instance(&instanced_scene(vec![triangle(Vec3::ZERO)], Mat4::IDENTITY), 0).unwrap();
    leaf.create_geometry(CONTEXT, STREAM).unwrap();
    assert!(matches!(leaf.create_geometry(CONTEXT, STREAM), Err(Error::InvalidOperation(_))));
    assert!(matches!(leaf.decompose(&h.factory), Err(Error::InvalidOperation(_))));
}

#[test]
fn test_shared_object_builds_once_across_instances() {
    let h = fine();
    let mut scene = SceneDescription::new();
    scene.add_object("tree", vec![quad(Vec3::ZERO, coefficients(0.1)), sphere(Vec3::Y * 2.0, 1.0)]).unwrap();
    for i in 0..4 {
        scene.add_instance("tree", Mat4::from_translation(Vec3::X * 10.0 * i as f32)).unwrap();
    }
    let scene = Arc::new(scene);

    let mut root = h.factory.scene(&scene).unwrap();
    let mut traversables = Vec::new();
    for mut instance in root.decompose(&h.factory).unwrap() {
        for mut leaf in instance.decompose(&h.factory).unwrap() {
            let geometry = leaf.create_geometry(CONTEXT, STREAM).unwrap();
            traversables.push(geometry.instance.traversable());
        }
    }

    assert_eq!(traversables.len(), 8);
    assert_eq!(h.device.num_builds(), 2);
    assert!(traversables.chunks(2).all(|pair| pair == &traversables[0..2]));
    let stats = h.factory.statistics();
    assert_eq!(stats.num_instance_proxies_created, 4);
    assert_eq!(stats.num_instance_shape_proxies_created, 8);
    assert_eq!(stats.num_geometry_proxies_created, 13);
}

#[test]
fn test_concurrent_partition_materialization_builds_once() {
    let h = coarse();
    let mut scene = SceneDescription::new();
    scene
        .add_object("rock", vec![quad(Vec3::ZERO, coefficients(0.2)), triangle(Vec3::Z), triangle(Vec3::Z * 2.0)])
        .unwrap();
    for i in 0..8 {
        scene.add_instance("rock", Mat4::from_translation(Vec3::X * 5.0 * i as f32)).unwrap();
    }
    let scene = Arc::new(scene);

    // Two proxy objects per instance, all standing for the same partition
    let mut proxies: Vec<SceneProxy> = (0..16)
        .map(|i| h.factory.scene_instance(&scene, i % 8).unwrap())
        .collect();
    assert!(proxies.iter().all(|p| !p.is_decomposable()));

    let geometries: Vec<_> = proxies
        .par_iter_mut()
        .map(|p| p.create_geometry(CONTEXT, STREAM).unwrap())
        .collect();

    assert_eq!(h.device.num_builds(), 1);
    let first = geometries[0].instance.traversable();
    assert!(geometries.iter().all(|g| g.instance.traversable() == first));
    assert!(geometries.iter().all(|g| g.groups.len() == 3));
    assert!(proxies.iter().all(|p| p.state() == ProxyState::Materialized));
    let stats = h.cache.statistics();
    assert_eq!(stats.num_entries, 1);
    assert_eq!(stats.num_hits, 15);
}

#[test]
fn test_cache_failure_leaves_proxy_pending() {
    let h = fine();
    let mut scene = SceneDescription::new();
    scene.add_free_shape(triangle(Vec3::ZERO));
    let scene = Arc::new(scene);
    let mut proxy = h.factory.scene(&scene).unwrap();

    h.device.set_failure(MockFailure::OutOfMemory);
    let err = proxy.create_geometry(CONTEXT, STREAM).unwrap_err();
    assert!(matches!(err, Error::CacheBuild(_)));
    assert_eq!(proxy.state(), ProxyState::Pending);

    h.device.set_failure(MockFailure::None);
    assert!(proxy.create_geometry(CONTEXT, STREAM).is_ok());
    assert_eq!(h.cache.statistics().num_entries, 1);
}

#[test]
fn test_inconsistent_scene_fails_fast() {
    let h = fine();
    assert!(matches!(
        h.factory.scene(&Arc::new(SceneDescription::new())),
        Err(Error::InconsistentScene(_))
    ));

    let mut scene = SceneDescription::new();
    scene.add_free_shape(triangle(Vec3::ZERO));
    scene
        .object_instances
        .push(ObjectInstanceDefinition::new("missing", Mat4::IDENTITY, &[triangle(Vec3::ZERO)]));
    let scene = Arc::new(scene);
    assert!(matches!(h.factory.scene(&scene), Err(Error::InconsistentScene(_))));
    assert!(matches!(h.factory.scene_instance(&scene, 0), Err(Error::InconsistentScene(_))));
    assert!(matches!(h.factory.scene_instance(&scene, 7), Err(Error::InconsistentScene(_))));
    assert!(h.page_table.is_empty());
    assert_eq!(h.factory.statistics(), ProxyFactoryStatistics::default());
}

#[test]
fn test_statistics_serialize() {
    let h = fine();
    let mut scene = SceneDescription::new();
    scene.add_free_shape(triangle(Vec3::ZERO));
    h.factory.scene(&Arc::new(scene)).unwrap();

    let json = serde_json::to_value(h.factory.statistics()).unwrap();
    assert_eq!(json["num_shape_proxies_created"], 1);
    assert_eq!(json["num_geometry_proxies_created"], 1);
}
