//! Rkdemand - on-demand ray-tracing geometry for scenes too large to build up front
//!
//! A scene is exposed as a tree of proxies carrying only a bounding box and a
//! page id. Proxies are decomposed on request into finer proxies, and the
//! leaves materialize into acceleration structures fetched from a geometry
//! cache that builds each distinct shape or object partition once.

pub mod core;
pub mod math;
pub mod scene;
pub mod geometry;
pub mod proxy;
