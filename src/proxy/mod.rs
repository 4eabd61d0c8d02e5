//! Proxy decomposition: placeholders that split on demand and materialize
//! into cached geometry

pub mod factory;
pub mod page_table;
pub mod partition;
pub mod scene_proxy;

#[cfg(test)]
mod tests;

pub use factory::{ProxyFactory, ProxyFactoryStatistics};
pub use page_table::{ProxyPageTable, RecordingPageTable};
pub use partition::{Partition, PartitionKey, partition_shapes};
pub use scene_proxy::{ProxyKind, ProxyState, SceneProxy};
