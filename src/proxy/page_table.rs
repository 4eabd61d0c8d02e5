//! Bounding-volume page table seam
//!
//! The demand-paging layer owns the table; proxies only register their
//! bounds and keep the returned page id as their identity.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::math::Aabb;

/// Registers a bounding volume and returns the page id backing it
pub trait ProxyPageTable: Send + Sync {
    fn add(&self, bounds: &Aabb) -> u32;
}

/// Page table that hands out sequential ids and remembers every registration
pub struct RecordingPageTable {
    next_id: AtomicU32,
    added: Mutex<Vec<(u32, Aabb)>>,
}

impl RecordingPageTable {
    pub fn new(first_id: u32) -> Self {
        Self {
            next_id: AtomicU32::new(first_id),
            added: Mutex::new(Vec::new()),
        }
    }

    /// Every registration so far as (page id, bounds), in call order
    pub fn added(&self) -> Vec<(u32, Aabb)> {
        self.added.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.added.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProxyPageTable for RecordingPageTable {
    fn add(&self, bounds: &Aabb) -> u32 {
        let mut added = self.added.lock().unwrap_or_else(PoisonError::into_inner);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        added.push((id, *bounds));
        id
    }
}
