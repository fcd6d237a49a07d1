//! # Ring Load Balancer
//!
//! Round-robin rotation over the instances of one service.
//!
//! The ring is a plain `Vec<Remote>` plus an atomic cursor. `next()` advances the
//! cursor with a compare-and-swap loop, so every caller observes a distinct
//! rotation step even under heavy contention, and the position always stays in
//! `0..len` (no wrap-around glitch when a counter would overflow).
//!
//! ## Rust Concepts Used
//!
//! - `AtomicUsize::fetch_update` for lock-free cursor advancement
//! - Rings are built once per directory snapshot and never mutated afterwards,
//!   so sharing them behind an `Arc` needs no further locking

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::types::Remote;

/// Circular cursor over a fixed set of instances
#[derive(Debug)]
pub struct Ring {
    instances: Vec<Remote>,
    cursor: AtomicUsize,
}

impl Ring {
    /// Seed a ring; rotation starts at the first instance
    pub fn new(instances: Vec<Remote>) -> Self {
        Self {
            instances,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Return the instance at the cursor and advance by one
    pub fn next(&self) -> Option<Remote> {
        let len = self.instances.len();
        if len == 0 {
            return None;
        }

        let position = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some((current + 1) % len)
            })
            .unwrap_or_else(|current| current);

        self.instances.get(position).cloned()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Instances in rotation order
    pub fn instances(&self) -> &[Remote] {
        &self.instances
    }
}
