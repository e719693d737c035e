//! Weight tree — Fenwick index over non-negative masses for inverse-CDF draws.
//!
//! Purpose
//! -------
//! Support the allocator's joint draw over all rows without rescanning every
//! row after each step: point updates and prefix searches are `O(log n)`.
//!
//! Key behaviors
//! -------------
//! - [`WeightTree::find`] returns the first index whose cumulative mass is
//!   `≥ u` (standard inverse-CDF convention) together with the mass strictly
//!   before it, so callers can descend into the chosen row.
//! - Point updates are applied as deltas; the tree is rebuilt from the exact
//!   values every [`REBUILD_INTERVAL`] updates to bound floating-point drift.
//!
//! Invariants & assumptions
//! ------------------------
//! - Stored values are finite and `≥ 0`; negative inputs are stored as 0.
//! - `total()` equals the sum of stored values up to rounding.
use std::fmt;

/// Number of point updates between exact rebuilds.
pub const REBUILD_INTERVAL: usize = 4096;

/// WeightTree — Fenwick (binary indexed) tree over `f64` masses.
#[derive(Clone)]
pub struct WeightTree {
    /// 1-based Fenwick array of length `n + 1`.
    tree: Vec<f64>,
    /// Exact per-index values; source of truth for rebuilds.
    values: Vec<f64>,
    updates: usize,
}

impl WeightTree {
    /// Build a tree over `values` in `O(n)`.
    pub fn with_values(values: &[f64]) -> WeightTree {
        let values: Vec<f64> = values.iter().map(|&v| v.max(0.0)).collect();
        let tree = build(&values);
        WeightTree { tree, values, updates: 0 }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Stored value at `index`.
    pub fn get(&self, index: usize) -> f64 {
        self.values[index]
    }

    /// Replace the value at `index`.
    pub fn set(&mut self, index: usize, value: f64) {
        let value = value.max(0.0);
        let delta = value - self.values[index];
        self.values[index] = value;

        self.updates += 1;
        if self.updates >= REBUILD_INTERVAL {
            self.rebuild();
            return;
        }
        let n = self.len();
        let mut i = index + 1;
        while i <= n {
            self.tree[i] += delta;
            i += i & i.wrapping_neg();
        }
    }

    /// Sum of `values[..end]`.
    pub fn prefix(&self, end: usize) -> f64 {
        let mut i = end.min(self.len());
        let mut acc = 0.0;
        while i > 0 {
            acc += self.tree[i];
            i -= i & i.wrapping_neg();
        }
        acc
    }

    /// Sum of all values.
    pub fn total(&self) -> f64 {
        self.prefix(self.len())
    }

    /// First index whose cumulative mass is `≥ u`, with the mass before it.
    ///
    /// Returns `None` only when every stored value is zero. When rounding
    /// leaves `u` above the accumulated total, the last positive index is
    /// returned instead.
    pub fn find(&self, u: f64) -> Option<(usize, f64)> {
        let n = self.len();
        let mut idx = 0usize;
        let mut before = 0.0;
        let mut bit = n.next_power_of_two();
        while bit > 0 {
            let next = idx + bit;
            if next <= n && before + self.tree[next] < u {
                idx = next;
                before += self.tree[next];
            }
            bit >>= 1;
        }

        if idx < n && self.values[idx] > 0.0 {
            return Some((idx, before));
        }
        let last = self.values.iter().rposition(|&v| v > 0.0)?;
        Some((last, self.prefix(last)))
    }

    /// Recompute the Fenwick array from the exact values.
    pub fn rebuild(&mut self) {
        self.tree = build(&self.values);
        self.updates = 0;
    }
}

impl fmt::Debug for WeightTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeightTree").field("values", &self.values).finish()
    }
}

// ---- Helper methods ----

fn build(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut tree = vec![0.0; n + 1];
    tree[1..].copy_from_slice(values);
    for i in 1..=n {
        let parent = i + (i & i.wrapping_neg());
        if parent <= n {
            tree[parent] += tree[i];
        }
    }
    tree
}
