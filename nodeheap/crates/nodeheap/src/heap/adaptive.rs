//! Adaptive Heap Sizing - occupancy driven budget control
//!
//! After every full collection the controller compares what is needed (live
//! data plus a free reserve plus the pending request) with the two budgets:
//!
//! - cells: above the grow threshold the budget grows by
//!   `max(cell_grow_min, cell_grow_fraction × budget)`, capped at the
//!   maximum; below the shrink threshold it shrinks by
//!   `max(cell_shrink_min, cell_shrink_fraction × budget)`, never below what
//!   is needed (capped by the maximum) nor below the initial budget.
//! - vector cells: if more is needed than budgeted the budget jumps straight
//!   to the need (when under the maximum), then grows or shrinks the same way.

use crate::config::ConfigError;
use nodeheap_util::VCELL_BYTES;
use serde::Serialize;

/// Controller parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SizingPolicy {
    /// Fraction of the initial budgets kept free after a collection
    ///
    /// Also the escalation threshold: a partial collection that frees less
    /// than this fraction makes the next one deeper.
    /// Default: 0.2
    pub min_free_fraction: f64,

    /// Fraction of live nodes kept as spare pages when releasing pages
    ///
    /// Default: 0.5
    pub max_keep_fraction: f64,

    /// Page release runs once every `page_release_frequency` eligible
    /// collections
    ///
    /// Default: 1
    pub page_release_frequency: usize,

    /// Default: 0.70
    pub cell_grow_threshold: f64,
    /// Default: 0.30
    pub cell_shrink_threshold: f64,
    /// Default: 40 000 cells
    pub cell_grow_min: usize,
    /// Default: 0.05
    pub cell_grow_fraction: f64,
    /// Default: 0
    pub cell_shrink_min: usize,
    /// Default: 0.2
    pub cell_shrink_fraction: f64,

    /// Default: 0.70
    pub vector_grow_threshold: f64,
    /// Default: 0.30
    pub vector_shrink_threshold: f64,
    /// Default: 80 000 vector cells
    pub vector_grow_min: usize,
    /// Default: 0.05
    pub vector_grow_fraction: f64,
    /// Default: 0
    pub vector_shrink_min: usize,
    /// Default: 0.2
    pub vector_shrink_fraction: f64,
}

impl Default for SizingPolicy {
    fn default() -> Self {
        Self {
            min_free_fraction: 0.2,
            max_keep_fraction: 0.5,
            page_release_frequency: 1,

            cell_grow_threshold: 0.70,
            cell_shrink_threshold: 0.30,
            cell_grow_min: 40_000,
            cell_grow_fraction: 0.05,
            cell_shrink_min: 0,
            cell_shrink_fraction: 0.2,

            vector_grow_threshold: 0.70,
            vector_shrink_threshold: 0.30,
            vector_grow_min: 80_000,
            vector_grow_fraction: 0.05,
            vector_shrink_min: 0,
            vector_shrink_fraction: 0.2,
        }
    }
}

impl SizingPolicy {
    /// Validate thresholds and fractions
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fractions = [
            ("min_free_fraction", self.min_free_fraction),
            ("cell_grow_fraction", self.cell_grow_fraction),
            ("cell_shrink_fraction", self.cell_shrink_fraction),
            ("vector_grow_fraction", self.vector_grow_fraction),
            ("vector_shrink_fraction", self.vector_shrink_fraction),
        ];
        for (name, value) in fractions {
            if !(0.0..1.0).contains(&value) {
                return Err(ConfigError::InvalidSizing(format!(
                    "{} must be in [0, 1), got {}",
                    name, value
                )));
            }
        }

        if self.max_keep_fraction < 0.0 {
            return Err(ConfigError::InvalidSizing(
                "max_keep_fraction must be >= 0".to_string(),
            ));
        }

        if self.cell_shrink_threshold >= self.cell_grow_threshold
            || self.vector_shrink_threshold >= self.vector_grow_threshold
        {
            return Err(ConfigError::InvalidSizing(
                "shrink thresholds must be below grow thresholds".to_string(),
            ));
        }

        Ok(())
    }
}

/// Direction of the last adjustment of a budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AdaptiveState {
    Stable,
    Growing,
    Shrinking,
}

/// One budget change, reported to the logger
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetChange {
    pub parameter: &'static str,
    pub old_value: usize,
    pub new_value: usize,
    pub occupancy: f64,
}

/// Cell and vector budgets plus the usage counters they are compared with
#[derive(Debug, Clone)]
pub struct HeapBudget {
    /// Cell budget
    pub n_size: usize,
    pub orig_n_size: usize,
    pub max_n_size: usize,

    /// Vector budget in vector cells
    pub v_size: usize,
    pub orig_v_size: usize,
    pub max_v_size: usize,

    /// Nodes currently handed out
    pub nodes_in_use: usize,
    /// Vector cells held by small vectors
    pub small_valloc: usize,
    /// Vector cells held by large vectors
    pub large_valloc: usize,

    /// High-water marks
    pub n_max_used: usize,
    pub v_max_used: usize,

    pub cell_state: AdaptiveState,
    pub vector_state: AdaptiveState,
}

impl HeapBudget {
    /// Budgets from cell counts and vector byte sizes
    pub fn new(cells: usize, max_cells: usize, vector_bytes: usize, max_vector_bytes: usize) -> Self {
        let v_size = vector_bytes / VCELL_BYTES;
        let max_v_size = if max_vector_bytes == usize::MAX {
            usize::MAX
        } else {
            max_vector_bytes / VCELL_BYTES
        };
        Self {
            n_size: cells,
            orig_n_size: cells,
            max_n_size: max_cells,
            v_size,
            orig_v_size: v_size,
            max_v_size,
            nodes_in_use: 0,
            small_valloc: 0,
            large_valloc: 0,
            n_max_used: 0,
            v_max_used: 0,
            cell_state: AdaptiveState::Stable,
            vector_state: AdaptiveState::Stable,
        }
    }

    /// Vector cells still available under the budget
    pub fn vheap_free(&self) -> usize {
        self.v_size
            .saturating_sub(self.small_valloc)
            .saturating_sub(self.large_valloc)
    }

    /// Vector cells in use
    pub fn vcells_in_use(&self) -> usize {
        self.small_valloc + self.large_valloc
    }

    /// True once the cell budget is used up
    pub fn no_free_nodes(&self) -> bool {
        self.nodes_in_use >= self.n_size
    }

    /// Record high-water marks before a collection
    pub fn note_max_used(&mut self) {
        self.n_max_used = self.n_max_used.max(self.nodes_in_use);
        self.v_max_used = self.v_max_used.max(self.vcells_in_use());
    }

    /// Post-collection budget adjustment
    ///
    /// `size_needed` is the pending request in vector cells.
    pub fn adjust(&mut self, policy: &SizingPolicy, size_needed: usize) -> Vec<BudgetChange> {
        let mut changes = Vec::new();
        let min_n_free = (self.orig_n_size as f64 * policy.min_free_fraction) as usize;
        let min_v_free = (self.orig_v_size as f64 * policy.min_free_fraction) as usize;
        let n_needed = self.nodes_in_use.saturating_add(min_n_free);
        let v_needed = self
            .vcells_in_use()
            .saturating_add(size_needed)
            .saturating_add(min_v_free);
        let node_occup = n_needed as f64 / self.n_size as f64;
        let vect_occup = v_needed as f64 / self.v_size as f64;

        let old_n = self.n_size;
        if node_occup > policy.cell_grow_threshold {
            let change = grow_step(policy.cell_grow_min, policy.cell_grow_fraction, self.n_size);
            self.n_size = self.n_size.saturating_add(change).min(self.max_n_size).max(old_n);
            self.cell_state = AdaptiveState::Growing;
        } else if node_occup < policy.cell_shrink_threshold {
            let change =
                grow_step(policy.cell_shrink_min, policy.cell_shrink_fraction, self.n_size);
            self.n_size = self.n_size.saturating_sub(change);
            if self.n_size < n_needed {
                self.n_size = n_needed.min(self.max_n_size);
            }
            if self.n_size < self.orig_n_size {
                self.n_size = self.orig_n_size;
            }
            self.cell_state = AdaptiveState::Shrinking;
        } else {
            self.cell_state = AdaptiveState::Stable;
        }
        if self.n_size != old_n {
            changes.push(BudgetChange {
                parameter: "cell_budget",
                old_value: old_n,
                new_value: self.n_size,
                occupancy: node_occup,
            });
        }

        let old_v = self.v_size;
        if vect_occup > 1.0 && v_needed < self.max_v_size {
            self.v_size = v_needed;
        }
        if vect_occup > policy.vector_grow_threshold {
            let change =
                grow_step(policy.vector_grow_min, policy.vector_grow_fraction, self.v_size);
            self.v_size = self
                .v_size
                .saturating_add(change)
                .min(self.max_v_size)
                .max(old_v);
            self.vector_state = AdaptiveState::Growing;
        } else if vect_occup < policy.vector_shrink_threshold {
            let change =
                grow_step(policy.vector_shrink_min, policy.vector_shrink_fraction, self.v_size);
            self.v_size = self.v_size.saturating_sub(change);
            if self.v_size < v_needed {
                self.v_size = v_needed;
            }
            if self.v_size < self.orig_v_size {
                self.v_size = self.orig_v_size;
            }
            self.vector_state = AdaptiveState::Shrinking;
        } else {
            self.vector_state = AdaptiveState::Stable;
        }
        if self.v_size != old_v {
            changes.push(BudgetChange {
                parameter: "vector_budget",
                old_value: old_v,
                new_value: self.v_size,
                occupancy: vect_occup,
            });
        }

        changes
    }

    /// Snapshot for reporting
    pub fn stats(&self) -> HeapSizeStats {
        HeapSizeStats {
            cells_in_use: self.nodes_in_use,
            cell_budget: self.n_size,
            vcells_in_use: self.vcells_in_use(),
            vcell_budget: self.v_size,
            cell_state: self.cell_state,
            vector_state: self.vector_state,
        }
    }
}

/// Step size for one adjustment: the larger of the fixed minimum and the
/// fraction of the current budget
fn grow_step(min: usize, fraction: f64, size: usize) -> usize {
    min.max((fraction * size as f64) as usize)
}

/// Budget usage snapshot
#[derive(Debug, Clone, Serialize)]
pub struct HeapSizeStats {
    pub cells_in_use: usize,
    pub cell_budget: usize,
    pub vcells_in_use: usize,
    pub vcell_budget: usize,
    pub cell_state: AdaptiveState,
    pub vector_state: AdaptiveState,
}

impl HeapSizeStats {
    pub fn cell_usage_percent(&self) -> f64 {
        if self.cell_budget == 0 {
            return 0.0;
        }
        (self.cells_in_use as f64 / self.cell_budget as f64) * 100.0
    }

    pub fn vector_usage_percent(&self) -> f64 {
        if self.vcell_budget == 0 {
            return 0.0;
        }
        (self.vcells_in_use as f64 / self.vcell_budget as f64) * 100.0
    }
}
