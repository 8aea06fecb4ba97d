//! GC Core Module - Generational collection passes
//!
//! A collection at level `L` reclaims the new space plus old generations
//! `0..L`; level `G` (the number of old generations) is a full collection.
//! Collections are stop-the-world and run inline inside the allocating call.
//!
//! One pass:
//!
//! ```text
//! 1. age       children of OldToNew[g < L] pulled into g, referrers back to Old[g]
//! 2. migrate   Old[g < L] unmarked, generation bumped, spliced onto New
//! 3. scan      children of OldToNew[g >= L] forwarded
//! 4. trace     roots forwarded, forward stack drained
//! 5. weak      values/finalizers of reachable keys traced to a fixpoint,
//!              records with dead keys flagged ready
//! 6. sweep     unmarked large nodes released, Free cursors reset
//! 7. account   escalation decision, budgets, page release, free-list sort
//! ```
//!
//! Whatever is left on New after tracing is free; small nodes simply wait
//! there to be handed out again.

use crate::allocator::{LARGE_NODE_CLASS, NODE_CLASS_VCELLS, NUM_SMALL_NODE_CLASSES};
use crate::config::GcConfig;
use crate::error::{HeapError, Result};
use crate::heap::lists::{bulk_move, members};
use crate::heap::Heap;
use crate::object::NodeKind;
use crate::stats::GcTimer;
use indexmap::IndexMap;
use nodeheap_util::{megabytes, VCELL_BYTES};
use serde::Serialize;
use std::fmt;

/// Bytes charged per cell node in reports
const CELL_REPORT_BYTES: f64 = 56.0;

/// Generation schedule, torture countdown and collection counters
#[derive(Debug)]
pub(crate) struct CollectorState {
    generations: usize,
    /// Level of the next collection
    pub(crate) num_old_gens_to_collect: usize,
    collect_counts: Vec<i64>,
    collect_counts_max: Vec<i64>,
    /// Collections per level, index `G` counts full collections
    pub(crate) gen_gc_counts: Vec<usize>,
    pub(crate) gc_count: usize,
    /// Cells freed by the last pass
    pub(crate) collected: i64,
    pub(crate) last_level: usize,
    pub(crate) release_countdown: usize,
    force_wait: usize,
    force_gap: usize,
    pub(crate) inhibit_release: bool,
    debug_checks: bool,
    reporting: bool,
    bad_node: Option<(u32, NodeKind)>,
}

impl CollectorState {
    pub(crate) fn new(config: &GcConfig) -> Self {
        let generations = config.num_old_generations;
        let mut state = Self {
            generations,
            num_old_gens_to_collect: 0,
            // Zero counts make the first collection a full one
            collect_counts: vec![0; generations],
            collect_counts_max: config
                .collection_frequencies
                .iter()
                .map(|&f| i64::from(f))
                .collect(),
            gen_gc_counts: vec![0; generations + 1],
            gc_count: 0,
            collected: 0,
            last_level: 0,
            release_countdown: 0,
            force_wait: 0,
            force_gap: 0,
            inhibit_release: false,
            debug_checks: config.debug_checks,
            reporting: config.verbose,
            bad_node: None,
        };
        state.set_torture(config.torture_gap, config.torture_wait, config.inhibit_release);
        state
    }

    fn set_torture(&mut self, gap: usize, wait: usize, inhibit: bool) {
        self.force_wait = gap;
        self.force_gap = gap;
        if gap > 0 {
            if wait > 0 {
                self.force_wait = wait;
            }
            self.inhibit_release = inhibit;
        }
    }

    /// Advance the torture countdown; true when a collection is due
    pub(crate) fn torture_fires(&mut self) -> bool {
        if self.force_wait == 0 {
            return false;
        }
        self.force_wait -= 1;
        if self.force_wait > 0 {
            false
        } else {
            self.force_wait = self.force_gap;
            true
        }
    }

    /// Remember the first reclaimed node reached during a trace
    pub(crate) fn record_bad_node(&mut self, index: u32, was: NodeKind) {
        if self.bad_node.is_none() {
            self.bad_node = Some((index, was));
        }
    }

    /// Expire countdowns and return the level of the next pass
    fn select_level(&mut self) -> usize {
        while self.num_old_gens_to_collect < self.generations {
            let g = self.num_old_gens_to_collect;
            let count = self.collect_counts[g];
            self.collect_counts[g] -= 1;
            if count <= 0 {
                self.collect_counts[g] = self.collect_counts_max[g];
                self.num_old_gens_to_collect += 1;
            } else {
                break;
            }
        }
        if self.debug_checks {
            self.num_old_gens_to_collect = self.generations;
        }
        self.num_old_gens_to_collect
    }
}

impl Heap {
    /// One collection pass, escalating and re-running as needed
    ///
    /// Returns the level actually collected.
    fn run_gen_collect(&mut self, size_needed: usize) -> usize {
        let generations = self.config.num_old_generations;
        self.collector.select_level();

        let level = loop {
            let level = self.collector.num_old_gens_to_collect;
            self.trace_generations(level);
            self.sweep_new_space();
            self.recount();

            if level < generations {
                let n_size = self.budget.n_size as f64;
                let v_size = self.budget.v_size as f64;
                let min_free = self.config.sizing.min_free_fraction;
                let vfree = self.budget.vheap_free();
                if (self.collector.collected as f64) < min_free * n_size
                    || (vfree as f64) < size_needed as f64 + min_free * v_size
                {
                    self.collector.num_old_gens_to_collect += 1;
                    if self.collector.collected <= 0 || vfree < size_needed {
                        log::debug!("level {} pass freed too little, re-running deeper", level);
                        continue;
                    }
                } else {
                    self.collector.num_old_gens_to_collect = 0;
                }
            } else {
                self.collector.num_old_gens_to_collect = 0;
            }
            break level;
        };

        self.collector.gen_gc_counts[level] += 1;
        self.collector.last_level = level;

        if level == generations {
            for change in self.budget.adjust(&self.config.sizing, size_needed) {
                crate::logging::log_budget_change(&change);
            }
            self.try_to_release_pages();
            if self.config.sort_nodes {
                self.sort_nodes();
            }
        } else if level > 0 {
            self.try_to_release_pages();
        }
        level
    }

    /// Phases 1-5: everything up to and including the weak pass
    fn trace_generations(&mut self, level: usize) {
        let generations = self.config.num_old_generations;

        for gen in 0..level {
            self.age_old_to_new(gen);
        }

        for gen in 0..level {
            for class in 0..self.classes.len() {
                self.classes[class].old_count[gen] = 0;
                let peg = self.classes[class].old[gen];
                let mut s = self.nodes[peg].next;
                while s != peg {
                    let node = &mut self.nodes[s];
                    let next = node.next;
                    if gen < generations - 1 {
                        node.gen = gen as u8 + 1;
                    }
                    node.marked = false;
                    s = next;
                }
                let new = self.classes[class].new;
                bulk_move(&mut self.nodes, peg, new);
            }
        }

        for gen in level..generations {
            for class in 0..self.classes.len() {
                let peg = self.classes[class].old_to_new[gen];
                let mut s = self.nodes[peg].next;
                while s != peg {
                    self.forward_children(s);
                    s = self.nodes[s].next;
                }
            }
        }

        self.forward_roots();
        self.process_nodes();

        self.trace_weak_refs();
    }

    /// Weak pass: fixpoint over reachable keys, then flag dead keys and
    /// keep every record alive until its finalizer has run
    fn trace_weak_refs(&mut self) {
        loop {
            let mut recheck = false;
            let mut w = self.weak_refs;
            while let Some(next) = self.weak_next(w) {
                let (key, value, finalizer) = self.weak_fields(w);
                if self.is_marked(key) {
                    for h in [value, finalizer] {
                        if !self.is_marked(h) {
                            recheck = true;
                            self.forward_node(h);
                        }
                    }
                }
                w = next;
            }
            self.process_nodes();
            if !recheck {
                break;
            }
        }

        let mut w = self.weak_refs;
        while let Some(next) = self.weak_next(w) {
            let (key, _, _) = self.weak_fields(w);
            if !self.is_marked(key) {
                self.set_weak_ready(w);
            }
            w = next;
        }

        let mut w = self.weak_refs;
        while let Some(next) = self.weak_next(w) {
            let (key, value, finalizer) = self.weak_fields(w);
            for h in [w, key, value, finalizer] {
                self.forward_node(h);
            }
            w = next;
        }
        self.process_nodes();
    }

    /// Phase 6: drop dead cache entries, retype garbage in debug mode,
    /// release large garbage and rewind the Free cursors
    fn sweep_new_space(&mut self) {
        let nodes = &self.nodes;
        self.char_cache.retain(|_, h| {
            nodes
                .get(h.id())
                .is_some_and(|n| n.stamp == h.stamp() && n.marked)
        });

        if self.collector.debug_checks {
            let inhibit = self.collector.inhibit_release;
            for class in 0..self.classes.len() {
                for id in members(&self.nodes, self.classes[class].new) {
                    let node = &mut self.nodes[id];
                    if node.kind == NodeKind::Fresh {
                        continue;
                    }
                    if node.kind != NodeKind::Free {
                        node.prior_kind = node.kind;
                        node.kind = NodeKind::Free;
                    }
                    if inhibit {
                        let h = node.handle(id);
                        self.forward_node(h);
                    }
                }
            }
            if inhibit {
                self.process_nodes();
            }
        }

        self.release_large_free_vectors();

        for class in 0..NUM_SMALL_NODE_CLASSES {
            let heap = &mut self.classes[class];
            heap.free = self.nodes[heap.new].next;
        }
    }

    /// Recompute in-use figures from the Old counts
    fn recount(&mut self) {
        let mut in_use = 0usize;
        let mut small_valloc = 0usize;
        for (class, heap) in self.classes.iter().enumerate() {
            let old = heap.total_old();
            in_use += old;
            if (1..NUM_SMALL_NODE_CLASSES).contains(&class) {
                small_valloc += old * NODE_CLASS_VCELLS[class];
            }
        }
        self.collector.collected = self.budget.n_size as i64 - in_use as i64;
        self.budget.nodes_in_use = in_use;
        self.budget.small_valloc = small_valloc;
    }

    /// True for nil, stale handles and marked nodes
    fn is_marked(&self, h: crate::object::Handle) -> bool {
        match self.traceable(h) {
            None => true,
            Some(id) => self.nodes[id].marked,
        }
    }

    /// Collection with the current schedule, then pending finalizers
    ///
    /// `size_needed` is the pending vector request in vector cells.
    pub(crate) fn gc_internal(&mut self, size_needed: usize) -> Result<()> {
        self.check_live()?;
        let mut first = true;
        loop {
            self.collector.gc_count += 1;
            self.budget.note_max_used();

            let timer = GcTimer::new();
            let cells_before = self.budget.nodes_in_use;
            crate::logging::log_collection_start(
                self.collector.gc_count,
                self.collector.num_old_gens_to_collect,
            );
            let level = self.run_gen_collect(size_needed);
            let pause = timer.elapsed();
            let full = level == self.config.num_old_generations;
            self.stats.record_collection(level, full, pause);
            crate::logging::log_collection_end(
                self.collector.gc_count,
                level,
                pause,
                cells_before.saturating_sub(self.budget.nodes_in_use),
            );

            if self.collector.reporting {
                self.report_collection(level);
            }

            if !first {
                break;
            }
            first = false;
            let ran = match self.run_pending_finalizers() {
                Ok(ran) => ran,
                Err(err) => {
                    log::warn!("finalizer failed during collection: {}", err);
                    true
                }
            };
            if !(ran
                && (self.budget.no_free_nodes() || size_needed > self.budget.vheap_free()))
            {
                break;
            }
        }

        if let Some((index, was)) = self.collector.bad_node.take() {
            log::error!("collection reached reclaimed node {} (was {})", index, was);
            return Err(HeapError::CorruptNode { index, was });
        }
        Ok(())
    }

    fn report_collection(&self, level: usize) {
        let counts = &self.collector.gen_gc_counts;
        let mut line = format!("Garbage collection {} = {}", self.collector.gc_count, counts[0]);
        for count in &counts[1..] {
            line.push_str(&format!("+{}", count));
        }
        eprintln!("{} (level {}) ... ", line, level);

        let in_use = self.budget.nodes_in_use as f64;
        let vcells = self.budget.vcells_in_use() as f64;
        eprintln!(
            "{:.1} Mbytes of cons cells used ({}%)",
            megabytes(in_use * CELL_REPORT_BYTES),
            (100.0 * in_use / self.budget.n_size as f64 + 0.5) as i64
        );
        eprintln!(
            "{:.1} Mbytes of vectors used ({}%)",
            megabytes(vcells * VCELL_BYTES as f64),
            (100.0 * vcells / self.budget.v_size as f64 + 0.5) as i64
        );
    }

    /// Full collection
    pub fn gc_full(&mut self, size_needed: usize) -> Result<()> {
        self.collector.num_old_gens_to_collect = self.config.num_old_generations;
        self.gc_internal(size_needed)
    }

    /// Collection covering at least `min_level` old generations
    ///
    /// `size_hint` is a pending vector request in bytes; the pass escalates
    /// until that much vector space is free or the heap is fully collected.
    pub fn collect(&mut self, size_hint: usize, min_level: usize) -> Result<()> {
        let generations = self.config.num_old_generations;
        let wanted = min_level.min(generations);
        if self.collector.num_old_gens_to_collect < wanted {
            self.collector.num_old_gens_to_collect = wanted;
        }
        self.gc_internal(nodeheap_util::bytes_to_vcells(size_hint))
    }

    /// Level of the most recent pass
    pub fn last_collection_level(&self) -> usize {
        self.collector.last_level
    }

    /// Collections so far, escalation re-runs included
    pub fn gc_count(&self) -> usize {
        self.collector.gc_count
    }

    /// Completed passes per level; the last entry counts full collections
    pub fn collection_counts(&self) -> &[usize] {
        &self.collector.gen_gc_counts
    }

    /// Force a collection every `gap` allocations after skipping `wait`
    ///
    /// `gap == 0` turns torture mode off. `inhibit` only takes effect with
    /// a positive gap.
    pub fn set_gc_torture(&mut self, gap: usize, wait: usize, inhibit: bool) {
        self.collector.set_torture(gap, wait, inhibit);
    }

    /// Raise the cell limit; refused below the current budget
    pub fn set_max_cells(&mut self, cells: usize) -> bool {
        if cells >= self.budget.n_size {
            self.budget.max_n_size = cells;
            true
        } else {
            false
        }
    }

    /// Cell limit
    pub fn max_cells(&self) -> usize {
        self.budget.max_n_size
    }

    /// Raise the vector limit in bytes; refused below the current budget
    pub fn set_max_vector_bytes(&mut self, bytes: usize) -> bool {
        if bytes == usize::MAX {
            self.budget.max_v_size = usize::MAX;
            return true;
        }
        if bytes / VCELL_BYTES >= self.budget.v_size {
            self.budget.max_v_size = (bytes + 1) / VCELL_BYTES;
            true
        } else {
            false
        }
    }

    /// Vector limit in bytes, `usize::MAX` when unbounded
    pub fn max_vector_bytes(&self) -> usize {
        if self.budget.max_v_size == usize::MAX {
            usize::MAX
        } else {
            self.budget.max_v_size.saturating_mul(VCELL_BYTES)
        }
    }

    /// Full collection followed by a usage report
    pub fn gc_report(&mut self, reset_max: bool) -> Result<MemoryReport> {
        self.gc_full(0)?;
        let budget = &mut self.budget;
        let cells_used = budget.nodes_in_use;
        let vcells_used = budget.vcells_in_use();
        if reset_max {
            budget.n_max_used = cells_used;
            budget.v_max_used = vcells_used;
        }
        let cell_mb = |cells: usize| megabytes(cells as f64 * CELL_REPORT_BYTES);
        let vcell_mb = |vcells: usize| megabytes(vcells as f64 * VCELL_BYTES as f64);
        Ok(MemoryReport {
            cells_used,
            vcells_used,
            cells_used_mb: cell_mb(cells_used),
            vcells_used_mb: vcell_mb(vcells_used),
            cell_trigger: budget.n_size,
            vcell_trigger: budget.v_size,
            cell_trigger_mb: cell_mb(budget.n_size),
            vcell_trigger_mb: vcell_mb(budget.v_size),
            cell_limit_mb: (budget.max_n_size < usize::MAX).then(|| cell_mb(budget.max_n_size)),
            vcell_limit_mb: (budget.max_v_size < usize::MAX).then(|| vcell_mb(budget.max_v_size)),
            cells_max_used: budget.n_max_used,
            vcells_max_used: budget.v_max_used,
            cells_max_used_mb: cell_mb(budget.n_max_used),
            vcells_max_used_mb: vcell_mb(budget.v_max_used),
        })
    }

    /// Full collection, then live nodes counted by kind
    pub fn memory_profile(&mut self) -> Result<IndexMap<NodeKind, usize>> {
        self.gc_full(0)?;
        let mut profile: IndexMap<NodeKind, usize> =
            NodeKind::ALLOCATABLE.iter().map(|&k| (k, 0)).collect();
        for heap in &self.classes {
            for &peg in heap.old.iter().chain(heap.old_to_new.iter()) {
                for id in members(&self.nodes, peg) {
                    if let Some(count) = profile.get_mut(&self.nodes[id].kind) {
                        *count += 1;
                    }
                }
            }
        }
        Ok(profile)
    }

    /// Detailed diagnostic information
    ///
    /// # Returns
    /// A map from diagnostic name to its rendered value
    pub fn diagnostics(&self) -> IndexMap<String, String> {
        let mut diagnostics = IndexMap::new();

        diagnostics.insert("gc_count".to_string(), self.collector.gc_count.to_string());
        diagnostics.insert(
            "collections_per_level".to_string(),
            format!("{:?}", self.collector.gen_gc_counts),
        );
        diagnostics.insert(
            "next_level".to_string(),
            self.collector.num_old_gens_to_collect.to_string(),
        );

        let sizes = self.budget.stats();
        diagnostics.insert("cells_in_use".to_string(), sizes.cells_in_use.to_string());
        diagnostics.insert("cell_budget".to_string(), sizes.cell_budget.to_string());
        diagnostics.insert(
            "cell_usage".to_string(),
            format!("{:.2}%", sizes.cell_usage_percent()),
        );
        diagnostics.insert("vcells_in_use".to_string(), sizes.vcells_in_use.to_string());
        diagnostics.insert("vcell_budget".to_string(), sizes.vcell_budget.to_string());
        diagnostics.insert(
            "vector_usage".to_string(),
            format!("{:.2}%", sizes.vector_usage_percent()),
        );
        diagnostics.insert("cell_state".to_string(), format!("{:?}", sizes.cell_state));
        diagnostics.insert("vector_state".to_string(), format!("{:?}", sizes.vector_state));

        let stats = self.heap_stats();
        diagnostics.insert("pages".to_string(), stats.total_pages().to_string());
        diagnostics.insert(
            "large_nodes".to_string(),
            self.large_node_count().to_string(),
        );
        diagnostics.insert("weak_refs".to_string(), stats.weak_refs.to_string());
        diagnostics.insert("roots".to_string(), self.root_stats().to_string());
        diagnostics.insert(
            "torture".to_string(),
            format!(
                "gap={} wait={} inhibit_release={}",
                self.collector.force_gap, self.collector.force_wait, self.collector.inhibit_release
            ),
        );

        diagnostics
    }

    fn large_node_count(&self) -> usize {
        let heap = &self.classes[LARGE_NODE_CLASS];
        heap.pegs()
            .map(|peg| members(&self.nodes, peg).len())
            .sum()
    }

    /// Nodes on the New list of `class`, allocated or not
    #[cfg(test)]
    pub(crate) fn new_space(&self, class: usize) -> Vec<crate::object::NodeId> {
        members(&self.nodes, self.classes[class].new)
    }
}

/// Usage report produced by [`Heap::gc_report`]
///
/// Megabyte figures are rounded up to one decimal place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryReport {
    pub cells_used: usize,
    pub vcells_used: usize,
    pub cells_used_mb: f64,
    pub vcells_used_mb: f64,
    /// Budgets at which the next collection triggers
    pub cell_trigger: usize,
    pub vcell_trigger: usize,
    pub cell_trigger_mb: f64,
    pub vcell_trigger_mb: f64,
    /// `None` when unbounded
    pub cell_limit_mb: Option<f64>,
    pub vcell_limit_mb: Option<f64>,
    pub cells_max_used: usize,
    pub vcells_max_used: usize,
    pub cells_max_used_mb: f64,
    pub vcells_max_used_mb: f64,
}

impl fmt::Display for MemoryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let limit = |mb: Option<f64>| mb.map_or_else(|| "NA".to_string(), |mb| format!("{:.1}", mb));
        writeln!(
            f,
            "{:>8} {:>10} {:>8} {:>10} {:>8} {:>10} {:>8}",
            "", "used", "(Mb)", "gc trigger", "(Mb)", "limit (Mb)", "max used"
        )?;
        writeln!(
            f,
            "{:>8} {:>10} {:>8.1} {:>10} {:>8.1} {:>10} {:>8}",
            "Ncells",
            self.cells_used,
            self.cells_used_mb,
            self.cell_trigger,
            self.cell_trigger_mb,
            limit(self.cell_limit_mb),
            self.cells_max_used
        )?;
        write!(
            f,
            "{:>8} {:>10} {:>8.1} {:>10} {:>8.1} {:>10} {:>8}",
            "Vcells",
            self.vcells_used,
            self.vcells_used_mb,
            self.vcell_trigger,
            self.vcell_trigger_mb,
            limit(self.vcell_limit_mb),
            self.vcells_max_used
        )
    }
}
