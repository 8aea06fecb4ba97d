//! Configuration Module - Heap Tuning Parameters
//!
//! Manages the configuration surface of the memory manager: initial and
//! maximum budgets, the generation schedule, the page geometry and the debug
//! knobs. Budgets are expressed in cells (nodes) and bytes; the heap converts
//! byte budgets to vector cells internally.

use crate::heap::adaptive::SizingPolicy;

/// Largest supported number of old generations
pub const MAX_GENERATIONS: usize = 8;

/// Frequency used for generations beyond the configured schedule
const DEFAULT_EXTRA_FREQUENCY: u32 = 5;

/// Main configuration for the node heap
///
/// # Examples
///
/// ```rust
/// use nodeheap::GcConfig;
///
/// // Use default configuration
/// let config = GcConfig::default();
/// assert!(config.validate().is_ok());
///
/// // Fixed 8 MB vector heap
/// let config = GcConfig {
///     initial_vector_bytes: 8 * 1024 * 1024,
///     max_vector_bytes: 8 * 1024 * 1024,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Initial cell budget (number of nodes)
    ///
    /// A collection is triggered once this many nodes are in use. The
    /// controller never shrinks the budget below this value.
    /// Default: 350 000
    pub initial_cells: usize,

    /// Maximum cell budget
    ///
    /// Default: unbounded (`usize::MAX`)
    pub max_cells: usize,

    /// Initial vector heap budget in bytes
    ///
    /// Default: 6MB
    pub initial_vector_bytes: usize,

    /// Maximum vector heap budget in bytes
    ///
    /// Setting this equal to `initial_vector_bytes` disables growth.
    /// Default: unbounded (`usize::MAX`)
    pub max_vector_bytes: usize,

    /// Depth of the root registration stack
    ///
    /// A further reserved margin is kept so overflow can be reported.
    /// Default: 50 000
    pub protect_stack_size: usize,

    /// Number of old generations
    ///
    /// Level `L` of a collection covers the new space plus old generations
    /// `0..L`; level `num_old_generations` is a full collection.
    /// Default: 2
    pub num_old_generations: usize,

    /// Countdown per old generation
    ///
    /// `collection_frequencies[g]` level-`g` collections happen before one
    /// that also covers generation `g`. Must have `num_old_generations` entries.
    /// Default: [20, 5]
    pub collection_frequencies: Vec<u32>,

    /// Page size in bytes for small size classes
    ///
    /// Default: 2000
    pub page_size: usize,

    /// Heap size controller parameters
    pub sizing: SizingPolicy,

    /// Force a collection every `torture_gap` allocations (0 = off)
    ///
    /// Default: 0
    pub torture_gap: usize,

    /// Allocations to skip before torture collections start
    ///
    /// Default: 0
    pub torture_wait: usize,

    /// Keep reclaimed nodes marked so they are never reused
    ///
    /// Only meaningful together with `debug_checks`.
    /// Default: false
    pub inhibit_release: bool,

    /// Run every collection at full depth and retype reclaimed nodes
    ///
    /// Reaching a reclaimed node then reports `CorruptNode`.
    /// Default: false
    pub debug_checks: bool,

    /// Re-sort free lists into page order after full collections
    ///
    /// Default: true
    pub sort_nodes: bool,

    /// Print a report line after each collection
    ///
    /// Default: false
    pub verbose: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        GcConfig {
            // Budgets
            initial_cells: 350_000,
            max_cells: usize::MAX,
            initial_vector_bytes: 6 * MB,
            max_vector_bytes: usize::MAX,

            // Roots
            protect_stack_size: 50_000,

            // Generations
            num_old_generations: 2,
            collection_frequencies: vec![20, 5],

            // Pages
            page_size: 2000,
            sizing: SizingPolicy::default(),

            // Debug
            torture_gap: 0,
            torture_wait: 0,
            inhibit_release: false,
            debug_checks: false,
            sort_nodes: true,
            verbose: false,
        }
    }
}

impl GcConfig {
    /// Configuration with `generations` old generations
    ///
    /// Keeps the default schedule for the first two generations and uses a
    /// countdown of 5 for any further ones.
    pub fn with_generations(generations: usize) -> Self {
        let mut config = Self::default();
        config.num_old_generations = generations;
        config.collection_frequencies = (0..generations)
            .map(|g| match g {
                0 => 20,
                1 => 5,
                _ => DEFAULT_EXTRA_FREQUENCY,
            })
            .collect();
        config
    }

    /// Validate configuration
    ///
    /// Checks if all values are in valid ranges.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nodeheap::GcConfig;
    ///
    /// let config = GcConfig {
    ///     initial_cells: 0,  // Invalid!
    ///     ..Default::default()
    /// };
    ///
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Budget validation
        if self.initial_cells == 0 {
            return Err(ConfigError::InvalidHeapSize(
                "initial_cells must be > 0".to_string(),
            ));
        }

        if self.max_cells < self.initial_cells {
            return Err(ConfigError::InvalidHeapSize(
                "max_cells cannot be below initial_cells".to_string(),
            ));
        }

        if self.initial_vector_bytes < 8 {
            return Err(ConfigError::InvalidHeapSize(
                "initial_vector_bytes must hold at least one vector cell".to_string(),
            ));
        }

        if self.max_vector_bytes < self.initial_vector_bytes {
            return Err(ConfigError::InvalidHeapSize(
                "max_vector_bytes cannot be below initial_vector_bytes".to_string(),
            ));
        }

        // Generation schedule
        if self.num_old_generations == 0 || self.num_old_generations > MAX_GENERATIONS {
            return Err(ConfigError::InvalidGenerations(format!(
                "num_old_generations must be between 1 and {}",
                MAX_GENERATIONS
            )));
        }

        if self.collection_frequencies.len() != self.num_old_generations {
            return Err(ConfigError::InvalidGenerations(format!(
                "collection_frequencies has {} entries, expected {}",
                self.collection_frequencies.len(),
                self.num_old_generations
            )));
        }

        // Page geometry
        let min_page = crate::allocator::PAGE_HEADER_BYTES + crate::allocator::largest_small_node_bytes();
        if self.page_size < min_page {
            return Err(ConfigError::InvalidPageSize(format!(
                "page_size must be at least {} bytes",
                min_page
            )));
        }

        if self.protect_stack_size == 0 {
            return Err(ConfigError::InvalidStackSize(
                "protect_stack_size must be > 0".to_string(),
            ));
        }

        self.sizing.validate()
    }

    /// Build configuration from environment variables
    ///
    /// Overrides defaults with environment variables:
    /// - NODEHEAP_CELLS, NODEHEAP_MAX_CELLS
    /// - NODEHEAP_VECTOR_BYTES, NODEHEAP_MAX_VECTOR_BYTES (accept K/M/G suffixes)
    /// - NODEHEAP_PROTECT_STACK
    /// - NODEHEAP_GENERATIONS
    /// - NODEHEAP_VERBOSE
    /// - NODEHEAP_GCTORTURE, NODEHEAP_GCTORTURE_WAIT,
    ///   NODEHEAP_GCTORTURE_INHIBIT_RELEASE
    ///
    /// # Examples
    ///
    /// ```bash
    /// export NODEHEAP_VECTOR_BYTES=64M
    /// export NODEHEAP_GCTORTURE=100
    /// export NODEHEAP_VERBOSE=1
    /// ```
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(generations) = env_number("NODEHEAP_GENERATIONS") {
            config = Self::with_generations(generations);
        }

        if let Some(cells) = env_number("NODEHEAP_CELLS") {
            config.initial_cells = cells;
        }

        if let Some(cells) = env_number("NODEHEAP_MAX_CELLS") {
            config.max_cells = cells;
        }

        if let Some(bytes) = env_size("NODEHEAP_VECTOR_BYTES") {
            config.initial_vector_bytes = bytes;
        }

        if let Some(bytes) = env_size("NODEHEAP_MAX_VECTOR_BYTES") {
            config.max_vector_bytes = bytes;
        }

        if let Some(depth) = env_number("NODEHEAP_PROTECT_STACK") {
            config.protect_stack_size = depth;
        }

        if let Some(gap) = env_number("NODEHEAP_GCTORTURE") {
            config.torture_gap = gap;
        }

        if let Some(wait) = env_number("NODEHEAP_GCTORTURE_WAIT") {
            config.torture_wait = wait;
        }

        if let Ok(val) = std::env::var("NODEHEAP_GCTORTURE_INHIBIT_RELEASE") {
            config.inhibit_release = is_truthy(&val);
        }

        if let Ok(val) = std::env::var("NODEHEAP_VERBOSE") {
            config.verbose = is_truthy(&val);
        }

        config
    }
}

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid heap size: {0}")]
    InvalidHeapSize(String),

    #[error("Invalid generations: {0}")]
    InvalidGenerations(String),

    #[error("Invalid page size: {0}")]
    InvalidPageSize(String),

    #[error("Invalid stack size: {0}")]
    InvalidStackSize(String),

    #[error("Invalid sizing policy: {0}")]
    InvalidSizing(String),
}

// ============================================================================
// CONSTANTS & HELPERS
// ============================================================================

pub(crate) const KB: usize = 1024;
pub(crate) const MB: usize = 1024 * 1024;
pub(crate) const GB: usize = 1024 * 1024 * 1024;

fn is_truthy(val: &str) -> bool {
    val == "1" || val.eq_ignore_ascii_case("true") || val.eq_ignore_ascii_case("yes")
}

fn env_number(name: &str) -> Option<usize> {
    std::env::var(name).ok()?.trim().parse().ok()
}

fn env_size(name: &str) -> Option<usize> {
    parse_size(&std::env::var(name).ok()?)
}

/// Parse a byte count with an optional K, M or G suffix.
pub(crate) fn parse_size(text: &str) -> Option<usize> {
    let text = text.trim();
    let (digits, unit) = match text.char_indices().last()? {
        (i, 'K' | 'k') => (&text[..i], KB),
        (i, 'M' | 'm') => (&text[..i], MB),
        (i, 'G' | 'g') => (&text[..i], GB),
        _ => (text, 1),
    };
    digits.trim().parse::<usize>().ok()?.checked_mul(unit)
}
