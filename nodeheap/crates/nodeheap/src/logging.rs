//! GC Logging and Tracing
//!
//! Collector events go two ways: every event is forwarded to the `log`
//! facade, and a process-wide [`GcLogger`] keeps the most recent ones and
//! optionally echoes them to stderr, human-readable or as JSON lines.
//!
//! Log Levels:
//! - ERROR: allocation failures
//! - INFO: collections, budget changes
//! - DEBUG: page release, finalizer runs
//! - TRACE: collection start

use crate::heap::adaptive::BudgetChange;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Events kept by a logger before the oldest are dropped
const DEFAULT_CAPACITY: usize = 1024;

/// Log level for GC operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

/// GC event types
#[derive(Debug, Clone, PartialEq)]
pub enum GcEvent {
    /// Collection started at the scheduled level
    CollectionStart { cycle: usize, level: usize },

    /// Collection finished
    CollectionEnd {
        cycle: usize,
        level: usize,
        duration_ms: f64,
        cells_freed: usize,
    },

    /// Budget usage after a collection
    HeapStats {
        cells_in_use: usize,
        cell_budget: usize,
        vcells_in_use: usize,
        vcell_budget: usize,
    },

    /// Allocation refused; `bytes` is 0 when a node, not vector space, ran out
    AllocationFailure { class: usize, bytes: usize },

    /// Empty pages returned to the system
    PagesReleased { pages: usize },

    /// Heap-size controller changed a budget
    TuningEvent {
        parameter: String,
        old_value: usize,
        new_value: usize,
        occupancy: f64,
    },

    /// Ready finalizers ran
    FinalizersRun { count: usize },
}

impl GcEvent {
    pub fn level(&self) -> LogLevel {
        match self {
            GcEvent::AllocationFailure { .. } => LogLevel::Error,
            GcEvent::CollectionEnd { .. }
            | GcEvent::HeapStats { .. }
            | GcEvent::TuningEvent { .. } => LogLevel::Info,
            GcEvent::PagesReleased { .. } | GcEvent::FinalizersRun { .. } => LogLevel::Debug,
            GcEvent::CollectionStart { .. } => LogLevel::Trace,
        }
    }

    /// One-line human-readable rendering
    pub fn render(&self) -> String {
        match self {
            GcEvent::CollectionStart { cycle, level } => {
                format!("[GC] Collection {} started (level {})", cycle, level)
            }
            GcEvent::CollectionEnd {
                cycle,
                level,
                duration_ms,
                cells_freed,
            } => format!(
                "[GC] Collection {} completed (level {}, {:.3}ms, {} cells freed)",
                cycle, level, duration_ms, cells_freed
            ),
            GcEvent::HeapStats {
                cells_in_use,
                cell_budget,
                vcells_in_use,
                vcell_budget,
            } => format!(
                "[GC] Heap: {}/{} cells, {}/{} vector cells",
                cells_in_use, cell_budget, vcells_in_use, vcell_budget
            ),
            GcEvent::AllocationFailure { class, bytes } => {
                format!("[GC] Allocation failure: class {}, {} bytes", class, bytes)
            }
            GcEvent::PagesReleased { pages } => format!("[GC] Released {} pages", pages),
            GcEvent::TuningEvent {
                parameter,
                old_value,
                new_value,
                occupancy,
            } => format!(
                "[GC] Tuning: {} changed from {} to {} (occupancy {:.2})",
                parameter, old_value, new_value, occupancy
            ),
            GcEvent::FinalizersRun { count } => format!("[GC] Ran {} finalizers", count),
        }
    }

    /// JSON rendering
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            GcEvent::CollectionStart { cycle, level } => serde_json::json!({
                "type": "collection_start",
                "cycle": cycle,
                "level": level
            }),
            GcEvent::CollectionEnd {
                cycle,
                level,
                duration_ms,
                cells_freed,
            } => serde_json::json!({
                "type": "collection_end",
                "cycle": cycle,
                "level": level,
                "duration_ms": duration_ms,
                "cells_freed": cells_freed
            }),
            GcEvent::HeapStats {
                cells_in_use,
                cell_budget,
                vcells_in_use,
                vcell_budget,
            } => serde_json::json!({
                "type": "heap_stats",
                "cells_in_use": cells_in_use,
                "cell_budget": cell_budget,
                "vcells_in_use": vcells_in_use,
                "vcell_budget": vcell_budget
            }),
            GcEvent::AllocationFailure { class, bytes } => serde_json::json!({
                "type": "allocation_failure",
                "class": class,
                "bytes": bytes
            }),
            GcEvent::PagesReleased { pages } => serde_json::json!({
                "type": "pages_released",
                "pages": pages
            }),
            GcEvent::TuningEvent {
                parameter,
                old_value,
                new_value,
                occupancy,
            } => serde_json::json!({
                "type": "tuning",
                "parameter": parameter,
                "old_value": old_value,
                "new_value": new_value,
                "occupancy": occupancy
            }),
            GcEvent::FinalizersRun { count } => serde_json::json!({
                "type": "finalizers_run",
                "count": count
            }),
        }
    }
}

/// GC Logger configuration
#[derive(Debug, Clone)]
pub struct GcLoggerConfig {
    /// Most verbose level recorded
    pub level: LogLevel,

    /// Echo recorded events to stderr
    pub console: bool,

    /// JSON lines instead of text
    pub json: bool,

    /// Prefix console lines with a local timestamp
    pub timestamps: bool,

    /// Events kept in memory
    pub capacity: usize,
}

impl Default for GcLoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            console: false,
            json: false,
            timestamps: true,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// GC Logger - keeps recent collector events
pub struct GcLogger {
    config: GcLoggerConfig,
    events: Mutex<VecDeque<(Instant, GcEvent)>>,
    enabled: AtomicBool,
}

impl GcLogger {
    pub fn new(config: GcLoggerConfig) -> Self {
        Self {
            config,
            events: Mutex::new(VecDeque::new()),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Record an event
    pub fn log(&self, event: GcEvent) {
        if !self.is_enabled() || event.level() > self.config.level {
            return;
        }

        if self.config.console {
            self.output_console(&event);
        }

        let mut events = self.events.lock();
        if events.len() >= self.config.capacity {
            events.pop_front();
        }
        if self.config.capacity > 0 {
            events.push_back((Instant::now(), event));
        }
    }

    fn output_console(&self, event: &GcEvent) {
        let body = if self.config.json {
            event.to_json().to_string()
        } else {
            event.render()
        };
        if self.config.timestamps {
            let now = chrono::Local::now();
            eprintln!("[{}] {}", now.format("%Y-%m-%d %H:%M:%S%.3f"), body);
        } else {
            eprintln!("{}", body);
        }
    }

    /// Recorded events, oldest first
    pub fn events(&self) -> Vec<(Instant, GcEvent)> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

impl Default for GcLogger {
    fn default() -> Self {
        Self::new(GcLoggerConfig::default())
    }
}

lazy_static::lazy_static! {
    static ref GLOBAL_LOGGER: Mutex<GcLogger> = Mutex::new(GcLogger::default());
}

/// Log a GC event to the `log` facade and the global logger
pub fn log_event(event: GcEvent) {
    log::log!(event.level().into(), "{}", event.render());
    GLOBAL_LOGGER.lock().log(event);
}

/// Replace the global logger
pub fn configure_logger(config: GcLoggerConfig) {
    *GLOBAL_LOGGER.lock() = GcLogger::new(config);
}

/// Number of events held by the global logger
pub fn get_event_count() -> usize {
    GLOBAL_LOGGER.lock().event_count()
}

/// Events held by the global logger, oldest first
pub fn recent_events() -> Vec<GcEvent> {
    GLOBAL_LOGGER
        .lock()
        .events()
        .into_iter()
        .map(|(_, event)| event)
        .collect()
}

pub(crate) fn log_collection_start(cycle: usize, level: usize) {
    log_event(GcEvent::CollectionStart { cycle, level });
}

pub(crate) fn log_collection_end(cycle: usize, level: usize, pause: Duration, cells_freed: usize) {
    log_event(GcEvent::CollectionEnd {
        cycle,
        level,
        duration_ms: pause.as_secs_f64() * 1000.0,
        cells_freed,
    });
}

pub(crate) fn log_allocation_failure(class: usize, bytes: usize) {
    log_event(GcEvent::AllocationFailure { class, bytes });
}

pub(crate) fn log_pages_released(pages: usize) {
    log_event(GcEvent::PagesReleased { pages });
}

pub(crate) fn log_budget_change(change: &BudgetChange) {
    log_event(GcEvent::TuningEvent {
        parameter: change.parameter.to_string(),
        old_value: change.old_value,
        new_value: change.new_value,
        occupancy: change.occupancy,
    });
}

pub(crate) fn log_finalizers_run(count: usize) {
    log_event(GcEvent::FinalizersRun { count });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(cycle: usize) -> GcEvent {
        GcEvent::CollectionEnd {
            cycle,
            level: 0,
            duration_ms: 0.5,
            cells_freed: 10,
        }
    }

    #[test]
    fn test_gc_logger_basic() {
        let logger = GcLogger::default();
        logger.log(start(1));
        assert_eq!(logger.event_count(), 1);
    }

    #[test]
    fn test_gc_logger_disable() {
        let logger = GcLogger::default();
        logger.disable();
        logger.log(start(1));
        assert_eq!(logger.event_count(), 0);
    }

    #[test]
    fn test_level_filter() {
        let logger = GcLogger::default();
        logger.log(GcEvent::CollectionStart { cycle: 1, level: 0 });
        logger.log(GcEvent::AllocationFailure { class: 0, bytes: 0 });
        assert_eq!(logger.event_count(), 1);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let logger = GcLogger::new(GcLoggerConfig {
            capacity: 2,
            ..Default::default()
        });
        for cycle in 1..=3 {
            logger.log(start(cycle));
        }
        let cycles: Vec<_> = logger
            .events()
            .into_iter()
            .map(|(_, e)| match e {
                GcEvent::CollectionEnd { cycle, .. } => cycle,
                _ => 0,
            })
            .collect();
        assert_eq!(cycles, vec![2, 3]);
    }

    #[test]
    fn test_json_rendering() {
        let json = GcEvent::PagesReleased { pages: 3 }.to_json();
        assert_eq!(json["type"], "pages_released");
        assert_eq!(json["pages"], 3);
    }

    #[test]
    fn test_global_logger() {
        log_event(start(7));
        assert!(get_event_count() > 0);
    }
}
