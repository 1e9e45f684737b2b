//! Heap-proportional sizing of in-memory stores
//!
//! Cache sizes are specified as reference values tuned for a process with
//! about 910MB of usable memory. The sizer scales them by how much memory this
//! process can actually spend, so a generously provisioned build keeps more
//! entries in memory and a constrained one keeps fewer.

use crate::config::CacheTierSettings;
use cachetier_core::{ASSUMED_USED_HEAP_MB, DEFAULT_SIZES_MAX_HEAP_MB};
use once_cell::sync::Lazy;
use sysinfo::System;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Memory budget snapshot, taken once per process
static PROCESS_MEMORY_BUDGET: Lazy<MemoryBudget> = Lazy::new(MemoryBudget::detect);

/// Memory the process may spend, in MB
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBudget {
    max_heap_mb: u64,
}

impl MemoryBudget {
    pub const fn from_mb(max_heap_mb: u64) -> Self {
        Self { max_heap_mb }
    }

    /// A quarter of physical memory, mirroring a managed runtime's default heap limit
    pub fn detect() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        let total_mb = system.total_memory() / BYTES_PER_MB;

        let budget = if total_mb == 0 {
            // Memory could not be determined; size as if we had the reference heap
            DEFAULT_SIZES_MAX_HEAP_MB
        } else {
            total_mb / 4
        };

        tracing::debug!(total_mb, budget_mb = budget, "Detected memory budget");
        Self::from_mb(budget)
    }

    /// The process-wide snapshot
    pub fn process() -> Self {
        *PROCESS_MEMORY_BUDGET
    }

    pub const fn max_heap_mb(&self) -> u64 {
        self.max_heap_mb
    }
}

/// Maps requested in-memory capacities to capacities scaled by the memory budget
#[derive(Debug, Clone, PartialEq)]
pub struct HeapProportionalCacheSizer {
    sizing_ratio: f64,
    granularity: usize,
}

impl HeapProportionalCacheSizer {
    pub fn new(budget: MemoryBudget, settings: &CacheTierSettings) -> Self {
        Self {
            sizing_ratio: calculate_ratio(budget, settings),
            granularity: settings.granularity.max(1),
        }
    }

    /// Sizer over the configured budget override, or the process snapshot
    pub fn from_settings(settings: &CacheTierSettings) -> Self {
        let budget = settings
            .max_heap_mb
            .map(MemoryBudget::from_mb)
            .unwrap_or_else(MemoryBudget::process);
        Self::new(budget, settings)
    }

    pub fn sizing_ratio(&self) -> f64 {
        self.sizing_ratio
    }

    /// Scale `reference_value` using the configured granularity
    pub fn scale_cache_size(&self, reference_value: usize) -> usize {
        self.scale_cache_size_with_granularity(reference_value, self.granularity)
    }

    /// Scale `reference_value`, rounding down to a multiple of `granularity`.
    ///
    /// Never returns less than one granule. References smaller than a granule
    /// are scaled with a granularity of 1 so tiny caches are not inflated.
    pub fn scale_cache_size_with_granularity(
        &self,
        reference_value: usize,
        granularity: usize,
    ) -> usize {
        let granularity = if reference_value < granularity {
            1
        } else {
            granularity.max(1)
        };

        let scaled = (reference_value as f64 * self.sizing_ratio) as usize;
        let rounded = scaled / granularity * granularity;
        rounded.max(granularity)
    }
}

fn calculate_ratio(budget: MemoryBudget, settings: &CacheTierSettings) -> f64 {
    let usable = budget.max_heap_mb() as f64 - settings.reserved_heap_mb as f64;
    let reference = (DEFAULT_SIZES_MAX_HEAP_MB - ASSUMED_USED_HEAP_MB) as f64;
    (usable / reference).clamp(settings.min_ratio, settings.max_ratio)
}
