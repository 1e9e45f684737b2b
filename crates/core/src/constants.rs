/// Constants used throughout the cachetier codebase

// Environment variable names
pub const CACHETIER_LOG_VAR: &str = "CACHETIER_LOG";
pub const CACHETIER_MAX_HEAP_MB_VAR: &str = "CACHETIER_MAX_HEAP_MB";
pub const CACHETIER_CACHE_RESERVED_MB_VAR: &str = "CACHETIER_CACHE_RESERVED_MB";
pub const CACHETIER_LOCK_TIMEOUT_MS_VAR: &str = "CACHETIER_LOCK_TIMEOUT_MS";
pub const CACHETIER_FLUSH_TIMEOUT_MS_VAR: &str = "CACHETIER_FLUSH_TIMEOUT_MS";

// Config file location, relative to the user config directory
pub const CONFIG_DIR_NAME: &str = "cachetier";
pub const CONFIG_FILE_NAME: &str = "config.json";

// Heap-proportional sizing reference points.
// Cache sizes were tuned for a process with roughly 910MB of usable memory,
// of which the process itself is assumed to use about 150MB.
pub const DEFAULT_SIZES_MAX_HEAP_MB: u64 = 910;
pub const ASSUMED_USED_HEAP_MB: u64 = 150;
pub const DEFAULT_MIN_SIZING_RATIO: f64 = 0.2;
pub const DEFAULT_MAX_SIZING_RATIO: f64 = 16.0;
pub const DEFAULT_SIZE_GRANULARITY: usize = 100;

// Timeouts
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_FLUSH_TIMEOUT_MS: u64 = 60_000;
