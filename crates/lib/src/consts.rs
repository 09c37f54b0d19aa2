//! Crate-wide constants.

/// Application name, used for default directories and config file names.
pub const APP_NAME: &str = "cachet";

/// Separator byte appended after every key and value fed into a rule key.
pub const RULE_KEY_SEPARATOR: u8 = b'\0';

/// Project configuration file, looked up at the project root.
pub const CONFIG_FILE_NAME: &str = ".cachet.toml";

/// Default directory (relative to the project root) for build outputs.
pub const DEFAULT_OUTPUT_DIR: &str = "cachet-out";

/// Subdirectory of the output dir holding per-rule generated outputs.
pub const GEN_DIR: &str = "gen";

/// Subdirectory of the output dir holding per-rule scratch space.
pub const SCRATCH_DIR: &str = "tmp";

/// Separator between an archive path and a member inside it (`lib.zip!/a.txt`).
pub const ARCHIVE_MEMBER_SEPARATOR: &str = "!/";

/// Bumped whenever the on-disk artifact layout changes.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Number of trailing stderr lines kept when a command step fails.
pub const STDERR_TAIL_LINES: usize = 20;

/// Default timeout for a single cache fetch, in milliseconds.
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;

/// Default timeout for a single cache store, in milliseconds.
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 30_000;

/// Environment variable overriding the local cache directory.
pub const ENV_CACHE_DIR: &str = "CACHET_CACHE_DIR";

/// Environment variable overriding the worker count.
pub const ENV_THREADS: &str = "CACHET_THREADS";

/// Environment variable overriding the cache mode.
pub const ENV_CACHE_MODE: &str = "CACHET_CACHE_MODE";
