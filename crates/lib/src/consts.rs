//! Crate-wide constants.

/// Application name used for config, data, and cache directories.
pub const APP_NAME: &str = "kiln";

/// Length of truncated object hashes (package ids, lock keys).
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Default recipe file name looked up by the CLI.
pub const RECIPE_FILENAME: &str = "recipe.lua";

/// Manifest file written at the root of every published package.
pub const MANIFEST_FILENAME: &str = "kiln-manifest.json";

/// Option key that requests richer debug information in release builds.
pub const DEBUG_INFO_OPTION: &str = "debug_info";

/// Option key that selects shared linkage.
pub const SHARED_OPTION: &str = "shared";
