//! kiln-lib: recipe execution for native library packages.
//!
//! A [`recipe::Recipe`] describes a library: its pinned requirements, build
//! options, the settings axes it is sensitive to and its stage callbacks.
//! The [`execute::Lifecycle`] drives a recipe from source acquisition to a
//! package published in the local [`cache::PackageCache`]:
//!
//! - `resolve` locates pre-built dependencies
//! - `collect` turns a build tree into a package layout
//! - `export` produces the consumer manifest

pub mod cache;
pub mod collect;
pub mod consts;
pub mod execute;
pub mod export;
pub mod options;
pub mod platform;
pub mod recipe;
pub mod requirement;
pub mod resolve;
pub mod settings;
pub mod util;
