//! CLI integration tests for kiln.

mod common;
mod create_tests;
mod info_tests;
mod install_tests;
mod list_tests;
