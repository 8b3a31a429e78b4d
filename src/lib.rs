//! Black-box conformance tests for the `zksolc` command line interface.
//!
//! Case tables describe compiler invocations and the exit codes, diagnostics
//! and artifacts they must produce. The [`runner`] executes them against the
//! compiler under test and cross-checks exit codes against `solc`. The
//! remaining modules are the helpers cases are built from.

pub mod compare;
pub mod inspect;
pub mod interpolate;
pub mod loader;
pub mod paths;
pub mod platform;
pub mod process;
pub mod runner;
pub mod schema;
pub mod version;
pub mod workspace;
