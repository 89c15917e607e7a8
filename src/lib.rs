//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (`core-concurrent`, `core-runtime`). Host applications can
//! depend on `toolbox-workspace` and enable the documented features without
//! needing to wire each crate individually.

#[cfg(feature = "concurrent")]
pub use core_concurrent as concurrent;
#[cfg(feature = "concurrent")]
pub use core_runtime as runtime;
