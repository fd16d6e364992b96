//! This crate contains shared helpers and primitives used across the crates
//! in this workspace, most notably a human-readable [`time::Duration`] used
//! throughout the CA configuration.

pub mod time;
