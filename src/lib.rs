//! Vehicle counter library
//!
//! Turns per-frame foreground regions into vehicle counts, size classes and
//! transit speeds measured between two reference lines.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
