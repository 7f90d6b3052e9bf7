//! HTTP handlers for resource operations.

pub mod rest;
pub use rest::*;
