//! Style Enforcement Tests
//!
//! Enforces patterns clippy does not catch on its own.
//!
//! - `production_code` - No `#[allow(dead_code)]` and no `.unwrap()` outside test modules

#[path = "style/production_code.rs"]
mod production_code;
