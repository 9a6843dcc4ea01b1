// tests/property/mod.rs

//! Property-based test modules

pub mod framing_test;
pub mod registry_consistency_test;
