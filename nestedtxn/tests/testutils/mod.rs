//! Test utilities for nestedtxn integration tests
//!
//! - TestFixture: a transaction manager over an in-memory store
//! - RecordingStore: a store that remembers every batch it was asked to apply

#![allow(dead_code)]

pub mod test_fixture;
