//! Reusable test suites for the queue.
//!
//! The suites are plain `pub fn`s so unit tests and the integration test
//! crates can drive the same scenarios under different queue configurations.

pub mod queue_stress_tests;
