//! Test module for chat-rooms
//!
//! Scenario tests drive the lifecycle manager through scripted mock
//! channels; property-based tests use proptest to validate the
//! correctness invariants of the crate.

#[cfg(test)]
pub mod mock;




#[cfg(test)]
pub mod subscription_tests;

#[cfg(test)]
pub mod backoff_tests;

#[cfg(test)]
pub mod rooms_tests;
