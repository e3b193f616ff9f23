//! Scenario test suite for the Sable wallet engine.
//!
//! This crate exercises complete flows across components: backup and
//! restore, privacy properties of coin selection and change handling,
//! gap-limit accounting, and multi-party signing.

pub mod helpers;
