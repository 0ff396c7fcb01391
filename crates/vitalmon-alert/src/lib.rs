//! Alert rule engine for evaluating biometric data points against
//! configurable clinical rules.
//!
//! Incoming data points update a per-subject [`context::SubjectContext`]
//! (latest values, short trend history, firing counters) and are then
//! checked against every registered [`rule::AlertRule`]. Rules pair a
//! measurement type with either a threshold comparison or a registered
//! custom predicate, and may be scoped to a single subject. Matches become
//! [`BiometricAlert`]s, fanned out to observers by the processor's
//! dispatcher.
//!
//! [`BiometricAlert`]: vitalmon_common::types::BiometricAlert

pub mod context;
pub mod error;
pub mod processor;
pub mod rule;
pub mod templates;

#[cfg(test)]
mod tests;
