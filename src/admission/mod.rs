//! Admission control logic and state management.

mod controller;
mod counter;
mod rules;

pub use controller::{AdmissionController, AdmissionPolicy, Decision};
pub use counter::{CounterKey, WindowCounter};
pub use rules::{Rule, RuleId, RuleSet};
