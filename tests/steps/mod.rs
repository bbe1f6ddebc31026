//! Step definitions for reporting behavioural tests.

mod finalization_steps;
mod lifecycle_steps;
