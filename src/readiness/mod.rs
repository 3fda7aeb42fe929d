//! Deposit Readiness Module
//!
//! Exit roots make deposits claimable; `tracker` applies them and lists
//! what is ready.

pub mod tracker;

pub use tracker::ReadinessTracker;
