//! Application layer: period resolution, pricing, and checkout orchestration.
//!
//! Resolution and pricing are pure functions over an immutable catalogue snapshot. The
//! `CheckoutOrchestrator` drives payment sessions through the storage and processor
//! ports, and the `PeriodPoller` re-resolves on a timer.

pub mod checkout;
pub mod poller;
pub mod pricing;
pub mod resolver;
