//! Domain layer: value objects, the payment session state machine and the ports the
//! application layer talks through.

pub mod catalogue;
pub mod clock;
pub mod money;
pub mod period;
pub mod ports;
pub mod processor;
pub mod quote;
pub mod registration;
pub mod session;
