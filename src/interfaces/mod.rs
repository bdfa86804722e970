//! Wire-facing adapters: the catalogue document reader and the checkout API envelopes.

pub mod api;
pub mod json;
