//! Testing utilities and mock implementations
//!
//! Mock broker and recording sink for exercising connection tasks without a
//! running AMQP server.

pub mod mocks;

pub use mocks::*;
