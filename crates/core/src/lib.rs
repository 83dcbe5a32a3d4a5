//! Core conversation logic: the transcript store and the controller
//! that folds a streamed reply into it.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod client;
mod controller;
pub mod transcript;

pub use controller::{Controller, ControllerBuilder};
