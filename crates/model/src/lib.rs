//! An abstraction layer for chat-completion services.
//!
//! This crate establishes an unified protocol for the conversation
//! controller to talk to a remote chat-completion service, so that the
//! controller can be driven by a real HTTP provider or a scripted one
//! without modifying the core codebase.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to.

#![deny(missing_docs)]

mod error;
mod provider;
mod request;
mod response;

pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
