//! hearth-sdk: the platform boundary of the hearth community bot.
//!
//! - [`event`]: what the chat platform pushes at us
//! - [`gateway`]: what we ask the platforms to do
//! - [`client`]: a [`gateway::Gateway`] backed by the platform bridge process

pub mod client;
pub mod error;
pub mod event;
pub mod gateway;
pub mod types;
pub mod wire;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use error::{PlatformError, PlatformResult};
