//! Text-generation provider abstraction.

pub mod error;
#[cfg(feature = "mock")]
pub mod mock;
pub mod provider;

pub use error::LlmError;
pub use provider::{DisabledProvider, LlmProvider, Message, Role};
