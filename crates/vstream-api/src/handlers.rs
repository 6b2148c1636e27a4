//! Request handlers.

pub mod health;
pub mod status;
pub mod videos;
pub mod webhooks;

pub use health::*;
pub use status::*;
pub use videos::*;
pub use webhooks::*;
