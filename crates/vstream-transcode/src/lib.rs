//! ECS transcode job dispatcher.
//!
//! The actual transcoding runs in a Fargate task; this crate only launches
//! it with the right parameters. Launch rejection is terminal for the
//! record (no automatic retry), so the dispatcher reports it as a typed
//! error instead of retrying.

pub mod dispatcher;
pub mod error;

pub use dispatcher::{EcsConfig, EcsDispatcher, LaunchSpec};
pub use error::{TranscodeError, TranscodeResult};
