//! Streaming call protocol between callers and runners
//!
//! One `run` call is one connection carrying length-prefixed frames.
//!
//! ## Submodules
//!
//! - `frame`: frame layout, encoding and the async reader/writer pair
//! - `call`: opening a call as a client

pub mod call;
pub mod frame;

pub use call::{AsyncStream, BoxedStream, CallReceiver, CallSender, RunnerClient};
pub use frame::{
    CallMetadata, Frame, FrameReader, FrameWriter, OpenRequest, OPTIONS_METADATA_KEY, RUN_METHOD,
};
