//! Transport Module
//!
//! Carries learner calls between the coordinator and out-of-process clients:
//! - Length-prefixed, LZ4-compressed bincode frames
//! - TCP learner client and server

pub mod codec;
pub mod remote;

pub use codec::{read_frame, write_frame, MAX_FRAME_SIZE};
pub use remote::{serve_learner, RemoteLearner, Request, Response};
