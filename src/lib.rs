//! chunkcode - chunked video transcoding
//!
//! Splits a video into chunks, transcodes them in parallel inside a
//! sandbox, stitches the result back together and checks that the output
//! is structurally equivalent to the input.

pub mod cli;
pub mod codecs;
pub mod config;
pub mod error;
pub mod media;
pub mod operator;
pub mod protocol;
pub mod task;
pub mod verify;
pub mod workdir;
pub mod workflow;
