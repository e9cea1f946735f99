//! Log retrieval and streaming for kubegate
//!
//! This crate provides one-shot log retrieval with line filtering and
//! continuous log streaming with line reassembly over small read chunks.

mod filter;
mod lines;
mod tailer;

pub use filter::LineFilter;
pub use lines::LineAssembler;
pub use tailer::{LINE_TERMINATOR, LogQuery, LogTailer, STREAM_CHUNK_SIZE};
