//! remotec: a distcc-like remote compilation service.
//!
//! A central producer accepts single-file compile jobs from in-process
//! callers and routes them over TCP to worker nodes, each of which hosts one
//! native toolchain (gcc, g++, rustc). Workers answer every request in the
//! order it arrived, which lets the producer correlate responses to dispatch
//! tokens purely by position in a per-worker FIFO.

#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate log;

pub mod cmdline;
pub mod commands;
pub mod compiler;
pub mod errors;
pub mod producer;
pub mod protocol;
pub mod worker;

#[cfg(test)]
mod test;
