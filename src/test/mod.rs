//! Shared helpers for the system tests: scripted workers that speak the
//! wire protocol without owning a toolchain, so routing behavior can be
//! exercised deterministically.

pub mod system;

use std::net::{SocketAddr, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::compiler::Language;
use crate::protocol::{self, CompileRequest, CompileResult, RegisterCompilerService};

fn register(stream: &TcpStream, lang: Language) {
    let reg = RegisterCompilerService {
        lang: lang as i32,
        version: "scripted".to_owned(),
        procarch: "test".to_owned(),
    };
    protocol::write_frame(&mut &*stream, &protocol::encode(&reg)).unwrap();
}

/// A worker that judges each request with `judge` instead of compiling it.
/// Serves until the producer closes the connection.
pub fn spawn_scripted_worker(
    addr: SocketAddr,
    lang: Language,
    judge: fn(&str) -> bool,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let stream = TcpStream::connect(addr).unwrap();
        register(&stream, lang);
        while let Ok(frame) = protocol::read_frame(&mut &stream) {
            let request: CompileRequest = protocol::decode(&frame).unwrap();
            let success = judge(&request.code);
            let result = CompileResult {
                success,
                output: if success { None } else { Some(b"scripted failure".to_vec()) },
            };
            if protocol::write_frame(&mut &stream, &protocol::encode(&result)).is_err() {
                return;
            }
        }
    })
}

/// A worker that registers, swallows `requests_before_exit` requests without
/// answering any of them, and drops the connection.
pub fn spawn_vanishing_worker(
    addr: SocketAddr,
    lang: Language,
    requests_before_exit: usize,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let stream = TcpStream::connect(addr).unwrap();
        register(&stream, lang);
        for _ in 0..requests_before_exit {
            if protocol::read_frame(&mut &stream).is_err() {
                return;
            }
        }
    })
}

/// Poll `cond` until it holds, panicking after a generous deadline. Used for
/// state that settles asynchronously (registration, disconnect cleanup).
pub fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(10));
    }
}
