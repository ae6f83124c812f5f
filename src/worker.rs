//! The worker node: connects to a producer, registers its toolchain, and
//! serves compile requests until the connection dies.
//!
//! Two cooperating activities share the socket. The receiver thread owns the
//! read half and feeds raw frames into a bounded queue; the executor drains
//! that queue, runs the driver, and writes one response per request on the
//! write half. Because the executor is single-threaded and the queue is
//! FIFO, responses leave in exactly the order requests arrived, which is
//! the ordering the producer's positional correlation depends on.

use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::mpsc::{self, SyncSender};
use std::thread;
use std::time::Duration;

use crate::compiler::{self, CompileOutcome, Language};
use crate::errors::*;
use crate::protocol::{self, CompileRequest, CompileResult, RegisterCompilerService};

/// Requests buffered ahead of the executor before TCP backpressure kicks in.
const PENDING_REQUESTS: usize = 32;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

pub struct Worker {
    lang: Language,
    addr: SocketAddr,
    version: String,
    procarch: String,
}

impl Worker {
    pub fn new(lang: Language, addr: SocketAddr) -> Worker {
        Worker {
            lang,
            addr,
            version: "noversion".to_owned(),
            procarch: ::std::env::consts::ARCH.to_owned(),
        }
    }

    /// Advertise a toolchain version string to the producer.
    pub fn version(mut self, version: &str) -> Worker {
        self.version = version.to_owned();
        self
    }

    /// Advertise a processor architecture to the producer.
    pub fn procarch(mut self, procarch: &str) -> Worker {
        self.procarch = procarch.to_owned();
        self
    }

    /// Serve forever, re-dialing and re-registering whenever the producer
    /// connection is lost.
    pub fn run(&self) -> ! {
        loop {
            if let Err(e) = self.run_session() {
                error!("worker session ended: {}", e);
            }
            thread::sleep(RECONNECT_DELAY);
        }
    }

    /// One connection's worth of work: connect, register, then answer every
    /// request in arrival order. Returns when the transport fails.
    pub fn run_session(&self) -> Result<()> {
        let stream = TcpStream::connect(self.addr)
            .chain_err(|| format!("failed to connect to producer at {}", self.addr))?;
        let reg = RegisterCompilerService {
            lang: self.lang as i32,
            version: self.version.clone(),
            procarch: self.procarch.clone(),
        };
        protocol::write_frame(&mut &stream, &protocol::encode(&reg))?;
        info!("registered with {} as a {} worker", self.addr, self.lang);

        let reader = stream.try_clone()?;
        let (frames_tx, frames_rx) = mpsc::sync_channel::<Vec<u8>>(PENDING_REQUESTS);
        let receiver = thread::Builder::new()
            .name("worker-receiver".to_owned())
            .spawn(move || receive_loop(reader, frames_tx))?;

        let mut served = 0u64;
        let outcome: Result<()> = loop {
            let frame = match frames_rx.recv() {
                Ok(frame) => frame,
                // Receiver hit EOF or an I/O error and dropped its sender.
                Err(_) => break Err("connection closed by producer".into()),
            };
            let result = self.serve_one(&frame);
            if let Err(e) = protocol::write_frame(&mut &stream, &protocol::encode(&result)) {
                break Err(e).chain_err(|| "failed to send compile result");
            }
            served += 1;
        };

        let _ = stream.shutdown(Shutdown::Both);
        let _ = receiver.join();
        debug!("session over after {} jobs", served);
        outcome
    }

    /// Handle one raw request frame. Always produces a response, even for
    /// garbage input, so the response stream stays aligned with the request
    /// stream.
    fn serve_one(&self, frame: &[u8]) -> CompileResult {
        let request: CompileRequest = match protocol::decode(frame) {
            Ok(request) => request,
            Err(e) => {
                warn!("rejecting unreadable request: {}", e);
                return CompileResult {
                    success: false,
                    output: Some(e.to_string().into_bytes()),
                };
            }
        };
        debug!("compiling {} bytes of {}", request.code.len(), self.lang);
        match compiler::compile(self.lang, &request.code) {
            Ok(CompileOutcome::Success) => CompileResult { success: true, output: None },
            Ok(CompileOutcome::Failure { exit_code, output }) => {
                info!("compile failed with status {:?}", exit_code);
                CompileResult { success: false, output: Some(output) }
            }
            Err(e) => {
                // Toolchain missing, spawn failure, unsupported language:
                // the worker reports it and keeps serving.
                error!("compiler driver error: {}", e);
                CompileResult {
                    success: false,
                    output: Some(e.to_string().into_bytes()),
                }
            }
        }
    }
}

fn receive_loop(stream: TcpStream, frames_tx: SyncSender<Vec<u8>>) {
    loop {
        let frame = match protocol::read_frame(&mut &stream) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("receiver stopping: {}", e);
                return;
            }
        };
        if frames_tx.send(frame).is_err() {
            // Executor is gone; nothing left to do with requests.
            return;
        }
    }
}
