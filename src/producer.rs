//! The producer: registration handling, per-language worker rosters, request
//! dispatch, and response correlation.
//!
//! The producer owns the listening socket. Every accepted connection gets a
//! fresh opaque identity and a dedicated reader thread, so frames from one
//! worker are observed in the order that worker sent them. Workers answer
//! requests strictly in order, which makes the head of a worker's in-flight
//! queue the token of its next response. No job id travels on the wire.

use std::collections::{HashMap, VecDeque};
use std::convert::TryFrom;
use std::fmt;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::compiler::Language;
use crate::errors::*;
use crate::protocol::{self, CompileRequest, CompileResult, RegisterCompilerService};

/// Port the producer listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 9002;

/// Upper bound on the source text accepted by `dispatch`.
pub const MAX_CODE_LEN: usize = 1024 * 1024;

/// Transport-assigned identity of one connected worker. Unique per live
/// connection; a worker that reconnects is a brand-new identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WorkerId(String);

impl WorkerId {
    fn fresh() -> WorkerId {
        WorkerId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque handle returned from `dispatch`, used to pair results with
/// requests. The digest input includes the worker identity, so the same
/// source dispatched to two workers yields two distinct tokens.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Token(String);

impl Token {
    fn for_job(id: &WorkerId, msg: &[u8]) -> Token {
        let mut input = Vec::with_capacity(id.as_str().len() + msg.len());
        input.extend_from_slice(id.as_str().as_bytes());
        input.extend_from_slice(msg);
        Token(format!("{:x}", md5::compute(&input)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One completed job as read from the result channel.
#[derive(Clone, Debug)]
pub struct JobResult {
    pub token: Token,
    pub success: bool,
    /// Compiler diagnostics on failure, empty on success.
    pub output: Vec<u8>,
}

#[derive(Default)]
struct Routes {
    rosters: HashMap<Language, VecDeque<WorkerId>>,
    inflight: HashMap<WorkerId, VecDeque<Token>>,
    /// Write half of each live worker connection, keyed like `inflight`.
    handles: HashMap<WorkerId, TcpStream>,
}

struct Shared {
    routes: Mutex<Routes>,
    roster_changed: Condvar,
    results_tx: Mutex<mpsc::Sender<JobResult>>,
    results_rx: Mutex<mpsc::Receiver<JobResult>>,
}

/// The client-facing surface. All methods take `&self`; any number of caller
/// threads may dispatch and drain results concurrently.
pub struct Producer {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
}

impl Producer {
    /// Bind the listener and start accepting worker connections.
    pub fn bind<A: ToSocketAddrs>(addr: A) -> Result<Producer> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            routes: Mutex::new(Routes::default()),
            roster_changed: Condvar::new(),
            results_tx: Mutex::new(tx),
            results_rx: Mutex::new(rx),
        });
        let accept_shared = shared.clone();
        thread::Builder::new()
            .name("producer-accept".to_owned())
            .spawn(move || accept_loop(listener, accept_shared))?;
        info!("producer listening on {}", local_addr);
        Ok(Producer { shared, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send `code` to a worker registered for `lang` and return the token its
    /// eventual result will carry.
    pub fn dispatch(&self, lang: Language, code: &str) -> Result<Token> {
        if code.len() > MAX_CODE_LEN {
            bail!(ErrorKind::RequestTooLarge(code.len(), MAX_CODE_LEN));
        }
        let msg = protocol::encode(&CompileRequest { code: code.to_owned() });

        // The send and the in-flight push happen under the one routing lock,
        // so queue order is exactly wire order.
        let mut routes = self.shared.routes.lock().unwrap();
        let id = routes
            .rosters
            .get(&lang)
            .and_then(|roster| roster.front())
            .cloned()
            .ok_or_else(|| Error::from(ErrorKind::NoWorkerAvailable(lang)))?;
        let token = Token::for_job(&id, &msg);
        {
            let stream = routes.handles.get(&id).expect("roster entry without a handle");
            protocol::write_frame(&mut &*stream, &msg)?;
        }
        routes
            .inflight
            .get_mut(&id)
            .expect("roster entry without an in-flight queue")
            .push_back(token.clone());
        debug!("dispatched {} job {} to worker {}", lang, token, id);
        Ok(token)
    }

    /// Block until a worker for `lang` is registered.
    pub fn await_worker(&self, lang: Language) {
        let mut routes = self.shared.routes.lock().unwrap();
        while !has_worker(&routes, lang) {
            routes = self.shared.roster_changed.wait(routes).unwrap();
        }
    }

    /// Like `await_worker`, giving up after `timeout`. Returns whether a
    /// worker is now available.
    pub fn await_worker_timeout(&self, lang: Language, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut routes = self.shared.routes.lock().unwrap();
        while !has_worker(&routes, lang) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .shared
                .roster_changed
                .wait_timeout(routes, deadline - now)
                .unwrap();
            routes = guard;
        }
        true
    }

    /// Block for the next completed job, in completion order across all
    /// workers.
    pub fn next_result(&self) -> Result<JobResult> {
        self.shared
            .results_rx
            .lock()
            .unwrap()
            .recv()
            .map_err(|_| "result channel closed".into())
    }

    /// Like `next_result`, returning `Ok(None)` if nothing completes within
    /// `timeout`.
    pub fn next_result_timeout(&self, timeout: Duration) -> Result<Option<JobResult>> {
        match self.shared.results_rx.lock().unwrap().recv_timeout(timeout) {
            Ok(result) => Ok(Some(result)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err("result channel closed".into()),
        }
    }

    /// Number of live workers registered for `lang`.
    pub fn registered_workers(&self, lang: Language) -> usize {
        let routes = self.shared.routes.lock().unwrap();
        routes.rosters.get(&lang).map_or(0, |roster| roster.len())
    }
}

fn has_worker(routes: &Routes, lang: Language) -> bool {
    routes.rosters.get(&lang).map_or(false, |roster| !roster.is_empty())
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    for conn in listener.incoming() {
        match conn {
            Ok(stream) => {
                let id = WorkerId::fresh();
                match stream.peer_addr() {
                    Ok(peer) => info!("accepted worker connection {} from {}", id, peer),
                    Err(_) => info!("accepted worker connection {}", id),
                }
                let conn_shared = shared.clone();
                let spawned = thread::Builder::new()
                    .name(format!("producer-conn-{}", id))
                    .spawn(move || serve_worker(stream, id, conn_shared));
                if let Err(e) = spawned {
                    error!("failed to spawn connection thread: {}", e);
                }
            }
            Err(e) => error!("accept failed: {}", e),
        }
    }
}

/// Per-connection loop: one registration frame, then results until the
/// worker goes away.
fn serve_worker(stream: TcpStream, id: WorkerId, shared: Arc<Shared>) {
    let results_tx = shared.results_tx.lock().unwrap().clone();

    let frame = match protocol::read_frame(&mut &stream) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("worker {} vanished before registering: {}", id, e);
            return;
        }
    };
    let reg: RegisterCompilerService = match protocol::decode(&frame) {
        Ok(reg) => reg,
        Err(e) => {
            warn!("dropping connection {}: unreadable registration: {}", id, e);
            return;
        }
    };
    let lang = match Language::try_from(reg.lang) {
        Ok(lang) => lang,
        Err(_) => {
            warn!("dropping connection {}: unknown language tag {}", id, reg.lang);
            return;
        }
    };

    let writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(e) => {
            error!("failed to clone stream for worker {}: {}", id, e);
            return;
        }
    };
    {
        let mut routes = shared.routes.lock().unwrap();
        routes
            .rosters
            .entry(lang)
            .or_insert_with(VecDeque::new)
            .push_back(id.clone());
        routes.inflight.insert(id.clone(), VecDeque::new());
        routes.handles.insert(id.clone(), writer);
        shared.roster_changed.notify_all();
    }
    info!(
        "registered {} worker {} (version {:?}, arch {:?})",
        lang, id, reg.version, reg.procarch
    );

    loop {
        let frame = match protocol::read_frame(&mut &stream) {
            Ok(frame) => frame,
            Err(e) => {
                info!("worker {} disconnected: {}", id, e);
                break;
            }
        };
        let result: CompileResult = match protocol::decode(&frame) {
            Ok(result) => result,
            Err(e) => {
                // Positional correlation is broken once a frame is
                // unreadable; drop the connection and fail what's queued.
                warn!("unreadable result from worker {}: {}", id, e);
                break;
            }
        };
        let token = {
            let mut routes = shared.routes.lock().unwrap();
            routes.inflight.get_mut(&id).and_then(|queue| queue.pop_front())
        };
        match token {
            Some(token) => {
                trace!("worker {} completed job {}", id, token);
                let _ = results_tx.send(JobResult {
                    token,
                    success: result.success,
                    output: result.output.unwrap_or_default(),
                });
            }
            None => warn!("unsolicited result from worker {}", id),
        }
    }

    unregister(&shared, &id, lang, &results_tx);
}

/// Remove a dead worker from its roster and complete everything still queued
/// on it as a failure.
fn unregister(shared: &Shared, id: &WorkerId, lang: Language, results_tx: &mpsc::Sender<JobResult>) {
    let orphaned = {
        let mut routes = shared.routes.lock().unwrap();
        if let Some(roster) = routes.rosters.get_mut(&lang) {
            roster.retain(|entry| entry != id);
        }
        routes.handles.remove(id);
        routes.inflight.remove(id).unwrap_or_default()
    };
    if !orphaned.is_empty() {
        info!("failing {} in-flight jobs from dead worker {}", orphaned.len(), id);
    }
    for token in orphaned {
        let _ = results_tx.send(JobResult {
            token,
            success: false,
            output: b"worker disconnected before completing the job".to_vec(),
        });
    }
}
