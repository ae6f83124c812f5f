//! Language tags and the toolchain driver.
//!
//! Each supported language maps to one external compiler binary through a
//! fixed table. The driver writes the source into a fresh scratch directory,
//! invokes `<binary> <src> -o <out>`, and reports the exit status together
//! with the captured diagnostics. Compile failures are ordinary values, not
//! errors; only environment trouble (spawn failure, I/O) escapes as `Err`.

use std::fmt;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tempdir::TempDir;

use crate::errors::*;

/// Languages a worker can advertise. The numeric values are the on-wire
/// protobuf enumeration and must not be renumbered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Language {
    C = 0,
    Cpp = 1,
    /// Reserved: advertised in the protocol but no driver exists yet.
    Python = 2,
    Rust = 3,
}

/// One row of the driver table.
pub struct DriverConfig {
    pub binary: &'static str,
    pub suffix: &'static str,
    pub out_name: &'static str,
}

const C_DRIVER: DriverConfig = DriverConfig { binary: "gcc", suffix: ".c", out_name: "b.out" };
const CPP_DRIVER: DriverConfig = DriverConfig { binary: "g++", suffix: ".cpp", out_name: "b.out" };
const RUST_DRIVER: DriverConfig = DriverConfig { binary: "rustc", suffix: ".rs", out_name: "out" };

impl Language {
    /// The toolchain entry for this language, if one is configured.
    pub fn driver(self) -> Option<&'static DriverConfig> {
        match self {
            Language::C => Some(&C_DRIVER),
            Language::Cpp => Some(&CPP_DRIVER),
            Language::Rust => Some(&RUST_DRIVER),
            Language::Python => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Python => "python",
            Language::Rust => "rust",
        }
    }

    /// Parse a command-line spelling of a language tag.
    pub fn from_name(name: &str) -> Option<Language> {
        match name.to_lowercase().as_str() {
            "c" => Some(Language::C),
            "cpp" | "c++" | "cxx" => Some(Language::Cpp),
            "python" | "py" => Some(Language::Python),
            "rust" | "rs" => Some(Language::Rust),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What became of one compile attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    Success,
    Failure {
        /// Exit code of the toolchain; `None` if it was killed by a signal
        /// (including our own timeout kill).
        exit_code: Option<i32>,
        /// Captured stdout followed by stderr.
        output: Vec<u8>,
    },
}

pub struct CompileOpts {
    /// Wall-clock budget for the toolchain subprocess.
    pub timeout: Duration,
}

impl Default for CompileOpts {
    fn default() -> CompileOpts {
        CompileOpts { timeout: Duration::from_secs(120) }
    }
}

/// Compile `code` with the toolchain registered for `lang`.
pub fn compile(lang: Language, code: &str) -> Result<CompileOutcome> {
    compile_with(lang, code, &CompileOpts::default())
}

pub fn compile_with(lang: Language, code: &str, opts: &CompileOpts) -> Result<CompileOutcome> {
    let config = lang
        .driver()
        .ok_or_else(|| Error::from(ErrorKind::LanguageUnsupported(lang)))?;
    run_toolchain(config, code, opts)
}

/// Collect a child stream in the background so neither pipe can fill up and
/// wedge the toolchain while we poll for exit.
fn drain<R: Read + Send + 'static>(stream: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut stream = stream;
        let mut buf = Vec::new();
        let _ = stream.read_to_end(&mut buf);
        buf
    })
}

fn run_toolchain(config: &DriverConfig, code: &str, opts: &CompileOpts) -> Result<CompileOutcome> {
    // Scratch directory is removed on every exit path when it drops.
    let scratch = TempDir::new("remotec")?;
    let src_path = scratch.path().join(format!("job{}", config.suffix));
    let out_path = scratch.path().join(config.out_name);
    File::create(&src_path)?.write_all(code.as_bytes())?;

    trace!("running {} {:?} -o {:?}", config.binary, src_path, out_path);
    let mut child = Command::new(config.binary)
        .arg(&src_path)
        .arg("-o")
        .arg(&out_path)
        .current_dir(scratch.path())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .chain_err(|| format!("failed to launch {}", config.binary))?;

    let stdout = drain(child.stdout.take().unwrap());
    let stderr = drain(child.stderr.take().unwrap());

    let deadline = Instant::now() + opts.timeout;
    let mut timed_out = false;
    let status: ExitStatus = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            warn!("{} exceeded its {:?} budget, killing it", config.binary, opts.timeout);
            let _ = child.kill();
            timed_out = true;
            break child.wait()?;
        }
        thread::sleep(Duration::from_millis(20));
    };

    let mut output = stdout.join().unwrap_or_default();
    output.extend(stderr.join().unwrap_or_default());

    if status.success() && !timed_out {
        let _ = fs::remove_file(&out_path);
        return Ok(CompileOutcome::Success);
    }
    if timed_out {
        output.extend(
            format!("\n{} killed after exceeding {:?} timeout\n", config.binary, opts.timeout)
                .into_bytes(),
        );
    }
    Ok(CompileOutcome::Failure { exit_code: status.code(), output })
}
