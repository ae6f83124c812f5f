//! Execution of the parsed command line.

use std::thread;
use std::time::Duration;

use crate::cmdline::Command;
use crate::compiler::Language;
use crate::errors::*;
use crate::producer::Producer;
use crate::worker::Worker;

const STATUS_INTERVAL: Duration = Duration::from_secs(60);

pub fn run_command(cmd: Command) -> Result<()> {
    match cmd {
        Command::Producer { bind } => {
            let producer = Producer::bind(bind)?;
            // The routing threads do all the work; this thread just keeps
            // the process alive and gives operators a periodic sign of life.
            loop {
                thread::sleep(STATUS_INTERVAL);
                for lang in [Language::C, Language::Cpp, Language::Rust] {
                    let n = producer.registered_workers(lang);
                    if n > 0 {
                        debug!("{} {} worker(s) registered", n, lang);
                    }
                }
            }
        }
        Command::Worker { lang, connect, version, procarch } => {
            let mut worker = Worker::new(lang, connect);
            if let Some(version) = version {
                worker = worker.version(&version);
            }
            if let Some(procarch) = procarch {
                worker = worker.procarch(&procarch);
            }
            worker.run()
        }
    }
}
