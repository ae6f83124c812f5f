#[macro_use]
extern crate log;

use remotec::cmdline;
use remotec::commands;

fn main() {
    env_logger::init();
    std::process::exit(match cmdline::parse().and_then(commands::run_command) {
        Ok(()) => 0,
        Err(e) => {
            error!("remotec: {}", e);
            for cause in e.iter().skip(1) {
                error!("caused by: {}", cause);
            }
            1
        }
    });
}
