//! Command-line argument handling for the `remotec` binary.

use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use std::net::{SocketAddr, ToSocketAddrs};

use crate::compiler::Language;
use crate::errors::*;
use crate::producer::DEFAULT_PORT;

/// What the binary was asked to do.
pub enum Command {
    /// Run the routing daemon.
    Producer { bind: SocketAddr },
    /// Run a worker daemon advertising one language.
    Worker {
        lang: Language,
        connect: SocketAddr,
        version: Option<String>,
        procarch: Option<String>,
    },
}

fn get_app() -> App<'static, 'static> {
    App::new("remotec")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Remote compilation service")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .subcommand(
            SubCommand::with_name("producer")
                .about("Accept worker registrations and route compile jobs to them")
                .arg(
                    Arg::with_name("bind")
                        .long("bind")
                        .value_name("ADDR")
                        .takes_value(true)
                        .help("Address to listen on (default 127.0.0.1:9002)"),
                ),
        )
        .subcommand(
            SubCommand::with_name("worker")
                .about("Serve compile jobs for one language")
                .arg(
                    Arg::with_name("lang")
                        .long("lang")
                        .value_name("LANG")
                        .takes_value(true)
                        .required(true)
                        .possible_values(&["c", "cpp", "rust"])
                        .help("Language this worker's toolchain compiles"),
                )
                .arg(
                    Arg::with_name("connect")
                        .long("connect")
                        .value_name("ADDR")
                        .takes_value(true)
                        .help("Producer address (default 127.0.0.1:9002)"),
                )
                .arg(
                    Arg::with_name("toolchain-version")
                        .long("toolchain-version")
                        .value_name("VERSION")
                        .takes_value(true)
                        .help("Toolchain version string to advertise"),
                )
                .arg(
                    Arg::with_name("procarch")
                        .long("procarch")
                        .value_name("ARCH")
                        .takes_value(true)
                        .help("Processor architecture to advertise"),
                ),
        )
}

fn resolve(addr: &str) -> Result<SocketAddr> {
    addr.to_socket_addrs()?
        .next()
        .ok_or_else(|| format!("{} resolved to no addresses", addr).into())
}

fn default_addr() -> String {
    format!("127.0.0.1:{}", DEFAULT_PORT)
}

/// Parse the process arguments into a `Command`.
pub fn parse() -> Result<Command> {
    let matches = get_app().get_matches();
    match matches.subcommand() {
        ("producer", Some(sub)) => parse_producer(sub),
        ("worker", Some(sub)) => parse_worker(sub),
        _ => unreachable!("clap enforces a subcommand"),
    }
}

fn parse_producer(matches: &ArgMatches) -> Result<Command> {
    let bind = resolve(matches.value_of("bind").unwrap_or(&default_addr()))?;
    Ok(Command::Producer { bind })
}

fn parse_worker(matches: &ArgMatches) -> Result<Command> {
    let name = matches.value_of("lang").expect("lang is required");
    let lang = Language::from_name(name)
        .ok_or_else(|| Error::from(format!("unknown language {:?}", name)))?;
    let connect = resolve(matches.value_of("connect").unwrap_or(&default_addr()))?;
    Ok(Command::Worker {
        lang,
        connect,
        version: matches.value_of("toolchain-version").map(str::to_owned),
        procarch: matches.value_of("procarch").map(str::to_owned),
    })
}
