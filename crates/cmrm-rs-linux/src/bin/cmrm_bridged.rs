// crates/cmrm-rs-linux/src/bin/cmrm_bridged.rs

//! Host notification bridge daemon entry point.

use cmrm_rs_linux::bridge::{BridgeDaemon, BridgePaths};
use log::error;
use std::path::PathBuf;
use std::process::ExitCode;

fn usage() -> ExitCode {
    eprintln!("usage: cmrm-bridged --clients <socket> --notifier <socket>");
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    env_logger::init();

    let mut clients: Option<PathBuf> = None;
    let mut notifier: Option<PathBuf> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--clients" => match args.next() {
                Some(path) => clients = Some(PathBuf::from(path)),
                None => return usage(),
            },
            "--notifier" => match args.next() {
                Some(path) => notifier = Some(PathBuf::from(path)),
                None => return usage(),
            },
            _ => return usage(),
        }
    }
    let (Some(clients), Some(notifier)) = (clients, notifier) else {
        return usage();
    };

    let paths = BridgePaths { clients, notifier };
    let daemon = match BridgeDaemon::bind(&paths) {
        Ok(daemon) => daemon,
        Err(err) => {
            error!("cannot bind bridge sockets: {}", err);
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = daemon.run() {
        error!("bridge daemon stopped: {}", err);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
