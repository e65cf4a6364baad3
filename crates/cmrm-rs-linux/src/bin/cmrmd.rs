// crates/cmrm-rs-linux/src/bin/cmrmd.rs

//! Resource manager daemon entry point.

use cmrm_rs_linux::{bootstrap, DaemonConfig};
use log::error;
use std::path::PathBuf;
use std::process::ExitCode;

fn usage() -> ExitCode {
    eprintln!("usage: cmrmd --config <path>");
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    env_logger::init();

    let mut config_path: Option<PathBuf> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => match args.next() {
                Some(path) => config_path = Some(PathBuf::from(path)),
                None => return usage(),
            },
            _ => return usage(),
        }
    }
    let Some(config_path) = config_path else {
        return usage();
    };

    let config = match DaemonConfig::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            error!("{}", err);
            return ExitCode::FAILURE;
        }
    };

    match bootstrap::start(&config) {
        Ok(daemon) => {
            daemon.wait();
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("bootstrap failed: {}", err);
            ExitCode::FAILURE
        }
    }
}
