//! kiwibnc, an IRC bouncer for many clients.

#![forbid(unsafe_code)]
#![warn(clippy::all, rust_2018_idioms)]

use kiwibnc::Config;
use std::{env, process};
use tokio::runtime as rt;

pub fn main() {
    if cfg!(debug_assertions) {
        env::set_var("RUST_BACKTRACE", "1");
    }

    let log_settings = env_logger::Env::new()
        .filter_or("KIWIBNC_LOG", "kiwibnc=debug")
        .write_style("KIWIBNC_LOG_STYLE");
    env_logger::Builder::from_env(log_settings)
        .format(|buf, r| {
            use std::io::Write;
            writeln!(buf, "[{:<5} {}] {}", r.level(), r.target(), r.args())
        })
        .init();

    let config_path = parse_args();
    let cfg = Config::from_file(&config_path).unwrap_or_else(|err| {
        log::error!("Failed to read {:?}: {}", config_path, err);
        process::exit(1);
    });

    let runtime = create_runtime(cfg.workers);
    runtime.block_on(kiwibnc::run(cfg));
}

/// Creates a tokio runtime with the given number of worker threads.
fn create_runtime(workers: usize) -> rt::Runtime {
    let mut builder = rt::Builder::new_multi_thread();

    if workers != 0 {
        builder.worker_threads(workers);
    }

    builder.enable_all().build().unwrap_or_else(|err| {
        log::error!("Failed to start the tokio runtime: {}", err);
        process::exit(1);
    })
}

fn parse_args() -> String {
    let mut args = env::args();

    let program = args.next().unwrap_or_else(|| "kiwibnc".to_owned());

    let config_path = args.next().unwrap_or_else(|| {
        eprintln!("Usage: {} CONFIG_FILE", program);
        process::exit(1);
    });

    if config_path == "-h" || config_path == "--help" {
        eprintln!("kiwibnc {}", env!("CARGO_PKG_VERSION"));
        eprintln!("Usage: {} CONFIG_FILE", program);
        process::exit(1);
    } else if config_path == "-v" || config_path == "--version" {
        eprintln!("kiwibnc {}", env!("CARGO_PKG_VERSION"));
        process::exit(1);
    }

    config_path
}
