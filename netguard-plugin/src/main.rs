use std::io::Read;
use std::process::ExitCode;

use clap::Parser;
use netguard_plugin::add::add;
use netguard_plugin::check::check;
use netguard_plugin::config::{Args, Command};
use netguard_plugin::delete::delete;
use netguard_plugin::types::Input;
use netguard_plugin::version::version;
use netguard_plugin::{CNI_VERSION, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const LOG_DIR: &str = "/var/log/netguard";

fn main() -> ExitCode {
    let _guard = setup_logging();
    let args = Args::parse();
    let resp = match args.command {
        Command::Add => match read_input() {
            Ok(input) => add(&args, input),
            Err(e) => e.into_response(CNI_VERSION),
        },
        Command::Delete => match read_input() {
            Ok(input) => delete(&args, input),
            Err(e) => e.into_response(CNI_VERSION),
        },
        Command::Check => match read_input() {
            Ok(input) => check(&args, input),
            Err(e) => e.into_response(CNI_VERSION),
        },
        Command::Version => version(),
    };

    resp.write_out()
}

fn read_input() -> Result<Input> {
    let mut buf = String::new();
    std::io::stdin().read_to_string(&mut buf)?;
    Input::parse(&buf)
}

// stdout belongs to the runtime, so logs go to a file and fall back to
// stderr when the log directory is not writable.
fn setup_logging() -> Option<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "netguard_plugin=info".into());
    match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("cni.log")
        .build(LOG_DIR)
    {
        Ok(file_appender) => {
            let (nonblocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(nonblocking))
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
            None
        }
    }
}
