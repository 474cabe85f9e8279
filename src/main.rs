use std::env;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use env_logger::{Builder, Env};
use log::error;

use process_cloner::{ExitOutcome, LaunchConfig, LaunchError, Launcher};

/// Runs `$callback_executable` in fresh namespaces, passing on only `packed_torigoya_content`
/// and `debug_tag`. Takes no arguments.
#[derive(Debug, Parser)]
#[command(
    name = "process_cloner",
    disable_help_flag = true,
    disable_version_flag = true
)]
struct Cli {}

fn main() -> ExitCode {
    init_logger();

    match run() {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitOutcome, LaunchError> {
    Cli::try_parse().map_err(|e| LaunchError::Invocation(e.to_string().trim_end().to_owned()))?;
    // clap swallows a bare `--`, so count what the kernel actually passed us.
    let argc = env::args_os().len();
    if argc != 1 {
        let msg = format!("expected no arguments (argc of 1), got argc of {}", argc);
        return Err(LaunchError::Invocation(msg));
    }
    let config = LaunchConfig::from_env()?;
    Launcher::new(config).launch()?.into_result()
}

fn init_logger() {
    let env = Env::default().filter_or("RUST_LOG", "info");
    Builder::from_env(env)
        .format(|buf, record| {
            writeln!(
                buf,
                "{:<5} [process_cloner {}] {}",
                record.level(),
                std::process::id(),
                record.args()
            )
        })
        .init();
}
