use std::process::ExitCode;

use canopy::cli::{self, Cli};
use env_logger::Env;

fn main() -> ExitCode {
    let cli = Cli::parse_args();

    // --debug raises the default level; RUST_LOG still wins.
    let level = if cli.debug { "debug" } else { "warn" };
    env_logger::init_from_env(Env::default().filter_or("RUST_LOG", level));

    match cli::run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}
