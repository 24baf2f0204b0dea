use clap::Parser;
use std::io;
use std::panic::{self, PanicHookInfo};
use std::sync::Arc;
use thermo_monitor::app::{Options, RunError, run_with_io};
use thermo_monitor::transport::bluer::BluerTransport;
use tokio::io::BufReader;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

/// Open the Bluetooth adapter and run the monitor on stdin/stdout/stderr.
///
/// # Errors
/// Returns `RunError` if Bluetooth initialization fails or the session ends abnormally
async fn run(options: Options) -> Result<(), RunError> {
    let transport = Arc::new(BluerTransport::new().await?);
    let input = BufReader::new(tokio::io::stdin());

    let mut out = io::stdout();
    let mut err = io::stderr();
    run_with_io(options, transport, input, &mut out, &mut err).await
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd, Telegraf execd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();

    let default_filter = if options.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .init();

    match run(options).await {
        Ok(_) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            eprintln!("error: {}", why);
            std::process::exit(EXIT_ERROR);
        }
    }
}
