use std::io::BufRead;
use std::process::ExitCode;

use clap::Parser;
use tn_cli::config::ClientArgs;
use tn_cli::{CliError, Session};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Forward stdin lines from a plain thread so a pending read never holds up
/// runtime shutdown.
fn stdin_lines() -> ReceiverStream<std::io::Result<String>> {
    let (tx, rx) = mpsc::channel(1);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    ReceiverStream::new(rx)
}

async fn run(args: ClientArgs) -> Result<(), CliError> {
    let cookies = args.cookie_store();
    let login = args.startup_login(&cookies).map(Into::into);

    let client = tn_cli::connect_with_timeout(&args.host, args.connect_timeout()).await?;
    tracing::info!(host = %args.host, "Connected");

    Session::new(cookies).run(client, login, stdin_lines()).await
}

#[tokio::main]
async fn main() -> ExitCode {
    tn_cli::telemetry::init();

    let args = ClientArgs::parse();
    println!(
        "nanfengpo command line client. Version {}.",
        env!("CARGO_PKG_VERSION")
    );
    println!("Server '{}'", args.host);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Session terminated");
            println!("{e}");
            ExitCode::FAILURE
        }
    }
}
