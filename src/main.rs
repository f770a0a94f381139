//! SheetSync Native Messaging Host
//!
//! Helper process launched by the browser extension. Speaks the native
//! messaging protocol over stdin/stdout and syncs CSV exports into a git
//! repository: clone on Initialize, branch/commit/push on Apply.

mod channel;
mod git;
mod server;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use server::Host;

/// SheetSync Native Messaging Host
///
/// Syncs spreadsheet CSV exports into a git repository on behalf of the
/// browser extension that launches it.
#[derive(Parser, Debug)]
#[command(name = "sheetsync-host")]
#[command(version, about, long_about = None)]
struct Args {
    /// Origin of the extension that launched us (passed by the browser)
    origin: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // stdout carries the framed protocol, so all logging goes to stderr
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    info!("SheetSync host v{}", env!("CARGO_PKG_VERSION"));

    if let Some(origin) = &args.origin {
        info!("Launched by extension {}", origin);
    }

    let mut host = Host::new();
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    host.run(&mut stdin.lock(), &mut stdout.lock())?;

    info!("Host shutdown complete");
    Ok(())
}
