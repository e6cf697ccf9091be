//! Small CLI that fetches and prints a running caster's sourcetable, useful
//! for smoke-testing a deployment without a full NTRIP client.

use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, level_filters::LevelFilter};
use tracing_subscriber::{fmt::Subscriber as FmtSubscriber, EnvFilter};

/// Fetch the sourcetable from an NTRIP caster
#[derive(Clone, PartialEq, Debug, Parser)]
struct Args {
    /// Caster host name or IP address
    #[clap(long, default_value = "127.0.0.1")]
    host: String,

    /// Caster TCP port
    #[clap(long, default_value_t = 2101)]
    port: u16,

    #[clap(long, default_value = "info")]
    log_level: LevelFilter,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();

    let filter = EnvFilter::from_default_env().add_directive(args.log_level.into());
    let _ = FmtSubscriber::builder()
        .compact()
        .without_time()
        .with_max_level(args.log_level)
        .with_env_filter(filter)
        .try_init();

    debug!(?args, "fetching sourcetable");

    let addr = format!("{}:{}", args.host, args.port);
    let mut stream = TcpStream::connect(&addr).await?;

    let request = format!("GET /sourcetable HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let mut response = String::new();
    stream.read_to_string(&mut response).await?;

    for line in response.lines() {
        info!("{line}");
    }

    Ok(())
}
