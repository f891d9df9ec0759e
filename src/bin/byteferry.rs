//! Process wiring for the byteferry server and client.

use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

use byteferry::{CancelSource, FileClient, FileServer, TransportKind};

#[derive(Debug, Parser)]
#[command(name = "byteferry", version, about = "Stream files over TCP or UDP")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve files from a store directory until interrupted.
    Serve {
        /// Transport kind: stream/tcp or datagram/udp.
        #[arg(long, default_value = "stream")]
        transport: TransportKind,

        /// Address to listen on.
        #[arg(long, default_value = "0.0.0.0:3000")]
        listen: String,

        /// Directory files are served from.
        #[arg(long, default_value = "./serverstore")]
        store: Utf8PathBuf,
    },

    /// Fetch a file (stream) or capture synthetic datagrams (datagram).
    Fetch {
        /// Transport kind: stream/tcp or datagram/udp.
        #[arg(long, default_value = "stream")]
        transport: TransportKind,

        /// Server address to dial.
        #[arg(long, default_value = "127.0.0.1:3000")]
        addr: String,

        /// Directory received files are written into.
        #[arg(long, default_value = "./clientstore")]
        output: Utf8PathBuf,

        /// File to request (ignored by the datagram transport).
        #[arg(default_value = "sample.txt")]
        file: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        Command::Serve {
            transport,
            listen,
            store,
        } => {
            let server = Arc::new(FileServer::new(store));
            let interrupt = Arc::clone(&server);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupt received, draining");
                    interrupt.stop();
                }
            });

            let source = CancelSource::new();
            server.start(transport, &listen, source.token()).await?;
        }
        Command::Fetch {
            transport,
            addr,
            output,
            file,
        } => {
            let source = CancelSource::new();
            let token = source.token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    source.cancel();
                }
            });

            let client = FileClient::new(output);
            let bytes = client.start(transport, &addr, &file, token).await?;
            println!("received {bytes} bytes");
        }
    }

    Ok(())
}
