use std::{path::PathBuf, process, sync::Arc};

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use rill_server::{start_server, ServerOptions};
use rill_store::memory::MemoryStreamStore;
use rill_store::sqlite::{SqliteStoreOptions, SqliteStreamStore};
use rill_store::StreamStore;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Rill - durable streams server", long_about = None)]
struct Opts {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the streams server
    Serve(ServeCommand),
}

#[derive(Parser, Debug)]
struct ServeCommand {
    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on (0 for auto-assign)
    #[arg(long, default_value_t = 4437)]
    port: u16,

    /// SQLite database file for persistent storage.
    /// Streams are held in memory when omitted.
    #[arg(long = "data-path")]
    data_path: Option<PathBuf>,

    /// Long-poll timeout in milliseconds
    #[arg(long = "long-poll-timeout-ms", default_value_t = 30_000)]
    long_poll_timeout_ms: u64,
}

impl ServeCommand {
    async fn execute(self) -> anyhow::Result<()> {
        let store: Arc<dyn StreamStore> = match &self.data_path {
            Some(path) => SqliteStreamStore::open(SqliteStoreOptions {
                path: Some(path.clone()),
            })
            .with_context(|| format!("failed to open database at {}", path.display()))?,
            None => MemoryStreamStore::new(),
        };

        let options = ServerOptions {
            host: self.host,
            port: self.port,
            long_poll_timeout_ms: self.long_poll_timeout_ms,
            ..Default::default()
        };

        start_server(store, options)
            .await
            .context("server exited with an error")
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let opts = match Opts::try_parse() {
        Ok(opts) => opts,
        Err(e) => {
            let _ = e.print();
            process::exit(e.exit_code());
        }
    };

    let result = match opts.command {
        Command::Serve(cmd) => cmd.execute().await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
