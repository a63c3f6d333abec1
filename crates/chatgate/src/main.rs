use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "chatgate", version, about = "Chat-completion gateway: context augmentation + LLM provider dispatch")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP gateway.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value_t = 8787, env = "CHATGATE_PORT")]
        port: u16,

        /// Address to bind.
        #[arg(long, default_value = "127.0.0.1", env = "CHATGATE_BIND")]
        bind: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { port, bind } => {
            let state = chatgate::server::build_state()?;
            let app = chatgate::server::router(state);
            let listener = tokio::net::TcpListener::bind((bind.as_str(), port)).await?;
            tracing::info!(%bind, port, "chatgate listening");
            axum::serve(listener, app).await?;
        }
    }
    Ok(())
}
