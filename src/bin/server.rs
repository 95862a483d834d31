//! `voxd` — the room server binary (spec §4.11, C9/C11).

use clap::Parser;
use voxcore::frame::MAX_FRAME;

/// Host a voice-chat room server.
#[derive(Parser, Debug)]
#[command(name = "voxd", version, about)]
struct Args {
    /// Port to listen on.
    port: u16,

    /// Address to bind the listener to.
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Reject any frame larger than this many bytes.
    #[arg(long, default_value_t = MAX_FRAME)]
    max_frame: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let server = match voxcore::server::run(&args.bind, args.port, args.max_frame).await {
        Ok(server) => server,
        Err(error) => {
            tracing::error!(%error, bind = %args.bind, port = args.port, "failed to bind");
            std::process::exit(1);
        }
    };

    tracing::info!(bind = %args.bind, port = args.port, "voxd listening");
    let _ = server;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    Ok(())
}
