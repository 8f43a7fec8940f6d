use clap::Parser;
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info};

use tapline_ports::{ForwardTarget, ListenPort, PortRegistry, PortType};
use tapline_relay::{PumpTimeouts, Tunnel};

#[derive(Debug, Parser)]
#[command(name = "tapline-cli")]
struct Cli {
    /// Local port to accept connections on.
    #[arg(long = "listen")]
    listen: u16,
    /// Forward target as host:port.
    #[arg(long = "target")]
    target: String,
    #[arg(long = "host", default_value = "127.0.0.1")]
    host: String,
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let cli = Cli::parse();
    tracing_subscriber::fmt::init();

    let forward = parse_target(&cli.target)?;
    let record = ListenPort::new(cli.listen, PortType::Forwarder, forward);

    let (mut registry, _changes) = PortRegistry::new();
    registry
        .create(record.clone())
        .map_err(|err| err.to_string())?;

    serve(&cli.host, record).await
}

async fn serve(host: &str, record: ListenPort) -> Result<(), String> {
    let listener = TcpListener::bind((host, record.port))
        .await
        .map_err(|err| err.to_string())?;
    info!(port = record.port, forward = %record.forward, "forwarder listening");

    loop {
        let (client, peer) = listener.accept().await.map_err(|err| err.to_string())?;
        info!(%peer, "accepted connection");
        let forward = record.forward.clone();
        tokio::spawn(async move {
            if let Err(err) = relay_connection(client, forward).await {
                error!(error = %err, "connection failed");
            }
        });
    }
}

async fn relay_connection(client: TcpStream, forward: ForwardTarget) -> Result<(), String> {
    let server = TcpStream::connect((forward.host.as_str(), forward.port))
        .await
        .map_err(|err| err.to_string())?;

    let (upstream, downstream) = Tunnel::pumps_for(client, server, PumpTimeouts::default());
    let tunnel = Tunnel::start(upstream, downstream);
    let (up, down) = tunnel.join().await.map_err(|err| err.to_string())?;
    info!(
        client_bytes = up.bytes_forwarded,
        server_bytes = down.bytes_forwarded,
        "connection finished"
    );
    Ok(())
}

fn parse_target(target: &str) -> Result<ForwardTarget, String> {
    let (host, port) = target
        .rsplit_once(':')
        .ok_or_else(|| format!("invalid target {target}, expected host:port"))?;
    let port = port.parse::<u16>().map_err(|err| err.to_string())?;
    Ok(ForwardTarget::new(host, port))
}
