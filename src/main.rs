use rendezvous::config::RelayConfig;
use rendezvous::relay::RelayServer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = RelayConfig::from_env();

    println!("   Rendezvous Relay");
    println!("   Binding to {}", config.listen_addr);
    println!("   Press Ctrl+C to stop\n");

    let server = RelayServer::bind(config).await?;
    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
