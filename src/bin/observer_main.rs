// observer_main.rs
use signal_mesh::communication::amqp::spawn_consumer;
use signal_mesh::config::NetworkConfig;
use signal_mesh::global_variables::{AMQP_URL, AMQP_URL_ENV, MAILBOX_CAPACITY, OBSERVER_ADDRESS, REPORT_CSV};
use signal_mesh::monitoring::observer_agent::ObserverAgent;
use std::error::Error;
use tokio::time::Instant;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .ok_or("usage: observer_main <config.json>")?;
    let network = NetworkConfig::from_json_file(&path)?;

    let url = std::env::var(AMQP_URL_ENV).unwrap_or_else(|_| AMQP_URL.to_string());
    let mailbox = spawn_consumer(&url, OBSERVER_ADDRESS, MAILBOX_CAPACITY)?;
    let handle = ObserverAgent::for_network(&network, mailbox)?
        .with_csv(REPORT_CSV)
        .spawn();
    println!(
        "Observer watching {} intersections, logging to {}. Press Ctrl+C to stop.",
        network.intersections.len(),
        REPORT_CSV
    );

    tokio::signal::ctrl_c().await?;
    let observer = handle.shutdown().await?;
    println!("{}", observer.export_json(Instant::now().into_std())?);
    Ok(())
}
