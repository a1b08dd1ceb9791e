// intersection_main.rs
use signal_mesh::communication::amqp::{spawn_consumer, AmqpTransport};
use signal_mesh::communication::transport::Transport;
use signal_mesh::config::NetworkConfig;
use signal_mesh::control_system::intersection_agent::IntersectionAgent;
use signal_mesh::global_variables::{AMQP_URL, AMQP_URL_ENV, MAILBOX_CAPACITY, OBSERVER_ADDRESS};
use signal_mesh::simulation_engine::intersection::IntersectionId;
use std::error::Error;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() != 2 {
        return Err("usage: intersection_main <config.json> <intersection_id>".into());
    }
    let network = NetworkConfig::from_json_file(&args[0])?;
    let id = IntersectionId::new(args[1].as_str());
    let config = network
        .intersection(&id)
        .cloned()
        .ok_or_else(|| format!("{} is not in {}", id, args[0]))?;

    let url = std::env::var(AMQP_URL_ENV).unwrap_or_else(|_| AMQP_URL.to_string());
    let mut addresses: Vec<String> = config.neighbors.iter().map(|n| n.to_string()).collect();
    addresses.push(id.to_string());
    addresses.push(OBSERVER_ADDRESS.to_string());

    let transport = Arc::new(AmqpTransport::connect(&url, &addresses)?);
    let mailbox = spawn_consumer(&url, id.as_str(), MAILBOX_CAPACITY)?;
    let shared: Arc<dyn Transport> = transport.clone();
    let handle = IntersectionAgent::new(config, shared, mailbox)?.spawn();
    println!("Intersection {} running. Press Ctrl+C to stop.", id);

    tokio::signal::ctrl_c().await?;
    let state = handle.shutdown().await?;
    println!(
        "{} stopped: {} cycles, {} vehicles processed",
        state.id, state.cycle_count, state.total_vehicles_processed
    );
    transport.close()?;
    Ok(())
}
