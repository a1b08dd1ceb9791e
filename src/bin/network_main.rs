// network_main.rs
use signal_mesh::config::{NetworkConfig, Scenario};
use signal_mesh::global_variables::{REPORT_CSV, REPORT_SVG};
use signal_mesh::monitoring::observer::AggregateMetrics;
use signal_mesh::monitoring::report_chart::render_history;
use signal_mesh::simulation_engine::intersection::{Direction, IntersectionId};
use signal_mesh::simulation_engine::simulation::Network;
use std::error::Error;
use tokio::time::{sleep, Duration};

const DEFAULT_DURATION_SECS: u64 = 60;
const BUTTERFLY_DELAY_SECS: u64 = 10;

fn print_report(report: &AggregateMetrics) {
    println!("==== Network report ====");
    println!("Active intersections: {}", report.active_controllers);
    println!("Total vehicles waiting: {}", report.total_waiting);
    println!("Average queue/intersection: {:.1}", report.average_queue);
    println!("Throughput: {:.2} vehicles/min", report.throughput_per_minute);
    println!("Total processed: {}", report.total_processed);
    for (id, queue) in &report.congested {
        println!("  congested: {} ({} waiting)", id, queue);
    }
    for (id, queue) in &report.stale_controllers {
        println!("  unresponsive: {} (last queue {})", id, queue);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let butterfly = args.iter().any(|a| a == "--butterfly");
    let positional: Vec<&String> = args.iter().filter(|a| !a.starts_with("--")).collect();
    let scenario: Scenario = match positional.first() {
        Some(name) => name.parse()?,
        None => Scenario::Normal,
    };
    let duration = match positional.get(1) {
        Some(secs) => Duration::from_secs(secs.parse()?),
        None => Duration::from_secs(DEFAULT_DURATION_SECS),
    };

    let mut config = NetworkConfig::four_way_junction();
    config.apply_scenario(scenario);
    println!(
        "Starting {} intersections, scenario '{}', for {:?}",
        config.intersections.len(),
        scenario.name(),
        duration
    );

    let network = Network::start(config, Some(REPORT_CSV.into()))?;
    let mut reports = network.subscribe_reports();
    let deadline = sleep(duration);
    tokio::pin!(deadline);
    let butterfly_at = sleep(Duration::from_secs(BUTTERFLY_DELAY_SECS));
    tokio::pin!(butterfly_at);
    let mut butterfly_pending = butterfly;

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted, shutting down...");
                break;
            }
            _ = &mut butterfly_at, if butterfly_pending => {
                butterfly_pending = false;
                println!("Butterfly: adding 2 vehicles to TL_NORTH northbound");
                network.inject_burst(&IntersectionId::from("TL_NORTH"), Direction::North, 2)?;
            }
            changed = reports.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(report) = reports.borrow_and_update().clone() {
                    print_report(&report);
                }
            }
        }
    }

    let summary = network.shutdown().await?;
    for state in &summary.final_states {
        println!(
            "{}: phase {}, {} cycles, {} processed, {} waiting",
            state.id,
            state.phase,
            state.cycle_count,
            state.total_vehicles_processed,
            state.queues.total()
        );
    }

    let history: Vec<AggregateMetrics> = summary.observer.history().cloned().collect();
    if history.is_empty() {
        println!("No reports were produced; skipping chart.");
    } else {
        render_history(REPORT_SVG, &history)?;
        println!("Reports written to {} and {}", REPORT_CSV, REPORT_SVG);
    }
    Ok(())
}
