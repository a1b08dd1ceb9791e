use crate::monitoring::observer::AggregateMetrics;
use plotters::prelude::*;
use std::error::Error;
use std::path::Path;

fn upper_bound(values: impl Iterator<Item = f64>) -> f64 {
    values.fold(1.0, f64::max) * 1.1
}

/// Draws total waiting vehicles (top, red) and throughput (bottom, blue) over the
/// report history as an SVG file. Reports are spaced evenly along the x axis.
pub fn render_history(path: impl AsRef<Path>, history: &[AggregateMetrics]) -> Result<(), Box<dyn Error>> {
    if history.is_empty() {
        return Err("no reports to chart".into());
    }
    let last = (history.len() - 1).max(1) as f64;

    let root = SVGBackend::new(path.as_ref(), (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;
    let (top, bottom) = root.split_vertically(300);

    let waiting_max = upper_bound(history.iter().map(|m| f64::from(m.total_waiting)));
    let mut waiting = ChartBuilder::on(&top)
        .margin(20)
        .build_cartesian_2d(0.0..last, 0.0..waiting_max)?;
    waiting.draw_series(LineSeries::new(
        history
            .iter()
            .enumerate()
            .map(|(i, m)| (i as f64, f64::from(m.total_waiting))),
        &RED,
    ))?;
    waiting.draw_series(
        history
            .iter()
            .enumerate()
            .filter(|(_, m)| m.degraded)
            .map(|(i, m)| Circle::new((i as f64, f64::from(m.total_waiting)), 4, BLACK.filled())),
    )?;

    let throughput_max = upper_bound(history.iter().map(|m| m.throughput_per_minute));
    let mut throughput = ChartBuilder::on(&bottom)
        .margin(20)
        .build_cartesian_2d(0.0..last, 0.0..throughput_max)?;
    throughput.draw_series(LineSeries::new(
        history
            .iter()
            .enumerate()
            .map(|(i, m)| (i as f64, m.throughput_per_minute)),
        &BLUE,
    ))?;

    root.present()?;
    log::info!("Report chart saved to {}", path.as_ref().display());
    Ok(())
}
