// benches/bench_decision_rule.rs
use criterion::{
    black_box, criterion_group, criterion_main, AxisScale, Criterion, PlotConfiguration,
};
use signal_mesh::config::SignalTiming;
use signal_mesh::control_system::signal_controller::decide_green_time;
use std::time::Duration;

fn bench_decision_rule(c: &mut Criterion) {
    let mut group = c.benchmark_group("decision_rule");
    group.sample_size(100);
    group.measurement_time(Duration::from_secs(5));
    group.warm_up_time(Duration::from_secs(2));
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Linear));

    let timing = SignalTiming::default();
    // one input per branch of the rule
    let cases = [
        ("favor_current", 0.9, 0.2, 0.5),
        ("yield_to_opposite", 0.1, 0.9, 0.5),
        ("neighbor_balance", 0.5, 0.45, 0.3),
    ];
    for (name, current, opposite, neighbor) in cases {
        group.bench_function(name, |b| {
            b.iter(|| {
                decide_green_time(
                    black_box(current),
                    black_box(opposite),
                    black_box(neighbor),
                    &timing,
                )
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_decision_rule);
criterion_main!(benches);
