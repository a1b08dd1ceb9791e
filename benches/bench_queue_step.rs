// benches/bench_queue_step.rs
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use signal_mesh::config::{QueueParams, SaturationPolicy};
use signal_mesh::simulation_engine::intersection::{Phase, QueueState};
use signal_mesh::simulation_engine::queue_model::QueueModel;
use std::time::Duration;

fn bench_queue_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_step");
    group.sample_size(100);
    group.measurement_time(Duration::from_secs(5));

    for saturation in [SaturationPolicy::Drop, SaturationPolicy::Defer] {
        group.bench_function(format!("{:?}", saturation), |b| {
            let mut model = QueueModel::new(&QueueParams {
                arrival_rate: 0.6,
                saturation,
                seed: Some(1),
                ..QueueParams::default()
            })
            .unwrap();
            let mut queues = QueueState::default();
            let mut phase = Phase::NorthSouthGreen;
            let mut step = 0u64;
            b.iter(|| {
                step += 1;
                if step % 10 == 0 {
                    phase = phase.next();
                }
                black_box(model.step(&mut queues, phase));
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_queue_step);
criterion_main!(benches);
