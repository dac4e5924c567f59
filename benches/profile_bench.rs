// Benchmarks for move timing and step generation
// Run with: cargo bench

use criterion::{criterion_group, criterion_main, Criterion};
use krusty_sync::motion::{calc_move_time, Axis, Coord, StepperKinematics, TrapQ, TrajectoryQueue, TrapSegment};
use std::hint::black_box;

fn bench_calc_move_time(c: &mut Criterion) {
    c.bench_function("calc_move_time x1000", |b| {
        b.iter(|| {
            for i in 0..1000 {
                let dist = black_box(i as f64 * 0.1 - 50.0);
                black_box(calc_move_time(dist, 25.0, 500.0));
            }
        });
    });
}

fn bench_step_generation(c: &mut Criterion) {
    let profile = calc_move_time(100.0, 50.0, 1000.0);
    let mut tq = TrapQ::new();
    tq.append(&TrapSegment {
        print_time: 0.0,
        accel_t: profile.accel_t,
        cruise_t: profile.cruise_t,
        decel_t: profile.decel_t,
        start_pos: Coord::ORIGIN,
        axes_r: Coord::new(profile.axis_r, 0.0, 0.0),
        start_v: 0.0,
        cruise_v: profile.cruise_v,
        accel: profile.accel,
    });
    let end_time = profile.total_duration();
    c.bench_function("generate 8000 steps", |b| {
        b.iter(|| {
            let sk = StepperKinematics::cartesian(Axis::X);
            let steps = sk.generate_steps(&tq, 0.0125, end_time).unwrap();
            assert_eq!(steps.len(), 8000);
        });
    });
}

criterion_group!(benches, bench_calc_move_time, bench_step_generation);
criterion_main!(benches);
