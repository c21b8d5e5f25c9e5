//! Task pool benchmark: per-tick selection for pools of different sizes.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;

use ems_core::task::{ManagedTask, MetaTaskPool, Priority, TaskPool};

struct Poll {
    name: String,
    priority: Priority,
}

impl ManagedTask for Poll {
    fn priority(&self) -> Priority {
        self.priority
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Typical device: a few fast registers, many slow ones, one identification read.
fn device_pool(n_tasks: usize) -> TaskPool<Poll> {
    let mut pool = TaskPool::new();
    for i in 0..n_tasks {
        let priority = match i % 4 {
            0 => Priority::High,
            1 if i == 1 => Priority::Once,
            _ => Priority::Low,
        };
        pool.add(Arc::new(Poll {
            name: format!("task{i}"),
            priority,
        }));
    }
    pool
}

fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("task_pool_select");

    for &n_tasks in &[8, 64, 512] {
        let mut pool = device_pool(n_tasks);
        group.bench_with_input(BenchmarkId::new("tasks", n_tasks), &n_tasks, |b, _| {
            b.iter(|| black_box(pool.select_for_this_tick()));
        });
    }

    group.finish();
}

fn bench_meta_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("meta_pool_select");

    for &n_devices in &[1, 16, 64] {
        let mut meta: MetaTaskPool<Poll> = MetaTaskPool::new();
        for d in 0..n_devices {
            let source = meta.add_source(&format!("device{d}"));
            *source = device_pool(16);
        }
        group.bench_with_input(BenchmarkId::new("devices", n_devices), &n_devices, |b, _| {
            b.iter(|| {
                black_box(meta.select_for_this_tick());
                black_box(meta.select_one());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_select, bench_meta_select);
criterion_main!(benches);
