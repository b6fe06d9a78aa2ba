use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rebook_bot::{AvailabilityEngine, CalendarDate};

// Benchmark for filtering the portal's open dates against the booking constraints
pub fn availability_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("availability_decision");

    let start = CalendarDate::parse("2025-01-01").unwrap().as_naive();
    let current = CalendarDate::parse("2027-06-01").unwrap();
    let min_date = CalendarDate::parse("2025-03-01").ok();
    let engine = AvailabilityEngine::new(30);

    // Portals usually return a few hundred days; larger lists check the sort cost
    for size in [50usize, 365, 2000].iter() {
        // reversed so every run has to sort
        let dates: Vec<CalendarDate> = (0..*size as u64)
            .rev()
            .filter_map(|offset| start.checked_add_days(chrono::Days::new(offset)))
            .filter_map(|day| CalendarDate::parse(&day.format("%Y-%m-%d").to_string()).ok())
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), &dates, |b, dates| {
            b.iter(|| {
                let decision = engine
                    .decide(black_box(dates), black_box(current), black_box(min_date))
                    .unwrap();
                black_box(decision)
            })
        });
    }

    group.finish();
}

pub fn normalize_benchmark(c: &mut Criterion) {
    c.bench_function("normalize_date", |b| {
        b.iter(|| {
            for raw in ["2025-05-01", "2025-05-01T00:00:00Z", "May 1, 2025"] {
                black_box(CalendarDate::parse(black_box(raw)).unwrap());
            }
        })
    });
}

criterion_group!(benches, availability_benchmark, normalize_benchmark);
criterion_main!(benches);
