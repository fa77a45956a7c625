use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rabbitmiles::geometry::GeoPoint;
use rabbitmiles::models::{ActivityRoute, MatchOptions};
use rabbitmiles::services::TrailService;

/// Out-and-back along the main trail with some wander off it.
fn synthetic_route(points: usize, lng_shift: f64) -> ActivityRoute {
    let route = (0..points).map(|i| {
        let t = i as f64 / points as f64;
        let wobble = if i % 50 < 10 { 0.0008 } else { 0.0 };
        GeoPoint::new(38.8800 + wobble, -77.0500 + 0.01 * (1.0 - (2.0 * t - 1.0).abs()) + lng_shift)
    });
    ActivityRoute::from_points(route, Some(3600))
}

fn benchmark_match_route(c: &mut Criterion) {
    let trail = TrailService::load_from_files(&[
        "data/trails/main.geojson",
        "data/trails/spurs.geojson",
    ])
    .expect("Failed to load trail");
    let service = TrailService::new(trail, MatchOptions::default());

    let on_trail = synthetic_route(5_000, 0.0);
    // Same shape, far away (prefilter should reject everything)
    let far_away = synthetic_route(5_000, 5.0);
    let batch: Vec<_> = (0..32).map(|_| on_trail.clone()).collect();

    let mut group = c.benchmark_group("trail_matching");

    group.bench_function("route_on_trail", |b| {
        b.iter(|| service.match_route(black_box(&on_trail)))
    });

    group.bench_function("route_far_away", |b| {
        b.iter(|| service.match_route(black_box(&far_away)))
    });

    group.bench_function("batch_of_32", |b| {
        b.iter(|| service.match_many(black_box(&batch)))
    });

    group.finish();
}

criterion_group!(benches, benchmark_match_route);
criterion_main!(benches);
