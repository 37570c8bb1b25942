use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use upstream_registry::{Cluster, Endpoint, HealthCheck, checks_equal, clusters_changed, passing_services};

fn health_snapshot(instances: usize) -> Vec<HealthCheck> {
    let mut checks = Vec::with_capacity(instances * 2);
    for i in 0..instances {
        let node = format!("node-{}", i);
        let status = if i % 7 == 0 { "critical" } else { "passing" };
        checks.push(HealthCheck::node(&node, "serfHealth", "passing"));
        checks.push(HealthCheck::service(&node, "api", format!("api-{}", i), status).with_tags(&["v1", "zone=a"]));
    }
    checks
}

fn cluster(instances: usize) -> Cluster {
    Cluster::new("api").with_endpoints(
        (0..instances)
            .map(|i| Endpoint::new(format!("api-{}", i), "10.0.0.1", 8000 + i as u16).with_tags(&["dc=dc1", "v1"]))
            .collect(),
    )
}

fn bench_passing_services(c: &mut Criterion) {
    let mut group = c.benchmark_group("passing_services");
    let status = vec!["passing".to_string()];

    for size in [10, 100, 500] {
        let checks = health_snapshot(size);
        group.bench_function(format!("instances_{}", size), |b| {
            b.iter(|| passing_services(black_box(&checks), black_box(&status)))
        });
    }

    group.finish();
}

fn bench_checks_equal(c: &mut Criterion) {
    let mut group = c.benchmark_group("checks_equal");

    let checks = health_snapshot(100);
    let mut reversed = checks.clone();
    reversed.reverse();

    group.bench_function("identical", |b| {
        b.iter(|| checks_equal(black_box(&checks), black_box(&checks)))
    });

    group.bench_function("reordered", |b| {
        b.iter(|| checks_equal(black_box(&checks), black_box(&reversed)))
    });

    group.finish();
}

fn bench_clusters_changed(c: &mut Criterion) {
    let mut group = c.benchmark_group("clusters_changed");

    let last = vec![cluster(200)];
    let mut shuffled = last.clone();
    shuffled[0].endpoints.reverse();
    let mut grown = last.clone();
    grown[0].endpoints.push(Endpoint::new("api-new", "10.0.0.2", 9000));

    group.bench_function("unchanged", |b| {
        b.iter(|| clusters_changed(black_box(&shuffled), black_box(&last)))
    });

    group.bench_function("grown", |b| {
        b.iter(|| clusters_changed(black_box(&grown), black_box(&last)))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_passing_services,
    bench_checks_equal,
    bench_clusters_changed
);
criterion_main!(benches);
