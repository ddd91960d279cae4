//! Throughput benchmarks for Murmur.
//!
//! These benchmarks measure how many events the routing components sustain.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use murmur_core::{
    ConnectionId, DeliveryGateway, Hub, Identity, InboundEvent, MessageRouter, PresenceRegistry,
    RouterConfig, Session, SessionBinding, Topic,
};
use std::sync::Arc;

fn relay() -> (MessageRouter, Arc<Hub>) {
    let hub = Arc::new(Hub::new());
    let gateway: Arc<dyn DeliveryGateway> = hub.clone();
    let router = MessageRouter::new(
        Arc::new(PresenceRegistry::new()),
        Arc::new(SessionBinding::new()),
        gateway,
        RouterConfig::default(),
    );
    (router, hub)
}

fn joined(router: &MessageRouter, name: &str) -> Session {
    let mut session = Session::new(ConnectionId::new(format!("conn-{name}")));
    router
        .handle(
            &mut session,
            InboundEvent::Register {
                sender: name.into(),
            },
        )
        .unwrap();
    session
}

/// Benchmark presence registry operations.
fn bench_presence(c: &mut Criterion) {
    let mut group = c.benchmark_group("presence");

    for size in [0usize, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("join_leave", size), size, |b, &size| {
            let registry = PresenceRegistry::new();
            for i in 0..size {
                registry.join(Identity::new(format!("user-{i}")));
            }
            let identity = Identity::new("churn");

            b.iter(|| {
                registry.join(black_box(identity.clone()));
                registry.leave(black_box(&identity))
            });
        });
    }

    group.bench_function("snapshot_1000", |b| {
        let registry = PresenceRegistry::new();
        for i in 0..1000 {
            registry.join(Identity::new(format!("user-{i}")));
        }

        b.iter(|| registry.snapshot());
    });

    group.finish();
}

/// Benchmark router operations without subscribers.
fn bench_router(c: &mut Criterion) {
    let mut group = c.benchmark_group("router");

    group.bench_function("chat", |b| {
        let (router, _hub) = relay();
        let mut session = joined(&router, "alice");
        let event = InboundEvent::Chat {
            sender: "alice".into(),
            content: "x".repeat(64),
        };

        b.iter(|| router.handle(&mut session, black_box(event.clone())));
    });

    group.bench_function("private", |b| {
        let (router, hub) = relay();
        let mut session = joined(&router, "alice");
        let bob = Identity::new("bob");
        let _rx = hub.subscribe_private(&bob);
        let event = InboundEvent::Private {
            sender: "alice".into(),
            content: "x".repeat(64),
            receiver: Some(bob),
        };

        b.iter(|| router.handle(&mut session, black_box(event.clone())));
    });

    group.bench_function("register_disconnect", |b| {
        let (router, _hub) = relay();
        let mut i = 0u64;

        b.iter(|| {
            let mut session = joined(&router, &format!("user-{i}"));
            i += 1;
            router.disconnect(&mut session)
        });
    });

    group.finish();
}

/// Benchmark public fan-out.
fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");

    for size in [10, 100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let (router, hub) = relay();
            let _rxs: Vec<_> = (0..size).map(|_| hub.subscribe(Topic::Public)).collect();
            let mut session = joined(&router, "alice");
            let event = InboundEvent::Chat {
                sender: "alice".into(),
                content: "x".repeat(64),
            };

            b.iter(|| router.handle(&mut session, black_box(event.clone())));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_presence, bench_router, bench_fanout);
criterion_main!(benches);
