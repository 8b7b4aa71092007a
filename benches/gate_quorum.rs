use council::consensus::{GateQuorumConfig, GateQuorumConsensus, NodeProfile, Vote};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::runtime::Runtime;

const BASES: [f64; 7] = [174.0, 285.0, 396.0, 417.0, 528.0, 639.0, 1111.0];

fn council(quorum_size: usize) -> GateQuorumConsensus {
    let gq = GateQuorumConsensus::new(
        "bench",
        GateQuorumConfig {
            quorum_size,
            element_affinity: Some("water".to_string()),
            ..Default::default()
        },
    );
    for i in 0..quorum_size {
        let mut profile = NodeProfile::weighted(BASES[i % BASES.len()]);
        if i % 3 == 0 {
            profile = profile.with_affinity("water");
        }
        gq.add_node(&format!("voter-{}", i), Some(profile));
    }
    gq
}

fn bench_resolve(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("gate_quorum_resolve");

    for quorum_size in [5usize, 25, 100] {
        let gq = council(quorum_size);
        rt.block_on(gq.initialize(None)).unwrap();

        group.bench_with_input(
            BenchmarkId::from_parameter(quorum_size),
            &quorum_size,
            |b, &size| {
                b.to_async(&rt).iter(|| async {
                    let petition = gq.propose(None).await.unwrap();
                    for i in 0..size {
                        let vote = Vote::new(&format!("voter-{}", i), i % 4 != 0);
                        gq.vote(&petition.id, vote).await.unwrap();
                    }
                    black_box(gq.await_consensus(&petition.id).await.unwrap())
                });
            },
        );

        rt.block_on(gq.shutdown()).unwrap();
    }
    group.finish();
}

criterion_group!(benches, bench_resolve);
criterion_main!(benches);
