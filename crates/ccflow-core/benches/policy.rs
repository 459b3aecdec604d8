use ccflow_core::{
    domain::policy::endorsement::{MspRole, PolicyBuilder, Signer},
    ids::MspId,
};
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

const NESTED: &str = "AND('Org1MSP.member', OR('Org2MSP.admin', 'Org3MSP.peer'), \
                      OutOf(2, 'Org4MSP.member', 'Org5MSP.member', 'Org6MSP.member'))";

fn bench_build(c: &mut Criterion) {
    let builder = PolicyBuilder::new(MspId::new("Org1MSP"));

    c.bench_function("policy build nested", |b| {
        b.iter(|| black_box(builder.build(black_box(NESTED)).unwrap()));
    });

    c.bench_function("policy build ANY", |b| {
        b.iter(|| black_box(builder.build(black_box("ANY")).unwrap()));
    });
}

fn bench_evaluate(c: &mut Criterion) {
    let policy = PolicyBuilder::new(MspId::new("Org1MSP"))
        .build(NESTED)
        .unwrap();
    let signers = vec![
        Signer::new(MspId::new("Org1MSP"), MspRole::Member),
        Signer::new(MspId::new("Org3MSP"), MspRole::Peer),
        Signer::new(MspId::new("Org4MSP"), MspRole::Member),
        Signer::new(MspId::new("Org6MSP"), MspRole::Admin),
    ];

    c.bench_function("policy evaluate nested", |b| {
        b.iter(|| black_box(policy.is_satisfied_by(black_box(&signers))));
    });
}

criterion_group!(benches, bench_build, bench_evaluate);
criterion_main!(benches);
