use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ocsp_proto::{CertId, HashAlgorithm};

fn create_test_cert_id(hash_algorithm: HashAlgorithm) -> CertId {
    let serial: num_bigint::BigInt = "90182736450918273645091827364509182736"
        .parse()
        .expect("Failed to parse serial");
    let name_hash = hash_algorithm.digest(b"CN=Benchmark Issuing CA");
    let key_hash = hash_algorithm.digest(b"benchmark issuer public key");
    CertId::new(hash_algorithm, &name_hash, &key_hash, &serial)
}

fn bench_encode_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("cert_id_encode_key");

    for alg in [HashAlgorithm::Sha1, HashAlgorithm::Sha256, HashAlgorithm::Sha512] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{alg:?}")),
            &alg,
            |b, &alg| {
                let id = create_test_cert_id(alg);
                b.iter(|| black_box(&id).encode_key().expect("Failed to encode CertID"));
            },
        );
    }

    group.finish();
}

fn bench_decode_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("cert_id_decode_key");

    for alg in [HashAlgorithm::Sha1, HashAlgorithm::Sha256, HashAlgorithm::Sha512] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{alg:?}")),
            &alg,
            |b, &alg| {
                let key = create_test_cert_id(alg)
                    .to_key_string()
                    .expect("Failed to encode CertID");
                b.iter(|| CertId::decode_key(black_box(&key)).expect("Failed to decode CertID"));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_encode_key, bench_decode_key);
criterion_main!(benches);
