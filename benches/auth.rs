use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, SamplingMode, Throughput};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde_json::json;

use smartnest::auth::{CredentialService, CREDENTIALS_PATH};
use smartnest::store::SharedStore;

fn seed_table(store: &SharedStore, n: usize, seed: u64) -> Vec<(String, String)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut table = serde_json::Map::new();
    let mut logins = Vec::with_capacity(n);
    for i in 0..n {
        let key = format!("user-{:06x}", i);
        let email = format!("user{}@bench.local", i);
        let password = format!("pw-{:016x}", rng.gen::<u64>());
        table.insert(
            key,
            json!({
                "email": email,
                "password": password,
                "name": format!("User {}", i),
                "role": if i % 7 == 0 { "admin" } else { "user" },
            }),
        );
        logins.push((email, password));
    }
    store
        .write(CREDENTIALS_PATH, Some(serde_json::Value::Object(table)))
        .expect("seed credential table");
    logins
}

fn bench_verify(c: &mut Criterion) {
    let ns = [100usize, 1_000usize, 10_000usize];
    let mut group = c.benchmark_group("credential_scan");
    group.sampling_mode(SamplingMode::Flat);
    group.sample_size(20);

    for &n in &ns {
        let store = SharedStore::in_memory();
        let logins = seed_table(&store, n, 0xBEEF_CAFE);
        let creds = CredentialService::new(store);

        // Worst case: the matching record sits at the end of the scan
        let (last_email, last_password) = logins.last().cloned().unwrap();
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("verify_last", n.to_string()), &n, |b, _| {
            b.iter(|| {
                let hit = creds.verify_credentials(&last_email, &last_password);
                criterion::black_box(hit);
            });
        });

        // Miss: full scan with no match
        group.bench_with_input(BenchmarkId::new("verify_miss", n.to_string()), &n, |b, _| {
            b.iter(|| {
                let miss = creds.verify_credentials("nobody@bench.local", "nope");
                criterion::black_box(miss);
            });
        });

        // Random hits drawn with a fixed seed
        group.bench_with_input(BenchmarkId::new("verify_rand", n.to_string()), &n, |b, _| {
            let mut rng = StdRng::seed_from_u64(0xFACE_FEED);
            let picks: Vec<usize> = (0..64).map(|_| rng.gen_range(0..n)).collect();
            b.iter(|| {
                for &i in &picks {
                    let (email, password) = &logins[i];
                    criterion::black_box(creds.verify_credentials(email, password));
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_verify);
criterion_main!(benches);
