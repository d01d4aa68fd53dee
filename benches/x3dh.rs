use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand_core::OsRng;
use x3dh_ratchet::vault::{IdentityVault, InMemorySecretStorage, SoftwareVault};
use x3dh_ratchet::x3dh::{initiate, respond};
use x3dh_ratchet::VaultConfig;

fn bench_key_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_generation");

    group.bench_function("identity_key", |b| {
        b.iter(|| {
            let vault = SoftwareVault::in_memory();
            black_box(vault.fetch_or_create_identity_key().unwrap())
        });
    });

    group.bench_function("user_keys_100", |b| {
        let vault = SoftwareVault::new(
            InMemorySecretStorage::new(),
            VaultConfig {
                prekey_batch_size: 100,
            },
        );
        b.iter(|| black_box(vault.create_user_keys().unwrap()));
    });

    group.finish();
}

fn bench_x3dh_handshake(c: &mut Criterion) {
    let mut group = c.benchmark_group("x3dh_handshake");

    // Setup
    let alice_vault = SoftwareVault::in_memory();
    let bob_vault = SoftwareVault::in_memory();
    let alice_identity = alice_vault.fetch_or_create_identity_key().unwrap();
    let bob_keys = bob_vault.create_user_keys().unwrap();
    let bundle = bob_keys.public_bundle();

    group.bench_function("initiate", |b| {
        b.iter(|| black_box(initiate(&mut OsRng, &alice_vault, &bundle, None).unwrap()));
    });

    group.bench_function("respond", |b| {
        let init_result = initiate(&mut OsRng, &alice_vault, &bundle, None).unwrap();
        let ephemeral = init_result.ephemeral.public_key();
        let one_time_prekey = bob_keys.one_time_prekeys[0].secret();

        b.iter(|| {
            black_box(
                respond(
                    &bob_vault,
                    &alice_identity,
                    &ephemeral,
                    &bob_keys.signed_prekey,
                    Some(one_time_prekey),
                )
                .unwrap(),
            )
        });
    });

    group.bench_function("full_handshake", |b| {
        b.iter(|| {
            let alice = SoftwareVault::in_memory();
            let bob = SoftwareVault::in_memory();
            let keys = bob.create_user_keys().unwrap();

            let init = initiate(&mut OsRng, &alice, &keys.public_bundle(), None).unwrap();
            let resp = respond(
                &bob,
                &alice.fetch_or_create_identity_key().unwrap(),
                &init.ephemeral.public_key(),
                &keys.signed_prekey,
                Some(keys.one_time_prekeys[0].secret()),
            )
            .unwrap();

            black_box((init, resp))
        });
    });

    group.finish();
}

fn bench_signature_verification(c: &mut Criterion) {
    let mut group = c.benchmark_group("signature_verification");

    let vault = SoftwareVault::in_memory();
    let bundle = vault.create_user_keys().unwrap().public_bundle();

    group.bench_function("verify_bundle_signature", |b| {
        b.iter(|| black_box(bundle.verify_signature().unwrap()));
    });

    group.finish();
}

fn bench_different_opk_counts(c: &mut Criterion) {
    let mut group = c.benchmark_group("opk_generation");

    for count in [10, 50, 100, 500, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let vault = SoftwareVault::new(
                InMemorySecretStorage::new(),
                VaultConfig {
                    prekey_batch_size: count,
                },
            );
            b.iter(|| black_box(vault.create_user_keys().unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_key_generation,
    bench_x3dh_handshake,
    bench_signature_verification,
    bench_different_opk_counts
);

criterion_main!(benches);
