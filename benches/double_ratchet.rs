use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use rand_core::OsRng;
use x3dh_ratchet::double_ratchet::Session;
use x3dh_ratchet::vault::{IdentityVault, SoftwareVault};
use x3dh_ratchet::x3dh::{initiate, respond_from_store};
use x3dh_ratchet::SessionConfig;

fn setup_ratchet() -> (Session, Session) {
    let alice_vault = SoftwareVault::in_memory();
    let bob_vault = SoftwareVault::in_memory();

    let bob_keys = bob_vault.create_user_keys().unwrap();
    let bundle = bob_keys.public_bundle();

    let alice_x3dh = initiate(&mut OsRng, &alice_vault, &bundle, None).unwrap();
    let (signed_prekey, mut prekeys) = bob_keys.into_prekey_store().unwrap();
    let bob_root = respond_from_store(
        &bob_vault,
        &mut prekeys,
        &alice_vault.fetch_or_create_identity_key().unwrap(),
        &alice_x3dh.ephemeral.public_key(),
        &signed_prekey,
        alice_x3dh.used_prekey_id,
    )
    .unwrap();

    let alice_ratchet = Session::initiator(alice_x3dh, SessionConfig::default());
    let bob_ratchet = Session::responder(bob_root, signed_prekey, SessionConfig::default());

    (alice_ratchet, bob_ratchet)
}

fn bench_encryption(c: &mut Criterion) {
    let mut group = c.benchmark_group("encryption");

    let (mut alice, _) = setup_ratchet();
    let message = vec![0u8; 1024];

    group.bench_function("encrypt_1kb", |b| {
        b.iter(|| black_box(alice.encrypt(&mut OsRng, &message).unwrap()));
    });

    group.finish();
}

fn bench_decryption(c: &mut Criterion) {
    let mut group = c.benchmark_group("decryption");

    let message = vec![0u8; 1024];

    group.bench_function("decrypt_1kb", |b| {
        b.iter_batched(
            || {
                let (mut alice, bob) = setup_ratchet();
                let encrypted = alice.encrypt(&mut OsRng, &message).unwrap();
                (bob, encrypted)
            },
            |(mut bob, encrypted)| black_box(bob.decrypt(&encrypted).unwrap()),
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn bench_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("throughput");

    for size in [128, 1024, 4096, 16384, 65536] {
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("encrypt", size), &size, |b, &size| {
            let (mut alice, _) = setup_ratchet();
            let message = vec![0u8; size];

            b.iter(|| black_box(alice.encrypt(&mut OsRng, &message).unwrap()));
        });

        group.bench_with_input(BenchmarkId::new("decrypt", size), &size, |b, &size| {
            let message = vec![0u8; size];

            b.iter_batched(
                || {
                    let (mut alice, bob) = setup_ratchet();
                    let encrypted = alice.encrypt(&mut OsRng, &message).unwrap();
                    (bob, encrypted)
                },
                |(mut bob, encrypted)| black_box(bob.decrypt(&encrypted).unwrap()),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_message_sequence(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_sequence");

    for count in [10, 100] {
        group.bench_with_input(
            BenchmarkId::new("messages", count),
            &count,
            |b, &count| {
                let message = vec![0u8; 256];
                b.iter_batched(
                    setup_ratchet,
                    |(mut alice, mut bob)| {
                        for _ in 0..count {
                            let encrypted = alice.encrypt(&mut OsRng, &message).unwrap();
                            bob.decrypt(&encrypted).unwrap();
                        }
                    },
                    BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

fn bench_bidirectional(c: &mut Criterion) {
    let mut group = c.benchmark_group("bidirectional");

    group.bench_function("ping_pong_10", |b| {
        let message = vec![0u8; 256];
        b.iter_batched(
            setup_ratchet,
            |(mut alice, mut bob)| {
                for _ in 0..5 {
                    let enc = alice.encrypt(&mut OsRng, &message).unwrap();
                    bob.decrypt(&enc).unwrap();

                    let enc = bob.encrypt(&mut OsRng, &message).unwrap();
                    alice.decrypt(&enc).unwrap();
                }
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn bench_out_of_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("out_of_order");

    group.bench_function("skip_5_messages", |b| {
        let message = vec![0u8; 256];
        b.iter_batched(
            || {
                let (mut alice, bob) = setup_ratchet();
                let encrypted: Vec<_> = (0..6)
                    .map(|_| alice.encrypt(&mut OsRng, &message).unwrap())
                    .collect();
                (bob, encrypted)
            },
            |(mut bob, encrypted)| {
                // Decrypt in order: 5, 0, 1, 2, 3, 4
                bob.decrypt(&encrypted[5]).unwrap();
                for message in encrypted.iter().take(5) {
                    bob.decrypt(message).unwrap();
                }
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn bench_session_persistence(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_persistence");

    let (mut alice, mut bob) = setup_ratchet();
    let message = vec![0u8; 64];
    // Leave a few skipped keys in Bob's cache
    let encrypted: Vec<_> = (0..20)
        .map(|_| alice.encrypt(&mut OsRng, &message).unwrap())
        .collect();
    bob.decrypt(&encrypted[19]).unwrap();
    let stored = bob.to_bytes().unwrap();

    group.bench_function("to_bytes", |b| {
        b.iter(|| black_box(bob.to_bytes().unwrap()));
    });

    group.bench_function("from_bytes", |b| {
        b.iter(|| black_box(Session::from_bytes(&stored).unwrap()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_encryption,
    bench_decryption,
    bench_throughput,
    bench_message_sequence,
    bench_bidirectional,
    bench_out_of_order,
    bench_session_persistence
);

criterion_main!(benches);
