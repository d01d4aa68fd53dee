//! Property-based tests for X3DH and Double Ratchet sessions
//!
//! Uses proptest to verify protocol invariants across random inputs

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_core::{CryptoRngCore, OsRng};
use x3dh_ratchet::double_ratchet::{Message, Session};
use x3dh_ratchet::keys::SecretKey;
use x3dh_ratchet::vault::{IdentityVault, SoftwareVault};
use x3dh_ratchet::x3dh::{initiate, respond_from_store};
use x3dh_ratchet::SessionConfig;

fn establish<R: CryptoRngCore>(rng: &mut R) -> (Session, Session) {
    let alice_vault = SoftwareVault::in_memory();
    let bob_vault = SoftwareVault::in_memory();

    let bob_keys = bob_vault.create_user_keys().unwrap();
    let handshake = initiate(rng, &alice_vault, &bob_keys.public_bundle(), None).unwrap();

    let (signed_prekey, mut prekeys) = bob_keys.into_prekey_store().unwrap();
    let bob_root = respond_from_store(
        &bob_vault,
        &mut prekeys,
        &alice_vault.fetch_or_create_identity_key().unwrap(),
        &handshake.ephemeral.public_key(),
        &signed_prekey,
        handshake.used_prekey_id,
    )
    .unwrap();

    (
        Session::initiator(handshake, SessionConfig::default()),
        Session::responder(bob_root, signed_prekey, SessionConfig::default()),
    )
}

fn shuffled(len: usize) -> impl Strategy<Value = Vec<usize>> {
    Just((0..len).collect::<Vec<_>>()).prop_shuffle()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn test_x3dh_always_produces_same_secret(seed in any::<u64>(), with_prekey in any::<bool>()) {
        // X3DH must always produce identical shared secrets for both parties
        let mut rng = StdRng::seed_from_u64(seed);

        let alice_vault = SoftwareVault::in_memory();
        let bob_vault = SoftwareVault::in_memory();

        let bob_keys = bob_vault.create_user_keys().unwrap();
        let bundle = bob_keys.public_bundle();
        let alice_x3dh = if with_prekey {
            initiate(&mut rng, &alice_vault, &bundle, None).unwrap()
        } else {
            x3dh_ratchet::x3dh::initiate_without_prekey(&mut rng, &alice_vault, &bundle).unwrap()
        };

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

        prop_assert_eq!(alice_x3dh.root_key.as_bytes(), bob_root.as_bytes());
    }

    #[test]
    fn test_ratchet_encrypt_decrypt_roundtrip(
        message in prop::collection::vec(any::<u8>(), 0..1000)
    ) {
        // Any message encrypted then decrypted should match original
        let (mut alice_ratchet, mut bob_ratchet) = establish(&mut OsRng);

        let encrypted = alice_ratchet.encrypt(&mut OsRng, &message).unwrap();
        let decrypted = bob_ratchet.decrypt(&encrypted).unwrap();
        prop_assert_eq!(&decrypted, &message);

        // And back the other way, across a ratchet step
        let reply = bob_ratchet.encrypt(&mut OsRng, &message).unwrap();
        prop_assert_eq!(alice_ratchet.decrypt(&reply).unwrap(), message);
    }

    #[test]
    fn test_different_messages_different_ciphertexts(
        msg1 in prop::collection::vec(any::<u8>(), 10..100),
        msg2 in prop::collection::vec(any::<u8>(), 10..100)
    ) {
        // Different plaintexts should produce different ciphertexts
        if msg1 == msg2 {
            return Ok(());
        }

        let (mut alice_ratchet, _bob_ratchet) = establish(&mut OsRng);

        let ct1 = alice_ratchet.encrypt(&mut OsRng, &msg1).unwrap();
        let ct2 = alice_ratchet.encrypt(&mut OsRng, &msg2).unwrap();

        prop_assert_ne!(ct1.ciphertext, ct2.ciphertext);
    }

    #[test]
    fn test_message_independence(
        count in 1usize..20,
        seed in any::<u64>()
    ) {
        // Every message is sealed under its own key and nonce
        let mut rng = StdRng::seed_from_u64(seed);
        let (mut alice_ratchet, _bob_ratchet) = establish(&mut rng);

        let mut ciphertexts = Vec::new();
        for i in 0..count {
            let msg = format!("Message {}", i);
            let ct = alice_ratchet.encrypt(&mut rng, msg.as_bytes()).unwrap();
            prop_assert_eq!(ct.header.message_number as usize, i);
            ciphertexts.push(ct.ciphertext);
        }

        // All ciphertexts should be different
        for i in 0..ciphertexts.len() {
            for j in (i + 1)..ciphertexts.len() {
                prop_assert_ne!(&ciphertexts[i], &ciphertexts[j]);
            }
        }
    }

    #[test]
    fn test_out_of_order_delivery_any_order(order in shuffled(10)) {
        // Messages should decrypt correctly in any order
        let (mut alice_ratchet, mut bob_ratchet) = establish(&mut OsRng);

        // encrypt messages in order
        let mut messages = Vec::new();
        for i in 0..10 {
            let msg = format!("Message {}", i);
            messages.push((alice_ratchet.encrypt(&mut OsRng, msg.as_bytes()).unwrap(), msg));
        }

        // decrypt in permuted order
        for &idx in &order {
            let (ref encrypted, ref expected) = messages[idx];
            let decrypted = bob_ratchet.decrypt(encrypted).unwrap();
            prop_assert_eq!(&decrypted, expected.as_bytes());
        }
        prop_assert_eq!(bob_ratchet.skipped_key_count(), 0);
    }

    #[test]
    fn test_replayed_messages_rejected(order in shuffled(6), replay in 0usize..6) {
        let (mut alice_ratchet, mut bob_ratchet) = establish(&mut OsRng);

        let messages: Vec<Message> = (0..6u8)
            .map(|i| alice_ratchet.encrypt(&mut OsRng, &[i]).unwrap())
            .collect();

        for &idx in &order {
            bob_ratchet.decrypt(&messages[idx]).unwrap();
        }

        prop_assert!(bob_ratchet.decrypt(&messages[replay]).is_err());
    }

    #[test]
    fn test_tampered_messages_rejected(
        plaintext in prop::collection::vec(any::<u8>(), 0..64),
        flip_bit in 0usize..(64 * 8 + 16 * 8 + 12 * 8)
    ) {
        let (mut alice_ratchet, mut bob_ratchet) = establish(&mut OsRng);
        let original = alice_ratchet.encrypt(&mut OsRng, &plaintext).unwrap();

        let mut tampered = original.clone();
        let ciphertext_bits = tampered.ciphertext.len() * 8;
        if flip_bit < ciphertext_bits {
            tampered.ciphertext[flip_bit / 8] ^= 1 << (flip_bit % 8);
        } else {
            let bit = (flip_bit - ciphertext_bits) % (12 * 8);
            tampered.nonce[bit / 8] ^= 1 << (bit % 8);
        }

        prop_assert!(bob_ratchet.decrypt(&tampered).is_err());
        prop_assert_eq!(bob_ratchet.decrypt(&original).unwrap(), plaintext);
    }

    #[test]
    fn test_rotation_preserves_delivery(
        before in 1usize..5,
        after in 1usize..5,
        seed in any::<u64>()
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let (mut alice_ratchet, mut bob_ratchet) = establish(&mut rng);

        // Bob has seen Alice's current chain
        let opening = alice_ratchet.encrypt(&mut rng, b"opening").unwrap();
        bob_ratchet.decrypt(&opening).unwrap();

        let mut messages = Vec::new();
        for i in 0..before {
            messages.push(alice_ratchet.encrypt(&mut rng, format!("before {i}").as_bytes()).unwrap());
        }
        alice_ratchet.rotate_ephemeral(&mut rng).unwrap();
        for i in 0..after {
            messages.push(alice_ratchet.encrypt(&mut rng, format!("after {i}").as_bytes()).unwrap());
        }

        // Deliver newest first
        for message in messages.iter().rev() {
            prop_assert!(bob_ratchet.decrypt(message).is_ok());
        }

        let reply = bob_ratchet.encrypt(&mut rng, b"reply").unwrap();
        prop_assert_eq!(alice_ratchet.decrypt(&reply).unwrap(), b"reply".to_vec());
    }

    #[test]
    fn test_decoders_never_panic(data in prop::collection::vec(any::<u8>(), 0..256)) {
        // Arbitrary input must be rejected with an error, never a panic
        if let Ok(message) = Message::from_bytes(&data) {
            let roundtrip = Message::from_bytes(&message.to_bytes()).unwrap();
            prop_assert_eq!(roundtrip, message);
        }
        let _ = x3dh_ratchet::Header::decode(&data);
        let _ = Session::from_bytes(&data);
        if let Ok(bundle) = x3dh_ratchet::KeyBundle::from_bytes(&data) {
            let _ = bundle.verify_signature();
        }
    }

    #[test]
    fn test_decoders_reject_unknown_version(version in 2u8..=255, tail in prop::collection::vec(any::<u8>(), 0..128)) {
        let mut data = vec![version];
        data.extend_from_slice(&tail);

        prop_assert_eq!(
            Message::from_bytes(&data).unwrap_err(),
            x3dh_ratchet::Error::UnsupportedVersion(version)
        );
        prop_assert_eq!(
            Session::from_bytes(&data).unwrap_err(),
            x3dh_ratchet::Error::UnsupportedVersion(version)
        );
    }
}

#[cfg(test)]
mod deterministic_tests {
    use super::*;
    use x3dh_ratchet::crypto::{kdf_chain, kdf_root, SymmetricKey};
    use x3dh_ratchet::keys::DhOutput;

    #[test]
    fn test_kdf_deterministic() {
        // same inputs should always produce same outputs
        let key = SymmetricKey::from_bytes([42u8; 32]);
        let (msg1, chain1) = kdf_chain(&key).unwrap();
        let (msg2, chain2) = kdf_chain(&key).unwrap();

        assert_eq!(chain1.as_bytes(), chain2.as_bytes());
        assert_eq!(msg1.as_bytes(), msg2.as_bytes());
        assert_ne!(msg1.as_bytes(), chain1.as_bytes());

        let dh = DhOutput::from_bytes([7u8; 32]);
        let (root1, ck1) = kdf_root(&key, &dh).unwrap();
        let (root2, ck2) = kdf_root(&key, &dh).unwrap();
        assert_eq!(root1, root2);
        assert_eq!(ck1, ck2);
    }

    #[test]
    fn test_dh_commutative() {
        // DH(a, B) == DH(b, A)
        let a = SecretKey::generate(&mut OsRng);
        let b = SecretKey::generate(&mut OsRng);

        let public_a = a.public_key();
        let public_b = b.public_key();

        let shared1 = a.diffie_hellman(&public_b);
        let shared2 = b.diffie_hellman(&public_a);

        assert_eq!(shared1.as_bytes(), shared2.as_bytes());
    }
}
