//! Complete example of X3DH + Double Ratchet usage
//!
//! Two parties establish a secure channel through their identity vaults,
//! exchange messages, rotate keys and persist a session.

use rand_core::OsRng;
use x3dh_ratchet::double_ratchet::{Message, Session};
use x3dh_ratchet::vault::{IdentityVault, SoftwareVault};
use x3dh_ratchet::x3dh::{initiate, respond_from_store};
use x3dh_ratchet::{KeyBundle, Result, SessionConfig};

fn text(bytes: &[u8]) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}

fn main() -> Result<()> {
    println!("=== X3DH + Double Ratchet Complete Example ===\n");

    // Both parties own an identity vault
    println!("1. Opening identity vaults...");
    let alice_vault = SoftwareVault::in_memory();
    let bob_vault = SoftwareVault::in_memory();
    let alice_identity = alice_vault.fetch_or_create_identity_key()?;
    println!("   ✓ Alice identity: {alice_identity:?}");
    println!("   ✓ Bob identity: {:?}\n", bob_vault.fetch_or_create_identity_key()?);

    // Bob publishes prekey bundle
    println!("2. Bob generates and publishes prekey bundle...");
    let bob_keys = bob_vault.create_user_keys()?;
    let published = bob_keys.public_bundle().to_bytes()?;
    let (bob_signed_prekey, mut bob_prekeys) = bob_keys.into_prekey_store()?;
    println!("   ✓ Bob's bundle ready for distribution ({} bytes)", published.len());

    let bob_bundle = KeyBundle::from_bytes(&published)?;
    println!("   - Identity key: {:?}", bob_bundle.identity_key);
    println!("   - Signed prekey: {:?}", bob_bundle.signed_prekey);
    println!("   - One-time prekeys: {}\n", bob_bundle.prekeys.len());

    // Alice performs X3DH handshake
    println!("3. Alice initiates X3DH handshake...");
    let alice_x3dh = initiate(&mut OsRng, &alice_vault, &bob_bundle, None)?;
    println!("   ✓ Alice verified Bob's signed prekey");
    println!("   ✓ Alice computed root key using one-time prekey {:?}\n", alice_x3dh.used_prekey_id);

    let mut alice = Session::initiator(alice_x3dh, SessionConfig::default());

    // The first message carries the handshake ephemeral and prekey id
    println!("4. Alice sends her first message...");
    let msg1 = b"Hello Bob! This is Alice.";
    println!("   Alice → Bob: {:?}", text(msg1));
    let wire = alice.encrypt(&mut OsRng, msg1)?.to_bytes();
    println!("   Encrypted size: {} bytes\n", wire.len());

    // Bob completes the handshake from the received header
    println!("5. Bob responds to handshake...");
    let first = Message::from_bytes(&wire)?;
    let bob_root = respond_from_store(
        &bob_vault,
        &mut bob_prekeys,
        &alice_identity,
        &first.header.ephemeral,
        &bob_signed_prekey,
        first.header.one_time_prekey_id,
    )?;
    let mut bob = Session::responder(bob_root, bob_signed_prekey, SessionConfig::default());
    println!("   ✓ Bob computed root key and consumed the one-time prekey");

    let decrypted1 = bob.decrypt(&first)?;
    println!("   Bob received: {:?}\n", text(&decrypted1));
    assert_eq!(&decrypted1, msg1);

    // Exchange encrypted messages
    println!("6. Exchanging encrypted messages...\n");

    let msg2 = b"Hi Alice! How are you?";
    println!("   Bob → Alice: {:?}", text(msg2));
    let encrypted2 = bob.encrypt(&mut OsRng, msg2)?;
    println!("   Encrypted size: {} bytes", encrypted2.to_bytes().len());

    let decrypted2 = alice.decrypt(&encrypted2)?;
    println!("   Alice received: {:?}\n", text(&decrypted2));
    assert_eq!(&decrypted2, msg2);

    // Alice sends multiple messages
    let messages = [
        b"I'm doing great!".as_slice(),
        b"How about you?".as_slice(),
        b"Want to meet up later?".as_slice(),
    ];

    for (i, msg) in messages.iter().enumerate() {
        println!("   Alice → Bob ({}): {:?}", i + 1, text(msg));
        let encrypted = alice.encrypt(&mut OsRng, msg)?;
        let decrypted = bob.decrypt(&encrypted)?;
        assert_eq!(&decrypted, msg);
    }

    println!("\n   ✓ All messages successfully exchanged\n");

    // Demonstrate out-of-order delivery
    println!("7. Testing out-of-order message delivery...\n");

    let m1 = alice.encrypt(&mut OsRng, b"Message 1")?;
    let m2 = alice.encrypt(&mut OsRng, b"Message 2")?;
    let m3 = alice.encrypt(&mut OsRng, b"Message 3")?;

    // Bob receives them out of order: 3, 1, 2
    println!("   Messages sent in order: 1, 2, 3");
    println!("   Messages received in order: 3, 1, 2");

    for (label, message) in [("3", &m3), ("1", &m1), ("2", &m2)] {
        let decrypted = bob.decrypt(message)?;
        println!("   ✓ Decrypted message {label}: {:?}", text(&decrypted));
    }

    // A second delivery of the same message is refused
    let replay = bob.decrypt(&m2);
    println!("   ✓ Replayed message 2 rejected: {:?}", replay.err());

    println!("\n   ✓ Out-of-order delivery works correctly\n");

    // Forced rotation
    println!("8. Alice rotates her ratchet key...\n");
    let before = alice.encrypt(&mut OsRng, b"Sent before rotation")?;
    alice.rotate_ephemeral(&mut OsRng)?;
    let after = alice.encrypt(&mut OsRng, b"Sent after rotation")?;
    println!("   Ratchet key changed: {}", before.header.ephemeral != after.header.ephemeral);

    println!("   Bob received: {:?}", text(&bob.decrypt(&after)?));
    println!("   Bob received: {:?}\n", text(&bob.decrypt(&before)?));

    // Persist and restore Bob's session
    println!("9. Persisting Bob's session...\n");
    let stored = bob.to_bytes()?;
    println!("   Stored session: {} bytes", stored.len());
    drop(bob);

    let mut bob = Session::from_bytes(&stored)?;
    let reply = bob.encrypt(&mut OsRng, b"Still here after a restart")?;
    println!("   Alice received: {:?}", text(&alice.decrypt(&reply)?));
    println!("\n   ✓ Restored session continues the conversation\n");

    // Security properties
    println!("=== Security Properties ===\n");
    println!("✓ Forward Secrecy: Old message keys deleted after use");
    println!("✓ Post-Compromise Security: New DH ratchet steps provide fresh secrets");
    println!("✓ Identity Isolation: Identity private key never leaves the vault");
    println!("✓ Asynchronous: Alice could send without Bob being online");
    println!("\n=== Example Complete ===");

    Ok(())
}
