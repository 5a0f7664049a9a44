#![no_main]

use arbitrary::Arbitrary;
use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20_ietf::{Backend, Cipher};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct Input {
    key: [u8; 32],
    nonce: [u8; 12],
    block_count: u32,
    split: usize,
    data: Vec<u8>,
}

fuzz_target!(|input: Input| {
    // keep the external crate clear of its counter overflow check
    let block_count = input.block_count % (u32::MAX / 2);
    let split = input.split % (input.data.len() + 1);

    let key = words::<8>(&input.key);
    let nonce = words::<3>(&input.nonce);

    let mut scalar = Cipher::with_backend(&key, block_count, &nonce, Backend::Scalar)
        .expect("scalar backend is always available");
    assert_eq!(scalar.backend(), Backend::Scalar);
    let scalar_out = scalar.encrypt(&input.data);
    assert_eq!(scalar_out.len(), input.data.len(), "Length changed");

    // Byte constructor with the detected backend
    let mut detected = match Cipher::from_bytes(&input.key, block_count, &input.nonce) {
        Ok(cipher) => cipher,
        Err(err) => panic!("valid key and nonce rejected: {err}"),
    };
    assert_eq!(detected.encrypt(&input.data), scalar_out, "Byte constructor mismatch");
    assert_eq!(detected.block_count(), scalar.block_count(), "Counter mismatch");

    // Test AVX2 backend matches scalar, fed in two chunks
    if Backend::Avx2.is_available() {
        let mut avx2 = Cipher::with_backend(&key, block_count, &nonce, Backend::Avx2)
            .expect("AVX2 is available");
        let mut avx2_out = input.data.clone();
        avx2.apply_keystream(&mut avx2_out[..split]);
        avx2.apply_keystream(&mut avx2_out[split..]);
        assert_eq!(scalar_out, avx2_out, "AVX2 keystream mismatch");
        assert_eq!(scalar.block_count(), avx2.block_count(), "Counter mismatch");
    }

    // Conformance with external crate
    let mut external = chacha20::ChaCha20::new((&input.key).into(), (&input.nonce).into());
    external.seek(block_count as u64 * 64);
    let mut external_out = input.data.clone();
    external.apply_keystream(&mut external_out);
    assert_eq!(scalar_out, external_out, "External crate mismatch");
});

fn words<const N: usize>(bytes: &[u8]) -> [u32; N] {
    let mut words = [0u32; N];
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
        *word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    words
}
