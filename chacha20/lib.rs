//! ChaCha20 stream cipher as specified by RFC 8439.
//!
//! This crate implements the IETF variant of ChaCha20: a 256-bit key, a 96-bit
//! nonce and a 32-bit block counter. The keystream is XORed with the data, so
//! encryption and decryption are the same operation.
//!
//! Two interchangeable block function backends are provided: a portable scalar
//! one and an AVX2 one computing two blocks per call. The backend is chosen
//! once per process (see [`Backend::detect`]) and both produce identical
//! keystreams.
//!
//! This is raw keystream XOR only: ciphertexts are not authenticated, and a
//! (key, nonce) pair must never be reused for two messages. The block counter
//! wraps silently after 2^32 blocks (256 GiB), at which point the keystream
//! repeats; callers must bound the data encrypted under one nonce.
//!
//! # Example
//!
//! ```
//! use chacha20_ietf::Cipher;
//!
//! let key = [
//!     0x00010203, 0x04050607, 0x08090a0b, 0x0c0d0e0f,
//!     0x10111213, 0x14151617, 0x18191a1b, 0x1c1d1e1f,
//! ];
//! let nonce = [0x00000000, 0x0000004a, 0x00000000];
//!
//! let mut cipher = Cipher::new(&key, 1, &nonce);
//! let ciphertext = cipher.encrypt(b"Ladies and Gentlemen");
//! assert_eq!(cipher.block_count(), 2);
//!
//! let mut cipher = Cipher::new(&key, 1, &nonce);
//! assert_eq!(cipher.decrypt(&ciphertext), b"Ladies and Gentlemen");
//! ```

mod backend;
mod chacha_scalar;
mod error;
mod rounds;
mod state;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod chacha_avx2;

pub use backend::{Backend, BACKEND_ENV};
pub use error::{Error, Result};
pub use state::{CipherState, BLOCK_SIZE, CONSTANTS, KEY_WORDS, NONCE_WORDS, STATE_WORDS};

use core::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Largest number of blocks any backend computes per invocation.
const MAX_PAR_BLOCKS: usize = 2;

/// ChaCha20 cipher instance.
///
/// The cipher owns its key, nonce and block counter and zeroizes them when
/// dropped. Each [`Cipher::encrypt`] call starts on a fresh block, so the
/// counter advances by `ceil(N / 64)` per call and the unused tail of a partly
/// consumed block is dropped. [`Cipher::apply_keystream`] instead keeps that
/// tail so successive calls continue the stream where the previous one ended.
///
/// - `state`: the 512-bit ChaCha state; word 12 is the counter of the next
///   block to generate
/// - `last_keystream_block`: the most recent keystream block
/// - `remaining`: number of unused bytes at the end of `last_keystream_block`
pub struct Cipher {
    state: CipherState,
    last_keystream_block: [u8; BLOCK_SIZE],
    remaining: usize,
    backend: Backend,
}

impl Cipher {
    /// Creates a cipher from key and nonce words using the process-wide
    /// backend.
    ///
    /// Key and nonce words are in big-endian order (most significant word
    /// first). `block_count` is the counter of the first keystream block.
    pub fn new(key: &[u32; KEY_WORDS], block_count: u32, nonce: &[u32; NONCE_WORDS]) -> Cipher {
        Cipher::from_state(CipherState::new(key, block_count, nonce), Backend::detect())
    }

    /// Creates a cipher that uses the given backend.
    ///
    /// Fails with [`Error::BackendUnavailable`] if the CPU cannot run it.
    pub fn with_backend(
        key: &[u32; KEY_WORDS],
        block_count: u32,
        nonce: &[u32; NONCE_WORDS],
        backend: Backend,
    ) -> Result<Cipher> {
        if !backend.is_available() {
            return Err(Error::BackendUnavailable(backend));
        }
        Ok(Cipher::from_state(CipherState::new(key, block_count, nonce), backend))
    }

    /// Like [`Cipher::new`] but for runtime-sized inputs: `key` must hold 8
    /// words and `nonce` 3 words.
    pub fn from_words(key: &[u32], block_count: u32, nonce: &[u32]) -> Result<Cipher> {
        let state = CipherState::from_words(key, block_count, nonce)?;
        Ok(Cipher::from_state(state, Backend::detect()))
    }

    /// Creates a cipher from the RFC 8439 byte form of the key (32 bytes) and
    /// nonce (12 bytes).
    pub fn from_bytes(key: &[u8], block_count: u32, nonce: &[u8]) -> Result<Cipher> {
        let state = CipherState::from_bytes(key, block_count, nonce)?;
        Ok(Cipher::from_state(state, Backend::detect()))
    }

    fn from_state(state: CipherState, backend: Backend) -> Cipher {
        Cipher {
            state,
            last_keystream_block: [0u8; BLOCK_SIZE],
            remaining: 0,
            backend,
        }
    }

    /// Returns the backend this cipher generates keystream with.
    #[inline]
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Returns the counter of the next keystream block to be generated.
    #[inline]
    pub fn block_count(&self) -> u32 {
        self.state.block_count()
    }

    /// Seeks to the start of the given block.
    ///
    /// Any keystream bytes left over from the previous block are discarded.
    pub fn set_block_count(&mut self, block_count: u32) {
        self.state.set_block_count(block_count);
        self.discard_keystream();
    }

    /// Encrypts `message`, returning a ciphertext of the same length.
    ///
    /// The keystream starts at block [`Cipher::block_count`]; bytes left over
    /// from an earlier call are discarded.
    pub fn encrypt(&mut self, message: &[u8]) -> Vec<u8> {
        self.discard_keystream();
        let mut output = message.to_vec();
        self.apply_keystream(&mut output);
        output
    }

    /// Decrypts `ciphertext`. Identical to [`Cipher::encrypt`].
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Vec<u8> {
        self.encrypt(ciphertext)
    }

    /// XORs the keystream into `data` in place.
    ///
    /// This function can be called multiple times with chunks of data; the
    /// result is the same as one call over the concatenated chunks. The counter
    /// therefore advances by `ceil(total / 64)` over all calls.
    pub fn apply_keystream(&mut self, data: &mut [u8]) {
        if data.is_empty() {
            return;
        }

        let mut offset = 0;

        // First, use any remaining keystream bytes from the previous block
        if self.remaining > 0 {
            let use_bytes = self.remaining.min(data.len());
            let start = BLOCK_SIZE - self.remaining;
            xor(
                &mut data[..use_bytes],
                &self.last_keystream_block[start..start + use_bytes],
            );
            self.remaining -= use_bytes;
            offset = use_bytes;

            if self.remaining == 0 {
                self.last_keystream_block.zeroize();
            }
        }

        // Whole blocks, as many per invocation as the backend computes
        let parallel = self.backend.parallel_blocks();
        let mut keystream = [0u8; MAX_PAR_BLOCKS * BLOCK_SIZE];
        while data.len() - offset >= BLOCK_SIZE {
            let blocks = ((data.len() - offset) / BLOCK_SIZE).min(parallel);
            let len = blocks * BLOCK_SIZE;
            self.backend
                .fill_blocks(&mut self.state, &mut keystream[..len]);
            xor(&mut data[offset..offset + len], &keystream[..len]);
            offset += len;
        }
        keystream.zeroize();

        // Partial block: keep the unused tail for the next call
        let tail = data.len() - offset;
        if tail > 0 {
            self.backend
                .fill_blocks(&mut self.state, &mut self.last_keystream_block);
            xor(&mut data[offset..], &self.last_keystream_block[..tail]);
            self.remaining = BLOCK_SIZE - tail;
        }
    }

    fn discard_keystream(&mut self) {
        self.last_keystream_block.zeroize();
        self.remaining = 0;
    }

    /// Overwrites all secret material held by the cipher.
    fn wipe(&mut self) {
        self.state.zeroize();
        self.discard_keystream();
    }
}

impl Drop for Cipher {
    fn drop(&mut self) {
        self.wipe();
    }
}

impl ZeroizeOnDrop for Cipher {}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher")
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

#[inline]
fn xor(data: &mut [u8], keystream: &[u8]) {
    data.iter_mut()
        .zip(keystream)
        .for_each(|(d, k)| *d ^= k);
}
