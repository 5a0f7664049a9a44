//! ChaCha20 state layout as defined by RFC 8439 section 2.3.
//!
//! ```text
//! cccccccc  cccccccc  cccccccc  cccccccc
//! kkkkkkkk  kkkkkkkk  kkkkkkkk  kkkkkkkk
//! kkkkkkkk  kkkkkkkk  kkkkkkkk  kkkkkkkk
//! bbbbbbbb  nnnnnnnn  nnnnnnnn  nnnnnnnn
//! ```
//!
//! c = constant, k = key, b = block counter, n = nonce.

use crate::error::{Error, Result};
use core::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Constants for ChaCha: "expand 32-byte k" in little-endian
pub const CONSTANTS: [u32; 4] = [0x61707865, 0x3320646e, 0x79622d32, 0x6b206574];

/// Number of 32-bit words in a key (256 bits)
pub const KEY_WORDS: usize = 8;

/// Number of 32-bit words in a nonce (96 bits)
pub const NONCE_WORDS: usize = 3;

/// Number of 32-bit words in the cipher state
pub const STATE_WORDS: usize = 16;

/// Size of one keystream block in bytes
pub const BLOCK_SIZE: usize = 64;

/// Index of the block counter inside the state.
pub(crate) const COUNTER_INDEX: usize = 12;

/// The 4x4 ChaCha20 state matrix.
///
/// Only the block counter (word 12) changes after construction. The state
/// holds key and nonce material and is zeroized when dropped; its `Debug`
/// output never shows the words.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CipherState {
    words: [u32; STATE_WORDS],
}

impl CipherState {
    /// Builds the state from key and nonce words.
    ///
    /// Key and nonce words are given in big-endian order: the most significant
    /// word first, and each word holds four key bytes most significant byte
    /// first. So the RFC 8439 key `00 01 02 03 ...` is `[0x00010203, ...]`.
    /// Each word is byte-swapped into the little-endian layout the state uses.
    ///
    /// `block_count` is the counter of the first block that will be generated.
    pub fn new(key: &[u32; KEY_WORDS], block_count: u32, nonce: &[u32; NONCE_WORDS]) -> Self {
        let mut words = [0u32; STATE_WORDS];
        words[0..4].copy_from_slice(&CONSTANTS);

        for (state_word, key_word) in words[4..12].iter_mut().zip(key.iter()) {
            *state_word = key_word.swap_bytes();
        }

        words[COUNTER_INDEX] = block_count;

        for (state_word, nonce_word) in words[13..16].iter_mut().zip(nonce.iter()) {
            *state_word = nonce_word.swap_bytes();
        }

        CipherState { words }
    }

    /// Builds the state from runtime-sized word slices.
    ///
    /// Fails if `key` is not exactly 8 words or `nonce` is not exactly 3 words.
    pub fn from_words(key: &[u32], block_count: u32, nonce: &[u32]) -> Result<Self> {
        let key: &[u32; KEY_WORDS] = key.try_into().map_err(|_| Error::InvalidKeyLength {
            expected: KEY_WORDS,
            actual: key.len(),
        })?;
        let nonce: &[u32; NONCE_WORDS] =
            nonce.try_into().map_err(|_| Error::InvalidNonceLength {
                expected: NONCE_WORDS,
                actual: nonce.len(),
            })?;

        Ok(Self::new(key, block_count, nonce))
    }

    /// Builds the state from the RFC 8439 byte representation: a 32-byte key
    /// and a 12-byte nonce, each read as little-endian words.
    pub fn from_bytes(key: &[u8], block_count: u32, nonce: &[u8]) -> Result<Self> {
        if key.len() != KEY_WORDS * 4 {
            return Err(Error::InvalidKeyLength {
                expected: KEY_WORDS * 4,
                actual: key.len(),
            });
        }
        if nonce.len() != NONCE_WORDS * 4 {
            return Err(Error::InvalidNonceLength {
                expected: NONCE_WORDS * 4,
                actual: nonce.len(),
            });
        }

        let mut words = [0u32; STATE_WORDS];
        words[0..4].copy_from_slice(&CONSTANTS);
        load_le(&mut words[4..12], key);
        words[COUNTER_INDEX] = block_count;
        load_le(&mut words[13..16], nonce);

        Ok(CipherState { words })
    }

    /// Returns the counter of the next block to be generated.
    #[inline]
    pub fn block_count(&self) -> u32 {
        self.words[COUNTER_INDEX]
    }

    /// Sets the counter of the next block to be generated.
    #[inline]
    pub fn set_block_count(&mut self, block_count: u32) {
        self.words[COUNTER_INDEX] = block_count;
    }

    /// Advances the block counter, wrapping at 2^32.
    #[inline]
    pub(crate) fn advance(&mut self, blocks: u32) {
        self.words[COUNTER_INDEX] = self.words[COUNTER_INDEX].wrapping_add(blocks);
    }

    #[inline]
    pub(crate) fn words(&self) -> &[u32; STATE_WORDS] {
        &self.words
    }
}

impl fmt::Debug for CipherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherState").finish_non_exhaustive()
    }
}

fn load_le(words: &mut [u32], bytes: &[u8]) {
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
}
