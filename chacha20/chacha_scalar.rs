//! Portable ChaCha20 block function producing one 64-byte block per call.

use crate::rounds::{double_round, DOUBLE_ROUNDS};
use crate::state::{CipherState, BLOCK_SIZE, STATE_WORDS};

/// Runs the 20 rounds on a copy of `state` and adds the original state back.
#[inline]
pub(crate) fn chacha20_block(state: &[u32; STATE_WORDS]) -> [u32; STATE_WORDS] {
    let mut working_state = *state;

    for _ in 0..DOUBLE_ROUNDS {
        double_round(&mut working_state);
    }

    working_state
        .iter_mut()
        .zip(state.iter())
        .for_each(|(ws, s)| *ws = ws.wrapping_add(*s));

    working_state
}

/// Serialize the state to a byte array (little-endian).
#[inline]
pub(crate) fn serialize_state(state: &[u32; STATE_WORDS], output: &mut [u8]) {
    debug_assert_eq!(output.len(), BLOCK_SIZE);
    for (chunk, word) in output.chunks_exact_mut(4).zip(state.iter()) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
}

/// Writes the keystream block for the current counter and advances it by one.
#[inline]
pub(crate) fn generate_block(state: &mut CipherState, output: &mut [u8]) {
    let block = chacha20_block(state.words());
    serialize_state(&block, output);
    state.advance(1);
}
