//! Scalar ChaCha20 round function.

use crate::state::STATE_WORDS;

/// Double rounds applied per block (20 rounds in total).
pub(crate) const DOUBLE_ROUNDS: usize = 10;

/// State indices of the four column quarter rounds.
pub(crate) const COLUMNS: [[usize; 4]; 4] = [[0, 4, 8, 12], [1, 5, 9, 13], [2, 6, 10, 14], [3, 7, 11, 15]];

/// State indices of the four diagonal quarter rounds.
pub(crate) const DIAGONALS: [[usize; 4]; 4] = [[0, 5, 10, 15], [1, 6, 11, 12], [2, 7, 8, 13], [3, 4, 9, 14]];

/// The ChaCha quarter round operation.
#[inline(always)]
pub(crate) fn quarter_round(state: &mut [u32; STATE_WORDS], a: usize, b: usize, c: usize, d: usize) {
    state[a] = state[a].wrapping_add(state[b]);
    state[d] ^= state[a];
    state[d] = state[d].rotate_left(16);

    state[c] = state[c].wrapping_add(state[d]);
    state[b] ^= state[c];
    state[b] = state[b].rotate_left(12);

    state[a] = state[a].wrapping_add(state[b]);
    state[d] ^= state[a];
    state[d] = state[d].rotate_left(8);

    state[c] = state[c].wrapping_add(state[d]);
    state[b] ^= state[c];
    state[b] = state[b].rotate_left(7);
}

/// One column round followed by one diagonal round.
#[inline(always)]
pub(crate) fn double_round(state: &mut [u32; STATE_WORDS]) {
    for [a, b, c, d] in COLUMNS {
        quarter_round(state, a, b, c, d);
    }
    for [a, b, c, d] in DIAGONALS {
        quarter_round(state, a, b, c, d);
    }
}
