//! AVX2-optimized ChaCha20 block function.
//!
//! Each 256-bit register holds one row of the state matrix twice: the low
//! 128-bit lane belongs to the block at counter `c`, the high lane to the block
//! at counter `c + 1`. Column rounds operate on whole rows; diagonal rounds are
//! reached by rotating rows b, c and d by one, two and three words so that
//! every diagonal lines up as a column.

#[cfg(target_arch = "x86")]
use core::arch::x86::*;
#[cfg(target_arch = "x86_64")]
use core::arch::x86_64::*;

use crate::rounds::DOUBLE_ROUNDS;
use crate::state::{CipherState, BLOCK_SIZE, STATE_WORDS};

/// Number of blocks produced per call.
pub(crate) const PAR_BLOCKS: usize = 2;

/// Writes the keystream blocks for counters `c` and `c + 1` into `output`
/// (128 bytes) and advances the counter by two.
///
/// The second counter is computed with 32-bit lane addition and wraps exactly
/// like the scalar counter does.
///
/// # Safety
///
/// The CPU must support AVX2.
#[target_feature(enable = "avx2")]
pub(crate) unsafe fn generate_blocks_x2(state: &mut CipherState, output: &mut [u8]) {
    assert_eq!(output.len(), PAR_BLOCKS * BLOCK_SIZE);

    let orig = load_rows(state.words());
    let mut rows = orig;

    for _ in 0..DOUBLE_ROUNDS {
        double_round(&mut rows);
    }

    for (row, orig_row) in rows.iter_mut().zip(orig.iter()) {
        *row = _mm256_add_epi32(*row, *orig_row);
    }

    store(&rows, output);
    state.advance(PAR_BLOCKS as u32);
}

/// Broadcasts each state row to both 128-bit lanes and bumps the counter of
/// the high lane by one.
#[inline]
#[target_feature(enable = "avx2")]
unsafe fn load_rows(words: &[u32; STATE_WORDS]) -> [__m256i; 4] {
    let ptr = words.as_ptr() as *const __m128i;
    let a = _mm256_broadcastsi128_si256(_mm_loadu_si128(ptr));
    let b = _mm256_broadcastsi128_si256(_mm_loadu_si128(ptr.add(1)));
    let c = _mm256_broadcastsi128_si256(_mm_loadu_si128(ptr.add(2)));
    let d = _mm256_add_epi32(
        _mm256_broadcastsi128_si256(_mm_loadu_si128(ptr.add(3))),
        _mm256_setr_epi32(0, 0, 0, 0, 1, 0, 0, 0),
    );
    [a, b, c, d]
}

/// Low lanes form the first block, high lanes the second.
#[inline]
#[target_feature(enable = "avx2")]
unsafe fn store(rows: &[__m256i; 4], output: &mut [u8]) {
    let out = output.as_mut_ptr();
    for (i, row) in rows.iter().enumerate() {
        let low = _mm256_castsi256_si128(*row);
        let high = _mm256_extracti128_si256::<1>(*row);
        _mm_storeu_si128(out.add(i * 16) as *mut __m128i, low);
        _mm_storeu_si128(out.add(BLOCK_SIZE + i * 16) as *mut __m128i, high);
    }
}

#[inline]
#[target_feature(enable = "avx2")]
unsafe fn double_round(rows: &mut [__m256i; 4]) {
    let [a, b, c, d] = rows;
    add_xor_rot(a, b, c, d);
    rows_to_diagonals(b, c, d);
    add_xor_rot(a, b, c, d);
    diagonals_to_rows(b, c, d);
}

/// Rotates rows b, c, d left by 1, 2, 3 words so column j holds diagonal j.
#[inline]
#[target_feature(enable = "avx2")]
unsafe fn rows_to_diagonals(b: &mut __m256i, c: &mut __m256i, d: &mut __m256i) {
    *b = _mm256_shuffle_epi32::<0b00_11_10_01>(*b);
    *c = _mm256_shuffle_epi32::<0b01_00_11_10>(*c);
    *d = _mm256_shuffle_epi32::<0b10_01_00_11>(*d);
}

/// Inverse of [`rows_to_diagonals`].
#[inline]
#[target_feature(enable = "avx2")]
unsafe fn diagonals_to_rows(b: &mut __m256i, c: &mut __m256i, d: &mut __m256i) {
    *b = _mm256_shuffle_epi32::<0b10_01_00_11>(*b);
    *c = _mm256_shuffle_epi32::<0b01_00_11_10>(*c);
    *d = _mm256_shuffle_epi32::<0b00_11_10_01>(*d);
}

/// Four quarter rounds at once, one per column of (a, b, c, d), in both lanes.
#[inline]
#[target_feature(enable = "avx2")]
unsafe fn add_xor_rot(a: &mut __m256i, b: &mut __m256i, c: &mut __m256i, d: &mut __m256i) {
    // ROL16 and ROL8 are whole-byte rotations, so a byte shuffle does them
    let rot16 = _mm256_setr_epi8(
        2, 3, 0, 1, 6, 7, 4, 5, 10, 11, 8, 9, 14, 15, 12, 13, 2, 3, 0, 1, 6, 7, 4, 5, 10, 11, 8, 9,
        14, 15, 12, 13,
    );
    let rot8 = _mm256_setr_epi8(
        3, 0, 1, 2, 7, 4, 5, 6, 11, 8, 9, 10, 15, 12, 13, 14, 3, 0, 1, 2, 7, 4, 5, 6, 11, 8, 9, 10,
        15, 12, 13, 14,
    );

    *a = _mm256_add_epi32(*a, *b);
    *d = _mm256_xor_si256(*d, *a);
    *d = _mm256_shuffle_epi8(*d, rot16);

    *c = _mm256_add_epi32(*c, *d);
    *b = _mm256_xor_si256(*b, *c);
    *b = _mm256_or_si256(_mm256_slli_epi32::<12>(*b), _mm256_srli_epi32::<20>(*b));

    *a = _mm256_add_epi32(*a, *b);
    *d = _mm256_xor_si256(*d, *a);
    *d = _mm256_shuffle_epi8(*d, rot8);

    *c = _mm256_add_epi32(*c, *d);
    *b = _mm256_xor_si256(*b, *c);
    *b = _mm256_or_si256(_mm256_slli_epi32::<7>(*b), _mm256_srli_epi32::<25>(*b));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chacha_scalar;
    use crate::rounds::{self, DIAGONALS};
    use rand::{Rng, RngCore, SeedableRng};

    fn avx2_available() -> bool {
        if !std::arch::is_x86_feature_detected!("avx2") {
            println!("AVX2 not available, skipping test");
            return false;
        }
        true
    }

    fn lanes(v: __m256i) -> [u32; 8] {
        let mut out = [0u32; 8];
        unsafe { _mm256_storeu_si256(out.as_mut_ptr() as *mut __m256i, v) };
        out
    }

    /// Rows whose lanes hold their own state index, in both 128-bit halves.
    fn index_rows() -> [__m256i; 4] {
        let mut words = [0u32; STATE_WORDS];
        for (i, w) in words.iter_mut().enumerate() {
            *w = i as u32;
        }
        let mut rows = unsafe { load_rows(&words) };
        // undo the counter bump so both halves are identical
        rows[3] = unsafe { _mm256_sub_epi32(rows[3], _mm256_setr_epi32(0, 0, 0, 0, 1, 0, 0, 0)) };
        rows
    }

    fn scalar_pair(state: &CipherState) -> [u8; 2 * BLOCK_SIZE] {
        let mut state = state.clone();
        let mut out = [0u8; 2 * BLOCK_SIZE];
        chacha_scalar::generate_block(&mut state, &mut out[..BLOCK_SIZE]);
        chacha_scalar::generate_block(&mut state, &mut out[BLOCK_SIZE..]);
        out
    }

    #[test]
    fn test_diagonal_shuffle_matches_scalar_indexing() {
        if !avx2_available() {
            return;
        }

        let [a, mut b, mut c, mut d] = index_rows();
        unsafe { rows_to_diagonals(&mut b, &mut c, &mut d) };

        let (a, b, c, d) = (lanes(a), lanes(b), lanes(c), lanes(d));
        for lane in 0..8 {
            let column = [a[lane], b[lane], c[lane], d[lane]].map(|i| i as usize);
            assert_eq!(column, DIAGONALS[lane % 4], "lane {lane} is not diagonal {}", lane % 4);
        }
    }

    #[test]
    fn test_diagonal_shuffle_is_inverted() {
        if !avx2_available() {
            return;
        }

        let original = index_rows();
        let [_, mut b, mut c, mut d] = original;
        unsafe {
            rows_to_diagonals(&mut b, &mut c, &mut d);
            diagonals_to_rows(&mut b, &mut c, &mut d);
        }

        assert_eq!(lanes(b), lanes(original[1]));
        assert_eq!(lanes(c), lanes(original[2]));
        assert_eq!(lanes(d), lanes(original[3]));
    }

    #[test]
    fn test_double_round_matches_scalar() {
        if !avx2_available() {
            return;
        }

        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
        for _ in 0..32 {
            let mut words = [0u32; STATE_WORDS];
            rng.fill(&mut words[..]);

            let mut rows = unsafe { load_rows(&words) };
            unsafe { double_round(&mut rows) };

            let mut low = words;
            rounds::double_round(&mut low);
            let mut high = words;
            high[12] = high[12].wrapping_add(1);
            rounds::double_round(&mut high);

            for (i, row) in rows.iter().enumerate() {
                let l = lanes(*row);
                assert_eq!(&l[..4], &low[i * 4..i * 4 + 4], "row {i} low lane");
                assert_eq!(&l[4..], &high[i * 4..i * 4 + 4], "row {i} high lane");
            }
        }
    }

    #[test]
    fn test_avx2_produces_correct_output() {
        if !avx2_available() {
            return;
        }

        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        for _ in 0..64 {
            let mut key = [0u32; 8];
            let mut nonce = [0u32; 3];
            rng.fill(&mut key[..]);
            rng.fill(&mut nonce[..]);
            let mut state = CipherState::new(&key, rng.next_u32(), &nonce);

            let expected = scalar_pair(&state);
            let start = state.block_count();
            let mut output = [0u8; 2 * BLOCK_SIZE];
            unsafe { generate_blocks_x2(&mut state, &mut output) };

            assert_eq!(&output[..BLOCK_SIZE], &expected[..BLOCK_SIZE], "first block mismatch");
            assert_eq!(&output[BLOCK_SIZE..], &expected[BLOCK_SIZE..], "second block mismatch");
            assert_eq!(state.block_count(), start.wrapping_add(2));
        }
    }

    #[test]
    fn test_avx2_counter_wrap() {
        if !avx2_available() {
            return;
        }

        let mut state = CipherState::new(&[7u32; 8], u32::MAX, &[1, 2, 3]);
        let expected = scalar_pair(&state);

        let mut output = [0u8; 2 * BLOCK_SIZE];
        unsafe { generate_blocks_x2(&mut state, &mut output) };

        assert_eq!(output, expected);
        assert_eq!(state.block_count(), 1);
    }
}
