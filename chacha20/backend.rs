//! Keystream backends and their selection.
//!
//! Both backends produce byte-identical keystreams; they differ only in how
//! many blocks one invocation computes.

use crate::chacha_scalar;
use crate::error::{Error, Result};
use crate::state::{CipherState, BLOCK_SIZE};
use core::fmt;
use core::str::FromStr;
use std::sync::OnceLock;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
use crate::chacha_avx2;

/// Environment variable consulted by [`Backend::detect`].
///
/// Accepts `auto`, `scalar` or `avx2`.
pub const BACKEND_ENV: &str = "CHACHA20_BACKEND";

/// Block function implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Portable implementation, one block per invocation.
    Scalar,
    /// AVX2 implementation, two blocks per invocation.
    Avx2,
}

impl Backend {
    /// Returns whether this backend can run on the current CPU.
    pub fn is_available(self) -> bool {
        match self {
            Backend::Scalar => true,
            Backend::Avx2 => avx2_detected(),
        }
    }

    /// Number of blocks computed per invocation of the block function.
    pub fn parallel_blocks(self) -> usize {
        match self {
            Backend::Scalar => 1,
            Backend::Avx2 => 2,
        }
    }

    /// Returns the backend to use for this process.
    ///
    /// Detection runs once. The `CHACHA20_BACKEND` variable can force a
    /// backend; a value that is unknown or names a backend the CPU lacks is
    /// ignored with a warning and the best available backend is used.
    pub fn detect() -> Backend {
        static DETECTED: OnceLock<Backend> = OnceLock::new();

        *DETECTED.get_or_init(|| {
            let value = std::env::var(BACKEND_ENV).ok();
            let backend = select(value.as_deref(), Backend::is_available);
            tracing::debug!(%backend, "selected ChaCha20 backend");
            backend
        })
    }

    /// The fastest backend supported by the current CPU.
    pub fn best_available() -> Backend {
        fastest(Backend::is_available)
    }

    /// Parses a configuration value; `auto` yields `None`.
    pub fn from_config(value: &str) -> Result<Option<Backend>> {
        if value.trim().eq_ignore_ascii_case("auto") {
            return Ok(None);
        }
        value.parse().map(Some)
    }

    /// Fills `output` with keystream blocks starting at the state's counter
    /// and advances the counter by one per block.
    ///
    /// `output.len()` must be a multiple of 64.
    pub(crate) fn fill_blocks(self, state: &mut CipherState, output: &mut [u8]) {
        assert_eq!(
            output.len() % BLOCK_SIZE,
            0,
            "keystream output must be a whole number of blocks"
        );

        let mut offset = 0;

        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            if self == Backend::Avx2 && avx2_detected() {
                let chunk = chacha_avx2::PAR_BLOCKS * BLOCK_SIZE;
                while offset + chunk <= output.len() {
                    // SAFETY: AVX2 support was checked above.
                    unsafe {
                        chacha_avx2::generate_blocks_x2(state, &mut output[offset..offset + chunk]);
                    }
                    offset += chunk;
                }
            }
        }

        while offset < output.len() {
            chacha_scalar::generate_block(state, &mut output[offset..offset + BLOCK_SIZE]);
            offset += BLOCK_SIZE;
        }
    }

    /// Generates `count` keystream blocks starting at the state's counter.
    pub fn generate_blocks(self, state: &mut CipherState, count: usize) -> Vec<u8> {
        let mut output = vec![0u8; count * BLOCK_SIZE];
        self.fill_blocks(state, &mut output);
        output
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Scalar => f.write_str("scalar"),
            Backend::Avx2 => f.write_str("avx2"),
        }
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scalar" => Ok(Backend::Scalar),
            "avx2" => Ok(Backend::Avx2),
            other => Err(Error::UnknownBackend(other.to_string())),
        }
    }
}

/// Resolves a `CHACHA20_BACKEND` value against the backends `available`
/// reports. Unset, `auto`, unknown and unavailable values all resolve to the
/// fastest available backend.
fn select(value: Option<&str>, available: impl Fn(Backend) -> bool) -> Backend {
    let Some(value) = value else {
        return fastest(&available);
    };

    match Backend::from_config(value) {
        Ok(Some(backend)) if available(backend) => backend,
        Ok(Some(backend)) => {
            tracing::warn!(%backend, "requested ChaCha20 backend is not supported by this CPU");
            fastest(&available)
        }
        Ok(None) => fastest(&available),
        Err(err) => {
            tracing::warn!(error = %err, "ignoring {}", BACKEND_ENV);
            fastest(&available)
        }
    }
}

fn fastest(available: impl Fn(Backend) -> bool) -> Backend {
    if available(Backend::Avx2) {
        Backend::Avx2
    } else {
        Backend::Scalar
    }
}

#[inline]
fn avx2_detected() -> bool {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        std::arch::is_x86_feature_detected!("avx2")
    }
    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rfc_state(block_count: u32) -> CipherState {
        let key = [
            0x00010203, 0x04050607, 0x08090a0b, 0x0c0d0e0f, 0x10111213, 0x14151617, 0x18191a1b,
            0x1c1d1e1f,
        ];
        CipherState::new(&key, block_count, &[0, 0x4a, 0])
    }

    #[test]
    fn test_parse_backend() {
        assert_eq!("scalar".parse::<Backend>().unwrap(), Backend::Scalar);
        assert_eq!(" AVX2 ".parse::<Backend>().unwrap(), Backend::Avx2);
        assert_eq!(
            "neon".parse::<Backend>().unwrap_err(),
            Error::UnknownBackend("neon".to_string())
        );
        assert_eq!(
            "soft".parse::<Backend>().unwrap_err(),
            Error::UnknownBackend("soft".to_string())
        );
        assert_eq!(Backend::from_config("auto").unwrap(), None);
        assert_eq!(Backend::from_config("avx2").unwrap(), Some(Backend::Avx2));

        for backend in [Backend::Scalar, Backend::Avx2] {
            assert_eq!(backend.to_string().parse::<Backend>().unwrap(), backend);
        }
    }

    #[test]
    fn test_detect_is_available() {
        assert!(Backend::Scalar.is_available());
        assert!(Backend::detect().is_available());
        assert!(Backend::best_available().is_available());
        assert_eq!(Backend::detect(), Backend::detect());
    }

    #[test]
    fn test_select_honours_override() {
        let all = |_: Backend| true;
        let scalar_only = |backend: Backend| backend == Backend::Scalar;

        assert_eq!(select(None, all), Backend::Avx2);
        assert_eq!(select(None, scalar_only), Backend::Scalar);
        assert_eq!(select(Some("auto"), all), Backend::Avx2);
        assert_eq!(select(Some("AUTO"), scalar_only), Backend::Scalar);
        assert_eq!(select(Some("scalar"), all), Backend::Scalar);
        assert_eq!(select(Some(" Scalar "), scalar_only), Backend::Scalar);
        assert_eq!(select(Some("avx2"), all), Backend::Avx2);
    }

    #[test]
    fn test_select_falls_back_on_bad_override() {
        let all = |_: Backend| true;
        let scalar_only = |backend: Backend| backend == Backend::Scalar;

        // requested backend missing on this CPU
        assert_eq!(select(Some("avx2"), scalar_only), Backend::Scalar);

        // unknown names
        assert_eq!(select(Some("neon"), all), Backend::Avx2);
        assert_eq!(select(Some("soft"), scalar_only), Backend::Scalar);
        assert_eq!(select(Some(""), all), Backend::Avx2);
    }

    #[test]
    fn test_select_uses_cpu_detection() {
        assert_eq!(select(None, Backend::is_available), Backend::best_available());
        assert_eq!(select(Some("avx2"), Backend::is_available), Backend::best_available());
        assert!(Backend::best_available().is_available());
    }

    #[test]
    fn test_backends_generate_identical_keystreams() {
        for count in 0..=7 {
            let mut scalar_state = rfc_state(1);
            let mut avx2_state = rfc_state(1);

            let scalar = Backend::Scalar.generate_blocks(&mut scalar_state, count);
            let avx2 = Backend::Avx2.generate_blocks(&mut avx2_state, count);

            assert_eq!(scalar.len(), count * BLOCK_SIZE);
            assert_eq!(scalar, avx2, "keystream mismatch for {count} blocks");
            assert_eq!(scalar_state.block_count(), 1 + count as u32);
            assert_eq!(avx2_state.block_count(), 1 + count as u32);
        }
    }

    #[test]
    fn test_generate_blocks_is_contiguous() {
        let mut whole_state = rfc_state(5);
        let whole = Backend::detect().generate_blocks(&mut whole_state, 6);

        let mut split_state = rfc_state(5);
        let mut split = Backend::detect().generate_blocks(&mut split_state, 1);
        split.extend(Backend::detect().generate_blocks(&mut split_state, 3));
        split.extend(Backend::Scalar.generate_blocks(&mut split_state, 2));

        assert_eq!(whole, split);
    }

    #[test]
    #[should_panic(expected = "whole number of blocks")]
    fn test_fill_blocks_rejects_partial_block() {
        let mut state = rfc_state(0);
        let mut output = [0u8; 65];
        Backend::Scalar.fill_blocks(&mut state, &mut output);
    }
}
