//! The opaque crypto-backend boundary.
//!
//! The sequencer consumes scalar multiplication, pairing checks, FFTs and a
//! fixed hash through the [`Backend`] trait and never looks inside. Real
//! curve backends implement the trait over their own point and scalar
//! types; the [`ReferenceBackend`] here works over the Goldilocks field
//! with its additive group standing in for a curve group, which preserves
//! every algebraic property the worker pool relies on (commutative,
//! associative reduction) while staying cheap enough for tests.
//!
//! Backends must be deterministic and side-effect-free: the same inputs
//! always produce the same outputs on any instance.

use std::fmt;

use crate::error::{BackendError, BackendResult};
use crate::field::Fp;

/// One independent instance of the cryptographic backend.
///
/// Each worker in the pool owns its own instance; instances are never
/// shared across concurrent top-level proving calls.
pub trait Backend: Send + Sync + 'static {
    /// Group element (curve point).
    type Point: Clone + Send + Sync + PartialEq + fmt::Debug + 'static;
    /// Scalar multiplier.
    type Scalar: Clone + Send + Sync + 'static;
    /// Field element for polynomial domains.
    type Field: Clone + Send + Sync + PartialEq + fmt::Debug + 'static;

    /// The group identity (point at infinity).
    fn identity(&self) -> Self::Point;

    /// Group addition. Commutative and associative; the pool's chunked
    /// reduction depends on both.
    fn add_points(&self, a: &Self::Point, b: &Self::Point) -> Self::Point;

    /// Multi-scalar multiplication: `sum(points[i] * scalars[i])`.
    fn msm(&self, points: &[Self::Point], scalars: &[Self::Scalar]) -> BackendResult<Self::Point>;

    /// Forward (or inverse) transform over a power-of-two domain. The
    /// inverse includes the `1/n` scaling.
    fn fft(&self, values: Vec<Self::Field>, inverse: bool) -> BackendResult<Vec<Self::Field>>;

    /// One decimation-in-time butterfly stage: combine the transforms of
    /// the even- and odd-indexed halves into the transform of the full
    /// domain. Used by the pool to merge sub-transforms computed on
    /// different workers.
    fn combine_fft_halves(
        &self,
        even: Vec<Self::Field>,
        odd: Vec<Self::Field>,
        inverse: bool,
    ) -> BackendResult<Vec<Self::Field>>;

    /// Pairing check over two group elements.
    fn pairing_check(&self, lhs: &Self::Point, rhs: &Self::Point) -> BackendResult<bool>;

    /// Fixed hash over leaf-sized byte strings.
    fn hash32(&self, data: &[u8]) -> [u8; 32];

    /// Derive a scalar from digest bytes.
    fn scalar_from_bytes(&self, bytes: &[u8]) -> Self::Scalar;

    /// Derive a field element from digest bytes.
    fn field_from_bytes(&self, bytes: &[u8]) -> Self::Field;

    /// Derive a point from digest bytes.
    fn point_from_bytes(&self, bytes: &[u8]) -> Self::Point;

    /// Canonical encoding of a point.
    fn point_to_bytes(&self, point: &Self::Point) -> [u8; 32];
}

/// Constructs independent backend instances, one per pool worker.
pub trait BackendFactory: Send + Sync + 'static {
    type B: Backend;

    /// Create a fresh instance. Failing here (resource exhaustion, missing
    /// SRS, ...) aborts pool initialization.
    fn create(&self) -> BackendResult<Self::B>;
}

/// Reference backend over the Goldilocks field.
#[derive(Clone, Debug, Default)]
pub struct ReferenceBackend;

impl ReferenceBackend {
    pub fn new() -> Self {
        Self
    }

    fn check_domain(values: &[Fp]) -> BackendResult<u32> {
        let n = values.len();
        if n == 0 || !n.is_power_of_two() {
            return Err(BackendError::InvalidInput(format!(
                "FFT domain size {n} is not a positive power of two"
            )));
        }
        let log_n = n.trailing_zeros();
        if log_n > crate::field::TWO_ADICITY {
            return Err(BackendError::InvalidInput(format!(
                "FFT domain size {n} exceeds field 2-adicity"
            )));
        }
        Ok(log_n)
    }
}

impl Backend for ReferenceBackend {
    type Point = Fp;
    type Scalar = Fp;
    type Field = Fp;

    fn identity(&self) -> Fp {
        Fp::ZERO
    }

    fn add_points(&self, a: &Fp, b: &Fp) -> Fp {
        *a + *b
    }

    fn msm(&self, points: &[Fp], scalars: &[Fp]) -> BackendResult<Fp> {
        if points.len() != scalars.len() {
            return Err(BackendError::InvalidInput(format!(
                "msm length mismatch: {} points vs {} scalars",
                points.len(),
                scalars.len()
            )));
        }
        if points.is_empty() {
            return Err(BackendError::InvalidInput("msm over empty input".into()));
        }
        let mut acc = Fp::ZERO;
        for (point, scalar) in points.iter().zip(scalars) {
            acc += *point * *scalar;
        }
        Ok(acc)
    }

    fn fft(&self, mut values: Vec<Fp>, inverse: bool) -> BackendResult<Vec<Fp>> {
        let log_n = Self::check_domain(&values)?;
        let n = values.len();
        if n == 1 {
            return Ok(values);
        }

        // Bit-reversal permutation, then iterative radix-2 butterflies.
        for i in 0..n {
            let j = ((i as u64).reverse_bits() >> (64 - log_n)) as usize;
            if j > i {
                values.swap(i, j);
            }
        }
        for stage in 1..=log_n {
            let half = 1usize << (stage - 1);
            let step = Fp::root_of_unity(stage);
            let step = if inverse { step.inverse() } else { step };
            let mut start = 0;
            while start < n {
                let mut twiddle = Fp::ONE;
                for k in start..start + half {
                    let a = values[k];
                    let b = values[k + half] * twiddle;
                    values[k] = a + b;
                    values[k + half] = a - b;
                    twiddle *= step;
                }
                start += half * 2;
            }
        }
        if inverse {
            let n_inv = Fp::new(n as u64).inverse();
            for value in &mut values {
                *value *= n_inv;
            }
        }
        Ok(values)
    }

    fn combine_fft_halves(
        &self,
        even: Vec<Fp>,
        odd: Vec<Fp>,
        inverse: bool,
    ) -> BackendResult<Vec<Fp>> {
        if even.len() != odd.len() || even.is_empty() {
            return Err(BackendError::InvalidInput(
                "combine requires equal-length non-empty halves".into(),
            ));
        }
        let half = even.len();
        let n = half * 2;
        Self::check_domain(&even)?;
        let log_n = n.trailing_zeros();
        if log_n > crate::field::TWO_ADICITY {
            return Err(BackendError::InvalidInput(format!(
                "FFT domain size {n} exceeds field 2-adicity"
            )));
        }

        let step = Fp::root_of_unity(log_n);
        let step = if inverse { step.inverse() } else { step };
        let half_inv = if inverse {
            Fp::new(2).inverse()
        } else {
            Fp::ONE
        };

        let mut out = vec![Fp::ZERO; n];
        let mut twiddle = Fp::ONE;
        for k in 0..half {
            let t = odd[k] * twiddle;
            out[k] = (even[k] + t) * half_inv;
            out[k + half] = (even[k] - t) * half_inv;
            twiddle *= step;
        }
        Ok(out)
    }

    fn pairing_check(&self, lhs: &Fp, rhs: &Fp) -> BackendResult<bool> {
        // Degenerate pairing of the reference group: both sides live in the
        // same additive group, so the check reduces to equality.
        Ok(lhs == rhs)
    }

    fn hash32(&self, data: &[u8]) -> [u8; 32] {
        *blake3::hash(data).as_bytes()
    }

    fn scalar_from_bytes(&self, bytes: &[u8]) -> Fp {
        Fp::from_le_bytes(bytes)
    }

    fn field_from_bytes(&self, bytes: &[u8]) -> Fp {
        Fp::from_le_bytes(bytes)
    }

    fn point_from_bytes(&self, bytes: &[u8]) -> Fp {
        Fp::from_le_bytes(bytes)
    }

    fn point_to_bytes(&self, point: &Fp) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[..8].copy_from_slice(&point.value().to_le_bytes());
        out
    }
}

/// Factory for [`ReferenceBackend`] instances.
#[derive(Clone, Debug, Default)]
pub struct ReferenceBackendFactory;

impl ReferenceBackendFactory {
    pub fn new() -> Self {
        Self
    }
}

impl BackendFactory for ReferenceBackendFactory {
    type B = ReferenceBackend;

    fn create(&self) -> BackendResult<ReferenceBackend> {
        Ok(ReferenceBackend::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive_dft(values: &[Fp], inverse: bool) -> Vec<Fp> {
        let n = values.len();
        let log_n = n.trailing_zeros();
        let w = Fp::root_of_unity(log_n);
        let w = if inverse { w.inverse() } else { w };
        let mut out = Vec::with_capacity(n);
        for k in 0..n as u64 {
            let mut acc = Fp::ZERO;
            for (j, value) in values.iter().enumerate() {
                acc += *value * w.pow(k * j as u64);
            }
            out.push(acc);
        }
        if inverse {
            let n_inv = Fp::new(n as u64).inverse();
            for value in &mut out {
                *value *= n_inv;
            }
        }
        out
    }

    fn sample(n: usize) -> Vec<Fp> {
        (0..n as u64).map(|i| Fp::new(i * i + 3)).collect()
    }

    #[test]
    fn test_fft_matches_naive_dft() {
        for n in [1usize, 2, 4, 8, 32] {
            let values = sample(n);
            let backend = ReferenceBackend::new();
            assert_eq!(backend.fft(values.clone(), false).unwrap(), naive_dft(&values, false));
        }
    }

    #[test]
    fn test_fft_inverse_roundtrip() {
        let backend = ReferenceBackend::new();
        let values = sample(64);
        let transformed = backend.fft(values.clone(), false).unwrap();
        assert_eq!(backend.fft(transformed, true).unwrap(), values);
    }

    #[test]
    fn test_combine_halves_equals_full_transform() {
        let backend = ReferenceBackend::new();
        for inverse in [false, true] {
            let values = sample(32);
            let even: Vec<Fp> = values.iter().step_by(2).copied().collect();
            let odd: Vec<Fp> = values.iter().skip(1).step_by(2).copied().collect();
            let combined = backend
                .combine_fft_halves(
                    backend.fft(even, inverse).unwrap(),
                    backend.fft(odd, inverse).unwrap(),
                    inverse,
                )
                .unwrap();
            assert_eq!(combined, backend.fft(values, inverse).unwrap());
        }
    }

    #[test]
    fn test_fft_rejects_bad_domain() {
        let backend = ReferenceBackend::new();
        assert!(backend.fft(vec![], false).is_err());
        assert!(backend.fft(sample(3), false).is_err());
    }

    #[test]
    fn test_msm_input_validation() {
        let backend = ReferenceBackend::new();
        assert!(backend.msm(&[], &[]).is_err());
        assert!(backend.msm(&[Fp::ONE], &[]).is_err());
    }

    #[test]
    fn test_msm_weighted_sum() {
        let backend = ReferenceBackend::new();
        let points = [Fp::new(2), Fp::new(3)];
        let scalars = [Fp::new(10), Fp::new(100)];
        assert_eq!(backend.msm(&points, &scalars).unwrap(), Fp::new(320));
    }
}
