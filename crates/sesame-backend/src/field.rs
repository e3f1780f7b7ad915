//! Goldilocks prime field `p = 2^64 - 2^32 + 1`.
//!
//! Backs the reference crypto backend: its multiplicative group has
//! 2-adicity 32, so every power-of-two FFT domain up to `2^32` has a
//! primitive root of unity. Elements are kept in canonical form
//! (`0 <= value < p`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, MulAssign, Neg, Sub, SubAssign};

/// The field modulus `2^64 - 2^32 + 1`.
pub const MODULUS: u64 = 0xFFFF_FFFF_0000_0001;

/// Largest `k` such that `2^k` divides `p - 1`.
pub const TWO_ADICITY: u32 = 32;

/// A generator of the `2^32` roots-of-unity subgroup.
const POWER_OF_TWO_GENERATOR: u64 = 1_753_635_133_440_165_772;

/// A Goldilocks field element in canonical form.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fp(u64);

impl Fp {
    pub const ZERO: Fp = Fp(0);
    pub const ONE: Fp = Fp(1);

    /// Create an element, reducing modulo `p`.
    pub const fn new(value: u64) -> Self {
        Self(value % MODULUS)
    }

    /// Canonical representative.
    pub const fn value(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Derive an element from the first 8 bytes of a digest.
    pub fn from_le_bytes(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 8];
        let take = bytes.len().min(8);
        buf[..take].copy_from_slice(&bytes[..take]);
        Self::new(u64::from_le_bytes(buf))
    }

    /// Modular exponentiation by squaring.
    pub fn pow(&self, mut exp: u64) -> Self {
        let mut base = *self;
        let mut acc = Fp::ONE;
        while exp > 0 {
            if exp & 1 == 1 {
                acc *= base;
            }
            base *= base;
            exp >>= 1;
        }
        acc
    }

    /// Multiplicative inverse via Fermat; zero maps to zero.
    pub fn inverse(&self) -> Self {
        self.pow(MODULUS - 2)
    }

    /// Primitive `2^log_n`-th root of unity. `log_n` must not exceed
    /// [`TWO_ADICITY`].
    pub fn root_of_unity(log_n: u32) -> Self {
        assert!(log_n <= TWO_ADICITY, "domain 2^{log_n} exceeds field 2-adicity");
        Fp(POWER_OF_TWO_GENERATOR).pow(1u64 << (TWO_ADICITY - log_n))
    }
}

impl Add for Fp {
    type Output = Fp;
    fn add(self, rhs: Fp) -> Fp {
        let (sum, overflow) = self.0.overflowing_add(rhs.0);
        if overflow || sum >= MODULUS {
            Fp(sum.wrapping_sub(MODULUS))
        } else {
            Fp(sum)
        }
    }
}

impl Sub for Fp {
    type Output = Fp;
    fn sub(self, rhs: Fp) -> Fp {
        if self.0 >= rhs.0 {
            Fp(self.0 - rhs.0)
        } else {
            Fp(self.0.wrapping_sub(rhs.0).wrapping_add(MODULUS))
        }
    }
}

impl Mul for Fp {
    type Output = Fp;
    fn mul(self, rhs: Fp) -> Fp {
        Fp(((self.0 as u128 * rhs.0 as u128) % MODULUS as u128) as u64)
    }
}

impl Neg for Fp {
    type Output = Fp;
    fn neg(self) -> Fp {
        Fp::ZERO - self
    }
}

impl AddAssign for Fp {
    fn add_assign(&mut self, rhs: Fp) {
        *self = *self + rhs;
    }
}

impl SubAssign for Fp {
    fn sub_assign(&mut self, rhs: Fp) {
        *self = *self - rhs;
    }
}

impl MulAssign for Fp {
    fn mul_assign(&mut self, rhs: Fp) {
        *self = *self * rhs;
    }
}

impl fmt::Debug for Fp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fp({})", self.0)
    }
}

impl fmt::Display for Fp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Fp {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}
