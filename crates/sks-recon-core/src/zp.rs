//! Integers modulo a prime.
//!
//! A [`Zp`] carries its modulus so that values from different fields can
//! never be silently mixed. Binary operations between elements of different
//! fields panic: that is always a programming error, never a data error.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Div, Mul, MulAssign, Neg, Sub};
use std::sync::{Arc, OnceLock};

use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, ToPrimitive, Zero};

use crate::error::Result;

/// Width in bytes of an element of the SKS field on the wire.
pub const SKS_ZP_NBYTES: usize = 17;

// 530512889551602322505127520352579437339, little-endian base 2^32.
const P_SKS_DIGITS: [u32; 5] = [0x30a5431b, 0xc91f85d9, 0x878b1fdf, 0x8f1d10e4, 0x1];

static P_SKS: OnceLock<Arc<BigUint>> = OnceLock::new();

/// The prime defining the field used by SKS reconciliation.
pub fn p_sks() -> Arc<BigUint> {
    P_SKS
        .get_or_init(|| Arc::new(BigUint::from_slice(&P_SKS_DIGITS)))
        .clone()
}

/// Zero-pad a little-endian element encoding to the SKS field width.
pub fn pad_sks_element(mut bytes: Vec<u8>) -> Vec<u8> {
    if bytes.len() < SKS_ZP_NBYTES {
        bytes.resize(SKS_ZP_NBYTES, 0);
    }
    bytes
}

/// Convert a hex-encoded digest into an SKS field element.
///
/// The digest bytes are zero-padded to field width and read little-endian.
pub fn digest_to_zp(digest: &str) -> Result<Zp> {
    let bytes = hex::decode(digest)?;
    Ok(Zp::from_le_bytes(&p_sks(), &pad_sks_element(bytes)))
}

/// An integer in `[0, p)`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Zp {
    n: BigUint,
    p: Arc<BigUint>,
}

impl Zp {
    /// Create an element, reducing `n` modulo `p`.
    pub fn new(p: &Arc<BigUint>, n: BigUint) -> Self {
        Self {
            n: n % p.as_ref(),
            p: Arc::clone(p),
        }
    }

    /// The additive identity.
    pub fn zero(p: &Arc<BigUint>) -> Self {
        Self {
            n: BigUint::zero(),
            p: Arc::clone(p),
        }
    }

    /// The multiplicative identity.
    pub fn one(p: &Arc<BigUint>) -> Self {
        Self::new(p, BigUint::one())
    }

    /// Create from a signed integer; negative values wrap around `p`.
    pub fn from_i64(p: &Arc<BigUint>, n: i64) -> Self {
        let magnitude = Self::new(p, BigUint::from(n.unsigned_abs()));
        if n < 0 {
            -magnitude
        } else {
            magnitude
        }
    }

    /// Parse a decimal string.
    pub fn from_dec_str(p: &Arc<BigUint>, s: &str) -> Option<Self> {
        BigUint::parse_bytes(s.as_bytes(), 10).map(|n| Self::new(p, n))
    }

    /// Create from little-endian bytes.
    pub fn from_le_bytes(p: &Arc<BigUint>, bytes: &[u8]) -> Self {
        Self::new(p, BigUint::from_bytes_le(bytes))
    }

    /// A uniformly random element.
    pub fn random(p: &Arc<BigUint>) -> Self {
        let n = rand::thread_rng().gen_biguint_below(p.as_ref());
        Self {
            n,
            p: Arc::clone(p),
        }
    }

    /// The integer value.
    pub fn value(&self) -> &BigUint {
        &self.n
    }

    /// The modulus.
    pub fn modulus(&self) -> &Arc<BigUint> {
        &self.p
    }

    /// Little-endian bytes without padding. Zero encodes as no bytes.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        if self.n.is_zero() {
            return Vec::new();
        }
        self.n.to_bytes_le()
    }

    /// Little-endian bytes zero-padded to the byte width of the modulus.
    pub fn to_padded_bytes(&self) -> Vec<u8> {
        let width = ((self.p.bits() + 7) / 8) as usize;
        let mut bytes = self.to_le_bytes();
        bytes.resize(width.max(bytes.len()), 0);
        bytes
    }

    /// The value as `u64`, if it fits.
    pub fn to_u64(&self) -> Option<u64> {
        self.n.to_u64()
    }

    pub fn is_zero(&self) -> bool {
        self.n.is_zero()
    }

    pub fn is_one(&self) -> bool {
        self.n.is_one()
    }

    /// Multiplicative inverse, or `None` for zero.
    ///
    /// Uses Fermat's little theorem, so the modulus must be prime.
    pub fn inv(&self) -> Option<Self> {
        if self.n.is_zero() {
            return None;
        }
        let exp = self.p.as_ref() - BigUint::from(2u32);
        Some(self.pow(&exp))
    }

    /// `self^exp mod p`.
    pub fn pow(&self, exp: &BigUint) -> Self {
        Self {
            n: self.n.modpow(exp, &self.p),
            p: Arc::clone(&self.p),
        }
    }

    /// Panics when `other` belongs to a different field.
    pub fn assert_same_field(&self, other: &Zp) {
        assert!(
            self.p == other.p,
            "mismatched field modulus: {} != {}",
            self.p,
            other.p
        );
    }
}

impl PartialOrd for Zp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Zp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.p.cmp(&other.p).then_with(|| self.n.cmp(&other.n))
    }
}

impl fmt::Display for Zp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.n)
    }
}

impl fmt::Debug for Zp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Zp({})", self.n)
    }
}

fn add(a: &Zp, b: &Zp) -> Zp {
    a.assert_same_field(b);
    let mut n = &a.n + &b.n;
    if n >= *a.p {
        n -= a.p.as_ref();
    }
    Zp { n, p: Arc::clone(&a.p) }
}

fn sub(a: &Zp, b: &Zp) -> Zp {
    a.assert_same_field(b);
    let n = if a.n >= b.n {
        &a.n - &b.n
    } else {
        a.p.as_ref() - (&b.n - &a.n)
    };
    Zp { n, p: Arc::clone(&a.p) }
}

fn mul(a: &Zp, b: &Zp) -> Zp {
    a.assert_same_field(b);
    Zp {
        n: (&a.n * &b.n) % a.p.as_ref(),
        p: Arc::clone(&a.p),
    }
}

fn div(a: &Zp, b: &Zp) -> Zp {
    a.assert_same_field(b);
    match b.inv() {
        Some(inv) => mul(a, &inv),
        None => panic!("attempt to divide by zero in Z({})", b.p),
    }
}

macro_rules! forward_binop {
    ($trait:ident, $method:ident, $func:ident) => {
        impl $trait<&Zp> for &Zp {
            type Output = Zp;
            fn $method(self, rhs: &Zp) -> Zp {
                $func(self, rhs)
            }
        }

        impl $trait<Zp> for &Zp {
            type Output = Zp;
            fn $method(self, rhs: Zp) -> Zp {
                $func(self, &rhs)
            }
        }

        impl $trait<&Zp> for Zp {
            type Output = Zp;
            fn $method(self, rhs: &Zp) -> Zp {
                $func(&self, rhs)
            }
        }

        impl $trait<Zp> for Zp {
            type Output = Zp;
            fn $method(self, rhs: Zp) -> Zp {
                $func(&self, &rhs)
            }
        }
    };
}

forward_binop!(Add, add, add);
forward_binop!(Sub, sub, sub);
forward_binop!(Mul, mul, mul);
// Panics on a zero divisor, like integer division.
forward_binop!(Div, div, div);

impl MulAssign<&Zp> for Zp {
    fn mul_assign(&mut self, rhs: &Zp) {
        *self = mul(self, rhs);
    }
}

impl Neg for &Zp {
    type Output = Zp;
    fn neg(self) -> Zp {
        if self.n.is_zero() {
            return self.clone();
        }
        Zp {
            n: self.p.as_ref() - &self.n,
            p: Arc::clone(&self.p),
        }
    }
}

impl Neg for Zp {
    type Output = Zp;
    fn neg(self) -> Zp {
        -&self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(n: u32) -> Arc<BigUint> {
        Arc::new(BigUint::from(n))
    }

    fn z(p: &Arc<BigUint>, n: i64) -> Zp {
        Zp::from_i64(p, n)
    }

    #[test]
    fn test_p_sks_value() {
        assert_eq!(
            p_sks().to_string(),
            "530512889551602322505127520352579437339"
        );
        assert_eq!(((p_sks().bits() + 7) / 8) as usize, SKS_ZP_NBYTES);
    }

    #[test]
    fn test_add_wraps() {
        let p = field(5);
        assert_eq!(z(&p, 1) + z(&p, 3), z(&p, 4));
        assert_eq!(z(&p, 1) + z(&p, 9), z(&p, 0));
    }

    #[test]
    fn test_minus_one() {
        let p = field(65537);
        assert_eq!(z(&p, -1).to_u64(), Some(65536));
    }

    #[test]
    fn test_mul() {
        let p = field(5);
        assert_eq!((z(&p, 4) * z(&p, 3)).to_u64(), Some(2));
        let sq = z(&p, 4) * z(&p, 4);
        assert_eq!((&sq * &z(&p, 3)).to_u64(), Some(3));
        assert_eq!((&sq * &sq).to_u64(), Some(1));
    }

    #[test]
    fn test_div() {
        let p = field(5);
        assert_eq!((z(&p, 1) / z(&p, 2)).to_u64(), Some(3));
        assert_eq!((z(&p, 1) / z(&p, 3)).to_u64(), Some(2));
    }

    #[test]
    #[should_panic(expected = "mismatched field modulus")]
    fn test_mismatched_p_panics() {
        let _ = z(&field(5), 1) + z(&field(65537), 9);
    }

    #[test]
    #[should_panic(expected = "divide by zero")]
    fn test_div_by_zero_panics() {
        let p = field(7);
        let _ = z(&p, 3) / z(&p, 0);
    }

    #[test]
    fn test_neg() {
        let p = field(5);
        assert_eq!((-z(&p, 2)).to_u64(), Some(3));
        assert_eq!((-z(&p, 0)).to_u64(), Some(0));
    }

    #[test]
    fn test_sub_rolls_over() {
        let p = field(5);
        assert_eq!((z(&p, 4) - z(&p, 3)).to_u64(), Some(1));
        assert_eq!((z(&p, 1) - z(&p, 3)).to_u64(), Some(3));
        assert_eq!((z(&p, 1) - z(&p, 4)).to_u64(), Some(2));
    }

    #[test]
    fn test_inverse_of_zero_is_none() {
        assert!(z(&field(13), 0).inv().is_none());
        assert_eq!(z(&field(13), 5).inv(), Some(z(&field(13), 8)));
    }

    #[test]
    fn test_byte_order_is_little_endian() {
        let p = p_sks();
        let v = z(&p, 65536);
        let bytes = v.to_le_bytes();
        assert_eq!(&bytes[..3], &[0, 0, 1]);
        assert_eq!(Zp::from_le_bytes(&p, &bytes), v);
        assert_eq!(v.to_padded_bytes().len(), SKS_ZP_NBYTES);
        assert!(z(&p, 0).to_le_bytes().is_empty());
    }

    #[test]
    fn test_from_le_bytes_reduces() {
        let p = p_sks();
        let mut bytes = p.to_bytes_le();
        bytes.resize(SKS_ZP_NBYTES, 0);
        assert!(Zp::from_le_bytes(&p, &bytes).is_zero());
    }

    #[test]
    fn test_digest_to_zp() {
        let v = digest_to_zp("0100").unwrap();
        assert_eq!(v.to_u64(), Some(1));
        let v = digest_to_zp("00000100").unwrap();
        assert_eq!(v.to_u64(), Some(65536));
        assert!(digest_to_zp("xyz").is_err());
    }

    #[test]
    fn test_ordering_follows_value() {
        let p = field(97);
        let mut v = vec![z(&p, 50), z(&p, 3), z(&p, 20)];
        v.sort();
        assert_eq!(v, vec![z(&p, 3), z(&p, 20), z(&p, 50)]);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn prop_mul_then_div_is_identity(x in any::<u128>(), y in 1u128..) {
                let p = p_sks();
                let x = Zp::new(&p, BigUint::from(x));
                let y = Zp::new(&p, BigUint::from(y));
                prop_assert_eq!(&(&x * &y) / &y, x);
            }

            #[test]
            fn prop_inverse_multiplies_to_one(x in 1u128..) {
                let p = p_sks();
                let x = Zp::new(&p, BigUint::from(x));
                let inv = x.inv().unwrap();
                prop_assert!((&x * &inv).is_one());
            }
        }
    }
}
