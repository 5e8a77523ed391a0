//! Polynomials over a prime field.

use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};
use std::sync::Arc;

use num_bigint::BigUint;
use num_traits::One;

use crate::error::{CoreError, Result};
use crate::zp::Zp;
use crate::zset::ZSet;

/// Attempts at a random split before a factor is declared irreducible.
const MAX_SPLIT_ATTEMPTS: usize = 256;

/// A polynomial with coefficients in ascending degree order.
///
/// Trailing zero coefficients are always trimmed, so the degree is the
/// index of the last coefficient. The zero polynomial is `[0]` with
/// degree 0.
#[derive(Clone, PartialEq, Eq)]
pub struct Poly {
    coeffs: Vec<Zp>,
    p: Arc<BigUint>,
}

impl Poly {
    /// Build from ascending coefficients. All must share the modulus `p`.
    pub fn new(p: &Arc<BigUint>, coeffs: Vec<Zp>) -> Self {
        for c in &coeffs {
            assert!(
                c.modulus() == p,
                "mismatched field modulus: {} != {}",
                c.modulus(),
                p
            );
        }
        let mut poly = Self {
            coeffs,
            p: Arc::clone(p),
        };
        poly.trim();
        poly
    }

    /// Build from small signed coefficients.
    pub fn from_i64s(p: &Arc<BigUint>, coeffs: &[i64]) -> Self {
        Self::new(p, coeffs.iter().map(|c| Zp::from_i64(p, *c)).collect())
    }

    pub fn zero(p: &Arc<BigUint>) -> Self {
        Self::new(p, Vec::new())
    }

    pub fn one(p: &Arc<BigUint>) -> Self {
        Self::new(p, vec![Zp::one(p)])
    }

    /// The monomial `c * z^degree`.
    pub fn term(degree: usize, c: Zp) -> Self {
        let p = Arc::clone(c.modulus());
        let mut coeffs = vec![Zp::zero(&p); degree];
        coeffs.push(c);
        Self::new(&p, coeffs)
    }

    /// A random monic polynomial of the given degree.
    pub fn random_monic(p: &Arc<BigUint>, degree: usize) -> Self {
        let mut coeffs: Vec<Zp> = (0..degree).map(|_| Zp::random(p)).collect();
        coeffs.push(Zp::one(p));
        Self::new(p, coeffs)
    }

    fn trim(&mut self) {
        while self.coeffs.last().is_some_and(Zp::is_zero) {
            self.coeffs.pop();
        }
        if self.coeffs.is_empty() {
            self.coeffs.push(Zp::zero(&self.p));
        }
    }

    pub fn degree(&self) -> usize {
        self.coeffs.len() - 1
    }

    pub fn coeffs(&self) -> &[Zp] {
        &self.coeffs
    }

    pub fn modulus(&self) -> &Arc<BigUint> {
        &self.p
    }

    /// The coefficient of the highest-degree term.
    pub fn lead(&self) -> &Zp {
        &self.coeffs[self.coeffs.len() - 1]
    }

    pub fn is_zero(&self) -> bool {
        self.coeffs.len() == 1 && self.coeffs[0].is_zero()
    }

    /// Whether this is the constant polynomial `c`.
    pub fn is_constant(&self, c: &Zp) -> bool {
        self.coeffs.len() == 1 && &self.coeffs[0] == c
    }

    /// Evaluate at `z` by Horner's rule.
    pub fn eval(&self, z: &Zp) -> Zp {
        let mut acc = Zp::zero(&self.p);
        for c in self.coeffs.iter().rev() {
            acc = &(&acc * z) + c;
        }
        acc
    }

    /// Long division. Returns `(quotient, remainder)`.
    ///
    /// A zero dividend yields `(0, divisor.clone())`. A divisor of higher
    /// degree than a nonzero dividend is an error.
    pub fn divmod(&self, divisor: &Poly) -> Result<(Poly, Poly)> {
        if divisor.is_zero() {
            return Err(CoreError::ZeroDivisor);
        }
        if self.is_zero() {
            return Ok((Poly::zero(&self.p), divisor.clone()));
        }
        if divisor.degree() > self.degree() {
            return Err(CoreError::DivisionDegree {
                dividend: self.degree(),
                divisor: divisor.degree(),
            });
        }
        self.long_divide(divisor)
    }

    fn long_divide(&self, divisor: &Poly) -> Result<(Poly, Poly)> {
        let lead_inv = divisor.lead().inv().ok_or(CoreError::ZeroDivisor)?;
        let mut q = Poly::zero(&self.p);
        let mut r = self.clone();
        while !r.is_zero() && r.degree() >= divisor.degree() {
            let m = Poly::term(r.degree() - divisor.degree(), r.lead() * &lead_inv);
            r = &r - &(&m * divisor);
            q = &q + &m;
        }
        Ok((q, r))
    }

    /// Quotient of `self / divisor`.
    pub fn div(&self, divisor: &Poly) -> Result<Poly> {
        self.divmod(divisor).map(|(q, _)| q)
    }

    /// Remainder of `self` modulo `m`.
    ///
    /// Unlike [`divmod`](Self::divmod), a dividend of lower degree than the
    /// modulus is already reduced and returned as is.
    pub fn rem(&self, m: &Poly) -> Result<Poly> {
        if m.is_zero() {
            return Err(CoreError::ZeroDivisor);
        }
        if self.is_zero() || self.degree() < m.degree() {
            return Ok(self.clone());
        }
        self.long_divide(m).map(|(_, r)| r)
    }

    /// Greatest common divisor, normalized to be monic.
    pub fn gcd(a: &Poly, b: &Poly) -> Result<Poly> {
        let (mut x, mut y) = if a.degree() >= b.degree() {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        };
        while !y.is_zero() {
            let r = x.rem(&y)?;
            x = y;
            y = r;
        }
        let inv = x.lead().inv().ok_or(CoreError::ZeroDivisor)?;
        Ok(&x * &Poly::new(&x.p, vec![inv]))
    }

    /// `f^n mod g` by repeated squaring.
    ///
    /// Exponents shorter than three bits are rejected.
    pub fn pow_mod(f: &Poly, n: &BigUint, g: &Poly) -> Result<Poly> {
        if n.bits() < 3 {
            return Err(CoreError::PowModSmallN);
        }
        let mut n = n.clone();
        let mut f = f.clone();
        let mut h = Poly::one(&f.p);
        loop {
            if n.bit(0) {
                h = (&h * &f).rem(g)?;
                n -= 1u32;
            }
            n >>= 1;
            if n.bits() == 0 {
                break;
            }
            f = (&f * &f).rem(g)?;
        }
        Ok(h)
    }

    /// Roots of a polynomial that splits into distinct linear factors.
    ///
    /// Any non-linear factor other than the constant 1 is an error.
    pub fn factor(&self) -> Result<ZSet> {
        let mut roots = ZSet::new();
        let one = Zp::one(&self.p);
        for f in self.split_linear()? {
            if f.is_constant(&one) {
                continue;
            }
            if f.degree() != 1 {
                return Err(CoreError::InvalidFactor(f.to_string()));
            }
            roots.insert(-(&f.coeffs[0] / &f.coeffs[1]));
        }
        Ok(roots)
    }

    // Cantor-Zassenhaus equal-degree splitting, specialised to degree 1.
    fn split_linear(&self) -> Result<Vec<Poly>> {
        let exp = (self.p.as_ref() - BigUint::one()) >> 1;
        let one = Poly::one(&self.p);
        let mut done = Vec::new();
        let mut pending = vec![self.clone()];

        while let Some(f) = pending.pop() {
            if f.degree() <= 1 {
                done.push(f);
                continue;
            }
            let mut split = None;
            for _ in 0..MAX_SPLIT_ATTEMPTS {
                let r = Poly::random_monic(&self.p, 2 * f.degree() - 1);
                let h = Poly::pow_mod(&r, &exp, &f)?;
                let g = Poly::gcd(&f, &(&h - &one))?;
                if g != one && g != f {
                    split = Some(g);
                    break;
                }
            }
            match split {
                Some(g) => {
                    let cofactor = f.div(&g)?;
                    pending.push(g);
                    pending.push(cofactor);
                }
                None => return Err(CoreError::InvalidFactor(f.to_string())),
            }
        }
        Ok(done)
    }

    /// Whether this polynomial splits into linear factors over its field.
    ///
    /// Checks that `z^p - z` vanishes modulo the polynomial.
    pub fn factor_check(&self) -> bool {
        if self.degree() <= 1 {
            return true;
        }
        let z = Poly::from_i64s(&self.p, &[0, 1]);
        let zq = match Poly::pow_mod(&z, &self.p, self) {
            Ok(zq) => zq,
            Err(_) => return false,
        };
        match (&zq - &z).rem(self) {
            Ok(zqmz) => {
                zqmz.degree() == 0 || (zqmz.degree() == 1 && zqmz.coeffs[0].is_zero())
            }
            Err(_) => false,
        }
    }
}

fn add(a: &Poly, b: &Poly) -> Poly {
    let n = a.coeffs.len().max(b.coeffs.len());
    let zero = Zp::zero(&a.p);
    let coeffs = (0..n)
        .map(|i| a.coeffs.get(i).unwrap_or(&zero) + b.coeffs.get(i).unwrap_or(&zero))
        .collect();
    Poly::new(&a.p, coeffs)
}

fn sub(a: &Poly, b: &Poly) -> Poly {
    let n = a.coeffs.len().max(b.coeffs.len());
    let zero = Zp::zero(&a.p);
    let coeffs = (0..n)
        .map(|i| a.coeffs.get(i).unwrap_or(&zero) - b.coeffs.get(i).unwrap_or(&zero))
        .collect();
    Poly::new(&a.p, coeffs)
}

fn mul(a: &Poly, b: &Poly) -> Poly {
    let mut coeffs = vec![Zp::zero(&a.p); a.coeffs.len() + b.coeffs.len() - 1];
    for (i, x) in a.coeffs.iter().enumerate() {
        if x.is_zero() {
            continue;
        }
        for (j, y) in b.coeffs.iter().enumerate() {
            coeffs[i + j] = &coeffs[i + j] + &(x * y);
        }
    }
    Poly::new(&a.p, coeffs)
}

impl Add for &Poly {
    type Output = Poly;
    fn add(self, rhs: &Poly) -> Poly {
        add(self, rhs)
    }
}

impl Sub for &Poly {
    type Output = Poly;
    fn sub(self, rhs: &Poly) -> Poly {
        sub(self, rhs)
    }
}

impl Mul for &Poly {
    type Output = Poly;
    fn mul(self, rhs: &Poly) -> Poly {
        mul(self, rhs)
    }
}

impl Neg for &Poly {
    type Output = Poly;
    fn neg(self) -> Poly {
        Poly::new(&self.p, self.coeffs.iter().map(|c| -c).collect())
    }
}

impl fmt::Display for Poly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return write!(f, "0");
        }
        let mut first = true;
        for (i, c) in self.coeffs.iter().enumerate().rev() {
            if c.is_zero() {
                continue;
            }
            if !first {
                write!(f, " + ")?;
            }
            first = false;
            write!(f, "{c}")?;
            if i > 0 {
                write!(f, "z^{i}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Poly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Poly({self})")
    }
}

/// Numerator and denominator of an interpolated rational function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RationalFn {
    pub num: Poly,
    pub denom: Poly,
}

impl RationalFn {
    /// Evaluate `num(z) / denom(z)`.
    pub fn eval(&self, z: &Zp) -> Result<Zp> {
        let d = self.denom.eval(z);
        let inv = d.inv().ok_or(CoreError::ZeroDivisor)?;
        Ok(self.num.eval(z) * inv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zp::p_sks;

    fn field(n: u32) -> Arc<BigUint> {
        Arc::new(BigUint::from(n))
    }

    #[test]
    fn test_display() {
        let p = field(65537);
        assert_eq!(
            Poly::from_i64s(&p, &[4, 3, 2]).to_string(),
            "2z^2 + 3z^1 + 4"
        );
        assert_eq!(Poly::from_i64s(&p, &[4, 0, 2]).to_string(), "2z^2 + 4");
        assert_eq!(Poly::zero(&p).to_string(), "0");
    }

    #[test]
    fn test_trims_leading_zeros() {
        let p = field(65537);
        let poly = Poly::from_i64s(&p, &[1, 2, 0, 0]);
        assert_eq!(poly.degree(), 1);
        assert!(Poly::from_i64s(&p, &[0, 0]).is_zero());
    }

    #[test]
    fn test_add_cancels_degree() {
        let p = field(65537);
        let a = Poly::from_i64s(&p, &[1, 2, 3]);
        let b = Poly::from_i64s(&p, &[4, 5, -3]);
        assert_eq!(&a + &b, Poly::from_i64s(&p, &[5, 7]));
        assert!((&a - &a).is_zero());
    }

    #[test]
    fn test_mul() {
        let p = field(97);
        let a = Poly::from_i64s(&p, &[-6, 11, -6, 1]);
        let b = Poly::from_i64s(&p, &[2, 1]);
        assert_eq!(&a * &b, Poly::from_i64s(&p, &[85, 16, 96, 93, 1]));
    }

    #[test]
    fn test_eval() {
        let p = field(97);
        let poly = Poly::from_i64s(&p, &[5, 3, 2]);
        assert_eq!(poly.eval(&Zp::from_i64(&p, 8)), Zp::from_i64(&p, 157));
    }

    #[test]
    fn test_divmod() {
        let p = field(97);
        let x = Poly::from_i64s(&p, &[-6, 11, -6, 1]);
        let y = Poly::from_i64s(&p, &[-1, 1]);
        let (q, r) = x.divmod(&y).unwrap();
        assert_eq!(q, Poly::from_i64s(&p, &[6, -5, 1]));
        assert!(r.is_zero());
        assert_eq!(&(&q * &y) + &r, x);
    }

    #[test]
    fn test_divmod_with_remainder() {
        let p = field(97);
        let x = Poly::from_i64s(&p, &[1, 0, 1]);
        let y = Poly::from_i64s(&p, &[1, 1]);
        let (q, r) = x.divmod(&y).unwrap();
        assert_eq!(&(&q * &y) + &r, x);
        assert_eq!(r.degree(), 0);
    }

    #[test]
    fn test_divmod_edge_cases() {
        let p = field(97);
        let y = Poly::from_i64s(&p, &[1, 1]);
        let (q, r) = Poly::zero(&p).divmod(&y).unwrap();
        assert!(q.is_zero());
        assert_eq!(r, y);

        let small = Poly::from_i64s(&p, &[3]);
        assert!(matches!(
            small.divmod(&y),
            Err(CoreError::DivisionDegree { dividend: 0, divisor: 1 })
        ));
        assert!(matches!(y.divmod(&Poly::zero(&p)), Err(CoreError::ZeroDivisor)));
    }

    #[test]
    fn test_gcd_is_monic() {
        let p = field(97);
        // (z-1)(z-2) and 3(z-1)(z-3)
        let a = &Poly::from_i64s(&p, &[-1, 1]) * &Poly::from_i64s(&p, &[-2, 1]);
        let b = &Poly::from_i64s(&p, &[-3, 3]) * &Poly::from_i64s(&p, &[-3, 1]);
        let g = Poly::gcd(&a, &b).unwrap();
        assert_eq!(g, Poly::from_i64s(&p, &[-1, 1]));
        assert_eq!(Poly::gcd(&b, &a).unwrap(), g);
    }

    #[test]
    fn test_pow_mod_small_exponent() {
        let p = field(97);
        let f = Poly::from_i64s(&p, &[0, 1]);
        let g = Poly::from_i64s(&p, &[1, 0, 1]);
        assert!(matches!(
            Poly::pow_mod(&f, &BigUint::from(3u32), &g),
            Err(CoreError::PowModSmallN)
        ));
    }

    #[test]
    fn test_pow_mod_matches_repeated_multiplication() {
        let p = field(97);
        let f = Poly::from_i64s(&p, &[3, 1]);
        let g = Poly::from_i64s(&p, &[5, 0, 2, 1]);
        let mut expected = Poly::one(&p);
        for _ in 0..13 {
            expected = (&expected * &f).rem(&g).unwrap();
        }
        assert_eq!(Poly::pow_mod(&f, &BigUint::from(13u32), &g).unwrap(), expected);
    }

    #[test]
    fn test_factor_linear_product() {
        let p = p_sks();
        let mut poly = Poly::one(&p);
        let mut expected = ZSet::new();
        for root in [3i64, 17, 65537, 90001, 123456789] {
            poly = &poly * &Poly::from_i64s(&p, &[-root, 1]);
            expected.insert(Zp::from_i64(&p, root));
        }
        assert_eq!(poly.factor().unwrap(), expected);
    }

    #[test]
    fn test_factor_check() {
        let p = p_sks();
        let splits = &Poly::from_i64s(&p, &[-5, 1]) * &Poly::from_i64s(&p, &[-9, 1]);
        assert!(splits.factor_check());
        assert!(Poly::from_i64s(&p, &[7, 1]).factor_check());
    }

    #[test]
    fn test_factor_check_rejects_irreducible() {
        // z^2 + z + 3 has no roots mod 7
        let p = field(7);
        assert!(!Poly::from_i64s(&p, &[3, 1, 1]).factor_check());
    }

    #[test]
    fn test_rational_eval() {
        let p = field(97);
        let rf = RationalFn {
            num: Poly::from_i64s(&p, &[1, 1]),
            denom: Poly::from_i64s(&p, &[2]),
        };
        assert_eq!(rf.eval(&Zp::from_i64(&p, 5)).unwrap(), Zp::from_i64(&p, 3));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        // Monic, so never zero.
        fn monic(coeffs: &[u64]) -> Poly {
            let p = p_sks();
            let mut zs: Vec<Zp> = coeffs
                .iter()
                .map(|&c| Zp::new(&p, BigUint::from(c)))
                .collect();
            zs.push(Zp::one(&p));
            Poly::new(&p, zs)
        }

        fn coeffs() -> impl Strategy<Value = Vec<u64>> {
            proptest::collection::vec(any::<u64>(), 0..6)
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(48))]

            #[test]
            fn prop_div_undoes_mul(a in coeffs(), b in coeffs()) {
                let (a, b) = (monic(&a), monic(&b));
                let (q, r) = (&a * &b).divmod(&b).unwrap();
                prop_assert_eq!(q, a);
                prop_assert!(r.is_zero());
            }

            #[test]
            fn prop_gcd_divides_both(a in coeffs(), b in coeffs(), c in coeffs()) {
                let c = monic(&c);
                let x = &monic(&a) * &c;
                let y = &monic(&b) * &c;
                let g = Poly::gcd(&x, &y).unwrap();
                prop_assert!(g.degree() >= c.degree());
                prop_assert!(x.rem(&g).unwrap().is_zero());
                prop_assert!(y.rem(&g).unwrap().is_zero());
                prop_assert!(g.lead().is_one());
            }
        }
    }
}
