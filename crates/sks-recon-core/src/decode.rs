//! Rational-function interpolation and set-difference recovery.
//!
//! Given the ratio of two characteristic polynomials sampled at known
//! points, [`interpolate`] solves for the reduced numerator and
//! denominator, and [`reconcile`] factors them into the elements unique to
//! each side.

use std::sync::Arc;

use num_bigint::BigUint;

use crate::error::{CoreError, Result};
use crate::matrix::Matrix;
use crate::poly::{Poly, RationalFn};
use crate::zp::Zp;
use crate::zset::ZSet;

/// The first `n` sample points: `0, -1, 1, -2, 2, ...`.
pub fn zpoints(p: &Arc<BigUint>, n: usize) -> Vec<Zp> {
    (0..n)
        .map(|i| {
            let k = ((i + 1) / 2) as i64;
            if i % 2 == 0 {
                Zp::from_i64(p, k)
            } else {
                Zp::from_i64(p, -k)
            }
        })
        .collect()
}

/// Recover `P/Q` from `values[i] = P(points[i]) / Q(points[i])`, where
/// `deg(P) - deg(Q) = deg_diff`.
///
/// Both polynomials are monic and divided through by their gcd.
pub fn interpolate(values: &[Zp], points: &[Zp], deg_diff: i64) -> Result<RationalFn> {
    if values.is_empty()
        || points.len() < values.len()
        || deg_diff.unsigned_abs() > values.len() as u64
    {
        return Err(CoreError::Interpolate);
    }
    let p = Arc::clone(values[0].modulus());

    let mut mbar = values.len() as i64;
    if (mbar + deg_diff) % 2 != 0 {
        mbar -= 1;
    }
    let ma = ((mbar + deg_diff) / 2) as usize;
    let mb = ((mbar - deg_diff) / 2) as usize;
    let mbar = mbar as usize;

    let mut matrix = Matrix::zeros(mbar + 1, mbar, &p);
    for j in 0..mbar {
        let kj = &points[j];
        let fj = &values[j];

        let mut accum = Zp::one(&p);
        for i in 0..ma {
            matrix.set(i, j, accum.clone());
            accum *= kj;
        }
        let kjma = accum;

        let mut accum = -fj;
        for i in ma..mbar {
            matrix.set(i, j, accum.clone());
            accum *= kj;
        }
        matrix.set(mbar, j, -accum - kjma);
    }
    matrix.reduce()?;

    let mut acoeffs: Vec<Zp> = (0..ma).map(|j| matrix.get(mbar, j).clone()).collect();
    acoeffs.push(Zp::one(&p));
    let mut bcoeffs: Vec<Zp> = (0..mb).map(|j| matrix.get(mbar, j + ma).clone()).collect();
    bcoeffs.push(Zp::one(&p));

    let a = Poly::new(&p, acoeffs);
    let b = Poly::new(&p, bcoeffs);
    let g = Poly::gcd(&a, &b)?;
    Ok(RationalFn {
        num: a.div(&g)?,
        denom: b.div(&g)?,
    })
}

/// Recover the two one-sided differences from sampled ratios.
///
/// The last sample is held back to verify the interpolation. Returns
/// `(remote_only, local_only)` where `values` are remote over local
/// samples. Fails with [`CoreError::LowMBar`] when the samples are too
/// few to explain the difference.
pub fn reconcile(values: &[Zp], points: &[Zp], deg_diff: i64) -> Result<(ZSet, ZSet)> {
    let (Some((last_value, values)), Some((last_point, points))) =
        (values.split_last(), points.split_last())
    else {
        return Err(CoreError::Interpolate);
    };
    let rfn = interpolate(values, points, deg_diff)?;

    let consistent = match rfn.eval(last_point) {
        Ok(v) => &v == last_value,
        Err(_) => false,
    };
    if !consistent || !rfn.num.factor_check() || !rfn.denom.factor_check() {
        return Err(CoreError::LowMBar);
    }
    Ok((rfn.num.factor()?, rfn.denom.factor()?))
}
