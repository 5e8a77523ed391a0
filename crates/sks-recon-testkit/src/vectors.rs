//! Canned numeric vectors with exact expected results.
//!
//! Elements are kept well away from the sample points `0, ±1, ±2, ...` so
//! no sample ratio divides by zero.

use sks_recon_core::{p_sks, reconcile, zpoints, CoreError, Poly, ZSet, Zp};

/// A reconciliation problem and its expected outcome.
#[derive(Debug, Clone)]
pub struct ReconcileVector {
    pub name: &'static str,
    pub remote: &'static [i64],
    pub local: &'static [i64],
    /// Sample count is `mbar + 1`.
    pub mbar: usize,
    /// Whether the samples suffice to recover the difference.
    pub solvable: bool,
}

/// All reconciliation vectors.
pub fn reconcile_vectors() -> Vec<ReconcileVector> {
    vec![
        ReconcileVector {
            name: "identical sets",
            remote: &[100, 200, 300],
            local: &[100, 200, 300],
            mbar: 5,
            solvable: true,
        },
        ReconcileVector {
            name: "disjoint singletons",
            remote: &[1000],
            local: &[2000],
            mbar: 5,
            solvable: true,
        },
        ReconcileVector {
            name: "remote only",
            remote: &[110, 220, 330],
            local: &[],
            mbar: 5,
            solvable: true,
        },
        ReconcileVector {
            name: "local only",
            remote: &[],
            local: &[410, 520, 630, 740],
            mbar: 5,
            solvable: true,
        },
        ReconcileVector {
            name: "shared elements cancel",
            remote: &[101, 102, 103, 104],
            local: &[103, 104, 105],
            mbar: 5,
            solvable: true,
        },
        ReconcileVector {
            name: "difference at capacity",
            remote: &[901, 902, 903],
            local: &[904, 905],
            mbar: 5,
            solvable: true,
        },
        ReconcileVector {
            name: "too many differences",
            remote: &[11, 12, 13, 14, 15, 16],
            local: &[21, 22, 23, 24, 25, 26],
            mbar: 5,
            solvable: false,
        },
    ]
}

fn zset(ns: &[i64]) -> ZSet {
    let p = p_sks();
    ns.iter().map(|n| Zp::from_i64(&p, *n)).collect()
}

/// Expected `(remote_only, local_only)` for a vector.
pub fn expected_difference(vector: &ReconcileVector) -> (ZSet, ZSet) {
    let remote = zset(vector.remote);
    let local = zset(vector.local);
    (remote.difference(&local), local.difference(&remote))
}

/// Ratios of the remote and local characteristic polynomials at `points`.
pub fn sample_ratios(points: &[Zp], remote: &ZSet, local: &ZSet) -> Vec<Zp> {
    let p = p_sks();
    points
        .iter()
        .map(|k| {
            let num = remote.iter().fold(Zp::one(&p), |acc, z| acc * (k - z));
            let den = local.iter().fold(Zp::one(&p), |acc, z| acc * (k - z));
            num / den
        })
        .collect()
}

/// Run a vector through [`reconcile`].
pub fn run_reconcile_vector(vector: &ReconcileVector) -> Result<(ZSet, ZSet), CoreError> {
    let remote = zset(vector.remote);
    let local = zset(vector.local);
    let points = zpoints(&p_sks(), vector.mbar + 1);
    let values = sample_ratios(&points, &remote, &local);
    let deg_diff = remote.len() as i64 - local.len() as i64;
    reconcile(&values, &points, deg_diff)
}

/// A polynomial evaluation with its expected value.
#[derive(Debug, Clone)]
pub struct HornerVector {
    pub name: &'static str,
    /// Coefficients, constant term first.
    pub coeffs: &'static [i64],
    pub at: i64,
    pub expected: i64,
}

/// All Horner evaluation vectors.
pub fn horner_vectors() -> Vec<HornerVector> {
    vec![
        HornerVector {
            name: "constant",
            coeffs: &[7],
            at: 123,
            expected: 7,
        },
        HornerVector {
            name: "quadratic",
            coeffs: &[1, 2, 3],
            at: 5,
            expected: 86,
        },
        HornerVector {
            name: "alternating at minus one",
            coeffs: &[1, 2, 3],
            at: -1,
            expected: 2,
        },
        HornerVector {
            name: "cubic root",
            coeffs: &[-8, 0, 0, 1],
            at: 2,
            expected: 0,
        },
    ]
}

/// Evaluate a Horner vector, returning `(got, expected)`.
pub fn run_horner_vector(vector: &HornerVector) -> (Zp, Zp) {
    let p = p_sks();
    let poly = Poly::from_i64s(&p, vector.coeffs);
    (
        poly.eval(&Zp::from_i64(&p, vector.at)),
        Zp::from_i64(&p, vector.expected),
    )
}

/// Check every vector. Returns `(name, passed)` pairs.
pub fn verify_all_vectors() -> Vec<(String, bool)> {
    let reconciled = reconcile_vectors().into_iter().map(|v| {
        let passed = match run_reconcile_vector(&v) {
            Ok(got) => v.solvable && got == expected_difference(&v),
            Err(_) => !v.solvable,
        };
        (v.name.to_string(), passed)
    });
    let evaluated = horner_vectors().into_iter().map(|v| {
        let (got, expected) = run_horner_vector(&v);
        (v.name.to_string(), got == expected)
    });
    reconciled.chain(evaluated).collect()
}
