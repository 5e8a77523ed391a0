//! Dense matrices over a prime field, with in-place Gaussian reduction.

use std::fmt;
use std::sync::Arc;

use num_bigint::BigUint;

use crate::error::{CoreError, Result};
use crate::zp::Zp;

/// A `columns x rows` matrix. Cells are addressed as `(column, row)`.
#[derive(Clone, PartialEq, Eq)]
pub struct Matrix {
    columns: usize,
    rows: usize,
    cells: Vec<Zp>,
}

impl Matrix {
    /// A matrix with every cell set to `fill`.
    pub fn new(columns: usize, rows: usize, fill: Zp) -> Self {
        Self {
            columns,
            rows,
            cells: vec![fill; columns * rows],
        }
    }

    /// A zero matrix over `p`.
    pub fn zeros(columns: usize, rows: usize, p: &Arc<BigUint>) -> Self {
        Self::new(columns, rows, Zp::zero(p))
    }

    /// Build from row vectors. Every row must have the same length.
    pub fn from_rows(rows: Vec<Vec<Zp>>) -> Self {
        let columns = rows.first().map_or(0, Vec::len);
        assert!(
            rows.iter().all(|r| r.len() == columns),
            "ragged matrix rows"
        );
        Self {
            columns,
            rows: rows.len(),
            cells: rows.into_iter().flatten().collect(),
        }
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn get(&self, col: usize, row: usize) -> &Zp {
        &self.cells[col + row * self.columns]
    }

    pub fn set(&mut self, col: usize, row: usize, value: Zp) {
        self.cells[col + row * self.columns] = value;
    }

    /// Row `j` as a slice.
    pub fn row(&self, j: usize) -> &[Zp] {
        &self.cells[j * self.columns..(j + 1) * self.columns]
    }

    /// Reduce to row-echelon form with unit pivots, then back-substitute.
    pub fn reduce(&mut self) -> Result<()> {
        if self.columns < self.rows {
            return Err(CoreError::MatrixTooNarrow);
        }
        for j in 0..self.rows {
            self.process_row_forward(j);
        }
        for j in (1..self.rows).rev() {
            self.back_substitute(j);
        }
        Ok(())
    }

    fn process_row_forward(&mut self, j: usize) {
        if self.get(j, j).is_zero() {
            let Some(swap) = (j + 1..self.rows).find(|&jf| !self.get(j, jf).is_zero()) else {
                return;
            };
            self.swap_rows(j, swap);
        }
        let pivot = self.get(j, j).clone();
        if !pivot.is_one() {
            if let Some(inv) = pivot.inv() {
                self.scmult_row(j, j, &inv);
            }
        }
        for j2 in j + 1..self.rows {
            let m = self.get(j, j2).clone();
            self.rowsub(j, j, j2, &m);
        }
    }

    fn back_substitute(&mut self, j: usize) {
        if !self.get(j, j).is_one() {
            return;
        }
        let last = self.rows - 1;
        for j2 in (0..j).rev() {
            let m = self.get(j, j2).clone();
            self.rowsub(last, j, j2, &m);
            let zero = Zp::zero(m.modulus());
            self.set(j, j2, zero);
        }
    }

    /// Exchange rows `j1` and `j2`.
    pub fn swap_rows(&mut self, j1: usize, j2: usize) {
        if j1 == j2 {
            return;
        }
        for i in 0..self.columns {
            self.cells.swap(i + j1 * self.columns, i + j2 * self.columns);
        }
    }

    /// Multiply cells of row `j` from column `scol` onward by `sc`.
    pub fn scmult_row(&mut self, scol: usize, j: usize, sc: &Zp) {
        let start = j * self.columns;
        for cell in &mut self.cells[start + scol..start + self.columns] {
            *cell *= sc;
        }
    }

    /// Subtract `m * row[src]` from `row[dst]`, from column `scol` onward.
    pub fn rowsub(&mut self, scol: usize, src: usize, dst: usize, m: &Zp) {
        for i in scol..self.columns {
            let s = self.get(i, src);
            if s.is_zero() {
                continue;
            }
            let delta = if m.is_one() { s.clone() } else { s * m };
            let updated = self.get(i, dst) - &delta;
            self.set(i, dst, updated);
        }
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for j in 0..self.rows {
            write!(f, "| ")?;
            for z in self.row(j) {
                write!(f, "{z} ")?;
            }
            writeln!(f, "|")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Matrix {}x{}\n{self}", self.columns, self.rows)
    }
}
