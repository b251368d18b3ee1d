//! Column ranges of the nonzero entries of each row of F, G and H.
//!
//! The products in the covariance prediction and in the serial update only
//! visit these ranges. Every entry written by the linearization must lie
//! inside its row range, which the tests below verify.
//!
//! ```text
//!            F (14x14)                    G (14x10)
//!       pos  vel  quat  wb  ab        w   a   wbw  abw
//!  pos   .    X    .    .   .         .   .    .    .
//!  vel   .    .    X    .   X         .   X    .    .
//!  quat  .    .    X    X   .         X   .    .    .
//!  wb    .    .    .    .   .         .   .    .    .
//!  ab    .    .    .    .   .         .   .    .    .
//! ```
//!
//! Rows of F are one per state, rows of G one per state, rows of H one per
//! measurement channel. The position rows of F each hold a single entry on
//! the matching velocity. The velocity rows depend on the quaternion and on
//! the accelerometer bias (cols 6..=13; the gyro bias columns inside the
//! range stay zero). The quaternion rows depend on the quaternion and the
//! gyro bias. The bias states have zero dynamics. Only the accelerometer
//! and gyro noise columns of G are populated.
//!
//! H maps position and velocity one to one, the three magnetic channels
//! depend on the quaternion only, and the baro channel on the down position.

use core::ops::Range;

use super::{NUMV, NUMX};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnRange {
    start: usize,
    end: usize,
}

impl ColumnRange {
    pub const EMPTY: ColumnRange = ColumnRange { start: 0, end: 0 };

    /// Inclusive span `first..=last`.
    pub const fn span(first: usize, last: usize) -> ColumnRange {
        ColumnRange {
            start: first,
            end: last + 1,
        }
    }

    pub fn cols(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Columns shared by both ranges. May be empty.
    pub fn intersect(&self, other: &ColumnRange) -> Range<usize> {
        self.start.max(other.start)..self.end.min(other.end)
    }

    pub fn contains(&self, col: usize) -> bool {
        self.cols().contains(&col)
    }
}

const fn rows_f() -> [ColumnRange; NUMX] {
    let mut rows = [ColumnRange::EMPTY; NUMX];
    rows[0] = ColumnRange::span(3, 3);
    rows[1] = ColumnRange::span(4, 4);
    rows[2] = ColumnRange::span(5, 5);
    let mut i = 3;
    while i < 6 {
        rows[i] = ColumnRange::span(6, 13);
        i += 1;
    }
    while i < 10 {
        rows[i] = ColumnRange::span(6, 12);
        i += 1;
    }
    rows
}

const fn rows_g() -> [ColumnRange; NUMX] {
    let mut rows = [ColumnRange::EMPTY; NUMX];
    let mut i = 3;
    while i < 6 {
        rows[i] = ColumnRange::span(3, 5);
        i += 1;
    }
    while i < 10 {
        rows[i] = ColumnRange::span(0, 2);
        i += 1;
    }
    rows
}

const fn rows_h() -> [ColumnRange; NUMV] {
    let mut rows = [ColumnRange::EMPTY; NUMV];
    let mut i = 0;
    while i < 6 {
        rows[i] = ColumnRange::span(i, i);
        i += 1;
    }
    while i < 9 {
        rows[i] = ColumnRange::span(6, 9);
        i += 1;
    }
    rows[9] = ColumnRange::span(2, 2);
    rows
}

pub const F_ROWS: [ColumnRange; NUMX] = rows_f();
pub const G_ROWS: [ColumnRange; NUMX] = rows_g();
pub const H_ROWS: [ColumnRange; NUMV] = rows_h();

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ekf::{NUMW, model};
    use crate::ekf::{FMatrix, GMatrix, HMatrix, StateVector};
    use nalgebra::{Vector3, Vector6};

    fn dense_linearization() -> (FMatrix, GMatrix, HMatrix) {
        let mut x = StateVector::zeros();
        x.fixed_rows_mut::<4>(6)
            .copy_from_slice(&[0.8, 0.3, -0.4, 0.33]);
        x.fixed_rows_mut::<3>(10).copy_from_slice(&[0.01, -0.02, 0.03]);
        x[13] = 0.05;
        let u = Vector6::new(0.1, -0.2, 0.3, 1.0, 2.0, -9.0);
        let be = Vector3::new(0.4, 0.1, 0.9).normalize();

        let mut f = FMatrix::zeros();
        let mut g = GMatrix::zeros();
        let mut h = HMatrix::zeros();
        model::linearize_fg(&x, &u, &mut f, &mut g);
        model::linearize_h(&x, &be, &mut h);
        (f, g, h)
    }

    fn assert_within(rows: &[ColumnRange], ncols: usize, get: impl Fn(usize, usize) -> f32) {
        for (i, range) in rows.iter().enumerate() {
            for j in 0..ncols {
                if get(i, j) != 0.0 {
                    assert!(range.contains(j), "entry ({i}, {j}) outside of row range");
                }
            }
        }
    }

    #[test]
    fn test_linearization_within_row_ranges() {
        let (f, g, h) = dense_linearization();

        assert_within(&F_ROWS, NUMX, |i, j| f[(i, j)]);
        assert_within(&G_ROWS, NUMW, |i, j| g[(i, j)]);
        assert_within(&H_ROWS, NUMX, |i, j| h[(i, j)]);
    }

    #[test]
    fn test_intersect() {
        let a = ColumnRange::span(3, 5);
        let b = ColumnRange::span(0, 2);
        assert!(a.intersect(&b).is_empty());
        assert_eq!(a.intersect(&ColumnRange::span(4, 9)), 4..6);
        assert!(ColumnRange::EMPTY.cols().is_empty());
    }
}
