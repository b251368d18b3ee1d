use super::{
    CovarianceMatrix, FMatrix, GMatrix, NUMX, NoiseVector,
    sparsity::{F_ROWS, G_ROWS},
};

/// Covariance propagation over `dt`:
///
/// ```text
/// P' = (I + F dt) P (I + F dt)' + dt² G Q G'
///    = dt² [ (P/dt + F P) (I/dt + F') + G Q G' ]
/// ```
///
/// Only the sparse rows of F and G are visited. The upper triangle is
/// computed and mirrored, so `p` stays exactly symmetric.
pub fn covariance_prediction(
    f: &FMatrix,
    g: &GMatrix,
    q: &NoiseVector,
    dt: f32,
    p: &mut CovarianceMatrix,
) {
    let inv_dt = 1.0 / dt;
    let dt_sq = dt * dt;

    // D = P/dt + F P
    let mut d = *p * inv_dt;
    for i in 0..NUMX {
        for k in F_ROWS[i].cols() {
            let fik = f[(i, k)];
            for j in 0..NUMX {
                d[(i, j)] += fik * p[(k, j)];
            }
        }
    }

    for i in 0..NUMX {
        for j in i..NUMX {
            let mut acc = d[(i, j)] * inv_dt;

            // D F'
            for k in F_ROWS[j].cols() {
                acc += d[(i, k)] * f[(j, k)];
            }

            // G Q G'
            for k in G_ROWS[i].intersect(&G_ROWS[j]) {
                acc += q[k] * g[(i, k)] * g[(j, k)];
            }

            let pij = acc * dt_sq;
            p[(i, j)] = pij;
            p[(j, i)] = pij;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ekf::{InputVector, StateVector, model::linearize_fg};
    use approx::assert_relative_eq;

    fn linearized() -> (FMatrix, GMatrix) {
        let mut x = StateVector::zeros();
        x.fixed_rows_mut::<4>(6)
            .copy_from_slice(nalgebra::Vector4::new(0.9f32, 0.1, -0.3, 0.2).normalize().as_slice());
        let u = InputVector::new(0.05, -0.1, 0.2, 0.5, -0.3, -9.7);
        let mut f = FMatrix::zeros();
        let mut g = GMatrix::zeros();
        linearize_fg(&x, &u, &mut f, &mut g);
        (f, g)
    }

    fn spd_covariance() -> CovarianceMatrix {
        let a = CovarianceMatrix::from_fn(|i, j| ((i * 7 + j * 3) % 5) as f32 * 0.01);
        a * a.transpose() + CovarianceMatrix::identity()
    }

    #[test]
    fn test_matches_dense_formula() {
        let (f, g) = linearized();
        let q = NoiseVector::from_fn(|i, _| 1e-3 * (i + 1) as f32);
        let dt = 0.01;
        let p0 = spd_covariance();

        let phi = CovarianceMatrix::identity() + f * dt;
        let q_diag = nalgebra::SMatrix::<f32, 10, 10>::from_diagonal(&q);
        let expected = phi * p0 * phi.transpose() + g * q_diag * g.transpose() * (dt * dt);

        let mut p = p0;
        covariance_prediction(&f, &g, &q, dt, &mut p);

        for i in 0..NUMX {
            for j in 0..NUMX {
                assert_relative_eq!(p[(i, j)], expected[(i, j)], epsilon = 1e-4, max_relative = 1e-4);
            }
        }
    }

    #[test]
    fn test_output_is_symmetric() {
        let (f, g) = linearized();
        let q = NoiseVector::repeat(1e-2);
        let mut p = spd_covariance();

        covariance_prediction(&f, &g, &q, 0.002, &mut p);

        assert_eq!(p, p.transpose());
    }

    #[test]
    fn test_unused_noise_channels_do_not_contribute() {
        let (f, g) = linearized();
        let mut q = NoiseVector::repeat(1e-3);
        let mut p_ref = spd_covariance();
        covariance_prediction(&f, &g, &q, 0.01, &mut p_ref);

        for k in 6..10 {
            q[k] = 1e3;
        }
        let mut p = spd_covariance();
        covariance_prediction(&f, &g, &q, 0.01, &mut p);

        assert_eq!(p, p_ref);
    }
}
