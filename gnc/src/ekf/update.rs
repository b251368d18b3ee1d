use bitflags::bitflags;

use super::{
    CovarianceMatrix, HMatrix, MeasurementVector, NUMV, NUMX, StateVector, sparsity::H_ROWS,
};

bitflags! {
    /// Measurement channels taking part in a correction. Bit `m` selects
    /// row `m` of H.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SensorsUsed: u16 {
        const POS_NORTH = 1 << 0;
        const POS_EAST = 1 << 1;
        const POS_DOWN = 1 << 2;
        const VEL_NORTH = 1 << 3;
        const VEL_EAST = 1 << 4;
        const VEL_DOWN = 1 << 5;
        const MAG_X = 1 << 6;
        const MAG_Y = 1 << 7;
        const MAG_Z = 1 << 8;
        const BARO = 1 << 9;

        const HORIZ_POS = Self::POS_NORTH.bits() | Self::POS_EAST.bits();
        const VERT_POS = Self::POS_DOWN.bits();
        const POS = Self::HORIZ_POS.bits() | Self::VERT_POS.bits();
        const HORIZ_VEL = Self::VEL_NORTH.bits() | Self::VEL_EAST.bits();
        const VERT_VEL = Self::VEL_DOWN.bits();
        const VEL = Self::HORIZ_VEL.bits() | Self::VERT_VEL.bits();
        const MAG = Self::MAG_X.bits() | Self::MAG_Y.bits() | Self::MAG_Z.bits();
        const FULL = 0x3FF;
    }
}

impl SensorsUsed {
    fn uses_channel(&self, m: usize) -> bool {
        self.bits() & (1 << m) != 0
    }
}

/// Sequential scalar Kalman update, one measurement channel at a time.
///
/// Valid because R is diagonal. Channels are processed in increasing index
/// order; each one sees the state and covariance left by the previous one.
pub fn serial_update(
    h: &HMatrix,
    r: &MeasurementVector,
    z: &MeasurementVector,
    y: &MeasurementVector,
    p: &mut CovarianceMatrix,
    x: &mut StateVector,
    sensors: SensorsUsed,
) {
    for m in (0..NUMV).filter(|m| sensors.uses_channel(*m)) {
        let rows = H_ROWS[m].cols();

        // HP = H[m] P
        let mut hp = [0.0f32; NUMX];
        for k in rows.clone() {
            let hmk = h[(m, k)];
            for (j, hpj) in hp.iter_mut().enumerate() {
                *hpj += hmk * p[(k, j)];
            }
        }

        // S = H[m] P H[m]' + R[m]
        let mut s = r[m];
        for k in rows {
            s += hp[k] * h[(m, k)];
        }
        let inv_s = 1.0 / s;

        let mut gain = [0.0f32; NUMX];
        for (k, hpk) in hp.iter().enumerate() {
            gain[k] = hpk * inv_s;
        }

        for i in 0..NUMX {
            for j in i..NUMX {
                let pij = p[(i, j)] - gain[i] * hp[j];
                p[(i, j)] = pij;
                p[(j, i)] = pij;
            }
        }

        let innovation = z[m] - y[m];
        for (i, k) in gain.iter().enumerate() {
            x[i] += k * innovation;
        }
    }
}
