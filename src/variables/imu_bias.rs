use crate::linalg::{Vector3, VectorViewX, VectorX};
use crate::variables::Manifold;

/// Additive gyroscope/accelerometer bias, `Ba`/`Bg` in spec terms.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImuBias {
    pub gyro: Vector3,
    pub accel: Vector3,
}

impl ImuBias {
    pub fn new(gyro: Vector3, accel: Vector3) -> Self {
        ImuBias { gyro, accel }
    }

    pub fn zero() -> Self {
        ImuBias::default()
    }
}

impl Manifold for ImuBias {
    fn dim(&self) -> usize {
        6
    }

    fn identity() -> Self {
        ImuBias::zero()
    }

    fn oplus(&self, delta: VectorViewX<'_>) -> Self {
        ImuBias {
            gyro: self.gyro + Vector3::new(delta[0], delta[1], delta[2]),
            accel: self.accel + Vector3::new(delta[3], delta[4], delta[5]),
        }
    }

    fn ominus(&self, other: &Self) -> VectorX {
        let d_gyro = other.gyro - self.gyro;
        let d_accel = other.accel - self.accel;
        VectorX::from_row_slice(&[
            d_gyro[0], d_gyro[1], d_gyro[2], d_accel[0], d_accel[1], d_accel[2],
        ])
    }
}

/// Velocity plus bias, bundled because the optimizer and the window both
/// treat a frame's `(V_i, Ba_i, Bg_i)` as one logical update group.
#[derive(Clone, Copy, Debug, Default)]
pub struct SpeedBias {
    pub vel: Vector3,
    pub bias: ImuBias,
}

impl SpeedBias {
    pub fn new(vel: Vector3, bias: ImuBias) -> Self {
        SpeedBias { vel, bias }
    }
}

impl Manifold for SpeedBias {
    fn dim(&self) -> usize {
        9
    }

    fn identity() -> Self {
        SpeedBias::default()
    }

    fn oplus(&self, delta: VectorViewX<'_>) -> Self {
        SpeedBias {
            vel: self.vel + Vector3::new(delta[0], delta[1], delta[2]),
            bias: self.bias.oplus(delta.rows(3, 6)),
        }
    }

    fn ominus(&self, other: &Self) -> VectorX {
        let d_vel = other.vel - self.vel;
        let d_bias = self.bias.ominus(&other.bias);
        let mut out = VectorX::zeros(9);
        out.rows_mut(0, 3).copy_from(&d_vel);
        out.rows_mut(3, 6).copy_from(&d_bias);
        out
    }
}

