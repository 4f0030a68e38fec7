//! Robust cost kernels (M-estimators) applied to residual factors.
//!
//! Of the full family a factor-graph library typically offers, this
//! estimator only needs the two spec calls for: a plain quadratic loss for
//! well-conditioned factors (the IMU factor, the marginalization prior) and
//! a Huber loss for reprojection factors, which can otherwise be pulled off
//! by a single bad track.
use crate::dtype;

/// A robust cost function `rho`. Costs are parameterized by squared residual
/// norm `d2 = ||r||^2` rather than `r` itself, matching how the optimizer
/// already has `d2` on hand after whitening.
pub trait RobustCost: Default + std::fmt::Debug {
    /// `rho(d2)`
    fn loss(&self, d2: dtype) -> dtype;

    /// `rho'(d2)`, the per-residual weight applied to the whitened
    /// residual/Jacobian before assembly into the normal equations.
    fn weight(&self, d2: dtype) -> dtype;
}

/// No robustification: `rho(d2) = d2 / 2`.
#[derive(Clone, Debug, Default)]
pub struct L2;

impl RobustCost for L2 {
    fn loss(&self, d2: dtype) -> dtype {
        d2 / 2.0
    }

    fn weight(&self, _d2: dtype) -> dtype {
        1.0
    }
}

/// Huber loss with threshold `k` (on residual norm, not squared norm):
/// quadratic below `k`, linear above.
#[derive(Clone, Debug)]
pub struct Huber {
    pub k: dtype,
}

impl Default for Huber {
    fn default() -> Self {
        Huber { k: 1.0 }
    }
}

impl Huber {
    pub fn new(k: dtype) -> Self {
        Huber { k }
    }
}

impl RobustCost for Huber {
    fn loss(&self, d2: dtype) -> dtype {
        if d2 <= self.k * self.k {
            d2 / 2.0
        } else {
            self.k * (d2.sqrt() - self.k / 2.0)
        }
    }

    fn weight(&self, d2: dtype) -> dtype {
        if d2 <= self.k * self.k {
            1.0
        } else {
            self.k / d2.sqrt()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::numerical_derivative;

    #[test]
    fn huber_weight_matches_loss_derivative() {
        let h = Huber::new(1.0);
        for &d2 in &[0.01, 0.5, 1.5, 4.0, 10.0] {
            let d = numerical_derivative(|x| h.loss(x), d2, 1e-6);
            assert!((d.diff - h.weight(d2)).abs() < 1e-4, "d2={d2}");
        }
    }

    #[test]
    fn l2_is_unweighted() {
        let l2 = L2;
        assert_eq!(l2.weight(0.0), 1.0);
        assert_eq!(l2.weight(100.0), 1.0);
    }
}
