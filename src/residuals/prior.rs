use crate::linalg::{MatrixX, VectorX};
use crate::residuals::{Linearization, ParamBlock};
use crate::robust::L2;

/// The marginalization prior left behind when `MARGIN_OLD`/
/// `MARGIN_SECOND_NEW` drops a window slot (§4.C, §4.F): a linearized
/// residual `r0 + J0 * delta` over whatever parameter blocks survived the
/// Schur complement, evaluated at the linearization point `x0`.
///
/// `delta` is the concatenation of `other.ominus(&x0_i)` for each surviving
/// block, in `blocks` order; the optimizer is responsible for pulling the
/// current values for those blocks and computing that tangent difference,
/// since this factor has no notion of which concrete variable type each
/// block holds.
pub struct PriorFactor {
    pub blocks: Vec<ParamBlock>,
    pub r0: VectorX,
    pub j0: MatrixX,
}

impl PriorFactor {
    pub fn new(blocks: Vec<ParamBlock>, r0: VectorX, j0: MatrixX) -> Self {
        assert_eq!(
            j0.ncols(),
            blocks.iter().map(|b| b.tangent_dim()).sum::<usize>(),
            "marginalization Jacobian width must match the concatenated tangent dim of its blocks"
        );
        assert_eq!(j0.nrows(), r0.len());
        PriorFactor { blocks, r0, j0 }
    }

    pub fn blocks(&self) -> Vec<ParamBlock> {
        self.blocks.clone()
    }

    /// `delta` is the concatenated tangent displacement of each surviving
    /// block from its value at marginalization time, in `self.blocks` order.
    pub fn linearize(&self, delta: &VectorX) -> Linearization {
        let residual = &self.r0 + &self.j0 * delta;

        let mut jacobians = Vec::with_capacity(self.blocks.len());
        let mut col = 0;
        for block in &self.blocks {
            let dim = block.tangent_dim();
            jacobians.push(self.j0.columns(col, dim).into_owned());
            col += dim;
        }

        let (residual, jacobians, cost) = super::apply_robust_weight(&L2, residual, jacobians);

        Linearization {
            blocks: self.blocks(),
            residual,
            jacobians,
            cost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_delta_reproduces_r0() {
        let j0 = MatrixX::from_row_slice(2, 6, &[
            1.0, 0.0, 0.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0, 0.0, 0.0,
        ]);
        let r0 = VectorX::from_row_slice(&[0.1, -0.2]);
        let prior = PriorFactor::new(vec![ParamBlock::Pose(0)], r0.clone(), j0);
        let lin = prior.linearize(&VectorX::zeros(6));
        assert!((lin.residual[0] - r0[0]).abs() < 1e-12);
        assert!((lin.residual[1] - r0[1]).abs() < 1e-12);
    }
}
