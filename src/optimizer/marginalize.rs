//! Schur-complement marginalization (§4.E "Marginalisation after solve"):
//! collapse every factor touching a block the window is about to drop into
//! a single linearized [`PriorFactor`] over the blocks that survive.
//!
//! Grounded on the classical VINS-Mono `MarginalizationInfo::marginalize`
//! construction: build the normal equations restricted to
//! `drop_blocks ++ keep_blocks`, Schur-complement out `drop_blocks`, then
//! square-root the resulting Hessian via a symmetric eigendecomposition so
//! the prior can be expressed as a plain linear residual `r0 + J0 * delta`
//! (the same shape every other factor already produces, rather than a
//! bare Hessian/gradient pair the optimizer would need special-cased).
use crate::dtype;
use crate::linalg::{MatrixX, VectorX};
use crate::residuals::{Factor, ParamBlock, PriorFactor};

use super::Registry;

/// Eigenvalues of the Schur complement below this are treated as directions
/// with no information (numerically null) and dropped from the prior
/// rather than inverted, matching VINS-Mono's `eps = 1e-8` treatment of
/// `saes2.eigenvalues()`.
const MIN_EIGENVALUE: dtype = 1e-8;

pub struct MarginalizationInput<'a> {
    pub factors: &'a [Factor],
    pub registry: &'a Registry,
    /// Blocks being dropped from the window (e.g. `Pose(0)`, `SpeedBias(0)`,
    /// and any frame-0-hosted inverse depths for `MARGIN_OLD`).
    pub drop_blocks: Vec<ParamBlock>,
    /// Blocks that survive and should carry the resulting prior.
    pub keep_blocks: Vec<ParamBlock>,
}

/// Build the prior left behind after marginalizing `input.drop_blocks` out
/// of every factor that touches them. Returns `None` if no factor touches
/// any dropped block (nothing to marginalize) or the drop-block Hessian is
/// singular (no information to propagate, e.g. a never-observed landmark).
pub fn marginalize_blocks(input: MarginalizationInput) -> Option<PriorFactor> {
    let MarginalizationInput {
        factors,
        registry,
        drop_blocks,
        keep_blocks,
    } = input;

    let relevant: Vec<_> = factors
        .iter()
        .filter(|f| f.blocks().iter().any(|b| drop_blocks.contains(b)))
        .collect();
    if relevant.is_empty() {
        return None;
    }

    let d = drop_blocks.iter().map(|b| b.tangent_dim()).sum::<usize>();
    let k = keep_blocks.iter().map(|b| b.tangent_dim()).sum::<usize>();
    if d == 0 {
        return None;
    }

    let mut offsets = std::collections::HashMap::new();
    let mut next = 0;
    for block in drop_blocks.iter().chain(keep_blocks.iter()) {
        offsets.insert(*block, next);
        next += block.tangent_dim();
    }

    let total = d + k;
    let mut h = MatrixX::zeros(total, total);
    let mut b = VectorX::zeros(total);
    let empty_fixed = std::collections::HashSet::new();
    for factor in relevant {
        if let Some(lin) = super::linearize_one(factor, registry) {
            super::accumulate(&lin, &offsets, &empty_fixed, &mut h, &mut b);
        }
    }

    let h_dd = h.view((0, 0), (d, d)).clone_owned();
    let h_dk = h.view((0, d), (d, k)).clone_owned();
    let h_kk = h.view((d, d), (k, k)).clone_owned();
    let b_d = b.rows(0, d).clone_owned();
    let b_k = b.rows(d, k).clone_owned();

    if k == 0 {
        return None;
    }
    let h_dd_inv = h_dd.try_inverse()?;
    let h_dk_t = h_dk.transpose();
    let gain = h_dk_t.clone() * h_dd_inv.clone();

    let h_prior = h_kk - gain.clone() * h_dk;
    let b_prior = b_k - gain * b_d;

    let eigen = h_prior.clone().symmetric_eigen();
    let mut sqrt_eig = VectorX::zeros(k);
    let mut inv_sqrt_eig = VectorX::zeros(k);
    for i in 0..k {
        let v = eigen.eigenvalues[i];
        if v > MIN_EIGENVALUE {
            sqrt_eig[i] = v.sqrt();
            inv_sqrt_eig[i] = 1.0 / sqrt_eig[i];
        }
    }

    let vt = eigen.eigenvectors.transpose();
    let j0 = MatrixX::from_diagonal(&sqrt_eig) * vt.clone();
    let r0 = MatrixX::from_diagonal(&inv_sqrt_eig) * vt * b_prior;

    Some(PriorFactor::new(keep_blocks, r0, j0))
}
