use std::collections::BTreeMap;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::ciphertext::{scales_match, Ciphertext};
use crate::context::CkksContext;
use crate::encoding::encode_coefficients;
use crate::error::{CkksError, Result};
use crate::keyswitch::{extend_by_special, fast_rotation_precompute, key_switch_down, ExtendedCiphertext};
use crate::level::rescale;
use crate::rns::{Format, RnsPoly};

/// Matrix entries below this fraction of the largest entry are treated as zero.
const ZERO_THRESHOLD: f64 = 1e-9;

///
/// A linear map on the `n` slots of a ciphertext, stored by its nonzero diagonals
/// ```text
///   diag_k[i] = A[i][(i + k) mod n]
/// ```
/// so that `A x = sum_k diag_k * rot_k(x)`, where `rot_k` rotates `k` positions to the left.
///
/// The diagonals are evaluated with the baby-step giant-step strategy: writing
/// `k = g * baby_steps + b`, we have
/// ```text
///   A x = sum_g rot_(g baby_steps)( sum_b rot_(-g baby_steps)(diag_k) * rot_b(x) )
/// ```
/// which requires `baby_steps - 1` hoisted baby-step rotations and `n / baby_steps - 1`
/// giant-step rotations.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlotLinearTransform {
    slots: usize,
    baby_steps: usize,
    diagonals: BTreeMap<usize, Vec<Complex64>>
}

impl SlotLinearTransform {

    ///
    /// Creates the transform from its matrix, given as a list of rows.
    ///
    pub fn from_matrix(matrix: &[Vec<Complex64>], baby_steps: usize) -> Self {
        let n = matrix.len();
        assert!(n.is_power_of_two());
        assert!(matrix.iter().all(|row| row.len() == n));
        let max_entry = matrix.iter().flat_map(|row| row.iter()).map(|x| x.norm()).fold(0., f64::max);
        let mut diagonals = BTreeMap::new();
        for k in 0..n {
            let diagonal = (0..n).map(|i| matrix[i][(i + k) % n]).collect::<Vec<_>>();
            if diagonal.iter().any(|x| x.norm() > ZERO_THRESHOLD * max_entry) {
                diagonals.insert(k, diagonal);
            }
        }
        return Self {
            slots: n,
            baby_steps: baby_steps.clamp(1, n),
            diagonals: diagonals
        };
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn baby_steps(&self) -> usize {
        self.baby_steps
    }

    pub fn diagonal_count(&self) -> usize {
        self.diagonals.len()
    }

    fn giant_step_count(&self) -> usize {
        (self.slots - 1) / self.baby_steps + 1
    }

    ///
    /// Applies the transform to an unencrypted slot vector.
    ///
    pub fn apply_plain(&self, x: &[Complex64]) -> Vec<Complex64> {
        let n = self.slots;
        assert_eq!(n, x.len());
        let mut result = vec![Complex64::new(0., 0.); n];
        for (k, diagonal) in &self.diagonals {
            for i in 0..n {
                result[i] += diagonal[i] * x[(i + k) % n];
            }
        }
        return result;
    }

    pub fn baby_step_rotations(&self) -> Vec<usize> {
        let mut result = self.diagonals.keys().map(|k| k % self.baby_steps).filter(|b| *b != 0).collect::<Vec<_>>();
        result.sort();
        result.dedup();
        return result;
    }

    pub fn giant_step_rotations(&self) -> Vec<usize> {
        let mut result = self.diagonals.keys().map(|k| k / self.baby_steps * self.baby_steps).filter(|g| *g != 0).collect::<Vec<_>>();
        result.sort();
        result.dedup();
        return result;
    }

    ///
    /// All rotations for which a switching key is required to evaluate the transform.
    ///
    pub fn required_rotations(&self) -> Vec<usize> {
        let mut result = self.baby_step_rotations();
        result.extend(self.giant_step_rotations());
        result.sort();
        result.dedup();
        return result;
    }

    ///
    /// Encodes the diagonals as plaintexts w.r.t. the extended towers of the level with
    /// `towers` towers, such that evaluating the transform on a ciphertext of scaling factor
    /// `input_scale` gives a ciphertext with scaling factor `output_scale` at one level below.
    ///
    #[instrument(skip_all)]
    pub fn compile(&self, ctx: &CkksContext, towers: usize, input_scale: f64, output_scale: f64) -> Result<CompiledLinearTransform> {
        let chain = ctx.chain();
        if towers < 2 * chain.composite_degree() || !chain.shape().is_level_aligned(towers) {
            return Err(CkksError::CapacityExhausted { towers, required: 1 });
        }
        let n = self.slots;
        let N = chain.ring_dimension();
        let plaintext_scale = output_scale * chain.rescale_modulus(towers) / input_scale;
        let ext_moduli = chain.extended_moduli(towers);

        let baby_steps = (0..self.baby_steps).filter(|b| self.diagonals.keys().any(|k| k % self.baby_steps == *b)).collect::<Vec<_>>();
        let mut giant_steps = Vec::new();
        let mut coeffs = Vec::new();
        for g in 0..self.giant_step_count() {
            let shift = g * self.baby_steps;
            let mut row = Vec::with_capacity(baby_steps.len());
            for b in &baby_steps {
                if let Some(diagonal) = self.diagonals.get(&(shift + b)) {
                    let rotated = (0..n).map(|i| diagonal[(i + n - shift % n) % n]).collect::<Vec<_>>();
                    let encoded = encode_coefficients(&rotated, n, N, plaintext_scale)?;
                    row.push(Some(RnsPoly::from_coefficients(chain.moduli(), ext_moduli.clone(), &encoded).in_format(chain.moduli(), Format::Evaluation)));
                } else {
                    row.push(None);
                }
            }
            if row.iter().any(Option::is_some) {
                giant_steps.push(shift);
                coeffs.push(row);
            }
        }
        return Ok(CompiledLinearTransform {
            slots: n,
            towers,
            input_scale,
            plaintext_scale,
            baby_steps,
            giant_steps,
            coeffs
        });
    }
}

///
/// A [`SlotLinearTransform`] whose diagonals are encoded for a fixed level, ready for
/// homomorphic evaluation.
///
pub struct CompiledLinearTransform {
    slots: usize,
    towers: usize,
    input_scale: f64,
    plaintext_scale: f64,
    baby_steps: Vec<usize>,
    giant_steps: Vec<usize>,
    /// indexed by `[giant step][baby step]`
    coeffs: Vec<Vec<Option<RnsPoly>>>
}

impl CompiledLinearTransform {

    pub fn input_towers(&self) -> usize {
        self.towers
    }

    ///
    /// Evaluates the transform on the slots of the given ciphertext. The baby-step rotations
    /// share one digit decomposition of the input, and the products with the diagonals
    /// are accumulated w.r.t. the extended modulus, so each giant step requires only a
    /// single modulus switch down.
    ///
    #[instrument(skip_all)]
    pub fn evaluate(&self, ctx: &CkksContext, ct: &Ciphertext) -> Result<Ciphertext> {
        if ct.num_towers() != self.towers || ct.slots() != self.slots {
            return Err(CkksError::Mismatch(format!(
                "linear transform was compiled for {} slots with {} towers, but ciphertext has {} slots with {} towers",
                self.slots, self.towers, ct.slots(), ct.num_towers()
            )));
        }
        if ct.scale_degree() != 1 || !scales_match(ct.scale(), self.input_scale) {
            return Err(CkksError::Mismatch(format!("linear transform expects scaling factor 2^{:.4}, got 2^{:.4}", self.input_scale.log2(), ct.scale().log2())));
        }
        let chain = ctx.chain();
        let table = chain.moduli();
        let ct = ct.clone().in_format(table, Format::Evaluation);
        let digits = fast_rotation_precompute(chain, &ct);

        let mut rotated_inputs = Vec::with_capacity(self.baby_steps.len());
        for b in &self.baby_steps {
            if *b == 0 {
                rotated_inputs.push(ExtendedCiphertext {
                    c0: extend_by_special(chain, &ct.c0),
                    c1: extend_by_special(chain, &ct.c1),
                    towers: ct.num_towers(),
                    scale: ct.scale,
                    scale_degree: ct.scale_degree,
                    slots: ct.slots,
                    shape: ct.shape
                });
            } else {
                rotated_inputs.push(ctx.eval_fast_rotation_ext(&ct, *b as i64, &digits, true)?);
            }
        }

        let mut result: Option<Ciphertext> = None;
        for (shift, row) in self.giant_steps.iter().zip(self.coeffs.iter()) {
            let mut giant_step_result: Option<ExtendedCiphertext> = None;
            for (coeff, x) in row.iter().zip(rotated_inputs.iter()) {
                if let Some(c) = coeff {
                    let summand = x.mul_plain(table, c, self.plaintext_scale);
                    match &mut giant_step_result {
                        Some(current) => current.add_assign(table, &summand),
                        None => giant_step_result = Some(summand)
                    }
                }
            }
            if let Some(giant_step_result) = giant_step_result {
                let mut summand = key_switch_down(chain, &giant_step_result);
                if *shift != 0 {
                    summand = ctx.eval_at_index(&summand, *shift as i64)?;
                }
                result = Some(match result {
                    Some(current) => ctx.eval_add(&current, &summand)?,
                    None => summand
                });
            }
        }
        let result = result.ok_or_else(|| CkksError::Mismatch("linear transform is zero".to_owned()))?;
        return rescale(chain, &result);
    }
}

#[cfg(test)]
fn test_matrix(n: usize) -> Vec<Vec<Complex64>> {
    (0..n).map(|i| (0..n).map(|j| if (i + 2 * j) % 3 == 0 { Complex64::new(0.1 * (i as f64) - 0.2, 0.05 * j as f64) } else { Complex64::new(0., 0.) }).collect()).collect()
}

#[test]
fn test_diagonals_apply_plain() {
    let n = 8;
    let matrix = test_matrix(n);
    let transform = SlotLinearTransform::from_matrix(&matrix, 4);
    let x = (0..n).map(|i| Complex64::new(i as f64, 1. - i as f64)).collect::<Vec<_>>();
    let actual = transform.apply_plain(&x);
    for i in 0..n {
        let expected = (0..n).map(|j| matrix[i][j] * x[j]).sum::<Complex64>();
        assert!((expected - actual[i]).norm() < 1e-12);
    }
}

#[test]
fn test_required_rotations() {
    let n = 8;
    let mut matrix = vec![vec![Complex64::new(0., 0.); n]; n];
    for i in 0..n {
        matrix[i][i] = Complex64::new(1., 0.);
        matrix[i][(i + 3) % n] = Complex64::new(2., 0.);
        matrix[i][(i + 6) % n] = Complex64::new(0., 1.);
    }
    let transform = SlotLinearTransform::from_matrix(&matrix, 4);
    assert_eq!(3, transform.diagonal_count());
    assert_eq!(vec![2, 3], transform.baby_step_rotations());
    assert_eq!(vec![4], transform.giant_step_rotations());
    assert_eq!(vec![2, 3, 4], transform.required_rotations());
}
