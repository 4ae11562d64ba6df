use tracing::instrument;

use crate::chain::ModulusChain;
use crate::ciphertext::{scales_match, Ciphertext};
use crate::error::{CkksError, Result};

///
/// Divides the ciphertext by the modulus `Q_l` of its level and removes the corresponding
/// towers. The scaling factor is divided by `Q_l`; a product of two ciphertexts with canonical
/// scaling factor thus lands exactly on the canonical scaling factor of the next level.
///
/// Fails with [`CkksError::CapacityExhausted`] if the ciphertext is at the last level.
///
#[instrument(skip_all)]
pub fn rescale(chain: &ModulusChain, ct: &Ciphertext) -> Result<Ciphertext> {
    let towers = ct.num_towers();
    let d = chain.composite_degree();
    if towers < 2 * d {
        return Err(CkksError::CapacityExhausted { towers, required: 1 });
    }
    if !chain.shape().is_level_aligned(towers) {
        return Err(CkksError::Mismatch(format!("{} towers do not form a level of a chain with {} primes per level", towers, d)));
    }
    let table = chain.rescale_table(towers);
    let mut scale = ct.scale / chain.rescale_modulus(towers);
    let level = chain.level_of_towers(towers - d);
    if scales_match(scale, chain.scaling_factor(level)) {
        scale = chain.scaling_factor(level);
    }
    return Ok(Ciphertext::new(
        table.apply(chain.moduli(), &ct.c0),
        table.apply(chain.moduli(), &ct.c1),
        scale,
        1,
        ct.slots,
        ct.shape
    ));
}

///
/// Removes towers without changing the scaling factor, i.e. "wastes" levels.
///
pub fn drop_to_towers(ct: &Ciphertext, towers: usize) -> Result<Ciphertext> {
    if ct.num_towers() < towers {
        return Err(CkksError::Mismatch(format!("cannot raise ciphertext from {} to {} towers", ct.num_towers(), towers)));
    }
    let mut result = ct.clone();
    result.drop_last_towers(ct.num_towers() - towers);
    return Ok(result);
}

///
/// Brings the ciphertext to the given tower count and scaling factor.
///
/// If the scaling factor already matches, this just drops towers. Otherwise, we drop
/// towers until one level more than requested remains, multiply by the integer
/// `round(target_scale * Q / scale)` and rescale by the modulus `Q` of that level.
///
#[instrument(skip_all)]
pub fn adjust_to_towers(chain: &ModulusChain, ct: &Ciphertext, towers: usize, target_scale: f64) -> Result<Ciphertext> {
    if ct.num_towers() < towers {
        return Err(CkksError::Mismatch(format!("cannot raise ciphertext from {} to {} towers", ct.num_towers(), towers)));
    }
    if ct.scale_degree == 1 && scales_match(ct.scale, target_scale) {
        let mut result = drop_to_towers(ct, towers)?;
        result.scale = target_scale;
        return Ok(result);
    }
    if ct.num_towers() == towers {
        return Err(CkksError::CapacityExhausted { towers, required: 1 });
    }
    let d = chain.composite_degree();
    let mut current = if ct.scale_degree > 1 { rescale(chain, ct)? } else { ct.clone() };
    if current.num_towers() < towers + d {
        return Err(CkksError::CapacityExhausted { towers: ct.num_towers(), required: (ct.num_towers() - towers) / d + 1 });
    }
    current.drop_last_towers(current.num_towers() - towers - d);

    let q = chain.rescale_modulus(towers + d);
    let factor = (target_scale * q / current.scale).round();
    if !(factor >= 1.) || factor >= 2f64.powi(120) {
        return Err(CkksError::Mismatch(format!("cannot adjust scaling factor 2^{:.4} to 2^{:.4}", current.scale.log2(), target_scale.log2())));
    }
    let factor = factor as i128;
    current.c0.scalar_mul_int(chain.moduli(), factor);
    current.c1.scalar_mul_int(chain.moduli(), factor);
    current.scale *= factor as f64;
    let mut result = rescale(chain, &current)?;
    result.scale = target_scale;
    return Ok(result);
}

///
/// Brings the ciphertext at the lower level (i.e. with more towers) to the level and scaling
/// factor of the other one. Ciphertexts at the same level must already have matching
/// scaling factors.
///
pub fn adjust_levels(chain: &ModulusChain, lhs: &Ciphertext, rhs: &Ciphertext) -> Result<(Ciphertext, Ciphertext)> {
    if lhs.num_towers() == 0 || rhs.num_towers() == 0 {
        return Err(CkksError::CapacityExhausted { towers: 0, required: 1 });
    }
    if lhs.num_towers() > rhs.num_towers() {
        let mut adjusted = adjust_to_towers(chain, lhs, rhs.num_towers(), rhs.scale)?;
        adjusted.scale_degree = rhs.scale_degree;
        return Ok((adjusted, rhs.clone()));
    } else if lhs.num_towers() < rhs.num_towers() {
        let mut adjusted = adjust_to_towers(chain, rhs, lhs.num_towers(), lhs.scale)?;
        adjusted.scale_degree = lhs.scale_degree;
        return Ok((lhs.clone(), adjusted));
    } else {
        lhs.check_compatible(rhs)?;
        return Ok((lhs.clone(), rhs.clone()));
    }
}
