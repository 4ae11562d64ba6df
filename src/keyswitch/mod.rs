use rayon::prelude::*;
use tracing::instrument;

use feanor_math::primitive_int::StaticRing;
use feanor_math::ring::*;

use crate::automorphism::apply_automorphism;
use crate::chain::{ChainShape, ModulusChain};
use crate::ciphertext::Ciphertext;
use crate::keys::SwitchingKey;
use crate::rns::{Format, RnsModulus, RnsPoly};

///
/// Decomposition of the chain towers into contiguous digits for hybrid key switching.
///
pub mod digits;

const ZZ: StaticRing<i64> = StaticRing::<i64>::RING;

///
/// The digits of a polynomial, each extended to the current towers plus the special towers.
/// `None` marks digits that do not intersect the current towers.
///
pub type ExtendedDigits = Vec<Option<RnsPoly>>;

///
/// A ciphertext w.r.t. the extended modulus `QP`, as it occurs in the middle of key switching.
/// Both components are in evaluation format and have the towers
/// [`ModulusChain::extended_moduli()`]. Use [`key_switch_down()`] to get back a [`Ciphertext`].
///
#[derive(Clone)]
pub struct ExtendedCiphertext {
    pub(crate) c0: RnsPoly,
    pub(crate) c1: RnsPoly,
    pub(crate) towers: usize,
    pub(crate) scale: f64,
    pub(crate) scale_degree: usize,
    pub(crate) slots: usize,
    pub(crate) shape: ChainShape
}

impl ExtendedCiphertext {

    pub fn c0(&self) -> &RnsPoly {
        &self.c0
    }

    pub fn c1(&self) -> &RnsPoly {
        &self.c1
    }

    /// the number of chain towers, without the special towers
    pub fn num_towers(&self) -> usize {
        self.towers
    }

    pub fn add_assign(&mut self, table: &[RnsModulus], other: &ExtendedCiphertext) {
        assert_eq!(self.towers, other.towers);
        self.c0.add_assign(table, &other.c0);
        self.c1.add_assign(table, &other.c1);
    }

    ///
    /// Multiplies both components by a plaintext given w.r.t. the extended towers, in
    /// evaluation format. The scaling factor is multiplied by `scale`.
    ///
    pub fn mul_plain(&self, table: &[RnsModulus], plain: &RnsPoly, scale: f64) -> ExtendedCiphertext {
        ExtendedCiphertext {
            c0: self.c0.clone().mul(table, plain),
            c1: self.c1.clone().mul(table, plain),
            towers: self.towers,
            scale: self.scale * scale,
            scale_degree: self.scale_degree + 1,
            slots: self.slots,
            shape: self.shape
        }
    }

    ///
    /// Applies the automorphism `X -> X^k` to both components, without key switching.
    ///
    pub fn automorphism(&self, table: &[RnsModulus], k: usize, map: &[usize]) -> ExtendedCiphertext {
        ExtendedCiphertext {
            c0: apply_automorphism(table, &self.c0, k, map),
            c1: apply_automorphism(table, &self.c1, k, map),
            ..self.clone()
        }
    }
}

///
/// Returns `P x` w.r.t. the extended towers, where `x` lives w.r.t. the chain towers only.
/// This is zero modulo every special prime.
///
pub fn extend_by_special(chain: &ModulusChain, x: &RnsPoly) -> RnsPoly {
    let table = chain.moduli();
    let towers = x.num_towers();
    assert_eq!(&chain.chain_moduli(towers)[..], x.moduli());
    let N = x.ring_dimension();
    let data = chain.extended_moduli(towers).par_iter().map(|m| {
        let Zp = table[*m].ring();
        if *m < towers {
            let factor = Zp.coerce(&ZZ, chain.special_product_mod(*m) as i64);
            x.tower(*m).iter().map(|c| Zp.mul_ref(c, &factor)).collect()
        } else {
            (0..N).map(|_| Zp.zero()).collect()
        }
    }).collect();
    return RnsPoly::from_towers(chain.extended_moduli(towers), x.format(), data);
}

///
/// Decomposes `x` into its digits and extends each digit to the extended towers, via the
/// (almost exact) base conversion. This is the expensive part of key switching, and does not
/// depend on the switching key.
///
#[instrument(skip_all)]
pub fn decompose(chain: &ModulusChain, x: &RnsPoly) -> ExtendedDigits {
    let table = chain.moduli();
    let towers = x.num_towers();
    let x = x.clone().in_format(table, Format::Evaluation);
    let ext_moduli = chain.extended_moduli(towers);
    return chain.digits().restrict_to(towers).into_iter().enumerate().map(|(j, digit)| {
        chain.mod_up_table(towers, j).map(|conv| {
            let digit_part = x.select_towers(&digit.collect::<Vec<_>>());
            digit_part.extend_towers(table, conv).select_towers(&ext_moduli)
        })
    }).collect();
}

///
/// Computes the inner product of the extended digits with the rows of the switching key,
/// giving the two components of the switched element w.r.t. the extended towers.
///
#[instrument(skip_all)]
pub fn key_switch_inner_product(chain: &ModulusChain, digits: &ExtendedDigits, key: &SwitchingKey, towers: usize) -> (RnsPoly, RnsPoly) {
    assert_eq!(key.digit_count(), digits.len());
    let table = chain.moduli();
    let ext_moduli = chain.extended_moduli(towers);
    let N = chain.ring_dimension();
    let mut result0 = RnsPoly::zero(table, ext_moduli.clone(), N, Format::Evaluation);
    let mut result1 = RnsPoly::zero(table, ext_moduli.clone(), N, Format::Evaluation);
    for (digit, (b, a)) in digits.iter().zip(key.rows().iter()) {
        if let Some(digit) = digit {
            result0.add_assign(table, &digit.clone().mul(table, &b.select_towers(&ext_moduli)));
            result1.add_assign(table, &digit.clone().mul(table, &a.select_towers(&ext_moduli)));
        }
    }
    return (result0, result1);
}

///
/// Switches `c1` of the ciphertext w.r.t. the given key, but does not remove the special
/// towers. If `include_first` is set, `P c0` is added to the first component, so that
/// [`key_switch_down()`] yields a complete ciphertext; otherwise, `c0` must be added by the
/// caller after [`key_switch_down()`].
///
pub fn key_switch_ext(chain: &ModulusChain, ct: &Ciphertext, key: &SwitchingKey, include_first: bool) -> ExtendedCiphertext {
    let digits = decompose(chain, &ct.c1);
    let (mut c0, c1) = key_switch_inner_product(chain, &digits, key, ct.num_towers());
    if include_first {
        c0.add_assign(chain.moduli(), &extend_by_special(chain, &ct.c0.clone().in_format(chain.moduli(), Format::Evaluation)));
    }
    return ExtendedCiphertext {
        c0, c1,
        towers: ct.num_towers(),
        scale: ct.scale,
        scale_degree: ct.scale_degree,
        slots: ct.slots,
        shape: ct.shape
    };
}

///
/// Divides both components by the special modulus `P` and removes the special towers.
///
#[instrument(skip_all)]
pub fn key_switch_down(chain: &ModulusChain, ct: &ExtendedCiphertext) -> Ciphertext {
    let mod_down = chain.mod_down_table(ct.towers);
    let c0 = mod_down.apply(chain.moduli(), &ct.c0);
    let c1 = mod_down.apply(chain.moduli(), &ct.c1);
    return Ciphertext::new(c0, c1, ct.scale, ct.scale_degree, ct.slots, ct.shape);
}

///
/// Computes the extended digits of `c1`, which can then be reused by
/// [`fast_rotation_ext()`] for any number of automorphisms.
///
pub fn fast_rotation_precompute(chain: &ModulusChain, ct: &Ciphertext) -> ExtendedDigits {
    decompose(chain, &ct.c1)
}

///
/// Applies the automorphism `X -> X^k` to the ciphertext, given the precomputed digits of its
/// `c1` component and the switching key from `sigma_k(s)` to `s`. The result lives w.r.t. the
/// extended towers; its first component contains `P sigma_k(c0)` only if `include_first` is set.
///
#[instrument(skip_all)]
pub fn fast_rotation_ext(chain: &ModulusChain, ct: &Ciphertext, digits: &ExtendedDigits, k: usize, map: &[usize], key: &SwitchingKey, include_first: bool) -> ExtendedCiphertext {
    let table = chain.moduli();
    let rotated_digits = digits.iter().map(|digit| digit.as_ref().map(|d| apply_automorphism(table, d, k, map))).collect::<Vec<_>>();
    let (mut c0, c1) = key_switch_inner_product(chain, &rotated_digits, key, ct.num_towers());
    if include_first {
        let rotated_c0 = apply_automorphism(table, &ct.c0.clone().in_format(table, Format::Evaluation), k, map);
        c0.add_assign(table, &extend_by_special(chain, &rotated_c0));
    }
    return ExtendedCiphertext {
        c0, c1,
        towers: ct.num_towers(),
        scale: ct.scale,
        scale_degree: ct.scale_degree,
        slots: ct.slots,
        shape: ct.shape
    };
}

///
/// Given the components `(d0, d1, d2)` of a product, decrypting as `d0 + d1 s + d2 s^2`,
/// returns a ciphertext `(c0, c1)` decrypting to the same value, using the switching key from
/// `s^2` to `s`.
///
#[instrument(skip_all)]
pub fn relinearize(chain: &ModulusChain, d0: RnsPoly, d1: RnsPoly, d2: &RnsPoly, key: &SwitchingKey) -> (RnsPoly, RnsPoly) {
    let table = chain.moduli();
    let towers = d2.num_towers();
    let digits = decompose(chain, d2);
    let (e0, e1) = key_switch_inner_product(chain, &digits, key, towers);
    let mod_down = chain.mod_down_table(towers);
    let c0 = d0.in_format(table, Format::Evaluation).add(table, &mod_down.apply(table, &e0));
    let c1 = d1.in_format(table, Format::Evaluation).add(table, &mod_down.apply(table, &e1));
    return (c0, c1);
}
