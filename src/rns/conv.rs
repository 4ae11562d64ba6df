use feanor_math::divisibility::DivisibilityRingStore;
use feanor_math::integer::*;
use feanor_math::primitive_int::*;
use feanor_math::ring::*;
use feanor_math::rings::zn::zn_64::*;
use feanor_math::rings::zn::zn_rns;
use feanor_math::rings::zn::ZnRingStore;
use rayon::prelude::*;
use tracing::instrument;

use crate::error::{CkksError, Result};
use super::{Format, RnsModulus, RnsPoly};

const ZZbig: BigIntRing = BigIntRing::RING;
const ZZ: StaticRing<i64> = StaticRing::<i64>::RING;
const ZZi128: StaticRing<i128> = StaticRing::<i128>::RING;

///
/// Stores values for an almost exact conversion between RNS bases.
/// A complete conversion refers to the function
/// ```text
/// Z/QZ -> Z/Q'Z, x -> [lift(x)]
/// ```
/// In our case, the output of the function is allowed to have an error of `{ -Q, 0, Q }`,
/// unless the shortest lift of the input is bounded by `Q/4`, in which case the result
/// is always correct.
///
/// The lifted value is approximated using lower precision integers, which is used to
/// determine the overflow when computing
/// ```text
/// lift(x) = sum_q lift(x * q/Q mod q) * Q/q
/// ```
/// modulo some `q'`.
///
pub struct BaseConversion {
    from: Vec<usize>,
    to: Vec<usize>,
    /// the values `q/Q mod q` for each RNS factor q dividing Q
    q_over_Q: Vec<ZnEl>,
    /// the values `Q/q mod q'`, indexed as `[q'][q]`
    Q_over_q: Vec<Vec<ZnEl>>,
    /// the values `Q/q/2^drop_bits` for each RNS factor q dividing Q
    Q_over_q_int: Vec<i128>,
    Q_downscaled: i128,
    /// `Q mod q'` for every `q'` dividing `Q'`
    Q_mod_q: Vec<ZnEl>
}

impl BaseConversion {

    pub fn new(table: &[RnsModulus], from: Vec<usize>, to: Vec<usize>) -> Result<Self> {
        assert!(from.len() > 0);
        let modulus_big = |m: usize| int_cast(table[m].modulus(), ZZbig, ZZ);
        let Q = ZZbig.prod(from.iter().map(|m| modulus_big(*m)));
        let Q_over = |i: usize| ZZbig.prod(from.iter().enumerate().filter(|(j, _)| *j != i).map(|(_, m)| modulus_big(*m)));

        // When computing the approximate lifted value, we can drop `k` bits where `k <= 1 + log(Q/(4 r max(q + 1)))` and `q | Q`
        let log2_r = (from.len() as u64).next_power_of_two().trailing_zeros() as i64;
        let log2_qmax = from.iter().map(|m| 64 - table[*m].modulus().leading_zeros() as i64).max().unwrap_or(0);
        let log2_Q = ZZbig.abs_log2_ceil(&Q).unwrap_or(0) as i64;
        let drop_bits = log2_Q - log2_r - log2_qmax - 5;
        let drop_bits = if drop_bits < 0 { 0 } else { drop_bits as usize };
        assert!(i128::BITS as i64 - 1 > log2_r + log2_Q - drop_bits as i64);

        let mut q_over_Q = Vec::with_capacity(from.len());
        for (i, m) in from.iter().enumerate() {
            let Zq = table[*m].ring();
            q_over_Q.push(Zq.invert(&Zq.coerce(&ZZbig, Q_over(i))).ok_or_else(
                || CkksError::InvalidParameters(format!("RNS base contains {} twice", table[*m].modulus()))
            )?);
        }

        return Ok(Self {
            Q_over_q: to.iter().map(|m_out| (0..from.len()).map(|i| table[*m_out].ring().coerce(&ZZbig, Q_over(i))).collect()).collect(),
            Q_over_q_int: (0..from.len()).map(|i|
                int_cast(ZZbig.rounded_div(Q_over(i), &ZZbig.power_of_two(drop_bits)), ZZi128, ZZbig)
            ).collect(),
            Q_mod_q: to.iter().map(|m_out| table[*m_out].ring().coerce(&ZZbig, ZZbig.clone_el(&Q))).collect(),
            Q_downscaled: int_cast(ZZbig.rounded_div(Q, &ZZbig.power_of_two(drop_bits)), ZZi128, ZZbig),
            q_over_Q: q_over_Q,
            from: from,
            to: to
        });
    }

    pub fn input_moduli(&self) -> &[usize] {
        &self.from
    }

    pub fn output_moduli(&self) -> &[usize] {
        &self.to
    }

    ///
    /// Performs the (almost) exact RNS base conversion
    /// ```text
    ///     Z/QZ -> Z/Q'Z, x -> smallest_lift(x) + kQ mod Q'
    /// ```
    /// where `k in { -1, 0, 1 }`, on the coefficients given by `input`.
    ///
    pub fn apply(&self, table: &[RnsModulus], input: &[&[ZnEl]]) -> Vec<Vec<ZnEl>> {
        assert_eq!(self.from.len(), input.len());
        let col_count = input[0].len();
        let lifts = self.from.iter().enumerate().map(|(i, m)| {
            let Zq = table[*m].ring();
            input[i].iter().map(|x| Zq.smallest_positive_lift(Zq.mul_ref(x, &self.q_over_Q[i]))).collect::<Vec<_>>()
        }).collect::<Vec<_>>();

        let corrections = (0..col_count).map(|j| ZZi128.rounded_div(
            (0..self.from.len()).map(|i| lifts[i][j] as i128 * self.Q_over_q_int[i]).sum::<i128>(),
            &self.Q_downscaled
        )).collect::<Vec<_>>();

        return self.to.par_iter().enumerate().map(|(k, m_out)| {
            let Zq = table[*m_out].ring();
            (0..col_count).map(|j| {
                let mut result = Zq.zero();
                for i in 0..self.from.len() {
                    Zq.add_assign(&mut result, Zq.mul_ref_snd(Zq.coerce(&ZZ, lifts[i][j]), &self.Q_over_q[k][i]));
                }
                Zq.sub_assign(&mut result, Zq.mul_ref_snd(Zq.coerce(&ZZ, corrections[j] as i64), &self.Q_mod_q[k]));
                result
            }).collect()
        }).collect();
    }
}

impl RnsPoly {

    ///
    /// Adds the towers [`BaseConversion::output_moduli()`] to this element, with residues computed
    /// from the existing towers by base conversion. The format is preserved.
    ///
    #[instrument(skip_all)]
    pub fn extend_towers(&self, table: &[RnsModulus], conv: &BaseConversion) -> RnsPoly {
        assert_eq!(self.moduli(), conv.input_moduli());
        let coeffs = self.clone().in_format(table, Format::Coefficient);
        let mut new_towers = RnsPoly::from_towers(conv.output_moduli().to_vec(), Format::Coefficient, conv.apply(table, &coeffs.data.iter().map(|t| &t[..]).collect::<Vec<_>>()));
        new_towers.switch_format(table, self.format);
        let mut moduli = self.moduli.clone();
        moduli.extend(new_towers.moduli.iter().copied());
        let mut data = self.data.clone();
        data.extend(new_towers.data.into_iter());
        return RnsPoly { moduli, format: self.format, data };
    }

    ///
    /// Returns the coefficients, lifted to `(-Q/2, Q/2]` where `Q` is the product of all towers.
    /// Requires `Q < 2^126`.
    ///
    pub fn centered_coefficients(&self, table: &[RnsModulus]) -> Vec<i128> {
        if self.num_towers() == 1 {
            return self.centered_tower_coefficients(table, 0).into_iter().map(|c| c as i128).collect();
        }
        let coeffs = self.clone().in_format(table, Format::Coefficient);
        let crt = zn_rns::Zn::new(coeffs.moduli.iter().map(|m| table[*m].ring().clone()).collect(), ZZbig);
        assert!(ZZbig.abs_log2_ceil(crt.modulus()).unwrap_or(0) < 126);
        return (0..coeffs.ring_dimension()).map(|j| {
            let value = crt.from_congruence(coeffs.data.iter().map(|tower| tower[j]));
            int_cast(crt.smallest_lift(value), ZZi128, ZZbig)
        }).collect();
    }
}

///
/// Precomputed data for removing a set of towers `P` from an element of `Z/QPZ`, by
/// computing the rounded division `round(x / P) in Z/QZ`.
///
/// This is used both by the final step of key switching, and by rescaling (where `P` is
/// a single prime).
///
pub struct ModDownTable {
    conv: BaseConversion,
    P_inv: Vec<ZnEl>
}

impl ModDownTable {

    pub fn new(table: &[RnsModulus], kept: Vec<usize>, removed: Vec<usize>) -> Result<Self> {
        let mut P_inv = Vec::with_capacity(kept.len());
        for m in &kept {
            let Zq = table[*m].ring();
            let P_mod_q = Zq.prod(removed.iter().map(|r| Zq.coerce(&ZZ, table[*r].modulus())));
            P_inv.push(Zq.invert(&P_mod_q).ok_or_else(|| CkksError::InvalidParameters(format!("removed towers contain {}", table[*m].modulus())))?);
        }
        return Ok(Self {
            conv: BaseConversion::new(table, removed, kept)?,
            P_inv: P_inv
        });
    }

    pub fn kept_moduli(&self) -> &[usize] {
        self.conv.output_moduli()
    }

    pub fn removed_moduli(&self) -> &[usize] {
        self.conv.input_moduli()
    }

    #[instrument(skip_all)]
    pub fn apply(&self, table: &[RnsModulus], x: &RnsPoly) -> RnsPoly {
        let kept_len = self.kept_moduli().len();
        assert_eq!(&x.moduli()[..kept_len], self.kept_moduli());
        assert_eq!(&x.moduli()[kept_len..], self.removed_moduli());

        let mut removed = x.data[kept_len..].to_vec();
        if x.format == Format::Evaluation {
            removed.par_iter_mut().zip(self.removed_moduli().par_iter()).for_each(|(tower, m)| table[*m].ntt().inverse(tower));
        }
        let mut correction = RnsPoly::from_towers(self.kept_moduli().to_vec(), Format::Coefficient, self.conv.apply(table, &removed.iter().map(|t| &t[..]).collect::<Vec<_>>()));
        correction.switch_format(table, x.format);

        let mut result = RnsPoly::from_towers(self.kept_moduli().to_vec(), x.format, x.data[..kept_len].to_vec());
        result.sub_assign(table, &correction);
        result.scalar_mul_residues(table, &self.P_inv);
        return result;
    }
}

#[cfg(test)]
use super::test_table;

#[test]
fn test_rns_base_conversion() {
    let table = test_table(3, 4);
    let conv = BaseConversion::new(&table, vec![0, 1], vec![2, 3]).unwrap();
    let Q = table[0].modulus() as i128 * table[1].modulus() as i128;

    let values: [i128; 8] = [0, 1, -1, Q / 4 - 1, -Q / 4 + 1, 123456789, -987654321, Q / 5];
    let x = RnsPoly::from_coefficients(&table, vec![0, 1], &values);
    let result = x.extend_towers(&table, &conv);
    assert_eq!(&[0, 1, 2, 3], result.moduli());
    for i in 2..4 {
        let p = table[i].modulus() as i128;
        let expected = values.iter().map(|v| { let r = v.rem_euclid(p); if r > p / 2 { (r - p) as i64 } else { r as i64 } }).collect::<Vec<_>>();
        assert_eq!(expected, result.centered_tower_coefficients(&table, i));
    }
}

#[test]
fn test_rns_base_conversion_evaluation_format() {
    let table = test_table(3, 3);
    let conv = BaseConversion::new(&table, vec![0], vec![1, 2]).unwrap();
    let values: [i128; 8] = [5, -7, 0, 1, 2, 3, -100, 42];
    let x = RnsPoly::from_coefficients(&table, vec![0], &values).in_format(&table, Format::Evaluation);
    let result = x.extend_towers(&table, &conv).in_format(&table, Format::Coefficient);
    for i in 0..3 {
        assert_eq!(vec![5, -7, 0, 1, 2, 3, -100, 42], result.centered_tower_coefficients(&table, i));
    }
}

#[test]
fn test_centered_coefficients() {
    let table = test_table(3, 3);
    let Q = table[0].modulus() as i128 * table[1].modulus() as i128;
    let values: [i128; 8] = [0, 1, -1, Q / 2 - 3, -Q / 2 + 3, 123456789012345, -98765432109876, 7];
    let x = RnsPoly::from_coefficients(&table, vec![0, 1], &values).in_format(&table, Format::Evaluation);
    assert_eq!(values.to_vec(), x.centered_coefficients(&table));
    let y = RnsPoly::from_coefficients(&table, vec![2], &values[..]);
    let p = table[2].modulus() as i128;
    assert_eq!(values.iter().map(|v| { let r = v.rem_euclid(p); if r > p / 2 { r - p } else { r } }).collect::<Vec<_>>(), y.centered_coefficients(&table));
}

#[test]
fn test_mod_down() {
    let table = test_table(3, 4);
    let P = table[2].modulus() as i128 * table[3].modulus() as i128;
    let mod_down = ModDownTable::new(&table, vec![0, 1], vec![2, 3]).unwrap();

    let values: [i128; 8] = [0, 3, -3, 1000, -1000, 77777, 5, -123];
    let scaled = values.iter().map(|v| v * P + 17).collect::<Vec<_>>();
    let x = RnsPoly::from_coefficients(&table, vec![0, 1, 2, 3], &scaled).in_format(&table, Format::Evaluation);
    let result = mod_down.apply(&table, &x).in_format(&table, Format::Coefficient);
    assert_eq!(&[0, 1], result.moduli());
    for i in 0..2 {
        let actual = result.centered_tower_coefficients(&table, i);
        for j in 0..8 {
            assert!((actual[j] as i128 - values[j]).abs() <= 1);
        }
    }
}
