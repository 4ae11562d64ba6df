use std::collections::HashMap;

use feanor_math::algorithms::fft::cooley_tuckey::CooleyTuckeyFFT;
use feanor_math::algorithms::fft::FFTAlgorithm;
use feanor_math::homomorphism::Identity;
use feanor_math::primitive_int::StaticRing;
use feanor_math::ring::*;
use feanor_math::rings::zn::zn_64::*;
use feanor_math::rings::zn::ZnRingStore;

use crate::error::{CkksError, Result};

///
/// Negacyclic number-theoretic transform over `Fp[X]/(X^n + 1)`, i.e. the evaluation
/// of a polynomial at all primitive `2n`-th roots of unity.
///
/// The output is in "unordered" (bitreversed) order. The exponent `e` such that the `j`-th
/// output is the evaluation at `zeta^e` is given by [`NegacyclicNTT::evaluation_exponents()`].
///
pub struct NegacyclicNTT {
    ring: Zn,
    fft_table: CooleyTuckeyFFT<ZnBase, ZnBase, Identity<Zn>>,
    twiddles: Vec<ZnEl>,
    inv_twiddles: Vec<ZnEl>,
    root_of_unity: ZnEl
}

impl NegacyclicNTT {

    pub fn new(Fp: Zn, log2_rank: usize) -> Result<Self> {
        let rank = 1 << log2_rank;
        let zeta = primitive_root_of_unity(&Fp, 2 * rank)?;

        let mut twiddles = Vec::with_capacity(rank);
        let mut inv_twiddles = Vec::with_capacity(rank);
        let mut current = Fp.one();
        let mut current_inv = Fp.one();
        let zeta_inv = Fp.pow(Fp.clone_el(&zeta), 2 * rank - 1);
        for _ in 0..rank {
            twiddles.push(Fp.clone_el(&current));
            inv_twiddles.push(Fp.clone_el(&current_inv));
            Fp.mul_assign_ref(&mut current, &zeta);
            Fp.mul_assign_ref(&mut current_inv, &zeta_inv);
        }

        let zeta_sqr = Fp.pow(Fp.clone_el(&zeta), 2);
        let fft_table = CooleyTuckeyFFT::new(Fp.clone(), zeta_sqr, log2_rank);

        return Ok(Self {
            ring: Fp,
            fft_table: fft_table,
            twiddles: twiddles,
            inv_twiddles: inv_twiddles,
            root_of_unity: zeta
        });
    }

    pub fn ring(&self) -> &Zn {
        &self.ring
    }

    pub fn len(&self) -> usize {
        self.fft_table.len()
    }

    pub fn root_of_unity(&self) -> ZnEl {
        self.root_of_unity
    }

    pub fn forward(&self, data: &mut [ZnEl]) {
        assert_eq!(self.len(), data.len());
        for i in 0..data.len() {
            self.ring.mul_assign_ref(&mut data[i], &self.inv_twiddles[i]);
        }
        self.fft_table.unordered_fft(&mut data[..], &self.ring);
    }

    pub fn inverse(&self, data: &mut [ZnEl]) {
        assert_eq!(self.len(), data.len());
        self.fft_table.unordered_inv_fft(&mut data[..], &self.ring);
        for i in 0..data.len() {
            self.ring.mul_assign_ref(&mut data[i], &self.twiddles[i]);
        }
    }

    ///
    /// Returns the odd exponents `e_j` such that the `j`-th entry of [`NegacyclicNTT::forward()`]
    /// is the evaluation at `zeta^(e_j)`, where `zeta` is [`NegacyclicNTT::root_of_unity()`].
    ///
    pub fn evaluation_exponents(&self) -> Result<Vec<usize>> {
        let n = self.len();
        let mut power_to_exponent = HashMap::new();
        let mut current = self.ring.one();
        for e in 0..(2 * n) {
            power_to_exponent.insert(self.ring.smallest_positive_lift(current), e);
            self.ring.mul_assign_ref(&mut current, &self.root_of_unity);
        }
        let mut monomial = (0..n).map(|_| self.ring.zero()).collect::<Vec<_>>();
        monomial[1] = self.ring.one();
        self.forward(&mut monomial);
        return monomial.into_iter().map(|x| power_to_exponent.get(&self.ring.smallest_positive_lift(x)).copied().ok_or_else(
            || CkksError::InvalidParameters(format!("NTT modulo {} does not evaluate at powers of its root of unity", self.ring.modulus()))
        )).collect();
    }
}

///
/// Finds a primitive `order`-th root of unity modulo `p`, where `order` is a power of two
/// dividing `p - 1`.
///
pub fn primitive_root_of_unity(Fp: &Zn, order: usize) -> Result<ZnEl> {
    let p = *Fp.modulus();
    if (p - 1) % order as i64 != 0 {
        return Err(CkksError::InvalidParameters(format!("{} is not 1 mod {}", p, order)));
    }
    let cofactor = ((p - 1) / order as i64) as usize;
    for g in 2..p.min(1 << 20) {
        let candidate = Fp.pow(Fp.coerce(&StaticRing::<i64>::RING, g), cofactor);
        if Fp.eq_el(&Fp.pow(Fp.clone_el(&candidate), order / 2), &Fp.neg_one()) {
            return Ok(candidate);
        }
    }
    return Err(CkksError::InvalidParameters(format!("no primitive {}-th root of unity modulo {}", order, p)));
}

#[cfg(test)]
use feanor_math::homomorphism::Homomorphism;

#[cfg(test)]
fn negacyclic_schoolbook(Fp: &Zn, lhs: &[ZnEl], rhs: &[ZnEl]) -> Vec<ZnEl> {
    let n = lhs.len();
    let mut result = (0..n).map(|_| Fp.zero()).collect::<Vec<_>>();
    for i in 0..n {
        for j in 0..n {
            let prod = Fp.mul_ref(&lhs[i], &rhs[j]);
            if i + j < n {
                Fp.add_assign(&mut result[i + j], prod);
            } else {
                Fp.sub_assign(&mut result[i + j - n], prod);
            }
        }
    }
    return result;
}

#[test]
fn test_ntt_multiplication() {
    let Fp = Zn::new(257);
    let ntt = NegacyclicNTT::new(Fp.clone(), 4).unwrap();
    let lhs = (0..16).map(|i| Fp.int_hom().map(i * i + 3)).collect::<Vec<_>>();
    let rhs = (0..16).map(|i| Fp.int_hom().map(7 * i - 20)).collect::<Vec<_>>();
    let expected = negacyclic_schoolbook(&Fp, &lhs, &rhs);

    let mut lhs_ntt = lhs.clone();
    let mut rhs_ntt = rhs.clone();
    ntt.forward(&mut lhs_ntt);
    ntt.forward(&mut rhs_ntt);
    let mut actual = (0..16).map(|i| Fp.mul_ref(&lhs_ntt[i], &rhs_ntt[i])).collect::<Vec<_>>();
    ntt.inverse(&mut actual);
    for i in 0..16 {
        assert!(Fp.eq_el(&expected[i], &actual[i]));
    }
}

#[test]
fn test_ntt_evaluation_exponents() {
    let Fp = Zn::new(97);
    let ntt = NegacyclicNTT::new(Fp.clone(), 3).unwrap();
    let exponents = ntt.evaluation_exponents().unwrap();
    let mut sorted = exponents.clone();
    sorted.sort();
    assert_eq!(vec![1, 3, 5, 7, 9, 11, 13, 15], sorted);

    // evaluating 1 + 2X + X^5 at zeta^e agrees with the transform
    let mut data = (0..8).map(|_| Fp.zero()).collect::<Vec<_>>();
    data[0] = Fp.int_hom().map(1);
    data[1] = Fp.int_hom().map(2);
    data[5] = Fp.int_hom().map(1);
    let original = data.clone();
    ntt.forward(&mut data);
    for j in 0..8 {
        let x = Fp.pow(ntt.root_of_unity(), exponents[j]);
        let mut expected = Fp.zero();
        for i in 0..8 {
            Fp.add_assign(&mut expected, Fp.mul_ref(&original[i], &Fp.pow(x, i)));
        }
        assert!(Fp.eq_el(&expected, &data[j]));
    }
}
