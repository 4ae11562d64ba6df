use feanor_math::ring::*;
use feanor_math::primitive_int::StaticRing;
use feanor_math::rings::zn::zn_64::*;
use feanor_math::rings::zn::ZnRingStore;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ntt::NegacyclicNTT;

///
/// Conversion between RNS bases, used for extending and removing towers.
///
pub mod conv;

const ZZ: StaticRing<i64> = StaticRing::<i64>::RING;

///
/// A single RNS factor, i.e. a prime `p = 1 mod 2N` together with the negacyclic NTT
/// modulo `p`.
///
pub struct RnsModulus {
    ring: Zn,
    ntt: NegacyclicNTT
}

impl RnsModulus {

    pub fn new(p: i64, log2_ring_dimension: usize) -> Result<Self> {
        let ring = Zn::new(p as u64);
        let ntt = NegacyclicNTT::new(ring.clone(), log2_ring_dimension)?;
        return Ok(Self { ring, ntt });
    }

    pub fn ring(&self) -> &Zn {
        &self.ring
    }

    pub fn ntt(&self) -> &NegacyclicNTT {
        &self.ntt
    }

    pub fn modulus(&self) -> i64 {
        *self.ring.modulus()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    Coefficient,
    Evaluation
}

///
/// An element of `Z[X]/(X^N + 1, Q)`, where `Q` is a product of primes ("towers"), stored
/// as one residue vector per prime.
///
/// The primes are given as indices into a table of [`RnsModulus`], which is passed to every
/// operation. The residue vectors are either the coefficients of the polynomial, or
/// its evaluations at the primitive `2N`-th roots of unity, as indicated by [`RnsPoly::format()`].
///
/// Binary operations require both operands to live w.r.t. the same towers and in the same
/// format, otherwise they panic.
///
#[derive(Clone)]
pub struct RnsPoly {
    moduli: Vec<usize>,
    format: Format,
    data: Vec<Vec<ZnEl>>
}

impl RnsPoly {

    pub fn zero(table: &[RnsModulus], moduli: Vec<usize>, ring_dimension: usize, format: Format) -> Self {
        let data = moduli.iter().map(|m| (0..ring_dimension).map(|_| table[*m].ring().zero()).collect()).collect();
        return Self { moduli, format, data };
    }

    pub fn from_towers(moduli: Vec<usize>, format: Format, data: Vec<Vec<ZnEl>>) -> Self {
        assert_eq!(moduli.len(), data.len());
        assert!(data.iter().all(|tower| tower.len() == data[0].len()));
        return Self { moduli, format, data };
    }

    ///
    /// Creates the polynomial with the given integer coefficients, in coefficient format.
    ///
    pub fn from_coefficients(table: &[RnsModulus], moduli: Vec<usize>, coefficients: &[i128]) -> Self {
        let data = moduli.par_iter().map(|m| {
            let Zp = table[*m].ring();
            let p = table[*m].modulus() as i128;
            coefficients.iter().map(|c| Zp.coerce(&ZZ, c.rem_euclid(p) as i64)).collect()
        }).collect();
        return Self { moduli, format: Format::Coefficient, data };
    }

    pub fn moduli(&self) -> &[usize] {
        &self.moduli
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn num_towers(&self) -> usize {
        self.moduli.len()
    }

    pub fn ring_dimension(&self) -> usize {
        self.data.first().map(|tower| tower.len()).unwrap_or(0)
    }

    pub fn tower(&self, i: usize) -> &[ZnEl] {
        &self.data[i]
    }

    pub fn towers(&self) -> &[Vec<ZnEl>] {
        &self.data
    }

    pub fn into_towers(self) -> Vec<Vec<ZnEl>> {
        self.data
    }

    fn assert_compatible(&self, other: &RnsPoly) {
        assert_eq!(self.moduli, other.moduli, "operands live w.r.t. different towers");
        assert_eq!(self.format, other.format, "operands are in different formats");
    }

    pub fn add_assign(&mut self, table: &[RnsModulus], other: &RnsPoly) {
        self.assert_compatible(other);
        self.data.par_iter_mut().zip(other.data.par_iter()).zip(self.moduli.par_iter()).for_each(|((lhs, rhs), m)| {
            let Zp = table[*m].ring();
            for (x, y) in lhs.iter_mut().zip(rhs.iter()) {
                Zp.add_assign_ref(x, y);
            }
        });
    }

    pub fn sub_assign(&mut self, table: &[RnsModulus], other: &RnsPoly) {
        self.assert_compatible(other);
        self.data.par_iter_mut().zip(other.data.par_iter()).zip(self.moduli.par_iter()).for_each(|((lhs, rhs), m)| {
            let Zp = table[*m].ring();
            for (x, y) in lhs.iter_mut().zip(rhs.iter()) {
                Zp.sub_assign_ref(x, y);
            }
        });
    }

    ///
    /// Pointwise multiplication, only available in [`Format::Evaluation`].
    ///
    pub fn mul_assign(&mut self, table: &[RnsModulus], other: &RnsPoly) {
        self.assert_compatible(other);
        assert_eq!(Format::Evaluation, self.format, "multiplication requires evaluation format");
        self.data.par_iter_mut().zip(other.data.par_iter()).zip(self.moduli.par_iter()).for_each(|((lhs, rhs), m)| {
            let Zp = table[*m].ring();
            for (x, y) in lhs.iter_mut().zip(rhs.iter()) {
                Zp.mul_assign_ref(x, y);
            }
        });
    }

    pub fn add(mut self, table: &[RnsModulus], other: &RnsPoly) -> RnsPoly {
        self.add_assign(table, other);
        return self;
    }

    pub fn sub(mut self, table: &[RnsModulus], other: &RnsPoly) -> RnsPoly {
        self.sub_assign(table, other);
        return self;
    }

    pub fn mul(mut self, table: &[RnsModulus], other: &RnsPoly) -> RnsPoly {
        self.mul_assign(table, other);
        return self;
    }

    pub fn negate_inplace(&mut self, table: &[RnsModulus]) {
        self.data.par_iter_mut().zip(self.moduli.par_iter()).for_each(|(tower, m)| {
            let Zp = table[*m].ring();
            for x in tower.iter_mut() {
                Zp.negate_inplace(x);
            }
        });
    }

    pub fn scalar_mul_int(&mut self, table: &[RnsModulus], scalar: i128) {
        self.data.par_iter_mut().zip(self.moduli.par_iter()).for_each(|(tower, m)| {
            let Zp = table[*m].ring();
            let c = Zp.coerce(&ZZ, scalar.rem_euclid(table[*m].modulus() as i128) as i64);
            for x in tower.iter_mut() {
                Zp.mul_assign_ref(x, &c);
            }
        });
    }

    ///
    /// Multiplies the `i`-th tower by `scalars[i]`.
    ///
    pub fn scalar_mul_residues(&mut self, table: &[RnsModulus], scalars: &[ZnEl]) {
        assert_eq!(self.num_towers(), scalars.len());
        self.data.par_iter_mut().zip(self.moduli.par_iter()).zip(scalars.par_iter()).for_each(|((tower, m), c)| {
            let Zp = table[*m].ring();
            for x in tower.iter_mut() {
                Zp.mul_assign_ref(x, c);
            }
        });
    }

    ///
    /// Adds `scalar` to every evaluation (resp. to the constant coefficient), i.e. adds the
    /// constant polynomial `scalar`.
    ///
    pub fn add_scalar_int(&mut self, table: &[RnsModulus], scalar: i128) {
        let format = self.format;
        self.data.par_iter_mut().zip(self.moduli.par_iter()).for_each(|(tower, m)| {
            let Zp = table[*m].ring();
            let c = Zp.coerce(&ZZ, scalar.rem_euclid(table[*m].modulus() as i128) as i64);
            match format {
                Format::Coefficient => Zp.add_assign_ref(&mut tower[0], &c),
                Format::Evaluation => for x in tower.iter_mut() {
                    Zp.add_assign_ref(x, &c);
                }
            }
        });
    }

    #[tracing::instrument(skip_all)]
    pub fn switch_format(&mut self, table: &[RnsModulus], format: Format) {
        if self.format == format {
            return;
        }
        self.data.par_iter_mut().zip(self.moduli.par_iter()).for_each(|(tower, m)| match format {
            Format::Evaluation => table[*m].ntt().forward(tower),
            Format::Coefficient => table[*m].ntt().inverse(tower)
        });
        self.format = format;
    }

    pub fn in_format(mut self, table: &[RnsModulus], format: Format) -> RnsPoly {
        self.switch_format(table, format);
        return self;
    }

    ///
    /// Removes the last `n` towers. The result represents the same polynomial, modulo
    /// the remaining primes.
    ///
    pub fn drop_last_towers(&mut self, n: usize) {
        assert!(n <= self.num_towers());
        let new_len = self.num_towers() - n;
        self.moduli.truncate(new_len);
        self.data.truncate(new_len);
    }

    ///
    /// Returns the element modulo the given subset of towers.
    ///
    pub fn select_towers(&self, moduli: &[usize]) -> RnsPoly {
        let data = moduli.iter().map(|m| {
            let i = self.moduli.iter().position(|n| n == m).expect("selected tower is not present");
            self.data[i].clone()
        }).collect();
        return RnsPoly { moduli: moduli.to_vec(), format: self.format, data };
    }

    ///
    /// Returns the coefficients of the `i`-th tower, lifted to `(-p/2, p/2]`.
    ///
    pub fn centered_tower_coefficients(&self, table: &[RnsModulus], i: usize) -> Vec<i64> {
        let Zp = table[self.moduli[i]].ring();
        let mut tower = self.data[i].clone();
        if self.format == Format::Evaluation {
            table[self.moduli[i]].ntt().inverse(&mut tower);
        }
        return tower.into_iter().map(|x| Zp.smallest_lift(x)).collect();
    }

    ///
    /// Applies `f` to every tower, with the index of the tower's modulus.
    ///
    pub fn map_towers<F>(&mut self, f: F)
        where F: Fn(usize, &mut Vec<ZnEl>) + Send + Sync
    {
        self.data.par_iter_mut().zip(self.moduli.par_iter()).for_each(|(tower, m)| f(*m, tower));
    }
}

#[cfg(test)]
pub fn test_table(log2_n: usize, count: usize) -> Vec<RnsModulus> {
    use feanor_math::algorithms::miller_rabin::is_prime;
    let n = 1i64 << (log2_n + 1);
    ((1i64 << 20)..).map(|k| k * n + 1).filter(|p| is_prime(ZZ, p, 10)).take(count).map(|p| RnsModulus::new(p, log2_n).unwrap()).collect()
}

#[test]
fn test_rns_poly_arithmetic() {
    let table = test_table(3, 3);
    let a = RnsPoly::from_coefficients(&table, vec![0, 1, 2], &[1, 2, 0, 0, 0, 0, 0, -1]);
    let b = RnsPoly::from_coefficients(&table, vec![0, 1, 2], &[0, 1, 0, 0, 0, 0, 0, 0]);
    // (1 + 2X - X^7) * X = X + 2X^2 - X^8 = 1 + X + 2X^2
    let prod = a.clone().in_format(&table, Format::Evaluation).mul(&table, &b.clone().in_format(&table, Format::Evaluation)).in_format(&table, Format::Coefficient);
    for i in 0..3 {
        assert_eq!(vec![1, 1, 2, 0, 0, 0, 0, 0], prod.centered_tower_coefficients(&table, i));
    }
    let mut sum = a.clone().sub(&table, &b);
    sum.scalar_mul_int(&table, -3);
    sum.add_scalar_int(&table, 5);
    assert_eq!(vec![2, -3, 0, 0, 0, 0, 0, 3], sum.centered_tower_coefficients(&table, 2));

    let mut dropped = sum.clone();
    dropped.drop_last_towers(2);
    assert_eq!(1, dropped.num_towers());
    assert_eq!(&[0], dropped.moduli());
    assert_eq!(vec![2, -3, 0, 0, 0, 0, 0, 3], dropped.centered_tower_coefficients(&table, 0));
}

#[test]
#[should_panic]
fn test_rns_poly_mismatching_towers() {
    let table = test_table(3, 3);
    let mut a = RnsPoly::zero(&table, vec![0, 1, 2], 8, Format::Coefficient);
    let b = RnsPoly::zero(&table, vec![0, 1], 8, Format::Coefficient);
    a.add_assign(&table, &b);
}

#[test]
#[should_panic]
fn test_rns_poly_mul_requires_evaluation_format() {
    let table = test_table(3, 2);
    let mut a = RnsPoly::zero(&table, vec![0, 1], 8, Format::Coefficient);
    let b = a.clone();
    a.mul_assign(&table, &b);
}
