use rand::{CryptoRng, Rng};
use rand::seq::index::sample;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use feanor_math::primitive_int::StaticRing;
use feanor_math::ring::*;

use crate::chain::ModulusChain;
use crate::params::SecretDistribution;
use crate::rns::{Format, RnsModulus, RnsPoly};

const ZZ: StaticRing<i64> = StaticRing::<i64>::RING;

///
/// A secret key `s`, stored by its (small) integer coefficients.
///
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKey {
    coefficients: Vec<i64>
}

impl SecretKey {

    pub fn from_coefficients(coefficients: Vec<i64>) -> Self {
        Self { coefficients }
    }

    pub fn coefficients(&self) -> &[i64] {
        &self.coefficients
    }

    ///
    /// Returns `s` as element of `Z[X]/(X^N + 1, Q)` for the given towers, in evaluation format.
    ///
    pub fn to_poly(&self, table: &[RnsModulus], moduli: Vec<usize>) -> RnsPoly {
        RnsPoly::from_coefficients(table, moduli, &self.coefficients.iter().map(|c| *c as i128).collect::<Vec<_>>()).in_format(table, Format::Evaluation)
    }
}

///
/// A public key `(b, a) = (-a s + e, a)` modulo the full ciphertext modulus.
///
#[derive(Clone)]
pub struct PublicKey {
    pub(crate) b: RnsPoly,
    pub(crate) a: RnsPoly
}

pub struct KeyPair {
    pub public_key: PublicKey,
    pub secret_key: SecretKey
}

///
/// A hybrid switching key from `s_from` to `s_to`, modulo the full ciphertext modulus
/// times the special modulus `P`. For each digit `j`, it stores
/// ```text
///   (b_j, a_j) = (-a_j s_to + e_j + P g_j s_from, a_j)
/// ```
/// where `g_j = 1 mod q` for the primes `q` of digit `j`, and `g_j = 0 mod q` for every
/// other chain prime.
///
#[derive(Clone)]
pub struct SwitchingKey {
    pub(crate) rows: Vec<(RnsPoly, RnsPoly)>
}

impl SwitchingKey {

    pub fn digit_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[(RnsPoly, RnsPoly)] {
        &self.rows
    }
}

pub fn sample_secret<R: Rng + CryptoRng>(distribution: SecretDistribution, ring_dimension: usize, mut rng: R) -> Vec<i64> {
    match distribution {
        SecretDistribution::UniformTernary => (0..ring_dimension).map(|_| rng.gen_range(-1..=1)).collect(),
        SecretDistribution::SparseTernary { hamming_weight } => {
            let mut result = vec![0; ring_dimension];
            for i in sample(&mut rng, ring_dimension, hamming_weight).into_iter() {
                result[i] = if rng.gen::<bool>() { 1 } else { -1 };
            }
            result
        }
    }
}

pub fn sample_error<R: Rng + CryptoRng>(ring_dimension: usize, std_dev: f64, mut rng: R) -> Vec<i128> {
    (0..ring_dimension).map(|_| (rng.sample::<f64, _>(StandardNormal) * std_dev).round() as i128).collect()
}

///
/// Samples a uniformly random element w.r.t. the given towers. Since the NTT is a bijection,
/// sampling directly in evaluation format gives the same distribution.
///
pub fn sample_uniform<R: Rng + CryptoRng>(table: &[RnsModulus], moduli: Vec<usize>, ring_dimension: usize, mut rng: R) -> RnsPoly {
    let data = moduli.iter().map(|m| {
        let Zp = table[*m].ring();
        let p = table[*m].modulus();
        (0..ring_dimension).map(|_| Zp.coerce(&ZZ, rng.gen_range(0..p))).collect()
    }).collect();
    return RnsPoly::from_towers(moduli, Format::Evaluation, data);
}

///
/// Returns `(-a s + e, a)` for uniform `a` and small `e`, w.r.t. the given towers.
///
pub fn rlwe_sample<R: Rng + CryptoRng>(table: &[RnsModulus], moduli: Vec<usize>, s: &RnsPoly, std_dev: f64, mut rng: R) -> (RnsPoly, RnsPoly) {
    let ring_dimension = s.ring_dimension();
    let a = sample_uniform(table, moduli.clone(), ring_dimension, &mut rng);
    let e = RnsPoly::from_coefficients(table, moduli, &sample_error(ring_dimension, std_dev, &mut rng)).in_format(table, Format::Evaluation);
    let mut b = a.clone().mul(table, s);
    b.negate_inplace(table);
    b.add_assign(table, &e);
    return (b, a);
}

pub fn gen_public_key<R: Rng + CryptoRng>(chain: &ModulusChain, sk: &SecretKey, std_dev: f64, rng: R) -> PublicKey {
    let moduli = chain.chain_moduli(chain.total_towers());
    let s = sk.to_poly(chain.moduli(), moduli.clone());
    let (b, a) = rlwe_sample(chain.moduli(), moduli, &s, std_dev, rng);
    return PublicKey { b, a };
}

///
/// Generates a switching key from `s_from` to `s_to`, both given in evaluation format
/// w.r.t. all chain towers and all special towers.
///
#[instrument(skip_all)]
pub fn gen_switching_key<R: Rng + CryptoRng>(chain: &ModulusChain, s_from: &RnsPoly, s_to: &RnsPoly, std_dev: f64, mut rng: R) -> SwitchingKey {
    let ext_moduli = chain.extended_moduli(chain.total_towers());
    assert_eq!(&ext_moduli[..], s_from.moduli());
    assert_eq!(&ext_moduli[..], s_to.moduli());
    let table = chain.moduli();
    let rows = chain.digits().iter().map(|digit| {
        let (mut b, a) = rlwe_sample(table, ext_moduli.clone(), s_to, std_dev, &mut rng);
        let gadget_factors = ext_moduli.iter().map(|m| {
            let Zp = table[*m].ring();
            if digit.contains(m) {
                Zp.coerce(&ZZ, chain.special_product_mod(*m) as i64)
            } else {
                Zp.zero()
            }
        }).collect::<Vec<_>>();
        let mut gadget_part = s_from.clone();
        gadget_part.scalar_mul_residues(table, &gadget_factors);
        b.add_assign(table, &gadget_part);
        (b, a)
    }).collect();
    return SwitchingKey { rows };
}

#[cfg(test)]
use rand::{SeedableRng, rngs::StdRng};

#[test]
fn test_sample_secret() {
    let mut rng = StdRng::seed_from_u64(1);
    let sparse = sample_secret(SecretDistribution::SparseTernary { hamming_weight: 10 }, 64, &mut rng);
    assert_eq!(10, sparse.iter().filter(|c| **c != 0).count());
    assert!(sparse.iter().all(|c| c.abs() <= 1));
    let dense = sample_secret(SecretDistribution::UniformTernary, 64, &mut rng);
    assert_eq!(64, dense.len());
    assert!(dense.iter().all(|c| c.abs() <= 1));
}

#[test]
fn test_rlwe_sample_is_small_under_secret() {
    let mut rng = StdRng::seed_from_u64(2);
    let chain = ModulusChain::new(&crate::chain::test_params(3)).unwrap();
    let sk = SecretKey::from_coefficients(sample_secret(SecretDistribution::UniformTernary, 64, &mut rng));
    let pk = gen_public_key(&chain, &sk, 3.2, &mut rng);
    let s = sk.to_poly(chain.moduli(), chain.chain_moduli(4));
    let noise = pk.b.clone().add(chain.moduli(), &pk.a.clone().mul(chain.moduli(), &s)).in_format(chain.moduli(), Format::Coefficient);
    for i in 0..4 {
        assert!(noise.centered_tower_coefficients(chain.moduli(), i).iter().all(|e| e.abs() < 30));
    }
}
