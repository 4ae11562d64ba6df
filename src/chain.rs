use std::ops::Range;

use feanor_math::algorithms::miller_rabin::is_prime;
use feanor_math::primitive_int::StaticRing;
use tracing::{debug, instrument};

use crate::error::{CkksError, Result};
use crate::keyswitch::digits::DigitDecomposition;
use crate::params::{CkksParams, MAX_MODULUS_BITS};
use crate::rns::conv::{BaseConversion, ModDownTable};
use crate::rns::RnsModulus;

const ZZ: StaticRing<i64> = StaticRing::<i64>::RING;

///
/// Returns the prime `p = 1 mod modulus` that is closest to `target`, not contained in
/// `used` and below `2^MAX_MODULUS_BITS`.
///
pub fn nearest_suitable_prime(target: i64, modulus: i64, used: &[i64]) -> Option<i64> {
    let base = target - (target - 1).rem_euclid(modulus);
    let acceptable = |p: i64| p > modulus && p < (1i64 << MAX_MODULUS_BITS) && !used.contains(&p) && is_prime(ZZ, &p, 10);
    for k in 0..(1 << 24) {
        let below = base - k * modulus;
        let above = base + (k + 1) * modulus;
        if (target - below) <= (above - target) {
            if acceptable(below) { return Some(below); }
            if acceptable(above) { return Some(above); }
        } else {
            if acceptable(above) { return Some(above); }
            if acceptable(below) { return Some(below); }
        }
    }
    return None;
}

///
/// Chooses `count` distinct primes `p = 1 mod modulus` whose product is close to `target`.
/// The chosen primes are appended to `used`.
///
fn primes_with_product(target: f64, count: usize, modulus: i64, used: &mut Vec<i64>) -> Option<Vec<i64>> {
    let mut result = Vec::with_capacity(count);
    let mut remaining = target;
    for j in 0..count {
        let p = nearest_suitable_prime(remaining.powf(1. / (count - j) as f64).round() as i64, modulus, used)?;
        used.push(p);
        result.push(p);
        remaining /= p as f64;
    }
    return Some(result);
}

///
/// The number of chain towers and the number of towers per level, which together
/// determine the level of a ciphertext from its tower count.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainShape {
    pub total_towers: usize,
    pub composite_degree: usize
}

impl ChainShape {

    pub fn total_levels(&self) -> usize {
        self.total_towers / self.composite_degree - 1
    }

    pub fn level_of_towers(&self, towers: usize) -> usize {
        assert!(towers <= self.total_towers);
        (self.total_towers - towers) / self.composite_degree
    }

    pub fn towers_at_level(&self, level: usize) -> usize {
        assert!(level <= self.total_levels());
        self.total_towers - level * self.composite_degree
    }

    ///
    /// Whether the tower count is the one of some level, i.e. whether a ciphertext with
    /// so many towers can be rescaled.
    ///
    pub fn is_level_aligned(&self, towers: usize) -> bool {
        towers <= self.total_towers && (self.total_towers - towers) % self.composite_degree == 0
    }
}

///
/// The modulus chain `Q_0, Q_1, ..., Q_L` of ciphertexts, together with the special primes
/// `p_0, ..., p_(K - 1)` used during key switching.
///
/// Each level modulus `Q_j` is the product of `d = composite_degree()` primes, which are
/// stored as consecutive towers. The modulus table returned by [`ModulusChain::moduli()`]
/// contains the chain primes at indices `0..total_towers()` and the special primes at indices
/// `total_towers()..`. A ciphertext with `t` towers lives modulo the product of the first `t`
/// primes, and is at level `(total_towers() - t) / d`. Rescaling removes the top `d` towers.
///
/// The chain also stores the canonical scaling factor of each level, which is
/// ```text
///   Delta_0 = Q_L,    Delta_(l + 1) = Delta_l^2 / Q_(L - l)
/// ```
/// so that multiplying two ciphertexts at level `l` and rescaling yields exactly the
/// scaling factor of level `l + 1`. The scaling primes are chosen such that all these
/// values remain close to `2^scaling_mod_bits`.
///
pub struct ModulusChain {
    ring_dimension: usize,
    moduli: Vec<RnsModulus>,
    shape: ChainShape,
    scaling_factors: Vec<f64>,
    digits: DigitDecomposition,
    evaluation_exponents: Vec<usize>,
    /// indexed by `[towers - 1][digit]`
    mod_up_tables: Vec<Vec<Option<BaseConversion>>>,
    /// indexed by `[towers - 1]`
    mod_down_tables: Vec<ModDownTable>,
    /// indexed by the level of the ciphertext before rescaling
    rescale_tables: Vec<ModDownTable>
}

impl ModulusChain {

    #[instrument(skip_all)]
    pub fn new(params: &CkksParams) -> Result<Self> {
        params.validate()?;
        let N = params.ring_dimension;
        let order = 2 * N as i64;
        let L = params.multiplicative_depth;
        let d = params.composite_degree;
        let no_prime = |bits: usize| CkksError::InvalidParameters(format!("not enough primes with {} bits that are 1 mod {}", bits, order));

        let mut used = Vec::new();
        let first_primes = primes_with_product(2f64.powi(params.first_mod_bits as i32), d, order, &mut used).ok_or_else(|| no_prime(params.first_mod_bits / d))?;

        // scaling moduli are chosen from top to bottom, each close to Delta_l^2 / 2^bits
        let target_scale = 2f64.powi(params.scaling_mod_bits as i32);
        let mut scaling_moduli_desc = Vec::with_capacity(L);
        let mut current_scale = 0.;
        for l in 0..L {
            let target = if l == 0 { target_scale } else { current_scale * current_scale / target_scale };
            let primes = primes_with_product(target, d, order, &mut used).ok_or_else(|| no_prime(params.scaling_mod_bits / d))?;
            let Q = primes.iter().map(|q| *q as f64).product::<f64>();
            scaling_moduli_desc.push(primes);
            current_scale = if l == 0 { Q } else { current_scale * current_scale / Q };
        }
        let mut chain_primes = first_primes;
        for primes in scaling_moduli_desc.iter().rev() {
            chain_primes.extend(primes.iter().copied());
        }
        let total_towers = chain_primes.len();
        let shape = ChainShape { total_towers, composite_degree: d };
        let level_modulus = |j: usize| chain_primes[(j * d)..((j + 1) * d)].iter().map(|q| *q as f64).product::<f64>();

        let digits = DigitDecomposition::select_digits(params.num_digits, total_towers);
        let max_digit_log2 = digits.iter().map(|digit| chain_primes[digit].iter().map(|q| (*q as f64).log2()).sum::<f64>()).fold(0., f64::max);
        let mut special_primes = Vec::new();
        let mut special_log2 = 0.;
        while special_log2 <= max_digit_log2 + 1. {
            let p = nearest_suitable_prime((1i64 << params.special_mod_bits) - 1, order, &used).ok_or_else(|| no_prime(params.special_mod_bits))?;
            used.push(p);
            special_primes.push(p);
            special_log2 += (p as f64).log2();
        }

        let log2_N = params.log2_ring_dimension();
        let moduli = chain_primes.iter().chain(special_primes.iter()).map(|p| RnsModulus::new(*p, log2_N)).collect::<Result<Vec<_>>>()?;

        let evaluation_exponents = moduli[0].ntt().evaluation_exponents()?;
        for modulus in &moduli[1..] {
            if modulus.ntt().evaluation_exponents()? != evaluation_exponents {
                return Err(CkksError::InvalidParameters(format!("NTT modulo {} uses a different evaluation order", modulus.modulus())));
            }
        }

        let mut scaling_factors = Vec::with_capacity(L + 1);
        scaling_factors.push(level_modulus(L));
        for l in 0..L {
            let last = scaling_factors[l];
            scaling_factors.push(last * last / level_modulus(L - l));
        }

        let special_indices = (total_towers..(total_towers + special_primes.len())).collect::<Vec<_>>();
        let mut mod_up_tables = Vec::with_capacity(total_towers);
        let mut mod_down_tables = Vec::with_capacity(total_towers);
        for towers in 1..=total_towers {
            let mut tables_for_level = Vec::with_capacity(digits.len());
            for digit in digits.restrict_to(towers) {
                if digit.is_empty() {
                    tables_for_level.push(None);
                } else {
                    let to = (0..towers).filter(|i| !digit.contains(i)).chain(special_indices.iter().copied()).collect::<Vec<_>>();
                    tables_for_level.push(Some(BaseConversion::new(&moduli, digit.collect(), to)?));
                }
            }
            mod_up_tables.push(tables_for_level);
            mod_down_tables.push(ModDownTable::new(&moduli, (0..towers).collect(), special_indices.clone())?);
        }
        let rescale_tables = (0..L).map(|level| {
            let kept = shape.towers_at_level(level + 1);
            ModDownTable::new(&moduli, (0..kept).collect(), (kept..(kept + d)).collect())
        }).collect::<Result<Vec<_>>>()?;

        debug!(
            ring_dimension = N,
            total_towers = total_towers,
            composite_degree = d,
            special_primes = special_primes.len(),
            digits = digits.len(),
            log2_q = chain_primes.iter().map(|q| (*q as f64).log2()).sum::<f64>(),
            "created modulus chain"
        );

        return Ok(Self {
            ring_dimension: N,
            moduli,
            shape,
            scaling_factors,
            digits,
            evaluation_exponents,
            mod_up_tables,
            mod_down_tables,
            rescale_tables
        });
    }

    pub fn moduli(&self) -> &[RnsModulus] {
        &self.moduli
    }

    pub fn modulus(&self, i: usize) -> i64 {
        self.moduli[i].modulus()
    }

    pub fn ring_dimension(&self) -> usize {
        self.ring_dimension
    }

    pub fn cyclotomic_order(&self) -> usize {
        2 * self.ring_dimension
    }

    pub fn shape(&self) -> ChainShape {
        self.shape
    }

    pub fn total_towers(&self) -> usize {
        self.shape.total_towers
    }

    /// the number of primes per level
    pub fn composite_degree(&self) -> usize {
        self.shape.composite_degree
    }

    pub fn total_levels(&self) -> usize {
        self.shape.total_levels()
    }

    pub fn special_prime_count(&self) -> usize {
        self.moduli.len() - self.total_towers()
    }

    pub fn level_of_towers(&self, towers: usize) -> usize {
        self.shape.level_of_towers(towers)
    }

    pub fn towers_at_level(&self, level: usize) -> usize {
        self.shape.towers_at_level(level)
    }

    ///
    /// The canonical scaling factor of ciphertexts at the given level.
    ///
    pub fn scaling_factor(&self, level: usize) -> f64 {
        self.scaling_factors[level]
    }

    ///
    /// The product of the top `composite_degree()` primes among the first `towers` towers,
    /// i.e. the modulus by which rescaling a ciphertext with `towers` towers divides.
    ///
    pub fn rescale_modulus(&self, towers: usize) -> f64 {
        let d = self.composite_degree();
        assert!(towers >= d);
        ((towers - d)..towers).map(|i| self.modulus(i) as f64).product()
    }

    ///
    /// The level modulus `Q_0`, i.e. the modulus of ciphertexts at the last level.
    ///
    pub fn first_modulus(&self) -> f64 {
        self.rescale_modulus(self.composite_degree())
    }

    pub fn chain_moduli(&self, towers: usize) -> Vec<usize> {
        (0..towers).collect()
    }

    pub fn special_moduli(&self) -> Range<usize> {
        self.total_towers()..self.moduli.len()
    }

    ///
    /// The towers `0..towers` together with all special primes, i.e. the basis in which
    /// key switching takes place.
    ///
    pub fn extended_moduli(&self, towers: usize) -> Vec<usize> {
        (0..towers).chain(self.special_moduli()).collect()
    }

    pub fn digits(&self) -> &DigitDecomposition {
        &self.digits
    }

    pub fn evaluation_exponents(&self) -> &[usize] {
        &self.evaluation_exponents
    }

    pub fn mod_up_table(&self, towers: usize, digit: usize) -> Option<&BaseConversion> {
        self.mod_up_tables[towers - 1][digit].as_ref()
    }

    pub fn mod_down_table(&self, towers: usize) -> &ModDownTable {
        &self.mod_down_tables[towers - 1]
    }

    ///
    /// The table that removes the top level of a ciphertext with `towers` towers.
    ///
    pub fn rescale_table(&self, towers: usize) -> &ModDownTable {
        assert!(towers >= 2 * self.composite_degree() && self.shape.is_level_aligned(towers));
        &self.rescale_tables[self.level_of_towers(towers)]
    }

    ///
    /// Returns `P mod q_i` where `P` is the product of all special primes.
    ///
    pub fn special_product_mod(&self, i: usize) -> i128 {
        let q = self.modulus(i) as i128;
        self.special_moduli().fold(1i128, |acc, j| acc * (self.modulus(j) as i128 % q) % q)
    }
}

#[cfg(test)]
pub fn test_params(depth: usize) -> CkksParams {
    CkksParams {
        ring_dimension: 64,
        multiplicative_depth: depth,
        first_mod_bits: 57,
        scaling_mod_bits: 50,
        composite_degree: 1,
        special_mod_bits: 57,
        num_digits: 3,
        secret_distribution: crate::params::SecretDistribution::SparseTernary { hamming_weight: 32 },
        error_std_dev: 3.2
    }
}

#[test]
fn test_modulus_chain() {
    let chain = ModulusChain::new(&test_params(6)).unwrap();
    assert_eq!(7, chain.total_towers());
    assert_eq!(6, chain.total_levels());
    assert!(chain.special_prime_count() >= 2);
    for i in 0..chain.moduli().len() {
        assert_eq!(1, chain.modulus(i) % 128);
        for j in 0..i {
            assert_ne!(chain.modulus(i), chain.modulus(j));
        }
    }
    assert!(chain.modulus(0) > (1 << 56));
    for l in 0..=chain.total_levels() {
        let log2_scale = chain.scaling_factor(l).log2();
        assert!((log2_scale - 50.).abs() < 0.01);
    }
    assert_eq!(chain.scaling_factor(0), chain.modulus(6) as f64);
    assert_eq!(chain.scaling_factor(0), chain.rescale_modulus(7));
    assert_eq!(chain.modulus(0) as f64, chain.first_modulus());
    assert_eq!(3, chain.level_of_towers(4));
    assert_eq!(vec![0, 1, 7, 8], chain.extended_moduli(2)[..4].to_vec());

    let special_log2 = chain.special_moduli().map(|i| (chain.modulus(i) as f64).log2()).sum::<f64>();
    for digit in chain.digits().iter() {
        let digit_log2 = digit.map(|i| (chain.modulus(i) as f64).log2()).sum::<f64>();
        assert!(special_log2 > digit_log2);
    }
}

#[cfg(test)]
pub fn test_composite_params(depth: usize) -> CkksParams {
    CkksParams {
        first_mod_bits: 88,
        scaling_mod_bits: 80,
        composite_degree: 2,
        ..test_params(depth)
    }
}

#[test]
fn test_composite_modulus_chain() {
    let chain = ModulusChain::new(&test_composite_params(4)).unwrap();
    assert_eq!(10, chain.total_towers());
    assert_eq!(4, chain.total_levels());
    assert_eq!(2, chain.composite_degree());
    for i in 0..chain.total_towers() {
        assert_eq!(1, chain.modulus(i) % 128);
        let log2_q = (chain.modulus(i) as f64).log2();
        assert!(log2_q > 39. && log2_q < 45.);
    }
    assert!((chain.first_modulus().log2() - 88.).abs() < 0.01);
    for l in 0..=chain.total_levels() {
        assert!((chain.scaling_factor(l).log2() - 80.).abs() < 0.01);
    }
    assert_eq!(chain.scaling_factor(0), chain.rescale_modulus(10));
    assert_eq!(chain.modulus(8) as f64 * chain.modulus(9) as f64, chain.rescale_modulus(10));
    assert_eq!(2, chain.level_of_towers(6));
    assert_eq!(4, chain.towers_at_level(3));
    assert!(!chain.shape().is_level_aligned(5));
    assert_eq!(&[0, 1, 2, 3], chain.rescale_table(6).kept_moduli());
    assert_eq!(&[4, 5], chain.rescale_table(6).removed_moduli());
}

#[test]
fn test_nearest_suitable_prime() {
    let p = nearest_suitable_prime(1 << 30, 128, &[]).unwrap();
    assert_eq!(1, p % 128);
    assert!((p - (1 << 30)).abs() < (1 << 20));
    let q = nearest_suitable_prime(1 << 30, 128, &[p]).unwrap();
    assert_ne!(p, q);
    assert!(is_prime(ZZ, &q, 10));
}
