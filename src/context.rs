use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use feanor_math::integer::*;
use feanor_math::ring::*;
use feanor_math::rings::zn::zn_rns;
use feanor_math::rings::zn::ZnRingStore;
use num_complex::Complex64;
use rand::{CryptoRng, Rng};
use tracing::{info, instrument};

use crate::automorphism::{apply_automorphism, conjugation_index, find_automorphism_index, precompute_auto_map};
use crate::bootstrap::BootstrapPrecomputation;
use crate::chain::ModulusChain;
use crate::ciphertext::{Ciphertext, Plaintext};
use crate::encoding::{decode_coefficients, encode_coefficients};
use crate::error::{CkksError, Result};
use crate::keys::*;
use crate::keyswitch::*;
use crate::level;
use crate::params::{CkksParams, SecretDistribution};
use crate::rns::{Format, RnsPoly};

const ZZbig: BigIntRing = BigIntRing::RING;

pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

///
/// The central object for working with CKKS ciphertexts.
///
/// It owns the modulus chain, the evaluation keys (relinearization and automorphism keys)
/// and the bootstrapping precomputations. Key and precomputation stores are guarded by
/// [`RwLock`]s, so a context can be shared between threads; generating keys or running
/// bootstrapping setup only blocks concurrent readers of the same store.
///
/// # Example
/// ```
/// # use ckks_boot::context::CkksContext;
/// # use ckks_boot::params::*;
/// # use num_complex::Complex64;
/// # use rand::{SeedableRng, rngs::StdRng};
/// let params = CkksParams {
///     ring_dimension: 64,
///     multiplicative_depth: 3,
///     num_digits: 2,
///     secret_distribution: SecretDistribution::SparseTernary { hamming_weight: 32 },
///     ..CkksParams::default()
/// };
/// let ctx = CkksContext::new(params).unwrap();
/// let mut rng = StdRng::seed_from_u64(0);
/// let keys = ctx.key_gen(&mut rng);
/// ctx.eval_mult_key_gen(&keys.secret_key, &mut rng);
///
/// let x = [Complex64::new(0.5, 0.), Complex64::new(-0.25, 0.)];
/// let ct = ctx.encrypt_values(&keys.public_key, &x, 2, &mut rng).unwrap();
/// let sqr = ctx.eval_mult(&ct, &ct).unwrap();
/// let result = ctx.decrypt_and_decode(&keys.secret_key, &sqr);
/// assert!((result[0].re - 0.25).abs() < 1e-6);
/// assert!((result[1].re - 0.0625).abs() < 1e-6);
/// assert_eq!(1, sqr.level());
/// ```
///
pub struct CkksContext {
    params: CkksParams,
    chain: ModulusChain,
    relinearization_key: RwLock<Option<Arc<SwitchingKey>>>,
    automorphism_keys: RwLock<HashMap<usize, Arc<SwitchingKey>>>,
    auto_maps: RwLock<HashMap<usize, Arc<Vec<usize>>>>,
    pub(crate) bootstrap_precomputations: RwLock<HashMap<usize, Arc<BootstrapPrecomputation>>>
}

impl CkksContext {

    #[instrument(skip_all)]
    pub fn new(params: CkksParams) -> Result<Self> {
        params.validate()?;
        let chain = ModulusChain::new(&params)?;
        info!(ring_dimension = params.ring_dimension, depth = params.multiplicative_depth, "created CKKS context");
        return Ok(Self {
            params,
            chain,
            relinearization_key: RwLock::new(None),
            automorphism_keys: RwLock::new(HashMap::new()),
            auto_maps: RwLock::new(HashMap::new()),
            bootstrap_precomputations: RwLock::new(HashMap::new())
        });
    }

    pub fn params(&self) -> &CkksParams {
        &self.params
    }

    pub fn chain(&self) -> &ModulusChain {
        &self.chain
    }

    pub fn ring_dimension(&self) -> usize {
        self.chain.ring_dimension()
    }

    pub fn max_slots(&self) -> usize {
        self.ring_dimension() / 2
    }

    pub fn cyclotomic_order(&self) -> usize {
        self.chain.cyclotomic_order()
    }

    ///
    /// Returns the secret key as element of `Z[X]/(X^N + 1, QP)`, i.e. w.r.t. all chain
    /// and special towers.
    ///
    fn secret_key_ext(&self, sk: &SecretKey) -> RnsPoly {
        sk.to_poly(self.chain.moduli(), self.chain.extended_moduli(self.chain.total_towers()))
    }

    #[instrument(skip_all)]
    pub fn key_gen<R: Rng + CryptoRng>(&self, mut rng: R) -> KeyPair {
        let secret_key = SecretKey::from_coefficients(sample_secret(self.params.secret_distribution, self.ring_dimension(), &mut rng));
        let public_key = gen_public_key(&self.chain, &secret_key, self.params.error_std_dev, &mut rng);
        return KeyPair { public_key, secret_key };
    }

    ///
    /// Generates a switching key from `from` to `to`, as used by [`CkksContext::key_switch_ext()`].
    ///
    pub fn key_switch_gen<R: Rng + CryptoRng>(&self, from: &SecretKey, to: &SecretKey, rng: R) -> SwitchingKey {
        gen_switching_key(&self.chain, &self.secret_key_ext(from), &self.secret_key_ext(to), self.params.error_std_dev, rng)
    }

    #[instrument(skip_all)]
    pub fn eval_mult_key_gen<R: Rng + CryptoRng>(&self, sk: &SecretKey, rng: R) {
        let table = self.chain.moduli();
        let s = self.secret_key_ext(sk);
        let s_sqr = s.clone().mul(table, &s);
        let key = gen_switching_key(&self.chain, &s_sqr, &s, self.params.error_std_dev, rng);
        *write_lock(&self.relinearization_key) = Some(Arc::new(key));
    }

    ///
    /// Generates the switching key for the automorphism `X -> X^k`, unless it already exists.
    ///
    #[instrument(skip_all)]
    pub fn automorphism_key_gen<R: Rng + CryptoRng>(&self, sk: &SecretKey, k: usize, rng: R) -> Result<()> {
        if k == 1 || read_lock(&self.automorphism_keys).contains_key(&k) {
            return Ok(());
        }
        let map = self.auto_map(k)?;
        let s = self.secret_key_ext(sk);
        let s_rotated = apply_automorphism(self.chain.moduli(), &s, k, &map);
        let key = gen_switching_key(&self.chain, &s_rotated, &s, self.params.error_std_dev, rng);
        write_lock(&self.automorphism_keys).insert(k, Arc::new(key));
        return Ok(());
    }

    pub fn eval_rotate_key_gen<R: Rng + CryptoRng>(&self, sk: &SecretKey, rotations: &[i64], mut rng: R) -> Result<()> {
        for r in rotations {
            self.automorphism_key_gen(sk, find_automorphism_index(*r, self.cyclotomic_order()), &mut rng)?;
        }
        return Ok(());
    }

    pub fn eval_conjugate_key_gen<R: Rng + CryptoRng>(&self, sk: &SecretKey, rng: R) -> Result<()> {
        self.automorphism_key_gen(sk, conjugation_index(self.cyclotomic_order()), rng)
    }

    pub(crate) fn relinearization_key(&self) -> Result<Arc<SwitchingKey>> {
        read_lock(&self.relinearization_key).clone().ok_or(CkksError::MissingRelinearizationKey)
    }

    pub(crate) fn automorphism_keys(&self) -> Vec<(usize, Arc<SwitchingKey>)> {
        let mut result = read_lock(&self.automorphism_keys).iter().map(|(k, key)| (*k, key.clone())).collect::<Vec<_>>();
        result.sort_by_key(|(k, _)| *k);
        return result;
    }

    pub(crate) fn insert_keys(&self, relinearization_key: Option<SwitchingKey>, automorphism_keys: Vec<(usize, SwitchingKey)>) {
        if let Some(key) = relinearization_key {
            *write_lock(&self.relinearization_key) = Some(Arc::new(key));
        }
        let mut store = write_lock(&self.automorphism_keys);
        for (k, key) in automorphism_keys {
            store.insert(k, Arc::new(key));
        }
    }

    pub fn has_automorphism_key(&self, k: usize) -> bool {
        k == 1 || read_lock(&self.automorphism_keys).contains_key(&k)
    }

    fn automorphism_key(&self, k: usize, rotation: Option<i64>) -> Result<Arc<SwitchingKey>> {
        read_lock(&self.automorphism_keys).get(&k).cloned().ok_or(CkksError::MissingKey { galois_element: k, rotation })
    }

    ///
    /// Finds a key for rotating the slots of a ciphertext with `slots` slots by `rotation`.
    /// For sparsely packed ciphertexts, every automorphism that agrees on the subring works,
    /// so we also accept any key for `X -> X^k` with `k = 5^rotation mod 4 slots`.
    ///
    fn rotation_key(&self, rotation: i64, slots: usize) -> Result<(usize, Arc<SwitchingKey>)> {
        let M = self.cyclotomic_order();
        let reduced = rotation.rem_euclid(slots as i64);
        let k = find_automorphism_index(reduced, M);
        if let Ok(key) = self.automorphism_key(k, Some(rotation)) {
            return Ok((k, key));
        }
        let subring_order = 4 * slots;
        let store = read_lock(&self.automorphism_keys);
        let mut candidates = store.iter().filter(|(other, _)| *other % subring_order == k % subring_order).collect::<Vec<_>>();
        candidates.sort_by_key(|(other, _)| **other);
        return candidates.first().map(|(other, key)| (**other, (*key).clone())).ok_or(CkksError::MissingKey { galois_element: k, rotation: Some(rotation) });
    }

    pub(crate) fn auto_map(&self, k: usize) -> Result<Arc<Vec<usize>>> {
        if let Some(map) = read_lock(&self.auto_maps).get(&k) {
            return Ok(map.clone());
        }
        let map = Arc::new(precompute_auto_map(self.chain.evaluation_exponents(), k)?);
        write_lock(&self.auto_maps).insert(k, map.clone());
        return Ok(map);
    }

    ///
    /// Encodes the values into a plaintext at the given level, with the canonical scaling factor
    /// of that level.
    ///
    pub fn encode(&self, values: &[Complex64], slots: usize, level: usize) -> Result<Plaintext> {
        if level > self.chain.total_levels() {
            return Err(CkksError::InvalidParameters(format!("level {} exceeds the maximal level {}", level, self.chain.total_levels())));
        }
        self.encode_at_scale(values, slots, self.chain.towers_at_level(level), self.chain.scaling_factor(level))
    }

    pub fn encode_at_scale(&self, values: &[Complex64], slots: usize, towers: usize, scale: f64) -> Result<Plaintext> {
        let coefficients = encode_coefficients(values, slots, self.ring_dimension(), scale)?;
        let table = self.chain.moduli();
        let poly = RnsPoly::from_coefficients(table, self.chain.chain_moduli(towers), &coefficients).in_format(table, Format::Evaluation);
        return Ok(Plaintext { poly, scale, slots });
    }

    ///
    /// Computes the coefficients of the plaintext, lifted to `(-Q/2, Q/2]` and converted to
    /// floating point numbers.
    ///
    fn lifted_coefficients(&self, poly: &RnsPoly) -> Vec<f64> {
        let table = self.chain.moduli();
        let poly = poly.clone().in_format(table, Format::Coefficient);
        if poly.num_towers() == 1 {
            return poly.centered_tower_coefficients(table, 0).into_iter().map(|c| c as f64).collect();
        }
        let crt = zn_rns::Zn::new(poly.moduli().iter().map(|m| table[*m].ring().clone()).collect(), ZZbig);
        return (0..poly.ring_dimension()).map(|j| {
            let value = crt.from_congruence(poly.towers().iter().map(|tower| tower[j]));
            ZZbig.to_float_approx(&crt.smallest_lift(value))
        }).collect();
    }

    pub fn decode(&self, pt: &Plaintext) -> Vec<Complex64> {
        decode_coefficients(&self.lifted_coefficients(&pt.poly), pt.slots, pt.scale)
    }

    #[instrument(skip_all)]
    pub fn encrypt<R: Rng + CryptoRng>(&self, pk: &PublicKey, pt: &Plaintext, mut rng: R) -> Ciphertext {
        let table = self.chain.moduli();
        let moduli = pt.poly.moduli().to_vec();
        let N = self.ring_dimension();
        let u = RnsPoly::from_coefficients(table, moduli.clone(), &sample_secret(SecretDistribution::UniformTernary, N, &mut rng).into_iter().map(|c| c as i128).collect::<Vec<_>>()).in_format(table, Format::Evaluation);
        let sigma = self.params.error_std_dev;
        let e0 = RnsPoly::from_coefficients(table, moduli.clone(), &sample_error(N, sigma, &mut rng)).in_format(table, Format::Evaluation);
        let e1 = RnsPoly::from_coefficients(table, moduli.clone(), &sample_error(N, sigma, &mut rng)).in_format(table, Format::Evaluation);
        let c0 = pk.b.select_towers(&moduli).mul(table, &u).add(table, &e0).add(table, &pt.poly.clone().in_format(table, Format::Evaluation));
        let c1 = pk.a.select_towers(&moduli).mul(table, &u).add(table, &e1);
        return Ciphertext::new(c0, c1, pt.scale, 1, pt.slots, self.chain.shape());
    }

    ///
    /// Encodes and encrypts the values at level `0`.
    ///
    pub fn encrypt_values<R: Rng + CryptoRng>(&self, pk: &PublicKey, values: &[Complex64], slots: usize, rng: R) -> Result<Ciphertext> {
        self.encrypt_at_level(pk, values, slots, 0, rng)
    }

    pub fn encrypt_at_level<R: Rng + CryptoRng>(&self, pk: &PublicKey, values: &[Complex64], slots: usize, level: usize, rng: R) -> Result<Ciphertext> {
        let pt = self.encode(values, slots, level)?;
        return Ok(self.encrypt(pk, &pt, rng));
    }

    pub fn decrypt(&self, sk: &SecretKey, ct: &Ciphertext) -> Plaintext {
        let table = self.chain.moduli();
        let s = sk.to_poly(table, ct.c0.moduli().to_vec());
        let c0 = ct.c0.clone().in_format(table, Format::Evaluation);
        let c1 = ct.c1.clone().in_format(table, Format::Evaluation);
        let poly = c0.add(table, &c1.mul(table, &s));
        return Plaintext { poly, scale: ct.scale, slots: ct.slots };
    }

    pub fn decrypt_and_decode(&self, sk: &SecretKey, ct: &Ciphertext) -> Vec<Complex64> {
        self.decode(&self.decrypt(sk, ct))
    }

    pub fn eval_add(&self, lhs: &Ciphertext, rhs: &Ciphertext) -> Result<Ciphertext> {
        lhs.check_compatible(rhs)?;
        let table = self.chain.moduli();
        let rhs = rhs.clone().in_format(table, lhs.format());
        let mut result = lhs.clone();
        result.c0.add_assign(table, &rhs.c0);
        result.c1.add_assign(table, &rhs.c1);
        return Ok(result);
    }

    pub fn eval_sub(&self, lhs: &Ciphertext, rhs: &Ciphertext) -> Result<Ciphertext> {
        self.eval_add(lhs, &self.eval_negate(rhs))
    }

    pub fn eval_negate(&self, ct: &Ciphertext) -> Ciphertext {
        let table = self.chain.moduli();
        ct.clone().map_components(|mut c| { c.negate_inplace(table); c })
    }

    ///
    /// Adds the real constant `value` to every slot.
    ///
    pub fn eval_add_const(&self, ct: &Ciphertext, value: f64) -> Ciphertext {
        let mut result = ct.clone();
        result.c0.add_scalar_int(self.chain.moduli(), (value * ct.scale).round() as i128);
        return result;
    }

    ///
    /// Multiplies every slot by the integer `factor`, without consuming a level.
    ///
    pub fn eval_mult_int(&self, ct: &Ciphertext, factor: i64) -> Ciphertext {
        let table = self.chain.moduli();
        ct.clone().map_components(|mut c| { c.scalar_mul_int(table, factor as i128); c })
    }

    ///
    /// Multiplies the underlying polynomial by `X^power`. If `power = N/2`, this multiplies every
    /// slot by the imaginary unit.
    ///
    pub fn eval_mult_monomial(&self, ct: &Ciphertext, power: usize) -> Ciphertext {
        let table = self.chain.moduli();
        let N = self.ring_dimension();
        let mut coefficients = vec![0i128; N];
        coefficients[power % N] = if (power / N) % 2 == 0 { 1 } else { -1 };
        let monomial = RnsPoly::from_coefficients(table, ct.c0.moduli().to_vec(), &coefficients).in_format(table, Format::Evaluation);
        ct.clone().in_format(table, Format::Evaluation).map_components(|c| c.mul(table, &monomial))
    }

    ///
    /// Multiplies every slot by the real constant `value` and rescales, so the result lands
    /// on the canonical scaling factor of the next level.
    ///
    #[instrument(skip_all)]
    pub fn eval_mult_const(&self, ct: &Ciphertext, value: f64) -> Result<Ciphertext> {
        let ct = if ct.scale_degree > 1 { self.rescale(ct)? } else { ct.clone() };
        let towers = ct.num_towers();
        if towers < 2 * self.chain.composite_degree() {
            return Err(CkksError::CapacityExhausted { towers, required: 1 });
        }
        let target_scale = self.chain.scaling_factor(ct.level() + 1);
        let plaintext_scale = target_scale * self.chain.rescale_modulus(towers) / ct.scale;
        let factor = (value * plaintext_scale).round();
        if !factor.is_finite() || factor.abs() >= 2f64.powi(120) {
            return Err(CkksError::InvalidParameters(format!("constant {} is too large", value)));
        }
        let mut product = self.eval_mult_int_i128(&ct, factor as i128);
        product.scale = ct.scale * plaintext_scale;
        product.scale_degree = 2;
        return self.rescale(&product);
    }

    fn eval_mult_int_i128(&self, ct: &Ciphertext, factor: i128) -> Ciphertext {
        let table = self.chain.moduli();
        ct.clone().map_components(|mut c| { c.scalar_mul_int(table, factor); c })
    }

    ///
    /// Multiplies two ciphertexts and relinearizes, but does not rescale. The result has
    /// scaling factor degree `2`.
    ///
    #[instrument(skip_all)]
    pub fn eval_mult_no_rescale(&self, lhs: &Ciphertext, rhs: &Ciphertext) -> Result<Ciphertext> {
        if lhs.slots != rhs.slots {
            return Err(CkksError::Mismatch(format!("ciphertexts with {} and {} slots", lhs.slots, rhs.slots)));
        }
        let lhs = if lhs.scale_degree > 1 { self.rescale(lhs)? } else { lhs.clone() };
        let rhs = if rhs.scale_degree > 1 { self.rescale(rhs)? } else { rhs.clone() };
        let (lhs, rhs) = if lhs.num_towers() != rhs.num_towers() { self.adjust_levels(&lhs, &rhs)? } else { (lhs, rhs) };
        let key = self.relinearization_key()?;

        let table = self.chain.moduli();
        let lhs = lhs.in_format(table, Format::Evaluation);
        let rhs = rhs.in_format(table, Format::Evaluation);
        let d0 = lhs.c0.clone().mul(table, &rhs.c0);
        let d1 = lhs.c0.clone().mul(table, &rhs.c1).add(table, &lhs.c1.clone().mul(table, &rhs.c0));
        let d2 = lhs.c1.clone().mul(table, &rhs.c1);
        let (c0, c1) = relinearize(&self.chain, d0, d1, &d2, &key);
        return Ok(Ciphertext::new(c0, c1, lhs.scale * rhs.scale, 2, lhs.slots, lhs.shape));
    }

    pub fn eval_mult(&self, lhs: &Ciphertext, rhs: &Ciphertext) -> Result<Ciphertext> {
        self.rescale(&self.eval_mult_no_rescale(lhs, rhs)?)
    }

    pub fn eval_square(&self, ct: &Ciphertext) -> Result<Ciphertext> {
        self.eval_mult(ct, ct)
    }

    pub fn rescale(&self, ct: &Ciphertext) -> Result<Ciphertext> {
        level::rescale(&self.chain, ct)
    }

    pub fn adjust_levels(&self, lhs: &Ciphertext, rhs: &Ciphertext) -> Result<(Ciphertext, Ciphertext)> {
        level::adjust_levels(&self.chain, lhs, rhs)
    }

    ///
    /// Brings the ciphertext to the given level and scaling factor, consuming at most one level
    /// more than the difference of the levels.
    ///
    pub fn adjust_to_level(&self, ct: &Ciphertext, level: usize, scale: f64) -> Result<Ciphertext> {
        if level > self.chain.total_levels() {
            return Err(CkksError::InvalidParameters(format!("level {} exceeds the maximal level {}", level, self.chain.total_levels())));
        }
        level::adjust_to_towers(&self.chain, ct, self.chain.towers_at_level(level), scale)
    }

    pub fn drop_to_level(&self, ct: &Ciphertext, level: usize) -> Result<Ciphertext> {
        if level > self.chain.total_levels() {
            return Err(CkksError::InvalidParameters(format!("level {} exceeds the maximal level {}", level, self.chain.total_levels())));
        }
        level::drop_to_towers(ct, self.chain.towers_at_level(level))
    }

    pub fn key_switch_ext(&self, ct: &Ciphertext, key: &SwitchingKey, include_first: bool) -> ExtendedCiphertext {
        key_switch_ext(&self.chain, ct, key, include_first)
    }

    pub fn key_switch_down(&self, ct: &ExtendedCiphertext) -> Ciphertext {
        key_switch_down(&self.chain, ct)
    }

    pub fn key_switch(&self, ct: &Ciphertext, key: &SwitchingKey) -> Ciphertext {
        self.key_switch_down(&self.key_switch_ext(ct, key, true))
    }

    pub fn eval_fast_rotation_precompute(&self, ct: &Ciphertext) -> ExtendedDigits {
        fast_rotation_precompute(&self.chain, ct)
    }

    ///
    /// Rotates the slots by `rotation` to the left, using the digits computed by
    /// [`CkksContext::eval_fast_rotation_precompute()`]. The result must be brought back to
    /// the chain towers using [`CkksContext::key_switch_down()`].
    ///
    pub fn eval_fast_rotation_ext(&self, ct: &Ciphertext, rotation: i64, digits: &ExtendedDigits, include_first: bool) -> Result<ExtendedCiphertext> {
        let (k, key) = self.rotation_key(rotation, ct.slots)?;
        let map = self.auto_map(k)?;
        return Ok(fast_rotation_ext(&self.chain, ct, digits, k, &map, &key, include_first));
    }

    ///
    /// Applies the automorphism `X -> X^k` to the encrypted message.
    ///
    #[instrument(skip_all)]
    pub fn eval_automorphism(&self, ct: &Ciphertext, k: usize) -> Result<Ciphertext> {
        if k == 1 {
            return Ok(ct.clone());
        }
        let key = self.automorphism_key(k, None)?;
        return self.eval_automorphism_with_key(ct, k, &key);
    }

    fn eval_automorphism_with_key(&self, ct: &Ciphertext, k: usize, key: &SwitchingKey) -> Result<Ciphertext> {
        let map = self.auto_map(k)?;
        let ct = ct.clone().in_format(self.chain.moduli(), Format::Evaluation);
        let digits = fast_rotation_precompute(&self.chain, &ct);
        return Ok(key_switch_down(&self.chain, &fast_rotation_ext(&self.chain, &ct, &digits, k, &map, key, true)));
    }

    ///
    /// Rotates the slots by `rotation` positions to the left (modulo the slot count).
    ///
    pub fn eval_at_index(&self, ct: &Ciphertext, rotation: i64) -> Result<Ciphertext> {
        if rotation.rem_euclid(ct.slots as i64) == 0 {
            return Ok(ct.clone());
        }
        let (k, key) = self.rotation_key(rotation, ct.slots)?;
        return self.eval_automorphism_with_key(ct, k, &key);
    }

    pub fn eval_conjugate(&self, ct: &Ciphertext) -> Result<Ciphertext> {
        self.eval_automorphism(ct, conjugation_index(self.cyclotomic_order()))
    }
}

#[cfg(test)]
use rand::{SeedableRng, rngs::StdRng};

#[cfg(test)]
pub fn test_context(depth: usize) -> CkksContext {
    CkksContext::new(crate::chain::test_params(depth)).unwrap()
}

#[cfg(test)]
pub fn test_values(n: usize, seed: u64) -> Vec<Complex64> {
    let mut rng = oorandom::Rand64::new(seed as u128);
    (0..n).map(|_| Complex64::new(rng.rand_float() - 0.5, rng.rand_float() - 0.5)).collect()
}

///
/// The repeating pattern `0.111111, 0.222222, ..., 0.888888`, or a constant if there are
/// fewer than `8` slots.
///
#[cfg(test)]
pub fn pattern_values(n: usize) -> Vec<Complex64> {
    if n < 8 {
        return vec![Complex64::new(0.1415926, 0.); n];
    }
    (0..n).map(|i| Complex64::new(0.111111 * ((i % 8) + 1) as f64, 0.)).collect()
}

#[cfg(test)]
pub fn assert_close(expected: &[Complex64], actual: &[Complex64], tolerance: f64) {
    assert_eq!(expected.len(), actual.len());
    for i in 0..expected.len() {
        assert!((expected[i] - actual[i]).norm() < tolerance, "slot {}: expected {}, got {}", i, expected[i], actual[i]);
    }
}

#[test]
fn test_encrypt_decrypt() {
    let ctx = test_context(4);
    let mut rng = StdRng::seed_from_u64(1);
    let keys = ctx.key_gen(&mut rng);
    for slots in [1, 4, 32] {
        let values = test_values(slots, 2);
        let ct = ctx.encrypt_values(&keys.public_key, &values, slots, &mut rng).unwrap();
        assert_eq!(0, ct.level());
        assert_eq!(5, ct.num_towers());
        assert_close(&values, &ctx.decrypt_and_decode(&keys.secret_key, &ct), 1e-9);
    }
    let values = test_values(8, 3);
    let ct = ctx.encrypt_at_level(&keys.public_key, &values, 8, 3, &mut rng).unwrap();
    assert_eq!(3, ct.level());
    assert_eq!(2, ct.num_towers());
    assert_close(&values, &ctx.decrypt_and_decode(&keys.secret_key, &ct), 1e-9);
}

#[test]
fn test_level_invariant() {
    let ctx = test_context(4);
    let mut rng = StdRng::seed_from_u64(2);
    let keys = ctx.key_gen(&mut rng);
    ctx.eval_mult_key_gen(&keys.secret_key, &mut rng);
    let values = test_values(32, 4);
    let mut ct = ctx.encrypt_values(&keys.public_key, &values, 32, &mut rng).unwrap();
    let mut expected = values.clone();
    for _ in 0..3 {
        ct = ctx.eval_mult(&ct, &ct).unwrap();
        expected = expected.iter().map(|x| x * x).collect();
        assert_eq!(ctx.chain().total_towers(), ct.level() + ct.num_towers());
        assert_eq!(ctx.chain().scaling_factor(ct.level()), ct.scale());
    }
    assert_close(&expected, &ctx.decrypt_and_decode(&keys.secret_key, &ct), 1e-6);
}

#[test]
fn test_rescale_monotonicity_and_failure() {
    let ctx = test_context(3);
    let mut rng = StdRng::seed_from_u64(3);
    let keys = ctx.key_gen(&mut rng);
    let values = test_values(4, 5);
    let pt = ctx.encode_at_scale(&values, 4, 4, 2f64.powi(100)).unwrap();
    let mut ct = ctx.encrypt(&keys.public_key, &pt, &mut rng);
    for towers in (1..4).rev() {
        ct = ctx.rescale(&ct).unwrap();
        assert_eq!(towers, ct.num_towers());
    }
    assert!(matches!(ctx.rescale(&ct), Err(CkksError::CapacityExhausted { towers: 1, .. })));
}

#[test]
fn test_adjust_levels() {
    let ctx = test_context(4);
    let mut rng = StdRng::seed_from_u64(4);
    let keys = ctx.key_gen(&mut rng);
    ctx.eval_mult_key_gen(&keys.secret_key, &mut rng);
    let x = test_values(16, 6);
    let y = test_values(16, 7);
    let ct_x = ctx.encrypt_values(&keys.public_key, &x, 16, &mut rng).unwrap();
    let ct_y = ctx.encrypt_values(&keys.public_key, &y, 16, &mut rng).unwrap();
    let ct_y_sqr = ctx.eval_mult(&ct_y, &ct_y).unwrap();
    let ct_y_sqr = ctx.eval_mult(&ct_y_sqr, &ct_y_sqr).unwrap();
    assert!(matches!(ctx.eval_add(&ct_x, &ct_y_sqr), Err(CkksError::Mismatch(_))));
    assert!(matches!(ctx.eval_sub(&ct_x, &ct_y_sqr), Err(CkksError::Mismatch(_))));

    let (adjusted_x, adjusted_y) = ctx.adjust_levels(&ct_x, &ct_y_sqr).unwrap();
    assert_eq!(2, adjusted_x.level());
    assert_eq!(2, adjusted_y.level());
    let sum = ctx.eval_add(&adjusted_x, &adjusted_y).unwrap();
    let expected = x.iter().zip(y.iter()).map(|(a, b)| a + b * b * b * b).collect::<Vec<_>>();
    assert_close(&expected, &ctx.decrypt_and_decode(&keys.secret_key, &sum), 1e-6);

    let dropped = ctx.drop_to_level(&ct_x, 4).unwrap();
    assert_eq!(1, dropped.num_towers());
    assert!(matches!(ctx.adjust_to_level(&dropped, 4, ctx.chain().scaling_factor(2) * 3.), Err(CkksError::CapacityExhausted { .. })));
}

#[test]
fn test_mult_const_and_add_const() {
    let ctx = test_context(3);
    let mut rng = StdRng::seed_from_u64(5);
    let keys = ctx.key_gen(&mut rng);
    let x = test_values(32, 8);
    let ct = ctx.encrypt_values(&keys.public_key, &x, 32, &mut rng).unwrap();
    let result = ctx.eval_add_const(&ctx.eval_mult_const(&ct, -1.5).unwrap(), 0.25);
    assert_eq!(1, result.level());
    assert_eq!(ctx.chain().scaling_factor(1), result.scale());
    let expected = x.iter().map(|a| a * -1.5 + 0.25).collect::<Vec<_>>();
    assert_close(&expected, &ctx.decrypt_and_decode(&keys.secret_key, &result), 1e-7);

    let doubled = ctx.eval_mult_int(&result, 2);
    let times_i = ctx.eval_mult_monomial(&doubled, ctx.ring_dimension() / 2);
    let expected = expected.iter().map(|a| a * Complex64::new(0., 2.)).collect::<Vec<_>>();
    assert_close(&expected, &ctx.decrypt_and_decode(&keys.secret_key, &times_i), 1e-7);
}

#[test]
fn test_key_switch_round_trip() {
    let ctx = test_context(4);
    let mut rng = StdRng::seed_from_u64(6);
    let keys_from = ctx.key_gen(&mut rng);
    let keys_to = ctx.key_gen(&mut rng);
    let key = ctx.key_switch_gen(&keys_from.secret_key, &keys_to.secret_key, &mut rng);
    let x = test_values(32, 9);
    for level in [0, 2, 4] {
        let ct = ctx.encrypt_at_level(&keys_from.public_key, &x, 32, level, &mut rng).unwrap();
        let switched = ctx.key_switch_down(&ctx.key_switch_ext(&ct, &key, true));
        assert_eq!(ct.num_towers(), switched.num_towers());
        assert_close(&x, &ctx.decrypt_and_decode(&keys_to.secret_key, &switched), 1e-6);

        let partial = ctx.key_switch_down(&ctx.key_switch_ext(&ct, &key, false));
        let completed = Ciphertext::new(partial.c0.clone().add(ctx.chain().moduli(), &ct.c0), partial.c1.clone(), ct.scale, 1, ct.slots, ct.shape);
        assert_close(&x, &ctx.decrypt_and_decode(&keys_to.secret_key, &completed), 1e-6);
    }
}

#[test]
fn test_rotation() {
    let ctx = test_context(3);
    let mut rng = StdRng::seed_from_u64(7);
    let keys = ctx.key_gen(&mut rng);
    ctx.eval_rotate_key_gen(&keys.secret_key, &[1, 6, -2, 5], &mut rng).unwrap();
    ctx.eval_conjugate_key_gen(&keys.secret_key, &mut rng).unwrap();
    for slots in [32, 8] {
        let x = test_values(slots, 10);
        let ct = ctx.encrypt_values(&keys.public_key, &x, slots, &mut rng).unwrap();
        for r in [1i64, 6, -2, 37] {
            let rotated = ctx.eval_at_index(&ct, r).unwrap();
            let expected = (0..slots).map(|i| x[(i as i64 + r).rem_euclid(slots as i64) as usize]).collect::<Vec<_>>();
            assert_close(&expected, &ctx.decrypt_and_decode(&keys.secret_key, &rotated), 1e-4);
        }
        let conjugated = ctx.eval_conjugate(&ct).unwrap();
        assert_close(&x.iter().map(|a| a.conj()).collect::<Vec<_>>(), &ctx.decrypt_and_decode(&keys.secret_key, &conjugated), 1e-4);
    }
    let ct = ctx.encrypt_values(&keys.public_key, &test_values(32, 11), 32, &mut rng).unwrap();
    assert!(matches!(ctx.eval_at_index(&ct, 3), Err(CkksError::MissingKey { rotation: Some(3), .. })));
}

#[test]
fn test_fast_rotation_shares_digits() {
    let ctx = test_context(3);
    let mut rng = StdRng::seed_from_u64(8);
    let keys = ctx.key_gen(&mut rng);
    ctx.eval_rotate_key_gen(&keys.secret_key, &[1, 2, 3], &mut rng).unwrap();
    let x = test_values(32, 12);
    let ct = ctx.encrypt_at_level(&keys.public_key, &x, 32, 1, &mut rng).unwrap();
    let digits = ctx.eval_fast_rotation_precompute(&ct);
    for r in 1..=3 {
        let rotated = ctx.key_switch_down(&ctx.eval_fast_rotation_ext(&ct, r, &digits, true).unwrap());
        let expected = (0..32).map(|i| x[(i + r as usize) % 32]).collect::<Vec<_>>();
        assert_close(&expected, &ctx.decrypt_and_decode(&keys.secret_key, &rotated), 1e-4);
    }
}

#[test]
fn test_fast_rotation_without_first_component() {
    let ctx = test_context(3);
    let mut rng = StdRng::seed_from_u64(9);
    let keys = ctx.key_gen(&mut rng);
    ctx.eval_rotate_key_gen(&keys.secret_key, &[1, 5], &mut rng).unwrap();
    let x = test_values(32, 13);
    let ct = ctx.encrypt_at_level(&keys.public_key, &x, 32, 1, &mut rng).unwrap();
    assert_eq!(Format::Evaluation, ct.c0.format());
    let digits = ctx.eval_fast_rotation_precompute(&ct);
    let table = ctx.chain().moduli();
    for r in [1i64, 5] {
        let partial = ctx.key_switch_down(&ctx.eval_fast_rotation_ext(&ct, r, &digits, false).unwrap());
        let k = find_automorphism_index(r, 128);
        let map = precompute_auto_map(ctx.chain().evaluation_exponents(), k).unwrap();
        let first = apply_automorphism(table, &ct.c0, k, &map);
        let completed = Ciphertext::new(partial.c0.clone().add(table, &first), partial.c1.clone(), ct.scale, 1, ct.slots, ct.shape);
        let expected = (0..32).map(|i| x[(i + r as usize) % 32]).collect::<Vec<_>>();
        assert_close(&expected, &ctx.decrypt_and_decode(&keys.secret_key, &completed), 1e-4);
    }
}

#[test]
fn test_composite_scaling_arithmetic() {
    let ctx = CkksContext::new(crate::chain::test_composite_params(3)).unwrap();
    assert_eq!(8, ctx.chain().total_towers());
    let mut rng = StdRng::seed_from_u64(10);
    let keys = ctx.key_gen(&mut rng);
    ctx.eval_mult_key_gen(&keys.secret_key, &mut rng);
    let x = test_values(16, 14);
    let y = test_values(16, 15);
    let ct_x = ctx.encrypt_values(&keys.public_key, &x, 16, &mut rng).unwrap();
    let ct_y = ctx.encrypt_values(&keys.public_key, &y, 16, &mut rng).unwrap();

    let product = ctx.eval_mult(&ct_x, &ct_y).unwrap();
    assert_eq!(1, product.level());
    assert_eq!(6, product.num_towers());
    assert_eq!(ctx.chain().scaling_factor(1), product.scale());
    let expected = x.iter().zip(y.iter()).map(|(a, b)| a * b).collect::<Vec<_>>();
    assert_close(&expected, &ctx.decrypt_and_decode(&keys.secret_key, &product), 1e-9);

    let scaled = ctx.eval_mult_const(&product, 0.5).unwrap();
    assert_eq!(2, scaled.level());
    let (adjusted_x, adjusted) = ctx.adjust_levels(&ct_x, &scaled).unwrap();
    assert_eq!(4, adjusted_x.num_towers());
    let sum = ctx.eval_add(&adjusted_x, &adjusted).unwrap();
    let expected = x.iter().zip(expected.iter()).map(|(a, b)| a + b * 0.5).collect::<Vec<_>>();
    assert_close(&expected, &ctx.decrypt_and_decode(&keys.secret_key, &sum), 1e-9);

    let mut odd = ct_x.clone();
    odd.drop_last_towers(1);
    assert!(matches!(ctx.rescale(&odd), Err(CkksError::Mismatch(_))));
    let last = ctx.drop_to_level(&ct_x, 3).unwrap();
    assert_eq!(2, last.num_towers());
    assert!(matches!(ctx.rescale(&last), Err(CkksError::CapacityExhausted { towers: 2, .. })));
}
