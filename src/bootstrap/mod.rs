use std::f64::consts::PI;
use std::sync::Arc;

use num_complex::Complex64;
use rand::{CryptoRng, Rng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::automorphism::{conjugation_index, find_automorphism_index};
use crate::ciphertext::Ciphertext;
use crate::context::{read_lock, write_lock, CkksContext};
use crate::error::{CkksError, Result};
use crate::keys::{KeyPair, SecretKey};
use crate::lintransform::{CompiledLinearTransform, SlotLinearTransform};
use crate::params::BootstrapConfig;
use crate::rns::{Format, RnsPoly};

///
/// The butterfly stages of the coefficients-to-slots and slots-to-coefficients transforms.
///
pub mod dft;
///
/// Approximate modular reduction via Chebyshev interpolation and double-angle steps.
///
pub mod eval_mod;

use dft::{coeffs_to_slots_matrices, effective_level_budget, slots_to_coeffs_matrices};
use eval_mod::{chebyshev_coefficients, eval_mod, eval_mod_function};

/// Used for the iterative refinement if no precision is given.
pub const DEFAULT_PRECISION_BITS: usize = 17;

///
/// Everything required to bootstrap ciphertexts with a fixed number of slots.
///
/// The transforms are persisted as complex matrices (by their diagonals); their encodings as
/// plaintexts are not, and have to be recomputed by [`CkksContext::eval_bootstrap_precompute()`]
/// after deserialization.
///
#[derive(Clone, Serialize, Deserialize)]
pub struct BootstrapPrecomputation {
    slots: usize,
    config: BootstrapConfig,
    level_budget: [usize; 2],
    baby_steps: [usize; 2],
    coeffs_to_slots: Vec<SlotLinearTransform>,
    slots_to_coeffs: Vec<SlotLinearTransform>,
    chebyshev_coefficients: Vec<f64>,
    output_towers: usize,
    composite_degree: usize,
    #[serde(skip)]
    compiled: Option<Arc<CompiledTransforms>>
}

struct CompiledTransforms {
    coeffs_to_slots: Vec<CompiledLinearTransform>,
    slots_to_coeffs: Vec<CompiledLinearTransform>
}

fn default_baby_steps(slots: usize) -> usize {
    1 << ((slots.trailing_zeros() + 1) / 2)
}

impl BootstrapPrecomputation {

    ///
    /// Computes the transforms for bootstrapping ciphertexts with `slots` slots.
    ///
    /// `level_budget` gives the number of levels that coefficients-to-slots resp.
    /// slots-to-coefficients may use, and `dim1` the corresponding number of baby steps,
    /// where `0` chooses a default.
    ///
    #[instrument(skip_all)]
    pub fn create_for(ctx: &CkksContext, level_budget: [usize; 2], dim1: [usize; 2], slots: usize, config: BootstrapConfig) -> Result<Self> {
        config.validate()?;
        if !slots.is_power_of_two() || slots > ctx.max_slots() {
            return Err(CkksError::InvalidParameters(format!("slot count {} must be a power of two at most {}", slots, ctx.max_slots())));
        }
        let chain = ctx.chain();
        let level_budget = [effective_level_budget(level_budget[0], slots), effective_level_budget(level_budget[1], slots)];
        let baby_steps = [0, 1].map(|i| if dim1[i] == 0 { default_baby_steps(slots) } else { dim1[i].clamp(1, slots) });
        let consumed = level_budget[0] + config.eval_mod_depth() + level_budget[1];
        if chain.total_levels() < consumed + 1 {
            return Err(CkksError::InvalidParameters(format!(
                "bootstrapping consumes {} levels, but the chain has only {} levels; at least {} are required",
                consumed, chain.total_levels(), consumed + 1
            )));
        }

        let gap = ctx.max_slots() / slots;
        let K = config.eval_mod_range as f64;
        let q0 = chain.first_modulus();
        let coeffs_to_slots_scale = chain.scaling_factor(0) / (2. * K * q0 * gap as f64);
        let slots_to_coeffs_scale = q0 / (2. * PI * chain.scaling_factor(chain.total_levels()));

        let coeffs_to_slots = coeffs_to_slots_matrices(slots, level_budget[0], coeffs_to_slots_scale).iter()
            .map(|matrix| SlotLinearTransform::from_matrix(matrix, baby_steps[0]))
            .collect::<Vec<_>>();
        let slots_to_coeffs = slots_to_coeffs_matrices(slots, level_budget[1], slots_to_coeffs_scale).iter()
            .map(|matrix| SlotLinearTransform::from_matrix(matrix, baby_steps[1]))
            .collect::<Vec<_>>();

        info!(slots, level_budget = ?level_budget, baby_steps = ?baby_steps, output_towers = chain.towers_at_level(consumed), "created bootstrapping precomputation");
        return Ok(Self {
            slots,
            config,
            level_budget,
            baby_steps,
            coeffs_to_slots,
            slots_to_coeffs,
            chebyshev_coefficients: chebyshev_coefficients(eval_mod_function(&config), config.chebyshev_degree),
            output_towers: chain.towers_at_level(consumed),
            composite_degree: chain.composite_degree(),
            compiled: None
        });
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// the effective level budget, i.e. the number of transforms in each of the two stages
    pub fn level_budget(&self) -> [usize; 2] {
        self.level_budget
    }

    pub fn baby_steps(&self) -> [usize; 2] {
        self.baby_steps
    }

    pub fn coeffs_to_slots(&self) -> &[SlotLinearTransform] {
        &self.coeffs_to_slots
    }

    pub fn slots_to_coeffs(&self) -> &[SlotLinearTransform] {
        &self.slots_to_coeffs
    }

    pub fn chebyshev_coefficients(&self) -> &[f64] {
        &self.chebyshev_coefficients
    }

    ///
    /// The number of towers of a ciphertext after one bootstrapping.
    ///
    pub fn output_towers(&self) -> usize {
        self.output_towers
    }

    ///
    /// The maximal number of towers of an input to [`CkksContext::eval_bootstrap()`], such that
    /// the output does not have less towers than the input. With refinement iterations, the
    /// correction consumes one more level.
    ///
    pub fn max_input_towers(&self, iterations: usize) -> usize {
        if iterations > 1 { self.output_towers - self.composite_degree } else { self.output_towers }
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    ///
    /// The Galois elements `5^(n 2^k)` whose automorphisms generate the trace into the subring
    /// of sparsely packed elements.
    ///
    pub fn trace_galois_elements(&self, cyclotomic_order: usize) -> Vec<usize> {
        let gap = cyclotomic_order / 4 / self.slots;
        (0..gap.trailing_zeros()).map(|k| find_automorphism_index((self.slots << k) as i64, cyclotomic_order)).collect()
    }

    pub fn required_rotations(&self) -> Vec<i64> {
        let mut result = self.coeffs_to_slots.iter().chain(self.slots_to_coeffs.iter())
            .flat_map(|transform| transform.required_rotations())
            .map(|r| r as i64)
            .collect::<Vec<_>>();
        result.sort();
        result.dedup();
        return result;
    }

    ///
    /// All Galois elements for which an automorphism key is needed to bootstrap.
    ///
    pub fn required_galois_keys(&self, cyclotomic_order: usize) -> Vec<usize> {
        let mut result = self.required_rotations().into_iter().map(|r| find_automorphism_index(r, cyclotomic_order)).collect::<Vec<_>>();
        result.extend(self.trace_galois_elements(cyclotomic_order));
        result.push(conjugation_index(cyclotomic_order));
        result.sort();
        result.dedup();
        return result;
    }

    #[instrument(skip_all)]
    fn compile(&self, ctx: &CkksContext) -> Result<CompiledTransforms> {
        let chain = ctx.chain();
        let compile_at = |transform: &SlotLinearTransform, level: usize| transform.compile(
            ctx,
            chain.towers_at_level(level),
            chain.scaling_factor(level),
            chain.scaling_factor(level + 1)
        );
        let coeffs_to_slots = self.coeffs_to_slots.iter().enumerate()
            .map(|(i, transform)| compile_at(transform, i))
            .collect::<Result<Vec<_>>>()?;
        let slots_to_coeffs_start = self.level_budget[0] + self.config.eval_mod_depth();
        let slots_to_coeffs = self.slots_to_coeffs.iter().enumerate()
            .map(|(i, transform)| compile_at(transform, slots_to_coeffs_start + i))
            .collect::<Result<Vec<_>>>()?;
        return Ok(CompiledTransforms { coeffs_to_slots, slots_to_coeffs });
    }
}

///
/// The result of comparing decrypted values to the expected ones.
///
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrecisionReport {
    pub max_error: f64,
    /// `-log2(max_error)`
    pub precision_bits: f64
}

pub fn measure_precision(expected: &[Complex64], actual: &[Complex64]) -> PrecisionReport {
    assert_eq!(expected.len(), actual.len());
    let max_error = expected.iter().zip(actual.iter())
        .map(|(e, a)| (e.re - a.re).abs().max((e.im - a.im).abs()))
        .fold(0., f64::max);
    return PrecisionReport {
        max_error,
        precision_bits: -max_error.log2()
    };
}

///
/// Lifts a ciphertext modulo `Q_0` to all towers of the chain. The result encrypts
/// `m + Q_0 I` for a small integer polynomial `I`, and is tagged with the scaling factor of
/// level `0`.
///
fn mod_raise(ctx: &CkksContext, ct: &Ciphertext) -> Ciphertext {
    let chain = ctx.chain();
    let table = chain.moduli();
    assert_eq!(chain.composite_degree(), ct.num_towers());
    let ct = ct.clone().in_format(table, Format::Coefficient);
    let all_towers = chain.chain_moduli(chain.total_towers());
    let raise = |c: &RnsPoly| RnsPoly::from_coefficients(table, all_towers.clone(), &c.centered_coefficients(table)).in_format(table, Format::Evaluation);
    return Ciphertext::new(raise(ct.c0()), raise(ct.c1()), chain.scaling_factor(0), 1, ct.slots(), chain.shape());
}

///
/// Sums the images of `ct` under the automorphisms of the trace into the subring
/// `Z[X^(N / 2n)]`, which multiplies the coefficients of `X^(j N / 2n)` by `N / 2n`
/// and removes all others.
///
#[instrument(skip_all)]
fn hom_compute_trace(ctx: &CkksContext, ct: Ciphertext, galois_elements: &[usize]) -> Result<Ciphertext> {
    let mut current = ct;
    for g in galois_elements {
        current = ctx.eval_add(&current, &ctx.eval_automorphism(&current, *g)?)?;
    }
    return Ok(current);
}

fn hom_compute_linear_transform(ctx: &CkksContext, ct: Ciphertext, transforms: &[CompiledLinearTransform]) -> Result<Ciphertext> {
    let mut current = ct;
    for transform in transforms {
        current = transform.evaluate(ctx, &current)?;
    }
    return Ok(current);
}

fn bootstrap_once(ctx: &CkksContext, precomputation: &BootstrapPrecomputation, compiled: &CompiledTransforms, ct: &Ciphertext) -> Result<Ciphertext> {
    let chain = ctx.chain();
    let config = &precomputation.config;
    let half_N = ctx.ring_dimension() / 2;

    let ct = if ct.scale_degree() > 1 { ctx.rescale(ct)? } else { ct.clone() };
    let ct = ctx.drop_to_level(&ct, chain.total_levels() - 1)?;
    let ct = ctx.eval_mult_const(&ct, 2f64.powi(-(config.correction_bits as i32)))?;

    debug!("1. Raising the modulus");
    let raised = mod_raise(ctx, &ct);
    let raised = hom_compute_trace(ctx, raised, &precomputation.trace_galois_elements(ctx.cyclotomic_order()))?;

    debug!("2. Computing Coeffs-to-Slots transform");
    let in_slots = hom_compute_linear_transform(ctx, raised, &compiled.coeffs_to_slots)?;
    let conjugate = ctx.eval_conjugate(&in_slots)?;
    let real_part = ctx.eval_add(&in_slots, &conjugate)?;
    let imag_part = ctx.eval_negate(&ctx.eval_mult_monomial(&ctx.eval_sub(&in_slots, &conjugate)?, half_N));

    debug!("3. Evaluating the modular reduction");
    let real_part = eval_mod(ctx, &real_part, &precomputation.chebyshev_coefficients, config)?;
    let imag_part = eval_mod(ctx, &imag_part, &precomputation.chebyshev_coefficients, config)?;

    debug!("4. Computing Slots-to-Coeffs transform");
    let combined = ctx.eval_add(&real_part, &ctx.eval_mult_monomial(&imag_part, half_N))?;
    let result = hom_compute_linear_transform(ctx, combined, &compiled.slots_to_coeffs)?;
    return Ok(ctx.eval_mult_int(&result, 1 << config.correction_bits));
}

impl CkksContext {

    ///
    /// Prepares bootstrapping for ciphertexts with `slots` slots, with the [`BootstrapConfig`]
    /// suitable for the secret distribution of the parameters. See
    /// [`BootstrapPrecomputation::create_for()`].
    ///
    pub fn eval_bootstrap_setup(&self, level_budget: [usize; 2], dim1: [usize; 2], slots: usize) -> Result<()> {
        let config = BootstrapConfig::for_secret_distribution(self.params().secret_distribution, self.ring_dimension());
        self.eval_bootstrap_setup_with_config(level_budget, dim1, slots, config)
    }

    pub fn eval_bootstrap_setup_with_config(&self, level_budget: [usize; 2], dim1: [usize; 2], slots: usize, config: BootstrapConfig) -> Result<()> {
        let mut precomputation = BootstrapPrecomputation::create_for(self, level_budget, dim1, slots, config)?;
        precomputation.compiled = Some(Arc::new(precomputation.compile(self)?));
        write_lock(&self.bootstrap_precomputations).insert(slots, Arc::new(precomputation));
        return Ok(());
    }

    pub fn bootstrap_precomputation(&self, slots: usize) -> Result<Arc<BootstrapPrecomputation>> {
        read_lock(&self.bootstrap_precomputations).get(&slots).cloned().ok_or(CkksError::MissingPrecomputation { slots })
    }

    ///
    /// Stores a precomputation without its encoded transforms, e.g. after deserialization.
    ///
    pub(crate) fn insert_bootstrap_precomputation(&self, mut precomputation: BootstrapPrecomputation) {
        precomputation.compiled = None;
        write_lock(&self.bootstrap_precomputations).insert(precomputation.slots, Arc::new(precomputation));
    }

    ///
    /// Generates all automorphism keys required for bootstrapping ciphertexts with `slots` slots,
    /// and the relinearization key if it does not exist yet.
    ///
    #[instrument(skip_all)]
    pub fn eval_bootstrap_key_gen<R: Rng + CryptoRng>(&self, sk: &SecretKey, slots: usize, mut rng: R) -> Result<()> {
        let precomputation = self.bootstrap_precomputation(slots)?;
        let galois_elements = precomputation.required_galois_keys(self.cyclotomic_order());
        info!(slots, count = galois_elements.len(), "generating bootstrapping keys");
        for g in galois_elements {
            self.automorphism_key_gen(sk, g, &mut rng)?;
        }
        if self.relinearization_key().is_err() {
            self.eval_mult_key_gen(sk, &mut rng);
        }
        return Ok(());
    }

    ///
    /// Encodes the transforms of the precomputation for `slots` slots. Required after the
    /// precomputation was deserialized.
    ///
    #[instrument(skip_all)]
    pub fn eval_bootstrap_precompute(&self, slots: usize) -> Result<()> {
        let precomputation = self.bootstrap_precomputation(slots)?;
        let mut compiled = (*precomputation).clone();
        compiled.compiled = Some(Arc::new(precomputation.compile(self)?));
        write_lock(&self.bootstrap_precomputations).insert(slots, Arc::new(compiled));
        return Ok(());
    }

    ///
    /// Refreshes the ciphertext, i.e. returns an encryption of (approximately) the same values
    /// with at least as many towers.
    ///
    /// A ciphertext that already has more towers than bootstrapping would produce, as given by
    /// [`BootstrapPrecomputation::max_input_towers()`], is returned unchanged.
    ///
    /// For `iterations > 1`, the error of the first result is reduced by bootstrapping the
    /// scaled-up difference to the input, where the scaling is `2^(j precision_bits)` in the
    /// `j`-th refinement (with `precision_bits = 17` if `0` is given).
    ///
    #[instrument(skip_all)]
    pub fn eval_bootstrap(&self, ct: &Ciphertext, iterations: usize, precision_bits: usize) -> Result<Ciphertext> {
        let precomputation = self.bootstrap_precomputation(ct.slots())?;
        let compiled = precomputation.compiled.clone().ok_or(CkksError::MissingPrecomputation { slots: ct.slots() })?;
        if iterations == 0 {
            return Err(CkksError::InvalidParameters("at least one bootstrapping iteration is required".to_owned()));
        }
        let precision_bits = if precision_bits == 0 { DEFAULT_PRECISION_BITS } else { precision_bits };
        if (iterations - 1) * precision_bits > 62 {
            return Err(CkksError::InvalidParameters(format!("{} iterations with {} bits of precision each are not supported", iterations, precision_bits)));
        }
        let d = self.chain().composite_degree();
        let usable_towers = ct.num_towers().saturating_sub(if ct.scale_degree() > 1 { d } else { 0 });
        if usable_towers < 2 * d {
            return Err(CkksError::CapacityExhausted { towers: ct.num_towers(), required: 1 });
        }
        if usable_towers > precomputation.max_input_towers(iterations) {
            debug!(towers = usable_towers, max_towers = precomputation.max_input_towers(iterations), "ciphertext has enough towers left");
            return Ok(ct.clone());
        }
        let input = if ct.scale_degree() > 1 { self.rescale(ct)? } else { ct.clone() };

        let mut result = bootstrap_once(self, &precomputation, &compiled, &input)?;
        for j in 1..iterations {
            debug!(iteration = j, "refining bootstrapping result");
            let shift = j * precision_bits;
            let approximation = self.adjust_to_level(&result, input.level(), input.scale())?;
            let difference = self.eval_mult_int(&self.eval_sub(&input, &approximation)?, 1i64 << shift);
            let correction = self.eval_mult_const(&bootstrap_once(self, &precomputation, &compiled, &difference)?, 2f64.powi(-(shift as i32)))?;
            let aligned = self.adjust_to_level(&result, correction.level(), correction.scale())?;
            result = self.eval_add(&aligned, &correction)?;
        }
        if result.num_towers() < input.num_towers() {
            return Err(CkksError::TowerLoss { input_towers: input.num_towers(), output_towers: result.num_towers() });
        }
        return Ok(result);
    }

    ///
    /// Bootstraps an encryption of random values with the maximal allowed number of towers
    /// and measures the error.
    ///
    #[instrument(skip_all)]
    pub fn calibrate_bootstrap<R: Rng + CryptoRng>(&self, keys: &KeyPair, slots: usize, iterations: usize, precision_bits: usize, mut rng: R) -> Result<PrecisionReport> {
        let precomputation = self.bootstrap_precomputation(slots)?;
        let towers = precomputation.max_input_towers(iterations).max(2 * self.chain().composite_degree());
        let values = (0..slots).map(|_| Complex64::new(rng.gen_range(-0.5..0.5), rng.gen_range(-0.5..0.5))).collect::<Vec<_>>();
        let ct = self.encrypt_at_level(&keys.public_key, &values, slots, self.chain().level_of_towers(towers), &mut rng)?;
        let result = self.eval_bootstrap(&ct, iterations, precision_bits)?;
        let report = measure_precision(&values, &self.decrypt_and_decode(&keys.secret_key, &result));
        info!(slots, iterations, precision_bits = report.precision_bits, "measured bootstrapping precision");
        return Ok(report);
    }
}

#[cfg(test)]
use rand::{SeedableRng, rngs::StdRng};
#[cfg(test)]
use crate::context::{assert_close, pattern_values, test_context, test_values};
#[cfg(test)]
use crate::chain::{test_composite_params, test_params};
#[cfg(test)]
use crate::params::{CkksParams, SecretDistribution};

#[cfg(test)]
fn setup_bootstrapping_for(ctx: CkksContext, level_budget: [usize; 2], dim1: [usize; 2], slots: usize, seed: u64) -> (CkksContext, KeyPair, StdRng) {
    let mut rng = StdRng::seed_from_u64(seed);
    let keys = ctx.key_gen(&mut rng);
    ctx.eval_bootstrap_setup(level_budget, dim1, slots).unwrap();
    ctx.eval_bootstrap_key_gen(&keys.secret_key, slots, &mut rng).unwrap();
    return (ctx, keys, rng);
}

#[cfg(test)]
fn setup_bootstrapping(depth: usize, slots: usize, seed: u64) -> (CkksContext, KeyPair, StdRng) {
    setup_bootstrapping_for(test_context(depth), [1, 1], [32, 32], slots, seed)
}

#[test]
fn test_bootstrap_setup() {
    let ctx = test_context(14);
    ctx.eval_bootstrap_setup([2, 0], [0, 4], 32).unwrap();
    let precomputation = ctx.bootstrap_precomputation(32).unwrap();
    assert_eq!([2, 1], precomputation.level_budget());
    assert_eq!([8, 4], precomputation.baby_steps());
    assert_eq!(15 - 2 - 10 - 1, precomputation.output_towers());
    assert!(precomputation.is_compiled());
    assert_eq!(2, precomputation.coeffs_to_slots().len());
    assert!(matches!(ctx.eval_bootstrap_setup([3, 1], [0, 0], 32), Err(CkksError::InvalidParameters(_))));
    assert!(precomputation.trace_galois_elements(128).is_empty());
    assert!(precomputation.required_galois_keys(128).contains(&127));

    ctx.eval_bootstrap_setup([1, 1], [32, 32], 8).unwrap();
    assert_eq!(vec![find_automorphism_index(8, 128), find_automorphism_index(16, 128)], ctx.bootstrap_precomputation(8).unwrap().trace_galois_elements(128));

    assert!(matches!(ctx.eval_bootstrap_setup([1, 1], [32, 32], 12), Err(CkksError::InvalidParameters(_))));
    assert!(matches!(ctx.eval_bootstrap_setup([1, 1], [32, 32], 64), Err(CkksError::InvalidParameters(_))));
    assert!(matches!(test_context(12).eval_bootstrap_setup([1, 1], [32, 32], 32), Err(CkksError::InvalidParameters(_))));

    let composite = CkksContext::new(test_composite_params(14)).unwrap();
    composite.eval_bootstrap_setup([1, 1], [32, 32], 8).unwrap();
    let precomputation = composite.bootstrap_precomputation(8).unwrap();
    assert_eq!(30 - 2 * 12, precomputation.output_towers());
    assert_eq!(4, precomputation.max_input_towers(2));
    assert!(matches!(CkksContext::new(test_composite_params(12)).unwrap().eval_bootstrap_setup([1, 1], [32, 32], 8), Err(CkksError::InvalidParameters(_))));
}

#[test]
fn test_bootstrap_missing_precomputation() {
    let ctx = test_context(14);
    let mut rng = StdRng::seed_from_u64(5);
    let keys = ctx.key_gen(&mut rng);
    let ct = ctx.encrypt_at_level(&keys.public_key, &test_values(8, 1), 8, 13, &mut rng).unwrap();
    assert!(matches!(ctx.eval_bootstrap(&ct, 1, 0), Err(CkksError::MissingPrecomputation { slots: 8 })));
    assert!(matches!(ctx.eval_bootstrap_key_gen(&keys.secret_key, 8, &mut rng), Err(CkksError::MissingPrecomputation { slots: 8 })));

    ctx.eval_bootstrap_setup([1, 1], [32, 32], 8).unwrap();
    let mut uncompiled = (*ctx.bootstrap_precomputation(8).unwrap()).clone();
    uncompiled.compiled = None;
    ctx.insert_bootstrap_precomputation(uncompiled);
    assert!(matches!(ctx.eval_bootstrap(&ct, 1, 0), Err(CkksError::MissingPrecomputation { slots: 8 })));
}

#[test]
fn test_bootstrap_full_slots() {
    let _ = tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).with_test_writer().try_init();
    let (ctx, keys, mut rng) = setup_bootstrapping(14, 32, 1);
    let values = pattern_values(32);
    let ct = ctx.encrypt_at_level(&keys.public_key, &values, 32, 13, &mut rng).unwrap();
    assert_eq!(2, ct.num_towers());

    let result = ctx.eval_bootstrap(&ct, 1, 0).unwrap();
    assert_eq!(3, result.num_towers());
    assert!(result.num_towers() >= ct.num_towers());
    assert_close(&values, &ctx.decrypt_and_decode(&keys.secret_key, &result), 1e-4);

    // the result can be used for further computations
    ctx.eval_rotate_key_gen(&keys.secret_key, &[6], &mut rng).unwrap();
    let rotated = ctx.eval_at_index(&result, 6).unwrap();
    let expected = (0..32).map(|i| values[(i + 6) % 32]).collect::<Vec<_>>();
    assert_close(&expected, &ctx.decrypt_and_decode(&keys.secret_key, &rotated), 1e-4);
}

#[test]
fn test_bootstrap_sparse_slots() {
    for slots in [1, 8] {
        let (ctx, keys, mut rng) = setup_bootstrapping(14, slots, 3);
        let values = pattern_values(slots);
        let ct = ctx.encrypt_at_level(&keys.public_key, &values, slots, 12, &mut rng).unwrap();
        let result = ctx.eval_bootstrap(&ct, 1, 0).unwrap();
        assert_eq!(3, result.num_towers());
        assert_eq!(slots, result.slots());
        assert_close(&values, &ctx.decrypt_and_decode(&keys.secret_key, &result), 1e-4);
    }
}

#[test]
fn test_bootstrap_keeps_ciphertexts_with_enough_towers() {
    let (ctx, keys, mut rng) = setup_bootstrapping(14, 8, 6);
    let values = pattern_values(8);
    let fresh = ctx.encrypt_values(&keys.public_key, &values, 8, &mut rng).unwrap();
    assert_eq!(0, fresh.level());
    for iterations in [1, 2] {
        let result = ctx.eval_bootstrap(&fresh, iterations, 0).unwrap();
        assert_eq!(fresh.num_towers(), result.num_towers());
        assert_eq!(0, result.level());
        assert_close(&values, &ctx.decrypt_and_decode(&keys.secret_key, &result), 1e-6);
    }

    let ct = ctx.encrypt_at_level(&keys.public_key, &values, 8, 11, &mut rng).unwrap();
    assert_eq!(4, ctx.eval_bootstrap(&ct, 1, 0).unwrap().num_towers());
    let ct = ctx.encrypt_at_level(&keys.public_key, &values, 8, 12, &mut rng).unwrap();
    let result = ctx.eval_bootstrap(&ct, 2, 0).unwrap();
    assert_eq!(3, result.num_towers());
    assert_close(&values, &ctx.decrypt_and_decode(&keys.secret_key, &result), 1e-6);

    let ct = ctx.encrypt_at_level(&keys.public_key, &values, 8, 14, &mut rng).unwrap();
    assert!(matches!(ctx.eval_bootstrap(&ct, 1, 0), Err(CkksError::CapacityExhausted { towers: 1, required: 1 })));
}

#[test]
fn test_bootstrap_iterations() {
    let (ctx, keys, mut rng) = setup_bootstrapping(14, 8, 8);
    let values = pattern_values(8);
    let ct = ctx.encrypt_at_level(&keys.public_key, &values, 8, 13, &mut rng).unwrap();

    let single = measure_precision(&values, &ctx.decrypt_and_decode(&keys.secret_key, &ctx.eval_bootstrap(&ct, 1, 0).unwrap()));
    assert!(single.max_error < 1e-4);
    let precision_bits = single.precision_bits.floor() as usize - 5;

    let result = ctx.eval_bootstrap(&ct, 2, precision_bits).unwrap();
    assert_eq!(2, result.num_towers());
    let double = measure_precision(&values, &ctx.decrypt_and_decode(&keys.secret_key, &result));
    assert!(double.precision_bits + 5. >= 2. * precision_bits as f64, "{} bits after two iterations, {} bits after one", double.precision_bits, single.precision_bits);

    let calibrated = ctx.calibrate_bootstrap(&keys, 8, 2, precision_bits, &mut rng).unwrap();
    assert!(calibrated.max_error < 1e-4);
}

#[test]
fn test_bootstrap_level_budgets() {
    for level_budget in [[3, 2], [2, 2]] {
        for slots in [16, 8] {
            let (ctx, keys, mut rng) = setup_bootstrapping_for(test_context(20), level_budget, [0, 0], slots, 16);
            let precomputation = ctx.bootstrap_precomputation(slots).unwrap();
            assert_eq!(level_budget, precomputation.level_budget());
            assert_eq!(21 - level_budget[0] - 10 - level_budget[1], precomputation.output_towers());

            let values = pattern_values(slots);
            let ct = ctx.encrypt_at_level(&keys.public_key, &values, slots, 19, &mut rng).unwrap();
            let result = ctx.eval_bootstrap(&ct, 1, 0).unwrap();
            assert_eq!(precomputation.output_towers(), result.num_towers());
            assert_close(&values, &ctx.decrypt_and_decode(&keys.secret_key, &result), 1e-4);
        }
    }
}

#[test]
fn test_bootstrap_composite_scaling() {
    let (ctx, keys, mut rng) = setup_bootstrapping_for(CkksContext::new(test_composite_params(14)).unwrap(), [1, 1], [32, 32], 32, 17);
    assert!((ctx.chain().scaling_factor(0).log2() - 80.).abs() < 0.01);
    let values = pattern_values(32);
    let ct = ctx.encrypt_at_level(&keys.public_key, &values, 32, 13, &mut rng).unwrap();
    assert_eq!(4, ct.num_towers());

    let result = ctx.eval_bootstrap(&ct, 1, 0).unwrap();
    assert_eq!(6, result.num_towers());
    assert_eq!(12, result.level());
    assert_close(&values, &ctx.decrypt_and_decode(&keys.secret_key, &result), 1e-4);

    let ct = ctx.encrypt_at_level(&keys.public_key, &values, 32, 12, &mut rng).unwrap();
    assert_eq!(6, ctx.eval_bootstrap(&ct, 2, 0).unwrap().num_towers());
}

#[test]
fn test_bootstrap_uniform_ternary_secret() {
    let params = CkksParams {
        ring_dimension: 128,
        secret_distribution: SecretDistribution::UniformTernary,
        ..test_params(15)
    };
    let (ctx, keys, mut rng) = setup_bootstrapping_for(CkksContext::new(params).unwrap(), [1, 1], [32, 32], 16, 18);
    let precomputation = ctx.bootstrap_precomputation(16).unwrap();
    assert_eq!(32, precomputation.config().eval_mod_range);
    assert_eq!(4, precomputation.config().double_angle_steps);
    assert_eq!(3, precomputation.output_towers());

    let values = pattern_values(16);
    let ct = ctx.encrypt_at_level(&keys.public_key, &values, 16, 14, &mut rng).unwrap();
    let result = ctx.eval_bootstrap(&ct, 1, 0).unwrap();
    assert_eq!(3, result.num_towers());
    assert_close(&values, &ctx.decrypt_and_decode(&keys.secret_key, &result), 1e-4);
}

#[test]
fn test_measure_precision() {
    let expected = [Complex64::new(1., 0.), Complex64::new(0., 1.)];
    let actual = [Complex64::new(1. + 0.25, 0.), Complex64::new(0., 1. - 0.125)];
    let report = measure_precision(&expected, &actual);
    assert_eq!(0.25, report.max_error);
    assert_eq!(2., report.precision_bits);
}
