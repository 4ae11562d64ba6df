use serde::{Deserialize, Serialize};

use crate::error::{CkksError, Result};

///
/// Distribution from which the secret key coefficients are sampled.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecretDistribution {
    /// every coefficient uniform in `{-1, 0, 1}`
    UniformTernary,
    /// exactly `hamming_weight` nonzero coefficients, each uniform in `{-1, 1}`
    SparseTernary { hamming_weight: usize }
}

///
/// Parameters of a [`crate::context::CkksContext`].
///
/// The ciphertext modulus consists of the first modulus `Q_0` with `first_mod_bits` bits
/// and `multiplicative_depth` scaling moduli with `scaling_mod_bits` bits each. Every one of
/// these level moduli is the product of `composite_degree` primes of roughly equal size, so
/// scaling factors beyond the machine word size are possible. Key switching additionally uses
/// a number of special primes with `special_mod_bits` bits, chosen such that their product
/// exceeds the largest of the `num_digits` RNS digits.
///
/// # Defaults
///
/// | field                 | default                          |
/// |-----------------------|----------------------------------|
/// | `ring_dimension`      | `4096`                           |
/// | `multiplicative_depth`| `20`                             |
/// | `first_mod_bits`      | `57`                             |
/// | `scaling_mod_bits`    | `50`                             |
/// | `composite_degree`    | `1`                              |
/// | `special_mod_bits`    | `57`                             |
/// | `num_digits`          | `3`                              |
/// | `secret_distribution` | sparse ternary, weight `64`      |
/// | `error_std_dev`       | `3.2`                            |
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CkksParams {
    pub ring_dimension: usize,
    pub multiplicative_depth: usize,
    pub first_mod_bits: usize,
    pub scaling_mod_bits: usize,
    pub composite_degree: usize,
    pub special_mod_bits: usize,
    pub num_digits: usize,
    pub secret_distribution: SecretDistribution,
    pub error_std_dev: f64
}

impl Default for CkksParams {

    fn default() -> Self {
        Self {
            ring_dimension: 1 << 12,
            multiplicative_depth: 20,
            first_mod_bits: 57,
            scaling_mod_bits: 50,
            composite_degree: 1,
            special_mod_bits: 57,
            num_digits: 3,
            secret_distribution: SecretDistribution::SparseTernary { hamming_weight: 64 },
            error_std_dev: 3.2
        }
    }
}

/// Moduli must stay below `2^58` to be supported by `zn_64::Zn`.
pub const MAX_MODULUS_BITS: usize = 57;
pub const MIN_MODULUS_BITS: usize = 20;
/// Level moduli and scaling factors have to fit into `i128` when raising the modulus or
/// adjusting scaling factors.
pub const MAX_LEVEL_MODULUS_BITS: usize = 100;
pub const MAX_COMPOSITE_DEGREE: usize = 4;

impl CkksParams {

    pub fn total_towers(&self) -> usize {
        self.composite_degree * (self.multiplicative_depth + 1)
    }

    pub fn max_slots(&self) -> usize {
        self.ring_dimension / 2
    }

    pub fn log2_ring_dimension(&self) -> usize {
        self.ring_dimension.trailing_zeros() as usize
    }

    ///
    /// Checks that the parameters describe a supported configuration.
    ///
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(CkksError::InvalidParameters(msg));
        if !self.ring_dimension.is_power_of_two() || self.ring_dimension < 8 || self.ring_dimension > (1 << 17) {
            return invalid(format!("ring dimension {} must be a power of two in [8, 2^17]", self.ring_dimension));
        }
        if self.multiplicative_depth == 0 {
            return invalid("multiplicative depth must be positive".to_owned());
        }
        if self.composite_degree == 0 || self.composite_degree > MAX_COMPOSITE_DEGREE {
            return invalid(format!("composite degree {} must be within [1, {}]", self.composite_degree, MAX_COMPOSITE_DEGREE));
        }
        for (name, bits) in [("first", self.first_mod_bits), ("scaling", self.scaling_mod_bits)] {
            let prime_bits = bits as f64 / self.composite_degree as f64;
            if bits > MAX_LEVEL_MODULUS_BITS || prime_bits < MIN_MODULUS_BITS as f64 || prime_bits > MAX_MODULUS_BITS as f64 {
                return invalid(format!(
                    "{} modulus size {} must be at most {} bits, and give {} primes within [{}, {}] bits",
                    name, bits, MAX_LEVEL_MODULUS_BITS, self.composite_degree, MIN_MODULUS_BITS, MAX_MODULUS_BITS
                ));
            }
        }
        if self.special_mod_bits < MIN_MODULUS_BITS || self.special_mod_bits > MAX_MODULUS_BITS {
            return invalid(format!("special modulus size {} must be within [{}, {}] bits", self.special_mod_bits, MIN_MODULUS_BITS, MAX_MODULUS_BITS));
        }
        if self.num_digits == 0 || self.num_digits > self.total_towers() {
            return invalid(format!("number of digits {} must be within [1, {}]", self.num_digits, self.total_towers()));
        }
        if !(self.error_std_dev > 0.) {
            return invalid(format!("error standard deviation {} must be positive", self.error_std_dev));
        }
        if let SecretDistribution::SparseTernary { hamming_weight } = self.secret_distribution {
            if hamming_weight == 0 || hamming_weight > self.ring_dimension {
                return invalid(format!("hamming weight {} must be within [1, {}]", hamming_weight, self.ring_dimension));
            }
        }
        return Ok(());
    }
}

///
/// Constants of the bootstrapping procedure.
///
/// The input is divided by `2^correction_bits` before the modulus is raised, which
/// reduces the approximation error of the modular reduction, and multiplied by the same
/// power of two at the end. The modular reduction is approximated by
/// `sin(2 pi eval_mod_range u) / (2 pi)` on `u in [-1, 1]`, computed as a Chebyshev
/// interpolant of degree `chebyshev_degree` of the scaled cosine, followed by
/// `double_angle_steps` double-angle steps.
///
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    pub correction_bits: usize,
    pub eval_mod_range: usize,
    pub double_angle_steps: usize,
    pub chebyshev_degree: usize
}

impl Default for BootstrapConfig {

    fn default() -> Self {
        Self {
            correction_bits: 5,
            eval_mod_range: 16,
            double_angle_steps: 3,
            chebyshev_degree: 40
        }
    }
}

impl BootstrapConfig {

    ///
    /// Chooses the range `K` of the modular reduction for secrets of the given distribution.
    ///
    /// After raising the modulus, every coefficient of the overflow `I` is a sum of `h + 1`
    /// values in `[-1/2, 1/2]`, where `h` is the (expected) hamming weight of the secret.
    /// `K` is the smallest power of two above six standard deviations of this sum, but at
    /// least `16`. The double-angle steps grow with `K` such that `K / 2^r = 2`, so the
    /// interpolated cosine and its Chebyshev degree stay the same.
    ///
    pub fn for_secret_distribution(distribution: SecretDistribution, ring_dimension: usize) -> Self {
        let hamming_weight = match distribution {
            SecretDistribution::UniformTernary => (2 * ring_dimension).div_ceil(3),
            SecretDistribution::SparseTernary { hamming_weight } => hamming_weight
        };
        let bound = 6. * ((hamming_weight + 1) as f64 / 12.).sqrt() + 1.;
        let eval_mod_range = (bound.ceil() as usize).next_power_of_two().max(16);
        return Self {
            eval_mod_range: eval_mod_range,
            double_angle_steps: eval_mod_range.trailing_zeros() as usize - 1,
            ..Self::default()
        };
    }

    ///
    /// The number of levels consumed by the approximate modular reduction.
    ///
    pub fn eval_mod_depth(&self) -> usize {
        let chebyshev_depth = (usize::BITS - (self.chebyshev_degree.max(1) - 1).leading_zeros()) as usize;
        chebyshev_depth + 1 + self.double_angle_steps
    }

    pub fn validate(&self) -> Result<()> {
        if self.chebyshev_degree < 2 {
            return Err(CkksError::InvalidParameters(format!("chebyshev degree {} must be at least 2", self.chebyshev_degree)));
        }
        if self.eval_mod_range == 0 {
            return Err(CkksError::InvalidParameters("range of the modular reduction must be positive".to_owned()));
        }
        if self.correction_bits > 20 {
            return Err(CkksError::InvalidParameters(format!("{} correction bits are too many", self.correction_bits)));
        }
        return Ok(());
    }
}

#[test]
fn test_default_params_are_valid() {
    assert!(CkksParams::default().validate().is_ok());
    assert_eq!(21, CkksParams::default().total_towers());
}

#[test]
fn test_invalid_params() {
    let params = CkksParams { ring_dimension: 48, ..CkksParams::default() };
    assert!(matches!(params.validate(), Err(CkksError::InvalidParameters(_))));
    let params = CkksParams { first_mod_bits: 60, ..CkksParams::default() };
    assert!(params.validate().is_err());
    let params = CkksParams { composite_degree: 0, ..CkksParams::default() };
    assert!(params.validate().is_err());
    let params = CkksParams { scaling_mod_bits: 30, composite_degree: 2, ..CkksParams::default() };
    assert!(params.validate().is_err());
    let params = CkksParams { num_digits: 22, ..CkksParams::default() };
    assert!(params.validate().is_err());
    let params = CkksParams { secret_distribution: SecretDistribution::SparseTernary { hamming_weight: 0 }, ..CkksParams::default() };
    assert!(params.validate().is_err());
}

#[test]
fn test_composite_params() {
    let params = CkksParams { first_mod_bits: 88, scaling_mod_bits: 80, composite_degree: 2, ..CkksParams::default() };
    assert!(params.validate().is_ok());
    assert_eq!(42, params.total_towers());
    let params = CkksParams { first_mod_bits: 120, composite_degree: 3, ..params };
    assert!(params.validate().is_err());
}

#[test]
fn test_bootstrap_config_for_secret_distribution() {
    let sparse = BootstrapConfig::for_secret_distribution(SecretDistribution::SparseTernary { hamming_weight: 64 }, 1 << 12);
    assert_eq!(BootstrapConfig::default(), sparse);

    let uniform = BootstrapConfig::for_secret_distribution(SecretDistribution::UniformTernary, 1 << 12);
    assert_eq!(128, uniform.eval_mod_range);
    assert_eq!(6, uniform.double_angle_steps);
    assert_eq!(uniform.chebyshev_degree, sparse.chebyshev_degree);
    assert_eq!(13, uniform.eval_mod_depth());

    let uniform = BootstrapConfig::for_secret_distribution(SecretDistribution::UniformTernary, 128);
    assert_eq!(32, uniform.eval_mod_range);
    assert_eq!(4, uniform.double_angle_steps);
}

#[test]
fn test_eval_mod_depth() {
    assert_eq!(10, BootstrapConfig::default().eval_mod_depth());
    assert_eq!(6, BootstrapConfig { chebyshev_degree: 4, double_angle_steps: 3, ..BootstrapConfig::default() }.eval_mod_depth());
    assert_eq!(8, BootstrapConfig { chebyshev_degree: 17, double_angle_steps: 2, ..BootstrapConfig::default() }.eval_mod_depth());
}
