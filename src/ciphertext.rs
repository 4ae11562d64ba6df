use crate::chain::ChainShape;
use crate::error::{CkksError, Result};
use crate::rns::{Format, RnsModulus, RnsPoly};

/// Scaling factors are considered equal if they agree up to this relative error.
pub const SCALE_TOLERANCE: f64 = 1e-9;

pub fn scales_match(lhs: f64, rhs: f64) -> bool {
    (lhs - rhs).abs() <= SCALE_TOLERANCE * lhs.abs().max(rhs.abs())
}

///
/// An encoded, unencrypted message `m`, whose slots are `m(xi^(5^i)) / scale`.
///
#[derive(Clone)]
pub struct Plaintext {
    pub(crate) poly: RnsPoly,
    pub(crate) scale: f64,
    pub(crate) slots: usize
}

impl Plaintext {

    pub fn poly(&self) -> &RnsPoly {
        &self.poly
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn num_towers(&self) -> usize {
        self.poly.num_towers()
    }
}

///
/// A CKKS ciphertext `(c0, c1)`, decrypting to `c0 + c1 s`.
///
/// The ciphertext stores the shape of the modulus chain, so its level is always derived
/// from the current tower count; both components always live w.r.t. the same towers and
/// in the same format.
///
#[derive(Clone)]
pub struct Ciphertext {
    pub(crate) c0: RnsPoly,
    pub(crate) c1: RnsPoly,
    pub(crate) scale: f64,
    pub(crate) scale_degree: usize,
    pub(crate) slots: usize,
    pub(crate) shape: ChainShape
}

impl Ciphertext {

    pub(crate) fn new(c0: RnsPoly, c1: RnsPoly, scale: f64, scale_degree: usize, slots: usize, shape: ChainShape) -> Self {
        assert_eq!(c0.moduli(), c1.moduli());
        assert_eq!(c0.format(), c1.format());
        assert!(c0.num_towers() <= shape.total_towers);
        Self { c0, c1, scale, scale_degree, slots, shape }
    }

    pub fn c0(&self) -> &RnsPoly {
        &self.c0
    }

    pub fn c1(&self) -> &RnsPoly {
        &self.c1
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// `1` for fresh or rescaled ciphertexts, `2` after a product that was not rescaled yet
    pub fn scale_degree(&self) -> usize {
        self.scale_degree
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn num_towers(&self) -> usize {
        self.c0.num_towers()
    }

    pub fn level(&self) -> usize {
        self.shape.level_of_towers(self.num_towers())
    }

    pub fn format(&self) -> Format {
        self.c0.format()
    }

    pub(crate) fn map_components<F>(self, mut f: F) -> Self
        where F: FnMut(RnsPoly) -> RnsPoly
    {
        let c0 = f(self.c0);
        let c1 = f(self.c1);
        return Self::new(c0, c1, self.scale, self.scale_degree, self.slots, self.shape);
    }

    pub(crate) fn in_format(self, table: &[RnsModulus], format: Format) -> Self {
        self.map_components(|c| c.in_format(table, format))
    }

    pub(crate) fn drop_last_towers(&mut self, n: usize) {
        self.c0.drop_last_towers(n);
        self.c1.drop_last_towers(n);
    }

    ///
    /// Checks that two ciphertexts can be combined by addition, i.e. that they live at the
    /// same level, have the same scaling factor and the same slot count.
    ///
    pub fn check_compatible(&self, other: &Ciphertext) -> Result<()> {
        if self.num_towers() != other.num_towers() {
            return Err(CkksError::Mismatch(format!("ciphertexts at levels {} and {}, call adjust_levels first", self.level(), other.level())));
        }
        if !scales_match(self.scale, other.scale) {
            return Err(CkksError::Mismatch(format!("ciphertexts with scaling factors 2^{:.4} and 2^{:.4}", self.scale.log2(), other.scale.log2())));
        }
        if self.slots != other.slots {
            return Err(CkksError::Mismatch(format!("ciphertexts with {} and {} slots", self.slots, other.slots)));
        }
        return Ok(());
    }
}

#[test]
fn test_scales_match() {
    let scale = (1u64 << 50) as f64;
    assert!(scales_match(scale, scale * (1. + 1e-12)));
    assert!(!scales_match(scale, scale * (1. + 1e-6)));
}
