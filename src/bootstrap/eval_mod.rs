use std::f64::consts::PI;

use tracing::instrument;

use crate::ciphertext::Ciphertext;
use crate::context::CkksContext;
use crate::error::Result;
use crate::params::BootstrapConfig;

///
/// The function that is interpolated before the double-angle steps, i.e.
/// ```text
///   u -> cos(2 pi (K u - 1/4) / 2^r)
/// ```
/// where `K = eval_mod_range` and `r = double_angle_steps`. After `r` applications of
/// `x -> 2 x^2 - 1`, this becomes `cos(2 pi K u - pi / 2) = sin(2 pi K u)`.
///
pub fn eval_mod_function(config: &BootstrapConfig) -> impl Fn(f64) -> f64 {
    let K = config.eval_mod_range as f64;
    let divisor = (1u64 << config.double_angle_steps) as f64;
    move |u| (2. * PI * (K * u - 0.25) / divisor).cos()
}

///
/// Computes the coefficients `c_0, ..., c_d` of the Chebyshev interpolant of `f` on `[-1, 1]`
/// at the Chebyshev nodes, such that `f ~ c_0 / 2 + sum_k c_k T_k`.
///
pub fn chebyshev_coefficients<F>(f: F, degree: usize) -> Vec<f64>
    where F: Fn(f64) -> f64
{
    let nodes = degree + 1;
    let theta = (0..nodes).map(|j| PI * (j as f64 + 0.5) / nodes as f64).collect::<Vec<_>>();
    let values = theta.iter().map(|t| f(t.cos())).collect::<Vec<_>>();
    return (0..=degree).map(|k|
        2. / nodes as f64 * theta.iter().zip(values.iter()).map(|(t, v)| v * (k as f64 * t).cos()).sum::<f64>()
    ).collect();
}

///
/// Evaluates `c_0 / 2 + sum_k c_k T_k(x)` using Clenshaw's recurrence.
///
pub fn chebyshev_evaluate_plain(coefficients: &[f64], x: f64) -> f64 {
    let mut b1 = 0.;
    let mut b2 = 0.;
    for c in coefficients.iter().skip(1).rev() {
        let b0 = 2. * x * b1 - b2 + c;
        b2 = b1;
        b1 = b0;
    }
    return x * b1 - b2 + coefficients[0] / 2.;
}

///
/// Computes encryptions of `T_1(x), ..., T_d(x)`, using
/// `T_2k = 2 T_k^2 - 1` and `T_(2k + 1) = 2 T_k T_(k + 1) - T_1`, so that `T_k`
/// is at depth `ceil(log2 k)`.
///
fn chebyshev_basis(ctx: &CkksContext, x: &Ciphertext, degree: usize) -> Result<Vec<Ciphertext>> {
    let mut result: Vec<Ciphertext> = Vec::with_capacity(degree + 1);
    // T_0 is never used homomorphically
    result.push(x.clone());
    result.push(x.clone());
    for k in 2..=degree {
        let half = k / 2;
        let next = if k % 2 == 0 {
            let square = ctx.eval_mult(&result[half], &result[half])?;
            ctx.eval_add_const(&ctx.eval_mult_int(&square, 2), -1.)
        } else {
            let product = ctx.eval_mult_int(&ctx.eval_mult(&result[half], &result[half + 1])?, 2);
            let (product, t1) = ctx.adjust_levels(&product, &result[1])?;
            ctx.eval_sub(&product, &t1)?
        };
        result.push(next);
    }
    return Ok(result);
}

///
/// Homomorphically evaluates `c_0 / 2 + sum_k c_k T_k` on the slots of `x`, which must be
/// real and contained in `[-1, 1]`.
///
#[instrument(skip_all)]
pub fn evaluate_chebyshev(ctx: &CkksContext, x: &Ciphertext, coefficients: &[f64]) -> Result<Ciphertext> {
    let degree = coefficients.len() - 1;
    assert!(degree >= 1);
    let basis = chebyshev_basis(ctx, x, degree)?;
    let top_level = basis[degree].level();
    let top_scale = ctx.chain().scaling_factor(top_level);
    let max_coefficient = coefficients.iter().map(|c| c.abs()).fold(0., f64::max);

    let mut result: Option<Ciphertext> = None;
    for k in 1..=degree {
        if coefficients[k].abs() <= 1e-14 * max_coefficient {
            continue;
        }
        let aligned = ctx.adjust_to_level(&basis[k], top_level, top_scale)?;
        let summand = ctx.eval_mult_const(&aligned, coefficients[k])?;
        result = Some(match result {
            Some(current) => ctx.eval_add(&current, &summand)?,
            None => summand
        });
    }
    let result = match result {
        Some(result) => result,
        None => ctx.eval_mult_const(&ctx.adjust_to_level(&basis[1], top_level, top_scale)?, 0.)?
    };
    return Ok(ctx.eval_add_const(&result, coefficients[0] / 2.));
}

///
/// Approximates `sin(2 pi K u)` on the real slots `u` of `x`, given the Chebyshev coefficients
/// of [`eval_mod_function()`].
///
#[instrument(skip_all)]
pub fn eval_mod(ctx: &CkksContext, x: &Ciphertext, coefficients: &[f64], config: &BootstrapConfig) -> Result<Ciphertext> {
    let mut current = evaluate_chebyshev(ctx, x, coefficients)?;
    for _ in 0..config.double_angle_steps {
        let square = ctx.eval_mult(&current, &current)?;
        current = ctx.eval_add_const(&ctx.eval_mult_int(&square, 2), -1.);
    }
    return Ok(current);
}

#[cfg(test)]
use rand::{SeedableRng, rngs::StdRng};
#[cfg(test)]
use num_complex::Complex64;
#[cfg(test)]
use crate::context::test_context;

#[test]
fn test_chebyshev_interpolation() {
    let config = BootstrapConfig::default();
    let f = eval_mod_function(&config);
    let coefficients = chebyshev_coefficients(&f, config.chebyshev_degree);
    for i in 0..=200 {
        let u = -1. + i as f64 / 100.;
        assert!((f(u) - chebyshev_evaluate_plain(&coefficients, u)).abs() < 1e-10);
        let mut value = chebyshev_evaluate_plain(&coefficients, u);
        for _ in 0..config.double_angle_steps {
            value = 2. * value * value - 1.;
        }
        assert!((value - (2. * PI * config.eval_mod_range as f64 * u).sin()).abs() < 1e-8);
    }
}

#[test]
fn test_evaluate_chebyshev_homomorphic() {
    let ctx = test_context(6);
    let mut rng = StdRng::seed_from_u64(3);
    let keys = ctx.key_gen(&mut rng);
    ctx.eval_mult_key_gen(&keys.secret_key, &mut rng);

    let coefficients = chebyshev_coefficients(|x: f64| (3. * x).cos(), 7);
    let inputs = (0..8).map(|i| Complex64::new(-0.9 + 0.25 * i as f64, 0.)).collect::<Vec<_>>();
    let ct = ctx.encrypt_values(&keys.public_key, &inputs, 8, &mut rng).unwrap();
    let result = evaluate_chebyshev(&ctx, &ct, &coefficients).unwrap();
    assert_eq!(4, result.level());

    let decrypted = ctx.decrypt_and_decode(&keys.secret_key, &result);
    for (x, y) in inputs.iter().zip(decrypted.iter()) {
        assert!((chebyshev_evaluate_plain(&coefficients, x.re) - y.re).abs() < 1e-5);
        assert!(y.im.abs() < 1e-5);
    }
}
