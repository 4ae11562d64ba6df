use std::f64::consts::PI;

use num_complex::Complex64;

use crate::error::{CkksError, Result};

///
/// The primitive `4n`-th root of unity `xi^e = exp(2 pi i e / 4n)`, written as `exp(2 pi i e / order)`.
///
pub fn root_of_unity_pow(e: usize, order: usize) -> Complex64 {
    Complex64::from_polar(1., 2. * PI * (e % order) as f64 / order as f64)
}

fn bit_reverse_permute(values: &mut [Complex64]) {
    let n = values.len();
    let log2_n = n.trailing_zeros();
    if n <= 1 {
        return;
    }
    for i in 0..n {
        let j = i.reverse_bits() >> (usize::BITS - log2_n);
        if i < j {
            values.swap(i, j);
        }
    }
}

///
/// The special DFT of length `n`, which maps `(w_0, ..., w_(n - 1))` to the values
/// ```text
///   z_i = sum_j w_j xi^(5^i j)
/// ```
/// where `xi = exp(2 pi i / 4n)`. It factors as `S_n ... S_4 S_2 BR` with the butterfly
/// layers `S_len` and the bitreversal permutation `BR`.
///
/// The twiddle factors `xi_len^(5^j)` of each layer are computed once in [`SpecialDFT::new()`].
///
pub struct SpecialDFT {
    n: usize,
    /// indexed by `[log2(len) - 1][j]`
    twiddles: Vec<Vec<Complex64>>,
    inv_twiddles: Vec<Vec<Complex64>>
}

impl SpecialDFT {

    pub fn new(n: usize) -> Self {
        assert!(n.is_power_of_two());
        let layers = n.trailing_zeros() as usize;
        let mut twiddles = Vec::with_capacity(layers);
        let mut inv_twiddles = Vec::with_capacity(layers);
        for k in 0..layers {
            let len = 2 << k;
            let order = 4 * len;
            let mut layer = Vec::with_capacity(len / 2);
            let mut inv_layer = Vec::with_capacity(len / 2);
            let mut power = 1;
            for _ in 0..(len / 2) {
                layer.push(root_of_unity_pow(power, order));
                inv_layer.push(root_of_unity_pow(order - power, order));
                power = power * 5 % order;
            }
            twiddles.push(layer);
            inv_twiddles.push(inv_layer);
        }
        return Self { n, twiddles, inv_twiddles };
    }

    pub fn len(&self) -> usize {
        self.n
    }

    fn layer_index(&self, len: usize) -> usize {
        assert!(len.is_power_of_two() && len >= 2 && len <= self.n);
        len.trailing_zeros() as usize - 1
    }

    ///
    /// Applies the butterfly layer `S_len` to `values`.
    ///
    pub fn layer(&self, values: &mut [Complex64], len: usize) {
        assert_eq!(self.n, values.len());
        let half = len / 2;
        let twiddles = &self.twiddles[self.layer_index(len)];
        for i in (0..self.n).step_by(len) {
            for j in 0..half {
                let u = values[i + j];
                let v = values[i + j + half] * twiddles[j];
                values[i + j] = u + v;
                values[i + j + half] = u - v;
            }
        }
    }

    ///
    /// Applies the inverse of [`SpecialDFT::layer()`] for the given `len`.
    ///
    pub fn inv_layer(&self, values: &mut [Complex64], len: usize) {
        assert_eq!(self.n, values.len());
        let half = len / 2;
        let inv_twiddles = &self.inv_twiddles[self.layer_index(len)];
        for i in (0..self.n).step_by(len) {
            for j in 0..half {
                let a = values[i + j];
                let b = values[i + j + half];
                values[i + j] = (a + b) * 0.5;
                values[i + j + half] = (a - b) * inv_twiddles[j] * 0.5;
            }
        }
    }

    pub fn forward(&self, values: &mut [Complex64]) {
        bit_reverse_permute(values);
        let mut len = 2;
        while len <= self.n {
            self.layer(values, len);
            len *= 2;
        }
    }

    pub fn inverse(&self, values: &mut [Complex64]) {
        let mut len = self.n;
        while len >= 2 {
            self.inv_layer(values, len);
            len /= 2;
        }
        bit_reverse_permute(values);
    }
}

///
/// Computes `z_i = sum_j w_j xi^(5^i j)` in place, see [`SpecialDFT`].
///
pub fn special_dft(values: &mut [Complex64]) {
    SpecialDFT::new(values.len()).forward(values)
}

pub fn inv_special_dft(values: &mut [Complex64]) {
    SpecialDFT::new(values.len()).inverse(values)
}

///
/// Computes the integer polynomial `round(scale * m)` of degree `< ring_dimension`, where `m`
/// is the unique real polynomial in `X^(N / 2n)` of degree `< N` with `m(xi^(5^i)) = values[i]`
/// for `xi = exp(2 pi i / 4n)` and all slots `i < n`.
/// Missing values are filled with zeros.
///
pub fn encode_coefficients(values: &[Complex64], slots: usize, ring_dimension: usize, scale: f64) -> Result<Vec<i128>> {
    if !slots.is_power_of_two() || 2 * slots > ring_dimension {
        return Err(CkksError::InvalidParameters(format!("slot count {} must be a power of two of size at most {}", slots, ring_dimension / 2)));
    }
    if values.len() > slots {
        return Err(CkksError::Mismatch(format!("cannot encode {} values into {} slots", values.len(), slots)));
    }
    let mut w = values.to_vec();
    w.resize(slots, Complex64::new(0., 0.));
    inv_special_dft(&mut w);

    let gap = ring_dimension / (2 * slots);
    let mut result = vec![0i128; ring_dimension];
    let bound = 2f64.powi(120);
    for j in 0..slots {
        for (index, value) in [(j * gap, w[j].re), ((j + slots) * gap, w[j].im)] {
            let scaled = (value * scale).round();
            if !scaled.is_finite() || scaled.abs() >= bound {
                return Err(CkksError::InvalidParameters(format!("value {} is too large to encode at scaling factor 2^{:.2}", value, scale.log2())));
            }
            result[index] = scaled as i128;
        }
    }
    return Ok(result);
}

///
/// Inverse of [`encode_coefficients()`], given the (real) coefficients of the polynomial. Only
/// the coefficients at multiples of `N / 2n` are used.
///
pub fn decode_coefficients(coefficients: &[f64], slots: usize, scale: f64) -> Vec<Complex64> {
    let ring_dimension = coefficients.len();
    assert!(slots.is_power_of_two() && 2 * slots <= ring_dimension);
    let gap = ring_dimension / (2 * slots);
    let mut w = (0..slots).map(|j| Complex64::new(coefficients[j * gap], coefficients[(j + slots) * gap]) / scale).collect::<Vec<_>>();
    special_dft(&mut w);
    return w;
}

///
/// Returns `5^e mod modulus`.
///
#[cfg(test)]
fn pow5_mod(e: usize, modulus: usize) -> usize {
    let mut result = 1 % modulus;
    for _ in 0..e {
        result = result * 5 % modulus;
    }
    return result;
}

#[cfg(test)]
fn naive_evaluation(coefficients: &[f64], slots: usize, scale: f64) -> Vec<Complex64> {
    let N = coefficients.len();
    (0..slots).map(|i| {
        let e = pow5_mod(i, 2 * N);
        (0..N).map(|k| coefficients[k] * root_of_unity_pow(e * k, 2 * N)).sum::<Complex64>() / scale
    }).collect()
}

#[test]
fn test_special_dft_matches_definition() {
    let n = 8;
    let w = (0..n).map(|j| Complex64::new(j as f64 * 0.5 - 1., 0.25 * (j * j) as f64)).collect::<Vec<_>>();
    let mut actual = w.clone();
    special_dft(&mut actual);
    for i in 0..n {
        let e = pow5_mod(i, 4 * n);
        let expected = (0..n).map(|j| w[j] * root_of_unity_pow(e * j, 4 * n)).sum::<Complex64>();
        assert!((expected - actual[i]).norm() < 1e-9);
    }
    inv_special_dft(&mut actual);
    for j in 0..n {
        assert!((w[j] - actual[j]).norm() < 1e-9);
    }
}

#[test]
fn test_special_dft_twiddles() {
    let dft = SpecialDFT::new(16);
    assert_eq!(16, dft.len());
    for k in 0..4 {
        let len = 2 << k;
        assert_eq!(len / 2, dft.twiddles[k].len());
        for j in 0..(len / 2) {
            let expected = root_of_unity_pow(pow5_mod(j, 4 * len), 4 * len);
            assert!((expected - dft.twiddles[k][j]).norm() < 1e-12);
            assert!((dft.twiddles[k][j] * dft.inv_twiddles[k][j] - Complex64::new(1., 0.)).norm() < 1e-12);
        }
    }
    let w = (0..16).map(|j| Complex64::new(0.125 * j as f64, -0.5)).collect::<Vec<_>>();
    let mut values = w.clone();
    dft.layer(&mut values, 4);
    dft.inv_layer(&mut values, 4);
    for j in 0..16 {
        assert!((w[j] - values[j]).norm() < 1e-12);
    }
}

#[test]
fn test_encode_evaluates_to_slots() {
    let N = 32;
    let scale = 2f64.powi(30);
    for slots in [1, 4, 16] {
        let values = (0..slots).map(|i| Complex64::new(0.1 * i as f64 - 0.3, 0.05 * i as f64)).collect::<Vec<_>>();
        let coefficients = encode_coefficients(&values, slots, N, scale).unwrap();
        let gap = N / (2 * slots);
        assert!(coefficients.iter().enumerate().all(|(k, c)| k % gap == 0 || *c == 0));
        let as_float = coefficients.iter().map(|c| *c as f64).collect::<Vec<_>>();
        let evaluated = naive_evaluation(&as_float, slots, scale);
        let decoded = decode_coefficients(&as_float, slots, scale);
        for i in 0..slots {
            assert!((evaluated[i] - values[i]).norm() < 1e-7);
            assert!((decoded[i] - values[i]).norm() < 1e-7);
        }
    }
}

#[test]
fn test_encode_invalid_slots() {
    let values = [Complex64::new(1., 0.); 4];
    assert!(encode_coefficients(&values, 3, 32, 1024.).is_err());
    assert!(encode_coefficients(&values, 32, 32, 1024.).is_err());
    assert!(encode_coefficients(&values, 2, 32, 1024.).is_err());
}
