use num_complex::Complex64;

use crate::encoding::SpecialDFT;

///
/// The number of levels that the coefficients-to-slots resp. slots-to-coefficients transform
/// actually consumes for the given slot count; we can use at most one level per butterfly
/// layer, and always need at least one level.
///
pub fn effective_level_budget(level_budget: usize, slots: usize) -> usize {
    let layers = slots.trailing_zeros() as usize;
    level_budget.clamp(1, layers.max(1))
}

///
/// Splits the layers `0..layers` into `groups` contiguous groups, where the first groups
/// are larger if the layers cannot be evenly distributed.
///
fn split_layers(layers: usize, groups: usize) -> Vec<std::ops::Range<usize>> {
    let small = layers / groups;
    let large_count = layers % groups;
    let mut result = Vec::with_capacity(groups);
    let mut current = 0;
    for i in 0..groups {
        let size = if i < large_count { small + 1 } else { small };
        result.push(current..(current + size));
        current += size;
    }
    return result;
}

fn matrix_of<F>(n: usize, scale: f64, f: F) -> Vec<Vec<Complex64>>
    where F: Fn(&mut [Complex64])
{
    let mut result = vec![vec![Complex64::new(0., 0.); n]; n];
    for j in 0..n {
        let mut column = vec![Complex64::new(0., 0.); n];
        column[j] = Complex64::new(scale, 0.);
        f(&mut column);
        for i in 0..n {
            result[i][j] = column[i];
        }
    }
    return result;
}

///
/// The matrices of the coefficients-to-slots transform, in the order in which they are applied.
/// Their product is `scale` times the inverse of the butterfly layers of the special DFT, i.e.
/// it maps the slots `z = S BR w` to `scale BR w`, so the coefficients of the encoded polynomial
/// end up in bitreversed order.
///
pub fn coeffs_to_slots_matrices(slots: usize, level_budget: usize, scale: f64) -> Vec<Vec<Vec<Complex64>>> {
    let layers = slots.trailing_zeros() as usize;
    let budget = effective_level_budget(level_budget, slots);
    // applied in the order len = n, n/2, ..., 2
    let layer_lens = (0..layers).map(|i| slots >> i).collect::<Vec<_>>();
    let dft = SpecialDFT::new(slots);
    split_layers(layers, budget).into_iter().enumerate().map(|(group_index, group)| {
        let lens = &layer_lens[group];
        matrix_of(slots, if group_index == 0 { scale } else { 1. }, |x| for len in lens {
            dft.inv_layer(x, *len);
        })
    }).collect()
}

///
/// The matrices of the slots-to-coefficients transform, in the order in which they are applied,
/// i.e. the inverse of [`coeffs_to_slots_matrices()`] up to scaling.
///
pub fn slots_to_coeffs_matrices(slots: usize, level_budget: usize, scale: f64) -> Vec<Vec<Vec<Complex64>>> {
    let layers = slots.trailing_zeros() as usize;
    let budget = effective_level_budget(level_budget, slots);
    // applied in the order len = 2, 4, ..., n
    let layer_lens = (0..layers).map(|i| 2 << i).collect::<Vec<_>>();
    let dft = SpecialDFT::new(slots);
    split_layers(layers, budget).into_iter().enumerate().map(|(group_index, group)| {
        let lens = &layer_lens[group];
        matrix_of(slots, if group_index == 0 { scale } else { 1. }, |x| for len in lens {
            dft.layer(x, *len);
        })
    }).collect()
}

#[cfg(test)]
use crate::encoding::inv_special_dft;

#[cfg(test)]
fn apply_all(matrices: &[Vec<Vec<Complex64>>], x: &[Complex64]) -> Vec<Complex64> {
    let mut current = x.to_vec();
    for matrix in matrices {
        current = matrix.iter().map(|row| row.iter().zip(current.iter()).map(|(a, b)| a * b).sum()).collect();
    }
    return current;
}

#[test]
fn test_effective_level_budget() {
    assert_eq!(1, effective_level_budget(3, 1));
    assert_eq!(1, effective_level_budget(0, 32));
    assert_eq!(3, effective_level_budget(3, 32));
    assert_eq!(5, effective_level_budget(7, 32));
    assert_eq!(vec![0..2, 2..4, 4..5], split_layers(5, 3));
    assert_eq!(vec![0..0], split_layers(0, 1));
}

#[test]
fn test_dft_matrices() {
    for (slots, budget) in [(1, 1), (8, 1), (8, 2), (16, 3), (32, 5)] {
        let cts = coeffs_to_slots_matrices(slots, budget, 0.5);
        let stc = slots_to_coeffs_matrices(slots, budget, 2.);
        assert_eq!(effective_level_budget(budget, slots), cts.len());
        assert_eq!(effective_level_budget(budget, slots), stc.len());

        let x = (0..slots).map(|i| Complex64::new(i as f64 - 0.5, 0.25 * i as f64)).collect::<Vec<_>>();
        let round_trip = apply_all(&stc, &apply_all(&cts, &x));
        for i in 0..slots {
            assert!((round_trip[i] - x[i]).norm() < 1e-9);
        }

        // coefficients-to-slots yields the preimage under the special DFT in bitreversed order
        let mut expected = x.clone();
        inv_special_dft(&mut expected);
        let actual = apply_all(&cts, &x);
        let log2_n = slots.trailing_zeros();
        for i in 0..slots {
            let j = if slots == 1 { 0 } else { i.reverse_bits() >> (usize::BITS - log2_n) };
            assert!((actual[i] * 2. - expected[j]).norm() < 1e-9);
        }
    }
}
