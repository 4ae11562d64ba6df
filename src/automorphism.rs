use feanor_math::ring::*;

use crate::error::{CkksError, Result};
use crate::rns::{Format, RnsModulus, RnsPoly};

///
/// Returns the Galois element `k` such that the automorphism `X -> X^k` of
/// `Z[X]/(X^(M/2) + 1)` rotates the slots by `rotation` positions to the left.
/// Negative rotations rotate to the right.
///
pub fn find_automorphism_index(rotation: i64, cyclotomic_order: usize) -> usize {
    assert!(cyclotomic_order >= 8 && cyclotomic_order.is_power_of_two());
    // 5 generates a subgroup of order M/4 of (Z/MZ)*
    let group_order = (cyclotomic_order / 4) as i64;
    let e = rotation.rem_euclid(group_order) as usize;
    let mut result = 1;
    for _ in 0..e {
        result = result * 5 % cyclotomic_order;
    }
    return result;
}

///
/// The Galois element of complex conjugation on the slots.
///
pub fn conjugation_index(cyclotomic_order: usize) -> usize {
    cyclotomic_order - 1
}

///
/// Computes the permutation `map` such that applying `X -> X^k` to an element in evaluation
/// format is given by `out[j] = in[map[j]]`.
///
/// The `j`-th evaluation is at `zeta^(e_j)` with `e_j = evaluation_exponents[j]`, and since
/// `sigma_k(a)(zeta^e) = a(zeta^(e k))`, we have to find the position of `e_j k mod M`.
///
pub fn precompute_auto_map(evaluation_exponents: &[usize], k: usize) -> Result<Vec<usize>> {
    let M = 2 * evaluation_exponents.len();
    if k % 2 == 0 || k >= M {
        return Err(CkksError::InvalidParameters(format!("{} is not a unit modulo {}", k, M)));
    }
    let mut position = vec![usize::MAX; M];
    for (j, e) in evaluation_exponents.iter().enumerate() {
        position[*e] = j;
    }
    return evaluation_exponents.iter().map(|e| {
        let target = position[e * k % M];
        if target == usize::MAX {
            Err(CkksError::InvalidParameters(format!("evaluation exponents are not the odd residues modulo {}", M)))
        } else {
            Ok(target)
        }
    }).collect();
}

///
/// Applies the automorphism `X -> X^k`. In evaluation format, this is the permutation
/// given by `map` (as computed by [`precompute_auto_map()`]), in coefficient format it is
/// the signed permutation `X^i -> (-1)^(ik div N) X^(ik mod N)`.
///
pub fn apply_automorphism(table: &[RnsModulus], x: &RnsPoly, k: usize, map: &[usize]) -> RnsPoly {
    let N = x.ring_dimension();
    let mut result = x.clone();
    match x.format() {
        Format::Evaluation => {
            assert_eq!(N, map.len());
            result.map_towers(|_, tower| {
                let input = tower.clone();
                for j in 0..N {
                    tower[j] = input[map[j]];
                }
            });
        },
        Format::Coefficient => {
            result.map_towers(|m, tower| {
                let Zp = table[m].ring();
                let input = tower.clone();
                for i in 0..N {
                    let target = i * k % (2 * N);
                    if target >= N {
                        tower[target - N] = Zp.negate(input[i]);
                    } else {
                        tower[target] = input[i];
                    }
                }
            });
        }
    }
    return result;
}

#[cfg(test)]
use num_complex::Complex64;
#[cfg(test)]
use crate::encoding::{decode_coefficients, encode_coefficients};
#[cfg(test)]
use crate::rns::test_table;

#[test]
fn test_find_automorphism_index() {
    assert_eq!(1, find_automorphism_index(0, 128));
    assert_eq!(5, find_automorphism_index(1, 128));
    assert_eq!(25, find_automorphism_index(2, 128));
    assert_eq!(5 * find_automorphism_index(-1, 128) % 128, 1);
    assert_eq!(find_automorphism_index(3, 128), find_automorphism_index(35, 128));
    assert_eq!(127, conjugation_index(128));
}

#[test]
fn test_precompute_auto_map_invalid() {
    assert!(precompute_auto_map(&[1, 3, 5, 7], 4).is_err());
    assert!(precompute_auto_map(&[1, 3, 5, 7], 9).is_err());
}

#[test]
fn test_automorphism_rotates_slots() {
    let N = 32;
    let slots = 16;
    let table = test_table(5, 1);
    let scale = 2f64.powi(16);
    let values = (0..slots).map(|i| Complex64::new(0.05 * i as f64, -0.02 * i as f64)).collect::<Vec<_>>();
    let poly = RnsPoly::from_coefficients(&table, vec![0], &encode_coefficients(&values, slots, N, scale).unwrap());
    let exponents = table[0].ntt().evaluation_exponents().unwrap();

    for rotation in [1i64, 3, -2] {
        let k = find_automorphism_index(rotation, 2 * N);
        let rotated = apply_automorphism(&table, &poly, k, &[]);
        let decoded = decode_coefficients(&rotated.centered_tower_coefficients(&table, 0).iter().map(|c| *c as f64).collect::<Vec<_>>(), slots, scale);
        for i in 0..slots {
            let expected = values[(i as i64 + rotation).rem_euclid(slots as i64) as usize];
            assert!((decoded[i] - expected).norm() < 1e-3);
        }

        let map = precompute_auto_map(&exponents, k).unwrap();
        let via_evaluation = apply_automorphism(&table, &poly.clone().in_format(&table, Format::Evaluation), k, &map).in_format(&table, Format::Coefficient);
        assert_eq!(rotated.centered_tower_coefficients(&table, 0), via_evaluation.centered_tower_coefficients(&table, 0));
    }

    let conjugated = apply_automorphism(&table, &poly, conjugation_index(2 * N), &[]);
    let decoded = decode_coefficients(&conjugated.centered_tower_coefficients(&table, 0).iter().map(|c| *c as f64).collect::<Vec<_>>(), slots, scale);
    for i in 0..slots {
        assert!((decoded[i] - values[i].conj()).norm() < 1e-3);
    }
}
