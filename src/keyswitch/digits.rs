use std::ops::Range;

use serde::{Deserialize, Serialize};

///
/// A decomposition of the chain towers `0..towers` into contiguous ranges, which we
/// call digits.
///
/// The hybrid key switching gadget vector is of the form
/// ```text
///   g[i] = 1 mod q_j  if j in digits[i]
///   g[i] = 0 mod q_j  otherwise
/// ```
/// so a polynomial `x` is decomposed into `x mod Q_i` with `Q_i` the product of the primes
/// of digit `i`.
///
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitDecomposition {
    digit_boundaries: Vec<usize>
}

impl DigitDecomposition {

    ///
    /// Computes a balanced decomposition of `0..towers` into `digits` digits. If the
    /// towers cannot be evenly distributed, the first digits are larger.
    ///
    /// # Example
    /// ```
    /// # use ckks_boot::keyswitch::digits::DigitDecomposition;
    /// let digits = DigitDecomposition::select_digits(3, 10);
    /// assert_eq!(3, digits.len());
    /// assert_eq!(0..4, digits.at(0));
    /// assert_eq!(4..7, digits.at(1));
    /// assert_eq!(7..10, digits.at(2));
    /// ```
    ///
    pub fn select_digits(digits: usize, towers: usize) -> Self {
        assert!(digits > 0);
        assert!(digits <= towers, "the number of digits may not exceed the number of towers");
        let moduli_per_small_digit = towers / digits;
        let large_digits = towers % digits;
        let small_digits = digits - large_digits;
        let mut result = Vec::with_capacity(digits);
        let mut current = 0;
        for _ in 0..large_digits {
            current += moduli_per_small_digit + 1;
            result.push(current);
        }
        for _ in 0..small_digits {
            current += moduli_per_small_digit;
            result.push(current);
        }
        return Self { digit_boundaries: result };
    }

    pub fn len(&self) -> usize {
        self.digit_boundaries.len()
    }

    pub fn total_towers(&self) -> usize {
        *self.digit_boundaries.last().unwrap_or(&0)
    }

    pub fn at(&self, i: usize) -> Range<usize> {
        let start = if i == 0 { 0 } else { self.digit_boundaries[i - 1] };
        start..self.digit_boundaries[i]
    }

    pub fn iter<'a>(&'a self) -> impl 'a + Iterator<Item = Range<usize>> {
        (0..self.len()).map(move |i| self.at(i))
    }

    ///
    /// Returns the digits of an element that only has the first `towers` towers left,
    /// i.e. each digit intersected with `0..towers`. Digits that become empty are
    /// returned as empty ranges, so that indices still match the switching key.
    ///
    pub fn restrict_to(&self, towers: usize) -> Vec<Range<usize>> {
        self.iter().map(|digit| digit.start.min(towers)..digit.end.min(towers)).collect()
    }
}

#[test]
fn test_select_digits() {
    let digits = DigitDecomposition::select_digits(3, 15);
    assert_eq!(vec![0..5, 5..10, 10..15], digits.iter().collect::<Vec<_>>());
    let digits = DigitDecomposition::select_digits(4, 6);
    assert_eq!(vec![0..2, 2..4, 4..5, 5..6], digits.iter().collect::<Vec<_>>());
    assert_eq!(6, digits.total_towers());
}

#[test]
fn test_restrict_digits() {
    let digits = DigitDecomposition::select_digits(3, 10);
    assert_eq!(vec![0..4, 4..5, 5..5], digits.restrict_to(5));
    assert_eq!(vec![0..1, 1..1, 1..1], digits.restrict_to(1));
}
