//! Binomial coefficient table used by the relocation series.

/// Lower-triangular table `B[n][k] = C(n, k)` for `0 ≤ k ≤ n < max_n`.
///
/// Entries above the diagonal are zero. Values are `f64`; with the default
/// `max_n = 51` the largest entry is C(50, 25) ≈ 1.26e14, well within range.
#[derive(Clone, Debug, PartialEq)]
pub struct BinomialTable {
    max_n: usize,
    values: Vec<f64>,
}

impl BinomialTable {
    pub fn build(max_n: usize) -> Self {
        let mut values = vec![0.0f64; max_n * max_n];
        for n in 0..max_n {
            let row = &mut values[n * max_n..(n + 1) * max_n];
            row[0] = 1.0;
            for k in 1..=n {
                row[k] = row[k - 1] * (n - k + 1) as f64 / k as f64;
            }
        }
        Self { max_n, values }
    }

    pub fn max_n(&self) -> usize {
        self.max_n
    }

    /// `C(n, k)`, or 0 outside the table.
    pub fn get(&self, n: usize, k: usize) -> f64 {
        if n >= self.max_n || k >= self.max_n {
            return 0.0;
        }
        self.values[n * self.max_n + k]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edges_are_one() {
        let t = BinomialTable::build(51);
        for n in 0..51 {
            assert_eq!(t.get(n, 0), 1.0);
            assert_eq!(t.get(n, n), 1.0);
        }
    }

    #[test]
    fn test_known_values() {
        let t = BinomialTable::build(51);
        assert_eq!(t.get(5, 2), 10.0);
        assert_eq!(t.get(10, 3), 120.0);
        assert_eq!(t.get(50, 25), 126_410_606_437_752.0);
        assert_eq!(t.get(3, 4), 0.0, "above the diagonal");
        assert_eq!(t.get(51, 0), 0.0, "outside the table");
    }

    #[test]
    fn test_pascal_rule() {
        let t = BinomialTable::build(30);
        for n in 1..30 {
            for k in 1..n {
                assert_eq!(t.get(n, k), t.get(n - 1, k - 1) + t.get(n - 1, k));
            }
        }
    }

    #[test]
    fn test_build_is_deterministic() {
        assert_eq!(BinomialTable::build(51), BinomialTable::build(51));
    }
}
