//! 学習用／テスト用への分割
//!
//! インデックスを固定シードでシャッフルし、先頭 `round(n * test_fraction)` 件をテスト用にします。
//! 各サブセット内では入力順を保ちます。

use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{Result, WasteError};
use crate::types::{LabeledImageRecord, TrainTestSplit};

/// 既定のテスト割合
pub const DEFAULT_TEST_FRACTION: f64 = 0.2;

/// 既定のシード
pub const DEFAULT_SEED: u64 = 1;

/// テスト件数を求める
fn test_len(total: usize, test_fraction: f64) -> usize {
    ((total as f64) * test_fraction).round() as usize
}

/// レコード列を学習用とテスト用に分割
pub fn train_test_split(
    records: &[LabeledImageRecord],
    test_fraction: f64,
    seed: u64,
) -> Result<TrainTestSplit> {
    if !(0.0..=1.0).contains(&test_fraction) {
        return Err(WasteError::Config(format!(
            "test fraction must be within [0, 1], got {}",
            test_fraction
        )));
    }

    let mut indices: Vec<usize> = (0..records.len()).collect();
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let mut is_test = vec![false; records.len()];
    for &idx in indices.iter().take(test_len(records.len(), test_fraction)) {
        is_test[idx] = true;
    }

    let mut split = TrainTestSplit::default();
    for (record, test) in records.iter().zip(is_test) {
        if test {
            split.test.push(record.clone());
        } else {
            split.train.push(record.clone());
        }
    }

    Ok(split)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn records(n: usize) -> Vec<LabeledImageRecord> {
        (0..n)
            .map(|i| {
                let label = if i % 2 == 0 { "plastic" } else { "glass" };
                LabeledImageRecord::new(format!("WasteDataset/{}/{}.jpg", label, i), label)
            })
            .collect()
    }

    #[test]
    fn test_split_is_deterministic() {
        let input = records(57);
        let a = train_test_split(&input, 0.2, 1).unwrap();
        let b = train_test_split(&input, 0.2, 1).unwrap();
        assert_eq!(a.train, b.train);
        assert_eq!(a.test, b.test);

        let c = train_test_split(&input, 0.2, 2).unwrap();
        assert_ne!(a.test, c.test);
    }

    #[test]
    fn test_split_is_a_partition() {
        let input = records(50);
        let split = train_test_split(&input, 0.2, 1).unwrap();

        assert_eq!(split.test.len(), 10);
        assert_eq!(split.train.len(), 40);

        let train: HashSet<_> = split.train.iter().collect();
        let test: HashSet<_> = split.test.iter().collect();
        assert!(train.is_disjoint(&test));

        let union: HashSet<_> = train.union(&test).cloned().collect();
        let all: HashSet<_> = input.iter().collect();
        assert_eq!(union, all);
    }

    #[test]
    fn test_subsets_keep_input_order() {
        let input = records(20);
        let split = train_test_split(&input, 0.3, 1).unwrap();
        let position = |r: &LabeledImageRecord| input.iter().position(|x| x == r).unwrap();

        let train_pos: Vec<_> = split.train.iter().map(position).collect();
        assert!(train_pos.windows(2).all(|w| w[0] < w[1]));
        let test_pos: Vec<_> = split.test.iter().map(position).collect();
        assert!(test_pos.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_edge_fractions() {
        let input = records(2);
        let split = train_test_split(&input, 0.2, 1).unwrap();
        assert_eq!(split.test.len(), 0);
        assert_eq!(split.train.len(), 2);

        let split = train_test_split(&[], 0.2, 1).unwrap();
        assert!(split.train.is_empty() && split.test.is_empty());

        assert!(matches!(
            train_test_split(&input, 1.5, 1),
            Err(WasteError::Config(_))
        ));
    }
}
