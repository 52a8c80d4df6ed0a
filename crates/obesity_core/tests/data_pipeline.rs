//! Integration tests for the data source, stratified split and transform
//!
//! Covers partition disjointness, per-class proportions, reproducibility
//! and training/inference parity of the fitted transform, including
//! property checks for repeatable encoding and unseen categories.

use anyhow::Result;
use obesity_core::synthetic::{cohort, CohortSpec};
use obesity_core::{
    load_csv, split, Dataset, FeatureTransformer, FieldSpec, ObesityLevel, RawTable, Record,
    Schema, SplitRatios, Train, TransformConfig, Value, DEFAULT_TARGET_COLUMN,
    UNKNOWN_CATEGORY_CODE,
};
use proptest::prelude::*;
use std::collections::BTreeSet;
use tempfile::NamedTempFile;

/// Table with a unique `Row` id per record so partitions can be compared.
fn indexed_table(counts: &[usize; 4]) -> RawTable {
    let schema = Schema::new(vec![FieldSpec::numeric("Row"), FieldSpec::categorical("Gender")])
        .expect("schema");
    let mut records = Vec::new();
    let mut labels = Vec::new();
    for (level, count) in ObesityLevel::ALL.iter().zip(counts) {
        for _ in 0..*count {
            let row = records.len() as f64;
            records.push(
                Record::new()
                    .with("Row", row)
                    .with("Gender", if row as u64 % 2 == 0 { "Male" } else { "Female" }),
            );
            labels.push(*level);
        }
    }
    RawTable::new(schema, records, labels).expect("table")
}

const COLOURS: [&str; 3] = ["red", "green", "blue"];

/// Training partition of a numeric/categorical table with missing cells.
fn mixed_train(cells: &[(Option<f64>, Option<&str>)]) -> Dataset<Train> {
    let schema = Schema::new(vec![FieldSpec::numeric("Score"), FieldSpec::categorical("Colour")])
        .expect("schema");
    let records = cells
        .iter()
        .map(|(score, colour)| {
            Record::new()
                .with("Score", score.map_or(Value::Missing, Value::Number))
                .with("Colour", colour.map_or(Value::Missing, Value::from))
        })
        .collect();
    let labels = (0..cells.len())
        .map(|i| ObesityLevel::ALL[i % ObesityLevel::ALL.len()])
        .collect();
    let table = RawTable::new(schema, records, labels).expect("table");
    let ratios = SplitRatios::new(1.0, 0.0, 0.0).expect("ratios");
    split(&table, ratios, 7).expect("split").train
}

fn mixed_cells() -> impl Strategy<Value = Vec<(Option<f64>, Option<&'static str>)>> {
    prop::collection::vec(
        (
            prop::option::of(-1.0e3f64..1.0e3),
            prop::option::of(prop::sample::select(COLOURS.to_vec())),
        ),
        1..40,
    )
}

fn row_ids(records: &[Record]) -> BTreeSet<u64> {
    records
        .iter()
        .map(|r| r.get("Row").and_then(Value::as_number).expect("row id") as u64)
        .collect()
}

#[test]
fn test_split_preserves_class_proportions_on_reference_cohort() -> Result<()> {
    let table = cohort(&CohortSpec::new(
        &[
            (ObesityLevel::Normal, 40),
            (ObesityLevel::Overweight, 30),
            (ObesityLevel::Obese, 20),
            (ObesityLevel::Underweight, 10),
        ],
        42,
    ))?;

    let parts = split(&table, SplitRatios::new(0.7, 0.15, 0.15)?, 42)?;
    let train = parts.train.class_counts();

    for (level, expected) in [
        (ObesityLevel::Normal, 28i64),
        (ObesityLevel::Overweight, 21),
        (ObesityLevel::Obese, 14),
        (ObesityLevel::Underweight, 7),
    ] {
        let got = train.get(&level).copied().unwrap_or(0) as i64;
        assert!((got - expected).abs() <= 1, "{level}: {got} vs {expected}");
    }
    assert_eq!(
        parts.train.len() + parts.validation.len() + parts.holdout.len(),
        100
    );
    Ok(())
}

#[test]
fn test_load_csv_from_file_then_fit() -> Result<()> {
    let table = cohort(
        &CohortSpec::new(&[(ObesityLevel::Normal, 30), (ObesityLevel::Obese, 30)], 5)
            .with_lifestyle(),
    )?;
    let file = NamedTempFile::new()?;
    table.write_csv(file.reopen()?, DEFAULT_TARGET_COLUMN)?;

    let loaded = load_csv(file.path(), DEFAULT_TARGET_COLUMN)?;
    assert_eq!(loaded.schema(), table.schema());
    assert_eq!(loaded.len(), 60);

    let parts = split(&loaded, SplitRatios::default(), 42)?;
    let state = FeatureTransformer::fit(&parts.train, &TransformConfig::default())?;
    assert_eq!(state.columns.len(), table.schema().len() + 2);

    // Same records through the same state give the same matrix.
    let a = state.apply(parts.validation.records())?;
    let b = FeatureTransformer::apply(&state, parts.validation.records())?;
    assert_eq!(a, b);
    Ok(())
}

#[test]
fn test_transform_depends_only_on_train_partition() -> Result<()> {
    let table = cohort(&CohortSpec::new(
        &[(ObesityLevel::Normal, 50), (ObesityLevel::Overweight, 50)],
        8,
    ))?;
    let first = split(&table, SplitRatios::default(), 1)?;
    let second = split(&table, SplitRatios::default(), 1)?;

    let a = FeatureTransformer::fit(&first.train, &TransformConfig::default())?;
    let b = FeatureTransformer::fit(&second.train, &TransformConfig::default())?;
    assert_eq!(a.version, b.version);
    assert_eq!(a.columns, b.columns);

    let other = split(&table, SplitRatios::default(), 2)?;
    let c = FeatureTransformer::fit(&other.train, &TransformConfig::default())?;
    assert_ne!(a.version, c.version);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn split_partitions_are_disjoint_and_complete(
        counts in prop::array::uniform4(0usize..40),
        seed in any::<u64>(),
    ) {
        prop_assume!(counts.iter().sum::<usize>() > 0);
        let table = indexed_table(&counts);
        let parts = split(&table, SplitRatios::default(), seed).expect("split");

        let train = row_ids(parts.train.records());
        let validation = row_ids(parts.validation.records());
        let holdout = row_ids(parts.holdout.records());

        prop_assert!(train.is_disjoint(&validation));
        prop_assert!(train.is_disjoint(&holdout));
        prop_assert!(validation.is_disjoint(&holdout));
        prop_assert_eq!(train.len() + validation.len() + holdout.len(), table.len());
    }

    #[test]
    fn split_class_shares_within_one_record(
        counts in prop::array::uniform4(0usize..60),
        seed in any::<u64>(),
        train_pct in 10u32..=80,
    ) {
        prop_assume!(counts.iter().sum::<usize>() > 0);
        let train_ratio = train_pct as f64 / 100.0;
        let rest = (1.0 - train_ratio) / 2.0;
        let ratios = SplitRatios::new(train_ratio, rest, 1.0 - train_ratio - rest).expect("ratios");
        let table = indexed_table(&counts);
        let parts = split(&table, ratios, seed).expect("split");

        let train = parts.train.class_counts();
        let validation = parts.validation.class_counts();
        for (level, n) in ObesityLevel::ALL.iter().zip(counts) {
            let got = train.get(level).copied().unwrap_or(0) as f64;
            prop_assert!((got - n as f64 * ratios.train).abs() <= 1.0);
            let got = validation.get(level).copied().unwrap_or(0) as f64;
            prop_assert!((got - n as f64 * ratios.validation).abs() <= 1.0);
        }
    }

    #[test]
    fn split_is_reproducible_for_a_seed(
        counts in prop::array::uniform4(1usize..25),
        seed in any::<u64>(),
    ) {
        let table = indexed_table(&counts);
        let a = split(&table, SplitRatios::default(), seed).expect("split");
        let b = split(&table, SplitRatios::default(), seed).expect("split");
        prop_assert_eq!(row_ids(a.train.records()), row_ids(b.train.records()));
        prop_assert_eq!(row_ids(a.validation.records()), row_ids(b.validation.records()));
        prop_assert_eq!(row_ids(a.holdout.records()), row_ids(b.holdout.records()));
    }

    #[test]
    fn transform_apply_is_bit_identical(cells in mixed_cells()) {
        let train = mixed_train(&cells);
        let state = FeatureTransformer::fit(&train, &TransformConfig::default()).expect("fit");

        let a = state.apply(train.records()).expect("apply");
        let b = state.apply(train.records()).expect("apply");
        prop_assert_eq!(&a.columns, &b.columns);
        prop_assert_eq!(a.rows.len(), train.len());
        for (x, y) in a.rows.iter().zip(&b.rows) {
            prop_assert_eq!(x.len(), y.len());
            for (u, v) in x.iter().zip(y) {
                prop_assert!(u.is_finite());
                prop_assert_eq!(u.to_bits(), v.to_bits());
            }
        }
    }

    #[test]
    fn unseen_category_encodes_to_unknown_code(
        cells in mixed_cells(),
        pick in any::<prop::sample::Index>(),
        suffix in "[a-z]{1,8}",
    ) {
        let train = mixed_train(&cells);
        let state = FeatureTransformer::fit(&train, &TransformConfig::default()).expect("fit");
        let column = state
            .column_names()
            .iter()
            .position(|c| c == "Colour")
            .expect("colour column");

        let mut records = train.records().to_vec();
        let target = pick.index(records.len());
        records[target].insert("Colour", Value::Text(format!("unseen-{suffix}")));

        let matrix = state.apply(&records).expect("unseen level never raises");
        prop_assert_eq!(matrix.rows[target][column], UNKNOWN_CATEGORY_CODE);
        for (i, (row, record)) in matrix.rows.iter().zip(&records).enumerate() {
            if i != target && record.get("Colour").and_then(Value::as_text).is_some() {
                prop_assert!(row[column] >= 0.0);
            }
        }
    }
}
