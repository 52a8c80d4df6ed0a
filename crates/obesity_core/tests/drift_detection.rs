//! Drift detection against a captured training reference

use anyhow::Result;
use obesity_core::drift::DEFAULT_REFERENCE_BINS;
use obesity_core::synthetic::{cohort, CohortSpec};
use obesity_core::{
    split, DriftValidator, DriftVerdict, ObesityLevel, Record, ReferenceProfile, SplitRatios, Value,
};

fn reference_split() -> Result<obesity_core::Split> {
    let table = cohort(
        &CohortSpec::new(
            &[
                (ObesityLevel::Underweight, 60),
                (ObesityLevel::Normal, 120),
                (ObesityLevel::Overweight, 90),
                (ObesityLevel::Obese, 80),
            ],
            42,
        )
        .with_lifestyle(),
    )?;
    Ok(split(&table, SplitRatios::default(), 42)?)
}

fn mean_std(records: &[Record], field: &str) -> (f64, f64) {
    let values: Vec<f64> = records
        .iter()
        .filter_map(|r| r.get(field).and_then(Value::as_number))
        .collect();
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

#[test]
fn test_weight_shift_of_three_sigma_is_detected() -> Result<()> {
    let parts = reference_split()?;
    let reference = ReferenceProfile::capture(&parts.train, DEFAULT_REFERENCE_BINS);
    let (mean, std) = mean_std(parts.train.records(), "Weight");

    let batch: Vec<Record> = parts
        .holdout
        .records()
        .iter()
        .map(|r| {
            let mut shifted = r.clone();
            let w = r.get("Weight").and_then(Value::as_number).unwrap_or(mean);
            shifted.insert("Weight", Value::Number(w + 3.0 * std));
            shifted
        })
        .collect();

    let report = DriftValidator::default().check(&reference, &batch);
    assert_eq!(report.verdict, DriftVerdict::DriftDetected);
    let weight = report.feature("Weight").expect("weight scored");
    assert!(weight.drifted, "weight score {}", weight.score);
    assert!(weight.observed_mean.unwrap_or(0.0) > weight.reference_mean.unwrap_or(0.0));
    Ok(())
}

#[test]
fn test_training_rows_show_no_drift() -> Result<()> {
    let parts = reference_split()?;
    let reference = ReferenceProfile::capture(&parts.train, DEFAULT_REFERENCE_BINS);

    let report = DriftValidator::default().check(&reference, parts.train.records());
    assert_eq!(report.verdict, DriftVerdict::NoDrift);
    assert_eq!(report.n_drifted, 0);
    Ok(())
}

#[test]
fn test_categorical_rows_summarize_both_sides() -> Result<()> {
    let parts = reference_split()?;
    let reference = ReferenceProfile::capture(&parts.train, DEFAULT_REFERENCE_BINS);
    let report = DriftValidator::default().check(&reference, parts.holdout.records());

    let gender = report.feature("Gender").expect("gender scored");
    let levels: Vec<&str> = gender.reference.iter().map(|b| b.bucket.as_str()).collect();
    assert_eq!(levels, vec!["Female", "Male", "__other__"]);
    assert_eq!(gender.observed.len(), gender.reference.len());
    let reference_total: f64 = gender.reference.iter().map(|b| b.share).sum();
    let observed_total: f64 = gender.observed.iter().map(|b| b.share).sum();
    assert!((reference_total - 1.0).abs() < 1e-9);
    assert!((observed_total - 1.0).abs() < 1e-9);

    let mtrans = report.feature("MTRANS").expect("transport scored");
    assert!(mtrans.reference.len() > 1);
    assert!(mtrans.observed.iter().all(|b| (0.0..=1.0).contains(&b.share)));
    Ok(())
}

#[test]
fn test_reference_only_sees_training_rows() -> Result<()> {
    let parts = reference_split()?;
    let reference = ReferenceProfile::capture(&parts.train, DEFAULT_REFERENCE_BINS);
    assert_eq!(reference.rows, parts.train.len());
    assert_eq!(reference.features.len(), parts.train.schema().len());
    Ok(())
}
