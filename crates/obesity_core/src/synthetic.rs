//! Deterministic synthetic cohorts for demos and tests.
//!
//! Labels follow WHO BMI bands, so the class is learnable from height and
//! weight. Lifestyle fields are noise with mild class correlation.

use crate::deterministic::{derive_seed, LcgRng};
use crate::errors::SchemaError;
use crate::types::{FieldSpec, ObesityLevel, Record, Schema, Value};
use crate::data::RawTable;

#[derive(Debug, Clone)]
pub struct CohortSpec {
    /// Rows per class, in any order
    pub counts: Vec<(ObesityLevel, usize)>,
    pub seed: u64,
    /// Add the lifestyle survey fields on top of Age/Gender/Height/Weight
    pub lifestyle_fields: bool,
}

impl CohortSpec {
    pub fn new(counts: &[(ObesityLevel, usize)], seed: u64) -> Self {
        Self {
            counts: counts.to_vec(),
            seed,
            lifestyle_fields: false,
        }
    }

    pub fn with_lifestyle(mut self) -> Self {
        self.lifestyle_fields = true;
        self
    }

    pub fn schema(&self) -> Result<Schema, SchemaError> {
        let mut fields = vec![
            FieldSpec::numeric("Age"),
            FieldSpec::categorical("Gender"),
            FieldSpec::numeric("Height"),
            FieldSpec::numeric("Weight"),
        ];
        if self.lifestyle_fields {
            fields.extend([
                FieldSpec::categorical("family_history_with_overweight"),
                FieldSpec::categorical("FAVC"),
                FieldSpec::numeric("FCVC"),
                FieldSpec::numeric("FAF"),
                FieldSpec::categorical("MTRANS"),
            ]);
        }
        Schema::new(fields)
    }
}

fn bmi_band(level: ObesityLevel) -> (f64, f64) {
    match level {
        ObesityLevel::Underweight => (15.5, 18.3),
        ObesityLevel::Normal => (18.7, 24.8),
        ObesityLevel::Overweight => (25.2, 29.8),
        ObesityLevel::Obese => (30.2, 42.0),
    }
}

fn uniform(rng: &mut LcgRng, lo: f64, hi: f64) -> f64 {
    lo + (hi - lo) * (rng.next_unit_micro() as f64 / 1_000_000.0)
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Generate a table with exactly the requested class counts.
pub fn cohort(spec: &CohortSpec) -> Result<RawTable, SchemaError> {
    let schema = spec.schema()?;
    let mut rng = LcgRng::new(derive_seed(spec.seed, "cohort"));
    let mut records = Vec::new();
    let mut labels = Vec::new();

    for (level, count) in &spec.counts {
        let (bmi_lo, bmi_hi) = bmi_band(*level);
        for _ in 0..*count {
            let male = rng.next_range(2) == 0;
            let height = if male {
                uniform(&mut rng, 1.65, 1.95)
            } else {
                uniform(&mut rng, 1.50, 1.80)
            };
            let bmi = uniform(&mut rng, bmi_lo, bmi_hi);
            let weight = round_to(bmi * height * height, 1);
            let age = round_to(uniform(&mut rng, 16.0, 61.0), 0);

            let mut record = Record::new()
                .with("Age", age)
                .with("Gender", if male { "Male" } else { "Female" })
                .with("Height", round_to(height, 2))
                .with("Weight", weight);

            if spec.lifestyle_fields {
                let heavy = matches!(level, ObesityLevel::Overweight | ObesityLevel::Obese);
                let history = if heavy || rng.next_range(4) == 0 { "yes" } else { "no" };
                let favc = if rng.next_range(3) == 0 { "no" } else { "yes" };
                let modes = ["Public_Transportation", "Walking", "Automobile", "Bike"];
                record.insert("family_history_with_overweight", Value::from(history));
                record.insert("FAVC", Value::from(favc));
                record.insert("FCVC", Value::Number(round_to(uniform(&mut rng, 1.0, 3.0), 1)));
                record.insert("FAF", Value::Number(round_to(uniform(&mut rng, 0.0, 3.0), 1)));
                record.insert("MTRANS", Value::from(modes[rng.next_range(modes.len())]));
            }

            records.push(record);
            labels.push(*level);
        }
    }

    RawTable::new(schema, records, labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::body_mass_index;

    #[test]
    fn test_cohort_counts_and_labels() {
        let spec = CohortSpec::new(
            &[(ObesityLevel::Normal, 12), (ObesityLevel::Obese, 5)],
            3,
        );
        let table = cohort(&spec).unwrap();
        assert_eq!(table.len(), 17);
        assert_eq!(table.class_counts()[&ObesityLevel::Normal], 12);

        for (record, label) in table.records().iter().zip(table.labels()) {
            let h = record.get("Height").and_then(Value::as_number).unwrap();
            let w = record.get("Weight").and_then(Value::as_number).unwrap();
            let bmi = body_mass_index(h, w).unwrap();
            let (lo, hi) = bmi_band(*label);
            // Rounding of height and weight moves BMI slightly.
            assert!(bmi > lo - 0.5 && bmi < hi + 0.5, "bmi {bmi} for {label}");
        }
    }

    #[test]
    fn test_cohort_is_deterministic() {
        let spec = CohortSpec::new(&[(ObesityLevel::Overweight, 20)], 9).with_lifestyle();
        let a = cohort(&spec).unwrap();
        let b = cohort(&spec).unwrap();
        assert_eq!(a.records(), b.records());
        assert_eq!(a.schema().len(), 9);
    }
}
