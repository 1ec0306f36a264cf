//! Feature extraction: raw snapshot to fixed-order numeric vector.
//!
//! Layout is the numeric columns below, followed by a one-hot block
//! with one column per department seen during training and a final
//! "unknown" column for departments the models never saw.

use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::data::StudentSnapshot;
use crate::error::{Result, RiskError};

pub const NUMERIC_FEATURES: [&str; 10] = [
    "attendance_norm",
    "cgpa_norm",
    "backlog_log",
    "fee_overdue_log",
    "attendance_delta",
    "cgpa_delta",
    "semester_progress",
    "critical_semester",
    "attendance_academic_risk",
    "gpa_to_attendance_ratio",
];

/// Semester count of a standard programme; `semester_progress` is 1.0 at the last one.
const PROGRAMME_SEMESTERS: f64 = 8.0;

/// Semesters with historically elevated dropout.
const CRITICAL_SEMESTERS: [u32; 4] = [3, 4, 7, 8];

const UNKNOWN_BUCKET: &str = "department=unknown";

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: Vec<f64>,
    unknown_department: bool,
}

impl FeatureVector {
    pub fn view(&self) -> ArrayView1<'_, f64> {
        ArrayView1::from(self.values.as_slice())
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when the department fell into the unknown bucket.
    pub fn unknown_department(&self) -> bool {
        self.unknown_department
    }
}

/// Encoder state learned from the training partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureExtractor {
    departments: Vec<String>,
}

impl FeatureExtractor {
    pub fn fit<'a, I>(snapshots: I) -> Self
    where
        I: IntoIterator<Item = &'a StudentSnapshot>,
    {
        let mut departments: Vec<String> = snapshots
            .into_iter()
            .map(|s| normalize_department(&s.department))
            .collect();
        departments.sort();
        departments.dedup();
        Self { departments }
    }

    pub fn departments(&self) -> &[String] {
        &self.departments
    }

    /// Width of every vector this extractor produces.
    pub fn width(&self) -> usize {
        NUMERIC_FEATURES.len() + self.departments.len() + 1
    }

    pub fn feature_names(&self) -> Vec<String> {
        NUMERIC_FEATURES
            .iter()
            .map(|name| name.to_string())
            .chain(self.departments.iter().map(|d| format!("department={d}")))
            .chain(std::iter::once(UNKNOWN_BUCKET.to_string()))
            .collect()
    }

    /// Position of `department` inside the one-hot block.
    pub fn encode_department(&self, department: &str) -> Result<usize> {
        let key = normalize_department(department);
        self.departments
            .binary_search(&key)
            .map_err(|_| RiskError::UnknownCategory {
                field: "department",
                value: department.to_string(),
            })
    }

    pub fn extract(&self, snapshot: &StudentSnapshot) -> Result<FeatureVector> {
        snapshot.validate()?;

        let mut values = vec![0.0; self.width()];
        values[0] = snapshot.attendance_percentage / 100.0;
        values[1] = snapshot.cgpa / 10.0;
        values[2] = (snapshot.backlog_count as f64).ln_1p();
        values[3] = (snapshot.fee_overdue_days as f64).ln_1p();
        values[4] = snapshot.attendance_delta;
        values[5] = snapshot.cgpa_delta;
        values[6] = snapshot.semester as f64 / PROGRAMME_SEMESTERS;
        values[7] = if CRITICAL_SEMESTERS.contains(&snapshot.semester) { 1.0 } else { 0.0 };
        // both shortfalls scaled to [0, 1] before multiplying
        values[8] = (1.0 - values[0]) * (1.0 - values[1]);
        values[9] = snapshot.cgpa / (snapshot.attendance_percentage + 1.0);

        let (slot, unknown_department) = match self.encode_department(&snapshot.department) {
            Ok(slot) => (slot, false),
            Err(e) => {
                warn!(error = %e, "falling back to unknown department bucket");
                (self.departments.len(), true)
            }
        };
        values[NUMERIC_FEATURES.len() + slot] = 1.0;

        Ok(FeatureVector {
            values,
            unknown_department,
        })
    }

    pub fn extract_matrix<'a, I>(&self, snapshots: I) -> Result<Array2<f64>>
    where
        I: IntoIterator<Item = &'a StudentSnapshot>,
    {
        let mut flat = Vec::new();
        let mut rows = 0;
        for snapshot in snapshots {
            flat.extend_from_slice(self.extract(snapshot)?.as_slice());
            rows += 1;
        }
        Array2::from_shape_vec((rows, self.width()), flat).map_err(|e| RiskError::Schema {
            field: "features",
            reason: e.to_string(),
        })
    }
}

fn normalize_department(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> FeatureExtractor {
        let rows = vec![
            StudentSnapshot::new(80.0, 7.0, 0, 0).with_department("cse"),
            StudentSnapshot::new(70.0, 6.0, 1, 10).with_department("ECE"),
            StudentSnapshot::new(65.0, 5.0, 2, 40).with_department("CSE"),
        ];
        FeatureExtractor::fit(&rows)
    }

    #[test]
    fn fit_collects_sorted_unique_departments() {
        assert_eq!(extractor().departments(), ["CSE", "ECE"]);
        assert_eq!(extractor().width(), NUMERIC_FEATURES.len() + 3);
    }

    #[test]
    fn extract_normalizes_and_encodes() {
        let snapshot = StudentSnapshot::new(55.0, 7.2, 3, 40)
            .with_department("ece")
            .with_semester(4)
            .with_cgpa_trend(-0.3, Some(-0.1));
        let vector = extractor().extract(&snapshot).unwrap();
        let v = vector.as_slice();

        assert!((v[0] - 0.55).abs() < 1e-12);
        assert!((v[1] - 0.72).abs() < 1e-12);
        assert!((v[2] - 4f64.ln()).abs() < 1e-12);
        assert!((v[3] - 41f64.ln()).abs() < 1e-12);
        assert_eq!(v[5], -0.3);
        assert_eq!(v[6], 0.5);
        assert_eq!(v[7], 1.0);
        assert!((v[8] - 0.45 * 0.28).abs() < 1e-12);
        assert!((v[9] - 7.2 / 56.0).abs() < 1e-12);
        assert_eq!(&v[10..], &[0.0, 1.0, 0.0]);
        assert!(!vector.unknown_department());
    }

    #[test]
    fn semester_encoding_marks_critical_terms() {
        let extractor = extractor();
        let at = |semester: u32| {
            let snapshot = StudentSnapshot::new(100.0, 10.0, 0, 0)
                .with_department("CSE")
                .with_semester(semester);
            extractor.extract(&snapshot).unwrap().as_slice().to_vec()
        };

        let first = at(1);
        assert_eq!(first[6], 0.125);
        assert_eq!(first[7], 0.0);
        // no shortfall in either attendance or cgpa
        assert_eq!(first[8], 0.0);

        assert_eq!(at(7)[7], 1.0);
        assert_eq!(at(8)[6], 1.0);
        assert_eq!(at(5)[7], 0.0);
    }

    #[test]
    fn unseen_department_uses_unknown_bucket() {
        let snapshot = StudentSnapshot::new(80.0, 7.0, 0, 0).with_department("MBA");
        let extractor = extractor();

        assert!(matches!(
            extractor.encode_department("MBA"),
            Err(RiskError::UnknownCategory { .. })
        ));
        let vector = extractor.extract(&snapshot).unwrap();
        assert!(vector.unknown_department());
        assert_eq!(&vector.as_slice()[10..], &[0.0, 0.0, 1.0]);
    }

    #[test]
    fn invalid_snapshot_is_schema_error() {
        let snapshot = StudentSnapshot::new(101.0, 7.0, 0, 0);
        assert!(extractor().extract(&snapshot).unwrap_err().is_schema());
    }

    #[test]
    fn feature_names_match_vector_length() {
        let extractor = extractor();
        let names = extractor.feature_names();
        assert_eq!(names.len(), extractor.width());
        assert_eq!(names.last().map(String::as_str), Some("department=unknown"));
    }

    #[test]
    fn matrix_has_one_row_per_snapshot() {
        let rows = vec![
            StudentSnapshot::new(80.0, 7.0, 0, 0).with_department("CSE"),
            StudentSnapshot::new(70.0, 6.0, 1, 10).with_department("ECE"),
        ];
        let matrix = extractor().extract_matrix(&rows).unwrap();
        assert_eq!(matrix.dim(), (2, 13));
    }
}
