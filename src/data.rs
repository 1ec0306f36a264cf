use std::path::Path;

use csv::{Reader, Writer};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RiskError};

/// Point-in-time view of one student, as materialized by the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    pub attendance_percentage: f64,
    pub cgpa: f64,
    pub backlog_count: u32,
    /// 0 means fees are current.
    pub fee_overdue_days: u32,
    pub semester: u32,
    pub department: String,
    #[serde(default)]
    pub attendance_delta: f64,
    #[serde(default)]
    pub cgpa_delta: f64,
    /// CGPA delta of the window before `cgpa_delta`, when the store has it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_cgpa_delta: Option<f64>,
}

impl StudentSnapshot {
    pub fn new(attendance_percentage: f64, cgpa: f64, backlog_count: u32, fee_overdue_days: u32) -> Self {
        Self {
            student_id: None,
            attendance_percentage,
            cgpa,
            backlog_count,
            fee_overdue_days,
            semester: 1,
            department: "GEN".to_string(),
            attendance_delta: 0.0,
            cgpa_delta: 0.0,
            previous_cgpa_delta: None,
        }
    }

    pub fn with_department(mut self, department: &str) -> Self {
        self.department = department.to_string();
        self
    }

    pub fn with_semester(mut self, semester: u32) -> Self {
        self.semester = semester;
        self
    }

    pub fn with_cgpa_trend(mut self, cgpa_delta: f64, previous_cgpa_delta: Option<f64>) -> Self {
        self.cgpa_delta = cgpa_delta;
        self.previous_cgpa_delta = previous_cgpa_delta;
        self
    }

    pub fn validate(&self) -> Result<()> {
        check_range("attendance_percentage", self.attendance_percentage, 0.0, 100.0)?;
        check_range("cgpa", self.cgpa, 0.0, 10.0)?;
        if self.semester == 0 {
            return Err(RiskError::Schema {
                field: "semester",
                reason: "must be a positive integer".to_string(),
            });
        }
        if self.department.trim().is_empty() {
            return Err(RiskError::missing("department"));
        }
        check_finite("attendance_delta", self.attendance_delta)?;
        check_finite("cgpa_delta", self.cgpa_delta)?;
        if let Some(previous) = self.previous_cgpa_delta {
            check_finite("previous_cgpa_delta", previous)?;
        }
        Ok(())
    }
}

fn check_finite(field: &'static str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(RiskError::Schema {
            field,
            reason: format!("must be a finite number, got {value}"),
        })
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<()> {
    check_finite(field, value)?;
    if value < min || value > max {
        return Err(RiskError::out_of_range(field, value, &format!("{min}..={max}")));
    }
    Ok(())
}

/// A student row as it arrives from CSV or JSON, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub attendance_percentage: Option<f64>,
    #[serde(default)]
    pub cgpa: Option<f64>,
    #[serde(default)]
    pub backlog_count: Option<u32>,
    #[serde(default)]
    pub fee_overdue_days: Option<u32>,
    #[serde(default)]
    pub semester: Option<u32>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub attendance_delta: Option<f64>,
    #[serde(default)]
    pub cgpa_delta: Option<f64>,
    #[serde(default)]
    pub previous_cgpa_delta: Option<f64>,
}

impl TryFrom<StudentRecord> for StudentSnapshot {
    type Error = RiskError;

    fn try_from(record: StudentRecord) -> Result<Self> {
        let department = record
            .department
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| RiskError::missing("department"))?;

        let snapshot = StudentSnapshot {
            student_id: record.student_id,
            attendance_percentage: record
                .attendance_percentage
                .ok_or_else(|| RiskError::missing("attendance_percentage"))?,
            cgpa: record.cgpa.ok_or_else(|| RiskError::missing("cgpa"))?,
            backlog_count: record
                .backlog_count
                .ok_or_else(|| RiskError::missing("backlog_count"))?,
            fee_overdue_days: record
                .fee_overdue_days
                .ok_or_else(|| RiskError::missing("fee_overdue_days"))?,
            semester: record.semester.ok_or_else(|| RiskError::missing("semester"))?,
            department,
            attendance_delta: record.attendance_delta.unwrap_or(0.0),
            cgpa_delta: record.cgpa_delta.unwrap_or(0.0),
            previous_cgpa_delta: record.previous_cgpa_delta,
        };
        snapshot.validate()?;
        Ok(snapshot)
    }
}

impl From<&StudentSnapshot> for StudentRecord {
    fn from(snapshot: &StudentSnapshot) -> Self {
        StudentRecord {
            student_id: snapshot.student_id.clone(),
            attendance_percentage: Some(snapshot.attendance_percentage),
            cgpa: Some(snapshot.cgpa),
            backlog_count: Some(snapshot.backlog_count),
            fee_overdue_days: Some(snapshot.fee_overdue_days),
            semester: Some(snapshot.semester),
            department: Some(snapshot.department.clone()),
            attendance_delta: Some(snapshot.attendance_delta),
            cgpa_delta: Some(snapshot.cgpa_delta),
            previous_cgpa_delta: snapshot.previous_cgpa_delta,
        }
    }
}

/// Historical row with its observed outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabeledRecord {
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub attendance_percentage: Option<f64>,
    #[serde(default)]
    pub cgpa: Option<f64>,
    #[serde(default)]
    pub backlog_count: Option<u32>,
    #[serde(default)]
    pub fee_overdue_days: Option<u32>,
    #[serde(default)]
    pub semester: Option<u32>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub attendance_delta: Option<f64>,
    #[serde(default)]
    pub cgpa_delta: Option<f64>,
    #[serde(default)]
    pub previous_cgpa_delta: Option<f64>,
    /// `1`/`true`/`high` mark a high-risk outcome; `0`/`false`/`low`/`medium` do not.
    pub label: String,
}

impl LabeledRecord {
    fn into_parts(self) -> (StudentRecord, String) {
        let record = StudentRecord {
            student_id: self.student_id,
            attendance_percentage: self.attendance_percentage,
            cgpa: self.cgpa,
            backlog_count: self.backlog_count,
            fee_overdue_days: self.fee_overdue_days,
            semester: self.semester,
            department: self.department,
            attendance_delta: self.attendance_delta,
            cgpa_delta: self.cgpa_delta,
            previous_cgpa_delta: self.previous_cgpa_delta,
        };
        (record, self.label)
    }
}

impl From<&LabeledSnapshot> for LabeledRecord {
    fn from(row: &LabeledSnapshot) -> Self {
        let record = StudentRecord::from(&row.snapshot);
        LabeledRecord {
            student_id: record.student_id,
            attendance_percentage: record.attendance_percentage,
            cgpa: record.cgpa,
            backlog_count: record.backlog_count,
            fee_overdue_days: record.fee_overdue_days,
            semester: record.semester,
            department: record.department,
            attendance_delta: record.attendance_delta,
            cgpa_delta: record.cgpa_delta,
            previous_cgpa_delta: record.previous_cgpa_delta,
            label: if row.high_risk { "1" } else { "0" }.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledSnapshot {
    pub snapshot: StudentSnapshot,
    pub high_risk: bool,
}

/// A row that could not be turned into a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowRejection {
    pub row: usize,
    pub error: String,
}

pub fn parse_label(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "high" => Some(true),
        "0" | "false" | "no" | "low" | "medium" => Some(false),
        _ => None,
    }
}

/// Validates labeled rows, keeping the good ones and reporting the rest.
pub fn into_labeled(records: Vec<LabeledRecord>) -> (Vec<LabeledSnapshot>, Vec<RowRejection>) {
    let mut rows = Vec::with_capacity(records.len());
    let mut rejected = Vec::new();

    for (row, record) in records.into_iter().enumerate() {
        let (record, label) = record.into_parts();
        let Some(high_risk) = parse_label(&label) else {
            rejected.push(RowRejection {
                row,
                error: format!("unrecognised label `{label}`"),
            });
            continue;
        };
        match StudentSnapshot::try_from(record) {
            Ok(snapshot) => rows.push(LabeledSnapshot { snapshot, high_risk }),
            Err(e) => rejected.push(RowRejection {
                row,
                error: e.to_string(),
            }),
        }
    }

    (rows, rejected)
}

pub fn load_records(path: &Path) -> Result<Vec<StudentRecord>> {
    let mut rdr = Reader::from_path(path)?;
    let mut records = Vec::new();
    for result in rdr.deserialize() {
        records.push(result?);
    }
    Ok(records)
}

pub fn load_labeled(path: &Path) -> Result<Vec<LabeledRecord>> {
    let mut rdr = Reader::from_path(path)?;
    let mut records = Vec::new();
    for result in rdr.deserialize() {
        records.push(result?);
    }
    Ok(records)
}

pub fn write_labeled(path: &Path, rows: &[LabeledSnapshot]) -> Result<()> {
    let mut wtr = Writer::from_path(path)?;
    for row in rows {
        wtr.serialize(LabeledRecord::from(row))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Splits row indices into (train, held-out), keeping the class ratio of `labels`.
///
/// Each class contributes `round(test_ratio * class_size)` rows to the held-out
/// side, at least one when the class has two or more rows. Deterministic for a seed.
pub fn stratified_split(labels: &[bool], test_ratio: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();

    for class in [false, true] {
        let mut indices: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, &label)| label == class)
            .map(|(i, _)| i)
            .collect();
        indices.shuffle(&mut rng);

        let mut test_size = (test_ratio * indices.len() as f64).round() as usize;
        if test_size == 0 && indices.len() >= 2 {
            test_size = 1;
        }
        let (class_test, class_train) = indices.split_at(test_size.min(indices.len()));
        test.extend_from_slice(class_test);
        train.extend_from_slice(class_train);
    }

    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

const SAMPLE_DEPARTMENTS: [&str; 5] = ["CSE", "ECE", "ME", "CE", "EEE"];

/// Synthetic labeled cohort for demos and tests.
///
/// Labels come from a noisy additive risk heuristic so the classes are
/// learnable but not perfectly separable.
pub fn generate_sample_cohort(rows: usize, seed: u64) -> Vec<LabeledSnapshot> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let fee_choices = [0u32, 0, 0, 10, 45, 120];

    (0..rows)
        .map(|i| {
            let department = SAMPLE_DEPARTMENTS[rng.gen_range(0..SAMPLE_DEPARTMENTS.len())];
            let attendance: f64 = rng.gen_range(45.0..98.0);
            let cgpa: f64 = rng.gen_range(4.0..9.5);
            let semester = rng.gen_range(1..=8);
            let fee_overdue_days = fee_choices[rng.gen_range(0..fee_choices.len())];
            let cgpa_delta: f64 = rng.gen_range(-0.8..0.6);
            let previous_cgpa_delta: f64 = rng.gen_range(-0.8..0.6);
            let attendance_delta: f64 = rng.gen_range(-12.0..8.0);

            let mut score = 0.0;
            score += if attendance < 60.0 {
                30.0
            } else if attendance < 75.0 {
                15.0
            } else {
                5.0
            };
            score += if cgpa < 6.0 {
                25.0
            } else if cgpa < 7.0 {
                10.0
            } else {
                2.0
            };
            score += match fee_overdue_days {
                0 => 0.0,
                1..=30 => 5.0,
                31..=90 => 15.0,
                _ => 25.0,
            };

            let backlog_count = if score > 40.0 && rng.gen_bool(0.5) {
                rng.gen_range(1..=4)
            } else {
                0
            };
            if backlog_count >= 2 {
                score += 15.0;
            }
            if cgpa_delta < 0.0 && previous_cgpa_delta < 0.0 {
                score += 8.0;
            }
            score += rng.gen_range(-10.0..10.0);

            LabeledSnapshot {
                snapshot: StudentSnapshot {
                    student_id: Some(format!("{department}{:04}", i + 1)),
                    attendance_percentage: (attendance * 100.0).round() / 100.0,
                    cgpa: (cgpa * 100.0).round() / 100.0,
                    backlog_count,
                    fee_overdue_days,
                    semester,
                    department: department.to_string(),
                    attendance_delta: (attendance_delta * 100.0).round() / 100.0,
                    cgpa_delta: (cgpa_delta * 100.0).round() / 100.0,
                    previous_cgpa_delta: Some((previous_cgpa_delta * 100.0).round() / 100.0),
                },
                high_risk: score >= 50.0,
            }
        })
        .collect()
}
