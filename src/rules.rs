use serde::{Deserialize, Serialize};

use crate::config::RuleConfig;
use crate::data::StudentSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleId {
    LowAttendance,
    ContinuousScoreDrop,
    MultipleBacklogs,
    FeeOverdue,
}

impl RuleId {
    /// Evaluation order, which is also the order reasons are reported in.
    pub const ORDER: [RuleId; 4] = [
        RuleId::LowAttendance,
        RuleId::ContinuousScoreDrop,
        RuleId::MultipleBacklogs,
        RuleId::FeeOverdue,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleFlag {
    pub rule_id: RuleId,
    pub severity_weight: f64,
    pub reason: String,
}

/// Flags fired for one snapshot, in rule order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleOutcome {
    pub flags: Vec<RuleFlag>,
}

impl RuleOutcome {
    /// Highest severity among fired rules, 0.0 when none fired.
    pub fn score(&self) -> f64 {
        self.flags
            .iter()
            .map(|f| f.severity_weight)
            .fold(0.0, f64::max)
    }

    pub fn reasons(&self) -> Vec<String> {
        self.flags.iter().map(|f| f.reason.clone()).collect()
    }

    pub fn fired(&self) -> Vec<RuleId> {
        self.flags.iter().map(|f| f.rule_id).collect()
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    config: RuleConfig,
}

impl RuleEngine {
    pub fn new(config: RuleConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(&self, snapshot: &StudentSnapshot) -> RuleOutcome {
        let flags = RuleId::ORDER
            .iter()
            .filter_map(|&rule| self.check(rule, snapshot))
            .collect();
        RuleOutcome { flags }
    }

    /// Evaluates one rule in isolation.
    pub fn check(&self, rule: RuleId, snapshot: &StudentSnapshot) -> Option<RuleFlag> {
        let c = &self.config;
        let (fired, severity_weight, reason) = match rule {
            RuleId::LowAttendance => (
                snapshot.attendance_percentage < c.attendance_below,
                c.attendance_weight,
                format!("attendance below {}%", c.attendance_below),
            ),
            RuleId::ContinuousScoreDrop => (
                snapshot.cgpa_delta < 0.0
                    && snapshot.previous_cgpa_delta.is_some_and(|prev| prev < 0.0),
                c.score_drop_weight,
                "continuous score drop".to_string(),
            ),
            RuleId::MultipleBacklogs => (
                snapshot.backlog_count >= c.backlogs_at_least,
                c.backlog_weight,
                "multiple backlogs".to_string(),
            ),
            RuleId::FeeOverdue => (
                snapshot.fee_overdue_days > c.fee_overdue_days_over,
                c.fee_weight,
                "fee overdue".to_string(),
            ),
        };

        fired.then_some(RuleFlag {
            rule_id: rule,
            severity_weight,
            reason,
        })
    }
}
