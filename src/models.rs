use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use anyhow::Context;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::EvaluatorConfig;
use crate::error::{EvaluationError, InvalidReason};
use crate::evaluator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Critical,
    Problematic,
    Good,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Critical => "critical",
            Status::Problematic => "problematic",
            Status::Good => "good",
        }
    }

    /// Statuses that call for a notification.
    pub fn is_actionable(&self) -> bool {
        matches!(self, Status::Critical | Status::Problematic)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "critical" => Ok(Status::Critical),
            "problematic" => Ok(Status::Problematic),
            "good" => Ok(Status::Good),
            other => anyhow::bail!("unknown status `{other}`"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    DataEntryDelay,
    Problematic,
    Critical,
    PreDemobilization,
    Demobilization,
}

impl AlertType {
    pub const ALL: [AlertType; 5] = [
        AlertType::DataEntryDelay,
        AlertType::Problematic,
        AlertType::Critical,
        AlertType::PreDemobilization,
        AlertType::Demobilization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::DataEntryDelay => "data_entry_delay",
            AlertType::Problematic => "problematic",
            AlertType::Critical => "critical",
            AlertType::PreDemobilization => "pre_demobilization",
            AlertType::Demobilization => "demobilization",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertType {
    type Err = EvaluationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AlertType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| EvaluationError::UnknownAlertType(s.to_string()))
    }
}

/// Whether a progress value was usable as given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Valid,
    Invalid(InvalidReason),
}

/// A classification together with the validity of its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assessment {
    pub status: Status,
    pub validity: Validity,
}

/// A monthly entry as submitted, before evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEntry {
    pub site_id: Uuid,
    pub month: NaiveDate,
    pub total_progress: Option<f64>,
    pub target_rate: Option<f64>,
    pub observations: Option<String>,
}

impl ProgressEntry {
    /// Derives status and delay rate. This is the only way to obtain a
    /// [`MonthlyProgressRecord`].
    pub fn evaluate(self, config: &EvaluatorConfig) -> MonthlyProgressRecord {
        let assessment = evaluator::assess(self.total_progress, config);
        let delay_rate = evaluator::delay_rate(self.total_progress, self.target_rate).ok();

        MonthlyProgressRecord {
            site_id: self.site_id,
            month: first_of_month(self.month),
            total_progress: self.total_progress,
            target_rate: self.target_rate,
            normal_rate: config.normal_rate,
            observations: self.observations,
            delay_rate,
            assessment,
        }
    }
}

/// An evaluated monthly observation of a site.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyProgressRecord {
    pub site_id: Uuid,
    pub month: NaiveDate,
    pub total_progress: Option<f64>,
    pub target_rate: Option<f64>,
    pub normal_rate: f64,
    pub observations: Option<String>,
    delay_rate: Option<f64>,
    assessment: Assessment,
}

impl MonthlyProgressRecord {
    pub fn status(&self) -> Status {
        self.assessment.status
    }

    pub fn validity(&self) -> Validity {
        self.assessment.validity
    }

    /// `target_rate - total_progress`; negative when ahead of schedule.
    pub fn delay_rate(&self) -> Option<f64> {
        self.delay_rate
    }
}

/// Who an alert is about and who receives it.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertTarget {
    pub project_id: Uuid,
    pub site_id: Option<Uuid>,
    pub label: String,
    pub recipients: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub project_id: Uuid,
    pub site_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub message: String,
    pub recipients: BTreeSet<String>,
}

/// An alert row waiting for the external dispatcher.
#[derive(Debug, Clone, Serialize)]
pub struct PendingAlert {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AlertEvent,
}

#[derive(Debug, Clone)]
pub struct SiteSnapshot {
    pub site_id: Uuid,
    pub site_name: String,
    pub project_name: String,
    pub month: NaiveDate,
    pub total_progress: Option<f64>,
    pub target_rate: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct StatusSummary {
    pub status: Status,
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct AlertLogEntry {
    pub created_at: DateTime<Utc>,
    pub alert_type: String,
    pub project_name: String,
    pub site_name: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct SiteActivity {
    pub site_id: Uuid,
    pub site_name: String,
    pub project_id: Uuid,
    pub project_name: String,
    pub recipients: Vec<String>,
    /// When the newest monthly row was first inserted.
    pub last_entry_created_at: Option<DateTime<Utc>>,
    /// When any monthly row was last rewritten, corrections included.
    pub last_entry_edited_at: Option<DateTime<Utc>>,
    pub last_delay_alert_at: Option<DateTime<Utc>>,
}

impl SiteActivity {
    /// Date of the last new monthly entry. Corrections to an existing month
    /// do not count.
    pub fn last_entry(&self) -> Option<NaiveDate> {
        self.last_entry_created_at.map(|at| at.date_naive())
    }

    /// Date of the latest correction, when it came after the last new entry.
    pub fn last_correction(&self) -> Option<NaiveDate> {
        let edited = self.last_entry_edited_at?.date_naive();
        match self.last_entry() {
            Some(created) if edited > created => Some(edited),
            _ => None,
        }
    }

    pub fn alert_target(&self) -> AlertTarget {
        AlertTarget {
            project_id: self.project_id,
            site_id: Some(self.site_id),
            label: format!("{} ({})", self.site_name, self.project_name),
            recipients: self.recipients.iter().cloned().collect(),
        }
    }

    /// A delay alert has already gone out since the last entry.
    pub fn delay_already_alerted(&self) -> bool {
        match (self.last_delay_alert_at, self.last_entry_created_at) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(alerted), Some(entry)) => alerted >= entry,
        }
    }
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Parses `YYYY-MM` (or a full `YYYY-MM-DD`, truncated to its month).
pub fn parse_month(value: &str) -> anyhow::Result<NaiveDate> {
    let value = value.trim();
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&format!("{value}-01"), "%Y-%m-%d"))
        .with_context(|| format!("invalid month `{value}`, expected YYYY-MM"))?;
    Ok(first_of_month(date))
}

pub fn format_month(month: NaiveDate) -> String {
    month.format("%Y-%m").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_months_in_both_forms() {
        let expected = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert_eq!(parse_month("2026-03").unwrap(), expected);
        assert_eq!(parse_month(" 2026-03-17 ").unwrap(), expected);
        assert!(parse_month("March 2026").is_err());
        assert!(parse_month("2026-13").is_err());
        assert_eq!(format_month(expected), "2026-03");
    }

    #[test]
    fn alert_types_round_trip_through_wire_names() {
        for kind in AlertType::ALL {
            assert_eq!(kind.as_str().parse::<AlertType>().unwrap(), kind);
        }
        assert_eq!(
            "urgent".parse::<AlertType>(),
            Err(EvaluationError::UnknownAlertType("urgent".to_string()))
        );
        assert!("Critical".parse::<AlertType>().is_err());
    }

    #[test]
    fn evaluate_derives_status_and_delay_rate() {
        let entry = ProgressEntry {
            site_id: Uuid::new_v4(),
            month: NaiveDate::from_ymd_opt(2026, 2, 14).unwrap(),
            total_progress: Some(42.0),
            target_rate: Some(50.0),
            observations: Some("rain delays".to_string()),
        };
        let record = entry.evaluate(&EvaluatorConfig::default());
        assert_eq!(record.status(), Status::Problematic);
        assert_eq!(record.validity(), Validity::Valid);
        assert_eq!(record.delay_rate(), Some(8.0));
        assert_eq!(record.month, NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());
        assert_eq!(record.normal_rate, 12.5);
    }

    fn activity(entry_days_ago: Option<i64>, alert_days_ago: Option<i64>) -> SiteActivity {
        let now = Utc::now();
        SiteActivity {
            site_id: Uuid::new_v4(),
            site_name: "Block C".to_string(),
            project_id: Uuid::new_v4(),
            project_name: "Harbor Point".to_string(),
            recipients: vec!["pm@example.com".to_string(), "pm@example.com".to_string()],
            last_entry_created_at: entry_days_ago.map(|d| now - chrono::Duration::days(d)),
            last_entry_edited_at: entry_days_ago.map(|d| now - chrono::Duration::days(d)),
            last_delay_alert_at: alert_days_ago.map(|d| now - chrono::Duration::days(d)),
        }
    }

    #[test]
    fn delay_alert_suppressed_until_new_entry() {
        assert!(!activity(Some(40), None).delay_already_alerted());
        assert!(activity(Some(40), Some(5)).delay_already_alerted());
        assert!(!activity(Some(2), Some(5)).delay_already_alerted());
        assert!(activity(None, Some(1)).delay_already_alerted());
        assert!(!activity(None, None).delay_already_alerted());
    }

    #[test]
    fn correcting_an_old_month_is_not_a_new_entry() {
        let at = |m, d| Utc.with_ymd_and_hms(2026, m, d, 9, 0, 0).unwrap();
        let site = SiteActivity {
            last_entry_created_at: Some(at(1, 15)),
            last_entry_edited_at: Some(at(3, 10)),
            last_delay_alert_at: Some(at(2, 20)),
            ..activity(None, None)
        };

        assert_eq!(site.last_entry(), NaiveDate::from_ymd_opt(2026, 1, 15));
        assert_eq!(site.last_correction(), NaiveDate::from_ymd_opt(2026, 3, 10));
        assert!(evaluator::evaluate_data_entry_delay(
            site.last_entry(),
            NaiveDate::from_ymd_opt(2026, 3, 20).unwrap(),
            30
        ));
        assert!(site.delay_already_alerted());
    }

    #[test]
    fn activity_target_dedupes_recipients() {
        let target = activity(Some(1), None).alert_target();
        assert_eq!(target.label, "Block C (Harbor Point)");
        assert_eq!(target.recipients.len(), 1);
    }

    #[test]
    fn alert_event_serializes_type_field() {
        let event = AlertEvent {
            project_id: Uuid::nil(),
            site_id: None,
            alert_type: AlertType::PreDemobilization,
            message: "closing soon".to_string(),
            recipients: BTreeSet::from(["ops@example.com".to_string()]),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "pre_demobilization");
        assert_eq!(json["site_id"], serde_json::Value::Null);
        assert_eq!(json["recipients"][0], "ops@example.com");
    }
}
