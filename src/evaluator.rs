//! Progress classification and alert triggering.
//!
//! Everything here is pure: callers supply prior state and dates, and get
//! back a status or a list of alerts to persist. Nothing in this module
//! touches the database or the clock.

use chrono::NaiveDate;

use crate::config::EvaluatorConfig;
use crate::error::{EvaluationError, InvalidReason};
use crate::models::{
    format_month, AlertEvent, AlertTarget, AlertType, Assessment, MonthlyProgressRecord, Status,
    Validity,
};

/// Classifies a progress percentage. Missing or out-of-range values are
/// `critical`.
pub fn classify(progress: Option<f64>, config: &EvaluatorConfig) -> Status {
    assess(progress, config).status
}

/// Like [`classify`], but also reports whether the input was usable.
pub fn assess(progress: Option<f64>, config: &EvaluatorConfig) -> Assessment {
    match check_percentage(progress) {
        Ok(value) => Assessment {
            status: band(value, config),
            validity: Validity::Valid,
        },
        Err(reason) => Assessment {
            status: Status::Critical,
            validity: Validity::Invalid(reason),
        },
    }
}

fn band(value: f64, config: &EvaluatorConfig) -> Status {
    if value < config.critical_below {
        Status::Critical
    } else if value < config.problematic_below {
        Status::Problematic
    } else {
        Status::Good
    }
}

fn check_percentage(value: Option<f64>) -> Result<f64, InvalidReason> {
    match value {
        None => Err(InvalidReason::Missing),
        Some(v) if v.is_nan() => Err(InvalidReason::NotANumber),
        Some(v) if !(0.0..=100.0).contains(&v) => Err(InvalidReason::OutOfRange),
        Some(v) => Ok(v),
    }
}

/// Returns the value when it is a finite percentage in `0..=100`.
pub fn require_percentage(field: &'static str, value: Option<f64>) -> Result<f64, EvaluationError> {
    check_percentage(value).map_err(|reason| EvaluationError::InvalidInput { field, reason })
}

pub fn require_progress(progress: Option<f64>) -> Result<f64, EvaluationError> {
    require_percentage("total_progress", progress)
}

/// Shortfall against the baseline schedule, negative when ahead.
pub fn delay_rate(total_progress: Option<f64>, target_rate: Option<f64>) -> Result<f64, EvaluationError> {
    let total = require_progress(total_progress)?;
    let target = require_percentage("target_rate", target_rate)?;
    Ok(target - total)
}

/// True when at least `threshold_days` have passed since the last entry.
/// A site that never had an entry is delayed.
pub fn evaluate_data_entry_delay(
    last_entry: Option<NaiveDate>,
    reference: NaiveDate,
    threshold_days: u32,
) -> bool {
    match last_entry {
        None => true,
        Some(last) => (reference - last).num_days() >= i64::from(threshold_days),
    }
}

/// Alerts owed for a freshly evaluated record. Fires only when the status
/// changes into `problematic` or `critical`.
pub fn build_alert_obligations(
    record: &MonthlyProgressRecord,
    previous: Option<Status>,
    target: &AlertTarget,
) -> Vec<AlertEvent> {
    let status = record.status();
    if !status.is_actionable() || previous == Some(status) {
        return Vec::new();
    }

    let alert_type = match status {
        Status::Critical => AlertType::Critical,
        _ => AlertType::Problematic,
    };
    let progress = match record.total_progress {
        Some(value) if record.validity() == Validity::Valid => format!("{value:.1}%"),
        _ => "no valid progress value".to_string(),
    };
    let detail = format!("{} for {}", progress, format_month(record.month));

    vec![event(target, alert_type, template_message(alert_type, &target.label, &detail))]
}

/// A `data_entry_delay` alert when the site is overdue for an entry.
pub fn build_delay_alert(
    target: &AlertTarget,
    last_entry: Option<NaiveDate>,
    reference: NaiveDate,
    config: &EvaluatorConfig,
) -> Option<AlertEvent> {
    if !evaluate_data_entry_delay(last_entry, reference, config.data_entry_delay_days) {
        return None;
    }

    let detail = match last_entry {
        Some(last) => format!(
            "last entry {} ({} days ago)",
            last,
            (reference - last).num_days()
        ),
        None => "no entry recorded yet".to_string(),
    };
    Some(event(
        target,
        AlertType::DataEntryDelay,
        template_message(AlertType::DataEntryDelay, &target.label, &detail),
    ))
}

/// Operator-created alert. Always yields one event once the type is valid.
pub fn manual_alert(
    target: &AlertTarget,
    alert_type: &str,
    message: Option<&str>,
) -> Result<AlertEvent, EvaluationError> {
    let alert_type: AlertType = alert_type.parse()?;
    let message = match message {
        Some(text) if !text.trim().is_empty() => text.to_string(),
        _ => template_message(alert_type, &target.label, "raised manually"),
    };
    Ok(event(target, alert_type, message))
}

fn event(target: &AlertTarget, alert_type: AlertType, message: String) -> AlertEvent {
    AlertEvent {
        project_id: target.project_id,
        site_id: target.site_id,
        alert_type,
        message,
        recipients: target.recipients.clone(),
    }
}

pub fn template_message(alert_type: AlertType, label: &str, detail: &str) -> String {
    match alert_type {
        AlertType::Critical => format!("{label} is in critical condition: {detail}"),
        AlertType::Problematic => format!("{label} is falling behind schedule: {detail}"),
        AlertType::DataEntryDelay => format!("{label} is overdue for a progress entry: {detail}"),
        AlertType::PreDemobilization => format!("{label} is approaching demobilization: {detail}"),
        AlertType::Demobilization => format!("{label} is being demobilized: {detail}"),
    }
}
