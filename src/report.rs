use std::fmt::Write;

use chrono::{Months, NaiveDate};

use crate::config::EvaluatorConfig;
use crate::evaluator;
use crate::models::{first_of_month, format_month, AlertLogEntry, SiteActivity, SiteSnapshot, Status, StatusSummary};

/// First month of a window of `months` calendar months ending with the
/// month of `reference`.
pub fn window_start(reference: NaiveDate, months: u32) -> NaiveDate {
    let current = first_of_month(reference);
    current
        .checked_sub_months(Months::new(months.max(1) - 1))
        .unwrap_or(current)
}

pub fn summarize_by_status(snapshots: &[SiteSnapshot], config: &EvaluatorConfig) -> Vec<StatusSummary> {
    [Status::Critical, Status::Problematic, Status::Good]
        .into_iter()
        .map(|status| StatusSummary {
            status,
            count: snapshots
                .iter()
                .filter(|snapshot| evaluator::classify(snapshot.total_progress, config) == status)
                .count(),
        })
        .filter(|summary| summary.count > 0)
        .collect()
}

/// Sites whose latest entry is critical or problematic, worst first.
pub fn sites_needing_attention<'a>(
    snapshots: &'a [SiteSnapshot],
    config: &EvaluatorConfig,
) -> Vec<(&'a SiteSnapshot, Status)> {
    let mut flagged: Vec<(&SiteSnapshot, Status)> = snapshots
        .iter()
        .map(|snapshot| (snapshot, evaluator::classify(snapshot.total_progress, config)))
        .filter(|(_, status)| status.is_actionable())
        .collect();

    flagged.sort_by(|a, b| {
        let rank = |status: Status| if status == Status::Critical { 0 } else { 1 };
        rank(a.1).cmp(&rank(b.1)).then_with(|| {
            a.0.total_progress
                .unwrap_or(f64::NEG_INFINITY)
                .partial_cmp(&b.0.total_progress.unwrap_or(f64::NEG_INFINITY))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .then_with(|| a.0.site_id.cmp(&b.0.site_id))
    });
    flagged
}

pub struct ReportInput<'a> {
    pub scope: Option<&'a str>,
    pub months: u32,
    pub since_month: NaiveDate,
    pub reference: NaiveDate,
    pub snapshots: &'a [SiteSnapshot],
    pub alerts: &'a [AlertLogEntry],
    pub activity: &'a [SiteActivity],
}

pub fn build_report(input: &ReportInput<'_>, config: &EvaluatorConfig) -> String {
    let summaries = summarize_by_status(input.snapshots, config);
    let flagged = sites_needing_attention(input.snapshots, config);

    let mut output = String::new();
    let scope_label = input.scope.unwrap_or("all projects");

    let _ = writeln!(output, "# Site Progress Report");
    let _ = writeln!(
        output,
        "Generated for {} on {} (last {} months, entries since {})",
        scope_label,
        input.reference,
        input.months,
        format_month(input.since_month)
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Status Mix");

    if summaries.is_empty() {
        let _ = writeln!(output, "No progress entries recorded for this window.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(output, "- {}: {} sites", summary.status, summary.count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Sites Needing Attention");

    if flagged.is_empty() {
        let _ = writeln!(output, "All sites are on track.");
    } else {
        for (snapshot, status) in flagged.iter() {
            let progress = snapshot
                .total_progress
                .map(|value| format!("{value:.1}%"))
                .unwrap_or_else(|| "no progress value".to_string());
            let delay = evaluator::delay_rate(snapshot.total_progress, snapshot.target_rate)
                .map(|value| format!(", delay {value:+.1} pts"))
                .unwrap_or_default();
            let _ = writeln!(
                output,
                "- {} ({}) {}: {} in {}{}",
                snapshot.site_name,
                snapshot.project_name,
                status,
                progress,
                format_month(snapshot.month),
                delay
            );
        }
    }

    let overdue: Vec<&SiteActivity> = input
        .activity
        .iter()
        .filter(|site| {
            evaluator::evaluate_data_entry_delay(
                site.last_entry(),
                input.reference,
                config.data_entry_delay_days,
            )
        })
        .collect();

    let _ = writeln!(output);
    let _ = writeln!(output, "## Overdue for Data Entry");

    if overdue.is_empty() {
        let _ = writeln!(output, "Every site has a recent entry.");
    } else {
        for site in overdue {
            let mut last = site
                .last_entry()
                .map(|date| format!("last entry {date}"))
                .unwrap_or_else(|| "no entries yet".to_string());
            if let Some(edited) = site.last_correction() {
                last.push_str(&format!(", corrected {edited}"));
            }
            let _ = writeln!(output, "- {} ({}): {}", site.site_name, site.project_name, last);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Alerts");

    if input.alerts.is_empty() {
        let _ = writeln!(output, "No alerts raised in this window.");
    } else {
        for alert in input.alerts.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} [{}] {}: {}",
                alert.created_at.date_naive(),
                alert.alert_type,
                alert.site_name.as_deref().unwrap_or(&alert.project_name),
                alert.message
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn snapshot(name: &str, progress: Option<f64>) -> SiteSnapshot {
        SiteSnapshot {
            site_id: Uuid::new_v4(),
            site_name: name.to_string(),
            project_name: "Harbor Point".to_string(),
            month: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            total_progress: progress,
            target_rate: Some(37.5),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn window_start_counts_current_month() {
        assert_eq!(window_start(date(2026, 4, 17), 3), date(2026, 2, 1));
        assert_eq!(window_start(date(2026, 1, 31), 2), date(2025, 12, 1));
        assert_eq!(window_start(date(2026, 4, 17), 0), date(2026, 4, 1));
    }

    #[test]
    fn status_mix_recomputes_from_progress() {
        let snapshots = vec![
            snapshot("North Tower", Some(52.0)),
            snapshot("Parking", Some(21.0)),
            snapshot("Podium", Some(44.5)),
            snapshot("Annex", None),
        ];
        let summaries = summarize_by_status(&snapshots, &EvaluatorConfig::default());
        let counts: Vec<(Status, usize)> = summaries.iter().map(|s| (s.status, s.count)).collect();
        assert_eq!(
            counts,
            vec![(Status::Critical, 2), (Status::Problematic, 1), (Status::Good, 1)]
        );
    }

    #[test]
    fn attention_list_orders_worst_first() {
        let snapshots = vec![
            snapshot("Podium", Some(44.5)),
            snapshot("Parking", Some(21.0)),
            snapshot("North Tower", Some(80.0)),
            snapshot("Annex", None),
        ];
        let flagged = sites_needing_attention(&snapshots, &EvaluatorConfig::default());
        let names: Vec<&str> = flagged.iter().map(|(s, _)| s.site_name.as_str()).collect();
        assert_eq!(names, vec!["Annex", "Parking", "Podium"]);
    }

    #[test]
    fn report_lists_flagged_and_overdue_sites() {
        let snapshots = vec![snapshot("Parking", Some(21.0)), snapshot("North Tower", Some(52.0))];
        let activity = vec![SiteActivity {
            site_id: Uuid::new_v4(),
            site_name: "Retail Podium".to_string(),
            project_id: Uuid::new_v4(),
            project_name: "Harbor Point".to_string(),
            recipients: vec![],
            last_entry_created_at: Some(Utc.with_ymd_and_hms(2026, 2, 10, 9, 0, 0).unwrap()),
            last_entry_edited_at: Some(Utc.with_ymd_and_hms(2026, 3, 12, 9, 0, 0).unwrap()),
            last_delay_alert_at: None,
        }];
        let alerts = vec![AlertLogEntry {
            created_at: Utc.with_ymd_and_hms(2026, 3, 5, 8, 0, 0).unwrap(),
            alert_type: "critical".to_string(),
            project_name: "Harbor Point".to_string(),
            site_name: Some("Parking".to_string()),
            message: "Parking (Harbor Point) is in critical condition".to_string(),
        }];

        let report = build_report(
            &ReportInput {
                scope: Some("Harbor Point"),
                months: 3,
                since_month: date(2026, 1, 1),
                reference: date(2026, 4, 1),
                snapshots: &snapshots,
                alerts: &alerts,
                activity: &activity,
            },
            &EvaluatorConfig::default(),
        );

        assert!(report.contains("Generated for Harbor Point on 2026-04-01"));
        assert!(report.contains("- critical: 1 sites"));
        assert!(report.contains("- Parking (Harbor Point) critical: 21.0% in 2026-03, delay +16.5 pts"));
        assert!(!report.contains("North Tower (Harbor Point) good"));
        assert!(report.contains("- Retail Podium (Harbor Point): last entry 2026-02-10, corrected 2026-03-12"));
        assert!(report.contains("- 2026-03-05 [critical] Parking:"));
    }

    #[test]
    fn scoped_report_names_project_without_sites() {
        let report = build_report(
            &ReportInput {
                scope: Some("Riverside Depot"),
                months: 3,
                since_month: date(2026, 2, 1),
                reference: date(2026, 4, 1),
                snapshots: &[],
                alerts: &[],
                activity: &[],
            },
            &EvaluatorConfig::default(),
        );

        assert!(report.contains("Generated for Riverside Depot on 2026-04-01"));
        assert!(!report.contains("all projects"));
    }

    #[test]
    fn attention_list_breaks_ties_by_site() {
        let mut first = snapshot("Bay 1", Some(21.0));
        let mut second = snapshot("Bay 2", Some(21.0));
        first.site_id = Uuid::from_u128(2);
        second.site_id = Uuid::from_u128(1);
        let snapshots = vec![first, second];
        let flagged = sites_needing_attention(&snapshots, &EvaluatorConfig::default());
        let names: Vec<&str> = flagged.iter().map(|(s, _)| s.site_name.as_str()).collect();
        assert_eq!(names, vec!["Bay 2", "Bay 1"]);
    }

    #[test]
    fn empty_report_has_placeholders() {
        let report = build_report(
            &ReportInput {
                scope: None,
                months: 6,
                since_month: date(2025, 11, 1),
                reference: date(2026, 4, 1),
                snapshots: &[],
                alerts: &[],
                activity: &[],
            },
            &EvaluatorConfig::default(),
        );

        assert!(report.contains("Generated for all projects"));
        assert!(report.contains("No progress entries recorded for this window."));
        assert!(report.contains("All sites are on track."));
        assert!(report.contains("Every site has a recent entry."));
        assert!(report.contains("No alerts raised in this window."));
    }
}
