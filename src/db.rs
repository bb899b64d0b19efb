use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::config::EvaluatorConfig;
use crate::evaluator;
use crate::models::{
    parse_month, AlertEvent, AlertLogEntry, AlertTarget, MonthlyProgressRecord, PendingAlert,
    ProgressEntry, SiteActivity, SiteSnapshot, Status, Validity,
};

/// Result of writing one monthly entry.
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub record: MonthlyProgressRecord,
    pub previous: Option<Status>,
    pub alerts: Vec<AlertEvent>,
}

#[derive(Debug, Clone, Default)]
pub struct ImportSummary {
    pub records: usize,
    pub alerts: usize,
    pub status_mismatches: usize,
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool, config: &EvaluatorConfig) -> anyhow::Result<()> {
    let project_id = Uuid::parse_str("6b1f2c1e-5d0a-4c1b-9f0e-2a7d8c4e1b30")?;
    sqlx::query(
        r#"
        INSERT INTO site_progress.projects (id, name, notification_emails)
        VALUES ($1, $2, $3)
        ON CONFLICT (name) DO UPDATE
        SET notification_emails = EXCLUDED.notification_emails
        "#,
    )
    .bind(project_id)
    .bind("Harbor Point Residences")
    .bind(vec![
        "project.manager@harborpoint.example".to_string(),
        "site.ops@harborpoint.example".to_string(),
    ])
    .execute(pool)
    .await?;

    let sites = vec![
        (
            Uuid::parse_str("a3c9e7d2-1f4b-4e8a-b6c5-0d2e9f7a1c11")?,
            "North Tower",
        ),
        (
            Uuid::parse_str("b4d0f8e3-2a5c-4f9b-87d6-1e3fa08b2d22")?,
            "Parking Structure",
        ),
        (
            Uuid::parse_str("c5e1a9f4-3b6d-4a0c-98e7-2f4ab19c3e33")?,
            "Retail Podium",
        ),
    ];

    for &(id, name) in &sites {
        sqlx::query(
            r#"
            INSERT INTO site_progress.sites (id, project_id, name)
            VALUES ($1, $2, $3)
            ON CONFLICT (project_id, name) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(project_id)
        .bind(name)
        .execute(pool)
        .await?;
    }

    let entries = vec![
        (0, "2026-01", 18.0, 12.5, "Foundations poured"),
        (0, "2026-02", 33.0, 25.0, "Core walls to level 3"),
        (0, "2026-03", 52.0, 37.5, "Ahead of baseline"),
        (1, "2026-01", 10.0, 12.5, "Excavation slowed by groundwater"),
        (1, "2026-02", 21.0, 25.0, "Dewatering pumps added"),
        (2, "2026-02", 40.0, 25.0, "Steel frame erected"),
        (2, "2026-03", 44.5, 37.5, "Cladding supplier delayed"),
    ];

    for (site_index, month, total, target, note) in entries {
        let entry = ProgressEntry {
            site_id: sites[site_index].0,
            month: parse_month(month)?,
            total_progress: Some(total),
            target_rate: Some(target),
            observations: Some(note.to_string()),
        };
        record_progress(pool, entry, config).await?;
    }

    Ok(())
}

/// Looks up the project, label and recipients for a site.
pub async fn fetch_site_target(conn: &mut PgConnection, site_id: Uuid) -> anyhow::Result<AlertTarget> {
    let row = sqlx::query(
        r#"
        SELECT s.name AS site_name, p.id AS project_id, p.name AS project_name,
               p.notification_emails
        FROM site_progress.sites s
        JOIN site_progress.projects p ON p.id = s.project_id
        WHERE s.id = $1
        "#,
    )
    .bind(site_id)
    .fetch_optional(&mut *conn)
    .await?
    .with_context(|| format!("site {site_id} not found"))?;

    let site_name: String = row.get("site_name");
    let project_name: String = row.get("project_name");
    let recipients: Vec<String> = row.get("notification_emails");

    Ok(AlertTarget {
        project_id: row.get("project_id"),
        site_id: Some(site_id),
        label: format!("{site_name} ({project_name})"),
        recipients: recipients.into_iter().collect(),
    })
}

pub async fn fetch_project_target(
    pool: &PgPool,
    project_id: Uuid,
    site_id: Option<Uuid>,
) -> anyhow::Result<AlertTarget> {
    let mut conn = pool.acquire().await?;

    if let Some(site_id) = site_id {
        let target = fetch_site_target(&mut conn, site_id).await?;
        if target.project_id != project_id {
            anyhow::bail!("site {site_id} does not belong to project {project_id}");
        }
        return Ok(target);
    }

    let row = sqlx::query(
        "SELECT name, notification_emails FROM site_progress.projects WHERE id = $1",
    )
    .bind(project_id)
    .fetch_optional(&mut *conn)
    .await?
    .with_context(|| format!("project {project_id} not found"))?;
    let recipients: Vec<String> = row.get("notification_emails");

    Ok(AlertTarget {
        project_id,
        site_id: None,
        label: row.get("name"),
        recipients: recipients.into_iter().collect(),
    })
}

/// Evaluates an entry, upserts it and stores any alerts it triggers, all
/// in one transaction.
pub async fn record_progress(
    pool: &PgPool,
    entry: ProgressEntry,
    config: &EvaluatorConfig,
) -> anyhow::Result<RecordOutcome> {
    let mut tx = pool.begin().await?;
    let target = fetch_site_target(&mut tx, entry.site_id).await?;
    let record = entry.evaluate(config);

    if let Validity::Invalid(reason) = record.validity() {
        tracing::warn!(
            site_id = %record.site_id,
            month = %record.month,
            %reason,
            "progress value unusable, classified as critical"
        );
    }

    let previous_row = sqlx::query(
        r#"
        SELECT status, total_progress
        FROM site_progress.monthly_progress
        WHERE site_id = $1 AND month = $2
        FOR UPDATE
        "#,
    )
    .bind(record.site_id)
    .bind(record.month)
    .fetch_optional(&mut *tx)
    .await?;

    let previous = previous_row.map(|row| {
        let stored: String = row.get("status");
        stored.parse::<Status>().unwrap_or_else(|err| {
            tracing::warn!(%err, "stored status unreadable, recomputing from progress");
            evaluator::classify(row.get("total_progress"), config)
        })
    });

    sqlx::query(
        r#"
        INSERT INTO site_progress.monthly_progress
        (id, site_id, month, total_progress, target_rate, normal_rate, delay_rate, status, observations)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (site_id, month) DO UPDATE
        SET total_progress = EXCLUDED.total_progress,
            target_rate = EXCLUDED.target_rate,
            normal_rate = EXCLUDED.normal_rate,
            delay_rate = EXCLUDED.delay_rate,
            status = EXCLUDED.status,
            observations = EXCLUDED.observations,
            updated_at = now()
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(record.site_id)
    .bind(record.month)
    .bind(record.total_progress)
    .bind(record.target_rate)
    .bind(record.normal_rate)
    .bind(record.delay_rate())
    .bind(record.status().as_str())
    .bind(&record.observations)
    .execute(&mut *tx)
    .await?;

    let alerts = evaluator::build_alert_obligations(&record, previous, &target);
    for alert in &alerts {
        insert_alert(&mut tx, alert).await?;
    }

    tx.commit().await?;

    tracing::info!(
        site_id = %record.site_id,
        month = %record.month,
        status = %record.status(),
        previous = ?previous,
        alerts = alerts.len(),
        "recorded monthly progress"
    );

    Ok(RecordOutcome {
        record,
        previous,
        alerts,
    })
}

pub async fn insert_alert(conn: &mut PgConnection, alert: &AlertEvent) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO site_progress.alerts
        (id, project_id, site_id, alert_type, message, recipients)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(id)
    .bind(alert.project_id)
    .bind(alert.site_id)
    .bind(alert.alert_type.as_str())
    .bind(&alert.message)
    .bind(alert.recipients.iter().cloned().collect::<Vec<String>>())
    .execute(&mut *conn)
    .await?;

    tracing::debug!(%id, alert_type = %alert.alert_type, "stored alert");
    Ok(id)
}

pub async fn store_alert(pool: &PgPool, alert: &AlertEvent) -> anyhow::Result<Uuid> {
    let mut conn = pool.acquire().await?;
    insert_alert(&mut conn, alert).await
}

pub async fn fetch_site_activity(
    pool: &PgPool,
    project_id: Option<Uuid>,
) -> anyhow::Result<Vec<SiteActivity>> {
    let mut query = String::from(
        "SELECT s.id AS site_id, s.name AS site_name, p.id AS project_id, \
         p.name AS project_name, p.notification_emails, \
         (SELECT max(mp.created_at) FROM site_progress.monthly_progress mp \
          WHERE mp.site_id = s.id) AS last_entry_created_at, \
         (SELECT max(mp.updated_at) FROM site_progress.monthly_progress mp \
          WHERE mp.site_id = s.id) AS last_entry_edited_at, \
         (SELECT max(a.created_at) FROM site_progress.alerts a \
          WHERE a.site_id = s.id AND a.alert_type = 'data_entry_delay') AS last_delay_alert_at \
         FROM site_progress.sites s \
         JOIN site_progress.projects p ON p.id = s.project_id",
    );

    if project_id.is_some() {
        query.push_str(" WHERE p.id = $1");
    }
    query.push_str(" ORDER BY p.name, s.name");

    let mut rows = sqlx::query(&query);
    if let Some(value) = project_id {
        rows = rows.bind(value);
    }

    let records = rows.fetch_all(pool).await?;
    let mut sites = Vec::new();

    for row in records {
        sites.push(SiteActivity {
            site_id: row.get("site_id"),
            site_name: row.get("site_name"),
            project_id: row.get("project_id"),
            project_name: row.get("project_name"),
            recipients: row.get("notification_emails"),
            last_entry_created_at: row.get("last_entry_created_at"),
            last_entry_edited_at: row.get("last_entry_edited_at"),
            last_delay_alert_at: row.get("last_delay_alert_at"),
        });
    }

    Ok(sites)
}

/// Raises `data_entry_delay` alerts for overdue sites, at most once per
/// site between entries.
pub async fn check_delays(
    pool: &PgPool,
    reference: NaiveDate,
    config: &EvaluatorConfig,
) -> anyhow::Result<Vec<AlertEvent>> {
    let sites = fetch_site_activity(pool, None).await?;
    let mut raised = Vec::new();

    for site in sites {
        let Some(alert) =
            evaluator::build_delay_alert(&site.alert_target(), site.last_entry(), reference, config)
        else {
            continue;
        };

        if site.delay_already_alerted() {
            tracing::debug!(site_id = %site.site_id, "delay alert already raised since last entry");
            continue;
        }

        store_alert(pool, &alert).await?;
        tracing::info!(site_id = %site.site_id, last_entry = ?site.last_entry(), "site overdue for data entry");
        raised.push(alert);
    }

    Ok(raised)
}

pub async fn fetch_pending_alerts(pool: &PgPool, limit: i64) -> anyhow::Result<Vec<PendingAlert>> {
    let rows = sqlx::query(
        r#"
        SELECT id, project_id, site_id, alert_type, message, recipients, created_at
        FROM site_progress.alerts
        WHERE dispatched_at IS NULL
        ORDER BY created_at
        LIMIT $1
        "#,
    )
    .bind(limit.max(1))
    .fetch_all(pool)
    .await?;

    let mut alerts = Vec::new();
    for row in rows {
        let alert_type: String = row.get("alert_type");
        let recipients: Vec<String> = row.get("recipients");
        alerts.push(PendingAlert {
            id: row.get("id"),
            created_at: row.get("created_at"),
            event: AlertEvent {
                project_id: row.get("project_id"),
                site_id: row.get("site_id"),
                alert_type: alert_type.parse()?,
                message: row.get("message"),
                recipients: recipients.into_iter().collect(),
            },
        });
    }

    Ok(alerts)
}

/// Latest entry per site at or after `since_month`.
pub async fn fetch_latest_snapshots(
    pool: &PgPool,
    project_id: Option<Uuid>,
    since_month: NaiveDate,
) -> anyhow::Result<Vec<SiteSnapshot>> {
    let mut query = String::from(
        "SELECT DISTINCT ON (s.id) s.id AS site_id, s.name AS site_name, \
         p.name AS project_name, mp.month, mp.total_progress, mp.target_rate \
         FROM site_progress.monthly_progress mp \
         JOIN site_progress.sites s ON s.id = mp.site_id \
         JOIN site_progress.projects p ON p.id = s.project_id \
         WHERE mp.month >= $1",
    );

    if project_id.is_some() {
        query.push_str(" AND p.id = $2");
    }
    query.push_str(" ORDER BY s.id, mp.month DESC");

    let mut rows = sqlx::query(&query).bind(since_month);
    if let Some(value) = project_id {
        rows = rows.bind(value);
    }

    let records = rows.fetch_all(pool).await?;
    let mut snapshots = Vec::new();

    for row in records {
        snapshots.push(SiteSnapshot {
            site_id: row.get("site_id"),
            site_name: row.get("site_name"),
            project_name: row.get("project_name"),
            month: row.get("month"),
            total_progress: row.get("total_progress"),
            target_rate: row.get("target_rate"),
        });
    }

    Ok(snapshots)
}

pub async fn fetch_recent_alerts(
    pool: &PgPool,
    project_id: Option<Uuid>,
    since: DateTime<Utc>,
) -> anyhow::Result<Vec<AlertLogEntry>> {
    let mut query = String::from(
        "SELECT a.created_at, a.alert_type, a.message, p.name AS project_name, \
         s.name AS site_name \
         FROM site_progress.alerts a \
         JOIN site_progress.projects p ON p.id = a.project_id \
         LEFT JOIN site_progress.sites s ON s.id = a.site_id \
         WHERE a.created_at >= $1",
    );

    if project_id.is_some() {
        query.push_str(" AND p.id = $2");
    }
    query.push_str(" ORDER BY a.created_at DESC");

    let mut rows = sqlx::query(&query).bind(since);
    if let Some(value) = project_id {
        rows = rows.bind(value);
    }

    let records = rows.fetch_all(pool).await?;
    let mut alerts = Vec::new();

    for row in records {
        alerts.push(AlertLogEntry {
            created_at: row.get("created_at"),
            alert_type: row.get("alert_type"),
            project_name: row.get("project_name"),
            site_name: row.get("site_name"),
            message: row.get("message"),
        });
    }

    Ok(alerts)
}

/// Imports monthly entries from CSV. Every row goes through
/// [`record_progress`]; a `status` column, if present, is only compared
/// against the derived status.
pub async fn import_csv(
    pool: &PgPool,
    csv_path: &std::path::Path,
    config: &EvaluatorConfig,
) -> anyhow::Result<ImportSummary> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        site_id: Uuid,
        month: String,
        total_progress: Option<f64>,
        target_rate: Option<f64>,
        observations: Option<String>,
        status: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut summary = ImportSummary::default();

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let line = index + 2;
        let row = result.with_context(|| format!("malformed row at line {line}"))?;
        let entry = ProgressEntry {
            site_id: row.site_id,
            month: parse_month(&row.month).with_context(|| format!("line {line}"))?,
            total_progress: row.total_progress,
            target_rate: row.target_rate,
            observations: row.observations.filter(|text| !text.trim().is_empty()),
        };

        let outcome = record_progress(pool, entry, config).await?;

        if let Some(claimed) = row.status.as_deref().filter(|s| !s.trim().is_empty()) {
            if claimed.trim() != outcome.record.status().as_str() {
                tracing::warn!(
                    line,
                    claimed,
                    derived = %outcome.record.status(),
                    "ignoring status column that disagrees with progress"
                );
                summary.status_mismatches += 1;
            }
        }

        summary.records += 1;
        summary.alerts += outcome.alerts.len();
    }

    Ok(summary)
}
