use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, SecondsFormat, Timelike, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::SqlitePool;

use crate::error::Result;

/// Upper bound on rows pulled into a single aggregation.
const MAX_ROWS: i64 = 10_000;
const RECENT_ERRORS: i64 = 10;

pub const ERROR_EVENT: &str = "error";

/// Fixed-width UTC timestamps so stored values compare correctly as text.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    pub event_type: String,
    pub data: String,
    pub user_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackedEvent {
    pub event_type: String,
    pub data: Value,
    pub user_id: Option<String>,
    pub created_at: String,
}

impl From<EventRow> for TrackedEvent {
    fn from(row: EventRow) -> Self {
        Self {
            data: serde_json::from_str(&row.data).unwrap_or(Value::Null),
            event_type: row.event_type,
            user_id: row.user_id,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MetricRow {
    pub metric_name: String,
    pub value: f64,
    pub unit: String,
}

#[derive(Debug, Serialize)]
pub struct Period {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Default, Serialize)]
pub struct EventStats {
    pub total_events: usize,
    pub unique_users: usize,
    pub event_types: BTreeMap<String, usize>,
    pub daily_events: BTreeMap<String, usize>,
    pub peak_hours: Vec<usize>,
}

#[derive(Debug, Serialize)]
pub struct ProjectAnalytics {
    pub project_id: String,
    pub period: Period,
    pub stats: EventStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub unit: String,
}

#[derive(Debug, Serialize)]
pub struct PerformanceReport {
    pub project_id: String,
    pub period_hours: i64,
    pub metrics: BTreeMap<String, MetricSummary>,
}

#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub project_id: String,
    pub analytics: ProjectAnalytics,
    pub performance: PerformanceReport,
    pub recent_errors: Vec<TrackedEvent>,
    pub generated_at: String,
}

pub fn summarize_events(rows: &[EventRow]) -> EventStats {
    let mut stats = EventStats {
        total_events: rows.len(),
        peak_hours: vec![0; 24],
        ..Default::default()
    };
    let mut users = HashSet::new();

    for row in rows {
        if let Some(user) = row.user_id.as_deref().filter(|u| !u.is_empty()) {
            users.insert(user);
        }
        *stats.event_types.entry(row.event_type.clone()).or_default() += 1;

        if let Some(day) = row.created_at.get(..10) {
            *stats.daily_events.entry(day.to_string()).or_default() += 1;
        }
        if let Ok(at) = DateTime::parse_from_rfc3339(&row.created_at) {
            stats.peak_hours[at.with_timezone(&Utc).hour() as usize] += 1;
        }
    }

    stats.unique_users = users.len();
    stats
}

pub fn summarize_metrics(rows: &[MetricRow]) -> BTreeMap<String, MetricSummary> {
    let mut sums: BTreeMap<String, (MetricSummary, f64)> = BTreeMap::new();

    for row in rows {
        let (summary, total) = sums.entry(row.metric_name.clone()).or_insert_with(|| {
            (
                MetricSummary {
                    count: 0,
                    min: row.value,
                    max: row.value,
                    avg: 0.0,
                    unit: row.unit.clone(),
                },
                0.0,
            )
        });
        summary.count += 1;
        summary.min = summary.min.min(row.value);
        summary.max = summary.max.max(row.value);
        *total += row.value;
    }

    sums.into_iter()
        .map(|(name, (mut summary, total))| {
            summary.avg = total / summary.count as f64;
            (name, summary)
        })
        .collect()
}

pub async fn track_event(
    pool: &SqlitePool,
    project_id: &str,
    event_type: &str,
    data: &Value,
    user_id: Option<&str>,
) -> Result<()> {
    record_event(pool, project_id, event_type, data, user_id, Utc::now()).await
}

pub async fn record_event(
    pool: &SqlitePool,
    project_id: &str,
    event_type: &str,
    data: &Value,
    user_id: Option<&str>,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO analytics_events (project_id, event_type, data, user_id, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(project_id)
    .bind(event_type)
    .bind(serde_json::to_string(data)?)
    .bind(user_id)
    .bind(timestamp(at))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn project_analytics(
    pool: &SqlitePool,
    project_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<ProjectAnalytics> {
    let (start, end) = (timestamp(start), timestamp(end));
    let rows = sqlx::query_as::<_, EventRow>(
        "SELECT event_type, data, user_id, created_at FROM analytics_events
         WHERE project_id = ? AND created_at >= ? AND created_at <= ?
         ORDER BY created_at LIMIT ?",
    )
    .bind(project_id)
    .bind(&start)
    .bind(&end)
    .bind(MAX_ROWS)
    .fetch_all(pool)
    .await?;

    Ok(ProjectAnalytics {
        project_id: project_id.to_string(),
        period: Period { start, end },
        stats: summarize_events(&rows),
    })
}

pub async fn track_metric(
    pool: &SqlitePool,
    project_id: &str,
    metric_name: &str,
    value: f64,
    unit: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO performance_metrics (project_id, metric_name, value, unit, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(project_id)
    .bind(metric_name)
    .bind(value)
    .bind(unit)
    .bind(timestamp(Utc::now()))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn performance_metrics(
    pool: &SqlitePool,
    project_id: &str,
    metric_name: Option<&str>,
    hours: i64,
) -> Result<PerformanceReport> {
    let since = timestamp(Utc::now() - Duration::hours(hours));
    let rows = sqlx::query_as::<_, MetricRow>(
        "SELECT metric_name, value, unit FROM performance_metrics
         WHERE project_id = ? AND created_at >= ? AND (? IS NULL OR metric_name = ?)
         ORDER BY created_at LIMIT ?",
    )
    .bind(project_id)
    .bind(since)
    .bind(metric_name)
    .bind(metric_name)
    .bind(MAX_ROWS)
    .fetch_all(pool)
    .await?;

    Ok(PerformanceReport {
        project_id: project_id.to_string(),
        period_hours: hours,
        metrics: summarize_metrics(&rows),
    })
}

/// Last week of events, last day of metrics and the latest error events.
pub async fn dashboard(pool: &SqlitePool, project_id: &str) -> Result<Dashboard> {
    let now = Utc::now();
    let analytics = project_analytics(pool, project_id, now - Duration::days(7), now).await?;
    let performance = performance_metrics(pool, project_id, None, 24).await?;

    let recent_errors = sqlx::query_as::<_, EventRow>(
        "SELECT event_type, data, user_id, created_at FROM analytics_events
         WHERE project_id = ? AND event_type = ? AND created_at >= ?
         ORDER BY created_at DESC LIMIT ?",
    )
    .bind(project_id)
    .bind(ERROR_EVENT)
    .bind(timestamp(now - Duration::hours(24)))
    .bind(RECENT_ERRORS)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(TrackedEvent::from)
    .collect();

    Ok(Dashboard {
        project_id: project_id.to_string(),
        analytics,
        performance,
        recent_errors,
        generated_at: timestamp(now),
    })
}
