//! Application status state machine and timeline queries.
//!
//! Statuses are opaque labels, not a closed enum, so new labels need no
//! migration. The one reserved rule: setting the current status again is a
//! no-op that must not grow the history. The history append and the status
//! field write happen in a single guarded UPDATE, so a partially applied
//! transition is never observable.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::application::{ApplicationRow, StatusChange, STATUS_ERSTELLT};

const MAX_STATUS_LEN: usize = 50;

pub fn validate_status(status: &str) -> Result<(), AppError> {
    if status.is_empty() {
        return Err(AppError::Validation("Status must not be empty".to_string()));
    }
    if status.len() > MAX_STATUS_LEN {
        return Err(AppError::Validation(format!(
            "Status exceeds {MAX_STATUS_LEN} characters"
        )));
    }
    Ok(())
}

/// Whether setting `new_status` appends a history entry. Mirrors the
/// `status <> $new` guard on the UPDATE.
pub fn transition_appends(current: &str, new_status: &str) -> bool {
    current != new_status
}

/// History for display: rows created before status tracking have an empty
/// log, which is backfilled as a single synthetic `erstellt` entry at the
/// creation timestamp. Callers never see a null/empty case.
pub fn synthesize_history(app: &ApplicationRow) -> Vec<StatusChange> {
    if app.status_history.0.is_empty() {
        vec![StatusChange {
            status: STATUS_ERSTELLT.to_string(),
            timestamp: app.datum,
        }]
    } else {
        app.status_history.0.clone()
    }
}

/// `days` query parameter: "all" (or anything unparsable) means no cutoff.
pub fn parse_days_filter(raw: &str) -> Option<i64> {
    if raw == "all" {
        return None;
    }
    raw.parse::<i64>().ok().filter(|days| *days > 0)
}

pub async fn fetch_owned(
    pool: &PgPool,
    app_id: Uuid,
    user_id: Uuid,
) -> Result<ApplicationRow, AppError> {
    sqlx::query_as::<_, ApplicationRow>(
        "SELECT * FROM applications WHERE id = $1 AND user_id = $2",
    )
    .bind(app_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Application {app_id} not found")))
}

/// Creates an application with its initial history entry.
pub async fn create_application(
    pool: &PgPool,
    user_id: Uuid,
    firma: &str,
    position: Option<&str>,
    quelle: Option<&str>,
    notizen: Option<&str>,
    now: DateTime<Utc>,
) -> Result<ApplicationRow, AppError> {
    let history = Json(vec![StatusChange {
        status: STATUS_ERSTELLT.to_string(),
        timestamp: now,
    }]);

    Ok(sqlx::query_as::<_, ApplicationRow>(
        "INSERT INTO applications (user_id, firma, position, quelle, status, status_history, notizen, datum) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING *",
    )
    .bind(user_id)
    .bind(firma)
    .bind(position)
    .bind(quelle)
    .bind(STATUS_ERSTELLT)
    .bind(history)
    .bind(notizen)
    .bind(now)
    .fetch_one(pool)
    .await?)
}

/// Applies a status transition. Equal status is a no-op; otherwise the
/// history entry and the status field are written together in one guarded
/// statement.
pub async fn set_status(
    pool: &PgPool,
    app_id: Uuid,
    user_id: Uuid,
    new_status: &str,
    now: DateTime<Utc>,
) -> Result<ApplicationRow, AppError> {
    let new_status = new_status.trim();
    validate_status(new_status)?;

    let existing = fetch_owned(pool, app_id, user_id).await?;
    if !transition_appends(&existing.status, new_status) {
        return Ok(existing);
    }

    let entry = Json(vec![StatusChange {
        status: new_status.to_string(),
        timestamp: now,
    }]);

    // The status guard also wins races: a concurrent identical transition
    // makes this a no-op rather than a duplicate append.
    sqlx::query(
        "UPDATE applications SET status = $3, status_history = status_history || $4 \
         WHERE id = $1 AND user_id = $2 AND status <> $3",
    )
    .bind(app_id)
    .bind(user_id)
    .bind(new_status)
    .bind(entry)
    .execute(pool)
    .await?;

    fetch_owned(pool, app_id, user_id).await
}

/// Records how an application was sent and moves it to `versendet`.
pub async fn mark_sent(
    pool: &PgPool,
    app_id: Uuid,
    user_id: Uuid,
    sent_via: &str,
    now: DateTime<Utc>,
) -> Result<ApplicationRow, AppError> {
    let updated = sqlx::query(
        "UPDATE applications SET sent_at = $3, sent_via = $4 WHERE id = $1 AND user_id = $2",
    )
    .bind(app_id)
    .bind(user_id)
    .bind(now)
    .bind(sent_via)
    .execute(pool)
    .await?
    .rows_affected();

    if updated == 0 {
        return Err(AppError::NotFound(format!("Application {app_id} not found")));
    }

    set_status(pool, app_id, user_id, crate::models::application::STATUS_VERSENDET, now).await
}

/// Applications for the timeline view, newest first, each with a
/// non-empty (possibly backfilled) history.
pub async fn timeline(
    pool: &PgPool,
    user_id: Uuid,
    days: Option<i64>,
    now: DateTime<Utc>,
) -> Result<Vec<ApplicationRow>, AppError> {
    let mut apps = match days {
        Some(days) => {
            let cutoff = now - chrono::Duration::days(days);
            sqlx::query_as::<_, ApplicationRow>(
                "SELECT * FROM applications WHERE user_id = $1 AND datum >= $2 ORDER BY datum DESC",
            )
            .bind(user_id)
            .bind(cutoff)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, ApplicationRow>(
                "SELECT * FROM applications WHERE user_id = $1 ORDER BY datum DESC",
            )
            .bind(user_id)
            .fetch_all(pool)
            .await?
        }
    };

    for app in &mut apps {
        app.status_history = Json(synthesize_history(app));
    }
    Ok(apps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn make_application(status: &str, history: Vec<StatusChange>) -> ApplicationRow {
        ApplicationRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            firma: "ACME GmbH".to_string(),
            position: Some("Backend Engineer".to_string()),
            quelle: None,
            status: status.to_string(),
            status_history: Json(history),
            notizen: None,
            sent_at: None,
            sent_via: None,
            datum: Utc::now(),
        }
    }

    fn change(status: &str, timestamp: DateTime<Utc>) -> StatusChange {
        StatusChange {
            status: status.to_string(),
            timestamp,
        }
    }

    #[test]
    fn test_equal_status_is_noop() {
        assert!(!transition_appends("versendet", "versendet"));
        assert!(transition_appends("erstellt", "versendet"));
    }

    #[test]
    fn test_transition_sequence_builds_ordered_history() {
        // erstellt → versendet → antwort_erhalten: three entries, in order,
        // with non-decreasing timestamps; repeating the last one is a no-op.
        let t0 = Utc::now();
        let mut status = STATUS_ERSTELLT.to_string();
        let mut history = vec![change(STATUS_ERSTELLT, t0)];

        for (i, next) in ["versendet", "antwort_erhalten", "antwort_erhalten"]
            .iter()
            .enumerate()
        {
            let now = t0 + Duration::minutes(i as i64 + 1);
            if transition_appends(&status, next) {
                history.push(change(next, now));
                status = next.to_string();
            }
        }

        assert_eq!(history.len(), 3);
        assert_eq!(
            history.iter().map(|c| c.status.as_str()).collect::<Vec<_>>(),
            vec!["erstellt", "versendet", "antwort_erhalten"]
        );
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        // Class invariant: last history entry matches the current status.
        assert_eq!(history.last().unwrap().status, status);
    }

    #[test]
    fn test_synthesize_history_backfills_empty() {
        let app = make_application("erstellt", vec![]);
        let history = synthesize_history(&app);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, STATUS_ERSTELLT);
        assert_eq!(history[0].timestamp, app.datum);
    }

    #[test]
    fn test_synthesize_history_keeps_existing() {
        let t0 = Utc::now();
        let app = make_application(
            "versendet",
            vec![change("erstellt", t0), change("versendet", t0)],
        );
        let history = synthesize_history(&app);
        assert_eq!(history.len(), 2);
        assert_eq!(history.last().unwrap().status, app.status);
    }

    #[test]
    fn test_parse_days_filter() {
        assert_eq!(parse_days_filter("all"), None);
        assert_eq!(parse_days_filter("7"), Some(7));
        assert_eq!(parse_days_filter("30"), Some(30));
        assert_eq!(parse_days_filter("not-a-number"), None);
        assert_eq!(parse_days_filter("-5"), None);
        assert_eq!(parse_days_filter("0"), None);
    }

    #[test]
    fn test_validate_status() {
        assert!(validate_status("erstellt").is_ok());
        assert!(validate_status("interview_geplant").is_ok());
        assert!(validate_status("").is_err());
        assert!(validate_status(&"x".repeat(MAX_STATUS_LEN + 1)).is_err());
    }
}
