//! Topic row operations and the append-only audit log

use crate::error::{Error, Result};
use crate::models::{AuditAction, AuditEntry, Topic, UNASSIGNED_TOPIC_LABEL};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Bad timestamp in topic row: {e}")))
}

fn parse_keywords(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

pub(crate) fn map_row(row: &SqliteRow) -> Result<Topic> {
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    Ok(Topic {
        id: row.get("id"),
        label: row.get("label"),
        keywords: parse_keywords(row.get("keywords")),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn map_audit_row(row: &SqliteRow) -> Result<AuditEntry> {
    let action_str: String = row.get("action");
    let action = AuditAction::parse(&action_str)
        .ok_or_else(|| Error::Internal(format!("Unknown audit action {action_str}")))?;
    let changed_at: String = row.get("changed_at");
    Ok(AuditEntry {
        id: row.get("id"),
        topic_id: row.get("topic_id"),
        action,
        old_label: row.get("old_label"),
        new_label: row.get("new_label"),
        old_keywords: row
            .get::<Option<String>, _>("old_keywords")
            .and_then(|s| serde_json::from_str(&s).ok()),
        new_keywords: row
            .get::<Option<String>, _>("new_keywords")
            .and_then(|s| serde_json::from_str(&s).ok()),
        changed_by: row.get("changed_by"),
        ip_address: row.get("ip_address"),
        user_agent: row.get("user_agent"),
        changed_at: parse_timestamp(&changed_at)?,
    })
}

/// Create a topic and record a `create` audit entry.
pub async fn create(
    pool: &SqlitePool,
    label: &str,
    keywords: &[String],
    changed_by: &str,
) -> Result<i64> {
    let mut tx = pool.begin().await?;
    let id = create_tx(&mut tx, label, keywords, changed_by).await?;
    tx.commit().await?;
    Ok(id)
}

pub async fn create_tx(
    tx: &mut Transaction<'_, Sqlite>,
    label: &str,
    keywords: &[String],
    changed_by: &str,
) -> Result<i64> {
    let now = Utc::now().to_rfc3339();
    let keywords_json = serde_json::to_string(keywords)
        .map_err(|e| Error::Internal(format!("Keyword serialisation failed: {e}")))?;

    let result = sqlx::query(
        "INSERT INTO topic (label, keywords, created_at, updated_at) VALUES (?, ?, ?, ?)",
    )
    .bind(label)
    .bind(&keywords_json)
    .bind(&now)
    .bind(&now)
    .execute(&mut **tx)
    .await?;

    let id = result.last_insert_rowid();

    sqlx::query(
        r#"
        INSERT INTO topic_audit_log (topic_id, action, new_label, new_keywords, changed_by, changed_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(AuditAction::Create.as_str())
    .bind(label)
    .bind(&keywords_json)
    .bind(changed_by)
    .bind(&now)
    .execute(&mut **tx)
    .await?;

    Ok(id)
}

pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Topic>> {
    let row = sqlx::query("SELECT * FROM topic WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(map_row).transpose()
}

pub async fn get_by_label(pool: &SqlitePool, label: &str) -> Result<Option<Topic>> {
    let row = sqlx::query("SELECT * FROM topic WHERE label = ? LIMIT 1")
        .bind(label)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(map_row).transpose()
}

pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Topic>> {
    let rows = sqlx::query("SELECT * FROM topic ORDER BY id")
        .fetch_all(pool)
        .await?;
    rows.iter().map(map_row).collect()
}

pub async fn count(pool: &SqlitePool) -> Result<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM topic")
        .fetch_one(pool)
        .await?;
    Ok(n)
}

/// The sentinel topic absorbing annotations whose topic is deleted.
/// Created on first use.
pub async fn ensure_unassigned(pool: &SqlitePool) -> Result<i64> {
    if let Some(topic) = get_by_label(pool, UNASSIGNED_TOPIC_LABEL).await? {
        return Ok(topic.id);
    }
    create(pool, UNASSIGNED_TOPIC_LABEL, &[], "system").await
}

/// Relabel a topic inside an open transaction: update the row, advance its
/// timestamp, and append exactly one audit entry carrying the delta.
pub async fn relabel_tx(
    tx: &mut Transaction<'_, Sqlite>,
    topic_id: i64,
    new_label: &str,
    new_keywords: &[String],
    changed_by: &str,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
) -> Result<Topic> {
    let row = sqlx::query("SELECT * FROM topic WHERE id = ?")
        .bind(topic_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Topic {topic_id} not found")))?;
    let current = map_row(&row)?;

    let now = Utc::now().to_rfc3339();
    let new_keywords_json = serde_json::to_string(new_keywords)
        .map_err(|e| Error::Internal(format!("Keyword serialisation failed: {e}")))?;
    let old_keywords_json = serde_json::to_string(&current.keywords)
        .map_err(|e| Error::Internal(format!("Keyword serialisation failed: {e}")))?;

    sqlx::query("UPDATE topic SET label = ?, keywords = ?, updated_at = ? WHERE id = ?")
        .bind(new_label)
        .bind(&new_keywords_json)
        .bind(&now)
        .bind(topic_id)
        .execute(&mut **tx)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO topic_audit_log (topic_id, action, old_label, new_label,
                                     old_keywords, new_keywords, changed_by,
                                     ip_address, user_agent, changed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(topic_id)
    .bind(AuditAction::Relabel.as_str())
    .bind(&current.label)
    .bind(new_label)
    .bind(&old_keywords_json)
    .bind(&new_keywords_json)
    .bind(changed_by)
    .bind(ip_address)
    .bind(user_agent)
    .bind(&now)
    .execute(&mut **tx)
    .await?;

    Ok(Topic {
        id: topic_id,
        label: new_label.to_string(),
        keywords: new_keywords.to_vec(),
        created_at: current.created_at,
        updated_at: parse_timestamp(&now)?,
    })
}

/// Append one reassignment audit entry. Labels carry the topic ids the
/// annotation moved between.
#[allow(clippy::too_many_arguments)]
pub async fn append_reassign_audit_tx(
    tx: &mut Transaction<'_, Sqlite>,
    target_topic_id: i64,
    old_topic_id: Option<i64>,
    feedback_id: &str,
    reason: Option<&str>,
    changed_by: &str,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
) -> Result<()> {
    let old_label = match old_topic_id {
        Some(id) => format!("topic_id={id}"),
        None => "topic_id=null".to_string(),
    };
    let delta = serde_json::json!({
        "feedback_id": feedback_id,
        "reason": reason,
    });

    sqlx::query(
        r#"
        INSERT INTO topic_audit_log (topic_id, action, old_label, new_label,
                                     new_keywords, changed_by, ip_address,
                                     user_agent, changed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(target_topic_id)
    .bind(AuditAction::ReassignFeedback.as_str())
    .bind(old_label)
    .bind(format!("topic_id={target_topic_id}"))
    .bind(delta.to_string())
    .bind(changed_by)
    .bind(ip_address)
    .bind(user_agent)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Audit history for one topic, newest first.
pub async fn audit_history(pool: &SqlitePool, topic_id: i64) -> Result<Vec<AuditEntry>> {
    let rows = sqlx::query(
        "SELECT * FROM topic_audit_log WHERE topic_id = ? ORDER BY changed_at DESC, id DESC",
    )
    .bind(topic_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(map_audit_row).collect()
}

/// Recent audit entries across all topics, newest first.
pub async fn recent_audit(pool: &SqlitePool, limit: i64) -> Result<Vec<AuditEntry>> {
    let rows = sqlx::query(
        "SELECT * FROM topic_audit_log ORDER BY changed_at DESC, id DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(map_audit_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_memory;

    #[tokio::test]
    async fn test_create_writes_audit_entry() {
        let pool = connect_memory().await.unwrap();
        let id = create(&pool, "shipping", &["delivery".into()], "system")
            .await
            .unwrap();

        let history = audit_history(&pool, id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, AuditAction::Create);
        assert_eq!(history[0].new_label.as_deref(), Some("shipping"));
    }

    #[tokio::test]
    async fn test_relabel_advances_timestamp_and_audits_delta() {
        let pool = connect_memory().await.unwrap();
        let id = create(&pool, "shiping", &["delivery".into()], "system")
            .await
            .unwrap();
        let before = get_by_id(&pool, id).await.unwrap().unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let mut tx = pool.begin().await.unwrap();
        let updated = relabel_tx(
            &mut tx,
            id,
            "shipping",
            &["delivery".into(), "courier".into()],
            "admin",
            Some("127.0.0.1"),
            Some("test-agent"),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert!(updated.updated_at > before.updated_at);

        let history = audit_history(&pool, id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, AuditAction::Relabel);
        assert_eq!(history[0].old_label.as_deref(), Some("shiping"));
        assert_eq!(history[0].new_label.as_deref(), Some("shipping"));
    }

    #[tokio::test]
    async fn test_relabel_unknown_topic_is_not_found() {
        let pool = connect_memory().await.unwrap();
        let mut tx = pool.begin().await.unwrap();
        let result = relabel_tx(&mut tx, 999, "x", &[], "admin", None, None).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_ensure_unassigned_is_idempotent() {
        let pool = connect_memory().await.unwrap();
        let a = ensure_unassigned(&pool).await.unwrap();
        let b = ensure_unassigned(&pool).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(count(&pool).await.unwrap(), 1);
    }
}
