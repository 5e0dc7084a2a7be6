//! Postgres-backed store in the `escalation_triage` schema.
//!
//! Every mutation is one transaction. Writers lock the student's profile row
//! first and the escalation row second, which serializes rescoring per student
//! and read-modify-write per escalation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use super::{timestamp, EscalationStore, StoreSnapshot};
use crate::error::{Result, TriageError};
use crate::models::{
    AcademicFlags, AdvisorNote, ConversationMessage, CreatedEscalation, Escalation,
    EscalationFilter, EscalationPatch, NewEscalation, Notification, NotificationFilter,
    ProfileOrigin, ProfilePatch, Reply, StudentProfile, CRITICAL_PRIORITY,
};
use crate::risk;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl EscalationStore for PgStore {
    async fn create(&self, request: NewEscalation, flags: AcademicFlags) -> Result<CreatedEscalation> {
        request.validate()?;
        let now = timestamp();
        let escalation = Escalation::from_request(request, Uuid::new_v4(), now);
        let student_id = escalation.student_id.clone();

        let mut tx = self.pool.begin().await?;
        let synthesized =
            insert_profile_if_absent(&mut tx, &StudentProfile::synthesized(&student_id, now))
                .await?;
        lock_profile(&mut tx, &student_id).await?;

        sqlx::query(
            r#"
            INSERT INTO escalation_triage.escalations
            (id, student_id, question, ai_response, conversation_history, escalation_reason,
             priority, status, notes, responses, assigned_to, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(escalation.id)
        .bind(&escalation.student_id)
        .bind(&escalation.question)
        .bind(&escalation.ai_response)
        .bind(Json(&escalation.conversation_history))
        .bind(&escalation.escalation_reason)
        .bind(escalation.priority)
        .bind(escalation.status.as_str())
        .bind(Json(&escalation.notes))
        .bind(Json(&escalation.responses))
        .bind(&escalation.assigned_to)
        .bind(escalation.created_at)
        .bind(escalation.updated_at)
        .execute(&mut *tx)
        .await?;

        let profile = rescore(&mut tx, &student_id, flags, Some(now)).await?;
        tx.commit().await?;

        Ok(CreatedEscalation {
            escalation,
            profile,
            profile_origin: if synthesized {
                ProfileOrigin::SynthesizedDefault
            } else {
                ProfileOrigin::Existing
            },
        })
    }

    async fn get(&self, id: Uuid) -> Result<Escalation> {
        let row = sqlx::query("SELECT * FROM escalation_triage.escalations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(TriageError::EscalationNotFound(id))?;
        escalation_from_row(&row)
    }

    async fn list(&self, filter: &EscalationFilter) -> Result<Vec<Escalation>> {
        let mut conn = self.pool.acquire().await?;
        fetch_queue(&mut conn, filter).await
    }

    async fn update(
        &self,
        id: Uuid,
        patch: &EscalationPatch,
        flags: Option<AcademicFlags>,
    ) -> Result<Escalation> {
        let now = timestamp();
        let mut tx = self.pool.begin().await?;
        let student_id = owner_of(&mut tx, id).await?;
        lock_profile(&mut tx, &student_id).await?;
        let mut escalation = lock_escalation(&mut tx, id).await?;

        if escalation.apply_patch(patch, now)? {
            write_escalation(&mut tx, &escalation).await?;
        }
        if let Some(flags) = flags {
            rescore(&mut tx, &student_id, flags, None).await?;
        }

        tx.commit().await?;
        Ok(escalation)
    }

    async fn add_response(&self, id: Uuid, student_id: &str, message: &str) -> Result<Escalation> {
        let now = timestamp();
        let mut tx = self.pool.begin().await?;
        let owner = owner_of(&mut tx, id).await?;
        lock_profile(&mut tx, &owner).await?;
        let mut escalation = lock_escalation(&mut tx, id).await?;

        escalation.record_response(student_id, message, now)?;
        write_escalation(&mut tx, &escalation).await?;
        sqlx::query(
            r#"
            UPDATE escalation_triage.student_profiles
            SET last_interaction = GREATEST(last_interaction, $2)
            WHERE student_id = $1
            "#,
        )
        .bind(&owner)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(escalation)
    }

    async fn add_advisor_response(
        &self,
        id: Uuid,
        advisor: &str,
        message: &str,
    ) -> Result<Escalation> {
        let now = timestamp();
        let mut tx = self.pool.begin().await?;
        let owner = owner_of(&mut tx, id).await?;
        lock_profile(&mut tx, &owner).await?;
        let mut escalation = lock_escalation(&mut tx, id).await?;

        escalation.record_advisor_response(advisor, message, now)?;
        write_escalation(&mut tx, &escalation).await?;

        tx.commit().await?;
        Ok(escalation)
    }

    async fn delete(&self, id: Uuid, flags: AcademicFlags) -> Result<Escalation> {
        let mut tx = self.pool.begin().await?;
        let student_id = owner_of(&mut tx, id).await?;
        lock_profile(&mut tx, &student_id).await?;

        let row = sqlx::query("DELETE FROM escalation_triage.escalations WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(TriageError::EscalationNotFound(id))?;
        let removed = escalation_from_row(&row)?;

        rescore(&mut tx, &student_id, flags, None).await?;
        tx.commit().await?;
        Ok(removed)
    }

    async fn get_profile(&self, student_id: &str) -> Result<StudentProfile> {
        let row = sqlx::query("SELECT * FROM escalation_triage.student_profiles WHERE student_id = $1")
            .bind(student_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| TriageError::StudentNotFound(student_id.to_string()))?;
        profile_from_row(&row)
    }

    async fn ensure_profile(&self, student_id: &str) -> Result<StudentProfile> {
        if student_id.trim().is_empty() {
            return Err(TriageError::invalid("student_id is required"));
        }
        let now = timestamp();

        let mut tx = self.pool.begin().await?;
        insert_profile_if_absent(&mut tx, &StudentProfile::synthesized(student_id, now)).await?;
        let row = sqlx::query("SELECT * FROM escalation_triage.student_profiles WHERE student_id = $1")
            .bind(student_id)
            .fetch_one(&mut *tx)
            .await?;
        let profile = profile_from_row(&row)?;
        tx.commit().await?;
        Ok(profile)
    }

    async fn upsert_profile(
        &self,
        student_id: &str,
        patch: &ProfilePatch,
    ) -> Result<StudentProfile> {
        if student_id.trim().is_empty() {
            return Err(TriageError::invalid("student_id is required"));
        }
        patch.validate()?;
        let now = timestamp();

        let mut tx = self.pool.begin().await?;
        insert_profile_if_absent(&mut tx, &StudentProfile::synthesized(student_id, now)).await?;
        let mut profile = lock_profile(&mut tx, student_id).await?;
        profile.apply_patch(patch, now);

        let row = sqlx::query(
            r#"
            UPDATE escalation_triage.student_profiles
            SET name = $2, major = $3, gpa = $4, completed_courses = $5,
                current_courses = $6, last_interaction = $7
            WHERE student_id = $1
            RETURNING *
            "#,
        )
        .bind(&profile.student_id)
        .bind(&profile.name)
        .bind(&profile.major)
        .bind(profile.gpa)
        .bind(&profile.completed_courses)
        .bind(&profile.current_courses)
        .bind(profile.last_interaction)
        .fetch_one(&mut *tx)
        .await?;
        let profile = profile_from_row(&row)?;

        tx.commit().await?;
        Ok(profile)
    }

    async fn list_profiles(&self) -> Result<Vec<StudentProfile>> {
        let mut conn = self.pool.acquire().await?;
        fetch_profiles(&mut conn).await
    }

    async fn snapshot(&self) -> Result<StoreSnapshot> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;
        let escalations = fetch_queue(&mut tx, &EscalationFilter::default()).await?;
        let profiles = fetch_profiles(&mut tx).await?;
        tx.commit().await?;

        Ok(StoreSnapshot {
            escalations,
            profiles,
        })
    }

    async fn push_notification(&self, notification: Notification) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO escalation_triage.notifications
            (id, user_id, kind, title, message, escalation_id, priority, is_read,
             created_at, read_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(notification.id)
        .bind(&notification.user_id)
        .bind(notification.kind.as_str())
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.escalation_id)
        .bind(notification.priority)
        .bind(notification.read)
        .bind(notification.created_at)
        .bind(notification.read_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn notifications(
        &self,
        user_id: &str,
        filter: &NotificationFilter,
    ) -> Result<Vec<Notification>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM escalation_triage.notifications
            WHERE user_id = $1 AND (NOT $2 OR NOT is_read)
            ORDER BY priority DESC, created_at DESC, seq DESC
            LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(filter.unread_only)
        .bind(filter.limit.map(|limit| limit as i64))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(notification_from_row).collect()
    }

    async fn unread_count(&self, user_id: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM escalation_triage.notifications WHERE user_id = $1 AND NOT is_read",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as usize)
    }

    async fn mark_notification_read(&self, id: Uuid) -> Result<Notification> {
        let row = sqlx::query(
            r#"
            UPDATE escalation_triage.notifications
            SET is_read = TRUE, read_at = COALESCE(read_at, $2)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(timestamp())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(TriageError::NotificationNotFound(id))?;
        notification_from_row(&row)
    }

    async fn mark_all_read(&self, user_id: &str) -> Result<usize> {
        let result = sqlx::query(
            r#"
            UPDATE escalation_triage.notifications
            SET is_read = TRUE, read_at = $2
            WHERE user_id = $1 AND NOT is_read
            "#,
        )
        .bind(user_id)
        .bind(timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn delete_notification(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM escalation_triage.notifications WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(TriageError::NotificationNotFound(id));
        }
        Ok(())
    }
}

async fn fetch_queue(conn: &mut PgConnection, filter: &EscalationFilter) -> Result<Vec<Escalation>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM escalation_triage.escalations
        WHERE ($1::text IS NULL OR status = $1)
          AND ($2::int IS NULL OR priority >= $2)
          AND ($3::text IS NULL OR student_id = $3)
        ORDER BY priority DESC, created_at ASC, seq ASC
        "#,
    )
    .bind(filter.status.map(|status| status.as_str()))
    .bind(filter.min_priority)
    .bind(filter.student_id.as_deref())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(escalation_from_row).collect()
}

async fn fetch_profiles(conn: &mut PgConnection) -> Result<Vec<StudentProfile>> {
    let rows = sqlx::query("SELECT * FROM escalation_triage.student_profiles ORDER BY student_id")
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(profile_from_row).collect()
}

/// Returns whether a new row was inserted.
async fn insert_profile_if_absent(conn: &mut PgConnection, profile: &StudentProfile) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO escalation_triage.student_profiles
        (student_id, name, major, gpa, completed_courses, current_courses,
         total_escalations, risk_level, last_interaction)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (student_id) DO NOTHING
        "#,
    )
    .bind(&profile.student_id)
    .bind(&profile.name)
    .bind(&profile.major)
    .bind(profile.gpa)
    .bind(&profile.completed_courses)
    .bind(&profile.current_courses)
    .bind(profile.total_escalations)
    .bind(profile.risk_level.as_str())
    .bind(profile.last_interaction)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

async fn lock_profile(conn: &mut PgConnection, student_id: &str) -> Result<StudentProfile> {
    let row = sqlx::query(
        "SELECT * FROM escalation_triage.student_profiles WHERE student_id = $1 FOR UPDATE",
    )
    .bind(student_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| TriageError::StudentNotFound(student_id.to_string()))?;
    profile_from_row(&row)
}

async fn owner_of(conn: &mut PgConnection, id: Uuid) -> Result<String> {
    let row = sqlx::query("SELECT student_id FROM escalation_triage.escalations WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(TriageError::EscalationNotFound(id))?;
    Ok(row.try_get("student_id")?)
}

async fn lock_escalation(conn: &mut PgConnection, id: Uuid) -> Result<Escalation> {
    let row = sqlx::query("SELECT * FROM escalation_triage.escalations WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(TriageError::EscalationNotFound(id))?;
    escalation_from_row(&row)
}

async fn write_escalation(conn: &mut PgConnection, escalation: &Escalation) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE escalation_triage.escalations
        SET escalation_reason = $2, priority = $3, status = $4, notes = $5,
            responses = $6, assigned_to = $7, updated_at = $8
        WHERE id = $1
        "#,
    )
    .bind(escalation.id)
    .bind(&escalation.escalation_reason)
    .bind(escalation.priority)
    .bind(escalation.status.as_str())
    .bind(Json(&escalation.notes))
    .bind(Json(&escalation.responses))
    .bind(&escalation.assigned_to)
    .bind(escalation.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Recounts the student's escalations and stores the new tier. The caller must
/// hold the profile row lock.
async fn rescore(
    conn: &mut PgConnection,
    student_id: &str,
    flags: AcademicFlags,
    touched_at: Option<DateTime<Utc>>,
) -> Result<StudentProfile> {
    let counts = sqlx::query(
        r#"
        SELECT COUNT(*) AS total,
               COUNT(*) FILTER (WHERE priority >= $2) AS urgent
        FROM escalation_triage.escalations
        WHERE student_id = $1
        "#,
    )
    .bind(student_id)
    .bind(CRITICAL_PRIORITY)
    .fetch_one(&mut *conn)
    .await?;
    let total: i64 = counts.try_get("total")?;
    let urgent: i64 = counts.try_get("urgent")?;
    let level = risk::tier(total as usize, urgent as usize, flags);

    let row = sqlx::query(
        r#"
        UPDATE escalation_triage.student_profiles
        SET total_escalations = $2,
            risk_level = $3,
            last_interaction = GREATEST(last_interaction, COALESCE($4, last_interaction))
        WHERE student_id = $1
        RETURNING *
        "#,
    )
    .bind(student_id)
    .bind(total)
    .bind(level.as_str())
    .bind(touched_at)
    .fetch_one(&mut *conn)
    .await?;
    profile_from_row(&row)
}

fn escalation_from_row(row: &PgRow) -> Result<Escalation> {
    let status: String = row.try_get("status")?;
    let conversation_history: Json<Vec<ConversationMessage>> =
        row.try_get("conversation_history")?;
    let notes: Json<Vec<AdvisorNote>> = row.try_get("notes")?;
    let responses: Json<Vec<Reply>> = row.try_get("responses")?;

    Ok(Escalation {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        question: row.try_get("question")?,
        ai_response: row.try_get("ai_response")?,
        conversation_history: conversation_history.0,
        escalation_reason: row.try_get("escalation_reason")?,
        priority: row.try_get("priority")?,
        status: decode(status.parse())?,
        notes: notes.0,
        responses: responses.0,
        assigned_to: row.try_get("assigned_to")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn profile_from_row(row: &PgRow) -> Result<StudentProfile> {
    let risk_level: String = row.try_get("risk_level")?;

    Ok(StudentProfile {
        student_id: row.try_get("student_id")?,
        name: row.try_get("name")?,
        major: row.try_get("major")?,
        gpa: row.try_get("gpa")?,
        completed_courses: row.try_get("completed_courses")?,
        current_courses: row.try_get("current_courses")?,
        total_escalations: row.try_get("total_escalations")?,
        risk_level: decode(risk_level.parse())?,
        last_interaction: row.try_get("last_interaction")?,
    })
}

fn notification_from_row(row: &PgRow) -> Result<Notification> {
    let kind: String = row.try_get("kind")?;

    Ok(Notification {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        kind: decode(kind.parse())?,
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        escalation_id: row.try_get("escalation_id")?,
        priority: row.try_get("priority")?,
        read: row.try_get("is_read")?,
        created_at: row.try_get("created_at")?,
        read_at: row.try_get("read_at")?,
    })
}

/// Stored enum text that no longer parses is a decoding fault, not caller input.
fn decode<T>(value: Result<T>) -> Result<T> {
    value.map_err(|err| TriageError::Storage(sqlx::Error::Decode(Box::new(err))))
}
