//! Academic-records collaborator used by risk scoring.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::error::{Result, TriageError};
use crate::models::AcademicFlags;

#[async_trait]
pub trait AcademicRecords: Send + Sync {
    async fn academic_flags(&self, student_id: &str) -> Result<AcademicFlags>;
}

/// Used when no academic-records source is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAcademicRecords;

#[async_trait]
impl AcademicRecords for NoAcademicRecords {
    async fn academic_flags(&self, _student_id: &str) -> Result<AcademicFlags> {
        Ok(AcademicFlags::default())
    }
}

/// Reads `escalation_triage.academic_standing`. Students without a row are not failing.
#[derive(Debug, Clone)]
pub struct PgAcademicRecords {
    pool: PgPool,
}

impl PgAcademicRecords {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AcademicRecords for PgAcademicRecords {
    async fn academic_flags(&self, student_id: &str) -> Result<AcademicFlags> {
        let row = sqlx::query(
            "SELECT is_failing FROM escalation_triage.academic_standing WHERE student_id = $1",
        )
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| TriageError::UpstreamUnavailable(format!("academic standing: {err}")))?;

        Ok(AcademicFlags {
            is_failing: row.map(|row| row.get("is_failing")).unwrap_or(false),
        })
    }
}
