//! Durable collections of escalations and student profiles.
//!
//! Both backends keep the derived profile fields (`total_escalations`,
//! `risk_level`) in step with the escalation set inside the same write that
//! changes it, so readers never observe a stale count.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    AcademicFlags, CreatedEscalation, Escalation, EscalationFilter, EscalationPatch,
    NewEscalation, Notification, NotificationFilter, ProfilePatch, StudentProfile,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait EscalationStore: Send + Sync {
    /// Inserts a pending escalation, synthesizing the student's profile if
    /// needed, and rescores the student with `flags`.
    async fn create(
        &self,
        request: NewEscalation,
        flags: AcademicFlags,
    ) -> Result<CreatedEscalation>;

    async fn get(&self, id: Uuid) -> Result<Escalation>;

    /// Matching escalations in queue order.
    async fn list(&self, filter: &EscalationFilter) -> Result<Vec<Escalation>>;

    /// Applies `patch` atomically. The student is rescored when `flags` is given.
    async fn update(
        &self,
        id: Uuid,
        patch: &EscalationPatch,
        flags: Option<AcademicFlags>,
    ) -> Result<Escalation>;

    /// Records a student follow-up message on their own escalation.
    async fn add_response(&self, id: Uuid, student_id: &str, message: &str) -> Result<Escalation>;

    /// Records an advisor reply visible to the student.
    async fn add_advisor_response(
        &self,
        id: Uuid,
        advisor: &str,
        message: &str,
    ) -> Result<Escalation>;

    /// Removes the escalation and rescores its student. Returns the removed record.
    async fn delete(&self, id: Uuid, flags: AcademicFlags) -> Result<Escalation>;

    async fn get_profile(&self, student_id: &str) -> Result<StudentProfile>;

    /// Returns the profile, creating a default one first if absent.
    async fn ensure_profile(&self, student_id: &str) -> Result<StudentProfile>;

    /// Applies descriptive attributes, creating a default profile first if absent.
    async fn upsert_profile(&self, student_id: &str, patch: &ProfilePatch)
        -> Result<StudentProfile>;

    async fn list_profiles(&self) -> Result<Vec<StudentProfile>>;

    /// All escalations (queue order) and profiles as of one point in time.
    async fn snapshot(&self) -> Result<StoreSnapshot>;

    async fn push_notification(&self, notification: Notification) -> Result<()>;

    /// The user's feed, highest priority then newest first.
    async fn notifications(
        &self,
        user_id: &str,
        filter: &NotificationFilter,
    ) -> Result<Vec<Notification>>;

    async fn unread_count(&self, user_id: &str) -> Result<usize>;

    async fn mark_notification_read(&self, id: Uuid) -> Result<Notification>;

    /// Returns how many notifications changed.
    async fn mark_all_read(&self, user_id: &str) -> Result<usize>;

    async fn delete_notification(&self, id: Uuid) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub escalations: Vec<Escalation>,
    pub profiles: Vec<StudentProfile>,
}

/// Store timestamps carry microsecond precision so both backends agree.
pub fn timestamp() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
