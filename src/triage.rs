//! Operations advisors and the chat flow call to create, triage and close
//! escalations.
//!
//! Collaborator calls (answer generation, academic flags) always happen before
//! the store is touched, so no store write ever waits on outside I/O.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::academic::{AcademicRecords, NoAcademicRecords};
use crate::answer::AnswerGenerator;
use crate::detector::{Detection, DetectorRules};
use crate::error::{Result, TriageError};
use crate::models::{
    validate_priority, AcademicFlags, ConversationMessage, CreatedEscalation, DashboardStats,
    Escalation, EscalationDetail, EscalationFilter, EscalationMessage, EscalationPatch,
    EscalationStatus, NewEscalation, Notification, NotificationFilter, ProfilePatch,
    RepeatStudent, StudentProfile,
};
use crate::store::{timestamp, EscalationStore};

const REPEAT_STUDENT_LIMIT: usize = 10;

/// A question/answer pair the chat flow already produced.
#[derive(Debug, Clone, Default)]
pub struct ExchangeInput {
    pub student_id: String,
    pub question: String,
    pub ai_response: String,
    pub retrieved_document_count: usize,
    pub conversation_history: Vec<ConversationMessage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExchangeOutcome {
    pub answer: String,
    pub retrieved_document_count: usize,
    pub detection: Detection,
    pub escalation: Option<CreatedEscalation>,
}

#[derive(Clone)]
pub struct TriageService {
    store: Arc<dyn EscalationStore>,
    records: Arc<dyn AcademicRecords>,
    rules: DetectorRules,
}

impl TriageService {
    pub fn new(store: Arc<dyn EscalationStore>) -> Self {
        Self {
            store,
            records: Arc::new(NoAcademicRecords),
            rules: DetectorRules::default(),
        }
    }

    pub fn with_academic_records(mut self, records: Arc<dyn AcademicRecords>) -> Self {
        self.records = records;
        self
    }

    pub fn with_rules(mut self, rules: DetectorRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn rules(&self) -> &DetectorRules {
        &self.rules
    }

    /// Missing or failing academic data never raises a student's risk.
    async fn flags_for(&self, student_id: &str) -> AcademicFlags {
        match self.records.academic_flags(student_id).await {
            Ok(flags) => flags,
            Err(err) => {
                warn!(student_id, error = %err, "academic flags unavailable, assuming not failing");
                AcademicFlags::default()
            }
        }
    }

    /// Feed delivery never fails the operation that triggered it.
    async fn notify(&self, notification: Notification) {
        let user_id = notification.user_id.clone();
        let kind = notification.kind;
        match self.store.push_notification(notification).await {
            Ok(()) => debug!(user_id = %user_id, %kind, "queued notification"),
            Err(err) => warn!(
                user_id = %user_id,
                %kind,
                error = %err,
                "failed to queue notification"
            ),
        }
    }

    pub async fn create_escalation(&self, request: NewEscalation) -> Result<CreatedEscalation> {
        request.validate()?;
        let flags = self.flags_for(&request.student_id).await;
        let created = self.store.create(request, flags).await?;
        self.notify(Notification::escalation_created(&created.escalation, timestamp()))
            .await;

        info!(
            escalation_id = %created.escalation.id,
            student_id = %created.escalation.student_id,
            priority = created.escalation.priority,
            reason = %created.escalation.escalation_reason,
            profile_origin = ?created.profile_origin,
            risk_level = %created.profile.risk_level,
            "created escalation"
        );
        Ok(created)
    }

    pub async fn list_escalations(&self, filter: &EscalationFilter) -> Result<Vec<Escalation>> {
        if let Some(min_priority) = filter.min_priority {
            validate_priority(min_priority)?;
        }
        let escalations = self.store.list(filter).await?;
        debug!(count = escalations.len(), "listed escalations");
        Ok(escalations)
    }

    pub async fn get_escalation(&self, id: Uuid) -> Result<EscalationDetail> {
        let escalation = self.store.get(id).await?;
        let student_profile = self.store.get_profile(&escalation.student_id).await?;
        Ok(EscalationDetail {
            escalation,
            student_profile,
        })
    }

    pub async fn update_escalation(&self, id: Uuid, patch: &EscalationPatch) -> Result<Escalation> {
        patch.validate()?;
        if patch.is_empty() {
            return self.store.get(id).await;
        }

        let flags = if patch.touches_risk() {
            let current = self.store.get(id).await?;
            Some(self.flags_for(&current.student_id).await)
        } else {
            None
        };

        let updated = self.store.update(id, patch, flags).await?;
        info!(
            escalation_id = %id,
            student_id = %updated.student_id,
            status = %updated.status,
            priority = updated.priority,
            assigned_to = ?updated.assigned_to,
            notes = updated.notes.len(),
            "updated escalation"
        );
        Ok(updated)
    }

    pub async fn delete_escalation(&self, id: Uuid) -> Result<()> {
        let current = self.store.get(id).await?;
        let flags = self.flags_for(&current.student_id).await;
        let removed = self.store.delete(id, flags).await?;
        info!(
            escalation_id = %id,
            student_id = %removed.student_id,
            "deleted escalation"
        );
        Ok(())
    }

    pub async fn respond_to_escalation(
        &self,
        id: Uuid,
        student_id: &str,
        message: &str,
    ) -> Result<Escalation> {
        let updated = self.store.add_response(id, student_id, message).await?;
        info!(
            escalation_id = %id,
            student_id,
            status = %updated.status,
            assigned_to = ?updated.assigned_to,
            "student responded to escalation"
        );
        if let Some(advisor) = &updated.assigned_to {
            self.notify(Notification::student_response(&updated, advisor, timestamp()))
                .await;
        }
        Ok(updated)
    }

    /// Sends the student a reply from `advisor`, claiming unassigned items.
    pub async fn advisor_respond(
        &self,
        id: Uuid,
        advisor: &str,
        message: &str,
    ) -> Result<Escalation> {
        let updated = self.store.add_advisor_response(id, advisor, message).await?;
        info!(
            escalation_id = %id,
            student_id = %updated.student_id,
            advisor = advisor.trim(),
            assigned_to = ?updated.assigned_to,
            "advisor responded to escalation"
        );
        self.notify(Notification::advisor_response(&updated, advisor.trim(), timestamp()))
            .await;
        Ok(updated)
    }

    pub async fn escalation_messages(
        &self,
        id: Uuid,
        student_id: &str,
    ) -> Result<Vec<EscalationMessage>> {
        let escalation = self.store.get(id).await?;
        if escalation.student_id != student_id {
            return Err(TriageError::Forbidden {
                escalation_id: id,
                student_id: student_id.to_string(),
            });
        }
        Ok(escalation.messages())
    }

    /// Unknown students get a default profile, as on first escalation.
    pub async fn get_student_profile(&self, student_id: &str) -> Result<StudentProfile> {
        self.store.ensure_profile(student_id).await
    }

    pub async fn update_student_profile(
        &self,
        student_id: &str,
        patch: &ProfilePatch,
    ) -> Result<StudentProfile> {
        let profile = self.store.upsert_profile(student_id, patch).await?;
        info!(student_id, name = %profile.name, "updated student profile");
        Ok(profile)
    }

    pub async fn list_students(&self) -> Result<Vec<StudentProfile>> {
        self.store.list_profiles().await
    }

    pub async fn dashboard_stats(&self) -> Result<DashboardStats> {
        let snapshot = self.store.snapshot().await?;
        Ok(summarize(&snapshot.escalations, &snapshot.profiles))
    }

    pub async fn notifications(
        &self,
        user_id: &str,
        filter: &NotificationFilter,
    ) -> Result<Vec<Notification>> {
        self.store.notifications(user_id, filter).await
    }

    pub async fn unread_notifications(&self, user_id: &str) -> Result<usize> {
        self.store.unread_count(user_id).await
    }

    pub async fn mark_notification_read(&self, id: Uuid) -> Result<Notification> {
        self.store.mark_notification_read(id).await
    }

    pub async fn mark_all_notifications_read(&self, user_id: &str) -> Result<usize> {
        let count = self.store.mark_all_read(user_id).await?;
        debug!(user_id, count, "marked notifications read");
        Ok(count)
    }

    pub async fn delete_notification(&self, id: Uuid) -> Result<()> {
        self.store.delete_notification(id).await
    }

    pub fn evaluate(&self, question: &str, ai_response: &str, document_count: usize) -> Detection {
        self.rules.evaluate(question, ai_response, document_count)
    }

    /// Runs detection on an answered exchange and escalates it when a rule fires.
    pub async fn evaluate_exchange(&self, exchange: ExchangeInput) -> Result<ExchangeOutcome> {
        let detection = self.evaluate(
            &exchange.question,
            &exchange.ai_response,
            exchange.retrieved_document_count,
        );

        let escalation = if detection.should_escalate {
            let request = NewEscalation {
                student_id: exchange.student_id.clone(),
                question: exchange.question.clone(),
                ai_response: exchange.ai_response.clone(),
                conversation_history: exchange.conversation_history,
                escalation_reason: Some(detection.reason.clone()),
                priority: Some(detection.suggested_priority),
            };
            Some(self.create_escalation(request).await?)
        } else {
            debug!(student_id = %exchange.student_id, "exchange answered without escalation");
            None
        };

        Ok(ExchangeOutcome {
            answer: exchange.ai_response,
            retrieved_document_count: exchange.retrieved_document_count,
            detection,
            escalation,
        })
    }

    /// Chat intake: generate an answer, then evaluate it. Generation failures
    /// are returned as-is.
    pub async fn process_exchange(
        &self,
        student_id: &str,
        question: &str,
        conversation_history: Vec<ConversationMessage>,
        generator: &dyn AnswerGenerator,
    ) -> Result<ExchangeOutcome> {
        if student_id.trim().is_empty() {
            return Err(TriageError::invalid("student_id is required"));
        }
        let answer = generator.generate_answer(question, student_id).await?;

        self.evaluate_exchange(ExchangeInput {
            student_id: student_id.to_string(),
            question: question.to_string(),
            ai_response: answer.text,
            retrieved_document_count: answer.retrieved_document_count,
            conversation_history,
        })
        .await
    }
}

/// Aggregates the dashboard counters from current store contents.
pub fn summarize(escalations: &[Escalation], profiles: &[StudentProfile]) -> DashboardStats {
    let count = |status: EscalationStatus| {
        escalations
            .iter()
            .filter(|escalation| escalation.status == status)
            .count()
    };

    let mut repeat_students: Vec<RepeatStudent> = profiles
        .iter()
        .filter(|profile| profile.total_escalations > 1)
        .map(|profile| RepeatStudent {
            student_id: profile.student_id.clone(),
            name: profile.name.clone(),
            escalation_count: profile.total_escalations,
            risk_level: profile.risk_level,
        })
        .collect();
    repeat_students.sort_by(|a, b| {
        b.escalation_count
            .cmp(&a.escalation_count)
            .then_with(|| a.student_id.cmp(&b.student_id))
    });
    repeat_students.truncate(REPEAT_STUDENT_LIMIT);

    DashboardStats {
        total: escalations.len(),
        pending: count(EscalationStatus::Pending),
        in_progress: count(EscalationStatus::InProgress),
        resolved: count(EscalationStatus::Resolved),
        closed: count(EscalationStatus::Closed),
        high_risk_count: profiles
            .iter()
            .filter(|profile| profile.risk_level.is_high_risk())
            .count(),
        total_students: profiles.len(),
        repeat_students,
    }
}
