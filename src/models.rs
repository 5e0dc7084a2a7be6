use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, TriageError};

pub const MIN_PRIORITY: i32 = 1;
pub const MAX_PRIORITY: i32 = 5;

/// Priority at or above which an escalation counts toward the critical risk tier.
pub const CRITICAL_PRIORITY: i32 = 4;

pub fn validate_priority(priority: i32) -> Result<i32> {
    if (MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        Ok(priority)
    } else {
        Err(TriageError::invalid(format!(
            "priority {priority} outside {MIN_PRIORITY}..={MAX_PRIORITY}"
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    Pending,
    InProgress,
    Resolved,
    Closed,
}

impl EscalationStatus {
    pub const ALL: [EscalationStatus; 4] = [
        EscalationStatus::Pending,
        EscalationStatus::InProgress,
        EscalationStatus::Resolved,
        EscalationStatus::Closed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EscalationStatus::Pending => "pending",
            EscalationStatus::InProgress => "in_progress",
            EscalationStatus::Resolved => "resolved",
            EscalationStatus::Closed => "closed",
        }
    }

    /// Closed is terminal, and handled items never fall back to pending.
    /// Setting the current status again is always allowed.
    pub fn check_transition(self, next: EscalationStatus) -> Result<()> {
        if self == next {
            return Ok(());
        }

        let allowed = match (self, next) {
            (EscalationStatus::Closed, _) => false,
            (EscalationStatus::Resolved, EscalationStatus::Pending) => false,
            _ => true,
        };

        if allowed {
            Ok(())
        } else {
            Err(TriageError::Conflict {
                from: self.as_str().to_string(),
                to: next.as_str().to_string(),
            })
        }
    }
}

impl fmt::Display for EscalationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EscalationStatus {
    type Err = TriageError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(EscalationStatus::Pending),
            "in_progress" | "in-progress" => Ok(EscalationStatus::InProgress),
            "resolved" => Ok(EscalationStatus::Resolved),
            "closed" => Ok(EscalationStatus::Closed),
            other => Err(TriageError::invalid(format!("unknown status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    pub fn is_high_risk(self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::Critical)
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = TriageError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            other => Err(TriageError::invalid(format!("unknown risk level '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisorNote {
    pub author: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Responder {
    Student,
    Advisor,
}

/// A student-visible message exchanged after the escalation was raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub role: Responder,
    pub author: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    pub id: Uuid,
    pub student_id: String,
    pub question: String,
    pub ai_response: String,
    pub conversation_history: Vec<ConversationMessage>,
    pub escalation_reason: String,
    pub priority: i32,
    pub status: EscalationStatus,
    pub notes: Vec<AdvisorNote>,
    /// Follow-up replies from the student and advisors, kept apart from the
    /// frozen history.
    pub responses: Vec<Reply>,
    pub assigned_to: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Escalation {
    pub fn from_request(request: NewEscalation, id: Uuid, now: DateTime<Utc>) -> Self {
        Escalation {
            id,
            student_id: request.student_id,
            question: request.question,
            ai_response: request.ai_response,
            conversation_history: request.conversation_history,
            escalation_reason: request
                .escalation_reason
                .unwrap_or_else(|| MANUAL_REASON.to_string()),
            priority: request.priority.unwrap_or(MIN_PRIORITY),
            status: EscalationStatus::Pending,
            notes: Vec::new(),
            responses: Vec::new(),
            assigned_to: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a validated patch. Returns whether anything changed; `updated_at`
    /// only advances when it did.
    pub fn apply_patch(&mut self, patch: &EscalationPatch, now: DateTime<Utc>) -> Result<bool> {
        patch.validate()?;
        if let Some(status) = patch.status {
            self.status.check_transition(status)?;
        }

        let mut changed = false;

        if let Some(status) = patch.status {
            if self.status != status {
                self.status = status;
                changed = true;
            }
        }

        if let Some(priority) = patch.priority {
            if self.priority != priority {
                self.priority = priority;
                changed = true;
            }
        }

        if let Some(assigned_to) = &patch.assigned_to {
            let assigned_to = normalize_assignee(assigned_to);
            if self.assigned_to != assigned_to {
                self.assigned_to = assigned_to;
                changed = true;
            }
        }

        if let Some(reason) = &patch.reason {
            self.escalation_reason = join_reason(&self.escalation_reason, reason.trim());
            changed = true;
        }

        if let Some(note) = &patch.note {
            self.notes.push(AdvisorNote {
                author: note.author.trim().to_string(),
                text: note.text.clone(),
                timestamp: now,
            });
            changed = true;
        }

        if changed {
            self.updated_at = self.updated_at.max(now);
        }

        Ok(changed)
    }

    /// Appends a student follow-up. Pending items move to in progress.
    pub fn record_response(
        &mut self,
        student_id: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.student_id != student_id {
            return Err(TriageError::Forbidden {
                escalation_id: self.id,
                student_id: student_id.to_string(),
            });
        }
        if message.trim().is_empty() {
            return Err(TriageError::invalid("response message must not be empty"));
        }

        self.responses.push(Reply {
            role: Responder::Student,
            author: student_id.to_string(),
            content: message.to_string(),
            timestamp: now,
        });
        if self.status == EscalationStatus::Pending {
            self.status = EscalationStatus::InProgress;
        }
        self.updated_at = self.updated_at.max(now);
        Ok(())
    }

    /// Appends an advisor reply the student can see. The item moves to in
    /// progress and is assigned to the advisor when nobody holds it yet.
    pub fn record_advisor_response(
        &mut self,
        advisor: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let advisor = advisor.trim();
        if advisor.is_empty() {
            return Err(TriageError::invalid("advisor name is required"));
        }
        if message.trim().is_empty() {
            return Err(TriageError::invalid("response message must not be empty"));
        }
        self.status.check_transition(EscalationStatus::InProgress)?;

        self.responses.push(Reply {
            role: Responder::Advisor,
            author: advisor.to_string(),
            content: message.to_string(),
            timestamp: now,
        });
        self.status = EscalationStatus::InProgress;
        if self.assigned_to.is_none() {
            self.assigned_to = Some(advisor.to_string());
        }
        self.updated_at = self.updated_at.max(now);
        Ok(())
    }

    /// Advisor notes and replies from both sides, oldest first.
    pub fn messages(&self) -> Vec<EscalationMessage> {
        let mut messages: Vec<EscalationMessage> = self
            .notes
            .iter()
            .map(|note| EscalationMessage {
                kind: MessageKind::AdvisorNote,
                author: note.author.clone(),
                content: note.text.clone(),
                timestamp: note.timestamp,
            })
            .chain(self.responses.iter().map(|reply| EscalationMessage {
                kind: match reply.role {
                    Responder::Student => MessageKind::StudentResponse,
                    Responder::Advisor => MessageKind::AdvisorResponse,
                },
                author: reply.author.clone(),
                content: reply.content.clone(),
                timestamp: reply.timestamp,
            }))
            .collect();
        messages.sort_by_key(|message| message.timestamp);
        messages
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self.status,
            EscalationStatus::Pending | EscalationStatus::InProgress
        )
    }
}

pub const MANUAL_REASON: &str = "manual";

pub const REASON_SEPARATOR: &str = "|";

pub fn join_reason(existing: &str, addition: &str) -> String {
    if existing.is_empty() {
        addition.to_string()
    } else {
        format!("{existing}{REASON_SEPARATOR}{addition}")
    }
}

fn normalize_assignee(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Queue order: highest priority first, then oldest first.
pub fn queue_order(a: &Escalation, b: &Escalation) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewEscalation {
    pub student_id: String,
    pub question: String,
    #[serde(default)]
    pub ai_response: String,
    #[serde(default)]
    pub conversation_history: Vec<ConversationMessage>,
    #[serde(default)]
    pub escalation_reason: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
}

impl NewEscalation {
    pub fn validate(&self) -> Result<()> {
        if self.student_id.trim().is_empty() {
            return Err(TriageError::invalid("student_id is required"));
        }
        if self.question.trim().is_empty() {
            return Err(TriageError::invalid("question is required"));
        }
        if let Some(priority) = self.priority {
            validate_priority(priority)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NoteInput {
    pub author: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EscalationPatch {
    #[serde(default)]
    pub status: Option<EscalationStatus>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub note: Option<NoteInput>,
    /// An empty string clears the assignment.
    #[serde(default)]
    pub assigned_to: Option<String>,
    /// Appended to the existing reason, never replacing it.
    #[serde(default)]
    pub reason: Option<String>,
}

impl EscalationPatch {
    pub fn validate(&self) -> Result<()> {
        if let Some(priority) = self.priority {
            validate_priority(priority)?;
        }
        if let Some(note) = &self.note {
            if note.text.trim().is_empty() {
                return Err(TriageError::invalid("note text must not be empty"));
            }
            if note.author.trim().is_empty() {
                return Err(TriageError::invalid("note author must not be empty"));
            }
        }
        if let Some(reason) = &self.reason {
            if reason.trim().is_empty() {
                return Err(TriageError::invalid("reason amendment must not be empty"));
            }
        }
        Ok(())
    }

    /// Whether the patch can shift the student's risk tier.
    pub fn touches_risk(&self) -> bool {
        self.priority.is_some() || self.status.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.priority.is_none()
            && self.note.is_none()
            && self.assigned_to.is_none()
            && self.reason.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct EscalationFilter {
    pub status: Option<EscalationStatus>,
    pub min_priority: Option<i32>,
    pub student_id: Option<String>,
}

impl EscalationFilter {
    pub fn matches(&self, escalation: &Escalation) -> bool {
        if let Some(status) = self.status {
            if escalation.status != status {
                return false;
            }
        }
        if let Some(min_priority) = self.min_priority {
            if escalation.priority < min_priority {
                return false;
            }
        }
        if let Some(student_id) = &self.student_id {
            if &escalation.student_id != student_id {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub student_id: String,
    pub name: String,
    pub major: String,
    pub gpa: Option<f64>,
    pub completed_courses: Vec<String>,
    pub current_courses: Vec<String>,
    pub total_escalations: i64,
    pub risk_level: RiskLevel,
    pub last_interaction: DateTime<Utc>,
}

impl StudentProfile {
    /// Placeholder profile for a student first seen through an escalation.
    pub fn synthesized(student_id: &str, now: DateTime<Utc>) -> Self {
        StudentProfile {
            student_id: student_id.to_string(),
            name: format!("Student {student_id}"),
            major: "-".to_string(),
            gpa: None,
            completed_courses: Vec::new(),
            current_courses: Vec::new(),
            total_escalations: 0,
            risk_level: RiskLevel::Low,
            last_interaction: now,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_interaction = self.last_interaction.max(now);
    }

    pub fn apply_patch(&mut self, patch: &ProfilePatch, now: DateTime<Utc>) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(major) = &patch.major {
            self.major = major.clone();
        }
        if let Some(gpa) = patch.gpa {
            self.gpa = Some(gpa);
        }
        if let Some(courses) = &patch.completed_courses {
            self.completed_courses = courses.clone();
        }
        if let Some(courses) = &patch.current_courses {
            self.current_courses = courses.clone();
        }
        self.touch(now);
    }
}

/// Externally supplied profile attributes. Derived fields are not patchable.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfilePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub major: Option<String>,
    #[serde(default)]
    pub gpa: Option<f64>,
    #[serde(default)]
    pub completed_courses: Option<Vec<String>>,
    #[serde(default)]
    pub current_courses: Option<Vec<String>>,
}

impl ProfilePatch {
    pub fn validate(&self) -> Result<()> {
        if let Some(gpa) = self.gpa {
            if !gpa.is_finite() || gpa < 0.0 {
                return Err(TriageError::invalid(format!("gpa {gpa} is not a valid grade average")));
            }
        }
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(TriageError::invalid("name must not be empty"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcademicFlags {
    pub is_failing: bool,
}

/// How the referenced profile was resolved when an escalation was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileOrigin {
    Existing,
    SynthesizedDefault,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedEscalation {
    pub escalation: Escalation,
    pub profile: StudentProfile,
    pub profile_origin: ProfileOrigin,
}

#[derive(Debug, Clone, Serialize)]
pub struct EscalationDetail {
    pub escalation: Escalation,
    pub student_profile: StudentProfile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    AdvisorNote,
    AdvisorResponse,
    StudentResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct EscalationMessage {
    pub kind: MessageKind,
    pub author: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepeatStudent {
    pub student_id: String,
    pub name: String,
    pub escalation_count: i64,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardStats {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub resolved: usize,
    pub closed: usize,
    pub high_risk_count: usize,
    pub total_students: usize,
    pub repeat_students: Vec<RepeatStudent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    EscalationCreated,
    StudentResponse,
    AdvisorResponse,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::EscalationCreated => "escalation_created",
            NotificationKind::StudentResponse => "student_response",
            NotificationKind::AdvisorResponse => "advisor_response",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = TriageError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim() {
            "escalation_created" => Ok(NotificationKind::EscalationCreated),
            "student_response" => Ok(NotificationKind::StudentResponse),
            "advisor_response" => Ok(NotificationKind::AdvisorResponse),
            other => Err(TriageError::invalid(format!("unknown notification kind '{other}'"))),
        }
    }
}

/// Feed entry for a student or advisor about one of their escalations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub escalation_id: Uuid,
    pub priority: i32,
    pub read: bool,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

impl Notification {
    fn new(
        user_id: &str,
        kind: NotificationKind,
        title: String,
        message: String,
        escalation_id: Uuid,
        priority: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Notification {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            kind,
            title,
            message,
            escalation_id,
            priority,
            read: false,
            created_at: now,
            read_at: None,
        }
    }

    /// Tells the student their question reached the advisor queue.
    pub fn escalation_created(escalation: &Escalation, now: DateTime<Utc>) -> Self {
        Notification::new(
            &escalation.student_id,
            NotificationKind::EscalationCreated,
            "Question escalated to an advisor".to_string(),
            "Your question has been sent to an advisor for review.".to_string(),
            escalation.id,
            2,
            now,
        )
    }

    /// Tells the assigned advisor the student replied.
    pub fn student_response(escalation: &Escalation, advisor: &str, now: DateTime<Utc>) -> Self {
        Notification::new(
            advisor,
            NotificationKind::StudentResponse,
            "Student response".to_string(),
            format!("Student {} replied on their escalation.", escalation.student_id),
            escalation.id,
            2,
            now,
        )
    }

    /// Tells the student an advisor answered.
    pub fn advisor_response(escalation: &Escalation, advisor: &str, now: DateTime<Utc>) -> Self {
        Notification::new(
            &escalation.student_id,
            NotificationKind::AdvisorResponse,
            format!("Response from {advisor}"),
            "Your advisor has responded to your question.".to_string(),
            escalation.id,
            3,
            now,
        )
    }

    /// Returns whether the notification was unread.
    pub fn mark_read(&mut self, now: DateTime<Utc>) -> bool {
        if self.read {
            return false;
        }
        self.read = true;
        self.read_at = Some(now);
        true
    }
}

/// Feed order: highest priority first, then newest first.
pub fn notification_order(a: &Notification, b: &Notification) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| b.created_at.cmp(&a.created_at))
}

#[derive(Debug, Clone, Default)]
pub struct NotificationFilter {
    pub unread_only: bool,
    pub limit: Option<usize>,
}

impl NotificationFilter {
    pub fn matches(&self, notification: &Notification) -> bool {
        !(self.unread_only && notification.read)
    }
}
