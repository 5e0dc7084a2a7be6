//! In-process arena store.
//!
//! Escalations live in a map keyed by insertion sequence, so iteration is
//! creation order and equal priority/timestamp pairs keep that order when
//! sorted. Each mutation runs its whole read-modify-write, including the
//! profile rescoring, under one write guard and never awaits while holding it.
//! One guard for the whole arena orders all writers, per student included.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{timestamp, EscalationStore, StoreSnapshot};
use crate::error::{Result, TriageError};
use crate::models::{
    notification_order, queue_order, AcademicFlags, CreatedEscalation, Escalation,
    EscalationFilter, EscalationPatch, NewEscalation, Notification, NotificationFilter,
    ProfileOrigin, ProfilePatch, StudentProfile,
};
use crate::risk;

#[derive(Debug, Default)]
struct Arena {
    next_seq: u64,
    escalations: BTreeMap<u64, Escalation>,
    index: HashMap<Uuid, u64>,
    profiles: BTreeMap<String, StudentProfile>,
    notifications: Vec<Notification>,
}

impl Arena {
    fn queue(&self, filter: &EscalationFilter) -> Vec<Escalation> {
        let mut matching: Vec<Escalation> = self
            .escalations
            .values()
            .filter(|escalation| filter.matches(escalation))
            .cloned()
            .collect();
        // Stable sort keeps creation order for full ties.
        matching.sort_by(queue_order);
        matching
    }

    fn notification_mut(&mut self, id: Uuid) -> Result<&mut Notification> {
        self.notifications
            .iter_mut()
            .find(|notification| notification.id == id)
            .ok_or(TriageError::NotificationNotFound(id))
    }

    fn slot(&self, id: Uuid) -> Result<u64> {
        self.index
            .get(&id)
            .copied()
            .ok_or(TriageError::EscalationNotFound(id))
    }

    fn escalation_mut(&mut self, id: Uuid) -> Result<&mut Escalation> {
        let seq = self.slot(id)?;
        self.escalations
            .get_mut(&seq)
            .ok_or(TriageError::EscalationNotFound(id))
    }

    /// Recounts the student's escalations and rescores the profile.
    fn rescore(&mut self, student_id: &str, flags: AcademicFlags) -> Option<&StudentProfile> {
        let owned: Vec<Escalation> = self
            .escalations
            .values()
            .filter(|escalation| escalation.student_id == student_id)
            .cloned()
            .collect();

        let profile = self.profiles.get_mut(student_id)?;
        profile.total_escalations = owned.len() as i64;
        profile.risk_level = risk::score(&owned, flags);
        Some(&*profile)
    }

    fn ensure_profile(&mut self, student_id: &str, now: DateTime<Utc>) -> ProfileOrigin {
        if self.profiles.contains_key(student_id) {
            ProfileOrigin::Existing
        } else {
            self.profiles.insert(
                student_id.to_string(),
                StudentProfile::synthesized(student_id, now),
            );
            ProfileOrigin::SynthesizedDefault
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    arena: RwLock<Arena>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EscalationStore for MemoryStore {
    async fn create(&self, request: NewEscalation, flags: AcademicFlags) -> Result<CreatedEscalation> {
        request.validate()?;
        let now = timestamp();
        let escalation = Escalation::from_request(request, Uuid::new_v4(), now);
        let student_id = escalation.student_id.clone();

        let mut arena = self.arena.write().await;
        let profile_origin = arena.ensure_profile(&student_id, now);

        let seq = arena.next_seq;
        arena.next_seq += 1;
        arena.index.insert(escalation.id, seq);
        arena.escalations.insert(seq, escalation.clone());

        if let Some(profile) = arena.profiles.get_mut(&student_id) {
            profile.touch(now);
        }
        let profile = arena
            .rescore(&student_id, flags)
            .cloned()
            .ok_or_else(|| TriageError::StudentNotFound(student_id.clone()))?;

        Ok(CreatedEscalation {
            escalation,
            profile,
            profile_origin,
        })
    }

    async fn get(&self, id: Uuid) -> Result<Escalation> {
        let arena = self.arena.read().await;
        let seq = arena.slot(id)?;
        arena
            .escalations
            .get(&seq)
            .cloned()
            .ok_or(TriageError::EscalationNotFound(id))
    }

    async fn list(&self, filter: &EscalationFilter) -> Result<Vec<Escalation>> {
        let arena = self.arena.read().await;
        Ok(arena.queue(filter))
    }

    async fn update(
        &self,
        id: Uuid,
        patch: &EscalationPatch,
        flags: Option<AcademicFlags>,
    ) -> Result<Escalation> {
        let now = timestamp();
        let mut arena = self.arena.write().await;

        let escalation = arena.escalation_mut(id)?;
        let mut updated = escalation.clone();
        updated.apply_patch(patch, now)?;
        *escalation = updated.clone();

        if let Some(flags) = flags {
            arena.rescore(&updated.student_id, flags);
        }
        Ok(updated)
    }

    async fn add_response(&self, id: Uuid, student_id: &str, message: &str) -> Result<Escalation> {
        let now = timestamp();
        let mut arena = self.arena.write().await;

        let escalation = arena.escalation_mut(id)?;
        let mut updated = escalation.clone();
        updated.record_response(student_id, message, now)?;
        *escalation = updated.clone();

        if let Some(profile) = arena.profiles.get_mut(student_id) {
            profile.touch(now);
        }
        Ok(updated)
    }

    async fn add_advisor_response(
        &self,
        id: Uuid,
        advisor: &str,
        message: &str,
    ) -> Result<Escalation> {
        let now = timestamp();
        let mut arena = self.arena.write().await;

        let escalation = arena.escalation_mut(id)?;
        let mut updated = escalation.clone();
        updated.record_advisor_response(advisor, message, now)?;
        *escalation = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, id: Uuid, flags: AcademicFlags) -> Result<Escalation> {
        let mut arena = self.arena.write().await;
        let seq = arena.slot(id)?;
        arena.index.remove(&id);
        let removed = arena
            .escalations
            .remove(&seq)
            .ok_or(TriageError::EscalationNotFound(id))?;
        arena.rescore(&removed.student_id, flags);
        Ok(removed)
    }

    async fn get_profile(&self, student_id: &str) -> Result<StudentProfile> {
        let arena = self.arena.read().await;
        arena
            .profiles
            .get(student_id)
            .cloned()
            .ok_or_else(|| TriageError::StudentNotFound(student_id.to_string()))
    }

    async fn ensure_profile(&self, student_id: &str) -> Result<StudentProfile> {
        if student_id.trim().is_empty() {
            return Err(TriageError::invalid("student_id is required"));
        }
        let now = timestamp();
        let mut arena = self.arena.write().await;
        let profile = arena
            .profiles
            .entry(student_id.to_string())
            .or_insert_with(|| StudentProfile::synthesized(student_id, now));
        Ok(profile.clone())
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

        let mut arena = self.arena.write().await;
        let profile = arena
            .profiles
            .entry(student_id.to_string())
            .or_insert_with(|| StudentProfile::synthesized(student_id, now));
        profile.apply_patch(patch, now);
        Ok(profile.clone())
    }

    async fn list_profiles(&self) -> Result<Vec<StudentProfile>> {
        let arena = self.arena.read().await;
        Ok(arena.profiles.values().cloned().collect())
    }

    async fn snapshot(&self) -> Result<StoreSnapshot> {
        let arena = self.arena.read().await;
        Ok(StoreSnapshot {
            escalations: arena.queue(&EscalationFilter::default()),
            profiles: arena.profiles.values().cloned().collect(),
        })
    }

    async fn push_notification(&self, notification: Notification) -> Result<()> {
        let mut arena = self.arena.write().await;
        arena.notifications.push(notification);
        Ok(())
    }

    async fn notifications(
        &self,
        user_id: &str,
        filter: &NotificationFilter,
    ) -> Result<Vec<Notification>> {
        let arena = self.arena.read().await;
        // Newest insertion first so full ties still list newest first.
        let mut feed: Vec<Notification> = arena
            .notifications
            .iter()
            .rev()
            .filter(|notification| notification.user_id == user_id && filter.matches(notification))
            .cloned()
            .collect();
        feed.sort_by(notification_order);
        if let Some(limit) = filter.limit {
            feed.truncate(limit);
        }
        Ok(feed)
    }

    async fn unread_count(&self, user_id: &str) -> Result<usize> {
        let arena = self.arena.read().await;
        Ok(arena
            .notifications
            .iter()
            .filter(|notification| notification.user_id == user_id && !notification.read)
            .count())
    }

    async fn mark_notification_read(&self, id: Uuid) -> Result<Notification> {
        let now = timestamp();
        let mut arena = self.arena.write().await;
        let notification = arena.notification_mut(id)?;
        notification.mark_read(now);
        Ok(notification.clone())
    }

    async fn mark_all_read(&self, user_id: &str) -> Result<usize> {
        let now = timestamp();
        let mut arena = self.arena.write().await;
        let mut changed = 0;
        for notification in arena.notifications.iter_mut() {
            if notification.user_id == user_id && notification.mark_read(now) {
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn delete_notification(&self, id: Uuid) -> Result<()> {
        let mut arena = self.arena.write().await;
        let before = arena.notifications.len();
        arena.notifications.retain(|notification| notification.id != id);
        if arena.notifications.len() == before {
            return Err(TriageError::NotificationNotFound(id));
        }
        Ok(())
    }
}
