use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use escalation_triage::answer::{AnswerGenerator, GeneratedAnswer};
use escalation_triage::models::{
    ConversationMessage, EscalationFilter, EscalationPatch, EscalationStatus, MessageKind,
    NewEscalation, NoteInput, NotificationFilter, NotificationKind, ProfileOrigin, RiskLevel,
};
use escalation_triage::store::MemoryStore;
use escalation_triage::{TriageError, TriageService};

struct CannedAnswer {
    text: &'static str,
    documents: usize,
}

#[async_trait]
impl AnswerGenerator for CannedAnswer {
    async fn generate_answer(
        &self,
        _question: &str,
        _student_id: &str,
    ) -> escalation_triage::Result<GeneratedAnswer> {
        Ok(GeneratedAnswer {
            text: self.text.to_string(),
            retrieved_document_count: self.documents,
        })
    }
}

fn service() -> TriageService {
    TriageService::new(Arc::new(MemoryStore::new()))
}

fn manual(student_id: &str, priority: i32) -> NewEscalation {
    NewEscalation {
        student_id: student_id.to_string(),
        question: format!("Question at priority {priority}"),
        priority: Some(priority),
        ..NewEscalation::default()
    }
}

#[tokio::test]
async fn queue_orders_by_priority_then_age() {
    let service = service();
    let mut ids = Vec::new();
    for priority in [2, 5, 5, 1] {
        ids.push(
            service
                .create_escalation(manual("s-queue", priority))
                .await
                .unwrap()
                .escalation
                .id,
        );
    }

    let queue: Vec<Uuid> = service
        .list_escalations(&EscalationFilter::default())
        .await
        .unwrap()
        .iter()
        .map(|escalation| escalation.id)
        .collect();
    assert_eq!(queue, vec![ids[1], ids[2], ids[0], ids[3]]);
}

#[tokio::test]
async fn tuition_emergency_moves_student_from_medium_to_high() {
    let service = service();
    for _ in 0..4 {
        service.create_escalation(manual("s-e2e", 1)).await.unwrap();
    }
    let before = service.get_student_profile("s-e2e").await.unwrap();
    assert_eq!(before.total_escalations, 4);
    assert_eq!(before.risk_level, RiskLevel::Medium);

    let generator = CannedAnswer {
        text: "Please contact the bursar office about payment plan options today.",
        documents: 1,
    };
    let outcome = service
        .process_exchange(
            "s-e2e",
            "I can't pay tuition, need emergency aid",
            Vec::new(),
            &generator,
        )
        .await
        .unwrap();

    assert!(outcome.detection.should_escalate);
    assert_eq!(outcome.detection.suggested_priority, 4);
    for tag in ["sensitive_topic", "thin_answer", "weak_grounding"] {
        assert!(outcome.detection.reason.split('|').any(|part| part == tag));
    }

    let created = outcome.escalation.unwrap();
    assert_eq!(created.profile_origin, ProfileOrigin::Existing);
    assert_eq!(created.escalation.priority, 4);
    assert_eq!(created.escalation.status, EscalationStatus::Pending);
    assert_eq!(created.profile.total_escalations, 5);
    assert_eq!(created.profile.risk_level, RiskLevel::High);
}

#[tokio::test]
async fn repeated_status_update_is_idempotent() {
    let service = service();
    let id = service
        .create_escalation(manual("s-idem", 3))
        .await
        .unwrap()
        .escalation
        .id;
    let patch = EscalationPatch {
        status: Some(EscalationStatus::InProgress),
        ..EscalationPatch::default()
    };

    let first = service.update_escalation(id, &patch).await.unwrap();
    let second = service.update_escalation(id, &patch).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(second.status, EscalationStatus::InProgress);
}

#[tokio::test]
async fn resolved_to_pending_is_a_conflict() {
    let service = service();
    let id = service
        .create_escalation(manual("s-conflict", 2))
        .await
        .unwrap()
        .escalation
        .id;
    for status in [EscalationStatus::InProgress, EscalationStatus::Resolved] {
        service
            .update_escalation(
                id,
                &EscalationPatch {
                    status: Some(status),
                    ..EscalationPatch::default()
                },
            )
            .await
            .unwrap();
    }

    let err = service
        .update_escalation(
            id,
            &EscalationPatch {
                status: Some(EscalationStatus::Pending),
                ..EscalationPatch::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TriageError::Conflict { .. }));

    let reopened = service
        .update_escalation(
            id,
            &EscalationPatch {
                status: Some(EscalationStatus::InProgress),
                ..EscalationPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(reopened.status, EscalationStatus::InProgress);
}

#[tokio::test]
async fn total_escalations_tracks_live_records() {
    let service = service();
    let students = ["s-a", "s-b", "s-c"];
    let mut live: HashMap<&str, Vec<Uuid>> = HashMap::new();

    for round in 0..12 {
        let student = students[round % students.len()];
        let created = service
            .create_escalation(manual(student, (round % 5) as i32 + 1))
            .await
            .unwrap();
        live.entry(student).or_default().push(created.escalation.id);

        if round % 4 == 3 {
            let victim = live.get_mut(student).and_then(|ids| ids.pop()).unwrap();
            service.delete_escalation(victim).await.unwrap();
        }
        if round % 3 == 2 {
            if let Some(id) = live.get(student).and_then(|ids| ids.first()).copied() {
                service
                    .update_escalation(
                        id,
                        &EscalationPatch {
                            priority: Some(5),
                            note: Some(NoteInput {
                                author: "advisor-1".to_string(),
                                text: format!("round {round}"),
                            }),
                            ..EscalationPatch::default()
                        },
                    )
                    .await
                    .unwrap();
            }
        }
    }

    for student in students {
        let profile = service.get_student_profile(student).await.unwrap();
        let listed = service
            .list_escalations(&EscalationFilter {
                student_id: Some(student.to_string()),
                ..EscalationFilter::default()
            })
            .await
            .unwrap();
        let expected = live.get(student).map(Vec::len).unwrap_or(0);
        assert_eq!(profile.total_escalations as usize, expected);
        assert_eq!(listed.len(), expected);
    }
}

#[tokio::test]
async fn deleted_ids_are_gone_and_not_reused() {
    let service = service();
    let first = service
        .create_escalation(manual("s-del", 2))
        .await
        .unwrap()
        .escalation
        .id;
    service.delete_escalation(first).await.unwrap();

    assert!(service.get_escalation(first).await.unwrap_err().is_not_found());
    assert!(service.delete_escalation(first).await.unwrap_err().is_not_found());

    let second = service
        .create_escalation(manual("s-del", 2))
        .await
        .unwrap()
        .escalation
        .id;
    assert_ne!(first, second);
    assert_eq!(
        service.get_student_profile("s-del").await.unwrap().total_escalations,
        1
    );
}

#[tokio::test]
async fn fetched_escalation_matches_submitted_exchange() {
    let service = service();
    let started = Utc::now() - Duration::minutes(3);
    let history = vec![
        ConversationMessage {
            role: "student".to_string(),
            content: "Hi, I have a question about my transfer credit.".to_string(),
            timestamp: started,
        },
        ConversationMessage {
            role: "assistant".to_string(),
            content: "Sure, which institution did the credit come from?".to_string(),
            timestamp: started + Duration::seconds(20),
        },
    ];
    let request = NewEscalation {
        student_id: "s-round".to_string(),
        question: "Will my community college credits count toward graduation?".to_string(),
        ai_response: "It is unclear from the context which credits transfer.".to_string(),
        conversation_history: history.clone(),
        escalation_reason: Some("ai_uncertainty".to_string()),
        priority: Some(3),
    };

    let id = service
        .create_escalation(request.clone())
        .await
        .unwrap()
        .escalation
        .id;
    let detail = service.get_escalation(id).await.unwrap();

    assert_eq!(detail.escalation.question, request.question);
    assert_eq!(detail.escalation.ai_response, request.ai_response);
    assert_eq!(detail.escalation.conversation_history, history);
    assert_eq!(detail.student_profile.student_id, "s-round");
    assert_eq!(detail.student_profile.name, "Student s-round");
}

#[tokio::test]
async fn advisor_and_student_exchange_replies_with_notifications() {
    let service = service();
    let generator = CannedAnswer {
        text: "I don't have that information.",
        documents: 0,
    };
    let outcome = service
        .process_exchange("s-talk", "Can I get a tuition waiver?", Vec::new(), &generator)
        .await
        .unwrap();
    let id = outcome.escalation.unwrap().escalation.id;

    service
        .advisor_respond(id, "Dr. Okafor", "Please send your aid letter.")
        .await
        .unwrap();
    service
        .respond_to_escalation(id, "s-talk", "Attached it to my portal.")
        .await
        .unwrap();

    let messages = service.escalation_messages(id, "s-talk").await.unwrap();
    let kinds: Vec<MessageKind> = messages.iter().map(|m| m.kind.clone()).collect();
    assert_eq!(
        kinds,
        vec![MessageKind::AdvisorResponse, MessageKind::StudentResponse]
    );

    let student_feed = service
        .notifications("s-talk", &NotificationFilter::default())
        .await
        .unwrap();
    assert_eq!(student_feed[0].kind, NotificationKind::AdvisorResponse);
    assert_eq!(student_feed.len(), 2);

    let advisor_feed = service
        .notifications("Dr. Okafor", &NotificationFilter::default())
        .await
        .unwrap();
    assert_eq!(advisor_feed.len(), 1);
    assert_eq!(advisor_feed[0].kind, NotificationKind::StudentResponse);
    assert_eq!(advisor_feed[0].escalation_id, id);
}

#[tokio::test]
async fn first_profile_read_creates_a_default() {
    let service = service();
    let profile = service.get_student_profile("s-unseen").await.unwrap();
    assert_eq!(profile.total_escalations, 0);
    assert_eq!(profile.risk_level, RiskLevel::Low);
    assert_eq!(
        service.get_student_profile("s-unseen").await.unwrap(),
        profile
    );
}
