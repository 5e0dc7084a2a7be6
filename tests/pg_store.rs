//! Postgres store checks. Each test gets a fresh database from `sqlx::test`,
//! so they need `DATABASE_URL` pointing at a server the user may create
//! databases on. Run with `cargo test -- --ignored`.

use chrono::{Duration, SubsecRound, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use escalation_triage::models::{
    AcademicFlags, ConversationMessage, EscalationFilter, EscalationPatch, EscalationStatus,
    NewEscalation, Notification, NotificationFilter, ProfileOrigin, RiskLevel,
};
use escalation_triage::store::{EscalationStore, PgStore};
use escalation_triage::TriageError;

fn request(student_id: &str, priority: i32) -> NewEscalation {
    NewEscalation {
        student_id: student_id.to_string(),
        question: format!("Question at priority {priority}"),
        priority: Some(priority),
        ..NewEscalation::default()
    }
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn queue_breaks_full_ties_by_insertion(pool: PgPool) {
    let store = PgStore::new(pool.clone());
    let mut ids = Vec::new();
    for priority in [2, 5, 5, 1] {
        let created = store
            .create(request("s-pg-1", priority), AcademicFlags::default())
            .await
            .unwrap();
        ids.push(created.escalation.id);
    }
    // Force identical timestamps so only the sequence column decides.
    sqlx::query("UPDATE escalation_triage.escalations SET created_at = $1")
        .bind(Utc::now().trunc_subsecs(6))
        .execute(&pool)
        .await
        .unwrap();

    let queue: Vec<Uuid> = store
        .list(&EscalationFilter::default())
        .await
        .unwrap()
        .iter()
        .map(|escalation| escalation.id)
        .collect();
    assert_eq!(queue, vec![ids[1], ids[2], ids[0], ids[3]]);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn history_round_trips_through_jsonb(pool: PgPool) {
    let store = PgStore::new(pool);
    let started = Utc::now().trunc_subsecs(6) - Duration::minutes(2);
    let history = vec![
        ConversationMessage {
            role: "student".to_string(),
            content: "Does my AP credit count for the \u{201c}writing\u{201d} core?".to_string(),
            timestamp: started,
        },
        ConversationMessage {
            role: "assistant".to_string(),
            content: "It is unclear from the context.".to_string(),
            timestamp: started + Duration::seconds(15),
        },
    ];
    let created = store
        .create(
            NewEscalation {
                conversation_history: history.clone(),
                ai_response: "It is unclear from the context.".to_string(),
                ..request("s-pg-2", 3)
            },
            AcademicFlags::default(),
        )
        .await
        .unwrap();

    let fetched = store.get(created.escalation.id).await.unwrap();
    assert_eq!(fetched, created.escalation);
    assert_eq!(fetched.conversation_history, history);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn concurrent_creates_keep_counts_exact(pool: PgPool) {
    let store = std::sync::Arc::new(PgStore::new(pool));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .create(request("s-pg-3", 1), AcademicFlags::default())
                .await
        }));
    }
    let mut synthesized = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().profile_origin == ProfileOrigin::SynthesizedDefault {
            synthesized += 1;
        }
    }

    let profile = store.get_profile("s-pg-3").await.unwrap();
    assert_eq!(synthesized, 1);
    assert_eq!(profile.total_escalations, 8);
    assert_eq!(profile.risk_level, RiskLevel::High);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn failed_transition_rolls_back(pool: PgPool) {
    let store = PgStore::new(pool);
    let id = store
        .create(request("s-pg-4", 2), AcademicFlags::default())
        .await
        .unwrap()
        .escalation
        .id;
    let resolved = store
        .update(
            id,
            &EscalationPatch {
                status: Some(EscalationStatus::Resolved),
                ..EscalationPatch::default()
            },
            Some(AcademicFlags::default()),
        )
        .await
        .unwrap();

    let err = store
        .update(
            id,
            &EscalationPatch {
                status: Some(EscalationStatus::Pending),
                reason: Some("reopen".to_string()),
                ..EscalationPatch::default()
            },
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TriageError::Conflict { .. }));
    assert_eq!(store.get(id).await.unwrap(), resolved);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn advisor_reply_and_notifications_persist(pool: PgPool) {
    let store = PgStore::new(pool);
    let escalation = store
        .create(request("s-pg-5", 2), AcademicFlags::default())
        .await
        .unwrap()
        .escalation;

    let updated = store
        .add_advisor_response(escalation.id, "Dr. Okafor", "See you Tuesday.")
        .await
        .unwrap();
    assert_eq!(updated.status, EscalationStatus::InProgress);
    assert_eq!(updated.assigned_to.as_deref(), Some("Dr. Okafor"));
    assert_eq!(store.get(escalation.id).await.unwrap(), updated);

    let now = Utc::now().trunc_subsecs(6);
    let created = Notification::escalation_created(&escalation, now);
    let reply = Notification::advisor_response(&updated, "Dr. Okafor", now);
    store.push_notification(created.clone()).await.unwrap();
    store.push_notification(reply.clone()).await.unwrap();

    let feed = store
        .notifications("s-pg-5", &NotificationFilter::default())
        .await
        .unwrap();
    assert_eq!(feed, vec![reply.clone(), created.clone()]);

    store.mark_notification_read(reply.id).await.unwrap();
    assert_eq!(store.unread_count("s-pg-5").await.unwrap(), 1);
    assert_eq!(store.mark_all_read("s-pg-5").await.unwrap(), 1);
    store.delete_notification(created.id).await.unwrap();
    assert!(store
        .delete_notification(created.id)
        .await
        .unwrap_err()
        .is_not_found());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn ensure_profile_and_snapshot_agree(pool: PgPool) {
    let store = PgStore::new(pool);
    let fresh = store.ensure_profile("s-pg-6").await.unwrap();
    assert_eq!(fresh.total_escalations, 0);
    store
        .create(request("s-pg-6", 4), AcademicFlags { is_failing: true })
        .await
        .unwrap();

    let snapshot = store.snapshot().await.unwrap();
    assert_eq!(snapshot.escalations.len(), 1);
    assert_eq!(snapshot.profiles.len(), 1);
    assert_eq!(snapshot.profiles[0].total_escalations, 1);
    assert_eq!(snapshot.profiles[0].risk_level, RiskLevel::Critical);
}
