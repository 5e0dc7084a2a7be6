use sqlx::PgPool;

use crate::models::{EscalationFilter, NewEscalation, ProfilePatch};
use crate::triage::{ExchangeInput, TriageService};

struct SeedStudent {
    student_id: &'static str,
    name: &'static str,
    major: &'static str,
    gpa: f64,
    current_courses: &'static [&'static str],
    is_failing: bool,
}

const STUDENTS: &[SeedStudent] = &[
    SeedStudent {
        student_id: "gs-2026-001",
        name: "Avery Lee",
        major: "Economics",
        gpa: 3.4,
        current_courses: &["ECON 201", "STAT 110"],
        is_failing: false,
    },
    SeedStudent {
        student_id: "gs-2025-014",
        name: "Jules Moreno",
        major: "Biology",
        gpa: 2.9,
        current_courses: &["BIO 240", "CHEM 210"],
        is_failing: false,
    },
    SeedStudent {
        student_id: "gs-2026-027",
        name: "Kiara Patel",
        major: "Computer Science",
        gpa: 1.8,
        current_courses: &["CS 150", "MATH 221"],
        is_failing: true,
    },
];

/// (student, question, answer, retrieved documents)
const EXCHANGES: &[(&str, &str, &str, usize)] = &[
    (
        "gs-2026-001",
        "Will my scholarship cover a summer term abroad?",
        "Scholarship terms vary by award, and I don't have that information for your specific award.",
        1,
    ),
    (
        "gs-2025-014",
        "Can I take BIO 240 and CHEM 210 in the same semester?",
        "I cannot find a prerequisite conflict.",
        3,
    ),
    (
        "gs-2026-027",
        "I am failing MATH 221, should I withdraw before the deadline?",
        "Withdrawal deadlines are listed in the academic calendar.",
        1,
    ),
];

/// Loads sample students and escalations. Students that already have
/// escalations are left alone so the command can be re-run.
pub async fn seed(pool: &PgPool, service: &TriageService) -> anyhow::Result<usize> {
    for student in STUDENTS {
        sqlx::query(
            r#"
            INSERT INTO escalation_triage.academic_standing (student_id, is_failing)
            VALUES ($1, $2)
            ON CONFLICT (student_id) DO UPDATE
            SET is_failing = EXCLUDED.is_failing, updated_at = now()
            "#,
        )
        .bind(student.student_id)
        .bind(student.is_failing)
        .execute(pool)
        .await?;

        service
            .update_student_profile(
                student.student_id,
                &ProfilePatch {
                    name: Some(student.name.to_string()),
                    major: Some(student.major.to_string()),
                    gpa: Some(student.gpa),
                    current_courses: Some(
                        student.current_courses.iter().map(|c| c.to_string()).collect(),
                    ),
                    completed_courses: None,
                },
            )
            .await?;
    }

    let mut created = 0usize;
    for (student_id, question, answer, documents) in EXCHANGES {
        let existing = service
            .list_escalations(&EscalationFilter {
                student_id: Some(student_id.to_string()),
                ..EscalationFilter::default()
            })
            .await?;
        if !existing.is_empty() {
            continue;
        }

        let outcome = service
            .evaluate_exchange(ExchangeInput {
                student_id: student_id.to_string(),
                question: question.to_string(),
                ai_response: answer.to_string(),
                retrieved_document_count: *documents,
                conversation_history: Vec::new(),
            })
            .await?;
        if outcome.escalation.is_some() {
            created += 1;
        }
    }

    let follow_up = NewEscalation {
        student_id: "gs-2026-027".to_string(),
        question: "Requesting a meeting about academic probation".to_string(),
        escalation_reason: Some("student_request".to_string()),
        priority: Some(4),
        ..NewEscalation::default()
    };
    let existing = service
        .list_escalations(&EscalationFilter {
            student_id: Some(follow_up.student_id.clone()),
            ..EscalationFilter::default()
        })
        .await?;
    if existing.len() < 2 {
        service.create_escalation(follow_up).await?;
        created += 1;
    }

    Ok(created)
}
