use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{queue_order, AdvisorNote, Escalation, EscalationStatus, StudentProfile};
use crate::triage;

const QUESTION_PREVIEW_CHARS: usize = 200;

pub fn build_report(
    escalations: &[Escalation],
    profiles: &[StudentProfile],
    generated_at: DateTime<Utc>,
) -> String {
    let stats = triage::summarize(escalations, profiles);
    let mut output = String::new();

    let _ = writeln!(output, "# Escalation Triage Report");
    let _ = writeln!(
        output,
        "Generated {} across {} escalations and {} students",
        generated_at.format("%Y-%m-%d %H:%M UTC"),
        stats.total,
        stats.total_students
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Status Mix");
    for status in EscalationStatus::ALL {
        let count = escalations.iter().filter(|e| e.status == status).count();
        let _ = writeln!(output, "- {}: {}", status, count);
    }

    let mut open: Vec<&Escalation> = escalations.iter().filter(|e| e.is_open()).collect();
    open.sort_by(|a, b| queue_order(a, b));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Queue Head");

    if open.is_empty() {
        let _ = writeln!(output, "No open escalations.");
    } else {
        for escalation in open.iter().take(10) {
            let _ = writeln!(
                output,
                "- P{} {} ({}, {}) since {}: {}",
                escalation.priority,
                escalation.student_id,
                escalation.status,
                escalation.escalation_reason,
                escalation.created_at.format("%Y-%m-%d"),
                preview(&escalation.question, 80)
            );
        }
    }

    let mut at_risk: Vec<&StudentProfile> = profiles
        .iter()
        .filter(|profile| profile.risk_level.is_high_risk())
        .collect();
    at_risk.sort_by(|a, b| {
        b.risk_level
            .cmp(&a.risk_level)
            .then_with(|| b.total_escalations.cmp(&a.total_escalations))
    });
    let _ = writeln!(output);
    let _ = writeln!(output, "## High Risk Students");

    if at_risk.is_empty() {
        let _ = writeln!(output, "No students at high or critical risk.");
    } else {
        for profile in at_risk {
            let _ = writeln!(
                output,
                "- {} ({}, {}) {} risk across {} escalations",
                profile.name,
                profile.student_id,
                profile.major,
                profile.risk_level,
                profile.total_escalations
            );
        }
    }

    let mut notes: Vec<(&Escalation, &AdvisorNote)> = escalations
        .iter()
        .flat_map(|escalation| escalation.notes.iter().map(move |note| (escalation, note)))
        .collect();
    notes.sort_by(|a, b| b.1.timestamp.cmp(&a.1.timestamp));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Advisor Notes");

    if notes.is_empty() {
        let _ = writeln!(output, "No advisor notes recorded.");
    } else {
        for (escalation, note) in notes.iter().take(5) {
            let _ = writeln!(
                output,
                "- {} on {} for {}: {}",
                note.author,
                note.timestamp.format("%Y-%m-%d"),
                escalation.student_id,
                note.text
            );
        }
    }

    output
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    #[serde(rename = "Escalation ID")]
    id: String,
    #[serde(rename = "Student ID")]
    student_id: &'a str,
    #[serde(rename = "Question")]
    question: String,
    #[serde(rename = "Status")]
    status: &'static str,
    #[serde(rename = "Priority")]
    priority: i32,
    #[serde(rename = "Reason")]
    reason: &'a str,
    #[serde(rename = "Created At")]
    created_at: String,
    #[serde(rename = "Assigned To")]
    assigned_to: &'a str,
    #[serde(rename = "Notes Count")]
    notes_count: usize,
}

pub fn write_csv<W: std::io::Write>(writer: W, escalations: &[Escalation]) -> anyhow::Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    for escalation in escalations {
        csv_writer.serialize(CsvRow {
            id: escalation.id.to_string(),
            student_id: &escalation.student_id,
            question: preview(&escalation.question, QUESTION_PREVIEW_CHARS),
            status: escalation.status.as_str(),
            priority: escalation.priority,
            reason: &escalation.escalation_reason,
            created_at: escalation.created_at.to_rfc3339(),
            assigned_to: escalation.assigned_to.as_deref().unwrap_or("None"),
            notes_count: escalation.notes.len(),
        })?;
    }

    csv_writer.flush()?;
    Ok(())
}

fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
