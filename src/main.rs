use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use escalation_triage::academic::PgAcademicRecords;
use escalation_triage::config::{self, Settings};
use escalation_triage::models::{
    EscalationFilter, EscalationPatch, EscalationStatus, NewEscalation, NoteInput,
    NotificationFilter, ProfilePatch,
};
use escalation_triage::store::{postgres, PgStore};
use escalation_triage::triage::{ExchangeInput, TriageService};
use escalation_triage::{report, roster, seed};

#[derive(Parser)]
#[command(name = "escalation-triage")]
#[command(about = "Advisor escalation queue for the Group Scholar assistant", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Manually escalate a question to an advisor
    Create {
        #[arg(long)]
        student: String,
        #[arg(long)]
        question: String,
        #[arg(long, default_value = "")]
        answer: String,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        priority: Option<i32>,
    },
    /// Run detection on an answered exchange and escalate if needed
    Intake {
        #[arg(long)]
        student: String,
        #[arg(long)]
        question: String,
        #[arg(long)]
        answer: String,
        #[arg(long)]
        documents: usize,
    },
    /// List the triage queue
    List {
        #[arg(long, value_parser = parse_status)]
        status: Option<EscalationStatus>,
        #[arg(long)]
        min_priority: Option<i32>,
        #[arg(long)]
        student: Option<String>,
        #[arg(long, default_value_t = 25)]
        limit: usize,
    },
    /// Show an escalation with its student profile
    Show { id: Uuid },
    /// Change status, priority, assignment, or add a note
    Update {
        id: Uuid,
        #[arg(long, value_parser = parse_status)]
        status: Option<EscalationStatus>,
        #[arg(long)]
        priority: Option<i32>,
        #[arg(long)]
        note: Option<String>,
        #[arg(long, default_value = "advisor")]
        author: String,
        /// Advisor to assign; pass an empty string to unassign
        #[arg(long)]
        assign: Option<String>,
        /// Text appended to the escalation reason
        #[arg(long)]
        reason: Option<String>,
    },
    /// Delete an escalation
    Delete { id: Uuid },
    /// Record a student's reply on their escalation
    Respond {
        id: Uuid,
        #[arg(long)]
        student: String,
        #[arg(long)]
        message: String,
    },
    /// Send the student a reply as an advisor
    AdvisorRespond {
        id: Uuid,
        #[arg(long)]
        advisor: String,
        #[arg(long)]
        message: String,
    },
    /// Show advisor notes and replies
    Messages {
        id: Uuid,
        #[arg(long)]
        student: String,
    },
    /// Read or edit student profiles
    Student {
        #[command(subcommand)]
        command: StudentCommands,
    },
    /// Read and manage a user's notification feed
    Notifications {
        #[command(subcommand)]
        command: NotificationCommands,
    },
    /// Print dashboard counters
    Stats,
    /// Export the queue as CSV
    Export {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long, value_parser = parse_status)]
        status: Option<EscalationStatus>,
    },
    /// Generate a markdown report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Import student profiles from a CSV roster
    ImportRoster {
        #[arg(long)]
        csv: PathBuf,
    },
}

#[derive(Subcommand)]
enum StudentCommands {
    Show {
        student_id: String,
    },
    Update {
        student_id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        major: Option<String>,
        #[arg(long)]
        gpa: Option<f64>,
        #[arg(long, value_delimiter = ';')]
        current_courses: Option<Vec<String>>,
        #[arg(long, value_delimiter = ';')]
        completed_courses: Option<Vec<String>>,
    },
    List,
}

#[derive(Subcommand)]
enum NotificationCommands {
    List {
        user_id: String,
        #[arg(long)]
        unread: bool,
        #[arg(long)]
        limit: Option<usize>,
    },
    Count {
        user_id: String,
    },
    Read {
        id: Uuid,
    },
    ReadAll {
        user_id: String,
    },
    Delete {
        id: Uuid,
    },
}

fn parse_status(value: &str) -> Result<EscalationStatus, String> {
    value.parse().map_err(|err| format!("{err}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    config::init_logging(cli.settings.log_json);

    let pool = cli.settings.connect().await?;
    let service = TriageService::new(Arc::new(PgStore::new(pool.clone())))
        .with_academic_records(Arc::new(PgAcademicRecords::new(pool.clone())));

    match cli.command {
        Commands::InitDb => {
            postgres::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let created = seed::seed(&pool, &service).await?;
            println!("Seed data inserted ({created} escalations).");
        }
        Commands::Create {
            student,
            question,
            answer,
            reason,
            priority,
        } => {
            let created = service
                .create_escalation(NewEscalation {
                    student_id: student,
                    question,
                    ai_response: answer,
                    conversation_history: Vec::new(),
                    escalation_reason: reason,
                    priority,
                })
                .await?;
            println!(
                "Created escalation {} (priority {}, student risk {}).",
                created.escalation.id, created.escalation.priority, created.profile.risk_level
            );
        }
        Commands::Intake {
            student,
            question,
            answer,
            documents,
        } => {
            let outcome = service
                .evaluate_exchange(ExchangeInput {
                    student_id: student,
                    question,
                    ai_response: answer,
                    retrieved_document_count: documents,
                    conversation_history: Vec::new(),
                })
                .await?;
            match outcome.escalation {
                Some(created) => println!(
                    "Escalated as {} (priority {}): {}",
                    created.escalation.id,
                    created.escalation.priority,
                    outcome.detection.reason
                ),
                None => println!("No escalation needed."),
            }
        }
        Commands::List {
            status,
            min_priority,
            student,
            limit,
        } => {
            let escalations = service
                .list_escalations(&EscalationFilter {
                    status,
                    min_priority,
                    student_id: student,
                })
                .await?;

            if escalations.is_empty() {
                println!("No escalations match.");
                return Ok(());
            }

            for escalation in escalations.iter().take(limit) {
                println!(
                    "- {} P{} {} [{}] {} ({})",
                    escalation.id,
                    escalation.priority,
                    escalation.status,
                    escalation.student_id,
                    escalation.question,
                    escalation.escalation_reason
                );
            }
        }
        Commands::Show { id } => {
            let detail = service.get_escalation(id).await?;
            println!("{}", serde_json::to_string_pretty(&detail)?);
        }
        Commands::Update {
            id,
            status,
            priority,
            note,
            author,
            assign,
            reason,
        } => {
            let patch = EscalationPatch {
                status,
                priority,
                note: note.map(|text| NoteInput { author, text }),
                assigned_to: assign,
                reason,
            };
            let updated = service.update_escalation(id, &patch).await?;
            println!(
                "Escalation {} is {} at priority {}.",
                updated.id, updated.status, updated.priority
            );
        }
        Commands::Delete { id } => {
            service.delete_escalation(id).await?;
            println!("Deleted escalation {id}.");
        }
        Commands::Respond {
            id,
            student,
            message,
        } => {
            let updated = service.respond_to_escalation(id, &student, &message).await?;
            println!("Reply recorded; escalation {} is {}.", updated.id, updated.status);
        }
        Commands::AdvisorRespond {
            id,
            advisor,
            message,
        } => {
            let updated = service.advisor_respond(id, &advisor, &message).await?;
            println!(
                "Reply sent; escalation {} is {} and assigned to {}.",
                updated.id,
                updated.status,
                updated.assigned_to.as_deref().unwrap_or("nobody")
            );
        }
        Commands::Messages { id, student } => {
            let messages = service.escalation_messages(id, &student).await?;
            println!("{}", serde_json::to_string_pretty(&messages)?);
        }
        Commands::Student { command } => match command {
            StudentCommands::Show { student_id } => {
                let profile = service.get_student_profile(&student_id).await?;
                println!("{}", serde_json::to_string_pretty(&profile)?);
            }
            StudentCommands::Update {
                student_id,
                name,
                major,
                gpa,
                current_courses,
                completed_courses,
            } => {
                let profile = service
                    .update_student_profile(
                        &student_id,
                        &ProfilePatch {
                            name,
                            major,
                            gpa,
                            completed_courses,
                            current_courses,
                        },
                    )
                    .await?;
                println!("{}", serde_json::to_string_pretty(&profile)?);
            }
            StudentCommands::List => {
                for profile in service.list_students().await? {
                    println!(
                        "- {} ({}) {} risk, {} escalations",
                        profile.name, profile.student_id, profile.risk_level, profile.total_escalations
                    );
                }
            }
        },
        Commands::Notifications { command } => match command {
            NotificationCommands::List {
                user_id,
                unread,
                limit,
            } => {
                let feed = service
                    .notifications(
                        &user_id,
                        &NotificationFilter {
                            unread_only: unread,
                            limit,
                        },
                    )
                    .await?;
                if feed.is_empty() {
                    println!("No notifications.");
                }
                for notification in feed {
                    println!(
                        "- {} {} P{} {}: {}",
                        notification.id,
                        if notification.read { "read" } else { "new" },
                        notification.priority,
                        notification.title,
                        notification.message
                    );
                }
            }
            NotificationCommands::Count { user_id } => {
                let count = service.unread_notifications(&user_id).await?;
                println!("{user_id} has {count} unread notifications.");
            }
            NotificationCommands::Read { id } => {
                service.mark_notification_read(id).await?;
                println!("Marked {id} read.");
            }
            NotificationCommands::ReadAll { user_id } => {
                let count = service.mark_all_notifications_read(&user_id).await?;
                println!("Marked {count} notifications read.");
            }
            NotificationCommands::Delete { id } => {
                service.delete_notification(id).await?;
                println!("Deleted notification {id}.");
            }
        },
        Commands::Stats => {
            let stats = service.dashboard_stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Export { csv, status } => {
            let escalations = service
                .list_escalations(&EscalationFilter {
                    status,
                    ..EscalationFilter::default()
                })
                .await?;
            let file = std::fs::File::create(&csv)
                .with_context(|| format!("failed to create {}", csv.display()))?;
            report::write_csv(file, &escalations)?;
            println!("Exported {} escalations to {}.", escalations.len(), csv.display());
        }
        Commands::Report { out } => {
            let escalations = service.list_escalations(&EscalationFilter::default()).await?;
            let profiles = service.list_students().await?;
            let report = report::build_report(&escalations, &profiles, chrono::Utc::now());
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::ImportRoster { csv } => {
            let imported = roster::import_roster(&service, &csv).await?;
            println!("Imported {imported} students from {}.", csv.display());
        }
    }

    Ok(())
}
