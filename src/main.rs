use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod canvas;
mod controller;
mod filter;
mod models;
mod report;
mod state;
mod substitutions;

use controller::Controller;
use filter::{applicable_filters, format_score, MessageFilter};
use models::MessageMode;
use state::Event;

#[derive(Parser)]
#[command(name = "student-outreach")]
#[command(about = "Message Canvas students who match assignment or course criteria", long_about = None)]
struct Cli {
    /// Canvas API access token
    #[arg(long, env = "CANVAS_ACCESS_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,
    /// Canvas host
    #[arg(long, env = "CANVAS_BASE_URL", default_value = canvas::DEFAULT_BASE_URL, global = true)]
    base_url: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Selection {
    #[arg(long)]
    course: u64,
    /// Select students by assignment; omit to select by course standing
    #[arg(long)]
    assignment: Option<u64>,
    /// Filter name, e.g. not-submitted or course-score-between
    #[arg(long)]
    filter: MessageFilter,
    #[arg(long)]
    score: Option<f64>,
    /// Upper bound for course-score-between
    #[arg(long)]
    score2: Option<f64>,
    /// Student id to leave out; repeatable
    #[arg(long)]
    exclude: Vec<u64>,
    /// Only students whose name contains this text
    #[arg(long)]
    search: Option<String>,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct BodySource {
    #[arg(long)]
    body: Option<String>,
    #[arg(long)]
    body_file: Option<PathBuf>,
}

impl BodySource {
    fn read(&self) -> anyhow::Result<String> {
        match (&self.body, &self.body_file) {
            (Some(body), _) => Ok(body.clone()),
            (None, Some(path)) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display())),
            (None, None) => bail!("either --body or --body-file is required"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List active courses you teach
    Courses,
    /// List published assignments and the filters each supports
    Assignments {
        #[arg(long)]
        course: u64,
    },
    /// List filters available for a course or assignment
    Filters {
        #[arg(long)]
        course: u64,
        #[arg(long)]
        assignment: Option<u64>,
    },
    /// Show who would receive a message
    Recipients {
        #[command(flatten)]
        selection: Selection,
        /// Write the recipients to a CSV file instead
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Write a markdown preview of the message
    Preview {
        #[command(flatten)]
        selection: Selection,
        #[command(flatten)]
        body: BodySource,
        #[arg(long, default_value = "preview.md")]
        out: PathBuf,
    },
    /// Send the message
    Send {
        #[command(flatten)]
        selection: Selection,
        #[command(flatten)]
        body: BodySource,
        /// Replace the generated subject
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let token = cli
        .token
        .context("CANVAS_ACCESS_TOKEN must be set to a Canvas API access token")?;

    let mut controller = Controller::new(cli.base_url);
    controller.dispatch(Event::AccessTokenChanged(token)).await;

    match cli.command {
        Commands::Courses => {
            let courses = &controller.state().courses;
            if courses.is_empty() {
                println!("No active courses found.");
                return Ok(());
            }
            for course in courses {
                let term = if course.term.is_default_term() {
                    String::new()
                } else {
                    format!(", {}", course.term.name)
                };
                println!(
                    "- {} {}{} [{}] (id {})",
                    course.course_code.as_deref().unwrap_or("-"),
                    course.name,
                    term,
                    course.workflow_state,
                    course.id
                );
            }
        }
        Commands::Assignments { course } => {
            select_course(&mut controller, course, MessageMode::Assignment).await?;
            let state = controller.state();
            if state.assignments.is_empty() {
                println!("No published assignments.");
                return Ok(());
            }
            for assignment in &state.assignments {
                let filters = applicable_filters(
                    Some(assignment),
                    state.selected_course.as_ref(),
                    MessageMode::Assignment,
                );
                println!("- {} (id {})", assignment.name, assignment.id);
                println!("  filters: {}", slugs(&filters));
            }
        }
        Commands::Filters { course, assignment } => {
            select_scope(&mut controller, course, assignment).await?;
            let filters = controller.state().applicable_filters();
            if filters.is_empty() {
                println!("No filters apply.");
            }
            for filter in filters {
                let params = match (filter.score_needed(), filter.score2_needed()) {
                    (true, true) => " --score N --score2 N",
                    (true, false) => " --score N",
                    _ => "",
                };
                println!("- {}: {}{}", filter.slug(), filter.title(), params);
            }
        }
        Commands::Recipients { selection, csv } => {
            apply_selection(&mut controller, &selection).await?;
            let state = controller.state();
            let recipients = state.recipients_to_message();

            if let Some(path) = csv {
                let file = std::fs::File::create(&path)
                    .with_context(|| format!("failed to create {}", path.display()))?;
                let written = report::write_recipients_csv(file, &recipients)?;
                println!("Wrote {written} recipients to {}.", path.display());
                return Ok(());
            }

            println!("Subject: {}", state.subject);
            if recipients.is_empty() {
                println!("No students match this filter.");
                return Ok(());
            }
            println!("{} recipients:", recipients.len());
            for student in &recipients {
                println!(
                    "- {} (id {}) score {} course score {}",
                    student.name,
                    student.id,
                    student.score.map(format_score).unwrap_or_else(|| "-".into()),
                    student
                        .course_score
                        .map(format_score)
                        .unwrap_or_else(|| "-".into())
                );
            }
        }
        Commands::Preview {
            selection,
            body,
            out,
        } => {
            apply_selection(&mut controller, &selection).await?;
            let body = body.read()?;
            controller.dispatch(Event::BodyEdited(body)).await;

            let state = controller.state();
            let course = state
                .selected_course
                .as_ref()
                .context("no course selected")?;
            let preview = report::build_preview(
                course,
                state.selected_assignment.as_ref(),
                selection.filter,
                (state.score, state.score2),
                &state.subject,
                &state.body,
                &state.recipients_to_message(),
            );
            std::fs::write(&out, preview)?;
            println!("Preview written to {}.", out.display());
        }
        Commands::Send {
            selection,
            body,
            subject,
            dry_run,
        } => {
            apply_selection(&mut controller, &selection).await?;
            controller.dispatch(Event::BodyEdited(body.read()?)).await;
            if let Some(subject) = subject {
                controller.dispatch(Event::SubjectEdited(subject)).await;
            }

            let state = controller.state();
            let recipients = state.recipients_to_message();
            if recipients.is_empty() {
                println!("No students match this filter; nothing sent.");
                return Ok(());
            }

            if dry_run {
                let course = state
                    .selected_course
                    .as_ref()
                    .context("no course selected")?;
                let plan = canvas::plan_messages(course, &recipients, &state.subject, &state.body, true);
                println!(
                    "Would send {} request(s) to {} recipients with subject \"{}\".",
                    plan.len(),
                    recipients.len(),
                    state.subject
                );
                return Ok(());
            }

            controller.dispatch(Event::SendRequested).await;
            match controller.state().last_send {
                Some(report) => println!(
                    "{}: {} of {} request(s) accepted for {} recipients.",
                    controller.state().send_state.title(),
                    report.succeeded(),
                    report.requests,
                    report.recipients
                ),
                None => println!("Message was not sent."),
            }
        }
    }

    Ok(())
}

fn slugs(filters: &[MessageFilter]) -> String {
    if filters.is_empty() {
        return "none".to_string();
    }
    filters
        .iter()
        .map(|f| f.slug())
        .collect::<Vec<_>>()
        .join(", ")
}

async fn select_course(
    controller: &mut Controller,
    course_id: u64,
    mode: MessageMode,
) -> anyhow::Result<()> {
    controller.dispatch(Event::ModeChanged(mode)).await;
    let course = controller
        .state()
        .courses
        .iter()
        .find(|c| c.id == course_id)
        .cloned()
        .with_context(|| format!("course {course_id} is not one of your active courses"))?;
    controller.dispatch(Event::CourseSelected(Some(course))).await;
    Ok(())
}

async fn select_scope(
    controller: &mut Controller,
    course_id: u64,
    assignment_id: Option<u64>,
) -> anyhow::Result<()> {
    let Some(assignment_id) = assignment_id else {
        return select_course(controller, course_id, MessageMode::Course).await;
    };

    select_course(controller, course_id, MessageMode::Assignment).await?;
    let assignment = controller
        .state()
        .assignments
        .iter()
        .find(|a| a.id == assignment_id)
        .cloned()
        .with_context(|| {
            format!("assignment {assignment_id} is not a published assignment of course {course_id}")
        })?;
    controller
        .dispatch(Event::AssignmentSelected(Some(assignment)))
        .await;
    Ok(())
}

async fn apply_selection(controller: &mut Controller, selection: &Selection) -> anyhow::Result<()> {
    let filter = selection.filter;
    if selection.score.is_some() && !filter.score_needed() {
        bail!("--score is not used by the {} filter", filter.slug());
    }
    if selection.score2.is_some() && !filter.score2_needed() {
        bail!("--score2 is not used by the {} filter", filter.slug());
    }

    select_scope(controller, selection.course, selection.assignment).await?;

    let applicable = controller.state().applicable_filters();
    if !applicable.contains(&filter) {
        bail!(
            "filter {} does not apply here; available: {}",
            filter.slug(),
            slugs(&applicable)
        );
    }
    controller.dispatch(Event::FilterSelected(Some(filter))).await;

    if let Some(score) = selection.score {
        controller.dispatch(Event::ScoreChanged(score)).await;
    }
    if let Some(score2) = selection.score2 {
        controller.dispatch(Event::Score2Changed(score2)).await;
    }
    for id in &selection.exclude {
        controller.dispatch(Event::RecipientToggled(*id)).await;
    }
    if let Some(search) = &selection.search {
        controller.dispatch(Event::SearchChanged(search.clone())).await;
    }

    Ok(())
}
