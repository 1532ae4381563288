use std::fmt::Write;

use serde::Serialize;

use crate::filter::{format_score, MessageFilter};
use crate::models::{Assignment, Course, StudentAssignmentInfo};
use crate::substitutions::{self, Substitution};

#[derive(Debug, Serialize)]
struct RecipientRow<'a> {
    id: u64,
    name: &'a str,
    sortable_name: &'a str,
    score: Option<f64>,
    grade: Option<&'a str>,
    submitted_at: Option<String>,
    course_score: Option<f64>,
    last_course_activity_at: Option<String>,
}

impl<'a> From<&'a StudentAssignmentInfo> for RecipientRow<'a> {
    fn from(student: &'a StudentAssignmentInfo) -> Self {
        Self {
            id: student.id,
            name: &student.name,
            sortable_name: &student.sortable_name,
            score: student.score,
            grade: student.grade.as_deref(),
            submitted_at: student.submitted_at.map(|t| t.to_rfc3339()),
            course_score: student.course_score,
            last_course_activity_at: student.last_course_activity_at.map(|t| t.to_rfc3339()),
        }
    }
}

pub fn write_recipients_csv<W: std::io::Write>(
    writer: W,
    recipients: &[StudentAssignmentInfo],
) -> anyhow::Result<usize> {
    let mut writer = csv::Writer::from_writer(writer);
    for recipient in recipients {
        writer.serialize(RecipientRow::from(recipient))?;
    }
    writer.flush()?;
    Ok(recipients.len())
}

pub fn build_preview(
    course: &Course,
    assignment: Option<&Assignment>,
    filter: MessageFilter,
    thresholds: (f64, f64),
    subject: &str,
    body: &str,
    recipients: &[StudentAssignmentInfo],
) -> String {
    let mut output = String::new();
    let substitutions_used = substitutions::count_substitutions(body);

    let _ = writeln!(output, "# Message Preview");
    let _ = writeln!(output, "Course: {} (id {})", course.name, course.id);
    if let Some(assignment) = assignment {
        let _ = writeln!(output, "Assignment: {} (id {})", assignment.name, assignment.id);
    }

    let mut criterion = filter.title().to_string();
    if filter.score_needed() {
        let _ = write!(criterion, " {}", format_score(thresholds.0));
    }
    if filter.score2_needed() {
        let _ = write!(criterion, " and {}", format_score(thresholds.1));
    }
    let _ = writeln!(output, "Recipients: {criterion} ({})", filter.mode().title());
    let _ = writeln!(output);

    let _ = writeln!(output, "## Subject");
    if subject.is_empty() {
        let _ = writeln!(output, "(no subject)");
    } else {
        let _ = writeln!(output, "{subject}");
    }
    let _ = writeln!(output);

    let _ = writeln!(output, "## Delivery");
    if substitutions_used == 0 {
        let _ = writeln!(
            output,
            "One bulk message to {} recipients (no substitutions).",
            recipients.len()
        );
    } else {
        let _ = writeln!(
            output,
            "{} individual messages using {} substitutions.",
            recipients.len(),
            substitutions_used
        );
        for substitution in Substitution::ALL {
            let _ = writeln!(
                output,
                "- `{}`: {}",
                substitution.literal(),
                substitution.explanation()
            );
        }
    }
    let _ = writeln!(output);

    let _ = writeln!(output, "## Recipients");
    if recipients.is_empty() {
        let _ = writeln!(output, "No students match this filter.");
    } else {
        for recipient in recipients {
            let _ = writeln!(output, "- {} ({})", recipient.name, recipient.id);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Sample Body");
    match recipients.first() {
        Some(first) => {
            let expanded = substitutions::expand(body, &first.name, &first.first_name());
            let _ = writeln!(output, "{expanded}");
        }
        None => {
            let _ = writeln!(output, "{body}");
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Term;
    use chrono::{TimeZone, Utc};

    fn sample_course() -> Course {
        Course {
            id: 12,
            name: "Biology".to_string(),
            course_code: None,
            workflow_state: "available".to_string(),
            term: Term {
                id: 1,
                name: "Default Term".to_string(),
            },
            sections: Vec::new(),
        }
    }

    fn sample_recipient(id: u64, name: &str) -> StudentAssignmentInfo {
        StudentAssignmentInfo {
            id,
            name: name.to_string(),
            sortable_name: name.to_string(),
            score: Some(42.0),
            grade: Some("42".to_string()),
            submitted_at: Some(Utc.with_ymd_and_hms(2026, 2, 1, 9, 30, 0).unwrap()),
            redo_request: false,
            course_score: None,
            last_course_activity_at: None,
        }
    }

    #[test]
    fn preview_for_personalised_message() {
        let recipients = vec![sample_recipient(1, "Avery Lee"), sample_recipient(2, "Jules Moreno")];
        let preview = build_preview(
            &sample_course(),
            None,
            MessageFilter::CourseScoreBetween,
            (50.0, 80.0),
            "Score in Biology is more than 50 and less than 80",
            "Hi <student first name>",
            &recipients,
        );
        assert!(preview.contains("Recipients: Course score between 50 and 80 (Based on course)"));
        assert!(preview.contains("2 individual messages using 1 substitutions."));
        assert!(preview.contains("- Jules Moreno (2)"));
        assert!(preview.ends_with("Hi Avery\n"));
    }

    #[test]
    fn preview_for_bulk_message_without_recipients() {
        let preview = build_preview(
            &sample_course(),
            None,
            MessageFilter::All,
            (0.0, 100.0),
            "",
            "Class is cancelled.",
            &[],
        );
        assert!(preview.contains("(no subject)"));
        assert!(preview.contains("One bulk message to 0 recipients"));
        assert!(preview.contains("No students match this filter."));
    }

    #[test]
    fn csv_has_header_and_one_row_per_recipient() {
        let recipients = vec![sample_recipient(1, "Avery Lee"), sample_recipient(2, "Jules Moreno")];
        let mut buffer = Vec::new();
        let written = write_recipients_csv(&mut buffer, &recipients).unwrap();
        assert_eq!(written, 2);

        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("id,name,sortable_name,score"));
        assert!(lines[1].starts_with("1,Avery Lee,Avery Lee,42.0,42,2026-02-01T09:30:00+00:00"));
    }
}
