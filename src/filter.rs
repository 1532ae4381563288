use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};

use crate::models::{Assignment, Course, MessageMode, StudentAssignmentInfo};

/// Seven days, the window for the inactivity filter.
pub const INACTIVITY_WINDOW_SECS: i64 = 604_800;

const NOT_SUBMITTABLE_TYPES: [&str; 4] = ["on_paper", "none", "not_graded", ""];
const SCORED_GRADING_TYPES: [&str; 4] = ["points", "percent", "letter_grade", "gpa_scale"];
// Canvas' "message students who" dialog means to reject on_paper,
// external_tool, none, discussion_topic and online_quiz, but its `||` chain
// only ever tests on_paper against the leading submission type. The web UI
// is the reference, so this matches it rather than the intent.
const NOT_REASSIGNABLE_TYPES: [&str; 1] = ["on_paper"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageFilter {
    NotSubmitted,
    NotGraded,
    ScoredMoreThan,
    ScoredLessThan,
    MarkedIncomplete,
    Reassigned,
    CourseScoreLessThan,
    CourseScoreMoreThan,
    CourseScoreBetween,
    CourseScoreEmpty,
    NoCourseActivitySevenDays,
    All,
}

impl MessageFilter {
    /// Canonical order; `applicable_filters` preserves it.
    pub const ALL: [MessageFilter; 12] = [
        MessageFilter::NotSubmitted,
        MessageFilter::NotGraded,
        MessageFilter::ScoredMoreThan,
        MessageFilter::ScoredLessThan,
        MessageFilter::MarkedIncomplete,
        MessageFilter::Reassigned,
        MessageFilter::CourseScoreLessThan,
        MessageFilter::CourseScoreMoreThan,
        MessageFilter::CourseScoreBetween,
        MessageFilter::CourseScoreEmpty,
        MessageFilter::NoCourseActivitySevenDays,
        MessageFilter::All,
    ];

    pub fn title(self) -> &'static str {
        match self {
            MessageFilter::NotSubmitted => "Have not yet submitted",
            MessageFilter::NotGraded => "Have not been graded",
            MessageFilter::ScoredMoreThan => "Scored more than",
            MessageFilter::ScoredLessThan => "Scored less than",
            MessageFilter::MarkedIncomplete => "Marked incomplete",
            MessageFilter::Reassigned => "Reassigned",
            MessageFilter::CourseScoreLessThan => "Course score less than",
            MessageFilter::CourseScoreMoreThan => "Course score more than",
            MessageFilter::CourseScoreBetween => "Course score between",
            MessageFilter::CourseScoreEmpty => "No course score",
            MessageFilter::NoCourseActivitySevenDays => "No course activity in 7 days",
            MessageFilter::All => "All students",
        }
    }

    /// Command-line name, e.g. `scored-less-than`.
    pub fn slug(self) -> &'static str {
        match self {
            MessageFilter::NotSubmitted => "not-submitted",
            MessageFilter::NotGraded => "not-graded",
            MessageFilter::ScoredMoreThan => "scored-more-than",
            MessageFilter::ScoredLessThan => "scored-less-than",
            MessageFilter::MarkedIncomplete => "marked-incomplete",
            MessageFilter::Reassigned => "reassigned",
            MessageFilter::CourseScoreLessThan => "course-score-less-than",
            MessageFilter::CourseScoreMoreThan => "course-score-more-than",
            MessageFilter::CourseScoreBetween => "course-score-between",
            MessageFilter::CourseScoreEmpty => "course-score-empty",
            MessageFilter::NoCourseActivitySevenDays => "no-course-activity",
            MessageFilter::All => "all",
        }
    }

    pub fn mode(self) -> MessageMode {
        match self {
            MessageFilter::NotSubmitted
            | MessageFilter::NotGraded
            | MessageFilter::ScoredMoreThan
            | MessageFilter::ScoredLessThan
            | MessageFilter::MarkedIncomplete
            | MessageFilter::Reassigned => MessageMode::Assignment,
            MessageFilter::CourseScoreLessThan
            | MessageFilter::CourseScoreMoreThan
            | MessageFilter::CourseScoreBetween
            | MessageFilter::CourseScoreEmpty
            | MessageFilter::NoCourseActivitySevenDays
            | MessageFilter::All => MessageMode::Course,
        }
    }

    pub fn score_needed(self) -> bool {
        matches!(
            self,
            MessageFilter::ScoredMoreThan
                | MessageFilter::ScoredLessThan
                | MessageFilter::CourseScoreLessThan
                | MessageFilter::CourseScoreMoreThan
                | MessageFilter::CourseScoreBetween
        )
    }

    pub fn score2_needed(self) -> bool {
        matches!(self, MessageFilter::CourseScoreBetween)
    }

    pub fn should_show(
        self,
        assignment: Option<&Assignment>,
        course: Option<&Course>,
        mode: MessageMode,
    ) -> bool {
        if self.mode() != mode {
            return false;
        }

        match mode {
            MessageMode::Assignment => match assignment {
                Some(assignment) => self.applies_to_assignment(assignment),
                None => false,
            },
            MessageMode::Course => course.is_some(),
        }
    }

    fn applies_to_assignment(self, assignment: &Assignment) -> bool {
        match self {
            MessageFilter::NotSubmitted => {
                // Only the first submission type is consulted.
                let first = assignment
                    .submission_types
                    .first()
                    .map(String::as_str)
                    .unwrap_or("");
                !NOT_SUBMITTABLE_TYPES.contains(&first)
            }
            MessageFilter::NotGraded => true,
            MessageFilter::ScoredMoreThan | MessageFilter::ScoredLessThan => {
                SCORED_GRADING_TYPES.contains(&assignment.grading_type.as_str())
            }
            MessageFilter::MarkedIncomplete => assignment.grading_type == "pass_fail",
            MessageFilter::Reassigned => {
                let attempts_left =
                    assignment.allowed_attempts == -1 || assignment.allowed_attempts > 1;
                let disallowed = assignment
                    .submission_types
                    .first()
                    .is_some_and(|t| NOT_REASSIGNABLE_TYPES.contains(&t.as_str()));
                attempts_left && assignment.due_at.is_some() && !disallowed
            }
            MessageFilter::CourseScoreLessThan
            | MessageFilter::CourseScoreMoreThan
            | MessageFilter::CourseScoreBetween
            | MessageFilter::CourseScoreEmpty
            | MessageFilter::NoCourseActivitySevenDays
            | MessageFilter::All => false,
        }
    }

    pub fn filter_students(
        self,
        students: &[StudentAssignmentInfo],
        score: f64,
        score2: f64,
    ) -> Vec<StudentAssignmentInfo> {
        self.filter_students_at(students, score, score2, Utc::now())
    }

    pub fn filter_students_at(
        self,
        students: &[StudentAssignmentInfo],
        score: f64,
        score2: f64,
        now: DateTime<Utc>,
    ) -> Vec<StudentAssignmentInfo> {
        students
            .iter()
            .filter(|student| self.matches(student, score, score2, now))
            .cloned()
            .collect()
    }

    fn matches(
        self,
        student: &StudentAssignmentInfo,
        score: f64,
        score2: f64,
        now: DateTime<Utc>,
    ) -> bool {
        let submitted = student.submitted_at.is_some();
        match self {
            MessageFilter::NotSubmitted => !submitted,
            MessageFilter::NotGraded => student.grade.is_none(),
            MessageFilter::ScoredMoreThan => {
                submitted && student.score.is_some_and(|s| s > score)
            }
            MessageFilter::ScoredLessThan => {
                submitted && student.score.is_some_and(|s| s < score)
            }
            MessageFilter::MarkedIncomplete => student.grade.as_deref() == Some("incomplete"),
            MessageFilter::Reassigned => student.redo_request,
            MessageFilter::CourseScoreLessThan => student.course_score.is_some_and(|s| s < score),
            MessageFilter::CourseScoreMoreThan => student.course_score.is_some_and(|s| s > score),
            MessageFilter::CourseScoreBetween => student
                .course_score
                .is_some_and(|s| s > score && s < score2),
            MessageFilter::CourseScoreEmpty => student.course_score.is_none(),
            MessageFilter::NoCourseActivitySevenDays => match student.last_course_activity_at {
                Some(last) => now - last > Duration::seconds(INACTIVITY_WINDOW_SECS),
                None => true,
            },
            MessageFilter::All => true,
        }
    }

    pub fn subject(
        self,
        assignment_name: Option<&str>,
        score: f64,
        score2: f64,
        course_name: &str,
    ) -> String {
        let score = format_score(score);
        let score2 = format_score(score2);

        if self.mode() == MessageMode::Assignment {
            let Some(name) = assignment_name else {
                return String::new();
            };
            return match self {
                MessageFilter::NotSubmitted => format!("No submission for {name}"),
                MessageFilter::NotGraded => format!("No grade for {name}"),
                MessageFilter::ScoredMoreThan => format!("Scored more than {score} on {name}"),
                MessageFilter::ScoredLessThan => format!("Scored less than {score} on {name}"),
                MessageFilter::MarkedIncomplete => format!("{name} is incomplete"),
                MessageFilter::Reassigned => format!("{name} is reassigned"),
                _ => String::new(),
            };
        }

        match self {
            MessageFilter::CourseScoreLessThan => {
                format!("Score in {course_name} is less than {score}")
            }
            MessageFilter::CourseScoreMoreThan => {
                format!("Score in {course_name} is more than {score}")
            }
            MessageFilter::CourseScoreBetween => {
                format!("Score in {course_name} is more than {score} and less than {score2}")
            }
            MessageFilter::NoCourseActivitySevenDays => {
                format!("No activity in {course_name} in the last 7 days")
            }
            _ => String::new(),
        }
    }
}

impl fmt::Display for MessageFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

impl FromStr for MessageFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageFilter::ALL
            .into_iter()
            .find(|filter| filter.slug() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = MessageFilter::ALL.iter().map(|f| f.slug()).collect();
                format!("unknown filter '{s}', expected one of: {}", known.join(", "))
            })
    }
}

pub fn applicable_filters(
    assignment: Option<&Assignment>,
    course: Option<&Course>,
    mode: MessageMode,
) -> Vec<MessageFilter> {
    MessageFilter::ALL
        .into_iter()
        .filter(|filter| filter.should_show(assignment, course, mode))
        .collect()
}

/// Renders a threshold the way a person would write it: grouped thousands,
/// no trailing zeros, at most six decimals.
///
/// Formatting follows the en-US locale (`,` groups thousands, `.` marks
/// decimals), matching the Canvas web UI these subjects mirror.
pub fn format_score(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }

    let fixed = format!("{:.6}", value.abs());
    let (whole, fraction) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));
    let fraction = fraction.trim_end_matches('0');

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let is_zero = whole.chars().all(|c| c == '0') && fraction.is_empty();
    let sign = if value < 0.0 && !is_zero { "-" } else { "" };
    if fraction.is_empty() {
        format!("{sign}{grouped}")
    } else {
        format!("{sign}{grouped}.{fraction}")
    }
}
