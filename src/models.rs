use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TERM_NAME: &str = "Default Term";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Term {
    pub id: u64,
    pub name: String,
}

impl Term {
    pub fn is_default_term(&self) -> bool {
        self.name == DEFAULT_TERM_NAME
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Section {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Course {
    pub id: u64,
    pub name: String,
    pub course_code: Option<String>,
    pub workflow_state: String,
    pub term: Term,
    #[serde(default)]
    pub sections: Vec<Section>,
}

impl Course {
    /// Course code, name, term (unless the default term) and first section,
    /// concatenated. Courses are listed in this order.
    pub fn sort_key(&self) -> String {
        let mut key = self.course_code.clone().unwrap_or_default();
        key.push_str(&self.name);
        if !self.term.is_default_term() {
            key.push_str(&self.term.name);
        }
        if let Some(section) = self.sections.first() {
            key.push_str(&section.name);
        }
        key
    }

    pub fn context_code(&self) -> String {
        format!("course_{}", self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Assignment {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub submission_types: Vec<String>,
    /// `-1` means unlimited attempts.
    pub allowed_attempts: i64,
    pub grading_type: String,
    pub due_at: Option<DateTime<Utc>>,
    pub published: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserDisplay {
    pub id: u64,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct Grades {
    pub current_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Enrollment {
    pub id: u64,
    #[serde(default)]
    pub grades: Grades,
    pub last_activity_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub sortable_name: String,
    #[serde(default)]
    pub enrollments: Vec<Enrollment>,
}

impl User {
    pub fn course_score(&self) -> Option<f64> {
        self.enrollments.first().and_then(|e| e.grades.current_score)
    }

    pub fn last_course_activity_at(&self) -> Option<DateTime<Utc>> {
        self.enrollments.first().and_then(|e| e.last_activity_at)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Submission {
    pub user_id: u64,
    pub score: Option<f64>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub grade: Option<String>,
    #[serde(default)]
    pub redo_request: bool,
}

/// One roster row: a student's assignment and course standing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentAssignmentInfo {
    pub id: u64,
    pub name: String,
    pub sortable_name: String,
    pub score: Option<f64>,
    pub grade: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub redo_request: bool,
    pub course_score: Option<f64>,
    pub last_course_activity_at: Option<DateTime<Utc>>,
}

impl StudentAssignmentInfo {
    /// Row for course mode, where no assignment data is available.
    pub fn from_user(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            sortable_name: user.sortable_name.clone(),
            score: None,
            grade: None,
            submitted_at: None,
            redo_request: false,
            course_score: user.course_score(),
            last_course_activity_at: user.last_course_activity_at(),
        }
    }

    pub fn first_name(&self) -> String {
        crate::substitutions::first_name(&self.name)
    }

    pub fn with_submission(user: &User, submission: Option<&Submission>) -> Self {
        let mut info = Self::from_user(user);
        if let Some(submission) = submission {
            info.score = submission.score;
            info.grade = submission.grade.clone();
            info.submitted_at = submission.submitted_at;
            info.redo_request = submission.redo_request;
        }
        info
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MessageMode {
    #[default]
    Assignment,
    Course,
}

impl MessageMode {
    pub fn title(self) -> &'static str {
        match self {
            MessageMode::Assignment => "Based on assignment",
            MessageMode::Course => "Based on course",
        }
    }
}

/// Body of a `POST /api/v1/conversations` request.
#[derive(Debug, Clone, Serialize)]
pub struct PostMessageData {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    pub context_code: String,
    pub mode: &'static str,
    pub group_conversation: bool,
    pub bulk_message: bool,
}

impl PostMessageData {
    pub fn new(course: &Course, recipients: Vec<String>, subject: &str, body: String) -> Self {
        Self {
            recipients,
            subject: subject.to_string(),
            body,
            context_code: course.context_code(),
            mode: "async",
            group_conversation: true,
            bulk_message: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_course(code: Option<&str>, term: &str, sections: &[&str]) -> Course {
        Course {
            id: 42,
            name: "Biology".to_string(),
            course_code: code.map(str::to_string),
            workflow_state: "available".to_string(),
            term: Term {
                id: 1,
                name: term.to_string(),
            },
            sections: sections
                .iter()
                .enumerate()
                .map(|(i, name)| Section {
                    id: i as u64,
                    name: name.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn sort_key_skips_default_term() {
        let course = sample_course(Some("BIO-101 "), DEFAULT_TERM_NAME, &["Section A"]);
        assert_eq!(course.sort_key(), "BIO-101 BiologySection A");
    }

    #[test]
    fn sort_key_includes_named_term_and_first_section_only() {
        let course = sample_course(None, "Fall 2026", &["01", "02"]);
        assert_eq!(course.sort_key(), "BiologyFall 202601");
    }

    #[test]
    fn user_decodes_from_canvas_json() {
        let json = r#"{
            "id": 7,
            "name": "Avery Lee",
            "sortable_name": "Lee, Avery",
            "enrollments": [
                {"id": 99, "grades": {"current_score": 82.5}, "last_activity_at": "2026-02-01T10:00:00Z"}
            ]
        }"#;
        let user: User = serde_json::from_str(json).unwrap();
        assert_eq!(user.course_score(), Some(82.5));
        assert!(user.last_course_activity_at().is_some());
    }

    #[test]
    fn user_without_enrollment_has_no_course_standing() {
        let json = r#"{"id": 7, "name": "Avery Lee", "sortable_name": "Lee, Avery"}"#;
        let user: User = serde_json::from_str(json).unwrap();
        let info = StudentAssignmentInfo::from_user(&user);
        assert_eq!(info.course_score, None);
        assert_eq!(info.last_course_activity_at, None);
    }

    #[test]
    fn post_message_data_uses_snake_case_keys() {
        let course = sample_course(None, DEFAULT_TERM_NAME, &[]);
        let data = PostMessageData::new(&course, vec!["7".to_string()], "Hi", "Body".to_string());
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(value["context_code"], "course_42");
        assert_eq!(value["mode"], "async");
        assert_eq!(value["group_conversation"], true);
        assert_eq!(value["bulk_message"], true);
        assert_eq!(value["recipients"][0], "7");
    }
}
