//! Canvas REST client: paginated reads of courses, assignments and rosters,
//! and conversation posts.
//!
//! Read failures never reach the caller. They are logged and surface as an
//! empty collection, and a failed send is logged without stopping the batch.

use std::collections::HashMap;

use reqwest::header::LINK;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::models::{
    Assignment, Course, PostMessageData, StudentAssignmentInfo, Submission, User, UserDisplay,
};
use crate::substitutions;

pub const DEFAULT_BASE_URL: &str = "https://canvas.instructure.com";
const PER_PAGE: u32 = 100;

#[derive(Error, Debug)]
pub enum CanvasError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
}

/// Outcome of one `send_message` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendReport {
    pub requests: usize,
    pub failed: usize,
    pub recipients: usize,
}

impl SendReport {
    pub fn succeeded(&self) -> usize {
        self.requests - self.failed
    }
}

pub struct CanvasClient {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl CanvasClient {
    /// `base_url` is the Canvas host, e.g. `https://canvas.instructure.com`.
    pub fn new(base_url: String, access_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path)
    }

    /// Active courses the token's user teaches, with term and sections.
    pub async fn fetch_courses(&self) -> Vec<Course> {
        let url = self.api_url(&format!(
            "courses?enrollment_type=teacher&enrollment_state=active&include[]=term&include[]=sections&per_page={PER_PAGE}"
        ));
        match self.get_all::<Course>(url).await {
            Ok(courses) => {
                info!(count = courses.len(), "fetched courses");
                sort_courses(courses)
            }
            Err(err) => {
                error!(%err, "failed to fetch courses");
                Vec::new()
            }
        }
    }

    /// Published assignments of `course`, by name.
    pub async fn fetch_assignments(&self, course: &Course) -> Vec<Assignment> {
        let url = self.api_url(&format!(
            "courses/{}/assignments?per_page={PER_PAGE}",
            course.id
        ));
        match self.get_all::<Assignment>(url).await {
            Ok(assignments) => {
                let mut published: Vec<Assignment> =
                    assignments.into_iter().filter(|a| a.published).collect();
                published.sort_by(|a, b| a.name.cmp(&b.name));
                info!(course_id = course.id, count = published.len(), "fetched assignments");
                published
            }
            Err(err) => {
                error!(course_id = course.id, %err, "failed to fetch assignments");
                Vec::new()
            }
        }
    }

    /// Roster for course mode: every enrolled student, no assignment data.
    pub async fn fetch_course_roster(&self, course: &Course) -> Vec<StudentAssignmentInfo> {
        match self.get_all::<User>(self.students_url(course)).await {
            Ok(users) => {
                let mut roster: Vec<StudentAssignmentInfo> =
                    users.iter().map(StudentAssignmentInfo::from_user).collect();
                roster.sort_by(|a, b| a.sortable_name.cmp(&b.sortable_name));
                info!(course_id = course.id, count = roster.len(), "fetched course roster");
                roster
            }
            Err(err) => {
                error!(course_id = course.id, %err, "failed to fetch course roster");
                Vec::new()
            }
        }
    }

    /// Roster for assignment mode. Gradeable students, submissions and
    /// enrolled users are fetched concurrently and joined by student id.
    pub async fn fetch_assignment_roster(
        &self,
        course: &Course,
        assignment: &Assignment,
    ) -> Vec<StudentAssignmentInfo> {
        let gradeable_url = self.api_url(&format!(
            "courses/{}/assignments/{}/gradeable_students?per_page={PER_PAGE}",
            course.id, assignment.id
        ));
        let submissions_url = self.api_url(&format!(
            "courses/{}/assignments/{}/submissions?per_page={PER_PAGE}",
            course.id, assignment.id
        ));

        let fetched = tokio::try_join!(
            self.get_all::<UserDisplay>(gradeable_url),
            self.get_all::<Submission>(submissions_url),
            self.get_all::<User>(self.students_url(course)),
        );

        match fetched {
            Ok((gradeable, submissions, users)) => {
                let roster = join_roster(&gradeable, &submissions, &users);
                info!(
                    course_id = course.id,
                    assignment_id = assignment.id,
                    count = roster.len(),
                    "fetched assignment roster"
                );
                roster
            }
            Err(err) => {
                error!(
                    course_id = course.id,
                    assignment_id = assignment.id,
                    %err,
                    "failed to fetch assignment roster"
                );
                Vec::new()
            }
        }
    }

    /// Posts the message. With `bulk_if_generic` set and no substitution
    /// tokens in `body`, a single conversation addresses every recipient;
    /// otherwise each recipient gets their own personalised request.
    pub async fn send_message(
        &self,
        course: &Course,
        recipients: &[StudentAssignmentInfo],
        subject: &str,
        body: &str,
        bulk_if_generic: bool,
    ) -> SendReport {
        let mut report = SendReport {
            recipients: recipients.len(),
            ..SendReport::default()
        };

        if recipients.is_empty() {
            warn!(course_id = course.id, "no recipients, nothing sent");
            return report;
        }

        let messages = plan_messages(course, recipients, subject, body, bulk_if_generic);
        info!(
            course_id = course.id,
            recipients = recipients.len(),
            requests = messages.len(),
            "sending message"
        );

        for message in &messages {
            report.requests += 1;
            if let Err(err) = self.post_conversation(message).await {
                report.failed += 1;
                error!(recipients = ?message.recipients, %err, "failed to send message");
            }
        }

        report
    }

    async fn post_conversation(&self, message: &PostMessageData) -> Result<(), CanvasError> {
        let resp = self
            .client
            .post(self.api_url("conversations"))
            .bearer_auth(&self.access_token)
            .json(message)
            .send()
            .await?;

        let status = resp.status();
        if status != StatusCode::ACCEPTED {
            let body = resp.text().await.unwrap_or_default();
            return Err(CanvasError::Server {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    fn students_url(&self, course: &Course) -> String {
        self.api_url(&format!(
            "courses/{}/users?enrollment_type=student&include[]=enrollments&per_page={PER_PAGE}",
            course.id
        ))
    }

    /// Follows `rel="next"` links until the listing is exhausted.
    async fn get_all<T: DeserializeOwned>(&self, url: String) -> Result<Vec<T>, CanvasError> {
        let mut results = Vec::new();
        let mut next = Some(url);

        while let Some(url) = next.take() {
            debug!(url = %url, "fetching page");
            let resp = self
                .client
                .get(&url)
                .bearer_auth(&self.access_token)
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(CanvasError::Server {
                    status: status.as_u16(),
                    body,
                });
            }

            next = resp
                .headers()
                .get(LINK)
                .and_then(|value| value.to_str().ok())
                .and_then(next_page_url);

            let page: Vec<T> = resp.json().await?;
            results.extend(page);
        }

        Ok(results)
    }
}

/// Extracts the `rel="next"` target from a `Link` header value such as
/// `<https://x/api/v1/...&page=2>; rel="next", <...>; rel="last"`.
pub fn next_page_url(link: &str) -> Option<String> {
    link.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let target = parts.next()?.trim();
        let is_next = parts.any(|param| param.trim() == "rel=\"next\"");
        is_next.then(|| target.trim_matches(|c| c == '<' || c == '>').to_string())
    })
}

pub fn sort_courses(mut courses: Vec<Course>) -> Vec<Course> {
    courses.sort_by_cached_key(Course::sort_key);
    courses
}

/// One row per gradeable student that is also an enrolled user, sorted by
/// sortable name. Gradeable students without a user record are dropped.
pub fn join_roster(
    gradeable: &[UserDisplay],
    submissions: &[Submission],
    users: &[User],
) -> Vec<StudentAssignmentInfo> {
    let users_by_id: HashMap<u64, &User> = users.iter().map(|u| (u.id, u)).collect();
    let mut submissions_by_user: HashMap<u64, &Submission> = HashMap::new();
    for submission in submissions {
        submissions_by_user.entry(submission.user_id).or_insert(submission);
    }

    let mut roster: Vec<StudentAssignmentInfo> = gradeable
        .iter()
        .filter_map(|student| {
            let Some(user) = users_by_id.get(&student.id) else {
                debug!(student_id = student.id, "gradeable student has no user record");
                return None;
            };
            let submission = submissions_by_user.get(&student.id).copied();
            Some(StudentAssignmentInfo::with_submission(user, submission))
        })
        .collect();

    roster.sort_by(|a, b| a.sortable_name.cmp(&b.sortable_name));
    roster
}

/// The conversation requests `send_message` will issue, in order.
pub fn plan_messages(
    course: &Course,
    recipients: &[StudentAssignmentInfo],
    subject: &str,
    body: &str,
    bulk_if_generic: bool,
) -> Vec<PostMessageData> {
    if bulk_if_generic && substitutions::count_substitutions(body) == 0 {
        let ids = recipients.iter().map(|r| r.id.to_string()).collect();
        return vec![PostMessageData::new(
            course,
            ids,
            subject,
            substitutions::expand(body, "", ""),
        )];
    }

    recipients
        .iter()
        .map(|recipient| {
            let body = substitutions::expand(body, &recipient.name, &recipient.first_name());
            PostMessageData::new(course, vec![recipient.id.to_string()], subject, body)
        })
        .collect()
}
