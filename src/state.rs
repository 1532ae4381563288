//! Selection state and its transitions.
//!
//! `reduce` is pure: it returns the next state plus, at most, one command for
//! the controller to run. Fetch commands carry a generation number so a
//! result that arrives after a newer selection is recognised and dropped.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::canvas::SendReport;
use crate::filter::{applicable_filters, MessageFilter};
use crate::models::{Assignment, Course, MessageMode, StudentAssignmentInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageSendState {
    #[default]
    Unsent,
    Sending,
    Sent,
}

impl MessageSendState {
    pub fn title(self) -> &'static str {
        match self {
            MessageSendState::Unsent => "Send",
            MessageSendState::Sending => "Sending",
            MessageSendState::Sent => "Message sent!",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub access_token: String,
    pub courses: Vec<Course>,
    pub selected_course: Option<Course>,
    pub mode: MessageMode,
    pub assignments: Vec<Assignment>,
    pub selected_assignment: Option<Assignment>,
    pub roster: Vec<StudentAssignmentInfo>,
    pub filter: Option<MessageFilter>,
    pub score: f64,
    pub score2: f64,
    pub disabled: HashSet<u64>,
    pub search_term: String,
    pub subject: String,
    pub body: String,
    pub send_state: MessageSendState,
    pub last_send: Option<SendReport>,
    courses_generation: u64,
    roster_generation: u64,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            courses: Vec::new(),
            selected_course: None,
            mode: MessageMode::default(),
            assignments: Vec::new(),
            selected_assignment: None,
            roster: Vec::new(),
            filter: None,
            score: 0.0,
            score2: 100.0,
            disabled: HashSet::new(),
            search_term: String::new(),
            subject: String::new(),
            body: String::new(),
            send_state: MessageSendState::default(),
            last_send: None,
            courses_generation: 0,
            roster_generation: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    AccessTokenChanged(String),
    CoursesLoaded {
        generation: u64,
        courses: Vec<Course>,
    },
    CourseSelected(Option<Course>),
    ModeChanged(MessageMode),
    AssignmentsLoaded {
        generation: u64,
        assignments: Vec<Assignment>,
    },
    AssignmentSelected(Option<Assignment>),
    RosterLoaded {
        generation: u64,
        roster: Vec<StudentAssignmentInfo>,
    },
    FilterSelected(Option<MessageFilter>),
    ScoreChanged(f64),
    Score2Changed(f64),
    RecipientToggled(u64),
    SearchChanged(String),
    SubjectEdited(String),
    BodyEdited(String),
    SendRequested,
    SendFinished(SendReport),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    FetchCourses {
        generation: u64,
        access_token: String,
    },
    FetchAssignments {
        generation: u64,
        course: Course,
    },
    FetchCourseRoster {
        generation: u64,
        course: Course,
    },
    FetchAssignmentRoster {
        generation: u64,
        course: Course,
        assignment: Assignment,
    },
    SendMessage {
        course: Course,
        recipients: Vec<StudentAssignmentInfo>,
        subject: String,
        body: String,
    },
}

impl AppState {
    pub fn applicable_filters(&self) -> Vec<MessageFilter> {
        applicable_filters(
            self.selected_assignment.as_ref(),
            self.selected_course.as_ref(),
            self.mode,
        )
    }

    pub fn students_matching_filter(&self) -> Vec<StudentAssignmentInfo> {
        match self.filter {
            Some(filter) => filter.filter_students(&self.roster, self.score, self.score2),
            None => Vec::new(),
        }
    }

    /// Filtered roster minus disabled students, narrowed by the search term
    /// (case-insensitive substring of the name).
    pub fn recipients_to_message(&self) -> Vec<StudentAssignmentInfo> {
        let needle = self.search_term.to_lowercase();
        self.students_matching_filter()
            .into_iter()
            .filter(|s| !self.disabled.contains(&s.id))
            .filter(|s| needle.is_empty() || s.name.to_lowercase().contains(&needle))
            .collect()
    }

    fn regenerate_subject(&mut self) {
        match self.filter {
            Some(filter) => {
                if let Some(course) = &self.selected_course {
                    self.subject = filter.subject(
                        self.selected_assignment.as_ref().map(|a| a.name.as_str()),
                        self.score,
                        self.score2,
                        &course.name,
                    );
                }
            }
            None => self.subject.clear(),
        }
    }

    /// Anything that changes what would be sent makes a sent message unsent.
    fn mark_edited(&mut self) {
        if self.send_state == MessageSendState::Sent {
            self.send_state = MessageSendState::Unsent;
        }
    }

    fn clear_selection_dependents(&mut self) {
        self.mark_edited();
        self.roster.clear();
        self.filter = None;
        self.disabled.clear();
        self.roster_generation += 1;
        self.regenerate_subject();
    }

    fn fetch_for_course(&self) -> Option<Command> {
        let course = self.selected_course.clone()?;
        let generation = self.roster_generation;
        Some(match self.mode {
            MessageMode::Assignment => Command::FetchAssignments { generation, course },
            MessageMode::Course => Command::FetchCourseRoster { generation, course },
        })
    }
}

pub fn reduce(mut state: AppState, event: Event) -> (AppState, Option<Command>) {
    let command = match event {
        Event::AccessTokenChanged(token) => {
            state.access_token = token;
            state.courses.clear();
            state.selected_course = None;
            state.assignments.clear();
            state.selected_assignment = None;
            state.clear_selection_dependents();
            state.courses_generation += 1;
            Some(Command::FetchCourses {
                generation: state.courses_generation,
                access_token: state.access_token.clone(),
            })
        }
        Event::CoursesLoaded {
            generation,
            courses,
        } => {
            if generation == state.courses_generation {
                state.courses = courses;
            } else {
                debug!(generation, "discarding stale course list");
            }
            None
        }
        Event::CourseSelected(course) => {
            state.selected_course = course;
            state.assignments.clear();
            state.selected_assignment = None;
            state.clear_selection_dependents();
            state.fetch_for_course()
        }
        Event::ModeChanged(mode) => {
            if mode == state.mode {
                None
            } else {
                state.mode = mode;
                state.assignments.clear();
                state.selected_assignment = None;
                state.clear_selection_dependents();
                state.fetch_for_course()
            }
        }
        Event::AssignmentsLoaded {
            generation,
            assignments,
        } => {
            if generation == state.roster_generation {
                state.assignments = assignments;
            } else {
                debug!(generation, "discarding stale assignment list");
            }
            None
        }
        Event::AssignmentSelected(assignment) => {
            state.selected_assignment = assignment;
            state.clear_selection_dependents();
            match (&state.selected_course, &state.selected_assignment, state.mode) {
                (Some(course), Some(assignment), MessageMode::Assignment) => {
                    Some(Command::FetchAssignmentRoster {
                        generation: state.roster_generation,
                        course: course.clone(),
                        assignment: assignment.clone(),
                    })
                }
                _ => None,
            }
        }
        Event::RosterLoaded { generation, roster } => {
            if generation == state.roster_generation {
                state.mark_edited();
                state.roster = roster;
                state.disabled.clear();
            } else {
                debug!(generation, "discarding stale roster");
            }
            None
        }
        Event::FilterSelected(filter) => {
            match filter {
                Some(f) if !state.applicable_filters().contains(&f) => {
                    warn!(filter = f.slug(), "filter does not apply to the current selection");
                }
                _ => {
                    state.mark_edited();
                    state.filter = filter;
                    state.disabled.clear();
                    state.regenerate_subject();
                }
            }
            None
        }
        Event::ScoreChanged(score) => {
            if state.filter.is_some_and(MessageFilter::score_needed) {
                state.mark_edited();
                state.score = score;
                state.disabled.clear();
                state.regenerate_subject();
            } else {
                debug!("ignoring score for a filter without thresholds");
            }
            None
        }
        Event::Score2Changed(score2) => {
            if state.filter.is_some_and(MessageFilter::score2_needed) {
                state.mark_edited();
                state.score2 = score2;
                state.disabled.clear();
                state.regenerate_subject();
            } else {
                debug!("ignoring second score for a filter without an upper bound");
            }
            None
        }
        Event::RecipientToggled(id) => {
            state.mark_edited();
            if !state.disabled.remove(&id) {
                state.disabled.insert(id);
            }
            None
        }
        Event::SearchChanged(term) => {
            state.search_term = term;
            None
        }
        Event::SubjectEdited(subject) => {
            state.mark_edited();
            state.subject = subject;
            None
        }
        Event::BodyEdited(body) => {
            state.mark_edited();
            state.body = body;
            None
        }
        Event::SendRequested => {
            let sending = state.send_state == MessageSendState::Sending;
            match state.selected_course.clone() {
                Some(course) if !sending => {
                    let command = Command::SendMessage {
                        course,
                        recipients: state.recipients_to_message(),
                        subject: state.subject.clone(),
                        body: state.body.clone(),
                    };
                    state.send_state = MessageSendState::Sending;
                    Some(command)
                }
                _ => None,
            }
        }
        Event::SendFinished(report) => {
            state.send_state = MessageSendState::Sent;
            state.last_send = Some(report);
            None
        }
    };

    (state, command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Term;
    use chrono::Utc;

    fn sample_course(id: u64) -> Course {
        Course {
            id,
            name: "Biology".to_string(),
            course_code: Some("BIO-101".to_string()),
            workflow_state: "available".to_string(),
            term: Term {
                id: 1,
                name: "Default Term".to_string(),
            },
            sections: Vec::new(),
        }
    }

    fn sample_assignment() -> Assignment {
        Assignment {
            id: 7,
            name: "Lab Report".to_string(),
            submission_types: vec!["online_upload".to_string()],
            allowed_attempts: 1,
            grading_type: "points".to_string(),
            due_at: Some(Utc::now()),
            published: true,
        }
    }

    fn sample_student(id: u64, name: &str, course_score: Option<f64>) -> StudentAssignmentInfo {
        StudentAssignmentInfo {
            id,
            name: name.to_string(),
            sortable_name: name.to_string(),
            score: None,
            grade: None,
            submitted_at: None,
            redo_request: false,
            course_score,
            last_course_activity_at: None,
        }
    }

    fn apply(state: AppState, events: Vec<Event>) -> AppState {
        events
            .into_iter()
            .fold(state, |state, event| reduce(state, event).0)
    }

    fn course_mode_with_roster() -> AppState {
        let (state, _) = reduce(AppState::default(), Event::ModeChanged(MessageMode::Course));
        let (state, command) = reduce(state, Event::CourseSelected(Some(sample_course(3))));
        let Some(Command::FetchCourseRoster { generation, .. }) = command else {
            panic!("expected a course roster fetch, got {command:?}");
        };
        let roster = vec![
            sample_student(1, "Avery Lee", Some(40.0)),
            sample_student(2, "Jules Moreno", Some(90.0)),
            sample_student(3, "Kiara Patel", None),
        ];
        reduce(state, Event::RosterLoaded { generation, roster }).0
    }

    #[test]
    fn token_change_fetches_courses() {
        let (state, command) =
            reduce(AppState::default(), Event::AccessTokenChanged("abc".to_string()));
        assert_eq!(
            command,
            Some(Command::FetchCourses {
                generation: 1,
                access_token: "abc".to_string(),
            })
        );
        let (state, _) = reduce(
            state,
            Event::CoursesLoaded {
                generation: 1,
                courses: vec![sample_course(1)],
            },
        );
        assert_eq!(state.courses.len(), 1);
    }

    #[test]
    fn course_selection_fetch_depends_on_mode() {
        let (_, command) = reduce(AppState::default(), Event::CourseSelected(Some(sample_course(3))));
        assert!(matches!(command, Some(Command::FetchAssignments { .. })));

        let state = AppState {
            mode: MessageMode::Course,
            ..AppState::default()
        };
        let (_, command) = reduce(state, Event::CourseSelected(Some(sample_course(3))));
        assert!(matches!(command, Some(Command::FetchCourseRoster { .. })));

        let (_, command) = reduce(AppState::default(), Event::CourseSelected(None));
        assert_eq!(command, None);
    }

    #[test]
    fn assignment_selection_fetches_joined_roster() {
        let state = apply(
            AppState::default(),
            vec![Event::CourseSelected(Some(sample_course(3)))],
        );
        let (state, command) = reduce(state, Event::AssignmentSelected(Some(sample_assignment())));
        match command {
            Some(Command::FetchAssignmentRoster {
                course, assignment, ..
            }) => {
                assert_eq!(course.id, 3);
                assert_eq!(assignment.id, 7);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(
            state.applicable_filters(),
            vec![
                MessageFilter::NotSubmitted,
                MessageFilter::NotGraded,
                MessageFilter::ScoredMoreThan,
                MessageFilter::ScoredLessThan,
            ]
        );
    }

    #[test]
    fn stale_roster_is_discarded() {
        let (state, first) = reduce(
            AppState {
                mode: MessageMode::Course,
                ..AppState::default()
            },
            Event::CourseSelected(Some(sample_course(1))),
        );
        let (state, second) = reduce(state, Event::CourseSelected(Some(sample_course(2))));
        let (Some(Command::FetchCourseRoster { generation: old, .. }), Some(Command::FetchCourseRoster { generation: new, .. })) =
            (first, second)
        else {
            panic!("expected two roster fetches");
        };
        assert_ne!(old, new);

        let state = apply(
            state,
            vec![
                Event::RosterLoaded {
                    generation: new,
                    roster: vec![sample_student(2, "Jules Moreno", None)],
                },
                Event::RosterLoaded {
                    generation: old,
                    roster: vec![sample_student(1, "Avery Lee", None)],
                },
            ],
        );
        assert_eq!(state.roster.len(), 1);
        assert_eq!(state.roster[0].id, 2);
    }

    #[test]
    fn selection_change_resets_filter_and_disabled() {
        let state = apply(
            course_mode_with_roster(),
            vec![
                Event::FilterSelected(Some(MessageFilter::All)),
                Event::RecipientToggled(1),
            ],
        );
        assert_eq!(state.disabled.len(), 1);

        let (state, _) = reduce(state, Event::CourseSelected(Some(sample_course(4))));
        assert_eq!(state.filter, None);
        assert!(state.disabled.is_empty());
        assert!(state.roster.is_empty());
        assert_eq!(state.subject, "");
    }

    #[test]
    fn inapplicable_filter_is_ignored() {
        let state = apply(
            course_mode_with_roster(),
            vec![Event::FilterSelected(Some(MessageFilter::NotSubmitted))],
        );
        assert_eq!(state.filter, None);
    }

    #[test]
    fn thresholds_only_for_filters_that_need_them() {
        let state = apply(
            course_mode_with_roster(),
            vec![
                Event::FilterSelected(Some(MessageFilter::CourseScoreLessThan)),
                Event::ScoreChanged(50.0),
                Event::Score2Changed(60.0),
            ],
        );
        assert_eq!(state.score, 50.0);
        assert_eq!(state.score2, 100.0);
        assert_eq!(state.subject, "Score in Biology is less than 50");

        let state = apply(
            state,
            vec![
                Event::FilterSelected(Some(MessageFilter::CourseScoreEmpty)),
                Event::ScoreChanged(10.0),
            ],
        );
        assert_eq!(state.score, 50.0);
        assert_eq!(state.subject, "");
    }

    #[test]
    fn recipients_exclude_disabled_and_respect_search() {
        let state = apply(
            course_mode_with_roster(),
            vec![Event::FilterSelected(Some(MessageFilter::All))],
        );
        assert_eq!(state.recipients_to_message().len(), 3);

        let state = apply(state, vec![Event::RecipientToggled(2)]);
        let ids: Vec<u64> = state.recipients_to_message().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 3]);

        let state = apply(state, vec![Event::SearchChanged("PATEL".to_string())]);
        let ids: Vec<u64> = state.recipients_to_message().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![3]);

        let state = apply(state, vec![Event::RecipientToggled(2), Event::SearchChanged(String::new())]);
        assert_eq!(state.recipients_to_message().len(), 3);
    }

    #[test]
    fn send_cycle() {
        let state = apply(
            course_mode_with_roster(),
            vec![
                Event::FilterSelected(Some(MessageFilter::CourseScoreMoreThan)),
                Event::ScoreChanged(80.0),
                Event::BodyEdited("Great work, <student first name>!".to_string()),
            ],
        );
        let (state, command) = reduce(state, Event::SendRequested);
        assert_eq!(state.send_state, MessageSendState::Sending);
        match command {
            Some(Command::SendMessage {
                recipients,
                subject,
                ..
            }) => {
                assert_eq!(recipients.len(), 1);
                assert_eq!(recipients[0].id, 2);
                assert_eq!(subject, "Score in Biology is more than 80");
            }
            other => panic!("unexpected command {other:?}"),
        }

        let (state, command) = reduce(state, Event::SendRequested);
        assert_eq!(command, None);

        let report = SendReport {
            requests: 1,
            failed: 0,
            recipients: 1,
        };
        let (state, _) = reduce(state, Event::SendFinished(report));
        assert_eq!(state.send_state, MessageSendState::Sent);
        assert_eq!(state.last_send, Some(report));
        assert_eq!(state.send_state.title(), "Message sent!");

        let (state, _) = reduce(state, Event::SubjectEdited("Follow up".to_string()));
        assert_eq!(state.send_state, MessageSendState::Unsent);
    }
}
