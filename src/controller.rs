//! Runs the commands `state::reduce` emits and feeds their results back in.

use tracing::{info, warn};

use crate::canvas::{CanvasClient, SendReport};
use crate::state::{reduce, AppState, Command, Event};

pub struct Controller {
    base_url: String,
    client: Option<CanvasClient>,
    state: AppState,
}

impl Controller {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: None,
            state: AppState::default(),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Applies `event` and every follow-up event produced by running the
    /// resulting commands, until the state settles.
    pub async fn dispatch(&mut self, event: Event) {
        let mut pending = Some(event);
        while let Some(event) = pending.take() {
            let state = std::mem::take(&mut self.state);
            let (state, command) = reduce(state, event);
            self.state = state;
            if let Some(command) = command {
                pending = self.execute(command).await;
            }
        }
    }

    async fn execute(&mut self, command: Command) -> Option<Event> {
        if let Command::FetchCourses {
            generation,
            access_token,
        } = command
        {
            let client = CanvasClient::new(self.base_url.clone(), access_token);
            let courses = client.fetch_courses().await;
            self.client = Some(client);
            return Some(Event::CoursesLoaded {
                generation,
                courses,
            });
        }

        let Some(client) = &self.client else {
            warn!("no access token set, skipping Canvas request");
            return None;
        };

        match command {
            Command::FetchCourses { .. } => None,
            Command::FetchAssignments { generation, course } => Some(Event::AssignmentsLoaded {
                generation,
                assignments: client.fetch_assignments(&course).await,
            }),
            Command::FetchCourseRoster { generation, course } => Some(Event::RosterLoaded {
                generation,
                roster: client.fetch_course_roster(&course).await,
            }),
            Command::FetchAssignmentRoster {
                generation,
                course,
                assignment,
            } => Some(Event::RosterLoaded {
                generation,
                roster: client.fetch_assignment_roster(&course, &assignment).await,
            }),
            Command::SendMessage {
                course,
                recipients,
                subject,
                body,
            } => {
                let report: SendReport = client
                    .send_message(&course, &recipients, &subject, &body, true)
                    .await;
                info!(
                    requests = report.requests,
                    failed = report.failed,
                    "message send finished"
                );
                Some(Event::SendFinished(report))
            }
        }
    }
}
