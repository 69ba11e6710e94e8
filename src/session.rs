//! Client-side controller for one task attempt.
//!
//! [`AgentSession`] folds [`StreamEvent`]s into [`SessionState`] one at a
//! time, in arrival order:
//!
//! ```text
//!   Idle ──start──▶ Running ──status{completed}──▶ Completed
//!                      │    ──error / stream end─▶ Errored
//!                      └────cancel──────────────▶ Cancelled
//!   Completed | Errored | Cancelled ──reset──▶ Idle
//! ```
//!
//! Events are only folded while `Running`. The process-wide
//! [`CredentialGate`] lives outside the session so a reset cannot clear it.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use futures::{Stream, StreamExt};

use crate::protocol::{LogGroup, StreamEvent};

pub const IDLE_STATUS: &str = "Awaiting task...";
pub const STARTING_STATUS: &str = "Initializing agent...";
pub const ERROR_STATUS: &str = "Error occurred";
pub const CANCELLED_STATUS: &str = "Task cancelled";
pub const STREAM_ENDED_ERROR: &str = "Stream ended before the task reported completion.";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("a task is already running")]
    AlreadyRunning,
    #[error("cannot reset while a task is running")]
    ResetWhileRunning,
    #[error("the previous task failed; reset before starting a new one")]
    ResetRequired,
    #[error("task query is empty")]
    EmptyQuery,
    #[error("{0}")]
    SubmissionDisabled(String),
}

/// Cooperative cancellation flag shared between a session and its stream.
///
/// Flips from false to true at most once; a new attempt gets a new flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Returns `true` only for the call that flipped it.
    pub fn cancel(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// A polling predicate for stream consumers.
    pub fn predicate(&self) -> impl Fn() -> bool + Send + Sync + 'static {
        let flag = Arc::clone(&self.0);
        move || flag.load(Ordering::SeqCst)
    }
}

/// Upstream credential presence, checked once per process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialGate {
    critical_error: Option<String>,
}

static PROCESS_GATE: OnceLock<CredentialGate> = OnceLock::new();

impl CredentialGate {
    pub const MISSING_MESSAGE: &'static str =
        "Critical Error: API_KEY is not configured. Please set the API_KEY environment variable.";

    /// Gate for a given credential value; blank counts as missing.
    pub fn check(credential: Option<&str>) -> Self {
        let present = credential.is_some_and(|c| !c.trim().is_empty());
        Self {
            critical_error: (!present).then(|| Self::MISSING_MESSAGE.to_string()),
        }
    }

    /// Gate that never blocks submission.
    pub fn open() -> Self {
        Self {
            critical_error: None,
        }
    }

    pub fn from_env() -> Self {
        let credential = std::env::var("API_KEY")
            .ok()
            .or_else(|| std::env::var("GEMINI_API_KEY").ok());
        Self::check(credential.as_deref())
    }

    /// The process-wide gate, evaluated from the environment on first use.
    pub fn process() -> &'static CredentialGate {
        PROCESS_GATE.get_or_init(|| {
            let gate = Self::from_env();
            if let Some(message) = gate.critical_error() {
                tracing::error!("{}", message);
            }
            gate
        })
    }

    pub fn critical_error(&self) -> Option<&str> {
        self.critical_error.as_deref()
    }

    pub fn allows_submission(&self) -> bool {
        self.critical_error.is_none()
    }
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Running,
    Completed,
    Errored,
    Cancelled,
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionPhase::Completed | SessionPhase::Errored | SessionPhase::Cancelled
        )
    }
}

/// What a single fold did to the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Update {
    /// The session was not running; nothing changed.
    Ignored,
    Architecture,
    LogAppended { index: usize },
    Status,
    Completed,
    Errored,
    Cancelled,
}

/// UI-facing state of the current attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    log_groups: Vec<Arc<LogGroup>>,
    architecture: Vec<String>,
    status_message: String,
    is_completed: bool,
    is_running: bool,
    error: Option<String>,
    cancelled: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            log_groups: Vec::new(),
            architecture: Vec::new(),
            status_message: IDLE_STATUS.to_string(),
            is_completed: false,
            is_running: false,
            error: None,
            cancelled: false,
        }
    }
}

impl SessionState {
    /// Log history in arrival order. Groups are shared, never copied or edited.
    pub fn log_groups(&self) -> &[Arc<LogGroup>] {
        &self.log_groups
    }

    pub fn architecture(&self) -> &[String] {
        &self.architecture
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn is_completed(&self) -> bool {
        self.is_completed
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn phase(&self) -> SessionPhase {
        if self.is_running {
            SessionPhase::Running
        } else if self.cancelled {
            SessionPhase::Cancelled
        } else if self.error.is_some() {
            SessionPhase::Errored
        } else if self.is_completed {
            SessionPhase::Completed
        } else {
            SessionPhase::Idle
        }
    }

    fn finish_with_error(&mut self, message: String) {
        self.error = Some(message);
        self.status_message = ERROR_STATUS.to_string();
        self.is_completed = true;
        self.is_running = false;
    }

    fn assert_invariants(&self) {
        debug_assert!(!(self.is_completed && self.is_running));
        debug_assert!(self.error.is_none() || (self.is_completed && !self.is_running));
    }
}

/// A started attempt: the trimmed query and the flag its stream should poll.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub id: u64,
    pub query: String,
    pub cancel: CancelFlag,
}

/// Drives task attempts and owns their UI state.
#[derive(Debug)]
pub struct AgentSession {
    state: SessionState,
    gate: CredentialGate,
    cancel: CancelFlag,
    attempts: u64,
}

impl AgentSession {
    pub fn new(gate: CredentialGate) -> Self {
        Self {
            state: SessionState::default(),
            gate,
            cancel: CancelFlag::new(),
            attempts: 0,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    pub fn gate(&self) -> &CredentialGate {
        &self.gate
    }

    /// Error to show: a critical configuration error wins over the attempt's own.
    pub fn display_error(&self) -> Option<&str> {
        self.gate.critical_error().or(self.state.error())
    }

    /// Whether the input should accept a new query.
    pub fn can_submit(&self) -> bool {
        self.gate.allows_submission() && !self.state.is_running && self.state.error.is_none()
    }

    /// Flag for the current attempt.
    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Reset to a fresh attempt and enter `Running`.
    pub fn start(&mut self, query: &str) -> Result<Attempt, SessionError> {
        if let Some(message) = self.gate.critical_error() {
            return Err(SessionError::SubmissionDisabled(message.to_string()));
        }
        if self.state.is_running {
            return Err(SessionError::AlreadyRunning);
        }
        if self.state.error.is_some() {
            return Err(SessionError::ResetRequired);
        }
        let query = query.trim();
        if query.is_empty() {
            return Err(SessionError::EmptyQuery);
        }

        self.reset_state();
        self.attempts += 1;
        self.state.is_running = true;
        self.state.status_message = STARTING_STATUS.to_string();
        tracing::info!(attempt = self.attempts, "Task started");

        Ok(Attempt {
            id: self.attempts,
            query: query.to_string(),
            cancel: self.cancel.clone(),
        })
    }

    /// Fold one event into the state.
    pub fn apply(&mut self, event: StreamEvent) -> Update {
        if !self.state.is_running {
            tracing::debug!("Ignoring event outside a running task: {:?}", event);
            return Update::Ignored;
        }

        let update = match event {
            StreamEvent::Architecture { data } => {
                self.state.architecture = data;
                Update::Architecture
            }
            StreamEvent::Log { data } => {
                self.state.log_groups.push(Arc::new(data));
                Update::LogAppended {
                    index: self.state.log_groups.len() - 1,
                }
            }
            StreamEvent::Status { message, completed } => {
                self.state.status_message = message;
                if completed.unwrap_or(false) {
                    self.state.is_completed = true;
                    self.state.is_running = false;
                    tracing::info!(attempt = self.attempts, "Task completed");
                    Update::Completed
                } else {
                    Update::Status
                }
            }
            StreamEvent::Error { message } => {
                tracing::warn!(attempt = self.attempts, "Task failed: {}", message);
                self.state.finish_with_error(message);
                Update::Errored
            }
        };

        self.state.assert_invariants();
        update
    }

    /// User-triggered stop. Only meaningful while running; later calls are no-ops.
    pub fn cancel(&mut self) -> Update {
        if !self.state.is_running {
            return Update::Ignored;
        }
        self.cancel.cancel();
        self.state.cancelled = true;
        self.state.is_running = false;
        self.state.is_completed = true;
        self.state.status_message = CANCELLED_STATUS.to_string();
        tracing::info!(attempt = self.attempts, "Task cancelled");
        self.state.assert_invariants();
        Update::Cancelled
    }

    /// The event stream ended. Ending without a terminal event is a failure.
    pub fn finish_stream(&mut self) -> Update {
        if !self.state.is_running {
            return Update::Ignored;
        }
        tracing::warn!(attempt = self.attempts, "Stream closed without a terminal event");
        self.state.finish_with_error(STREAM_ENDED_ERROR.to_string());
        self.state.assert_invariants();
        Update::Errored
    }

    /// Return to `Idle`. Not allowed while a task is running.
    pub fn reset(&mut self) -> Result<(), SessionError> {
        if self.state.is_running {
            return Err(SessionError::ResetWhileRunning);
        }
        self.reset_state();
        Ok(())
    }

    fn reset_state(&mut self) {
        // Whatever still reads the old flag must stop consuming.
        self.cancel.cancel();
        self.cancel = CancelFlag::new();
        self.state = SessionState::default();
    }

    /// Wait for the next event or the interrupt, whichever comes first, and fold it.
    pub async fn step<S, I>(&mut self, events: &mut S, interrupt: &mut I) -> Update
    where
        S: Stream<Item = StreamEvent> + Unpin,
        I: Future<Output = ()> + Unpin,
    {
        tokio::select! {
            biased;
            _ = interrupt => self.cancel(),
            next = events.next() => match next {
                Some(event) => self.apply(event),
                None => self.finish_stream(),
            },
        }
    }

    /// Consume `events` until the attempt reaches a terminal state.
    ///
    /// `interrupt` resolving cancels the attempt. `on_update` sees the state
    /// after every fold.
    pub async fn run<S, I, F>(&mut self, events: S, interrupt: I, mut on_update: F) -> SessionPhase
    where
        S: Stream<Item = StreamEvent>,
        I: Future<Output = ()>,
        F: FnMut(&SessionState, Update),
    {
        futures::pin_mut!(events);
        futures::pin_mut!(interrupt);

        while self.state.is_running {
            let update = self.step(&mut events, &mut interrupt).await;
            on_update(&self.state, update);
        }
        self.phase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::LogLine;
    use futures::{future, stream, FutureExt};

    fn session() -> AgentSession {
        AgentSession::new(CredentialGate::open())
    }

    fn step_log(title: &str) -> StreamEvent {
        StreamEvent::Log {
            data: LogGroup::new(title, vec![LogLine::thought("Thinking...")]),
        }
    }

    fn architecture() -> StreamEvent {
        StreamEvent::Architecture {
            data: vec!["README.md".to_string(), "src/".to_string()],
        }
    }

    #[test]
    fn test_new_session_is_idle() {
        let session = session();
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert_eq!(session.state().status_message(), IDLE_STATUS);
        assert!(session.can_submit());
    }

    #[test]
    fn test_successful_attempt() {
        let mut session = session();
        let attempt = session.start("  test query ").unwrap();
        assert_eq!(attempt.query, "test query");
        assert_eq!(session.state().status_message(), STARTING_STATUS);
        assert!(!session.can_submit());

        assert_eq!(session.apply(StreamEvent::status("Agent is thinking...")), Update::Status);
        assert_eq!(session.apply(architecture()), Update::Architecture);
        assert_eq!(session.apply(step_log("Step 1")), Update::LogAppended { index: 0 });
        assert_eq!(session.apply(StreamEvent::completed("Task completed")), Update::Completed);

        let state = session.state();
        assert!(!state.is_running());
        assert!(state.is_completed());
        assert_eq!(state.architecture(), ["README.md", "src/"]);
        assert_eq!(state.log_groups().len(), 1);
        assert_eq!(state.log_groups()[0].title, "Step 1");
        assert_eq!(state.status_message(), "Task completed");
        assert_eq!(session.phase(), SessionPhase::Completed);
        assert!(session.can_submit());
    }

    #[test]
    fn test_error_event_is_terminal() {
        let mut session = session();
        session.start("q").unwrap();
        session.apply(StreamEvent::status("Agent is thinking..."));
        assert_eq!(session.apply(StreamEvent::error("Server error: 500 boom")), Update::Errored);

        let state = session.state();
        assert!(state.is_completed());
        assert!(!state.is_running());
        assert_eq!(state.error(), Some("Server error: 500 boom"));
        assert_eq!(state.status_message(), ERROR_STATUS);
        assert_eq!(session.phase(), SessionPhase::Errored);

        // Submission waits for an explicit reset, after which "New Task" works.
        assert!(!session.can_submit());
        assert_eq!(session.start("again").unwrap_err(), SessionError::ResetRequired);
        session.reset().unwrap();
        assert!(session.can_submit());
        assert!(session.start("again").is_ok());
    }

    #[test]
    fn test_architecture_is_replaced_not_merged() {
        let mut session = session();
        session.start("q").unwrap();
        session.apply(architecture());
        session.apply(StreamEvent::Architecture {
            data: vec!["Cargo.toml".to_string()],
        });
        assert_eq!(session.state().architecture(), ["Cargo.toml"]);
    }

    #[test]
    fn test_appending_logs_keeps_earlier_groups_identical() {
        let mut session = session();
        session.start("q").unwrap();
        session.apply(step_log("Step 1"));
        let first = Arc::clone(&session.state().log_groups()[0]);

        session.apply(step_log("Step 2"));
        let groups = session.state().log_groups();
        assert!(Arc::ptr_eq(&first, &groups[0]));
        assert_eq!(groups[0].title, "Step 1");
        assert_eq!(groups[1].title, "Step 2");
    }

    #[test]
    fn test_cancel_mid_stream() {
        let mut session = session();
        let attempt = session.start("q").unwrap();
        session.apply(architecture());

        assert_eq!(session.cancel(), Update::Cancelled);
        assert!(attempt.cancel.is_cancelled());

        let state = session.state();
        assert!(state.is_completed());
        assert!(!state.is_running());
        assert!(state.is_cancelled());
        assert_eq!(state.status_message(), CANCELLED_STATUS);
        assert_eq!(state.architecture(), ["README.md", "src/"]);
        assert!(state.log_groups().is_empty());

        // Late events change nothing.
        let before = state.clone();
        assert_eq!(session.apply(step_log("late")), Update::Ignored);
        assert_eq!(session.apply(StreamEvent::status("late")), Update::Ignored);
        assert_eq!(session.apply(architecture()), Update::Ignored);
        assert_eq!(session.cancel(), Update::Ignored);
        assert_eq!(session.state(), &before);
    }

    #[test]
    fn test_events_after_completion_are_ignored() {
        let mut session = session();
        session.start("q").unwrap();
        session.apply(StreamEvent::completed("done"));
        assert_eq!(session.apply(StreamEvent::error("late")), Update::Ignored);
        assert_eq!(session.state().error(), None);
        assert_eq!(session.phase(), SessionPhase::Completed);
    }

    #[test]
    fn test_stream_end_without_terminal_event_is_an_error() {
        let mut session = session();
        session.start("q").unwrap();
        session.apply(StreamEvent::status("working"));
        assert_eq!(session.finish_stream(), Update::Errored);
        assert_eq!(session.state().error(), Some(STREAM_ENDED_ERROR));
        assert_eq!(session.phase(), SessionPhase::Errored);

        // After a terminal event the end of the stream is not an error.
        let mut session = self::session();
        session.start("q").unwrap();
        session.apply(StreamEvent::completed("done"));
        assert_eq!(session.finish_stream(), Update::Ignored);
        assert_eq!(session.phase(), SessionPhase::Completed);
    }

    #[test]
    fn test_start_and_reset_guards() {
        let mut session = session();
        assert_eq!(session.start("   ").unwrap_err(), SessionError::EmptyQuery);
        session.start("q").unwrap();
        assert_eq!(session.start("q2").unwrap_err(), SessionError::AlreadyRunning);
        assert_eq!(session.reset(), Err(SessionError::ResetWhileRunning));
    }

    #[test]
    fn test_new_attempt_gets_fresh_flag_and_stops_the_old_one() {
        let mut session = session();
        let first = session.start("one").unwrap();
        session.apply(StreamEvent::completed("done"));

        let second = session.start("two").unwrap();
        assert!(first.cancel.is_cancelled());
        assert!(!second.cancel.is_cancelled());
        assert_eq!(second.id, first.id + 1);
        assert!(!session.state().is_cancelled());
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut session = session();
        session.start("q").unwrap();
        session.apply(architecture());
        session.apply(step_log("Step 1"));
        session.cancel();
        session.reset().unwrap();
        assert_eq!(session.state(), &SessionState::default());
        assert_eq!(session.phase(), SessionPhase::Idle);
    }

    #[test]
    fn test_critical_error_survives_reset_and_blocks_submission() {
        let mut session = AgentSession::new(CredentialGate::check(None));
        assert_eq!(session.display_error(), Some(CredentialGate::MISSING_MESSAGE));
        assert!(!session.can_submit());
        assert!(matches!(
            session.start("q"),
            Err(SessionError::SubmissionDisabled(_))
        ));

        session.reset().unwrap();
        assert_eq!(session.display_error(), Some(CredentialGate::MISSING_MESSAGE));
        assert_eq!(session.state().error(), None);
    }

    #[test]
    fn test_credential_gate_check() {
        assert!(CredentialGate::check(Some("key")).allows_submission());
        assert!(!CredentialGate::check(Some("  ")).allows_submission());
        assert!(!CredentialGate::check(None).allows_submission());
    }

    #[test]
    fn test_cancel_flag_flips_once() {
        let flag = CancelFlag::new();
        let is_cancelled = flag.predicate();
        assert!(!is_cancelled());
        assert!(flag.cancel());
        assert!(!flag.cancel());
        assert!(is_cancelled());
    }

    #[test]
    fn test_completed_and_running_never_both_true() {
        let events = [
            StreamEvent::status("s"),
            StreamEvent::completed("c"),
            StreamEvent::error("e"),
            architecture(),
            step_log("l"),
        ];

        // Every sequence of up to four events, with and without a cancel in between.
        let mut sequences: Vec<Vec<usize>> = vec![vec![]];
        for _ in 0..4 {
            let mut next = Vec::new();
            for seq in &sequences {
                for i in 0..=events.len() {
                    let mut extended = seq.clone();
                    extended.push(i);
                    next.push(extended);
                }
            }
            sequences.extend(next);
        }

        for seq in sequences {
            let mut session = session();
            session.start("q").unwrap();
            for &i in &seq {
                if i == events.len() {
                    session.cancel();
                } else {
                    session.apply(events[i].clone());
                }
                let state = session.state();
                assert!(!(state.is_completed() && state.is_running()), "sequence {:?}", seq);
                if state.error().is_some() {
                    assert!(state.is_completed() && !state.is_running(), "sequence {:?}", seq);
                }
            }
            session.finish_stream();
            assert!(session.phase().is_terminal(), "sequence {:?}", seq);
        }
    }

    #[tokio::test]
    async fn test_run_folds_until_terminal_event() {
        let mut session = session();
        session.start("test query").unwrap();

        let events = stream::iter(vec![
            StreamEvent::status("Agent is thinking..."),
            architecture(),
            step_log("Step 1"),
            StreamEvent::completed("Task completed"),
            step_log("never folded"),
        ]);
        let mut updates = Vec::new();
        let phase = session
            .run(events, future::pending::<()>(), |_, update| updates.push(update))
            .await;

        assert_eq!(phase, SessionPhase::Completed);
        assert_eq!(
            updates,
            vec![
                Update::Status,
                Update::Architecture,
                Update::LogAppended { index: 0 },
                Update::Completed
            ]
        );
        assert_eq!(session.state().log_groups().len(), 1);
    }

    #[tokio::test]
    async fn test_interrupt_cancels_before_pending_events() {
        let mut session = session();
        session.start("q").unwrap();

        let (tx, mut rx) = futures::channel::mpsc::unbounded();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let mut interrupt = stop_rx.map(|_| ());

        tx.unbounded_send(StreamEvent::status("Agent is thinking...")).unwrap();
        tx.unbounded_send(architecture()).unwrap();
        assert_eq!(session.step(&mut rx, &mut interrupt).await, Update::Status);
        assert_eq!(session.step(&mut rx, &mut interrupt).await, Update::Architecture);

        stop_tx.send(()).unwrap();
        tx.unbounded_send(step_log("Step 1")).unwrap();
        assert_eq!(session.step(&mut rx, &mut interrupt).await, Update::Cancelled);

        let state = session.state();
        assert_eq!(state.status_message(), CANCELLED_STATUS);
        assert_eq!(state.architecture(), ["README.md", "src/"]);
        assert!(state.log_groups().is_empty());
        assert!(session.cancel_flag().is_cancelled());
    }

    #[tokio::test]
    async fn test_run_reports_truncated_stream() {
        let mut session = session();
        session.start("q").unwrap();
        let phase = session
            .run(
                stream::iter(vec![StreamEvent::status("Agent is thinking...")]),
                future::pending::<()>(),
                |_, _| {},
            )
            .await;
        assert_eq!(phase, SessionPhase::Errored);
        assert_eq!(session.state().error(), Some(STREAM_ENDED_ERROR));
    }
}
