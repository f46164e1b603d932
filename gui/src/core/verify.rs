//! Verification flow state machine.
//!
//! Pure logic: consumes sensor events, timer firings, and user
//! cancellation, and emits an ordered list of [`Action`]s for the UI layer
//! to execute. All I/O (widgets, timers, fprintd) lives in the callers,
//! which keeps every transition testable.

use std::fmt;
use std::time::Duration;

use log::{error, warn};

use crate::core::sensor::{SensorError, SensorEvent};

/// How long a transient error message stays on screen before reverting to
/// the scan hint.
pub const ERROR_RESET_DELAY: Duration = Duration::from_millis(1600);

/// How long the success state stays on screen before the flow closes.
pub const SUCCESS_CLOSE_DELAY: Duration = Duration::from_millis(1300);

pub const INITIALIZING_TEXT: &str = "Initializing fingerprint sensor...";
pub const SCAN_HINT_TEXT: &str = "Touch the fingerprint sensor";
pub const NOT_RECOGNIZED_TEXT: &str = "Fingerprint not recognized. Try again";
pub const SUCCESS_TEXT: &str = "Fingerprint recognized";

/// Fallback for help events that arrive without a hint.
const HELP_FALLBACK_TEXT: &str = "Adjust your finger and try again";

/// Request to verify one enrolled credential key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyRequest {
    key: String,
}

/// Rejected request: verification cannot be launched without a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidRequest;

impl fmt::Display for InvalidRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "verification requires a non-empty key name")
    }
}

impl std::error::Error for InvalidRequest {}

impl VerifyRequest {
    /// Create a request for `key`. An empty key is a configuration error
    /// in the caller, not something the flow can recover from.
    pub fn new(key: impl Into<String>) -> Result<Self, InvalidRequest> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(InvalidRequest);
        }
        Ok(Self { key })
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Terminal result of a verification flow, reported exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Cancelled,
    Failed(i32),
}

/// What the verification page should render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Display {
    Initializing,
    ScanHint,
    Error(String),
    Success,
}

/// Side effects requested by the machine, executed by the UI in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Show(Display),
    StartSensor,
    CancelErrorReset,
    ScheduleErrorReset(Duration),
    ScheduleClose(Duration),
    Finish(Outcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initializing,
    Scanning,
    Error,
    Success,
    Finished,
}

/// State machine for one verification flow.
///
/// `Initializing -> Scanning <-> Error` with two timed transitions: error
/// display reverts to scanning after [`ERROR_RESET_DELAY`], and a match
/// closes the flow after [`SUCCESS_CLOSE_DELAY`]. Fatal sensor errors end
/// the flow immediately with a coded failure.
pub struct VerifyMachine {
    request: VerifyRequest,
    state: State,
}

impl VerifyMachine {
    /// Start a new flow in the initializing state.
    pub fn new(request: VerifyRequest) -> Self {
        Self {
            request,
            state: State::Initializing,
        }
    }

    pub fn key(&self) -> &str {
        self.request.key()
    }

    /// Whether the flow has reported its outcome.
    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    /// Feed one sensor event.
    pub fn handle(&mut self, event: SensorEvent) -> Vec<Action> {
        if matches!(self.state, State::Success | State::Finished) {
            // A terminal transition is pending or done; late sensor events
            // must not disturb it.
            return Vec::new();
        }
        match event {
            SensorEvent::Ready => vec![Action::StartSensor],
            SensorEvent::Scanning { key_valid: true } => {
                self.state = State::Scanning;
                vec![Action::Show(Display::ScanHint)]
            }
            SensorEvent::Scanning { key_valid: false } => {
                // The requested key is unknown to the sensor. That is a
                // configuration mismatch, not a hardware failure, and it
                // cannot be retried.
                error!(
                    "Key '{}' is not valid for this sensor",
                    self.request.key()
                );
                self.state = State::Finished;
                vec![
                    Action::Show(Display::ScanHint),
                    Action::Finish(Outcome::Failed(SensorError::Unrecoverable.code())),
                ]
            }
            SensorEvent::Succeeded => {
                self.state = State::Success;
                vec![
                    Action::CancelErrorReset,
                    Action::Show(Display::Success),
                    Action::ScheduleClose(SUCCESS_CLOSE_DELAY),
                ]
            }
            SensorEvent::Error { kind, detail } => self.handle_error(kind, detail),
        }
    }

    fn handle_error(&mut self, kind: SensorError, detail: Option<String>) -> Vec<Action> {
        if !kind.is_fatal() {
            let message = match kind {
                SensorError::NotRecognized => NOT_RECOGNIZED_TEXT.to_string(),
                _ => detail.unwrap_or_else(|| HELP_FALLBACK_TEXT.to_string()),
            };
            return self.transient_error(message);
        }

        if let Some(detail) = detail {
            error!("Fatal sensor error ({:?}): {}", kind, detail);
        } else {
            error!("Fatal sensor error ({:?})", kind);
        }
        self.state = State::Finished;
        vec![Action::Finish(Outcome::Failed(kind.code()))]
    }

    fn transient_error(&mut self, message: String) -> Vec<Action> {
        self.state = State::Error;
        vec![
            Action::CancelErrorReset,
            Action::Show(Display::Error(message)),
            Action::ScheduleErrorReset(ERROR_RESET_DELAY),
        ]
    }

    /// The error-reset timer fired.
    pub fn on_error_reset(&mut self) -> Vec<Action> {
        if self.state != State::Error {
            warn!("Stale error-reset timer ignored");
            return Vec::new();
        }
        self.state = State::Scanning;
        vec![Action::Show(Display::ScanHint)]
    }

    /// The success-close timer fired.
    pub fn on_close_delay(&mut self) -> Vec<Action> {
        if self.state != State::Success {
            warn!("Stale close timer ignored");
            return Vec::new();
        }
        self.state = State::Finished;
        vec![Action::Finish(Outcome::Success)]
    }

    /// The user abandoned the flow.
    pub fn cancel(&mut self) -> Vec<Action> {
        if self.state == State::Finished {
            return Vec::new();
        }
        self.state = State::Finished;
        vec![Action::Finish(Outcome::Cancelled)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> VerifyMachine {
        VerifyMachine::new(VerifyRequest::new("right-index-finger").unwrap())
    }

    #[test]
    fn empty_keys_are_rejected() {
        assert_eq!(VerifyRequest::new(""), Err(InvalidRequest));
        assert_eq!(VerifyRequest::new("   "), Err(InvalidRequest));
        assert!(VerifyRequest::new("app_name").is_ok());
    }

    #[test]
    fn new_machine_starts_unfinished_with_its_key() {
        let m = machine();
        assert_eq!(m.key(), "right-index-finger");
        assert!(!m.is_finished());
    }

    #[test]
    fn ready_starts_the_sensor() {
        let mut m = machine();
        assert_eq!(m.handle(SensorEvent::Ready), vec![Action::StartSensor]);
    }

    #[test]
    fn scanning_with_valid_key_shows_the_hint() {
        let mut m = machine();
        m.handle(SensorEvent::Ready);
        assert_eq!(
            m.handle(SensorEvent::Scanning { key_valid: true }),
            vec![Action::Show(Display::ScanHint)]
        );
        assert!(!m.is_finished());
    }

    #[test]
    fn scanning_with_invalid_key_fails_unrecoverably() {
        let mut m = machine();
        let actions = m.handle(SensorEvent::Scanning { key_valid: false });
        assert_eq!(
            actions.last(),
            Some(&Action::Finish(Outcome::Failed(
                SensorError::Unrecoverable.code()
            )))
        );
        assert!(m.is_finished());
    }

    #[test]
    fn not_recognized_shows_then_schedules_reset() {
        let mut m = machine();
        m.handle(SensorEvent::Scanning { key_valid: true });
        let actions = m.handle(SensorEvent::Error {
            kind: SensorError::NotRecognized,
            detail: None,
        });
        assert_eq!(
            actions,
            vec![
                Action::CancelErrorReset,
                Action::Show(Display::Error(NOT_RECOGNIZED_TEXT.to_string())),
                Action::ScheduleErrorReset(ERROR_RESET_DELAY),
            ]
        );
        // the reset reverts to the scan hint, nothing else
        assert_eq!(
            m.on_error_reset(),
            vec![Action::Show(Display::ScanHint)]
        );
        assert!(!m.is_finished());
    }

    #[test]
    fn help_errors_show_their_detail_verbatim() {
        let mut m = machine();
        m.handle(SensorEvent::Scanning { key_valid: true });
        let actions = m.handle(SensorEvent::Error {
            kind: SensorError::Help,
            detail: Some("Remove your finger and try again".to_string()),
        });
        assert!(actions.contains(&Action::Show(Display::Error(
            "Remove your finger and try again".to_string()
        ))));
        assert!(actions.contains(&Action::ScheduleErrorReset(ERROR_RESET_DELAY)));
    }

    #[test]
    fn consecutive_errors_cancel_the_previous_reset() {
        let mut m = machine();
        m.handle(SensorEvent::Scanning { key_valid: true });
        m.handle(SensorEvent::Error {
            kind: SensorError::NotRecognized,
            detail: None,
        });
        let actions = m.handle(SensorEvent::Error {
            kind: SensorError::Help,
            detail: Some("Too fast".to_string()),
        });
        assert_eq!(actions[0], Action::CancelErrorReset);
    }

    #[test]
    fn fatal_errors_finish_with_their_exact_code() {
        let fatals = [
            SensorError::RegistrationNeeded,
            SensorError::NotSupported,
            SensorError::PermissionDenied,
            SensorError::Unrecoverable,
        ];
        for kind in fatals {
            let mut m = machine();
            let actions = m.handle(SensorEvent::Error {
                kind,
                detail: Some("boom".to_string()),
            });
            assert_eq!(actions, vec![Action::Finish(Outcome::Failed(kind.code()))]);
            assert!(m.is_finished());
        }
    }

    #[test]
    fn success_finishes_only_through_the_close_delay() {
        let mut m = machine();
        m.handle(SensorEvent::Scanning { key_valid: true });
        let actions = m.handle(SensorEvent::Succeeded);
        assert_eq!(
            actions,
            vec![
                Action::CancelErrorReset,
                Action::Show(Display::Success),
                Action::ScheduleClose(SUCCESS_CLOSE_DELAY),
            ]
        );
        assert!(!m.is_finished());
        assert_eq!(
            m.on_close_delay(),
            vec![Action::Finish(Outcome::Success)]
        );
        assert!(m.is_finished());
    }

    #[test]
    fn late_events_cannot_disturb_a_pending_success() {
        let mut m = machine();
        m.handle(SensorEvent::Scanning { key_valid: true });
        m.handle(SensorEvent::Succeeded);
        assert_eq!(
            m.handle(SensorEvent::Error {
                kind: SensorError::NotRecognized,
                detail: None,
            }),
            vec![]
        );
        assert_eq!(m.on_error_reset(), vec![]);
        assert_eq!(m.on_close_delay(), vec![Action::Finish(Outcome::Success)]);
    }

    #[test]
    fn stale_timers_are_no_ops() {
        let mut m = machine();
        m.handle(SensorEvent::Scanning { key_valid: true });
        assert_eq!(m.on_error_reset(), vec![]);
        assert_eq!(m.on_close_delay(), vec![]);
    }

    #[test]
    fn cancel_reports_cancelled_exactly_once() {
        let mut m = machine();
        m.handle(SensorEvent::Scanning { key_valid: true });
        assert_eq!(m.cancel(), vec![Action::Finish(Outcome::Cancelled)]);
        assert_eq!(m.cancel(), vec![]);
        assert!(m.is_finished());
    }

    #[test]
    fn full_flow_ready_scan_match_succeeds() {
        let mut m = VerifyMachine::new(VerifyRequest::new("app_name").unwrap());
        assert_eq!(m.handle(SensorEvent::Ready), vec![Action::StartSensor]);
        m.handle(SensorEvent::Scanning { key_valid: true });
        m.handle(SensorEvent::Succeeded);
        assert_eq!(
            m.on_close_delay(),
            vec![Action::Finish(Outcome::Success)]
        );
    }

    #[test]
    fn full_flow_with_retries_before_match() {
        let mut m = machine();
        m.handle(SensorEvent::Ready);
        m.handle(SensorEvent::Scanning { key_valid: true });
        m.handle(SensorEvent::Error {
            kind: SensorError::NotRecognized,
            detail: None,
        });
        m.on_error_reset();
        m.handle(SensorEvent::Error {
            kind: SensorError::Help,
            detail: Some("Center your finger on the sensor".to_string()),
        });
        m.on_error_reset();
        m.handle(SensorEvent::Succeeded);
        assert_eq!(
            m.on_close_delay(),
            vec![Action::Finish(Outcome::Success)]
        );
    }

    #[test]
    fn permission_denied_surfaces_code_five() {
        let mut m = machine();
        let actions = m.handle(SensorEvent::Error {
            kind: SensorError::PermissionDenied,
            detail: None,
        });
        assert_eq!(actions, vec![Action::Finish(Outcome::Failed(5))]);
    }
}
