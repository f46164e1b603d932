//! fprintd-backed fingerprint sensor session.
//!
//! Bridges the async fprintd client to the GTK main loop: all device I/O
//! runs on the shared tokio runtime and crosses back over an mpsc channel
//! as [`SensorEvent`]s, which the verification page drains on the main
//! loop.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{error, info, warn};
use once_cell::sync::Lazy;
use tokio::runtime::Runtime;

use crate::core::fprintd::{self, VerifyStatus};

/// Classified sensor errors, ordered by their numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// The scanned finger did not match. Transient.
    NotRecognized,
    /// The sensor needs the user to adjust. Transient, carries a hint.
    Help,
    /// No fingerprints are enrolled for this user.
    RegistrationNeeded,
    /// No usable sensor (no daemon or no device).
    NotSupported,
    /// The device refused access.
    PermissionDenied,
    /// Anything the flow cannot recover from.
    Unrecoverable,
}

impl SensorError {
    /// Stable numeric code surfaced to the caller on fatal failures.
    pub fn code(self) -> i32 {
        match self {
            SensorError::NotRecognized => 1,
            SensorError::Help => 2,
            SensorError::RegistrationNeeded => 3,
            SensorError::NotSupported => 4,
            SensorError::PermissionDenied => 5,
            SensorError::Unrecoverable => 6,
        }
    }

    /// Transient errors keep the flow alive; fatal ones end it.
    pub fn is_fatal(self) -> bool {
        !matches!(self, SensorError::NotRecognized | SensorError::Help)
    }
}

/// Events delivered by the sensor session to the verification page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorEvent {
    /// The device is claimed and capture can start.
    Ready,
    /// Capture is running; `key_valid` reports whether the requested key
    /// is enrolled on the device.
    Scanning { key_valid: bool },
    /// The finger matched.
    Succeeded,
    /// A sensor error, transient or fatal.
    Error {
        kind: SensorError,
        detail: Option<String>,
    },
}

/// Hints shown for retry-class verify statuses.
static RETRY_HINTS: Lazy<HashMap<VerifyStatus, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (
            VerifyStatus::RetryScan,
            "Could not read the finger. Try again",
        ),
        (
            VerifyStatus::TooFast,
            "Finger moved too fast. Try again, slower",
        ),
        (VerifyStatus::SwipeTooShort, "Swipe was too short. Try again"),
        (
            VerifyStatus::FingerNotCentered,
            "Center your finger on the sensor",
        ),
        (
            VerifyStatus::RemoveAndRetry,
            "Remove your finger and try again",
        ),
    ])
});

/// Translate one verify status into a sensor event, if it produces one.
fn status_event(status: &VerifyStatus, done: bool) -> Option<SensorEvent> {
    match status {
        VerifyStatus::Match => Some(SensorEvent::Succeeded),
        VerifyStatus::NoMatch => Some(SensorEvent::Error {
            kind: SensorError::NotRecognized,
            detail: None,
        }),
        VerifyStatus::Disconnected => Some(SensorEvent::Error {
            kind: SensorError::Unrecoverable,
            detail: Some("fingerprint device disconnected".to_string()),
        }),
        VerifyStatus::UnknownError => Some(SensorEvent::Error {
            kind: SensorError::Unrecoverable,
            detail: Some("sensor reported an unknown error".to_string()),
        }),
        VerifyStatus::Other(other) => {
            warn!("Unhandled verify status '{}' (done={})", other, done);
            done.then(|| SensorEvent::Error {
                kind: SensorError::Unrecoverable,
                detail: Some(format!("verification ended with status '{}'", other)),
            })
        }
        retry => RETRY_HINTS.get(retry).map(|hint| SensorEvent::Error {
            kind: SensorError::Help,
            detail: Some((*hint).to_string()),
        }),
    }
}

/// Claimed device plus the keys enrolled on it.
struct Claimed {
    device: fprintd::Device,
    enrolled: Vec<String>,
}

/// Guard carried by every async task of one registration cycle. Events
/// from a cycle that has been torn down are discarded.
#[derive(Clone)]
struct EventGate {
    tx: Sender<SensorEvent>,
    generation: Arc<AtomicU64>,
    gen: u64,
}

impl EventGate {
    fn live(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.gen
    }

    /// Deliver an event unless the session was torn down meanwhile.
    fn send(&self, event: SensorEvent) {
        if self.live() {
            let _ = self.tx.send(event);
        }
    }

    fn error(&self, kind: SensorError, detail: impl Into<String>) {
        self.send(SensorEvent::Error {
            kind,
            detail: Some(detail.into()),
        });
    }

    /// Resolves once the cycle this gate belongs to is torn down.
    async fn closed(&self) {
        while self.live() {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}

/// One sensor session, spanning the focus cycles of the verification page.
///
/// `register`/`unregister` follow page visibility; both are idempotent
/// within a cycle. Events cross threads through the channel handed to
/// [`SensorSession::new`].
pub struct SensorSession {
    rt: Arc<Runtime>,
    key: String,
    tx: Sender<SensorEvent>,
    generation: Arc<AtomicU64>,
    registered: Cell<bool>,
    claimed: Arc<Mutex<Option<Claimed>>>,
}

impl SensorSession {
    pub fn new(rt: Arc<Runtime>, key: String, tx: Sender<SensorEvent>) -> Self {
        Self {
            rt,
            key,
            tx,
            generation: Arc::new(AtomicU64::new(0)),
            registered: Cell::new(false),
            claimed: Arc::new(Mutex::new(None)),
        }
    }

    /// Register the session: connect to fprintd, claim a device, and
    /// report readiness. No-op when already registered.
    pub fn register(&self) {
        if self.registered.get() {
            info!("Sensor session already registered");
            return;
        }
        self.registered.set(true);
        let gen = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let gate = EventGate {
            tx: self.tx.clone(),
            generation: self.generation.clone(),
            gen,
        };
        let claimed = self.claimed.clone();

        info!("Registering sensor session for key '{}'", self.key);
        self.rt.spawn(async move {
            let session = match setup_session(&gate).await {
                Some(session) => session,
                None => return,
            };

            let mut slot = lock(&claimed);
            if gate.live() {
                *slot = Some(session);
                drop(slot);
                gate.send(SensorEvent::Ready);
            } else {
                // Unregistered while setting up; hand the device back.
                drop(slot);
                let _ = session.device.release().await;
            }
        });
    }

    /// Begin capturing. Emits `Scanning` with key validity; on a valid key
    /// the capture loop runs until a terminal status or teardown.
    pub fn start(&self) {
        if !self.registered.get() {
            warn!("start() called without a registered session");
            return;
        }
        let (device, key_valid) = {
            let slot = lock(&self.claimed);
            match slot.as_ref() {
                Some(session) => (
                    session.device.clone(),
                    session.enrolled.iter().any(|f| f == &self.key),
                ),
                None => {
                    warn!("start() called before the sensor was ready");
                    return;
                }
            }
        };

        let gate = EventGate {
            tx: self.tx.clone(),
            generation: self.generation.clone(),
            gen: self.generation.load(Ordering::SeqCst),
        };

        gate.send(SensorEvent::Scanning { key_valid });
        if !key_valid {
            warn!("Key '{}' is not enrolled on this device", self.key);
            return;
        }

        let key = self.key.clone();
        self.rt.spawn(async move {
            if let Err(e) = run_capture(&device, &key, &gate).await {
                error!("Verification capture failed: {}", e);
                gate.error(SensorError::Unrecoverable, e.to_string());
            }
        });
    }

    /// Tear the session down and release the device. Safe to call when not
    /// registered; outstanding events from this cycle are discarded.
    pub fn unregister(&self) {
        if !self.registered.get() {
            return;
        }
        self.registered.set(false);
        self.generation.fetch_add(1, Ordering::SeqCst);

        let released = lock(&self.claimed).take();
        if let Some(session) = released {
            info!("Unregistering sensor session - releasing device");
            self.rt.spawn(async move {
                let _ = session.device.verify_stop().await;
                if let Err(e) = session.device.release().await {
                    warn!("Failed to release fingerprint device: {}", e);
                } else {
                    info!("Fingerprint device released");
                }
            });
        }
    }
}

fn lock(claimed: &Mutex<Option<Claimed>>) -> MutexGuard<'_, Option<Claimed>> {
    claimed.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Connect, claim a device, and read the enrolled keys. Emits the fatal
/// event itself when a step fails.
async fn setup_session(gate: &EventGate) -> Option<Claimed> {
    info!("Connecting to fprintd system bus");
    let client = match fprintd::Client::system().await {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to connect to fprintd system bus: {}", e);
            gate.error(
                SensorError::NotSupported,
                format!("fingerprint service unavailable: {}", e),
            );
            return None;
        }
    };

    let device = match fprintd::first_device(&client).await {
        Ok(Some(device)) => device,
        Ok(None) => {
            warn!("No fingerprint devices available");
            gate.error(SensorError::NotSupported, "no fingerprint devices available");
            return None;
        }
        Err(e) => {
            error!("Failed to enumerate fingerprint devices: {}", e);
            gate.error(
                SensorError::NotSupported,
                format!("device enumeration failed: {}", e),
            );
            return None;
        }
    };

    if let Ok(name) = device.name().await {
        info!(
            "Using fingerprint device '{}' at {}",
            name,
            device.object_path()
        );
    }

    let username = std::env::var("USER").unwrap_or_default();
    info!("Claiming fingerprint device for user '{}'", username);
    if let Err(e) = device.claim(&username).await {
        error!("Failed to claim fingerprint device: {}", e);
        gate.error(claim_error_kind(&e), e.to_string());
        return None;
    }

    let enrolled = match device.list_enrolled_fingers(&username).await {
        Ok(list) => list,
        Err(e) if error_name(&e).is_some_and(|n| n.ends_with("NoEnrolledPrints")) => Vec::new(),
        Err(e) => {
            error!("Failed to list enrolled fingerprints: {}", e);
            let _ = device.release().await;
            gate.error(SensorError::Unrecoverable, e.to_string());
            return None;
        }
    };

    if enrolled.is_empty() {
        warn!("No fingerprints enrolled for user '{}'", username);
        let _ = device.release().await;
        gate.error(
            SensorError::RegistrationNeeded,
            "no fingerprints enrolled for this user",
        );
        return None;
    }

    info!("Sensor ready with {} enrolled fingerprint(s)", enrolled.len());
    Some(Claimed { device, enrolled })
}

/// Drive fprintd verification rounds until a terminal status. A failed
/// match ends the round on the daemon side, so the loop restarts capture
/// to keep scanning.
async fn run_capture(
    device: &fprintd::Device,
    key: &str,
    gate: &EventGate,
) -> zbus::Result<()> {
    loop {
        device.verify_start(key).await?;
        info!("Verification capture started for key '{}'", key);

        let cb_gate = gate.clone();
        let end = tokio::select! {
            end = device.watch_verify(move |evt| {
                if let Some(event) = status_event(&evt.status, evt.done) {
                    cb_gate.send(event);
                }
            }) => end?,
            _ = gate.closed() => {
                info!("Sensor session closed - stopping capture");
                let _ = device.verify_stop().await;
                return Ok(());
            }
        };

        let _ = device.verify_stop().await;

        if end == VerifyStatus::NoMatch && gate.live() {
            info!("No match - restarting capture for another attempt");
            continue;
        }
        return Ok(());
    }
}

/// D-Bus error name carried by a method error reply, if any.
fn error_name(e: &zbus::Error) -> Option<&str> {
    match e {
        zbus::Error::MethodError(name, _, _) => Some(name.as_str()),
        _ => None,
    }
}

/// Classify a claim failure: access problems are reported as such, the
/// rest ends the flow as unrecoverable.
fn claim_error_kind(e: &zbus::Error) -> SensorError {
    match error_name(e) {
        Some(name) if name.ends_with("PermissionDenied") || name.ends_with("AccessDenied") => {
            SensorError::PermissionDenied
        }
        _ => SensorError::Unrecoverable,
    }
}
