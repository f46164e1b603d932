//! Async helpers for the fprintd D-Bus interface, trimmed to the
//! verification surface: device discovery, claiming, and the VerifyStatus
//! signal stream.

use std::fmt;

use futures_util::StreamExt;
use serde::{de::DeserializeOwned, Serialize};
use zbus::{Connection, Proxy};
use zvariant::{OwnedObjectPath, Type};

/// D-Bus service name for fprintd.
pub const SERVICE: &str = "net.reactivated.Fprint";

/// Manager object path.
pub const MANAGER_PATH: &str = "/net/reactivated/Fprint/Manager";

/// Manager interface name.
pub const IFACE_MANAGER: &str = "net.reactivated.Fprint.Manager";

/// Device interface name.
pub const IFACE_DEVICE: &str = "net.reactivated.Fprint.Device";

/// Finger names fprintd accepts as verification keys.
pub const FINGERS: &[&str] = &[
    "left-thumb",
    "left-index-finger",
    "left-middle-finger",
    "left-ring-finger",
    "left-little-finger",
    "right-thumb",
    "right-index-finger",
    "right-middle-finger",
    "right-ring-finger",
    "right-little-finger",
];

/// Status reported by the `VerifyStatus` signal.
///
/// `done == true` on the signal means the capture round ended and the
/// device needs `VerifyStop` (and a new `VerifyStart` to scan again).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VerifyStatus {
    Match,
    NoMatch,
    RetryScan,
    TooFast,
    SwipeTooShort,
    FingerNotCentered,
    RemoveAndRetry,
    Disconnected,
    UnknownError,
    Other(String),
}

impl VerifyStatus {
    /// Parse the status string carried by the signal body.
    pub fn parse(result: &str) -> Self {
        match result {
            "verify-match" => Self::Match,
            "verify-no-match" => Self::NoMatch,
            "verify-retry-scan" => Self::RetryScan,
            "verify-too-fast" => Self::TooFast,
            "verify-swipe-too-short" => Self::SwipeTooShort,
            "verify-finger-not-centered" => Self::FingerNotCentered,
            "verify-remove-and-retry" => Self::RemoveAndRetry,
            "verify-disconnected" => Self::Disconnected,
            "verify-unknown-error" => Self::UnknownError,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One decoded `VerifyStatus` signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyStatusEvent {
    pub status: VerifyStatus,
    pub done: bool,
}

/// Async client with system bus connection.
#[derive(Clone)]
pub struct Client {
    conn: Connection,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Connect to system bus.
    pub async fn system() -> zbus::Result<Self> {
        let conn = Connection::system().await?;
        Ok(Self { conn })
    }

    /// Create Manager helper.
    pub fn manager(&self) -> Manager {
        Manager {
            conn: self.conn.clone(),
        }
    }

    /// Create Device helper for specific path.
    pub fn device(&self, object_path: OwnedObjectPath) -> Device {
        Device {
            conn: self.conn.clone(),
            object_path,
        }
    }
}

/// Manager interface helper.
#[derive(Clone)]
pub struct Manager {
    conn: Connection,
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager").finish_non_exhaustive()
    }
}

impl Manager {
    async fn proxy(&self) -> zbus::Result<Proxy<'_>> {
        Proxy::new(&self.conn, SERVICE, MANAGER_PATH, IFACE_MANAGER).await
    }

    /// Generic method call.
    async fn call<R>(
        &self,
        method: &str,
        args: &(impl Serialize + Type + fmt::Debug),
    ) -> zbus::Result<R>
    where
        R: DeserializeOwned + Type,
    {
        let proxy = self.proxy().await?;

        proxy.call(method, args).await
    }

    /// Get device object paths.
    pub async fn get_devices(&self) -> zbus::Result<Vec<OwnedObjectPath>> {
        let (paths,): (Vec<OwnedObjectPath>,) = self.call("GetDevices", &()).await?;
        Ok(paths)
    }

    /// Get default device path.
    pub async fn get_default_device(&self) -> zbus::Result<OwnedObjectPath> {
        let (path,): (OwnedObjectPath,) = self.call("GetDefaultDevice", &()).await?;
        Ok(path)
    }
}

/// Device interface helper.
#[derive(Clone)]
pub struct Device {
    conn: Connection,
    object_path: OwnedObjectPath,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("object_path", &self.object_path)
            .finish()
    }
}

impl Device {
    async fn proxy(&self) -> zbus::Result<Proxy<'_>> {
        Proxy::new(&self.conn, SERVICE, self.object_path.as_str(), IFACE_DEVICE).await
    }

    /// Get device object path.
    pub fn object_path(&self) -> &str {
        self.object_path.as_str()
    }

    /// Generic method call.
    async fn call<R>(
        &self,
        method: &str,
        args: &(impl Serialize + Type + fmt::Debug),
    ) -> zbus::Result<R>
    where
        R: DeserializeOwned + Type,
    {
        let proxy = self.proxy().await?;

        proxy.call(method, args).await
    }

    /// List enrolled fingers for user ("" for current user).
    pub async fn list_enrolled_fingers(&self, username: &str) -> zbus::Result<Vec<String>> {
        let (fingers,): (Vec<String>,) = self.call("ListEnrolledFingers", &(username,)).await?;
        Ok(fingers)
    }

    /// Start verification for finger.
    pub async fn verify_start(&self, finger: &str) -> zbus::Result<()> {
        let _: () = self.call("VerifyStart", &(finger,)).await?;
        Ok(())
    }

    /// Stop verification.
    pub async fn verify_stop(&self) -> zbus::Result<()> {
        let _: () = self.call("VerifyStop", &()).await?;
        Ok(())
    }

    /// Claim device for user ("" for current user).
    pub async fn claim(&self, username: &str) -> zbus::Result<()> {
        let _: () = self.call("Claim", &(username,)).await?;
        Ok(())
    }

    /// Release device.
    pub async fn release(&self) -> zbus::Result<()> {
        let _: () = self.call("Release", &()).await?;
        Ok(())
    }

    /// Get device name.
    pub async fn name(&self) -> zbus::Result<String> {
        let proxy = self.proxy().await?;
        proxy.get_property::<String>("name").await
    }

    /// Stream VerifyStatus signals to `handler` until the capture round
    /// ends, then return the terminal status.
    pub async fn watch_verify<F>(&self, mut handler: F) -> zbus::Result<VerifyStatus>
    where
        F: FnMut(VerifyStatusEvent) + Send,
    {
        let proxy = self.proxy().await?;
        let mut stream = proxy.receive_signal("VerifyStatus").await?;

        while let Some(msg) = stream.next().await {
            let (result, done): (String, bool) = msg.body().deserialize()?;
            let status = VerifyStatus::parse(&result);
            handler(VerifyStatusEvent {
                status: status.clone(),
                done,
            });
            if done {
                return Ok(status);
            }
        }

        Err(zbus::Error::Failure(
            "VerifyStatus signal stream ended".to_string(),
        ))
    }
}

/// Find first available device.
pub async fn first_device(client: &Client) -> zbus::Result<Option<Device>> {
    let mgr = client.manager();

    // Try default device first
    if let Ok(path) = mgr.get_default_device().await {
        return Ok(Some(client.device(path)));
    }

    // Fall back to first enumerated device
    match mgr.get_devices().await {
        Ok(paths) => {
            if let Some(path) = paths.first() {
                Ok(Some(client.device(path.clone())))
            } else {
                Ok(None)
            }
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_statuses_parse_to_their_variants() {
        assert_eq!(VerifyStatus::parse("verify-match"), VerifyStatus::Match);
        assert_eq!(VerifyStatus::parse("verify-no-match"), VerifyStatus::NoMatch);
        assert_eq!(
            VerifyStatus::parse("verify-retry-scan"),
            VerifyStatus::RetryScan
        );
        assert_eq!(VerifyStatus::parse("verify-too-fast"), VerifyStatus::TooFast);
        assert_eq!(
            VerifyStatus::parse("verify-swipe-too-short"),
            VerifyStatus::SwipeTooShort
        );
        assert_eq!(
            VerifyStatus::parse("verify-finger-not-centered"),
            VerifyStatus::FingerNotCentered
        );
        assert_eq!(
            VerifyStatus::parse("verify-remove-and-retry"),
            VerifyStatus::RemoveAndRetry
        );
        assert_eq!(
            VerifyStatus::parse("verify-disconnected"),
            VerifyStatus::Disconnected
        );
        assert_eq!(
            VerifyStatus::parse("verify-unknown-error"),
            VerifyStatus::UnknownError
        );
    }

    #[test]
    fn unknown_statuses_are_preserved() {
        assert_eq!(
            VerifyStatus::parse("verify-whatever"),
            VerifyStatus::Other("verify-whatever".to_string())
        );
    }

    #[test]
    fn finger_table_covers_both_hands() {
        assert_eq!(FINGERS.len(), 10);
        assert!(FINGERS.contains(&"right-index-finger"));
        assert!(FINGERS.iter().all(|f| f.starts_with("left-") || f.starts_with("right-")));
    }
}
