//! Supervisor watchdog implementations.
//!
//! - [`SystemdWatchdog`]: `sd_notify` datagrams to `$NOTIFY_SOCKET`
//! - [`HeartbeatFile`]: JSON liveness report rewritten atomically, for
//!   container probes and local monitors

use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use ems_common::watchdog::{LivenessReport, Watchdog, WatchdogError};

// ─── systemd ────────────────────────────────────────────────────────

/// Sends `READY=1`, `WATCHDOG=1` and `STOPPING=1` to the systemd notify
/// socket.
#[derive(Debug)]
pub struct SystemdWatchdog {
    socket: UnixDatagram,
    target: OsString,
}

impl SystemdWatchdog {
    /// Connect to the socket named by `$NOTIFY_SOCKET`.
    pub fn from_env() -> Result<Self, WatchdogError> {
        let target = std::env::var_os("NOTIFY_SOCKET").ok_or_else(|| {
            WatchdogError::NotConfigured("NOTIFY_SOCKET is not set".to_string())
        })?;
        Self::connect(target)
    }

    /// Connect to `target`, a filesystem path or `@abstract` name.
    pub fn connect(target: impl Into<OsString>) -> Result<Self, WatchdogError> {
        let target = target.into();
        let socket = UnixDatagram::unbound()?;
        let bytes = target.as_encoded_bytes();
        match bytes.split_first() {
            Some((b'@', name)) => connect_abstract(&socket, name)?,
            Some(_) => socket.connect(Path::new(&target))?,
            None => {
                return Err(WatchdogError::NotConfigured(
                    "NOTIFY_SOCKET is empty".to_string(),
                ));
            }
        }
        debug!(socket = ?target, "systemd notify socket connected");
        Ok(Self { socket, target })
    }

    fn send(&self, state: &str) -> Result<(), WatchdogError> {
        self.socket.send(state.as_bytes())?;
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn connect_abstract(socket: &UnixDatagram, name: &[u8]) -> Result<(), WatchdogError> {
    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net::SocketAddr;

    let addr = SocketAddr::from_abstract_name(name)?;
    socket.connect_addr(&addr)?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn connect_abstract(_socket: &UnixDatagram, _name: &[u8]) -> Result<(), WatchdogError> {
    Err(WatchdogError::NotConfigured(
        "abstract notify sockets require Linux".to_string(),
    ))
}

impl Watchdog for SystemdWatchdog {
    fn name(&self) -> &'static str {
        "systemd"
    }

    fn notify_ready(&mut self) -> Result<(), WatchdogError> {
        info!(socket = ?self.target, "notifying systemd: ready");
        self.send("READY=1")
    }

    fn notify_alive(&mut self, _report: &LivenessReport) -> Result<(), WatchdogError> {
        self.send("WATCHDOG=1")
    }

    fn notify_stopping(&mut self) -> Result<(), WatchdogError> {
        self.send("STOPPING=1")
    }
}

// ─── heartbeat file ─────────────────────────────────────────────────

/// Rewrites a JSON [`LivenessReport`] every `every` ticks.
#[derive(Debug)]
pub struct HeartbeatFile {
    path: PathBuf,
    every: u64,
    ticks: u64,
}

impl HeartbeatFile {
    pub fn new(path: impl Into<PathBuf>, every: u64) -> Self {
        Self {
            path: path.into(),
            every: every.max(1),
            ticks: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, report: &LivenessReport) -> Result<(), WatchdogError> {
        let json = serde_json::to_vec_pretty(report)
            .map_err(|e| WatchdogError::Encode(e.to_string()))?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Watchdog for HeartbeatFile {
    fn name(&self) -> &'static str {
        "heartbeat_file"
    }

    fn notify_ready(&mut self) -> Result<(), WatchdogError> {
        self.write(&LivenessReport::default())
    }

    fn notify_alive(&mut self, report: &LivenessReport) -> Result<(), WatchdogError> {
        self.ticks += 1;
        if self.ticks % self.every != 0 {
            return Ok(());
        }
        self.write(report)
    }

    fn notify_stopping(&mut self) -> Result<(), WatchdogError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
