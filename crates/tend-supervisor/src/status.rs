//! Read-only status aggregation.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::liveness::{LivenessProber, ProbeError, RunState};
use crate::process::ProcessControl;
use crate::topology::{InstanceDescriptor, InstanceId};

const CONSOLE_PROBE_TIMEOUT: Duration = Duration::from_millis(200);

/// Advisory state of an instance's console socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleState {
    /// No socket file exists.
    Absent,
    /// A connection was accepted.
    Listening,
    /// The socket file exists but nothing accepted a connection.
    Unreachable,
}

impl fmt::Display for ConsoleState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Absent => "absent",
            Self::Listening => "listening",
            Self::Unreachable => "unreachable",
        })
    }
}

/// Status of one instance.
#[derive(Debug)]
pub struct StatusEntry {
    /// Instance probed.
    pub id: InstanceId,
    /// Observed state, or why it could not be determined.
    pub state: Result<RunState, ProbeError>,
    /// Console socket reachability; never affects `state`.
    pub console: ConsoleState,
}

/// Probes every target in order without modifying anything.
pub fn collect_status<P: ProcessControl>(
    processes: &P,
    targets: &[InstanceDescriptor],
) -> Vec<StatusEntry> {
    let prober = LivenessProber::new(processes);
    targets
        .iter()
        .map(|descriptor| StatusEntry {
            id: descriptor.id.clone(),
            state: prober.probe(descriptor),
            console: probe_console(&descriptor.console_socket_path),
        })
        .collect()
}

/// Checks whether something accepts connections on the console socket.
#[must_use]
pub fn probe_console(path: &Path) -> ConsoleState {
    if !path.exists() {
        return ConsoleState::Absent;
    }
    if connect_unix(path) {
        ConsoleState::Listening
    } else {
        ConsoleState::Unreachable
    }
}

#[cfg(unix)]
fn connect_unix(path: &Path) -> bool {
    use socket2::{Domain, SockAddr, Socket, Type};

    let Ok(address) = SockAddr::unix(path) else {
        return false;
    };
    let Ok(socket) = Socket::new(Domain::UNIX, Type::STREAM, None) else {
        return false;
    };
    socket.connect_timeout(&address, CONSOLE_PROBE_TIMEOUT).is_ok()
}

#[cfg(not(unix))]
fn connect_unix(_path: &Path) -> bool {
    let _ = CONSOLE_PROBE_TIMEOUT;
    false
}
