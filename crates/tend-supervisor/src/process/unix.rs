//! Unix implementation of signalling and identity queries.

use std::io;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal as NixSignal};
use nix::sys::wait::{WaitPidFlag, waitpid};
use nix::unistd::{Pid as NixPid, getpgid};
use tracing::debug;

use super::{Pid, ProcessIdentity, ProcessQueryError, Signal, SignalError};
use crate::PROCESS_TARGET;

pub(super) fn send_signal(pid: Pid, signal: Signal) -> Result<(), SignalError> {
    let target = raw_pid(pid).map_err(|reason| SignalError::InvalidPid { pid, reason })?;
    let native = match signal {
        Signal::Terminate => NixSignal::SIGTERM,
        Signal::Kill => NixSignal::SIGKILL,
    };
    let leads_group = getpgid(Some(target)).is_ok_and(|group| group == target);
    let result = if leads_group {
        signal::killpg(target, native)
    } else {
        signal::kill(target, native)
    };
    match result {
        Ok(()) => {
            debug!(
                target: PROCESS_TARGET,
                pid,
                %signal,
                group = leads_group,
                "signal delivered"
            );
            Ok(())
        }
        Err(Errno::ESRCH) => Err(SignalError::NoSuchProcess { pid }),
        Err(errno) => Err(SignalError::Delivery {
            pid,
            signal,
            source: io::Error::from(errno),
        }),
    }
}

pub(super) fn identity(pid: Pid) -> Result<Option<ProcessIdentity>, ProcessQueryError> {
    let Ok(target) = raw_pid(pid) else {
        return Ok(None);
    };
    reap(target);
    match signal::kill(target, None) {
        Ok(()) | Err(Errno::EPERM) => {}
        Err(Errno::ESRCH) => return Ok(None),
        Err(errno) => {
            return Err(ProcessQueryError {
                pid,
                source: io::Error::from(errno),
            });
        }
    }
    Ok(live_identity(pid))
}

#[cfg(target_os = "linux")]
fn live_identity(pid: Pid) -> Option<ProcessIdentity> {
    // The process may vanish between the liveness check and this read, in
    // which case it is simply gone.
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let parsed = parse_stat(&stat)?;
    if parsed.state == 'Z' {
        return None;
    }
    Some(ProcessIdentity {
        start_token: Some(parsed.start_ticks),
    })
}

#[cfg(not(target_os = "linux"))]
fn live_identity(_pid: Pid) -> Option<ProcessIdentity> {
    Some(ProcessIdentity { start_token: None })
}

/// Collects the exit status of `pid` if it is one of our exited children, so
/// a finished instance does not linger as a zombie that still answers
/// `kill(pid, 0)`.
fn reap(target: NixPid) {
    match waitpid(target, Some(WaitPidFlag::WNOHANG)) {
        Ok(_) | Err(Errno::ECHILD) => {}
        Err(errno) => {
            debug!(target: PROCESS_TARGET, pid = target.as_raw(), %errno, "waitpid failed");
        }
    }
}

fn raw_pid(pid: Pid) -> Result<NixPid, &'static str> {
    if pid == 0 {
        return Err("pid 0 addresses the caller's process group");
    }
    i32::try_from(pid)
        .map(NixPid::from_raw)
        .map_err(|_| "pid exceeds the platform range")
}

#[derive(Debug, PartialEq, Eq)]
struct ProcStat {
    state: char,
    start_ticks: u64,
}

/// Parses the state and start time out of `/proc/<pid>/stat`.
///
/// The command name is parenthesised and may itself contain spaces or
/// parentheses, so fields are counted from the last `)`.
fn parse_stat(stat: &str) -> Option<ProcStat> {
    let (_, rest) = stat.rsplit_once(')')?;
    let mut fields = rest.split_whitespace();
    let state = fields.next()?.chars().next()?;
    // starttime is field 22 overall; state is field 3.
    let start_ticks = fields.nth(18)?.parse().ok()?;
    Some(ProcStat { state, start_ticks })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::process::Command;

    use rstest::rstest;

    const SAMPLE: &str = "4242 (my (odd) proc) S 1 4242 4242 0 -1 4194560 120 0 0 0 \
                          3 1 0 0 20 0 1 0 987654 12345678 300 18446744073709551615";

    #[rstest]
    fn parses_state_and_start_time_after_last_paren() {
        let parsed = parse_stat(SAMPLE).expect("sample should parse");
        assert_eq!(
            parsed,
            ProcStat {
                state: 'S',
                start_ticks: 987_654,
            }
        );
    }

    #[rstest]
    #[case::empty("")]
    #[case::truncated("12 (sh) R 1 2 3")]
    fn rejects_malformed_stat(#[case] stat: &str) {
        assert!(parse_stat(stat).is_none());
    }

    #[rstest]
    fn pid_zero_is_never_signalled() {
        let result = send_signal(0, Signal::Terminate);
        let Err(SignalError::InvalidPid { pid, .. }) = result else {
            panic!("expected InvalidPid, got {result:?}");
        };
        assert_eq!(pid, 0);
    }

    #[rstest]
    fn own_process_has_an_identity() {
        let identity = identity(std::process::id()).expect("identity query should succeed");
        assert!(identity.is_some(), "the test process should be alive");
    }

    #[rstest]
    fn reaped_child_has_no_identity() {
        let mut child = Command::new("true").spawn().expect("spawn true");
        let pid = child.id();
        child.wait().expect("wait for true");
        let identity = identity(pid).expect("identity query should succeed");
        assert!(identity.is_none(), "finished child should be absent");
    }

    #[rstest]
    fn exited_child_is_reaped_and_reported_absent() {
        let child = Command::new("true").spawn().expect("spawn true");
        let pid = child.id();
        std::thread::sleep(std::time::Duration::from_millis(200));
        let identity = identity(pid).expect("identity query should succeed");
        assert!(identity.is_none(), "zombie child should be reported absent");
    }
}
