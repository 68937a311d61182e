//! Human-readable rendering of operation reports and status.
//!
//! Progress and results go to stdout; failures and warnings go to stderr and
//! always name the instance and the phase in which they happened.

use std::io::{self, Write};

use tend_supervisor::{
    ConsoleState, InstanceId, InstanceReport, OperationReport, Outcome, ReadinessReport,
    RunState, StartOutcome, StatusEntry, StopOutcome,
};

/// Writes one report to the given streams.
pub(crate) fn render_report<W: Write, E: Write>(
    report: &OperationReport,
    stdout: &mut W,
    stderr: &mut E,
) -> io::Result<()> {
    if report.cancelled {
        writeln!(stdout, "Restart is cancelled.")?;
        return Ok(());
    }
    for instance in &report.instances {
        render_instance(report, instance, stdout, stderr)?;
    }
    Ok(())
}

fn render_instance<W: Write, E: Write>(
    report: &OperationReport,
    instance: &InstanceReport,
    stdout: &mut W,
    stderr: &mut E,
) -> io::Result<()> {
    let id = &instance.id;
    match &instance.outcome {
        Outcome::Started {
            pid,
            readiness,
            recovered_stale,
            ..
        } => started(id, *pid, readiness, *recovered_stale, stdout, stderr),
        Outcome::AlreadyRunning { pid } => {
            writeln!(stdout, "The instance {id} (PID = {pid}) is already running.")
        }
        Outcome::Stopped { pid, forced } => stopped(id, *pid, *forced, stdout),
        Outcome::NotRunning { stale_cleared } => not_running(id, *stale_cleared, stdout),
        Outcome::Restarted { stop, start } => {
            match *stop {
                StopOutcome::Stopped { pid, forced } => stopped(id, pid, forced, stdout)?,
                StopOutcome::NotRunning { stale_cleared } => {
                    not_running(id, stale_cleared, stdout)?;
                }
            }
            match start {
                StartOutcome::Started {
                    record,
                    readiness,
                    recovered_stale,
                } => started(id, record.pid, readiness, *recovered_stale, stdout, stderr),
                StartOutcome::AlreadyRunning { pid } => {
                    writeln!(stdout, "The instance {id} (PID = {pid}) is already running.")
                }
            }
        }
        Outcome::Failed { phase, error } => writeln!(
            stderr,
            "Failed to {} {id} during {phase}: {error}",
            report.operation
        ),
        Outcome::NotAttempted { state } => {
            let state = state.as_ref().map_or("UNKNOWN", RunState::label);
            writeln!(
                stderr,
                "Skipped {id}: the {} halted after a failure; left {state}.",
                report.operation
            )
        }
        Outcome::Cancelled => Ok(()),
    }
}

fn started<W: Write, E: Write>(
    id: &InstanceId,
    pid: u32,
    readiness: &ReadinessReport,
    recovered_stale: bool,
    stdout: &mut W,
    stderr: &mut E,
) -> io::Result<()> {
    if recovered_stale {
        writeln!(stdout, "Removed a stale PID record of {id}.")?;
    }
    writeln!(stdout, "Starting an instance [{id}]...")?;
    match readiness {
        ReadinessReport::NotRequired | ReadinessReport::Confirmed => {
            writeln!(stdout, "The instance {id} (PID = {pid}) is running.")
        }
        ReadinessReport::Unconfirmed { attempts } => writeln!(
            stderr,
            "Warning: {id} (PID = {pid}) is running but readiness was not confirmed after {attempts} checks."
        ),
    }
}

fn stopped<W: Write>(id: &InstanceId, pid: u32, forced: bool, stdout: &mut W) -> io::Result<()> {
    if forced {
        writeln!(stdout, "The instance {id} (PID = {pid}) has been killed.")
    } else {
        writeln!(stdout, "The instance {id} (PID = {pid}) has been terminated.")
    }
}

fn not_running<W: Write>(id: &InstanceId, stale_cleared: bool, stdout: &mut W) -> io::Result<()> {
    if stale_cleared {
        writeln!(
            stdout,
            "The instance {id} is not running; removed its stale PID record."
        )
    } else {
        writeln!(stdout, "The instance {id} is not running.")
    }
}

/// Writes one line per status entry.
pub(crate) fn render_status<W: Write>(entries: &[StatusEntry], stdout: &mut W) -> io::Result<()> {
    for entry in entries {
        let id = &entry.id;
        match &entry.state {
            Ok(RunState::Running(record)) => {
                write!(stdout, "{id}: RUNNING. PID: {}.", record.pid)?;
            }
            Ok(RunState::Stopped) => write!(stdout, "{id}: NOT RUNNING.")?,
            Ok(RunState::Stale {
                pid: Some(pid),
                reason,
            }) => write!(stdout, "{id}: STALE. PID: {pid} ({reason}).")?,
            Ok(RunState::Stale { pid: None, reason }) => write!(stdout, "{id}: STALE ({reason}).")?,
            Err(error) => write!(stdout, "{id}: UNKNOWN ({error}).")?,
        }
        if entry.console != ConsoleState::Absent {
            write!(stdout, " Console: {}.", entry.console)?;
        }
        writeln!(stdout)?;
    }
    Ok(())
}

/// Whether every status entry could be determined.
pub(crate) fn status_is_complete(entries: &[StatusEntry]) -> bool {
    entries.iter().all(|entry| entry.state.is_ok())
}
