//! Non-cooperative termination of the trading process.

use anyhow::{bail, Result};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminateOutcome {
    Killed,
    /// No such process; it already exited.
    AlreadyGone,
    /// The pid now belongs to a different process. Nothing was signalled.
    PidReused,
}

pub trait ProcessTerminator: Send + Sync {
    /// `start_ticks` is the kernel start time recorded with the heartbeat.
    /// When present, only the process instance with that start time may be
    /// signalled.
    fn terminate(&self, pid: u32, start_ticks: Option<i64>) -> Result<TerminateOutcome>;
}

/// SIGKILL. The target gets no chance to run cleanup or finish an order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SigkillTerminator;

impl ProcessTerminator for SigkillTerminator {
    fn terminate(&self, pid: u32, start_ticks: Option<i64>) -> Result<TerminateOutcome> {
        if pid <= 1 || pid == std::process::id() {
            bail!("refusing to kill pid {pid}");
        }
        if let Some(expected) = start_ticks {
            match tg_db::process_start_ticks(pid) {
                None => return Ok(TerminateOutcome::AlreadyGone),
                Some(current) if current != expected => {
                    tracing::warn!(pid, expected, current, "pid reused; not signalling");
                    return Ok(TerminateOutcome::PidReused);
                }
                Some(_) => {}
            }
        }
        sigkill(pid)
    }
}

#[cfg(unix)]
fn sigkill(pid: u32) -> Result<TerminateOutcome> {
    use anyhow::Context;
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).with_context(|| format!("pid out of range: {pid}"))?;
    match kill(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => Ok(TerminateOutcome::Killed),
        Err(Errno::ESRCH) => Ok(TerminateOutcome::AlreadyGone),
        Err(e) => Err(anyhow::anyhow!(e).context(format!("SIGKILL pid {pid} failed"))),
    }
}

#[cfg(not(unix))]
fn sigkill(pid: u32) -> Result<TerminateOutcome> {
    bail!("SIGKILL unsupported on this platform (pid {pid})")
}
