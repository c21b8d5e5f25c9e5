//! Real-time process setup for the scan-cycle thread.
//!
//! With the `rt` feature the engine thread locks its memory, is pinned to
//! one core and scheduled SCHED_FIFO. Without the feature every step is a
//! no-op so the runtime works unprivileged (development, simulation, CI).

use tracing::{debug, info};

use crate::error::CycleError;

/// Scheduling parameters of the engine thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RtParams {
    /// Core to pin to; `None` leaves affinity untouched.
    pub cpu_core: Option<usize>,
    /// SCHED_FIFO priority; `None` keeps the default scheduler.
    pub priority: Option<i32>,
    pub lock_memory: bool,
}

#[cfg(feature = "rt")]
fn lock_memory() -> Result<(), CycleError> {
    use nix::sys::mman::{MlockallFlags, mlockall};
    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| CycleError::RtSetup(format!("mlockall failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn lock_memory() -> Result<(), CycleError> {
    Ok(())
}

#[cfg(feature = "rt")]
fn pin_to_core(cpu: usize) -> Result<(), CycleError> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut set = CpuSet::new();
    set.set(cpu)
        .map_err(|e| CycleError::RtSetup(format!("invalid cpu core {cpu}: {e}")))?;
    sched_setaffinity(Pid::from_raw(0), &set)
        .map_err(|e| CycleError::RtSetup(format!("sched_setaffinity failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn pin_to_core(_cpu: usize) -> Result<(), CycleError> {
    Ok(())
}

#[cfg(feature = "rt")]
fn set_fifo(priority: i32) -> Result<(), CycleError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: `param` is a valid sched_param for the calling thread (pid 0).
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(CycleError::RtSetup(format!(
            "SCHED_FIFO priority {priority} rejected: {err}"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn set_fifo(_priority: i32) -> Result<(), CycleError> {
    Ok(())
}

/// Apply `params` to the calling thread. Call before the first tick.
pub fn rt_setup(params: &RtParams) -> Result<(), CycleError> {
    if !cfg!(feature = "rt") {
        debug!("built without rt feature, skipping RT setup");
    }
    if params.lock_memory {
        lock_memory()?;
    }
    if let Some(cpu) = params.cpu_core {
        pin_to_core(cpu)?;
    }
    if let Some(priority) = params.priority {
        set_fifo(priority)?;
    }
    if cfg!(feature = "rt") {
        info!(
            cpu_core = ?params.cpu_core,
            priority = ?params.priority,
            lock_memory = params.lock_memory,
            "RT setup complete"
        );
    }
    Ok(())
}
