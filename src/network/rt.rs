//! Realtime scheduling for the receive thread
//!
//! Packets arrive on a cadence coupled to the sender's audio clock; if the
//! receive thread gets preempted it drifts relative to the local audio
//! device thread and the playout buffers pay for it. The receive thread is
//! therefore scheduled at or above the audio thread's priority class.

/// Request realtime priority for the calling thread.
///
/// Best effort: unprivileged processes are often denied `SCHED_FIFO`, and
/// the receive loop still works without it, so refusal is logged and
/// otherwise ignored.
#[cfg(unix)]
pub fn promote_current_thread() {
    let param = libc::sched_param { sched_priority: 99 };
    let result = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if result != 0 {
        tracing::warn!(
            errno = result,
            "failed to acquire realtime priority for the receive thread"
        );
    }
}

#[cfg(not(unix))]
pub fn promote_current_thread() {
    tracing::debug!("realtime thread priority not implemented for this platform");
}
