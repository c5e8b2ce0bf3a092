//! Signal handling: SIGTERM/SIGINT graceful shutdown, SIGHUP config reload,
//! SIGUSR1 run-the-job-now, and the systemd watchdog heartbeat.
//!
//! Uses the `signal-hook` crate for safe signal registration. The daemon loop
//! polls `SignalHandler` flags each tick rather than blocking on signals.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use signal_hook::consts::{SIGINT, SIGTERM};

// ──────────────────── signal handler ────────────────────

/// Signal state shared between the signal hooks, the daemon loop and the
/// cancel token of a running job.
#[derive(Clone)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
    reload_flag: Arc<AtomicBool>,
    run_now_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Create a handler and register OS signal hooks.
    ///
    /// Registration is best-effort; failures are logged to stderr but not fatal.
    #[must_use]
    pub fn new() -> Self {
        let handler = Self::unregistered();
        handler.register_signals();
        handler
    }

    /// Handler whose flags only change through the `request_*` methods.
    #[must_use]
    pub fn unregistered() -> Self {
        Self {
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            reload_flag: Arc::new(AtomicBool::new(false)),
            run_now_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn should_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Check (and clear) whether a config reload has been requested.
    #[must_use]
    pub fn should_reload(&self) -> bool {
        self.reload_flag.swap(false, Ordering::Relaxed)
    }

    /// Check (and clear) whether an immediate job run has been requested.
    #[must_use]
    pub fn should_run_now(&self) -> bool {
        self.run_now_flag.swap(false, Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_reload(&self) {
        self.reload_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_run_now(&self) {
        self.run_now_flag.store(true, Ordering::Relaxed);
    }

    /// The shutdown flag itself, for linking cancel tokens to it.
    #[must_use]
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown_flag)
    }

    fn register_signals(&self) {
        if let Err(e) = signal_hook::flag::register(SIGTERM, Arc::clone(&self.shutdown_flag)) {
            eprintln!("[WSN-SIGNAL] failed to register SIGTERM: {e}");
        }
        if let Err(e) = signal_hook::flag::register(SIGINT, Arc::clone(&self.shutdown_flag)) {
            eprintln!("[WSN-SIGNAL] failed to register SIGINT: {e}");
        }

        #[cfg(unix)]
        {
            use signal_hook::consts::{SIGHUP, SIGUSR1};
            if let Err(e) = signal_hook::flag::register(SIGHUP, Arc::clone(&self.reload_flag)) {
                eprintln!("[WSN-SIGNAL] failed to register SIGHUP: {e}");
            }
            if let Err(e) = signal_hook::flag::register(SIGUSR1, Arc::clone(&self.run_now_flag)) {
                eprintln!("[WSN-SIGNAL] failed to register SIGUSR1: {e}");
            }
        }
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

// ──────────────────── watchdog heartbeat ────────────────────

/// Systemd watchdog heartbeat tracker.
///
/// The daemon loop calls `maybe_notify()` each tick; a heartbeat goes out at
/// half the watchdog timeout.
pub struct WatchdogHeartbeat {
    interval: Duration,
    last_beat: Instant,
    enabled: bool,
}

impl WatchdogHeartbeat {
    /// Heartbeat for a watchdog timeout of `watchdog_usec` microseconds.
    #[must_use]
    pub fn new(watchdog_usec: u64) -> Self {
        Self {
            interval: Duration::from_micros(watchdog_usec / 2),
            last_beat: Instant::now(),
            enabled: watchdog_usec > 0,
        }
    }

    /// Heartbeat configured from systemd's `WATCHDOG_USEC`, disabled when unset.
    #[must_use]
    pub fn from_env() -> Self {
        std::env::var("WATCHDOG_USEC")
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .map_or_else(Self::disabled, Self::new)
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self {
            interval: Duration::from_secs(30),
            last_beat: Instant::now(),
            enabled: false,
        }
    }

    /// Send `WATCHDOG=1` if the interval has elapsed. Returns whether one was sent.
    pub fn maybe_notify(&mut self, status: &str) -> bool {
        if !self.enabled || self.last_beat.elapsed() < self.interval {
            return false;
        }
        self.last_beat = Instant::now();
        sd_notify(&format!("WATCHDOG=1\nSTATUS={status}\n"));
        true
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Tell systemd the daemon finished starting up.
pub fn notify_ready() {
    sd_notify("READY=1\n");
}

/// Send a raw message to `NOTIFY_SOCKET`. No-op when the socket is not set.
fn sd_notify(message: &str) {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::net::UnixDatagram;

        let socket_path = match std::env::var("NOTIFY_SOCKET") {
            Ok(p) if !p.is_empty() => p,
            _ => return,
        };
        if let Ok(sock) = UnixDatagram::unbound() {
            let _ = sock.send_to(message.as_bytes(), &socket_path);
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = message;
    }
}

// ──────────────────── tests ────────────────────
