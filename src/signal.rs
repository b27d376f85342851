//! Cooperative cancellation and Ctrl+C handling.
//!
//! A [`CancelToken`] wraps one shared `AtomicBool`. The engine hands the flag
//! to the scanner, the hashing pipeline and the resolver; every worker loop
//! polls it. Setting it never interrupts anything forcibly: workers finish the
//! item in hand and stop taking new ones.
//!
//! # Usage
//!
//! ```rust,no_run
//! use dedup::signal::{install_handler, CancelToken};
//!
//! let token = CancelToken::new();
//! install_handler(&token).expect("Failed to install signal handler");
//!
//! // Pass token.flag() to long-running components, or check directly
//! if token.is_cancelled() {
//!     println!("Cancelled, cleaning up...");
//! }
//! ```
//!
//! # Exit Codes
//!
//! When Ctrl+C is received the watched token is cancelled, a message is
//! printed to stderr and the binary exits with code 130 (128 + SIGINT) once
//! the running operation has wound down.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Exit code for SIGINT (Ctrl+C) interruption.
/// This follows Unix convention: 128 + signal number (SIGINT = 2).
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

/// Shared cancellation request.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Clear a previous request so the token can guard the next operation.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// The underlying flag, for components polling an `AtomicBool`.
    #[must_use]
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

/// Error type for signal handler installation.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// Failed to install the Ctrl+C handler.
    #[error("Failed to install signal handler: {0}")]
    InstallFailed(String),
}

static WATCHED: Mutex<Option<CancelToken>> = Mutex::new(None);
static INSTALLED: OnceLock<Result<(), String>> = OnceLock::new();

fn on_interrupt() {
    cancel_watched(&WATCHED);
    let _ = writeln!(std::io::stderr(), "\nInterrupted. Cleaning up...");
    let _ = std::io::stderr().flush();
    log::info!("Shutdown signal received");
}

fn cancel_watched(slot: &Mutex<Option<CancelToken>>) {
    if let Some(token) = slot
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
    {
        token.cancel();
    }
}

/// Cancel `token` when Ctrl+C is pressed.
///
/// The process-wide hook is registered on the first call; later calls only
/// switch which token it cancels, so repeated calls (e.g. from tests) are
/// harmless.
///
/// # Errors
///
/// Returns [`SignalError::InstallFailed`] if the hook could not be registered.
/// The token still works for manual cancellation in that case.
pub fn install_handler(token: &CancelToken) -> Result<(), SignalError> {
    *WATCHED.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());

    INSTALLED
        .get_or_init(|| ctrlc::set_handler(on_interrupt).map_err(|e| e.to_string()))
        .clone()
        .map_err(SignalError::InstallFailed)
}
