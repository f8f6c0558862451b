use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Exit status for a second Ctrl-C (128 + SIGINT).
const FORCED_EXIT_CODE: i32 = 130;

/// Set once Ctrl-C is received. The pipeline polls it between stages.
/// A second Ctrl-C ends the process without waiting for the stage.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    /// Starts a background listener for Ctrl-C.
    pub fn install() -> Result<Self> {
        let interrupt = Self::default();
        let listener = interrupt.clone();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()
            .context("Failed to start signal listener runtime")?;

        thread::Builder::new()
            .name("ctrl-c".into())
            .spawn(move || {
                runtime.block_on(async {
                    loop {
                        if let Err(e) = tokio::signal::ctrl_c().await {
                            debug!("Ctrl-C listener unavailable: {e}");
                            return;
                        }
                        if listener.trigger() {
                            warn!("Second interrupt received, exiting now");
                            std::process::exit(FORCED_EXIT_CODE);
                        }
                        warn!("Interrupt received, stopping after the current stage (Ctrl-C again to quit now)");
                    }
                });
            })
            .context("Failed to spawn signal listener thread")?;

        Ok(interrupt)
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sets the flag. Returns whether it was already set.
    pub fn trigger(&self) -> bool {
        self.flag.swap(true, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_the_flag() {
        let interrupt = Interrupt::default();
        let seen_by_pipeline = interrupt.clone();
        assert!(!seen_by_pipeline.is_set());
        interrupt.trigger();
        assert!(seen_by_pipeline.is_set());
    }

    #[test]
    fn test_trigger_reports_a_repeat() {
        let interrupt = Interrupt::default();
        assert!(!interrupt.trigger());
        assert!(interrupt.clone().trigger());
        assert!(interrupt.is_set());
    }

    #[test]
    fn test_install_starts_unset() {
        let interrupt = Interrupt::install().unwrap();
        assert!(!interrupt.is_set());
    }
}
