//! Log output setup.
//!
//! Logs go through `tracing`. The level filter sits behind a reload layer so
//! the `debug` option can turn on debug output once the command line has been
//! processed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, Registry};

/// Handle on the global log level.
#[derive(Clone)]
pub struct LogControl {
    handle: Option<reload::Handle<LevelFilter, Registry>>,
    debug: Arc<AtomicBool>,
}

impl LogControl {
    /// Installs the global subscriber.
    pub fn init(debug: bool) -> Result<Self> {
        let (filter, handle) = reload::Layer::new(level_for(debug));
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .context("failed to install log subscriber")?;
        Ok(Self {
            handle: Some(handle),
            debug: Arc::new(AtomicBool::new(debug)),
        })
    }

    /// A control that is not attached to any subscriber.
    #[cfg(test)]
    pub fn detached() -> Self {
        Self {
            handle: None,
            debug: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_debug(&self, enabled: bool) {
        self.debug.store(enabled, Ordering::SeqCst);
        if let Some(handle) = &self.handle {
            let _ = handle.modify(|filter| *filter = level_for(enabled));
        }
    }

    pub fn is_debug(&self) -> bool {
        self.debug.load(Ordering::SeqCst)
    }
}

fn level_for(debug: bool) -> LevelFilter {
    if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    }
}
