//! Optional process-wide coordinator accessor
//!
//! The core is explicitly constructed and dependency-injected; this module is
//! a thin opt-in wrapper for hosts that want a single shared instance created
//! at startup. Nothing inside the core depends on it.

use std::sync::{Arc, OnceLock};

use crate::coordinator::Coordinator;
use crate::error::{Error, Result};

static SHARED: OnceLock<Arc<Coordinator>> = OnceLock::new();

/// Install the process-wide coordinator instance.
///
/// Fails if one has already been installed.
pub fn install(coordinator: Arc<Coordinator>) -> Result<()> {
    SHARED
        .set(coordinator)
        .map_err(|_| Error::Config("shared coordinator already installed".to_string()))
}

/// The installed coordinator, if any.
pub fn shared() -> Option<Arc<Coordinator>> {
    SHARED.get().cloned()
}
