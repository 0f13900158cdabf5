//! Process-wide guard for "one per process" components.
//!
//! A component claims its name once; the claim is released when the
//! returned [`SingletonClaim`] is dropped.

use crate::error::ConfigError;
use log::debug;
use std::sync::Mutex;

static CLAIMED: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

#[derive(Debug)]
pub struct SingletonClaim {
    name: &'static str,
}

impl SingletonClaim {
    pub fn acquire(name: &'static str) -> Result<Self, ConfigError> {
        let mut claimed = CLAIMED.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if claimed.contains(&name) {
            return Err(ConfigError::AlreadyInstantiated(name));
        }

        claimed.push(name);
        debug!("Claimed process singleton {}", name);
        Ok(Self { name })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl Drop for SingletonClaim {
    fn drop(&mut self) {
        let mut claimed = CLAIMED.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        claimed.retain(|name| *name != self.name);
    }
}
