//! In-process locks, for embedding the conveyor and for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{LockError, LockHolder, LockService, LockToken, validate_name};

type Slot = Arc<tokio::sync::Mutex<()>>;

#[derive(Default)]
pub struct MemoryLockService {
  slots: Mutex<HashMap<String, Slot>>,
  holders: Arc<Mutex<HashMap<String, LockHolder>>>,
}

impl MemoryLockService {
  pub fn new() -> Self {
    Self::default()
  }

  fn slot(&self, name: &str) -> Slot {
    let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
    slots.entry(name.to_string()).or_default().clone()
  }

  fn holder(&self, name: &str) -> Option<LockHolder> {
    self.holders.lock().unwrap_or_else(|e| e.into_inner()).get(name).cloned()
  }
}

/// Clears the recorded holder, then releases the slot.
struct MemoryGuard {
  name: String,
  holders: Arc<Mutex<HashMap<String, LockHolder>>>,
  _guard: tokio::sync::OwnedMutexGuard<()>,
}

impl Drop for MemoryGuard {
  fn drop(&mut self) {
    self.holders.lock().unwrap_or_else(|e| e.into_inner()).remove(&self.name);
  }
}

#[async_trait]
impl LockService for MemoryLockService {
  async fn acquire(&self, name: &str, timeout: Duration) -> Result<LockToken, LockError> {
    validate_name(name)?;
    let slot = self.slot(name);

    let guard = match tokio::time::timeout(timeout, slot.lock_owned()).await {
      Ok(guard) => guard,
      Err(_) => {
        return Err(LockError::Timeout {
          name: name.to_string(),
          timeout,
          holder: self.holder(name),
        });
      }
    };

    let holder = LockHolder::current("in-process");
    self
      .holders
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .insert(name.to_string(), holder.clone());
    debug!(lock = %name, "acquired in-process lock");

    let guard = MemoryGuard {
      name: name.to_string(),
      holders: self.holders.clone(),
      _guard: guard,
    };
    Ok(LockToken::new(name.to_string(), holder, Box::new(guard)))
  }
}
