//! Replay Targets
//!
//! Anything that mirrors ledger state implements [`ReplayTarget`]. After
//! a block is accepted into the chain it is handed to every registered
//! target, in registration order, so their state advances in lockstep
//! with the ledger.

use crate::chain::Block;
use crate::error::{Error, Result};

/// Capability to apply an accepted ledger block
pub trait ReplayTarget: Send {
    /// Name used in logs and replay errors
    fn name(&self) -> &str;

    /// Decode `block` and apply its payload. An error here means the
    /// target no longer reflects the chain.
    fn accept_block(&mut self, block: &Block) -> Result<()>;
}

/// Ordered list of replay targets
#[derive(Default)]
pub struct ReplayTargets {
    targets: Vec<Box<dyn ReplayTarget>>,
}

impl ReplayTargets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a target; targets are replayed in registration order
    pub fn register(&mut self, target: Box<dyn ReplayTarget>) {
        tracing::debug!("Registered replay target {}", target.name());
        self.targets.push(target);
    }

    /// Apply `block` to every target, stopping at the first failure
    pub fn accept_block(&mut self, block: &Block) -> Result<()> {
        for target in self.targets.iter_mut() {
            target.accept_block(block).map_err(|e| replay_error(block.id, target.name(), e))?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Wrap a target failure as [`Error::Replay`] unless it already is one
pub(crate) fn replay_error(id: u64, target: &str, err: Error) -> Error {
    match err {
        Error::Replay { .. } => err,
        other => Error::Replay {
            id,
            target: target.to_string(),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<(&'static str, u64)>>>,
        fail_on: Option<u64>,
    }

    impl ReplayTarget for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn accept_block(&mut self, block: &Block) -> Result<()> {
            if self.fail_on == Some(block.id) {
                return Err(Error::Decode("boom".into()));
            }
            self.log.lock().unwrap().push((self.name, block.id));
            Ok(())
        }
    }

    #[test]
    fn test_targets_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut targets = ReplayTargets::new();
        for name in ["accounts", "contracts"] {
            targets.register(Box::new(Recorder { name, log: log.clone(), fail_on: None }));
        }

        targets.accept_block(&Block::new(0, vec![0], "x")).unwrap();
        targets.accept_block(&Block::new(1, vec![], "y")).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![("accounts", 0), ("contracts", 0), ("accounts", 1), ("contracts", 1)]
        );
    }

    #[test]
    fn test_failure_is_wrapped_and_stops_replay() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut targets = ReplayTargets::new();
        targets.register(Box::new(Recorder { name: "accounts", log: log.clone(), fail_on: Some(4) }));
        targets.register(Box::new(Recorder { name: "contracts", log: log.clone(), fail_on: None }));

        let err = targets.accept_block(&Block::new(4, vec![], "x")).unwrap_err();
        match err {
            Error::Replay { id, target, .. } => {
                assert_eq!(id, 4);
                assert_eq!(target, "accounts");
            }
            other => panic!("unexpected error {other}"),
        }
        assert!(log.lock().unwrap().is_empty());
    }
}
