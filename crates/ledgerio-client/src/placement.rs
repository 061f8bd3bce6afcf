//! Ensemble placement

use crate::error::{ClientError, ClientResult};
use ledgerio_common::BookieId;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Chooses the bookies a new ledger is striped across
pub trait PlacementPolicy: Send + Sync {
    /// Pick `ensemble_size` distinct bookies, in ensemble order
    ///
    /// # Errors
    /// `NotEnoughBookies` if fewer than `ensemble_size` are available.
    fn select_ensemble(
        &self,
        available: &[BookieId],
        ensemble_size: usize,
    ) -> ClientResult<Vec<BookieId>>;
}

/// Spreads consecutive ledgers around the sorted bookie list
#[derive(Debug, Default)]
pub struct RoundRobinPlacement {
    next: AtomicUsize,
}

impl RoundRobinPlacement {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlacementPolicy for RoundRobinPlacement {
    fn select_ensemble(
        &self,
        available: &[BookieId],
        ensemble_size: usize,
    ) -> ClientResult<Vec<BookieId>> {
        if available.len() < ensemble_size {
            return Err(ClientError::NotEnoughBookies {
                available: available.len(),
                required: ensemble_size,
            });
        }
        if ensemble_size == 0 {
            return Ok(Vec::new());
        }

        let mut sorted = available.to_vec();
        sorted.sort();
        let start = self.next.fetch_add(1, Ordering::Relaxed) % sorted.len();
        Ok(sorted
            .iter()
            .cycle()
            .skip(start)
            .take(ensemble_size)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bookies(n: usize) -> Vec<BookieId> {
        (0..n).map(|i| BookieId::new(format!("bookie-{i}"))).collect()
    }

    #[test]
    fn test_select_distinct() {
        let policy = RoundRobinPlacement::new();
        let first = policy.select_ensemble(&bookies(5), 3).unwrap();
        let second = policy.select_ensemble(&bookies(5), 3).unwrap();

        assert_eq!(first.len(), 3);
        assert_ne!(first, second);
        for ensemble in [&first, &second] {
            let mut unique = ensemble.clone();
            unique.dedup();
            assert_eq!(unique.len(), 3);
        }
    }

    #[test]
    fn test_wraps_around() {
        let policy = RoundRobinPlacement::new();
        for _ in 0..4 {
            policy.select_ensemble(&bookies(4), 4).unwrap();
        }
        let ensemble = policy.select_ensemble(&bookies(4), 4).unwrap();
        assert_eq!(ensemble, bookies(4));
    }

    #[test]
    fn test_not_enough_bookies() {
        let policy = RoundRobinPlacement::new();
        assert!(matches!(
            policy.select_ensemble(&bookies(2), 3),
            Err(ClientError::NotEnoughBookies {
                available: 2,
                required: 3
            })
        ));
    }
}
