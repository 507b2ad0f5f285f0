//! In-memory ceremony registry

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use axiom_ceremony::{CeremonyId, CeremonyStatus};

use crate::coordinator::Coordinator;
use crate::error::{CoordinatorError, Result};

/// Keyed collection of live ceremonies
///
/// Each entry carries its own lock, so ceremonies never contend with each
/// other; the registry lock only guards membership.
#[derive(Default)]
pub struct CeremonyRegistry {
    ceremonies: RwLock<HashMap<CeremonyId, Arc<Coordinator>>>,
}

impl CeremonyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new ceremony and log its creation
    pub async fn create(&self, coordinator: Coordinator) -> Result<Arc<Coordinator>> {
        let coordinator = self.insert(coordinator).await?;
        coordinator.record_creation().await;
        Ok(coordinator)
    }

    /// Register an existing ceremony, e.g. one restored from a snapshot
    pub async fn insert(&self, coordinator: Coordinator) -> Result<Arc<Coordinator>> {
        let mut ceremonies = self.ceremonies.write().await;
        let id = coordinator.ceremony_id().clone();
        if ceremonies.contains_key(&id) {
            return Err(CoordinatorError::AlreadyExists(id.to_string()));
        }

        let coordinator = Arc::new(coordinator);
        ceremonies.insert(id, Arc::clone(&coordinator));
        Ok(coordinator)
    }

    pub async fn get(&self, id: &CeremonyId) -> Result<Arc<Coordinator>> {
        self.ceremonies
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| CoordinatorError::NotFound(id.to_string()))
    }

    /// Status of every registered ceremony, ordered by id
    pub async fn list(&self) -> Vec<CeremonyStatus> {
        let mut coordinators: Vec<Arc<Coordinator>> =
            self.ceremonies.read().await.values().cloned().collect();
        coordinators.sort_by(|a, b| a.ceremony_id().cmp(b.ceremony_id()));

        let mut statuses = Vec::with_capacity(coordinators.len());
        for coordinator in coordinators {
            statuses.push(coordinator.status().await);
        }
        statuses
    }

    /// Drop completed and aborted ceremonies, returning their ids
    pub async fn remove_terminal(&self) -> Vec<CeremonyId> {
        let snapshot: Vec<Arc<Coordinator>> =
            self.ceremonies.read().await.values().cloned().collect();

        let mut terminal = Vec::new();
        for coordinator in snapshot {
            if coordinator.status().await.phase.is_terminal() {
                terminal.push(coordinator.ceremony_id().clone());
            }
        }

        let mut ceremonies = self.ceremonies.write().await;
        for id in &terminal {
            ceremonies.remove(id);
        }
        if !terminal.is_empty() {
            info!("Removed {} finished ceremonies", terminal.len());
        }
        terminal.sort();
        terminal
    }

    pub async fn len(&self) -> usize {
        self.ceremonies.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ceremonies.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::LogNotifier;
    use axiom_ceremony::{Ceremony, HashAlgorithm, Participant};

    fn coordinator(id: &str) -> Coordinator {
        let ceremony = Ceremony::new(
            CeremonyId::new(id).unwrap(),
            vec![
                Participant::new("a", "A", "a@axiom.test"),
                Participant::new("b", "B", "b@axiom.test"),
            ],
            HashAlgorithm::Sha256,
        )
        .unwrap();
        Coordinator::new(ceremony, Arc::new(LogNotifier))
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let registry = CeremonyRegistry::new();
        registry.create(coordinator("one")).await.unwrap();

        let err = registry.create(coordinator("one")).await.err().unwrap();
        assert!(matches!(err, CoordinatorError::AlreadyExists(_)));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let registry = CeremonyRegistry::new();
        let err = registry
            .get(&CeremonyId::new("missing").unwrap())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CoordinatorError::NotFound(_)));
    }

    #[tokio::test]
    async fn ceremonies_are_independent() {
        let registry = CeremonyRegistry::new();
        let one = registry.create(coordinator("one")).await.unwrap();
        registry.create(coordinator("two")).await.unwrap();

        one.start().await.unwrap();
        one.flush_notifications().await;

        let statuses = registry.list().await;
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].ceremony_id.as_str(), "one");
        assert_eq!(statuses[0].phase.name(), "in_progress");
        assert_eq!(statuses[1].phase.name(), "waiting");
    }

    #[tokio::test]
    async fn remove_terminal_keeps_live_ceremonies() {
        let registry = CeremonyRegistry::new();
        let aborted = registry.create(coordinator("aborted")).await.unwrap();
        registry.create(coordinator("live")).await.unwrap();
        aborted.abort("operator").await.unwrap();

        let removed = registry.remove_terminal().await;
        assert_eq!(removed, vec![CeremonyId::new("aborted").unwrap()]);
        assert!(registry.get(&CeremonyId::new("live").unwrap()).await.is_ok());
        assert_eq!(registry.len().await, 1);
    }
}
