//! Application registry (§3, §4.6): tracks downstream API users inside a
//! container, independent of process identity.

use super::ContainerRegistry;
use crate::types::{ApplicationId, ContainerId, Error, Result};
use std::collections::HashMap;

/// A downstream API user inside a container (§3). Phase contexts
/// themselves live on the container's `PowerPolicyManager` (created once
/// at container-creation time, keyed by cpu, shared by every application
/// in that container) — `has_policy_context` just records whether this
/// application's container has one, per §4.6's registration rule.
#[derive(Debug, Clone)]
pub struct Application {
    pub uuid: ApplicationId,
    pub container_uuid: ContainerId,
    pub progress: f64,
    pub has_policy_context: bool,
}

#[derive(Debug, Default)]
pub struct ApplicationRegistry {
    applications: HashMap<ApplicationId, Application>,
}

impl ApplicationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an application. The referenced container must already
    /// exist in `containers` (§3 invariant).
    pub fn register(
        &mut self,
        uuid: ApplicationId,
        container_uuid: ContainerId,
        containers: &ContainerRegistry,
    ) -> Result<()> {
        let container = containers
            .get(&container_uuid)
            .ok_or_else(|| Error::unknown_container(container_uuid.to_string()))?;

        self.applications.insert(
            uuid.clone(),
            Application {
                uuid,
                container_uuid,
                progress: 0.0,
                has_policy_context: container.policy.is_some(),
            },
        );
        Ok(())
    }

    pub fn delete(&mut self, uuid: &ApplicationId) -> Result<Application> {
        self.applications
            .remove(uuid)
            .ok_or_else(|| Error::unknown_application(uuid.to_string()))
    }

    /// Remove every application registered against a container — called
    /// when SIGCHLD reconciliation destroys the container.
    pub fn delete_for_container(&mut self, container_uuid: &ContainerId) {
        self.applications
            .retain(|_, app| &app.container_uuid != container_uuid);
    }

    pub fn get(&self, uuid: &ApplicationId) -> Option<&Application> {
        self.applications.get(uuid)
    }

    pub fn accumulate_progress(&mut self, uuid: &ApplicationId, amount: f64) -> Result<f64> {
        let app = self
            .applications
            .get_mut(uuid)
            .ok_or_else(|| Error::unknown_application(uuid.to_string()))?;
        app.progress += amount;
        Ok(app.progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ContainerRegistry;
    use crate::resources::ResourceManager;
    use crate::runtime::SubprocessContainerRuntime;
    use crate::topology::StaticTopologyProvider;
    use std::sync::Arc;

    fn empty_container_registry() -> ContainerRegistry {
        ContainerRegistry::new(
            ResourceManager::new(vec![0, 1], vec![0]),
            Arc::new(SubprocessContainerRuntime::new(Default::default())),
            Arc::new(StaticTopologyProvider::new(vec![0, 1], vec![0])),
            0.1,
            1.5,
        )
    }

    #[test]
    fn register_rejects_unknown_container() {
        let containers = empty_container_registry();
        let mut apps = ApplicationRegistry::new();
        let err = apps
            .register(ApplicationId::new(), ContainerId::new(), &containers)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownContainer(_)));
    }

    #[test]
    fn delete_of_unknown_application_is_an_error() {
        let mut apps = ApplicationRegistry::new();
        assert!(apps.delete(&ApplicationId::new()).is_err());
    }

    #[test]
    fn accumulate_progress_rejects_unknown_application() {
        let mut apps = ApplicationRegistry::new();
        assert!(apps.accumulate_progress(&ApplicationId::new(), 1.0).is_err());
    }
}
