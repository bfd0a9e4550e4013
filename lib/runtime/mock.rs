//! In-memory container runtime used by unit tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use crate::{
    ContainerRuntime, ContainerSpec, ContainerStatus, ImageBuildSpec, LabdockError, LabdockResult,
    RuntimeCounters,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A fake runtime holding containers in memory.
#[derive(Default)]
pub(crate) struct MockRuntime {
    state: Mutex<MockState>,
    counters: Mutex<RuntimeCounters>,
    fail_stats: AtomicBool,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    containers: HashMap<String, MockContainer>,
    images: Vec<ImageBuildSpec>,
}

#[derive(Debug, Clone)]
struct MockContainer {
    name: String,
    status: ContainerStatus,
    spec: ContainerSpec,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MockRuntime {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the status of a container by id, if it exists.
    pub(crate) fn status_of(&self, handle: &str) -> Option<ContainerStatus> {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(handle)
            .map(|c| c.status)
    }

    /// Returns the status of a container by name, if it exists.
    pub(crate) fn status_of_name(&self, name: &str) -> Option<ContainerStatus> {
        self.state
            .lock()
            .unwrap()
            .containers
            .values()
            .find(|c| c.name == name)
            .map(|c| c.status)
    }

    /// Returns the spec the container was created with.
    pub(crate) fn spec_of_name(&self, name: &str) -> Option<ContainerSpec> {
        self.state
            .lock()
            .unwrap()
            .containers
            .values()
            .find(|c| c.name == name)
            .map(|c| c.spec.clone())
    }

    pub(crate) fn container_count(&self) -> usize {
        self.state.lock().unwrap().containers.len()
    }

    /// Returns the build request recorded for an image tag.
    pub(crate) fn built_image(&self, tag: &str) -> Option<ImageBuildSpec> {
        self.state
            .lock()
            .unwrap()
            .images
            .iter()
            .find(|spec| spec.tag == tag)
            .cloned()
    }

    /// Removes a container out-of-band, simulating an external `docker rm`.
    pub(crate) fn remove_externally(&self, handle: &str) {
        self.state.lock().unwrap().containers.remove(handle);
    }

    /// Forces a container into a status without going through the API.
    pub(crate) fn force_status(&self, handle: &str, status: ContainerStatus) {
        if let Some(c) = self.state.lock().unwrap().containers.get_mut(handle) {
            c.status = status;
        }
    }

    pub(crate) fn set_counters(&self, counters: RuntimeCounters) {
        *self.counters.lock().unwrap() = counters;
    }

    pub(crate) fn set_fail_stats(&self, fail: bool) {
        self.fail_stats.store(fail, Ordering::SeqCst);
    }

    fn with_container<T>(
        &self,
        handle: &str,
        f: impl FnOnce(&mut MockContainer) -> LabdockResult<T>,
    ) -> LabdockResult<T> {
        let mut state = self.state.lock().unwrap();
        match state.containers.get_mut(handle) {
            Some(container) => f(container),
            None => Err(LabdockError::SandboxNotFound(handle.to_string())),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait::async_trait]
impl ContainerRuntime for MockRuntime {
    async fn ping(&self) -> LabdockResult<()> {
        Ok(())
    }

    async fn build(&self, spec: &ImageBuildSpec) -> LabdockResult<()> {
        if spec.context.is_empty() {
            return Err(LabdockError::ImageBuildFailed(
                "empty build context".to_string(),
            ));
        }

        self.state.lock().unwrap().images.push(spec.clone());
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> LabdockResult<String> {
        let mut state = self.state.lock().unwrap();

        if state.containers.values().any(|c| c.name == spec.name) {
            return Err(LabdockError::custom(anyhow::anyhow!(
                "container name {} already in use",
                spec.name
            )));
        }

        state.next_id += 1;
        let id = format!("mock-{:08x}", state.next_id);
        state.containers.insert(
            id.clone(),
            MockContainer {
                name: spec.name.clone(),
                status: ContainerStatus::Created,
                spec: spec.clone(),
            },
        );

        Ok(id)
    }

    async fn start(&self, handle: &str) -> LabdockResult<()> {
        self.with_container(handle, |c| {
            c.status = ContainerStatus::Running;
            Ok(())
        })
    }

    async fn stop(&self, handle: &str) -> LabdockResult<()> {
        self.with_container(handle, |c| {
            c.status = ContainerStatus::Stopped;
            Ok(())
        })
    }

    async fn pause(&self, handle: &str) -> LabdockResult<()> {
        self.with_container(handle, |c| {
            if !c.status.is_running() {
                return Err(LabdockError::custom(anyhow::anyhow!(
                    "cannot pause container in state {:?}",
                    c.status
                )));
            }
            c.status = ContainerStatus::Paused;
            Ok(())
        })
    }

    async fn unpause(&self, handle: &str) -> LabdockResult<()> {
        self.with_container(handle, |c| {
            if !c.status.is_paused() {
                return Err(LabdockError::custom(anyhow::anyhow!(
                    "cannot unpause container in state {:?}",
                    c.status
                )));
            }
            c.status = ContainerStatus::Running;
            Ok(())
        })
    }

    async fn remove(&self, handle: &str) -> LabdockResult<()> {
        let mut state = self.state.lock().unwrap();
        match state.containers.remove(handle) {
            Some(_) => Ok(()),
            None => Err(LabdockError::SandboxNotFound(handle.to_string())),
        }
    }

    async fn inspect(&self, handle: &str) -> LabdockResult<Option<ContainerStatus>> {
        Ok(self.status_of(handle))
    }

    async fn resolve_name(&self, name: &str) -> LabdockResult<Option<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .containers
            .iter()
            .find(|(_, c)| c.name == name)
            .map(|(id, _)| id.clone()))
    }

    async fn stats(&self, handle: &str) -> LabdockResult<RuntimeCounters> {
        if self.fail_stats.load(Ordering::SeqCst) {
            return Err(LabdockError::custom(anyhow::anyhow!(
                "stats read failure injected"
            )));
        }

        self.status_of(handle)
            .map(|_| *self.counters.lock().unwrap())
            .ok_or_else(|| LabdockError::SandboxNotFound(handle.to_string()))
    }
}
