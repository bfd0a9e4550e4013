//! Docker Engine implementation of the container runtime boundary.

use std::collections::HashMap;

use bollard::{
    container::{
        Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
        StartContainerOptions, StatsOptions, StopContainerOptions,
    },
    image::BuildImageOptions,
    models::{ContainerStateStatusEnum, HostConfig, PortBinding},
    Docker,
};
use bytes::Bytes;
use futures::StreamExt;

use crate::{
    config::GPU_RUNTIME, ContainerRuntime, ContainerSpec, ContainerStatus, ImageBuildSpec,
    LabdockError, LabdockResult, RuntimeCounters,
};

use super::gpu;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Grace period in seconds before a stop escalates to SIGKILL.
const STOP_TIMEOUT_SECS: i64 = 10;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A container runtime backed by the local Docker Engine.
pub struct DockerRuntime {
    client: Docker,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DockerRuntime {
    /// Connects to the local Docker daemon and verifies it is reachable.
    ///
    /// A failure here puts the caller into degraded mode; there is no
    /// background reconnect.
    pub async fn connect() -> LabdockResult<Self> {
        let client = Docker::connect_with_local_defaults()?;
        client.ping().await?;
        Ok(Self { client })
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Maps a 404 from the daemon to `Ok(None)`; other errors pass through.
fn absent_on_not_found<T>(
    result: Result<T, bollard::errors::Error>,
) -> LabdockResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => Ok(None),
        Err(err) => Err(LabdockError::ContainerRuntime(err)),
    }
}

fn map_state(state: Option<ContainerStateStatusEnum>) -> ContainerStatus {
    match state {
        Some(ContainerStateStatusEnum::RUNNING)
        | Some(ContainerStateStatusEnum::RESTARTING) => ContainerStatus::Running,
        Some(ContainerStateStatusEnum::PAUSED) => ContainerStatus::Paused,
        Some(ContainerStateStatusEnum::CREATED) => ContainerStatus::Created,
        _ => ContainerStatus::Stopped,
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait::async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> LabdockResult<()> {
        self.client.ping().await?;
        Ok(())
    }

    async fn build(&self, spec: &ImageBuildSpec) -> LabdockResult<()> {
        let options = BuildImageOptions {
            dockerfile: spec.dockerfile.clone(),
            t: spec.tag.clone(),
            rm: true,
            forcerm: true,
            buildargs: spec.build_args.iter().cloned().collect(),
            ..Default::default()
        };

        let mut stream = self
            .client
            .build_image(options, None, Some(Bytes::from(spec.context.clone())));

        while let Some(message) = stream.next().await {
            let info = message?;

            if let Some(error) = info.error {
                return Err(LabdockError::ImageBuildFailed(error));
            }

            if let Some(line) = info.stream {
                let line = line.trim();
                if !line.is_empty() {
                    tracing::info!(tag = %spec.tag, "{}", line);
                }
            }
        }

        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> LabdockResult<String> {
        let exposed_port = format!("{}/tcp", spec.container_port);

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(exposed_port.clone(), HashMap::new());

        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            exposed_port,
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(spec.host_port.to_string()),
            }]),
        );

        let host_config = HostConfig {
            binds: Some(spec.binds.clone()),
            port_bindings: Some(port_bindings),
            cpu_shares: Some(spec.cpu_shares),
            memory: Some(spec.memory_bytes),
            memory_swap: Some(spec.memswap_bytes),
            runtime: spec.gpu.then(|| GPU_RUNTIME.to_string()),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.envs.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let response = self
            .client
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await?;

        for warning in &response.warnings {
            tracing::warn!(container = %spec.name, "daemon warning: {}", warning);
        }

        Ok(response.id)
    }

    async fn start(&self, handle: &str) -> LabdockResult<()> {
        self.client
            .start_container(handle, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn stop(&self, handle: &str) -> LabdockResult<()> {
        self.client
            .stop_container(
                handle,
                Some(StopContainerOptions {
                    t: STOP_TIMEOUT_SECS,
                }),
            )
            .await?;
        Ok(())
    }

    async fn pause(&self, handle: &str) -> LabdockResult<()> {
        self.client.pause_container(handle).await?;
        Ok(())
    }

    async fn unpause(&self, handle: &str) -> LabdockResult<()> {
        self.client.unpause_container(handle).await?;
        Ok(())
    }

    async fn remove(&self, handle: &str) -> LabdockResult<()> {
        self.client
            .remove_container(
                handle,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }

    async fn inspect(&self, handle: &str) -> LabdockResult<Option<ContainerStatus>> {
        let response = absent_on_not_found(
            self.client
                .inspect_container(handle, None::<InspectContainerOptions>)
                .await,
        )?;

        Ok(response.map(|r| map_state(r.state.and_then(|s| s.status))))
    }

    async fn resolve_name(&self, name: &str) -> LabdockResult<Option<String>> {
        // The inspect endpoint accepts a name in place of an id.
        let response = absent_on_not_found(
            self.client
                .inspect_container(name, None::<InspectContainerOptions>)
                .await,
        )?;

        Ok(response.and_then(|r| r.id))
    }

    async fn stats(&self, handle: &str) -> LabdockResult<RuntimeCounters> {
        let mut stream = self.client.stats(
            handle,
            Some(StatsOptions {
                stream: false,
                one_shot: false,
            }),
        );

        let stats = match stream.next().await {
            Some(stats) => stats?,
            None => {
                return Err(LabdockError::custom(anyhow::anyhow!(
                    "stats stream for {handle} ended without a sample"
                )))
            }
        };

        let (rx_bytes, tx_bytes) = stats
            .networks
            .as_ref()
            .map(|networks| {
                networks
                    .values()
                    .fold((0, 0), |(rx, tx), n| (rx + n.rx_bytes, tx + n.tx_bytes))
            })
            .unwrap_or((0, 0));

        // GPU memory is attributed through the container's process tree, so
        // the root pid has to come from an inspect.
        let pid = self
            .client
            .inspect_container(handle, None::<InspectContainerOptions>)
            .await
            .ok()
            .and_then(|response| response.state)
            .and_then(|state| state.pid)
            .unwrap_or(0);

        let (gpu_utilization, gpu_memory_bytes) = if pid > 0 {
            tokio::task::spawn_blocking(move || gpu::sample(pid as u32)).await?
        } else {
            (0, 0)
        };

        Ok(RuntimeCounters {
            cpu_total_usage: stats.cpu_stats.cpu_usage.total_usage,
            precpu_total_usage: stats.precpu_stats.cpu_usage.total_usage,
            system_cpu_usage: stats.cpu_stats.system_cpu_usage.unwrap_or(0),
            presystem_cpu_usage: stats.precpu_stats.system_cpu_usage.unwrap_or(0),
            online_cpus: stats.cpu_stats.online_cpus.unwrap_or(0) as u32,
            memory_usage: stats.memory_stats.usage.unwrap_or(0),
            memory_limit: stats.memory_stats.limit.unwrap_or(0),
            rx_bytes,
            tx_bytes,
            gpu_utilization,
            gpu_memory_bytes,
        })
    }
}
