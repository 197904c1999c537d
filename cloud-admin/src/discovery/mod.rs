pub mod parse;

use async_trait::async_trait;
use crate::creds::Credentials;
use crate::error::{AdminError, Result};
use crate::ssh::SshTarget;
pub use parse::MachineMappings;

/// Reports which services run on which host
#[async_trait]
pub trait Discovery: Send + Sync + 'static {
    async fn machine_mappings(&self) -> Result<MachineMappings>;
}

/// Discovers the topology by running the admin tools on the cloud controller
pub struct ControllerDiscovery {
    controller: SshTarget,
    credentials: Credentials,
    endpoint: String,
    services_command: String,
    nodes_command: String,
}

impl ControllerDiscovery {
    pub fn new(
        controller: SshTarget,
        credentials: Credentials,
        endpoint_port: u16,
        services_command: impl Into<String>,
        nodes_command: impl Into<String>,
    ) -> Self {
        let endpoint = format!("http://{}:{}/", controller.host(), endpoint_port);
        Self {
            controller,
            credentials,
            endpoint,
            services_command: services_command.into(),
            nodes_command: nodes_command.into(),
        }
    }

    async fn run(&self, command: &str) -> Result<String> {
        let env = self.credentials.env(&self.endpoint);
        self.controller
            .run_with_env(&env, command)
            .await
            .map_err(|e| AdminError::Discovery(format!("`{}` failed: {}", command, e)))
    }
}

#[async_trait]
impl Discovery for ControllerDiscovery {
    async fn machine_mappings(&self) -> Result<MachineMappings> {
        tracing::info!("Discovering services via {}", self.controller.host());

        let services = self.run(&self.services_command).await?;
        let mut mappings = parse::parse_services(&services, self.controller.host());

        let nodes = self.run(&self.nodes_command).await?;
        parse::merge_nodes(&mut mappings, &nodes);

        tracing::info!("Discovered {} hosts", mappings.len());
        Ok(mappings)
    }
}
