//! Cluster-Locator: credentials, node address and the stager's URL
//!
//! Credentials always come from `~/.kube/config`. The node address is the
//! host of the API server URL, and the stager is reached either through its
//! load balancer ingress or through that node on the service's node port.

use crate::error::{
    ClientCreateSnafu, CredentialsLoadSnafu, CredentialsReadSnafu, HomeDirSnafu, Result,
    StagerServiceMisconfiguredSnafu, StagerServiceMissingSnafu, UnparsableHostSnafu,
};
use http::Uri;
use k0ube_c0re_lib::protocol::{STAGER_NAMESPACE, STAGER_SERVICE_NAME};
use k8s_openapi::api::core::v1::Service;
use kube::api::Api;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use snafu::{OptionExt, ResultExt, ensure};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Connected cluster client plus the node address it was built from
#[derive(Clone)]
pub struct ClusterLocator {
    client: Client,
    node: String,
}

impl ClusterLocator {
    /// `~/.kube/config`; `KUBECONFIG` is ignored
    pub fn kubeconfig_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context(HomeDirSnafu)?;
        Ok(home.join(".kube").join("config"))
    }

    pub async fn connect() -> Result<Self> {
        Self::from_kubeconfig(&Self::kubeconfig_path()?).await
    }

    pub async fn from_kubeconfig(path: &Path) -> Result<Self> {
        let kubeconfig = Kubeconfig::read_from(path).context(CredentialsReadSnafu { path })?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .context(CredentialsLoadSnafu { path })?;
        let node = node_address(&config.cluster_url)?;
        let client = Client::try_from(config).context(ClientCreateSnafu)?;
        debug!(path = %path.display(), %node, "cluster client ready");
        Ok(Self { client, node })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// Base URL of the stager, looked up from its service
    pub async fn staging_url(&self) -> Result<String> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), STAGER_NAMESPACE);
        let service = api
            .get(STAGER_SERVICE_NAME)
            .await
            .context(StagerServiceMissingSnafu {
                name: STAGER_SERVICE_NAME,
                namespace: STAGER_NAMESPACE,
            })?;
        let url = staging_url_from_service(&service, &self.node)?;
        info!(%url, "stager located");
        Ok(url)
    }
}

/// Host part of the API server URL, without the port
pub fn node_address(cluster_url: &Uri) -> Result<String> {
    let host = cluster_url
        .host()
        .filter(|h| !h.is_empty())
        .context(UnparsableHostSnafu {
            host: cluster_url.to_string(),
        })?;
    Ok(host.to_string())
}

/// Ingress IP, then ingress hostname, then `<node>:<nodePort>`
pub fn staging_url_from_service(service: &Service, node: &str) -> Result<String> {
    let name = service.metadata.name.as_deref().unwrap_or_default();
    ensure!(
        name == STAGER_SERVICE_NAME,
        StagerServiceMisconfiguredSnafu {
            name,
            reason: format!("expected service named {STAGER_SERVICE_NAME}"),
        }
    );

    let ingress = service
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .and_then(|ingress| ingress.first())
        .and_then(|ingress| ingress.ip.as_deref().or(ingress.hostname.as_deref()));
    if let Some(address) = ingress {
        return Ok(format!("http://{address}"));
    }

    let node_port = service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .and_then(|ports| ports.first())
        .and_then(|port| port.node_port)
        .context(StagerServiceMisconfiguredSnafu {
            name,
            reason: "no node port and no load balancer ingress",
        })?;
    Ok(format!("http://{node}:{node_port}"))
}
