//! Deployment synthesizer
//!
//! Turns a [`Deployment`] descriptor into a `ReplicaSet` and a `NodePort`
//! `Service`. The object builders are pure; `create` and `expose_service`
//! only post what they build. Objects are created, never updated: a second
//! deploy under the same name fails at the API.

pub mod labels;
pub mod setup;

pub use setup::SetupEncoding;

use crate::config::DeploymentConfig;
use crate::error::{
    InvalidNameSnafu, InvalidReplicasSnafu, RenderSnafu, Result, ServiceCreateSnafu,
    WorkloadCreateSnafu,
};
use k8s_openapi::api::apps::v1::{ReplicaSet, ReplicaSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar, PodSpec,
    PodTemplateSpec, ResourceRequirements, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::Client;
use kube::api::{Api, PostParams};
use lazy_static::lazy_static;
use regex::Regex;
use snafu::{OptionExt, ResultExt, ensure};
use std::collections::BTreeMap;
use tracing::info;

/// Port the workload serves traffic on, targeted by the service
pub const HTTP_PORT: i32 = 80;
/// Port the workload exposes metrics on
pub const METRICS_PORT: i32 = 9102;
/// Config maps are mounted under `/cfg/<name>`
pub const CONFIG_MOUNT_ROOT: &str = "/cfg";

lazy_static! {
    static ref DNS_LABEL: Regex =
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("dns label regex is valid");
}

/// Reject names Kubernetes would refuse as object or volume names
pub fn validate_name(name: &str) -> Result<()> {
    ensure!(
        name.len() <= 63,
        InvalidNameSnafu {
            name,
            reason: "longer than 63 characters",
        }
    );
    ensure!(
        DNS_LABEL.is_match(name),
        InvalidNameSnafu {
            name,
            reason: "must be lowercase alphanumerics or '-', starting and ending alphanumeric",
        }
    );
    Ok(())
}

/// Volume name for a mounted config map
pub fn config_volume_name(config_map: &str) -> String {
    format!("config-{config_map}")
}

/// In-memory model of one workload, consumed once by the create calls
#[derive(Debug, Clone)]
pub struct Deployment {
    pub name: String,
    pub namespace: String,
    pub replicas: u32,
    pub image: String,
    pub resources: ResourceRequirements,
    /// Labels on the replica set, including identity and markers
    pub labels: BTreeMap<String, String>,
    /// Extra labels for pods only
    pub pod_labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub args: Vec<String>,
    pub config_maps: Vec<String>,
    pub binary_url: String,
    pub setup_encoding: SetupEncoding,
}

impl Deployment {
    /// Descriptor for `name` populated from `config`
    pub fn from_config(name: &str, config: &DeploymentConfig) -> Result<Self> {
        validate_name(name)?;
        labels::check_pod_labels(&config.pod_labels)?;
        for config_map in &config.config_maps {
            validate_name(&config_volume_name(config_map))?;
        }
        ensure!(
            i32::try_from(config.replicas).is_ok(),
            InvalidReplicasSnafu {
                replicas: config.replicas
            }
        );

        let resources = ResourceRequirements {
            limits: Some(BTreeMap::from([
                ("cpu".to_string(), config.cpu_limit.to_quantity()),
                ("memory".to_string(), config.memory_limit.to_quantity()),
            ])),
            requests: Some(BTreeMap::from([
                ("cpu".to_string(), config.cpu_request.to_quantity()),
                ("memory".to_string(), config.memory_request.to_quantity()),
            ])),
            ..Default::default()
        };

        Ok(Self {
            name: name.to_string(),
            namespace: config.namespace.clone(),
            replicas: config.replicas,
            image: config.base_image.clone(),
            resources,
            labels: labels::workload_labels(name),
            pod_labels: config.pod_labels.clone(),
            annotations: BTreeMap::new(),
            env: BTreeMap::new(),
            args: Vec::new(),
            config_maps: config.config_maps.clone(),
            binary_url: String::new(),
            setup_encoding: config.setup_encoding,
        })
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_binary_url(mut self, url: impl Into<String>) -> Self {
        self.binary_url = url.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn metadata(&self, labels: BTreeMap<String, String>) -> ObjectMeta {
        ObjectMeta {
            name: Some(self.name.clone()),
            namespace: Some(self.namespace.clone()),
            labels: Some(labels),
            ..Default::default()
        }
    }

    fn volumes(&self) -> (Vec<Volume>, Vec<VolumeMount>) {
        let mut volumes = vec![Volume {
            name: setup::BIN_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        }];
        let mut mounts = vec![setup::bin_mount()];

        for config_map in &self.config_maps {
            let volume_name = config_volume_name(config_map);
            volumes.push(Volume {
                name: volume_name.clone(),
                config_map: Some(ConfigMapVolumeSource {
                    name: config_map.clone().into(),
                    ..Default::default()
                }),
                ..Default::default()
            });
            mounts.push(VolumeMount {
                name: volume_name,
                mount_path: format!("{CONFIG_MOUNT_ROOT}/{config_map}"),
                ..Default::default()
            });
        }
        (volumes, mounts)
    }

    fn main_container(&self, mounts: Vec<VolumeMount>) -> Container {
        let env: Vec<EnvVar> = self
            .env
            .iter()
            .map(|(name, value)| EnvVar {
                name: name.clone(),
                value: Some(value.clone()),
                ..Default::default()
            })
            .collect();

        Container {
            name: self.name.clone(),
            image: Some(self.image.clone()),
            command: Some(vec![setup::binary_path(&self.name)]),
            args: Some(self.args.clone()),
            env: (!env.is_empty()).then_some(env),
            resources: Some(self.resources.clone()),
            ports: Some(vec![
                ContainerPort {
                    name: Some("http".to_string()),
                    container_port: HTTP_PORT,
                    ..Default::default()
                },
                ContainerPort {
                    name: Some("metrics".to_string()),
                    container_port: METRICS_PORT,
                    ..Default::default()
                },
            ]),
            volume_mounts: Some(mounts),
            ..Default::default()
        }
    }

    /// The replica set this descriptor describes
    pub fn replica_set(&self) -> Result<ReplicaSet> {
        let replicas = i32::try_from(self.replicas).ok().context(InvalidReplicasSnafu {
            replicas: self.replicas,
        })?;

        let (volumes, mounts) = self.volumes();
        let steps = setup::setup_steps(&self.name, &self.binary_url);

        let mut annotations = self.annotations.clone();
        annotations.insert("prometheus.io/scrape".to_string(), "true".to_string());
        let init_containers = match self.setup_encoding {
            SetupEncoding::InitContainers => Some(steps),
            SetupEncoding::Annotation => {
                annotations.insert(
                    setup::INIT_CONTAINERS_ANNOTATION.to_string(),
                    setup::annotation_value(&steps)?,
                );
                None
            }
        };

        let selector = labels::selector(&self.labels);
        let template_labels = labels::template_labels(&selector, &self.pod_labels);

        Ok(ReplicaSet {
            metadata: self.metadata(self.labels.clone()),
            spec: Some(ReplicaSetSpec {
                replicas: Some(replicas),
                selector: LabelSelector {
                    match_labels: Some(selector),
                    ..Default::default()
                },
                template: Some(PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(template_labels),
                        annotations: Some(annotations),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        init_containers,
                        containers: vec![self.main_container(mounts)],
                        volumes: Some(volumes),
                        ..Default::default()
                    }),
                }),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    /// The node-reachable service in front of the replica set
    pub fn service(&self) -> Service {
        let labels = BTreeMap::from([
            (labels::VISUALIZE_LABEL.to_string(), "true".to_string()),
            (labels::IDENTITY_LABEL.to_string(), self.name.clone()),
        ]);
        Service {
            metadata: self.metadata(labels),
            spec: Some(ServiceSpec {
                type_: Some("NodePort".to_string()),
                selector: Some(labels::service_selector(&self.name)),
                ports: Some(vec![ServicePort {
                    name: Some("http".to_string()),
                    port: HTTP_PORT,
                    target_port: Some(IntOrString::String("http".to_string())),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Create the replica set in the cluster
    pub async fn create(&self, client: &Client) -> Result<ReplicaSet> {
        let replica_set = self.replica_set()?;
        let api: Api<ReplicaSet> = Api::namespaced(client.clone(), &self.namespace);
        let created = api
            .create(&PostParams::default(), &replica_set)
            .await
            .context(WorkloadCreateSnafu {
                name: &self.name,
                namespace: &self.namespace,
            })?;
        info!(name = %self.name, namespace = %self.namespace, replicas = self.replicas, "replica set created");
        Ok(created)
    }

    /// Create the service exposing the replica set
    pub async fn expose_service(&self, client: &Client) -> Result<Service> {
        let api: Api<Service> = Api::namespaced(client.clone(), &self.namespace);
        let created = api
            .create(&PostParams::default(), &self.service())
            .await
            .context(ServiceCreateSnafu {
                name: &self.name,
                namespace: &self.namespace,
            })?;
        info!(name = %self.name, namespace = %self.namespace, "service created");
        Ok(created)
    }

    /// Both objects as a YAML multi-document, for dry runs
    pub fn render(&self) -> Result<String> {
        let replica_set = serde_yaml::to_string(&self.replica_set()?).context(RenderSnafu)?;
        let service = serde_yaml::to_string(&self.service()).context(RenderSnafu)?;
        Ok(format!("{replica_set}---\n{service}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeploymentArgs, DeploymentDefaults};
    use crate::error::DeployError;

    fn config(args: DeploymentArgs) -> DeploymentConfig {
        DeploymentConfig::resolve(&args, &DeploymentDefaults::default()).unwrap()
    }

    fn deployment(args: DeploymentArgs) -> Deployment {
        Deployment::from_config("svc", &config(args))
            .unwrap()
            .with_binary_url("http://host:30000/svc")
    }

    fn pod_spec(rs: &ReplicaSet) -> &PodSpec {
        rs.spec
            .as_ref()
            .unwrap()
            .template
            .as_ref()
            .unwrap()
            .spec
            .as_ref()
            .unwrap()
    }

    fn template_meta(rs: &ReplicaSet) -> &ObjectMeta {
        rs.spec
            .as_ref()
            .unwrap()
            .template
            .as_ref()
            .unwrap()
            .metadata
            .as_ref()
            .unwrap()
    }

    #[test]
    fn test_config_volumes_and_pod_labels() {
        let rs = deployment(DeploymentArgs {
            labels: Some(r#"{"team":"x"}"#.to_string()),
            config_maps: Some(r#"["a","b"]"#.to_string()),
            ..Default::default()
        })
        .replica_set()
        .unwrap();

        let spec = pod_spec(&rs);
        let volumes = spec.volumes.as_ref().unwrap();
        let config_volumes: Vec<_> = volumes
            .iter()
            .filter(|v| v.config_map.is_some())
            .collect();
        assert_eq!(config_volumes.len(), 2);
        assert_eq!(config_volumes[0].name, "config-a");
        assert_eq!(config_volumes[1].name, "config-b");

        let mounts = spec.containers[0].volume_mounts.as_ref().unwrap();
        let config_mounts: Vec<_> = mounts
            .iter()
            .filter(|m| m.name.starts_with("config-"))
            .map(|m| (m.name.as_str(), m.mount_path.as_str()))
            .collect();
        assert_eq!(
            config_mounts,
            vec![("config-a", "/cfg/a"), ("config-b", "/cfg/b")]
        );

        let labels = template_meta(&rs).labels.as_ref().unwrap();
        assert_eq!(labels.get("team").map(String::as_str), Some("x"));
    }

    #[test]
    fn test_selector_symmetry() {
        let rs = deployment(DeploymentArgs {
            labels: Some(r#"{"team":"x","tier":"backend"}"#.to_string()),
            ..Default::default()
        })
        .replica_set()
        .unwrap();

        let selector = rs
            .spec
            .as_ref()
            .unwrap()
            .selector
            .match_labels
            .as_ref()
            .unwrap();
        for marker in labels::RESERVED_MARKERS {
            assert!(!selector.contains_key(marker));
        }
        assert_eq!(selector.get("run").map(String::as_str), Some("svc"));

        let template = template_meta(&rs).labels.as_ref().unwrap();
        assert_eq!(template.get("traffic").map(String::as_str), Some("yes"));
        for (k, v) in selector {
            assert_eq!(template.get(k), Some(v), "template must match selector on {k}");
        }
    }

    #[test]
    fn test_bin_volume_shared_by_all_containers() {
        let rs = deployment(DeploymentArgs::default()).replica_set().unwrap();
        let spec = pod_spec(&rs);

        let bin = spec
            .volumes
            .as_ref()
            .unwrap()
            .iter()
            .find(|v| v.name == "bin")
            .unwrap();
        assert!(bin.empty_dir.is_some());

        let all = spec
            .containers
            .iter()
            .chain(spec.init_containers.as_ref().unwrap());
        for container in all {
            let mounts = container.volume_mounts.as_ref().unwrap();
            assert!(
                mounts
                    .iter()
                    .any(|m| m.name == "bin" && m.mount_path == "/opt/bin"),
                "{} lacks the bin mount",
                container.name
            );
        }
    }

    #[test]
    fn test_main_container() {
        let rs = deployment(DeploymentArgs {
            cpu_limit: Some("250m".to_string()),
            memory_limit: Some("128Mi".to_string()),
            ..Default::default()
        })
        .with_args(vec!["--port=8080".to_string()])
        .with_env("RUST_LOG", "debug")
        .replica_set()
        .unwrap();

        let container = &pod_spec(&rs).containers[0];
        assert_eq!(container.name, "svc");
        assert_eq!(container.image.as_deref(), Some("alpine:3.4"));
        assert_eq!(
            container.command.as_deref(),
            Some(["/opt/bin/svc".to_string()].as_slice())
        );
        assert_eq!(
            container.args.as_deref(),
            Some(["--port=8080".to_string()].as_slice())
        );
        let env = container.env.as_ref().unwrap();
        assert_eq!(env[0].name, "RUST_LOG");
        assert_eq!(env[0].value.as_deref(), Some("debug"));

        let resources = container.resources.as_ref().unwrap();
        let limits = resources.limits.as_ref().unwrap();
        assert_eq!(limits["cpu"].0, "250m");
        assert_eq!(limits["memory"].0, "128Mi");
        let requests = resources.requests.as_ref().unwrap();
        assert_eq!(requests["cpu"].0, "100m");
        assert_eq!(requests["memory"].0, "64M");

        let ports: Vec<i32> = container
            .ports
            .as_ref()
            .unwrap()
            .iter()
            .map(|p| p.container_port)
            .collect();
        assert!(ports.contains(&METRICS_PORT));
        assert!(ports.contains(&HTTP_PORT));
    }

    #[test]
    fn test_native_init_containers_fetch_binary() {
        let rs = deployment(DeploymentArgs::default()).replica_set().unwrap();
        let init = pod_spec(&rs).init_containers.as_ref().unwrap();
        let names: Vec<_> = init.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["install", "configure"]);
        assert_eq!(
            init[0].command.as_ref().unwrap().last().map(String::as_str),
            Some("http://host:30000/svc")
        );

        let annotations = template_meta(&rs).annotations.as_ref().unwrap();
        assert!(!annotations.contains_key(setup::INIT_CONTAINERS_ANNOTATION));
        assert_eq!(
            annotations.get("prometheus.io/scrape").map(String::as_str),
            Some("true")
        );
    }

    #[test]
    fn test_legacy_annotation_encoding() {
        let rs = deployment(DeploymentArgs {
            legacy_init_annotation: true,
            ..Default::default()
        })
        .replica_set()
        .unwrap();

        assert!(pod_spec(&rs).init_containers.is_none());
        let annotations = template_meta(&rs).annotations.as_ref().unwrap();
        let steps: Vec<serde_json::Value> =
            serde_json::from_str(&annotations[setup::INIT_CONTAINERS_ANNOTATION]).unwrap();
        assert_eq!(steps[0]["name"], "install");
        assert_eq!(steps[0]["command"][3], "http://host:30000/svc");
        assert_eq!(steps[1]["name"], "configure");
    }

    #[test]
    fn test_replicas_and_metadata() {
        let rs = deployment(DeploymentArgs {
            replicas: Some(0),
            namespace: Some("staging".to_string()),
            ..Default::default()
        })
        .replica_set()
        .unwrap();

        assert_eq!(rs.metadata.name.as_deref(), Some("svc"));
        assert_eq!(rs.metadata.namespace.as_deref(), Some("staging"));
        assert_eq!(rs.spec.as_ref().unwrap().replicas, Some(0));
        let labels = rs.metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get("run").map(String::as_str), Some("svc"));
        assert_eq!(labels.get("traffic").map(String::as_str), Some("yes"));
    }

    #[test]
    fn test_service_selects_routable_pods() {
        let svc = deployment(DeploymentArgs::default()).service();
        let spec = svc.spec.as_ref().unwrap();
        assert_eq!(spec.type_.as_deref(), Some("NodePort"));
        assert_eq!(spec.selector, Some(labels::service_selector("svc")));

        let ports = spec.ports.as_ref().unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].port, HTTP_PORT);
        assert_eq!(
            ports[0].target_port,
            Some(IntOrString::String("http".to_string()))
        );
    }

    #[test]
    fn test_service_selector_matches_template() {
        let d = deployment(DeploymentArgs {
            labels: Some(r#"{"team":"x"}"#.to_string()),
            ..Default::default()
        });
        let rs = d.replica_set().unwrap();
        let template = template_meta(&rs).labels.as_ref().unwrap();
        for (k, v) in d.service().spec.unwrap().selector.unwrap() {
            assert_eq!(template.get(&k), Some(&v));
        }
    }

    #[test]
    fn test_invalid_names_rejected() {
        let config = config(DeploymentArgs::default());
        for name in ["Svc", "svc_1", "-svc", "svc-", ""] {
            let err = Deployment::from_config(name, &config).unwrap_err();
            assert!(matches!(err, DeployError::InvalidName { .. }), "{name:?}");
        }
        let long = "a".repeat(64);
        assert!(Deployment::from_config(&long, &config).is_err());
    }

    #[test]
    fn test_invalid_config_map_name_rejected() {
        let config = config(DeploymentArgs {
            config_maps: Some(r#"["Bad_Name"]"#.to_string()),
            ..Default::default()
        });
        assert!(Deployment::from_config("svc", &config).is_err());
    }

    #[test]
    fn test_reserved_pod_label_rejected() {
        let config = config(DeploymentArgs {
            labels: Some(r#"{"traffic":"no"}"#.to_string()),
            ..Default::default()
        });
        let err = Deployment::from_config("svc", &config).unwrap_err();
        assert!(matches!(err, DeployError::ReservedLabel { .. }));
    }

    #[test]
    fn test_replicas_out_of_range() {
        let config = config(DeploymentArgs {
            replicas: Some(u32::MAX),
            ..Default::default()
        });
        let err = Deployment::from_config("svc", &config).unwrap_err();
        assert!(matches!(err, DeployError::InvalidReplicas { .. }));
    }

    #[test]
    fn test_render_yaml() {
        let yaml = deployment(DeploymentArgs::default()).render().unwrap();
        let docs: Vec<&str> = yaml.split("---\n").collect();
        assert_eq!(docs.len(), 2);
        assert!(docs[0].contains("kind: ReplicaSet"));
        assert!(docs[0].contains("apiVersion: apps/v1"));
        assert!(docs[0].contains("http://host:30000/svc"));
        assert!(docs[1].contains("kind: Service"));
        assert!(docs[1].contains("NodePort"));
    }
}
