//! Deserialization shapes for role-manifest YAML, kept separate from the
//! resolved [`crate::types`] so the resolver can distinguish "what the YAML
//! said" from "what we decided it means."

use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
pub struct RawManifest {
    #[serde(default)]
    pub configuration: RawConfiguration,
    #[serde(default)]
    pub variables: Vec<RawVariable>,
    #[serde(default)]
    pub instance_groups: Vec<RawInstanceGroup>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub releases: Vec<RawReleaseRef>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RawConfiguration {
    #[serde(default)]
    pub templates: BTreeMap<Value, Value>,
    #[serde(default)]
    pub authorization: RawAuthorization,
}

#[derive(Debug, Deserialize, Default)]
pub struct RawAuthorization {
    #[serde(default)]
    pub accounts: BTreeMap<String, RawServiceAccount>,
    #[serde(default)]
    pub roles: BTreeMap<String, RawRole>,
    #[serde(rename = "cluster-roles", default)]
    pub cluster_roles: BTreeMap<String, RawClusterRole>,
    #[serde(rename = "pod-security-policies", default)]
    pub pod_security_policies: BTreeMap<String, RawPodSecurityPolicy>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RawServiceAccount {
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(rename = "cluster-roles", default)]
    pub cluster_roles: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RawRole {}

#[derive(Debug, Deserialize, Default)]
pub struct RawClusterRole {
    #[serde(rename = "pod-security-policies", default)]
    pub pod_security_policies: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RawPodSecurityPolicy {
    #[serde(default)]
    pub privileged: bool,
}

#[derive(Debug, Deserialize)]
pub struct RawReleaseRef {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawVariable {
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub options: RawVariableOptions,
}

#[derive(Debug, Deserialize, Default)]
pub struct RawVariableOptions {
    #[serde(default, rename = "type")]
    pub visibility: Option<String>,
    #[serde(default)]
    pub internal: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "previous-names", default)]
    pub previous_names: Vec<String>,
    #[serde(default)]
    pub secret: bool,
}

#[derive(Debug, Deserialize)]
pub struct RawInstanceGroup {
    pub name: String,
    #[serde(default, rename = "type")]
    pub group_type: Option<String>,
    #[serde(default)]
    pub jobs: Vec<RawJobReference>,
    #[serde(default)]
    pub run: RawRunSpec,
    #[serde(rename = "colocated-containers", default)]
    pub colocated_containers: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(rename = "default-feature", default)]
    pub default_feature: Option<bool>,
    #[serde(rename = "if-feature", default)]
    pub if_feature: Option<String>,
    #[serde(rename = "unless-feature", default)]
    pub unless_feature: Option<String>,
    #[serde(default)]
    pub configuration: RawGroupConfiguration,
}

#[derive(Debug, Deserialize, Default)]
pub struct RawGroupConfiguration {
    #[serde(default)]
    pub templates: BTreeMap<Value, Value>,
    #[serde(default)]
    pub global: bool,
}

#[derive(Debug, Deserialize)]
pub struct RawJobReference {
    pub name: String,
    pub release_name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    #[serde(default)]
    pub provides: BTreeMap<String, RawProvidesOverride>,
    #[serde(default)]
    pub consumes: BTreeMap<String, RawConsumesOverride>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RawProvidesOverride {
    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RawConsumesOverride {
    #[serde(default)]
    pub from: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RawRunSpec {
    #[serde(default)]
    pub memory: Option<i64>,
    #[serde(rename = "virtual-cpus", default)]
    pub virtual_cpus: Option<i64>,
    #[serde(rename = "exposed-ports", default)]
    pub exposed_ports: Vec<RawPort>,
    #[serde(default)]
    pub volumes: Vec<RawVolume>,
    #[serde(default)]
    pub healthcheck: RawHealthcheck,
    #[serde(rename = "active-passive-probe", default)]
    pub active_passive_probe: Option<RawProbe>,
    #[serde(rename = "service-account", default)]
    pub service_account: Option<String>,
    #[serde(rename = "scheduling-hints", default)]
    pub scheduling_hints: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RawHealthcheck {
    #[serde(default)]
    pub liveness: Option<RawProbe>,
    #[serde(default)]
    pub readiness: Option<RawProbe>,
}

#[derive(Debug, Deserialize)]
pub struct RawProbe {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub port: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawPort {
    pub name: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub internal: String,
    #[serde(default)]
    pub external: Option<u16>,
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(rename = "user-configurable", default)]
    pub user_configurable: bool,
}

fn default_protocol() -> String {
    "TCP".to_string()
}

#[derive(Debug, Deserialize)]
pub struct RawVolume {
    pub tag: String,
    pub path: String,
    #[serde(default = "default_volume_type")]
    #[serde(rename = "type")]
    pub kind: String,
}

fn default_volume_type() -> String {
    "emptyDir".to_string()
}
