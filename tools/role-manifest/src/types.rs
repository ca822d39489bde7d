//! The resolved role-manifest data model. Nothing here is mutated once
//! [`crate::resolve`] returns it; a resolved `RoleManifest` is a value, not a
//! handle into some larger mutable graph.

use release::Job;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GroupType {
    Bosh,
    BoshTask,
    ColocatedContainer,
}

impl GroupType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bosh => "bosh",
            Self::BoshTask => "bosh-task",
            Self::ColocatedContainer => "colocated-container",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureGate {
    Default(bool),
    If(String),
    Unless(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthProbe {
    /// `bosh-task` groups allow no probes at all.
    None,
    Command(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Probes {
    pub liveness: Option<HealthProbe>,
    pub readiness: Option<HealthProbe>,
    pub active_passive: Option<HealthProbe>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub name: String,
    pub protocol: Protocol,
    pub internal_start: u16,
    pub internal_end: u16,
    pub external: Option<u16>,
    pub count: u32,
    pub user_configurable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub tag: String,
    pub path: String,
    pub kind: VolumeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeKind {
    EmptyDir,
    Persistent,
    Host,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSpec {
    pub memory: Option<u64>,
    pub virtual_cpus: Option<u64>,
    pub ports: Vec<Port>,
    pub volumes: Vec<Volume>,
    pub probes: Probes,
    pub service_account: Option<String>,
    pub scheduling_hints: BTreeMap<String, String>,
}

/// A resolved link a job's spec declared it provides, after any
/// role-manifest alias/export override has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProvides {
    pub name: String,
    pub alias: Option<String>,
    pub link_type: String,
    pub exported_properties: Vec<String>,
}

/// A resolved link a job consumes: `Some` once pass 4 has bound it to a
/// provider, `None` if it was optional and left unresolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConsumes {
    pub name: String,
    pub link_type: String,
    pub optional: bool,
    /// The role manifest's `consumes.<name>.from` override, if any, naming a
    /// provider alias to bind to regardless of type/name matching.
    pub explicit_from: Option<String>,
    pub resolved: Option<ProviderHandle>,
}

/// Identifies the (instance-group, job) pair that provides a link, so a
/// consumer can be traced back to its provider without re-running pass 4.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderHandle {
    pub group: String,
    pub job: String,
    pub name: String,
}

/// A reverse record on the provider side: who ended up consuming this link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerHandle {
    pub group: String,
    pub job: String,
    pub consumer_name: String,
}

#[derive(Debug, Clone)]
pub struct JobReference {
    pub release: String,
    pub job_name: String,
    pub job: Job,
    pub properties: BTreeMap<String, serde_yaml::Value>,
    pub provides: Vec<ResolvedProvides>,
    pub consumes: Vec<ResolvedConsumes>,
    pub consumed_by: Vec<ConsumerHandle>,
}

#[derive(Debug, Clone)]
pub struct InstanceGroup {
    pub name: String,
    pub group_type: GroupType,
    pub jobs: Vec<JobReference>,
    pub run: RunSpec,
    pub colocated_groups: Vec<String>,
    pub tags: Vec<String>,
    pub feature_gate: Option<FeatureGate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableGenerator {
    None,
    Certificate,
    Password,
    Ssh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableVisibility {
    User,
    Environment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub generator: VariableGenerator,
    pub visibility: VariableVisibility,
    pub internal: bool,
    pub description: Option<String>,
    pub previous_names: Vec<String>,
    pub secret: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PodSecurityPolicy {
    pub name: String,
    pub privileged: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ClusterRole {
    pub name: String,
    pub pod_security_policies: Vec<String>,
    /// Names of service accounts that reference this cluster-role
    /// (`ClusterRoleUsedBy`, §4.2 pass 7).
    pub used_by: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Role {
    pub name: String,
    /// Names of service accounts that reference this role (`RoleUsedBy`,
    /// §4.2 pass 7).
    pub used_by: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ServiceAccount {
    pub name: String,
    pub roles: Vec<String>,
    pub cluster_roles: Vec<String>,
    /// Names of instance groups whose `run.service-account` names this
    /// account (`UsedBy`, §4.2 pass 7).
    pub used_by: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Authorization {
    pub accounts: BTreeMap<String, ServiceAccount>,
    pub roles: BTreeMap<String, Role>,
    pub cluster_roles: BTreeMap<String, ClusterRole>,
    pub pod_security_policies: BTreeMap<String, PodSecurityPolicy>,
}

#[derive(Debug, Clone, Default)]
pub struct Configuration {
    pub templates: BTreeMap<String, String>,
    pub authorization: Authorization,
}

#[derive(Debug, Clone)]
pub struct RoleManifest {
    pub configuration: Configuration,
    pub variables: Vec<Variable>,
    pub instance_groups: Vec<InstanceGroup>,
    pub features: Vec<String>,
}

impl RoleManifest {
    pub fn instance_group(&self, name: &str) -> Option<&InstanceGroup> {
        self.instance_groups.iter().find(|g| g.name == name)
    }

    pub fn main_groups(&self) -> impl Iterator<Item = &InstanceGroup> {
        self.instance_groups
            .iter()
            .filter(|g| g.group_type != GroupType::ColocatedContainer)
    }
}
