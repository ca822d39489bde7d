//! Validation errors produced while resolving a role manifest.
//!
//! Resolution never stops at the first problem: every pass appends to a
//! shared `Vec<ValidationError>` so callers see every issue in one report,
//! matching how a human would want to fix a manifest (§7, §8 invariant 5).

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Non-string template key or global template value.
    NonStringTemplate { group: Option<String>, key: String },
    /// An instance group tag is not allowed for that group's type.
    TagTypeMismatch { group: String, tag: String, group_type: String },
    /// A tag requires a companion field that is absent.
    MissingRequiredField { group: String, field: String },
    /// More than one of a mutually exclusive set of fields was set.
    MutuallyExclusiveFields { group: String, fields: Vec<String> },
    /// A numeric field that must be non-negative was negative.
    NegativeField { group: String, field: String },

    /// A job reference names a release that was never loaded.
    UnknownRelease { group: String, release: String },
    /// A job reference names a job the release does not contain.
    UnknownJob { group: String, release: String, job: String },
    /// A health probe is not allowed for this instance-group type, or is
    /// malformed for its kind.
    InvalidProbe { group: String, reason: String },

    /// A port name or numeric range violates §4.2 pass 3.
    InvalidPort { group: String, port: String, reason: String },

    /// Two providers resolve to the same alias or name.
    ProviderAliasCollision { name: String },
    /// A consumer explicitly names a provider that does not exist.
    MissingNamedProvider { group: String, job: String, name: String },
    /// A required consumer could not be resolved unambiguously.
    UnresolvableConsumer { group: String, job: String, consumer: String, reason: String },

    /// Two (protocol, port) tuples collide across a main group and its
    /// colocated containers.
    ColocatedPortCollision { group: String, protocol: String, port: u32 },
    /// A colocated-container group is not referenced by any main group.
    OrphanedColocatedGroup { group: String },
    /// An `emptyDir` volume tag mismatch between main and colocated groups.
    VolumeTagMismatch { group: String, tag: String },
    /// A main group's emptyDir volume is never referenced by a colocated
    /// group sharing its tag.
    UnreferencedVolume { group: String, volume: String },

    /// A variable's generator type is invalid, or `rsa` was used (reserved,
    /// rejected).
    InvalidVariableType { variable: String, kind: String },
    /// `options.environment` was set together with `internal`.
    InternalEnvironmentConflict { variable: String },
    /// Variables are not sorted, or two variables share a name.
    DuplicateVariableName { name: String },
    /// A `previous-names` entry collides with another variable's name or
    /// previous-names.
    PreviousNameCollision { variable: String, previous_name: String },

    /// A role/cluster-role referenced by an instance group does not exist.
    UnknownRole { group: String, role: String },
    /// A pod-security-policy referenced by a cluster-role does not exist.
    UnknownPodSecurityPolicy { cluster_role: String, psp: String },
    /// No privileged PSP could be found to satisfy a job's requirement.
    NoPrivilegedPspAvailable { group: String },

    /// A script referenced by a template does not exist under `scripts/`.
    MissingScript { path: String },
    /// A script under `scripts/` is never referenced by any template.
    UnreferencedScript { path: String },

    /// An invariant that resolution itself should guarantee was violated;
    /// reaching this means a pass has a bug, not that the input is bad.
    Internal { reason: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonStringTemplate { group, key } => match group {
                Some(g) => write!(f, "instance_groups[{g}].configuration.templates has a non-string key or value at '{key}'"),
                None => write!(f, "configuration.templates has a non-string key or value at '{key}'"),
            },
            Self::TagTypeMismatch { group, tag, group_type } => {
                write!(f, "instance_groups[{group}]: tag '{tag}' is not allowed for type '{group_type}'")
            }
            Self::MissingRequiredField { group, field } => {
                write!(f, "instance_groups[{group}].{field}: Required value")
            }
            Self::MutuallyExclusiveFields { group, fields } => {
                write!(f, "instance_groups[{group}]: fields {} are mutually exclusive", fields.join(", "))
            }
            Self::NegativeField { group, field } => {
                write!(f, "instance_groups[{group}].{field} must be non-negative")
            }
            Self::UnknownRelease { group, release } => {
                write!(f, "instance_groups[{group}] references unknown release '{release}'")
            }
            Self::UnknownJob { group, release, job } => {
                write!(f, "instance_groups[{group}] references job '{job}' not found in release '{release}'")
            }
            Self::InvalidProbe { group, reason } => write!(f, "instance_groups[{group}]: {reason}"),
            Self::InvalidPort { group, port, reason } => {
                write!(f, "instance_groups[{group}].run.exposed-ports[{port}]: {reason}")
            }
            Self::ProviderAliasCollision { name } => write!(f, "link provider alias '{name}' is declared more than once"),
            Self::MissingNamedProvider { group, job, name } => {
                write!(f, "instance_groups[{group}].jobs[{job}]: no provider named '{name}'")
            }
            Self::UnresolvableConsumer { group, job, consumer, reason } => {
                write!(f, "instance_groups[{group}].jobs[{job}].consumes[{consumer}]: {reason}")
            }
            Self::ColocatedPortCollision { group, protocol, port } => {
                write!(f, "instance_groups[{group}]: port {port}/{protocol} is exposed by more than one colocated job")
            }
            Self::OrphanedColocatedGroup { group } => {
                write!(f, "instance_groups[{group}] is type colocated-container but referenced by no main group")
            }
            Self::VolumeTagMismatch { group, tag } => {
                write!(f, "instance_groups[{group}]: emptyDir path for tag '{tag}' disagrees with the main group")
            }
            Self::UnreferencedVolume { group, volume } => {
                write!(f, "instance_groups[{group}]: emptyDir volume '{volume}' is not shared by any colocated group")
            }
            Self::InvalidVariableType { variable, kind } => {
                write!(f, "variables[{variable}]: type '{kind}' is invalid")
            }
            Self::InternalEnvironmentConflict { variable } => {
                write!(f, "variables[{variable}]: options.environment cannot be combined with options.internal")
            }
            Self::DuplicateVariableName { name } => write!(f, "variable '{name}' is declared more than once, or variables are not sorted"),
            Self::PreviousNameCollision { variable, previous_name } => {
                write!(f, "variables[{variable}].previous-names contains '{previous_name}', which collides with another variable")
            }
            Self::UnknownRole { group, role } => write!(f, "instance_groups[{group}] references unknown role/cluster-role '{role}'"),
            Self::UnknownPodSecurityPolicy { cluster_role, psp } => {
                write!(f, "cluster-role '{cluster_role}' references unknown pod-security-policy '{psp}'")
            }
            Self::NoPrivilegedPspAvailable { group } => {
                write!(f, "instance_groups[{group}] requires a privileged pod-security-policy but none is declared")
            }
            Self::MissingScript { path } => write!(f, "script '{path}' is referenced but does not exist under scripts/"),
            Self::UnreferencedScript { path } => write!(f, "script '{path}' exists under scripts/ but is never referenced"),
            Self::Internal { reason } => write!(f, "internal error: {reason}"),
        }
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationErrors = Vec<ValidationError>;
