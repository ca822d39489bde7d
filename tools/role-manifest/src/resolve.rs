//! The eight-pass role-manifest resolver (§4.2). Each pass appends to a
//! shared error list rather than bailing out, so `resolve()` reports every
//! problem it can find in one call.

use crate::error::{ValidationError, ValidationErrors};
use crate::raw::*;
use crate::types::*;
use release::Release;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

pub struct ResolveOptions<'a> {
    /// Root under which `scripts/` is expected to live, for pass 8. `None`
    /// skips script-existence checks entirely (used by callers that only
    /// want link/port/variable validation, e.g. unit tests).
    pub scripts_root: Option<&'a Path>,
    pub allow_missing_scripts: bool,
}

impl Default for ResolveOptions<'_> {
    fn default() -> Self {
        Self { scripts_root: None, allow_missing_scripts: false }
    }
}

pub fn resolve(raw: RawManifest, releases: &[Release], opts: &ResolveOptions) -> Result<RoleManifest, ValidationErrors> {
    let mut errors = Vec::new();

    let mut configuration = pass1_structural(&raw, &mut errors);
    let mut groups = pass1_groups(&raw, &mut errors);
    pass2_job_binding(&raw, &mut groups, releases, &mut errors);
    pass3_ports(&raw, &mut groups, &mut errors);
    pass4_link_resolution(&mut groups, &mut errors);
    pass5_colocated_containers(&groups, &mut errors);
    let variables = pass6_variables(&raw, &mut errors);
    pass7_rbac(&mut groups, &mut configuration.authorization, &mut errors);
    if let Some(root) = opts.scripts_root {
        pass8_templates_and_scripts(&raw, &groups, root, opts.allow_missing_scripts, &mut errors);
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(RoleManifest {
        configuration,
        variables,
        instance_groups: groups,
        features: raw.features,
    })
}

// ---- Pass 1: structural ----------------------------------------------------

const TAG_TYPE_RULES: &[(&str, &[&str])] = &[
    ("active-passive", &["bosh"]),
    ("sequential-startup", &["bosh"]),
    ("stop-on-failure", &["bosh-task"]),
    ("istio-managed", &["bosh"]),
];

fn pass1_structural(raw: &RawManifest, errors: &mut ValidationErrors) -> Configuration {
    let templates = stringify_template_map(None, &raw.configuration.templates, errors);
    let authorization = Authorization {
        accounts: raw
            .configuration
            .authorization
            .accounts
            .iter()
            .map(|(name, a)| {
                (
                    name.clone(),
                    ServiceAccount {
                        name: name.clone(),
                        roles: a.roles.clone(),
                        cluster_roles: a.cluster_roles.clone(),
                        used_by: Vec::new(),
                    },
                )
            })
            .collect(),
        roles: raw
            .configuration
            .authorization
            .roles
            .keys()
            .map(|name| (name.clone(), Role { name: name.clone(), used_by: Vec::new() }))
            .collect(),
        cluster_roles: raw
            .configuration
            .authorization
            .cluster_roles
            .iter()
            .map(|(name, c)| {
                (
                    name.clone(),
                    ClusterRole { name: name.clone(), pod_security_policies: c.pod_security_policies.clone(), used_by: Vec::new() },
                )
            })
            .collect(),
        pod_security_policies: raw
            .configuration
            .authorization
            .pod_security_policies
            .iter()
            .map(|(name, p)| (name.clone(), PodSecurityPolicy { name: name.clone(), privileged: p.privileged }))
            .collect(),
    };
    Configuration { templates, authorization }
}

fn stringify_template_map(
    group: Option<&str>,
    raw: &BTreeMap<serde_yaml::Value, serde_yaml::Value>,
    errors: &mut ValidationErrors,
) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (k, v) in raw {
        let key = match k.as_str() {
            Some(s) => s.to_string(),
            None => {
                errors.push(ValidationError::NonStringTemplate { group: group.map(str::to_owned), key: format!("{k:?}") });
                continue;
            }
        };
        match v.as_str() {
            Some(s) => {
                out.insert(key, s.to_string());
            }
            None => errors.push(ValidationError::NonStringTemplate { group: group.map(str::to_owned), key }),
        }
    }
    out
}

fn pass1_groups(raw: &RawManifest, errors: &mut ValidationErrors) -> Vec<InstanceGroup> {
    raw.instance_groups
        .iter()
        .map(|g| {
            let group_type = match g.group_type.as_deref() {
                None | Some("bosh") => GroupType::Bosh,
                Some("bosh-task") => GroupType::BoshTask,
                Some("colocated-container") => GroupType::ColocatedContainer,
                Some(other) => {
                    errors.push(ValidationError::TagTypeMismatch {
                        group: g.name.clone(),
                        tag: other.to_string(),
                        group_type: "unknown".to_string(),
                    });
                    GroupType::Bosh
                }
            };

            for tag in &g.tags {
                if let Some((_, allowed)) = TAG_TYPE_RULES.iter().find(|(t, _)| t == tag) {
                    if !allowed.contains(&group_type.as_str()) {
                        errors.push(ValidationError::TagTypeMismatch {
                            group: g.name.clone(),
                            tag: tag.clone(),
                            group_type: group_type.as_str().to_string(),
                        });
                    }
                    if *tag == "active-passive" && g.run.active_passive_probe.is_none() {
                        errors.push(ValidationError::MissingRequiredField {
                            group: g.name.clone(),
                            field: "run.active-passive-probe".to_string(),
                        });
                    }
                }
            }

            let feature_fields: Vec<&str> = [
                g.default_feature.is_some().then_some("default-feature"),
                g.if_feature.is_some().then_some("if-feature"),
                g.unless_feature.is_some().then_some("unless-feature"),
            ]
            .into_iter()
            .flatten()
            .collect();
            if feature_fields.len() > 1 {
                errors.push(ValidationError::MutuallyExclusiveFields {
                    group: g.name.clone(),
                    fields: feature_fields.iter().map(|s| s.to_string()).collect(),
                });
            }
            let feature_gate = if let Some(d) = g.default_feature {
                Some(FeatureGate::Default(d))
            } else if let Some(f) = &g.if_feature {
                Some(FeatureGate::If(f.clone()))
            } else {
                g.unless_feature.clone().map(FeatureGate::Unless)
            };

            if let Some(m) = g.run.memory {
                if m < 0 {
                    errors.push(ValidationError::NegativeField { group: g.name.clone(), field: "run.memory".to_string() });
                }
            }
            if let Some(c) = g.run.virtual_cpus {
                if c < 0 {
                    errors.push(ValidationError::NegativeField { group: g.name.clone(), field: "run.virtual-cpus".to_string() });
                }
            }

            InstanceGroup {
                name: g.name.clone(),
                group_type,
                jobs: Vec::new(),
                run: RunSpec {
                    memory: g.run.memory.map(|m| m.max(0) as u64),
                    virtual_cpus: g.run.virtual_cpus.map(|c| c.max(0) as u64),
                    ports: Vec::new(),
                    volumes: g
                        .run
                        .volumes
                        .iter()
                        .map(|v| Volume {
                            tag: v.tag.clone(),
                            path: v.path.clone(),
                            kind: match v.kind.as_str() {
                                "persistent" => VolumeKind::Persistent,
                                "host" => VolumeKind::Host,
                                _ => VolumeKind::EmptyDir,
                            },
                        })
                        .collect(),
                    probes: Probes::default(),
                    service_account: g.run.service_account.clone(),
                    scheduling_hints: g.run.scheduling_hints.clone(),
                },
                colocated_groups: g.colocated_containers.clone(),
                tags: g.tags.clone(),
                feature_gate,
            }
        })
        .collect()
}

// ---- Pass 2: job binding ----------------------------------------------------

fn pass2_job_binding(raw: &RawManifest, groups: &mut [InstanceGroup], releases: &[Release], errors: &mut ValidationErrors) {
    for (raw_group, group) in raw.instance_groups.iter().zip(groups.iter_mut()) {
        for raw_job in &raw_group.jobs {
            let Some(release) = releases.iter().find(|r| r.name == raw_job.release_name) else {
                errors.push(ValidationError::UnknownRelease { group: group.name.clone(), release: raw_job.release_name.clone() });
                continue;
            };
            let Some(job) = release.job(&raw_job.name) else {
                errors.push(ValidationError::UnknownJob {
                    group: group.name.clone(),
                    release: release.name.clone(),
                    job: raw_job.name.clone(),
                });
                continue;
            };

            let provides = job
                .provides
                .iter()
                .map(|p| {
                    let alias = raw_job.provides.get(&p.name).and_then(|o| o.alias.clone());
                    ResolvedProvides {
                        name: p.name.clone(),
                        alias,
                        link_type: p.link_type.clone(),
                        exported_properties: p.properties.clone(),
                    }
                })
                .collect();
            let consumes = job
                .consumes
                .iter()
                .map(|c| ResolvedConsumes {
                    name: c.name.clone(),
                    link_type: c.link_type.clone(),
                    optional: c.optional,
                    explicit_from: raw_job.consumes.get(&c.name).and_then(|o| o.from.clone()),
                    resolved: None,
                })
                .collect();

            group.jobs.push(JobReference {
                release: release.name.clone(),
                job_name: job.name.clone(),
                job: job.clone(),
                properties: raw_job.properties.clone(),
                provides,
                consumes,
                consumed_by: Vec::new(),
            });
        }

        validate_probes(raw_group, group, errors);
    }
}

fn validate_probes(raw_group: &RawInstanceGroup, group: &InstanceGroup, errors: &mut ValidationErrors) {
    if group.group_type == GroupType::BoshTask {
        if raw_group.run.healthcheck.liveness.is_some() || raw_group.run.healthcheck.readiness.is_some() {
            errors.push(ValidationError::InvalidProbe { group: group.name.clone(), reason: "bosh-task groups allow no health probes".to_string() });
        }
        return;
    }

    for (kind, probe) in [("liveness", &raw_group.run.healthcheck.liveness), ("readiness", &raw_group.run.healthcheck.readiness)] {
        let Some(probe) = probe else { continue };
        let set_fields = [probe.url.is_some(), probe.command.is_some(), probe.port.is_some()].iter().filter(|b| **b).count();
        if set_fields > 1 {
            errors.push(ValidationError::InvalidProbe {
                group: group.name.clone(),
                reason: format!("{kind} probe may set at most one of {{url, command, port}}"),
            });
            continue;
        }
        match &probe.command {
            None => errors.push(ValidationError::InvalidProbe { group: group.name.clone(), reason: format!("{kind} probe must use `command`") }),
            Some(cmd) if kind == "liveness" && cmd.len() != 1 => {
                errors.push(ValidationError::InvalidProbe { group: group.name.clone(), reason: "liveness command must have exactly one element".to_string() })
            }
            Some(cmd) if cmd.is_empty() => {
                errors.push(ValidationError::InvalidProbe { group: group.name.clone(), reason: format!("{kind} command must not be empty") })
            }
            Some(_) => {}
        }
    }
}

// ---- Pass 3: ports ----------------------------------------------------------

fn pass3_ports(raw: &RawManifest, groups: &mut [InstanceGroup], errors: &mut ValidationErrors) {
    for (raw_group, group) in raw.instance_groups.iter().zip(groups.iter_mut()) {
        group.run.ports = validate_and_collect_ports(raw_group, errors);
    }
}

fn validate_and_collect_ports(raw_group: &RawInstanceGroup, errors: &mut ValidationErrors) -> Vec<Port> {
    let mut ports = Vec::new();
    for p in &raw_group.run.exposed_ports {
        let max_len = if p.user_configurable { 9 } else { 15 };
        if p.name.len() > max_len || p.name != p.name.to_lowercase() || p.name.contains('_') {
            errors.push(ValidationError::InvalidPort {
                group: raw_group.name.clone(),
                port: p.name.clone(),
                reason: format!("port names must be lowercase, hyphen-separated, and at most {max_len} characters"),
            });
            continue;
        }
        let protocol = match p.protocol.as_str() {
            "TCP" => Protocol::Tcp,
            "UDP" => Protocol::Udp,
            other => {
                errors.push(ValidationError::InvalidPort { group: raw_group.name.clone(), port: p.name.clone(), reason: format!("unknown protocol '{other}'") });
                continue;
            }
        };
        let (start, end) = match parse_internal_range(&p.internal) {
            Some(range) => range,
            None => {
                errors.push(ValidationError::InvalidPort { group: raw_group.name.clone(), port: p.name.clone(), reason: format!("invalid internal port syntax '{}'", p.internal) });
                continue;
            }
        };
        let expected_count = (end - start + 1) as u32;
        let count = p.count.unwrap_or(expected_count);
        if end > start && count != expected_count {
            errors.push(ValidationError::InvalidPort {
                group: raw_group.name.clone(),
                port: p.name.clone(),
                reason: format!("count must equal {expected_count} for range {start}-{end}"),
            });
            continue;
        }
        if let Some(external) = p.external {
            if external == 0 {
                errors.push(ValidationError::InvalidPort { group: raw_group.name.clone(), port: p.name.clone(), reason: "external port must be in [1, 65535]".to_string() });
                continue;
            }
        }
        ports.push(Port {
            name: p.name.clone(),
            protocol,
            internal_start: start,
            internal_end: end,
            external: p.external,
            count,
            user_configurable: p.user_configurable,
        });
    }
    ports
}

fn parse_internal_range(s: &str) -> Option<(u16, u16)> {
    if let Some((lo, hi)) = s.split_once('-') {
        let lo: u16 = lo.parse().ok()?;
        let hi: u16 = hi.parse().ok()?;
        if lo >= 1 && lo <= hi {
            Some((lo, hi))
        } else {
            None
        }
    } else {
        let n: u16 = s.parse().ok()?;
        (n >= 1).then_some((n, n))
    }
}

// ---- Pass 4: link resolution ------------------------------------------------

#[derive(Clone)]
struct ProviderEntry {
    group: String,
    job: String,
    name: String,
    link_type: String,
}

fn pass4_link_resolution(groups: &mut [InstanceGroup], errors: &mut ValidationErrors) {
    let mut by_name: HashMap<String, ProviderEntry> = HashMap::new();
    let mut by_type: HashMap<String, Vec<ProviderEntry>> = HashMap::new();

    for group in groups.iter() {
        for job in &group.jobs {
            for provides in &job.provides {
                let key = provides.alias.clone().unwrap_or_else(|| provides.name.clone());
                let entry = ProviderEntry { group: group.name.clone(), job: job.job_name.clone(), name: provides.name.clone(), link_type: provides.link_type.clone() };
                if by_name.insert(key.clone(), entry.clone()).is_some() {
                    errors.push(ValidationError::ProviderAliasCollision { name: key });
                }
                by_type.entry(provides.link_type.clone()).or_default().push(entry);
            }
        }
    }

    let mut reverse: Vec<(ProviderEntry, ConsumerHandle)> = Vec::new();

    for group in groups.iter_mut() {
        for job in &mut group.jobs {
            for consumes in &mut job.consumes {
                let found = if let Some(name) = consumes.explicit_from.as_deref() {
                    match by_name.get(name) {
                        Some(entry) => Some(entry.clone()),
                        None => {
                            errors.push(ValidationError::MissingNamedProvider {
                                group: group.name.clone(),
                                job: job.job_name.clone(),
                                name: name.to_string(),
                            });
                            None
                        }
                    }
                } else if by_name.contains_key(&consumes.name) {
                    by_name.get(&consumes.name).cloned()
                } else if let Some(candidates) = by_type.get(&consumes.link_type) {
                    if candidates.len() == 1 {
                        Some(candidates[0].clone())
                    } else {
                        None
                    }
                } else {
                    None
                };

                match found {
                    Some(provider) => {
                        consumes.resolved = Some(ProviderHandle { group: provider.group.clone(), job: provider.job.clone(), name: provider.name.clone() });
                        reverse.push((
                            provider,
                            ConsumerHandle { group: group.name.clone(), job: job.job_name.clone(), consumer_name: consumes.name.clone() },
                        ));
                    }
                    None if consumes.explicit_from.is_some() => {
                        // Already reported as MissingNamedProvider above.
                    }
                    None if consumes.optional => {}
                    None => {
                        errors.push(ValidationError::UnresolvableConsumer {
                            group: group.name.clone(),
                            job: job.job_name.clone(),
                            consumer: consumes.name.clone(),
                            reason: "no unique provider found by name or type".to_string(),
                        });
                    }
                }
            }
        }
    }

    for (provider, handle) in reverse {
        let Some(target_group) = groups.iter_mut().find(|g| g.name == provider.group) else {
            errors.push(ValidationError::Internal { reason: format!("provider group '{}' vanished after resolution", provider.group) });
            continue;
        };
        let Some(target_job) = target_group.jobs.iter_mut().find(|j| j.job_name == provider.job) else {
            errors.push(ValidationError::Internal { reason: format!("provider job '{}' vanished after resolution", provider.job) });
            continue;
        };
        target_job.consumed_by.push(handle);
    }
}

// ---- Pass 5: colocated containers ------------------------------------------

fn pass5_colocated_containers(groups: &[InstanceGroup], errors: &mut ValidationErrors) {
    let mut referenced: HashSet<&str> = HashSet::new();
    for group in groups {
        for colocated in &group.colocated_groups {
            referenced.insert(colocated.as_str());
        }
    }
    for group in groups {
        if group.group_type == GroupType::ColocatedContainer && !referenced.contains(group.name.as_str()) {
            errors.push(ValidationError::OrphanedColocatedGroup { group: group.name.clone() });
        }
    }

    for main in groups.iter().filter(|g| g.group_type != GroupType::ColocatedContainer) {
        let mut seen_ports: HashSet<(String, u32)> = HashSet::new();
        let mut members: Vec<&InstanceGroup> = vec![main];
        members.extend(main.colocated_groups.iter().filter_map(|name| groups.iter().find(|g| &g.name == name)));

        for member in &members {
            for port in &member.run.ports {
                let protocol = match port.protocol {
                    Protocol::Tcp => "tcp",
                    Protocol::Udp => "udp",
                };
                for n in port.internal_start..=port.internal_end {
                    let key = (protocol.to_string(), n as u32);
                    if !seen_ports.insert(key) {
                        errors.push(ValidationError::ColocatedPortCollision { group: main.name.clone(), protocol: protocol.to_string(), port: n as u32 });
                    }
                }
            }
        }

        for main_volume in main.run.volumes.iter().filter(|v| v.kind == VolumeKind::EmptyDir) {
            let mut referenced_by_colocated = false;
            for colocated in main.colocated_groups.iter().filter_map(|name| groups.iter().find(|g| &g.name == name)) {
                if let Some(shared) = colocated.run.volumes.iter().find(|v| v.tag == main_volume.tag) {
                    referenced_by_colocated = true;
                    if shared.path != main_volume.path {
                        errors.push(ValidationError::VolumeTagMismatch { group: colocated.name.clone(), tag: main_volume.tag.clone() });
                    }
                }
            }
            if !main.colocated_groups.is_empty() && !referenced_by_colocated {
                errors.push(ValidationError::UnreferencedVolume { group: main.name.clone(), volume: main_volume.tag.clone() });
            }
        }
    }
}

// ---- Pass 6: variables ------------------------------------------------------

fn pass6_variables(raw: &RawManifest, errors: &mut ValidationErrors) -> Vec<Variable> {
    let mut variables: Vec<Variable> = Vec::with_capacity(raw.variables.len());
    let mut all_names: HashSet<String> = HashSet::new();

    for v in &raw.variables {
        let generator = match v.kind.as_str() {
            "" => VariableGenerator::None,
            "certificate" => VariableGenerator::Certificate,
            "password" => VariableGenerator::Password,
            "ssh" => VariableGenerator::Ssh,
            other => {
                errors.push(ValidationError::InvalidVariableType { variable: v.name.clone(), kind: other.to_string() });
                VariableGenerator::None
            }
        };
        let visibility = match v.options.visibility.as_deref().unwrap_or("user") {
            "environment" => VariableVisibility::Environment,
            _ => VariableVisibility::User,
        };
        if visibility == VariableVisibility::Environment && v.options.internal {
            errors.push(ValidationError::InternalEnvironmentConflict { variable: v.name.clone() });
        }
        if !all_names.insert(v.name.clone()) {
            errors.push(ValidationError::DuplicateVariableName { name: v.name.clone() });
        }
        variables.push(Variable {
            name: v.name.clone(),
            generator,
            visibility,
            internal: v.options.internal,
            description: v.options.description.clone(),
            previous_names: v.options.previous_names.clone(),
            secret: v.options.secret,
        });
    }

    if !variables.windows(2).all(|w| w[0].name <= w[1].name) {
        errors.push(ValidationError::Internal { reason: "variables must be declared in sorted order".to_string() });
    }

    for v in &variables {
        for previous in &v.previous_names {
            if all_names.contains(previous) {
                errors.push(ValidationError::PreviousNameCollision { variable: v.name.clone(), previous_name: previous.clone() });
            }
            for other in &variables {
                if other.name != v.name && other.previous_names.contains(previous) {
                    errors.push(ValidationError::PreviousNameCollision { variable: v.name.clone(), previous_name: previous.clone() });
                }
            }
        }
    }

    variables
}

// ---- Pass 7: RBAC / PSP -----------------------------------------------------

fn pass7_rbac(groups: &mut [InstanceGroup], auth: &mut Authorization, errors: &mut ValidationErrors) {
    for group in groups.iter() {
        if let Some(account) = &group.run.service_account {
            if !auth.accounts.contains_key(account) {
                errors.push(ValidationError::UnknownRole { group: group.name.clone(), role: account.clone() });
            }
        }
    }

    let account_names: Vec<String> = auth.accounts.keys().cloned().collect();
    for account_name in &account_names {
        let (roles, cluster_roles) = {
            let account = &auth.accounts[account_name];
            (account.roles.clone(), account.cluster_roles.clone())
        };
        for role in &roles {
            match auth.roles.get_mut(role) {
                Some(role) => role.used_by.push(account_name.clone()),
                None => errors.push(ValidationError::UnknownRole { group: account_name.clone(), role: role.clone() }),
            }
        }
        for cluster_role in &cluster_roles {
            match auth.cluster_roles.get_mut(cluster_role) {
                Some(cluster_role) => cluster_role.used_by.push(account_name.clone()),
                None => errors.push(ValidationError::UnknownRole { group: account_name.clone(), role: cluster_role.clone() }),
            }
        }
    }

    let cluster_role_names: Vec<String> = auth.cluster_roles.keys().cloned().collect();
    for cluster_role_name in &cluster_role_names {
        let psps = auth.cluster_roles[cluster_role_name].pod_security_policies.clone();
        for psp in &psps {
            if !auth.pod_security_policies.contains_key(psp) {
                errors.push(ValidationError::UnknownPodSecurityPolicy { cluster_role: cluster_role_name.clone(), psp: psp.clone() });
            }
        }
    }

    for group in groups.iter() {
        if let Some(account) = group.run.service_account.as_ref().and_then(|name| auth.accounts.get_mut(name)) {
            account.used_by.push(group.name.clone());
        }
    }

    // Groups whose jobs require a privileged PSP get their service account
    // rewritten to a clone carrying a `default-privileged` cluster-role,
    // unless the current account already satisfies the requirement.
    for group in groups.iter_mut() {
        let needs_privileged = group.jobs.iter().any(|j| j.job.requires_privileged_psp);
        if !needs_privileged || account_satisfies_privileged(auth, group.run.service_account.as_deref()) {
            continue;
        }

        let psp_name = match pick_privileged_psp(auth) {
            Some(name) => name,
            None => {
                errors.push(ValidationError::NoPrivilegedPspAvailable { group: group.name.clone() });
                continue;
            }
        };

        let cluster_role_name = "default-privileged".to_string();
        auth.cluster_roles.entry(cluster_role_name.clone()).or_insert_with(|| ClusterRole {
            name: cluster_role_name.clone(),
            pod_security_policies: vec![psp_name],
            used_by: Vec::new(),
        });

        let base_account = group.run.service_account.clone().unwrap_or_else(|| "default".to_string());
        let clone_name = format!("{base_account}-privileged");

        if !auth.accounts.contains_key(&clone_name) {
            let mut clone = auth.accounts.get(&base_account).cloned().unwrap_or_default();
            clone.name = clone_name.clone();
            clone.used_by = Vec::new();
            if !clone.cluster_roles.contains(&cluster_role_name) {
                clone.cluster_roles.push(cluster_role_name.clone());
            }
            auth.accounts.insert(clone_name.clone(), clone);
        } else if let Some(clone) = auth.accounts.get_mut(&clone_name) {
            if !clone.cluster_roles.contains(&cluster_role_name) {
                clone.cluster_roles.push(cluster_role_name.clone());
            }
        }

        if let Some(cluster_role) = auth.cluster_roles.get_mut(&cluster_role_name) {
            if !cluster_role.used_by.contains(&clone_name) {
                cluster_role.used_by.push(clone_name.clone());
            }
        }

        if let Some(old_account) = group.run.service_account.as_ref().and_then(|name| auth.accounts.get_mut(name)) {
            old_account.used_by.retain(|g| g != &group.name);
        }
        if let Some(clone) = auth.accounts.get_mut(&clone_name) {
            if !clone.used_by.contains(&group.name) {
                clone.used_by.push(group.name.clone());
            }
        }

        group.run.service_account = Some(clone_name);
    }
}

/// Whether `account_name`'s service account is already bound, transitively
/// via its cluster-roles, to a privileged pod-security-policy.
fn account_satisfies_privileged(auth: &Authorization, account_name: Option<&str>) -> bool {
    let Some(account_name) = account_name else { return false };
    let Some(account) = auth.accounts.get(account_name) else { return false };
    account.cluster_roles.iter().any(|cr| {
        auth.cluster_roles
            .get(cr)
            .map(|cluster_role| {
                cluster_role
                    .pod_security_policies
                    .iter()
                    .any(|psp| auth.pod_security_policies.get(psp).map(|p| p.privileged).unwrap_or(false))
            })
            .unwrap_or(false)
    })
}

/// Picks a privileged PSP to back a synthesized `default-privileged`
/// cluster-role, preferring one named "privileged" or "default" (§4.2
/// pass 7) and otherwise the first in name order.
fn pick_privileged_psp(auth: &Authorization) -> Option<String> {
    let privileged: Vec<&String> = auth.pod_security_policies.iter().filter(|(_, p)| p.privileged).map(|(name, _)| name).collect();
    privileged
        .iter()
        .find(|name| name.as_str() == "privileged")
        .or_else(|| privileged.iter().find(|name| name.as_str() == "default"))
        .or_else(|| privileged.first())
        .map(|s| s.to_string())
}

// ---- Pass 8: templates and scripts ------------------------------------------

fn pass8_templates_and_scripts(raw: &RawManifest, groups: &[InstanceGroup], scripts_root: &Path, allow_missing: bool, errors: &mut ValidationErrors) {
    let mut referenced: HashSet<String> = HashSet::new();
    let mut merged: BTreeMap<String, String> = raw
        .configuration
        .templates
        .iter()
        .filter_map(|(k, v)| Some((k.as_str()?.to_string(), v.as_str()?.to_string())))
        .collect();

    for (raw_group, _group) in raw.instance_groups.iter().zip(groups.iter()) {
        if raw_group.configuration.global {
            let local = stringify_template_map(Some(&raw_group.name), &raw_group.configuration.templates, errors);
            merged.extend(local);
        }
    }
    for (raw_group, _group) in raw.instance_groups.iter().zip(groups.iter()) {
        if !raw_group.configuration.global {
            let local = stringify_template_map(Some(&raw_group.name), &raw_group.configuration.templates, errors);
            for (key, value) in local {
                merged.entry(key).or_insert(value);
            }
        }
    }

    for value in merged.values() {
        for script in extract_script_references(value) {
            referenced.insert(script);
        }
    }

    for script in &referenced {
        if script.starts_with('/') {
            continue;
        }
        let path = scripts_root.join("scripts").join(script);
        if !path.is_file() {
            errors.push(ValidationError::MissingScript { path: script.clone() });
        }
    }

    if !allow_missing {
        let scripts_dir = scripts_root.join("scripts");
        if scripts_dir.is_dir() {
            if let Ok(entries) = std::fs::read_dir(&scripts_dir) {
                for entry in entries.flatten() {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if !referenced.contains(&name) {
                        errors.push(ValidationError::UnreferencedScript { path: name });
                    }
                }
            }
        }
    }
}

/// Template values may embed `((script:some-name.sh))`-style references;
/// extract the bare script names so pass 8 can check they exist.
fn extract_script_references(template_value: &str) -> Vec<String> {
    template_value
        .split("((script:")
        .skip(1)
        .filter_map(|rest| rest.split("))").next())
        .map(|s| s.trim().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fingerprint::fingerprint_of;
    use release::{ConsumedLink, Job, ProvidedLink};
    use std::path::PathBuf;

    fn job(name: &str, provides: Vec<ProvidedLink>, consumes: Vec<ConsumedLink>) -> Job {
        Job {
            name: name.to_string(),
            fingerprint: fingerprint_of([name]),
            templates: Vec::new(),
            monit: String::new(),
            properties: BTreeMap::new(),
            provides,
            consumes,
            packages: Vec::new(),
            requires_privileged_psp: false,
            archive_path: PathBuf::from(name),
        }
    }

    fn release_with(name: &str, jobs: Vec<Job>) -> Release {
        Release {
            name: name.to_string(),
            version: "1".to_string(),
            commit_hash: String::new(),
            packages: Vec::new(),
            jobs,
            license: None,
            notice: None,
            dev: true,
        }
    }

    fn manifest_yaml(body: &str) -> RawManifest {
        serde_yaml::from_str(body).expect("valid test YAML")
    }

    #[test]
    fn active_passive_without_probe_is_required_value() {
        let raw = manifest_yaml(
            r#"
instance_groups:
  - name: myrole
    tags: [active-passive]
    jobs: []
"#,
        );
        let releases = [];
        let errors = resolve(raw, &releases, &ResolveOptions::default()).unwrap_err();
        assert!(errors.iter().any(|e| matches!(
            e,
            ValidationError::MissingRequiredField { group, field }
                if group == "myrole" && field == "run.active-passive-probe"
        )));
    }

    #[test]
    fn link_resolution_binds_unique_provider_by_type() {
        let provider = job("consul", vec![ProvidedLink { name: "consul".into(), link_type: "consul".into(), properties: vec![] }], vec![]);
        let consumer = job("app", vec![], vec![ConsumedLink { name: "backend".into(), link_type: "consul".into(), optional: false }]);
        let releases = [release_with("r", vec![provider, consumer])];

        let raw = manifest_yaml(
            r#"
instance_groups:
  - name: consul-group
    jobs:
      - name: consul
        release_name: r
  - name: app-group
    jobs:
      - name: app
        release_name: r
"#,
        );
        let resolved = resolve(raw, &releases, &ResolveOptions::default()).expect("resolves cleanly");
        let app_group = resolved.instance_group("app-group").unwrap();
        let app_job = app_group.jobs.iter().find(|j| j.job_name == "app").unwrap();
        let consumed = &app_job.consumes[0];
        assert_eq!(consumed.resolved.as_ref().unwrap().group, "consul-group");

        let consul_group = resolved.instance_group("consul-group").unwrap();
        let consul_job = &consul_group.jobs[0];
        assert_eq!(consul_job.consumed_by.len(), 1);
        assert_eq!(consul_job.consumed_by[0].group, "app-group");
    }

    #[test]
    fn ambiguous_type_leaves_required_consumer_unresolved_as_error() {
        let a = job("a", vec![ProvidedLink { name: "a".into(), link_type: "db".into(), properties: vec![] }], vec![]);
        let b = job("b", vec![ProvidedLink { name: "b".into(), link_type: "db".into(), properties: vec![] }], vec![]);
        let consumer = job("app", vec![], vec![ConsumedLink { name: "backend".into(), link_type: "db".into(), optional: false }]);
        let releases = [release_with("r", vec![a, b, consumer])];

        let raw = manifest_yaml(
            r#"
instance_groups:
  - name: g1
    jobs:
      - name: a
        release_name: r
  - name: g2
    jobs:
      - name: b
        release_name: r
  - name: g3
    jobs:
      - name: app
        release_name: r
"#,
        );
        let errors = resolve(raw, &releases, &ResolveOptions::default()).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ValidationError::UnresolvableConsumer { .. })));
    }

    #[test]
    fn colocated_port_collision_is_reported() {
        let raw = manifest_yaml(
            r#"
instance_groups:
  - name: main
    colocated-containers: [sidecar]
    jobs: []
    run:
      exposed-ports:
        - name: http
          internal: "8080"
  - name: sidecar
    type: colocated-container
    jobs: []
    run:
      exposed-ports:
        - name: http2
          internal: "8080"
"#,
        );
        let releases = [];
        let errors = resolve(raw, &releases, &ResolveOptions::default()).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ValidationError::ColocatedPortCollision { group, .. } if group == "main")));
    }

    #[test]
    fn missing_script_is_reported_and_unreferenced_script_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("scripts")).unwrap();
        std::fs::write(dir.path().join("scripts/unused.sh"), "#!/bin/sh\n").unwrap();

        let raw = manifest_yaml(
            r#"
configuration:
  templates:
    FOO: "((script:missing.sh))"
instance_groups: []
"#,
        );
        let releases = [];
        let opts = ResolveOptions { scripts_root: Some(dir.path()), allow_missing_scripts: false };
        let errors = resolve(raw, &releases, &opts).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ValidationError::MissingScript { path } if path == "missing.sh")));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::UnreferencedScript { path } if path == "unused.sh")));
    }

    #[test]
    fn variables_out_of_order_is_flagged() {
        let raw = manifest_yaml(
            r#"
variables:
  - name: zeta
  - name: alpha
"#,
        );
        let releases = [];
        let errors = resolve(raw, &releases, &ResolveOptions::default()).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ValidationError::Internal { reason } if reason.contains("sorted"))));
    }

    fn privileged_job(name: &str) -> Job {
        let mut j = job(name, vec![], vec![]);
        j.requires_privileged_psp = true;
        j
    }

    #[test]
    fn privileged_job_clones_service_account_and_maintains_reference_counts() {
        let releases = [release_with("r", vec![privileged_job("agent")])];
        let raw = manifest_yaml(
            r#"
configuration:
  authorization:
    accounts:
      myaccount: {}
    pod-security-policies:
      restricted:
        privileged: false
      privileged:
        privileged: true
instance_groups:
  - name: g1
    jobs:
      - name: agent
        release_name: r
    run:
      service-account: myaccount
"#,
        );
        let resolved = resolve(raw, &releases, &ResolveOptions::default()).expect("resolves cleanly");

        let group = resolved.instance_group("g1").unwrap();
        assert_eq!(group.run.service_account.as_deref(), Some("myaccount-privileged"));

        let auth = &resolved.configuration.authorization;
        let clone = auth.accounts.get("myaccount-privileged").expect("clone exists");
        assert!(clone.cluster_roles.contains(&"default-privileged".to_string()));
        assert_eq!(clone.used_by, vec!["g1".to_string()]);

        let cluster_role = auth.cluster_roles.get("default-privileged").expect("cluster-role exists");
        assert_eq!(cluster_role.pod_security_policies, vec!["privileged".to_string()]);
        assert_eq!(cluster_role.used_by, vec!["myaccount-privileged".to_string()]);

        let original = auth.accounts.get("myaccount").unwrap();
        assert!(original.used_by.is_empty());
    }

    #[test]
    fn privileged_job_is_satisfied_by_an_already_bound_account() {
        let releases = [release_with("r", vec![privileged_job("agent")])];
        let raw = manifest_yaml(
            r#"
configuration:
  authorization:
    accounts:
      myaccount:
        cluster-roles: [privileged-access]
    cluster-roles:
      privileged-access:
        pod-security-policies: [privileged]
    pod-security-policies:
      privileged:
        privileged: true
instance_groups:
  - name: g1
    jobs:
      - name: agent
        release_name: r
    run:
      service-account: myaccount
"#,
        );
        let resolved = resolve(raw, &releases, &ResolveOptions::default()).expect("resolves cleanly");

        let group = resolved.instance_group("g1").unwrap();
        assert_eq!(group.run.service_account.as_deref(), Some("myaccount"));
        assert!(!resolved.configuration.authorization.cluster_roles.contains_key("default-privileged"));
    }

    #[test]
    fn privileged_job_without_any_privileged_psp_is_reported() {
        let releases = [release_with("r", vec![privileged_job("agent")])];
        let raw = manifest_yaml(
            r#"
instance_groups:
  - name: g1
    jobs:
      - name: agent
        release_name: r
"#,
        );
        let errors = resolve(raw, &releases, &ResolveOptions::default()).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ValidationError::NoPrivilegedPspAvailable { group } if group == "g1")));
    }
}
