//! [`StatusWriter`] backed by the Kubernetes API server

use super::{
    BuildRunReader, CommitContext, CreateOption, PatchOption, StatusError, StatusPatch,
    StatusWriter, UpdateOption,
};
use crate::crds::{BuildRun, BuildRunStatus};
use async_trait::async_trait;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client};
use tracing::debug;

/// Writes `BuildRun` status through the status subresource
#[derive(Clone)]
pub struct KubeStatusWriter {
    client: Client,
    field_manager: Option<String>,
}

impl KubeStatusWriter {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            field_manager: None,
        }
    }

    /// Field manager used when a call does not pass one explicitly
    #[must_use]
    pub fn with_field_manager(mut self, field_manager: impl Into<String>) -> Self {
        self.field_manager = Some(field_manager.into());
        self
    }

    fn api_for(&self, owner: &BuildRun) -> Result<(Api<BuildRun>, String), StatusError> {
        let namespace = owner
            .metadata
            .namespace
            .as_deref()
            .ok_or(StatusError::MissingObjectKey("metadata.namespace"))?;
        let name = owner
            .metadata
            .name
            .clone()
            .ok_or(StatusError::MissingObjectKey("metadata.name"))?;
        Ok((Api::namespaced(self.client.clone(), namespace), name))
    }
}

fn post_params(default_manager: Option<&str>, dry_run: bool, manager: Option<&str>) -> PostParams {
    let mut pp = PostParams::default();
    pp.dry_run = dry_run;
    pp.field_manager = manager.or(default_manager).map(str::to_string);
    pp
}

/// `owner` with its status set to `status`, serialized for a status replace
pub(crate) fn initial_status_body(
    owner: &BuildRun,
    status: &BuildRunStatus,
) -> Result<Vec<u8>, StatusError> {
    let mut object = owner.clone();
    object.status = Some(status.clone());
    Ok(serde_json::to_vec(&object)?)
}

pub(crate) fn create_params(default_manager: Option<&str>, options: &[CreateOption]) -> PostParams {
    let mut dry_run = false;
    let mut manager = None;
    for option in options {
        match option {
            CreateOption::DryRun => dry_run = true,
            CreateOption::FieldManager(m) => manager = Some(m.as_str()),
        }
    }
    post_params(default_manager, dry_run, manager)
}

pub(crate) fn update_params(default_manager: Option<&str>, options: &[UpdateOption]) -> PostParams {
    let mut dry_run = false;
    let mut manager = None;
    for option in options {
        match option {
            UpdateOption::DryRun => dry_run = true,
            UpdateOption::FieldManager(m) => manager = Some(m.as_str()),
        }
    }
    post_params(default_manager, dry_run, manager)
}

pub(crate) fn patch_params(
    default_manager: Option<&str>,
    patch: &StatusPatch,
    options: &[PatchOption],
) -> PatchParams {
    let is_apply = matches!(patch, StatusPatch::Apply(_));
    let mut pp = PatchParams::default();
    pp.field_manager = default_manager.map(str::to_string);

    for option in options {
        match option {
            PatchOption::DryRun => pp.dry_run = true,
            PatchOption::FieldManager(m) => pp.field_manager = Some(m.clone()),
            // The API server rejects force on anything but apply
            PatchOption::Force => pp.force = is_apply,
        }
    }

    if is_apply && pp.field_manager.is_none() {
        pp.field_manager = Some(super::commit::DEFAULT_FIELD_MANAGER.to_string());
    }
    pp
}

#[async_trait]
impl StatusWriter for KubeStatusWriter {
    async fn create(
        &self,
        ctx: &CommitContext,
        owner: &BuildRun,
        status: &BuildRunStatus,
        options: &[CreateOption],
    ) -> Result<(), StatusError> {
        let (api, name) = self.api_for(owner)?;
        let pp = create_params(self.field_manager.as_deref(), options);
        let body = initial_status_body(owner, status)?;

        // CRD status subresources only accept get, update and patch, so the
        // status is initialized with a replace carrying the read resourceVersion
        debug!(name = %name, "Initializing BuildRun status subresource");
        ctx.run(async {
            api.replace_status(&name, &pp, body)
                .await
                .map(|_| ())
                .map_err(StatusError::from)
        })
        .await
    }

    async fn patch(
        &self,
        ctx: &CommitContext,
        owner: &BuildRun,
        patch: &StatusPatch,
        options: &[PatchOption],
    ) -> Result<(), StatusError> {
        let (api, name) = self.api_for(owner)?;
        let pp = patch_params(self.field_manager.as_deref(), patch, options);
        let kube_patch = match patch {
            StatusPatch::Merge(body) => Patch::Merge(body),
            StatusPatch::Apply(body) => Patch::Apply(body),
        };

        debug!(name = %name, "Patching BuildRun status");
        ctx.run(async {
            api.patch_status(&name, &pp, &kube_patch)
                .await
                .map(|_| ())
                .map_err(StatusError::from)
        })
        .await
    }

    async fn update(
        &self,
        ctx: &CommitContext,
        owner: &BuildRun,
        options: &[UpdateOption],
    ) -> Result<(), StatusError> {
        let (api, name) = self.api_for(owner)?;
        let pp = update_params(self.field_manager.as_deref(), options);
        let body = serde_json::to_vec(owner)?;

        debug!(name = %name, "Replacing BuildRun status");
        ctx.run(async {
            api.replace_status(&name, &pp, body)
                .await
                .map(|_| ())
                .map_err(StatusError::from)
        })
        .await
    }
}

#[async_trait]
impl BuildRunReader for KubeStatusWriter {
    async fn get(
        &self,
        ctx: &CommitContext,
        namespace: &str,
        name: &str,
    ) -> Result<BuildRun, StatusError> {
        let api: Api<BuildRun> = Api::namespaced(self.client.clone(), namespace);
        ctx.run(async { api.get(name).await.map_err(StatusError::from) })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::Output;
    use crate::tasks::buildrun::test_support::build_run;
    use serde_json::Value;

    #[test]
    fn initial_status_body_keeps_the_read_resource_version() {
        let mut owner = build_run("fresh");
        owner.metadata.resource_version = Some("9".to_string());
        let status = BuildRunStatus {
            output: Some(Output {
                digest: Some("sha256:abcd".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let bytes = initial_status_body(&owner, &status).unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["metadata"]["resourceVersion"], "9");
        assert_eq!(body["status"]["output"]["digest"], "sha256:abcd");
        assert!(owner.status.is_none());
    }

    #[test]
    fn create_params_prefer_explicit_field_manager() {
        let pp = create_params(
            Some("buildrun-controller"),
            &[
                CreateOption::DryRun,
                CreateOption::FieldManager("tester".to_string()),
            ],
        );
        assert!(pp.dry_run);
        assert_eq!(pp.field_manager.as_deref(), Some("tester"));
    }

    #[test]
    fn update_params_fall_back_to_default_manager() {
        let pp = update_params(Some("buildrun-controller"), &[]);
        assert!(!pp.dry_run);
        assert_eq!(pp.field_manager.as_deref(), Some("buildrun-controller"));
    }

    #[test]
    fn force_is_dropped_for_merge_patches() {
        let patch = StatusPatch::Merge(Value::Null);
        let pp = patch_params(None, &patch, &[PatchOption::Force, PatchOption::DryRun]);
        assert!(!pp.force);
        assert!(pp.dry_run);
        assert!(pp.field_manager.is_none());
    }

    #[test]
    fn apply_patches_always_have_a_field_manager() {
        let patch = StatusPatch::Apply(Value::Null);
        let pp = patch_params(None, &patch, &[PatchOption::Force]);
        assert!(pp.force);
        assert_eq!(pp.field_manager.as_deref(), Some("buildrun-controller"));
    }
}
