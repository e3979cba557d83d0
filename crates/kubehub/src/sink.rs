use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::{
    api::{Api, DeleteParams, Patch, PatchParams},
    core::DynamicObject,
    runtime::events::{Event as KubeEvent, EventType, Recorder, Reporter},
    Client, Config,
};
use rustc_hash::FxHashMap;
use stagehand_core::config::PatchType;
use stagehand_lifecycle::{Event, Resource, ResourcePatch, Sink, SinkError, SinkFactory};
use tracing::debug;

use crate::Target;

/// Clients impersonating a user, built once per username.
#[derive(Default)]
struct Impersonation {
    clients: Mutex<FxHashMap<String, Client>>,
}

impl Impersonation {
    async fn client(&self, username: &str) -> Result<Client> {
        let cached = self.clients.lock().unwrap_or_else(PoisonError::into_inner).get(username).cloned();
        if let Some(c) = cached {
            return Ok(c);
        }
        let mut config = Config::infer().await.context("inferring kube config")?;
        config.auth_info.impersonate = Some(username.to_string());
        let client = Client::try_from(config).context("building impersonating client")?;
        debug!(user = %username, "created impersonating client");
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(clients.entry(username.to_string()).or_insert(client).clone())
    }
}

/// Builds a [`KubeSink`] per object of one target.
pub struct KubeSinkFactory {
    client: Client,
    target: Target,
    reporter: Reporter,
    impersonation: Arc<Impersonation>,
}

impl KubeSinkFactory {
    /// Events are reported as `STAGEHAND_REPORTER` (default `stagehand`).
    pub fn new(client: Client, target: Target) -> Self {
        let controller = std::env::var("STAGEHAND_REPORTER").unwrap_or_else(|_| "stagehand".to_string());
        let reporter = Reporter { controller, instance: std::env::var("HOSTNAME").ok() };
        Self { client, target, reporter, impersonation: Arc::default() }
    }
}

impl SinkFactory for KubeSinkFactory {
    fn sink_for(&self, resource: &Resource) -> Box<dyn Sink> {
        let body = resource.body();
        let field = |k: &str| body.get(k).and_then(|v| v.as_str()).map(str::to_string);
        let reference = ObjectReference {
            api_version: field("apiVersion").or_else(|| Some(self.target.api_resource.api_version.clone())),
            kind: field("kind").or_else(|| Some(self.target.gvk.kind.clone())),
            name: Some(resource.name().to_string()),
            namespace: resource.namespace().map(str::to_string),
            uid: body.pointer("/metadata/uid").and_then(|v| v.as_str()).map(str::to_string),
            ..Default::default()
        };
        Box::new(KubeSink {
            client: self.client.clone(),
            target: self.target.clone(),
            name: resource.name().to_string(),
            namespace: resource.namespace().map(str::to_string),
            reference,
            reporter: self.reporter.clone(),
            impersonation: self.impersonation.clone(),
        })
    }
}

/// Side effects against the API server for one object.
pub struct KubeSink {
    client: Client,
    target: Target,
    name: String,
    namespace: Option<String>,
    reference: ObjectReference,
    reporter: Reporter,
    impersonation: Arc<Impersonation>,
}

impl KubeSink {
    fn api(&self, client: Client) -> Api<DynamicObject> { self.target.api(client, self.namespace.as_deref()) }

    async fn patch(&self, patch: &ResourcePatch) -> Result<()> {
        let client = match &patch.impersonation {
            Some(who) => self.impersonation.client(&who.username).await?,
            None => self.client.clone(),
        };
        let body: Patch<serde_json::Value> = match patch.wire_type {
            PatchType::Json => Patch::Json(serde_json::from_value(patch.data.clone()).context("decoding json patch")?),
            PatchType::Merge => Patch::Merge(patch.data.clone()),
            PatchType::Strategic => Patch::Strategic(patch.data.clone()),
        };
        let api = self.api(client);
        let pp = PatchParams::default();
        match patch.subresource.as_deref() {
            Some(sub) => api.patch_subresource(sub, &self.name, &pp, &body).await,
            None => api.patch(&self.name, &pp, &body).await,
        }
        .with_context(|| format!("patching {}", self.name))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Sink for KubeSink {
    async fn send_event(&self, event: &Event) -> Result<(), SinkError> {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), self.reference.clone());
        let type_ = if event.type_ == "Warning" { EventType::Warning } else { EventType::Normal };
        recorder
            .publish(KubeEvent {
                type_,
                reason: event.reason.clone(),
                note: Some(event.message.clone()),
                action: event.reason.clone(),
                secondary: None,
            })
            .await
            .map_err(|e| SinkError::new("event", e))
    }

    async fn delete_resource(&self) -> Result<(), SinkError> {
        let dp = DeleteParams { grace_period_seconds: Some(0), ..DeleteParams::default() };
        match self.api(self.client.clone()).delete(&self.name, &dp).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(SinkError::new("delete", e)),
        }
    }

    async fn patch_resource(&self, patch: &ResourcePatch) -> Result<(), SinkError> {
        self.patch(patch).await.map_err(|e| SinkError::new("patch", format!("{:#}", e)))
    }
}
