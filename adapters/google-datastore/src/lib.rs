//! Cloud Datastore adapter implementing the `EntityStore` port.
//!
//! Talks to the Datastore v1 REST API (`allocateIds`, `lookup`, `commit`,
//! `runQuery`) with `reqwest`.
//! - Authenticates with a service-account key via `google-auth`, or not at
//!   all when pointed at the local emulator.
//! - Provides `DatastoreConfig::from_env()` wiring for apps; see `config.rs`.
//!
//! Notes:
//! - The domain `EntityStore` trait is synchronous. We bridge to the async HTTP
//!   client using an internal `tokio::runtime::Runtime` and `block_on`, or
//!   `block_in_place` when already inside a multi-thread runtime. Inside a
//!   current-thread runtime calls run on the internal runtime from a scoped
//!   helper thread, since that runtime cannot block in place.

pub mod config;
mod error;
mod wire;

#[cfg(test)]
mod fake_server;

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use google_auth::{ServiceAccountKey, TokenProvider, DATASTORE_SCOPE};
use notebook::{Entity, EntityKey, EntityStore, NotebookError, NotebookRepository};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::{Handle, Runtime, RuntimeFlavor};
use tracing::{debug, warn};

pub use config::DatastoreConfig;
use error::{classify_http, map_auth_err, map_transport_err};
use wire::{
    entity_from_wire, entity_to_wire, incomplete_key, key_from_wire, key_to_wire,
    AllocateIdsRequest, AllocateIdsResponse, CommitRequest, CommitResponse, KindExpression,
    LookupRequest, LookupResponse, Mutation, PartitionId, Query, RunQueryRequest,
    RunQueryResponse, MORE_RESULTS_NOT_FINISHED,
};

/// Entity store backed by Google Cloud Datastore.
///
/// Supports both standalone mode (creates its own Tokio runtime) and embedded
/// mode (reuses the caller's multi-thread runtime). Under a current-thread
/// runtime it keeps its own runtime as in standalone mode.
#[derive(Clone)]
pub struct DatastoreStore {
    endpoint: String,
    partition: PartitionId,
    http: reqwest::Client,
    // None when talking to the emulator
    auth: Option<Arc<TokenProvider>>,
    // None when constructed inside a multi-thread runtime (reuses it)
    rt: Option<Arc<OwnedRuntime>>,
}

/// Runtime owned by the store. Shut down without blocking on drop, so the
/// last clone of a store may be dropped from async code.
struct OwnedRuntime(Option<Runtime>);

impl OwnedRuntime {
    fn get(&self) -> &Runtime {
        match &self.0 {
            Some(rt) => rt,
            None => unreachable!("runtime is only taken on drop"),
        }
    }
}

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(rt) = self.0.take() {
            rt.shutdown_background();
        }
    }
}

impl std::fmt::Debug for DatastoreStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatastoreStore")
            .field("endpoint", &self.endpoint)
            .field("partition", &self.partition)
            .field("authenticated", &self.auth.is_some())
            .finish()
    }
}

impl DatastoreStore {
    /// Connect using `config`. Credentials are loaded and checked here, so a
    /// bad key file fails construction rather than the first request.
    pub fn new(config: DatastoreConfig) -> Result<Self, NotebookError> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| NotebookError::Configuration(format!("http client: {e}")))?;

        let auth = if config.uses_emulator() {
            None
        } else {
            let path = config.credentials_path.as_ref().ok_or_else(|| {
                NotebookError::Configuration("missing service account key path".into())
            })?;
            let key = ServiceAccountKey::from_file(path)
                .map_err(|e| NotebookError::Configuration(e.to_string()))?;
            let provider = TokenProvider::new(key, &[DATASTORE_SCOPE], http.clone())
                .map_err(|e| NotebookError::Configuration(e.to_string()))?;
            Some(Arc::new(provider))
        };

        let rt = Self::maybe_create_runtime()?;
        let endpoint = config.endpoint();
        debug!(
            endpoint = %endpoint,
            project_id = %config.project_id,
            namespace = ?config.namespace,
            emulator = config.uses_emulator(),
            "datastore store ready"
        );
        Ok(Self {
            endpoint,
            partition: PartitionId {
                project_id: config.project_id,
                namespace_id: config.namespace,
            },
            http,
            auth,
            rt,
        })
    }

    /// Construct from environment variables; see [`DatastoreConfig::from_env`].
    pub fn from_env() -> Result<Self, NotebookError> {
        Self::new(DatastoreConfig::from_env()?)
    }

    pub fn project_id(&self) -> &str {
        &self.partition.project_id
    }

    /// Reuse the current runtime when it is multi-thread; otherwise create
    /// a new one. A current-thread runtime cannot `block_in_place`.
    fn maybe_create_runtime() -> Result<Option<Arc<OwnedRuntime>>, NotebookError> {
        let reusable = Handle::try_current()
            .map(|h| h.runtime_flavor() == RuntimeFlavor::MultiThread)
            .unwrap_or(false);
        if reusable {
            Ok(None)
        } else {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .map_err(|e| NotebookError::Configuration(format!("tokio runtime init: {e}")))?;
            Ok(Some(Arc::new(OwnedRuntime(Some(rt)))))
        }
    }

    /// Run an async future, using either our owned runtime or the current runtime.
    fn block_on<F>(&self, fut: F) -> F::Output
    where
        F: Future + Send,
        F::Output: Send,
    {
        match &self.rt {
            // Called from inside some runtime: hop to a thread with no runtime context.
            Some(rt) if Handle::try_current().is_ok() => {
                let joined = std::thread::scope(|s| s.spawn(|| rt.get().block_on(fut)).join());
                match joined {
                    Ok(out) => out,
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
            Some(rt) => rt.get().block_on(fut),
            None => tokio::task::block_in_place(|| Handle::current().block_on(fut)),
        }
    }

    async fn call<Req, Resp>(&self, method: &'static str, body: &Req) -> Result<Resp, NotebookError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let url = format!(
            "{}/v1/projects/{}:{}",
            self.endpoint, self.partition.project_id, method
        );
        let mut req = self.http.post(url).json(body);
        if let Some(auth) = &self.auth {
            let token = auth.token().await.map_err(map_auth_err)?;
            req = req.bearer_auth(token);
        }

        let started = Instant::now();
        let resp = req.send().await.map_err(|e| map_transport_err(method, e))?;
        let status = resp.status();
        debug!(
            method,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "datastore call"
        );
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_http(method, status.as_u16(), &text));
        }
        resp.json::<Resp>()
            .await
            .map_err(|e| NotebookError::StoreUnavailable(format!("{method}: bad response: {e}")))
    }

    async fn commit(&self, mutation: Mutation) -> Result<(), NotebookError> {
        let body = CommitRequest {
            mode: "NON_TRANSACTIONAL",
            mutations: vec![mutation],
        };
        let _: CommitResponse = self.call("commit", &body).await?;
        Ok(())
    }
}

impl EntityStore for DatastoreStore {
    fn allocate_id(&self, kind: &str) -> Result<i64, NotebookError> {
        let body = AllocateIdsRequest {
            keys: vec![incomplete_key(&self.partition, kind)],
        };
        let out: AllocateIdsResponse = self.block_on(self.call("allocateIds", &body))?;
        let key = out
            .keys
            .first()
            .ok_or_else(|| NotebookError::StoreUnavailable("allocateIds returned no keys".into()))?;
        key_from_wire(key)
            .map(|k| k.id)
            .map_err(|reason| NotebookError::StoreUnavailable(format!("allocateIds: {reason}")))
    }

    fn lookup(&self, key: &EntityKey) -> Result<Option<Entity>, NotebookError> {
        let body = LookupRequest {
            keys: vec![key_to_wire(&self.partition, key)],
        };
        let out: LookupResponse = self.block_on(self.call("lookup", &body))?;
        if let Some(found) = out.found.first() {
            return entity_from_wire(&found.entity)
                .map(Some)
                .map_err(|reason| NotebookError::MalformedEntity {
                    key: key.to_string(),
                    reason,
                });
        }
        if !out.deferred.is_empty() {
            return Err(NotebookError::TransientStore(format!("lookup of {key} was deferred")));
        }
        debug!(%key, missing = out.missing.len(), "entity not found");
        Ok(None)
    }

    fn put(&self, entity: &Entity) -> Result<(), NotebookError> {
        let mutation = Mutation {
            upsert: Some(entity_to_wire(&self.partition, entity)),
            ..Default::default()
        };
        self.block_on(self.commit(mutation))
    }

    fn delete(&self, key: &EntityKey) -> Result<(), NotebookError> {
        let mutation = Mutation {
            delete: Some(key_to_wire(&self.partition, key)),
            ..Default::default()
        };
        self.block_on(self.commit(mutation))
    }

    fn query(&self, kind: &str) -> Result<Vec<Entity>, NotebookError> {
        self.block_on(async {
            let mut entities = Vec::new();
            let mut cursor: Option<String> = None;
            loop {
                let body = RunQueryRequest {
                    partition_id: self.partition.clone(),
                    query: Query {
                        kind: vec![KindExpression {
                            name: kind.to_string(),
                        }],
                        start_cursor: cursor.clone(),
                    },
                };
                let out: RunQueryResponse = self.call("runQuery", &body).await?;
                let batch = out.batch;
                for result in &batch.entity_results {
                    match entity_from_wire(&result.entity) {
                        Ok(e) if e.key.kind == kind => entities.push(e),
                        Ok(e) => warn!(key = %e.key, "skipping entity of unexpected kind"),
                        Err(reason) => warn!(%reason, "skipping unreadable entity"),
                    }
                }

                if batch.more_results != MORE_RESULTS_NOT_FINISHED {
                    break;
                }
                match batch.end_cursor {
                    Some(next) if cursor.as_ref() != Some(&next) => cursor = Some(next),
                    _ => {
                        warn!(kind, "query reported more results without advancing its cursor");
                        break;
                    }
                }
            }
            Ok::<_, NotebookError>(entities)
        })
    }
}

/// Open a note repository against Datastore.
pub fn open_notebook(
    config: DatastoreConfig,
) -> Result<NotebookRepository<DatastoreStore>, NotebookError> {
    Ok(NotebookRepository::new(DatastoreStore::new(config)?))
}
