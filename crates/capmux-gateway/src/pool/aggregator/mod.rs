//! ToolAggregator - one catalog over every Ready server
//!
//! The catalog is built lazily and cached. It is marked stale whenever a
//! lifecycle event enters or leaves `Ready`, and stays stale after a build
//! that had to exclude a server. Lookups read an immutable
//! snapshot; rebuild and purge run under one async update lock.

mod catalog;
mod names;

pub use catalog::{AggregatedCatalog, CatalogCounts, KindCatalog};
pub use names::NameRegistry;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use capmux_core::{
    CapabilityDescriptor, CapabilityKind, CapabilityListing, ConnectionError, ConnectionState,
    Error, EventReceiver, JsonObject, RemoteCapability, Result, ServerFailure, ToolCallOutput,
};
use futures::future::join_all;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::connection::ServerConnection;
use super::lifecycle::ConnectionRecord;
use super::pool_manager::ConnectionPoolManager;

const KINDS: [CapabilityKind; 3] = [
    CapabilityKind::Tool,
    CapabilityKind::Prompt,
    CapabilityKind::Resource,
];

/// State guarded by the update lock
struct UpdateState {
    tools: NameRegistry,
    prompts: NameRegistry,
    resources: NameRegistry,
    events: EventReceiver,
}

impl UpdateState {
    fn names(&mut self, kind: CapabilityKind) -> &mut NameRegistry {
        match kind {
            CapabilityKind::Tool => &mut self.tools,
            CapabilityKind::Prompt => &mut self.prompts,
            CapabilityKind::Resource => &mut self.resources,
        }
    }
}

pub struct ToolAggregator {
    pool: Arc<ConnectionPoolManager>,
    catalog: RwLock<Arc<AggregatedCatalog>>,
    stale: AtomicBool,
    update: tokio::sync::Mutex<UpdateState>,
}

impl ToolAggregator {
    pub fn new(pool: Arc<ConnectionPoolManager>) -> Self {
        let events = pool.subscribe();
        Self {
            pool,
            catalog: RwLock::new(Arc::new(AggregatedCatalog::new())),
            stale: AtomicBool::new(true),
            update: tokio::sync::Mutex::new(UpdateState {
                tools: NameRegistry::new(),
                prompts: NameRegistry::new(),
                resources: NameRegistry::new(),
                events,
            }),
        }
    }

    /// Current snapshot, possibly stale
    pub fn catalog(&self) -> Arc<AggregatedCatalog> {
        self.catalog.read().clone()
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// Force the next read to rebuild
    pub fn invalidate(&self) {
        self.stale.store(true, Ordering::Release);
    }

    // ========================================================================
    // Catalog building
    // ========================================================================

    fn drain_events(&self, state: &mut UpdateState) {
        let mut invalidated = false;
        while let Some(event) = state.events.try_recv() {
            if event.transition().touches_ready() {
                debug!(
                    server = %event.server_name(),
                    event = event.type_name(),
                    "[ToolAggregator] Catalog invalidated"
                );
                invalidated = true;
            }
        }
        if state.events.take_lagged() {
            invalidated = true;
        }
        if invalidated {
            self.invalidate();
        }
    }

    /// Rebuild if any lifecycle event made the catalog stale
    pub async fn refresh(&self) -> Result<Arc<AggregatedCatalog>> {
        let mut state = self.update.lock().await;
        self.drain_events(&mut state);
        if self.is_stale() {
            self.rebuild_locked(&mut state).await?;
        }
        Ok(self.catalog())
    }

    /// Rebuild unconditionally
    pub async fn rebuild(&self) -> Result<Arc<AggregatedCatalog>> {
        let mut state = self.update.lock().await;
        self.drain_events(&mut state);
        self.rebuild_locked(&mut state).await?;
        Ok(self.catalog())
    }

    async fn rebuild_locked(&self, state: &mut UpdateState) -> Result<()> {
        let records = self.pool.lifecycle().ready_connections();
        if records.is_empty() {
            debug!("[ToolAggregator] No ready servers, catalog empty");
            *self.catalog.write() = Arc::new(AggregatedCatalog::built(Vec::new()));
            self.stale.store(false, Ordering::Release);
            return Ok(());
        }

        let fetches = records.iter().map(|record| async move {
            let listing = fetch_listing(record).await;
            (record.name().to_string(), listing)
        });
        let results = join_all(fetches).await;

        let mut listings = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for (server, result) in results {
            match result {
                Ok(listing) => listings.push((server, listing)),
                Err(e) => {
                    warn!(
                        server = %server,
                        error = %e,
                        "[ToolAggregator] Excluding server from catalog"
                    );
                    failures.push(ServerFailure::new(server, e));
                }
            }
        }

        if listings.is_empty() {
            *self.catalog.write() = Arc::new(AggregatedCatalog::built(Vec::new()));
            self.invalidate();
            return Err(Error::AllServersFailed { failures });
        }

        let servers = listings.iter().map(|(server, _)| server.clone()).collect();
        let mut catalog = AggregatedCatalog::built(servers);
        for (server, listing) in &listings {
            for kind in KINDS {
                for remote in listing.of_kind(kind) {
                    let exposed = state.names(kind).assign(server, &remote.name);
                    let descriptor = CapabilityDescriptor::from_remote(kind, server, exposed, remote);
                    if !catalog.insert(descriptor) {
                        debug!(
                            server = %server,
                            kind = %kind,
                            name = %remote.name,
                            "[ToolAggregator] Duplicate capability ignored"
                        );
                    }
                }
            }
        }

        let counts = catalog.counts();
        *self.catalog.write() = Arc::new(catalog);
        // Excluded servers are listed again on the next read
        self.stale.store(!failures.is_empty(), Ordering::Release);
        info!(
            servers = counts.servers,
            tools = counts.tools,
            prompts = counts.prompts,
            resources = counts.resources,
            excluded = failures.len(),
            "[ToolAggregator] Catalog rebuilt"
        );
        Ok(())
    }

    /// Drop everything `server` contributed and release its names
    pub async fn purge_server(&self, server: &str) -> usize {
        let mut state = self.update.lock().await;
        self.drain_events(&mut state);

        let mut catalog = (*self.catalog()).clone();
        let removed = catalog.remove_server(server);
        *self.catalog.write() = Arc::new(catalog);

        for kind in KINDS {
            state.names(kind).release_server(server);
        }
        info!(server = %server, removed, "[ToolAggregator] Server purged");
        removed
    }

    // ========================================================================
    // Listing
    // ========================================================================

    async fn list(&self, kind: CapabilityKind) -> Result<Vec<CapabilityDescriptor>> {
        let catalog = self.refresh().await?;
        Ok(catalog.of_kind(kind).entries().to_vec())
    }

    pub async fn get_all_tools(&self) -> Result<Vec<CapabilityDescriptor>> {
        self.list(CapabilityKind::Tool).await
    }

    pub async fn get_all_prompts(&self) -> Result<Vec<CapabilityDescriptor>> {
        self.list(CapabilityKind::Prompt).await
    }

    pub async fn get_all_resources(&self) -> Result<Vec<CapabilityDescriptor>> {
        self.list(CapabilityKind::Resource).await
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Find the descriptor behind `exposed_name`, rebuilding once on a miss
    pub async fn resolve(&self, kind: CapabilityKind, exposed_name: &str) -> Result<CapabilityDescriptor> {
        if let Some(descriptor) = self.catalog().lookup(kind, exposed_name) {
            return Ok(descriptor.clone());
        }

        debug!(kind = %kind, name = %exposed_name, "[ToolAggregator] Lookup miss, rebuilding");
        let catalog = self.rebuild().await?;
        catalog
            .lookup(kind, exposed_name)
            .cloned()
            .ok_or_else(|| Error::NoProvider {
                kind,
                name: exposed_name.to_string(),
            })
    }

    /// Owning connection, provided the owner is still Ready
    fn owner(&self, descriptor: &CapabilityDescriptor) -> Result<Arc<ServerConnection>> {
        let record = self
            .pool
            .lifecycle()
            .get(&descriptor.server_name)
            .ok_or_else(|| Error::NoProvider {
                kind: descriptor.kind,
                name: descriptor.exposed_name.clone(),
            })?;

        let state = record.state();
        if state != ConnectionState::Ready {
            return Err(Error::NotReady {
                server: descriptor.server_name.clone(),
                state,
            });
        }
        Ok(record.connection())
    }

    pub async fn execute_tool(&self, name: &str, arguments: Option<JsonObject>) -> Result<ToolCallOutput> {
        let descriptor = self.resolve(CapabilityKind::Tool, name).await?;
        let connection = self.owner(&descriptor)?;
        debug!(
            tool = %name,
            server = %descriptor.server_name,
            "[ToolAggregator] Dispatching tool call"
        );
        Ok(connection.call_tool(&descriptor.name, arguments).await?)
    }

    pub async fn get_prompt(&self, name: &str, arguments: Option<JsonObject>) -> Result<Value> {
        let descriptor = self.resolve(CapabilityKind::Prompt, name).await?;
        let connection = self.owner(&descriptor)?;
        Ok(connection.get_prompt(&descriptor.name, arguments).await?)
    }

    pub async fn read_resource(&self, uri: &str) -> Result<Vec<Value>> {
        let descriptor = self.resolve(CapabilityKind::Resource, uri).await?;
        let connection = self.owner(&descriptor)?;
        Ok(connection.read_resource(&descriptor.name).await?)
    }
}

/// Listing of one server
///
/// Tools are mandatory. A server that answers prompts/resources with a
/// protocol error simply does not offer them.
async fn fetch_listing(record: &ConnectionRecord) -> std::result::Result<CapabilityListing, ConnectionError> {
    let connection = record.connection();
    let (tools, prompts, resources) = tokio::join!(
        connection.list_tools(),
        connection.list_prompts(),
        connection.list_resources()
    );

    Ok(CapabilityListing {
        tools: tools?,
        prompts: optional(prompts)?,
        resources: optional(resources)?,
    })
}

fn optional(
    result: std::result::Result<Vec<RemoteCapability>, ConnectionError>,
) -> std::result::Result<Vec<RemoteCapability>, ConnectionError> {
    match result {
        Err(ConnectionError::Remote { server, message }) => {
            debug!(server = %server, message = %message, "[ToolAggregator] Listing not supported");
            Ok(Vec::new())
        }
        other => other,
    }
}
