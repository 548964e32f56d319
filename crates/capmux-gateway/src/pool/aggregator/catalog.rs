//! Aggregated capability catalog

use std::collections::HashMap;

use capmux_core::{CapabilityDescriptor, CapabilityKind};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Descriptors of one kind in listing order, indexed by exposed name
#[derive(Debug, Clone, Default)]
pub struct KindCatalog {
    entries: Vec<CapabilityDescriptor>,
    index: HashMap<String, usize>,
}

impl KindCatalog {
    /// Returns false when the exposed name is already present
    fn insert(&mut self, descriptor: CapabilityDescriptor) -> bool {
        if self.index.contains_key(&descriptor.exposed_name) {
            return false;
        }
        self.index
            .insert(descriptor.exposed_name.clone(), self.entries.len());
        self.entries.push(descriptor);
        true
    }

    fn remove_server(&mut self, server: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|d| d.server_name != server);
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, d)| (d.exposed_name.clone(), i))
            .collect();
        before - self.entries.len()
    }

    pub fn get(&self, exposed_name: &str) -> Option<&CapabilityDescriptor> {
        self.index.get(exposed_name).map(|&i| &self.entries[i])
    }

    pub fn entries(&self) -> &[CapabilityDescriptor] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Counts for logs and statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CatalogCounts {
    pub tools: usize,
    pub prompts: usize,
    pub resources: usize,
    pub servers: usize,
}

#[derive(Debug, Clone, Default)]
pub struct AggregatedCatalog {
    tools: KindCatalog,
    prompts: KindCatalog,
    resources: KindCatalog,
    servers: Vec<String>,
    built_at: Option<DateTime<Utc>>,
}

impl AggregatedCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn built(servers: Vec<String>) -> Self {
        Self {
            servers,
            built_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub(crate) fn insert(&mut self, descriptor: CapabilityDescriptor) -> bool {
        self.of_kind_mut(descriptor.kind).insert(descriptor)
    }

    /// Drop everything `server` contributed
    pub(crate) fn remove_server(&mut self, server: &str) -> usize {
        self.servers.retain(|s| s != server);
        self.tools.remove_server(server)
            + self.prompts.remove_server(server)
            + self.resources.remove_server(server)
    }

    fn of_kind_mut(&mut self, kind: CapabilityKind) -> &mut KindCatalog {
        match kind {
            CapabilityKind::Tool => &mut self.tools,
            CapabilityKind::Prompt => &mut self.prompts,
            CapabilityKind::Resource => &mut self.resources,
        }
    }

    pub fn of_kind(&self, kind: CapabilityKind) -> &KindCatalog {
        match kind {
            CapabilityKind::Tool => &self.tools,
            CapabilityKind::Prompt => &self.prompts,
            CapabilityKind::Resource => &self.resources,
        }
    }

    pub fn lookup(&self, kind: CapabilityKind, exposed_name: &str) -> Option<&CapabilityDescriptor> {
        self.of_kind(kind).get(exposed_name)
    }

    /// Servers that contributed, in registration order
    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    pub fn built_at(&self) -> Option<DateTime<Utc>> {
        self.built_at
    }

    pub fn counts(&self) -> CatalogCounts {
        CatalogCounts {
            tools: self.tools.len(),
            prompts: self.prompts.len(),
            resources: self.resources.len(),
            servers: self.servers.len(),
        }
    }
}
