//! Stable exposed-name assignment
//!
//! First come, first served, no stealing: the first server to claim a name
//! keeps it bare, later ones get `<server>.<name>`. An assignment lives until
//! its server is released, so removing the first owner never renames the
//! capabilities of the others.

use std::collections::HashMap;

use tracing::debug;

/// Exposed names for one capability kind
#[derive(Debug, Clone, Default)]
pub struct NameRegistry {
    /// exposed name -> (server, logical name)
    owners: HashMap<String, (String, String)>,
    /// (server, logical name) -> exposed name
    assigned: HashMap<(String, String), String>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exposed name for `logical` on `server`, assigning one if needed
    pub fn assign(&mut self, server: &str, logical: &str) -> String {
        let key = (server.to_string(), logical.to_string());
        if let Some(exposed) = self.assigned.get(&key) {
            return exposed.clone();
        }

        let exposed = if self.is_available(logical) {
            logical.to_string()
        } else {
            let prefixed = format!("{}.{}", server, logical);
            let mut candidate = prefixed.clone();
            let mut suffix = 2;
            while !self.is_available(&candidate) {
                candidate = format!("{}~{}", prefixed, suffix);
                suffix += 1;
            }
            debug!(
                server = %server,
                name = %logical,
                exposed = %candidate,
                "[NameRegistry] Name taken, prefixing"
            );
            candidate
        };

        self.owners.insert(exposed.clone(), key.clone());
        self.assigned.insert(key, exposed.clone());
        exposed
    }

    /// Drop every assignment owned by `server`
    pub fn release_server(&mut self, server: &str) -> usize {
        let before = self.assigned.len();
        self.assigned.retain(|(owner, _), _| owner != server);
        self.owners.retain(|_, (owner, _)| owner != server);
        before - self.assigned.len()
    }

    /// Owning server and logical name behind an exposed name
    pub fn resolve(&self, exposed: &str) -> Option<(&str, &str)> {
        self.owners
            .get(exposed)
            .map(|(server, logical)| (server.as_str(), logical.as_str()))
    }

    pub fn exposed_name(&self, server: &str, logical: &str) -> Option<&str> {
        self.assigned
            .get(&(server.to_string(), logical.to_string()))
            .map(String::as_str)
    }

    pub fn is_available(&self, exposed: &str) -> bool {
        !self.owners.contains_key(exposed)
    }

    pub fn len(&self) -> usize {
        self.assigned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }
}
