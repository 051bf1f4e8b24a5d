//! Lifecycle cleanup.
//!
//! Application uninstall purges the app's registrations. Targets and wake
//! locks for the manifest are left to expire through their own lifecycle: a
//! page being torn down signals its own shutdown.

use std::sync::Arc;

use tracing::{debug, info};

use crate::registry::PageRegistry;

/// External installed-app registry, used only to resolve an uninstall event's
/// app identifier to its manifest URL.
pub trait AppRegistry: Send + Sync {
    fn manifest_url_for_app(&self, app_id: &str) -> Option<String>;
}

pub struct LifecycleManager {
    apps: Arc<dyn AppRegistry>,
}

impl LifecycleManager {
    pub fn new(apps: Arc<dyn AppRegistry>) -> Self {
        Self { apps }
    }

    /// Handle an application-uninstall notification. Unresolvable IDs are
    /// ignored.
    pub fn handle_uninstall(&self, registry: &mut PageRegistry, app_id: &str) {
        match self.apps.manifest_url_for_app(app_id) {
            Some(manifest_url) => {
                let removed = registry.purge_by_manifest(&manifest_url);
                info!(app_id, %manifest_url, removed, "purged registrations for uninstalled app");
            }
            None => {
                debug!(app_id, "uninstall for unknown app id, ignoring");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use herald_common::PageAddress;

    struct FixedApps(HashMap<String, String>);

    impl AppRegistry for FixedApps {
        fn manifest_url_for_app(&self, app_id: &str) -> Option<String> {
            self.0.get(app_id).cloned()
        }
    }

    fn manager() -> LifecycleManager {
        let mut apps = HashMap::new();
        apps.insert("app-1".to_string(), "https://x/m.json".to_string());
        LifecycleManager::new(Arc::new(FixedApps(apps)))
    }

    #[test]
    fn uninstall_purges_only_that_manifest() {
        let mut registry = PageRegistry::new(5);
        registry.register("push", &PageAddress::new("/a", "https://x/m.json"));
        registry.register("alarm", &PageAddress::new("/b", "https://x/m.json"));
        registry.register("push", &PageAddress::new("/a", "https://y/m.json"));

        manager().handle_uninstall(&mut registry, "app-1");

        assert_eq!(registry.len(), 1);
        assert!(registry.find_by_manifest("https://x/m.json").is_empty());
    }

    #[test]
    fn unresolvable_uninstall_is_ignored() {
        let mut registry = PageRegistry::new(5);
        registry.register("push", &PageAddress::new("/a", "https://x/m.json"));

        manager().handle_uninstall(&mut registry, "nobody-knows-this-app");

        assert_eq!(registry.len(), 1);
    }
}
