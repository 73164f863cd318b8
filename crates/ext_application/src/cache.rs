use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::platform::{AppRecord, PackageRecord};

#[derive(Default)]
struct CacheState {
    app_packages: HashMap<String, String>,
    packages: HashMap<String, PackageRecord>,
}

/// App id → package and package id → record, filled by a full listing and
/// invalidated per application by package events
#[derive(Default)]
pub struct PackageCache {
    state: Mutex<CacheState>,
}

impl PackageCache {
    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn populate(&self, packages: &[PackageRecord], apps: &[AppRecord]) {
        let mut state = self.state();
        state.packages = packages
            .iter()
            .map(|p| (p.package_id.clone(), p.clone()))
            .collect();
        state.app_packages = apps
            .iter()
            .map(|a| (a.app_id.clone(), a.package_id.clone()))
            .collect();
    }

    pub fn package_of(&self, app_id: &str) -> Option<String> {
        self.state().app_packages.get(app_id).cloned()
    }

    pub fn package(&self, package_id: &str) -> Option<PackageRecord> {
        self.state().packages.get(package_id).cloned()
    }

    /// Forget an application and the package it belonged to
    pub fn invalidate_app(&self, app_id: &str) {
        let mut state = self.state();
        if let Some(package_id) = state.app_packages.remove(app_id) {
            state.packages.remove(&package_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(app_id: &str, package_id: &str) -> AppRecord {
        AppRecord {
            app_id: app_id.into(),
            package_id: package_id.into(),
            ..Default::default()
        }
    }

    fn package(package_id: &str) -> PackageRecord {
        PackageRecord {
            package_id: package_id.into(),
            version: "1.0.0".into(),
            package_type: "tpk".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_populate_and_invalidate() {
        let cache = PackageCache::default();
        assert_eq!(cache.package_of("app.a"), None);

        cache.populate(
            &[package("pkg.a"), package("pkg.b")],
            &[app("app.a", "pkg.a"), app("app.b", "pkg.b")],
        );
        assert_eq!(cache.package_of("app.a").as_deref(), Some("pkg.a"));
        assert_eq!(cache.package("pkg.b").unwrap().version, "1.0.0");

        cache.invalidate_app("app.a");
        assert_eq!(cache.package_of("app.a"), None);
        assert_eq!(cache.package("pkg.a"), None);
        assert!(cache.package("pkg.b").is_some());
    }
}
