// The "world": one immutable bundle of descriptors, rules and validators,
// swapped atomically on reload

use crate::config::Config;
use crate::metrics::Metrics;
use crate::rules::RuleStore;
use crate::schema::{Registry, loader};
use crate::validation::{CelEvaluator, UnsupportedCelEvaluator, Validator};
use anyhow::Result;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Immutable snapshot pinned by every in-flight call. Never mutated after
/// publication; a reload builds a whole new world off the hot path.
pub struct World {
    pub registry: Arc<Registry>,
    pub rules: Arc<RuleStore>,
    pub validator: Arc<Validator>,
    pub built_at: DateTime<Utc>,
}

impl World {
    fn empty() -> Self {
        Self {
            registry: Arc::new(Registry::empty()),
            rules: Arc::new(RuleStore::empty()),
            validator: Arc::new(Validator::disabled()),
            built_at: Utc::now(),
        }
    }
}

/// Shared server state: the current world pointer plus process-wide
/// metrics. Readers load the pointer once per call; publishers swap it
/// after a successful rebuild.
pub struct AppState {
    current: ArcSwap<World>,
    pub metrics: Arc<Metrics>,
    pub config: Config,
    cel: Arc<dyn CelEvaluator>,
    // Serializes rebuilds; never held across the reader path
    rebuild_lock: Mutex<()>,
}

impl AppState {
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            current: ArcSwap::from_pointee(World::empty()),
            metrics: Arc::new(Metrics::new()),
            config,
            cel: Arc::new(UnsupportedCelEvaluator),
            rebuild_lock: Mutex::new(()),
        })
    }

    /// One atomic pointer load; the returned snapshot is pinned for the
    /// caller's lifetime.
    pub fn snapshot(&self) -> Arc<World> {
        self.current.load_full()
    }

    /// Initial load. A broken rules directory keeps the server up with the
    /// schemas loaded and no rules, mirroring the reload-retains-previous
    /// policy from an empty starting point.
    pub async fn bootstrap(&self) {
        let _guard = self.rebuild_lock.lock().await;

        let (registry, validator) = match self.build_schemas() {
            Ok(parts) => parts,
            Err(err) => {
                warn!("Failed to load protos: {:#}", err);
                return;
            }
        };

        let rules = match RuleStore::load(&self.config.rules_dir, &registry) {
            Ok(store) => Arc::new(store),
            Err(err) => {
                warn!("Failed to load rules, starting without: {:#}", err);
                Arc::new(RuleStore::empty())
            }
        };

        self.publish(registry, rules, validator);
    }

    /// Full rebuild (protos and rules). All-or-nothing: on any error the
    /// previous world stays published and the error is returned.
    pub async fn rebuild(&self) -> Result<Arc<World>> {
        let _guard = self.rebuild_lock.lock().await;

        let (registry, validator) = self.build_schemas()?;
        let rules = Arc::new(RuleStore::load(&self.config.rules_dir, &registry)?);

        Ok(self.publish(registry, rules, validator))
    }

    /// Rules-only reload against the currently published descriptors.
    pub async fn reload_rules(&self) -> Result<Arc<World>> {
        let _guard = self.rebuild_lock.lock().await;

        let current = self.snapshot();
        let rules = Arc::new(RuleStore::load(&self.config.rules_dir, &current.registry)?);

        let world = Arc::new(World {
            registry: current.registry.clone(),
            rules,
            validator: current.validator.clone(),
            built_at: Utc::now(),
        });
        self.current.store(world.clone());
        info!(
            "Rules reloaded: {} key(s), {} option(s)",
            world.rules.rule_keys().len(),
            world.rules.total_candidates()
        );
        Ok(world)
    }

    fn build_schemas(&self) -> Result<(Arc<Registry>, Arc<Validator>)> {
        let loaded = loader::load(&self.config.proto_dir, &[])?;
        let registry = Arc::new(Registry::from_loaded(loaded));
        let validator = Arc::new(Validator::build(
            registry.pool(),
            self.config.validation_source,
            self.config.validation_mode,
            self.config.validation_enabled,
            self.config.message_cel_experimental,
            self.cel.clone(),
        ));
        Ok((registry, validator))
    }

    fn publish(
        &self,
        registry: Arc<Registry>,
        rules: Arc<RuleStore>,
        validator: Arc<Validator>,
    ) -> Arc<World> {
        let world = Arc::new(World {
            registry,
            rules,
            validator,
            built_at: Utc::now(),
        });
        self.current.store(world.clone());
        info!(
            "World published: {} method(s), {} rule key(s), {} constrained type(s)",
            world.registry.methods().count(),
            world.rules.rule_keys().len(),
            world.validator.constrained_types()
        );
        world
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(proto: &str, rule: Option<(&str, &str)>) -> (Arc<AppState>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let proto_dir = dir.path().join("protos");
        let rules_dir = dir.path().join("rules");
        std::fs::create_dir_all(&proto_dir).unwrap();
        std::fs::create_dir_all(&rules_dir).unwrap();
        std::fs::write(proto_dir.join("svc.proto"), proto).unwrap();
        if let Some((name, content)) = rule {
            std::fs::write(rules_dir.join(name), content).unwrap();
        }

        let config = Config {
            proto_dir,
            rules_dir,
            ..Config::default()
        };
        (AppState::new(config), dir)
    }

    const PROTO: &str = r#"
syntax = "proto3";
package t;
message Req { string id = 1; }
message Resp { string id = 1; }
service Svc { rpc Get(Req) returns (Resp); }
"#;

    #[tokio::test]
    async fn test_bootstrap_publishes_world() {
        let (state, _dir) = state_with(
            PROTO,
            Some(("t.Svc.Get.yaml", "responses:\n  - body: { id: \"x\" }\n")),
        );
        state.bootstrap().await;

        let world = state.snapshot();
        assert!(world.registry.lookup_method("t.Svc/Get").is_ok());
        assert_eq!(world.rules.candidates("t.svc.get").len(), 1);
    }

    #[tokio::test]
    async fn test_failed_reload_preserves_previous_world() {
        let (state, dir) = state_with(
            PROTO,
            Some(("t.Svc.Get.yaml", "responses:\n  - body: { id: \"x\" }\n")),
        );
        state.bootstrap().await;
        let before = state.snapshot();

        // Corrupt the rules directory, then attempt a reload
        std::fs::write(
            dir.path().join("rules").join("t.Svc.Get.yaml"),
            "responses: [",
        )
        .unwrap();

        assert!(state.reload_rules().await.is_err());
        let after = state.snapshot();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.rules.candidates("t.svc.get").len(), 1);
    }

    #[tokio::test]
    async fn test_in_flight_snapshot_is_stable_across_reload() {
        let (state, dir) = state_with(
            PROTO,
            Some(("t.Svc.Get.yaml", "responses:\n  - body: { id: \"x\" }\n")),
        );
        state.bootstrap().await;

        let pinned = state.snapshot();
        std::fs::write(
            dir.path().join("rules").join("t.Svc.Get.yaml"),
            "responses:\n  - body: { id: \"y\" }\n  - body: { id: \"z\" }\n",
        )
        .unwrap();
        state.reload_rules().await.unwrap();

        // The pinned snapshot still sees the old rules
        assert_eq!(pinned.rules.candidates("t.svc.get").len(), 1);
        assert_eq!(state.snapshot().rules.candidates("t.svc.get").len(), 2);
    }
}
