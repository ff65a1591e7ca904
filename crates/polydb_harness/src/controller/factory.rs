//! Maps backend identities to controller implementations.

use super::{
    mysql_container_spec, oceanbase_container_spec, BackendController, MySqlController,
    OceanBaseController,
};
use crate::backend::BackendKind;
use crate::config::HarnessSettings;
use crate::error::{HarnessError, Result};
use crate::provider::DockerProvider;
use crate::script::{DirScriptLoader, ScriptRunner};
use std::collections::HashMap;
use std::sync::Arc;

type Constructor = Arc<dyn Fn() -> Box<dyn BackendController> + Send + Sync>;

/// Creates a fresh controller per backend run.
#[derive(Clone, Default)]
pub struct ControllerFactory {
    constructors: HashMap<BackendKind, Constructor>,
}

impl ControllerFactory {
    /// A factory with nothing registered.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Docker-backed MySQL and OceanBase controllers configured from `settings`.
    pub fn from_settings(settings: &HarnessSettings) -> Self {
        let scripts = ScriptRunner::new(Arc::new(DirScriptLoader::new(&settings.script_dir)));

        let mysql_spec = mysql_container_spec(settings.image_for(BackendKind::MySql));
        let mysql_scripts = scripts.clone();

        let oceanbase_spec = oceanbase_container_spec(settings.image_for(BackendKind::OceanBase));
        let readiness = settings.readiness;

        Self::empty()
            .register(BackendKind::MySql, move || {
                Box::new(MySqlController::new(
                    Box::new(DockerProvider::new(mysql_spec.clone())),
                    mysql_scripts.clone(),
                ))
            })
            .register(BackendKind::OceanBase, move || {
                Box::new(OceanBaseController::new(
                    Box::new(DockerProvider::new(oceanbase_spec.clone())),
                    scripts.clone(),
                    readiness,
                ))
            })
    }

    /// Register (or replace) the constructor for `kind`.
    pub fn register<C>(mut self, kind: BackendKind, constructor: C) -> Self
    where
        C: Fn() -> Box<dyn BackendController> + Send + Sync + 'static,
    {
        self.constructors.insert(kind, Arc::new(constructor));
        self
    }

    pub fn create(&self, kind: BackendKind) -> Result<Box<dyn BackendController>> {
        let constructor = self
            .constructors
            .get(&kind)
            .ok_or_else(|| HarnessError::UnsupportedBackend(kind.display_name().to_string()))?;
        Ok(constructor())
    }

    /// Like [`create`](Self::create), resolving the backend by name.
    pub fn create_by_name(&self, name: &str) -> Result<Box<dyn BackendController>> {
        self.create(name.parse()?)
    }

    /// Registered backends, in [`BackendKind::all`] order.
    pub fn supported(&self) -> Vec<BackendKind> {
        BackendKind::all()
            .iter()
            .copied()
            .filter(|kind| self.constructors.contains_key(kind))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControllerState;
    use crate::testing::{EventLog, MockController};

    #[test]
    fn test_standard_factory() {
        let factory = ControllerFactory::from_settings(&HarnessSettings::default());
        assert_eq!(
            factory.supported(),
            vec![BackendKind::MySql, BackendKind::OceanBase]
        );

        for kind in BackendKind::all() {
            let controller = factory.create(*kind).unwrap();
            assert_eq!(controller.backend(), *kind);
            assert_eq!(controller.state(), ControllerState::Idle);
            assert!(!controller.is_running());
        }

        let by_name = factory.create_by_name("oceanbase").unwrap();
        assert_eq!(by_name.backend(), BackendKind::OceanBase);
    }

    #[test]
    fn test_unsupported_backend() {
        let factory = ControllerFactory::empty();
        assert!(factory.supported().is_empty());
        assert!(matches!(
            factory.create(BackendKind::MySql),
            Err(HarnessError::UnsupportedBackend(name)) if name == "MySQL"
        ));

        let factory = ControllerFactory::from_settings(&HarnessSettings::default());
        assert!(matches!(
            factory.create_by_name("db2"),
            Err(HarnessError::UnsupportedBackend(name)) if name == "db2"
        ));
    }

    #[test]
    fn test_register_replaces_constructor() {
        let events = EventLog::default();
        let log = events.clone();
        let factory = ControllerFactory::from_settings(&HarnessSettings::default())
            .register(BackendKind::MySql, move || {
                Box::new(MockController::new(BackendKind::MySql, log.clone()))
            });

        let controller = factory.create(BackendKind::MySql).unwrap();
        assert_eq!(controller.backend(), BackendKind::MySql);
        assert_eq!(controller.state(), ControllerState::Idle);
        assert!(events.snapshot().is_empty());
    }

    #[test]
    fn test_concurrent_creation() {
        let factory = Arc::new(ControllerFactory::from_settings(&HarnessSettings::default()));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let factory = factory.clone();
                std::thread::spawn(move || factory.create(BackendKind::OceanBase).unwrap().backend())
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), BackendKind::OceanBase);
        }
    }
}
