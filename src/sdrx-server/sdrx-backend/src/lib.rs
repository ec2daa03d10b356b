// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sdrx_app::normalize_name;
use sdrx_backend_soapysdr::DeviceOpener;
use sdrx_core::device::dummy::{DummyConfig, DummyFactory};
use sdrx_core::{DeviceFactory, DynResult};

pub type DriverFactory = fn() -> Arc<dyn DeviceFactory>;

/// Context for registering and instantiating device drivers.
///
/// Openers are shared per driver so the one-open-device rule holds across
/// every caller of [`build_opener`](Self::build_opener), clones included.
#[derive(Clone)]
pub struct RegistrationContext {
    factories: HashMap<String, DriverFactory>,
    openers: Arc<Mutex<HashMap<String, Arc<DeviceOpener>>>>,
}

impl RegistrationContext {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            openers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a driver under a stable name (e.g. "soapysdr").
    pub fn register_driver(&mut self, name: &str, factory: DriverFactory) {
        let key = normalize_name(name);
        if let Ok(mut openers) = self.openers.lock() {
            openers.remove(&key);
        }
        self.factories.insert(key, factory);
    }

    pub fn is_driver_registered(&self, name: &str) -> bool {
        self.factories.contains_key(&normalize_name(name))
    }

    /// List registered driver names.
    pub fn registered_drivers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn build_factory(&self, name: &str) -> DynResult<Arc<dyn DeviceFactory>> {
        let factory = self
            .factories
            .get(&normalize_name(name))
            .ok_or_else(|| format!("Unknown device driver: {}", name))?;
        Ok(factory())
    }

    /// Shared opener for the named driver; at most one device open at a time.
    pub fn build_opener(&self, name: &str) -> DynResult<Arc<DeviceOpener>> {
        let key = normalize_name(name);
        let mut openers = self
            .openers
            .lock()
            .map_err(|_| "device opener registry poisoned")?;
        if let Some(opener) = openers.get(&key) {
            return Ok(opener.clone());
        }
        let factory = self.build_factory(name)?;
        tracing::debug!("Using device driver {}", factory.name());
        let opener = Arc::new(DeviceOpener::new(factory));
        openers.insert(key, opener.clone());
        Ok(opener)
    }
}

impl Default for RegistrationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Register all built-in drivers enabled by features on a context.
pub fn register_builtin_drivers_on(context: &mut RegistrationContext) {
    context.register_driver("dummy", dummy_factory);
    #[cfg(feature = "soapysdr")]
    context.register_driver("soapysdr", soapysdr_factory);
}

fn dummy_factory() -> Arc<dyn DeviceFactory> {
    // Paced so a running server streams at the configured rate.
    Arc::new(DummyFactory::new(DummyConfig {
        paced: true,
        ..DummyConfig::default()
    }))
}

#[cfg(feature = "soapysdr")]
fn soapysdr_factory() -> Arc<dyn DeviceFactory> {
    Arc::new(sdrx_backend_soapysdr::soapy::SoapyFactory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdrx_backend_soapysdr::{DeviceSession, SessionConfig};
    use sdrx_core::SdrError;

    #[test]
    fn builtin_dummy_is_registered() {
        let mut ctx = RegistrationContext::new();
        register_builtin_drivers_on(&mut ctx);
        assert!(ctx.is_driver_registered("Dummy"));
        assert!(ctx.registered_drivers().contains(&"dummy".to_string()));
        let factory = ctx.build_factory("dummy").unwrap();
        assert_eq!(factory.name(), "dummy");
    }

    #[test]
    fn unknown_driver_is_an_error() {
        let ctx = RegistrationContext::new();
        let err = ctx.build_opener("hackrf").err().unwrap();
        assert!(err.to_string().contains("Unknown device driver"));
    }

    #[test]
    fn openers_for_one_driver_share_the_device() {
        let mut ctx = RegistrationContext::new();
        register_builtin_drivers_on(&mut ctx);
        let first = ctx.build_opener("dummy").unwrap();
        let second = ctx.clone().build_opener("DUMMY").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let session = DeviceSession::open(&first, "", SessionConfig::default()).unwrap();
        assert!(matches!(
            DeviceSession::open(&second, "", SessionConfig::default()),
            Err(SdrError::DeviceBusy)
        ));
        drop(session);
        assert!(!second.is_open());
        assert!(DeviceSession::open(&second, "", SessionConfig::default()).is_ok());
    }
}
