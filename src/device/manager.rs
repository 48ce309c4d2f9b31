use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{ArduinoDriver, DeviceError, DeviceStatus, Result};

/// Registry of named device drivers, one queue per device.
pub struct DeviceManager {
    drivers: Arc<RwLock<HashMap<String, Arc<ArduinoDriver>>>>,
}

impl DeviceManager {
    pub fn new() -> Self {
        Self { drivers: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Register a driver under its configured name
    pub async fn add_driver(&self, driver: Arc<ArduinoDriver>) -> Result<()> {
        let mut drivers = self.drivers.write().await;
        let name = driver.name().to_string();
        if drivers.contains_key(&name) {
            return Err(DeviceError::AlreadyRegistered(name));
        }
        log::info!("Registered device driver '{}' ({})", name, driver.id());
        drivers.insert(name, driver);
        Ok(())
    }

    pub async fn remove_driver(&self, name: &str) -> Result<Arc<ArduinoDriver>> {
        let driver = self
            .drivers
            .write()
            .await
            .remove(name)
            .ok_or_else(|| DeviceError::NotFound(name.to_string()))?;
        driver.shutdown().await;
        Ok(driver)
    }

    pub async fn driver(&self, name: &str) -> Result<Arc<ArduinoDriver>> {
        self.drivers
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| DeviceError::NotFound(name.to_string()))
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Status of every registered driver, sorted by name
    pub async fn statuses(&self) -> Vec<DeviceStatus> {
        let drivers: Vec<Arc<ArduinoDriver>> = self.drivers.read().await.values().cloned().collect();
        let mut statuses = Vec::with_capacity(drivers.len());
        for driver in drivers {
            statuses.push(driver.status().await);
        }
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    pub async fn shutdown_all(&self) {
        let drivers: Vec<Arc<ArduinoDriver>> = self.drivers.read().await.values().cloned().collect();
        for driver in drivers {
            driver.shutdown().await;
        }
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}
