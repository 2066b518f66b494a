//! test helpers: an in-memory [`ResourceClient`] fake.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::resource::{Device, ResourceClient, ResourceError, ResourceResult, UserInfo};

#[derive(Debug, Default, Clone)]
struct FakeDevice {
    tags: Vec<String>,
    attributes: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Default, Clone)]
struct FakeUser {
    role: String,
    status: String,
}

#[derive(Debug, Default)]
struct FakeState {
    devices: BTreeMap<String, FakeDevice>,
    users: BTreeMap<String, FakeUser>,
    /// every SetDeviceTags call, in order, for ordering assertions.
    set_tags_log: Vec<(String, Vec<String>)>,
}

/// in-memory control plane for tests.
///
/// clones share state, so a test can hold one handle while the engine holds
/// another.
#[derive(Clone, Default)]
pub struct FakeResourceClient {
    state: Arc<Mutex<FakeState>>,
}

impl FakeResourceClient {
    /// empty control plane.
    pub fn new() -> Self {
        Self::default()
    }

    /// add a device with initial tags.
    pub fn add_device(&self, id: &str, tags: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.devices.insert(
            id.to_string(),
            FakeDevice {
                tags: tags.iter().map(|t| t.to_string()).collect(),
                attributes: BTreeMap::new(),
            },
        );
    }

    /// add a user with a role and status.
    pub fn add_user(&self, id: &str, role: &str, status: &str) {
        let mut state = self.state.lock().unwrap();
        state.users.insert(
            id.to_string(),
            FakeUser {
                role: role.to_string(),
                status: status.to_string(),
            },
        );
    }

    /// current tags of a device (sorted by the engine's authoritative writes).
    pub fn device_tags(&self, id: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .devices
            .get(id)
            .map(|d| d.tags.clone())
            .unwrap_or_default()
    }

    /// current posture attributes of a device.
    pub fn device_attributes(&self, id: &str) -> BTreeMap<String, serde_json::Value> {
        let state = self.state.lock().unwrap();
        state
            .devices
            .get(id)
            .map(|d| d.attributes.clone())
            .unwrap_or_default()
    }

    /// set posture attributes directly, bypassing the engine (drift setup).
    pub fn put_attribute(&self, id: &str, key: &str, value: serde_json::Value) {
        let mut state = self.state.lock().unwrap();
        if let Some(device) = state.devices.get_mut(id) {
            device.attributes.insert(key.to_string(), value);
        }
    }

    /// overwrite tags directly, bypassing the engine (drift setup).
    pub fn put_tags(&self, id: &str, tags: &[&str]) {
        let mut state = self.state.lock().unwrap();
        if let Some(device) = state.devices.get_mut(id) {
            device.tags = tags.iter().map(|t| t.to_string()).collect();
        }
    }

    /// current role of a user.
    pub fn user_role(&self, id: &str) -> String {
        let state = self.state.lock().unwrap();
        state
            .users
            .get(id)
            .map(|u| u.role.clone())
            .unwrap_or_default()
    }

    /// current status of a user.
    pub fn user_status(&self, id: &str) -> String {
        let state = self.state.lock().unwrap();
        state
            .users
            .get(id)
            .map(|u| u.status.clone())
            .unwrap_or_default()
    }

    /// every SetDeviceTags call made against a device, in call order.
    pub fn set_tags_calls(&self, id: &str) -> Vec<Vec<String>> {
        let state = self.state.lock().unwrap();
        state
            .set_tags_log
            .iter()
            .filter(|(d, _)| d == id)
            .map(|(_, tags)| tags.clone())
            .collect()
    }
}

impl ResourceClient for FakeResourceClient {
    async fn list_devices(&self) -> ResourceResult<Vec<Device>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .devices
            .iter()
            .map(|(id, d)| Device {
                id: id.clone(),
                tags: d.tags.clone(),
            })
            .collect())
    }

    async fn get_device(&self, device_id: &str) -> ResourceResult<Option<Device>> {
        let state = self.state.lock().unwrap();
        Ok(state.devices.get(device_id).map(|d| Device {
            id: device_id.to_string(),
            tags: d.tags.clone(),
        }))
    }

    async fn get_device_tags(&self, device_id: &str) -> ResourceResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        state
            .devices
            .get(device_id)
            .map(|d| d.tags.clone())
            .ok_or_else(|| ResourceError::NotFound(format!("device {device_id}")))
    }

    async fn set_device_tags(&self, device_id: &str, tags: &[String]) -> ResourceResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .set_tags_log
            .push((device_id.to_string(), tags.to_vec()));
        let device = state
            .devices
            .get_mut(device_id)
            .ok_or_else(|| ResourceError::NotFound(format!("device {device_id}")))?;
        device.tags = tags.to_vec();
        Ok(())
    }

    async fn get_posture_attributes(
        &self,
        device_id: &str,
    ) -> ResourceResult<BTreeMap<String, serde_json::Value>> {
        let state = self.state.lock().unwrap();
        state
            .devices
            .get(device_id)
            .map(|d| d.attributes.clone())
            .ok_or_else(|| ResourceError::NotFound(format!("device {device_id}")))
    }

    async fn set_posture_attribute(
        &self,
        device_id: &str,
        key: &str,
        value: &serde_json::Value,
    ) -> ResourceResult<()> {
        let mut state = self.state.lock().unwrap();
        let device = state
            .devices
            .get_mut(device_id)
            .ok_or_else(|| ResourceError::NotFound(format!("device {device_id}")))?;
        device.attributes.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn delete_posture_attribute(&self, device_id: &str, key: &str) -> ResourceResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(device) = state.devices.get_mut(device_id) {
            device.attributes.remove(key);
        }
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> ResourceResult<Option<UserInfo>> {
        let state = self.state.lock().unwrap();
        Ok(state.users.get(user_id).map(|u| UserInfo {
            id: user_id.to_string(),
            role: u.role.clone(),
            status: u.status.clone(),
        }))
    }

    async fn list_users(&self) -> ResourceResult<Vec<UserInfo>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .users
            .iter()
            .map(|(id, u)| UserInfo {
                id: id.clone(),
                role: u.role.clone(),
                status: u.status.clone(),
            })
            .collect())
    }

    async fn set_user_role(&self, user_id: &str, role: &str) -> ResourceResult<()> {
        let mut state = self.state.lock().unwrap();
        let user = state
            .users
            .get_mut(user_id)
            .ok_or_else(|| ResourceError::NotFound(format!("user {user_id}")))?;
        user.role = role.to_string();
        Ok(())
    }

    async fn suspend_user(&self, user_id: &str) -> ResourceResult<()> {
        let mut state = self.state.lock().unwrap();
        let user = state
            .users
            .get_mut(user_id)
            .ok_or_else(|| ResourceError::NotFound(format!("user {user_id}")))?;
        user.status = "suspended".to_string();
        Ok(())
    }

    async fn restore_user(&self, user_id: &str) -> ResourceResult<()> {
        let mut state = self.state.lock().unwrap();
        let user = state
            .users
            .get_mut(user_id)
            .ok_or_else(|| ResourceError::NotFound(format!("user {user_id}")))?;
        user.status = "active".to_string();
        Ok(())
    }
}
