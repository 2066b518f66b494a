//! control-plane operations the engine consumes.
//!
//! all operations are idempotent and may be retried on transient failure.
//! the engine only sees the [`ResourceClient`] trait; [`TailscaleClient`]
//! is the production implementation against the Tailscale v2 API.

use std::collections::BTreeMap;
use std::future::Future;

use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// a minimal projection of a device for reconciliation and tag management.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// stable device id.
    pub id: String,
    /// current tag set.
    pub tags: Vec<String>,
}

/// a minimal projection of a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    /// stable user id.
    pub id: String,
    /// current role (wire string; may be outside the closed grant set).
    pub role: String,
    /// current status, e.g. "active" or "suspended".
    pub status: String,
}

/// error from a control-plane operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResourceError {
    /// network blip, rate limit, or 5xx; safe to retry.
    #[error("transient control-plane error: {0}")]
    Transient(String),

    /// the control plane rejected the request; retrying won't help.
    #[error("control-plane request rejected: {0}")]
    Terminal(String),

    /// the addressed resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl ResourceError {
    /// whether retrying this error can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ResourceError::Transient(_))
    }
}

/// result type for control-plane operations.
pub type ResourceResult<T> = Result<T, ResourceError>;

/// idempotent operations against the VPN control plane.
pub trait ResourceClient: Send + Sync + 'static {
    /// list all devices in the tailnet.
    fn list_devices(&self) -> impl Future<Output = ResourceResult<Vec<Device>>> + Send;

    /// get one device. Returns `None` if it does not exist.
    fn get_device(
        &self,
        device_id: &str,
    ) -> impl Future<Output = ResourceResult<Option<Device>>> + Send;

    /// current tag set of a device.
    fn get_device_tags(
        &self,
        device_id: &str,
    ) -> impl Future<Output = ResourceResult<Vec<String>>> + Send;

    /// replace the full tag set of a device (authoritative write).
    fn set_device_tags(
        &self,
        device_id: &str,
        tags: &[String],
    ) -> impl Future<Output = ResourceResult<()>> + Send;

    /// all posture attributes on a device.
    fn get_posture_attributes(
        &self,
        device_id: &str,
    ) -> impl Future<Output = ResourceResult<BTreeMap<String, serde_json::Value>>> + Send;

    /// upsert one posture attribute.
    fn set_posture_attribute(
        &self,
        device_id: &str,
        key: &str,
        value: &serde_json::Value,
    ) -> impl Future<Output = ResourceResult<()>> + Send;

    /// delete one posture attribute. Deleting an absent key is not an error.
    fn delete_posture_attribute(
        &self,
        device_id: &str,
        key: &str,
    ) -> impl Future<Output = ResourceResult<()>> + Send;

    /// get one user. Returns `None` if it does not exist.
    fn get_user(
        &self,
        user_id: &str,
    ) -> impl Future<Output = ResourceResult<Option<UserInfo>>> + Send;

    /// list all users in the tailnet.
    fn list_users(&self) -> impl Future<Output = ResourceResult<Vec<UserInfo>>> + Send;

    /// change a user's role.
    fn set_user_role(
        &self,
        user_id: &str,
        role: &str,
    ) -> impl Future<Output = ResourceResult<()>> + Send;

    /// suspend a user. Suspending a suspended user is a no-op.
    fn suspend_user(&self, user_id: &str) -> impl Future<Output = ResourceResult<()>> + Send;

    /// restore a suspended user. Restoring an active user is a no-op.
    fn restore_user(&self, user_id: &str) -> impl Future<Output = ResourceResult<()>> + Send;
}

/// [`ResourceClient`] implementation against the Tailscale v2 API.
#[derive(Clone)]
pub struct TailscaleClient {
    client: reqwest::Client,
    base_url: String,
    tailnet: String,
    api_key: SecretString,
}

impl TailscaleClient {
    /// create a client for a tailnet. `tailnet` may be `-` to select the
    /// api key's default tailnet.
    pub fn new(base_url: impl Into<String>, tailnet: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            tailnet: tailnet.into(),
            api_key,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v2{path}", self.base_url)
    }

    async fn check(resp: reqwest::Response, op: &str) -> ResourceResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let msg = format!("{op}: {status}: {body}");
        if status == StatusCode::NOT_FOUND {
            Err(ResourceError::NotFound(msg))
        } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Err(ResourceError::Transient(msg))
        } else {
            Err(ResourceError::Terminal(msg))
        }
    }

    fn transport(op: &str, err: reqwest::Error) -> ResourceError {
        ResourceError::Transient(format!("{op}: {err}"))
    }
}

#[derive(Debug, Deserialize)]
struct ApiDevice {
    #[serde(alias = "nodeId")]
    id: String,
    #[serde(default)]
    tags: Vec<String>,
}

impl From<ApiDevice> for Device {
    fn from(d: ApiDevice) -> Self {
        Device {
            id: d.id,
            tags: d.tags,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListDevicesResponse {
    devices: Vec<ApiDevice>,
}

#[derive(Debug, Deserialize)]
struct AttributesResponse {
    attributes: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    status: String,
}

impl From<ApiUser> for UserInfo {
    fn from(u: ApiUser) -> Self {
        UserInfo {
            id: u.id,
            role: u.role,
            status: u.status,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListUsersResponse {
    users: Vec<ApiUser>,
}

impl ResourceClient for TailscaleClient {
    async fn list_devices(&self) -> ResourceResult<Vec<Device>> {
        let op = "list devices";
        let resp = self
            .client
            .get(self.url(&format!("/tailnet/{}/devices", self.tailnet)))
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| Self::transport(op, e))?;
        let resp = Self::check(resp, op).await?;
        let body: ListDevicesResponse = resp.json().await.map_err(|e| Self::transport(op, e))?;
        Ok(body.devices.into_iter().map(Device::from).collect())
    }

    async fn get_device(&self, device_id: &str) -> ResourceResult<Option<Device>> {
        let op = "get device";
        let resp = self
            .client
            .get(self.url(&format!("/device/{device_id}")))
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| Self::transport(op, e))?;
        match Self::check(resp, op).await {
            Ok(resp) => {
                let body: ApiDevice = resp.json().await.map_err(|e| Self::transport(op, e))?;
                Ok(Some(body.into()))
            }
            Err(ResourceError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_device_tags(&self, device_id: &str) -> ResourceResult<Vec<String>> {
        let device = self
            .get_device(device_id)
            .await?
            .ok_or_else(|| ResourceError::NotFound(format!("device {device_id}")))?;
        Ok(device.tags)
    }

    async fn set_device_tags(&self, device_id: &str, tags: &[String]) -> ResourceResult<()> {
        let op = "set device tags";
        let resp = self
            .client
            .post(self.url(&format!("/device/{device_id}/tags")))
            .bearer_auth(self.api_key.expose_secret())
            .json(&serde_json::json!({ "tags": tags }))
            .send()
            .await
            .map_err(|e| Self::transport(op, e))?;
        Self::check(resp, op).await?;
        Ok(())
    }

    async fn get_posture_attributes(
        &self,
        device_id: &str,
    ) -> ResourceResult<BTreeMap<String, serde_json::Value>> {
        let op = "get posture attributes";
        let resp = self
            .client
            .get(self.url(&format!("/device/{device_id}/attributes")))
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| Self::transport(op, e))?;
        let resp = Self::check(resp, op).await?;
        let body: AttributesResponse = resp.json().await.map_err(|e| Self::transport(op, e))?;
        Ok(body.attributes)
    }

    async fn set_posture_attribute(
        &self,
        device_id: &str,
        key: &str,
        value: &serde_json::Value,
    ) -> ResourceResult<()> {
        let op = "set posture attribute";
        let resp = self
            .client
            .post(self.url(&format!("/device/{device_id}/attributes/{key}")))
            .bearer_auth(self.api_key.expose_secret())
            .json(&serde_json::json!({ "value": value }))
            .send()
            .await
            .map_err(|e| Self::transport(op, e))?;
        Self::check(resp, op).await?;
        Ok(())
    }

    async fn delete_posture_attribute(&self, device_id: &str, key: &str) -> ResourceResult<()> {
        let op = "delete posture attribute";
        let resp = self
            .client
            .delete(self.url(&format!("/device/{device_id}/attributes/{key}")))
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| Self::transport(op, e))?;
        match Self::check(resp, op).await {
            // deleting an absent key is idempotent
            Ok(_) | Err(ResourceError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn get_user(&self, user_id: &str) -> ResourceResult<Option<UserInfo>> {
        let op = "get user";
        let resp = self
            .client
            .get(self.url(&format!("/users/{user_id}")))
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| Self::transport(op, e))?;
        match Self::check(resp, op).await {
            Ok(resp) => {
                let body: ApiUser = resp.json().await.map_err(|e| Self::transport(op, e))?;
                Ok(Some(body.into()))
            }
            Err(ResourceError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_users(&self) -> ResourceResult<Vec<UserInfo>> {
        let op = "list users";
        let resp = self
            .client
            .get(self.url(&format!("/tailnet/{}/users", self.tailnet)))
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| Self::transport(op, e))?;
        let resp = Self::check(resp, op).await?;
        let body: ListUsersResponse = resp.json().await.map_err(|e| Self::transport(op, e))?;
        Ok(body.users.into_iter().map(UserInfo::from).collect())
    }

    async fn set_user_role(&self, user_id: &str, role: &str) -> ResourceResult<()> {
        let op = "set user role";
        let resp = self
            .client
            .post(self.url(&format!("/users/{user_id}/role")))
            .bearer_auth(self.api_key.expose_secret())
            .json(&serde_json::json!({ "role": role }))
            .send()
            .await
            .map_err(|e| Self::transport(op, e))?;
        Self::check(resp, op).await?;
        Ok(())
    }

    async fn suspend_user(&self, user_id: &str) -> ResourceResult<()> {
        let op = "suspend user";
        let resp = self
            .client
            .post(self.url(&format!("/users/{user_id}/suspend")))
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| Self::transport(op, e))?;
        Self::check(resp, op).await?;
        Ok(())
    }

    async fn restore_user(&self, user_id: &str) -> ResourceResult<()> {
        let op = "restore user";
        let resp = self
            .client
            .post(self.url(&format!("/users/{user_id}/restore")))
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| Self::transport(op, e))?;
        Self::check(resp, op).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

    fn test_client(base_url: &str) -> TailscaleClient {
        TailscaleClient::new(base_url, "example.com", SecretString::from("tskey-test"))
    }

    #[tokio::test]
    async fn list_devices_parses_projection() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/api/v2/tailnet/example.com/devices"))
            .and(matchers::header("Authorization", "Bearer tskey-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "devices": [
                    { "id": "node-1", "tags": ["tag:server"] },
                    { "nodeId": "node-2" }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let devices = test_client(&server.uri()).list_devices().await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].id, "node-1");
        assert_eq!(devices[0].tags, vec!["tag:server"]);
        assert!(devices[1].tags.is_empty());
    }

    #[tokio::test]
    async fn set_device_tags_posts_full_set() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/api/v2/device/node-1/tags"))
            .and(matchers::body_json(serde_json::json!({
                "tags": ["tag:read", "tag:server"]
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        test_client(&server.uri())
            .set_device_tags(
                "node-1",
                &["tag:read".to_string(), "tag:server".to_string()],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn get_device_maps_404_to_none() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/api/v2/device/ghost"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let device = test_client(&server.uri()).get_device("ghost").await.unwrap();
        assert!(device.is_none());
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/api/v2/tailnet/example.com/devices"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = test_client(&server.uri()).list_devices().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn client_error_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/api/v2/device/node-1/tags"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let err = test_client(&server.uri())
            .set_device_tags("node-1", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ResourceError::Terminal(_)));
    }

    #[tokio::test]
    async fn delete_posture_attribute_absent_key_is_ok() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("DELETE"))
            .and(matchers::path("/api/v2/device/node-1/attributes/custom:gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        test_client(&server.uri())
            .delete_posture_attribute("node-1", "custom:gone")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn posture_attributes_roundtrip() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/api/v2/device/node-1/attributes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "attributes": { "custom:tier": "gold", "node:os": "linux" }
            })))
            .mount(&server)
            .await;

        let attrs = test_client(&server.uri())
            .get_posture_attributes("node-1")
            .await
            .unwrap();
        assert_eq!(attrs.get("custom:tier"), Some(&serde_json::json!("gold")));
        assert_eq!(attrs.len(), 2);
    }

    #[tokio::test]
    async fn get_user_parses_role_and_status() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/api/v2/users/u1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "u1",
                "role": "member",
                "status": "active"
            })))
            .mount(&server)
            .await;

        let user = test_client(&server.uri()).get_user("u1").await.unwrap().unwrap();
        assert_eq!(user.role, "member");
        assert_eq!(user.status, "active");
    }
}
