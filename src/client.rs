//! Per-device HTTP access.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use log::debug;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::api::{AccessoryInfo, LightPatch, LightsEnvelope};
use crate::errors::Error;

type Result<T> = std::result::Result<T, Error>;

/// Build the pooled HTTP client shared by every device.
///
/// The timeout applies to the whole request; probes and state reads against
/// lights on a LAN either answer quickly or not at all.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// HTTP wrapper around one device's REST endpoints.
///
/// A `DeviceClient` is stateless apart from its base URL; cloning is cheap
/// and all clones share the underlying connection pool.
///
/// # Example
///
/// ```
/// use std::net::{IpAddr, Ipv4Addr};
/// use std::time::Duration;
/// use keylight_rs::{DeviceClient, build_http_client};
///
/// let http = build_http_client(Duration::from_secs(2)).unwrap();
/// let client = DeviceClient::new(http, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)), 9123);
/// assert_eq!(client.base_url(), "http://192.168.1.20:9123");
/// ```
#[derive(Debug, Clone)]
pub struct DeviceClient {
    http: reqwest::Client,
    base_url: String,
}

impl DeviceClient {
    pub const DEFAULT_PORT: u16 = 9123;
    pub const ACCESSORY_INFO_PATH: &'static str = "/elgato/accessory-info";
    pub const LIGHTS_PATH: &'static str = "/elgato/lights";

    pub fn new(http: reqwest::Client, address: IpAddr, port: u16) -> Self {
        DeviceClient {
            http,
            base_url: format!("http://{}", SocketAddr::new(address, port)),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch accessory metadata.
    pub async fn accessory_info(&self) -> Result<AccessoryInfo> {
        self.get_json(Self::ACCESSORY_INFO_PATH).await
    }

    /// Fetch the current light state.
    pub async fn lights(&self) -> Result<LightsEnvelope> {
        self.get_json(Self::LIGHTS_PATH).await
    }

    /// Apply a state patch and return the state the device settled on.
    ///
    /// The device is authoritative: callers must re-render from the returned
    /// envelope rather than assume the write took the requested values.
    pub async fn set_lights(&self, patch: &LightPatch) -> Result<LightsEnvelope> {
        let url = format!("{}{}", self.base_url, Self::LIGHTS_PATH);
        debug!("PUT {url}: {patch:?}");
        let response = self
            .http
            .put(&url)
            .json(&json!({"numberOfLights": 1, "lights": [patch]}))
            .send()
            .await?;
        decode(url, response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        let response = self.http.get(&url).send().await?;
        decode(url, response).await
    }
}

async fn decode<T: DeserializeOwned>(url: String, response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Status {
            status: status.as_u16(),
            url,
        });
    }
    Ok(response.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> DeviceClient {
        let http = build_http_client(Duration::from_secs(2)).unwrap();
        DeviceClient::new(http, server.address().ip(), server.address().port())
    }

    #[tokio::test]
    async fn test_get_lights() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/elgato/lights"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "numberOfLights": 1,
                "lights": [{"on": 1, "brightness": 40, "temperature": 300}]
            })))
            .mount(&server)
            .await;

        let envelope = client_for(&server).lights().await.unwrap();
        assert_eq!(envelope.first().unwrap().brightness, 40);
    }

    #[tokio::test]
    async fn test_set_lights_wraps_patch_in_envelope() {
        let server = MockServer::start().await;
        let mut patch = LightPatch::new();
        patch.on(true).brightness(55);

        Mock::given(method("PUT"))
            .and(path("/elgato/lights"))
            .and(body_json(json!({
                "numberOfLights": 1,
                "lights": [{"on": 1, "brightness": 55}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "numberOfLights": 1,
                "lights": [{"on": 1, "brightness": 55, "temperature": 250}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let envelope = client_for(&server).set_lights(&patch).await.unwrap();
        assert_eq!(envelope.first().unwrap().temperature, 250);
    }

    #[tokio::test]
    async fn test_non_success_surfaces_status_code() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/elgato/accessory-info"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client_for(&server).accessory_info().await.unwrap_err();
        assert!(matches!(err, Error::Status { status: 404, .. }));
        assert!(err.is_not_found());
    }
}
