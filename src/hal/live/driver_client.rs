use super::driver_request::{DriverMethod, DriverRequest};
use crate::hal::HardwareError;
use std::time::Duration;

/// Thin wrapper around `reqwest::Client` bound to the driver layer's base URL.
#[derive(Debug)]
pub(crate) struct DriverClient {
    client: reqwest::Client,
    base_url: String,
}

impl DriverClient {
    /// Builds a client whose every request is bounded by `timeout`.
    pub(crate) fn new(base_url: &str, timeout: Duration) -> Result<Self, HardwareError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
    }

    pub(crate) fn url(&self) -> &str { self.base_url.as_str() }

    /// Sends `request` and decodes the JSON answer.
    ///
    /// Non-success status codes map to [`HardwareError::Rejected`] carrying the body text,
    /// server errors to [`HardwareError::LinkDown`].
    pub(crate) async fn send<R: DriverRequest>(&self, request: &R) -> Result<R::Response, HardwareError> {
        let url = format!("{}{}", self.base_url, request.endpoint());
        let builder = match request.method() {
            DriverMethod::Get => self.client.get(url),
            DriverMethod::Put => self.client.put(url).json(request.body()),
        };
        let response = builder.send().await?;
        let status = response.status();
        if status.is_server_error() {
            return Err(HardwareError::LinkDown);
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(HardwareError::Rejected(format!("{status}: {detail}")));
        }
        Ok(response.json::<R::Response>().await?)
    }
}
