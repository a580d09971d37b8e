//! `ApiClient` backed by a shared `reqwest::Client`.

use std::time::Duration;

use flowgate_core::collaborator::{ApiClient, ApiRequest, ApiResponse, BoxFuture, CollaboratorError};
use reqwest::Method;

use super::{decode_body, http_client, transport_error};

pub struct ReqwestApiClient {
    client: reqwest::Client,
}

impl ReqwestApiClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

    pub fn new() -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: http_client(Self::REQUEST_TIMEOUT)?,
        })
    }
}

fn parse_method(method: &str) -> Result<Method, CollaboratorError> {
    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| CollaboratorError::Failed(format!("invalid HTTP method '{method}'")))
}

impl ApiClient for ReqwestApiClient {
    fn call<'a>(&'a self, request: ApiRequest) -> BoxFuture<'a, Result<ApiResponse, CollaboratorError>> {
        Box::pin(async move {
            let method = parse_method(&request.method)?;
            tracing::debug!(method = %method, url = %request.url, "calling external api");

            let mut builder = self.client.request(method, &request.url);
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let response = builder.send().await.map_err(transport_error)?;
            let status = response.status().as_u16();
            let text = response.text().await.map_err(transport_error)?;

            Ok(ApiResponse {
                status,
                body: decode_body(text),
            })
        })
    }
}
