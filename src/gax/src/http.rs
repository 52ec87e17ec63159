// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::Result;
use crate::error::Error;
use crate::http_client::{PipelineProvider, Request};
use crate::response::{Parts, Response};
use bytes::Bytes;

/// A [PipelineProvider] that sends requests with [reqwest].
///
/// This pipeline performs no retries and no authentication. Wrap it in
/// another [PipelineProvider] to add such policies.
///
/// # Example
/// ```
/// # use cloud_mgmt_gax::http::ReqwestPipeline;
/// # use cloud_mgmt_gax::http_client::Pipeline;
/// let pipeline = Pipeline::from(ReqwestPipeline::new().with_user_agent("my-app/1.0"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct ReqwestPipeline {
    inner: reqwest::Client,
    user_agent: Option<String>,
}

impl ReqwestPipeline {
    /// Creates a pipeline with a default [reqwest::Client].
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a pre-configured client, e.g. to set timeouts or proxies.
    pub fn with_client(mut self, v: reqwest::Client) -> Self {
        self.inner = v;
        self
    }

    /// Sets the `User-Agent` header on every request.
    pub fn with_user_agent<V: Into<String>>(mut self, v: V) -> Self {
        self.user_agent = Some(v.into());
        self
    }

    fn map_send_error(err: reqwest::Error) -> Error {
        match err {
            e if e.is_builder() => Error::binding(e),
            e if e.is_timeout() => Error::timeout(e),
            e => Error::io(e),
        }
    }
}

impl PipelineProvider for ReqwestPipeline {
    async fn send(&self, request: Request) -> Result<Response<Bytes>> {
        let head = request.head();
        let mut builder = self
            .inner
            .request(request.method().clone(), request.url())
            .headers(request.headers().clone());
        if let Some(user_agent) = &self.user_agent {
            let value = http::HeaderValue::from_str(user_agent).map_err(Error::binding)?;
            builder = builder.header(http::header::USER_AGENT, value);
        }
        if let Some(body) = request.body() {
            builder = builder.body(body.clone());
        }
        tracing::debug!("sending {} {}", head.method, head.url);
        let response = builder.send().await.map_err(Self::map_send_error)?;

        let response = http::Response::from(response);
        let (parts, body) = response.into_parts();
        let body = http_body_util::BodyExt::collect(body)
            .await
            .map_err(Error::io)?
            .to_bytes();
        tracing::debug!("received {} for {} {}", parts.status, head.method, head.url);

        let parts = Parts::new()
            .set_status(parts.status)
            .set_headers(parts.headers)
            .set_request(head);
        Ok(Response::from_parts(parts, body))
    }
}
