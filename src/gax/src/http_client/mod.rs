// Copyright 2025 Google LLC
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
use crate::response::Response;
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;

/// The method and URL of a request.
///
/// Responses carry this information so consumers, such as the long-running
/// operation pollers, can tell how the response was obtained.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct RequestHead {
    /// The HTTP method.
    pub method: http::Method,
    /// The absolute URL.
    pub url: String,
}

impl RequestHead {
    /// Creates a new instance.
    pub fn new<U: Into<String>>(method: http::Method, url: U) -> Self {
        Self {
            method,
            url: url.into(),
        }
    }
}

/// A request to be sent through a [Pipeline].
///
/// # Example
/// ```
/// # use cloud_mgmt_gax::http_client::Request;
/// let request = Request::get("https://example.com/operations/123")
///     .set_header(http::header::ACCEPT, http::HeaderValue::from_static("application/json"));
/// assert_eq!(request.method(), &http::Method::GET);
/// assert_eq!(request.url(), "https://example.com/operations/123");
/// ```
#[derive(Clone, Debug)]
pub struct Request {
    method: http::Method,
    url: String,
    headers: http::HeaderMap,
    body: Option<Bytes>,
}

impl Request {
    /// Creates a request with the given method and URL.
    pub fn new<U: Into<String>>(method: http::Method, url: U) -> Self {
        Self {
            method,
            url: url.into(),
            headers: http::HeaderMap::new(),
            body: None,
        }
    }

    /// Creates a `GET` request for the given URL.
    pub fn get<U: Into<String>>(url: U) -> Self {
        Self::new(http::Method::GET, url)
    }

    /// Adds a header to the request, replacing any previous value.
    pub fn set_header<K>(mut self, key: K, value: http::HeaderValue) -> Self
    where
        K: http::header::IntoHeaderName,
    {
        self.headers.insert(key, value);
        self
    }

    /// Sets the request body.
    pub fn set_body<B: Into<Bytes>>(mut self, v: B) -> Self {
        self.body = Some(v.into());
        self
    }

    pub fn method(&self) -> &http::Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &http::HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Returns the method and URL of this request.
    pub fn head(&self) -> RequestHead {
        RequestHead::new(self.method.clone(), self.url.clone())
    }
}

/// Sends requests and returns the raw responses.
///
/// A pipeline returns `Ok` for any response the service sends, whatever the
/// status code. It only fails when no response is available, for example, if
/// the connection cannot be established or the request times out.
///
/// Applications rarely implement this trait. They may do so to mock the
/// service in tests, or to add their own policies (authentication, retry,
/// logging) around an existing pipeline.
pub trait PipelineProvider: std::fmt::Debug {
    /// Sends the request and returns the response with its body fully read.
    fn send(&self, request: Request) -> impl Future<Output = Result<Response<Bytes>>> + Send;
}

/// A cheap to clone handle for any [PipelineProvider].
///
/// # Example
/// ```
/// # use cloud_mgmt_gax::http_client::{Pipeline, PipelineProvider, Request};
/// # use cloud_mgmt_gax::response::Response;
/// # use cloud_mgmt_gax::Result;
/// #[derive(Debug)]
/// struct Fixed;
/// impl PipelineProvider for Fixed {
///     async fn send(&self, _request: Request) -> Result<Response<bytes::Bytes>> {
///         Ok(Response::from(bytes::Bytes::from_static(b"{}")))
///     }
/// }
/// let pipeline = Pipeline::from(Fixed);
/// # tokio_test::block_on(async {
/// let response = pipeline.send(Request::get("https://example.com")).await?;
/// assert_eq!(response.body().as_ref(), b"{}");
/// # Ok::<(), cloud_mgmt_gax::error::Error>(()) });
/// ```
#[derive(Clone, Debug)]
pub struct Pipeline {
    inner: Arc<dyn dynamic::PipelineProvider>,
}

impl<T> std::convert::From<T> for Pipeline
where
    T: PipelineProvider + Send + Sync + 'static,
{
    fn from(value: T) -> Self {
        Self {
            inner: Arc::new(value),
        }
    }
}

impl Pipeline {
    /// Sends the request through the wrapped provider.
    pub async fn send(&self, request: Request) -> Result<Response<Bytes>> {
        self.inner.send(request).await
    }
}

pub(crate) mod dynamic {
    use super::{Request, Response, Result};
    use bytes::Bytes;

    /// A dyn-compatible, crate-private version of `PipelineProvider`.
    #[async_trait::async_trait]
    pub trait PipelineProvider: Send + Sync + std::fmt::Debug {
        async fn send(&self, request: Request) -> Result<Response<Bytes>>;
    }

    /// The public PipelineProvider implements the dyn-compatible PipelineProvider.
    #[async_trait::async_trait]
    impl<T> PipelineProvider for T
    where
        T: super::PipelineProvider + Send + Sync,
    {
        async fn send(&self, request: Request) -> Result<Response<Bytes>> {
            T::send(self, request).await
        }
    }
}
