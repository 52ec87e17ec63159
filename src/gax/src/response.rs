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

//! Response types.
//!
//! This module contains types related to management service responses.
//! Notably it contains the `Response` type itself. Typically you'll import
//! this type.
//!
//! # Examples
//!
//! Creating a response for mocks
//!
//! ```
//! # use cloud_mgmt_gax::response::{Parts, Response};
//! let mut headers = http::HeaderMap::new();
//! headers.insert("operation-location", http::HeaderValue::from_static("https://example.com/op/1"));
//! let parts = Parts::new()
//!     .set_status(http::StatusCode::ACCEPTED)
//!     .set_headers(headers);
//! let response = Response::from_parts(parts, bytes::Bytes::new());
//! assert_eq!(response.status(), http::StatusCode::ACCEPTED);
//! ```

use crate::http_client::RequestHead;

/// Represents a management service response.
///
/// A response consists of a body and some metadata: the HTTP status code, the
/// headers, and the method and URL of the request that produced it.
///
/// The pipelines return responses where the body is the raw payload, as
/// [bytes::Bytes]. Cloning such a response is cheap, and reading the body
/// does not consume it.
#[derive(Clone, Debug)]
pub struct Response<T> {
    parts: Parts,
    body: T,
}

impl<T> Response<T> {
    /// Creates a response from the body.
    ///
    /// The status code is `200 OK` and there are no headers.
    ///
    /// # Example
    /// ```
    /// # use cloud_mgmt_gax::response::Response;
    /// let response = Response::from("test".to_string());
    /// assert_eq!(response.status(), http::StatusCode::OK);
    /// ```
    pub fn from(body: T) -> Self {
        Self {
            body,
            parts: Parts::default(),
        }
    }

    /// Creates a response from the given parts.
    pub fn from_parts(parts: Parts, body: T) -> Self {
        Self { parts, body }
    }

    /// Returns the HTTP status code.
    pub fn status(&self) -> http::StatusCode {
        self.parts.status
    }

    /// Returns the headers associated with this response.
    ///
    /// # Example
    /// ```
    /// # use cloud_mgmt_gax::response::Response;
    /// let response = Response::from(());
    /// assert!(response.headers().is_empty());
    /// ```
    pub fn headers(&self) -> &http::HeaderMap<http::HeaderValue> {
        &self.parts.headers
    }

    /// Returns the method and URL of the request that produced this response.
    pub fn request(&self) -> Option<&RequestHead> {
        self.parts.request.as_ref()
    }

    /// Returns the body associated with this response.
    pub fn body(&self) -> &T {
        &self.body
    }

    /// Consumes the response returning the metadata, and body.
    pub fn into_parts(self) -> (Parts, T) {
        (self.parts, self.body)
    }

    /// Consumes the response returning only its body.
    ///
    /// # Example
    /// ```
    /// # use cloud_mgmt_gax::response::Response;
    /// let response = Response::from("test".to_string());
    /// let body = response.into_body();
    /// assert_eq!(body.as_str(), "test");
    /// ```
    pub fn into_body(self) -> T {
        self.body
    }

    /// Replaces the body, keeping the metadata.
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            parts: self.parts,
            body: f(self.body),
        }
    }
}

/// Component parts of a response.
///
/// # Example
/// ```
/// # use cloud_mgmt_gax::response::Parts;
/// let mut headers = http::HeaderMap::new();
/// headers.insert(http::header::CONTENT_TYPE, http::HeaderValue::from_static("application/json"));
/// let parts = Parts::new().set_headers(headers);
///
/// assert_eq!(
///     parts.headers.get(http::header::CONTENT_TYPE),
///     Some(&http::HeaderValue::from_static("application/json"))
/// );
/// ```
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct Parts {
    /// The HTTP status code.
    pub status: http::StatusCode,
    /// The HTTP headers.
    pub headers: http::HeaderMap<http::HeaderValue>,
    /// The method and URL of the request, if known.
    pub request: Option<RequestHead>,
}

impl Parts {
    /// Create a new instance.
    pub fn new() -> Self {
        Parts::default()
    }

    /// Set the status code.
    pub fn set_status<V>(mut self, v: V) -> Self
    where
        V: Into<http::StatusCode>,
    {
        self.status = v.into();
        self
    }

    /// Set the headers.
    pub fn set_headers<V>(mut self, v: V) -> Self
    where
        V: Into<http::HeaderMap>,
    {
        self.headers = v.into();
        self
    }

    /// Set the request that produced the response.
    pub fn set_request<V>(mut self, v: V) -> Self
    where
        V: Into<RequestHead>,
    {
        self.request = Some(v.into());
        self
    }
}
