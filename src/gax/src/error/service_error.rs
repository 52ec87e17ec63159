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

use http::HeaderMap;

/// The error details returned by a management service.
///
/// Management services report errors using an envelope of the form:
///
/// ```json
/// {"error": {"code": "ResourceNotFound", "message": "...", "target": "...", "details": []}}
/// ```
///
/// The `code` is a string, specific to each service, and the `details` are
/// nested instances of the same shape.
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default, rename_all = "camelCase")]
#[non_exhaustive]
pub struct ErrorDetail {
    /// The error code, e.g. `ResourceNotFound` or `InvalidParameter`.
    pub code: String,
    /// A human-readable description of the error.
    pub message: String,
    /// The target of the error, typically a parameter or resource name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Nested errors, if any.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<ErrorDetail>,
    /// Service specific additional information.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub additional_info: Vec<serde_json::Value>,
}

impl ErrorDetail {
    /// Creates a new instance with the given code and message.
    pub fn new<C: Into<String>, M: Into<String>>(code: C, message: M) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    /// Sets the [target][ErrorDetail::target] field.
    pub fn set_target<T: Into<String>>(mut self, v: T) -> Self {
        self.target = Some(v.into());
        self
    }

    /// Sets the [details][ErrorDetail::details] field.
    pub fn set_details<T, V>(mut self, v: T) -> Self
    where
        T: IntoIterator<Item = V>,
        V: Into<ErrorDetail>,
    {
        self.details = v.into_iter().map(|d| d.into()).collect();
        self
    }
}

#[derive(serde::Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

impl TryFrom<&bytes::Bytes> for ErrorDetail {
    type Error = ErrorDetailParseError;

    fn try_from(value: &bytes::Bytes) -> Result<Self, Self::Error> {
        let envelope = serde_json::from_slice::<ErrorEnvelope>(value)?;
        if envelope.error.code.is_empty() && envelope.error.message.is_empty() {
            return Err(ErrorDetailParseError::Empty);
        }
        Ok(envelope.error)
    }
}

/// The payload of a failed response is not a valid error envelope.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum ErrorDetailParseError {
    #[error("cannot parse the error envelope: {0}")]
    Json(#[from] serde_json::Error),
    #[error("the error envelope has neither a code nor a message")]
    Empty,
}

/// An error returned by a management service.
///
/// Management services include detailed error information represented by an
/// [ErrorDetail]. Errors received via HTTP also have the status code and the
/// response headers associated with them.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ServiceError {
    detail: ErrorDetail,
    http_status_code: Option<u16>,
    headers: Option<HeaderMap>,
}

impl ServiceError {
    /// Returns the underlying [ErrorDetail].
    pub fn detail(&self) -> &ErrorDetail {
        &self.detail
    }

    /// The status code, if any, associated with this error.
    ///
    /// Errors embedded in the *payload* of a successful response, e.g. the
    /// body of a failed long-running operation, have no status code.
    pub fn http_status_code(&self) -> &Option<u16> {
        &self.http_status_code
    }

    pub fn headers(&self) -> &Option<HeaderMap> {
        &self.headers
    }
}

/// A builder for [ServiceError].
pub struct ServiceErrorBuilder {
    inner: ServiceError,
}

impl ServiceErrorBuilder {
    /// Creates a new builder to construct complex [ServiceError] instances.
    pub fn new<T>(v: T) -> Self
    where
        T: Into<ServiceError>,
    {
        Self { inner: v.into() }
    }

    /// Consumes the builder and returns the resulting error.
    pub fn build(self) -> ServiceError {
        self.inner
    }

    /// Sets the HTTP status code for this service error.
    pub fn with_http_status_code<T: Into<u16>>(mut self, v: T) -> Self {
        self.inner.http_status_code = Some(v.into());
        self
    }

    /// Sets the headers for this error.
    pub fn with_headers<T>(mut self, v: T) -> Self
    where
        T: Into<HeaderMap>,
    {
        self.inner.headers = Some(v.into());
        self
    }
}

impl From<ErrorDetail> for ServiceError {
    fn from(value: ErrorDetail) -> Self {
        Self {
            detail: value,
            http_status_code: None,
            headers: None,
        }
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "the service returned an error: code={}, message={}",
            self.detail.code, self.detail.message
        )?;
        if let Some(t) = &self.detail.target {
            write!(f, ", target={t}")?;
        }
        if let Some(c) = &self.http_status_code {
            write!(f, ", http_status_code={c}")?;
        }
        if let Some(h) = &self.headers {
            write!(f, ", headers=[")?;
            for (i, (k, v)) in h.iter().enumerate() {
                if i != 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{k}: {}", v.to_str().unwrap_or("[error]"))?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

impl std::error::Error for ServiceError {}
