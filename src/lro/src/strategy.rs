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

//! The strategies used to track the progress of an operation.
//!
//! Management services signal a long-running operation using one of two
//! response headers. With `Operation-Location` the service provides a
//! monitor URL, and each poll returns a JSON object with a `status` field.
//! With `Location` the HTTP status code of each poll is the only state: the
//! operation is in progress while the status code is `202 Accepted`. If
//! neither header is present the operation completed synchronously.

use gax::Result;
use gax::error::Error;
use gax::http_client::RequestHead;
use gax::response::Response;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use serde_json::{Map, Value};

pub(crate) const OPERATION_LOCATION: &str = "operation-location";

/// Tracks the progress of an operation, selected once per poller.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum OperationStrategy {
    OperationLocation(OperationLocation),
    Location(Location),
    NoOp,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct OperationLocation {
    request: RequestHead,
    poll_url: String,
    location_url: Option<String>,
    status: String,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Location {
    poll_url: String,
    status: StatusCode,
}

impl OperationStrategy {
    /// Selects the strategy for the initiating response.
    ///
    /// `Operation-Location` takes precedence over `Location`. Fails with a
    /// binding error if `Operation-Location` is selected but the response does
    /// not include the method and URL of its request.
    pub(crate) fn select(response: &Response<Bytes>) -> Result<Self> {
        let base = response.request();
        let headers = response.headers();
        if let Some(poll_url) = header_url(headers, OPERATION_LOCATION, base) {
            let Some(request) = base.cloned() else {
                return Err(Error::binding(
                    "the initial response does not include the method and URL of its request",
                ));
            };
            return Ok(Self::OperationLocation(OperationLocation {
                request,
                poll_url,
                location_url: header_url(headers, http::header::LOCATION.as_str(), base),
                status: String::new(),
            }));
        }
        if let Some(poll_url) = header_url(headers, http::header::LOCATION.as_str(), base) {
            return Ok(Self::Location(Location {
                poll_url,
                status: response.status(),
            }));
        }
        Ok(Self::NoOp)
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::OperationLocation(_) => "Operation-Location",
            Self::Location(_) => "Location",
            Self::NoOp => "NoOp",
        }
    }

    pub(crate) fn done(&self) -> bool {
        match self {
            Self::OperationLocation(s) => status_is_terminal(&s.status),
            Self::Location(s) => s.status != StatusCode::ACCEPTED,
            Self::NoOp => true,
        }
    }

    pub(crate) fn status(&self) -> String {
        match self {
            Self::OperationLocation(s) => s.status.clone(),
            Self::Location(s) => s.status.as_u16().to_string(),
            Self::NoOp => "succeeded".to_string(),
        }
    }

    pub(crate) fn poll_url(&self) -> Option<&str> {
        match self {
            Self::OperationLocation(s) => Some(&s.poll_url),
            Self::Location(s) => Some(&s.poll_url),
            Self::NoOp => None,
        }
    }

    /// Updates the state using a poll response that passed the classifier.
    ///
    /// On error the strategy is unchanged.
    pub(crate) fn update(&mut self, response: &Response<Bytes>) -> Result<()> {
        match self {
            Self::OperationLocation(s) => {
                let body = json_object(response.body())?;
                let status = match body.get("status") {
                    None => {
                        return Err(Error::deser(
                            "the response body does not contain the status field",
                        ));
                    }
                    Some(Value::String(status)) => status.clone(),
                    Some(v) => {
                        return Err(Error::deser(format!(
                            "the status value {v} was not in string format"
                        )));
                    }
                };
                s.status = status;
                refresh(&mut s.poll_url, response, OPERATION_LOCATION);
            }
            Self::Location(s) => {
                refresh(&mut s.poll_url, response, http::header::LOCATION.as_str());
                s.status = response.status();
            }
            Self::NoOp => {}
        }
        Ok(())
    }

    /// Returns the URL of the final GET request, if any.
    ///
    /// `last` is the response of the last successful poll.
    pub(crate) fn final_get_url(&self, last: &Response<Bytes>) -> Result<Option<String>> {
        let Self::OperationLocation(s) = self else {
            return Ok(None);
        };
        let body = json_object(last.body())?;
        match body.get("resourceLocation") {
            None => {}
            Some(Value::String(v)) if v.is_empty() => {}
            Some(Value::String(v)) => return Ok(Some(resolve(last.request(), v))),
            Some(v) => {
                return Err(Error::deser(format!(
                    "the resourceLocation value {v} was not in string format"
                )));
            }
        }
        let url = match s.request.method {
            Method::PUT | Method::PATCH => Some(s.request.url.clone()),
            Method::POST => s.location_url.clone(),
            _ => None,
        };
        Ok(url)
    }
}

/// Returns true for `succeeded`, `failed`, and `cancelled`, in any case.
pub(crate) fn status_is_terminal(status: &str) -> bool {
    ["succeeded", "failed", "cancelled"]
        .iter()
        .any(|s| status.eq_ignore_ascii_case(s))
}

fn json_object(body: &Bytes) -> Result<Map<String, Value>> {
    let object = serde_json::from_slice::<Map<String, Value>>(body).map_err(Error::deser)?;
    if object.is_empty() {
        return Err(Error::deser("the response does not contain a body"));
    }
    Ok(object)
}

// Only a fresh, non-empty header value replaces a poll URL.
fn refresh(poll_url: &mut String, response: &Response<Bytes>, name: &str) {
    if let Some(url) = header_url(response.headers(), name, response.request()) {
        *poll_url = url;
    }
}

fn header_url(headers: &HeaderMap, name: &str, base: Option<&RequestHead>) -> Option<String> {
    let value = headers.get(name)?.to_str().ok()?;
    if value.is_empty() {
        return None;
    }
    Some(resolve(base, value))
}

// Relative URLs are resolved against the URL of the request that returned them.
fn resolve(base: Option<&RequestHead>, value: &str) -> String {
    if url::Url::parse(value).is_ok() {
        return value.to_string();
    }
    base.and_then(|b| url::Url::parse(&b.url).ok())
        .and_then(|b| b.join(value).ok())
        .map(String::from)
        .unwrap_or_else(|| value.to_string())
}
