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

use crate::error::{Error, ErrorDetail, ServiceErrorBuilder};
use crate::response::Response;
use bytes::Bytes;

/// Converts a failed response into an [Error].
///
/// Each management service family may report errors in a slightly different
/// format. The generated clients supply an implementation of this trait to
/// any helper, such as the long-running operation pollers, that needs to turn
/// a response into an error.
///
/// The implementation must always return an error, even if the payload cannot
/// be parsed.
pub trait ErrorUnmarshaller: Send + Sync + std::fmt::Debug {
    /// Returns the error described by `response`.
    fn unmarshal(&self, response: &Response<Bytes>) -> Error;
}

/// Parses the `{"error": {"code": ..., "message": ...}}` envelope.
///
/// If the payload is not in that format the error is reported as
/// [Error::http], with the raw payload.
///
/// # Example
/// ```
/// # use cloud_mgmt_gax::error_unmarshaller::{DefaultErrorUnmarshaller, ErrorUnmarshaller};
/// # use cloud_mgmt_gax::response::{Parts, Response};
/// let body = bytes::Bytes::from_static(br#"{"error": {"code": "Conflict", "message": "busy"}}"#);
/// let response = Response::from_parts(Parts::new().set_status(http::StatusCode::CONFLICT), body);
/// let error = DefaultErrorUnmarshaller.unmarshal(&response);
/// assert_eq!(error.service_error().map(|s| s.detail().code.as_str()), Some("Conflict"));
/// assert_eq!(error.http_status_code(), Some(409));
/// ```
#[derive(Clone, Debug, Default)]
pub struct DefaultErrorUnmarshaller;

impl ErrorUnmarshaller for DefaultErrorUnmarshaller {
    fn unmarshal(&self, response: &Response<Bytes>) -> Error {
        let status_code = response.status().as_u16();
        let headers = response.headers().clone();
        match ErrorDetail::try_from(response.body()) {
            Ok(detail) => Error::service(
                ServiceErrorBuilder::new(detail)
                    .with_http_status_code(status_code)
                    .with_headers(headers)
                    .build(),
            ),
            Err(_) => Error::http(status_code, headers, response.body().clone()),
        }
    }
}
