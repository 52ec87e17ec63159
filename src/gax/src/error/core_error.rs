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

use super::ServiceError;
use http::HeaderMap;
use std::error::Error as StdError;
use std::sync::Arc;

type BoxError = Box<dyn StdError + Send + Sync>;
type SharedError = Arc<dyn StdError + Send + Sync>;

fn shared<T: Into<BoxError>>(source: T) -> Option<SharedError> {
    let source: BoxError = source.into();
    Some(Arc::from(source))
}

/// The core error returned by all client libraries.
///
/// The client libraries report errors from multiple sources. For example, the
/// service may reject a request, the transport may be unable to create the
/// necessary connection, a long-running operation may fail while it is being
/// polled, or the library may be unable to parse a response.
///
/// Most applications will just return the error or log it, without any further
/// action. However, some applications may need to interrogate the error
/// details. This type offers a series of predicates to determine the error
/// kind, and accessors to query the most common error details. Applications
/// can query the error [source][std::error::Error::source] for deeper
/// information.
///
/// Errors are cheap to clone. A long-running operation poller that reached a
/// terminal failure returns the same error on every subsequent call.
///
/// # Example
/// ```
/// use cloud_mgmt_gax::error::Error;
/// match example_function() {
///     Err(e) if e.is_operation_failed() => {
///         println!("the operation failed with HTTP status {:?}", e.http_status_code());
///     },
///     Err(e) if e.is_transport() => { println!("cannot reach the service {e}"); },
///     Err(e) => { println!("some other error {e}"); },
///     Ok(_) => { println!("success, how boring"); },
/// }
///
/// fn example_function() -> Result<String, Error> {
///     // ... details omitted ...
///     # Err(Error::http(404, http::HeaderMap::new(), bytes::Bytes::from_static(b"NOT FOUND")))
/// }
/// ```
#[derive(Clone, Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<SharedError>,
}

impl Error {
    /// Creates an error with the information returned by the service.
    ///
    /// # Example
    /// ```
    /// use cloud_mgmt_gax::error::{Error, ErrorDetail, ServiceErrorBuilder};
    /// let detail = ErrorDetail::new("ResourceNotFound", "the resource is not there");
    /// let error = Error::service(ServiceErrorBuilder::new(detail).with_http_status_code(404_u16).build());
    /// assert!(error.is_operation_failed());
    /// assert_eq!(error.http_status_code(), Some(404));
    /// ```
    pub fn service(error: ServiceError) -> Self {
        Self {
            kind: ErrorKind::Service(Box::new(error)),
            source: None,
        }
    }

    /// The [ServiceError] payload associated with this error, if any.
    ///
    /// Management services return an error envelope with a string code, a
    /// human-readable message, and optionally a target and nested details.
    /// The default [ErrorUnmarshaller] extracts these values.
    ///
    /// [ErrorUnmarshaller]: crate::error_unmarshaller::ErrorUnmarshaller
    pub fn service_error(&self) -> Option<&ServiceError> {
        match &self.kind {
            ErrorKind::Service(e) => Some(e.as_ref()),
            _ => None,
        }
    }

    /// A failed response without a recognizable error payload.
    ///
    /// Sometimes the error is generated before it reaches the service. For
    /// example, a proxy or load balancer may return errors without the detailed
    /// payload. In such cases the client library returns the status code,
    /// headers, and HTTP payload.
    pub fn http(status_code: u16, headers: HeaderMap, payload: bytes::Bytes) -> Self {
        let details = HttpDetails {
            status_code,
            headers,
            payload,
        };
        Self {
            kind: ErrorKind::Http(Box::new(details)),
            source: None,
        }
    }

    /// The service reported a failure for the operation.
    ///
    /// This is true for errors created by an [ErrorUnmarshaller] from a
    /// response whose status code indicates failure, whether or not the
    /// response contained a recognizable error payload.
    ///
    /// # Troubleshooting
    ///
    /// As this error type is created from the service response, troubleshooting
    /// this problem typically involves reading the service documentation for
    /// the error [code][crate::error::ErrorDetail::code] returned.
    ///
    /// [ErrorUnmarshaller]: crate::error_unmarshaller::ErrorUnmarshaller
    pub fn is_operation_failed(&self) -> bool {
        matches!(self.kind, ErrorKind::Service(_) | ErrorKind::Http(_))
    }

    /// Creates an error representing a rejected long-running operation.
    ///
    /// The initial response of a long-running operation must have one of the
    /// accepted status codes, otherwise no poller is created.
    pub fn rejected(status_code: u16, headers: HeaderMap, payload: bytes::Bytes) -> Self {
        let details = HttpDetails {
            status_code,
            headers,
            payload,
        };
        Self {
            kind: ErrorKind::Rejected(Box::new(details)),
            source: None,
        }
    }

    /// The service did not accept the request to start a long-running operation.
    ///
    /// # Troubleshooting
    ///
    /// The generated clients check the status code before creating a poller,
    /// this error indicates the service returned an unexpected status code for
    /// a successful request. Use [http_status_code][Error::http_status_code]
    /// and [http_payload][Error::http_payload] to examine the response.
    pub fn is_rejected(&self) -> bool {
        matches!(self.kind, ErrorKind::Rejected(_))
    }

    /// Creates an error representing a timeout.
    ///
    /// # Example
    /// ```
    /// use std::error::Error as _;
    /// use cloud_mgmt_gax::error::Error;
    /// let error = Error::timeout("simulated timeout");
    /// assert!(error.is_timeout());
    /// assert!(error.is_transport());
    /// assert!(error.source().is_some());
    /// ```
    pub fn timeout<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Timeout,
            source: shared(source),
        }
    }

    /// The request could not be completed before its deadline.
    ///
    /// The pipeline sets no deadline by default. This error only appears if
    /// the application configured a timeout in the underlying HTTP client.
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// A problem in the transport layer without a full HTTP response.
    ///
    /// Examples include: a broken connection after the request is sent, or a
    /// failure to resolve the host name.
    pub fn io<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Io,
            source: shared(source),
        }
    }

    /// The error was a problem sending the request or receiving the response.
    ///
    /// # Troubleshooting
    ///
    /// This indicates a problem completing the request, most often a network
    /// problem. The long-running operation pollers leave their state
    /// unmodified on these errors, the application may poll again.
    pub fn is_transport(&self) -> bool {
        matches!(self.kind, ErrorKind::Io | ErrorKind::Timeout)
    }

    /// Same as [is_transport][Error::is_transport] but excludes timeouts.
    pub fn is_io(&self) -> bool {
        matches!(self.kind, ErrorKind::Io)
    }

    /// Creates an error representing a deserialization problem.
    ///
    /// # Example
    /// ```
    /// use std::error::Error as _;
    /// use cloud_mgmt_gax::error::Error;
    /// let error = Error::deser("simulated problem");
    /// assert!(error.is_deserialization());
    /// assert!(error.source().is_some());
    /// ```
    pub fn deser<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Deserialization,
            source: shared(source),
        }
    }

    /// The response could not be deserialized.
    ///
    /// # Troubleshooting
    ///
    /// For long-running operations this includes poll responses without a
    /// JSON body, or where the `status` field is missing or is not a string.
    /// The most common cause for deserialization problems are bugs in the
    /// service, or an operation that uses a different polling convention than
    /// the one advertised in the response headers.
    pub fn is_deserialization(&self) -> bool {
        matches!(self.kind, ErrorKind::Deserialization)
    }

    /// Cannot create a valid request.
    ///
    /// This indicates a malformed URL or header value.
    pub fn binding<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Binding,
            source: shared(source),
        }
    }

    /// If true, the request could not be created from its inputs.
    pub fn is_binding(&self) -> bool {
        matches!(self.kind, ErrorKind::Binding)
    }

    /// Creates an error representing a query for the result of an operation
    /// that has not completed.
    pub fn not_complete() -> Self {
        Self {
            kind: ErrorKind::NotComplete,
            source: None,
        }
    }

    /// The result of a long-running operation was requested before the
    /// operation reached a terminal state.
    pub fn is_not_complete(&self) -> bool {
        matches!(self.kind, ErrorKind::NotComplete)
    }

    /// Creates an error representing a failure to create a resume token.
    pub fn resume_unsupported<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::ResumeUnsupported,
            source: shared(source),
        }
    }

    /// A resume token could not be created for a long-running operation.
    pub fn is_resume_unsupported(&self) -> bool {
        matches!(self.kind, ErrorKind::ResumeUnsupported)
    }

    /// Creates an error representing a cancelled wait.
    pub fn cancelled() -> Self {
        Self {
            kind: ErrorKind::Cancelled,
            source: None,
        }
    }

    /// The application cancelled the operation while the client library was
    /// waiting.
    ///
    /// The operation may continue in the service. Long-running operation
    /// pollers keep the state from the last successful poll.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// The HTTP status code, if any, associated with this error.
    ///
    /// # Example
    /// ```
    /// use cloud_mgmt_gax::error::Error;
    /// let e = search_for_thing("the thing");
    /// if let Some(code) = e.http_status_code() {
    ///     if code == 404 {
    ///         println!("cannot find the thing, more details in {e}");
    ///     }
    /// }
    ///
    /// fn search_for_thing(name: &str) -> Error {
    ///     # Error::http(404, http::HeaderMap::new(), bytes::Bytes::from_static(b"NOT FOUND"))
    /// }
    /// ```
    pub fn http_status_code(&self) -> Option<u16> {
        match &self.kind {
            ErrorKind::Rejected(d) | ErrorKind::Http(d) => Some(d.status_code),
            ErrorKind::Service(e) => *e.http_status_code(),
            _ => None,
        }
    }

    /// The headers, if any, associated with this error.
    ///
    /// Some services include information useful for troubleshooting, such as
    /// request ids, in the response headers.
    pub fn http_headers(&self) -> Option<&HeaderMap> {
        match &self.kind {
            ErrorKind::Rejected(d) | ErrorKind::Http(d) => Some(&d.headers),
            ErrorKind::Service(e) => e.headers().as_ref(),
            _ => None,
        }
    }

    /// The payload, if any, associated with this error.
    ///
    /// Service errors do not include the payload, the parsed payload is
    /// available via [service_error][Error::service_error].
    pub fn http_payload(&self) -> Option<&bytes::Bytes> {
        match &self.kind {
            ErrorKind::Rejected(d) | ErrorKind::Http(d) => Some(&d.payload),
            _ => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.kind, &self.source) {
            (ErrorKind::Service(e), _) => {
                let detail = e.detail();
                write!(
                    f,
                    "the service reports an error with code {} described as: {}",
                    detail.code, detail.message
                )
            }
            (ErrorKind::Http(d), _) => d.display("the HTTP transport reports a", f),
            (ErrorKind::Rejected(d), _) => {
                d.display("the operation failed or was cancelled, got a", f)
            }
            (ErrorKind::Timeout, Some(e)) => {
                write!(f, "the request exceeded the request deadline {e}")
            }
            (ErrorKind::Io, Some(e)) => write!(f, "the transport reports an error: {e}"),
            (ErrorKind::Deserialization, Some(e)) => {
                write!(f, "cannot deserialize the response {e}")
            }
            (ErrorKind::Binding, Some(e)) => write!(f, "cannot create the request {e}"),
            (ErrorKind::NotComplete, _) => write!(
                f,
                "cannot return a final response from a poller in a non-terminal state"
            ),
            (ErrorKind::ResumeUnsupported, Some(e)) => {
                write!(f, "cannot create a resume token: {e}")
            }
            (ErrorKind::Cancelled, _) => write!(f, "the wait was cancelled by the application"),
            (_, None) => unreachable!("no constructor allows this"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

/// The type of error held by an [Error] instance.
#[derive(Clone, Debug)]
enum ErrorKind {
    Rejected(Box<HttpDetails>),
    Http(Box<HttpDetails>),
    Service(Box<ServiceError>),
    Timeout,
    Io,
    Deserialization,
    Binding,
    NotComplete,
    ResumeUnsupported,
    Cancelled,
}

#[derive(Clone, Debug)]
struct HttpDetails {
    status_code: u16,
    headers: HeaderMap,
    payload: bytes::Bytes,
}

impl HttpDetails {
    fn display(&self, prefix: &str, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = self.status_code;
        match std::str::from_utf8(self.payload.as_ref()) {
            Ok(message) => write!(f, "{prefix} [{code}] error: {message}"),
            Err(_) => write!(f, "{prefix} [{code}] error: {:?}", self.payload),
        }
    }
}
