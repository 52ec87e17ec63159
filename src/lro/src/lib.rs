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

//! Types and functions to make long-running operations (LROs) easier to use.
//!
//! Many management operations, such as creating a virtual machine, take a
//! long time to complete. The service accepts the request, returns a response
//! describing how to track its progress, and the client must poll until the
//! operation reaches a terminal state. The [Poller] implements this protocol.
//!
//! The generated clients create pollers from the initiating response.
//! Applications typically call [Poller::poll_until_done_with], or drive the
//! loop themselves using [Poller::poll] and [Poller::done].
//!
//! # Example
//! ```no_run
//! # use cloud_mgmt_lro::Poller;
//! # use tokio_util::sync::CancellationToken;
//! # use std::time::Duration;
//! #[derive(serde::Deserialize)]
//! struct VirtualMachine { name: String }
//!
//! async fn wait(mut poller: Poller) -> gax::Result<VirtualMachine> {
//!     let cancel = CancellationToken::new();
//!     let response = poller
//!         .poll_until_done_with::<VirtualMachine>(&cancel, Duration::from_secs(30))
//!         .await?;
//!     Ok(response.into_body())
//! }
//! ```

use gax::Result;
use gax::error::Error;
use gax::error_unmarshaller::ErrorUnmarshaller;
use gax::http_client::{Pipeline, Request};
use gax::response::Response;
use gax::retry_after::retry_after;

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

mod strategy;
use strategy::OperationStrategy;

/// Returns true if `status` indicates the service accepted the request.
///
/// The status codes used by long-running operations are `200 OK`,
/// `201 Created`, `202 Accepted`, and `204 No Content`. Any other status code,
/// including other 2xx codes, means the request or the operation failed.
///
/// # Example
/// ```
/// # use cloud_mgmt_lro::is_accepted_status;
/// assert!(is_accepted_status(http::StatusCode::ACCEPTED));
/// assert!(!is_accepted_status(http::StatusCode::PARTIAL_CONTENT));
/// ```
pub fn is_accepted_status(status: http::StatusCode) -> bool {
    matches!(
        status,
        http::StatusCode::OK
            | http::StatusCode::CREATED
            | http::StatusCode::ACCEPTED
            | http::StatusCode::NO_CONTENT
    )
}

/// Tracks a long-running operation until it completes.
///
/// A poller is created from the response to the request that started the
/// operation. That response selects how progress is tracked:
///
/// * With an `Operation-Location` header, each poll returns a JSON object with
///   a `status` field. The operation is complete when the status is
///   `Succeeded`, `Failed`, or `Cancelled` (in any case).
/// * With a `Location` header, the operation is complete once a poll returns
///   any status code other than `202 Accepted`.
/// * Without either header, the operation completed synchronously.
///
/// Once a poll fails with a status code indicating an error the poller is
/// permanently terminal. All subsequent calls return the same error and no
/// further requests are sent.
///
/// Pollers do not synchronize concurrent use. The methods that send requests
/// take `&mut self`.
#[derive(Debug)]
pub struct Poller {
    strategy: OperationStrategy,
    pipeline: Pipeline,
    error_unmarshaller: Arc<dyn ErrorUnmarshaller>,
    // The last successful response, or the terminal error.
    last: Result<Response<Bytes>>,
    resolved: bool,
}

impl Poller {
    /// Creates a poller from the response that started the operation.
    ///
    /// Fails with an error where [is_rejected][Error::is_rejected] is true if
    /// the status code is not one of the [accepted][is_accepted_status] codes.
    /// Fails with an error where [is_binding][Error::is_binding] is true if the
    /// response has an `Operation-Location` header, but does not include the
    /// method and URL of the request that started the operation.
    pub fn new(
        response: Response<Bytes>,
        pipeline: Pipeline,
        error_unmarshaller: Arc<dyn ErrorUnmarshaller>,
    ) -> Result<Self> {
        if !is_accepted_status(response.status()) {
            let (parts, body) = response.into_parts();
            return Err(Error::rejected(parts.status.as_u16(), parts.headers, body));
        }
        let strategy = OperationStrategy::select(&response)?;
        tracing::debug!(
            "created poller using the {} strategy for {:?}",
            strategy.name(),
            response.request()
        );
        Ok(Self {
            strategy,
            pipeline,
            error_unmarshaller,
            last: Ok(response),
            resolved: false,
        })
    }

    /// Returns true if the operation reached a terminal state.
    ///
    /// This includes operations that failed, and pollers that recorded an
    /// error. It sends no requests.
    pub fn done(&self) -> bool {
        self.last.is_err() || self.strategy.done()
    }

    /// Returns the current status of the operation.
    ///
    /// This is the `status` field of the last poll for operations tracked via
    /// `Operation-Location`, the status code of the last poll for operations
    /// tracked via `Location`, and `succeeded` for synchronous operations.
    pub fn status(&self) -> String {
        self.strategy.status()
    }

    /// Sends a single polling request and updates the state.
    ///
    /// If the poller is already terminal this sends no request. It returns the
    /// last response, or the recorded error.
    ///
    /// Transport errors, including cancellation, leave the state unchanged, so
    /// the caller may call `poll()` again.
    pub async fn poll(&mut self, cancel: &CancellationToken) -> Result<Response<Bytes>> {
        if self.done() {
            return self.last.clone();
        }
        let Some(url) = self.strategy.poll_url() else {
            return self.last.clone();
        };
        let response = self.send(Request::get(url), cancel).await?;
        if !is_accepted_status(response.status()) {
            return Err(self.fail(&response));
        }
        self.strategy.update(&response)?;
        tracing::debug!("operation status is {}", self.strategy.status());
        self.last = Ok(response.clone());
        Ok(response)
    }

    /// Returns the final response of a completed operation.
    ///
    /// This may send a final `GET` request to retrieve the resource. The URL
    /// is the `resourceLocation` field in the last poll, the original URL for
    /// `PUT` and `PATCH` operations, or the `Location` header of the initial
    /// response for `POST` operations. Otherwise the result is the last poll
    /// response, or the initial response for synchronous operations.
    ///
    /// The same rules apply to operations that completed with a `Failed` or
    /// `Cancelled` status. Inspect [status][Poller::status] to distinguish
    /// them from successful operations.
    ///
    /// Fails with an error where [is_not_complete][Error::is_not_complete] is
    /// true if the operation has not completed.
    pub async fn final_response(&mut self, cancel: &CancellationToken) -> Result<Response<Bytes>> {
        if !self.done() {
            return Err(Error::not_complete());
        }
        let last = self.last.clone()?;
        if self.resolved {
            return Ok(last);
        }
        let Some(url) = self.strategy.final_get_url(&last)? else {
            self.resolved = true;
            return Ok(last);
        };
        tracing::debug!("fetching the final result from {url}");
        let response = self.send(Request::get(url), cancel).await?;
        if !is_accepted_status(response.status()) {
            return Err(self.fail(&response));
        }
        self.resolved = true;
        self.last = Ok(response.clone());
        Ok(response)
    }

    /// Returns the final result of a completed operation.
    ///
    /// Like [final_response][Poller::final_response], but the body is parsed
    /// as JSON into `T`.
    pub async fn final_result<T>(&mut self, cancel: &CancellationToken) -> Result<Response<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self.final_response(cancel).await?;
        let body = serde_json::from_slice::<T>(response.body()).map_err(Error::deser)?;
        Ok(response.map(|_| body))
    }

    /// Polls until the operation completes and returns the final response.
    ///
    /// Waits for the delay in the `Retry-After` header of the last response,
    /// if present, or `frequency` otherwise. Returns the first error, or an
    /// error where [is_cancelled][Error::is_cancelled] is true if `cancel` is
    /// triggered. After cancellation the poller reflects the last successful
    /// poll.
    pub async fn poll_until_done(
        &mut self,
        cancel: &CancellationToken,
        frequency: Duration,
    ) -> Result<Response<Bytes>> {
        self.wait_until_done(cancel, frequency).await?;
        self.final_response(cancel).await
    }

    /// Polls until the operation completes and returns the final result.
    ///
    /// Like [poll_until_done][Poller::poll_until_done], but the body is parsed
    /// as JSON into `T`.
    pub async fn poll_until_done_with<T>(
        &mut self,
        cancel: &CancellationToken,
        frequency: Duration,
    ) -> Result<Response<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        self.wait_until_done(cancel, frequency).await?;
        self.final_result::<T>(cancel).await
    }

    /// Returns a token to resume polling from another process.
    ///
    /// Resume tokens are not supported, this always fails with an error where
    /// [is_resume_unsupported][Error::is_resume_unsupported] is true.
    pub fn resume_token(&self) -> Result<String> {
        if self.done() {
            return Err(Error::resume_unsupported(
                "cannot create a resume token from a poller in a terminal state",
            ));
        }
        Err(Error::resume_unsupported(
            "resume tokens are not yet supported",
        ))
    }

    async fn wait_until_done(
        &mut self,
        cancel: &CancellationToken,
        frequency: Duration,
    ) -> Result<()> {
        tracing::debug!("BEGIN poll_until_done() for {}", self.strategy.name());
        let result = self.poll_loop(cancel, frequency).await;
        match &result {
            Ok(()) => tracing::debug!("END poll_until_done() with status {}", self.status()),
            Err(e) => tracing::debug!("END poll_until_done() with error {e}"),
        }
        result
    }

    async fn poll_loop(&mut self, cancel: &CancellationToken, frequency: Duration) -> Result<()> {
        if !self.done() {
            let initial = self.last.as_ref().ok().and_then(|r| retry_after(r.headers()));
            if let Some(delay) = initial {
                tracing::debug!("initial Retry-After delay for {delay:?}");
                self::delay(cancel, delay).await?;
            }
        }
        loop {
            let response = self.poll(cancel).await?;
            if self.done() {
                return Ok(());
            }
            let delay = match retry_after(response.headers()) {
                Some(d) => {
                    tracing::debug!("Retry-After delay for {d:?}");
                    d
                }
                None => {
                    tracing::debug!("delay for {frequency:?}");
                    frequency
                }
            };
            self::delay(cancel, delay).await?;
        }
    }

    async fn send(&self, request: Request, cancel: &CancellationToken) -> Result<Response<Bytes>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::cancelled()),
            response = self.pipeline.send(request) => response,
        }
    }

    // Records the terminal error described by `response`.
    fn fail(&mut self, response: &Response<Bytes>) -> Error {
        let error = self.error_unmarshaller.unmarshal(response);
        tracing::debug!("the operation failed: {error}");
        self.last = Err(error.clone());
        error
    }
}

async fn delay(cancel: &CancellationToken, delay: Duration) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::cancelled()),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gax::error::{ErrorDetail, ServiceErrorBuilder};
    use gax::error_unmarshaller::DefaultErrorUnmarshaller;
    use gax::http_client::{PipelineProvider, RequestHead};
    use gax::response::Parts;
    use http::{Method, StatusCode};
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use test_case::test_case;

    mockall::mock! {
        #[derive(Debug)]
        Unmarshaller {}
        impl ErrorUnmarshaller for Unmarshaller {
            fn unmarshal(&self, response: &Response<Bytes>) -> Error;
        }
    }

    #[derive(Debug, Default)]
    struct FakeState {
        responses: VecDeque<Result<Response<Bytes>>>,
        requests: Vec<RequestHead>,
    }

    // Returns canned responses, in order, and records the requests.
    #[derive(Clone, Debug, Default)]
    struct FakePipeline {
        state: Arc<Mutex<FakeState>>,
    }

    impl FakePipeline {
        fn push(&self, response: Result<Response<Bytes>>) {
            self.state
                .lock()
                .expect("lock is never poisoned")
                .responses
                .push_back(response);
        }

        fn requests(&self) -> Vec<String> {
            self.state
                .lock()
                .expect("lock is never poisoned")
                .requests
                .iter()
                .map(|r| r.url.clone())
                .collect()
        }
    }

    impl PipelineProvider for FakePipeline {
        async fn send(&self, request: Request) -> Result<Response<Bytes>> {
            let mut state = self.state.lock().expect("lock is never poisoned");
            assert_eq!(request.method(), &Method::GET);
            state.requests.push(request.head());
            let response = state
                .responses
                .pop_front()
                .unwrap_or_else(|| Err(Error::io("unexpected request")))?;
            let (mut parts, body) = response.into_parts();
            parts.request = Some(request.head());
            Ok(Response::from_parts(parts, body))
        }
    }

    fn reply(status: u16, headers: &[(&str, &str)], body: Value) -> Response<Bytes> {
        let mut map = http::HeaderMap::new();
        for (k, v) in headers {
            map.insert(
                http::HeaderName::from_bytes(k.as_bytes()).expect("valid header name"),
                http::HeaderValue::from_str(v).expect("valid header value"),
            );
        }
        let body = match body {
            Value::Null => Bytes::new(),
            v => Bytes::from(v.to_string()),
        };
        let parts = Parts::new()
            .set_status(StatusCode::from_u16(status).expect("valid status code"))
            .set_headers(map);
        Response::from_parts(parts, body)
    }

    fn initial(
        method: Method,
        url: &str,
        status: u16,
        headers: &[(&str, &str)],
        body: Value,
    ) -> Response<Bytes> {
        let (parts, body) = reply(status, headers, body).into_parts();
        Response::from_parts(parts.set_request(RequestHead::new(method, url)), body)
    }

    fn new_poller(response: Response<Bytes>, pipeline: &FakePipeline) -> Result<Poller> {
        Poller::new(
            response,
            Pipeline::from(pipeline.clone()),
            Arc::new(DefaultErrorUnmarshaller),
        )
    }

    #[test_case(100)]
    #[test_case(203)]
    #[test_case(206)]
    #[test_case(301)]
    #[test_case(400)]
    #[test_case(404)]
    #[test_case(409)]
    #[test_case(500)]
    #[test_case(503)]
    fn rejected(status: u16) {
        let pipeline = FakePipeline::default();
        let response = initial(
            Method::PUT,
            "https://example.com/vm/1",
            status,
            &[("operation-location", "https://example.com/op/1")],
            json!({"error": {"code": "BadRequest", "message": "nope"}}),
        );
        let err = new_poller(response, &pipeline).unwrap_err();
        assert!(err.is_rejected(), "{err:?}");
        assert_eq!(err.http_status_code(), Some(status));
        assert!(pipeline.requests().is_empty());
    }

    #[test_case(200)]
    #[test_case(201)]
    #[test_case(202)]
    #[test_case(204)]
    fn accepted(status: u16) -> anyhow::Result<()> {
        let pipeline = FakePipeline::default();
        let response = initial(Method::PUT, "https://example.com/vm/1", status, &[], Value::Null);
        let poller = new_poller(response, &pipeline)?;
        assert!(poller.done());
        Ok(())
    }

    #[tokio::test]
    async fn operation_location_has_priority() -> anyhow::Result<()> {
        let pipeline = FakePipeline::default();
        pipeline.push(Ok(reply(200, &[], json!({"status": "InProgress"}))));
        let response = initial(
            Method::POST,
            "https://example.com/vm/1/start",
            202,
            &[
                ("Location", "https://example.com/location/2"),
                ("Operation-Location", "https://example.com/op/1"),
            ],
            Value::Null,
        );
        let mut poller = new_poller(response, &pipeline)?;
        assert_eq!(poller.status(), "");
        poller.poll(&CancellationToken::new()).await?;
        assert_eq!(poller.status(), "InProgress");
        assert_eq!(pipeline.requests(), vec!["https://example.com/op/1"]);
        Ok(())
    }

    #[tokio::test]
    async fn accepted_without_body_location() -> anyhow::Result<()> {
        let pipeline = FakePipeline::default();
        pipeline.push(Ok(reply(202, &[], Value::Null)));
        let response = initial(
            Method::DELETE,
            "https://example.com/vm/1",
            202,
            &[("location", "https://example.com/op/2")],
            Value::Null,
        );
        let mut poller = new_poller(response, &pipeline)?;
        let response = poller.poll(&CancellationToken::new()).await?;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(!poller.done());
        assert_eq!(poller.status(), "202");
        Ok(())
    }

    #[tokio::test]
    async fn accepted_without_body_operation_location() -> anyhow::Result<()> {
        let pipeline = FakePipeline::default();
        pipeline.push(Ok(reply(202, &[], Value::Null)));
        pipeline.push(Ok(reply(200, &[], json!({"status": "Succeeded"}))));
        let response = initial(
            Method::DELETE,
            "https://example.com/vm/1",
            202,
            &[("operation-location", "https://example.com/op/1")],
            Value::Null,
        );
        let mut poller = new_poller(response, &pipeline)?;
        let cancel = CancellationToken::new();
        let err = poller.poll(&cancel).await.unwrap_err();
        assert!(err.is_deserialization(), "{err:?}");
        assert!(!poller.done());

        // A malformed body is not terminal.
        poller.poll(&cancel).await?;
        assert!(poller.done());
        assert_eq!(
            pipeline.requests(),
            vec!["https://example.com/op/1", "https://example.com/op/1"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn transport_error_keeps_state() -> anyhow::Result<()> {
        let pipeline = FakePipeline::default();
        pipeline.push(Ok(reply(
            200,
            &[("operation-location", "https://example.com/op/1b")],
            json!({"status": "Running"}),
        )));
        pipeline.push(Err(Error::io("connection reset")));
        pipeline.push(Ok(reply(200, &[], json!({"status": "Succeeded"}))));
        let response = initial(
            Method::PUT,
            "https://example.com/vm/1",
            201,
            &[("operation-location", "https://example.com/op/1")],
            Value::Null,
        );
        let mut poller = new_poller(response, &pipeline)?;
        let cancel = CancellationToken::new();

        poller.poll(&cancel).await?;
        let err = poller.poll(&cancel).await.unwrap_err();
        assert!(err.is_transport(), "{err:?}");
        assert!(!poller.done());
        assert_eq!(poller.status(), "Running");

        poller.poll(&cancel).await?;
        assert!(poller.done());
        assert_eq!(
            pipeline.requests(),
            vec![
                "https://example.com/op/1",
                "https://example.com/op/1b",
                "https://example.com/op/1b"
            ]
        );
        Ok(())
    }

    #[test_case(Method::PUT, &[("operation-location", "https://example.com/op/1")]; "operation location")]
    #[test_case(Method::POST, &[("location", "https://example.com/op/2")]; "location")]
    #[tokio::test]
    async fn sticky_error(method: Method, headers: &[(&str, &str)]) -> anyhow::Result<()> {
        let pipeline = FakePipeline::default();
        pipeline.push(Ok(reply(
            404,
            &[],
            json!({"error": {"code": "NotFound", "message": "the operation is gone"}}),
        )));
        let response = initial(method, "https://example.com/vm/1", 202, headers, Value::Null);
        let mut poller = new_poller(response, &pipeline)?;
        let cancel = CancellationToken::new();

        let err = poller.poll(&cancel).await.unwrap_err();
        assert!(err.is_operation_failed(), "{err:?}");
        assert_eq!(err.http_status_code(), Some(404));
        assert_eq!(
            err.service_error().map(|s| s.detail().code.clone()),
            Some("NotFound".to_string())
        );
        assert!(poller.done());

        for _ in 0..3 {
            let again = poller.poll(&cancel).await.unwrap_err();
            assert_eq!(format!("{again}"), format!("{err}"));
            assert!(poller.done());
        }
        let final_err = poller.final_response(&cancel).await.unwrap_err();
        assert_eq!(format!("{final_err}"), format!("{err}"));
        assert_eq!(pipeline.requests().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn unmarshaller_called_once() -> anyhow::Result<()> {
        let mut unmarshaller = MockUnmarshaller::new();
        unmarshaller
            .expect_unmarshal()
            .withf(|r| r.status() == StatusCode::INTERNAL_SERVER_ERROR)
            .times(1)
            .returning(|r| {
                let detail = ErrorDetail::new("InternalError", "try again later");
                Error::service(
                    ServiceErrorBuilder::new(detail)
                        .with_http_status_code(r.status().as_u16())
                        .build(),
                )
            });
        let pipeline = FakePipeline::default();
        pipeline.push(Ok(reply(500, &[], Value::Null)));
        let response = initial(
            Method::POST,
            "https://example.com/vm/1/start",
            202,
            &[("location", "https://example.com/op/2")],
            Value::Null,
        );
        let mut poller = Poller::new(
            response,
            Pipeline::from(pipeline.clone()),
            Arc::new(unmarshaller),
        )?;
        let cancel = CancellationToken::new();
        let err = poller.poll(&cancel).await.unwrap_err();
        assert_eq!(err.http_status_code(), Some(500));
        let err = poller.poll(&cancel).await.unwrap_err();
        assert_eq!(
            err.service_error().map(|s| s.detail().code.clone()),
            Some("InternalError".to_string())
        );
        Ok(())
    }

    #[tokio::test]
    async fn done_is_idempotent() -> anyhow::Result<()> {
        let pipeline = FakePipeline::default();
        let response = initial(
            Method::PUT,
            "https://example.com/vm/1",
            201,
            &[("operation-location", "https://example.com/op/1")],
            Value::Null,
        );
        let poller = new_poller(response, &pipeline)?;
        for _ in 0..5 {
            assert!(!poller.done());
            assert_eq!(poller.status(), "");
        }
        assert!(pipeline.requests().is_empty());
        Ok(())
    }

    #[test_case("Succeeded")]
    #[test_case("SUCCEEDED")]
    #[test_case("succeeded")]
    #[tokio::test]
    async fn terminal_success_any_case(status: &str) -> anyhow::Result<()> {
        let pipeline = FakePipeline::default();
        pipeline.push(Ok(reply(200, &[], json!({"status": status}))));
        let response = initial(
            Method::DELETE,
            "https://example.com/vm/1",
            202,
            &[("operation-location", "https://example.com/op/1")],
            Value::Null,
        );
        let mut poller = new_poller(response, &pipeline)?;
        let cancel = CancellationToken::new();
        let last = poller.poll(&cancel).await?;
        assert!(poller.done());
        assert_eq!(poller.status(), status);

        let got = poller.final_response(&cancel).await?;
        assert_eq!(got.body(), last.body());
        assert_eq!(pipeline.requests().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn put_with_resource_location() -> anyhow::Result<()> {
        let pipeline = FakePipeline::default();
        pipeline.push(Ok(reply(200, &[], json!({"status": "Running"}))));
        pipeline.push(Ok(reply(
            200,
            &[],
            json!({"status": "Succeeded", "resourceLocation": "/res/42"}),
        )));
        pipeline.push(Ok(reply(200, &[], json!({"name": "vm-42", "size": 4}))));
        let response = initial(
            Method::PUT,
            "https://example.com/vm/42",
            201,
            &[("operation-location", "https://example.com/op/1")],
            Value::Null,
        );
        let mut poller = new_poller(response, &pipeline)?;
        let cancel = CancellationToken::new();

        poller.poll(&cancel).await?;
        assert!(!poller.done());
        poller.poll(&cancel).await?;
        assert!(poller.done());

        #[derive(Debug, PartialEq, serde::Deserialize)]
        struct Vm {
            name: String,
            size: i32,
        }
        let got = poller.final_result::<Vm>(&cancel).await?;
        assert_eq!(got.status(), StatusCode::OK);
        assert_eq!(
            got.request().map(|r| r.url.as_str()),
            Some("https://example.com/res/42")
        );
        assert_eq!(
            got.body(),
            &Vm {
                name: "vm-42".to_string(),
                size: 4
            }
        );
        assert_eq!(
            pipeline.requests(),
            vec![
                "https://example.com/op/1",
                "https://example.com/op/1",
                "https://example.com/res/42"
            ]
        );

        // The final GET is only sent once.
        let again = poller.final_result::<Vm>(&cancel).await?;
        assert_eq!(again.body(), got.body());
        assert_eq!(pipeline.requests().len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn patch_uses_original_url() -> anyhow::Result<()> {
        let pipeline = FakePipeline::default();
        pipeline.push(Ok(reply(200, &[], json!({"status": "succeeded"}))));
        pipeline.push(Ok(reply(200, &[], json!({"name": "vm-1"}))));
        let response = initial(
            Method::PATCH,
            "https://example.com/vm/1",
            202,
            &[
                ("operation-location", "https://example.com/op/1"),
                ("location", "https://example.com/ignored"),
            ],
            Value::Null,
        );
        let mut poller = new_poller(response, &pipeline)?;
        let cancel = CancellationToken::new();
        poller.poll(&cancel).await?;
        let got = poller.final_response(&cancel).await?;
        assert_eq!(got.body().as_ref(), br#"{"name":"vm-1"}"#);
        assert_eq!(
            pipeline.requests(),
            vec!["https://example.com/op/1", "https://example.com/vm/1"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn post_uses_location_fallback() -> anyhow::Result<()> {
        let pipeline = FakePipeline::default();
        pipeline.push(Ok(reply(200, &[], json!({"status": "Succeeded"}))));
        pipeline.push(Ok(reply(200, &[], json!({"result": "ok"}))));
        let response = initial(
            Method::POST,
            "https://example.com/vm/1/capture",
            202,
            &[
                ("operation-location", "https://example.com/op/1"),
                ("location", "https://example.com/capture/1"),
            ],
            Value::Null,
        );
        let mut poller = new_poller(response, &pipeline)?;
        let cancel = CancellationToken::new();
        poller.poll(&cancel).await?;
        let got = poller.final_result::<Value>(&cancel).await?;
        assert_eq!(got.body(), &json!({"result": "ok"}));
        assert_eq!(
            pipeline.requests(),
            vec!["https://example.com/op/1", "https://example.com/capture/1"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn post_with_location_strategy() -> anyhow::Result<()> {
        let pipeline = FakePipeline::default();
        pipeline.push(Ok(reply(202, &[], Value::Null)));
        pipeline.push(Ok(reply(200, &[], json!({"state": "Started"}))));
        let response = initial(
            Method::POST,
            "https://example.com/vm/1/start",
            202,
            &[("location", "https://example.com/op/2")],
            Value::Null,
        );
        let mut poller = new_poller(response, &pipeline)?;
        let cancel = CancellationToken::new();

        poller.poll(&cancel).await?;
        assert!(!poller.done());
        let last = poller.poll(&cancel).await?;
        assert!(poller.done());
        assert_eq!(poller.status(), "200");

        let got = poller.final_response(&cancel).await?;
        assert_eq!(got.body(), last.body());
        assert_eq!(got.body().as_ref(), br#"{"state":"Started"}"#);
        assert_eq!(
            pipeline.requests(),
            vec!["https://example.com/op/2", "https://example.com/op/2"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn synchronous() -> anyhow::Result<()> {
        let pipeline = FakePipeline::default();
        let response = initial(
            Method::PUT,
            "https://example.com/vm/1",
            200,
            &[],
            json!({"name": "vm-1"}),
        );
        let mut poller = new_poller(response.clone(), &pipeline)?;
        assert!(poller.done());
        assert_eq!(poller.status(), "succeeded");

        let cancel = CancellationToken::new();
        let polled = poller.poll(&cancel).await?;
        assert_eq!(polled.body(), response.body());
        let got = poller.final_response(&cancel).await?;
        assert_eq!(got.status(), response.status());
        assert_eq!(got.headers(), response.headers());
        assert_eq!(got.body(), response.body());
        assert!(pipeline.requests().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn final_response_not_complete() -> anyhow::Result<()> {
        let pipeline = FakePipeline::default();
        let response = initial(
            Method::POST,
            "https://example.com/vm/1/start",
            202,
            &[("location", "https://example.com/op/2")],
            Value::Null,
        );
        let mut poller = new_poller(response, &pipeline)?;
        let err = poller
            .final_response(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_not_complete(), "{err:?}");
        assert!(pipeline.requests().is_empty());
        Ok(())
    }

    #[test_case("Failed")]
    #[test_case("Cancelled")]
    #[tokio::test]
    async fn operation_failed_fetches_resource(status: &str) -> anyhow::Result<()> {
        let pipeline = FakePipeline::default();
        pipeline.push(Ok(reply(
            200,
            &[],
            json!({
                "status": status,
                "error": {"code": "OSProvisioningTimedOut", "message": "the VM did not start"},
            }),
        )));
        pipeline.push(Ok(reply(
            200,
            &[],
            json!({"name": "vm-1", "provisioningState": status}),
        )));
        let response = initial(
            Method::PUT,
            "https://example.com/vm/1",
            201,
            &[("operation-location", "https://example.com/op/1")],
            Value::Null,
        );
        let mut poller = new_poller(response, &pipeline)?;
        let cancel = CancellationToken::new();
        poller.poll(&cancel).await?;
        assert!(poller.done());
        assert_eq!(poller.status(), status);

        let response = poller.final_response(&cancel).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = serde_json::from_slice::<Value>(response.body())?;
        assert_eq!(body, json!({"name": "vm-1", "provisioningState": status}));
        assert_eq!(poller.status(), status);
        assert_eq!(
            pipeline.requests(),
            vec!["https://example.com/op/1", "https://example.com/vm/1"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn operation_failed_without_final_get() -> anyhow::Result<()> {
        let pipeline = FakePipeline::default();
        let failed = json!({
            "status": "Failed",
            "error": {"code": "OSProvisioningTimedOut", "message": "the VM did not start"},
        });
        pipeline.push(Ok(reply(200, &[], failed.clone())));
        let response = initial(
            Method::POST,
            "https://example.com/vm/1/start",
            202,
            &[("operation-location", "https://example.com/op/1")],
            Value::Null,
        );
        let mut poller = new_poller(response, &pipeline)?;
        let cancel = CancellationToken::new();
        poller.poll(&cancel).await?;

        let response = poller.final_response(&cancel).await?;
        assert_eq!(serde_json::from_slice::<Value>(response.body())?, failed);
        assert_eq!(pipeline.requests(), vec!["https://example.com/op/1"]);
        Ok(())
    }

    #[test]
    fn operation_location_requires_request() {
        let pipeline = FakePipeline::default();
        let response = reply(
            201,
            &[("operation-location", "https://example.com/op/1")],
            Value::Null,
        );
        let err = new_poller(response, &pipeline).unwrap_err();
        assert!(err.is_binding(), "{err:?}");
        assert!(pipeline.requests().is_empty());
    }

    #[tokio::test]
    async fn final_get_failure() -> anyhow::Result<()> {
        let pipeline = FakePipeline::default();
        pipeline.push(Ok(reply(200, &[], json!({"status": "Succeeded"}))));
        pipeline.push(Ok(reply(
            403,
            &[],
            json!({"error": {"code": "AuthorizationFailed", "message": "no access"}}),
        )));
        let response = initial(
            Method::PUT,
            "https://example.com/vm/1",
            201,
            &[("operation-location", "https://example.com/op/1")],
            Value::Null,
        );
        let mut poller = new_poller(response, &pipeline)?;
        let cancel = CancellationToken::new();
        poller.poll(&cancel).await?;

        let err = poller.final_response(&cancel).await.unwrap_err();
        assert!(err.is_operation_failed(), "{err:?}");
        assert_eq!(err.http_status_code(), Some(403));
        let again = poller.final_response(&cancel).await.unwrap_err();
        assert_eq!(format!("{again}"), format!("{err}"));
        assert_eq!(pipeline.requests().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn final_get_transport_error() -> anyhow::Result<()> {
        let pipeline = FakePipeline::default();
        pipeline.push(Ok(reply(200, &[], json!({"status": "Succeeded"}))));
        pipeline.push(Err(Error::io("connection reset")));
        pipeline.push(Ok(reply(200, &[], json!({"name": "vm-1"}))));
        let response = initial(
            Method::PUT,
            "https://example.com/vm/1",
            201,
            &[("operation-location", "https://example.com/op/1")],
            Value::Null,
        );
        let mut poller = new_poller(response, &pipeline)?;
        let cancel = CancellationToken::new();
        poller.poll(&cancel).await?;

        let err = poller.final_response(&cancel).await.unwrap_err();
        assert!(err.is_transport(), "{err:?}");
        let got = poller.final_result::<Value>(&cancel).await?;
        assert_eq!(got.body(), &json!({"name": "vm-1"}));
        Ok(())
    }

    #[tokio::test]
    async fn final_result_bad_payload() -> anyhow::Result<()> {
        let pipeline = FakePipeline::default();
        let response = initial(Method::DELETE, "https://example.com/vm/1", 204, &[], Value::Null);
        let mut poller = new_poller(response, &pipeline)?;
        let cancel = CancellationToken::new();

        let err = poller.final_result::<Value>(&cancel).await.unwrap_err();
        assert!(err.is_deserialization(), "{err:?}");
        let raw = poller.final_response(&cancel).await?;
        assert_eq!(raw.status(), StatusCode::NO_CONTENT);
        assert!(raw.body().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn resume_token() -> anyhow::Result<()> {
        let pipeline = FakePipeline::default();
        let response = initial(
            Method::PUT,
            "https://example.com/vm/1",
            201,
            &[("operation-location", "https://example.com/op/1")],
            Value::Null,
        );
        let poller = new_poller(response, &pipeline)?;
        let err = poller.resume_token().unwrap_err();
        assert!(err.is_resume_unsupported(), "{err:?}");
        assert!(format!("{err}").contains("not yet supported"), "{err}");

        let response = initial(Method::PUT, "https://example.com/vm/1", 200, &[], Value::Null);
        let poller = new_poller(response, &pipeline)?;
        let err = poller.resume_token().unwrap_err();
        assert!(err.is_resume_unsupported(), "{err:?}");
        assert!(format!("{err}").contains("terminal state"), "{err}");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn poll_until_done_uses_frequency() -> anyhow::Result<()> {
        let pipeline = FakePipeline::default();
        pipeline.push(Ok(reply(202, &[], Value::Null)));
        pipeline.push(Ok(reply(202, &[], Value::Null)));
        pipeline.push(Ok(reply(200, &[], json!({"state": "Started"}))));
        let response = initial(
            Method::POST,
            "https://example.com/vm/1/start",
            202,
            &[("location", "https://example.com/op/2")],
            Value::Null,
        );
        let mut poller = new_poller(response, &pipeline)?;
        let start = tokio::time::Instant::now();
        let got = poller
            .poll_until_done(&CancellationToken::new(), Duration::from_secs(10))
            .await?;
        assert_eq!(got.body().as_ref(), br#"{"state":"Started"}"#);
        assert_eq!(start.elapsed(), Duration::from_secs(20));
        assert_eq!(pipeline.requests().len(), 3);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn poll_until_done_honors_retry_after() -> anyhow::Result<()> {
        let pipeline = FakePipeline::default();
        pipeline.push(Ok(reply(
            200,
            &[("retry-after", "30")],
            json!({"status": "Running"}),
        )));
        pipeline.push(Ok(reply(200, &[], json!({"status": "Running"}))));
        pipeline.push(Ok(reply(
            200,
            &[],
            json!({"status": "Succeeded", "resourceLocation": "https://example.com/res/1"}),
        )));
        pipeline.push(Ok(reply(200, &[], json!({"name": "res-1"}))));
        let response = initial(
            Method::PUT,
            "https://example.com/res/1",
            201,
            &[
                ("operation-location", "https://example.com/op/1"),
                ("retry-after", "5"),
            ],
            Value::Null,
        );
        let mut poller = new_poller(response, &pipeline)?;
        let start = tokio::time::Instant::now();
        let got = poller
            .poll_until_done_with::<Value>(&CancellationToken::new(), Duration::from_secs(1))
            .await?;
        assert_eq!(got.body(), &json!({"name": "res-1"}));
        assert_eq!(start.elapsed(), Duration::from_secs(5 + 30 + 1));
        assert_eq!(pipeline.requests().len(), 4);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn poll_until_done_synchronous() -> anyhow::Result<()> {
        let pipeline = FakePipeline::default();
        let response = initial(
            Method::PUT,
            "https://example.com/vm/1",
            200,
            &[("retry-after", "60")],
            json!({"name": "vm-1"}),
        );
        let mut poller = new_poller(response, &pipeline)?;
        let start = tokio::time::Instant::now();
        let got = poller
            .poll_until_done(&CancellationToken::new(), Duration::from_secs(1))
            .await?;
        assert_eq!(got.body().as_ref(), br#"{"name":"vm-1"}"#);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(pipeline.requests().is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn poll_until_done_error() -> anyhow::Result<()> {
        let pipeline = FakePipeline::default();
        pipeline.push(Ok(reply(202, &[], Value::Null)));
        pipeline.push(Ok(reply(
            404,
            &[],
            json!({"error": {"code": "NotFound", "message": "gone"}}),
        )));
        let response = initial(
            Method::POST,
            "https://example.com/vm/1/start",
            202,
            &[("location", "https://example.com/op/2")],
            Value::Null,
        );
        let mut poller = new_poller(response, &pipeline)?;
        let err = poller
            .poll_until_done(&CancellationToken::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_operation_failed(), "{err:?}");
        assert!(poller.done());
        assert_eq!(pipeline.requests().len(), 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn poll_until_done_cancelled_during_delay() -> anyhow::Result<()> {
        let pipeline = FakePipeline::default();
        pipeline.push(Ok(reply(200, &[], json!({"status": "Running"}))));
        let response = initial(
            Method::PUT,
            "https://example.com/vm/1",
            201,
            &[("operation-location", "https://example.com/op/1")],
            Value::Null,
        );
        let mut poller = new_poller(response, &pipeline)?;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let start = tokio::time::Instant::now();
        let task = tokio::spawn(async move {
            let result = poller
                .poll_until_done(&token, Duration::from_secs(60))
                .await;
            (poller, result)
        });

        tokio::time::sleep(Duration::from_secs(10)).await;
        cancel.cancel();
        let (poller, result) = task.await?;
        let err = result.unwrap_err();
        assert!(err.is_cancelled(), "{err:?}");
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert!(!poller.done());
        assert_eq!(poller.status(), "Running");
        assert_eq!(pipeline.requests().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_before_send() -> anyhow::Result<()> {
        let pipeline = FakePipeline::default();
        pipeline.push(Ok(reply(200, &[], json!({"status": "Succeeded"}))));
        let response = initial(
            Method::PUT,
            "https://example.com/vm/1",
            201,
            &[("operation-location", "https://example.com/op/1")],
            Value::Null,
        );
        let mut poller = new_poller(response, &pipeline)?;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = poller.poll(&cancel).await.unwrap_err();
        assert!(err.is_cancelled(), "{err:?}");
        assert!(!poller.done());
        assert!(pipeline.requests().is_empty());
        Ok(())
    }
}
