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

//! Cloud management API helpers.
//!
//! This crate contains the hand-written types and functions shared by the
//! generated management clients: the error model, the request and response
//! types, the [Pipeline][http_client::Pipeline] abstraction used to send
//! requests, and the [ErrorUnmarshaller][error_unmarshaller::ErrorUnmarshaller]
//! used to interpret failed responses.
//!
//! The generated clients, and the long-running operation helpers in the
//! `cloud-mgmt-lro` crate, consume these types. Applications typically only
//! need them when mocking a client or supplying a custom transport.

/// An alias of [std::result::Result] where the error is always [crate::error::Error].
///
/// This is the result type used by all functions wrapping REST calls.
pub type Result<T> = std::result::Result<T, crate::error::Error>;

/// The core error types used by generated clients.
pub mod error;

/// Converts failed responses into [error::Error] values.
pub mod error_unmarshaller;

/// Defines the request type and the pipeline used to send requests.
pub mod http_client;

/// A [http_client::PipelineProvider] based on `reqwest`.
pub mod http;

pub mod response;

/// Parses the `Retry-After` response header.
pub mod retry_after;
