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

//! Errors returned by the management clients.
//!
//! The client libraries distinguish between errors detected while trying to
//! send a request (e.g. cannot open a connection), responses that the service
//! sent with a status code indicating failure, and errors detected by the
//! client library itself (e.g. a long-running operation was queried before it
//! completed).
//!
//! # Examples
//!
//! ```
//! use cloud_mgmt_gax::error::Error;
//! fn handle_error(e: Error) {
//!     if let Some(service) = e.service_error() {
//!         println!("the service says {}: {}", service.detail().code, service.detail().message);
//!     } else if e.is_transport() {
//!         println!("could not reach the service: {e}");
//!     }
//! }
//! ```

mod core_error;
mod service_error;
pub use core_error::*;
pub use service_error::*;
