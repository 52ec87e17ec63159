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

use http::HeaderMap;
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc2822;

/// Returns the delay requested by the `Retry-After` header, if any.
///
/// The header may contain a number of seconds or an HTTP-date. Dates are
/// interpreted relative to the current time. Missing, unparseable, zero, and
/// past values all return `None`.
///
/// # Example
/// ```
/// # use cloud_mgmt_gax::retry_after::retry_after;
/// # use std::time::Duration;
/// let mut headers = http::HeaderMap::new();
/// headers.insert(http::header::RETRY_AFTER, http::HeaderValue::from_static("5"));
/// assert_eq!(retry_after(&headers), Some(Duration::from_secs(5)));
/// ```
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    retry_after_at(headers, OffsetDateTime::now_utc())
}

fn retry_after_at(headers: &HeaderMap, now: OffsetDateTime) -> Option<Duration> {
    let value = headers.get(http::header::RETRY_AFTER)?.to_str().ok()?.trim();
    let delay = match value.parse::<u64>() {
        Ok(seconds) => Duration::from_secs(seconds),
        Err(_) => {
            let date = parse_http_date(value)?;
            Duration::try_from(date - now).ok()?
        }
    };
    (!delay.is_zero()).then_some(delay)
}

fn parse_http_date(value: &str) -> Option<OffsetDateTime> {
    if let Ok(date) = OffsetDateTime::parse(value, &Rfc2822) {
        return Some(date);
    }
    // HTTP-dates always use `GMT`.
    let value = value.strip_suffix("GMT")?;
    OffsetDateTime::parse(&format!("{value}+0000"), &Rfc2822).ok()
}
