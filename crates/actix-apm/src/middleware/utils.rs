/*  Copyright 2022-23, Juspay India Pvt Ltd
    This program is free software: you can redistribute it and/or modify it under the terms of the GNU Affero General Public License
    as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version. This program
    is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
    or FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more details. You should have received a copy of
    the GNU Affero General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
*/

use crate::agent::WebRequest;
use actix_http::header::{HOST, USER_AGENT};
use actix_web::HttpRequest;

/// Get the decoded path of the HTTP request.
///
/// The query string is never part of the result, so `/hello?remove=me` and
/// `/hello` produce the same uri.
///
/// # Arguments
/// * `request` - The incoming HTTP request.
///
/// # Returns
/// * `String` - The percent-decoded path.
pub fn get_path(request: &HttpRequest) -> String {
    urlencoding::decode(request.path())
        .ok()
        .map(|s| s.to_string())
        .unwrap_or(request.path().to_string())
}

/// Get the method from the HTTP request.
pub fn get_method(request: &HttpRequest) -> String {
    request.method().to_string()
}

/// Get the value of the `x-request-id` header, if present and valid UTF-8.
pub fn get_request_id(request: &HttpRequest) -> Option<String> {
    header_value(request, "x-request-id")
}

fn header_value(request: &HttpRequest, name: impl actix_http::header::AsHeaderName) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

/// Collect the request metadata recorded on a transaction.
///
/// # Arguments
/// * `request` - The incoming HTTP request.
///
/// # Returns
/// * `WebRequest` - Method, decoded path and the identifying headers.
pub fn get_web_request(request: &HttpRequest) -> WebRequest {
    WebRequest {
        method: get_method(request),
        uri: get_path(request),
        host: header_value(request, HOST),
        user_agent: header_value(request, USER_AGENT),
        request_id: get_request_id(request),
    }
}
