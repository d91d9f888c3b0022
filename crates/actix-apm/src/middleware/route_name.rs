/*  Copyright 2022-23, Juspay India Pvt Ltd
    This program is free software: you can redistribute it and/or modify it under the terms of the GNU Affero General Public License
    as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version. This program
    is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
    or FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more details. You should have received a copy of
    the GNU Affero General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
*/

use actix_http::{Method, StatusCode};
use actix_web::HttpRequest;

pub const NOT_FOUND_HANDLER: &str = "NotFoundHandler";
pub const METHOD_NOT_ALLOWED_HANDLER: &str = "MethodNotAllowedHandler";

/// What the router made of a request.
///
/// `pattern` is the registered resource pattern (`/users/{id}`), never the
/// concrete path, so naming stays bounded no matter how many ids are served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    pub method: Method,
    pub pattern: Option<String>,
    pub no_route: bool,
    pub method_not_allowed: bool,
}

impl RouteMatch {
    /// Route match as known before the request is dispatched.
    ///
    /// actix resolves patterns from the resource map, so this works from an
    /// `App`-level middleware. Method mismatches are only known afterwards,
    /// see [`RouteMatch::with_outcome`].
    pub fn from_request(request: &HttpRequest) -> Self {
        let pattern = request.match_pattern();
        RouteMatch {
            method: request.method().clone(),
            no_route: pattern.is_none(),
            pattern,
            method_not_allowed: false,
        }
    }

    /// Completes the match with the final response status.
    ///
    /// A resource that matched the path but none of its method guards answers
    /// `405` from its default service, without an error attached. A `405`
    /// returned as a handler error comes from a matched method and keeps the
    /// route name.
    pub fn with_outcome(mut self, status: StatusCode, handler_failed: bool) -> Self {
        self.method_not_allowed =
            !self.no_route && !handler_failed && status == StatusCode::METHOD_NOT_ALLOWED;
        self
    }
}

/// Derives the transaction name: `"<METHOD> <pattern>"` or a routing sentinel.
pub fn transaction_name(route: &RouteMatch) -> String {
    match &route.pattern {
        Some(_) if route.method_not_allowed => METHOD_NOT_ALLOWED_HANDLER.to_string(),
        Some(pattern) if !route.no_route => format!("{} {}", route.method, pattern),
        _ => NOT_FOUND_HANDLER.to_string(),
    }
}
