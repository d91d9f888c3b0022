/*  Copyright 2022-23, Juspay India Pvt Ltd
    This program is free software: you can redistribute it and/or modify it under the terms of the GNU Affero General Public License
    as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version. This program
    is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
    or FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more details. You should have received a copy of
    the GNU Affero General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
*/

use crate::middleware::{
    route_name::{transaction_name, RouteMatch},
    utils::get_request_id,
};
use actix_web::{
    body::MessageBody,
    dev::{ServiceRequest, ServiceResponse},
    Error,
};
use tracing::Span;
use tracing_actix_web::{DefaultRootSpanBuilder, RootSpanBuilder};
use uuid::Uuid;

/// Root span builder for `tracing_actix_web::TracingLogger`.
///
/// The span carries the request id (`x-request-id`, or a fresh uuid) and the
/// same route-based name the transaction gets, so log lines and transactions
/// can be joined on either.
pub struct TransactionRootSpanBuilder;

impl RootSpanBuilder for TransactionRootSpanBuilder {
    fn on_request_start(request: &ServiceRequest) -> Span {
        let request_id = get_request_id(request.request()).unwrap_or(Uuid::new_v4().to_string());
        let transaction = transaction_name(&RouteMatch::from_request(request.request()));

        tracing_actix_web::root_span!(request, request_id, transaction)
    }

    fn on_request_end<B: MessageBody>(span: Span, outcome: &Result<ServiceResponse<B>, Error>) {
        DefaultRootSpanBuilder::on_request_end(span, outcome);
    }
}
