/*  Copyright 2022-23, Juspay India Pvt Ltd
    This program is free software: you can redistribute it and/or modify it under the terms of the GNU Affero General Public License
    as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version. This program
    is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
    or FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more details. You should have received a copy of
    the GNU Affero General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
*/

//! Transaction instrumentation for actix-web.
//!
//! Mount [`middleware::incoming_request::middleware`] on an `App` and every
//! request gets a monitoring transaction, named after its matched route and
//! finalized exactly once. Handlers reach the current transaction through
//! [`middleware::txn::Txn`] (an actix extractor) or [`middleware::context::current`].

pub mod agent;
pub mod middleware;
pub mod tools;

pub use agent::{
    config::AgentConfig,
    recorder::{ApdexZone, RecordedTransaction, Recorder},
    Application, AttributeValue, NoticedError, Transaction, WebRequest,
};
pub use middleware::{
    http_error::HttpError,
    incoming_request::{middleware, IncomingRequestTransaction, MiddlewareConfig},
    response::ResponseSnapshot,
    txn::Txn,
};
