/*  Copyright 2022-23, Juspay India Pvt Ltd
    This program is free software: you can redistribute it and/or modify it under the terms of the GNU Affero General Public License
    as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version. This program
    is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
    or FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more details. You should have received a copy of
    the GNU Affero General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
*/

//! Carries the current [`Txn`] alongside a request.
//!
//! Two carriers are used: the request extensions, read by the [`Txn`]
//! extractor and [`from_request`], and a task-local scope, read by
//! [`current`] from code that has no access to the `HttpRequest`.

use crate::middleware::txn::Txn;
use actix_web::{dev::ServiceRequest, HttpMessage, HttpRequest};
use std::future::Future;
use tokio::task::futures::TaskLocalFuture;

tokio::task_local! {
    static CURRENT_TXN: Txn;
}

/// Stores `txn` in the request extensions, replacing any previous handle.
pub fn install(req: &ServiceRequest, txn: Txn) {
    req.extensions_mut().insert(txn);
}

/// Runs `fut` with `txn` as the current transaction.
///
/// Scopes nest: the innermost one wins and the outer handle is visible again
/// once the inner future completes.
pub fn scope<F: Future>(txn: Txn, fut: F) -> TaskLocalFuture<Txn, F> {
    CURRENT_TXN.scope(txn, fut)
}

/// Returns the handle installed on `req`, then the task-local one, then the no-op handle.
pub fn from_request(req: &HttpRequest) -> Txn {
    let installed = req.extensions().get::<Txn>().cloned();
    installed.unwrap_or_else(current)
}

/// Returns the handle of the enclosing [`scope`], or the no-op handle.
pub fn current() -> Txn {
    CURRENT_TXN
        .try_with(|txn| txn.clone())
        .unwrap_or_else(|_| Txn::noop())
}
