/*  Copyright 2022-23, Juspay India Pvt Ltd
    This program is free software: you can redistribute it and/or modify it under the terms of the GNU Affero General Public License
    as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version. This program
    is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
    or FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more details. You should have received a copy of
    the GNU Affero General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
*/

use crate::agent::{AttributeValue, NoticedError, Transaction, WebRequest};
use crate::middleware::context;
use crate::middleware::response::ResponseSnapshot;
use actix::fut::{ready, Ready};
use actix_web::{dev::Payload, Error, FromRequest, HttpRequest};
use std::rc::Rc;

/// Handle to the transaction of the request being served.
///
/// Cloning is cheap and every clone points at the same transaction. When no
/// transaction is being recorded (middleware not mounted, request skipped or
/// agent disabled) the handle silently discards writes, so handler code never
/// needs to check which kind it holds.
///
/// Handlers can take it as an extractor:
///
/// ```norun
/// async fn hello(txn: Txn) -> HttpResponse {
///     txn.add_attribute("greeting", "hello");
///     HttpResponse::Ok().body("Hello, World!")
/// }
/// ```
#[derive(Clone)]
pub struct Txn {
    inner: Rc<dyn Transaction>,
}

impl Txn {
    pub fn new<T: Transaction + 'static>(transaction: T) -> Self {
        Txn {
            inner: Rc::new(transaction),
        }
    }

    pub fn noop() -> Self {
        Txn::new(NoopTransaction)
    }

    pub fn set_name(&self, name: impl AsRef<str>) {
        self.inner.set_name(name.as_ref());
    }

    pub fn notice_error(&self, error: impl Into<NoticedError>) {
        self.inner.notice_error(error.into());
    }

    pub fn add_attribute(&self, key: impl AsRef<str>, value: impl Into<AttributeValue>) {
        self.inner.add_attribute(key.as_ref(), value.into());
    }

    pub(crate) fn set_web_request(&self, request: WebRequest) {
        self.inner.set_web_request(request);
    }

    pub(crate) fn set_web_response(&self, response: ResponseSnapshot) {
        self.inner.set_web_response(response);
    }

    // Only the lifecycle middleware finalizes.
    pub(crate) fn end(&self) {
        self.inner.end();
    }
}

impl std::fmt::Debug for Txn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Txn").finish_non_exhaustive()
    }
}

impl FromRequest for Txn {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(Ok(context::from_request(req)))
    }
}

/// Transaction that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTransaction;

impl Transaction for NoopTransaction {
    fn set_name(&self, _: &str) {}

    fn notice_error(&self, _: NoticedError) {}

    fn add_attribute(&self, _: &str, _: AttributeValue) {}

    fn set_web_request(&self, _: WebRequest) {}

    fn set_web_response(&self, _: ResponseSnapshot) {}

    fn end(&self) {}
}
