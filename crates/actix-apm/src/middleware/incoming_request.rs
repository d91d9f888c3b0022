/*  Copyright 2022-23, Juspay India Pvt Ltd
    This program is free software: you can redistribute it and/or modify it under the terms of the GNU Affero General Public License
    as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version. This program
    is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
    or FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more details. You should have received a copy of
    the GNU Affero General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
*/

use crate::agent::{Application, NoticedError};
use crate::middleware::{
    context,
    http_error::HttpError,
    response::{ResponseObserver, ResponseSnapshot},
    route_name::{transaction_name, RouteMatch},
    txn::Txn,
    utils::get_web_request,
};
use actix::fut::{ready, Ready};
use actix_http::StatusCode;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures::{future::LocalBoxFuture, FutureExt};
use regex::Regex;
use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};

type Skipper = Arc<dyn Fn(&ServiceRequest) -> bool + Send + Sync>;

/// Options of the transaction middleware.
#[derive(Clone)]
pub struct MiddlewareConfig {
    skipper: Skipper,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        MiddlewareConfig {
            skipper: Arc::new(|_| false),
        }
    }
}

impl std::fmt::Debug for MiddlewareConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareConfig").finish_non_exhaustive()
    }
}

impl MiddlewareConfig {
    /// Requests for which `skipper` returns true are never instrumented.
    pub fn with_skipper<F>(mut self, skipper: F) -> Self
    where
        F: Fn(&ServiceRequest) -> bool + Send + Sync + 'static,
    {
        self.skipper = Arc::new(skipper);
        self
    }

    /// Skips every request whose path matches `pattern`, e.g. `^/(health|metrics)$`.
    pub fn skip_paths_matching(self, pattern: &str) -> Result<Self, regex::Error> {
        let paths = Regex::new(pattern)?;
        Ok(self.with_skipper(move |req| paths.is_match(req.path())))
    }

    fn skips(&self, req: &ServiceRequest) -> bool {
        (self.skipper)(req)
    }
}

/// Builds the transaction middleware.
///
/// `None` for `app` is a supported mode: requests pass through untouched and
/// handlers get the no-op [`Txn`].
///
/// ```norun
/// let recorder = Recorder::new(AgentConfig::from_env()?)?;
/// HttpServer::new(move || {
///     App::new()
///         .wrap(middleware(Some(Arc::new(recorder.clone())), MiddlewareConfig::default()))
///         .route("/hello", web::get().to(hello))
/// })
/// ```
pub fn middleware(
    app: Option<Arc<dyn Application>>,
    config: MiddlewareConfig,
) -> IncomingRequestTransaction {
    IncomingRequestTransaction { app, config }
}

/// Attaches a monitoring transaction to every incoming request.
///
/// The transaction is named after the matched route, classified from the
/// response status or the returned error, and ended exactly once whether the
/// handler returns, fails, panics or is dropped mid-flight.
pub struct IncomingRequestTransaction {
    app: Option<Arc<dyn Application>>,
    config: MiddlewareConfig,
}

impl<S, B> Transform<S, ServiceRequest> for IncomingRequestTransaction
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = IncomingRequestTransactionMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(IncomingRequestTransactionMiddleware {
            service,
            app: self.app.clone(),
            config: self.config.clone(),
        }))
    }
}

pub struct IncomingRequestTransactionMiddleware<S> {
    service: S,
    app: Option<Arc<dyn Application>>,
    config: MiddlewareConfig,
}

impl<S> IncomingRequestTransactionMiddleware<S> {
    fn start(&self, req: &ServiceRequest) -> Option<(Txn, RouteMatch)> {
        let app = self.app.as_ref()?;
        if self.config.skips(req) {
            return None;
        }
        let route = RouteMatch::from_request(req.request());
        let txn = app.start_transaction(&transaction_name(&route))?;
        Some((txn, route))
    }
}

impl<S, B> Service<ServiceRequest> for IncomingRequestTransactionMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let Some((txn, route)) = self.start(&req) else {
            context::install(&req, Txn::noop());
            return self.service.call(req).boxed_local();
        };

        txn.set_web_request(get_web_request(req.request()));
        context::install(&req, txn.clone());
        let guard = FinalizeGuard { txn: txn.clone() };
        let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| self.service.call(req))) {
            Ok(fut) => context::scope(txn.clone(), fut),
            Err(panic) => {
                guard.panicked(panic.as_ref());
                std::panic::resume_unwind(panic);
            }
        };

        Box::pin(async move {
            let outcome = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => {
                    guard.panicked(panic.as_ref());
                    std::panic::resume_unwind(panic);
                }
            };

            let observer = ResponseObserver::new();
            let handler_error = match &outcome {
                Ok(response) => {
                    observer.observe(response);
                    response.response().error().map(HandlerError::classify)
                }
                Err(err) => Some(HandlerError::classify(err)),
            };

            let status = logical_status(
                handler_error.as_ref(),
                observer.written().map(|snapshot| snapshot.status),
            );
            txn.set_name(transaction_name(
                &route.with_outcome(status, handler_error.is_some()),
            ));
            if let Some(handler_error) = handler_error {
                txn.notice_error(handler_error.into_noticed());
            }
            txn.set_web_response(observer.classified(status));
            drop(guard);

            outcome
        })
    }
}

/// Ends the transaction when dropped, which covers completion, panics and
/// cancellation of the request future alike.
struct FinalizeGuard {
    txn: Txn,
}

impl FinalizeGuard {
    fn panicked(self, payload: &(dyn Any + Send)) {
        self.txn.notice_error(
            NoticedError::new(panic_message(payload))
                .with_class("panic")
                .with_status(StatusCode::INTERNAL_SERVER_ERROR),
        );
        self.txn
            .set_web_response(ResponseSnapshot::new(StatusCode::INTERNAL_SERVER_ERROR));
    }
}

impl Drop for FinalizeGuard {
    fn drop(&mut self) {
        self.txn.end();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.to_string()
    } else {
        "Unknown".to_string()
    }
}

/// Error returned by the handler chain, as far as classification cares.
#[derive(Debug, Clone, PartialEq, Eq)]
enum HandlerError {
    /// Carries the status it must be answered with.
    Http { status: StatusCode, message: String },
    Plain { message: String },
}

impl HandlerError {
    /// [`HttpError`] and any error declaring a status other than 500 are
    /// structured; everything else falls back to actix's default 500.
    fn classify(err: &Error) -> Self {
        if let Some(http_error) = err.as_error::<HttpError>() {
            return HandlerError::Http {
                status: http_error.status(),
                message: http_error.message().to_string(),
            };
        }
        match err.as_response_error().status_code() {
            StatusCode::INTERNAL_SERVER_ERROR => HandlerError::Plain {
                message: err.to_string(),
            },
            status => HandlerError::Http {
                status,
                message: err.to_string(),
            },
        }
    }

    fn into_noticed(self) -> NoticedError {
        match self {
            HandlerError::Http { status, message } => NoticedError::new(message)
                .with_class("HttpError")
                .with_status(status),
            HandlerError::Plain { message } => NoticedError::new(message),
        }
    }
}

/// Status the transaction is classified with.
///
/// Structured errors always report their own status. Plain errors report
/// whatever was already written, or 500 when nothing was.
fn logical_status(error: Option<&HandlerError>, written: Option<StatusCode>) -> StatusCode {
    match (error, written) {
        (Some(HandlerError::Http { status, .. }), _) => *status,
        (Some(HandlerError::Plain { .. }), Some(written)) => written,
        (Some(HandlerError::Plain { .. }), None) => StatusCode::INTERNAL_SERVER_ERROR,
        (None, Some(written)) => written,
        (None, None) => StatusCode::OK,
    }
}
