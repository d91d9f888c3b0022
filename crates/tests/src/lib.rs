/*  Copyright 2022-23, Juspay India Pvt Ltd
    This program is free software: you can redistribute it and/or modify it under the terms of the GNU Affero General Public License
    as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version. This program
    is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
    or FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more details. You should have received a copy of
    the GNU Affero General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
*/
#![cfg(test)]

use actix_apm::{
    middleware::{context, request_id::TransactionRootSpanBuilder},
    middleware as transaction_middleware,
    tools::{
        logger::{setup_tracing, LoggerConfig, LoggerError},
        prometheus::init_prometheus_metrics,
    },
    AgentConfig, ApdexZone, Application, HttpError, IncomingRequestTransaction,
    MiddlewareConfig, NoticedError, RecordedTransaction, Recorder, Txn,
};
use actix_web::{
    body::BoxBody,
    dev::{Service, ServiceRequest, ServiceResponse},
    http::{header::CONTENT_TYPE, StatusCode},
    test, web, App, Error, HttpResponse, ResponseError,
};
use futures::FutureExt;
use std::{panic::AssertUnwindSafe, sync::Arc};
use thiserror::Error;
use tracing_actix_web::TracingLogger;

fn recorder() -> Recorder {
    Recorder::new(AgentConfig::default()).unwrap()
}

fn instrumented(recorder: &Recorder, config: MiddlewareConfig) -> IncomingRequestTransaction {
    let app: Arc<dyn Application> = Arc::new(recorder.clone());
    transaction_middleware(Some(app), config)
}

fn only_transaction(recorder: &Recorder) -> RecordedTransaction {
    let mut transactions = recorder.harvest();
    assert_eq!(transactions.len(), 1, "expected exactly one finalized transaction");
    transactions.remove(0)
}

fn agent_attribute(transaction: &RecordedTransaction, key: &str) -> Option<String> {
    transaction.agent_attribute(key).map(|value| value.to_string())
}

async fn hello() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html")
        .body("Hello, World!")
}

#[derive(Debug, Error)]
#[error("ooooooooops")]
struct Oops;

impl ResponseError for Oops {}

#[actix_web::test]
async fn test_basic_route() {
    let recorder = recorder();
    let app = test::init_service(
        App::new()
            .wrap(instrumented(&recorder, MiddlewareConfig::default()))
            .route("/hello", web::get().to(hello)),
    )
    .await;

    let req = test::TestRequest::get().uri("/hello?remove=me").to_request();
    let body = test::call_and_read_body(&app, req).await;
    assert_eq!(body, web::Bytes::from_static(b"Hello, World!"));

    let transaction = only_transaction(&recorder);
    assert_eq!(transaction.name, "GET /hello");
    assert_eq!(transaction.apdex_zone, ApdexZone::Satisfying);
    assert!(transaction.errors.is_empty());
    assert_eq!(agent_attribute(&transaction, "httpResponseCode").as_deref(), Some("200"));
    assert_eq!(agent_attribute(&transaction, "http.statusCode").as_deref(), Some("200"));
    assert_eq!(agent_attribute(&transaction, "request.method").as_deref(), Some("GET"));
    assert_eq!(agent_attribute(&transaction, "request.uri").as_deref(), Some("/hello"));
    assert_eq!(
        agent_attribute(&transaction, "response.headers.contentType").as_deref(),
        Some("text/html")
    );
    assert!(transaction.user_attributes.is_empty());
}

#[actix_web::test]
async fn test_skipper() {
    let recorder = recorder();
    let skipper = |req: &ServiceRequest| req.match_pattern().as_deref() == Some("/health");
    let app = test::init_service(
        App::new()
            .wrap(instrumented(&recorder, MiddlewareConfig::default().with_skipper(skipper)))
            .route("/hello", web::get().to(hello))
            .route(
                "/health",
                web::get().to(|txn: Txn| async move {
                    txn.add_attribute("should", "vanish");
                    txn.notice_error("should vanish too");
                    HttpResponse::NoContent().finish()
                }),
            ),
    )
    .await;

    let req = test::TestRequest::get().uri("/hello?remove=me").to_request();
    let body = test::call_and_read_body(&app, req).await;
    assert_eq!(body, web::Bytes::from_static(b"Hello, World!"));

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let transaction = only_transaction(&recorder);
    assert_eq!(transaction.name, "GET /hello");
    assert!(transaction.errors.is_empty());
}

#[actix_web::test]
async fn test_skip_paths_matching() {
    let recorder = recorder();
    let config = MiddlewareConfig::default()
        .skip_paths_matching("^/(health|metrics)$")
        .unwrap();
    let app = test::init_service(
        App::new()
            .wrap(instrumented(&recorder, config))
            .route("/health", web::get().to(|| async { HttpResponse::NoContent().finish() })),
    )
    .await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(recorder.transactions().is_empty());
}

#[actix_web::test]
async fn test_nil_app() {
    let app = test::init_service(
        App::new()
            .wrap(transaction_middleware(None, MiddlewareConfig::default()))
            .route(
                "/hello",
                web::get().to(|txn: Txn| async move {
                    txn.add_attribute("ignored", true);
                    txn.notice_error("ignored");
                    HttpResponse::Ok().body("Hello, World!")
                }),
            ),
    )
    .await;

    let req = test::TestRequest::get().uri("/hello?remove=me").to_request();
    let body = test::call_and_read_body(&app, req).await;
    assert_eq!(body, web::Bytes::from_static(b"Hello, World!"));
}

#[actix_web::test]
async fn test_disabled_agent_behaves_like_no_app() {
    let recorder = Recorder::new(AgentConfig {
        enabled: false,
        ..AgentConfig::default()
    })
    .unwrap();
    let app = test::init_service(
        App::new()
            .wrap(instrumented(&recorder, MiddlewareConfig::default()))
            .route("/hello", web::get().to(hello)),
    )
    .await;

    let req = test::TestRequest::get().uri("/hello").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(test::read_body(resp).await, web::Bytes::from_static(b"Hello, World!"));
    assert!(recorder.transactions().is_empty());
}

#[actix_web::test]
async fn test_transaction_context() {
    let recorder = recorder();
    let app = test::init_service(
        App::new()
            .wrap(instrumented(&recorder, MiddlewareConfig::default()))
            .route(
                "/hello",
                web::get().to(|txn: Txn| async move {
                    txn.notice_error(NoticedError::new("ooops"));
                    HttpResponse::Ok().body("Hello, World!")
                }),
            ),
    )
    .await;

    let req = test::TestRequest::get().uri("/hello?remove=me").to_request();
    let body = test::call_and_read_body(&app, req).await;
    assert_eq!(body, web::Bytes::from_static(b"Hello, World!"));

    let transaction = only_transaction(&recorder);
    assert_eq!(transaction.name, "GET /hello");
    assert_eq!(transaction.errors.len(), 1);
    assert_eq!(transaction.errors[0].message, "ooops");
    assert_eq!(transaction.status(), Some(200));
}

async fn load_profile(id: u32) -> String {
    context::current().add_attribute("profile.cache", "miss");
    format!("profile {id}")
}

#[actix_web::test]
async fn test_context_reaches_nested_code() {
    let recorder = recorder();
    let app = test::init_service(
        App::new()
            .wrap(instrumented(&recorder, MiddlewareConfig::default()))
            .route(
                "/users/{id}",
                web::get().to(|id: web::Path<u32>, txn: Txn| async move {
                    txn.add_attribute("user.id", id.into_inner());
                    let profile = context::scope(context::current(), load_profile(7)).await;
                    HttpResponse::Ok().body(profile)
                }),
            ),
    )
    .await;

    let req = test::TestRequest::get().uri("/users/42").to_request();
    let body = test::call_and_read_body(&app, req).await;
    assert_eq!(body, web::Bytes::from_static(b"profile 7"));

    let transaction = only_transaction(&recorder);
    assert_eq!(transaction.name, "GET /users/{id}");
    assert_eq!(
        transaction.user_attribute("user.id").map(|v| v.to_string()).as_deref(),
        Some("42")
    );
    assert_eq!(
        transaction.user_attribute("profile.cache").map(|v| v.to_string()).as_deref(),
        Some("miss")
    );
}

#[actix_web::test]
async fn test_path_parameters_share_a_name() {
    let recorder = recorder();
    let app = test::init_service(
        App::new()
            .wrap(instrumented(&recorder, MiddlewareConfig::default()))
            .route("/users/{id}", web::get().to(|| async { HttpResponse::Ok().finish() })),
    )
    .await;

    for uri in ["/users/42", "/users/7?remove=me"] {
        let req = test::TestRequest::get().uri(uri).to_request();
        test::call_service(&app, req).await;
    }

    let names: Vec<String> = recorder.harvest().into_iter().map(|t| t.name).collect();
    assert_eq!(names, vec!["GET /users/{id}", "GET /users/{id}"]);
}

#[actix_web::test]
async fn test_not_found_handler() {
    let recorder = recorder();
    let app = test::init_service(
        App::new().wrap(instrumented(&recorder, MiddlewareConfig::default())),
    )
    .await;

    let req = test::TestRequest::get().uri("/hello?remove=me").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let transaction = only_transaction(&recorder);
    assert_eq!(transaction.name, "NotFoundHandler");
    assert_eq!(transaction.errors.len(), 1);
    assert_eq!(transaction.status(), Some(404));
}

#[actix_web::test]
async fn test_not_found_ignored_status() {
    let recorder = Recorder::new(AgentConfig {
        ignore_status_codes: vec![404],
        ..AgentConfig::default()
    })
    .unwrap();
    let app = test::init_service(
        App::new().wrap(instrumented(&recorder, MiddlewareConfig::default())),
    )
    .await;

    let req = test::TestRequest::get().uri("/hello").to_request();
    test::call_service(&app, req).await;

    let transaction = only_transaction(&recorder);
    assert_eq!(transaction.name, "NotFoundHandler");
    assert!(transaction.errors.is_empty());
}

#[actix_web::test]
async fn test_method_not_allowed_handler() {
    let recorder = recorder();
    let app = test::init_service(
        App::new()
            .wrap(instrumented(&recorder, MiddlewareConfig::default()))
            .route("/hello", web::get().to(hello)),
    )
    .await;

    let req = test::TestRequest::post().uri("/hello?remove=me").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

    let transaction = only_transaction(&recorder);
    assert_eq!(transaction.name, "MethodNotAllowedHandler");
    assert_eq!(transaction.errors.len(), 1);
    assert_eq!(transaction.status(), Some(405));
}

#[actix_web::test]
async fn test_handler_405_keeps_route_name() {
    let recorder = recorder();
    let app = test::init_service(
        App::new()
            .wrap(instrumented(&recorder, MiddlewareConfig::default()))
            .route(
                "/hello",
                web::get().to(|| async {
                    Err::<HttpResponse, _>(HttpError::new(StatusCode::METHOD_NOT_ALLOWED, "nope"))
                }),
            ),
    )
    .await;

    let req = test::TestRequest::get().uri("/hello").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

    let transaction = only_transaction(&recorder);
    assert_eq!(transaction.name, "GET /hello");
    assert_eq!(transaction.errors.len(), 1);
    assert_eq!(transaction.errors[0].message, "nope");
    assert_eq!(transaction.status(), Some(405));
}

#[actix_web::test]
async fn test_returns_http_error() {
    let recorder = recorder();
    let app = test::init_service(
        App::new()
            .wrap(instrumented(&recorder, MiddlewareConfig::default()))
            .route(
                "/hello",
                web::get().to(|| async {
                    Err::<HttpResponse, _>(HttpError::new(StatusCode::IM_A_TEAPOT, "I'm a teapot!"))
                }),
            ),
    )
    .await;

    let req = test::TestRequest::get().uri("/hello?remove=me").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(
        resp.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("application/json")
    );
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["message"], "I'm a teapot!");

    let transaction = only_transaction(&recorder);
    assert_eq!(transaction.name, "GET /hello");
    assert_eq!(transaction.apdex_zone, ApdexZone::Frustrating);
    assert_eq!(transaction.errors.len(), 1);
    assert_eq!(transaction.errors[0].status, Some(418));
    assert_eq!(agent_attribute(&transaction, "httpResponseCode").as_deref(), Some("418"));
    assert_eq!(agent_attribute(&transaction, "request.uri").as_deref(), Some("/hello"));
}

#[actix_web::test]
async fn test_returns_error() {
    let recorder = recorder();
    let app = test::init_service(
        App::new()
            .wrap(instrumented(&recorder, MiddlewareConfig::default()))
            .route(
                "/hello",
                web::get().to(|| async { Err::<HttpResponse, _>(Oops) }),
            ),
    )
    .await;

    let req = test::TestRequest::get().uri("/hello?remove=me").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let transaction = only_transaction(&recorder);
    assert_eq!(transaction.name, "GET /hello");
    assert_eq!(transaction.apdex_zone, ApdexZone::Frustrating);
    assert_eq!(transaction.errors.len(), 1);
    assert_eq!(transaction.errors[0].message, "ooooooooops");
    assert_eq!(agent_attribute(&transaction, "httpResponseCode").as_deref(), Some("500"));
}

#[actix_web::test]
async fn test_response_code() {
    let recorder = recorder();
    let app = test::init_service(
        App::new()
            .wrap(instrumented(&recorder, MiddlewareConfig::default()))
            .route(
                "/hello",
                web::get().to(|| async {
                    HttpResponse::build(StatusCode::IM_A_TEAPOT)
                        .content_type("text/html")
                        .body("Hello, World!")
                }),
            ),
    )
    .await;

    let req = test::TestRequest::get().uri("/hello?remove=me").to_request();
    test::call_service(&app, req).await;

    let transaction = only_transaction(&recorder);
    assert_eq!(transaction.name, "GET /hello");
    assert_eq!(transaction.apdex_zone, ApdexZone::Frustrating);
    assert_eq!(transaction.errors.len(), 1);
    assert_eq!(agent_attribute(&transaction, "httpResponseCode").as_deref(), Some("418"));
    assert_eq!(
        agent_attribute(&transaction, "response.headers.contentType").as_deref(),
        Some("text/html")
    );
}

#[actix_web::test]
async fn test_errors_pass_through_unchanged() {
    let recorder = recorder();
    let app = test::init_service(
        App::new()
            .wrap_fn(|_req: ServiceRequest, _srv| async {
                Err::<ServiceResponse<BoxBody>, Error>(
                    HttpError::new(StatusCode::IM_A_TEAPOT, "short and stout").into(),
                )
            })
            .wrap(instrumented(&recorder, MiddlewareConfig::default()))
            .route("/hello", web::get().to(hello)),
    )
    .await;

    let req = test::TestRequest::get().uri("/hello").to_request();
    let err = match app.call(req).await {
        Ok(_) => panic!("the error must reach the caller"),
        Err(err) => err,
    };
    assert_eq!(err.as_response_error().status_code(), StatusCode::IM_A_TEAPOT);
    assert_eq!(err.to_string(), "short and stout");

    let transaction = only_transaction(&recorder);
    assert_eq!(transaction.name, "GET /hello");
    assert_eq!(transaction.errors.len(), 1);
    assert_eq!(transaction.status(), Some(418));
    assert!(agent_attribute(&transaction, "response.headers.contentType").is_none());
}

#[actix_web::test]
async fn test_plain_error_escaping_the_chain_is_500() {
    let recorder = recorder();
    let app = test::init_service(
        App::new()
            .wrap_fn(|_req: ServiceRequest, _srv| async {
                Err::<ServiceResponse<BoxBody>, Error>(Oops.into())
            })
            .wrap(instrumented(&recorder, MiddlewareConfig::default()))
            .route("/hello", web::get().to(hello)),
    )
    .await;

    let req = test::TestRequest::get().uri("/hello").to_request();
    assert!(app.call(req).await.is_err());

    let transaction = only_transaction(&recorder);
    assert_eq!(transaction.errors.len(), 1);
    assert_eq!(transaction.errors[0].message, "ooooooooops");
    assert_eq!(transaction.status(), Some(500));
}

#[actix_web::test]
async fn test_panic_is_finalized_and_resumed() {
    let recorder = recorder();
    let app = test::init_service(
        App::new()
            .wrap(instrumented(&recorder, MiddlewareConfig::default()))
            .route(
                "/boom",
                web::get().to(|| async {
                    if true {
                        panic!("handler exploded");
                    }
                    HttpResponse::Ok().finish()
                }),
            ),
    )
    .await;

    let req = test::TestRequest::get().uri("/boom").to_request();
    let outcome = AssertUnwindSafe(test::call_service(&app, req))
        .catch_unwind()
        .await;
    assert!(outcome.is_err(), "the panic must keep propagating");

    let transaction = only_transaction(&recorder);
    assert_eq!(transaction.name, "GET /boom");
    assert_eq!(transaction.errors.len(), 1);
    assert_eq!(transaction.errors[0].class, "panic");
    assert_eq!(transaction.errors[0].message, "handler exploded");
    assert_eq!(transaction.status(), Some(500));
}

#[actix_web::test]
async fn test_panic_while_dispatching_is_recorded() {
    let recorder = recorder();
    let app = test::init_service(
        App::new()
            .wrap_fn(|req: ServiceRequest, srv| {
                if req.path() == "/hello" {
                    panic!("refused before dispatch");
                }
                srv.call(req)
            })
            .wrap(instrumented(&recorder, MiddlewareConfig::default()))
            .route("/hello", web::get().to(hello)),
    )
    .await;

    let req = test::TestRequest::get().uri("/hello").to_request();
    let outcome = AssertUnwindSafe(test::call_service(&app, req))
        .catch_unwind()
        .await;
    assert!(outcome.is_err(), "the panic must keep propagating");

    let transaction = only_transaction(&recorder);
    assert_eq!(transaction.name, "GET /hello");
    assert_eq!(transaction.errors.len(), 1);
    assert_eq!(transaction.errors[0].class, "panic");
    assert_eq!(transaction.errors[0].message, "refused before dispatch");
    assert_eq!(transaction.status(), Some(500));
}

#[actix_web::test]
async fn test_cancelled_request_is_finalized() {
    let recorder = recorder();
    let app = test::init_service(
        App::new()
            .wrap(instrumented(&recorder, MiddlewareConfig::default()))
            .route(
                "/slow",
                web::get().to(|| async {
                    std::future::pending::<()>().await;
                    HttpResponse::Ok().finish()
                }),
            ),
    )
    .await;

    let req = test::TestRequest::get().uri("/slow").to_request();
    let pending = app.call(req);
    let timed_out = tokio::time::timeout(std::time::Duration::from_millis(20), pending).await;
    assert!(timed_out.is_err());

    let transaction = only_transaction(&recorder);
    assert_eq!(transaction.name, "GET /slow");
    assert!(transaction.status().is_none());
}

#[actix_web::test]
async fn test_every_request_finalized_once() {
    let recorder = recorder();
    let app = test::init_service(
        App::new()
            .wrap(instrumented(&recorder, MiddlewareConfig::default()))
            .route("/hello", web::get().to(hello))
            .route("/oops", web::get().to(|| async { Err::<HttpResponse, _>(Oops) })),
    )
    .await;

    for uri in ["/hello", "/oops", "/missing", "/hello"] {
        let req = test::TestRequest::get().uri(uri).to_request();
        test::call_service(&app, req).await;
    }
    let req = test::TestRequest::delete().uri("/hello").to_request();
    test::call_service(&app, req).await;

    let names: Vec<String> = recorder.harvest().into_iter().map(|t| t.name).collect();
    assert_eq!(
        names,
        vec![
            "GET /hello",
            "GET /oops",
            "NotFoundHandler",
            "GET /hello",
            "MethodNotAllowedHandler"
        ]
    );
}

#[actix_web::test]
async fn test_request_id_is_recorded() {
    let recorder = recorder();
    let app = test::init_service(
        App::new()
            .wrap(instrumented(&recorder, MiddlewareConfig::default()))
            .wrap(TracingLogger::<TransactionRootSpanBuilder>::new())
            .route("/hello", web::get().to(hello)),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/hello")
        .insert_header(("x-request-id", "7b6f1c1e"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let transaction = only_transaction(&recorder);
    assert_eq!(agent_attribute(&transaction, "request.id").as_deref(), Some("7b6f1c1e"));
}

#[actix_web::test]
async fn test_prometheus_exposes_transactions() {
    let recorder = recorder();
    let app = test::init_service(
        App::new()
            .wrap(instrumented(&recorder, MiddlewareConfig::default()))
            .wrap(init_prometheus_metrics())
            .route("/hello", web::get().to(hello)),
    )
    .await;

    let req = test::TestRequest::get().uri("/hello").to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let body = test::call_and_read_body(&app, req).await;
    let body = String::from_utf8(body.to_vec()).unwrap();
    assert!(body.contains("transaction_duration_seconds"));
    assert!(body.contains("transaction=\"GET /hello\""));
}

#[::core::prelude::v1::test]
fn test_setup_tracing_installs_once() {
    let config = LoggerConfig {
        service_name: String::from("tests"),
        ..LoggerConfig::default()
    };
    let guard = setup_tracing(config.clone());
    assert!(guard.is_ok());
    assert!(matches!(setup_tracing(config), Err(LoggerError::LogTracer(_))));
}
