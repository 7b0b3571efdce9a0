//! Routing behaviour across the public API

use message_router::test_utils::{CollectorHandler, FailingHandler};
use message_router::{
    handler_fn, Endpoint, EndpointRegistry, HandlerError, Message, MessageRouter, Route,
    RouteOptions, RouteOutcome, RouteTable, RouterConfig, RoutingError,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn shared_router(config: RouterConfig) -> (MessageRouter, Arc<RouteTable>, Arc<EndpointRegistry>) {
    let routes = Arc::new(RouteTable::new());
    let endpoints = Arc::new(EndpointRegistry::new());
    let router = MessageRouter::new(config, routes.clone(), endpoints.clone());
    (router, routes, endpoints)
}

#[test]
fn test_route_keys_are_unique() {
    let (router, routes, _) = shared_router(RouterConfig::default());

    router
        .register_route(Route::new("core", "task.created", "first"))
        .unwrap();
    let duplicate = router.register_route(Route::new("core", "task.created", "second"));

    assert!(matches!(duplicate, Err(RoutingError::DuplicateRoute { .. })));
    assert_eq!(routes.len(), 1);
    assert_eq!(
        routes.lookup("core", "task.created").unwrap().target_endpoint_id,
        "first"
    );

    // Same type on another channel is a different key
    router
        .register_route(Route::new("ops", "task.created", "second"))
        .unwrap();
    assert_eq!(routes.len(), 2);
}

#[tokio::test]
async fn test_fallback_to_default_channel() {
    let (router, _, endpoints) =
        shared_router(RouterConfig::default().with_default_channel("A").with_fallback(true));
    let handler = CollectorHandler::new();
    endpoints
        .register(Endpoint::new("a-endpoint", "A", handler.clone()))
        .unwrap();
    router
        .register_route(Route::new("A", "x", "a-endpoint"))
        .unwrap();

    let outcome = router
        .route_packet(&Message::new("x", json!({})), RouteOptions::on_channel("B"))
        .await
        .unwrap();

    let delivery = outcome.delivery().expect("delivered via fallback");
    assert_eq!(delivery.channel, "A");
    assert!(delivery.via_fallback);
    assert_eq!(handler.message_count(), 1);
    assert_eq!(router.metrics().count("A", "x"), 1);
    assert_eq!(router.metrics().count("B", "x"), 0);
}

#[tokio::test]
async fn test_strict_and_lenient_report_same_failure() {
    let routes = Arc::new(RouteTable::new());
    let endpoints = Arc::new(EndpointRegistry::new());
    let lenient = MessageRouter::new(
        RouterConfig::default().with_default_channel("core"),
        routes.clone(),
        endpoints.clone(),
    );
    let strict = MessageRouter::new(
        RouterConfig::default().with_default_channel("core").strict(),
        routes,
        endpoints,
    );
    let msg = Message::new("unknown.type", Value::Null);

    let lenient_outcome = lenient
        .route_packet(&msg, RouteOptions::default())
        .await
        .expect("lenient routing never errors");
    let strict_error = strict
        .route_packet(&msg, RouteOptions::default())
        .await
        .expect_err("strict routing surfaces failures");

    match lenient_outcome {
        RouteOutcome::Failed(error) => assert_eq!(error, strict_error),
        RouteOutcome::Delivered(_) => panic!("unexpected delivery"),
    }
    assert_eq!(strict_error.kind(), "route not found");
}

#[tokio::test]
async fn test_usage_counted_when_handler_fails() {
    let (router, _, endpoints) =
        shared_router(RouterConfig::default().with_default_channel("core"));
    endpoints
        .register(Endpoint::new("broken", "core", FailingHandler::new("nope")))
        .unwrap();
    router
        .register_route(Route::new("core", "job", "broken"))
        .unwrap();

    for _ in 0..3 {
        let outcome = router
            .route_packet(&Message::new("job", Value::Null), RouteOptions::default())
            .await
            .unwrap();
        assert!(!outcome.is_ok());
    }

    let usage = router.metrics().snapshot();
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].count, 3);
}

#[tokio::test]
async fn test_closure_handler_reply_is_returned() {
    let (router, _, endpoints) =
        shared_router(RouterConfig::default().with_default_channel("core"));
    endpoints
        .register(Endpoint::new(
            "echo",
            "core",
            handler_fn(|message: &Message| {
                if message.payload().is_null() {
                    return Err(HandlerError::new("empty payload"));
                }
                Ok(json!({ "echo": message.payload().clone() }))
            }),
        ))
        .unwrap();
    router
        .register_route(Route::new("core", "echo", "echo"))
        .unwrap();

    let outcome = router
        .route_packet(&Message::new("echo", json!("hi")), RouteOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.delivery().unwrap().reply, json!({ "echo": "hi" }));

    let outcome = router
        .route_packet(&Message::new("echo", Value::Null), RouteOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.reason().as_deref(), Some("handler failed at echo: empty payload"));
}
