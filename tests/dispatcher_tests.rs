#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::capture::LogCapture;
use common::engines::{self, ok};
use http::StatusCode;
use neurite::error::codes;
use neurite::middleware::from_fn;
use neurite::server::Request;
use neurite::{CancelToken, Context, HandlerResult, HttpError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

#[test]
fn test_middleware_runs_in_onion_order() {
    let order = Arc::new(Mutex::new(Vec::<&'static str>::new()));
    let mut engine = engines::inline();

    let (a, b, h) = (Arc::clone(&order), Arc::clone(&order), Arc::clone(&order));
    engine
        .router()
        .use_middleware(from_fn("a", move |ctx: &mut Context, next| {
            a.lock().unwrap().push("A-before");
            let res = next.run(ctx);
            a.lock().unwrap().push("A-after");
            res
        }))
        .use_middleware(from_fn("b", move |ctx: &mut Context, next| {
            b.lock().unwrap().push("B-before");
            let res = next.run(ctx);
            b.lock().unwrap().push("B-after");
            res
        }));
    engine
        .router()
        .get("/order", move |ctx: &mut Context| -> HandlerResult {
            h.lock().unwrap().push("H");
            ctx.no_content(StatusCode::NO_CONTENT)
        })
        .unwrap();

    let running = engine.start();
    assert_eq!(running.serve(Request::get("/order")).status(), StatusCode::NO_CONTENT);
    assert_eq!(
        *order.lock().unwrap(),
        vec!["A-before", "B-before", "H", "B-after", "A-after"]
    );
}

#[test]
fn test_panic_yields_one_500_and_engine_keeps_serving() {
    let mut engine = engines::inline();
    engine
        .router()
        .get("/boom", |_ctx: &mut Context| -> HandlerResult {
            panic!("handler exploded");
        })
        .unwrap();
    engine.router().get("/ok", ok).unwrap();
    let running = engine.start();

    let logs = LogCapture::default();
    let response = {
        let _guard = logs.install();
        running.serve(Request::get("/boom"))
    };
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        response.json_body().unwrap()["code"],
        codes::INTERNAL_SERVER_ERROR
    );
    let output = logs.contents();
    assert_eq!(output.matches("Handler panicked").count(), 1);
    assert!(output.contains("handler exploded"));
    assert!(output.contains("backtrace"));

    for _ in 0..10 {
        assert_eq!(running.serve(Request::get("/ok")).status(), StatusCode::OK);
    }
    let stats = running.stats();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.contexts_idle, 1);
}

#[test]
fn test_panic_in_middleware_is_recovered() {
    let mut engine = engines::inline();
    engine
        .router()
        .use_middleware(from_fn("faulty", |ctx: &mut Context, next| {
            if ctx.path() == "/bad" {
                panic!("middleware fault");
            }
            next.run(ctx)
        }));
    engine.router().get("/bad", ok).unwrap();
    engine.router().get("/good", ok).unwrap();
    let running = engine.start();

    assert_eq!(
        running.serve(Request::get("/bad")).status(),
        StatusCode::INTERNAL_SERVER_ERROR
    );
    assert_eq!(running.serve(Request::get("/good")).text_body(), "ok");
}

#[test]
fn test_handler_error_maps_to_500() {
    let mut engine = engines::inline();
    engine
        .router()
        .get("/fail", |ctx: &mut Context| -> HandlerResult {
            ctx.text(StatusCode::OK, "partial")?;
            anyhow::bail!("database unavailable")
        })
        .unwrap();
    let running = engine.start();

    let response = running.serve(Request::get("/fail"));
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = response.json_body().unwrap();
    assert_eq!(body["code"], codes::INTERNAL_SERVER_ERROR);
    // Internal details stay in the logs.
    assert!(!response.text_body().contains("database"));
}

#[test]
fn test_http_error_chooses_status_and_body() {
    let mut engine = engines::inline();
    engine
        .router()
        .get("/users/:id", |ctx: &mut Context| -> HandlerResult {
            let id = ctx.param("id").unwrap_or_default().to_string();
            Err(HttpError::not_found(format!("user {id} does not exist")).into())
        })
        .unwrap();
    let running = engine.start();

    let response = running.serve(Request::get("/users/9"));
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        response.json_body().unwrap(),
        serde_json::json!({ "code": "NOT_FOUND", "message": "user 9 does not exist" })
    );
}

#[test]
fn test_unmatched_route_is_404_with_standard_body() {
    let running = engines::inline().start();
    let response = running.serve(Request::get("/nowhere"));
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = response.json_body().unwrap();
    assert_eq!(body["code"], codes::NOT_FOUND);
    assert_eq!(body["message"], "No route for GET /nowhere");
    assert!(response.header("x-request-id").is_some());
}

#[test]
fn test_context_store_and_params_never_leak() {
    let mut engine = engines::inline();
    engine
        .router()
        .get("/items/:id", |ctx: &mut Context| -> HandlerResult {
            assert_eq!(ctx.store_len(), 0, "store leaked from a prior request");
            ctx.set("secret", ctx.param("id").unwrap_or_default().to_string());
            ctx.text(StatusCode::OK, "item")
        })
        .unwrap();
    engine
        .router()
        .get("/plain", |ctx: &mut Context| -> HandlerResult {
            assert!(ctx.params().is_empty(), "params leaked from a prior request");
            assert!(!ctx.contains("secret"));
            ctx.text(StatusCode::OK, "plain")
        })
        .unwrap();
    let running = engine.start();

    for i in 0..50 {
        assert_eq!(running.serve(Request::get(&format!("/items/{i}"))).status(), StatusCode::OK);
        assert_eq!(running.serve(Request::get("/plain")).status(), StatusCode::OK);
    }
    let stats = running.stats();
    assert_eq!(stats.contexts_created, 1);
    assert_eq!(stats.contexts_reused, 99);
}

#[test]
fn test_concurrent_requests_get_exclusive_contexts() {
    let mut engine = engines::inline();
    engine
        .router()
        .get("/echo/:n", |ctx: &mut Context| -> HandlerResult {
            let n = ctx.param("n").unwrap_or_default().to_string();
            ctx.set("n", n.clone());
            std::thread::yield_now();
            let stored = ctx.get::<String>("n").cloned().unwrap_or_default();
            ctx.text(StatusCode::OK, &stored)
        })
        .unwrap();
    let running = engine.start();

    std::thread::scope(|scope| {
        for t in 0..8 {
            let running = &running;
            scope.spawn(move || {
                for i in 0..200 {
                    let n = format!("{t}-{i}");
                    let response = running.serve(Request::get(&format!("/echo/{n}")));
                    assert_eq!(response.text_body(), n);
                }
            });
        }
    });

    let stats = running.stats();
    assert!(stats.contexts_created <= 8);
    assert_eq!(stats.in_flight, 0);
}

#[test]
fn test_cancelled_transport_token_short_circuits() {
    let ran = Arc::new(AtomicUsize::new(0));
    let mut engine = engines::inline();
    let counter = Arc::clone(&ran);
    engine
        .router()
        .get("/work", move |ctx: &mut Context| -> HandlerResult {
            counter.fetch_add(1, Ordering::SeqCst);
            ctx.text(StatusCode::OK, "done")
        })
        .unwrap();
    let running = engine.start();

    let token = CancelToken::new();
    token.cancel();
    let response = running.serve(Request::get("/work").with_cancel(token));
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.json_body().unwrap()["code"], codes::REQUEST_CANCELLED);
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(running.stats().contexts_idle, 1);
}

#[test]
fn test_inline_deadline_stops_remaining_layers() {
    let ran = Arc::new(AtomicUsize::new(0));
    let mut config = engines::config(neurite::ExecutionMode::Inline, 1, 1);
    config.request_timeout_ms = 20;
    let mut engine = neurite::Engine::new(config).unwrap();
    engine
        .router()
        .use_middleware(from_fn("slow", |ctx: &mut Context, next| {
            std::thread::sleep(Duration::from_millis(60));
            next.run(ctx)
        }));
    let counter = Arc::clone(&ran);
    engine
        .router()
        .get("/slow", move |ctx: &mut Context| -> HandlerResult {
            counter.fetch_add(1, Ordering::SeqCst);
            ctx.text(StatusCode::OK, "late")
        })
        .unwrap();
    let running = engine.start();

    let response = running.serve(Request::get("/slow"));
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(response.json_body().unwrap()["code"], codes::REQUEST_TIMEOUT);
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[test]
fn test_pooled_panic_and_error_mapping() {
    let mut engine = engines::pooled(2, 8);
    engine
        .router()
        .get("/boom", |_ctx: &mut Context| -> HandlerResult {
            panic!("worker-side panic");
        })
        .unwrap();
    engine
        .router()
        .get("/teapot", |_ctx: &mut Context| -> HandlerResult {
            Err(HttpError::new(StatusCode::IM_A_TEAPOT, "TEAPOT", "short and stout").into())
        })
        .unwrap();
    engine.router().get("/ok", ok).unwrap();
    let running = engine.start();

    for _ in 0..3 {
        assert_eq!(
            running.serve(Request::get("/boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
    assert_eq!(running.serve(Request::get("/teapot")).status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(running.serve(Request::get("/ok")).text_body(), "ok");

    let workers = running.stats().workers.unwrap();
    assert_eq!(workers.workers, 2);
    assert_eq!(workers.active, 0);
}

#[test]
fn test_pooled_queue_full_answers_429() {
    let (started_tx, started_rx) = flume::unbounded::<()>();
    let (release_tx, release_rx) = flume::unbounded::<()>();

    let mut engine = engines::pooled(1, 1);
    engine
        .router()
        .get("/block", move |ctx: &mut Context| -> HandlerResult {
            let _ = started_tx.send(());
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
            ctx.text(StatusCode::OK, "released")
        })
        .unwrap();
    let running = engine.start();

    std::thread::scope(|scope| {
        let first = scope.spawn(|| running.serve(Request::get("/block")));
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let second = scope.spawn(|| running.serve(Request::get("/block")));
        assert!(wait_until(Duration::from_secs(5), || {
            running.stats().workers.is_some_and(|w| w.queued == 1)
        }));

        let rejected = running.serve(Request::get("/block"));
        assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(rejected.json_body().unwrap()["code"], codes::TOO_MANY_REQUESTS);

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        assert_eq!(first.join().unwrap().text_body(), "released");
        assert_eq!(second.join().unwrap().text_body(), "released");
    });

    let metrics = running.dispatcher().worker_pool().unwrap().metrics();
    assert_eq!(metrics.get_rejected_count(), 1);
    assert!(wait_until(Duration::from_secs(2), || metrics.get_completed_count() == 2));
}

#[test]
fn test_pooled_deadline_answers_504_and_handler_sees_cancellation() {
    let observed = Arc::new(AtomicUsize::new(0));
    let mut config = engines::config(neurite::ExecutionMode::Pooled, 1, 4);
    config.request_timeout_ms = 30;
    let mut engine = neurite::Engine::new(config).unwrap();
    let seen = Arc::clone(&observed);
    engine
        .router()
        .get("/slow", move |ctx: &mut Context| -> HandlerResult {
            std::thread::sleep(Duration::from_millis(100));
            if ctx.is_cancelled() {
                seen.fetch_add(1, Ordering::SeqCst);
            }
            ctx.text(StatusCode::OK, "too late")
        })
        .unwrap();
    let running = engine.start();

    let response = running.serve(Request::get("/slow"));
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

    // The worker finishes on its own and the context still goes back.
    assert!(wait_until(Duration::from_secs(2), || observed.load(Ordering::SeqCst) == 1));
    assert!(wait_until(Duration::from_secs(2), || running.stats().contexts_idle == 1));
}

#[test]
fn test_pooled_cancellation_releases_queued_request() {
    let (started_tx, started_rx) = flume::unbounded::<()>();
    let (release_tx, release_rx) = flume::unbounded::<()>();
    let fast_runs = Arc::new(AtomicUsize::new(0));

    let mut engine = engines::pooled(1, 4);
    engine
        .router()
        .get("/block", move |ctx: &mut Context| -> HandlerResult {
            let _ = started_tx.send(());
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
            ctx.text(StatusCode::OK, "released")
        })
        .unwrap();
    let counter = Arc::clone(&fast_runs);
    engine
        .router()
        .get("/fast", move |ctx: &mut Context| -> HandlerResult {
            counter.fetch_add(1, Ordering::SeqCst);
            ctx.text(StatusCode::OK, "fast")
        })
        .unwrap();
    let running = engine.start();

    std::thread::scope(|scope| {
        let blocker = scope.spawn(|| running.serve(Request::get("/block")));
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let token = CancelToken::new();
        let canceller = {
            let token = token.clone();
            scope.spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                token.cancel();
            })
        };

        let began = Instant::now();
        let response = running.serve(Request::get("/fast").with_cancel(token));
        assert!(began.elapsed() < Duration::from_secs(2), "{:?}", began.elapsed());
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.json_body().unwrap()["code"], codes::REQUEST_CANCELLED);
        canceller.join().unwrap();

        // The blocker still holds one context; the cancelled one is back.
        assert_eq!(running.stats().contexts_idle, 1);

        release_tx.send(()).unwrap();
        assert_eq!(blocker.join().unwrap().text_body(), "released");
    });

    let metrics = running.dispatcher().worker_pool().unwrap().metrics();
    assert!(wait_until(Duration::from_secs(2), || metrics.get_completed_count() == 2));
    assert_eq!(fast_runs.load(Ordering::SeqCst), 0);
    assert_eq!(running.stats().contexts_idle, 2);
    assert_eq!(running.stats().in_flight, 0);
}
