//! Retry executor behavior under paused time.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use resilient_fetch::config::ConnectionConfig;
use resilient_fetch::connection::{ConnectionMonitor, ManualNetwork};
use resilient_fetch::http::{HttpRequest, HttpResponse, RequestError};
use resilient_fetch::resilience::{RetryDecision, RetryExecutor, RetryPolicy};

mod common;

fn policy(max_retries: u32, base_ms: u64) -> RetryPolicy {
    RetryPolicy::default()
        .with_max_retries(max_retries)
        .with_delays(Duration::from_millis(base_ms), Duration::from_secs(10))
}

fn status_error(status: u16, retry_after: Option<Duration>) -> RequestError {
    RequestError::Status {
        status,
        url: "http://api/orders".into(),
        retry_after,
        body: String::new(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_first_try_success_has_no_delay() {
    let executor = RetryExecutor::new(policy(3, 100));
    let calls = Arc::new(AtomicU32::new(0));
    let started = Instant::now();

    let c = calls.clone();
    let result: Result<&str, RequestError> = executor
        .execute(|| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok("done")
            }
        })
        .await;

    assert_eq!(result.unwrap(), "done");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_client_error_is_not_retried() {
    let executor = RetryExecutor::new(policy(3, 100));
    let calls = Arc::new(AtomicU32::new(0));

    let c = calls.clone();
    let result: Result<(), RequestError> = executor
        .execute(|| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(status_error(404, None))
            }
        })
        .await;

    assert_eq!(result.unwrap_err().status(), Some(404));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_network_errors_back_off_exponentially() {
    let delays = Arc::new(Mutex::new(Vec::new()));
    let d = delays.clone();
    let executor =
        RetryExecutor::new(policy(3, 100)).on_retry(move |_, delay| d.lock().unwrap().push(delay));
    let calls = Arc::new(AtomicU32::new(0));
    let started = Instant::now();

    let c = calls.clone();
    let result: Result<(), RequestError> = executor
        .execute(|| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(RequestError::Network("connection reset".into()))
            }
        })
        .await;

    assert_eq!(
        result.unwrap_err(),
        RequestError::Network("connection reset".into())
    );
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(
        *delays.lock().unwrap(),
        vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400)
        ]
    );
    assert!(started.elapsed() >= Duration::from_millis(700));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_waits_for_retry_after() {
    let executor = RetryExecutor::new(policy(3, 100));
    let calls = Arc::new(AtomicU32::new(0));
    let started = Instant::now();

    let c = calls.clone();
    let result: Result<u16, RequestError> = executor
        .execute(|| {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(status_error(429, Some(Duration::from_secs(2))))
                } else {
                    Ok(200)
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), 200);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_millis(2100));
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_is_capped() {
    let mut p = policy(1, 100);
    p.max_retry_after = Duration::from_secs(5);
    let executor = RetryExecutor::new(p);
    let started = Instant::now();

    let mut first = true;
    let result: Result<(), RequestError> = executor
        .execute(|| {
            let fail = std::mem::replace(&mut first, false);
            async move {
                if fail {
                    Err(status_error(429, Some(Duration::from_secs(3600))))
                } else {
                    Ok(())
                }
            }
        })
        .await;

    assert!(result.is_ok());
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed < Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn test_server_errors_use_lower_ceiling() {
    let executor = RetryExecutor::new(policy(5, 10).with_max_server_retries(2));
    let calls = Arc::new(AtomicU32::new(0));

    let c = calls.clone();
    let result: Result<(), RequestError> = executor
        .execute(|| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(status_error(503, None))
            }
        })
        .await;

    assert_eq!(result.unwrap_err().status(), Some(503));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_offline_failure_surfaces_immediately() {
    let monitor = Arc::new(ConnectionMonitor::new(
        Arc::new(ManualNetwork::new(false)),
        &ConnectionConfig::default(),
    ));
    monitor.refresh();
    let executor = RetryExecutor::new(policy(3, 100)).with_monitor(monitor);
    let calls = Arc::new(AtomicU32::new(0));
    let started = Instant::now();

    let c = calls.clone();
    let result: Result<(), RequestError> = executor
        .execute(|| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(RequestError::Timeout)
            }
        })
        .await;

    assert_eq!(result.unwrap_err(), RequestError::Timeout);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_custom_classifier() {
    let executor = RetryExecutor::new(policy(3, 100));
    let calls = Arc::new(AtomicU32::new(0));
    let started = Instant::now();

    let c = calls.clone();
    let result: Result<(), String> = executor
        .execute_with(
            || {
                let c = c.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    Err(if n == 0 { "busy".to_string() } else { "fatal".to_string() })
                }
            },
            |err: &String| match err.as_str() {
                "busy" => RetryDecision::RetryAfter(Duration::from_millis(50)),
                _ => RetryDecision::Abort,
            },
        )
        .await;

    assert_eq!(result.unwrap_err(), "fatal");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_fetch_turns_statuses_into_errors() {
    let sender = common::ScriptedSender::new(vec![
        Ok(HttpResponse::new(502)),
        Ok(HttpResponse::new(201)),
    ]);
    let executor = RetryExecutor::new(policy(3, 100));

    let response = executor
        .fetch(&sender, &HttpRequest::post("http://api/orders"))
        .await
        .unwrap();

    assert_eq!(response.status, 201);
    assert_eq!(sender.sent().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_policy_swap_applies_to_next_invocation() {
    let executor = RetryExecutor::new(policy(3, 100));
    executor.set_policy(policy(0, 100));
    let calls = Arc::new(AtomicU32::new(0));

    let c = calls.clone();
    let result: Result<(), RequestError> = executor
        .execute(|| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(RequestError::Network("down".into()))
            }
        })
        .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(executor.policy().max_retries, 0);
}
