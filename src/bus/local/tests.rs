use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Notify;

use super::*;
use crate::bus::HandlerFn;
use crate::error::HandlerError;
use crate::policies::BackoffPolicy;

fn fast_config() -> BusConfig {
    BusConfig {
        retry: BackoffPolicy::constant(Duration::from_millis(5)),
        grace: Duration::from_secs(1),
        ..BusConfig::default()
    }
}

async fn started(cfg: BusConfig) -> LocalBus {
    let bus = LocalBus::new(cfg);
    bus.start().await.unwrap();
    bus
}

fn recorder(name: &'static str, seen: Arc<Mutex<Vec<Value>>>) -> HandlerRef {
    HandlerFn::arc(name, move |env: Arc<Envelope>| {
        let seen = Arc::clone(&seen);
        async move {
            seen.lock().push(env.payload().clone());
            Ok::<_, HandlerError>(())
        }
    })
}

fn counter(name: &'static str, hits: Arc<AtomicUsize>) -> HandlerRef {
    HandlerFn::arc(name, move |_env: Arc<Envelope>| {
        let hits = Arc::clone(&hits);
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok::<_, HandlerError>(())
        }
    })
}

/// Handler that parks on the envelope with payload `{"n": 0}` until released,
/// and records every `n` it sees.
fn gated(seen: Arc<Mutex<Vec<u64>>>, entered: Arc<Notify>, release: Arc<Notify>) -> HandlerRef {
    HandlerFn::arc("gated", move |env: Arc<Envelope>| {
        let seen = Arc::clone(&seen);
        let entered = Arc::clone(&entered);
        let release = Arc::clone(&release);
        async move {
            let n = env.payload()["n"].as_u64().unwrap_or(u64::MAX);
            if n == 0 {
                entered.notify_one();
                release.notified().await;
            }
            seen.lock().push(n);
            Ok::<_, HandlerError>(())
        }
    })
}

async fn command(bus: &LocalBus, topic: &str, n: u64, priority: u8) {
    bus.publish(
        topic,
        json!({ "n": n }),
        PublishOptions::command().with_priority(priority),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_lower_priority_value_is_delivered_first() {
    let bus = started(fast_config()).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (entered, release) = (Arc::new(Notify::new()), Arc::new(Notify::new()));
    bus.subscribe("TTS.Request", gated(seen.clone(), entered.clone(), release.clone()))
        .await
        .unwrap();

    command(&bus, "TTS.Request", 0, 0).await;
    entered.notified().await;

    command(&bus, "TTS.Request", 1, 50).await;
    command(&bus, "TTS.Request", 2, 30).await;
    command(&bus, "TTS.Request", 3, 10).await;
    command(&bus, "TTS.Request", 4, 90).await;
    release.notify_one();

    assert!(bus.wait_idle(Duration::from_secs(2)).await);
    assert_eq!(*seen.lock(), vec![0, 3, 2, 1, 4]);
}

#[tokio::test]
async fn test_equal_priority_keeps_publish_order() {
    let bus = started(fast_config()).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (entered, release) = (Arc::new(Notify::new()), Arc::new(Notify::new()));
    bus.subscribe("TTS.Request", gated(seen.clone(), entered.clone(), release.clone()))
        .await
        .unwrap();

    command(&bus, "TTS.Request", 0, 10).await;
    entered.notified().await;
    for n in 1..=6 {
        command(&bus, "TTS.Request", n, 10).await;
    }
    release.notify_one();

    assert!(bus.wait_idle(Duration::from_secs(2)).await);
    assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4, 5, 6]);
}

#[tokio::test]
async fn test_failing_command_is_retried_then_dead_lettered() {
    let bus = started(fast_config()).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    bus.subscribe(
        "TTS.Request",
        HandlerFn::arc("tts", move |_env: Arc<Envelope>| {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(HandlerError::fail("engine busy"))
            }
        }),
    )
    .await
    .unwrap();

    let id = bus
        .publish(
            "TTS.Request",
            json!({"text": "hi"}),
            PublishOptions::command().with_max_attempts(3),
        )
        .await
        .unwrap();

    assert!(bus.wait_idle(Duration::from_secs(2)).await);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let stats = bus.stats();
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.failed, 3);
    assert_eq!(stats.dead_lettered, 1);

    let dead = bus.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].envelope.id(), id);
    assert_eq!(dead[0].envelope.attempts(), 3);
    assert_eq!(dead[0].envelope.max_attempts(), 3);
    assert_eq!(dead[0].handler, "tts");
}

#[tokio::test]
async fn test_fatal_error_skips_remaining_attempts() {
    let bus = started(fast_config()).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    bus.subscribe(
        "DB.Write",
        HandlerFn::arc("db", move |_env: Arc<Envelope>| {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(HandlerError::fatal("schema mismatch"))
            }
        }),
    )
    .await
    .unwrap();

    bus.publish("DB.Write", json!({}), PublishOptions::command().with_max_attempts(5))
        .await
        .unwrap();

    assert!(bus.wait_idle(Duration::from_secs(2)).await);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(bus.stats().retried, 0);
    assert_eq!(bus.take_dead_letters().len(), 1);
    assert!(bus.dead_letters().is_empty());
}

#[tokio::test]
async fn test_failing_events_are_not_retried() {
    let bus = started(fast_config()).await;
    bus.subscribe(
        "UI.Render",
        HandlerFn::arc("ui", |_env: Arc<Envelope>| async {
            Err::<(), _>(HandlerError::fail("no window"))
        }),
    )
    .await
    .unwrap();

    bus.publish("UI.Render", json!(null), PublishOptions::event())
        .await
        .unwrap();

    assert!(bus.wait_idle(Duration::from_secs(1)).await);
    let stats = bus.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.retried, 0);
    assert_eq!(stats.dead_lettered, 0);
}

#[tokio::test]
async fn test_query_without_responder_fails_fast() {
    let bus = started(fast_config()).await;

    let started_at = Instant::now();
    let res = bus
        .request("DB.Get", json!({"id": 1}), RequestOptions::new(Duration::from_secs(5)))
        .await
        .unwrap();

    assert!(!res.ok);
    assert_eq!(res.error, Some(QueryFailure::NoResponder));
    assert!(started_at.elapsed() < Duration::from_millis(500));
    assert_eq!(bus.subscription_count(), 0);
}

#[tokio::test]
async fn test_query_fails_fast_when_responder_queue_is_full() {
    let bus = started(BusConfig {
        queue_capacity: 1,
        ..fast_config()
    })
    .await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (entered, release) = (Arc::new(Notify::new()), Arc::new(Notify::new()));
    bus.subscribe("DB.Get", gated(seen.clone(), entered.clone(), release.clone()))
        .await
        .unwrap();

    command(&bus, "DB.Get", 0, 10).await;
    entered.notified().await;
    command(&bus, "DB.Get", 1, 10).await;

    let started_at = Instant::now();
    let res = bus
        .request("DB.Get", json!({"n": 2}), RequestOptions::new(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(res.error, Some(QueryFailure::NoResponder));
    assert!(started_at.elapsed() < Duration::from_millis(500));

    release.notify_one();
    assert!(bus.wait_idle(Duration::from_secs(1)).await);
    assert_eq!(*seen.lock(), vec![0, 1]);
    assert_eq!(bus.dead_letters()[0].reason, "queue_full");
}

#[tokio::test]
async fn test_query_round_trip_returns_exact_payload() {
    let bus = started(fast_config()).await;
    let responder = bus.clone();
    bus.subscribe(
        "DB.GetMessages",
        HandlerFn::arc("db", move |q: Arc<Envelope>| {
            let bus = responder.clone();
            async move {
                let limit = q.payload()["limit"].as_u64().unwrap_or(0);
                bus.reply(&q, json!({ "messages": ["a", "b"], "limit": limit }))
                    .await
                    .map_err(|e| HandlerError::fail(e.to_string()))?;
                Ok::<_, HandlerError>(())
            }
        }),
    )
    .await
    .unwrap();

    let res = bus
        .request(
            "DB.GetMessages",
            json!({ "limit": 2 }),
            RequestOptions::new(Duration::from_secs(1)),
        )
        .await
        .unwrap();

    assert!(res.ok);
    assert_eq!(res.data, Some(json!({ "messages": ["a", "b"], "limit": 2 })));
    assert_eq!(bus.subscription_count(), 1, "reply subscription removed");
}

#[tokio::test]
async fn test_reply_carries_the_query_correlation_id() {
    let bus = started(fast_config()).await;
    let responder = bus.clone();
    let seen_query = Arc::new(Mutex::new(None));
    let sq = Arc::clone(&seen_query);
    bus.subscribe(
        "Sched.Next",
        HandlerFn::arc("sched", move |q: Arc<Envelope>| {
            let bus = responder.clone();
            let sq = Arc::clone(&sq);
            async move {
                *sq.lock() = Some((q.id().to_string(), q.correlation_id().map(str::to_owned)));
                bus.reply(&q, json!(1))
                    .await
                    .map_err(|e| HandlerError::fail(e.to_string()))?;
                Ok::<_, HandlerError>(())
            }
        }),
    )
    .await
    .unwrap();

    let res = bus
        .request("Sched.Next", json!(null), RequestOptions::default())
        .await
        .unwrap();
    assert!(res.ok);

    let (id, correlation) = seen_query.lock().clone().unwrap();
    assert_eq!(correlation, Some(id));
}

#[tokio::test]
async fn test_request_times_out_at_its_own_timeout() {
    let bus = started(fast_config()).await;
    let responder = bus.clone();
    bus.subscribe(
        "DB.Get",
        HandlerFn::arc("slow-db", move |q: Arc<Envelope>| {
            let bus = responder.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let _ = bus.reply(&q, json!("late")).await;
                Ok::<_, HandlerError>(())
            }
        }),
    )
    .await
    .unwrap();

    let started_at = Instant::now();
    let res = bus
        .request("DB.Get", json!({}), RequestOptions::new(Duration::from_millis(100)))
        .await
        .unwrap();
    let elapsed = started_at.elapsed();

    assert!(!res.ok);
    assert_eq!(res.error, Some(QueryFailure::Timeout));
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(600), "took {elapsed:?}");
    assert_eq!(bus.subscription_count(), 1, "reply subscription removed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_one_failing_subscriber_does_not_affect_another() {
    let bus = started(fast_config()).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    bus.subscribe(
        "STT.TranscriptionDetected",
        HandlerFn::arc("broken", |_env: Arc<Envelope>| async {
            Err::<(), _>(HandlerError::fail("crash"))
        }),
    )
    .await
    .unwrap();
    bus.subscribe("STT.TranscriptionDetected", recorder("ui", seen.clone()))
        .await
        .unwrap();

    bus.publish(
        "STT.TranscriptionDetected",
        json!({"text": "hello"}),
        PublishOptions::event(),
    )
    .await
    .unwrap();

    assert!(bus.wait_idle(Duration::from_secs(1)).await);
    assert_eq!(*seen.lock(), vec![json!({"text": "hello"})]);
    assert_eq!(bus.stats().delivered, 1);
    assert_eq!(bus.stats().failed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_subscriber_does_not_delay_fast_one() {
    let bus = started(fast_config()).await;
    let fast_done = Arc::new(Notify::new());
    let fd = Arc::clone(&fast_done);
    bus.subscribe(
        "LLM.Prompt",
        HandlerFn::arc("llm", |_env: Arc<Envelope>| async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok::<_, HandlerError>(())
        }),
    )
    .await
    .unwrap();
    bus.subscribe(
        "LLM.Prompt",
        HandlerFn::arc("ui", move |_env: Arc<Envelope>| {
            let fd = Arc::clone(&fd);
            async move {
                fd.notify_one();
                Ok::<_, HandlerError>(())
            }
        }),
    )
    .await
    .unwrap();

    bus.publish("LLM.Prompt", json!("hi"), PublishOptions::event())
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_millis(500), fast_done.notified())
        .await
        .expect("fast subscriber waited on the slow one");
}

#[tokio::test]
async fn test_retry_only_reruns_the_failing_subscriber() {
    let bus = started(fast_config()).await;
    let ok_hits = Arc::new(AtomicUsize::new(0));
    let flaky_hits = Arc::new(AtomicUsize::new(0));
    let f = Arc::clone(&flaky_hits);

    bus.subscribe("TTS.Request", counter("audit", ok_hits.clone()))
        .await
        .unwrap();
    bus.subscribe(
        "TTS.Request",
        HandlerFn::arc("tts", move |_env: Arc<Envelope>| {
            let f = Arc::clone(&f);
            async move {
                if f.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(HandlerError::fail("warming up"));
                }
                Ok(())
            }
        }),
    )
    .await
    .unwrap();

    bus.publish("TTS.Request", json!({"text": "hi"}), PublishOptions::command())
        .await
        .unwrap();

    assert!(bus.wait_idle(Duration::from_secs(2)).await);
    assert_eq!(ok_hits.load(Ordering::SeqCst), 1);
    assert_eq!(flaky_hits.load(Ordering::SeqCst), 2);
    assert_eq!(bus.stats().retried, 1);
    assert!(bus.dead_letters().is_empty());
}

#[tokio::test]
async fn test_unsubscribe_stops_further_deliveries() {
    let bus = started(fast_config()).await;
    let hits = Arc::new(AtomicUsize::new(0));
    let id = bus
        .subscribe("TTS.Started", counter("ui", hits.clone()))
        .await
        .unwrap();

    bus.publish("TTS.Started", json!(1), PublishOptions::event())
        .await
        .unwrap();
    assert!(bus.wait_idle(Duration::from_secs(1)).await);

    assert!(bus.unsubscribe(id).await);
    assert!(!bus.unsubscribe(id).await);
    for n in 0..10 {
        bus.publish("TTS.Started", json!(n), PublishOptions::event())
            .await
            .unwrap();
    }
    assert!(bus.wait_idle(Duration::from_secs(1)).await);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unsubscribe_race_allows_only_the_running_delivery() {
    let bus = started(fast_config()).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (entered, release) = (Arc::new(Notify::new()), Arc::new(Notify::new()));
    let id = bus
        .subscribe("TTS.Request", gated(seen.clone(), entered.clone(), release.clone()))
        .await
        .unwrap();

    command(&bus, "TTS.Request", 0, 10).await;
    entered.notified().await;
    command(&bus, "TTS.Request", 1, 10).await;
    command(&bus, "TTS.Request", 2, 10).await;

    assert!(bus.unsubscribe(id).await);
    release.notify_one();

    assert!(bus.wait_idle(Duration::from_secs(1)).await);
    assert_eq!(*seen.lock(), vec![0]);
    assert_eq!(bus.stats().dropped, 2);
}

#[tokio::test]
async fn test_command_without_subscriber_is_not_a_failure() {
    let bus = started(fast_config()).await;
    let before = bus.stats().dead_lettered;

    bus.publish(
        "TTS.Request",
        json!({"text": "hi"}),
        PublishOptions::command().with_priority(10),
    )
    .await
    .unwrap();

    assert!(bus.wait_idle(Duration::from_secs(1)).await);
    assert_eq!(bus.stats().dead_lettered - before, 0);
    assert_eq!(bus.stats().published, 1);
    assert!(bus.dead_letters().is_empty());
}

#[tokio::test]
async fn test_single_level_wildcard_receives_each_topic() {
    let bus = started(fast_config()).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    bus.subscribe("TTS.*", recorder("tts-watch", seen.clone()))
        .await
        .unwrap();

    bus.publish("TTS.Started", json!("started"), PublishOptions::event())
        .await
        .unwrap();
    bus.publish("TTS.Stopped", json!("stopped"), PublishOptions::event())
        .await
        .unwrap();
    bus.publish("TTS.Sub.Started", json!("nested"), PublishOptions::event())
        .await
        .unwrap();

    assert!(bus.wait_idle(Duration::from_secs(1)).await);
    assert_eq!(*seen.lock(), vec![json!("started"), json!("stopped")]);
}

#[tokio::test]
async fn test_malformed_pattern_is_rejected_synchronously() {
    let bus = LocalBus::new(fast_config());
    let hits = Arc::new(AtomicUsize::new(0));
    let err = bus.subscribe("TTS..Started", counter("x", hits)).await.unwrap_err();
    assert_eq!(err.as_label(), "message_invalid_topic");
}

#[tokio::test]
async fn test_expired_envelopes_are_counted_not_delivered() {
    let bus = started(fast_config()).await;
    let hits = Arc::new(AtomicUsize::new(0));
    bus.subscribe("Audio.Chunk", counter("stt", hits.clone()))
        .await
        .unwrap();

    bus.publish(
        "Audio.Chunk",
        json!(null),
        PublishOptions::event().with_deadline(Duration::ZERO),
    )
    .await
    .unwrap();

    assert!(bus.wait_idle(Duration::from_secs(1)).await);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(bus.stats().expired, 1);
}

#[tokio::test]
async fn test_full_queue_drops_events_and_dead_letters_commands() {
    let bus = started(BusConfig {
        queue_capacity: 1,
        ..fast_config()
    })
    .await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (entered, release) = (Arc::new(Notify::new()), Arc::new(Notify::new()));
    bus.subscribe("TTS.Request", gated(seen.clone(), entered.clone(), release.clone()))
        .await
        .unwrap();

    command(&bus, "TTS.Request", 0, 10).await;
    entered.notified().await;
    command(&bus, "TTS.Request", 1, 10).await;
    command(&bus, "TTS.Request", 2, 10).await;
    bus.publish("TTS.Request", json!({"n": 3}), PublishOptions::event())
        .await
        .unwrap();
    release.notify_one();

    assert!(bus.wait_idle(Duration::from_secs(1)).await);
    assert_eq!(*seen.lock(), vec![0, 1]);
    let dead = bus.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].reason, "queue_full");
    assert_eq!(bus.stats().dropped, 1);
}

#[tokio::test]
async fn test_start_twice_fails_and_publish_needs_a_running_bus() {
    let bus = LocalBus::new(fast_config());
    let err = bus
        .publish("TTS.Started", json!(null), PublishOptions::event())
        .await
        .unwrap_err();
    assert_eq!(err, BusError::NotStarted);

    bus.start().await.unwrap();
    assert_eq!(bus.start().await.unwrap_err(), BusError::AlreadyStarted);

    bus.stop().await;
    bus.stop().await;
    assert!(!bus.is_running());
    bus.start().await.unwrap();
    assert!(bus.is_running());
}

#[tokio::test]
async fn test_stats_reset_on_restart() {
    let bus = started(fast_config()).await;
    bus.publish("TTS.Started", json!(null), PublishOptions::event())
        .await
        .unwrap();
    assert_eq!(bus.stats().published, 1);

    bus.stop().await;
    bus.start().await.unwrap();
    assert_eq!(bus.stats(), BusStats::default());

    bus.publish("TTS.Started", json!(null), PublishOptions::event())
        .await
        .unwrap();
    assert_eq!(bus.stats().published, 1);
    bus.stop().await;
}

#[tokio::test]
async fn test_stop_drains_in_flight_deliveries() {
    let bus = started(fast_config()).await;
    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    bus.subscribe(
        "DB.Write",
        HandlerFn::arc("db", move |_env: Arc<Envelope>| {
            let h = Arc::clone(&h);
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                h.fetch_add(1, Ordering::SeqCst);
                Ok::<_, HandlerError>(())
            }
        }),
    )
    .await
    .unwrap();

    for n in 0..3 {
        command(&bus, "DB.Write", n, 10).await;
    }
    bus.stop().await;

    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert_eq!(bus.in_flight(), 0);
}

#[tokio::test]
async fn test_stop_cancels_deliveries_after_grace() {
    let bus = started(BusConfig {
        grace: Duration::from_millis(50),
        ..fast_config()
    })
    .await;
    bus.subscribe(
        "LLM.Prompt",
        HandlerFn::arc("llm", |_env: Arc<Envelope>| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, HandlerError>(())
        }),
    )
    .await
    .unwrap();
    command(&bus, "LLM.Prompt", 1, 10).await;
    command(&bus, "LLM.Prompt", 2, 10).await;

    let started_at = Instant::now();
    bus.stop().await;
    assert!(started_at.elapsed() < Duration::from_secs(2));
    assert_eq!(bus.stats().dropped, 2);
    assert_eq!(bus.in_flight(), 0);
}

#[tokio::test]
async fn test_pending_request_is_cancelled_when_bus_stops() {
    let bus = started(BusConfig {
        grace: Duration::from_millis(20),
        ..fast_config()
    })
    .await;
    bus.subscribe(
        "DB.Get",
        HandlerFn::arc("silent", |_env: Arc<Envelope>| async {
            Ok::<_, HandlerError>(())
        }),
    )
    .await
    .unwrap();

    let waiter = {
        let bus = bus.clone();
        tokio::spawn(async move {
            bus.request("DB.Get", json!({}), RequestOptions::new(Duration::from_secs(10)))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    bus.stop().await;

    let res = waiter.await.unwrap().unwrap();
    assert_eq!(res.error, Some(QueryFailure::Cancelled));
}

#[tokio::test]
async fn test_delivery_outcomes_reach_the_event_stream() {
    use crate::events::EventKind;

    let bus = started(fast_config()).await;
    let mut rx = bus.events().subscribe();
    let hits = Arc::new(AtomicUsize::new(0));
    bus.subscribe("TTS.Started", counter("ui", hits)).await.unwrap();

    bus.publish("TTS.Started", json!(null), PublishOptions::event())
        .await
        .unwrap();
    assert!(bus.wait_idle(Duration::from_secs(1)).await);

    let mut kinds = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        kinds.push(ev.kind);
    }
    assert_eq!(kinds, vec![EventKind::Published, EventKind::Delivered]);
}
