//! End-to-end delivery through publish → store → poller → dispatcher →
//! worker → handler, using the in-memory store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{assert_silent, recorder, recv_n, start_bus, test_config, wait_until, FlakyStore};
use pollbus_events::{handler_fn, BusConfig, MessageBus, MessageStore, Metadata};
use serde_json::json;
use tokio::sync::{mpsc, Semaphore};

// ---------------------------------------------------------------------------
// Ordering and fan-out
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_order_subscribers_see_messages_in_publish_order() {
    let (bus, _store) = start_bus(test_config()).await;
    let (h1, mut rx1) = recorder();
    let (h2, mut rx2) = recorder();
    bus.subscribe("orders", h1).await.unwrap();
    bus.subscribe("orders", h2).await.unwrap();

    bus.publish("orders", &json!({"id": 1})).await.unwrap();
    bus.publish("orders", &json!({"id": 2})).await.unwrap();

    for rx in [&mut rx1, &mut rx2] {
        let got = recv_n(rx, 2).await;
        assert_eq!(got[0].payload, json!({"id": 1}));
        assert_eq!(got[1].payload, json!({"id": 2}));
    }

    bus.close().await;
}

#[tokio::test]
async fn ids_arrive_in_non_decreasing_order_across_batches() {
    let config = BusConfig {
        batch_size: 3,
        ..test_config()
    };
    let (bus, _store) = start_bus(config).await;
    let (handler, mut rx) = recorder();
    bus.subscribe("metrics", handler).await.unwrap();

    for n in 0..20 {
        bus.publish("metrics", &n).await.unwrap();
    }

    let got = recv_n(&mut rx, 20).await;
    assert!(got.windows(2).all(|w| w[0].id < w[1].id));
    let payloads: Vec<i64> = got.iter().map(|m| m.decode().unwrap()).collect();
    assert_eq!(payloads, (0..20).collect::<Vec<i64>>());

    bus.close().await;
}

#[tokio::test]
async fn channel_and_wildcard_subscribers_all_receive() {
    let (bus, _store) = start_bus(test_config()).await;
    let mut receivers = Vec::new();
    for channel in ["orders", "orders", "orders", "*", "*"] {
        let (handler, rx) = recorder();
        bus.subscribe(channel, handler).await.unwrap();
        receivers.push(rx);
    }

    let id = bus.publish("orders", &json!({"id": 1})).await.unwrap();

    for rx in &mut receivers {
        let got = recv_n(rx, 1).await;
        assert_eq!(got[0].id, id);
    }
    bus.close().await;
}

#[tokio::test]
async fn wildcard_subscriber_sees_any_channel_but_others_do_not() {
    let (bus, _store) = start_bus(test_config()).await;
    let (all, mut all_rx) = recorder();
    let (other, mut other_rx) = recorder();
    bus.subscribe("*", all).await.unwrap();
    bus.subscribe("other", other).await.unwrap();

    bus.publish("anything", &json!("hello")).await.unwrap();

    let got = recv_n(&mut all_rx, 1).await;
    assert_eq!(got[0].channel, "anything");
    assert_silent(&mut other_rx).await;

    bus.close().await;
}

#[tokio::test]
async fn broadcast_reaches_every_subscriber_exactly_once() {
    let (bus, _store) = start_bus(test_config()).await;
    let (a, mut a_rx) = recorder();
    let (b, mut b_rx) = recorder();
    let (all, mut all_rx) = recorder();
    bus.subscribe("a", a).await.unwrap();
    bus.subscribe("b", b).await.unwrap();
    bus.subscribe_pattern("*", all).await.unwrap();

    bus.broadcast(&json!({"maintenance": true})).await.unwrap();

    for rx in [&mut a_rx, &mut b_rx, &mut all_rx] {
        let got = recv_n(rx, 1).await;
        assert!(got[0].is_broadcast());
        assert_silent(rx).await;
    }
    bus.close().await;
}

#[tokio::test]
async fn metadata_travels_with_the_message() {
    let (bus, _store) = start_bus(test_config()).await;
    let (handler, mut rx) = recorder();
    bus.subscribe("orders", handler).await.unwrap();

    let metadata = Metadata::from([("trace_id".to_string(), "t-42".to_string())]);
    bus.publish_with_metadata("orders", &json!({"id": 1}), metadata)
        .await
        .unwrap();

    let got = recv_n(&mut rx, 1).await;
    assert_eq!(got[0].metadata_value("trace_id"), Some("t-42"));
    bus.close().await;
}

#[tokio::test]
async fn publish_to_channel_without_subscribers_only_stores_the_message() {
    let (bus, store) = start_bus(test_config()).await;

    bus.publish("lonely", &json!(1)).await.unwrap();

    assert_eq!(store.count().await.unwrap(), 1);
    wait_until(|| async { bus.stats().await.unwrap().cursor == 1 }).await;
    assert!(bus.list_channels().await.is_empty());
    assert_eq!(bus.stats().await.unwrap().counters.dropped, 0);
    bus.close().await;
}

// ---------------------------------------------------------------------------
// Unsubscribe
// ---------------------------------------------------------------------------

#[tokio::test]
async fn no_delivery_after_unsubscribe() {
    let (bus, _store) = start_bus(test_config()).await;
    let (handler, mut rx) = recorder();
    let sub = bus.subscribe("orders", handler).await.unwrap();

    bus.publish("orders", &1).await.unwrap();
    recv_n(&mut rx, 1).await;

    bus.unsubscribe(&sub).await.unwrap();
    sub.closed().await;
    bus.publish("orders", &2).await.unwrap();

    assert_silent(&mut rx).await;
    assert!(!bus.channel_exists("orders").await);
    bus.close().await;
}

// ---------------------------------------------------------------------------
// Backpressure and isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_queue_drops_for_slow_subscriber_without_blocking_publish() {
    let config = BusConfig {
        queue_capacity: 1,
        ..test_config()
    };
    let (bus, _store) = start_bus(config).await;

    // The slow handler parks on the semaphore until the test releases it.
    let gate = Arc::new(Semaphore::new(0));
    let (slow_tx, mut slow_rx) = mpsc::unbounded_channel();
    let slow_gate = Arc::clone(&gate);
    bus.subscribe(
        "orders",
        handler_fn(move |_ctx, msg| {
            let gate = Arc::clone(&slow_gate);
            let tx = slow_tx.clone();
            async move {
                gate.acquire().await?.forget();
                tx.send(msg).ok();
                anyhow::Ok(())
            }
        }),
    )
    .await
    .unwrap();

    let (fast, mut fast_rx) = recorder();
    bus.subscribe("orders", fast).await.unwrap();

    // One publish per poll: the fast subscriber drains each message before
    // the next arrives, while the slow one stays parked on the first.
    for n in 0..5 {
        tokio::time::timeout(Duration::from_millis(500), bus.publish("orders", &n))
            .await
            .expect("publish must not block on a slow subscriber")
            .unwrap();
        let got = recv_n(&mut fast_rx, 1).await;
        assert_eq!(got[0].decode::<i32>().unwrap(), n);
    }

    // One message in the handler, at most one queued; the rest dropped.
    wait_until(|| async { bus.stats().await.unwrap().counters.dropped >= 3 }).await;
    let dropped = bus.stats().await.unwrap().counters.dropped;
    assert!(dropped <= 4, "dropped {dropped}");

    gate.add_permits(10);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut slow_seen = 0;
    while slow_rx.try_recv().is_ok() {
        slow_seen += 1;
    }
    assert!((1..=2).contains(&slow_seen), "slow subscriber saw {slow_seen}");
    assert_eq!(slow_seen + dropped, 5);

    bus.close().await;
}

#[tokio::test]
async fn failing_handler_does_not_affect_other_subscribers() {
    let (bus, _store) = start_bus(test_config()).await;
    bus.subscribe(
        "orders",
        handler_fn(|_ctx, _msg| async {
            Err::<(), _>(anyhow::anyhow!("downstream unavailable"))
        }),
    )
    .await
    .unwrap();
    bus.subscribe(
        "orders",
        handler_fn(|_ctx, msg| async move {
            if msg.id > 0 {
                panic!("handler bug");
            }
            anyhow::Ok(())
        }),
    )
    .await
    .unwrap();
    let (healthy, mut rx) = recorder();
    bus.subscribe("orders", healthy).await.unwrap();

    bus.publish("orders", &1).await.unwrap();
    bus.publish("orders", &2).await.unwrap();

    assert_eq!(recv_n(&mut rx, 2).await.len(), 2);
    wait_until(|| async { bus.stats().await.unwrap().counters.handler_failures == 4 }).await;
    bus.close().await;
}

// ---------------------------------------------------------------------------
// Cursor behaviour
// ---------------------------------------------------------------------------

#[tokio::test]
async fn backlog_from_before_start_is_not_redelivered() {
    let store = Arc::new(pollbus_events::MemoryMessageStore::new());
    for n in 0..3 {
        store
            .insert("orders", &json!(n), &Metadata::new())
            .await
            .unwrap();
    }

    let bus = MessageBus::start(Arc::clone(&store) as Arc<dyn MessageStore>, test_config())
        .await
        .unwrap();
    assert_eq!(bus.stats().await.unwrap().cursor, 3);

    let (handler, mut rx) = recorder();
    bus.subscribe("orders", handler).await.unwrap();
    let fresh = bus.publish("orders", &json!("fresh")).await.unwrap();

    let got = recv_n(&mut rx, 1).await;
    assert_eq!(got[0].id, fresh);
    assert_silent(&mut rx).await;
    bus.close().await;
}

#[tokio::test]
async fn poller_recovers_after_transient_store_failures() {
    let store = Arc::new(FlakyStore::failing_scans(3));
    let bus = MessageBus::start(Arc::clone(&store) as Arc<dyn MessageStore>, test_config())
        .await
        .unwrap();
    let (handler, mut rx) = recorder();
    bus.subscribe("orders", handler).await.unwrap();

    bus.publish("orders", &json!({"id": 1})).await.unwrap();

    let got = recv_n(&mut rx, 1).await;
    assert_eq!(got[0].payload, json!({"id": 1}));
    assert_eq!(store.remaining_failures(), 0);
    bus.close().await;
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn subscription_churn_is_safe_alongside_dispatch() {
    let config = BusConfig {
        queue_capacity: 512,
        ..test_config()
    };
    let (bus, _store) = start_bus(config).await;
    let (steady, mut steady_rx) = recorder();
    let steady_sub = bus.subscribe("orders", steady).await.unwrap();

    let publisher = {
        let bus = bus.clone();
        tokio::spawn(async move {
            for n in 0..200 {
                bus.publish("orders", &n).await.unwrap();
                if n % 20 == 0 {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
            }
        })
    };

    let churners: Vec<_> = (0..4)
        .map(|worker| {
            let bus = bus.clone();
            tokio::spawn(async move {
                let channel = if worker % 2 == 0 { "orders" } else { "*" };
                for _ in 0..25 {
                    let (handler, mut rx) = recorder();
                    let sub = bus.subscribe(channel, handler).await.unwrap();
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    bus.unsubscribe(&sub).await.unwrap();
                    sub.closed().await;

                    let mut last = 0;
                    while let Ok(msg) = rx.try_recv() {
                        assert!(msg.id > last, "id {} after {last}", msg.id);
                        last = msg.id;
                    }
                }
            })
        })
        .collect();

    let observer = {
        let bus = bus.clone();
        tokio::spawn(async move {
            for _ in 0..100 {
                let stats = bus.stats().await.unwrap();
                assert_eq!(
                    stats.total_subscriptions,
                    stats.channels.values().sum::<usize>()
                );
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    publisher.await.unwrap();
    for churner in churners {
        churner.await.unwrap();
    }
    observer.await.unwrap();

    let got = recv_n(&mut steady_rx, 200).await;
    assert!(got.windows(2).all(|w| w[0].id < w[1].id));

    bus.unsubscribe(&steady_sub).await.unwrap();
    let stats = bus.stats().await.unwrap();
    assert_eq!(stats.total_subscriptions, 0);
    assert!(stats.channels.is_empty());
    assert!(bus.list_channels().await.is_empty());

    bus.close().await;
}
