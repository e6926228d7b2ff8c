mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{users, ScriptedSender};
use promobot_core::{
    BroadcastConfig,
    BroadcastReport,
    Broadcaster,
    DispatchConfig,
    DispatchQueue,
    InMemoryUserStore,
    Language,
    LocalizedText,
    UserId,
    UserProfile,
    UserStore,
};

fn dispatch_config() -> DispatchConfig {
    DispatchConfig {
        batch_size: 10,
        inter_batch_delay: Duration::from_millis(100),
        inter_message_delay: Duration::from_millis(5),
        retry_base: Duration::from_millis(50),
    }
}

fn broadcast_config() -> BroadcastConfig {
    BroadcastConfig {
        poll_interval: Duration::from_millis(20),
        max_wait: Duration::from_secs(30),
        ..Default::default()
    }
}

async fn seeded_store(ids: impl IntoIterator<Item = i64>) -> Arc<InMemoryUserStore> {
    let store = Arc::new(InMemoryUserStore::new());
    for id in ids {
        store
            .upsert_user(&UserProfile::new(UserId(id)), Utc::now())
            .await
            .unwrap();
    }
    store
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_reports_delivery_counts() {
    let sender = ScriptedSender::new();
    sender.fail_always(UserId(4));
    sender.fail_times(UserId(7), 1);

    let store = seeded_store(1..=25).await;
    let queue = DispatchQueue::new(dispatch_config(), sender.clone());
    let broadcaster = Broadcaster::new(queue, store, broadcast_config());

    let report = broadcaster.broadcast("Weekend promo!").await.unwrap();
    assert_eq!(
        report,
        BroadcastReport {
            total: 25,
            sent: 24,
            failed: 1,
            timed_out: false,
        }
    );

    // Default budget is three retries
    assert_eq!(sender.calls_to(UserId(4)).len(), 4);
    assert_eq!(sender.calls_to(UserId(7)).len(), 2);
    assert!(sender.calls().iter().all(|c| c.text == "Weekend promo!"));
}

#[tokio::test(start_paused = true)]
async fn test_reports_are_per_broadcast() {
    let sender = ScriptedSender::new();
    let store = seeded_store(1..=3).await;
    let queue = DispatchQueue::new(dispatch_config(), sender.clone());
    let broadcaster = Broadcaster::new(queue, store, broadcast_config());

    broadcaster.broadcast("first").await.unwrap();
    let second = broadcaster.broadcast("second").await.unwrap();

    assert_eq!(second.total, 3);
    assert_eq!(second.sent, 3);
    assert_eq!(broadcaster.queue().stats().delivered, 6);
}

#[tokio::test(start_paused = true)]
async fn test_empty_audience_sends_nothing() {
    let sender = ScriptedSender::new();
    let queue = DispatchQueue::new(dispatch_config(), sender.clone());
    let broadcaster = Broadcaster::new(queue, Arc::new(InMemoryUserStore::new()), broadcast_config());

    let report = broadcaster.broadcast("anyone?").await.unwrap();
    assert_eq!(report, BroadcastReport::default());
    assert!(sender.calls().is_empty());
    assert!(!broadcaster.queue().status().await.processing);
}

#[tokio::test(start_paused = true)]
async fn test_localized_broadcast_picks_text_by_language() {
    let sender = ScriptedSender::new();
    let store = seeded_store(1..=4).await;
    store.set_language(UserId(2), Language::Tr).await.unwrap();
    store.set_language(UserId(4), Language::Tr).await.unwrap();

    let queue = DispatchQueue::new(dispatch_config(), sender.clone());
    let broadcaster = Broadcaster::new(queue, store, broadcast_config());

    let text = LocalizedText {
        tr: "Yeni promosyon!".to_string(),
        en: "New promotion!".to_string(),
    };
    let report = broadcaster.broadcast_localized(&text).await.unwrap();
    assert_eq!(report.total, 4);
    assert_eq!(report.sent, 4);

    for id in [2, 4] {
        assert_eq!(sender.calls_to(UserId(id))[0].text, "Yeni promosyon!");
    }
    for id in [1, 3] {
        assert_eq!(sender.calls_to(UserId(id))[0].text, "New promotion!");
    }
}

#[tokio::test(start_paused = true)]
async fn test_localized_broadcast_uses_smaller_retry_budget() {
    let sender = ScriptedSender::new();
    sender.fail_always(UserId(1));

    let store = seeded_store(1..=2).await;
    let queue = DispatchQueue::new(dispatch_config(), sender.clone());
    let broadcaster = Broadcaster::new(queue, store, broadcast_config());

    let text = LocalizedText {
        tr: "tr".to_string(),
        en: "en".to_string(),
    };
    let report = broadcaster.broadcast_localized(&text).await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(sender.calls_to(UserId(1)).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_timeout_returns_partial_report() {
    let sender = ScriptedSender::with_latency(Duration::from_secs(5));
    let store = seeded_store(1..=20).await;
    let queue = DispatchQueue::new(dispatch_config(), sender.clone());

    let config = BroadcastConfig {
        max_wait: Duration::from_secs(2),
        ..broadcast_config()
    };
    let broadcaster = Broadcaster::new(queue, store, config);

    let report = broadcaster.broadcast("slow network").await.unwrap();
    assert!(report.timed_out);
    assert_eq!(report.total, 20);
    assert!(report.sent < 20);
}

#[tokio::test(start_paused = true)]
async fn test_report_ignores_jobs_already_on_the_queue() {
    let sender = ScriptedSender::new();
    let store = seeded_store(1..=3).await;
    let queue = DispatchQueue::new(dispatch_config(), sender.clone());

    // Unrelated traffic ahead of the broadcast
    queue.enqueue(users(100..120), "someone else's", 0).await;

    let broadcaster = Broadcaster::new(queue, store, broadcast_config());
    let report = broadcaster.broadcast("mine").await.unwrap();

    assert_eq!(
        report,
        BroadcastReport {
            total: 3,
            sent: 3,
            failed: 0,
            timed_out: false,
        }
    );
    assert_eq!(broadcaster.queue().stats().delivered, 23);
}

#[tokio::test(start_paused = true)]
async fn test_report_after_timed_out_broadcast_still_draining() {
    let sender = ScriptedSender::with_latency(Duration::from_secs(5));
    let store = seeded_store(1..=20).await;
    let queue = DispatchQueue::new(dispatch_config(), sender.clone());

    let impatient = Broadcaster::new(
        queue.clone(),
        store.clone(),
        BroadcastConfig {
            max_wait: Duration::from_secs(2),
            ..broadcast_config()
        },
    );
    let first = impatient.broadcast("first").await.unwrap();
    assert!(first.timed_out);

    let patient = Broadcaster::new(queue, store, broadcast_config());
    let second = patient.broadcast("second").await.unwrap();

    assert!(!second.timed_out);
    assert_eq!(second.total, 20);
    assert_eq!(second.sent, 20);
    assert_eq!(second.failed, 0);
}
