use std::time::Duration;

use harvester::retry::{RetryClass, RetryItem, RetryQueue, ScheduleOutcome};
use tokio::time::{advance, Instant};

fn due_item(url: &str, class: RetryClass) -> RetryItem {
    RetryItem {
        url: url.to_string(),
        class,
        attempt: 1,
        due: Instant::now(),
        error: "boom".to_string(),
    }
}

#[test]
fn first_schedule_uses_the_base_delay() {
    let queue = RetryQueue::default();
    let outcome = queue.schedule("https://store.example/p/1", RetryClass::RateLimit, "429");
    assert_eq!(
        outcome,
        ScheduleOutcome::Queued {
            attempt: 1,
            delay: Duration::from_secs(60)
        }
    );
    assert_eq!(queue.len(), 1);
}

#[test]
fn waiting_urls_are_not_queued_twice() {
    let queue = RetryQueue::default();
    queue.schedule("https://store.example/p/1", RetryClass::Timeout, "t");
    let outcome = queue.schedule("https://store.example/p/1", RetryClass::Timeout, "t");
    assert_eq!(outcome, ScheduleOutcome::Duplicate);
    assert_eq!(queue.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_per_attempt() {
    let queue = RetryQueue::default();
    let url = "https://store.example/p/1";

    assert_eq!(
        queue.schedule(url, RetryClass::ServerError, "500"),
        ScheduleOutcome::Queued {
            attempt: 1,
            delay: Duration::from_secs(30)
        }
    );
    advance(Duration::from_secs(31)).await;
    assert_eq!(queue.pop_ready(10).len(), 1);

    assert_eq!(
        queue.schedule(url, RetryClass::ServerError, "500"),
        ScheduleOutcome::Queued {
            attempt: 2,
            delay: Duration::from_secs(60)
        }
    );
    advance(Duration::from_secs(61)).await;
    assert_eq!(queue.pop_ready(10).len(), 1);

    assert_eq!(
        queue.schedule(url, RetryClass::ServerError, "500"),
        ScheduleOutcome::Queued {
            attempt: 3,
            delay: Duration::from_secs(120)
        }
    );
}

#[tokio::test(start_paused = true)]
async fn urls_exhaust_after_max_attempts() {
    let queue = RetryQueue::new(3);
    let url = "https://store.example/p/1";

    for expected_attempt in 1..=2 {
        assert!(matches!(
            queue.schedule(url, RetryClass::Connection, "refused"),
            ScheduleOutcome::Queued { attempt, .. } if attempt == expected_attempt
        ));
        advance(Duration::from_secs(600)).await;
        assert_eq!(queue.pop_ready(10).len(), 1);
    }

    assert_eq!(
        queue.schedule(url, RetryClass::Connection, "refused"),
        ScheduleOutcome::Exhausted
    );

    let failed = queue.exhausted();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].url, url);
    assert_eq!(failed[0].attempts, 3);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn pop_ready_returns_best_priority_first() {
    let queue = RetryQueue::default();
    queue.requeue(due_item("https://store.example/missing", RetryClass::NotFound));
    queue.requeue(due_item("https://store.example/limited", RetryClass::RateLimit));
    queue.requeue(due_item("https://store.example/slow", RetryClass::Timeout));

    let ready = queue.pop_ready(10);
    let urls: Vec<&str> = ready.iter().map(|item| item.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://store.example/limited",
            "https://store.example/slow",
            "https://store.example/missing",
        ]
    );
}

#[test]
fn pop_ready_leaves_future_items_queued() {
    let queue = RetryQueue::default();
    queue.schedule("https://store.example/p/1", RetryClass::RateLimit, "429");
    assert!(queue.pop_ready(10).is_empty());
    assert_eq!(queue.len(), 1);
    assert!(queue.next_due_in().is_some());
}

#[tokio::test(start_paused = true)]
async fn success_resets_the_attempt_ledger() {
    let queue = RetryQueue::new(3);
    let url = "https://store.example/p/1";

    queue.schedule(url, RetryClass::Timeout, "t");
    advance(Duration::from_secs(31)).await;
    assert_eq!(queue.pop_ready(10).len(), 1);
    queue.mark_success(url);

    // Counts from one again instead of two.
    assert_eq!(
        queue.schedule(url, RetryClass::Timeout, "t"),
        ScheduleOutcome::Queued {
            attempt: 1,
            delay: Duration::from_secs(30)
        }
    );
    assert_eq!(queue.stats().succeeded, 1);
}

#[test]
fn stats_track_scheduling() {
    let queue = RetryQueue::default();
    queue.schedule("https://store.example/a", RetryClass::RateLimit, "429");
    queue.schedule("https://store.example/b", RetryClass::NotFound, "404");

    let stats = queue.stats();
    assert_eq!(stats.queued, 2);
    assert_eq!(stats.total_scheduled, 2);
    assert_eq!(stats.ready, 0);
    assert_eq!(stats.exhausted, 0);
}
