use std::time::Duration;

use sift_service::{Admission, CallerPriority, Error};

fn admission() -> Admission {
	Admission::new(&sift_config::Admission {
		max_concurrent: 2,
		max_queue_depth: 1,
		queue_retry_after_ms: 500,
		rate_limit_per_minute: None,
	})
}

async fn wait_for_queued(admission: &Admission, queued: usize) {
	while admission.snapshot().queued != queued {
		tokio::task::yield_now().await;
	}
}

#[tokio::test]
async fn fourth_request_overflows_while_third_waits() {
	let admission = admission();
	let first = admission.acquire(CallerPriority::Normal).await.expect("first");
	let _second = admission.acquire(CallerPriority::Normal).await.expect("second");
	let third = tokio::spawn({
		let admission = admission.clone();

		async move { admission.acquire(CallerPriority::Normal).await.map(drop) }
	});

	wait_for_queued(&admission, 1).await;

	let fourth = admission.acquire(CallerPriority::Normal).await;

	assert!(matches!(fourth, Err(Error::QueueOverflow { retry_after_ms: 500 })));

	drop(first);

	tokio::time::timeout(Duration::from_secs(1), third)
		.await
		.expect("third request was never admitted")
		.expect("task panicked")
		.expect("third request rejected");

	let snapshot = admission.snapshot();

	assert_eq!(snapshot.queued, 0);
	assert_eq!(snapshot.in_flight, 1);
}

#[tokio::test]
async fn cancelled_waiters_free_their_queue_slot() {
	let admission = admission();
	let _first = admission.acquire(CallerPriority::Normal).await.expect("first");
	let _second = admission.acquire(CallerPriority::Normal).await.expect("second");
	let waiter = tokio::spawn({
		let admission = admission.clone();

		async move { admission.acquire(CallerPriority::Low).await.map(drop) }
	});

	wait_for_queued(&admission, 1).await;
	waiter.abort();

	let _ = waiter.await;

	// The abandoned waiter no longer counts against the queue, so this one waits instead.
	let again =
		tokio::time::timeout(Duration::from_millis(50), admission.acquire(CallerPriority::High))
			.await;

	assert!(again.is_err(), "request was not queued");
}
