//! Player-message routing tests
//!
//! Immediate and positioned delivery, cancellation, re-arming under repeat
//! modes, insertion-order delivery at equal positions, and silent drops when
//! the target window leaves the timeline.

mod helpers;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use helpers::*;
use riff_player::{
    DiscontinuityReason, MessagePayload, MessageType, PlaybackState, PlayerError, RepeatMode,
};

fn counting_target(counter: Arc<AtomicUsize>) -> Box<dyn riff_player::MessageTarget> {
    Box::new(
        move |_message_type: MessageType,
              _payload: Option<&MessagePayload>|
              -> Result<(), PlayerError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
    )
}

#[tokio::test]
async fn message_without_position_delivers_immediately() {
    let (player, _stats) = test_player();
    let deliveries = Arc::new(AtomicUsize::new(0));
    let handle = player
        .create_message(counting_target(Arc::clone(&deliveries)))
        .send();

    assert!(
        wait_until(&player, Duration::from_secs(5), |_| handle.is_delivered()).await,
        "immediate message never delivered"
    );
    assert_eq!(deliveries.load(Ordering::SeqCst), 1);
    player.release();
}

#[tokio::test]
async fn positioned_message_waits_for_its_window() {
    let (player, _stats) = test_player();
    let deliveries = Arc::new(AtomicUsize::new(0));

    let sources: Vec<Arc<dyn riff_player::source::MediaSource>> = (0..2)
        .map(|_| {
            Arc::new(
                FakeMediaSource::new(timeline_of_windows(1, 10_000)).with_buffer_count(3),
            ) as Arc<dyn riff_player::source::MediaSource>
        })
        .collect();
    player.set_media_items(sources).unwrap();
    let handle = player
        .create_message(counting_target(Arc::clone(&deliveries)))
        .at_position(1, 0)
        .send();

    player.prepare().unwrap();
    wait_for_state(&player, PlaybackState::Ready).await;
    // Still in window 0: nothing delivered yet.
    tokio::time::sleep(Duration::from_millis(100)).await;
    player.process_events();
    assert!(!handle.is_delivered());

    player.set_play_when_ready(true).unwrap();
    assert!(
        wait_until(&player, Duration::from_secs(10), |_| handle.is_delivered()).await,
        "positioned message never delivered"
    );
    assert_eq!(player.current_window_index(), 1);
    player.release();
}

#[tokio::test]
async fn canceled_message_is_never_delivered() {
    let (player, _stats) = test_player();
    let deliveries = Arc::new(AtomicUsize::new(0));
    player
        .set_media_item(Arc::new(FakeMediaSource::new(timeline_of_windows(1, 10_000))))
        .unwrap();
    let handle = player
        .create_message(counting_target(Arc::clone(&deliveries)))
        .at_position(0, 5_000)
        .send();
    player.prepare().unwrap();
    wait_for_state(&player, PlaybackState::Ready).await;

    handle.cancel();
    assert!(handle.is_canceled());
    tokio::time::sleep(Duration::from_millis(100)).await;
    player.process_events();
    assert!(!handle.is_delivered());
    assert_eq!(deliveries.load(Ordering::SeqCst), 0);
    // Cancel is idempotent.
    handle.cancel();
    player.release();
}

#[tokio::test]
async fn kept_message_redelivers_once_per_loop_traversal() {
    let (player, _stats) = test_player();
    let listener = RecordingListener::new();
    player.add_listener(listener.clone());
    let deliveries = Arc::new(AtomicUsize::new(0));

    let source = FakeMediaSource::new(timeline_of_windows(1, 10_000)).with_buffer_count(3);
    player.set_media_item(Arc::new(source)).unwrap();
    let handle = player
        .create_message(counting_target(Arc::clone(&deliveries)))
        .at_position(0, 0)
        .with_delete_after_delivery(false)
        .send();
    player.set_repeat_mode(RepeatMode::All).unwrap();
    player.set_play_when_ready(true).unwrap();
    player.prepare().unwrap();

    assert!(
        wait_until(&player, Duration::from_secs(10), |_| {
            deliveries.load(Ordering::SeqCst) >= 3
        })
        .await,
        "message did not re-arm across traversals"
    );
    player.set_play_when_ready(false).unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    player.process_events();

    let traversals = 1 + listener
        .discontinuities()
        .into_iter()
        .filter(|reason| *reason == DiscontinuityReason::PeriodTransition)
        .count();
    assert_eq!(deliveries.load(Ordering::SeqCst), traversals);
    assert!(handle.is_delivered());
    player.release();
}

#[tokio::test]
async fn messages_at_equal_positions_deliver_in_insertion_order() {
    let (player, _stats) = test_player();
    let order = Arc::new(Mutex::new(Vec::new()));

    let ordered_target = |tag: u8, order: Arc<Mutex<Vec<u8>>>| -> Box<dyn riff_player::MessageTarget> {
        Box::new(
            move |_message_type: MessageType,
                  _payload: Option<&MessagePayload>|
                  -> Result<(), PlayerError> {
                order.lock().unwrap().push(tag);
                Ok(())
            },
        )
    };

    player
        .set_media_item(Arc::new(
            FakeMediaSource::new(timeline_of_windows(1, 10_000)).with_buffer_count(3),
        ))
        .unwrap();
    let first = player
        .create_message(ordered_target(1, Arc::clone(&order)))
        .at_position(0, 1_000)
        .send();
    let second = player
        .create_message(ordered_target(2, Arc::clone(&order)))
        .at_position(0, 1_000)
        .send();
    player.set_play_when_ready(true).unwrap();
    player.prepare().unwrap();

    assert!(
        wait_until(&player, Duration::from_secs(10), |_| {
            first.is_delivered() && second.is_delivered()
        })
        .await
    );
    assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    player.release();
}

#[tokio::test]
async fn message_for_removed_window_is_dropped_silently() {
    let (player, _stats) = test_player();
    let deliveries = Arc::new(AtomicUsize::new(0));

    let sources: Vec<Arc<dyn riff_player::source::MediaSource>> = (0..2)
        .map(|_| {
            Arc::new(FakeMediaSource::new(timeline_of_windows(1, 10_000)))
                as Arc<dyn riff_player::source::MediaSource>
        })
        .collect();
    player.set_media_items(sources).unwrap();
    player.settle().await;
    let handle = player
        .create_message(counting_target(Arc::clone(&deliveries)))
        .at_position(1, 0)
        .send();

    player.remove_media_items(1, 2).unwrap();
    player.set_play_when_ready(true).unwrap();
    player.prepare().unwrap();
    wait_for_state(&player, PlaybackState::Ended).await;

    assert!(!handle.is_delivered());
    assert_eq!(deliveries.load(Ordering::SeqCst), 0);
    player.release();
}

#[tokio::test]
async fn app_thread_delivery_runs_during_event_processing() {
    let (player, _stats) = test_player();
    let deliveries = Arc::new(AtomicUsize::new(0));
    let handle = player
        .create_message(counting_target(Arc::clone(&deliveries)))
        .deliver_on_app_thread()
        .send();

    // Delivery happens only once the application pumps its queue.
    assert!(
        wait_until(&player, Duration::from_secs(5), |_| handle.is_delivered()).await
    );
    assert_eq!(deliveries.load(Ordering::SeqCst), 1);
    player.release();
}
