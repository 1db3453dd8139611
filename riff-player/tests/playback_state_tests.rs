//! State-machine and lifecycle tests
//!
//! Exercises the playback state machine end to end with fake sources and
//! renderers: empty playlists, linear play-through, stop variants, playback
//! errors and re-preparation.

mod helpers;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use helpers::*;
use riff_player::config::PlayerBuilder;
use riff_player::{
    DiscontinuityReason, PlaybackParameters, PlaybackState, TimelineChangeReason,
};

#[tokio::test]
async fn prepare_with_empty_playlist_goes_directly_to_ended() {
    let (player, _stats) = test_player();
    let listener = RecordingListener::new();
    player.add_listener(listener.clone());

    player.prepare().unwrap();
    assert_eq!(player.playback_state(), PlaybackState::Ended);
    player.settle().await;

    assert_eq!(listener.states(), vec![PlaybackState::Ended]);
    assert!(listener.discontinuities().is_empty());

    // Adding items afterwards must not leave the ended state on its own.
    player
        .add_media_items(
            0,
            vec![Arc::new(FakeMediaSource::new(timeline_of_windows(1, 10_000)))],
        )
        .unwrap();
    player.settle().await;
    assert_eq!(player.playback_state(), PlaybackState::Ended);

    // A seek re-enters buffering.
    player.seek_to(0, 0).unwrap();
    wait_for_state(&player, PlaybackState::Ready).await;
    player.release();
}

#[tokio::test]
async fn source_with_empty_timeline_buffers_then_ends() {
    let (player, _stats) = test_player();
    let listener = RecordingListener::new();
    player.add_listener(listener.clone());

    let source = FakeMediaSource::new(riff_player::Timeline::empty());
    player.set_media_item(Arc::new(source)).unwrap();
    player.prepare().unwrap();
    wait_for_state(&player, PlaybackState::Ended).await;

    assert_eq!(
        listener.states(),
        vec![PlaybackState::Buffering, PlaybackState::Ended]
    );
    assert!(listener.discontinuities().is_empty());
    let reasons: Vec<TimelineChangeReason> = listener
        .timeline_events()
        .into_iter()
        .map(|event| match event {
            Recorded::Timeline { reason, .. } => reason,
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(
        reasons,
        vec![
            TimelineChangeReason::PlaylistChanged,
            TimelineChangeReason::SourceUpdate
        ]
    );
    player.release();
}

#[tokio::test]
async fn three_window_playlist_plays_through_linearly() {
    let (player, stats) = test_player();
    let listener = RecordingListener::new();
    player.add_listener(listener.clone());

    let sources: Vec<Arc<dyn riff_player::source::MediaSource>> = (0..3)
        .map(|_| {
            Arc::new(FakeMediaSource::new(timeline_of_windows(1, 10_000)))
                as Arc<dyn riff_player::source::MediaSource>
        })
        .collect();
    player.set_media_items(sources).unwrap();
    player.set_play_when_ready(true).unwrap();
    player.prepare().unwrap();
    wait_for_state(&player, PlaybackState::Ended).await;

    let transitions: Vec<DiscontinuityReason> = listener
        .discontinuities()
        .into_iter()
        .filter(|reason| *reason == DiscontinuityReason::PeriodTransition)
        .collect();
    assert_eq!(transitions.len(), 2);
    assert_eq!(stats.format_read_count.load(Ordering::SeqCst), 3);
    assert_eq!(stats.sample_buffer_read_count.load(Ordering::SeqCst), 3);
    assert_eq!(stats.enabled_count.load(Ordering::SeqCst), 3);
    player.release();
}

#[tokio::test]
async fn stop_without_reset_preserves_position_and_timeline() {
    let (player, _stats) = test_player();
    player
        .set_media_items_with_position(
            vec![
                Arc::new(FakeMediaSource::new(timeline_of_windows(1, 10_000))),
                Arc::new(FakeMediaSource::new(timeline_of_windows(1, 10_000))),
            ],
            1,
            4_000,
        )
        .unwrap();
    player.prepare().unwrap();
    wait_for_state(&player, PlaybackState::Ready).await;

    player.stop(false).unwrap();
    player.settle().await;
    assert_eq!(player.playback_state(), PlaybackState::Idle);
    assert_eq!(player.current_window_index(), 1);
    assert_eq!(player.current_position_ms(), 4_000);
    assert!(!player.current_timeline().is_empty());
    player.release();
}

#[tokio::test]
async fn stop_with_reset_clears_position_and_timeline() {
    let (player, _stats) = test_player();
    player
        .set_media_items_with_position(
            vec![
                Arc::new(FakeMediaSource::new(timeline_of_windows(1, 10_000))),
                Arc::new(FakeMediaSource::new(timeline_of_windows(1, 10_000))),
            ],
            1,
            4_000,
        )
        .unwrap();
    player.prepare().unwrap();
    wait_for_state(&player, PlaybackState::Ready).await;

    player.stop(true).unwrap();
    player.settle().await;
    assert_eq!(player.playback_state(), PlaybackState::Idle);
    assert_eq!(player.current_window_index(), 0);
    assert_eq!(player.current_position_ms(), 0);
    assert!(player.current_timeline().is_empty());
    player.release();
}

#[tokio::test]
async fn stop_twice_then_seek_keeps_timeline_and_emits_one_seek() {
    let (player, _stats) = test_player();
    let listener = RecordingListener::new();
    player.add_listener(listener.clone());

    player
        .set_media_item(Arc::new(FakeMediaSource::new(timeline_of_windows(1, 10_000))))
        .unwrap();
    player.prepare().unwrap();
    wait_for_state(&player, PlaybackState::Ready).await;
    listener.clear();

    player.stop(false).unwrap();
    player.stop(false).unwrap();
    player.seek_to(0, 0).unwrap();
    player.settle().await;

    assert!(!player.current_timeline().is_empty());
    assert_eq!(
        listener.discontinuities(),
        vec![DiscontinuityReason::Seek]
    );
    player.release();
}

#[tokio::test]
async fn source_error_surfaces_and_reprepare_recovers() {
    let (player, _stats) = test_player();
    let listener = RecordingListener::new();
    player.add_listener(listener.clone());

    let source = FakeMediaSource::new(timeline_of_windows(1, 10_000));
    let handle = source.handle();
    handle.fail_with("manifest fetch failed");
    player.set_media_item(Arc::new(source)).unwrap();
    player.prepare().unwrap();
    assert!(
        wait_until(&player, Duration::from_secs(5), |p| p.playback_error().is_some()).await,
        "error never surfaced"
    );

    // Error implies idle; the playlist survives.
    assert_eq!(player.playback_state(), PlaybackState::Idle);
    assert_eq!(player.media_item_count(), 1);
    assert!(listener
        .events()
        .iter()
        .any(|event| matches!(event, Recorded::Error(message) if message.contains("manifest"))));

    // A successful prepare clears the error and buffers again.
    handle.clear_error();
    player.prepare().unwrap();
    assert!(player.playback_error().is_none());
    wait_for_state(&player, PlaybackState::Ready).await;
    player.release();
}

#[tokio::test]
async fn playback_parameters_set_before_preparation_survive() {
    let (player, _stats) = test_player();
    player
        .set_playback_parameters(PlaybackParameters::with_speed(2.0))
        .unwrap();
    player
        .set_media_item(Arc::new(FakeMediaSource::new(timeline_of_windows(1, 10_000))))
        .unwrap();
    player.prepare().unwrap();
    player.settle().await;
    assert_eq!(player.playback_parameters().speed, 2.0);
    player.release();
}

#[tokio::test]
async fn eager_preparation_prepares_all_sources_up_front() {
    init_tracing();
    let (renderer, _stats) = FakeRenderer::audio();
    let player = PlayerBuilder::new(vec![Box::new(renderer)])
        .with_lazy_preparation(false)
        .build();

    let first = FakeMediaSource::new(timeline_of_windows(1, 10_000));
    let second = FakeMediaSource::new(timeline_of_windows(1, 10_000));
    let first_handle = first.handle();
    let second_handle = second.handle();
    player
        .set_media_items(vec![Arc::new(first), Arc::new(second)])
        .unwrap();
    player.prepare().unwrap();
    assert!(
        wait_until(&player, Duration::from_secs(5), |_| {
            first_handle.prepare_count() > 0 && second_handle.prepare_count() > 0
        })
        .await,
        "eager mode should prepare every source"
    );
    player.release();
}

#[tokio::test]
async fn lazy_preparation_prepares_only_the_current_source() {
    let (player, _stats) = test_player();
    let first = FakeMediaSource::new(timeline_of_windows(1, 10_000));
    let second = FakeMediaSource::deferred(timeline_of_windows(1, 10_000));
    let first_handle = first.handle();
    let second_handle = second.handle();
    player
        .set_media_items(vec![Arc::new(first), Arc::new(second)])
        .unwrap();
    player.prepare().unwrap();
    wait_for_state(&player, PlaybackState::Ready).await;

    assert_eq!(first_handle.prepare_count(), 1);
    assert_eq!(second_handle.prepare_count(), 0);
    player.release();
}

#[tokio::test]
async fn released_player_rejects_operations() {
    let (player, _stats) = test_player();
    player.release();
    assert!(matches!(
        player.prepare(),
        Err(riff_player::PlayerError::Released)
    ));
    assert!(matches!(
        player.seek_to(0, 0),
        Err(riff_player::PlayerError::Released)
    ));
}
