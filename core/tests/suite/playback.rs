use std::sync::Arc;
use std::time::Duration;

use core_test_support::ScriptedTransport;
use core_test_support::moment_event;
use core_test_support::round_snapshots;
use core_test_support::test_config;
use core_test_support::wait_for;
use pretty_assertions::assert_eq;
use replaycast_core::EngineConfig;
use replaycast_core::NameCache;
use replaycast_core::NarrationStatus;
use replaycast_core::PlaybackState;
use replaycast_core::ReplayError;
use replaycast_core::ReplaySession;
use replaycast_core::StateError;
use replaycast_core::derive_target;
use replaycast_core::protocol::FinalState;
use replaycast_core::protocol::RoundContext;
use serde_json::json;
use tokio::time::sleep;

fn scrub_session(n: usize) -> ReplaySession {
    let snapshots = round_snapshots(n);
    let names = NameCache::from_snapshots(&snapshots);
    let session = ReplaySession::new(
        snapshots,
        &names,
        ScriptedTransport::new(),
        Arc::new(test_config()),
    );
    session.start_without_narration().unwrap();
    session
}

#[tokio::test(start_paused = true)]
async fn double_play_advances_at_a_single_rate() {
    let session = scrub_session(10);

    assert!(session.play().unwrap());
    assert!(!session.play().unwrap());
    sleep(Duration::from_millis(350)).await;

    assert_eq!(3, session.active_index());
    assert_eq!(PlaybackState::Playing, session.playback_state());
}

#[tokio::test(start_paused = true)]
async fn pause_freezes_and_play_resumes() {
    let session = scrub_session(10);
    session.play().unwrap();
    sleep(Duration::from_millis(250)).await;
    session.pause().unwrap();
    assert_eq!(PlaybackState::Paused, session.playback_state());

    sleep(Duration::from_secs(1)).await;
    assert_eq!(2, session.active_index());

    session.play().unwrap();
    sleep(Duration::from_millis(150)).await;
    assert_eq!(3, session.active_index());
}

#[tokio::test(start_paused = true)]
async fn stop_rewinds_to_the_first_index() {
    let session = scrub_session(5);
    session.play().unwrap();
    sleep(Duration::from_millis(250)).await;

    session.stop().unwrap();
    let frame = session.frame();
    assert_eq!(0, frame.active_index);
    assert_eq!(PlaybackState::Ready, frame.playback_state);

    sleep(Duration::from_secs(1)).await;
    assert_eq!(0, session.active_index());
}

#[tokio::test(start_paused = true)]
async fn playback_ends_done_at_the_last_snapshot() {
    let session = scrub_session(4);
    session.play().unwrap();
    sleep(Duration::from_secs(2)).await;

    assert_eq!(3, session.active_index());
    assert_eq!(PlaybackState::Done, session.playback_state());
    assert!(!session.play().unwrap());

    assert_eq!(3, session.seek(99).unwrap());
    assert_eq!(1, session.seek(1).unwrap());
    assert_eq!(PlaybackState::Paused, session.playback_state());
    assert!(session.play().unwrap());
}

#[tokio::test(start_paused = true)]
async fn seeking_to_the_end_while_playing_finishes_immediately() {
    let session = scrub_session(5);
    session.play().unwrap();

    assert_eq!(4, session.seek(4).unwrap());
    let frame = session.frame();
    assert_eq!(PlaybackState::Done, frame.playback_state);

    sleep(Duration::from_secs(1)).await;
    assert_eq!(4, session.active_index());
    assert_eq!(PlaybackState::Done, session.playback_state());
}

#[tokio::test(start_paused = true)]
async fn seek_while_playing_continues_from_the_new_index() {
    let session = scrub_session(20);
    session.play().unwrap();
    sleep(Duration::from_millis(150)).await;
    assert_eq!(1, session.active_index());

    session.seek(10).unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(11, session.active_index());
}

#[tokio::test(start_paused = true)]
async fn destroy_stops_the_timer() {
    let session = scrub_session(10);
    session.play().unwrap();
    sleep(Duration::from_millis(150)).await;

    session.destroy();
    tokio::time::advance(Duration::from_secs(1)).await;
    tokio::task::yield_now().await;

    assert_eq!(1, session.frame().active_index);
    assert!(matches!(
        session.pause(),
        Err(ReplayError::State(StateError::Destroyed))
    ));
}

#[tokio::test(start_paused = true)]
async fn every_frame_agrees_with_its_moment() {
    let transport = ScriptedTransport::new();
    let script = transport.script();
    let snapshots = round_snapshots(4);
    let names = NameCache::from_snapshots(&snapshots);
    let config = EngineConfig {
        auto_play: true,
        ..test_config()
    };
    let session = ReplaySession::new(snapshots, &names, transport, Arc::new(config));
    let mut frames = session.subscribe();

    session
        .build(FinalState::default(), RoundContext::default())
        .unwrap();
    for i in 0..4 {
        script.send(&moment_event(i, &format!("beat {i}")));
    }
    script.send(&json!({"type": "done"}));
    wait_for(&mut frames, |f| f.narration_status == NarrationStatus::Ready).await;

    let mut seen = Vec::new();
    loop {
        let frame = wait_for(&mut frames, |_| true).await;
        frames.mark_unchanged();
        assert_eq!(derive_target(frame.moment.as_ref()), frame.camera_target);
        assert_eq!(
            Some(frame.active_index),
            frame.moment.as_ref().map(|m| m.moment_index)
        );
        if seen.last() != Some(&frame.active_index) {
            seen.push(frame.active_index);
        }
        if frame.playback_state == PlaybackState::Done {
            break;
        }
        frames.changed().await.unwrap();
    }
    assert_eq!(vec![0, 1, 2, 3], seen);
}

#[tokio::test(start_paused = true)]
async fn focus_version_bumps_once_per_index_change() {
    let transport = ScriptedTransport::new();
    let script = transport.script();
    let snapshots = round_snapshots(3);
    let names = NameCache::from_snapshots(&snapshots);
    let session = ReplaySession::new(snapshots, &names, transport, Arc::new(test_config()));
    let mut frames = session.subscribe();

    session
        .build(FinalState::default(), RoundContext::default())
        .unwrap();
    script.send(&moment_event(0, "a"));
    script.send(&moment_event(1, "b"));
    script.send(&moment_event(2, "c"));
    script.send(&json!({"type": "done"}));
    let ready = wait_for(&mut frames, |f| f.narration_status == NarrationStatus::Ready).await;

    session.seek(2).unwrap();
    let after_seek = session.frame().focus_version;
    assert_eq!(ready.focus_version + 1, after_seek);

    session.seek(2).unwrap();
    assert_eq!(after_seek, session.frame().focus_version);
}
