use std::sync::Arc;

use core_test_support::ScriptedTransport;
use core_test_support::init_tracing;
use core_test_support::load_sse_fixture;
use core_test_support::moment_event;
use core_test_support::round_snapshots;
use core_test_support::test_config;
use core_test_support::wait_for;
use pretty_assertions::assert_eq;
use replaycast_core::NameCache;
use replaycast_core::NarrationStatus;
use replaycast_core::PlaybackState;
use replaycast_core::ReplaySession;
use replaycast_core::protocol::FinalState;
use replaycast_core::protocol::RoundContext;
use replaycast_core::protocol::Side;
use serde_json::json;

fn session_over(n: usize, transport: Arc<ScriptedTransport>) -> ReplaySession {
    let snapshots = round_snapshots(n);
    let names = NameCache::from_snapshots(&snapshots);
    ReplaySession::new(snapshots, &names, transport, Arc::new(test_config()))
}

fn round() -> RoundContext {
    RoundContext {
        map_name: "bind".to_string(),
        attack_team: "Sentinels".to_string(),
        defense_team: "Fnatic".to_string(),
    }
}

#[tokio::test]
async fn three_moments_over_five_snapshots_pads_the_tail() {
    init_tracing();
    let transport = ScriptedTransport::new();
    transport.push_body(load_sse_fixture("fixtures/narration_three_moments.json"));
    let session = session_over(5, transport.clone());

    session.build(FinalState::default(), round()).unwrap();
    let mut frames = session.subscribe();
    let frame = wait_for(&mut frames, |f| f.narration_status == NarrationStatus::Ready).await;

    assert_eq!(5, frame.moment_count);
    let moments = session.moments();
    assert_eq!(moments[2].narration, moments[3].narration);
    assert_eq!(moments[2].narration, moments[4].narration);
    assert!(moments[3].what_if_questions.is_empty());
    assert!(moments[4].what_if_questions.is_empty());
    assert_eq!(2, moments[2].what_if_questions.len());

    let requests = transport.requests();
    assert_eq!(1, requests.len());
    let (endpoint, body) = &requests[0];
    assert_eq!(&test_config().narration_url, endpoint);
    assert_eq!(json!("bind"), body["map_name"]);
    assert_eq!(5, body["snapshots"].as_array().map_or(0, Vec::len));
}

#[tokio::test]
async fn seven_moments_over_five_snapshots_truncates() {
    let transport = ScriptedTransport::new();
    let mut events: Vec<_> = (0..7).map(|i| moment_event(i, &format!("beat {i}"))).collect();
    events.push(json!({"type": "done"}));
    transport.push_body(core_test_support::sse_body(&events));
    let session = session_over(5, transport);

    session.build(FinalState::default(), round()).unwrap();
    let mut frames = session.subscribe();
    wait_for(&mut frames, |f| f.narration_status == NarrationStatus::Ready).await;

    let narration: Vec<String> = session.moments().into_iter().map(|m| m.narration).collect();
    assert_eq!(
        vec!["beat 0", "beat 1", "beat 2", "beat 3", "beat 4"],
        narration
    );
}

#[tokio::test]
async fn moments_are_visible_while_the_stream_is_open() {
    let transport = ScriptedTransport::new();
    let script = transport.script();
    let session = session_over(4, transport);

    session.build(FinalState::default(), round()).unwrap();
    script.send(&moment_event(0, "p1 takes space"));

    let mut frames = session.subscribe();
    let frame = wait_for(&mut frames, |f| f.moment_count == 1).await;
    assert_eq!(NarrationStatus::Loading, frame.narration_status);
    assert_eq!(PlaybackState::Loading, frame.playback_state);
    assert_eq!(Some("Jett takes space".to_string()), frame.narration);
    assert!(frame.camera_target.is_some());
}

#[tokio::test]
async fn seek_while_loading_keeps_index_after_done() {
    let transport = ScriptedTransport::new();
    let script = transport.script();
    let session = session_over(5, transport);

    session.build(FinalState::default(), round()).unwrap();
    assert_eq!(4, session.seek(4).unwrap());
    script.send(&moment_event(0, "opening"));
    script.send(&json!({"type": "done"}));

    let mut frames = session.subscribe();
    let frame = wait_for(&mut frames, |f| f.narration_status == NarrationStatus::Ready).await;
    assert_eq!(4, frame.active_index);
    // Padded moments keep the index of the moment they were cloned from.
    assert_eq!(Some(0), frame.moment.as_ref().map(|m| m.moment_index));
    assert_eq!(Some("opening".to_string()), frame.narration);
    assert_eq!(PlaybackState::Ready, frame.playback_state);
}

#[tokio::test]
async fn mid_stream_error_keeps_partial_narration() {
    let transport = ScriptedTransport::new();
    let script = transport.script();
    let session = session_over(5, transport);

    session.build(FinalState::default(), round()).unwrap();
    script.send(&moment_event(0, "first"));
    script.send(&moment_event(1, "second"));
    script.send(&json!({"type": "error", "message": "narrator unavailable"}));

    let mut frames = session.subscribe();
    let frame = wait_for(&mut frames, |f| f.narration_status == NarrationStatus::Failed).await;
    assert_eq!(2, frame.moment_count);
    assert_eq!(Some("narrator unavailable".to_string()), frame.narration_error);
    assert_eq!(PlaybackState::Ready, frame.playback_state);

    // Still playable over the partial list.
    assert_eq!(1, session.seek(1).unwrap());
    assert_eq!(Some("second".to_string()), session.frame().narration);
}

#[tokio::test]
async fn rebuild_after_failure_starts_fresh() {
    let transport = ScriptedTransport::new();
    let first = transport.script();
    let session = session_over(3, transport.clone());

    session.build(FinalState::default(), round()).unwrap();
    first.send(&moment_event(0, "stale"));
    first.fail(replaycast_core::ReplayError::Transport("connection reset".to_string()));
    let mut frames = session.subscribe();
    wait_for(&mut frames, |f| f.narration_status == NarrationStatus::Failed).await;

    let second = transport.script();
    session
        .build(
            FinalState {
                winner: Some(Side::Attack),
                ..FinalState::default()
            },
            round(),
        )
        .unwrap();
    second.send(&moment_event(0, "fresh"));
    second.send(&json!({"type": "done"}));

    let frame = wait_for(&mut frames, |f| f.narration_status == NarrationStatus::Ready).await;
    assert_eq!(Some("fresh".to_string()), frame.narration);
    assert_eq!(None, frame.narration_error);

    let requests = transport.wait_for_requests(2).await;
    assert_eq!(json!("attack"), requests[1].1["final_state"]["winner"]);
}
