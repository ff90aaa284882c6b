use std::sync::Arc;

use core_test_support::ScriptedTransport;
use core_test_support::moment_event;
use core_test_support::round_snapshots;
use core_test_support::test_config;
use core_test_support::wait_for;
use pretty_assertions::assert_eq;
use replaycast_core::ChatBusyPolicy;
use replaycast_core::ChatContextBundle;
use replaycast_core::ChatMessage;
use replaycast_core::ChatRole;
use replaycast_core::ChatSession;
use replaycast_core::EngineConfig;
use replaycast_core::NameCache;
use replaycast_core::NarrationStatus;
use replaycast_core::PlaybackState;
use replaycast_core::ReplayError;
use replaycast_core::ReplaySession;
use replaycast_core::StateError;
use replaycast_core::ToolCall;
use replaycast_core::ToolStatus;
use replaycast_core::error::UNSPECIFIED_PROTOCOL_ERROR;
use replaycast_core::protocol::FinalState;
use replaycast_core::protocol::RoundContext;
use serde_json::json;

fn chat_with(config: EngineConfig, transport: Arc<ScriptedTransport>) -> ChatSession {
    let names = NameCache::from_snapshots(&round_snapshots(1));
    ChatSession::new(transport, Arc::new(config), names.resolver())
}

fn bundle() -> ChatContextBundle {
    ChatContextBundle::new(RoundContext {
        map_name: "haven".to_string(),
        attack_team: "Red".to_string(),
        defense_team: "Blue".to_string(),
    })
}

fn not_streaming(messages: &Vec<ChatMessage>) -> bool {
    messages.last().is_some_and(|m| !m.streaming)
}

#[tokio::test]
async fn streams_text_and_tools_into_the_assistant_message() {
    let transport = ScriptedTransport::new();
    let script = transport.script();
    let chat = chat_with(test_config(), transport.clone());

    let id = chat.send("Why did p1 die?", &bundle()).unwrap();
    let messages = chat.messages();
    assert_eq!(2, messages.len());
    assert_eq!(ChatRole::User, messages[0].role);
    assert_eq!(id, messages[1].id);
    assert!(messages[1].streaming);
    assert_eq!("", messages[1].content);

    script.send(&json!({"type": "tool_start", "name": "get_positions"}));
    script.send(&json!({"type": "text", "content": "p1 was "}));
    script.send(&json!({"type": "tool_start", "tool": "get_economy"}));
    script.send(&json!({"type": "tool_result", "name": "get_positions", "output": {}}));
    script.send(&json!({"type": "text", "content": "flanked by p10."}));
    script.send(&json!({"type": "done", "session_id": "sess-42"}));

    let mut updates = chat.subscribe();
    let display = wait_for(&mut updates, not_streaming).await;
    assert_eq!("Jett was flanked by Cypher.", display[1].content);

    let raw = chat.messages();
    assert_eq!("p1 was flanked by p10.", raw[1].content);
    assert_eq!(2, raw[1].tool_calls.len());
    assert_eq!(
        vec![
            ToolCall {
                name: "get_positions".to_string(),
                status: ToolStatus::Complete,
            },
            ToolCall {
                name: "get_economy".to_string(),
                status: ToolStatus::Pending,
            },
        ],
        raw[1].rendered_tool_calls()
    );
    assert_eq!(Some("sess-42".to_string()), chat.session_id());

    let (endpoint, body) = &transport.requests()[0];
    assert_eq!(&test_config().chat_url, endpoint);
    assert_eq!(json!("Why did p1 die?"), body["message"]);
    assert_eq!(json!("haven"), body["map_context"]);
    assert_eq!(json!("Red (attack) vs Blue (defense)"), body["team_context"]);
    assert_eq!(json!(true), body["use_tools"]);
    assert!(body.get("session_id").is_none());
}

#[tokio::test]
async fn follow_up_carries_the_session_id() {
    let transport = ScriptedTransport::new();
    let first = transport.script();
    let second = transport.script();
    let chat = chat_with(test_config(), transport.clone());
    let mut updates = chat.subscribe();

    chat.send("first", &bundle()).unwrap();
    first.send(&json!({"type": "done", "session_id": "abc"}));
    wait_for(&mut updates, not_streaming).await;

    chat.send("second", &bundle()).unwrap();
    let requests = transport.wait_for_requests(2).await;
    assert_eq!(json!("abc"), requests[1].1["session_id"]);
    drop(second);
}

#[tokio::test]
async fn stop_keeps_partial_text_and_ignores_late_deltas() {
    let transport = ScriptedTransport::new();
    let script = transport.script();
    let chat = chat_with(test_config(), transport);
    let mut updates = chat.subscribe();

    chat.send("tell me", &bundle()).unwrap();
    script.send(&json!({"type": "text", "content": "Hello"}));
    wait_for(&mut updates, |m| m.last().is_some_and(|a| a.content == "Hello")).await;

    assert!(chat.stop());
    assert!(!chat.is_streaming());
    script.send(&json!({"type": "text", "content": " world"}));
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    let messages = chat.messages();
    assert_eq!("Hello", messages[1].content);
    assert!(!messages[1].streaming);
    assert!(!chat.stop());
}

#[tokio::test]
async fn busy_send_is_rejected_by_default() {
    let transport = ScriptedTransport::new();
    let _script = transport.script();
    let chat = chat_with(test_config(), transport);

    chat.send("one", &bundle()).unwrap();
    let err = chat.send("two", &bundle()).unwrap_err();

    assert!(matches!(err, ReplayError::State(StateError::AlreadyStreaming)));
    assert_eq!(2, chat.messages().len());
}

#[tokio::test]
async fn busy_send_can_cancel_the_previous_response() {
    let transport = ScriptedTransport::new();
    let first = transport.script();
    let second = transport.script();
    let config = EngineConfig {
        chat_busy_policy: ChatBusyPolicy::CancelPrevious,
        ..test_config()
    };
    let chat = chat_with(config, transport);
    let mut updates = chat.subscribe();

    chat.send("one", &bundle()).unwrap();
    first.send(&json!({"type": "text", "content": "partial"}));
    wait_for(&mut updates, |m| m.last().is_some_and(|a| a.content == "partial")).await;

    let second_id = chat.send("two", &bundle()).unwrap();
    first.send(&json!({"type": "text", "content": " late"}));
    second.send(&json!({"type": "text", "content": "fresh"}));
    second.send(&json!({"type": "done"}));

    let display = wait_for(&mut updates, |m| {
        m.last().is_some_and(|a| a.id == second_id && !a.streaming)
    })
    .await;
    assert_eq!(4, display.len());
    assert_eq!("partial", display[1].content);
    assert_eq!("fresh", display[3].content);
}

#[tokio::test]
async fn error_event_is_appended_to_partial_text() {
    let transport = ScriptedTransport::new();
    let script = transport.script();
    let chat = chat_with(test_config(), transport);
    let mut updates = chat.subscribe();

    chat.send("q", &bundle()).unwrap();
    script.send(&json!({"type": "text", "content": "Partial answer"}));
    script.send(&json!({"type": "error", "message": "tool crashed"}));

    let display = wait_for(&mut updates, not_streaming).await;
    assert_eq!("Partial answer\n\n**Error:** tool crashed", display[1].content);
    assert!(!chat.is_streaming());
}

#[tokio::test]
async fn bare_error_event_ends_the_response_with_a_message() {
    let transport = ScriptedTransport::new();
    let script = transport.script();
    let chat = chat_with(test_config(), transport);
    let mut updates = chat.subscribe();

    chat.send("q", &bundle()).unwrap();
    script.send(&json!({"type": "text", "content": "Looking"}));
    script.send(&json!({"type": "error"}));
    script.close();

    let display = wait_for(&mut updates, not_streaming).await;
    assert_eq!(
        format!("Looking\n\n**Error:** {UNSPECIFIED_PROTOCOL_ERROR}"),
        display[1].content
    );
}

#[tokio::test]
async fn clear_drops_transcript_and_session() {
    let transport = ScriptedTransport::new();
    let script = transport.script();
    let chat = chat_with(test_config(), transport);
    let mut updates = chat.subscribe();

    chat.send("q", &bundle()).unwrap();
    script.send(&json!({"type": "done", "session_id": "s1"}));
    wait_for(&mut updates, not_streaming).await;

    chat.clear();
    assert!(chat.messages().is_empty());
    assert_eq!(None, chat.session_id());
    assert!(updates.borrow_and_update().is_empty());
}

#[tokio::test]
async fn what_if_pauses_playback_and_sends_current_moment() {
    let transport = ScriptedTransport::new();
    let narration = transport.script();
    let answer = transport.script();
    let snapshots = round_snapshots(3);
    let names = NameCache::from_snapshots(&snapshots);
    let config = Arc::new(test_config());
    let session = ReplaySession::new(snapshots, &names, transport.clone(), Arc::clone(&config));
    let chat = ChatSession::new(transport.clone(), config, names.resolver());

    session
        .build(FinalState::default(), RoundContext::default())
        .unwrap();
    narration.send(&moment_event(0, "p1 opens"));
    narration.send(&moment_event(1, "p2 trades p1"));
    narration.send(&json!({"type": "done"}));
    let mut frames = session.subscribe();
    wait_for(&mut frames, |f| f.narration_status == NarrationStatus::Ready).await;

    session.seek(1).unwrap();
    assert!(session.play().unwrap());
    session.ask_what_if("What if p2 had waited?", &chat).unwrap();
    assert_eq!(PlaybackState::Paused, session.playback_state());

    let requests = transport.wait_for_requests(2).await;
    let context = &requests[1].1["simulation_context"];
    assert_eq!(json!(1), context["current_moment_index"]);
    assert_eq!(json!("Sova trades Jett"), context["current_narration"]);
    assert_eq!(json!("Jett"), context["player_roster"][0]["name"]);
    drop(answer);
}
