use super::*;
use crate::event::{InboundEvent, codes};
use crate::history::TurnRole;
use crate::llm_client::{Completion, MockGenerationService};
use crate::transport::testing::RecordingTransport;
use anyhow::anyhow;
use bytes::Bytes;
use serde_json::json;
use std::time::Duration;

fn asr(text: &str) -> InboundEvent {
    InboundEvent::full_response(
        codes::ASR_RESPONSE,
        json!({ "results": [{ "text": text, "is_interim": false }] }),
    )
}

fn relayed(text: &str) -> InboundEvent {
    InboundEvent::full_response(codes::CHAT_RESPONSE, json!({ "content": text }))
}

fn turn_end() -> InboundEvent {
    InboundEvent::full_response(codes::CHAT_ENDED, json!({}))
}

fn completion(text: &str) -> Result<Completion> {
    Ok(Completion {
        text: text.to_string(),
        total_tokens: None,
    })
}

fn forward_config() -> SessionConfig {
    SessionConfig {
        mode: ResponseMode::Forward,
        role_init_enabled: false,
        ..Default::default()
    }
}

fn build(
    config: SessionConfig,
    generation: Option<MockGenerationService>,
) -> (Arc<Session>, Arc<RecordingTransport>, PlaybackQueue) {
    let transport = Arc::new(RecordingTransport::default());
    let playback = PlaybackQueue::new();
    let generation = generation.map(|mock| Arc::new(mock) as Arc<dyn GenerationService>);
    let session = Session::new(
        config,
        transport.clone(),
        generation,
        playback.clone(),
        Arc::new(PromptSet::default()),
    );
    (session, transport, playback)
}

async fn settle() {
    sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_audio_is_queued_and_cleared() {
    let (session, _transport, playback) = build(forward_config(), None);

    session
        .route(InboundEvent::audio_ack(Bytes::from_static(&[1, 2, 3])))
        .await;
    session
        .route(InboundEvent::audio_ack(Bytes::from_static(&[4, 5])))
        .await;
    assert_eq!(playback.len(), 2);

    session
        .route(InboundEvent::full_response(codes::CLEAR_AUDIO, json!({})))
        .await;
    assert!(playback.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_session_finished_event_stops_the_session() {
    let (session, transport, _) = build(forward_config(), None);
    let handle = tokio::spawn(session.clone().run());
    settle().await;

    session
        .route(InboundEvent::full_response(codes::SESSION_FINISHED, json!({})))
        .await;
    handle.await.unwrap().unwrap();

    assert!(transport.is_closed());
    assert_eq!(session.state().await.phase, Phase::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_server_error_stops_the_session() {
    let config = SessionConfig {
        mode: ResponseMode::Generate,
        ..forward_config()
    };
    let (session, transport, _) = build(config, None);
    let handle = tokio::spawn(session.clone().run());
    settle().await;

    session
        .route(InboundEvent::server_error(45000001, "quota exceeded"))
        .await;
    handle.await.unwrap().unwrap();

    assert!(transport.is_closed());
    assert_eq!(session.state().await.phase, Phase::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_generate_mode_turns_and_fallback() {
    let mut mock = MockGenerationService::new();
    let mut calls = 0;
    mock.expect_complete().returning(move |_| {
        let call = calls;
        calls += 1;
        match call {
            0 => completion("欢迎来到培训课程，我们开始吧。"),
            1 => completion("r1"),
            2 => completion("r2"),
            _ => Err(anyhow!("service unavailable")),
        }
    });
    let config = SessionConfig {
        mode: ResponseMode::Generate,
        ..forward_config()
    };
    let (session, transport, _) = build(config, Some(mock));
    tokio::spawn(session.clone().run());
    settle().await;

    for text in ["u1", "u2", "u3"] {
        session.route(asr(text)).await;
    }
    sleep(Duration::from_secs(1)).await;

    let state = session.state().await;
    assert_eq!(state.phase, Phase::Active);
    assert_eq!(state.round, 3);

    let history = session.history().await;
    let texts: Vec<_> = history.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(texts, ["u1", "r1", "u2", "r2", "u3"]);
    assert_eq!(history[4].role, TurnRole::User);
    assert_eq!(history[4].round, 3);

    assert_eq!(
        transport.utterances(),
        [
            "欢迎来到培训课程，我们开始吧。",
            "r1",
            "r2",
            prompts::GENERATION_FALLBACK,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_generate_mode_intercepts_relayed_replies() {
    let mut mock = MockGenerationService::new();
    mock.expect_complete()
        .times(1)
        .returning(|_| completion("开场白"));
    let config = SessionConfig {
        mode: ResponseMode::Generate,
        ..forward_config()
    };
    let (session, transport, _) = build(config, Some(mock));
    tokio::spawn(session.clone().run());
    settle().await;

    session.route(relayed("remote model says hi")).await;
    session.route(turn_end()).await;
    settle().await;

    assert!(session.history().await.is_empty());
    assert_eq!(transport.utterances(), ["开场白"]);
}

#[tokio::test(start_paused = true)]
async fn test_role_acknowledgement_starts_training() {
    let mut mock = MockGenerationService::new();
    mock.expect_complete()
        .times(1)
        .returning(|_| completion("你是企业培训师，请确认角色。"));
    let config = SessionConfig {
        role_init_enabled: true,
        ..forward_config()
    };
    let (session, transport, _) = build(config, Some(mock));
    tokio::spawn(session.clone().run());
    settle().await;
    assert_eq!(session.state().await.phase, Phase::RoleInit);

    session.route(relayed("好的，我是培训师")).await;
    settle().await;

    let state = session.state().await;
    assert_eq!(state.phase, Phase::Active);
    assert_eq!(state.round, 0);
    assert_eq!(
        transport.utterances(),
        ["你是企业培训师，请确认角色。", prompts::FIRST_QUESTION]
    );
}

#[tokio::test(start_paused = true)]
async fn test_forced_start_after_three_attempts() {
    let config = SessionConfig {
        role_init_enabled: true,
        ..forward_config()
    };
    // No generation service: the role instruction falls back to fixed text.
    let (session, transport, _) = build(config, None);
    tokio::spawn(session.clone().run());
    settle().await;

    session.route(asr("你好")).await;
    session.route(asr("在吗")).await;
    assert_eq!(session.state().await.phase, Phase::RoleInit);
    session.route(asr("开始吧")).await;
    settle().await;

    let state = session.state().await;
    assert_eq!(state.phase, Phase::Active);
    assert_eq!(state.init_attempts, 3);
    assert_eq!(state.round, 0);
    assert!(session.history().await.is_empty());
    assert_eq!(
        transport.utterances(),
        [prompts::ROLE_INIT_FALLBACK, prompts::FORCED_START]
    );
}

#[tokio::test(start_paused = true)]
async fn test_forced_start_after_deadline() {
    let config = SessionConfig {
        role_init_enabled: true,
        ..forward_config()
    };
    let (session, transport, _) = build(config, None);
    tokio::spawn(session.clone().run());

    sleep(Duration::from_secs(17)).await;
    assert_eq!(session.state().await.phase, Phase::RoleInit);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(session.state().await.phase, Phase::Active);
    assert_eq!(
        transport.utterances(),
        [prompts::ROLE_INIT_FALLBACK, prompts::FORCED_START]
    );
}

#[tokio::test(start_paused = true)]
async fn test_forward_turn_end_commits_relayed_reply() {
    let (session, _transport, _) = build(forward_config(), None);
    tokio::spawn(session.clone().run());
    settle().await;

    session.route(asr("先做市场调研")).await;
    session.route(relayed("很好，")).await;
    session.route(relayed("请继续。")).await;
    session.route(turn_end()).await;

    let history = session.history().await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, TurnRole::User);
    assert_eq!(history[0].round, 1);
    assert_eq!(history[1].role, TurnRole::Assistant);
    assert_eq!(history[1].round, 1);
    assert_eq!(history[1].text, "很好，请继续。");
}

#[tokio::test(start_paused = true)]
async fn test_completion_keeps_connection_until_end_command() {
    let config = SessionConfig {
        max_rounds: 2,
        ..forward_config()
    };
    let (session, transport, _) = build(config, None);
    let handle = tokio::spawn(session.clone().run());
    settle().await;

    session.route(asr("答案一")).await;
    session.route(asr("答案二")).await;
    sleep(Duration::from_secs(5)).await;

    let summary = PromptSet::default().forward_summary_request(2);
    let state = session.state().await;
    assert_eq!(state.phase, Phase::Completed);
    assert!(state.training_completed);
    assert!(state.summary_sent);
    assert!(!transport.is_closed());
    assert_eq!(transport.utterances(), [summary.clone()]);

    sleep(Duration::from_secs(30)).await;
    assert!(!transport.is_closed());
    assert_eq!(transport.utterances().len(), 1);

    session.route(asr("再见")).await;
    handle.await.unwrap().unwrap();

    assert!(transport.is_closed());
    assert_eq!(session.state().await.phase, Phase::Disconnected);
    assert_eq!(
        transport.utterances(),
        [summary, prompts::FAREWELL.to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_auto_disconnect_after_grace_period() {
    let config = SessionConfig {
        max_rounds: 2,
        auto_disconnect: true,
        ..forward_config()
    };
    let (session, transport, _) = build(config, None);
    let handle = tokio::spawn(session.clone().run());
    settle().await;

    session.route(asr("答案一")).await;
    session.route(asr("答案二")).await;

    sleep(Duration::from_secs(6)).await;
    assert!(session.state().await.summary_sent);
    assert!(!transport.is_closed());

    sleep(Duration::from_secs(4)).await;
    assert!(transport.is_closed());
    assert!(handle.is_finished());
    assert_eq!(session.state().await.phase, Phase::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_round_counter_never_exceeds_limit() {
    let config = SessionConfig {
        max_rounds: 2,
        ..forward_config()
    };
    let (session, _transport, _) = build(config, None);
    tokio::spawn(session.clone().run());
    settle().await;

    for text in ["一", "二", "三", "四", "五"] {
        session.route(asr(text)).await;
    }
    sleep(Duration::from_secs(10)).await;

    assert_eq!(session.state().await.round, 2);
    assert!(session.history().await.iter().all(|t| t.round <= 2));
}

#[tokio::test(start_paused = true)]
async fn test_disabled_round_control_never_completes() {
    let mut mock = MockGenerationService::new();
    mock.expect_complete()
        .returning(|_| completion("继续讨论这个问题。"));
    let config = SessionConfig {
        mode: ResponseMode::Generate,
        max_rounds: 2,
        enable_round_control: false,
        ..forward_config()
    };
    let (session, transport, _) = build(config, Some(mock));
    tokio::spawn(session.clone().run());
    settle().await;

    for text in ["一", "二", "三"] {
        session.route(asr(text)).await;
    }
    sleep(Duration::from_secs(10)).await;

    let state = session.state().await;
    assert_eq!(state.round, 3);
    assert_eq!(state.phase, Phase::Active);
    assert!(!state.training_completed);
    assert!(!state.summary_sent);
    assert_eq!(transport.utterances().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_end_command_says_farewell_once() {
    let (session, transport, _) = build(forward_config(), None);
    let handle = tokio::spawn(session.clone().run());
    settle().await;

    session.route(asr("再见")).await;
    session.route(asr("结束培训")).await;
    handle.await.unwrap().unwrap();

    assert!(transport.is_closed());
    assert_eq!(transport.utterances(), [prompts::FAREWELL]);
}

#[tokio::test(start_paused = true)]
async fn test_session_failed_event_stops_the_session() {
    let (session, transport, _) = build(forward_config(), None);
    let handle = tokio::spawn(session.clone().run());
    settle().await;

    session
        .route(InboundEvent::full_response(codes::SESSION_FAILED, json!({})))
        .await;
    handle.await.unwrap().unwrap();

    assert!(transport.is_closed());
    assert_eq!(session.state().await.phase, Phase::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_full_turn_queue_drops_utterances() {
    let mut mock = MockGenerationService::new();
    mock.expect_complete()
        .times(5)
        .returning(|_| completion("这个观点很有意思，我们继续。"));
    let config = SessionConfig {
        mode: ResponseMode::Generate,
        ..forward_config()
    };
    let (session, _transport, _) = build(config, Some(mock));
    tokio::spawn(session.clone().run());
    settle().await;

    // The worker cannot run until this task yields, so only the queue's
    // capacity worth of utterances is accepted.
    for text in ["u1", "u2", "u3", "u4", "u5", "u6"] {
        session.route(asr(text)).await;
    }
    sleep(Duration::from_secs(1)).await;

    assert_eq!(session.state().await.round, 4);
    let users: Vec<_> = session
        .history()
        .await
        .into_iter()
        .filter(|t| t.role == TurnRole::User)
        .map(|t| t.text)
        .collect();
    assert_eq!(users, ["u1", "u2", "u3", "u4"]);
}

#[tokio::test(start_paused = true)]
async fn test_relayed_reply_before_first_round_is_discarded() {
    let config = SessionConfig {
        role_init_enabled: true,
        ..forward_config()
    };
    let (session, _transport, _) = build(config, None);
    tokio::spawn(session.clone().run());
    settle().await;

    session.route(relayed("好的，我是培训师")).await;
    session.route(relayed("我们先来聊聊案例背景。")).await;
    session.route(turn_end()).await;

    let state = session.state().await;
    assert_eq!(state.phase, Phase::Active);
    assert_eq!(state.round, 0);
    assert!(session.history().await.is_empty());

    // The discarded text must not leak into the first counted round.
    session.route(asr("先分析市场")).await;
    session.route(turn_end()).await;
    let history = session.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, TurnRole::User);
    assert_eq!(history[0].round, 1);
}

#[tokio::test(start_paused = true)]
async fn test_end_command_during_completion_grace_skips_summary() {
    let config = SessionConfig {
        max_rounds: 2,
        ..forward_config()
    };
    let (session, transport, _) = build(config, None);
    let handle = tokio::spawn(session.clone().run());
    settle().await;

    session.route(asr("答案一")).await;
    session.route(asr("答案二")).await;
    sleep(Duration::from_secs(1)).await;
    let state = session.state().await;
    assert_eq!(state.phase, Phase::Summarizing);
    assert!(!state.summary_sent);

    session.route(asr("再见")).await;
    handle.await.unwrap().unwrap();

    let state = session.state().await;
    assert_eq!(state.phase, Phase::Disconnected);
    assert!(!state.summary_sent);
    assert!(transport.is_closed());
    assert_eq!(transport.utterances(), [prompts::FAREWELL]);
}

#[tokio::test(start_paused = true)]
async fn test_finished_session_releases_its_tasks() {
    let mut mock = MockGenerationService::new();
    mock.expect_complete()
        .returning(|_| completion("欢迎参加今天的培训课程。"));
    let config = SessionConfig {
        mode: ResponseMode::Generate,
        ..forward_config()
    };
    let (session, _transport, _) = build(config, Some(mock));
    let handle = tokio::spawn(session.clone().run());
    settle().await;

    session.route(asr("再见")).await;
    handle.await.unwrap().unwrap();
    sleep(Duration::from_secs(60)).await;

    assert_eq!(Arc::strong_count(&session), 1);
}
