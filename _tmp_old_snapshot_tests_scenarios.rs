//! End-to-end scenarios covering full rule dispatch and execution.

mod support;

use std::sync::Arc;

use grouprules::platform::RecordedCall;
use grouprules::{precompile, DefaultResolver, Event, EventContext, EventTag, Outcome, PersistentStore, Value};

use support::{fakes, message, message_event, reply_chain};

async fn run(source: &str, event: Event, fx: &support::Fakes) -> Outcome {
    let rule = grouprules::parse_rule(source).expect("rule parses");
    let mut ctx = EventContext::new(
        event,
        Arc::clone(&fx.platform) as Arc<dyn grouprules::PlatformClient>,
        Arc::clone(&fx.store) as Arc<dyn grouprules::PersistentStore>,
        Arc::clone(&fx.stats) as Arc<dyn grouprules::store::StatisticsStore>,
    );
    grouprules::executor::execute(&rule, &DefaultResolver, &mut ctx).await
}

#[tokio::test]
async fn keyword_reply() {
    let fx = fakes();
    let source = r#"WHEN message WHERE message.text contains "hello" THEN { reply("hi"); } END"#;
    let msg = message(100, 1, 1, Some("say hello there"));
    let outcome = run(source, message_event(EventTag::Message, 1, msg), &fx).await;

    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(fx.platform.calls(), vec![RecordedCall::Reply(100, "hi".to_string())]);
}

#[tokio::test]
async fn three_strike_warning() {
    let fx = fakes();
    fx.store
        .write_var(1, "user", "warnings", Value::Number(2.0), Some(77))
        .await
        .unwrap();
    fx.platform.seed_admin(1, 1);

    let source = r#"WHEN command WHERE command.name == "warn" and user.is_admin THEN {
        t = int(command.arg[0]);
        n = get_var("user.warnings", 0, t) + 1;
        set_var("user.warnings", n, t);
        if (n >= 3) {
            kick_user(t);
            set_var("user.warnings", null, t);
        }
    } END"#;

    let msg = message(200, 1, 1, Some("/warn 77"));
    let outcome = run(source, message_event(EventTag::Command, 1, msg), &fx).await;

    assert_eq!(outcome, Outcome::Completed);
    let calls = fx.platform.calls();
    assert!(calls.contains(&RecordedCall::Kick(1, 77)));
    assert!(!calls.iter().any(|c| matches!(c, RecordedCall::Reply(..))));
    assert_eq!(
        fx.store.read_var(1, "user", "warnings", Some(77)).await.unwrap(),
        None
    );
}

#[tokio::test]
async fn media_group_aggregation() {
    use grouprules::dispatcher::{DispatcherConfig, EventDispatcher, InMemoryRuleRepository, RuleRecord};

    let fx = fakes();
    let repo = Arc::new(InMemoryRuleRepository::new());
    repo.seed(
        1,
        RuleRecord {
            id: 1,
            source: r#"WHEN media_group THEN { reply("got " + str(media_group.message_count)); } END"#.to_string(),
            priority: 0,
            active: true,
        },
    );
    let dispatcher = EventDispatcher::new(
        DispatcherConfig {
            media_group_delay: std::time::Duration::from_millis(50),
        },
        repo,
        Arc::new(DefaultResolver),
        Arc::clone(&fx.platform) as Arc<dyn grouprules::PlatformClient>,
        Arc::clone(&fx.store) as Arc<dyn grouprules::PersistentStore>,
        Arc::clone(&fx.stats) as Arc<dyn grouprules::store::StatisticsStore>,
    );
    dispatcher.spawn_media_group_loop();

    let mut first = message(1, 1, 7, None);
    first.media_group_id = Some("X".to_string());
    let mut second = message(2, 1, 7, None);
    second.media_group_id = Some("X".to_string());

    Arc::clone(&dispatcher).spawn_event(message_event(EventTag::Photo, 1, first));
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    Arc::clone(&dispatcher).spawn_event(message_event(EventTag::Photo, 1, second));

    tokio::time::sleep(std::time::Duration::from_millis(150)).await;

    let calls = fx.platform.calls();
    let replies: Vec<_> = calls
        .iter()
        .filter(|c| matches!(c, RecordedCall::Reply(..)))
        .collect();
    assert_eq!(replies, vec![&RecordedCall::Reply(2, "got 2".to_string())]);
}

#[tokio::test]
async fn short_circuit_guard_skips_null_reply_to() {
    let fx = fakes();
    let source = r#"WHEN message WHERE message.reply_to_message and message.reply_to_message.from_user.id == 42 THEN { delete_message(); } END"#;
    let msg = message(300, 1, 1, Some("anything"));
    let outcome = run(source, message_event(EventTag::Message, 1, msg), &fx).await;

    assert_eq!(outcome, Outcome::Completed);
    assert!(fx.platform.calls().is_empty());
}

#[tokio::test]
async fn short_circuit_guard_fires_when_reply_target_matches() {
    let fx = fakes();
    let source = r#"WHEN message WHERE message.reply_to_message and message.reply_to_message.from_user.id == 42 THEN { delete_message(); } END"#;
    let replied = message(301, 1, 42, Some("original"));
    let msg = reply_chain(message(302, 1, 1, Some("reply")), replied);
    let outcome = run(source, message_event(EventTag::Message, 1, msg), &fx).await;

    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(fx.platform.calls(), vec![RecordedCall::Delete(302)]);
}

#[tokio::test]
async fn foreach_over_string_with_break() {
    let fx = fakes();
    let source = r#"WHEN message THEN {
        i = 0;
        foreach (c in "abcde") {
            if (c == "c") { break; }
            i = i + 1;
        }
        reply(str(i));
    } END"#;
    let msg = message(400, 1, 1, Some("go"));
    let outcome = run(source, message_event(EventTag::Message, 1, msg), &fx).await;

    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(fx.platform.calls(), vec![RecordedCall::Reply(400, "2".to_string())]);
}

#[tokio::test]
async fn parse_error_diagnostic() {
    let (ok, message) = precompile(r#"WHEN message THEN { reply("x") } END"#);
    assert!(!ok);
    let message = message.expect("diagnostic message");
    assert!(message.contains("line 1"));
}


