//! Cross-cutting invariants that aren't tied to one end-to-end scenario.

mod support;

use std::sync::Arc;

use grouprules::dispatcher::{DispatcherConfig, EventDispatcher, InMemoryRuleRepository, RuleRecord};
use grouprules::{parse_rule, precompile, print_rule, DefaultResolver, EventContext, EventTag, Outcome, PersistentStore};

use support::{fakes, message, message_event, reply_chain};

/// Every syntactically valid rule both precompiles cleanly and, once parsed,
/// prints back to a canonical form that reparses to an AST with the same
/// triggers, guard and body (ignoring source positions, which necessarily
/// differ once the text has been reformatted).
#[test]
fn precompile_round_trips_every_valid_source() {
    let sources = [
        r#"WHEN message THEN { reply("hi"); } END"#,
        r#"WHEN command or message WHERE user.is_admin THEN { stop(); } END"#,
        r#"WHEN schedule("0 0 * * * *") THEN { send_message("tick"); } END"#,
        r#"WHEN schedule("0 0 * * * \"x\"") THEN { reply("hi"); } END"#,
    ];
    for source in sources {
        let (ok, message) = precompile(source);
        assert!(ok, "expected {source:?} to parse, got {message:?}");
        assert!(message.is_none());

        let original = parse_rule(source).unwrap();
        let printed = print_rule(&original);
        let reparsed = parse_rule(&printed).unwrap_or_else(|e| panic!("printed form {printed:?} failed to reparse: {e}"));
        assert!(
            original.same_shape(&reparsed),
            "round-trip mismatch for {source:?}\nprinted: {printed}"
        );
    }
}

#[tokio::test]
async fn evaluator_is_deterministic_given_the_same_inputs() {
    let fx = fakes();
    let source = r#"WHEN message WHERE message.text contains "hello" THEN { reply("hi"); } END"#;
    let rule = grouprules::parse_rule(source).unwrap();

    for _ in 0..3 {
        let msg = message(1, 1, 1, Some("say hello there"));
        let mut ctx = EventContext::new(
            message_event(EventTag::Message, 1, msg),
            Arc::clone(&fx.platform) as Arc<dyn grouprules::PlatformClient>,
            Arc::clone(&fx.store) as Arc<dyn grouprules::PersistentStore>,
            Arc::clone(&fx.stats) as Arc<dyn grouprules::store::StatisticsStore>,
        );
        let outcome = grouprules::executor::execute(&rule, &DefaultResolver, &mut ctx).await;
        assert_eq!(outcome, Outcome::Completed);
    }
    assert_eq!(fx.platform.calls().len(), 3);
}

#[tokio::test]
async fn reload_rules_is_idempotent() {
    let repo = Arc::new(InMemoryRuleRepository::new());
    repo.seed(
        1,
        RuleRecord {
            id: 1,
            source: r#"WHEN message THEN { reply("hi"); } END"#.to_string(),
            priority: 0,
            active: true,
        },
    );
    let fx = fakes();
    let dispatcher = EventDispatcher::new(
        DispatcherConfig::default(),
        repo,
        Arc::new(DefaultResolver),
        Arc::clone(&fx.platform) as Arc<dyn grouprules::PlatformClient>,
        Arc::clone(&fx.store) as Arc<dyn grouprules::PersistentStore>,
        Arc::clone(&fx.stats) as Arc<dyn grouprules::store::StatisticsStore>,
    );

    let first = dispatcher.rules_for(1, &EventTag::Message).await.unwrap();
    dispatcher.invalidate(1);
    let second = dispatcher.rules_for(1, &EventTag::Message).await.unwrap();
    dispatcher.invalidate(1);
    let third = dispatcher.rules_for(1, &EventTag::Message).await.unwrap();

    assert_eq!(first.len(), second.len());
    assert_eq!(second.len(), third.len());
    assert_eq!(first[0].source_hash, third[0].source_hash);
}

/// `user.is_admin` must trigger at most one `get_chat_member` call per event
/// even when the guard and the body both read it.
#[tokio::test]
async fn is_admin_is_memoized_per_event() {
    let fx = fakes();
    fx.platform.seed_admin(1, 1);
    let source = r#"WHEN message WHERE user.is_admin THEN {
        if (user.is_admin) { reply("admin twice"); }
    } END"#;
    let rule = grouprules::parse_rule(source).unwrap();
    let msg = message(1, 1, 1, Some("hi"));
    let mut ctx = EventContext::new(
        message_event(EventTag::Message, 1, msg),
        Arc::clone(&fx.platform) as Arc<dyn grouprules::PlatformClient>,
        Arc::clone(&fx.store) as Arc<dyn grouprules::PersistentStore>,
        Arc::clone(&fx.stats) as Arc<dyn grouprules::store::StatisticsStore>,
    );
    grouprules::executor::execute(&rule, &DefaultResolver, &mut ctx).await;

    let get_chat_member_calls = fx
        .platform
        .calls()
        .into_iter()
        .filter(|c| matches!(c, grouprules::platform::RecordedCall::GetChatMember(..)))
        .count();
    assert_eq!(get_chat_member_calls, 1);
}

#[tokio::test]
async fn target_disambiguation_prefers_reply_then_falls_back_to_triggering_user() {
    let fx = fakes();
    let source = r#"WHEN message THEN { mute_user(); } END"#;

    // Reply present: target is the replied-to author, not the triggering user.
    let replied = message(1, 1, 42, Some("original"));
    let msg = reply_chain(message(2, 1, 1, Some("reply")), replied);
    let rule = grouprules::parse_rule(source).unwrap();
    let mut ctx = EventContext::new(
        message_event(EventTag::Message, 1, msg),
        Arc::clone(&fx.platform) as Arc<dyn grouprules::PlatformClient>,
        Arc::clone(&fx.store) as Arc<dyn grouprules::PersistentStore>,
        Arc::clone(&fx.stats) as Arc<dyn grouprules::store::StatisticsStore>,
    );
    grouprules::executor::execute(&rule, &DefaultResolver, &mut ctx).await;
    assert_eq!(
        fx.platform.calls(),
        vec![grouprules::platform::RecordedCall::Restrict(1, 42, None)]
    );

    // No reply: target falls back to the triggering user.
    let fx2 = fakes();
    let msg2 = message(3, 1, 9, Some("no reply here"));
    let mut ctx2 = EventContext::new(
        message_event(EventTag::Message, 1, msg2),
        Arc::clone(&fx2.platform) as Arc<dyn grouprules::PlatformClient>,
        Arc::clone(&fx2.store) as Arc<dyn grouprules::PersistentStore>,
        Arc::clone(&fx2.stats) as Arc<dyn grouprules::store::StatisticsStore>,
    );
    grouprules::executor::execute(&rule, &DefaultResolver, &mut ctx2).await;
    assert_eq!(
        fx2.platform.calls(),
        vec![grouprules::platform::RecordedCall::Restrict(1, 9, None)]
    );
}

#[tokio::test]
async fn set_var_with_null_deletes_rather_than_stores_null() {
    let fx = fakes();
    fx.store
        .write_var(1, "user", "note", grouprules::Value::str("hi"), Some(5))
        .await
        .unwrap();

    let source = r#"WHEN message THEN { set_var("user.note", null, 5); } END"#;
    let rule = grouprules::parse_rule(source).unwrap();
    let msg = message(1, 1, 1, Some("go"));
    let mut ctx = EventContext::new(
        message_event(EventTag::Message, 1, msg),
        Arc::clone(&fx.platform) as Arc<dyn grouprules::PlatformClient>,
        Arc::clone(&fx.store) as Arc<dyn grouprules::PersistentStore>,
        Arc::clone(&fx.stats) as Arc<dyn grouprules::store::StatisticsStore>,
    );
    grouprules::executor::execute(&rule, &DefaultResolver, &mut ctx).await;

    assert_eq!(fx.store.read_var(1, "user", "note", Some(5)).await.unwrap(), None);
}

#[tokio::test]
async fn shutdown_drains_inflight_work_and_stops_accepting_new_events() {
    let repo = Arc::new(InMemoryRuleRepository::new());
    repo.seed(
        1,
        RuleRecord {
            id: 1,
            source: r#"WHEN message THEN { reply("hi"); } END"#.to_string(),
            priority: 0,
            active: true,
        },
    );
    let fx = fakes();
    let dispatcher = EventDispatcher::new(
        DispatcherConfig::default(),
        repo,
        Arc::new(DefaultResolver),
        Arc::clone(&fx.platform) as Arc<dyn grouprules::PlatformClient>,
        Arc::clone(&fx.store) as Arc<dyn grouprules::PersistentStore>,
        Arc::clone(&fx.stats) as Arc<dyn grouprules::store::StatisticsStore>,
    );

    let msg = message(1, 1, 1, Some("say hello"));
    Arc::clone(&dispatcher).spawn_event(message_event(EventTag::Message, 1, msg));

    dispatcher.shutdown(std::time::Duration::from_secs(1)).await;
    assert_eq!(fx.platform.calls().len(), 1);

    // The dispatcher no longer accepts new work after shutdown.
    let msg2 = message(2, 1, 1, Some("say hello again"));
    Arc::clone(&dispatcher).spawn_event(message_event(EventTag::Message, 1, msg2));
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(fx.platform.calls().len(), 1);
}
