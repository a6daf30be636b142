use kestrel_script_host::config::HostConfig;
use kestrel_script_host::ecs::Transform;
use kestrel_script_host::events::HostEvent;
use kestrel_script_host::input::InputSnapshot;
use kestrel_script_host::scripts::ScriptHost;
use kestrel_script_host::ScriptError;
use rhai::Dynamic;

const HEALTH: &str = r#"
    fn initial_state() { #{ health: 100 } }
    fn damage(ctx, amount) {
        let state = ctx.state;
        state["health"] -= amount;
        state["health"]
    }
"#;

const ATTACKER: &str = r#"
    fn update(ctx, elapsed) {
        let child = ctx.entity.tree().getChild("child");
        let left = child.scripts().callFunc("damage", 5);
        ctx.logger.out(`left ${left}`);
    }
"#;

// a.pong -> b.ping -> a.pong -> ... until `n` reaches `stop`.
const PONG: &str = r#"
    fn pong(ctx, n, stop) {
        let state = ctx.state;
        state["calls"] = state.get("calls", 0) + 1;
        if n >= stop { return n; }
        ctx.entity.tree().getChild("b").scripts().callFunc("ping", n + 1, stop)
    }
"#;

const PING: &str = r#"
    fn ping(ctx, n, stop) {
        let parent = ctx.entity.tree().parent();
        parent.scripts().callFunc("pong", n + 1, stop)
    }
"#;

fn host_with_depth(depth: usize) -> ScriptHost {
    ScriptHost::with_config(HostConfig {
        max_dispatch_depth: depth,
        deterministic_seed: Some(5),
        ..HostConfig::default()
    })
}

fn int(value: Dynamic) -> i64 {
    value.as_int().expect("integer result")
}

#[test]
fn parent_damages_child_through_dispatch() {
    let mut host = host_with_depth(8);
    host.register_behaviour("health", HEALTH).unwrap();
    host.register_behaviour("attacker", ATTACKER).unwrap();
    let parent = host.spawn_root("parent", Transform::default());
    let child = host.spawn_child(parent, "child", Transform::default()).unwrap();
    host.attach(parent, "attacker").unwrap();
    let health = host.attach(child, "health").unwrap();

    host.load_scene();
    for _ in 0..3 {
        host.frame(16.0, InputSnapshot::default());
    }
    let logs: Vec<_> = host.take_logs().into_iter().map(|log| log.message).collect();
    assert_eq!(logs, vec!["left 95", "left 90", "left 85"]);
    let state = host.state(health).unwrap();
    assert_eq!(state.get("health").and_then(|v| v.as_int().ok()), Some(85));

    let left = host.call_func(child, "damage", vec![Dynamic::from(10_i64)]).unwrap();
    assert_eq!(int(left), 75);
}

#[test]
fn first_exporter_in_attachment_order_answers() {
    let mut host = host_with_depth(8);
    host.register_behaviour("silent", "fn update(ctx, elapsed) { }").unwrap();
    host.register_behaviour("first", r#"fn who(ctx) { "first" }"#).unwrap();
    host.register_behaviour("second", r#"fn who(ctx) { "second" }"#).unwrap();
    let entity = host.spawn_root("e", Transform::default());
    host.attach(entity, "silent").unwrap();
    let first = host.attach(entity, "first").unwrap();
    host.attach(entity, "second").unwrap();

    let who = |host: &mut ScriptHost| {
        host.call_func(entity, "who", Vec::new()).unwrap().into_string().expect("string result")
    };
    assert_eq!(who(&mut host), "first");
    host.detach(first).unwrap();
    assert_eq!(who(&mut host), "second");
}

#[test]
fn dispatch_failures_report_their_kind() {
    let mut host = host_with_depth(8);
    host.register_behaviour("health", HEALTH).unwrap();
    let entity = host.spawn_root("target", Transform::default());
    host.attach(entity, "health").unwrap();

    let err = host.call_func(entity, "heal", vec![Dynamic::from(1_i64)]).unwrap_err();
    assert_eq!(err, ScriptError::NoSuchFunction { entity: "target".to_string(), function: "heal".to_string() });

    let err = host.call_func(entity, "damage", Vec::new()).unwrap_err();
    assert_eq!(err, ScriptError::ArgumentCount { function: "damage".to_string(), expected: 1, given: 0 });

    host.despawn(entity).unwrap();
    let err = host.call_func(entity, "damage", vec![Dynamic::from(1_i64)]).unwrap_err();
    assert_eq!(err.kind(), "InstanceExited");
}

#[test]
fn errors_are_catchable_inside_scripts() {
    let mut host = host_with_depth(8);
    host.register_behaviour("health", HEALTH).unwrap();
    host.register_behaviour(
        "export_checker",
        r#"
            fn update(ctx, elapsed) {
                let tree = ctx.entity.tree();
                try { tree.getChild("ghost"); } catch (err) { ctx.logger.out(err.kind); }
                try { tree.getChild("child").scripts().callFunc("missing"); } catch (err) { ctx.logger.out(err.kind); }
                try { tree.getChild("child").scripts().callFunc("damage", 1, 2); } catch (err) { ctx.logger.out(err.kind); }
                try { ctx.keyboard.getKey("NOPE"); } catch (err) { ctx.logger.out(err.kind); }
                let scripts = tree.getChild("child").scripts();
                ctx.logger.out(`${scripts.has("damage")} ${scripts.has("missing")}`);
            }
        "#,
    )
    .unwrap();
    let parent = host.spawn_root("parent", Transform::default());
    let child = host.spawn_child(parent, "child", Transform::default()).unwrap();
    host.attach(parent, "export_checker").unwrap();
    host.attach(child, "health").unwrap();

    let report = host.frame(16.0, InputSnapshot::default());
    assert_eq!(report.faults, 0);
    let logs: Vec<_> = host.take_logs().into_iter().map(|log| log.message).collect();
    assert_eq!(logs, vec!["NotFound", "NoSuchFunction", "ArgumentCount", "UnknownKey", "true false"]);
}

#[test]
fn callee_errors_propagate_to_the_caller() {
    let mut host = host_with_depth(8);
    host.register_behaviour("fragile", r#"fn poke(ctx) { ctx.keyboard.getKey("NOPE") }"#).unwrap();
    let entity = host.spawn_root("fragile", Transform::default());
    host.attach(entity, "fragile").unwrap();
    let err = host.call_func(entity, "poke", Vec::new()).unwrap_err();
    assert_eq!(err, ScriptError::UnknownKey("NOPE".to_string()));
}

#[test]
fn bounded_reentrant_dispatch_shares_state() {
    let mut host = host_with_depth(4);
    host.register_behaviour("pong", PONG).unwrap();
    host.register_behaviour("ping", PING).unwrap();
    let a = host.spawn_root("a", Transform::default());
    let b = host.spawn_child(a, "b", Transform::default()).unwrap();
    let pong = host.attach(a, "pong").unwrap();
    host.attach(b, "ping").unwrap();

    let result = host.call_func(a, "pong", vec![Dynamic::from(0_i64), Dynamic::from(2_i64)]).unwrap();
    assert_eq!(int(result), 2);
    let calls = host.state(pong).unwrap().get("calls").and_then(|v| v.as_int().ok());
    assert_eq!(calls, Some(2), "the re-entered call sees the same state record");
}

#[test]
fn runaway_dispatch_hits_the_depth_limit() {
    let mut host = host_with_depth(4);
    host.register_behaviour("pong", PONG).unwrap();
    host.register_behaviour("ping", PING).unwrap();
    host.register_behaviour(
        "trigger",
        r#"fn update(ctx, elapsed) { ctx.entity.scripts().callFunc("pong", 0, 1000); }"#,
    )
    .unwrap();
    let a = host.spawn_root("a", Transform::default());
    let b = host.spawn_child(a, "b", Transform::default()).unwrap();
    host.attach(a, "pong").unwrap();
    host.attach(b, "ping").unwrap();

    let err = host.call_func(a, "pong", vec![Dynamic::from(0_i64), Dynamic::from(1000_i64)]).unwrap_err();
    assert_eq!(err.kind(), "DispatchCycle");
    assert_eq!(err, ScriptError::DispatchCycle { function: "pong".to_string(), limit: 4 });

    let ok = host.call_func(a, "pong", vec![Dynamic::from(0_i64), Dynamic::from(2_i64)]).unwrap();
    assert_eq!(int(ok), 2, "depth counter must unwind after a cycle error");

    let trigger = host.attach(a, "trigger").unwrap();
    let report = host.frame(16.0, InputSnapshot::default());
    assert_eq!(report.faults, 1);
    let faults: Vec<_> = host
        .drain_events()
        .into_iter()
        .filter_map(|event| match event {
            HostEvent::ScriptFault { instance, hook, error, .. } => Some((instance, hook, error.kind())),
            _ => None,
        })
        .collect();
    assert_eq!(faults, vec![(trigger, "update".to_string(), "DispatchCycle")]);
}

#[test]
fn runaway_dispatch_stops_at_the_default_depth() {
    let mut host = ScriptHost::with_config(HostConfig::default());
    let limit = HostConfig::default().max_dispatch_depth;
    host.register_behaviour("pong", PONG).unwrap();
    host.register_behaviour("ping", PING).unwrap();
    let a = host.spawn_root("a", Transform::default());
    let b = host.spawn_child(a, "b", Transform::default()).unwrap();
    host.attach(a, "pong").unwrap();
    host.attach(b, "ping").unwrap();

    let err = host.call_func(a, "pong", vec![Dynamic::from(0_i64), Dynamic::from(1000_i64)]).unwrap_err();
    assert_eq!(err, ScriptError::DispatchCycle { function: "pong".to_string(), limit });
}
