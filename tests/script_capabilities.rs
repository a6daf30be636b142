use glam::{Vec2, Vec4};
use kestrel_script_host::config::HostConfig;
use kestrel_script_host::ecs::Transform;
use kestrel_script_host::events::HostEvent;
use kestrel_script_host::input::{InputEvent, InputSnapshot};
use kestrel_script_host::scripts::{Lifecycle, ScriptHost};
use serde_json::json;

fn host() -> ScriptHost {
    ScriptHost::with_config(HostConfig { deterministic_seed: Some(3), ..HostConfig::default() })
}

fn messages(host: &mut ScriptHost) -> Vec<String> {
    host.take_logs().into_iter().map(|log| log.message).collect()
}

fn floats(value: rhai::Dynamic) -> Vec<f64> {
    value.into_typed_array::<f64>().expect("array of floats")
}

#[test]
fn transform_operations_accumulate() {
    let mut host = host();
    host.register_behaviour(
        "poser",
        r#"
            fn update(ctx, elapsed) {
                let t = ctx.transform;
                t.translate(1, 2.5);
                t.rotate(0.5);
                t.scale(2, -1);
            }
            fn pose(ctx) {
                let t = ctx.transform;
                [t.x, t.y, t.rotation, t.scale_x, t.scale_y]
            }
        "#,
    )
    .unwrap();
    let entity = host.spawn_root("poser", Transform::default());
    host.attach(entity, "poser").unwrap();

    host.frame(16.0, InputSnapshot::default());
    host.frame(16.0, InputSnapshot::default());
    let pose = floats(host.call_func(entity, "pose", Vec::new()).unwrap());
    assert_eq!(pose, vec![2.0, 5.0, 1.0, 4.0, 1.0]);

    let transform = host.transform(entity).unwrap();
    assert_eq!(transform.translation, Vec2::new(2.0, 5.0));
    assert_eq!(transform.scale, Vec2::new(4.0, 1.0), "negative factors are applied as given");
}

#[test]
fn transform_rejects_non_numbers() {
    let mut host = host();
    host.register_behaviour("bad", r#"fn update(ctx, elapsed) { ctx.transform.translate("left", 0); }"#).unwrap();
    let entity = host.spawn_root("bad", Transform::default());
    host.attach(entity, "bad").unwrap();
    let report = host.frame(16.0, InputSnapshot::default());
    assert_eq!(report.faults, 1);
    assert_eq!(host.last_error().map(|err| err.kind()), Some("Runtime"));
    assert_eq!(host.transform(entity), Some(Transform::default()));
}

#[test]
fn keyboard_reads_the_frame_snapshot() {
    let mut host = host();
    host.register_behaviour(
        "mover",
        r#"
            fn update(ctx, elapsed) {
                let kb = ctx.keyboard;
                if kb.isDown("up") { ctx.transform.translate(0, elapsed); }
                if kb.isKeyPressed(kb.getKey("SPACE")) { ctx.logger.out("jump"); }
            }
        "#,
    )
    .unwrap();
    let entity = host.spawn_root("mover", Transform::default());
    host.attach(entity, "mover").unwrap();

    let mut input = host.input_state();
    input.set_key("UP", true).unwrap();
    host.frame(8.0, input.snapshot());
    input.set_key("UP", false).unwrap();
    input.set_key("space", true).unwrap();
    host.frame(8.0, input.snapshot());

    assert_eq!(host.transform(entity).unwrap().translation, Vec2::new(0.0, 8.0));
    assert_eq!(messages(&mut host), vec!["jump"]);
    assert!(input.set_key("HYPER", true).is_err());
}

#[test]
fn mouse_position_comes_from_cursor_events() {
    let mut host = host();
    host.register_behaviour(
        "pointer",
        "fn update(ctx, elapsed) { ctx.logger.out(ctx.mouse.getX() + ctx.mouse.getY()); }",
    )
    .unwrap();
    let entity = host.spawn_root("pointer", Transform::default());
    host.attach(entity, "pointer").unwrap();

    let mut input = host.input_state();
    input.push(InputEvent::CursorPos { x: 3.5, y: -2.0 });
    host.frame(16.0, input.snapshot());
    assert_eq!(messages(&mut host), vec!["1.5"]);
}

#[test]
fn visibility_events_fire_only_on_change() {
    let mut host = host();
    host.register_behaviour(
        "hider",
        r#"
            fn update(ctx, elapsed) {
                ctx.render.setVisible(false);
                ctx.logger.out(ctx.render.isVisible());
            }
        "#,
    )
    .unwrap();
    let entity = host.spawn_root("hider", Transform::default());
    host.attach(entity, "hider").unwrap();
    host.drain_events();

    for _ in 0..3 {
        host.frame(16.0, InputSnapshot::default());
    }
    let changes: Vec<_> = host
        .drain_events()
        .into_iter()
        .filter(|event| matches!(event, HostEvent::VisibilityChanged { .. }))
        .collect();
    assert_eq!(changes, vec![HostEvent::VisibilityChanged { entity, visible: false }]);
    assert!(!host.is_visible(entity));
    assert_eq!(messages(&mut host), vec!["false", "false", "false"]);

    host.set_visible(entity, true).unwrap();
    assert_eq!(host.drain_events(), vec![HostEvent::VisibilityChanged { entity, visible: true }]);
}

#[test]
fn fields_are_writable_only_by_their_own_entity() {
    let mut host = host();
    host.register_behaviour(
        "owner",
        r#"
            fn update(ctx, elapsed) {
                let own = ctx.entity.fields();
                own.set("score", 10);
                own.set("translation", [4, 5]);
                let child = ctx.entity.tree().getChild("lamp");
                ctx.logger.out(child.fields().get("intensity"));
                try { child.fields().set("intensity", 1.0); } catch (err) { ctx.logger.out(err.kind); }
                try { own.get("nope"); } catch (err) { ctx.logger.out(err.kind); }
                try { own.set("name", "renamed"); } catch (err) { ctx.logger.out(err.kind); }
                ctx.logger.out(`${own.has("score")} ${own.has("visible")} ${own.has("nope")}`);
            }
        "#,
    )
    .unwrap();
    let owner = host.spawn_root("owner", Transform::default());
    let lamp = host.spawn_child(owner, "lamp", Transform::default()).unwrap();
    host.set_field(lamp, "intensity", json!(0.5)).unwrap();
    host.attach(owner, "owner").unwrap();

    let report = host.frame(16.0, InputSnapshot::default());
    assert_eq!(report.faults, 0);
    assert_eq!(messages(&mut host), vec!["0.5", "ReadOnlyField", "UnknownField", "ReadOnlyField", "true true false"]);
    assert_eq!(host.field(owner, "score"), Some(json!(10)));
    assert_eq!(host.field(lamp, "intensity"), Some(json!(0.5)));
    assert_eq!(host.transform(owner).unwrap().translation, Vec2::new(4.0, 5.0));
}

#[test]
fn logger_out_and_print_are_captured_but_bare_print_is_not() {
    let mut host = host();
    host.register_behaviour(
        "chatty",
        r#"
            fn update(ctx, elapsed) {
                print("to the engine log only");
                ctx.logger.out("captured");
                ctx.logger.print("x");
                let logger = ctx.logger;
                logger.print(42);
            }
        "#,
    )
    .unwrap();
    let entity = host.spawn_root("chatty", Transform::default());
    let instance = host.attach(entity, "chatty").unwrap();
    let report = host.frame(16.0, InputSnapshot::default());
    assert_eq!(report.faults, 0);

    let logs = host.take_logs();
    assert_eq!(logs.len(), 3);
    assert!(logs.iter().all(|log| log.entity == "chatty" && log.instance == instance));
    let messages: Vec<_> = logs.iter().map(|log| log.message.as_str()).collect();
    assert_eq!(messages, vec!["captured", "x", "42"]);
}

#[test]
fn instances_can_detach_themselves() {
    let mut host = host();
    host.register_behaviour(
        "once",
        r#"
            fn update(ctx, elapsed) {
                ctx.logger.out("ran");
                ctx.detach();
            }
            fn exit(ctx) { ctx.logger.out("bye"); }
        "#,
    )
    .unwrap();
    let entity = host.spawn_root("once", Transform::default());
    let instance = host.attach(entity, "once").unwrap();
    host.frame(16.0, InputSnapshot::default());
    host.frame(16.0, InputSnapshot::default());

    assert_eq!(messages(&mut host), vec!["ran", "bye"]);
    assert_eq!(host.lifecycle(instance), Some(Lifecycle::Exited));
    assert!(host.contains(entity), "detaching leaves the entity in place");
    assert!(host.instances_on(entity).is_empty());
}

#[test]
fn render_view_composes_world_matrices() {
    let mut host = host();
    let parent = host.spawn_root("parent", Transform::from_parts(Vec2::new(10.0, 0.0), 0.0, Vec2::splat(2.0)));
    let child = host.spawn_child(parent, "child", Transform::from_parts(Vec2::new(1.0, 1.0), 0.0, Vec2::ONE)).unwrap();
    host.set_visible(child, false).unwrap();

    let view = host.render_view();
    assert_eq!(view.len(), 2);
    assert_eq!(view[0].entity, parent);
    assert_eq!(view[1].name, "child");
    assert!(!view[1].visible);
    assert_eq!(view[1].world.w_axis, Vec4::new(12.0, 2.0, 0.0, 1.0));
}

#[test]
fn scene_lookups_by_path_root_and_tag() {
    let mut host = host();
    host.register_behaviour(
        "scout",
        r#"
            fn onSceneLoad(ctx) {
                let scene = ctx.scene;
                ctx.logger.out(scene.find("player.camera").name);
                ctx.logger.out(scene.root("crate").name);
                ctx.logger.out(ctx.entity.tree().find("camera.lens").name);
                try { scene.find("player.lens"); } catch (err) { ctx.logger.out(err.kind); }

                ctx.entity.addTag("hero");
                let names = "";
                for enemy in scene.tagged("enemy") { names += "/" + enemy.name; }
                ctx.logger.out(names);
                let top = "";
                for found in scene.query(#{ tags: ["enemy"], top_level_only: true }) { top += "/" + found.name; }
                ctx.logger.out(top);
                let looted = "";
                for found in scene.query(#{ fields: ["loot"] }) { looted += "/" + found.name; }
                ctx.logger.out(looted);

                let other = scene.root("crate");
                ctx.logger.out(`${other.hasTag("enemy")} ${ctx.entity.hasTag("hero")}`);
                try { other.addTag("mine"); } catch (err) { ctx.logger.out(err.kind); }
            }
        "#,
    )
    .unwrap();
    let player = host.spawn_root("player", Transform::default());
    let camera = host.spawn_child(player, "camera", Transform::default()).unwrap();
    host.spawn_child(camera, "lens", Transform::default()).unwrap();
    let crate_box = host.spawn_root("crate", Transform::default());
    let mimic = host.spawn_child(crate_box, "mimic", Transform::default()).unwrap();
    host.add_tag(crate_box, "enemy").unwrap();
    host.add_tag(mimic, "enemy").unwrap();
    host.set_field(mimic, "loot", json!(["gold"])).unwrap();
    host.attach(player, "scout").unwrap();

    let report = host.load_scene();
    assert_eq!(report.faults, 0, "last error: {:?}", host.last_error());
    assert_eq!(
        messages(&mut host),
        vec![
            "camera",
            "crate",
            "lens",
            "NotFound",
            "/crate/mimic",
            "/crate",
            "/mimic",
            "true true",
            "ReadOnlyField",
        ]
    );
    assert_eq!(host.with_scene(|scene| scene.tags(player).to_vec()), vec!["hero"]);
    assert_eq!(host.find_path("player.camera.lens").map(|lens| host.contains(lens)), Ok(true));
}
