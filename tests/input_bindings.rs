use kestrel_script_host::config::HostConfig;
use kestrel_script_host::ecs::Transform;
use kestrel_script_host::input::{InputEvent, KeyTable};
use kestrel_script_host::scripts::ScriptHost;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn custom_key_names_extend_the_defaults() {
    let mut temp = NamedTempFile::new().expect("temp key table");
    write!(temp, r#"{{"keys":{{"jump":57,"up":17}}}}"#).expect("write key table");

    let mut host = ScriptHost::with_config(HostConfig {
        key_bindings: Some(temp.path().to_path_buf()),
        deterministic_seed: Some(0),
        ..HostConfig::default()
    });
    host.register_behaviour(
        "jumper",
        r#"
            fn update(ctx, elapsed) {
                let kb = ctx.keyboard;
                ctx.logger.out(`${kb.getKey("JUMP")} ${kb.getKey("Up")} ${kb.isDown("jump")}`);
            }
        "#,
    )
    .unwrap();
    let entity = host.spawn_root("jumper", Transform::default());
    host.attach(entity, "jumper").unwrap();

    let mut input = host.input_state();
    input.push(InputEvent::Key { code: 57, pressed: true });
    host.frame(16.0, input.snapshot());
    let logs: Vec<_> = host.take_logs().into_iter().map(|log| log.message).collect();
    assert_eq!(logs, vec!["57 17 true"], "remapped UP overrides the default code");
}

#[test]
fn missing_key_table_keeps_default_names() {
    let mut host = ScriptHost::with_config(HostConfig {
        key_bindings: Some("does/not/exist/keys.json".into()),
        ..HostConfig::default()
    });
    host.register_behaviour("keys", r#"fn code(ctx, name) { ctx.keyboard.getKey(name) }"#).unwrap();
    let entity = host.spawn_root("keys", Transform::default());
    host.attach(entity, "keys").unwrap();

    let space = host.call_func(entity, "code", vec!["SPACE".into()]).unwrap();
    assert_eq!(space.as_int().ok(), Some(57));
    let err = host.call_func(entity, "code", vec!["JUMP".into()]).unwrap_err();
    assert_eq!(err.kind(), "UnknownKey");
    assert_eq!(host.input_state().keys(), &KeyTable::default());
}
