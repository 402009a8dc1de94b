use serde_json::Value;

const TAURI_CONF: &str = include_str!("../tauri.conf.json");
const CAPABILITIES: &str = include_str!("../capabilities/default.json");
const POPUP_PAGE: &str = include_str!("../dist/index.html");
const MAIN_RS: &str = include_str!("../src/main.rs");

fn popup_window() -> Value {
    let conf: Value = serde_json::from_str(TAURI_CONF).expect("tauri.conf.json parses");
    conf["app"]["windows"]
        .as_array()
        .and_then(|windows| windows.iter().find(|w| w["label"] == "popup"))
        .cloned()
        .expect("popup window declared")
}

fn registered_commands() -> Vec<String> {
    let start = MAIN_RS.find("generate_handler![").expect("invoke handler") + "generate_handler![".len();
    let end = start + MAIN_RS[start..].find(']').expect("handler list closes");
    MAIN_RS[start..end]
        .split(',')
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

#[test]
fn popup_is_placed_by_the_tray_not_centered() {
    let popup = popup_window();
    assert_ne!(popup["center"], Value::Bool(true));
    assert_eq!(popup["visible"], Value::Bool(false));
}

#[test]
fn popup_may_use_the_positioner() {
    let caps: Value = serde_json::from_str(CAPABILITIES).expect("capability parses");
    let permissions: Vec<&str> = caps["permissions"]
        .as_array()
        .expect("permission list")
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(permissions.contains(&"positioner:default"));
}

#[test]
fn every_command_is_used_by_the_popup() {
    let commands = registered_commands();
    assert_eq!(commands, ["get_popup_layout", "refresh_usage", "get_app_version"]);
    for command in &commands {
        assert!(
            POPUP_PAGE.contains(&format!("invoke('{}')", command)),
            "{} is never invoked by the popup",
            command
        );
    }
}
