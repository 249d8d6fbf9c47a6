//! Tests for command parsing and listener dispatch

use neohub_core::{Command, CommandEvent, CommandListener, CommandListeners, CommandParser};
use parking_lot::Mutex;
use std::sync::Arc;

fn recorder(
    listeners: &CommandListeners,
    prefix: &str,
) -> (Arc<dyn CommandListener>, Arc<Mutex<Vec<CommandEvent>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let listener: Arc<dyn CommandListener> =
        Arc::new(move |cmd: &Command<'_>| sink.lock().push(cmd.to_owned_event()));
    listeners.add(prefix, listener.clone()).unwrap();
    (listener, seen)
}

#[test]
fn test_params_dispatch_in_order_then_sentinel() {
    let listeners = Arc::new(CommandListeners::new());
    let (_listener, seen) = recorder(&listeners, "set");
    let parser = CommandParser::new(listeners);

    let xml = br#"<s2h>
  <command cmdId="5" deviceId="D" type="set">
    <param name="power" index="0">1</param>
    <param name="power" index="1">0</param>
  </command>
</s2h>"#;
    let summary = parser.parse(xml).unwrap();
    assert_eq!(summary.dispatched, 3);
    assert!(!summary.user_is_watching);

    let seen = seen.lock();
    assert_eq!(seen.len(), 3);

    assert_eq!(seen[0].command_id, 5);
    assert_eq!(seen[0].device_id, "D");
    assert_eq!(seen[0].command_type, "set");
    assert_eq!(seen[0].command_name, "power");
    assert_eq!(seen[0].index, Some('0'));
    assert_eq!(seen[0].argument.as_deref(), Some("1"));
    assert!(!seen[0].no_more_commands);

    assert_eq!(seen[1].command_id, 5);
    assert_eq!(seen[1].device_id, "D");
    assert_eq!(seen[1].command_name, "power");
    assert_eq!(seen[1].index, Some('1'));
    assert_eq!(seen[1].argument.as_deref(), Some("0"));

    assert_eq!(seen[2].command_id, -1);
    assert!(seen[2].no_more_commands);
    assert!(seen[2].device_id.is_empty());
    assert!(seen[2].command_name.is_empty());
    assert_eq!(seen[2].argument, None);
}

#[test]
fn test_command_without_params_dispatches_once() {
    let listeners = Arc::new(CommandListeners::new());
    let (_listener, seen) = recorder(&listeners, "dis");
    let parser = CommandParser::new(listeners);

    parser
        .parse(br#"<s2h><command cmdId="9" deviceId="hub" type="discover">now</command></s2h>"#)
        .unwrap();

    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].command_id, 9);
    assert_eq!(seen[0].command_name, "discover");
    assert_eq!(seen[0].argument.as_deref(), Some("now"));
    assert!(seen[1].is_sentinel());
}

#[test]
fn test_fields_reset_between_commands() {
    let listeners = Arc::new(CommandListeners::new());
    let (_listener, seen) = recorder(&listeners, "set");
    let parser = CommandParser::new(listeners);

    let xml = br#"<s2h>
<command cmdId="1" deviceId="A" type="set" name="mode" index="2">heat</command>
<command type="set">off</command>
</s2h>"#;
    parser.parse(xml).unwrap();

    let seen = seen.lock();
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0].command_name, "mode");
    assert_eq!(seen[0].index, Some('2'));
    // second command carries no id or device and falls back to its type for the name
    assert_eq!(seen[1].command_id, -1);
    assert!(seen[1].device_id.is_empty());
    assert_eq!(seen[1].command_name, "set");
    assert_eq!(seen[1].index, None);
    assert_eq!(seen[1].argument.as_deref(), Some("off"));
}

#[test]
fn test_param_overrides_name_but_keeps_command_fields() {
    let listeners = Arc::new(CommandListeners::new());
    let (_listener, seen) = recorder(&listeners, "set");
    let parser = CommandParser::new(listeners);

    parser
        .parse(br#"<s2h><command cmdId="7" deviceId="T" type="set"><param name="heat">68</param><param name="cool">74</param></command></s2h>"#)
        .unwrap();

    let seen = seen.lock();
    assert_eq!(seen[0].command_name, "heat");
    assert_eq!(seen[1].command_name, "cool");
    assert!(seen[..2].iter().all(|c| c.command_id == 7 && c.device_id == "T"));
}

#[test]
fn test_prefix_listener_selection() {
    let listeners = Arc::new(CommandListeners::new());
    let (_listener, seen) = recorder(&listeners, "se");
    let parser = CommandParser::new(listeners);

    for command_type in ["set", "set2", "get"] {
        let xml = format!(
            r#"<s2h><command cmdId="1" deviceId="D" type="{}">1</command></s2h>"#,
            command_type
        );
        parser.parse(xml.as_bytes()).unwrap();
    }

    let seen = seen.lock();
    let types: Vec<_> = seen
        .iter()
        .filter(|c| !c.is_sentinel())
        .map(|c| c.command_type.as_str())
        .collect();
    assert_eq!(types, vec!["set", "set2"]);
}

#[test]
fn test_removed_listener_stops_receiving() {
    let listeners = Arc::new(CommandListeners::new());
    let (listener, seen) = recorder(&listeners, "set");
    let parser = CommandParser::new(listeners.clone());

    assert!(listeners.remove(&listener));
    parser
        .parse(br#"<s2h><command cmdId="1" type="set">1</command></s2h>"#)
        .unwrap();
    assert!(seen.lock().is_empty());
}

#[test]
fn test_malformed_document_stops_dispatch() {
    let listeners = Arc::new(CommandListeners::new());
    let (_listener, seen) = recorder(&listeners, "set");
    let parser = CommandParser::new(listeners);

    let result = parser.parse(br#"<s2h><command cmdId="1" type="set">1</command><command type="set">"#);
    assert!(result.is_err());
    // the first command was complete before the document broke; no sentinel follows
    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert!(!seen[0].is_sentinel());
}
