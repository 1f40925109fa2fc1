use std::time::{Duration, Instant};

use otbr_agent_rs::agent::{AgentConfig, Application};
use otbr_agent_rs::dbus::connection::{
    DBUS_PROPERTIES_INTERFACE, DBUS_PROPERTY_GET_ALL_METHOD, DBUS_PROPERTY_GET_METHOD,
    DBUS_PROPERTY_SET_METHOD, DBUS_THREAD_INTERFACE,
};
use otbr_agent_rs::dbus::{Message, MessageKind, Value};
use otbr_agent_rs::ot::DeviceRole;
use otbr_agent_rs::rcp_host::NetworkProperties;

const OBJECT_PATH: &str = "/io/openthread/BorderRouter/wpan0";

fn new_application() -> Application {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut app = Application::new(AgentConfig {
        interface_name: "wpan0".to_owned(),
        dry_run: true,
        enable_auto_attach: false,
        ..AgentConfig::default()
    })
    .expect("Failed to create application");
    app.init().expect("Failed to initialize application");
    app
}

fn wait_for_reply(app: &mut Application, serial: u32) -> Message {
    let connection = app.dbus_connection();
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        if let Some(reply) = connection.take_reply(serial) {
            return reply;
        }
        assert!(Instant::now() < deadline, "No reply within the deadline");
        app.manager_mut().poll(Duration::from_millis(10)).unwrap();
    }
}

fn get_property(app: &mut Application, name: &str) -> Message {
    let serial = app.dbus_connection().method_call(
        OBJECT_PATH,
        DBUS_PROPERTIES_INTERFACE,
        DBUS_PROPERTY_GET_METHOD,
        vec![
            Value::Str(DBUS_THREAD_INTERFACE.to_owned()),
            Value::Str(name.to_owned()),
        ],
    );
    wait_for_reply(app, serial)
}

#[test]
fn test_ready_signal_emitted_after_init() {
    let app = new_application();
    let signals = app.dbus_connection().drain_signals();
    assert!(signals
        .iter()
        .any(|signal| signal.member == "Ready" && signal.path == OBJECT_PATH));
}

#[test]
fn test_set_thread_enabled_and_device_role_property() {
    let mut app = new_application();

    let serial = app.dbus_connection().method_call(
        OBJECT_PATH,
        DBUS_THREAD_INTERFACE,
        "SetThreadEnabled",
        vec![Value::Bool(true)],
    );
    let reply = wait_for_reply(&mut app, serial);
    assert_eq!(reply.kind, MessageKind::MethodReturn);

    let reply = get_property(&mut app, "DeviceRole");
    assert_eq!(
        reply.body,
        vec![Value::Variant(Box::new(Value::Str("disabled".to_owned())))]
    );
}

#[test]
fn test_scan_returns_results() {
    let mut app = new_application();

    let serial =
        app.dbus_connection()
            .method_call(OBJECT_PATH, DBUS_THREAD_INTERFACE, "Scan", Vec::new());
    let reply = wait_for_reply(&mut app, serial);
    assert_eq!(reply.kind, MessageKind::MethodReturn);

    match &reply.body[0] {
        Value::Array(results) => assert!(!results.is_empty()),
        other => panic!("Unexpected scan reply body: {other:?}"),
    }
}

#[test]
fn test_malformed_method_arguments_yield_parse_error() {
    let mut app = new_application();

    let serial = app.dbus_connection().method_call(
        OBJECT_PATH,
        DBUS_THREAD_INTERFACE,
        "JoinerStart",
        vec![Value::U32(5)],
    );
    let reply = wait_for_reply(&mut app, serial);
    assert_eq!(reply.error_name(), Some("io.openthread.Error.Parse"));
}

#[test]
fn test_attach_brings_device_to_leader_and_signals_role() {
    let mut app = new_application();

    // Drop the signals emitted during startup.
    app.dbus_connection().drain_signals();

    let serial = app.dbus_connection().method_call(
        OBJECT_PATH,
        DBUS_THREAD_INTERFACE,
        "Attach",
        Vec::new(),
    );
    let reply = wait_for_reply(&mut app, serial);
    assert_eq!(reply.kind, MessageKind::MethodReturn);

    let host = app.host();
    assert_eq!(host.borrow().device_role(), DeviceRole::Leader);

    let signals = app.dbus_connection().drain_signals();
    let role_change = signals.iter().any(|signal| {
        signal.member == "PropertiesChanged"
            && signal.body.iter().any(|value| match value {
                Value::Dict(entries) => entries
                    .iter()
                    .any(|(key, _)| key == &Value::Str("DeviceRole".to_owned())),
                _ => false,
            })
    });
    assert!(role_change, "No PropertiesChanged signal for DeviceRole");
}

#[test]
fn test_property_get_all_returns_dictionary() {
    let mut app = new_application();

    let serial = app.dbus_connection().method_call(
        OBJECT_PATH,
        DBUS_PROPERTIES_INTERFACE,
        DBUS_PROPERTY_GET_ALL_METHOD,
        vec![Value::Str(DBUS_THREAD_INTERFACE.to_owned())],
    );
    let reply = wait_for_reply(&mut app, serial);
    assert_eq!(reply.kind, MessageKind::MethodReturn);

    match &reply.body[0] {
        Value::Dict(entries) => {
            assert!(entries
                .iter()
                .any(|(key, _)| key == &Value::Str("OtbrVersion".to_owned())));
        }
        other => panic!("Unexpected GetAll reply body: {other:?}"),
    }
}

#[test]
fn test_radio_region_set_reports_not_implemented() {
    let mut app = new_application();

    let serial = app.dbus_connection().method_call(
        OBJECT_PATH,
        DBUS_PROPERTIES_INTERFACE,
        DBUS_PROPERTY_SET_METHOD,
        vec![
            Value::Str(DBUS_THREAD_INTERFACE.to_owned()),
            Value::Str("RadioRegion".to_owned()),
            Value::Variant(Box::new(Value::Str("AF".to_owned()))),
        ],
    );
    let reply = wait_for_reply(&mut app, serial);
    assert_eq!(
        reply.error_name(),
        Some("io.openthread.Error.NotImplemented")
    );
}

#[test]
fn test_ephemeral_key_mode_round_trip() {
    let mut app = new_application();

    let serial = app.dbus_connection().method_call(
        OBJECT_PATH,
        DBUS_THREAD_INTERFACE,
        "ActivateEphemeralKeyMode",
        vec![Value::U32(0)],
    );
    let reply = wait_for_reply(&mut app, serial);
    assert_eq!(reply.kind, MessageKind::MethodReturn);
    match &reply.body[0] {
        Value::Str(epskc) => {
            assert_eq!(epskc.len(), 9);
            assert!(epskc.bytes().all(|b| b.is_ascii_digit()));
        }
        other => panic!("Unexpected ePSKc reply: {other:?}"),
    }
    assert!(app.udp_proxy().borrow().is_started());

    let reply = get_property(&mut app, "EphemeralKeyEnabled");
    assert_eq!(reply.body, vec![Value::Variant(Box::new(Value::Bool(true)))]);

    let serial = app.dbus_connection().method_call(
        OBJECT_PATH,
        DBUS_THREAD_INTERFACE,
        "DeactivateEphemeralKeyMode",
        Vec::new(),
    );
    let reply = wait_for_reply(&mut app, serial);
    assert_eq!(reply.kind, MessageKind::MethodReturn);
    assert!(!app.udp_proxy().borrow().is_started());

    let reply = get_property(&mut app, "EphemeralKeyEnabled");
    assert_eq!(
        reply.body,
        vec![Value::Variant(Box::new(Value::Bool(false)))]
    );
}

#[test]
fn test_unknown_property_reports_not_found() {
    let mut app = new_application();
    let reply = get_property(&mut app, "NoSuchProperty");
    assert_eq!(reply.error_name(), Some("io.openthread.Error.NotFound"));
}
