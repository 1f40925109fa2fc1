//! Generic D-Bus object: typed method dispatch and property tables.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::warn;

use crate::dbus::connection::{
    DBusConnection, Message, DBUS_PROPERTIES_CHANGED_SIGNAL, DBUS_PROPERTIES_INTERFACE,
    DBUS_PROPERTY_GET_ALL_METHOD, DBUS_PROPERTY_GET_METHOD, DBUS_PROPERTY_SET_METHOD,
};
use crate::dbus::error::error_name;
use crate::dbus::value::{DecodeArgs, EncodeArgs, Value};
use crate::error::{Error, ErrorKind, Result};

/// One incoming method call. The handler must answer it exactly once through
/// `reply`/`reply_error`; the reply is queued on the connection and flushed
/// by the reactor.
#[derive(Clone)]
pub struct DBusRequest {
    connection: DBusConnection,
    message: Message,
}

impl DBusRequest {
    pub fn new(connection: DBusConnection, message: Message) -> Self {
        DBusRequest {
            connection,
            message,
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn connection(&self) -> &DBusConnection {
        &self.connection
    }

    /// Decodes the call body into a typed tuple.
    pub fn args<T: DecodeArgs>(&self) -> Result<T> {
        T::decode_args(&self.message.body)
    }

    pub fn reply<T: EncodeArgs>(&self, args: T) {
        let reply = Message::method_return(&self.message, args.encode_args());
        self.connection.send(reply);
    }

    pub fn reply_error(&self, error: &Error) {
        let reply = Message::error(&self.message, error_name(error.kind()), error.message());
        self.connection.send(reply);
    }

    /// Replies with an empty tuple on success, a typed error otherwise.
    pub fn reply_result(&self, result: Result<()>) {
        match result {
            Ok(()) => self.reply(()),
            Err(err) => self.reply_error(&err),
        }
    }
}

type MethodHandler = Rc<RefCell<dyn FnMut(DBusRequest)>>;
type GetPropertyHandler = Rc<RefCell<dyn FnMut() -> Result<Value>>>;
type SetPropertyHandler = Rc<RefCell<dyn FnMut(&Value) -> Result<()>>>;

#[derive(Default)]
struct DispatchTables {
    // Keyed by "interface.member".
    methods: HashMap<String, MethodHandler>,
    // Keyed by interface, then property name.
    get_properties: HashMap<String, HashMap<String, GetPropertyHandler>>,
    set_properties: HashMap<String, HashMap<String, SetPropertyHandler>>,
}

// Unregisters the object path once the last object clone goes away; the
// dispatch closure deliberately does not hold this.
struct Registration {
    connection: DBusConnection,
    path: String,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.connection.unregister_object_path(&self.path);
    }
}

/// A D-Bus object bound to one path on a connection.
#[derive(Clone)]
pub struct DBusObject {
    connection: DBusConnection,
    object_path: String,
    tables: Rc<RefCell<DispatchTables>>,
    registration: Rc<RefCell<Option<Registration>>>,
}

impl DBusObject {
    pub fn new(connection: DBusConnection, object_path: impl Into<String>) -> Self {
        DBusObject {
            connection,
            object_path: object_path.into(),
            tables: Rc::new(RefCell::new(DispatchTables::default())),
            registration: Rc::new(RefCell::new(None)),
        }
    }

    pub fn path(&self) -> &str {
        &self.object_path
    }

    pub fn connection(&self) -> &DBusConnection {
        &self.connection
    }

    /// Registers the object path with the connection.
    pub fn init(&self) -> Result<()> {
        let tables = self.tables.clone();
        let handler = Rc::new(RefCell::new(move |connection: DBusConnection, message: Message| {
            dispatch_message(&tables, connection, message);
        }));
        self.connection
            .register_object_path(&self.object_path, handler)?;
        *self.registration.borrow_mut() = Some(Registration {
            connection: self.connection.clone(),
            path: self.object_path.clone(),
        });
        Ok(())
    }

    pub fn register_method(
        &self,
        interface: &str,
        member: &str,
        handler: impl FnMut(DBusRequest) + 'static,
    ) {
        self.tables
            .borrow_mut()
            .methods
            .insert(format!("{interface}.{member}"), Rc::new(RefCell::new(handler)));
    }

    pub fn register_get_property(
        &self,
        interface: &str,
        property: &str,
        handler: impl FnMut() -> Result<Value> + 'static,
    ) {
        self.tables
            .borrow_mut()
            .get_properties
            .entry(interface.to_owned())
            .or_insert_with(HashMap::new)
            .insert(property.to_owned(), Rc::new(RefCell::new(handler)));
    }

    pub fn register_set_property(
        &self,
        interface: &str,
        property: &str,
        handler: impl FnMut(&Value) -> Result<()> + 'static,
    ) {
        self.tables
            .borrow_mut()
            .set_properties
            .entry(interface.to_owned())
            .or_insert_with(HashMap::new)
            .insert(property.to_owned(), Rc::new(RefCell::new(handler)));
    }

    /// Broadcasts a signal from this object's path.
    pub fn signal<T: EncodeArgs>(&self, interface: &str, member: &str, args: T) {
        let message = Message::signal(&self.object_path, interface, member, args.encode_args());
        self.connection.send(message);
    }

    /// Emits the standard `PropertiesChanged` signal with one changed entry
    /// and no invalidated properties.
    pub fn signal_property_changed(&self, interface: &str, property: &str, value: Value) {
        let changed = Value::Dict(vec![(
            Value::Str(property.to_owned()),
            Value::Variant(Box::new(value)),
        )]);
        let invalidated = Value::Array(Vec::new());
        self.signal(
            DBUS_PROPERTIES_INTERFACE,
            DBUS_PROPERTIES_CHANGED_SIGNAL,
            (interface.to_owned(), changed, invalidated),
        );
    }
}

fn dispatch_message(
    tables: &Rc<RefCell<DispatchTables>>,
    connection: DBusConnection,
    message: Message,
) {
    let request = DBusRequest::new(connection.clone(), message);

    if request.message().interface == DBUS_PROPERTIES_INTERFACE {
        match request.message().member.as_str() {
            DBUS_PROPERTY_GET_METHOD => handle_get_property(tables, &request),
            DBUS_PROPERTY_SET_METHOD => handle_set_property(tables, &request),
            DBUS_PROPERTY_GET_ALL_METHOD => handle_get_all_properties(tables, &request),
            _ => connection.send_unknown_method(request.message()),
        }
        return;
    }

    let key = format!(
        "{}.{}",
        request.message().interface,
        request.message().member
    );
    let handler = tables.borrow().methods.get(&key).cloned();
    match handler {
        Some(handler) => {
            let mut handler = handler.borrow_mut();
            (&mut *handler)(request);
        }
        None => connection.send_unknown_method(request.message()),
    }
}

fn handle_get_property(tables: &Rc<RefCell<DispatchTables>>, request: &DBusRequest) {
    let (interface, property): (String, String) = match request.args() {
        Ok(args) => args,
        Err(err) => {
            request.reply_error(&err);
            return;
        }
    };

    let handler = tables
        .borrow()
        .get_properties
        .get(&interface)
        .and_then(|properties| properties.get(&property))
        .cloned();

    match handler {
        Some(handler) => {
            let result = (&mut *handler.borrow_mut())();
            match result {
                Ok(value) => request.reply((Value::Variant(Box::new(value)),)),
                Err(err) => request.reply_error(&err),
            }
        }
        None => request.reply_error(&Error::new(
            ErrorKind::NotFound,
            format!("Property {interface}.{property} not found"),
        )),
    }
}

fn handle_set_property(tables: &Rc<RefCell<DispatchTables>>, request: &DBusRequest) {
    let (interface, property, value): (String, String, Value) = match request.args() {
        Ok(args) => args,
        Err(err) => {
            request.reply_error(&err);
            return;
        }
    };

    let handler = tables
        .borrow()
        .set_properties
        .get(&interface)
        .and_then(|properties| properties.get(&property))
        .cloned();

    match handler {
        Some(handler) => {
            let result = (&mut *handler.borrow_mut())(value.unwrap_variant());
            request.reply_result(result);
        }
        None => request.reply_error(&Error::new(
            ErrorKind::NotFound,
            format!("Property {interface}.{property} not found"),
        )),
    }
}

fn handle_get_all_properties(tables: &Rc<RefCell<DispatchTables>>, request: &DBusRequest) {
    let (interface,): (String,) = match request.args() {
        Ok(args) => args,
        Err(err) => {
            request.reply_error(&err);
            return;
        }
    };

    let handlers: Vec<(String, GetPropertyHandler)> = tables
        .borrow()
        .get_properties
        .get(&interface)
        .map(|properties| {
            properties
                .iter()
                .map(|(name, handler)| (name.clone(), handler.clone()))
                .collect()
        })
        .unwrap_or_default();

    let mut entries = Vec::new();
    for (name, handler) in handlers {
        let result = (&mut *handler.borrow_mut())();
        match result {
            Ok(value) => entries.push((Value::Str(name), Value::Variant(Box::new(value)))),
            // Optional properties report NotFound while unset; GetAll returns
            // the readable remainder.
            Err(err) => warn!("Skipping property {interface}.{name}: {err}"),
        }
    }

    request.reply((Value::Dict(entries),));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbus::connection::{MessageKind, DBUS_THREAD_INTERFACE};

    #[test]
    fn test_method_dispatch_and_reply() {
        let connection = DBusConnection::new("wpan0").unwrap();
        let object = DBusObject::new(connection.clone(), "/io/openthread/BorderRouter/wpan0");
        object.register_method(DBUS_THREAD_INTERFACE, "Echo", |request| {
            let (text,): (String,) = request.args().unwrap();
            request.reply((text,));
        });
        object.init().unwrap();

        let serial = connection.method_call(
            object.path(),
            DBUS_THREAD_INTERFACE,
            "Echo",
            vec![Value::Str("hello".to_owned())],
        );
        assert!(connection.dispatch());

        let reply = connection.take_reply(serial).unwrap();
        assert_eq!(reply.kind, MessageKind::MethodReturn);
        assert_eq!(reply.body, vec![Value::Str("hello".to_owned())]);
    }

    #[test]
    fn test_get_property_wraps_value_in_variant() {
        let connection = DBusConnection::new("wpan0").unwrap();
        let object = DBusObject::new(connection.clone(), "/io/openthread/BorderRouter/wpan0");
        object.register_get_property(DBUS_THREAD_INTERFACE, "DeviceRole", || {
            Ok(Value::Str("leader".to_owned()))
        });
        object.init().unwrap();

        let serial = connection.method_call(
            object.path(),
            DBUS_PROPERTIES_INTERFACE,
            DBUS_PROPERTY_GET_METHOD,
            vec![
                Value::Str(DBUS_THREAD_INTERFACE.to_owned()),
                Value::Str("DeviceRole".to_owned()),
            ],
        );
        assert!(connection.dispatch());

        let reply = connection.take_reply(serial).unwrap();
        assert_eq!(
            reply.body,
            vec![Value::Variant(Box::new(Value::Str("leader".to_owned())))]
        );
    }

    #[test]
    fn test_missing_property_reports_not_found() {
        let connection = DBusConnection::new("wpan0").unwrap();
        let object = DBusObject::new(connection.clone(), "/io/openthread/BorderRouter/wpan0");
        object.init().unwrap();

        let serial = connection.method_call(
            object.path(),
            DBUS_PROPERTIES_INTERFACE,
            DBUS_PROPERTY_GET_METHOD,
            vec![
                Value::Str(DBUS_THREAD_INTERFACE.to_owned()),
                Value::Str("Nope".to_owned()),
            ],
        );
        assert!(connection.dispatch());

        let reply = connection.take_reply(serial).unwrap();
        assert_eq!(reply.error_name(), Some("io.openthread.Error.NotFound"));
    }
}
