//! D-Bus server surface: typed message bus, generic object framework and the
//! border router object.

pub mod agent;
pub mod connection;
pub mod error;
pub mod object;
pub mod thread_object;
pub mod types;
pub mod value;

pub use agent::DBusAgent;
pub use connection::{DBusConnection, Message, MessageKind, DBUS_THREAD_INTERFACE};
pub use object::{DBusObject, DBusRequest};
pub use thread_object::DBusThreadObject;
pub use value::Value;
