//! In-process message bus.
//!
//! The bus routes typed [`Message`]s between one client endpoint and the
//! object paths registered by the server side. A self-pipe acts as the
//! connection watch descriptor so pending messages wake the reactor exactly
//! like a socket-backed bus would.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use log::{debug, warn};

use crate::dbus::value::Value;
use crate::error::{Error, ErrorKind, Result};

pub const DBUS_SERVER_PREFIX: &str = "io.openthread.BorderRouter.";
pub const DBUS_OBJECT_PREFIX: &str = "/io/openthread/BorderRouter/";
pub const DBUS_THREAD_INTERFACE: &str = "io.openthread.BorderRouter";

pub const DBUS_PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";
pub const DBUS_PROPERTY_GET_METHOD: &str = "Get";
pub const DBUS_PROPERTY_SET_METHOD: &str = "Set";
pub const DBUS_PROPERTY_GET_ALL_METHOD: &str = "GetAll";
pub const DBUS_PROPERTIES_CHANGED_SIGNAL: &str = "PropertiesChanged";

const ERROR_UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";

#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    MethodCall,
    MethodReturn,
    Error(String),
    Signal,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub kind: MessageKind,
    pub serial: u32,
    /// Serial of the call this message answers; 0 for calls and signals.
    pub reply_serial: u32,
    pub path: String,
    pub interface: String,
    pub member: String,
    pub body: Vec<Value>,
}

impl Message {
    pub fn method_return(call: &Message, body: Vec<Value>) -> Message {
        Message {
            kind: MessageKind::MethodReturn,
            serial: 0,
            reply_serial: call.serial,
            path: call.path.clone(),
            interface: call.interface.clone(),
            member: call.member.clone(),
            body,
        }
    }

    pub fn error(call: &Message, name: &str, text: &str) -> Message {
        Message {
            kind: MessageKind::Error(name.to_owned()),
            serial: 0,
            reply_serial: call.serial,
            path: call.path.clone(),
            interface: call.interface.clone(),
            member: call.member.clone(),
            body: vec![Value::Str(text.to_owned())],
        }
    }

    pub fn signal(path: &str, interface: &str, member: &str, body: Vec<Value>) -> Message {
        Message {
            kind: MessageKind::Signal,
            serial: 0,
            reply_serial: 0,
            path: path.to_owned(),
            interface: interface.to_owned(),
            member: member.to_owned(),
            body,
        }
    }

    pub fn error_name(&self) -> Option<&str> {
        match &self.kind {
            MessageKind::Error(name) => Some(name),
            _ => None,
        }
    }
}

type ObjectHandler = Rc<RefCell<dyn FnMut(DBusConnection, Message)>>;

struct ConnectionInner {
    name: String,
    objects: HashMap<String, ObjectHandler>,
    // Method calls waiting for server-side dispatch.
    incoming: VecDeque<Message>,
    // Replies and signals waiting for the client endpoint.
    outgoing: VecDeque<Message>,
    next_serial: u32,
    wake_read_fd: RawFd,
    wake_write_fd: RawFd,
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.wake_read_fd);
            libc::close(self.wake_write_fd);
        }
    }
}

/// Cloneable handle to the in-process bus.
#[derive(Clone)]
pub struct DBusConnection {
    inner: Rc<RefCell<ConnectionInner>>,
}

impl DBusConnection {
    /// Creates a bus endpoint owning the well-known name
    /// `io.openthread.BorderRouter.<ifname>`.
    pub fn new(interface_name: &str) -> io::Result<Self> {
        let mut fds = [0 as libc::c_int; 2];
        let rval = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        if rval != 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(DBusConnection {
            inner: Rc::new(RefCell::new(ConnectionInner {
                name: format!("{DBUS_SERVER_PREFIX}{interface_name}"),
                objects: HashMap::new(),
                incoming: VecDeque::new(),
                outgoing: VecDeque::new(),
                next_serial: 1,
                wake_read_fd: fds[0],
                wake_write_fd: fds[1],
            })),
        })
    }

    pub fn name(&self) -> String {
        self.inner.borrow().name.clone()
    }

    /// Descriptor that becomes readable whenever a message is queued.
    pub fn watch_fd(&self) -> RawFd {
        self.inner.borrow().wake_read_fd
    }

    pub fn has_incoming(&self) -> bool {
        !self.inner.borrow().incoming.is_empty()
    }

    pub fn register_object_path(
        &self,
        path: &str,
        handler: Rc<RefCell<dyn FnMut(DBusConnection, Message)>>,
    ) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.objects.contains_key(path) {
            return Err(Error::new(
                ErrorKind::Already,
                format!("Object path {path} is already registered"),
            ));
        }
        inner.objects.insert(path.to_owned(), handler);
        Ok(())
    }

    pub fn unregister_object_path(&self, path: &str) {
        self.inner.borrow_mut().objects.remove(path);
    }

    /// Queues an outbound message. Replies and signals land in the client
    /// queue; method calls join the server-side dispatch queue.
    pub fn send(&self, mut message: Message) {
        let mut inner = self.inner.borrow_mut();
        if message.serial == 0 {
            message.serial = inner.next_serial;
            inner.next_serial += 1;
        }
        match message.kind {
            MessageKind::MethodCall => inner.incoming.push_back(message),
            _ => inner.outgoing.push_back(message),
        }
        drop(inner);
        self.wake();
    }

    /// Client entry point: issues a method call, returning its serial for
    /// reply correlation.
    pub fn method_call(
        &self,
        path: &str,
        interface: &str,
        member: &str,
        body: Vec<Value>,
    ) -> u32 {
        let serial = {
            let mut inner = self.inner.borrow_mut();
            let serial = inner.next_serial;
            inner.next_serial += 1;
            inner.incoming.push_back(Message {
                kind: MessageKind::MethodCall,
                serial,
                reply_serial: 0,
                path: path.to_owned(),
                interface: interface.to_owned(),
                member: member.to_owned(),
                body,
            });
            serial
        };
        self.wake();
        serial
    }

    /// Client entry point: removes and returns the reply to `serial`.
    pub fn take_reply(&self, serial: u32) -> Option<Message> {
        let mut inner = self.inner.borrow_mut();
        let position = inner
            .outgoing
            .iter()
            .position(|message| message.reply_serial == serial)?;
        inner.outgoing.remove(position)
    }

    /// Client entry point: removes and returns all queued signals.
    pub fn drain_signals(&self) -> Vec<Message> {
        let mut inner = self.inner.borrow_mut();
        let mut signals = Vec::new();
        let mut remaining = VecDeque::new();
        while let Some(message) = inner.outgoing.pop_front() {
            if message.kind == MessageKind::Signal {
                signals.push(message);
            } else {
                remaining.push_back(message);
            }
        }
        inner.outgoing = remaining;
        signals
    }

    /// Dispatches one pending method call. Returns false when the queue is
    /// empty.
    pub fn dispatch(&self) -> bool {
        let message = match self.inner.borrow_mut().incoming.pop_front() {
            Some(message) => message,
            None => return false,
        };

        let handler = self.inner.borrow().objects.get(&message.path).cloned();
        match handler {
            Some(handler) => {
                debug!(
                    "Dispatching {}.{} on {}",
                    message.interface, message.member, message.path
                );
                // The handler may re-enter the connection to send its reply.
                let mut handler = handler.borrow_mut();
                (&mut *handler)(self.clone(), message);
            }
            None => {
                warn!("No object registered at {}", message.path);
                let reply = Message::error(
                    &message,
                    ERROR_UNKNOWN_METHOD,
                    &format!("Unknown object path {}", message.path),
                );
                self.send(reply);
            }
        }
        true
    }

    pub(crate) fn send_unknown_method(&self, call: &Message) {
        let reply = Message::error(
            call,
            ERROR_UNKNOWN_METHOD,
            &format!("Unknown method {}.{}", call.interface, call.member),
        );
        self.send(reply);
    }

    /// Drains the watch descriptor after the reactor reported it readable.
    pub fn drain_watch_fd(&self) {
        let fd = self.inner.borrow().wake_read_fd;
        let mut buf = [0u8; 64];
        loop {
            let rval =
                unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if rval <= 0 {
                break;
            }
        }
    }

    fn wake(&self) {
        let fd = self.inner.borrow().wake_write_fd;
        let buf = [0u8; 1];
        unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
    }
}
