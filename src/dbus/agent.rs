//! Mainloop integration for the D-Bus connection.
//!
//! Mirrors the connection watch descriptor into the reactor fd sets and
//! drives message dispatch after each wait.

use std::time::Duration;

use crate::dbus::connection::DBusConnection;
use crate::mainloop::{MainloopContext, MainloopProcessor};

pub struct DBusAgent {
    connection: DBusConnection,
}

impl DBusAgent {
    pub fn new(connection: DBusConnection) -> Self {
        DBusAgent { connection }
    }

    pub fn connection(&self) -> &DBusConnection {
        &self.connection
    }
}

impl MainloopProcessor for DBusAgent {
    fn update(&mut self, context: &mut MainloopContext) {
        context.add_fd_to_read_set(self.connection.watch_fd());
        if self.connection.has_incoming() {
            context.set_timeout_if_earlier(Duration::from_millis(0));
        }
    }

    fn process(&mut self, context: &MainloopContext) {
        if context.is_fd_readable(self.connection.watch_fd()) {
            self.connection.drain_watch_fd();
        }
        while self.connection.dispatch() {}
    }
}
