//! Mapping between error kinds and dotted D-Bus error names.

use crate::error::ErrorKind;

/// Error name a successful operation maps to when a name is demanded.
pub const ERROR_NAME_OK: &str = "io.openthread.Error.OK";

static ERROR_NAME_MAP: &[(ErrorKind, &str)] = &[
    (ErrorKind::Generic, "io.openthread.Error.GenericError"),
    (ErrorKind::InvalidState, "io.openthread.Error.InvalidState"),
    (ErrorKind::InvalidArgs, "io.openthread.Error.InvalidArgs"),
    (ErrorKind::Busy, "io.openthread.Error.Busy"),
    (ErrorKind::Parse, "io.openthread.Error.Parse"),
    (ErrorKind::NoBufs, "io.openthread.Error.NoBufs"),
    (ErrorKind::NotImplemented, "io.openthread.Error.NotImplemented"),
    (ErrorKind::NotFound, "io.openthread.Error.NotFound"),
    (ErrorKind::Abort, "io.openthread.Error.Abort"),
    (ErrorKind::ResponseTimeout, "io.openthread.Error.ResponseTimeout"),
    (ErrorKind::Duplicated, "io.openthread.Error.Duplicated"),
    (ErrorKind::Already, "io.openthread.Error.Already"),
    (ErrorKind::NoAck, "io.openthread.Error.NoAck"),
    (
        ErrorKind::ChannelAccessFailure,
        "io.openthread.Error.ChannelAccessFailure",
    ),
    (ErrorKind::FcsErr, "io.openthread.Error.FcsErr"),
    (ErrorKind::NameConflict, "io.openthread.Error.NameConflict"),
    (ErrorKind::Dbus, "io.openthread.Error.Dbus"),
];

/// Converts an error kind to its D-Bus error name.
pub fn error_name(kind: ErrorKind) -> &'static str {
    ERROR_NAME_MAP
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, name)| *name)
        .unwrap_or("io.openthread.Error.GenericError")
}

/// Converts a D-Bus error name back to an error kind; unknown names map to
/// `Generic`.
pub fn error_kind_from_name(name: &str) -> ErrorKind {
    ERROR_NAME_MAP
        .iter()
        .find(|(_, n)| *n == name)
        .map(|(kind, _)| *kind)
        .unwrap_or(ErrorKind::Generic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_round_trips() {
        for (kind, name) in ERROR_NAME_MAP {
            assert_eq!(error_name(*kind), *name);
            assert_eq!(error_kind_from_name(name), *kind);
        }
    }

    #[test]
    fn test_unknown_name_maps_to_generic() {
        assert_eq!(
            error_kind_from_name("io.openthread.Error.SomethingElse"),
            ErrorKind::Generic
        );
    }
}
