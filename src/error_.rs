// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt::{Display, Formatter};
use std::io;

use log::info;
use thiserror::Error;

use crate::value::ValueReceive;

// imports for docs
#[allow(unused)]
use crate::address_::resolution::AddressResolver;

type BoxError = Box<dyn StdError + Send + Sync>;

/// Errors that can occur while using the driver.
///
/// **Important Notes on Usage:**
///  * Error messages are *not* considered part of the driver's API.
///    They may change at any time and don't follow semantic versioning.
///  * The only string in errors that can be somewhat reliably used is
///    [`ServerError::code()`], which is received from the server.
#[derive(Error, Debug)]
pub enum BoltError {
    /// Used when experiencing a connectivity error: not being able to
    /// connect, a broken socket, or not being able to fetch routing
    /// information from any cluster member.
    #[error("connection failed: {message} (during commit: {during_commit}){}",
            source.as_ref().map(|err| format!(" caused by: {err}")).unwrap_or_default())]
    #[non_exhaustive]
    Disconnect {
        message: String,
        source: Option<io::Error>,
        /// Will be true when the connection was lost while the driver cannot
        /// be sure whether the ongoing transaction has been committed or not.
        /// To recover from this situation, business logic is required to
        /// check whether the transaction should or shouldn't be retried.
        during_commit: bool,
    },

    /// Used when a connection to a cluster member was lost or invalidated
    /// mid-operation (e.g., the member stopped being a writer).
    /// It is safe to retry the work on another session.
    #[error("session expired: {message}")]
    #[non_exhaustive]
    SessionExpired { message: String },

    /// Used when the driver encounters an error caused by user input.
    /// For example, an unparsable connection URI, a resolver returning no
    /// addresses, or a TLS misconfiguration.
    #[error("invalid configuration: {message}")]
    #[non_exhaustive]
    InvalidConfig { message: String },

    /// Used when the server returns an error.
    #[error("{error}")]
    #[non_exhaustive]
    ServerError { error: Box<ServerError> },

    /// Used when connection acquisition timed out.
    #[error("{message}")]
    #[non_exhaustive]
    Timeout { message: String },

    /// Used when a user-provided callback failed.
    ///
    /// See [`UserCallbackError`] for more information.
    #[error("{error}")]
    #[non_exhaustive]
    UserCallback { error: UserCallbackError },

    /// An unexpected message or message content was received from the server.
    /// If you encounter this error, there's either a bug in the driver or the
    /// server.
    #[error(
        "the driver encountered a protocol violation, \
        this is likely a bug in the driver or the server: {message}"
    )]
    #[non_exhaustive]
    ProtocolError { message: String },
}

impl BoltError {
    pub fn is_retryable(&self) -> bool {
        match self {
            BoltError::ServerError { error } => error.is_retryable(),
            BoltError::Disconnect { during_commit, .. } => !during_commit,
            BoltError::SessionExpired { .. } => true,
            _ => false,
        }
    }

    pub(crate) fn wrap_read<T>(res: io::Result<T>) -> Result<T> {
        match res {
            Ok(t) => Ok(t),
            Err(err) => Err(Self::read_err(err)),
        }
    }

    pub(crate) fn read_err(err: io::Error) -> Self {
        info!("read error: {err}");
        Self::Disconnect {
            message: String::from("failed to read"),
            source: Some(err),
            during_commit: false,
        }
    }

    pub(crate) fn wrap_write<T>(res: io::Result<T>) -> Result<T> {
        match res {
            Ok(t) => Ok(t),
            Err(err) => Err(Self::write_error(err)),
        }
    }

    pub(crate) fn write_error(err: io::Error) -> BoltError {
        info!("write error: {err}");
        Self::Disconnect {
            message: String::from("failed to write"),
            source: Some(err),
            during_commit: false,
        }
    }

    pub(crate) fn connect_error(err: io::Error) -> BoltError {
        Self::Disconnect {
            message: String::from("failed to open connection"),
            source: Some(err),
            during_commit: false,
        }
    }

    pub(crate) fn wrap_connect<T>(res: io::Result<T>) -> Result<T> {
        match res {
            Ok(t) => Ok(t),
            Err(err) => Err(Self::connect_error(err)),
        }
    }

    pub(crate) fn disconnect<S: Into<String>>(message: S) -> Self {
        Self::Disconnect {
            message: message.into(),
            source: None,
            during_commit: false,
        }
    }

    pub(crate) fn session_expired<S: Into<String>>(message: S) -> Self {
        Self::SessionExpired {
            message: message.into(),
        }
    }

    pub(crate) fn protocol_error<S: Into<String>>(message: S) -> Self {
        Self::ProtocolError {
            message: message.into(),
        }
    }

    pub(crate) fn failed_commit(mut self) -> Self {
        if let Self::Disconnect { during_commit, .. } = &mut self {
            *during_commit = true;
        }
        self
    }

    pub(crate) fn wrap_commit<T>(res: Result<T>) -> Result<T> {
        match res {
            Ok(t) => Ok(t),
            Err(err) => Err(err.failed_commit()),
        }
    }

    pub(crate) fn connection_acquisition_timeout<S: AsRef<str>>(during: S) -> Self {
        Self::Timeout {
            message: format!("connection acquisition timed out while {}", during.as_ref()),
        }
    }

    pub(crate) fn fatal_during_discovery(&self) -> bool {
        match self {
            BoltError::ServerError { error } => error.fatal_during_discovery(),
            BoltError::InvalidConfig { .. } => true,
            BoltError::UserCallback { .. } => true,
            BoltError::ProtocolError { .. } => true,
            _ => false,
        }
    }
}

impl From<ServerError> for BoltError {
    fn from(error: ServerError) -> Self {
        Self::ServerError {
            error: Box::new(error),
        }
    }
}

/// An error returned by the server.
#[derive(Debug)]
#[non_exhaustive]
pub struct ServerError {
    pub code: String,
    pub message: String,
}

const UNKNOWN_ERROR_CODE: &str = "Neo.DatabaseError.General.UnknownError";
const UNKNOWN_ERROR_MESSAGE: &str = "An unknown error occurred.";

impl ServerError {
    fn map_legacy_codes(code: String) -> String {
        match code.as_str() {
            // In 5.0, these errors have been re-classified as ClientError.
            // For backwards compatibility with older servers, we re-map them
            // in the driver, too.
            "Neo.TransientError.Transaction.Terminated" => {
                String::from("Neo.ClientError.Transaction.Terminated")
            }
            "Neo.TransientError.Transaction.LockClientStopped" => {
                String::from("Neo.ClientError.Transaction.LockClientStopped")
            }
            _ => code,
        }
    }

    pub(crate) fn from_meta(mut meta: HashMap<String, ValueReceive>) -> Self {
        let code = match meta.remove("code") {
            Some(ValueReceive::String(code)) => code,
            _ => UNKNOWN_ERROR_CODE.into(),
        };
        let message = match meta.remove("message") {
            Some(ValueReceive::String(message)) => message,
            _ => UNKNOWN_ERROR_MESSAGE.into(),
        };
        Self {
            code: Self::map_legacy_codes(code),
            message,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn classification(&self) -> &str {
        self.code.split('.').nth(1).unwrap_or("")
    }

    pub fn category(&self) -> &str {
        self.code.split('.').nth(2).unwrap_or("")
    }

    pub fn title(&self) -> &str {
        self.code.split('.').nth(3).unwrap_or("")
    }

    pub(crate) fn is_retryable(&self) -> bool {
        match self.code() {
            "Neo.ClientError.Security.AuthorizationExpired" => true,
            _ => self.invalidates_writer() || self.classification() == "TransientError",
        }
    }

    pub(crate) fn fatal_during_discovery(&self) -> bool {
        match self.code() {
            "Neo.ClientError.Database.DatabaseNotFound"
            | "Neo.ClientError.Transaction.InvalidBookmark"
            | "Neo.ClientError.Transaction.InvalidBookmarkMixture"
            | "Neo.ClientError.Statement.TypeError"
            | "Neo.ClientError.Statement.ArgumentError"
            | "Neo.ClientError.Request.Invalid" => true,
            code => {
                code.starts_with("Neo.ClientError.Security.")
                    && code != "Neo.ClientError.Security.AuthorizationExpired"
            }
        }
    }

    pub(crate) fn is_routing_procedure_not_found(&self) -> bool {
        self.code() == "Neo.ClientError.Procedure.ProcedureNotFound"
    }

    pub(crate) fn deactivates_server(&self) -> bool {
        self.code.as_str() == "Neo.TransientError.General.DatabaseUnavailable"
    }

    pub(crate) fn invalidates_writer(&self) -> bool {
        self.classification() == "ClientError"
            && matches!(
                self.title(),
                "NotALeader" | "NotWritable" | "ForbiddenOnReadOnlyDatabase"
            )
    }
}

impl Display for ServerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "server error: {} (code: {})", self.message, self.code)
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UserCallbackError {
    /// The configured [`AddressResolver`] returned an error.
    #[error("resolver callback failed: {0}")]
    Resolver(BoxError),
}

impl UserCallbackError {
    pub fn user_error(&self) -> &dyn StdError {
        match self {
            UserCallbackError::Resolver(err) => err.as_ref(),
        }
    }

    pub fn into_user_error(self) -> BoxError {
        match self {
            UserCallbackError::Resolver(err) => err,
        }
    }
}

pub type Result<T> = std::result::Result<T, BoltError>;

#[cfg(test)]
mod tests {
    use rstest::*;

    use super::*;
    use crate::macros::hash_map;

    fn server_error(code: &str) -> ServerError {
        ServerError {
            code: String::from(code),
            message: String::from("test error"),
        }
    }

    #[rstest]
    #[case("Neo.ClientError.Cluster.NotALeader", true)]
    #[case("Neo.ClientError.Cluster.NotWritable", true)]
    #[case("Neo.ClientError.General.ForbiddenOnReadOnlyDatabase", true)]
    #[case("Neo.TransientError.General.DatabaseUnavailable", false)]
    #[case("Neo.ClientError.Statement.SyntaxError", false)]
    fn test_invalidates_writer(#[case] code: &str, #[case] expected: bool) {
        assert_eq!(server_error(code).invalidates_writer(), expected);
    }

    #[rstest]
    #[case("Neo.TransientError.General.DatabaseUnavailable", true)]
    #[case("Neo.ClientError.Cluster.NotALeader", false)]
    fn test_deactivates_server(#[case] code: &str, #[case] expected: bool) {
        assert_eq!(server_error(code).deactivates_server(), expected);
    }

    #[rstest]
    #[case("Neo.ClientError.Database.DatabaseNotFound", true)]
    #[case("Neo.ClientError.Security.Unauthorized", true)]
    #[case("Neo.ClientError.Security.AuthorizationExpired", false)]
    #[case("Neo.TransientError.General.DatabaseUnavailable", false)]
    fn test_fatal_during_discovery(#[case] code: &str, #[case] expected: bool) {
        assert_eq!(server_error(code).fatal_during_discovery(), expected);
    }

    #[rstest]
    #[case("Neo.TransientError.General.DatabaseUnavailable", true)]
    #[case("Neo.ClientError.Cluster.NotALeader", true)]
    #[case("Neo.TransientError.Transaction.Terminated", false)]
    #[case("Neo.ClientError.Statement.SyntaxError", false)]
    fn test_retryable_server_errors(#[case] code: &str, #[case] expected: bool) {
        let meta = hash_map!(
            String::from("code") => ValueReceive::String(code.into()),
            String::from("message") => ValueReceive::String("msg".into()),
        );
        let error = ServerError::from_meta(meta);
        assert_eq!(error.is_retryable(), expected);
    }

    #[test]
    fn test_session_expired_is_retryable() {
        assert!(BoltError::session_expired("gone").is_retryable());
    }

    #[test]
    fn test_disconnect_during_commit_is_not_retryable() {
        let err = BoltError::disconnect("gone").failed_commit();
        assert!(!err.is_retryable());
    }
}
