// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error taxonomy shared by the server core.
//!
//! Collaborator failures are converted into one of these kinds at the
//! component boundary; nothing below the controller panics or leaks an
//! `anyhow::Error` to a GATT callback.

use thiserror::Error;

use crate::bluetooth::CharacteristicId;
use crate::session::SessionId;

/// Result alias for core operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the server core.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// The radio layer has no free connection slot.
    #[error("connection rejected: {0}")]
    ConnectionRejected(String),

    /// The authorization gate denied a privileged action.
    #[error("central is not authorized")]
    Unauthorized,

    /// A settings write was malformed or out of range.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// An external collaborator did not answer within its deadline.
    #[error("{0} did not respond in time")]
    CollaboratorTimeout(&'static str),

    /// An external collaborator failed before its deadline.
    #[error("{name} failed: {message}")]
    Collaborator { name: &'static str, message: String },

    /// The referenced session does not exist.
    #[error("unknown session {0}")]
    NotFound(SessionId),

    /// The characteristic does not support the requested operation.
    #[error("{0} does not support this operation")]
    NotSupported(CharacteristicId),

    /// A characteristic value could not be decoded.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

impl Error {
    /// Stable machine-readable kind, reported to the bridge.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ConnectionRejected(_) => "connectionRejected",
            Error::Unauthorized => "unauthorized",
            Error::InvalidSettings(_) => "invalidSettings",
            Error::CollaboratorTimeout(_) => "collaboratorTimeout",
            Error::Collaborator { .. } => "collaborator",
            Error::NotFound(_) => "notFound",
            Error::NotSupported(_) => "notSupported",
            Error::InvalidValue(_) => "invalidValue",
        }
    }

    pub(crate) fn collaborator(name: &'static str, err: anyhow::Error) -> Self {
        Error::Collaborator {
            name,
            message: format!("{:#}", err),
        }
    }
}
