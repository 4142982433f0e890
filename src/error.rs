//  ZFS Replication Supervisor
//  Copyright (C) 2025  Ifaz Kabir

//  This program is free software: you can redistribute it and/or modify
//  it under the terms of the GNU General Public License as published by
//  the Free Software Foundation, either version 3 of the License, or
//  (at your option) any later version.

//  This program is distributed in the hope that it will be useful,
//  but WITHOUT ANY WARRANTY; without even the implied warranty of
//  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//  GNU General Public License for more details.

//  You should have received a copy of the GNU General Public License
//  along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! The error codes surfaced to callers (spec §6), plus the infrastructure
//! failures a long-lived supervisor accumulates (I/O, (de)serialization).

use crate::ssh_cmd::SshAssembleError;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ReplicatorError {
    #[error("transfer {0} not found")]
    TransferNotFound(Uuid),

    #[error("transfer {id} is in state {state:?}, which does not permit this operation")]
    TransferInvalidState { id: Uuid, state: &'static str },

    #[error("failed to pause transfer {id}: {reason}")]
    TransferPauseFailed { id: Uuid, reason: String },

    #[error("failed to resume transfer {id}: {reason}")]
    TransferResumeFailed { id: Uuid, reason: String },

    #[error("failed to stop transfer {id}: {reason}")]
    TransferStopFailed { id: Uuid, reason: String },

    #[error("no receive_resume_token available on target {target}")]
    ZfsDatasetNoReceiveToken { target: String },

    #[error("invalid peering id: {0}")]
    SshKeyPairInvalidPeeringId(String),

    #[error("invalid public key: {0}")]
    SshKeyPairInvalidPublicKey(String),

    #[error("peering key for {0} already exists")]
    SshKeyPairAlreadyExists(String),

    #[error("peering key for {0} not found")]
    SshKeyPairNotFound(String),

    #[error("invalid input: {0}")]
    CommandInvalidInput(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("(de)serialization error: {0}")]
    Serde(#[from] serde_yaml::Error),
}

impl From<SshAssembleError> for ReplicatorError {
    fn from(value: SshAssembleError) -> Self {
        match value {
            SshAssembleError::InvalidInput(msg) => ReplicatorError::CommandInvalidInput(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReplicatorError>;
