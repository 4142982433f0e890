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

//! Event Emitter (C8): translates state transitions into structured
//! lifecycle events (spec §4.8/§6). The event-bus transport itself is an
//! external collaborator (spec §1), so this module only defines the
//! [`EventSink`] trait and a channel-backed default implementation
//! (SPEC_FULL §4 supplement) -- wiring a receiver to a real bus is left to
//! the embedder.

use crate::transfer::record::TransferRecord;
use log::{log, Level};
use serde::Serialize;
use std::sync::mpsc::{Receiver, Sender};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Started,
    Paused,
    Resumed,
    Completed,
    Failed,
    Cancelled,
    Deleted,
}

impl Operation {
    /// Event levels per spec §4.8: info for started/paused/resumed/
    /// completed/deleted, warn for cancelled, error for failed.
    pub fn level(self) -> Level {
        match self {
            Operation::Cancelled => Level::Warn,
            Operation::Failed => Level::Error,
            _ => Level::Info,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LifecycleEvent {
    pub transfer_id: Uuid,
    pub operation: Operation,
    pub transfer_info: TransferRecord,
}

impl LifecycleEvent {
    pub fn new(operation: Operation, record: &TransferRecord) -> Self {
        Self {
            transfer_id: record.id,
            operation,
            transfer_info: record.clone(),
        }
    }

    fn duration_seconds(&self) -> Option<i64> {
        let started = self.transfer_info.started_at?;
        let completed = self.transfer_info.completed_at?;
        Some((completed - started).num_seconds())
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: LifecycleEvent);
}

/// Default [`EventSink`]: forwards events over an `mpsc` channel and also
/// logs them with the same correlation fields (component/action/
/// transfer_id/status/duration_seconds) carried in the event payload, per
/// spec §4.8/§6.
pub struct ChannelSink {
    sender: Sender<LifecycleEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<LifecycleEvent>) {
        let (sender, receiver) = std::sync::mpsc::channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: LifecycleEvent) {
        let level = event.operation.level();
        let duration = event.duration_seconds();
        log!(
            level,
            component = "zfs-transfer",
            action:? = event.operation,
            transfer_id:% = event.transfer_id,
            status:? = event.transfer_info.status,
            duration_seconds:? = duration;
            "transfer {} {:?}",
            event.transfer_id,
            event.operation
        );
        // A send error only happens once every receiver has been dropped,
        // which an embedder that never wired a receiver will trigger on
        // every event; that's a valid configuration, not a bug.
        let _ = self.sender.send(event);
    }
}
