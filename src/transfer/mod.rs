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

//! Transfer State Machine (C7) and its supporting components: config
//! (spec §3), on-disk record store (C4), pipeline assembly, size
//! estimation (C5), initial-send recovery (C6), log truncation, the
//! executor (C7 background worker), and the manager that exposes the
//! Start/Pause/Resume/Stop/Delete/Get/List operations plus shutdown (C9).

mod engine;
mod initial_send;
mod log_truncate;
mod pipeline;
mod size;

pub mod config;
pub mod manager;
pub mod record;
pub mod store;

pub use config::{LogConfig, ReceiveConfig, RemoteConfig, SendConfig, TransferConfig};
pub use manager::{ListFilter, TransferManager};
pub use record::{
    Phase, Sidecars, TransferAction, TransferProgress, TransferRecord, TransferSizeInfo,
    TransferStatus, TransferType,
};
pub use store::TransferStore;
