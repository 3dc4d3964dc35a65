/*
 * lib.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Lettera, a terminal email client.
 *
 * Lettera is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Lettera is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Lettera.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Mail engine core for the Lettera terminal email client. The terminal
//! renderer sits on top of the [`controller::Controller`] façade and its
//! event channel; everything below it (IMAP and SMTP managers, cache, search
//! index, offline queues) runs on background workers and never blocks the
//! interactive loop.

pub mod addressbook;
pub mod cache;
pub mod config;
pub mod controller;
pub mod maildir;
pub mod manager;
pub mod mime;
pub mod model;
pub mod net;
pub mod protocol;
pub mod queue;
pub mod sasl;
pub mod search;
pub mod sleep;
pub mod status;

pub use config::Config;
pub use controller::{Controller, SortFilter, UiEvent};
pub use model::{Action, Body, Flags, Header, PrefetchLevel, Request, Response, Uid};
