/*
 * smtp.rs
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

//! The SMTP manager: message assembly is synchronous (`create_message`),
//! delivery runs on one worker thread so sends serialise. A failed send hands
//! the assembled blob back so the controller can offer draft or outbox.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{info, warn};

use crate::mime::{build_message, parse_header, ComposeFields};
use crate::model::Address;
use crate::protocol::smtp::{SmtpError, SmtpSession, SmtpTls};
use crate::sasl::SaslMechanism;
use crate::status::{flags as status_flags, StatusAggregator, StatusUpdate};

pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub mechanism: SaslMechanism,
    pub tls: SmtpTls,
    pub ehlo_hostname: String,
}

/// One delivery job for the worker.
pub enum SmtpTask {
    /// Assemble from fields, then deliver.
    Send { fields: ComposeFields },
    /// Deliver an already-assembled blob (outbox drain); recipients are taken
    /// from the blob's To/Cc headers.
    SendCreated { blob: Vec<u8> },
}

/// Outcome handed to the result callback.
pub struct SmtpSendOutcome {
    pub ok: bool,
    /// 5xx class failure: retrying is pointless, offer saving as draft.
    pub permanent: bool,
    /// The assembled wire message (valid for both outcomes).
    pub blob: Vec<u8>,
    /// Sender address, for the address book's From multiset on success.
    pub from: Address,
}

pub type SmtpResultHandler = Box<dyn Fn(&SmtpSendOutcome) + Send + Sync>;

pub struct SmtpManager {
    config: Arc<SmtpConfig>,
    sender: Mutex<Option<mpsc::Sender<SmtpTask>>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl SmtpManager {
    pub fn start(
        config: SmtpConfig,
        status: Arc<StatusAggregator>,
        on_result: SmtpResultHandler,
        runtime: tokio::runtime::Handle,
    ) -> Arc<Self> {
        let config = Arc::new(config);
        let (sender, receiver) = mpsc::channel::<SmtpTask>();
        let worker_config = config.clone();
        let worker = thread::Builder::new()
            .name("smtp-send".to_string())
            .spawn(move || {
                for task in receiver {
                    let outcome = run_task(&worker_config, &status, &runtime, task);
                    on_result(&outcome);
                }
            })
            .expect("spawn smtp worker");

        Arc::new(Self {
            config,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Assemble the wire message for the fields. No network.
    pub fn create_message(&self, fields: &ComposeFields) -> Vec<u8> {
        build_message(fields)
    }

    /// Queue an assemble-and-send. Result arrives via the callback.
    pub fn send_message(&self, fields: ComposeFields) {
        if let Some(sender) = self.sender.lock().unwrap().as_ref() {
            let _ = sender.send(SmtpTask::Send { fields });
        }
    }

    /// Queue delivery of an already-assembled blob (no re-assembly).
    pub fn send_created_message(&self, blob: Vec<u8>) {
        if let Some(sender) = self.sender.lock().unwrap().as_ref() {
            let _ = sender.send(SmtpTask::SendCreated { blob });
        }
    }

    /// Close the queue and join the worker; queued sends complete first.
    pub fn stop(&self) {
        self.sender.lock().unwrap().take();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn run_task(
    config: &SmtpConfig,
    status: &StatusAggregator,
    runtime: &tokio::runtime::Handle,
    task: SmtpTask,
) -> SmtpSendOutcome {
    let (blob, from, recipients) = match task {
        SmtpTask::Send { fields } => {
            let blob = build_message(&fields);
            let recipients: Vec<String> = fields
                .recipients()
                .iter()
                .map(|a| a.address.clone())
                .collect();
            (blob, fields.from.clone(), recipients)
        }
        SmtpTask::SendCreated { blob } => {
            let header = parse_header(&blob);
            let recipients: Vec<String> = header
                .to
                .iter()
                .chain(header.cc.iter())
                .map(|a| a.address.clone())
                .collect();
            let from = header.from.first().cloned().unwrap_or_default();
            (blob, from, recipients)
        }
    };

    status.apply(StatusUpdate::set(status_flags::SENDING));
    let result = runtime.block_on(deliver(config, &from.address, &recipients, &blob));
    status.apply(StatusUpdate::clear(status_flags::SENDING));

    match result {
        Ok(()) => {
            info!(recipients = recipients.len(), "message sent");
            SmtpSendOutcome {
                ok: true,
                permanent: false,
                blob,
                from,
            }
        }
        Err(e) => {
            warn!(error = %e, "send failed");
            SmtpSendOutcome {
                ok: false,
                permanent: !e.is_transient(),
                blob,
                from,
            }
        }
    }
}

async fn deliver(
    config: &SmtpConfig,
    from: &str,
    recipients: &[String],
    blob: &[u8],
) -> Result<(), SmtpError> {
    let auth = if config.user.is_empty() {
        None
    } else {
        Some((config.user.as_str(), config.pass.as_str(), config.mechanism))
    };
    let mut session = SmtpSession::connect(
        &config.host,
        config.port,
        config.tls,
        &config.ehlo_hostname,
        auth,
    )
    .await?;
    let send_result = session.send(from, recipients, blob).await;
    let _ = session.quit().await;
    send_result
}

impl std::fmt::Debug for SmtpManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpManager")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .finish()
    }
}
