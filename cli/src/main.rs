/*
 * main.rs
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

//! Maintenance CLI over the engine: offline Maildir export, cache password
//! change, queue inspection. The interactive terminal UI is a separate
//! program; this binary only drives the engine's offline surfaces.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;

use lettera_core::cache::CacheStore;
use lettera_core::config::{self, Config};
use lettera_core::maildir;
use lettera_core::queue::{OfflineQueue, QueueKind};
use lettera_core::search::SearchIndex;

#[derive(Parser)]
#[command(name = "lettera", about = "Lettera mail engine maintenance")]
struct Cli {
    /// Application directory (default: ~/.lettera)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Export all cached mail into a Maildir tree
    ExportMaildir {
        /// Target directory for the export
        target: PathBuf,
    },
    /// Re-key the encrypted cache, index and address book
    ChangePass,
    /// Show offline queue depths
    QueueStatus,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("lettera: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> io::Result<()> {
    let app_dir = match cli.config_dir {
        Some(dir) => dir,
        None => default_app_dir()?,
    };
    let config = Config::load(&app_dir.join("config"))?;

    match cli.command {
        Command::ExportMaildir { target } => {
            let password = cache_password(&app_dir, &config)?;
            let cache = CacheStore::new(app_dir.join("cache"), password)?;
            let count = maildir::export(&cache, &target)?;
            println!("exported {} messages to {}", count, target.display());
            Ok(())
        }
        Command::ChangePass => {
            if !config.cache_encrypt {
                println!("cache encryption is disabled; nothing to re-key");
                return Ok(());
            }
            let old_pass = prompt("Current password: ")?;
            let new_pass = prompt("New password: ")?;
            let confirm = prompt("Repeat new password: ")?;
            if new_pass != confirm {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "passwords do not match",
                ));
            }

            let cache = CacheStore::new(app_dir.join("cache"), Some(old_pass.clone()))?;
            cache.change_pass(&old_pass, &new_pass)?;

            let mut index = SearchIndex::open(app_dir.join("index"), Some(old_pass.clone()))?;
            index.change_pass(Some(new_pass.clone()))?;

            let mut book = lettera_core::addressbook::AddressBook::open(
                app_dir.join("addressbook.db"),
                Some(old_pass),
            );
            book.change_pass(Some(new_pass.clone()))?;

            if config.save_pass {
                config::save_password(&app_dir, &new_pass)?;
            }
            println!("password changed");
            Ok(())
        }
        Command::QueueStatus => {
            let queue = OfflineQueue::new(app_dir.join("queue"))?;
            println!("drafts:  {}", queue.len(QueueKind::Draft));
            println!("outbox:  {}", queue.len(QueueKind::Outbox));
            println!("compose: {}", queue.len(QueueKind::ComposeBackup));
            Ok(())
        }
    }
}

fn cache_password(app_dir: &PathBuf, config: &Config) -> io::Result<Option<String>> {
    if !config.cache_encrypt {
        return Ok(None);
    }
    if let Some(pass) = config::load_password(app_dir) {
        return Ok(Some(pass));
    }
    Ok(Some(prompt("Password: ")?))
}

fn prompt(label: &str) -> io::Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn default_app_dir() -> io::Result<PathBuf> {
    std::env::var_os("HOME")
        .map(|h| PathBuf::from(h).join(".lettera"))
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "HOME not set"))
}
