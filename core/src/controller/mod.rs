/*
 * mod.rs
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

//! The controller: UI-facing façade over the managers. Translates each user
//! intent into exactly one request or action, merges responses into the
//! view-facing maps, keeps the display projection and selection coherent, and
//! signals the view through an event channel. It never performs I/O itself.

mod sortfilter;

pub use sortfilter::{CurrentRef, SortFilter};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::addressbook::AddressBook;
use crate::cache::CacheStore;
use crate::config::Config;
use crate::manager::{
    ImapConfig, ImapHandlers, ImapManager, SmtpConfig, SmtpManager, SmtpSendOutcome,
};
use crate::mime::ComposeFields;
use crate::model::{
    Action, ActionResult, Address, Body, Flags, Header, PrefetchLevel, Request, Response,
    SearchQuery, SearchResult, Uid,
};
use crate::protocol::imap::ImapTls;
use crate::protocol::smtp::SmtpTls;
use crate::queue::{OfflineQueue, QueueKind};
use crate::sasl::SaslMechanism;
use crate::search::SearchIndex;
use crate::sleep::SleepDetector;
use crate::status::{flags as status_flags, StatusAggregator};

/// Signals to the view loop. Observers must treat these as "wake up and
/// repaint"; all data is read back through the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Redraw,
    StatusChanged,
    SearchResultReady,
    /// User-visible message (failures, prompts). The single dialog channel.
    Dialog(String),
}

struct DisplayCache {
    keys: BTreeMap<String, Uid>,
    version: u64,
    current_uid: Option<Uid>,
}

/// View-facing state, all under one lock (the cache mutex). Workers touch it
/// only from response callbacks; the view thread reads it between events.
#[derive(Default)]
struct ViewState {
    current_folder: String,
    folders: BTreeSet<String>,
    header_uids: HashMap<String, BTreeSet<Uid>>,
    headers: HashMap<String, HashMap<Uid, Header>>,
    flags: HashMap<String, HashMap<Uid, Flags>>,
    bodies: HashMap<String, HashMap<Uid, Body>>,
    /// Cleared after any mutation so the next read re-synchronises.
    has_requested_uids: HashMap<String, bool>,
    /// Bumped on every uid/header/flag merge; display caches key off it.
    versions: HashMap<String, u64>,
    display: HashMap<String, HashMap<SortFilter, DisplayCache>>,
    sort_filter: HashMap<String, SortFilter>,
    selected: HashMap<String, BTreeSet<Uid>>,
    current_uid: HashMap<String, Uid>,
    /// Assembled blob of the last failed send, awaiting the user's
    /// draft-or-outbox decision.
    failed_send: Option<Vec<u8>>,
}

struct ComposeSession {
    fields: ComposeFields,
    stop_backup: Arc<(Mutex<bool>, Condvar)>,
    backup_thread: Option<thread::JoinHandle<()>>,
}

pub struct Controller {
    config: Config,
    app_dir: PathBuf,
    state: Mutex<ViewState>,
    search_result: Mutex<Option<SearchResult>>,
    cache: Arc<CacheStore>,
    index: Arc<Mutex<SearchIndex>>,
    queue: Arc<OfflineQueue>,
    addressbook: Arc<Mutex<AddressBook>>,
    status: Arc<StatusAggregator>,
    imap: Arc<ImapManager>,
    smtp: Arc<SmtpManager>,
    events: mpsc::Sender<UiEvent>,
    compose: Mutex<Option<ComposeSession>>,
    sleep_detector: Mutex<Option<SleepDetector>>,
    was_connected: AtomicBool,
    self_weak: Weak<Controller>,
}

impl Controller {
    /// Assemble the engine: cache, index, queues, managers, watchdog. Returns
    /// the controller and the event channel the view loop selects on.
    pub fn start(
        config: Config,
        app_dir: impl Into<PathBuf>,
        runtime: tokio::runtime::Handle,
    ) -> io::Result<(Arc<Self>, mpsc::Receiver<UiEvent>)> {
        let app_dir = app_dir.into();
        std::fs::create_dir_all(&app_dir)?;
        let password = if config.cache_encrypt {
            Some(config.pass.clone())
        } else {
            None
        };

        let cache = Arc::new(CacheStore::new(app_dir.join("cache"), password.clone())?);
        let index = Arc::new(Mutex::new(SearchIndex::open(
            app_dir.join("index"),
            password.clone(),
        )?));
        let queue = Arc::new(OfflineQueue::new(app_dir.join("queue"))?);
        for kind in [QueueKind::Draft, QueueKind::Outbox, QueueKind::ComposeBackup] {
            queue.recover(kind);
        }
        let addressbook = Arc::new(Mutex::new(AddressBook::open(
            app_dir.join("addressbook.db"),
            password,
        )));
        let status = Arc::new(StatusAggregator::new());

        let (events, events_rx) = mpsc::channel();

        let controller = Arc::new_cyclic(|weak: &Weak<Controller>| {
            let imap_handlers = ImapHandlers {
                on_response: {
                    let weak = weak.clone();
                    Box::new(move |request: &Request, response: &Response| {
                        if let Some(controller) = weak.upgrade() {
                            controller.handle_response(request, response);
                        }
                    })
                },
                on_result: {
                    let weak = weak.clone();
                    Box::new(move |action: &Action, result: &ActionResult| {
                        if let Some(controller) = weak.upgrade() {
                            controller.handle_result(action, result.ok);
                        }
                    })
                },
                on_search: {
                    let weak = weak.clone();
                    Box::new(move |_query: &SearchQuery, result: &SearchResult| {
                        if let Some(controller) = weak.upgrade() {
                            controller.handle_search(result.clone());
                        }
                    })
                },
            };

            let imap = ImapManager::start(
                ImapConfig {
                    host: config.imap_host.clone(),
                    port: config.imap_port,
                    user: config.user.clone(),
                    pass: config.pass.clone(),
                    mechanism: SaslMechanism::Plain,
                    tls: if config.imap_port == 143 {
                        ImapTls::StartTls
                    } else {
                        ImapTls::Implicit
                    },
                    connect: !config.offline,
                    idle_delay_secs: 5,
                    inbox: config.inbox.clone(),
                    idle_enabled: true,
                },
                cache.clone(),
                index.clone(),
                queue.clone(),
                status.clone(),
                imap_handlers,
                runtime.clone(),
            );

            let smtp = SmtpManager::start(
                SmtpConfig {
                    host: config.smtp_host.clone(),
                    port: config.smtp_port,
                    user: config.user.clone(),
                    pass: config.pass.clone(),
                    mechanism: SaslMechanism::Plain,
                    tls: if config.smtp_port == 587 {
                        SmtpTls::StartTls
                    } else {
                        SmtpTls::Implicit
                    },
                    ehlo_hostname: "localhost".to_string(),
                },
                status.clone(),
                {
                    let weak = weak.clone();
                    Box::new(move |outcome: &SmtpSendOutcome| {
                        if let Some(controller) = weak.upgrade() {
                            controller.handle_smtp_result(outcome);
                        }
                    })
                },
                runtime.clone(),
            );

            let sleep_detector = {
                let weak = weak.clone();
                SleepDetector::start(Duration::from_secs(5), move || {
                    if let Some(controller) = weak.upgrade() {
                        controller.imap.wakeup();
                    }
                })
            };

            // connection transitions drive outbox/draft drain
            {
                let weak = weak.clone();
                status.observe(move |snapshot| {
                    if let Some(controller) = weak.upgrade() {
                        controller.handle_status(snapshot.is_set(status_flags::CONNECTED));
                    }
                });
            }

            let mut state = ViewState::default();
            state.current_folder = config.inbox.clone();

            Controller {
                config: config.clone(),
                app_dir: app_dir.clone(),
                state: Mutex::new(state),
                search_result: Mutex::new(None),
                cache,
                index,
                queue,
                addressbook,
                status,
                imap,
                smtp,
                events,
                compose: Mutex::new(None),
                sleep_detector: Mutex::new(Some(sleep_detector)),
                was_connected: AtomicBool::new(false),
                self_weak: weak.clone(),
            }
        });

        controller.restore_compose_backups();
        controller.refresh_folder_list();
        controller.refresh_current_folder();
        Ok((controller, events_rx))
    }

    pub fn status(&self) -> &StatusAggregator {
        &self.status
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn emit(&self, event: UiEvent) {
        let _ = self.events.send(event);
    }

    // ---- folder / list intents ----

    pub fn refresh_folder_list(&self) {
        self.imap.async_request(Request {
            get_folders: true,
            ..Request::default()
        });
    }

    /// Fetch the current folder's uid set (and through the response flow,
    /// headers and flags for anything new).
    pub fn refresh_current_folder(&self) {
        let folder = self.state.lock().unwrap().current_folder.clone();
        self.imap.async_request(Request {
            folder,
            get_uids: true,
            ..Request::default()
        });
    }

    pub fn select_folder(&self, folder: &str) {
        {
            let mut state = self.state.lock().unwrap();
            state.current_folder = folder.to_string();
            // selection is in-memory only and dies on folder change
            state.selected.remove(folder);
            let needs_uids = !state
                .has_requested_uids
                .get(folder)
                .copied()
                .unwrap_or(false);
            drop(state);
            self.imap.set_current_folder(folder);
            if needs_uids {
                self.imap.async_request(Request {
                    folder: folder.to_string(),
                    get_uids: true,
                    ..Request::default()
                });
            }
        }
        self.emit(UiEvent::Redraw);
    }

    pub fn current_folder(&self) -> String {
        self.state.lock().unwrap().current_folder.clone()
    }

    pub fn folders(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().folders.clone()
    }

    // ---- display projection ----

    /// The ordered uid list for the current folder under its sort mode.
    /// Recomputed only when the folder's version counter has moved.
    pub fn display_uids(&self) -> Vec<Uid> {
        let mut state = self.state.lock().unwrap();
        let folder = state.current_folder.clone();
        self.display_uids_for(&mut state, &folder)
    }

    fn display_uids_for(&self, state: &mut ViewState, folder: &str) -> Vec<Uid> {
        let mode = state
            .sort_filter
            .get(folder)
            .copied()
            .unwrap_or_default();
        let version = state.versions.get(folder).copied().unwrap_or(0);
        let current_uid = state.current_uid.get(folder).copied();

        let cache_valid = state
            .display
            .get(folder)
            .and_then(|modes| modes.get(&mode))
            .map(|c| c.version == version && c.current_uid == current_uid)
            .unwrap_or(false);

        if !cache_valid {
            let current_ref = current_uid
                .and_then(|uid| state.headers.get(folder).and_then(|h| h.get(&uid)))
                .map(CurrentRef::from_header);
            let empty_uids = BTreeSet::new();
            let empty_headers = HashMap::new();
            let empty_flags = HashMap::new();
            let uids = state.header_uids.get(folder).unwrap_or(&empty_uids);
            let headers = state.headers.get(folder).unwrap_or(&empty_headers);
            let flags = state.flags.get(folder).unwrap_or(&empty_flags);

            let mut keys = BTreeMap::new();
            for uid in uids {
                let header = match headers.get(uid) {
                    Some(h) => h,
                    None => continue,
                };
                let flag = flags.get(uid).copied().unwrap_or_default();
                if let Some(key) =
                    sortfilter::display_key(mode, header, flag, *uid, current_ref.as_ref())
                {
                    keys.insert(key, *uid);
                }
            }
            state
                .display
                .entry(folder.to_string())
                .or_default()
                .insert(
                    mode,
                    DisplayCache {
                        keys,
                        version,
                        current_uid,
                    },
                );
        }

        state.display[folder][&mode].keys.values().copied().collect()
    }

    pub fn sort_filter(&self) -> SortFilter {
        let state = self.state.lock().unwrap();
        state
            .sort_filter
            .get(&state.current_folder)
            .copied()
            .unwrap_or_default()
    }

    /// Toggle a sort/filter mode for the current folder: selecting the active
    /// mode again resets to the default.
    pub fn toggle_sort_filter(&self, mode: SortFilter) {
        {
            let mut state = self.state.lock().unwrap();
            let folder = state.current_folder.clone();
            let active = state.sort_filter.get(&folder).copied().unwrap_or_default();
            let next = if active == mode {
                SortFilter::Default
            } else {
                mode
            };
            state.sort_filter.insert(folder, next);
        }
        self.emit(UiEvent::Redraw);
    }

    /// Request headers and flags the display is missing for the current
    /// folder (one request; nothing enqueued when complete).
    pub fn ensure_headers(&self) {
        let (folder, missing_headers, missing_flags) = {
            let state = self.state.lock().unwrap();
            let folder = state.current_folder.clone();
            let uids = state.header_uids.get(&folder).cloned().unwrap_or_default();
            let have_headers = state.headers.get(&folder);
            let have_flags = state.flags.get(&folder);
            let missing_headers: BTreeSet<Uid> = uids
                .iter()
                .filter(|u| have_headers.map_or(true, |m| !m.contains_key(u)))
                .copied()
                .collect();
            let missing_flags: BTreeSet<Uid> = uids
                .iter()
                .filter(|u| have_flags.map_or(true, |m| !m.contains_key(u)))
                .copied()
                .collect();
            (folder, missing_headers, missing_flags)
        };
        if missing_headers.is_empty() && missing_flags.is_empty() {
            return;
        }
        self.imap.async_request(Request {
            folder,
            get_headers: missing_headers,
            get_flags: missing_flags,
            ..Request::default()
        });
    }

    // ---- message access / selection ----

    pub fn header(&self, folder: &str, uid: Uid) -> Option<Header> {
        self.state
            .lock()
            .unwrap()
            .headers
            .get(folder)
            .and_then(|m| m.get(&uid))
            .cloned()
    }

    pub fn flags(&self, folder: &str, uid: Uid) -> Option<Flags> {
        self.state
            .lock()
            .unwrap()
            .flags
            .get(folder)
            .and_then(|m| m.get(&uid))
            .copied()
    }

    pub fn body(&self, folder: &str, uid: Uid) -> Option<Body> {
        self.state
            .lock()
            .unwrap()
            .bodies
            .get(folder)
            .and_then(|m| m.get(&uid))
            .cloned()
    }

    /// Make `uid` the highlighted message: fetch its body (foreground),
    /// mark it seen, and prefetch around it per the configured level.
    pub fn set_current_message(&self, uid: Uid) {
        let (folder, was_unseen, neighbors) = {
            let mut state = self.state.lock().unwrap();
            let folder = state.current_folder.clone();
            state.current_uid.insert(folder.clone(), uid);
            let was_unseen = !state
                .flags
                .get(&folder)
                .and_then(|m| m.get(&uid))
                .copied()
                .unwrap_or_default()
                .is_seen();
            let display = self.display_uids_for(&mut state, &folder);
            let neighbors: BTreeSet<Uid> = display
                .iter()
                .position(|u| *u == uid)
                .map(|pos| {
                    let mut n = BTreeSet::new();
                    if pos > 0 {
                        n.insert(display[pos - 1]);
                    }
                    if pos + 1 < display.len() {
                        n.insert(display[pos + 1]);
                    }
                    n
                })
                .unwrap_or_default();
            (folder, was_unseen, neighbors)
        };

        self.imap.async_request(Request {
            folder: folder.clone(),
            get_bodies: [uid].into_iter().collect(),
            process_html: true,
            ..Request::default()
        });

        // marking seen twice would be a wasted round trip
        if was_unseen {
            self.mark_seen(&folder, [uid].into_iter().collect(), true);
        }

        if self.config.prefetch_level >= PrefetchLevel::CurrentView && !neighbors.is_empty() {
            self.imap.prefetch_request(Request {
                folder,
                get_bodies: neighbors,
                prefetch_level: PrefetchLevel::CurrentView,
                process_html: false,
                ..Request::default()
            });
        }
    }

    pub fn current_message(&self) -> Option<Uid> {
        let state = self.state.lock().unwrap();
        state.current_uid.get(&state.current_folder).copied()
    }

    pub fn toggle_select(&self, uid: Uid) {
        {
            let mut state = self.state.lock().unwrap();
            let folder = state.current_folder.clone();
            let in_folder = state
                .header_uids
                .get(&folder)
                .map(|set| set.contains(&uid))
                .unwrap_or(false);
            if !in_folder {
                // selection must stay within the folder's uid set
                return;
            }
            let selection = state.selected.entry(folder).or_default();
            if !selection.remove(&uid) {
                selection.insert(uid);
            }
        }
        self.emit(UiEvent::Redraw);
    }

    pub fn selected_uids(&self) -> BTreeSet<Uid> {
        let state = self.state.lock().unwrap();
        state
            .selected
            .get(&state.current_folder)
            .cloned()
            .unwrap_or_default()
    }

    /// Selection if non-empty, else the highlighted message.
    fn effective_uids(&self, state: &ViewState, folder: &str) -> BTreeSet<Uid> {
        let selected = state.selected.get(folder).cloned().unwrap_or_default();
        if !selected.is_empty() {
            return selected;
        }
        state
            .current_uid
            .get(folder)
            .copied()
            .into_iter()
            .collect()
    }

    // ---- mutations ----

    /// Delete: permanent in the trash folder, a move to trash elsewhere.
    pub fn delete_selected(&self) {
        let (folder, uids) = {
            let state = self.state.lock().unwrap();
            let folder = state.current_folder.clone();
            (folder.clone(), self.effective_uids(&state, &folder))
        };
        if uids.is_empty() {
            return;
        }
        if folder == self.config.trash {
            self.apply_removal(&folder, &uids, None);
            self.imap.async_action(Action {
                folder,
                uids,
                delete_permanently: true,
                ..Action::default()
            });
        } else {
            let trash = self.config.trash.clone();
            self.apply_removal(&folder, &uids, Some(&trash));
            self.imap.async_action(Action {
                folder,
                uids,
                move_destination: trash,
                ..Action::default()
            });
        }
    }

    pub fn move_selected(&self, destination: &str) {
        let (folder, uids) = {
            let state = self.state.lock().unwrap();
            let folder = state.current_folder.clone();
            (folder.clone(), self.effective_uids(&state, &folder))
        };
        if uids.is_empty() || folder == destination {
            return;
        }
        self.apply_removal(&folder, &uids, Some(destination));
        self.imap.async_action(Action {
            folder,
            uids,
            move_destination: destination.to_string(),
            ..Action::default()
        });
    }

    /// Optimistic local effect of a move/delete: uids leave the source maps
    /// and the selection; both folders re-sync on next read.
    fn apply_removal(&self, folder: &str, uids: &BTreeSet<Uid>, destination: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        if let Some(set) = state.header_uids.get_mut(folder) {
            for uid in uids {
                set.remove(uid);
            }
        }
        if let Some(map) = state.headers.get_mut(folder) {
            for uid in uids {
                map.remove(uid);
            }
        }
        if let Some(map) = state.flags.get_mut(folder) {
            for uid in uids {
                map.remove(uid);
            }
        }
        if let Some(map) = state.bodies.get_mut(folder) {
            for uid in uids {
                map.remove(uid);
            }
        }
        if let Some(selection) = state.selected.get_mut(folder) {
            for uid in uids {
                selection.remove(uid);
            }
        }
        if let Some(current) = state.current_uid.get(folder).copied() {
            if uids.contains(&current) {
                state.current_uid.remove(folder);
            }
        }
        *state.versions.entry(folder.to_string()).or_insert(0) += 1;
        state.has_requested_uids.insert(folder.to_string(), false);
        if let Some(dest) = destination {
            state.has_requested_uids.insert(dest.to_string(), false);
        }
        drop(state);
        self.emit(UiEvent::Redraw);
    }

    pub fn toggle_seen_selected(&self) {
        let (folder, uids, make_seen) = {
            let state = self.state.lock().unwrap();
            let folder = state.current_folder.clone();
            let uids = self.effective_uids(&state, &folder);
            // if any is unseen, the toggle marks all seen
            let any_unseen = uids.iter().any(|u| {
                !state
                    .flags
                    .get(&folder)
                    .and_then(|m| m.get(u))
                    .copied()
                    .unwrap_or_default()
                    .is_seen()
            });
            (folder, uids, any_unseen)
        };
        if uids.is_empty() {
            return;
        }
        self.mark_seen(&folder, uids, make_seen);
    }

    /// Optimistic flag flip plus one store action. Not rolled back on
    /// failure; the next flag fetch re-synchronises.
    fn mark_seen(&self, folder: &str, uids: BTreeSet<Uid>, seen: bool) {
        {
            let mut state = self.state.lock().unwrap();
            let map = state.flags.entry(folder.to_string()).or_default();
            for uid in &uids {
                map.entry(*uid).or_default().set_seen(seen);
            }
            *state.versions.entry(folder.to_string()).or_insert(0) += 1;
        }
        self.imap.async_action(Action {
            folder: folder.to_string(),
            uids,
            set_seen: seen,
            set_unseen: !seen,
            ..Action::default()
        });
        self.emit(UiEvent::Redraw);
    }

    // ---- compose / send ----

    /// Begin composing. Reply and forward prefill from the referenced
    /// message. Starts the periodic compose backup when configured.
    pub fn start_compose(&self, reply_to: Option<(String, Uid)>, forward: bool) -> ComposeFields {
        let mut fields = ComposeFields {
            from: Address::new(
                if self.config.name.is_empty() {
                    None
                } else {
                    Some(&self.config.name)
                },
                &self.config.address,
            ),
            ..ComposeFields::default()
        };

        if let Some((folder, uid)) = reply_to {
            if let Some(header) = self.header(&folder, uid) {
                if forward {
                    fields.subject = format!("Fwd: {}", header.subject);
                } else {
                    fields.subject = if header.subject.to_lowercase().starts_with("re:") {
                        header.subject.clone()
                    } else {
                        format!("Re: {}", header.subject)
                    };
                    let reply_addr = if header.reply_to.is_empty() {
                        header.from.clone()
                    } else {
                        header.reply_to.clone()
                    };
                    fields.to = reply_addr;
                    fields.in_reply_to = header.message_id.clone();
                    fields.references = header.references.clone();
                }
                if let Some(body) = self.body(&folder, uid) {
                    let quoted: String = body
                        .text_plain
                        .lines()
                        .map(|l| format!("> {}\n", l))
                        .collect();
                    fields.body = format!("\n\n{}", quoted);
                }
            }
        }

        let session = ComposeSession {
            fields: fields.clone(),
            stop_backup: Arc::new((Mutex::new(false), Condvar::new())),
            backup_thread: None,
        };
        let mut guard = self.compose.lock().unwrap();
        *guard = Some(session);

        if self.config.compose_backup_interval > 0 {
            let interval = Duration::from_secs(self.config.compose_backup_interval);
            let stop = guard.as_ref().unwrap().stop_backup.clone();
            let queue = self.queue.clone();
            let weak = self.self_weak.clone();
            let handle = thread::Builder::new()
                .name("compose-backup".to_string())
                .spawn(move || loop {
                    let (lock, condvar) = &*stop;
                    let stopped = lock.lock().unwrap();
                    let (stopped, _) = condvar.wait_timeout(stopped, interval).unwrap();
                    if *stopped {
                        break;
                    }
                    drop(stopped);
                    if let Some(controller) = weak.upgrade() {
                        if let Some(blob) = controller.compose_backup_blob() {
                            if let Err(e) = queue.push(QueueKind::ComposeBackup, &blob) {
                                warn!(error = %e, "compose backup failed");
                            }
                        }
                    }
                })
                .expect("spawn compose backup thread");
            guard.as_mut().unwrap().backup_thread = Some(handle);
        }
        fields
    }

    /// Snapshot the compose fields into a wire blob (for backup).
    fn compose_backup_blob(&self) -> Option<Vec<u8>> {
        let guard = self.compose.lock().unwrap();
        let session = guard.as_ref()?;
        if session.fields.body.is_empty() && session.fields.subject.is_empty() {
            return None;
        }
        Some(self.smtp.create_message(&session.fields))
    }

    /// The editor loop pushes field updates here as the user types.
    pub fn update_compose(&self, fields: ComposeFields) {
        if let Some(session) = self.compose.lock().unwrap().as_mut() {
            session.fields = fields;
        }
    }

    /// Send the composed message. Offline sends assemble and queue to the
    /// outbox without touching the network.
    pub fn send_compose(&self) {
        // the backup thread takes the compose lock, so join it outside
        let session = self.compose.lock().unwrap().take();
        let fields = match session {
            Some(s) => stop_backup(s),
            None => return,
        };
        self.drain_compose_backups();

        if !self.imap.is_online() {
            let blob = self.smtp.create_message(&fields);
            if let Err(e) = self.queue.push(QueueKind::Outbox, &blob) {
                warn!(error = %e, "cannot queue offline send");
                self.emit(UiEvent::Dialog(
                    "Message could not be queued for sending".to_string(),
                ));
                return;
            }
            info!("offline: message queued to outbox");
            self.emit(UiEvent::Dialog("Message queued (offline)".to_string()));
            return;
        }
        self.smtp.send_message(fields);
    }

    pub fn cancel_compose(&self) {
        let session = self.compose.lock().unwrap().take();
        if let Some(session) = session {
            stop_backup(session);
        }
        self.drain_compose_backups();
    }

    fn drain_compose_backups(&self) {
        let _ = self.queue.pop_all(QueueKind::ComposeBackup);
    }

    /// Compose backups stranded by a crash become a draft on startup.
    fn restore_compose_backups(&self) {
        let backups = self.queue.pop_all(QueueKind::ComposeBackup);
        if let Some(latest) = backups.into_iter().last() {
            if let Err(e) = self.queue.push(QueueKind::Draft, &latest) {
                warn!(error = %e, "cannot restore compose backup");
            } else {
                self.emit(UiEvent::Dialog(
                    "Recovered an unsent compose backup into drafts".to_string(),
                ));
            }
        }
    }

    /// The user chose to keep a failed send as a draft.
    pub fn save_failed_send_as_draft(&self) {
        let blob = self.state.lock().unwrap().failed_send.take();
        if let Some(blob) = blob {
            self.imap.async_action(Action {
                folder: self.config.drafts.clone(),
                upload_draft: true,
                msg: String::from_utf8_lossy(&blob).into_owned(),
                ..Action::default()
            });
        }
    }

    /// The user chose to retry a failed send later.
    pub fn queue_failed_send_to_outbox(&self) {
        let blob = self.state.lock().unwrap().failed_send.take();
        if let Some(blob) = blob {
            if let Err(e) = self.queue.push(QueueKind::Outbox, &blob) {
                warn!(error = %e, "cannot queue failed send");
            }
        }
    }

    // ---- search ----

    pub fn search(&self, query: &str, offset: usize, max: usize) {
        self.imap
            .async_search(SearchQuery::new(query, offset, max));
    }

    pub fn search_blocking(&self, query: &str, offset: usize, max: usize) -> SearchResult {
        self.imap.sync_search(SearchQuery::new(query, offset, max))
    }

    pub fn search_result(&self) -> Option<SearchResult> {
        self.search_result.lock().unwrap().clone()
    }

    // ---- address book / queues ----

    pub fn address_lookup(&self, filter: &str) -> Vec<String> {
        self.addressbook.lock().unwrap().lookup(filter)
    }

    pub fn queue_depth(&self, kind: QueueKind) -> usize {
        self.queue.len(kind)
    }

    // ---- callbacks from the managers ----

    /// Merge a response into the view maps and bump version counters.
    pub fn handle_response(&self, request: &Request, response: &Response) {
        {
            let mut state = self.state.lock().unwrap();
            let folder = response.folder.clone();
            let mut bumped = false;

            if !response.folders.is_empty() {
                state.folders = response.folders.clone();
            }
            if request.get_uids && (!response.uids.is_empty() || !response.cached) {
                let uids = response.uids.clone();
                // selection and headers must stay inside the uid set
                if let Some(selection) = state.selected.get_mut(&folder) {
                    selection.retain(|u| uids.contains(u));
                }
                if let Some(headers) = state.headers.get_mut(&folder) {
                    headers.retain(|u, _| uids.contains(u));
                }
                if let Some(flags) = state.flags.get_mut(&folder) {
                    flags.retain(|u, _| uids.contains(u));
                }
                if let Some(bodies) = state.bodies.get_mut(&folder) {
                    bodies.retain(|u, _| uids.contains(u));
                }
                state.header_uids.insert(folder.clone(), uids);
                if !response.cached {
                    state.has_requested_uids.insert(folder.clone(), true);
                }
                bumped = true;
            }
            if !response.headers.is_empty() {
                let map = state.headers.entry(folder.clone()).or_default();
                for (uid, header) in &response.headers {
                    map.insert(*uid, header.clone());
                }
                bumped = true;
            }
            if !response.flags.is_empty() {
                let map = state.flags.entry(folder.clone()).or_default();
                for (uid, flags) in &response.flags {
                    map.insert(*uid, *flags);
                }
                bumped = true;
            }
            if !response.bodies.is_empty() {
                let map = state.bodies.entry(folder.clone()).or_default();
                for (uid, body) in &response.bodies {
                    map.insert(*uid, body.clone());
                }
            }
            if bumped {
                *state.versions.entry(folder).or_insert(0) += 1;
            }
        }

        if response.status != 0 {
            self.emit(UiEvent::Dialog(describe_failure(response.status)));
        }

        self.drive_prefetch(request, response);
        self.emit(UiEvent::Redraw);
    }

    /// Walk the sync forward after a prefetch response: uids lead to headers
    /// and flags, headers lead to bodies, and a full sync visits every
    /// folder once the folder list arrives.
    fn drive_prefetch(&self, request: &Request, response: &Response) {
        if response.cached {
            return;
        }
        let level = request.prefetch_level;

        // a fresh folder list at full sync fans out uid requests
        if request.get_folders && self.config.prefetch_level == PrefetchLevel::FullSync {
            for folder in &response.folders {
                self.imap.prefetch_request(Request {
                    folder: folder.clone(),
                    get_uids: true,
                    prefetch_level: PrefetchLevel::FullSync,
                    ..Request::default()
                });
            }
        }

        if level < PrefetchLevel::CurrentView {
            return;
        }

        if request.get_uids && !response.uids.is_empty() {
            let missing: BTreeSet<Uid> = {
                let state = self.state.lock().unwrap();
                let have = state.headers.get(&response.folder);
                response
                    .uids
                    .iter()
                    .filter(|u| have.map_or(true, |m| !m.contains_key(u)))
                    .copied()
                    .collect()
            };
            if !missing.is_empty() {
                self.imap.prefetch_request(Request {
                    folder: response.folder.clone(),
                    get_headers: missing.clone(),
                    get_flags: missing,
                    prefetch_level: level,
                    ..Request::default()
                });
            }
        }

        if level == PrefetchLevel::FullSync && !response.headers.is_empty() {
            let wanted: BTreeSet<Uid> = response.headers.keys().copied().collect();
            let missing: BTreeSet<Uid> = wanted
                .into_iter()
                .filter(|u| self.cache.get_body(&response.folder, *u).is_none())
                .collect();
            if !missing.is_empty() {
                self.imap.prefetch_request(Request {
                    folder: response.folder.clone(),
                    get_bodies: missing,
                    prefetch_level: PrefetchLevel::FullSync,
                    ..Request::default()
                });
            }
        }
    }

    /// An action completed: selection for that folder dies, and on failure
    /// the user hears about it. Cache coherence comes from the cleared
    /// has-requested bits set when the action was enqueued.
    pub fn handle_result(&self, action: &Action, ok: bool) {
        {
            let mut state = self.state.lock().unwrap();
            state.selected.remove(&action.folder);
        }
        if !ok {
            self.emit(UiEvent::Dialog(format!(
                "Operation failed in {}",
                action.folder
            )));
            // the optimistic cache may now be wrong; force a re-sync
            let mut state = self.state.lock().unwrap();
            state
                .has_requested_uids
                .insert(action.folder.clone(), false);
            drop(state);
            self.imap.async_request(Request {
                folder: action.folder.clone(),
                get_uids: true,
                ..Request::default()
            });
        }
        self.emit(UiEvent::Redraw);
    }

    pub fn handle_search(&self, result: SearchResult) {
        *self.search_result.lock().unwrap() = Some(result);
        self.emit(UiEvent::SearchResultReady);
    }

    /// SMTP outcome: a sent message feeds the address book and lands in the
    /// Sent folder; failures split into retry (outbox) and give-up (draft
    /// offer) per their class.
    pub fn handle_smtp_result(&self, outcome: &SmtpSendOutcome) {
        if outcome.ok {
            self.addressbook.lock().unwrap().add_from(&outcome.from);
            if let Err(e) = self.addressbook.lock().unwrap().flush() {
                warn!(error = %e, "cannot flush address book");
            }
            // the Sent folder changed server-side; force it to re-sync
            self.state
                .lock()
                .unwrap()
                .has_requested_uids
                .insert(self.config.sent.clone(), false);
            if self.config.client_store_sent {
                self.imap.async_action(Action {
                    folder: self.config.sent.clone(),
                    upload_message: true,
                    msg: String::from_utf8_lossy(&outcome.blob).into_owned(),
                    ..Action::default()
                });
            }
            self.emit(UiEvent::Dialog("Message sent".to_string()));
            return;
        }
        if outcome.permanent {
            self.state.lock().unwrap().failed_send = Some(outcome.blob.clone());
            self.emit(UiEvent::Dialog(
                "Send rejected by server; save as draft or queue to outbox?".to_string(),
            ));
        } else {
            if let Err(e) = self.queue.push(QueueKind::Outbox, &outcome.blob) {
                warn!(error = %e, "cannot queue transient send failure");
            }
            self.emit(UiEvent::Dialog(
                "Send failed, message queued to outbox".to_string(),
            ));
        }
    }

    /// Connection state edge: going online drains the outbox (resend without
    /// re-assembly) and the offline draft uploads.
    pub fn handle_status(&self, connected: bool) {
        let was = self.was_connected.swap(connected, Ordering::SeqCst);
        if connected && !was {
            for blob in self.queue.pop_all(QueueKind::Outbox) {
                self.smtp.send_created_message(blob);
            }
            for blob in self.queue.pop_all(QueueKind::Draft) {
                self.imap.async_action(Action {
                    folder: self.config.drafts.clone(),
                    upload_draft: true,
                    msg: String::from_utf8_lossy(&blob).into_owned(),
                    ..Action::default()
                });
            }
        }
        self.emit(UiEvent::StatusChanged);
    }

    // ---- lifecycle / maintenance ----

    pub fn set_online(&self, online: bool) {
        self.imap.set_online(online);
    }

    pub fn is_online(&self) -> bool {
        self.imap.is_online()
    }

    /// Orderly shutdown: compose backup stops, workers drain and join,
    /// persistent stores flush.
    pub fn shutdown(&self) {
        let session = self.compose.lock().unwrap().take();
        if let Some(session) = session {
            let fields = stop_backup(session);
            // an abandoned compose at exit is kept as a backup
            if !fields.body.is_empty() || !fields.subject.is_empty() {
                let blob = self.smtp.create_message(&fields);
                if let Err(e) = self.queue.push(QueueKind::ComposeBackup, &blob) {
                    warn!(error = %e, "cannot save compose backup at exit");
                }
            }
        }
        if let Some(mut detector) = self.sleep_detector.lock().unwrap().take() {
            detector.stop();
        }
        self.imap.stop();
        self.smtp.stop();
        if let Err(e) = self.addressbook.lock().unwrap().flush() {
            warn!(error = %e, "cannot flush address book");
        }
        if let Err(e) = self.index.lock().unwrap().flush() {
            warn!(error = %e, "cannot flush search index");
        }
    }

    /// Re-key every sealed store (cache, index, address book, saved pass).
    /// Restart the engine afterwards: handles opened before the change keep
    /// reading with the old key and will miss.
    pub fn change_password(&self, old_pass: &str, new_pass: &str) -> io::Result<()> {
        if !self.config.cache_encrypt {
            return Ok(());
        }
        self.cache.change_pass(old_pass, new_pass)?;
        self.index
            .lock()
            .unwrap()
            .change_pass(Some(new_pass.to_string()))?;
        self.addressbook
            .lock()
            .unwrap()
            .change_pass(Some(new_pass.to_string()))?;
        if self.config.save_pass {
            crate::config::save_password(&self.app_dir, new_pass)?;
        }
        Ok(())
    }

    /// Offline export of everything cached into a Maildir tree.
    pub fn export_maildir(&self, target: &Path) -> io::Result<usize> {
        crate::maildir::export(&self.cache, target)
    }
}

fn stop_backup(mut session: ComposeSession) -> ComposeFields {
    {
        let (lock, condvar) = &*session.stop_backup;
        *lock.lock().unwrap() = true;
        condvar.notify_all();
    }
    if let Some(handle) = session.backup_thread.take() {
        let _ = handle.join();
    }
    session.fields
}

fn describe_failure(status: u32) -> String {
    use crate::model::response_status as rs;
    let mut parts = Vec::new();
    if status & rs::LOGIN_FAILED != 0 {
        parts.push("login failed");
    }
    if status & rs::GET_FOLDERS_FAILED != 0 {
        parts.push("folder list");
    }
    if status & rs::GET_UIDS_FAILED != 0 {
        parts.push("message list");
    }
    if status & rs::GET_HEADERS_FAILED != 0 {
        parts.push("headers");
    }
    if status & rs::GET_FLAGS_FAILED != 0 {
        parts.push("flags");
    }
    if status & rs::GET_BODIES_FAILED != 0 {
        parts.push("message content");
    }
    if parts.len() == 1 && status == rs::LOGIN_FAILED {
        return "Login failed; check credentials".to_string();
    }
    format!("Could not fetch: {}", parts.join(", "))
}

