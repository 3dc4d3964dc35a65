/*
 * imap.rs
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

//! The IMAP manager: a foreground worker for user-driven requests and all
//! mutations, a prefetch worker on a second connection for background sync,
//! and a search worker over the local index. Workers are plain threads that
//! drive the async protocol client through a shared runtime handle. Results
//! go back through callbacks, serialised so at most one is active.
//!
//! Ordering: actions run before requests on every foreground pass, so a
//! request enqueued after an action observes its effect. The prefetch worker
//! skips any (folder, uid) the foreground has claimed.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::model::{
    response_status, Action, ActionResult, Body, Header, Request, Response, SearchQuery,
    SearchResult, Uid,
};
use crate::protocol::imap::{IdleEvent, ImapError, ImapSession, ImapTls, SelectInfo};
use crate::queue::{OfflineQueue, QueueKind};
use crate::sasl::SaslMechanism;
use crate::search::SearchIndex;
use crate::status::{flags as status_flags, StatusAggregator, StatusUpdate};

/// Headers per UID FETCH round trip.
const HEADER_BATCH: usize = 25;
/// Flag entries per UID FETCH round trip.
const FLAG_BATCH: usize = 1000;
/// Breather between prefetch batches so foreground work preempts quickly.
const PREFETCH_YIELD: Duration = Duration::from_millis(50);
/// IDLE refresh, safely below the RFC 2177 29-minute ceiling.
const IDLE_REFRESH: Duration = Duration::from_secs(25 * 60);
/// Reconnect backoff ceiling.
const BACKOFF_MAX: Duration = Duration::from_secs(64);

pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub mechanism: SaslMechanism,
    pub tls: ImapTls,
    /// Start online (false = offline mode until set_online).
    pub connect: bool,
    /// Seconds without work before the foreground connection enters IDLE.
    pub idle_delay_secs: u64,
    /// IDLE only when this folder is selected (the user's inbox).
    pub inbox: String,
    pub idle_enabled: bool,
}

pub struct ImapHandlers {
    pub on_response: Box<dyn Fn(&Request, &Response) + Send + Sync>,
    pub on_result: Box<dyn Fn(&Action, &ActionResult) + Send + Sync>,
    pub on_search: Box<dyn Fn(&SearchQuery, &SearchResult) + Send + Sync>,
}

struct QueuedAction {
    action: Action,
    /// Present for sync callers blocking on the outcome.
    reply: Option<std::sync::mpsc::Sender<bool>>,
}

/// Work queues for one worker: mutations drain before queries.
#[derive(Default)]
struct WorkQueues {
    actions: VecDeque<QueuedAction>,
    requests: VecDeque<Request>,
}

impl WorkQueues {
    fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.requests.is_empty()
    }
}

struct SearchTask {
    query: SearchQuery,
    reply: Option<std::sync::mpsc::Sender<SearchResult>>,
}

struct Shared {
    config: ImapConfig,
    cache: Arc<CacheStore>,
    index: Arc<Mutex<SearchIndex>>,
    queue: Arc<OfflineQueue>,
    status: Arc<StatusAggregator>,
    handlers: ImapHandlers,
    runtime: tokio::runtime::Handle,

    running: AtomicBool,
    online: AtomicBool,
    /// Login rejected: reconnect attempts stop until credentials change.
    auth_failed: AtomicBool,
    /// Sleep-detector fired: drop the connection before next use.
    force_reconnect: AtomicBool,

    fg: Mutex<WorkQueues>,
    fg_cond: Condvar,
    fg_wakeup: Arc<Notify>,

    prefetch: Mutex<WorkQueues>,
    prefetch_cond: Condvar,
    prefetch_wakeup: Arc<Notify>,

    search_queue: Mutex<VecDeque<SearchTask>>,
    search_cond: Condvar,

    current_folder: Mutex<String>,
    /// (folder, uid) pairs claimed by foreground requests; the prefetch
    /// worker skips them.
    claimed: Mutex<HashSet<(String, Uid)>>,
    /// Serialises result/response/search callbacks.
    callback_lock: Mutex<()>,
}

pub struct ImapManager {
    shared: Arc<Shared>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl ImapManager {
    pub fn start(
        config: ImapConfig,
        cache: Arc<CacheStore>,
        index: Arc<Mutex<SearchIndex>>,
        queue: Arc<OfflineQueue>,
        status: Arc<StatusAggregator>,
        handlers: ImapHandlers,
        runtime: tokio::runtime::Handle,
    ) -> Arc<Self> {
        let online = config.connect;
        let inbox = config.inbox.clone();
        let shared = Arc::new(Shared {
            config,
            cache,
            index,
            queue,
            status,
            handlers,
            runtime,
            running: AtomicBool::new(true),
            online: AtomicBool::new(online),
            auth_failed: AtomicBool::new(false),
            force_reconnect: AtomicBool::new(false),
            fg: Mutex::new(WorkQueues::default()),
            fg_cond: Condvar::new(),
            fg_wakeup: Arc::new(Notify::new()),
            prefetch: Mutex::new(WorkQueues::default()),
            prefetch_cond: Condvar::new(),
            prefetch_wakeup: Arc::new(Notify::new()),
            search_queue: Mutex::new(VecDeque::new()),
            search_cond: Condvar::new(),
            current_folder: Mutex::new(inbox),
            claimed: Mutex::new(HashSet::new()),
            callback_lock: Mutex::new(()),
        });

        let mut threads = Vec::new();
        {
            let shared = shared.clone();
            threads.push(
                thread::Builder::new()
                    .name("imap-foreground".to_string())
                    .spawn(move || foreground_worker(shared))
                    .expect("spawn imap foreground worker"),
            );
        }
        {
            let shared = shared.clone();
            threads.push(
                thread::Builder::new()
                    .name("imap-prefetch".to_string())
                    .spawn(move || prefetch_worker(shared))
                    .expect("spawn imap prefetch worker"),
            );
        }
        {
            let shared = shared.clone();
            threads.push(
                thread::Builder::new()
                    .name("imap-search".to_string())
                    .spawn(move || search_worker(shared))
                    .expect("spawn imap search worker"),
            );
        }

        Arc::new(Self {
            shared,
            threads: Mutex::new(threads),
        })
    }

    /// Enqueue a foreground request; returns immediately.
    pub fn async_request(&self, request: Request) {
        // claim the named uids so the prefetch worker steps aside
        {
            let mut claimed = self.shared.claimed.lock().unwrap();
            for uid in request.get_bodies.iter().chain(request.get_headers.iter()) {
                claimed.insert((request.folder.clone(), *uid));
            }
        }
        let mut queues = self.shared.fg.lock().unwrap();
        queues.requests.push_back(request);
        drop(queues);
        self.shared.fg_cond.notify_one();
        self.shared.fg_wakeup.notify_one();
    }

    /// Enqueue a background prefetch request.
    pub fn prefetch_request(&self, request: Request) {
        let mut queues = self.shared.prefetch.lock().unwrap();
        queues.requests.push_back(request);
        drop(queues);
        self.shared.prefetch_cond.notify_one();
        self.shared.prefetch_wakeup.notify_one();
    }

    /// Enqueue a mutation; always routed to the foreground connection.
    pub fn async_action(&self, action: Action) {
        let mut queues = self.shared.fg.lock().unwrap();
        queues.actions.push_back(QueuedAction {
            action,
            reply: None,
        });
        drop(queues);
        self.shared.fg_cond.notify_one();
        self.shared.fg_wakeup.notify_one();
    }

    /// Enqueue a mutation and block until it completes. The result callback
    /// still fires.
    pub fn sync_action(&self, action: Action) -> bool {
        let (tx, rx) = std::sync::mpsc::channel();
        {
            let mut queues = self.shared.fg.lock().unwrap();
            queues.actions.push_back(QueuedAction {
                action,
                reply: Some(tx),
            });
        }
        self.shared.fg_cond.notify_one();
        self.shared.fg_wakeup.notify_one();
        rx.recv().unwrap_or(false)
    }

    /// Enqueue a search; result arrives via the search callback.
    pub fn async_search(&self, query: SearchQuery) {
        let mut queue = self.shared.search_queue.lock().unwrap();
        queue.push_back(SearchTask { query, reply: None });
        drop(queue);
        self.shared.search_cond.notify_one();
    }

    /// Run a search and block for its result.
    pub fn sync_search(&self, query: SearchQuery) -> SearchResult {
        let (tx, rx) = std::sync::mpsc::channel();
        {
            let mut queue = self.shared.search_queue.lock().unwrap();
            queue.push_back(SearchTask {
                query,
                reply: Some(tx),
            });
        }
        self.shared.search_cond.notify_one();
        rx.recv().unwrap_or_default()
    }

    pub fn set_current_folder(&self, folder: &str) {
        *self.shared.current_folder.lock().unwrap() = folder.to_string();
        self.shared.fg_wakeup.notify_one();
    }

    pub fn set_online(&self, online: bool) {
        self.shared.online.store(online, Ordering::SeqCst);
        if online {
            self.shared.auth_failed.store(false, Ordering::SeqCst);
        }
        self.shared.fg_cond.notify_all();
        self.shared.prefetch_cond.notify_all();
        self.shared.fg_wakeup.notify_one();
        self.shared.prefetch_wakeup.notify_one();
    }

    pub fn is_online(&self) -> bool {
        self.shared.online.load(Ordering::SeqCst)
    }

    /// Sleep-detector hook: force IDLE exit and a reconnect before next use.
    pub fn wakeup(&self) {
        self.shared.force_reconnect.store(true, Ordering::SeqCst);
        self.shared.fg_wakeup.notify_one();
        self.shared.prefetch_wakeup.notify_one();
        self.shared.fg_cond.notify_all();
        self.shared.prefetch_cond.notify_all();
    }

    /// Stop workers and join them. In-flight operations finish naturally.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared
            .status
            .apply(StatusUpdate::set(status_flags::EXITING));
        self.shared.fg_cond.notify_all();
        self.shared.prefetch_cond.notify_all();
        self.shared.search_cond.notify_all();
        self.shared.fg_wakeup.notify_one();
        self.shared.prefetch_wakeup.notify_one();
        let mut threads = self.threads.lock().unwrap();
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
    }
}

// ---- worker loops ----

struct WorkerState {
    session: Option<ImapSession>,
    backoff_attempts: u32,
    is_foreground: bool,
}

impl WorkerState {
    fn new(is_foreground: bool) -> Self {
        Self {
            session: None,
            backoff_attempts: 0,
            is_foreground,
        }
    }
}

fn foreground_worker(shared: Arc<Shared>) {
    let mut state = WorkerState::new(true);
    let idle_delay = Duration::from_secs(shared.config.idle_delay_secs.max(1));

    while shared.running.load(Ordering::SeqCst) {
        if shared.force_reconnect.swap(false, Ordering::SeqCst) {
            drop_session(&shared, &mut state);
        }

        let work = {
            let mut queues = shared.fg.lock().unwrap();
            if queues.is_empty() {
                let (guard, _) = shared
                    .fg_cond
                    .wait_timeout(queues, idle_delay)
                    .unwrap();
                queues = guard;
            }
            take_work(&mut queues)
        };

        match work {
            Some(WorkItem::Action(queued)) => {
                let ok = perform_action(&shared, &mut state, &queued.action);
                send_result(&shared, &queued.action, ok);
                if let Some(reply) = queued.reply {
                    let _ = reply.send(ok);
                }
            }
            Some(WorkItem::Request(request)) => {
                perform_request(&shared, &mut state, request, false);
            }
            None => {
                if !shared.running.load(Ordering::SeqCst) {
                    break;
                }
                maybe_idle(&shared, &mut state);
            }
        }
    }
    if let Some(mut session) = state.session.take() {
        let _ = shared.runtime.block_on(session.logout());
    }
    flush_index(&shared);
}

fn prefetch_worker(shared: Arc<Shared>) {
    let mut state = WorkerState::new(false);

    while shared.running.load(Ordering::SeqCst) {
        if shared.force_reconnect.load(Ordering::SeqCst) {
            // foreground resets the flag; just drop our session
            drop_session(&shared, &mut state);
        }

        let work = {
            let mut queues = shared.prefetch.lock().unwrap();
            if queues.is_empty() {
                let (guard, _) = shared
                    .prefetch_cond
                    .wait_timeout(queues, Duration::from_secs(5))
                    .unwrap();
                queues = guard;
            }
            take_work(&mut queues)
        };

        match work {
            Some(WorkItem::Request(request)) => {
                perform_request(&shared, &mut state, request, true);
                // yield so foreground work preempts quickly
                thread::sleep(PREFETCH_YIELD);
            }
            Some(WorkItem::Action(_)) | None => {}
        }
    }
    if let Some(mut session) = state.session.take() {
        let _ = shared.runtime.block_on(session.logout());
    }
}

fn search_worker(shared: Arc<Shared>) {
    while shared.running.load(Ordering::SeqCst) {
        let task = {
            let mut queue = shared.search_queue.lock().unwrap();
            while queue.is_empty() && shared.running.load(Ordering::SeqCst) {
                let (guard, _) = shared
                    .search_cond
                    .wait_timeout(queue, Duration::from_secs(1))
                    .unwrap();
                queue = guard;
            }
            queue.pop_front()
        };
        let task = match task {
            Some(t) => t,
            None => continue,
        };

        shared
            .status
            .apply(StatusUpdate::set(status_flags::SEARCHING));
        let result = perform_search(&shared, &task.query);
        shared
            .status
            .apply(StatusUpdate::clear(status_flags::SEARCHING));

        match task.reply {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => {
                let _guard = shared.callback_lock.lock().unwrap();
                (shared.handlers.on_search)(&task.query, &result);
            }
        }
    }
}

enum WorkItem {
    Action(QueuedAction),
    Request(Request),
}

fn take_work(queues: &mut WorkQueues) -> Option<WorkItem> {
    if let Some(queued) = queues.actions.pop_front() {
        return Some(WorkItem::Action(queued));
    }
    queues.requests.pop_front().map(WorkItem::Request)
}

// ---- connection handling ----

fn drop_session(shared: &Shared, state: &mut WorkerState) {
    if state.session.take().is_some() {
        if state.is_foreground {
            shared.status.apply(StatusUpdate {
                set_flags: status_flags::DISCONNECTING,
                clear_flags: status_flags::CONNECTED | status_flags::IDLE,
                progress: None,
            });
            shared
                .status
                .apply(StatusUpdate::clear(status_flags::DISCONNECTING));
        }
        info!(foreground = state.is_foreground, "imap connection dropped");
    }
}

/// Connect and authenticate if needed. Applies exponential backoff between
/// attempts; a login rejection stops further attempts until credentials are
/// refreshed.
fn ensure_session<'a>(
    shared: &Shared,
    state: &'a mut WorkerState,
) -> Option<&'a mut ImapSession> {
    if !shared.online.load(Ordering::SeqCst) || shared.auth_failed.load(Ordering::SeqCst) {
        return None;
    }
    if state.session.is_some() {
        return state.session.as_mut();
    }

    if state.backoff_attempts > 0 {
        let delay = Duration::from_secs(1u64 << state.backoff_attempts.min(6)).min(BACKOFF_MAX);
        thread::sleep(delay);
        if !shared.running.load(Ordering::SeqCst) {
            return None;
        }
    }

    if state.is_foreground {
        shared
            .status
            .apply(StatusUpdate::set(status_flags::CONNECTING));
    }
    let config = &shared.config;
    let connect = shared.runtime.block_on(async {
        let mut session = ImapSession::connect(&config.host, config.port, config.tls).await?;
        session
            .login(&config.user, &config.pass, config.mechanism)
            .await?;
        Ok::<_, ImapError>(session)
    });

    match connect {
        Ok(session) => {
            state.session = Some(session);
            state.backoff_attempts = 0;
            if state.is_foreground {
                shared.status.apply(StatusUpdate {
                    set_flags: status_flags::CONNECTED | status_flags::IDLE,
                    clear_flags: status_flags::CONNECTING,
                    progress: None,
                });
            }
            info!(foreground = state.is_foreground, host = %config.host, "imap connected");
            state.session.as_mut()
        }
        Err(e) => {
            if state.is_foreground {
                shared
                    .status
                    .apply(StatusUpdate::clear(status_flags::CONNECTING));
            }
            if e.is_auth() {
                warn!(error = %e, "imap login failed, halting reconnect");
                shared.auth_failed.store(true, Ordering::SeqCst);
            } else {
                state.backoff_attempts = (state.backoff_attempts + 1).min(10);
                warn!(error = %e, attempts = state.backoff_attempts, "imap connect failed");
            }
            None
        }
    }
}

/// SELECT `folder` unless it is already the session's selected folder.
fn ensure_selected(
    shared: &Shared,
    session: &mut ImapSession,
    folder: &str,
) -> Result<SelectInfo, ImapError> {
    if session.selected_folder() == Some(folder) {
        return Ok(SelectInfo::default());
    }
    let info = shared.runtime.block_on(session.select(folder))?;
    if let Some(validity) = info.uid_validity {
        if let Err(e) = shared.cache.set_uid_validity(folder, validity) {
            warn!(error = %e, folder, "cannot persist uidvalidity");
        }
    }
    Ok(info)
}

// ---- request handling ----

fn perform_request(shared: &Shared, state: &mut WorkerState, request: Request, prefetch: bool) {
    if request.is_empty() {
        return;
    }
    let busy_flag = if prefetch {
        status_flags::PREFETCHING
    } else {
        status_flags::FETCHING
    };

    // cached pass: everything the disk already has
    let cached = cached_response(shared, &request, prefetch);
    let mut missing = request.clone();
    if let Some(cached) = cached {
        for uid in cached.headers.keys() {
            missing.get_headers.remove(uid);
        }
        for uid in cached.flags.keys() {
            missing.get_flags.remove(uid);
        }
        for uid in cached.bodies.keys() {
            missing.get_bodies.remove(uid);
        }
        send_response(shared, &request, &cached);
    }

    if !shared.online.load(Ordering::SeqCst) {
        // offline: cache was all we had
        release_claims(shared, &request);
        return;
    }

    let session = match ensure_session(shared, state) {
        Some(s) => s,
        None => {
            let mut response = Response {
                folder: request.folder.clone(),
                status: failure_bits(&missing),
                ..Response::default()
            };
            if shared.auth_failed.load(Ordering::SeqCst) {
                response.status |= response_status::LOGIN_FAILED;
            }
            send_response(shared, &request, &response);
            release_claims(shared, &request);
            return;
        }
    };

    shared.status.apply(StatusUpdate {
        set_flags: busy_flag,
        clear_flags: status_flags::IDLE,
        progress: None,
    });

    let mut response = Response {
        folder: request.folder.clone(),
        ..Response::default()
    };
    let mut transport_dead = false;

    if !request.folder.is_empty() {
        match ensure_selected(shared, session, &request.folder) {
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, folder = %request.folder, "select failed");
                response.status |= failure_bits(&missing);
                transport_dead = e.is_transport();
                finish_request(shared, state, &request, &response, transport_dead, busy_flag);
                return;
            }
        }
    }

    if missing.get_folders && !transport_dead {
        match shared.runtime.block_on(session.list_folders()) {
            Ok(folders) => response.folders = folders,
            Err(e) => {
                response.status |= response_status::GET_FOLDERS_FAILED;
                transport_dead = e.is_transport();
            }
        }
    }

    if missing.get_uids && !transport_dead {
        match shared.runtime.block_on(session.uid_search_all()) {
            Ok(uids) => {
                reconcile_uids(shared, &request.folder, &uids);
                response.uids = uids;
            }
            Err(e) => {
                response.status |= response_status::GET_UIDS_FAILED;
                transport_dead = e.is_transport();
            }
        }
    }

    if !missing.get_headers.is_empty() && !transport_dead {
        let uids: Vec<Uid> = missing.get_headers.iter().copied().collect();
        let total = uids.len();
        let mut done = 0usize;
        for batch in uids.chunks(HEADER_BATCH) {
            if !shared.running.load(Ordering::SeqCst) {
                break;
            }
            let set: BTreeSet<Uid> = batch.iter().copied().collect();
            match shared.runtime.block_on(session.uid_fetch_headers(&set)) {
                Ok(raw) => {
                    for (uid, header_bytes) in raw {
                        let header = crate::mime::parse_header(&header_bytes);
                        if let Err(e) = shared.cache.put_header(&request.folder, uid, &header) {
                            warn!(error = %e, "cannot cache header");
                        }
                        index_message(shared, &request.folder, uid, &header, None);
                        response.headers.insert(uid, header);
                    }
                    done += batch.len();
                    let percent = done as f32 * 100.0 / total.max(1) as f32;
                    shared
                        .status
                        .apply(StatusUpdate::set(busy_flag).with_progress(busy_flag, percent));
                }
                Err(e) => {
                    response.status |= response_status::GET_HEADERS_FAILED;
                    transport_dead = e.is_transport();
                    break;
                }
            }
        }
    }

    if !missing.get_flags.is_empty() && !transport_dead {
        let uids: Vec<Uid> = missing.get_flags.iter().copied().collect();
        for batch in uids.chunks(FLAG_BATCH) {
            let set: BTreeSet<Uid> = batch.iter().copied().collect();
            match shared.runtime.block_on(session.uid_fetch_flags(&set)) {
                Ok(flags) => {
                    if let Err(e) = shared.cache.put_flags(&request.folder, &flags) {
                        warn!(error = %e, "cannot cache flags");
                    }
                    response.flags.extend(flags);
                }
                Err(e) => {
                    response.status |= response_status::GET_FLAGS_FAILED;
                    transport_dead = e.is_transport();
                    break;
                }
            }
        }
    }

    if !missing.get_bodies.is_empty() && !transport_dead {
        let total = missing.get_bodies.len();
        let mut done = 0usize;
        for uid in missing.get_bodies.iter().copied() {
            if !shared.running.load(Ordering::SeqCst) {
                break;
            }
            if prefetch && is_claimed(shared, &request.folder, uid) {
                debug!(uid, "prefetch skipping foreground-claimed uid");
                continue;
            }
            match shared.runtime.block_on(session.uid_fetch_body(uid)) {
                Ok(raw) => {
                    let body = crate::mime::parse_body(&raw, request.process_html);
                    if let Err(e) = shared.cache.put_body(&request.folder, uid, &body) {
                        warn!(error = %e, "cannot cache body");
                    }
                    let header = shared
                        .cache
                        .get_header(&request.folder, uid)
                        .unwrap_or_else(|| crate::mime::parse_header(&raw));
                    index_message(shared, &request.folder, uid, &header, Some(&body));
                    response.bodies.insert(uid, body);
                    done += 1;
                    let percent = done as f32 * 100.0 / total.max(1) as f32;
                    shared
                        .status
                        .apply(StatusUpdate::set(busy_flag).with_progress(busy_flag, percent));
                }
                Err(e) => {
                    response.status |= response_status::GET_BODIES_FAILED;
                    transport_dead = e.is_transport();
                    break;
                }
            }
        }
    }

    finish_request(shared, state, &request, &response, transport_dead, busy_flag);
}

fn finish_request(
    shared: &Shared,
    state: &mut WorkerState,
    request: &Request,
    response: &Response,
    transport_dead: bool,
    busy_flag: u32,
) {
    shared.status.apply(StatusUpdate {
        set_flags: status_flags::IDLE,
        clear_flags: busy_flag,
        progress: None,
    });
    flush_index(shared);
    send_response(shared, request, response);
    release_claims(shared, request);

    if transport_dead {
        drop_session(shared, state);
        // one retry after reconnect
        if request.try_count == 0 {
            let mut retry = request.clone();
            retry.try_count = 1;
            let queues = if state.is_foreground {
                &shared.fg
            } else {
                &shared.prefetch
            };
            queues.lock().unwrap().requests.push_back(retry);
        }
    }
}

/// Build the portion of a request the cache can answer.
fn cached_response(shared: &Shared, request: &Request, prefetch: bool) -> Option<Response> {
    let mut response = Response {
        folder: request.folder.clone(),
        cached: true,
        ..Response::default()
    };
    let mut any = false;

    if request.get_uids {
        if let Some(uids) = shared.cache.get_uids(&request.folder) {
            response.uids = uids;
            any = true;
        }
    }
    for uid in &request.get_headers {
        if let Some(h) = shared.cache.get_header(&request.folder, *uid) {
            response.headers.insert(*uid, h);
            any = true;
        }
    }
    if !request.get_flags.is_empty() {
        let all = shared.cache.get_all_flags(&request.folder);
        for uid in &request.get_flags {
            if let Some(f) = all.get(uid) {
                response.flags.insert(*uid, *f);
                any = true;
            }
        }
    }
    for uid in &request.get_bodies {
        if prefetch && is_claimed(shared, &request.folder, *uid) {
            continue;
        }
        if let Some(b) = shared.cache.get_body(&request.folder, *uid) {
            // a cached body without HTML processing is incomplete for a
            // processing request
            if request.process_html && !b.html_parsed && b.text_plain.is_empty() {
                continue;
            }
            response.bodies.insert(*uid, b);
            any = true;
        }
    }
    if any {
        Some(response)
    } else {
        None
    }
}

/// Replace the cached uid set with the server's, evicting cache and index
/// entries for uids the server no longer has.
fn reconcile_uids(shared: &Shared, folder: &str, server_uids: &BTreeSet<Uid>) {
    let cached = shared.cache.get_uids(folder).unwrap_or_default();
    for removed in cached.difference(server_uids) {
        if let Err(e) = shared.cache.remove_message(folder, *removed) {
            warn!(error = %e, uid = removed, "cannot evict removed uid");
        }
        shared.index.lock().unwrap().remove(folder, *removed);
    }
    if let Err(e) = shared.cache.put_uids(folder, server_uids) {
        warn!(error = %e, folder, "cannot cache uid set");
    }
}

fn failure_bits(request: &Request) -> u32 {
    let mut bits = 0;
    if request.get_folders {
        bits |= response_status::GET_FOLDERS_FAILED;
    }
    if request.get_uids {
        bits |= response_status::GET_UIDS_FAILED;
    }
    if !request.get_headers.is_empty() {
        bits |= response_status::GET_HEADERS_FAILED;
    }
    if !request.get_flags.is_empty() {
        bits |= response_status::GET_FLAGS_FAILED;
    }
    if !request.get_bodies.is_empty() {
        bits |= response_status::GET_BODIES_FAILED;
    }
    bits
}

fn is_claimed(shared: &Shared, folder: &str, uid: Uid) -> bool {
    shared
        .claimed
        .lock()
        .unwrap()
        .contains(&(folder.to_string(), uid))
}

fn release_claims(shared: &Shared, request: &Request) {
    if request.prefetch_level != crate::model::PrefetchLevel::None {
        return;
    }
    let mut claimed = shared.claimed.lock().unwrap();
    for uid in request.get_bodies.iter().chain(request.get_headers.iter()) {
        claimed.remove(&(request.folder.clone(), *uid));
    }
}

fn index_message(shared: &Shared, folder: &str, uid: Uid, header: &Header, body: Option<&Body>) {
    shared
        .status
        .apply(StatusUpdate::set(status_flags::INDEXING));
    let body_text = body
        .map(|b| b.text_plain.clone())
        .or_else(|| shared.cache.get_body(folder, uid).map(|b| b.text_plain))
        .unwrap_or_default();
    shared
        .index
        .lock()
        .unwrap()
        .index(folder, uid, header, &body_text);
    shared
        .status
        .apply(StatusUpdate::clear(status_flags::INDEXING));
}

fn flush_index(shared: &Shared) {
    if let Err(e) = shared.index.lock().unwrap().flush() {
        warn!(error = %e, "cannot flush search index");
    }
}

// ---- action handling ----

fn perform_action(shared: &Shared, state: &mut WorkerState, action: &Action) -> bool {
    // cache-only actions need no network
    if action.update_cache_only {
        for (uid, body) in &action.set_bodies_cache {
            if let Err(e) = shared.cache.put_body(&action.folder, *uid, body) {
                warn!(error = %e, "cannot persist derived body");
                return false;
            }
        }
        return true;
    }

    let session = match ensure_session(shared, state) {
        Some(s) => s,
        None => {
            // offline fallback for uploads: keep the payload durable
            if action.upload_draft || action.upload_message {
                return queue_upload_offline(shared, action);
            }
            return false;
        }
    };

    let result: Result<(), ImapError> = (|| {
        if action.upload_draft || action.upload_message {
            let flags = if action.upload_draft {
                "\\Draft"
            } else {
                "\\Seen"
            };
            return shared
                .runtime
                .block_on(session.append(&action.folder, flags, action.msg.as_bytes()));
        }

        ensure_selected(shared, session, &action.folder)?;

        if action.set_seen || action.set_unseen {
            shared
                .runtime
                .block_on(session.uid_store_seen(&action.uids, action.set_seen))?;
            let mut flag_updates = BTreeMap::new();
            let all = shared.cache.get_all_flags(&action.folder);
            for uid in &action.uids {
                let mut f = all.get(uid).copied().unwrap_or_default();
                f.set_seen(action.set_seen);
                flag_updates.insert(*uid, f);
            }
            if let Err(e) = shared.cache.put_flags(&action.folder, &flag_updates) {
                warn!(error = %e, "cannot cache flags after store");
            }
            return Ok(());
        }

        if action.is_move() {
            let moved: Result<(), ImapError> = if session.has_capability("MOVE") {
                shared
                    .runtime
                    .block_on(session.uid_move(&action.uids, &action.move_destination))
            } else {
                shared
                    .runtime
                    .block_on(session.uid_copy(&action.uids, &action.move_destination))?;
                shared
                    .runtime
                    .block_on(session.uid_store_deleted(&action.uids))?;
                shared.runtime.block_on(session.expunge(&action.uids))
            };
            moved?;
            evict_uids(shared, &action.folder, &action.uids);
            return Ok(());
        }

        if action.delete_permanently {
            shared
                .runtime
                .block_on(session.uid_store_deleted(&action.uids))?;
            shared.runtime.block_on(session.expunge(&action.uids))?;
            evict_uids(shared, &action.folder, &action.uids);
            return Ok(());
        }

        Ok(())
    })();

    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "imap action failed");
            if e.is_transport() {
                drop_session(shared, state);
            }
            if action.upload_draft || action.upload_message {
                return queue_upload_offline(shared, action);
            }
            false
        }
    }
}

/// Keep an upload durable when the network is not there: the controller
/// drains the draft queue on reconnect.
fn queue_upload_offline(shared: &Shared, action: &Action) -> bool {
    match shared.queue.push(QueueKind::Draft, action.msg.as_bytes()) {
        Ok(()) => {
            info!("upload queued offline");
            false
        }
        Err(e) => {
            warn!(error = %e, "cannot queue upload offline");
            false
        }
    }
}

/// Remove uids from a folder's cached set, entries and index after a
/// server-side removal.
fn evict_uids(shared: &Shared, folder: &str, uids: &BTreeSet<Uid>) {
    let mut cached = shared.cache.get_uids(folder).unwrap_or_default();
    for uid in uids {
        cached.remove(uid);
        if let Err(e) = shared.cache.remove_message(folder, *uid) {
            warn!(error = %e, uid, "cannot evict uid");
        }
        shared.index.lock().unwrap().remove(folder, *uid);
    }
    if let Err(e) = shared.cache.put_uids(folder, &cached) {
        warn!(error = %e, folder, "cannot cache uid set after eviction");
    }
}

// ---- idle ----

/// Enter IDLE when connected with no pending work and the selected folder is
/// the inbox. A notification re-fetches uids; a wakeup or timeout just exits.
fn maybe_idle(shared: &Shared, state: &mut WorkerState) {
    if !shared.config.idle_enabled || !shared.online.load(Ordering::SeqCst) {
        return;
    }
    let inbox = shared.config.inbox.clone();
    let current = shared.current_folder.lock().unwrap().clone();
    if current != inbox {
        return;
    }
    let has_idle = {
        let session = match ensure_session(shared, state) {
            Some(s) => s,
            None => return,
        };
        if session.selected_folder() != Some(inbox.as_str()) {
            if let Err(e) = ensure_selected(shared, session, &inbox) {
                warn!(error = %e, "cannot select inbox for idle");
                if e.is_transport() {
                    drop_session(shared, state);
                }
                return;
            }
        }
        state.session.as_ref().map(|s| s.has_capability("IDLE")).unwrap_or(false)
    };
    if !has_idle {
        return;
    }
    {
        let queues = shared.fg.lock().unwrap();
        if !queues.is_empty() {
            return;
        }
    }

    let wakeup = shared.fg_wakeup.clone();
    let session = state.session.as_mut().expect("session checked above");
    debug!("entering IDLE");
    match shared.runtime.block_on(session.idle_wait(wakeup, IDLE_REFRESH)) {
        Ok(IdleEvent::MailboxChanged) => {
            debug!("IDLE: mailbox changed, refreshing uids");
            let request = Request {
                folder: inbox,
                get_uids: true,
                ..Request::default()
            };
            perform_request(shared, state, request, false);
        }
        Ok(IdleEvent::Wakeup) | Ok(IdleEvent::Timeout) => {}
        Err(e) => {
            warn!(error = %e, "IDLE failed");
            if e.is_transport() {
                drop_session(shared, state);
            }
        }
    }
}

// ---- search ----

fn perform_search(shared: &Shared, query: &SearchQuery) -> SearchResult {
    let (hits, has_more) = match shared
        .index
        .lock()
        .unwrap()
        .search(&query.query, query.offset, query.max)
    {
        Ok(r) => r,
        Err(e) => {
            debug!(error = %e, "search query rejected");
            return SearchResult::default();
        }
    };
    // attach headers; hits whose header is gone are dropped
    let mut folder_uids = Vec::new();
    let mut headers = Vec::new();
    for (folder, uid) in hits {
        if let Some(header) = shared.cache.get_header(&folder, uid) {
            folder_uids.push((folder, uid));
            headers.push(header);
        }
    }
    SearchResult {
        folder_uids,
        headers,
        has_more,
    }
}

// ---- callbacks ----

fn send_response(shared: &Shared, request: &Request, response: &Response) {
    let _guard = shared.callback_lock.lock().unwrap();
    (shared.handlers.on_response)(request, response);
}

fn send_result(shared: &Shared, action: &Action, ok: bool) {
    let _guard = shared.callback_lock.lock().unwrap();
    (shared.handlers.on_result)(action, &ActionResult { ok });
}
