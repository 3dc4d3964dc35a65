/*
 * offline_engine.rs
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

//! IMAP manager behavior with the network off: cached service, callback
//! ordering, search over the shared index.

use std::collections::BTreeSet;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lettera_core::cache::CacheStore;
use lettera_core::manager::{ImapConfig, ImapHandlers, ImapManager};
use lettera_core::mime;
use lettera_core::model::{Action, Request, SearchQuery};
use lettera_core::protocol::imap::ImapTls;
use lettera_core::queue::OfflineQueue;
use lettera_core::sasl::SaslMechanism;
use lettera_core::search::SearchIndex;
use lettera_core::status::StatusAggregator;

fn offline_config() -> ImapConfig {
    ImapConfig {
        host: "mail.invalid".to_string(),
        port: 993,
        user: "user".to_string(),
        pass: "pass".to_string(),
        mechanism: SaslMechanism::Plain,
        tls: ImapTls::Implicit,
        connect: false,
        idle_delay_secs: 1,
        inbox: "INBOX".to_string(),
        idle_enabled: false,
    }
}

fn raw_message(subject: &str, date: &str) -> Vec<u8> {
    format!(
        "Message-ID: <{}@t>\r\nFrom: al@x.test\r\nSubject: {}\r\nDate: {}\r\n\r\nthe {} body\r\n",
        subject.replace(' ', "_"),
        subject,
        date,
        subject
    )
    .into_bytes()
}

struct Engine {
    manager: Arc<ImapManager>,
    cache: Arc<CacheStore>,
    index: Arc<Mutex<SearchIndex>>,
    events: mpsc::Receiver<EngineEvent>,
    _runtime: tokio::runtime::Runtime,
}

#[derive(Debug)]
enum EngineEvent {
    Response(Request, lettera_core::Response),
    Result(Action, bool),
}

fn start_engine(dir: &std::path::Path) -> Engine {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let cache = Arc::new(CacheStore::new(dir.join("cache"), None).unwrap());
    let index = Arc::new(Mutex::new(SearchIndex::open(dir.join("index"), None).unwrap()));
    let queue = Arc::new(OfflineQueue::new(dir.join("queue")).unwrap());
    let status = Arc::new(StatusAggregator::new());
    let (tx, rx) = mpsc::channel();
    let tx_resp = tx.clone();
    let tx_result = tx;
    let handlers = ImapHandlers {
        on_response: Box::new(move |request, response| {
            let _ = tx_resp.send(EngineEvent::Response(request.clone(), response.clone()));
        }),
        on_result: Box::new(move |action, result| {
            let _ = tx_result.send(EngineEvent::Result(action.clone(), result.ok));
        }),
        on_search: Box::new(|_, _| {}),
    };
    let manager = ImapManager::start(
        offline_config(),
        cache.clone(),
        index.clone(),
        queue,
        status,
        handlers,
        runtime.handle().clone(),
    );
    Engine {
        manager,
        cache,
        index,
        events: rx,
        _runtime: runtime,
    }
}

fn seed_message(engine: &Engine, folder: &str, uid: u32, subject: &str, date: &str) {
    let raw = raw_message(subject, date);
    let header = mime::parse_header(&raw);
    let body = mime::parse_body(&raw, false);
    engine.cache.put_header(folder, uid, &header).unwrap();
    engine.cache.put_body(folder, uid, &body).unwrap();
    engine
        .index
        .lock()
        .unwrap()
        .index(folder, uid, &header, &body.text_plain);
}

#[test]
fn cached_data_served_while_offline() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = start_engine(tmp.path());
    let uids: BTreeSet<u32> = [1, 2].into_iter().collect();
    engine.cache.put_uids("INBOX", &uids).unwrap();
    seed_message(&engine, "INBOX", 1, "first", "Mon, 01 Jan 2024 09:00:00 +0000");
    seed_message(&engine, "INBOX", 2, "second", "Mon, 01 Jan 2024 10:00:00 +0000");

    engine.manager.async_request(Request {
        folder: "INBOX".to_string(),
        get_uids: true,
        get_headers: uids.clone(),
        ..Request::default()
    });

    let event = engine.events.recv_timeout(Duration::from_secs(5)).unwrap();
    match event {
        EngineEvent::Response(_, response) => {
            assert!(response.cached);
            assert_eq!(response.uids, uids);
            assert_eq!(response.headers.len(), 2);
            assert_eq!(response.headers[&1].subject, "first");
        }
        other => panic!("expected response, got {:?}", other),
    }
    engine.manager.stop();
}

#[test]
fn action_result_precedes_later_request_response() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = start_engine(tmp.path());
    let uids: BTreeSet<u32> = [5].into_iter().collect();
    engine.cache.put_uids("INBOX", &uids).unwrap();
    seed_message(&engine, "INBOX", 5, "hello", "Mon, 01 Jan 2024 09:00:00 +0000");

    // action enqueued first, then a request: the action's result must come
    // back first (offline, a network mutation fails but ordering holds)
    engine.manager.async_action(Action {
        folder: "INBOX".to_string(),
        uids: uids.clone(),
        set_seen: true,
        ..Action::default()
    });
    engine.manager.async_request(Request {
        folder: "INBOX".to_string(),
        get_uids: true,
        ..Request::default()
    });

    let first = engine.events.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(matches!(first, EngineEvent::Result(_, false)));
    let second = engine.events.recv_timeout(Duration::from_secs(5)).unwrap();
    match second {
        EngineEvent::Response(_, response) => assert_eq!(response.uids, uids),
        other => panic!("expected response, got {:?}", other),
    }
    engine.manager.stop();
}

#[test]
fn update_cache_only_action_succeeds_offline() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = start_engine(tmp.path());
    let raw = raw_message("derived", "Mon, 01 Jan 2024 09:00:00 +0000");
    let mut body = mime::parse_body(&raw, false);
    body.text_html = "<p>derived</p>".to_string();
    body.html_parsed = true;

    let mut action = Action {
        folder: "INBOX".to_string(),
        update_cache_only: true,
        ..Action::default()
    };
    action.set_bodies_cache.insert(9, body);
    engine.manager.async_action(action);

    let event = engine.events.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(matches!(event, EngineEvent::Result(_, true)));
    let cached = engine.cache.get_body("INBOX", 9).unwrap();
    assert!(cached.html_parsed);
    engine.manager.stop();
}

#[test]
fn sync_search_orders_by_date_and_attaches_headers() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = start_engine(tmp.path());
    seed_message(&engine, "INBOX", 1, "invoice one", "Mon, 01 Jan 2024 09:00:00 +0000");
    seed_message(&engine, "INBOX", 2, "invoice two", "Thu, 01 Feb 2024 09:00:00 +0000");
    seed_message(&engine, "Archive", 3, "invoice three", "Fri, 01 Mar 2024 09:00:00 +0000");

    let result = engine
        .manager
        .sync_search(SearchQuery::new("subject:invoice", 0, 10));
    assert!(!result.has_more);
    assert_eq!(
        result.folder_uids,
        vec![
            ("Archive".to_string(), 3),
            ("INBOX".to_string(), 2),
            ("INBOX".to_string(), 1),
        ]
    );
    assert_eq!(result.headers.len(), 3);
    assert_eq!(result.headers[0].subject, "invoice three");
    engine.manager.stop();
}

#[test]
fn search_hits_without_cached_header_are_dropped() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = start_engine(tmp.path());
    seed_message(&engine, "INBOX", 1, "kept", "Mon, 01 Jan 2024 09:00:00 +0000");
    // index an entry whose header was never cached
    let raw = raw_message("ghost", "Mon, 01 Jan 2024 10:00:00 +0000");
    let header = mime::parse_header(&raw);
    engine
        .index
        .lock()
        .unwrap()
        .index("INBOX", 99, &header, "ghost body");

    let result = engine
        .manager
        .sync_search(SearchQuery::new("kept OR ghost", 0, 10));
    assert_eq!(result.folder_uids, vec![("INBOX".to_string(), 1)]);
    engine.manager.stop();
}
