/*
 * controller_state.rs
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

//! Controller view-state behavior: display projection, selection integrity,
//! delete semantics, offline compose, send failure handling. The engine runs
//! in offline mode so no network is touched.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::mpsc;
use std::sync::Arc;

use lettera_core::config::Config;
use lettera_core::controller::{Controller, SortFilter, UiEvent};
use lettera_core::manager::SmtpSendOutcome;
use lettera_core::mime::{self, ComposeFields};
use lettera_core::model::{Address, Flags, Request, Response, SearchResult, Uid};
use lettera_core::queue::QueueKind;

fn offline_config() -> Config {
    let mut config = Config::default();
    config.address = "me@x.test".to_string();
    config.name = "Me".to_string();
    config.user = "me".to_string();
    config.pass = "pw".to_string();
    config.imap_host = "mail.invalid".to_string();
    config.smtp_host = "mail.invalid".to_string();
    config.cache_encrypt = false;
    config.offline = true;
    config.compose_backup_interval = 0;
    config
}

struct Fixture {
    controller: Arc<Controller>,
    events: mpsc::Receiver<UiEvent>,
    _tmp: tempfile::TempDir,
    _runtime: tokio::runtime::Runtime,
}

fn fixture() -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let (controller, events) =
        Controller::start(offline_config(), tmp.path().join("app"), runtime.handle().clone())
            .unwrap();
    Fixture {
        controller,
        events,
        _tmp: tmp,
        _runtime: runtime,
    }
}

fn header_response(folder: &str, entries: &[(Uid, &str, &str, u32)]) -> (Request, Response) {
    // entries: (uid, from, subject, hour-of-day on 2024-01-01)
    let request = Request {
        folder: folder.to_string(),
        get_uids: true,
        get_headers: entries.iter().map(|(u, _, _, _)| *u).collect(),
        get_flags: entries.iter().map(|(u, _, _, _)| *u).collect(),
        ..Request::default()
    };
    let mut response = Response {
        folder: folder.to_string(),
        uids: entries.iter().map(|(u, _, _, _)| *u).collect(),
        ..Response::default()
    };
    for (uid, from, subject, hour) in entries {
        let raw = format!(
            "Message-ID: <m{}@t>\r\nFrom: {}\r\nSubject: {}\r\nDate: Mon, 01 Jan 2024 {:02}:00:00 +0000\r\n\r\n",
            uid, from, subject, hour
        );
        response.headers.insert(*uid, mime::parse_header(raw.as_bytes()));
        response.flags.insert(*uid, Flags::default());
    }
    (request, response)
}

fn drain_events(fixture: &Fixture) -> Vec<UiEvent> {
    let mut out = Vec::new();
    while let Ok(event) = fixture.events.try_recv() {
        out.push(event);
    }
    out
}

#[test]
fn display_projection_orders_and_resorts() {
    let fx = fixture();
    let (request, response) = header_response(
        "INBOX",
        &[
            (1, "zoe@x.test", "alpha", 9),
            (2, "adam@x.test", "beta", 11),
            (3, "mia@x.test", "gamma", 10),
        ],
    );
    fx.controller.handle_response(&request, &response);

    // default: newest first
    assert_eq!(fx.controller.display_uids(), vec![2, 3, 1]);

    fx.controller.toggle_sort_filter(SortFilter::NameAsc);
    assert_eq!(fx.controller.display_uids(), vec![2, 3, 1]);
    fx.controller.toggle_sort_filter(SortFilter::DateAsc);
    assert_eq!(fx.controller.display_uids(), vec![1, 3, 2]);
    // toggling the active mode resets to default
    fx.controller.toggle_sort_filter(SortFilter::DateAsc);
    assert_eq!(fx.controller.sort_filter(), SortFilter::Default);
    assert_eq!(fx.controller.display_uids(), vec![2, 3, 1]);
    fx.controller.shutdown();
}

#[test]
fn display_has_no_duplicates_and_respects_filters() {
    let fx = fixture();
    let (request, mut response) = header_response(
        "INBOX",
        &[
            (1, "a@x.test", "one", 9),
            (2, "b@x.test", "two", 10),
            (3, "c@x.test", "three", 11),
        ],
    );
    response.flags.insert(2, Flags(Flags::SEEN));
    fx.controller.handle_response(&request, &response);

    fx.controller.toggle_sort_filter(SortFilter::UnseenOnly);
    let display = fx.controller.display_uids();
    assert_eq!(display, vec![3, 1]);
    let unique: BTreeSet<Uid> = display.iter().copied().collect();
    assert_eq!(unique.len(), display.len());
    fx.controller.shutdown();
}

#[test]
fn selection_purged_when_uid_leaves_folder() {
    let fx = fixture();
    let (request, response) = header_response(
        "INBOX",
        &[(10, "a@x.test", "s", 9), (11, "b@x.test", "s", 10)],
    );
    fx.controller.handle_response(&request, &response);
    fx.controller.toggle_select(10);
    fx.controller.toggle_select(11);
    assert_eq!(fx.controller.selected_uids().len(), 2);

    // server now says only uid 11 exists
    let (request2, mut response2) = header_response("INBOX", &[(11, "b@x.test", "s", 10)]);
    response2.uids = [11].into_iter().collect();
    fx.controller.handle_response(&request2, &response2);
    assert_eq!(fx.controller.selected_uids(), [11].into_iter().collect());
    fx.controller.shutdown();
}

#[test]
fn selecting_unknown_uid_is_rejected() {
    let fx = fixture();
    let (request, response) = header_response("INBOX", &[(1, "a@x.test", "s", 9)]);
    fx.controller.handle_response(&request, &response);
    fx.controller.toggle_select(42);
    assert!(fx.controller.selected_uids().is_empty());
    fx.controller.shutdown();
}

#[test]
fn delete_outside_trash_is_a_move() {
    let fx = fixture();
    let (request, response) = header_response(
        "INBOX",
        &[(10, "a@x.test", "s", 9), (11, "b@x.test", "s", 10)],
    );
    fx.controller.handle_response(&request, &response);
    fx.controller.toggle_select(10);
    fx.controller.toggle_select(11);

    fx.controller.delete_selected();
    // both uids leave the view immediately and the selection is empty
    assert!(fx.controller.display_uids().is_empty());
    assert!(fx.controller.selected_uids().is_empty());
    fx.controller.shutdown();
}

#[test]
fn delete_in_trash_is_permanent_and_local_state_shrinks() {
    let fx = fixture();
    let (request, response) =
        header_response("Trash", &[(42, "a@x.test", "doomed", 9)]);
    fx.controller.handle_response(&request, &response);
    fx.controller.select_folder("Trash");
    fx.controller.set_current_message(42);
    fx.controller.delete_selected();
    assert!(fx.controller.display_uids().is_empty());
    assert_eq!(fx.controller.current_message(), None);
    fx.controller.shutdown();
}

#[test]
fn selection_dies_on_folder_change() {
    let fx = fixture();
    let (request, response) = header_response("INBOX", &[(1, "a@x.test", "s", 9)]);
    fx.controller.handle_response(&request, &response);
    fx.controller.toggle_select(1);
    assert_eq!(fx.controller.selected_uids().len(), 1);
    fx.controller.select_folder("Archive");
    fx.controller.select_folder("INBOX");
    assert!(fx.controller.selected_uids().is_empty());
    fx.controller.shutdown();
}

#[test]
fn offline_send_lands_in_outbox() {
    let fx = fixture();
    assert_eq!(fx.controller.queue_depth(QueueKind::Outbox), 0);

    let mut fields = fx.controller.start_compose(None, false);
    fields.to = vec![Address::new(None, "a@x.test")];
    fields.subject = "Hi".to_string();
    fields.body = "hello".to_string();
    fx.controller.update_compose(fields);
    fx.controller.send_compose();

    assert_eq!(fx.controller.queue_depth(QueueKind::Outbox), 1);
    let events = drain_events(&fx);
    assert!(events
        .iter()
        .any(|e| matches!(e, UiEvent::Dialog(m) if m.contains("queued"))));
    fx.controller.shutdown();
}

#[test]
fn permanent_send_failure_offers_draft() {
    let fx = fixture();
    let blob = mime::build_message(&ComposeFields {
        from: Address::new(None, "me@x.test"),
        to: vec![Address::new(None, "a@x.test")],
        subject: "s".to_string(),
        body: "b".to_string(),
        ..ComposeFields::default()
    });
    fx.controller.handle_smtp_result(&SmtpSendOutcome {
        ok: false,
        permanent: true,
        blob: blob.clone(),
        from: Address::new(None, "me@x.test"),
    });
    let events = drain_events(&fx);
    assert!(events
        .iter()
        .any(|e| matches!(e, UiEvent::Dialog(m) if m.contains("draft"))));
    // nothing went to the outbox automatically
    assert_eq!(fx.controller.queue_depth(QueueKind::Outbox), 0);

    fx.controller.queue_failed_send_to_outbox();
    assert_eq!(fx.controller.queue_depth(QueueKind::Outbox), 1);
    // the blob is consumed; a second push does nothing
    fx.controller.queue_failed_send_to_outbox();
    assert_eq!(fx.controller.queue_depth(QueueKind::Outbox), 1);
    fx.controller.shutdown();
}

#[test]
fn transient_send_failure_queues_outbox() {
    let fx = fixture();
    fx.controller.handle_smtp_result(&SmtpSendOutcome {
        ok: false,
        permanent: false,
        blob: b"raw".to_vec(),
        from: Address::new(None, "me@x.test"),
    });
    assert_eq!(fx.controller.queue_depth(QueueKind::Outbox), 1);
    fx.controller.shutdown();
}

#[test]
fn search_results_arrive_via_event() {
    let fx = fixture();
    drain_events(&fx);
    let mut result = SearchResult::default();
    result.folder_uids.push(("INBOX".to_string(), 7));
    fx.controller.handle_search(result);
    let events = drain_events(&fx);
    assert!(events.contains(&UiEvent::SearchResultReady));
    let stored = fx.controller.search_result().unwrap();
    assert_eq!(stored.folder_uids, vec![("INBOX".to_string(), 7)]);
    fx.controller.shutdown();
}

#[test]
fn seen_toggle_is_optimistic() {
    let fx = fixture();
    let (request, response) = header_response("INBOX", &[(1, "a@x.test", "s", 9)]);
    fx.controller.handle_response(&request, &response);
    assert!(!fx.controller.flags("INBOX", 1).unwrap().is_seen());
    fx.controller.set_current_message(1);
    // the local flag flips before any network confirmation
    assert!(fx.controller.flags("INBOX", 1).unwrap().is_seen());
    fx.controller.shutdown();
}

#[test]
fn reply_prefills_threading_and_quote() {
    let fx = fixture();
    let raw = b"Message-ID: <orig@t>\r\nFrom: Al <al@x.test>\r\nSubject: Plans\r\nDate: Mon, 01 Jan 2024 09:00:00 +0000\r\n\r\n";
    let request = Request {
        folder: "INBOX".to_string(),
        get_uids: true,
        get_headers: [7].into_iter().collect(),
        ..Request::default()
    };
    let mut response = Response {
        folder: "INBOX".to_string(),
        uids: [7].into_iter().collect(),
        ..Response::default()
    };
    response.headers.insert(7, mime::parse_header(raw));
    let mut bodies = BTreeMap::new();
    bodies.insert(
        7,
        mime::parse_body(b"Content-Type: text/plain\r\n\r\nsee you then\r\n", false),
    );
    response.bodies = bodies;
    fx.controller.handle_response(&request, &response);

    let fields = fx.controller.start_compose(Some(("INBOX".to_string(), 7)), false);
    assert_eq!(fields.subject, "Re: Plans");
    assert_eq!(fields.to[0].address, "al@x.test");
    assert_eq!(fields.in_reply_to.as_deref(), Some("orig@t"));
    assert!(fields.body.contains("> see you then"));
    fx.controller.cancel_compose();
    fx.controller.shutdown();
}
