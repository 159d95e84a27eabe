//! Integration tests for the mail crate
//!
//! These tests drive the whole pipeline (compile, select, search, fetch,
//! second pass, cache, batch) against the in-memory transport.

use chrono::{NaiveDate, TimeZone, Utc};
use mail::{
    Action, AuthMechanism, BadAuthMechanismError, Batch, BatchError, Call, Filter, Flag,
    InMemoryTransport, SeedMessage, Selector, Server, ServerConfig, StatusItem, compile,
};
use regex::Regex;
use std::sync::Arc;
use std::thread::{self, ThreadId};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config() -> ServerConfig {
    ServerConfig::new("mail.example.com", "tester")
}

fn connect(transport: &InMemoryTransport) -> Server {
    init_logging();
    Server::connect(transport.clone(), &config(), "password").unwrap()
}

fn seed(transport: &InMemoryTransport, mailbox: &str, from: &str, subject: &str) {
    transport
        .seed(mailbox, SeedMessage::compose(from, "me@example.com", subject, "body"))
        .unwrap();
}

#[test]
fn test_date_filter_pipeline() {
    let transport = InMemoryTransport::new();
    for (day, subject) in [(1, "early"), (5, "on the day"), (10, "late")] {
        let date = Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap();
        transport
            .seed(
                "INBOX",
                SeedMessage::compose("a@example.com", "b@example.com", subject, ".").with_date(date),
            )
            .unwrap();
    }
    let server = connect(&transport);
    let inbox = server.mailbox("INBOX").unwrap();
    let d = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();

    let before = Filter::new().with("headers.date.<", d);
    assert_eq!(compile(&before).unwrap().criteria, vec!["BEFORE", "05-Mar-2024"]);

    let subjects = |filter: &Filter| -> Vec<String> {
        inbox
            .messages(filter)
            .unwrap()
            .iter()
            .filter_map(|m| m.cached_header("subject"))
            .collect()
    };
    assert_eq!(subjects(&before), vec!["early"]);
    assert_eq!(
        subjects(&Filter::new().with("headers.date.<=", d)),
        vec!["early", "on the day"]
    );
    assert_eq!(subjects(&Filter::new().with("headers.date.>", d)), vec!["late"]);
    assert_eq!(
        subjects(&Filter::new().with("headers.date.<>", d)),
        vec!["early", "late"]
    );
}

#[test]
fn test_regex_over_selection_is_filtered_out() {
    let transport = InMemoryTransport::new();
    seed(&transport, "INBOX", "list@example.com", "[rust-users] Weekly digest");
    seed(&transport, "INBOX", "list@example.com", "digest: news from [rust-users] folks");
    seed(&transport, "INBOX", "bob@example.com", "Lunch");
    let server = connect(&transport);
    let inbox = server.mailbox("INBOX").unwrap();

    let pattern = r"^\[rust-users\] .*digest";
    let filter = Filter::new().with("headers.subject.~", pattern);
    let compiled = compile(&filter).unwrap();
    assert_eq!(
        compiled.criteria,
        vec!["SUBJECT", "[rust-users] ", "SUBJECT", "digest"]
    );

    transport.clear_calls();
    let messages = inbox.messages(&filter).unwrap();

    // The server matched both list messages; only one survives the regex
    let fetched: Vec<usize> = transport
        .calls()
        .iter()
        .filter(|c| c.command == "FETCH")
        .map(|c| c.ids)
        .collect();
    assert_eq!(fetched, vec![2]);

    let regex = Regex::new(pattern).unwrap();
    assert_eq!(messages.len(), 1);
    for message in &messages {
        let subject = message.cached_header("subject").unwrap();
        assert!(regex.is_match(&subject), "{} should match", subject);
    }
}

#[test]
fn test_hex_escapes_become_search_literals() {
    let transport = InMemoryTransport::new();
    seed(&transport, "INBOX", "a@example.com", "Abc");
    seed(&transport, "INBOX", "a@example.com", "41bc");
    let server = connect(&transport);
    let inbox = server.mailbox("INBOX").unwrap();

    for pattern in [r"^\x41bc$", r"^\u0041bc$", r"^\x{41}bc$"] {
        let filter = Filter::new().with("headers.subject.~", pattern);
        assert_eq!(compile(&filter).unwrap().criteria, vec!["SUBJECT", "Abc"]);

        let messages = inbox.messages(&filter).unwrap();
        assert_eq!(messages.len(), 1, "{}", pattern);
        assert_eq!(messages[0].cached_header("subject").as_deref(), Some("Abc"));
    }
}

#[test]
fn test_encoded_subject_matches_decoded_regex() {
    let transport = InMemoryTransport::new();
    seed(&transport, "INBOX", "a@example.com", "=?UTF-8?B?SW52b2ljZQ==?=");
    seed(&transport, "INBOX", "a@example.com", "=?ISO-8859-1?Q?Re=3A_Caf=E9?=");
    let server = connect(&transport);
    let inbox = server.mailbox("INBOX").unwrap();

    let invoices = inbox
        .messages(&Filter::new().with("headers.subject.~", "^Invoice$"))
        .unwrap();
    assert_eq!(invoices.len(), 1);
    assert_eq!(invoices[0].cached_header("subject").as_deref(), Some("Invoice"));

    let cafe = inbox
        .messages(&Filter::new().with("headers.subject.=", "Caf\u{e9}"))
        .unwrap();
    assert_eq!(cafe.len(), 1);
    assert_eq!(cafe[0].cached_header("subject").as_deref(), Some("Re: Caf\u{e9}"));
}

#[test]
fn test_filters_differing_only_in_separators_are_cached_apart() {
    let transport = InMemoryTransport::new();
    transport
        .seed(
            "INBOX",
            SeedMessage::compose("a@example.com", "me@example.com", "packed", "x&headers.subject.==y"),
        )
        .unwrap();
    transport
        .seed(
            "INBOX",
            SeedMessage::compose("a@example.com", "me@example.com", "yes split", "x marks"),
        )
        .unwrap();
    let server = connect(&transport);
    let inbox = server.mailbox("INBOX").unwrap();

    let packed = Filter::new().with("body.=", "x&headers.subject.==y");
    let split = Filter::new()
        .with("body.=", "x")
        .with("headers.subject.=", "y");

    transport.clear_calls();
    let first = inbox.messages(&packed).unwrap();
    let second = inbox.messages(&split).unwrap();
    assert_eq!(transport.count_calls("SEARCH"), 2);

    assert_eq!(first.len(), 1);
    assert_eq!(first[0].cached_header("subject").as_deref(), Some("packed"));
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].cached_header("subject").as_deref(), Some("yes split"));
}

#[test]
fn test_body_regex_and_flag_residuals() {
    let transport = InMemoryTransport::new();
    transport
        .seed(
            "INBOX",
            SeedMessage::compose("a@example.com", "me@example.com", "one", "Order 1234 shipped")
                .with_flags(vec![Flag::Seen]),
        )
        .unwrap();
    transport
        .seed(
            "INBOX",
            SeedMessage::compose("a@example.com", "me@example.com", "two", "Order shipped soon"),
        )
        .unwrap();
    let server = connect(&transport);
    let inbox = server.mailbox("INBOX").unwrap();

    let shipped = inbox
        .messages(&Filter::new().with("body.~", r"Order \d+ shipped"))
        .unwrap();
    assert_eq!(shipped.len(), 1);
    assert_eq!(shipped[0].cached_header("subject").as_deref(), Some("one"));

    let unseen = inbox
        .messages(&Filter::new().with("flag.seen.=", false))
        .unwrap();
    assert_eq!(unseen.len(), 1);
    assert_eq!(unseen[0].cached_header("subject").as_deref(), Some("two"));
}

#[test]
fn test_new_filter() {
    let transport = InMemoryTransport::new();
    transport
        .seed(
            "INBOX",
            SeedMessage::compose("a@example.com", "me@example.com", "fresh", ".")
                .with_flags(vec![Flag::Recent]),
        )
        .unwrap();
    seed(&transport, "INBOX", "a@example.com", "old");
    let server = connect(&transport);
    let inbox = server.mailbox("INBOX").unwrap();

    let new = inbox.messages(&Filter::new().with("new", true)).unwrap();
    assert_eq!(new.len(), 1);
    assert_eq!(new[0].cached_header("subject").as_deref(), Some("fresh"));

    let not_new = inbox.messages(&Filter::new().with("new", false)).unwrap();
    assert_eq!(not_new.len(), 1);
    assert_eq!(not_new[0].cached_header("subject").as_deref(), Some("old"));
}

#[test]
fn test_cache_returns_same_handles_until_refresh() {
    let transport = InMemoryTransport::new();
    seed(&transport, "INBOX", "alice@example.com", "first");
    seed(&transport, "INBOX", "bob@example.com", "second");
    let server = connect(&transport);
    let inbox = server.mailbox("INBOX").unwrap();
    let filter = Filter::new().with("headers.from.=", "alice");

    transport.clear_calls();
    let first = inbox.messages(&filter).unwrap();
    let second = inbox.messages(&filter).unwrap();
    assert_eq!(transport.count_calls("SEARCH"), 1);
    assert_eq!(first.len(), second.len());
    assert!(first.iter().zip(&second).all(|(a, b)| Arc::ptr_eq(a, b)));

    // Another handle for the same mailbox shares the cache
    let again = server.mailbox("INBOX").unwrap();
    let third = again.messages(&filter).unwrap();
    assert!(Arc::ptr_eq(&first[0], &third[0]));
    assert_eq!(transport.count_calls("SEARCH"), 1);

    seed(&transport, "INBOX", "alice@example.com", "third");
    assert_eq!(inbox.messages(&filter).unwrap().len(), 1);

    let refreshed = inbox.refresh(&filter).unwrap();
    assert_eq!(transport.count_calls("SEARCH"), 2);
    assert_eq!(refreshed.len(), 2);
    assert!(!Arc::ptr_eq(&first[0], &refreshed[0]));
    assert!(Arc::ptr_eq(&refreshed[1], &inbox.messages(&filter).unwrap()[1]));
}

#[test]
fn test_delete_all_then_expunge() {
    let transport = InMemoryTransport::new();
    for i in 0..5 {
        seed(&transport, "INBOX", "a@example.com", &format!("message {}", i));
    }
    let server = connect(&transport);
    let inbox = server.mailbox("INBOX").unwrap();

    let report = inbox
        .batch(&Batch::new().with(Action::Delete, Selector::All))
        .unwrap();
    assert_eq!(report.applied, 5);
    assert!(
        transport
            .contents("INBOX")
            .iter()
            .all(|(_, flags)| flags.contains(&Flag::Deleted))
    );

    inbox.expunge().unwrap();
    assert_eq!(inbox.count(StatusItem::Messages).unwrap(), 0);
    assert!(inbox.refresh(&Filter::new()).unwrap().is_empty());
}

#[test]
fn test_read_marks_seen() {
    let transport = InMemoryTransport::new();
    seed(&transport, "INBOX", "a@example.com", "unread");
    let server = connect(&transport);
    let inbox = server.mailbox("INBOX").unwrap();

    let messages = inbox.messages(&Filter::new()).unwrap();
    assert!(!messages[0].has_flag(&Flag::Seen));

    inbox
        .batch(&Batch::new().with(Action::Read, messages.clone()))
        .unwrap();
    assert!(messages[0].has_flag(&Flag::Seen));
    assert_eq!(inbox.count(StatusItem::Unseen).unwrap(), 0);
}

#[test]
fn test_move_into_destination() {
    let transport = InMemoryTransport::new();
    transport.add_mailbox("Archive").unwrap();
    seed(&transport, "INBOX", "a@example.com", "keep");
    seed(&transport, "INBOX", "a@example.com", "move one");
    seed(&transport, "INBOX", "a@example.com", "move two");
    seed(&transport, "Archive", "a@example.com", "already archived");
    let server = connect(&transport);
    let inbox = server.mailbox("INBOX").unwrap();
    let archive = server.mailbox("Archive").unwrap();

    let to_move: Vec<_> = inbox.messages(&Filter::new()).unwrap()[1..].to_vec();
    let archived = archive.messages(&Filter::new()).unwrap();
    let mut selection = to_move.clone();
    selection.extend(archived);

    let report = archive
        .batch(&Batch::new().with(Action::Move, selection))
        .unwrap();
    assert_eq!(report.applied, 2);
    assert_eq!(report.skipped, 1);

    let mut archive_subjects = transport.subjects("Archive");
    archive_subjects.sort();
    assert_eq!(
        archive_subjects,
        vec!["already archived", "move one", "move two"]
    );
    assert!(
        transport
            .contents("Archive")
            .iter()
            .all(|(_, flags)| !flags.contains(&Flag::Deleted))
    );

    let inbox_flags: Vec<bool> = transport
        .contents("INBOX")
        .iter()
        .map(|(_, flags)| flags.contains(&Flag::Deleted))
        .collect();
    assert_eq!(inbox_flags, vec![false, true, true]);
    assert!(to_move.iter().all(|m| m.has_flag(&Flag::Deleted)));
}

#[test]
fn test_copy_across_connections() {
    let source = InMemoryTransport::new();
    seed(&source, "INBOX", "a@example.com", "travelling");
    let destination = InMemoryTransport::new();

    let server_a = connect(&source);
    let server_b = connect(&destination);
    let message = server_a.mailbox("INBOX").unwrap().messages(&Filter::new()).unwrap()[0].clone();

    server_b.mailbox("INBOX").unwrap().push(&message).unwrap();

    assert_eq!(destination.subjects("INBOX"), vec!["travelling"]);
    assert_eq!(destination.count_calls("APPEND"), 1);
    assert_eq!(source.count_calls("UID COPY"), 0);
}

#[test]
fn test_batch_slicing() {
    let transport = InMemoryTransport::new();
    for i in 0..7000 {
        seed(&transport, "INBOX", "bulk@example.com", &format!("bulk {}", i));
    }
    init_logging();
    let server = Server::connect(
        transport.clone(),
        &config().with_slice_size(3000),
        "password",
    )
    .unwrap();
    let inbox = server.mailbox("INBOX").unwrap();

    transport.clear_calls();
    let report = inbox
        .batch(&Batch::new().with(Action::Delete, Selector::All))
        .unwrap();

    let stores: Vec<usize> = transport
        .calls()
        .iter()
        .filter(|c| c.command == "UID STORE")
        .map(|c| c.ids)
        .collect();
    assert_eq!(stores, vec![3000, 3000, 1000]);
    assert_eq!(report.slices, 3);

    let fetches: Vec<usize> = transport
        .calls()
        .iter()
        .filter(|c| c.command == "FETCH")
        .map(|c| c.ids)
        .collect();
    assert_eq!(fetches, vec![3000, 3000, 1000]);
}

#[test]
fn test_batch_failure_keeps_applied_slices() {
    let transport = InMemoryTransport::new();
    for i in 0..5 {
        seed(&transport, "INBOX", "a@example.com", &format!("message {}", i));
    }
    init_logging();
    let server =
        Server::connect(transport.clone(), &config().with_slice_size(2), "password").unwrap();
    let inbox = server.mailbox("INBOX").unwrap();
    let messages = inbox.messages(&Filter::new()).unwrap();

    transport.fail_nth("UID STORE", 2);
    let err = inbox
        .batch(&Batch::new().with(Action::Delete, messages))
        .unwrap_err();

    let batch = err.downcast_ref::<BatchError>().unwrap();
    assert_eq!(batch.action, Action::Delete);
    assert_eq!(batch.completed_slices, 1);
    assert_eq!(batch.total_slices, 3);

    let deleted: Vec<bool> = transport
        .contents("INBOX")
        .iter()
        .map(|(_, flags)| flags.contains(&Flag::Deleted))
        .collect();
    assert_eq!(deleted, vec![true, true, false, false, false]);

    // The connection is still usable
    assert_eq!(inbox.count(StatusItem::Messages).unwrap(), 5);
}

#[test]
fn test_concurrent_selections_do_not_interleave() {
    let transport = InMemoryTransport::new();
    transport.add_mailbox("Lists").unwrap();
    for i in 0..20 {
        seed(&transport, "INBOX", "a@example.com", &format!("inbox {}", i));
        seed(&transport, "Lists", "list@example.com", &format!("list {}", i));
    }
    let server = connect(&transport);
    transport.clear_calls();

    thread::scope(|scope| {
        for name in ["INBOX", "Lists", "INBOX", "Lists"] {
            let server = &server;
            scope.spawn(move || {
                let mailbox = server.mailbox(name).unwrap();
                let filter = Filter::new().with("headers.subject.~", r"\d+$");
                for _ in 0..25 {
                    assert_eq!(mailbox.refresh(&filter).unwrap().len(), 20);
                    mailbox.count(StatusItem::Messages).unwrap();
                }
            });
        }
    });

    let calls: Vec<Call> = transport.calls();
    let mut current: Option<(String, ThreadId)> = None;
    for call in &calls {
        match call.command.as_str() {
            "SELECT" => current = call.mailbox.clone().map(|m| (m, call.thread)),
            "SEARCH" | "FETCH" | "STATUS" => {
                let (mailbox, thread) = current.as_ref().unwrap();
                assert_eq!(call.mailbox.as_ref(), Some(mailbox));
                assert_eq!(&call.thread, thread);
            }
            _ => {}
        }
    }
    assert_eq!(transport.count_calls("SELECT"), 4 * 25 * 2);
}

#[test]
fn test_bad_auth_mechanism() {
    init_logging();
    let transport = InMemoryTransport::new();
    let config = config().with_mechanism(AuthMechanism::CramMd5);

    let err = Server::connect(transport.clone(), &config, "password").unwrap_err();
    let bad = err.downcast_ref::<BadAuthMechanismError>().unwrap();
    assert_eq!(bad.expected, vec![AuthMechanism::Plain, AuthMechanism::Login]);
    assert_eq!(transport.count_calls("AUTHENTICATE"), 0);
}

#[test]
fn test_guard_released_after_failed_operation() {
    let transport = InMemoryTransport::new();
    seed(&transport, "INBOX", "a@example.com", "hello");
    let server = connect(&transport);
    let inbox = server.mailbox("INBOX").unwrap();

    transport.fail_nth("SEARCH", 1);
    let filter = Filter::new().with("headers.subject.=", "hello");
    assert!(inbox.messages(&filter).is_err());

    // A failed load is not cached and the lock is free again
    assert_eq!(inbox.messages(&filter).unwrap().len(), 1);
}

#[test]
fn test_mailbox_management() {
    let transport = InMemoryTransport::new();
    let server = connect(&transport);

    let projects = server.create_mailbox("Projects").unwrap();
    projects.subscribe().unwrap();
    assert!(projects.is_subscribed().unwrap());
    projects.unsubscribe().unwrap();
    assert!(!projects.is_subscribed().unwrap());

    projects.rename("Projects/2024").unwrap();
    assert_eq!(server.mailbox("Projects/2024").unwrap().name(), "Projects/2024");

    let quota = projects.quota().unwrap();
    assert_eq!(quota[0].resource, "STORAGE");
    assert!(!projects.acls().unwrap().is_empty());

    projects.delete().unwrap();
    assert!(server.mailbox("Projects/2024").is_err());
}

#[test]
fn test_lazy_message_accessors() {
    let transport = InMemoryTransport::new();
    transport
        .seed(
            "INBOX",
            SeedMessage::raw(
                "From: a@example.com\r\nTo: b@example.com\r\nSubject: Report\r\nX-Priority: 1\r\n\r\nnumbers",
            ),
        )
        .unwrap();
    let server = connect(&transport);
    let inbox = server.mailbox("INBOX").unwrap();
    let message = inbox.messages(&Filter::new()).unwrap()[0].clone();

    assert_eq!(message.to_string(), "1 # a@example.com -> b@example.com :: Report");
    assert_eq!(message.cached_header("x-priority"), None);
    assert_eq!(message.header("X-Priority").unwrap().as_deref(), Some("1"));
    assert_eq!(message.text().unwrap(), "numbers");
    assert_eq!(message.mailbox_name(), "INBOX");
}
