//! Integration tests for the IMAP engine.
//!
//! These tests drive the session against a scripted mock transport and a
//! mock clock, without a real server connection.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mailpoll_core::{
    Credentials, FileHandle, FileMode, FileStore, MockClock, MockTransport, PollResult, Status,
};
use mailpoll_imap::{
    AppendOptions, CollectingHandler, Config, DataEvent, Error, FetchRequest, Flag, IdleEvent,
    ImapClient, ImapState, SearchOptions, Security, codes,
};
use mailpoll_smtp::{OutboundMessage, TextBody};

const GREETING: &str =
    "* OK [CAPABILITY IMAP4rev1 AUTH=PLAIN AUTH=XOAUTH2 SASL-IR IDLE] server ready\r\n";

const SELECT_REPLY: &str = concat!(
    "* 3 EXISTS\r\n",
    "* 1 RECENT\r\n",
    "* FLAGS (\\Seen \\Answered \\Draft)\r\n",
    "* OK [UIDVALIDITY 7] valid\r\n",
    "* OK [UIDNEXT 40] predicted\r\n",
    "A0001 OK [READ-WRITE] SELECT completed\r\n",
);

type Records = Arc<Mutex<Vec<Status<ImapState>>>>;

/// File store that keeps written files in a shared map.
#[derive(Default, Clone)]
struct MemStore {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemStore {
    fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }
}

struct MemFile {
    path: String,
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl FileHandle for MemFile {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.files
            .lock()
            .unwrap()
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }

    fn seek(&mut self, _pos: u64) -> io::Result<()> {
        Ok(())
    }

    fn size(&self) -> u64 {
        self.files
            .lock()
            .unwrap()
            .get(&self.path)
            .map_or(0, |f| f.len() as u64)
    }
}

impl FileStore for MemStore {
    fn open(&mut self, path: &str, mode: FileMode) -> io::Result<Option<Box<dyn FileHandle>>> {
        match mode {
            FileMode::Remove => {
                self.files.lock().unwrap().remove(path);
                Ok(None)
            }
            FileMode::Write => {
                self.files.lock().unwrap().insert(path.to_string(), Vec::new());
                Ok(Some(Box::new(MemFile {
                    path: path.to_string(),
                    files: Arc::clone(&self.files),
                })))
            }
            FileMode::Read | FileMode::Append => Err(io::Error::from(io::ErrorKind::Unsupported)),
        }
    }
}

fn plain_config() -> Config {
    Config::builder("imap.example.com")
        .security(Security::None)
        .build()
}

/// Routes engine logs to the test output. `RUST_LOG` selects the level.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn transport(greeting: &str) -> MockTransport {
    init_tracing();
    let mut t = MockTransport::new();
    t.push(greeting);
    t
}

fn recording(client: ImapClient<MockTransport>) -> (ImapClient<MockTransport>, Records) {
    let records: Records = Arc::default();
    let sink = Arc::clone(&records);
    let client = client.with_status(move |s: &Status<ImapState>| {
        sink.lock().unwrap().push(s.clone());
    });
    (client, records)
}

/// Client authenticated with PLAIN, handshake output cleared.
fn authenticated(config: Config) -> (ImapClient<MockTransport>, CollectingHandler) {
    let mut t = transport(GREETING);
    t.reply("A0000 OK authenticated\r\n");
    let handler = CollectingHandler::new();
    let mut client = ImapClient::new(t, config).with_data_handler(handler.clone());
    client
        .authenticate(Credentials::password("user", "pass"))
        .unwrap();
    client.run().unwrap();
    client.transport_mut().take_sent();
    (client, handler)
}

/// Authenticated client with INBOX selected.
fn selected(config: Config) -> (ImapClient<MockTransport>, CollectingHandler) {
    let (mut client, handler) = authenticated(config);
    client.transport_mut().reply(SELECT_REPLY);
    client.select("INBOX").unwrap();
    client.run().unwrap();
    client.transport_mut().take_sent();
    (client, handler)
}

fn message() -> OutboundMessage {
    OutboundMessage::new()
        .from("Me", "me@example.com")
        .to("You", "you@example.com")
        .subject("Draft")
        .text(TextBody::plain("Hello"))
}

#[test]
fn test_connect_reads_greeting_capabilities() {
    let mut client = ImapClient::new(transport(GREETING), plain_config());
    client.connect().unwrap();
    client.run().unwrap();

    assert_eq!(client.state(), ImapState::Prompt);
    assert!(client.capabilities().idle());
    assert!(client.capabilities().sasl_ir());
    assert!(!client.is_authenticated());
    assert_eq!(client.transport().sent_text(), "");
}

#[test]
fn test_connect_asks_for_capabilities() {
    let mut t = transport("* OK server ready\r\n");
    t.reply("* CAPABILITY IMAP4rev1 IDLE AUTH=PLAIN\r\nA0000 OK done\r\n");
    let mut client = ImapClient::new(t, plain_config());
    client.connect().unwrap();
    client.run().unwrap();

    assert_eq!(client.transport().sent_text(), "A0000 CAPABILITY\r\n");
    assert!(client.capabilities().idle());
}

#[test]
fn test_preauth_greeting() {
    let mut client = ImapClient::new(
        transport("* PREAUTH [CAPABILITY IMAP4rev1] welcome back\r\n"),
        plain_config(),
    );
    client.connect().unwrap();
    client.run().unwrap();

    assert!(client.is_authenticated());
    assert_eq!(client.state(), ImapState::Prompt);
}

#[test]
fn test_starttls_rereads_capabilities() {
    let mut t = transport("* OK [CAPABILITY IMAP4rev1 STARTTLS LOGINDISABLED] hi\r\n");
    t.reply("A0000 OK begin TLS\r\n");
    t.reply("* CAPABILITY IMAP4rev1 AUTH=PLAIN\r\nA0001 OK\r\n");
    let config = Config::builder("imap.example.com")
        .security(Security::StartTls)
        .build();
    let mut client = ImapClient::new(t, config).with_tls_hook(Box::new(|t: &mut MockTransport| {
        t.mark_secured();
        true
    }));
    client.connect().unwrap();
    client.run().unwrap();

    assert!(client.is_secured());
    assert!(client.transport().is_secured());
    assert!(!client.capabilities().starttls());
    assert_eq!(
        client.transport().sent_text(),
        "A0000 STARTTLS\r\nA0001 CAPABILITY\r\n"
    );
}

#[test]
fn test_starttls_not_offered() {
    let config = Config::builder("imap.example.com")
        .security(Security::StartTls)
        .build();
    let mut client = ImapClient::new(transport(GREETING), config);
    client.connect().unwrap();
    let err = client.run().unwrap_err();

    assert!(matches!(err, Error::Protocol(_)));
    assert_eq!(client.state(), ImapState::Closed);
    assert!(!client.is_connected());
}

#[test]
fn test_auth_prefers_xoauth2_with_token() {
    let mut t = transport(GREETING);
    t.reply("A0000 OK [CAPABILITY IMAP4rev1 IDLE] welcome\r\n");
    let mut client = ImapClient::new(t, plain_config());
    let creds = Credentials::access_token("user@example.com", "token").with_password("pass");
    client.authenticate(creds).unwrap();
    client.run().unwrap();

    assert!(client.is_authenticated());
    assert_eq!(client.state(), ImapState::Prompt);
    let sent = client.transport().sent_text();
    assert_eq!(
        sent,
        "A0000 AUTHENTICATE XOAUTH2 dXNlcj11c2VyQGV4YW1wbGUuY29tAWF1dGg9QmVhcmVyIHRva2VuAQE=\r\n"
    );
}

#[test]
fn test_login_fallback_then_id() {
    let mut t = transport("* OK [CAPABILITY IMAP4rev1 ID] ready\r\n");
    t.reply("A0000 OK LOGIN completed\r\n");
    t.reply("* ID (\"name\" \"Dovecot\")\r\nA0001 OK ID completed\r\n");
    let mut client = ImapClient::new(t, plain_config());
    client
        .authenticate(Credentials::password("joe", "hunter2"))
        .unwrap();
    client.run().unwrap();

    let sent = client.transport().sent_text();
    assert!(sent.starts_with("A0000 LOGIN \"joe\" \"hunter2\"\r\nA0001 ID (\"name\" \"mailpoll\" "));
    assert!(client.is_authenticated());
    assert_eq!(client.state(), ImapState::Prompt);
}

#[test]
fn test_auth_without_sasl_ir_waits_for_continuation() {
    let mut t = transport("* OK [CAPABILITY IMAP4rev1 AUTH=PLAIN] ready\r\n");
    t.reply("+ \r\n");
    t.reply("A0000 OK done\r\n");
    let mut client = ImapClient::new(t, plain_config());
    client
        .authenticate(Credentials::password("user", "pass"))
        .unwrap();
    client.run().unwrap();

    assert_eq!(
        client.transport().sent_text(),
        "A0000 AUTHENTICATE PLAIN\r\nAHVzZXIAcGFzcw==\r\n"
    );
}

#[test]
fn test_auth_rejected_stops_connection() {
    let mut t = transport(GREETING);
    t.reply("A0000 NO [AUTHENTICATIONFAILED] invalid credentials\r\n");
    let (mut client, records) = recording(ImapClient::new(t, plain_config()));
    client
        .authenticate(Credentials::password("user", "wrong"))
        .unwrap();
    let err = client.run().unwrap_err();

    assert!(matches!(err, Error::Authentication(_)));
    assert_eq!(err.code(), -201);
    assert!(!client.is_connected());
    assert_eq!(client.state(), ImapState::Closed);
    let records = records.lock().unwrap();
    assert!(records.iter().any(|r| r.code == Some(-201)));
}

#[test]
fn test_no_usable_mechanism() {
    let mut client = ImapClient::new(
        transport("* OK [CAPABILITY IMAP4rev1 AUTH=XOAUTH2 LOGINDISABLED] ready\r\n"),
        plain_config(),
    );
    client
        .authenticate(Credentials::password("user", "pass"))
        .unwrap();
    let err = client.run().unwrap_err();

    assert!(matches!(err, Error::MechanismNotSupported));
    assert_eq!(client.transport().sent_text(), "");
}

#[test]
fn test_list_then_select_unknown_mailbox() {
    let (mut client, handler) = authenticated(plain_config());
    client.transport_mut().reply(concat!(
        "* LIST (\\HasNoChildren) \"/\" INBOX\r\n",
        "* LIST (\\HasNoChildren \\Sent) \"/\" \"Sent Items\"\r\n",
        "A0001 OK LIST completed\r\n",
    ));
    client.list().unwrap();
    client.run().unwrap();

    assert_eq!(client.transport().sent_text(), "A0001 LIST \"\" *\r\n");
    let names: Vec<&str> = client.mailboxes().iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["INBOX", "Sent Items"]);
    assert_eq!(
        handler
            .events()
            .iter()
            .filter(|e| matches!(e, DataEvent::Mailbox(_)))
            .count(),
        2
    );

    client.transport_mut().take_sent();
    let err = client.select("Archive").unwrap_err();
    assert!(matches!(err, Error::MailboxNotFound(_)));
    assert_eq!(err.code(), codes::MAILBOX_NOT_EXISTS);
    assert_eq!(client.transport().sent_text(), "");
}

#[test]
fn test_select_reads_mailbox_state() {
    let (client, _) = selected(plain_config());
    let mailbox = client.mailbox().unwrap();

    assert_eq!(mailbox.name, "INBOX");
    assert_eq!(mailbox.exists, 3);
    assert_eq!(mailbox.recent, 1);
    assert_eq!(mailbox.uid_validity, 7);
    assert_eq!(mailbox.uid_next, 40);
    assert!(!mailbox.read_only);
    assert!(mailbox.flags.contains(&Flag::Draft));
}

#[test]
fn test_select_repeat_within_window_is_skipped() {
    let clock = MockClock::shared();
    let (client, _) = authenticated(plain_config());
    let mut client = client.with_clock(clock.clone());
    client.transport_mut().reply(SELECT_REPLY);
    client.select("INBOX").unwrap();
    client.run().unwrap();
    client.transport_mut().take_sent();

    client.select("INBOX").unwrap();
    assert!(!client.is_busy());
    assert_eq!(client.transport().sent_text(), "");

    clock.advance(Duration::from_secs(4));
    client.select("INBOX").unwrap();
    assert!(client.is_busy());
    assert_eq!(client.poll(), PollResult::Continue);
    assert_eq!(client.transport().sent_text(), "A0002 SELECT INBOX\r\n");
}

#[test]
fn test_search_validation_sends_nothing() {
    let (mut client, _) = authenticated(plain_config());
    assert!(matches!(
        client.search("SEARCH UNSEEN").unwrap_err(),
        Error::NoMailbox
    ));

    let (mut client, _) = selected(plain_config());
    let err = client.search("UNSEEN").unwrap_err();
    assert_eq!(err.code(), codes::INVALID_SEARCH_CRITERIA);
    assert!(client.search("SEARCH ALL FETCH 1 BODY[]").is_err());
    assert!(matches!(
        client.search("SEARCH MODSEQ 100").unwrap_err(),
        Error::ModseqNotSupported
    ));
    assert_eq!(client.transport().sent_text(), "");
    assert!(!client.is_busy());
}

#[test]
fn test_search_orders_and_limits() {
    let config = Config::builder("imap.example.com")
        .security(Security::None)
        .search_limit(2)
        .build();
    let (mut client, handler) = selected(config);
    client
        .transport_mut()
        .reply("* SEARCH 1 3 2\r\nA0002 OK SEARCH completed\r\n");
    client.search("SEARCH UNSEEN").unwrap();
    client.run().unwrap();

    assert_eq!(client.transport().sent_text(), "A0002 SEARCH UNSEEN\r\n");
    assert_eq!(client.search_results(), &[3, 2]);
    let events = handler.events();
    let Some(DataEvent::Search(result)) = events.last() else {
        panic!("no search event: {events:?}");
    };
    assert_eq!(result.total, 3);
    assert!(!result.uid);
}

#[test]
fn test_search_fetches_envelopes() {
    let (mut client, handler) = selected(plain_config());
    client
        .transport_mut()
        .reply("* SEARCH 2\r\nA0002 OK\r\n")
        .reply(concat!(
            "* 2 FETCH (FLAGS (\\Seen) RFC822.SIZE 120 ENVELOPE (NIL \"Hello\" ",
            "((\"Joe\" NIL \"joe\" \"example.com\")) NIL NIL NIL NIL NIL NIL NIL))\r\n",
            "A0003 OK\r\n",
        ));
    client
        .search_with("SEARCH ALL", SearchOptions::default().with_envelopes())
        .unwrap();
    client.run().unwrap();

    assert_eq!(
        client.transport().sent_text(),
        "A0002 SEARCH ALL\r\nA0003 FETCH 2 FULL\r\n"
    );
    let envelope = handler
        .events()
        .into_iter()
        .find_map(|e| match e {
            DataEvent::Envelope(h) => Some(h),
            _ => None,
        })
        .unwrap();
    assert_eq!(envelope.number, 2);
    assert_eq!(envelope.get("Subject"), Some("Hello"));
    assert_eq!(envelope.get("From"), Some("Joe <joe@example.com>"));
    assert_eq!(envelope.get("Size"), Some("120"));
}

#[test]
fn test_fetch_rejects_missing_messages() {
    let (mut client, _) = selected(plain_config());

    let err = client.fetch(FetchRequest::message(9)).unwrap_err();
    assert!(matches!(err, Error::MessageNotFound(9)));
    assert_eq!(err.code(), codes::MESSAGE_NOT_EXISTS);
    assert!(client.fetch(FetchRequest::message(0)).is_err());
    assert!(client.fetch(FetchRequest::uid(40)).is_err());
    assert_eq!(client.transport().sent_text(), "");
}

#[test]
fn test_fetch_needs_a_receiver() {
    let mut t = transport(GREETING);
    t.reply("A0000 OK\r\n").reply(SELECT_REPLY);
    let mut client = ImapClient::new(t, plain_config());
    client
        .authenticate(Credentials::password("user", "pass"))
        .unwrap();
    client.run().unwrap();
    client.select("INBOX").unwrap();
    client.run().unwrap();

    let err = client.fetch(FetchRequest::message(1)).unwrap_err();
    assert!(matches!(err, Error::NoDataHandler));
    assert_eq!(err.code(), codes::NO_CALLBACK);
}

#[test]
fn test_fetch_streams_decoded_parts() {
    let (client, handler) = selected(plain_config());
    let (mut client, records) = recording(client);
    client
        .transport_mut()
        .reply(concat!(
            "* 2 FETCH (FLAGS () RFC822.SIZE 300 ENVELOPE (NIL \"Report\" NIL NIL NIL NIL NIL NIL NIL NIL))\r\n",
            "A0002 OK\r\n",
        ))
        .reply(concat!(
            "* 2 FETCH (BODYSTRUCTURE (",
            "(\"TEXT\" \"PLAIN\" (\"CHARSET\" \"ISO-8859-1\") NIL NIL \"QUOTED-PRINTABLE\" 9 1 NIL NIL NIL NIL)",
            "(\"APPLICATION\" \"PDF\" (\"NAME\" \"r.pdf\") NIL NIL \"BASE64\" 8 NIL ",
            "(\"ATTACHMENT\" (\"FILENAME\" \"r.pdf\")) NIL NIL)",
            " \"MIXED\" (\"BOUNDARY\" \"b1\") NIL NIL NIL))\r\n",
            "A0003 OK\r\n",
        ))
        .reply("* 2 FETCH (BODY[1] {9}\r\ncaf=E9 ok)\r\nA0004 OK\r\n")
        .reply("* 2 FETCH (UID 12 BODY[2] {8}\r\naGVsbG8=)\r\nA0005 OK\r\n");
    client.fetch(FetchRequest::message(2)).unwrap();
    client.run().unwrap();

    assert_eq!(
        client.transport().sent_text(),
        concat!(
            "A0002 FETCH 2 FULL\r\n",
            "A0003 FETCH 2 BODYSTRUCTURE\r\n",
            "A0004 FETCH 2 BODY.PEEK[1]\r\n",
            "A0005 FETCH 2 BODY.PEEK[2]\r\n",
        )
    );
    assert_eq!(handler.part_bytes("1"), "café ok".as_bytes());
    assert_eq!(handler.part_bytes("2"), b"hello");
    let completed = handler
        .events()
        .iter()
        .filter(|e| matches!(e, DataEvent::Part { complete: true, .. }))
        .count();
    assert_eq!(completed, 2);
    assert_eq!(client.state(), ImapState::Prompt);
    let records = records.lock().unwrap();
    assert!(records.iter().any(|r| r.progress == Some(100)));
}

#[test]
fn test_fetch_quoted_part_reports_progress() {
    let (client, handler) = selected(plain_config());
    let (mut client, records) = recording(client);
    client
        .transport_mut()
        .reply("* 3 FETCH (ENVELOPE (NIL \"Short\" NIL NIL NIL NIL NIL NIL NIL NIL))\r\nA0002 OK\r\n")
        .reply("* 3 FETCH (BODYSTRUCTURE (\"TEXT\" \"PLAIN\" NIL NIL NIL \"7BIT\" 8 1))\r\nA0003 OK\r\n")
        .reply("* 3 FETCH (BODY[1] \"hi there\")\r\nA0004 OK\r\n");
    client.fetch(FetchRequest::message(3)).unwrap();
    client.run().unwrap();

    assert_eq!(handler.part_bytes("1"), b"hi there");
    let records = records.lock().unwrap();
    assert!(
        records
            .iter()
            .any(|r| r.progress == Some(100) && r.text == "part 1"),
        "{records:?}"
    );
}

#[test]
fn test_fetch_writes_download_file() {
    let store = MemStore::default();
    let config = Config::builder("imap.example.com")
        .security(Security::None)
        .download_dir("/sd/mail")
        .read_only(false)
        .build();
    let mut t = transport(GREETING);
    t.reply("A0000 OK\r\n").reply(SELECT_REPLY);
    let mut client = ImapClient::new(t, config).with_file_store(store.clone());
    client
        .authenticate(Credentials::password("user", "pass"))
        .unwrap();
    client.run().unwrap();
    client.select("INBOX").unwrap();
    client.run().unwrap();
    client.transport_mut().take_sent();

    client
        .transport_mut()
        .reply("* 1 FETCH (ENVELOPE (NIL \"Note\" NIL NIL NIL NIL NIL NIL NIL NIL))\r\nA0002 OK\r\n")
        .reply("* 1 FETCH (BODYSTRUCTURE (\"TEXT\" \"PLAIN\" NIL NIL NIL \"7BIT\" 5 1))\r\nA0003 OK\r\n")
        .reply("* 1 FETCH (BODY[1] {5}\r\nhello)\r\nA0004 OK\r\n");
    client.fetch(FetchRequest::message(1)).unwrap();
    client.run().unwrap();

    assert!(client.transport().sent_text().contains("A0004 FETCH 1 BODY[1]\r\n"));
    assert_eq!(store.file("/sd/mail/1/1.txt").unwrap(), b"hello");
}

#[test]
fn test_fetch_skips_oversized_part() {
    let config = Config::builder("imap.example.com")
        .security(Security::None)
        .part_size_limit(1000)
        .build();
    let (client, handler) = selected(config);
    let (mut client, records) = recording(client);
    client
        .transport_mut()
        .reply("* 1 FETCH (ENVELOPE (NIL \"Big\" NIL NIL NIL NIL NIL NIL NIL NIL))\r\nA0002 OK\r\n")
        .reply(concat!(
            "* 1 FETCH (BODYSTRUCTURE (\"VIDEO\" \"MP4\" (\"NAME\" \"v.mp4\") NIL NIL ",
            "\"BASE64\" 80000 NIL NIL NIL NIL))\r\n",
            "A0003 OK\r\n",
        ));
    client.fetch(FetchRequest::message(1)).unwrap();
    client.run().unwrap();

    assert!(!client.transport().sent_text().contains("BODY.PEEK"));
    assert!(handler.part_bytes("1").is_empty());
    let records = records.lock().unwrap();
    assert!(records.iter().any(|r| r.text.contains("skipped part 1")));
}

#[test]
fn test_fetch_headers_only_by_uid() {
    let (mut client, handler) = selected(plain_config());
    client.transport_mut().reply(concat!(
        "* 1 FETCH (UID 17 ENVELOPE (NIL \"Hi\" NIL NIL NIL NIL NIL NIL NIL NIL))\r\n",
        "A0002 OK\r\n",
    ));
    client.fetch(FetchRequest::uid(17).headers_only()).unwrap();
    client.run().unwrap();

    assert_eq!(client.transport().sent_text(), "A0002 UID FETCH 17 FULL\r\n");
    let events = handler.events();
    assert!(matches!(
        events.last(),
        Some(DataEvent::Envelope(h)) if h.uid == Some(17)
    ));
}

#[test]
fn test_fetch_without_data_is_not_found() {
    let (mut client, _) = selected(plain_config());
    client.transport_mut().reply("A0002 OK FETCH completed\r\n");
    client.fetch(FetchRequest::message(3)).unwrap();
    let err = client.run().unwrap_err();

    assert!(matches!(err, Error::MessageNotFound(3)));
    assert!(client.is_connected());
    assert_eq!(client.state(), ImapState::Prompt);
}

#[test]
fn test_idle_events_and_done_before_next_command() {
    let (mut client, handler) = selected(plain_config());
    client.transport_mut().reply("+ idling\r\n");
    client.idle().unwrap();
    client.run().unwrap();
    assert!(client.is_idling());
    assert_eq!(client.state(), ImapState::Idle);

    client
        .transport_mut()
        .push("* 4 EXISTS\r\n* 2 EXPUNGE\r\n");
    for _ in 0..3 {
        assert_eq!(client.poll(), PollResult::Continue);
    }
    let idle: Vec<IdleEvent> = handler
        .events()
        .into_iter()
        .filter_map(|e| match e {
            DataEvent::Idle(event) => Some(event),
            _ => None,
        })
        .collect();
    assert_eq!(idle, vec![IdleEvent::Exists(4), IdleEvent::Expunge(2)]);
    assert_eq!(client.mailbox().unwrap().exists, 3);

    client
        .transport_mut()
        .reply("A0002 OK IDLE terminated\r\n")
        .reply("* SEARCH 1\r\nA0003 OK\r\n");
    client.transport_mut().take_sent();
    client.search("SEARCH ALL").unwrap();
    client.run().unwrap();

    assert!(!client.is_idling());
    assert_eq!(
        client.transport().sent_text(),
        "DONE\r\nA0003 SEARCH ALL\r\n"
    );
    assert_eq!(client.search_results(), &[1]);
}

#[test]
fn test_idle_refreshes_after_timeout() {
    let clock = MockClock::shared();
    let (client, _) = selected(plain_config());
    let mut client = client.with_clock(clock.clone());
    client.transport_mut().reply("+ idling\r\n");
    client.idle().unwrap();
    client.run().unwrap();
    client.transport_mut().take_sent();

    client
        .transport_mut()
        .reply("A0002 OK IDLE terminated\r\n")
        .reply("+ idling again\r\n");
    clock.advance(Duration::from_secs(9 * 60));
    assert_eq!(client.poll(), PollResult::Continue);
    client.run().unwrap();

    assert!(client.is_idling());
    assert_eq!(client.transport().sent_text(), "DONE\r\nA0003 IDLE\r\n");
}

#[test]
fn test_idle_requires_capability() {
    let mut t = transport("* OK [CAPABILITY IMAP4rev1 AUTH=PLAIN SASL-IR] ready\r\n");
    t.reply("A0000 OK\r\n").reply(SELECT_REPLY);
    let mut client = ImapClient::new(t, plain_config());
    client
        .authenticate(Credentials::password("user", "pass"))
        .unwrap();
    client.run().unwrap();
    client.select("INBOX").unwrap();
    client.run().unwrap();

    let err = client.idle().unwrap_err();
    assert!(matches!(err, Error::IdleNotSupported));
    assert_eq!(err.code(), codes::IDLE_NOT_SUPPORTED);
}

#[test]
fn test_append_literal_matches_content() {
    let (mut client, _) = authenticated(plain_config());
    client
        .transport_mut()
        .reply("+ Ready for literal data\r\n")
        .reply("A0001 OK [APPENDUID 7 12] APPEND completed\r\n");
    let options = AppendOptions::default().flag(Flag::Seen).flag(Flag::Draft);
    client.append("Drafts", &message(), options).unwrap();
    client.run().unwrap();

    let sent = client.transport().sent_text();
    let header_end = sent.find("}\r\n").unwrap() + 3;
    let header = &sent[..header_end];
    assert!(header.starts_with("A0001 APPEND Drafts (\\Seen \\Draft) {"));
    let size: usize = header[header.find('{').unwrap() + 1..header_end - 3]
        .parse()
        .unwrap();
    let content = &sent[header_end..sent.len() - 2];
    assert_eq!(content.len(), size);
    assert!(content.contains("Subject: Draft\r\n"));
    assert!(sent.ends_with("\r\n"));
    assert_eq!(client.state(), ImapState::Prompt);
}

#[test]
fn test_custom_commands() {
    let (mut client, handler) = authenticated(plain_config());
    for verb in ["IDLE", "select INBOX", "LOGOUT", "uid login x"] {
        let err = client.command(verb).unwrap_err();
        assert!(matches!(err, Error::CommandNotAllowed(_)), "{verb}");
        assert_eq!(err.code(), codes::COMMAND_NOT_ALLOWED);
    }
    assert_eq!(client.transport().sent_text(), "");

    client
        .transport_mut()
        .reply("A0001 OK CREATE completed\r\n");
    client.command("CREATE Archive").unwrap();
    client.run().unwrap();

    assert_eq!(client.transport().sent_text(), "A0001 CREATE Archive\r\n");
    assert!(handler.events().iter().any(|e| matches!(
        e,
        DataEvent::CommandResponse { command, line }
            if command == "CREATE Archive" && line.contains("CREATE completed")
    )));
}

#[test]
fn test_custom_command_refused_by_server() {
    let (mut client, _) = authenticated(plain_config());
    client
        .transport_mut()
        .reply("A0001 NO [ALREADYEXISTS] mailbox exists\r\n");
    client.command("CREATE INBOX").unwrap();
    let err = client.run().unwrap_err();

    assert!(matches!(err, Error::No(_)));
    assert!(client.is_connected());
    assert_eq!(client.state(), ImapState::Prompt);
}

#[test]
fn test_read_timeout_stops_connection() {
    let clock = MockClock::shared();
    let (client, _) = authenticated(plain_config());
    let mut client = client.with_clock(clock.clone());
    client.select("INBOX").unwrap();
    assert_eq!(client.poll(), PollResult::Continue);
    assert_eq!(client.poll(), PollResult::Continue);

    clock.advance(Duration::from_secs(121));
    assert_eq!(client.poll(), PollResult::Failure);
    assert!(matches!(
        client.last_error(),
        Some(Error::ConnectionTimeout("select"))
    ));
    assert!(!client.is_connected());
    assert_eq!(client.state(), ImapState::Closed);
}

#[test]
fn test_busy_while_operation_in_flight() {
    let (mut client, _) = authenticated(plain_config());
    client.list().unwrap();
    assert!(matches!(client.select("INBOX").unwrap_err(), Error::Busy));
    assert_eq!(Error::Busy.code(), codes::PROCESSING);
}

#[test]
fn test_close_clears_selection() {
    let (mut client, _) = selected(plain_config());
    client.transport_mut().reply("A0002 OK CLOSE completed\r\n");
    client.close().unwrap();
    client.run().unwrap();

    assert!(client.mailbox().is_none());
    assert!(matches!(client.close().unwrap_err(), Error::NoMailbox));
}

#[test]
fn test_logout_closes_connection() {
    let (mut client, _) = authenticated(plain_config());
    client
        .transport_mut()
        .reply("* BYE logging out\r\nA0001 OK LOGOUT completed\r\n");
    client.logout().unwrap();
    client.run().unwrap();

    assert_eq!(client.transport().sent_text(), "A0001 LOGOUT\r\n");
    assert_eq!(client.state(), ImapState::Closed);
    assert!(!client.is_connected());
    assert!(!client.is_authenticated());
}

#[test]
fn test_unexpected_bye_drops_connection() {
    let (mut client, _) = authenticated(plain_config());
    client
        .transport_mut()
        .reply("* BYE server shutting down\r\n");
    client.list().unwrap();
    let err = client.run().unwrap_err();

    assert!(matches!(err, Error::Bye(_)));
    assert!(!client.is_connected());
}

#[test]
fn test_stop_is_idempotent() {
    let (mut client, _) = selected(plain_config());
    client.stop();
    client.stop();

    assert_eq!(client.transport().stops(), 1);
    assert_eq!(client.state(), ImapState::Closed);
    assert!(!client.is_authenticated());
    assert!(client.mailbox().is_none());
    assert!(matches!(client.list().unwrap_err(), Error::NotConnected));
}

#[test]
fn test_authenticate_reconnects_after_stop() {
    let (mut client, _) = authenticated(plain_config());
    client.stop();
    client.transport_mut().push(GREETING);
    client.transport_mut().reply("A0000 OK\r\n");
    client
        .authenticate(Credentials::password("user", "pass"))
        .unwrap();
    client.run().unwrap();

    assert_eq!(client.transport().connects(), 2);
    assert!(client.is_authenticated());
}
