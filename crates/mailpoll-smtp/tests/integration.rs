//! Integration tests for the SMTP engine.
//!
//! These tests drive the session against a scripted mock transport and a
//! mock clock, without a real server connection.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use mailpoll_core::{
    Credentials, FileHandle, FileMode, FileStore, MockClock, MockTransport, PollResult, Status,
};
use mailpoll_smtp::{
    Attachment, Config, Error, OutboundMessage, Security, SmtpClient, SmtpState, TextBody, codes,
};

/// In-memory file store keyed by path.
#[derive(Default)]
struct MemStore {
    files: HashMap<String, Vec<u8>>,
}

impl MemStore {
    fn with_file(mut self, path: &str, data: Vec<u8>) -> Self {
        self.files.insert(path.to_string(), data);
        self
    }
}

struct MemFile {
    data: Vec<u8>,
    pos: usize,
}

impl FileHandle for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.data.extend_from_slice(data);
        Ok(())
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.pos = usize::try_from(pos).unwrap().min(self.data.len());
        Ok(())
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

impl FileStore for MemStore {
    fn open(&mut self, path: &str, mode: FileMode) -> io::Result<Option<Box<dyn FileHandle>>> {
        match mode {
            FileMode::Read => {
                let data = self
                    .files
                    .get(path)
                    .cloned()
                    .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
                Ok(Some(Box::new(MemFile { data, pos: 0 })))
            }
            FileMode::Write | FileMode::Append => Ok(Some(Box::new(MemFile {
                data: Vec::new(),
                pos: 0,
            }))),
            FileMode::Remove => {
                self.files.remove(path);
                Ok(None)
            }
        }
    }
}

const GREETING: &str = "220 mail.example.com ESMTP ready\r\n";

fn plain_config() -> Config {
    Config::builder("mail.example.com")
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

/// Transport with the greeting already pushed and the EHLO reply queued.
fn transport(ehlo: &str) -> MockTransport {
    init_tracing();
    let mut t = MockTransport::new();
    t.push(GREETING);
    t.reply(ehlo);
    t
}

/// Client connected over a plain transport, with the handshake output cleared.
fn connected(ehlo: &str) -> SmtpClient<MockTransport> {
    let mut client = SmtpClient::new(transport(ehlo), plain_config());
    client.connect().unwrap();
    client.run().unwrap();
    client.transport_mut().take_sent();
    client
}

fn message() -> OutboundMessage {
    OutboundMessage::new()
        .from("Me", "me@example.com")
        .to("You", "you@example.com")
        .subject("Hi")
        .text(TextBody::plain("Hello"))
}

fn boundary_of(text: &str) -> String {
    let start = text.find("boundary=\"").unwrap() + "boundary=\"".len();
    let end = start + text[start..].find('"').unwrap();
    text[start..end].to_string()
}

#[test]
fn test_connect_reads_capabilities() {
    let mut client = SmtpClient::new(
        transport("250-mail.example.com\r\n250-AUTH PLAIN LOGIN\r\n250-SIZE 1000\r\n250 8BITMIME\r\n"),
        plain_config(),
    );
    client.connect().unwrap();
    client.run().unwrap();

    assert_eq!(client.state(), SmtpState::Prompt);
    assert!(client.capabilities().eight_bit_mime);
    assert!(client.capabilities().supports_auth());
    assert_eq!(client.capabilities().max_size, Some(1000));
    assert_eq!(client.transport().sent_text(), "EHLO 127.0.0.1\r\n");
}

#[test]
fn test_ehlo_falls_back_to_helo() {
    let mut t = transport("502 5.5.1 command not implemented\r\n");
    t.reply("250 mail.example.com\r\n");
    let mut client = SmtpClient::new(t, plain_config());
    client.connect().unwrap();
    client.run().unwrap();

    assert_eq!(
        client.transport().sent_text(),
        "EHLO 127.0.0.1\r\nHELO 127.0.0.1\r\n"
    );
    assert!(!client.capabilities().esmtp);
}

#[test]
fn test_starttls_upgrade() {
    let mut t = transport("250-mail.example.com\r\n250 STARTTLS\r\n");
    t.reply("220 2.0.0 ready to start TLS\r\n");
    t.reply("250-mail.example.com\r\n250 AUTH PLAIN\r\n");
    let config = Config::builder("mail.example.com")
        .security(Security::StartTls)
        .build();
    let mut client = SmtpClient::new(t, config).with_tls_hook(Box::new(|t: &mut MockTransport| {
        t.mark_secured();
        true
    }));
    client.connect().unwrap();
    client.run().unwrap();

    assert!(client.is_secured());
    assert!(client.transport().is_secured());
    assert!(client.capabilities().supports_auth());
    assert!(!client.capabilities().starttls);
    assert_eq!(
        client.transport().sent_text(),
        "EHLO 127.0.0.1\r\nSTARTTLS\r\nEHLO 127.0.0.1\r\n"
    );
}

#[test]
fn test_implicit_tls_without_hook_fails() {
    let config = Config::builder("mail.example.com")
        .security(Security::Implicit)
        .build();
    let mut client = SmtpClient::new(transport("250 ok\r\n"), config);
    client.connect().unwrap();
    let err = client.run().unwrap_err();

    assert!(matches!(err, Error::TlsHandshake));
    assert_eq!(err.code(), -4);
    assert!(!client.is_connected());
    assert_eq!(client.state(), SmtpState::Closed);
}

#[test]
fn test_auth_plain() {
    let mut client = connected("250-mail.example.com\r\n250 AUTH PLAIN LOGIN\r\n");
    client.transport_mut().reply("235 2.7.0 Authentication successful\r\n");
    client
        .authenticate(Credentials::password("user", "pass"))
        .unwrap();
    client.run().unwrap();

    assert!(client.is_authenticated());
    assert_eq!(
        client.transport().sent_text(),
        "AUTH PLAIN AHVzZXIAcGFzcw==\r\n"
    );
}

#[test]
fn test_auth_login() {
    let mut client = connected("250-mail.example.com\r\n250 AUTH LOGIN\r\n");
    client
        .transport_mut()
        .reply("334 VXNlcm5hbWU6\r\n")
        .reply("334 UGFzc3dvcmQ6\r\n")
        .reply("235 ok\r\n");
    client
        .authenticate(Credentials::password("user", "pass"))
        .unwrap();
    client.run().unwrap();

    assert!(client.is_authenticated());
    assert_eq!(
        client.transport().sent_text(),
        "AUTH LOGIN\r\ndXNlcg==\r\ncGFzcw==\r\n"
    );
}

#[test]
fn test_auth_xoauth2_error_challenge() {
    let mut client = connected("250-mail.example.com\r\n250 AUTH XOAUTH2 PLAIN\r\n");
    let challenge = STANDARD.encode(
        r#"{"status":"401","schemes":"bearer","scope":"https://mail.google.com/"}"#,
    );
    client
        .transport_mut()
        .reply(format!("334 {challenge}\r\n"))
        .reply("535 5.7.8 Username and Password not accepted\r\n");
    client
        .authenticate(Credentials::access_token("user@example.com", "token"))
        .unwrap();
    let err = client.run().unwrap_err();

    match &err {
        Error::Authentication(text) => assert!(text.contains("401")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.code(), -201);
    let sent = client.transport().sent_text();
    assert!(sent.starts_with("AUTH XOAUTH2 "));
    assert!(sent.ends_with("\r\n\r\n"));
    assert!(!client.is_authenticated());
    assert!(client.is_connected());
    assert_eq!(client.state(), SmtpState::Prompt);
}

#[test]
fn test_auth_without_matching_mechanism() {
    let mut client = connected("250-mail.example.com\r\n250 AUTH XOAUTH2\r\n");
    client
        .authenticate(Credentials::password("user", "pass"))
        .unwrap();
    let err = client.run().unwrap_err();

    assert!(matches!(err, Error::MechanismNotSupported));
    assert_eq!(err.code(), -202);
    assert!(client.transport().sent().is_empty());
}

#[test]
fn test_authenticate_connects_first() {
    let mut t = transport("250-mail.example.com\r\n250 AUTH PLAIN\r\n");
    t.reply("235 ok\r\n");
    let mut client = SmtpClient::new(t, plain_config());
    client
        .authenticate(Credentials::password("user", "pass"))
        .unwrap();
    client.run().unwrap();

    assert!(client.is_authenticated());
    assert_eq!(
        client.transport().sent_text(),
        "EHLO 127.0.0.1\r\nAUTH PLAIN AHVzZXIAcGFzcw==\r\n"
    );
}

#[test]
fn test_send_text_with_file_attachment() {
    let data: Vec<u8> = (0..100u8).collect();
    let store = MemStore::default().with_file("files/data.bin", data.clone());
    let mut client = SmtpClient::new(transport("250 mail.example.com\r\n"), plain_config())
        .with_file_store(store);
    client.connect().unwrap();
    client.run().unwrap();
    client.transport_mut().take_sent();

    client
        .transport_mut()
        .reply("250 2.1.0 ok\r\n")
        .reply("250 2.1.5 ok\r\n")
        .reply("354 go ahead\r\n")
        .reply("250 2.0.0 queued\r\n");
    let msg = message().attach(Attachment::from_file("files/data.bin"));
    client.send(&msg).unwrap();
    client.run().unwrap();

    let sent = client.transport().sent_text();
    assert!(sent.starts_with(
        "MAIL FROM:<me@example.com>\r\nRCPT TO:<you@example.com>\r\nDATA\r\n"
    ));
    let b = boundary_of(&sent);
    assert_eq!(b.len(), 14);
    assert!(b.starts_with("=_"));
    assert_eq!(sent.matches("Content-Type: multipart/mixed").count(), 1);
    assert_eq!(sent.matches(&format!("\r\n--{b}\r\n")).count(), 2);
    assert!(sent.contains("Content-Transfer-Encoding: 7bit\r\n\r\nHello\r\n--"));
    assert!(sent.contains("filename=\"data.bin\"; size=100\r\n"));
    assert!(sent.ends_with(&format!("\r\n--{b}--\r\n.\r\n")));

    let start = sent.find("Content-Transfer-Encoding: base64\r\n\r\n").unwrap()
        + "Content-Transfer-Encoding: base64\r\n\r\n".len();
    let end = start + sent[start..].find(&format!("\r\n\r\n--{b}--")).unwrap();
    let lines: Vec<&str> = sent[start..end].split("\r\n").collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].len(), 76);
    assert_eq!(STANDARD.decode(lines.concat()).unwrap(), data);
    assert_eq!(client.state(), SmtpState::Prompt);
}

#[test]
fn test_send_reports_progress() {
    let records: Arc<Mutex<Vec<Status<SmtpState>>>> = Arc::default();
    let sink = {
        let records = Arc::clone(&records);
        move |s: &Status<SmtpState>| records.lock().unwrap().push(s.clone())
    };
    let mut client = SmtpClient::new(transport("250 mail.example.com\r\n"), plain_config())
        .with_status(sink);
    client.connect().unwrap();
    client.run().unwrap();
    client
        .transport_mut()
        .reply("250 ok\r\n")
        .reply("250 ok\r\n")
        .reply("354 go\r\n")
        .reply("250 queued\r\n");
    let msg = message().attach(Attachment::from_blob("big.bin", vec![1u8; 57 * 20]));
    client.send(&msg).unwrap();
    client.run().unwrap();

    let records = records.lock().unwrap();
    let progress: Vec<u8> = records.iter().filter_map(|r| r.progress).collect();
    assert_eq!(progress.first(), Some(&5));
    assert_eq!(progress.last(), Some(&100));
    assert!(records.iter().any(|r| r.text.starts_with("message accepted")));
}

#[test]
fn test_send_dot_stuffing() {
    let mut client = connected("250 mail.example.com\r\n");
    client
        .transport_mut()
        .reply("250 ok\r\n")
        .reply("250 ok\r\n")
        .reply("354 go\r\n")
        .reply("250 queued\r\n");
    let msg = message().text(TextBody::plain(".hidden\nline\n."));
    client.send(&msg).unwrap();
    client.run().unwrap();

    let sent = client.transport().sent_text();
    assert!(sent.ends_with("\r\n\r\n..hidden\r\nline\r\n..\r\n.\r\n"));
}

#[test]
fn test_invalid_sender_writes_nothing() {
    let mut client = connected("250 mail.example.com\r\n");
    let msg = OutboundMessage::new()
        .from("Me", "not-an-address")
        .to("You", "you@example.com");
    let err = client.send(&msg).unwrap_err();

    assert!(matches!(err, Error::InvalidSender(_)));
    assert_eq!(err.code(), codes::INVALID_SENDER_EMAIL);
    assert!(client.transport().sent().is_empty());
    assert!(!client.is_busy());
}

#[test]
fn test_invalid_recipients() {
    let mut client = connected("250 mail.example.com\r\n");
    let msg = OutboundMessage::new()
        .from("Me", "me@example.com")
        .to("", "nobody")
        .cc("x@y");
    let err = client.send(&msg).unwrap_err();
    assert!(matches!(err, Error::InvalidRecipient));
    assert_eq!(err.code(), -104);
    assert!(client.transport().sent().is_empty());

    // MAIL, RCPT you, RCPT hidden, DATA, end of data
    client
        .transport_mut()
        .reply("250 ok\r\n")
        .reply("250 ok\r\n")
        .reply("250 ok\r\n")
        .reply("354 go\r\n")
        .reply("250 queued\r\n");
    let msg = message().cc("bad address").bcc("hidden@example.org");
    client.send(&msg).unwrap();
    client.run().unwrap();
    let sent = client.transport().sent_text();
    assert!(sent.contains("RCPT TO:<you@example.com>\r\nRCPT TO:<hidden@example.org>\r\nDATA\r\n"));
    assert!(!sent.contains("RCPT TO:<bad address>"));
    assert!(!sent.contains("Bcc"));
}

#[test]
fn test_rejected_recipients() {
    let mut client = connected("250 mail.example.com\r\n");
    client
        .transport_mut()
        .reply("250 ok\r\n")
        .reply("550 5.1.1 no such user\r\n")
        .reply("250 ok\r\n")
        .reply("354 go\r\n")
        .reply("250 queued\r\n");
    client
        .send(&message().cc("ghost@example.com"))
        .unwrap();
    client.run().unwrap();

    client.transport_mut().take_sent();
    client
        .transport_mut()
        .reply("250 ok\r\n")
        .reply("550 5.1.1 no such user\r\n");
    client.send(&message()).unwrap();
    let err = client.run().unwrap_err();
    assert!(err.is_permanent());
    assert_eq!(err.code(), 550);
    assert!(!client.transport().sent_text().contains("DATA"));
    assert_eq!(client.state(), SmtpState::Prompt);
}

#[test]
fn test_eight_bit_body_param() {
    let mut client = connected("250-mail.example.com\r\n250 8BITMIME\r\n");
    client
        .transport_mut()
        .reply("250 ok\r\n")
        .reply("250 ok\r\n")
        .reply("354 go\r\n")
        .reply("250 queued\r\n");
    let msg = message().text(
        TextBody::plain("Grüße").with_encoding(mailpoll_mime::TransferEncoding::EightBit),
    );
    client.send(&msg).unwrap();
    client.run().unwrap();

    assert!(client
        .transport()
        .sent_text()
        .starts_with("MAIL FROM:<me@example.com> BODY=8BITMIME\r\n"));
}

#[test]
fn test_busy_while_operation_runs() {
    let mut client = SmtpClient::new(transport("250 ok\r\n"), plain_config());
    client.connect().unwrap();
    assert!(matches!(client.connect(), Err(Error::Busy)));
    assert!(matches!(client.send(&message()), Err(Error::Busy)));
}

#[test]
fn test_greeting_timeout() {
    let clock = MockClock::shared();
    let mut t = MockTransport::new();
    t.reply("250 ok\r\n");
    let mut client = SmtpClient::new(t, plain_config()).with_clock(clock.clone());
    client.connect().unwrap();

    assert_eq!(client.poll(), PollResult::Continue);
    assert_eq!(client.poll(), PollResult::Continue);
    clock.advance(Duration::from_secs(29));
    assert_eq!(client.poll(), PollResult::Continue);
    clock.advance(Duration::from_secs(2));
    assert_eq!(client.poll(), PollResult::Failure);

    let err = client.last_error().unwrap();
    assert!(matches!(err, Error::ConnectionTimeout("greeting")));
    assert_eq!(err.code(), -3);
    assert!(!client.is_connected());
}

#[test]
fn test_refused_connection() {
    let mut t = MockTransport::new();
    t.refuse_connect(true);
    let mut client = SmtpClient::new(t, plain_config());
    client.connect().unwrap();
    let err = client.run().unwrap_err();
    assert!(matches!(err, Error::Connection(_)));
    assert_eq!(err.code(), -1);
}

#[test]
fn test_dropped_connection_fails_send() {
    let mut client = connected("250 mail.example.com\r\n");
    client.transport_mut().reply("250 ok\r\n");
    client.send(&message()).unwrap();
    assert_eq!(client.poll(), PollResult::Continue);
    client.transport_mut().drop_connection();
    assert_eq!(client.poll(), PollResult::Failure);
    assert!(matches!(client.last_error(), Some(Error::NotConnected)));
    assert_eq!(client.state(), SmtpState::Closed);
}

#[test]
fn test_quit_and_stop() {
    let mut client = connected("250 mail.example.com\r\n");
    client.transport_mut().reply("221 2.0.0 bye\r\n");
    client.quit().unwrap();
    client.run().unwrap();

    assert_eq!(client.transport().sent_text(), "QUIT\r\n");
    assert!(!client.is_connected());
    assert_eq!(client.state(), SmtpState::Closed);

    client.stop();
    client.stop();
    assert_eq!(client.transport().stops(), 1);
    assert_eq!(client.poll(), PollResult::Success);
    assert!(client.quit().is_ok());
}
