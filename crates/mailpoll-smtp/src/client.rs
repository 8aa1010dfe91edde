//! Non-blocking SMTP session.
//!
//! [`SmtpClient`] owns a [`Transport`] and walks
//! `greeting -> EHLO (HELO) -> [STARTTLS -> EHLO] -> AUTH -> prompt`. Each
//! operation is started by a method call and driven by [`poll`], which does
//! at most one bounded piece of work and never blocks. [`run`] wraps the
//! polling in a spin loop for synchronous callers.
//!
//! ```text
//! connect()      ──► Greeting ─► Ehlo ─┬─► Prompt
//!                                      └─► StartTls ─► Ehlo ─► Prompt
//! authenticate() ──► Authentication ─► Prompt
//! send(msg)      ──► MailFrom ─► RcptTo* ─► Data ─► Body* ─► Prompt
//! quit()         ──► Quit ─► Closed
//! ```
//!
//! [`poll`]: SmtpClient::poll
//! [`run`]: SmtpClient::run

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use mailpoll_core::sasl::{login_response, plain_response, xoauth2_failure, xoauth2_response};
use mailpoll_core::{
    Credentials, FileStore, LineReader, Mechanism, PollResult, SharedClock, Status, StatusSink,
    Timer, TlsHook, TracingStatus, Transport, sasl, time,
};
use mailpoll_mime::TransferEncoding;
use tracing::{debug, error, trace, warn};
use zeroize::Zeroizing;

use crate::command::{BodyType, Command, Notify};
use crate::config::{Config, Security};
use crate::error::{Error, Result, WriteStage};
use crate::message::OutboundMessage;
use crate::parser::ReplyAccumulator;
use crate::send::{SendEvent, SendMachine, SendOptions};
use crate::types::{Address, Capabilities, Reply, ReplyCode};

/// Protocol state reported in status records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmtpState {
    /// Nothing started yet.
    Initial,
    /// Waiting for the `220` greeting.
    Greeting,
    /// `EHLO`/`HELO` exchange.
    Hello,
    /// STARTTLS upgrade.
    StartTls,
    /// SASL exchange.
    Authentication,
    /// Idle and ready for a command.
    Prompt,
    /// `MAIL FROM`.
    MailFrom,
    /// `RCPT TO`.
    RcptTo,
    /// `DATA` command.
    Data,
    /// Streaming message content.
    Body,
    /// `QUIT`.
    Quit,
    /// Connection closed.
    Closed,
}

impl SmtpState {
    /// Lowercase state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Greeting => "greeting",
            Self::Hello => "hello",
            Self::StartTls => "start-tls",
            Self::Authentication => "authentication",
            Self::Prompt => "prompt",
            Self::MailFrom => "mail-from",
            Self::RcptTo => "rcpt-to",
            Self::Data => "data",
            Self::Body => "body",
            Self::Quit => "quit",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SmtpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectStep {
    Open,
    Greeting,
    Ehlo,
    Helo,
    StartTls,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AuthStep {
    Start,
    Verdict,
    XOAuth2Rejected(String),
    LoginUser,
    LoginPassword,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendStep {
    Start,
    MailFrom,
    RcptTo,
    Data,
    Body,
    Terminator,
}

struct SendJob {
    step: SendStep,
    message: OutboundMessage,
    sender: Address,
    body: Option<BodyType>,
    recipients: VecDeque<(Address, Notify)>,
    accepted: usize,
    last_rejection: Option<Reply>,
    machine: Option<SendMachine>,
}

enum Op {
    Idle,
    Connect { step: ConnectStep, then_auth: bool },
    Auth(AuthStep),
    Send(Box<SendJob>),
    Quit { sent: bool },
}

impl Op {
    const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connect { .. } => "connect",
            Self::Auth(_) => "authentication",
            Self::Send(_) => "send",
            Self::Quit { .. } => "quit",
        }
    }
}

/// Non-blocking SMTP client engine.
pub struct SmtpClient<T: Transport> {
    transport: T,
    config: Config,
    clock: SharedClock,
    status: Box<dyn StatusSink<SmtpState>>,
    tls_hook: Option<TlsHook<T>>,
    store: Option<Box<dyn FileStore>>,
    reader: LineReader,
    replies: ReplyAccumulator,
    timer: Timer,
    state: SmtpState,
    op: Op,
    capabilities: Capabilities,
    credentials: Option<Credentials>,
    authenticated: bool,
    secured: bool,
    last_error: Option<Error>,
}

impl<T: Transport> fmt::Debug for SmtpClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpClient")
            .field("host", &self.config.host)
            .field("state", &self.state)
            .field("op", &self.op.name())
            .field("authenticated", &self.authenticated)
            .field("secured", &self.secured)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> SmtpClient<T> {
    /// Creates an engine over `transport`. Nothing is sent until
    /// [`connect`](Self::connect).
    pub fn new(transport: T, config: Config) -> Self {
        Self {
            transport,
            config,
            clock: time::system_clock(),
            status: Box::new(TracingStatus::new("smtp")),
            tls_hook: None,
            store: None,
            reader: LineReader::default(),
            replies: ReplyAccumulator::new(),
            timer: Timer::new(),
            state: SmtpState::Initial,
            op: Op::Idle,
            capabilities: Capabilities::default(),
            credentials: None,
            authenticated: false,
            secured: false,
            last_error: None,
        }
    }

    /// Installs the callback that upgrades the transport to TLS.
    #[must_use]
    pub fn with_tls_hook(mut self, hook: TlsHook<T>) -> Self {
        self.tls_hook = Some(hook);
        self
    }

    /// Replaces the default `tracing` status sink.
    #[must_use]
    pub fn with_status(mut self, sink: impl StatusSink<SmtpState> + 'static) -> Self {
        self.status = Box::new(sink);
        self
    }

    /// Replaces the system clock used for timeouts.
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Installs the store used to open file-backed attachments.
    #[must_use]
    pub fn with_file_store(mut self, store: impl FileStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Current protocol state.
    #[must_use]
    pub const fn state(&self) -> SmtpState {
        self.state
    }

    /// Returns true while the transport is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.connected()
    }

    /// Returns true after a successful `AUTH`.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Returns true once the stream is TLS-protected.
    #[must_use]
    pub const fn is_secured(&self) -> bool {
        self.secured
    }

    /// Returns true while an operation is in flight.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        !matches!(self.op, Op::Idle)
    }

    /// Extensions announced in the last `EHLO` reply.
    #[must_use]
    pub const fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Error that ended the last failed operation.
    #[must_use]
    pub const fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// Borrows the transport.
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably borrows the transport.
    pub const fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consumes the engine and returns the transport.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Starts connecting: greeting, `EHLO` and the configured TLS mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] if another operation is in flight.
    pub fn connect(&mut self) -> Result<()> {
        self.begin(Op::Connect {
            step: ConnectStep::Open,
            then_auth: false,
        })
    }

    /// Starts authenticating with `credentials`.
    ///
    /// A closed connection is reopened first. The credentials are wiped once
    /// the exchange resolves either way.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] if another operation is in flight.
    pub fn authenticate(&mut self, credentials: Credentials) -> Result<()> {
        let op = if self.transport.connected() && self.state != SmtpState::Closed {
            Op::Auth(AuthStep::Start)
        } else {
            Op::Connect {
                step: ConnectStep::Open,
                then_auth: true,
            }
        };
        self.begin(op)?;
        self.credentials = Some(credentials);
        Ok(())
    }

    /// Starts sending `message`.
    ///
    /// Addresses are checked before anything is written: an invalid
    /// envelope sender, or no valid recipient at all, fails right away.
    /// Invalid recipients among valid ones are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`], [`Error::NotConnected`],
    /// [`Error::InvalidSender`] or [`Error::InvalidRecipient`].
    pub fn send(&mut self, message: &OutboundMessage) -> Result<()> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        if !self.transport.connected() {
            return Err(self.reject(Error::NotConnected));
        }
        let sender = match Address::new(message.envelope_sender()) {
            Ok(a) => a,
            Err(e) => return Err(self.reject(e)),
        };

        let dsn = self.capabilities.dsn;
        let mut recipients = VecDeque::with_capacity(message.recipient_count());
        let to = message
            .to
            .iter()
            .map(|m| (m.email.as_str(), if dsn { message.notify } else { Notify::NEVER }));
        let copies = message
            .cc
            .iter()
            .chain(&message.bcc)
            .map(|e| (e.as_str(), Notify::NEVER));
        for (email, notify) in to.chain(copies) {
            match Address::new(email) {
                Ok(addr) => recipients.push_back((addr, notify)),
                Err(_) => warn!(recipient = %email, "skipping invalid recipient"),
            }
        }
        if recipients.is_empty() {
            return Err(self.reject(Error::InvalidRecipient));
        }

        let body = self.body_type(message);
        self.begin(Op::Send(Box::new(SendJob {
            step: SendStep::Start,
            message: message.clone(),
            sender,
            body,
            recipients,
            accepted: 0,
            last_rejection: None,
            machine: None,
        })))
    }

    /// Starts `QUIT`. Does nothing when already disconnected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] if another operation is in flight.
    pub fn quit(&mut self) -> Result<()> {
        if !self.transport.connected() {
            if self.is_busy() {
                return Err(Error::Busy);
            }
            self.set_state(SmtpState::Closed);
            return Ok(());
        }
        self.begin(Op::Quit { sent: false })
    }

    /// Closes the transport and abandons any operation. Safe to call twice.
    pub fn stop(&mut self) {
        if self.transport.connected() {
            debug!("closing SMTP connection");
            self.transport.stop();
        }
        if let Some(mut creds) = self.credentials.take() {
            creds.clear();
        }
        self.op = Op::Idle;
        self.timer.stop();
        self.reader.clear();
        self.replies.clear();
        self.authenticated = false;
        self.secured = false;
        self.set_state(SmtpState::Closed);
    }

    /// Performs one bounded step of the current operation.
    pub fn poll(&mut self) -> PollResult {
        if matches!(self.op, Op::Idle) {
            return PollResult::Success;
        }
        let op = self.op.name();
        let connecting = matches!(self.op, Op::Connect { .. });
        match self.step() {
            Ok(true) => {
                self.op = Op::Idle;
                self.timer.stop();
                PollResult::Success
            }
            Ok(false) => PollResult::Continue,
            Err(e) => {
                self.fail(e, op, connecting);
                PollResult::Failure
            }
        }
    }

    /// Polls until the current operation finishes.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the operation.
    pub fn run(&mut self) -> Result<()> {
        loop {
            match self.poll() {
                PollResult::Continue => std::thread::yield_now(),
                PollResult::Success => return Ok(()),
                PollResult::Failure => {
                    return Err(self
                        .last_error
                        .take()
                        .unwrap_or_else(|| Error::Protocol("operation failed".to_string())));
                }
            }
        }
    }

    fn begin(&mut self, op: Op) -> Result<()> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        debug!(op = op.name(), "starting operation");
        self.last_error = None;
        self.op = op;
        Ok(())
    }

    /// Records a failure detected before any I/O.
    fn reject(&mut self, e: Error) -> Error {
        warn!(error = %e, "operation rejected");
        self.status
            .on_status(&Status::error(self.state, e.code(), e.to_string()));
        e
    }

    fn fail(&mut self, e: Error, op: &'static str, connecting: bool) {
        error!(op, error = %e, "operation failed");
        self.status
            .on_status(&Status::error(self.state, e.code(), e.to_string()));
        self.op = Op::Idle;
        self.timer.stop();
        self.replies.clear();
        if let Some(mut creds) = self.credentials.take() {
            creds.clear();
        }
        let broken = matches!(
            e,
            Error::Connection(_)
                | Error::NotConnected
                | Error::ConnectionTimeout(_)
                | Error::TlsHandshake
                | Error::Write { .. }
                | Error::ReadData(_)
        );
        if broken || connecting {
            self.transport.stop();
            self.reader.clear();
            self.authenticated = false;
            self.secured = false;
            self.set_state(SmtpState::Closed);
        } else if self.transport.connected() && self.state != SmtpState::Initial {
            self.set_state(SmtpState::Prompt);
        }
        self.last_error = Some(e);
    }

    fn set_state(&mut self, state: SmtpState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "state change");
            self.state = state;
        }
    }

    fn info(&mut self, text: impl Into<String>) {
        self.status.on_status(&Status::info(self.state, text));
    }

    fn arm(&mut self, period: Duration) {
        self.timer.feed(period, self.clock.now());
    }

    fn write_command(&mut self, cmd: &Command, stage: WriteStage) -> Result<()> {
        trace!(command = %cmd.redacted(), "C:");
        self.transport
            .write_all(&cmd.serialize())
            .map_err(|e| Error::write(stage, e))?;
        self.arm(self.config.read_timeout);
        Ok(())
    }

    /// Reads one complete reply if the transport has it.
    fn read_reply(&mut self) -> Result<Option<Reply>> {
        self.reader
            .fill(&mut self.transport)
            .map_err(Error::ReadData)?;
        while let Some(line) = self.reader.next_line().map_err(Error::ReadData)? {
            trace!(line = %String::from_utf8_lossy(&line).trim_end(), "S:");
            if let Some(reply) = self.replies.push(&line)? {
                return Ok(Some(reply));
            }
        }
        Ok(None)
    }

    fn step(&mut self) -> Result<bool> {
        let opening = matches!(
            self.op,
            Op::Connect {
                step: ConnectStep::Open,
                ..
            }
        );
        if !opening && !self.transport.connected() {
            return Err(Error::NotConnected);
        }
        if self.timer.expired(self.clock.now()) {
            return Err(Error::ConnectionTimeout(self.state.as_str()));
        }

        match std::mem::replace(&mut self.op, Op::Idle) {
            Op::Idle => Ok(true),
            Op::Connect { step, then_auth } => self.step_connect(step, then_auth),
            Op::Auth(step) => self.step_auth(step),
            Op::Send(job) => self.step_send(job),
            Op::Quit { sent } => self.step_quit(sent),
        }
    }

    fn step_connect(&mut self, step: ConnectStep, then_auth: bool) -> Result<bool> {
        let next = |step| Op::Connect { step, then_auth };

        if step == ConnectStep::Open {
            self.open()?;
            self.op = next(ConnectStep::Greeting);
            return Ok(false);
        }

        let Some(reply) = self.read_reply()? else {
            self.op = next(step);
            return Ok(false);
        };

        match step {
            ConnectStep::Open => Ok(false),
            ConnectStep::Greeting => {
                if !reply.is(ReplyCode::SERVICE_READY) {
                    return Err(reply.into_error());
                }
                self.info(format!("greeting: {}", reply.last_text()));
                self.set_state(SmtpState::Hello);
                self.write_command(&self.ehlo(), WriteStage::Command)?;
                self.op = next(ConnectStep::Ehlo);
                Ok(false)
            }
            ConnectStep::Ehlo => {
                if !reply.is_success() {
                    debug!(code = %reply.code, "EHLO refused, falling back to HELO");
                    let helo = Command::Helo {
                        hostname: self.config.ehlo_domain.clone(),
                    };
                    self.write_command(&helo, WriteStage::Command)?;
                    self.op = next(ConnectStep::Helo);
                    return Ok(false);
                }
                self.capabilities = Capabilities::from_ehlo(&reply.message);
                if self.config.security == Security::StartTls && !self.secured {
                    if !self.capabilities.starttls {
                        return Err(Error::Protocol("server does not offer STARTTLS".into()));
                    }
                    self.set_state(SmtpState::StartTls);
                    self.write_command(&Command::StartTls, WriteStage::Command)?;
                    self.op = next(ConnectStep::StartTls);
                    return Ok(false);
                }
                self.connected(then_auth)
            }
            ConnectStep::Helo => {
                if !reply.is_success() {
                    return Err(reply.into_error());
                }
                self.capabilities = Capabilities::default();
                if self.config.security == Security::StartTls && !self.secured {
                    return Err(Error::Protocol("server does not offer STARTTLS".into()));
                }
                self.connected(then_auth)
            }
            ConnectStep::StartTls => {
                if !reply.is(ReplyCode::SERVICE_READY) {
                    return Err(reply.into_error());
                }
                self.upgrade()?;
                self.set_state(SmtpState::Hello);
                self.write_command(&self.ehlo(), WriteStage::Command)?;
                self.op = next(ConnectStep::Ehlo);
                Ok(false)
            }
        }
    }

    fn open(&mut self) -> Result<()> {
        self.reader.clear();
        self.replies.clear();
        self.authenticated = false;
        self.secured = false;
        self.capabilities = Capabilities::default();
        self.transport.set_timeout(self.config.connect_timeout);
        debug!(host = %self.config.host, port = self.config.port, "connecting");
        self.transport
            .connect(&self.config.host, self.config.port)
            .map_err(Error::Connection)?;
        if self.config.security == Security::Implicit {
            self.upgrade()?;
        }
        self.set_state(SmtpState::Greeting);
        self.arm(self.config.connect_timeout);
        Ok(())
    }

    fn upgrade(&mut self) -> Result<()> {
        let hook = self.tls_hook.as_mut().ok_or(Error::TlsHandshake)?;
        if !hook(&mut self.transport) {
            return Err(Error::TlsHandshake);
        }
        self.reader.clear();
        self.secured = true;
        self.info("TLS established");
        Ok(())
    }

    fn ehlo(&self) -> Command {
        Command::Ehlo {
            hostname: self.config.ehlo_domain.clone(),
        }
    }

    fn connected(&mut self, then_auth: bool) -> Result<bool> {
        self.set_state(SmtpState::Prompt);
        self.info(format!("connected to {}", self.config.host));
        if then_auth {
            self.op = Op::Auth(AuthStep::Start);
            return self.step();
        }
        Ok(true)
    }

    fn step_auth(&mut self, step: AuthStep) -> Result<bool> {
        if step == AuthStep::Start {
            self.set_state(SmtpState::Authentication);
            let creds = self.credentials.take().unwrap_or_default();
            let result = self.start_auth(&creds);
            self.credentials = Some(creds);
            self.op = Op::Auth(result?);
            return Ok(false);
        }

        let Some(reply) = self.read_reply()? else {
            self.op = Op::Auth(step);
            return Ok(false);
        };

        match step {
            AuthStep::Start => Ok(false),
            AuthStep::Verdict if reply.is(ReplyCode::AUTH_SUCCESS) => {
                if let Some(mut creds) = self.credentials.take() {
                    creds.clear();
                }
                self.authenticated = true;
                self.set_state(SmtpState::Prompt);
                self.info("authenticated");
                Ok(true)
            }
            AuthStep::Verdict if reply.is(ReplyCode::AUTH_CONTINUE) => {
                // XOAUTH2 reports errors as a challenge that must be answered
                let reason = xoauth2_failure(reply.last_text())
                    .unwrap_or_else(|| sasl::decode_challenge(reply.last_text()));
                self.write_command(
                    &Command::AuthResponse(Zeroizing::new(String::new())),
                    WriteStage::Command,
                )?;
                self.op = Op::Auth(AuthStep::XOAuth2Rejected(reason));
                Ok(false)
            }
            AuthStep::Verdict => Err(Error::Authentication(reply.message_text())),
            AuthStep::XOAuth2Rejected(reason) => Err(Error::Authentication(reason)),
            AuthStep::LoginUser | AuthStep::LoginPassword
                if !reply.is(ReplyCode::AUTH_CONTINUE) =>
            {
                Err(Error::Authentication(reply.message_text()))
            }
            AuthStep::LoginUser => {
                let user = self
                    .credentials
                    .as_ref()
                    .map_or_else(
                        || Zeroizing::new(String::new()),
                        |c| login_response(c.user()),
                    );
                self.write_command(&Command::AuthResponse(user), WriteStage::Command)?;
                self.op = Op::Auth(AuthStep::LoginPassword);
                Ok(false)
            }
            AuthStep::LoginPassword => {
                let password = self
                    .credentials
                    .as_ref()
                    .and_then(Credentials::secret_password)
                    .map_or_else(|| Zeroizing::new(String::new()), login_response);
                self.write_command(&Command::AuthResponse(password), WriteStage::Command)?;
                self.op = Op::Auth(AuthStep::Verdict);
                Ok(false)
            }
        }
    }

    fn start_auth(&mut self, creds: &Credentials) -> Result<AuthStep> {
        let mechanism = sasl::choose_mechanism(self.capabilities.auth, creds)
            .ok_or(Error::MechanismNotSupported)?;
        debug!(%mechanism, "authenticating");
        let (initial_response, step) = match mechanism {
            Mechanism::XOAuth2 => (
                creds.token().map(|t| xoauth2_response(creds.user(), t)),
                AuthStep::Verdict,
            ),
            Mechanism::Plain => (
                creds
                    .secret_password()
                    .map(|p| plain_response(creds.user(), p)),
                AuthStep::Verdict,
            ),
            Mechanism::Login => (None, AuthStep::LoginUser),
        };
        self.write_command(
            &Command::Auth {
                mechanism,
                initial_response,
            },
            WriteStage::Command,
        )?;
        Ok(step)
    }

    fn body_type(&self, message: &OutboundMessage) -> Option<BodyType> {
        let encodings: Vec<TransferEncoding> = [&message.text, &message.html]
            .into_iter()
            .filter(|b| !b.is_empty())
            .map(crate::message::TextBody::effective_encoding)
            .collect();
        if self.capabilities.binary_mime && encodings.contains(&TransferEncoding::Binary) {
            Some(BodyType::BinaryMime)
        } else if self.capabilities.eight_bit_mime
            && encodings.contains(&TransferEncoding::EightBit)
        {
            Some(BodyType::EightBitMime)
        } else {
            None
        }
    }

    fn step_send(&mut self, mut job: Box<SendJob>) -> Result<bool> {
        let step = job.step;
        match step {
            SendStep::Start => {
                self.set_state(SmtpState::MailFrom);
                self.info(format!(
                    "sending \"{}\" to {} recipient(s)",
                    job.message.subject,
                    job.recipients.len()
                ));
                let cmd = Command::MailFrom {
                    from: job.sender.clone(),
                    body: job.body,
                };
                self.write_command(&cmd, WriteStage::Envelope)?;
                job.step = SendStep::MailFrom;
                self.op = Op::Send(job);
                return Ok(false);
            }
            SendStep::Body => return self.stream_body(job),
            _ => {}
        }

        let Some(reply) = self.read_reply()? else {
            self.op = Op::Send(job);
            return Ok(false);
        };

        match step {
            SendStep::MailFrom => {
                if !reply.is(ReplyCode::OK) {
                    return Err(reply.into_error());
                }
                self.set_state(SmtpState::RcptTo);
                self.next_recipient(&mut job)?;
            }
            SendStep::RcptTo => {
                if reply.is(ReplyCode::OK) || reply.is(ReplyCode::FORWARD) {
                    job.accepted += 1;
                } else {
                    warn!(code = %reply.code, text = reply.last_text(), "recipient rejected");
                    job.last_rejection = Some(reply);
                }
                self.next_recipient(&mut job)?;
            }
            SendStep::Data => {
                if !reply.is(ReplyCode::START_DATA) {
                    return Err(reply.into_error());
                }
                self.set_state(SmtpState::Body);
                job.machine = Some(SendMachine::new(&job.message, SendOptions::smtp()));
                job.step = SendStep::Body;
                self.arm(self.config.send_timeout);
            }
            SendStep::Terminator => {
                if !reply.is(ReplyCode::OK) {
                    return Err(reply.into_error());
                }
                self.set_state(SmtpState::Prompt);
                self.info(format!("message accepted: {}", reply.last_text()));
                return Ok(true);
            }
            SendStep::Start | SendStep::Body => {}
        }
        self.op = Op::Send(job);
        Ok(false)
    }

    fn next_recipient(&mut self, job: &mut SendJob) -> Result<()> {
        if let Some((to, notify)) = job.recipients.pop_front() {
            self.write_command(&Command::RcptTo { to, notify }, WriteStage::Envelope)?;
            job.step = SendStep::RcptTo;
            return Ok(());
        }
        if job.accepted == 0 {
            return Err(job
                .last_rejection
                .take()
                .map_or(Error::InvalidRecipient, Reply::into_error));
        }
        self.set_state(SmtpState::Data);
        self.write_command(&Command::Data, WriteStage::Data)?;
        job.step = SendStep::Data;
        Ok(())
    }

    /// Writes one bounded piece of content, or the terminator once done.
    fn stream_body(&mut self, mut job: Box<SendJob>) -> Result<bool> {
        let Some(machine) = job.machine.as_mut() else {
            return Err(Error::Protocol("send machine missing".into()));
        };
        let mut chunk = Vec::new();
        let more = machine.next(self.store.as_deref_mut(), &mut chunk);
        let events = machine.take_events();
        for event in events {
            self.report(event);
        }

        if more {
            self.transport
                .write_all(&chunk)
                .map_err(|e| Error::write(WriteStage::Body, e))?;
            self.arm(self.config.send_timeout);
        } else {
            trace!(bytes = machine.written(), "content complete");
            self.transport
                .write_all(b"\r\n.\r\n")
                .map_err(|e| Error::write(WriteStage::Data, e))?;
            self.arm(self.config.read_timeout);
            job.step = SendStep::Terminator;
        }
        self.op = Op::Send(job);
        Ok(false)
    }

    fn report(&mut self, event: SendEvent) {
        let status = match event {
            SendEvent::PartStarted { name, kind, size } => {
                Status::info(self.state, format!("sending {kind:?} {name} ({size} bytes)"))
            }
            SendEvent::Progress { name, percent } => Status::progress(self.state, percent, name),
            SendEvent::Skipped { name, reason } => {
                Status::info(self.state, format!("skipped {name}: {reason}"))
            }
        };
        self.status.on_status(&status);
    }

    fn step_quit(&mut self, sent: bool) -> Result<bool> {
        if !sent {
            self.set_state(SmtpState::Quit);
            self.write_command(&Command::Quit, WriteStage::Command)?;
            self.op = Op::Quit { sent: true };
            return Ok(false);
        }
        let Some(reply) = self.read_reply()? else {
            self.op = Op::Quit { sent: true };
            return Ok(false);
        };
        if !reply.is(ReplyCode::CLOSING) {
            warn!(code = %reply.code, "unexpected QUIT reply");
        }
        self.stop();
        self.info("connection closed");
        Ok(true)
    }
}
