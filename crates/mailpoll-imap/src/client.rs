//! Non-blocking IMAP session.
//!
//! [`ImapClient`] owns a [`Transport`] and walks
//! `greeting -> [STARTTLS -> CAPABILITY] -> AUTHENTICATE -> ID -> prompt`.
//! Mailbox operations start from the prompt. Every call to [`poll`] does
//! at most one bounded piece of work: one response, or one slice of a part
//! download, or one chunk of an `APPEND`. [`run`] wraps the polling in a
//! spin loop for synchronous callers.
//!
//! ```text
//! connect()      ──► Greeting ─► [Capability] ─┬─► Prompt
//!                                              └─► StartTls ─► Capability ─► Prompt
//! authenticate() ──► Authentication ─► [Id] ─► Prompt
//! select(name)   ──► Select ─► Prompt
//! fetch(req)     ──► FetchEnvelope ─► FetchBodyStructure ─► FetchBodyPart* ─► Prompt
//! idle()         ──► Idle ⇄ Done
//! append(..)     ──► AppendInit ─► AppendLast ─► Prompt
//! logout()       ──► Logout ─► Closed
//! ```
//!
//! While idling, any new operation first ends the `IDLE` with `DONE` and
//! waits for its completion before its own command goes out.
//!
//! [`poll`]: ImapClient::poll
//! [`run`]: ImapClient::run

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use mailpoll_core::sasl::{plain_response, xoauth2_failure, xoauth2_response};
use mailpoll_core::{
    Credentials, FileStore, LineReader, Mechanism, PollResult, SharedClock, Status, StatusSink,
    Timer, TlsHook, TracingStatus, Transport, sasl, time,
};
use mailpoll_smtp::{OutboundMessage, SendEvent, SendMachine, SendOptions};
use tracing::{debug, error, trace, warn};
use zeroize::Zeroizing;

use crate::command::{Command, FetchItems, TagGenerator};
use crate::config::{Config, Security};
use crate::error::{Error, Result};
use crate::fetch::PartDownload;
use crate::handler::{DataHandler, IdleEvent, MessageHeader, SearchResult};
use crate::parser::{
    BodyPart, FetchData, Response, ResponseAccumulator, Untagged, classify_tagged, literal_length,
};
use crate::request::{
    AppendOptions, FetchRequest, MAILBOX_VERBS, SearchOptions, check_custom, check_search,
    uses_modseq,
};
use crate::types::{Capabilities, ListEntry, MailboxInfo, ResponseCode, ResponseStatus};

/// Window in which a repeated SELECT/EXAMINE of the same mailbox is skipped.
pub const SELECT_DEDUP_WINDOW: Duration = Duration::from_secs(3);

/// Protocol state reported in status records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImapState {
    /// Nothing started yet.
    Initial,
    /// Waiting for the server greeting.
    Greeting,
    /// STARTTLS upgrade.
    StartTls,
    /// SASL or `LOGIN` exchange.
    Authentication,
    /// `ID` exchange.
    Id,
    /// Ready for a command.
    Prompt,
    /// `LIST`.
    List,
    /// `SELECT`.
    Select,
    /// `EXAMINE`.
    Examine,
    /// `SEARCH`.
    Search,
    /// Fetching headers.
    FetchEnvelope,
    /// Fetching the body structure.
    FetchBodyStructure,
    /// Downloading a body part.
    FetchBodyPart,
    /// Idling.
    Idle,
    /// Ending `IDLE`.
    Done,
    /// `APPEND` command sent.
    AppendInit,
    /// `APPEND` content sent.
    AppendLast,
    /// `CLOSE`.
    Close,
    /// `LOGOUT`.
    Logout,
    /// Caller-supplied command.
    CustomCommand,
    /// Connection closed.
    Closed,
}

impl ImapState {
    /// Lowercase state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Greeting => "greeting",
            Self::StartTls => "start-tls",
            Self::Authentication => "authentication",
            Self::Id => "id",
            Self::Prompt => "prompt",
            Self::List => "list",
            Self::Select => "select",
            Self::Examine => "examine",
            Self::Search => "search",
            Self::FetchEnvelope => "fetch-envelope",
            Self::FetchBodyStructure => "fetch-body-structure",
            Self::FetchBodyPart => "fetch-body-part",
            Self::Idle => "idle",
            Self::Done => "done",
            Self::AppendInit => "append-init",
            Self::AppendLast => "append-last",
            Self::Close => "close",
            Self::Logout => "logout",
            Self::CustomCommand => "custom-command",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ImapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectStep {
    Open,
    Greeting,
    Capability,
    StartTls,
}

enum AuthStep {
    Start,
    /// Waiting for `+` before sending the initial response.
    Challenge(Zeroizing<String>),
    Verdict,
    XOAuth2Rejected(String),
    Id,
}

struct SelectJob {
    sent: bool,
    examine: bool,
    info: MailboxInfo,
}

struct SearchJob {
    sent: bool,
    criteria: String,
    uid: bool,
    options: SearchOptions,
    found: Vec<u32>,
    queue: VecDeque<u32>,
    current: Option<u32>,
    data: Option<FetchData>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchStep {
    Envelope,
    Structure,
    Parts,
}

struct FetchJob {
    request: FetchRequest,
    step: FetchStep,
    sent: bool,
    data: Option<FetchData>,
    parts: VecDeque<BodyPart>,
    current: Option<PartDownload>,
    /// The line closing a streamed literal is still to be skipped.
    closing: bool,
    seen: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AppendStep {
    Start,
    Ready,
    Body,
    Verdict,
}

struct AppendJob {
    step: AppendStep,
    mailbox: String,
    message: OutboundMessage,
    options: AppendOptions,
    send: SendOptions,
    machine: Option<SendMachine>,
}

enum Op {
    Idle,
    Connect { step: ConnectStep, then_auth: bool },
    Auth(AuthStep),
    List { sent: bool, entries: Vec<ListEntry> },
    Select(Box<SelectJob>),
    Search(Box<SearchJob>),
    Fetch(Box<FetchJob>),
    StartIdle { sent: bool },
    Done { sent: bool, next: Option<Box<Op>> },
    Append(Box<AppendJob>),
    Close { sent: bool },
    Logout { sent: bool },
    Custom { sent: bool, command: String },
}

impl Op {
    const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connect { .. } => "connect",
            Self::Auth(_) => "authentication",
            Self::List { .. } => "list",
            Self::Select(_) => "select",
            Self::Search(_) => "search",
            Self::Fetch(_) => "fetch",
            Self::StartIdle { .. } => "idle",
            Self::Done { .. } => "done",
            Self::Append(_) => "append",
            Self::Close { .. } => "close",
            Self::Logout { .. } => "logout",
            Self::Custom { .. } => "command",
        }
    }
}

/// One unit read from the server.
enum Unit {
    /// A complete response with literals folded in.
    Text(String),
    /// A `FETCH` line ending in a body literal of this many bytes.
    Literal(u64),
}

/// Non-blocking IMAP client engine.
pub struct ImapClient<T: Transport> {
    transport: T,
    config: Config,
    clock: SharedClock,
    status: Box<dyn StatusSink<ImapState>>,
    handler: Option<Box<dyn DataHandler>>,
    tls_hook: Option<TlsHook<T>>,
    store: Option<Box<dyn FileStore>>,
    reader: LineReader,
    responses: ResponseAccumulator,
    tags: TagGenerator,
    tag: String,
    timer: Timer,
    idle_timer: Timer,
    state: ImapState,
    op: Op,
    capabilities: Capabilities,
    credentials: Option<Credentials>,
    authenticated: bool,
    secured: bool,
    idling: bool,
    mailbox: Option<MailboxInfo>,
    mailboxes: Vec<ListEntry>,
    mailboxes_stale: bool,
    last_select: Option<(String, bool, Instant)>,
    last_search: Vec<u32>,
    last_error: Option<Error>,
}

impl<T: Transport> fmt::Debug for ImapClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapClient")
            .field("host", &self.config.host)
            .field("state", &self.state)
            .field("op", &self.op.name())
            .field("authenticated", &self.authenticated)
            .field("secured", &self.secured)
            .field("idling", &self.idling)
            .field("mailbox", &self.mailbox.as_ref().map(|m| &m.name))
            .finish_non_exhaustive()
    }
}

impl<T: Transport> ImapClient<T> {
    /// Creates an engine over `transport`. Nothing is sent until
    /// [`connect`](Self::connect).
    pub fn new(transport: T, config: Config) -> Self {
        Self {
            transport,
            config,
            clock: time::system_clock(),
            status: Box::new(TracingStatus::new("imap")),
            handler: None,
            tls_hook: None,
            store: None,
            reader: LineReader::default(),
            responses: ResponseAccumulator::new(),
            tags: TagGenerator::default(),
            tag: String::new(),
            timer: Timer::new(),
            idle_timer: Timer::new(),
            state: ImapState::Initial,
            op: Op::Idle,
            capabilities: Capabilities::default(),
            credentials: None,
            authenticated: false,
            secured: false,
            idling: false,
            mailbox: None,
            mailboxes: Vec::new(),
            mailboxes_stale: true,
            last_select: None,
            last_search: Vec::new(),
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
    pub fn with_status(mut self, sink: impl StatusSink<ImapState> + 'static) -> Self {
        self.status = Box::new(sink);
        self
    }

    /// Installs the receiver of fetched, searched and idle data.
    #[must_use]
    pub fn with_data_handler(mut self, handler: impl DataHandler + 'static) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Replaces the system clock used for timeouts.
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Installs the store used for part downloads and file attachments.
    #[must_use]
    pub fn with_file_store(mut self, store: impl FileStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Current protocol state.
    #[must_use]
    pub const fn state(&self) -> ImapState {
        self.state
    }

    /// Returns true while the transport is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.connected()
    }

    /// Returns true after successful authentication or a `PREAUTH` greeting.
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

    /// Returns true while the server is in `IDLE`.
    #[must_use]
    pub const fn is_idling(&self) -> bool {
        self.idling
    }

    /// Announced capabilities.
    #[must_use]
    pub const fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Selected mailbox.
    #[must_use]
    pub const fn mailbox(&self) -> Option<&MailboxInfo> {
        self.mailbox.as_ref()
    }

    /// Mailboxes from the last `LIST`.
    #[must_use]
    pub fn mailboxes(&self) -> &[ListEntry] {
        &self.mailboxes
    }

    /// Numbers reported by the last search.
    #[must_use]
    pub fn search_results(&self) -> &[u32] {
        &self.last_search
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

    /// Starts connecting: greeting, capabilities and the configured TLS mode.
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
        let op = if self.transport.connected() && self.state != ImapState::Closed {
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

    /// Starts `LIST "" *`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] or [`Error::Unauthenticated`].
    pub fn list(&mut self) -> Result<()> {
        self.require_auth()?;
        self.begin(Op::List {
            sent: false,
            entries: Vec::new(),
        })
    }

    /// Starts `SELECT mailbox`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`], [`Error::Unauthenticated`] or
    /// [`Error::MailboxNotFound`].
    pub fn select(&mut self, mailbox: &str) -> Result<()> {
        self.open_mailbox(mailbox, false)
    }

    /// Starts `EXAMINE mailbox` (read-only select).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`], [`Error::Unauthenticated`] or
    /// [`Error::MailboxNotFound`].
    pub fn examine(&mut self, mailbox: &str) -> Result<()> {
        self.open_mailbox(mailbox, true)
    }

    /// Starts a search with the configured limit and ordering.
    ///
    /// # Errors
    ///
    /// See [`search_with`](Self::search_with).
    pub fn search(&mut self, criteria: &str) -> Result<()> {
        let options = SearchOptions::from(&self.config);
        self.search_with(criteria, options)
    }

    /// Starts a search. `criteria` is the whole command, e.g.
    /// `SEARCH UNSEEN` or `UID SEARCH FROM "joe"`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSearchCriteria`], [`Error::NoMailbox`],
    /// [`Error::ModseqNotSupported`] or [`Error::NoDataHandler`] before
    /// anything is sent, or [`Error::Busy`].
    pub fn search_with(&mut self, criteria: &str, options: SearchOptions) -> Result<()> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        self.require_auth()?;
        let uid = match check_search(criteria) {
            Ok(uid) => uid,
            Err(e) => return Err(self.reject(e)),
        };
        let Some(mailbox) = &self.mailbox else {
            return Err(self.reject(Error::NoMailbox));
        };
        if uses_modseq(criteria) && (!self.capabilities.condstore() || mailbox.no_modseq) {
            return Err(self.reject(Error::ModseqNotSupported));
        }
        if options.fetch_envelopes && self.handler.is_none() {
            return Err(self.reject(Error::NoDataHandler));
        }
        self.begin(Op::Search(Box::new(SearchJob {
            sent: false,
            criteria: criteria.trim().to_string(),
            uid,
            options,
            found: Vec::new(),
            queue: VecDeque::new(),
            current: None,
            data: None,
        })))
    }

    /// Starts fetching a message: headers, structure, then each part.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoMailbox`], [`Error::MessageNotFound`] or
    /// [`Error::NoDataHandler`] before anything is sent, or
    /// [`Error::Busy`].
    pub fn fetch(&mut self, request: FetchRequest) -> Result<()> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        self.require_auth()?;
        let Some(mailbox) = &self.mailbox else {
            return Err(self.reject(Error::NoMailbox));
        };
        let n = request.number;
        let missing = if request.uid {
            n == 0 || (mailbox.uid_next > 0 && n >= mailbox.uid_next)
        } else {
            n == 0 || n > mailbox.exists
        };
        if missing {
            return Err(self.reject(Error::MessageNotFound(n)));
        }
        let can_store = self.store.is_some() && self.config.download_dir.is_some();
        if self.handler.is_none() && (request.headers_only || !can_store) {
            return Err(self.reject(Error::NoDataHandler));
        }
        self.begin(Op::Fetch(Box::new(FetchJob {
            request,
            step: FetchStep::Envelope,
            sent: false,
            data: None,
            parts: VecDeque::new(),
            current: None,
            closing: false,
            seen: false,
        })))
    }

    /// Starts `IDLE` on the selected mailbox. Events then arrive through
    /// [`DataHandler::on_idle`] while the caller keeps polling.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdleNotSupported`] or [`Error::NoMailbox`] before
    /// anything is sent, or [`Error::Busy`].
    pub fn idle(&mut self) -> Result<()> {
        if self.idling {
            return Ok(());
        }
        if self.is_busy() {
            return Err(Error::Busy);
        }
        self.require_auth()?;
        if !self.capabilities.idle() {
            return Err(self.reject(Error::IdleNotSupported));
        }
        if self.mailbox.is_none() {
            return Err(self.reject(Error::NoMailbox));
        }
        self.begin(Op::StartIdle { sent: false })
    }

    /// Ends `IDLE`. Does nothing when not idling.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] if another operation is in flight.
    pub fn done(&mut self) -> Result<()> {
        if !self.idling {
            return Ok(());
        }
        self.begin(Op::Done {
            sent: false,
            next: None,
        })
    }

    /// Starts appending `message` to `mailbox`.
    ///
    /// The message is rendered by the SMTP send machine: once to measure the
    /// literal, then again to stream it after the server's `+`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`], [`Error::Unauthenticated`] or
    /// [`Error::MailboxNotFound`].
    pub fn append(
        &mut self,
        mailbox: &str,
        message: &OutboundMessage,
        options: AppendOptions,
    ) -> Result<()> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        self.require_auth()?;
        if !self.mailbox_known(mailbox) {
            return Err(self.reject(Error::MailboxNotFound(mailbox.to_string())));
        }
        self.begin(Op::Append(Box::new(AppendJob {
            step: AppendStep::Start,
            mailbox: mailbox.to_string(),
            message: message.clone(),
            options,
            send: SendOptions::append(),
            machine: None,
        })))
    }

    /// Starts `CLOSE` on the selected mailbox.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] or [`Error::NoMailbox`].
    pub fn close(&mut self) -> Result<()> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        if self.mailbox.is_none() {
            return Err(self.reject(Error::NoMailbox));
        }
        self.begin(Op::Close { sent: false })
    }

    /// Starts a caller-supplied command such as `CREATE Archive`. Every
    /// response line goes to [`DataHandler::on_command_response`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommandNotAllowed`] for verbs the engine issues
    /// itself, [`Error::NotConnected`] or [`Error::Busy`].
    pub fn command(&mut self, text: &str) -> Result<()> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        if let Err(e) = check_custom(text) {
            return Err(self.reject(e));
        }
        if !self.transport.connected() {
            return Err(self.reject(Error::NotConnected));
        }
        self.begin(Op::Custom {
            sent: false,
            command: text.trim().to_string(),
        })
    }

    /// Starts `LOGOUT`. Does nothing when already disconnected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] if another operation is in flight.
    pub fn logout(&mut self) -> Result<()> {
        if !self.transport.connected() {
            if self.is_busy() {
                return Err(Error::Busy);
            }
            self.set_state(ImapState::Closed);
            return Ok(());
        }
        self.begin(Op::Logout { sent: false })
    }

    /// Closes the transport and abandons any operation. Safe to call twice.
    pub fn stop(&mut self) {
        if self.transport.connected() {
            debug!("closing IMAP connection");
            self.transport.stop();
        }
        if let Some(mut creds) = self.credentials.take() {
            creds.clear();
        }
        self.op = Op::Idle;
        self.timer.stop();
        self.idle_timer.stop();
        self.reader.clear();
        self.responses.clear();
        self.authenticated = false;
        self.secured = false;
        self.idling = false;
        self.mailbox = None;
        self.last_select = None;
        self.set_state(ImapState::Closed);
    }

    /// Performs one bounded step of the current operation.
    ///
    /// While idling with nothing else in flight, each call dispatches at
    /// most one mailbox event and returns [`PollResult::Continue`].
    pub fn poll(&mut self) -> PollResult {
        if matches!(self.op, Op::Idle) {
            return if self.idling {
                self.poll_idle()
            } else {
                PollResult::Success
            };
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

    /// Polls until the current operation finishes. Returns at once when
    /// nothing is in flight, including while idling.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the operation.
    pub fn run(&mut self) -> Result<()> {
        if !self.is_busy() {
            return Ok(());
        }
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
        let op = if self.idling && !matches!(op, Op::Done { .. }) {
            debug!(op = op.name(), "ending IDLE first");
            Op::Done {
                sent: false,
                next: Some(Box::new(op)),
            }
        } else {
            op
        };
        debug!(op = op.name(), "starting operation");
        self.last_error = None;
        self.op = op;
        Ok(())
    }

    fn require_auth(&mut self) -> Result<()> {
        if !self.transport.connected() {
            return Err(self.reject(Error::NotConnected));
        }
        if !self.authenticated {
            return Err(self.reject(Error::Unauthenticated));
        }
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
        self.responses.clear();
        if let Some(mut creds) = self.credentials.take() {
            creds.clear();
        }
        let auth = matches!(
            e,
            Error::Authentication(_) | Error::MechanismNotSupported
        );
        if e.is_broken() || connecting || auth {
            self.transport.stop();
            self.reader.clear();
            self.idle_timer.stop();
            self.authenticated = false;
            self.secured = false;
            self.idling = false;
            self.mailbox = None;
            self.last_select = None;
            self.set_state(ImapState::Closed);
        } else if self.idling {
            self.set_state(ImapState::Idle);
        } else if self.transport.connected() && self.state != ImapState::Initial {
            self.set_state(ImapState::Prompt);
        }
        self.last_error = Some(e);
    }

    fn set_state(&mut self, state: ImapState) {
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

    fn write_command(&mut self, cmd: &Command) -> Result<()> {
        if cmd.is_tagged() {
            self.tag = self.tags.next_tag();
        }
        trace!(command = %cmd.redacted(&self.tag), "C:");
        self.transport
            .write_all(&cmd.serialize(&self.tag))
            .map_err(Error::SendData)?;
        self.arm(self.config.read_timeout);
        Ok(())
    }

    /// Reads one complete response, or the start of a streamed body
    /// literal when `intercept` is set.
    fn read_unit(&mut self, intercept: bool) -> Result<Option<Unit>> {
        self.reader
            .fill(&mut self.transport)
            .map_err(Error::ReadData)?;
        loop {
            let pending = self.responses.pending_literal();
            if pending > 0 {
                let chunk = self.reader.take(pending);
                if chunk.is_empty() {
                    return Ok(None);
                }
                self.responses.push_literal(&chunk)?;
                continue;
            }
            let Some(line) = self.reader.next_line().map_err(Error::ReadData)? else {
                return Ok(None);
            };
            trace!(line = %String::from_utf8_lossy(&line).trim_end(), "S:");
            if intercept
                && !self.responses.in_progress()
                && let Some(size) = body_literal(&line)
            {
                return Ok(Some(Unit::Literal(size)));
            }
            if let Some(text) = self.responses.push_line(&line)? {
                return Ok(Some(Unit::Text(text)));
            }
        }
    }

    fn read_response(&mut self) -> Result<Option<Response>> {
        match self.read_unit(false)? {
            Some(Unit::Text(text)) => Response::parse(&text).map(Some),
            _ => Ok(None),
        }
    }

    fn is_current(&self, tag: &str) -> bool {
        tag == self.tag
    }

    fn unexpected(response: &Response) {
        warn!(?response, "unexpected response");
    }

    /// Handles untagged data no operation claimed.
    fn untagged(&mut self, response: Untagged) -> Result<()> {
        match response {
            Untagged::Status {
                status: ResponseStatus::Bye,
                text,
                ..
            } => return Err(Error::Bye(text)),
            Untagged::Status {
                code: Some(ResponseCode::Capability(caps)),
                ..
            }
            | Untagged::Capability(caps) => {
                self.capabilities = Capabilities::from_tokens(caps.iter().map(String::as_str));
            }
            Untagged::Status {
                code: Some(ResponseCode::Alert),
                text,
                ..
            } => {
                warn!(%text, "server alert");
                self.info(format!("alert: {text}"));
            }
            Untagged::Status {
                status: ResponseStatus::No | ResponseStatus::Bad,
                text,
                ..
            } => warn!(%text, "server warning"),
            Untagged::Exists(n) => {
                if let Some(mailbox) = self.mailbox.as_mut() {
                    mailbox.exists = n;
                }
                self.notify_idle(&IdleEvent::Exists(n));
            }
            Untagged::Recent(n) => {
                if let Some(mailbox) = self.mailbox.as_mut() {
                    mailbox.recent = n;
                }
                self.notify_idle(&IdleEvent::Recent(n));
            }
            Untagged::Expunge(n) => {
                if let Some(mailbox) = self.mailbox.as_mut() {
                    mailbox.exists = mailbox.exists.saturating_sub(1);
                }
                self.notify_idle(&IdleEvent::Expunge(n));
            }
            Untagged::Fetch { seq, items } if self.idling => {
                if let Some(flags) = FetchData::parse(&items)?.flags {
                    self.notify_idle(&IdleEvent::Flags { number: seq, flags });
                }
            }
            other => debug!(response = ?other, "ignoring untagged response"),
        }
        Ok(())
    }

    fn notify_idle(&mut self, event: &IdleEvent) {
        if !self.idling {
            return;
        }
        self.info(format!("{event:?}"));
        if let Some(handler) = self.handler.as_mut() {
            handler.on_idle(event);
        }
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
            Op::List { sent, entries } => self.step_list(sent, entries),
            Op::Select(job) => self.step_select(job),
            Op::Search(job) => self.step_search(job),
            Op::Fetch(job) => self.step_fetch(job),
            Op::StartIdle { sent } => self.step_start_idle(sent),
            Op::Done { sent, next } => self.step_done(sent, next),
            Op::Append(job) => self.step_append(job),
            Op::Close { sent } => self.step_close(sent),
            Op::Logout { sent } => self.step_logout(sent),
            Op::Custom { sent, command } => self.step_custom(sent, command),
        }
    }

    fn poll_idle(&mut self) -> PollResult {
        if self.idle_timer.expired(self.clock.now()) {
            debug!("refreshing IDLE");
            self.idle_timer.stop();
            self.op = Op::Done {
                sent: false,
                next: Some(Box::new(Op::StartIdle { sent: false })),
            };
            return PollResult::Continue;
        }
        let result = if self.transport.connected() {
            self.idle_events()
        } else {
            Err(Error::NotConnected)
        };
        match result {
            Ok(()) => PollResult::Continue,
            Err(e) => {
                self.fail(e, "idle", false);
                PollResult::Failure
            }
        }
    }

    fn idle_events(&mut self) -> Result<()> {
        match self.read_response()? {
            Some(Response::Untagged(u)) => self.untagged(u),
            Some(Response::Tagged { tag, completion }) if self.is_current(&tag) => {
                warn!(text = %completion.text, "server ended IDLE");
                self.idling = false;
                self.idle_timer.stop();
                self.set_state(ImapState::Prompt);
                Ok(())
            }
            Some(other) => {
                Self::unexpected(&other);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn step_connect(&mut self, step: ConnectStep, then_auth: bool) -> Result<bool> {
        let next = |step| Op::Connect { step, then_auth };

        if step == ConnectStep::Open {
            self.open()?;
            self.op = next(ConnectStep::Greeting);
            return Ok(false);
        }

        let Some(response) = self.read_response()? else {
            self.op = next(step);
            return Ok(false);
        };

        match (step, response) {
            (
                ConnectStep::Greeting,
                Response::Untagged(Untagged::Status {
                    status: status @ (ResponseStatus::Ok | ResponseStatus::PreAuth),
                    code,
                    text,
                }),
            ) => {
                if let Some(ResponseCode::Capability(caps)) = code {
                    self.capabilities =
                        Capabilities::from_tokens(caps.iter().map(String::as_str));
                }
                if status == ResponseStatus::PreAuth {
                    self.authenticated = true;
                }
                self.info(format!("greeting: {text}"));
                self.after_capabilities(then_auth)
            }
            (
                ConnectStep::Greeting,
                Response::Untagged(Untagged::Status {
                    status: ResponseStatus::Bye,
                    text,
                    ..
                }),
            ) => Err(Error::Bye(text)),
            (ConnectStep::Capability | ConnectStep::StartTls, Response::Untagged(u)) => {
                self.untagged(u)?;
                self.op = next(step);
                Ok(false)
            }
            (ConnectStep::Capability, Response::Tagged { tag, completion })
                if self.is_current(&tag) =>
            {
                if !completion.is_ok() {
                    return Err(completion.into_error());
                }
                if let Some(ResponseCode::Capability(caps)) = &completion.code {
                    self.capabilities =
                        Capabilities::from_tokens(caps.iter().map(String::as_str));
                }
                if self.capabilities.is_empty() {
                    return Err(Error::Protocol("server announced no capabilities".into()));
                }
                self.after_capabilities(then_auth)
            }
            (ConnectStep::StartTls, Response::Tagged { tag, completion })
                if self.is_current(&tag) =>
            {
                if !completion.is_ok() {
                    return Err(completion.into_error());
                }
                self.upgrade()?;
                self.capabilities = Capabilities::default();
                self.after_capabilities(then_auth)
            }
            (_, other) => {
                if step == ConnectStep::Greeting {
                    return Err(Error::Protocol(format!("unexpected greeting: {other:?}")));
                }
                Self::unexpected(&other);
                self.op = next(step);
                Ok(false)
            }
        }
    }

    /// Picks the next connect step once the greeting or a capability
    /// exchange is through.
    fn after_capabilities(&mut self, then_auth: bool) -> Result<bool> {
        if self.capabilities.is_empty() {
            self.write_command(&Command::Capability)?;
            self.op = Op::Connect {
                step: ConnectStep::Capability,
                then_auth,
            };
            return Ok(false);
        }
        if self.config.security == Security::StartTls && !self.secured {
            if !self.capabilities.starttls() {
                return Err(Error::Protocol("server does not offer STARTTLS".into()));
            }
            self.set_state(ImapState::StartTls);
            self.write_command(&Command::StartTls)?;
            self.op = Op::Connect {
                step: ConnectStep::StartTls,
                then_auth,
            };
            return Ok(false);
        }
        self.connected(then_auth)
    }

    fn open(&mut self) -> Result<()> {
        self.reader.clear();
        self.responses.clear();
        self.authenticated = false;
        self.secured = false;
        self.idling = false;
        self.mailbox = None;
        self.last_select = None;
        self.capabilities = Capabilities::default();
        self.tags.reset();
        self.transport.set_timeout(self.config.connect_timeout);
        debug!(host = %self.config.host, port = self.config.port, "connecting");
        self.transport
            .connect(&self.config.host, self.config.port)
            .map_err(Error::Connection)?;
        if self.config.security == Security::Implicit {
            self.upgrade()?;
        }
        self.set_state(ImapState::Greeting);
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

    fn connected(&mut self, then_auth: bool) -> Result<bool> {
        self.set_state(ImapState::Prompt);
        self.info(format!("connected to {}", self.config.host));
        if then_auth && !self.authenticated {
            self.op = Op::Auth(AuthStep::Start);
            return self.step();
        }
        Ok(true)
    }

    fn step_auth(&mut self, step: AuthStep) -> Result<bool> {
        if matches!(step, AuthStep::Start) {
            self.set_state(ImapState::Authentication);
            let creds = self.credentials.take().unwrap_or_default();
            let result = self.start_auth(&creds);
            self.credentials = Some(creds);
            self.op = Op::Auth(result?);
            return Ok(false);
        }

        let Some(response) = self.read_response()? else {
            self.op = Op::Auth(step);
            return Ok(false);
        };

        match (step, response) {
            (step, Response::Untagged(u)) => {
                self.untagged(u)?;
                self.op = Op::Auth(step);
                Ok(false)
            }
            (AuthStep::Challenge(initial), Response::Continuation(_)) => {
                self.write_command(&Command::AuthResponse(initial))?;
                self.op = Op::Auth(AuthStep::Verdict);
                Ok(false)
            }
            (AuthStep::Verdict, Response::Continuation(challenge)) => {
                // XOAUTH2 reports errors as a challenge that must be answered
                let reason = xoauth2_failure(&challenge)
                    .unwrap_or_else(|| sasl::decode_challenge(&challenge));
                self.write_command(&Command::AuthResponse(Zeroizing::new(String::new())))?;
                self.op = Op::Auth(AuthStep::XOAuth2Rejected(reason));
                Ok(false)
            }
            (AuthStep::XOAuth2Rejected(reason), Response::Tagged { tag, .. })
                if self.is_current(&tag) =>
            {
                Err(Error::Authentication(reason))
            }
            (AuthStep::Challenge(_) | AuthStep::Verdict, Response::Tagged { tag, completion })
                if self.is_current(&tag) =>
            {
                if !completion.is_ok() {
                    return Err(Error::Authentication(completion.text));
                }
                if let Some(mut creds) = self.credentials.take() {
                    creds.clear();
                }
                self.authenticated = true;
                if let Some(ResponseCode::Capability(caps)) = &completion.code {
                    self.capabilities =
                        Capabilities::from_tokens(caps.iter().map(String::as_str));
                }
                self.info("authenticated");
                if self.capabilities.id() {
                    self.set_state(ImapState::Id);
                    let id = Command::Id {
                        name: self.config.client_name.clone(),
                        version: self.config.client_version.clone(),
                    };
                    self.write_command(&id)?;
                    self.op = Op::Auth(AuthStep::Id);
                    return Ok(false);
                }
                self.set_state(ImapState::Prompt);
                Ok(true)
            }
            (AuthStep::Id, Response::Tagged { tag, completion }) if self.is_current(&tag) => {
                if !completion.is_ok() {
                    warn!(text = %completion.text, "ID refused");
                }
                self.set_state(ImapState::Prompt);
                Ok(true)
            }
            (step, other) => {
                Self::unexpected(&other);
                self.op = Op::Auth(step);
                Ok(false)
            }
        }
    }

    fn start_auth(&mut self, creds: &Credentials) -> Result<AuthStep> {
        let mechanism = sasl::choose_mechanism(self.capabilities.auth_mechanisms(), creds)
            .ok_or(Error::MechanismNotSupported)?;
        debug!(%mechanism, "authenticating");
        let initial = match mechanism {
            Mechanism::Login => {
                let login = Command::Login {
                    username: creds.user().to_string(),
                    password: Zeroizing::new(
                        creds.secret_password().unwrap_or_default().to_string(),
                    ),
                };
                self.write_command(&login)?;
                return Ok(AuthStep::Verdict);
            }
            Mechanism::XOAuth2 => xoauth2_response(creds.user(), creds.token().unwrap_or_default()),
            Mechanism::Plain => {
                plain_response(creds.user(), creds.secret_password().unwrap_or_default())
            }
        };
        if self.capabilities.sasl_ir() {
            self.write_command(&Command::Authenticate {
                mechanism,
                initial_response: Some(initial),
            })?;
            return Ok(AuthStep::Verdict);
        }
        self.write_command(&Command::Authenticate {
            mechanism,
            initial_response: None,
        })?;
        Ok(AuthStep::Challenge(initial))
    }

    fn step_list(&mut self, sent: bool, mut entries: Vec<ListEntry>) -> Result<bool> {
        if !sent {
            self.set_state(ImapState::List);
            self.write_command(&Command::List {
                reference: String::new(),
                pattern: "*".to_string(),
            })?;
            self.op = Op::List {
                sent: true,
                entries,
            };
            return Ok(false);
        }
        match self.read_response()? {
            Some(Response::Untagged(Untagged::List(entry))) => {
                if let Some(handler) = self.handler.as_mut() {
                    handler.on_mailbox(&entry);
                }
                entries.push(entry);
            }
            Some(Response::Untagged(u)) => self.untagged(u)?,
            Some(Response::Tagged { tag, completion }) if self.is_current(&tag) => {
                if !completion.is_ok() {
                    return Err(completion.into_error());
                }
                self.info(format!("{} mailboxes", entries.len()));
                self.mailboxes = entries;
                self.mailboxes_stale = false;
                self.set_state(ImapState::Prompt);
                return Ok(true);
            }
            Some(other) => Self::unexpected(&other),
            None => {}
        }
        self.op = Op::List {
            sent: true,
            entries,
        };
        Ok(false)
    }

    fn mailbox_known(&self, name: &str) -> bool {
        self.mailboxes_stale
            || self.mailboxes.is_empty()
            || name.eq_ignore_ascii_case("INBOX")
            || self.mailboxes.iter().any(|e| e.name == name)
    }

    fn open_mailbox(&mut self, name: &str, examine: bool) -> Result<()> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        self.require_auth()?;
        if !self.mailbox_known(name) {
            return Err(self.reject(Error::MailboxNotFound(name.to_string())));
        }
        if self.mailbox.is_some()
            && let Some((last, last_examine, at)) = &self.last_select
            && last == name
            && *last_examine == examine
            && !self.clock.has_elapsed(*at, SELECT_DEDUP_WINDOW)
        {
            debug!(mailbox = name, "mailbox selected moments ago");
            self.info(format!("{name} already selected"));
            return Ok(());
        }
        self.begin(Op::Select(Box::new(SelectJob {
            sent: false,
            examine,
            info: MailboxInfo {
                name: name.to_string(),
                read_only: examine,
                ..MailboxInfo::default()
            },
        })))
    }

    fn step_select(&mut self, mut job: Box<SelectJob>) -> Result<bool> {
        if !job.sent {
            self.set_state(if job.examine {
                ImapState::Examine
            } else {
                ImapState::Select
            });
            self.mailbox = None;
            self.last_select = None;
            let mailbox = job.info.name.clone();
            let condstore = self.capabilities.condstore();
            let cmd = if job.examine {
                Command::Examine { mailbox, condstore }
            } else {
                Command::Select { mailbox, condstore }
            };
            self.write_command(&cmd)?;
            job.sent = true;
            self.op = Op::Select(job);
            return Ok(false);
        }

        match self.read_response()? {
            Some(Response::Untagged(Untagged::Exists(n))) => job.info.exists = n,
            Some(Response::Untagged(Untagged::Recent(n))) => job.info.recent = n,
            Some(Response::Untagged(Untagged::Flags(flags))) => job.info.flags = flags,
            Some(Response::Untagged(Untagged::Status {
                status: ResponseStatus::Ok,
                code: Some(code),
                ..
            })) => apply_code(&mut job.info, code),
            Some(Response::Untagged(u)) => self.untagged(u)?,
            Some(Response::Tagged { tag, completion }) if self.is_current(&tag) => {
                if !completion.is_ok() {
                    return Err(completion.into_error());
                }
                if let Some(code) = completion.code {
                    apply_code(&mut job.info, code);
                }
                let SelectJob { examine, info, .. } = *job;
                self.info(format!(
                    "{} selected: {} messages, {} recent",
                    info.name, info.exists, info.recent
                ));
                self.last_select = Some((info.name.clone(), examine, self.clock.now()));
                self.mailbox = Some(info);
                self.set_state(ImapState::Prompt);
                return Ok(true);
            }
            Some(other) => Self::unexpected(&other),
            None => {}
        }
        self.op = Op::Select(job);
        Ok(false)
    }

    fn step_search(&mut self, mut job: Box<SearchJob>) -> Result<bool> {
        if !job.sent {
            self.set_state(ImapState::Search);
            self.write_command(&Command::Search {
                criteria: job.criteria.clone(),
            })?;
            job.sent = true;
            self.op = Op::Search(job);
            return Ok(false);
        }

        match self.read_response()? {
            Some(Response::Untagged(Untagged::Search(numbers))) if job.current.is_none() => {
                job.found.extend(numbers);
            }
            Some(Response::Untagged(Untagged::Fetch { items, .. }))
                if job.current.is_some() && job.data.is_none() =>
            {
                job.data = Some(FetchData::parse(&items)?);
            }
            Some(Response::Untagged(u)) => self.untagged(u)?,
            Some(Response::Tagged { tag, completion }) if self.is_current(&tag) => {
                if !completion.is_ok() {
                    return Err(completion.into_error());
                }
                match job.current.take() {
                    Some(number) => match job.data.take() {
                        Some(data) => self.emit_envelope(number, &data),
                        None => warn!(number, "no data for search result"),
                    },
                    None => self.report_search(&mut job),
                }
                return self.next_search_envelope(job);
            }
            Some(other) => Self::unexpected(&other),
            None => {}
        }
        self.op = Op::Search(job);
        Ok(false)
    }

    fn report_search(&mut self, job: &mut SearchJob) {
        let found = std::mem::take(&mut job.found);
        let total = found.len();
        let numbers = job.options.arrange(found);
        self.info(format!("{total} messages found"));
        let result = SearchResult {
            numbers,
            total,
            uid: job.uid,
        };
        if let Some(handler) = self.handler.as_mut() {
            handler.on_search(&result);
        }
        if job.options.fetch_envelopes {
            job.queue = result.numbers.iter().copied().collect();
        }
        self.last_search = result.numbers;
    }

    fn next_search_envelope(&mut self, mut job: Box<SearchJob>) -> Result<bool> {
        let Some(number) = job.queue.pop_front() else {
            self.set_state(ImapState::Prompt);
            return Ok(true);
        };
        self.set_state(ImapState::FetchEnvelope);
        self.write_command(&Command::Fetch {
            number,
            uid: job.uid,
            items: FetchItems::Full,
        })?;
        job.current = Some(number);
        job.data = None;
        self.op = Op::Search(job);
        Ok(false)
    }

    fn emit_envelope(&mut self, number: u32, data: &FetchData) {
        let header = MessageHeader {
            number,
            uid: data.uid,
            headers: data.headers(),
        };
        if let Some(handler) = self.handler.as_mut() {
            handler.on_envelope(&header);
        }
    }

    fn step_fetch(&mut self, mut job: Box<FetchJob>) -> Result<bool> {
        if job.step == FetchStep::Parts {
            return self.step_part(job);
        }
        if !job.sent {
            let (state, items) = match job.step {
                FetchStep::Envelope => (ImapState::FetchEnvelope, FetchItems::Full),
                _ => (ImapState::FetchBodyStructure, FetchItems::BodyStructure),
            };
            self.set_state(state);
            self.write_command(&Command::Fetch {
                number: job.request.number,
                uid: job.request.uid,
                items,
            })?;
            job.sent = true;
            self.op = Op::Fetch(job);
            return Ok(false);
        }

        match self.read_response()? {
            Some(Response::Untagged(Untagged::Fetch { items, .. })) if job.data.is_none() => {
                job.data = Some(FetchData::parse(&items)?);
            }
            Some(Response::Untagged(u)) => self.untagged(u)?,
            Some(Response::Tagged { tag, completion }) if self.is_current(&tag) => {
                if !completion.is_ok() {
                    return Err(completion.into_error());
                }
                let number = job.request.number;
                let data = job.data.take().ok_or(Error::MessageNotFound(number))?;
                if job.step == FetchStep::Envelope {
                    self.emit_envelope(number, &data);
                    if job.request.headers_only {
                        self.set_state(ImapState::Prompt);
                        return Ok(true);
                    }
                    job.step = FetchStep::Structure;
                    job.sent = false;
                    self.op = Op::Fetch(job);
                    return self.step();
                }
                let structure = data
                    .body_structure
                    .ok_or_else(|| Error::Protocol("no BODYSTRUCTURE in response".into()))?;
                job.parts = structure
                    .leaves()
                    .filter(|p| job.request.wants(&p.section))
                    .cloned()
                    .collect();
                job.step = FetchStep::Parts;
                return self.next_part(job);
            }
            Some(other) => Self::unexpected(&other),
            None => {}
        }
        self.op = Op::Fetch(job);
        Ok(false)
    }

    /// Requests the next part within the size ceiling.
    fn next_part(&mut self, mut job: Box<FetchJob>) -> Result<bool> {
        while let Some(part) = job.parts.pop_front() {
            let size = part.decoded_size();
            if size > self.config.part_size_limit {
                let text = format!(
                    "skipped part {} ({size} bytes over the {} byte limit)",
                    part.section, self.config.part_size_limit
                );
                warn!(section = %part.section, size, "part over size limit");
                self.info(text);
                continue;
            }
            let mut download = PartDownload::new(job.request.number, &part);
            if let (Some(store), Some(dir)) = (self.store.as_deref_mut(), &self.config.download_dir) {
                download.open_file(store, dir);
            }
            self.set_state(ImapState::FetchBodyPart);
            self.write_command(&Command::Fetch {
                number: job.request.number,
                uid: job.request.uid,
                items: FetchItems::Section {
                    section: part.section.clone(),
                    peek: self.config.read_only,
                },
            })?;
            job.current = Some(download);
            job.closing = false;
            job.seen = false;
            self.op = Op::Fetch(job);
            return Ok(false);
        }
        self.info(format!("message {} fetched", job.request.number));
        self.set_state(ImapState::Prompt);
        Ok(true)
    }

    /// Feeds raw part bytes and reports progress.
    fn feed_part(&mut self, download: &mut PartDownload, raw: &[u8]) {
        if let Some(percent) = download.feed(raw, self.handler.as_deref_mut()) {
            let text = format!("part {}", download.section());
            self.status
                .on_status(&Status::progress(self.state, percent, text));
        }
    }

    fn step_part(&mut self, mut job: Box<FetchJob>) -> Result<bool> {
        let Some(mut download) = job.current.take() else {
            return self.next_part(job);
        };

        if download.is_streaming() {
            self.reader
                .fill(&mut self.transport)
                .map_err(Error::ReadData)?;
            let want = usize::try_from(download.remaining())
                .unwrap_or(usize::MAX)
                .min(self.config.line_limit);
            let chunk = self.reader.take(want);
            if !chunk.is_empty() {
                self.feed_part(&mut download, &chunk);
                self.arm(self.config.read_timeout);
                if !download.is_streaming() {
                    self.finish_part(&mut download);
                    job.closing = true;
                }
            }
            job.current = Some(download);
            self.op = Op::Fetch(job);
            return Ok(false);
        }

        if job.closing {
            self.reader
                .fill(&mut self.transport)
                .map_err(Error::ReadData)?;
            if let Some(line) = self.reader.next_line().map_err(Error::ReadData)? {
                trace!(line = %String::from_utf8_lossy(&line).trim_end(), "S:");
                job.closing = false;
            }
            job.current = Some(download);
            self.op = Op::Fetch(job);
            return Ok(false);
        }

        match self.read_unit(true)? {
            Some(Unit::Literal(size)) => {
                job.seen = true;
                download.begin(size);
                if !download.is_streaming() {
                    self.finish_part(&mut download);
                    job.closing = true;
                }
            }
            Some(Unit::Text(text)) => match Response::parse(&text)? {
                Response::Untagged(Untagged::Fetch { items, .. }) if !job.seen => {
                    let data = FetchData::parse(&items)?;
                    if let Some((_, value)) = data.sections.into_iter().next() {
                        job.seen = true;
                        let bytes = value.unwrap_or_default();
                        download.begin(bytes.len() as u64);
                        self.feed_part(&mut download, bytes.as_bytes());
                        self.finish_part(&mut download);
                    }
                }
                Response::Untagged(u) => self.untagged(u)?,
                Response::Tagged { tag, completion } if self.is_current(&tag) => {
                    if !completion.is_ok() {
                        return Err(completion.into_error());
                    }
                    if !job.seen {
                        warn!(section = download.section(), "server returned no data for part");
                    }
                    return self.next_part(job);
                }
                other => Self::unexpected(&other),
            },
            None => {}
        }
        job.current = Some(download);
        self.op = Op::Fetch(job);
        Ok(false)
    }

    fn finish_part(&mut self, download: &mut PartDownload) {
        download.finish(self.handler.as_deref_mut());
        let text = match download.path() {
            Some(path) => format!(
                "part {} downloaded to {path} ({} bytes)",
                download.section(),
                download.decoded()
            ),
            None => format!(
                "part {} downloaded ({} bytes)",
                download.section(),
                download.decoded()
            ),
        };
        self.info(text);
    }

    fn step_start_idle(&mut self, sent: bool) -> Result<bool> {
        if !sent {
            self.set_state(ImapState::Idle);
            self.write_command(&Command::Idle)?;
            self.op = Op::StartIdle { sent: true };
            return Ok(false);
        }
        match self.read_response()? {
            Some(Response::Continuation(_)) => {
                self.idling = true;
                self.idle_timer
                    .feed(self.config.idle_timeout, self.clock.now());
                self.info("idling");
                return Ok(true);
            }
            Some(Response::Untagged(u)) => self.untagged(u)?,
            Some(Response::Tagged { tag, completion }) if self.is_current(&tag) => {
                return Err(if completion.is_ok() {
                    Error::Protocol("IDLE completed without continuation".into())
                } else {
                    completion.into_error()
                });
            }
            Some(other) => Self::unexpected(&other),
            None => {}
        }
        self.op = Op::StartIdle { sent: true };
        Ok(false)
    }

    fn step_done(&mut self, sent: bool, next: Option<Box<Op>>) -> Result<bool> {
        if !sent {
            self.set_state(ImapState::Done);
            self.write_command(&Command::Done)?;
            self.op = Op::Done { sent: true, next };
            return Ok(false);
        }
        match self.read_response()? {
            Some(Response::Untagged(u)) => self.untagged(u)?,
            Some(Response::Tagged { tag, completion }) if self.is_current(&tag) => {
                self.idling = false;
                self.idle_timer.stop();
                if !completion.is_ok() {
                    warn!(text = %completion.text, "IDLE ended with failure");
                }
                self.set_state(ImapState::Prompt);
                if let Some(next) = next {
                    self.op = *next;
                    return self.step();
                }
                self.info("idle ended");
                return Ok(true);
            }
            Some(other) => Self::unexpected(&other),
            None => {}
        }
        self.op = Op::Done { sent: true, next };
        Ok(false)
    }

    fn step_append(&mut self, mut job: Box<AppendJob>) -> Result<bool> {
        match job.step {
            AppendStep::Start => {
                self.set_state(ImapState::AppendInit);
                let size = SendMachine::measure(&job.message, job.send, self.store.as_deref_mut());
                self.info(format!(
                    "appending \"{}\" to {} ({size} bytes)",
                    job.message.subject, job.mailbox
                ));
                self.write_command(&Command::Append {
                    mailbox: job.mailbox.clone(),
                    flags: job.options.flags.clone(),
                    date: job.options.date.clone(),
                    size,
                })?;
                job.step = AppendStep::Ready;
                self.op = Op::Append(job);
                return Ok(false);
            }
            AppendStep::Body => return self.stream_append(job),
            AppendStep::Ready | AppendStep::Verdict => {}
        }

        match self.read_response()? {
            Some(Response::Continuation(_)) if job.step == AppendStep::Ready => {
                job.machine = Some(SendMachine::new(&job.message, job.send));
                job.step = AppendStep::Body;
                self.arm(self.config.send_timeout);
            }
            Some(Response::Untagged(u)) => self.untagged(u)?,
            Some(Response::Tagged { tag, completion }) if self.is_current(&tag) => {
                if !completion.is_ok() {
                    return Err(completion.into_error());
                }
                let text = match completion.code {
                    Some(ResponseCode::AppendUid { uid, .. }) => {
                        format!("appended to {} as UID {uid}", job.mailbox)
                    }
                    _ => format!("appended to {}", job.mailbox),
                };
                self.info(text);
                self.set_state(ImapState::Prompt);
                return Ok(true);
            }
            Some(other) => Self::unexpected(&other),
            None => {}
        }
        self.op = Op::Append(job);
        Ok(false)
    }

    /// Writes one bounded piece of the message, or the closing CRLF.
    fn stream_append(&mut self, mut job: Box<AppendJob>) -> Result<bool> {
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
            self.transport.write_all(&chunk).map_err(Error::SendData)?;
            self.arm(self.config.send_timeout);
        } else {
            trace!(bytes = machine.written(), "append content complete");
            self.transport.write_all(b"\r\n").map_err(Error::SendData)?;
            self.set_state(ImapState::AppendLast);
            self.arm(self.config.read_timeout);
            job.step = AppendStep::Verdict;
        }
        self.op = Op::Append(job);
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

    fn step_close(&mut self, sent: bool) -> Result<bool> {
        if !sent {
            self.set_state(ImapState::Close);
            self.write_command(&Command::Close)?;
            self.op = Op::Close { sent: true };
            return Ok(false);
        }
        match self.read_response()? {
            Some(Response::Untagged(u)) => self.untagged(u)?,
            Some(Response::Tagged { tag, completion }) if self.is_current(&tag) => {
                if !completion.is_ok() {
                    return Err(completion.into_error());
                }
                self.mailbox = None;
                self.last_select = None;
                self.info("mailbox closed");
                self.set_state(ImapState::Prompt);
                return Ok(true);
            }
            Some(other) => Self::unexpected(&other),
            None => {}
        }
        self.op = Op::Close { sent: true };
        Ok(false)
    }

    fn step_logout(&mut self, sent: bool) -> Result<bool> {
        if !sent {
            self.set_state(ImapState::Logout);
            self.write_command(&Command::Logout)?;
            self.op = Op::Logout { sent: true };
            return Ok(false);
        }
        match self.read_response()? {
            Some(Response::Untagged(Untagged::Status {
                status: ResponseStatus::Bye,
                ..
            })) => {}
            Some(Response::Untagged(u)) => self.untagged(u)?,
            Some(Response::Tagged { tag, completion }) if self.is_current(&tag) => {
                if !completion.is_ok() {
                    warn!(text = %completion.text, "unexpected LOGOUT reply");
                }
                self.stop();
                self.info("logged out");
                return Ok(true);
            }
            Some(other) => Self::unexpected(&other),
            None => {}
        }
        self.op = Op::Logout { sent: true };
        Ok(false)
    }

    fn step_custom(&mut self, sent: bool, command: String) -> Result<bool> {
        if !sent {
            self.set_state(ImapState::CustomCommand);
            self.write_command(&Command::Raw(command.clone()))?;
            self.op = Op::Custom {
                sent: true,
                command,
            };
            return Ok(false);
        }
        if let Some(Unit::Text(line)) = self.read_unit(false)? {
            match &mut self.handler {
                Some(handler) => handler.on_command_response(&command, &line),
                None => debug!(%command, %line, "command response"),
            }
            if let Some(completion) = classify_tagged(&line, &self.tag) {
                if !completion.is_ok() {
                    return Err(completion.into_error());
                }
                let verb = crate::request::command_verb(&command);
                if MAILBOX_VERBS.contains(&verb.as_str()) {
                    self.mailboxes_stale = true;
                }
                self.set_state(ImapState::Prompt);
                return Ok(true);
            }
            if line.starts_with("* BYE") {
                return Err(Error::Bye(line.trim_start_matches("* BYE").trim().to_string()));
            }
        }
        self.op = Op::Custom {
            sent: true,
            command,
        };
        Ok(false)
    }
}

/// Applies a response code from a SELECT/EXAMINE exchange.
fn apply_code(info: &mut MailboxInfo, code: ResponseCode) {
    match code {
        ResponseCode::PermanentFlags(flags) => info.permanent_flags = flags,
        ResponseCode::UidNext(n) => info.uid_next = n,
        ResponseCode::UidValidity(n) => info.uid_validity = n,
        ResponseCode::Unseen(n) => info.unseen = Some(n),
        ResponseCode::HighestModSeq(n) => info.highest_modseq = Some(n),
        ResponseCode::NoModSeq => info.no_modseq = true,
        ResponseCode::ReadOnly => info.read_only = true,
        ResponseCode::ReadWrite => info.read_only = false,
        _ => {}
    }
}

/// Size of the body literal ending an untagged `FETCH` line.
fn body_literal(line: &[u8]) -> Option<u64> {
    let size = literal_length(line)?;
    let text = std::str::from_utf8(line).ok()?;
    let rest = text.strip_prefix("* ")?;
    let (seq, rest) = rest.split_once(' ')?;
    seq.parse::<u32>().ok()?;
    let upper = rest.to_ascii_uppercase();
    if !upper.starts_with("FETCH ") {
        return None;
    }
    let tail = upper.rsplit_once('{').map_or("", |(head, _)| head).trim_end();
    (tail.ends_with(']') && (tail.contains("BODY[") || tail.contains("BINARY[")))
        .then_some(size as u64)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn body_literal_detection() {
        assert_eq!(body_literal(b"* 3 FETCH (UID 7 BODY[1] {120}\r\n"), Some(120));
        assert_eq!(body_literal(b"* 3 FETCH (BODY[1.2] {0}\r\n"), Some(0));
        assert_eq!(body_literal(b"* 3 FETCH (ENVELOPE (NIL {5}\r\n"), None);
        assert_eq!(body_literal(b"A1 OK {5}\r\n"), None);
        assert_eq!(body_literal(b"* 3 FETCH (BODY[1] NIL)\r\n"), None);
    }

    #[test]
    fn select_codes_applied() {
        let mut info = MailboxInfo::default();
        apply_code(&mut info, ResponseCode::UidNext(41));
        apply_code(&mut info, ResponseCode::Unseen(3));
        apply_code(&mut info, ResponseCode::ReadOnly);
        assert_eq!(info.uid_next, 41);
        assert_eq!(info.unseen, Some(3));
        assert!(info.read_only);
    }

    #[test]
    fn state_names() {
        assert_eq!(ImapState::FetchBodyPart.to_string(), "fetch-body-part");
        assert_eq!(ImapState::AppendInit.as_str(), "append-init");
    }
}
