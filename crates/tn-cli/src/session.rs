//! The message loop: one outbound envelope stream, one inbound reply stream.
//!
//! The producer task turns prompt lines into envelopes and feeds them to the
//! request stream. The consumer runs on the calling task and dispatches every
//! server frame as it arrives, so replies are handled while the producer is
//! still waiting for the next line. The two only share the [`Correlator`].

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tn_proto::server_msg::Message as ServerMessage;
use tn_proto::{ClientMsg, NodeClient, ServerCtrl, ServerData, ServerMsg};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tonic::Request;
use tonic::transport::Channel;

use crate::command::{Command, LoginCommand, VERBS};
use crate::compiler::{Compiled, Compiler};
use crate::cookie::{CookieStore, decode_param};
use crate::correlator::{Completion, CompletionHandler, Correlator, Resolution};
use crate::error::CliError;

/// Envelopes buffered between the producer and the transport.
pub const OUTBOUND_CAPACITY: usize = 128;

const PROMPT: &str = "tn> ";

/// How long a producer that already closed the request side gets to return.
const PRODUCER_GRACE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Interactive,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::Interactive => "interactive",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// What the consumer did with one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Ctrl { code: i32, resolution: Resolution },
    Data,
    Presence,
    Unhandled,
}

/// Runs completions: prints `{hi}` parameters and saves login cookies.
#[derive(Debug, Clone)]
pub struct ReplyHandler {
    cookies: CookieStore,
}

impl ReplyHandler {
    pub fn new(cookies: CookieStore) -> Self {
        Self { cookies }
    }
}

impl CompletionHandler for ReplyHandler {
    fn complete(&self, completion: Completion, params: &HashMap<String, Vec<u8>>) {
        match completion {
            Completion::PrintServerParams => {
                println!("\rConnected to server:");
                let mut keys: Vec<&String> = params.keys().collect();
                keys.sort();
                for key in keys {
                    println!("\t{key}: {}", display_value(&decode_param(key, &params[key])));
                }
            }
            Completion::SaveCookie => match self.cookies.save_params(params) {
                Ok(cookie) => println!("Authenticated as {}", cookie.user().unwrap_or("<unknown>")),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to save authentication cookie");
                    println!("Failed to save authentication cookie: {e}");
                }
            },
        }
    }
}

/// One client session over a `Node.MessageLoop` stream.
#[derive(Debug, Clone)]
pub struct Session {
    correlator: Arc<Correlator>,
    compiler: Compiler,
    handler: ReplyHandler,
}

impl Session {
    pub fn new(cookies: CookieStore) -> Self {
        Self::with_parts(Arc::new(Correlator::new()), Compiler::new(), cookies)
    }

    pub fn with_parts(correlator: Arc<Correlator>, compiler: Compiler, cookies: CookieStore) -> Self {
        Self {
            correlator,
            compiler,
            handler: ReplyHandler::new(cookies),
        }
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    /// Parse and compile one prompt line into at most one envelope.
    ///
    /// Completions are registered before the envelope is returned, so a reply
    /// can never arrive ahead of its pending entry.
    pub fn prepare(&self, line: &str) -> Result<Option<ClientMsg>, CliError> {
        let Some(command) = Command::parse(line)? else {
            return Ok(None);
        };
        self.submit(&command).map(Some)
    }

    pub fn submit(&self, command: &Command) -> Result<ClientMsg, CliError> {
        let id = self.correlator.next_id();
        let compiled = self.compiler.compile(command, &id)?;
        self.finish(&id, compiled)
    }

    pub fn hello(&self) -> Result<ClientMsg, CliError> {
        let id = self.correlator.next_id();
        self.finish(&id, self.compiler.hello(&id))
    }

    fn finish(&self, id: &str, compiled: Compiled) -> Result<ClientMsg, CliError> {
        for warning in &compiled.warnings {
            println!("{warning}");
        }
        if let Some(completion) = compiled.completion {
            self.correlator.register(id, completion)?;
        }
        Ok(compiled.message)
    }

    /// Run the session until the server closes the stream or it fails.
    ///
    /// `{hi}` goes out first, then `login` if one is given, then one envelope
    /// per prompt line from `input` until `exit`, `quit` or end of input.
    pub async fn run<S>(
        &self,
        mut client: NodeClient<Channel>,
        login: Option<LoginCommand>,
        input: S,
    ) -> Result<(), CliError>
    where
        S: Stream<Item = std::io::Result<String>> + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);

        transition(SessionState::Connecting);
        send(&tx, self.hello()?).await?;

        if let Some(login) = login {
            transition(SessionState::Authenticating);
            send(&tx, self.submit(&Command::Login(login))?).await?;
        }

        let mut inbound = client
            .message_loop(Request::new(ReceiverStream::new(rx)))
            .await?
            .into_inner();

        transition(SessionState::Interactive);
        let outbound = tx.downgrade();
        let producer = self.spawn_producer(input, tx);

        let consumed = loop {
            match inbound.message().await {
                Ok(Some(frame)) => {
                    self.dispatch(frame);
                }
                Ok(None) => break Ok(()),
                Err(status) => break Err(CliError::from(status)),
            }
        };
        transition(SessionState::Closed);

        if let Err(e) = consumed {
            producer.abort();
            return Err(e);
        }
        finish_producer(producer, outbound).await
    }

    fn spawn_producer<S>(
        &self,
        mut input: S,
        tx: mpsc::Sender<ClientMsg>,
    ) -> JoinHandle<Result<(), CliError>>
    where
        S: Stream<Item = std::io::Result<String>> + Unpin + Send + 'static,
    {
        let session = self.clone();
        tokio::spawn(async move {
            loop {
                prompt();
                let line = match input.next().await {
                    Some(line) => line.map_err(|e| CliError::from_io_error(e, "<stdin>"))?,
                    None => break,
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "exit" || line == "quit" {
                    break;
                }
                match session.prepare(line) {
                    Ok(Some(msg)) => {
                        if tx.send(msg).await.is_err() {
                            tracing::debug!("Request stream closed, stopping input");
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) if e.is_recoverable() => report(&e),
                    Err(e) => return Err(e),
                }
            }
            tracing::debug!("Input finished, closing request stream");
            Ok(())
        })
    }

    /// Handle one inbound frame according to its payload.
    pub fn dispatch(&self, frame: ServerMsg) -> Dispatch {
        match frame.message {
            Some(ServerMessage::Ctrl(ctrl)) => self.on_ctrl(ctrl),
            Some(ServerMessage::Data(data)) => {
                print_data(&data);
                Dispatch::Data
            }
            Some(ServerMessage::Pres(pres)) => {
                tracing::trace!(topic = %pres.topic, src = %pres.src, "Presence");
                Dispatch::Presence
            }
            other => {
                tracing::warn!(frame = ?other, "Message type not handled");
                Dispatch::Unhandled
            }
        }
    }

    fn on_ctrl(&self, ctrl: ServerCtrl) -> Dispatch {
        let resolution = self
            .correlator
            .resolve(&ctrl.id, ctrl.code, &ctrl.params, &self.handler);
        tracing::debug!(id = %ctrl.id, code = ctrl.code, ?resolution, "Control reply");
        println!("{} {}", ctrl.code, ctrl.text);
        Dispatch::Ctrl {
            code: ctrl.code,
            resolution,
        }
    }
}

async fn send(tx: &mpsc::Sender<ClientMsg>, msg: ClientMsg) -> Result<(), CliError> {
    tx.send(msg)
        .await
        .map_err(|e| CliError::from_transport_error(e, "request stream"))
}

async fn finish_producer(
    mut producer: JoinHandle<Result<(), CliError>>,
    outbound: mpsc::WeakSender<ClientMsg>,
) -> Result<(), CliError> {
    if outbound.upgrade().is_some() {
        // Server hung up while the prompt was still waiting for input.
        producer.abort();
        return Ok(());
    }
    match tokio::time::timeout(PRODUCER_GRACE, &mut producer).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(CliError::from_transport_error(e, "input task")),
        Err(_) => {
            tracing::warn!("Input task did not finish after closing the request stream");
            producer.abort();
            Ok(())
        }
    }
}

fn transition(state: SessionState) {
    tracing::info!(%state, "Session state");
}

fn prompt() {
    print!("{PROMPT}");
    let _ = std::io::stdout().flush();
}

fn report(error: &CliError) {
    match error {
        CliError::UnknownVerb { verb } => {
            println!("Unrecognized: {verb}");
            println!("Possible commands:");
            for (verb, description) in VERBS {
                println!("\t{verb}\t- {description}");
            }
            println!("\n\tType <command> -h for help");
        }
        CliError::Parse { reason, .. } => println!("{reason}"),
        other => println!("{other}"),
    }
}

fn print_data(data: &ServerData) {
    let when = chrono::DateTime::from_timestamp_millis(data.timestamp)
        .filter(|_| data.timestamp > 0)
        .map(|ts| format!(" at {}", ts.to_rfc3339()))
        .unwrap_or_default();
    println!("\nFrom: {}{when}:\n", data.from_user_id);
    println!("{}\n", display_value(&decode_param("content", &data.content)));
}

/// Strings print bare, everything else as compact JSON.
fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
