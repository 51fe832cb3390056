//! Interactive command grammar.
//!
//! A line typed at the `tn>` prompt is split with shell-style quoting, the
//! first token selects one of nine verbs, and the rest is parsed by that
//! verb's clap record. Each record is then validated into the closed
//! [`Command`] type the compiler consumes.

use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, ValueEnum};

use crate::error::CliError;

/// Verbs accepted at the prompt, with their one-line descriptions.
pub const VERBS: &[(&str, &str)] = &[
    ("acc", "create account"),
    ("login", "authenticate"),
    ("sub", "subscribe to topic"),
    ("leave", "detach or unsubscribe from topic"),
    ("pub", "post message to topic"),
    ("get", "query topic for metadata or messages"),
    ("set", "update topic metadata"),
    ("del", "delete message(s), topic or subscription"),
    ("note", "send notification"),
];

/// Upper bound of the "all messages" deletion range.
pub const DEL_RANGE_MAX: i32 = 0x8FF_FFFF;

// =============================================================================
// TYPED COMMANDS
// =============================================================================

/// A validated prompt command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Account(AccountCommand),
    Login(LoginCommand),
    Subscribe(SubscribeCommand),
    Leave(LeaveCommand),
    Publish(PublishCommand),
    Get(GetCommand),
    Set(SetCommand),
    Delete(DeleteCommand),
    Note(NoteCommand),
}

impl Command {
    /// Verb that produced this command.
    pub fn verb(&self) -> &'static str {
        match self {
            Command::Account(_) => "acc",
            Command::Login(_) => "login",
            Command::Subscribe(_) => "sub",
            Command::Leave(_) => "leave",
            Command::Publish(_) => "pub",
            Command::Get(_) => "get",
            Command::Set(_) => "set",
            Command::Delete(_) => "del",
            Command::Note(_) => "note",
        }
    }

    /// Parse one prompt line.
    ///
    /// Returns `Ok(None)` for a blank line, [`CliError::UnknownVerb`] when the
    /// first token is not a verb, and [`CliError::Parse`] with clap's rendered
    /// usage when the options do not fit the verb's grammar (including `-h`).
    pub fn parse(line: &str) -> Result<Option<Command>, CliError> {
        let tokens = tokenize(line).map_err(|reason| CliError::parse("input", reason))?;
        let Some(verb) = tokens.first() else {
            return Ok(None);
        };

        let command = match verb.as_str() {
            "acc" => parse_verb::<AccArgs>(&tokens)?,
            "login" => parse_verb::<LoginArgs>(&tokens)?,
            "sub" => parse_verb::<SubArgs>(&tokens)?,
            "leave" => parse_verb::<LeaveArgs>(&tokens)?,
            "pub" => parse_verb::<PubArgs>(&tokens)?,
            "get" => parse_verb::<GetArgs>(&tokens)?,
            "set" => parse_verb::<SetArgs>(&tokens)?,
            "del" => parse_verb::<DelArgs>(&tokens)?,
            "note" => parse_verb::<NoteArgs>(&tokens)?,
            other => {
                return Err(CliError::UnknownVerb {
                    verb: other.to_string(),
                });
            }
        };
        Ok(Some(command))
    }
}

/// Where a request's authentication secret comes from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecretSource {
    pub secret: Option<Vec<u8>>,
    pub uname: Option<String>,
    pub password: Option<String>,
}

/// Display name and avatar file used to build a vcard.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileInput {
    pub full_name: Option<String>,
    pub photo: Option<PathBuf>,
}

/// Default access modes for authenticated and anonymous users.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessDefaults {
    pub auth: Option<String>,
    pub anon: Option<String>,
}

impl AccessDefaults {
    /// `None` when neither mode was given, so the server default applies.
    pub fn from_options(auth: Option<String>, anon: Option<String>) -> Option<Self> {
        if auth.is_none() && anon.is_none() {
            None
        } else {
            Some(Self { auth, anon })
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub method: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountCommand {
    pub user: String,
    pub scheme: String,
    pub secret: SecretSource,
    pub login: bool,
    pub tags: Option<Vec<String>>,
    pub profile: ProfileInput,
    pub private: Option<String>,
    pub access: Option<AccessDefaults>,
    pub cred: Option<Vec<Credential>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoginCommand {
    pub scheme: String,
    pub secret: SecretSource,
    pub cred: Option<Vec<Credential>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeCommand {
    pub topic: String,
    pub profile: ProfileInput,
    pub private: Option<String>,
    pub access: Option<AccessDefaults>,
    pub mode: Option<String>,
    pub tags: Option<Vec<String>>,
    pub get_query: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeaveCommand {
    pub topic: String,
    pub unsub: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishCommand {
    pub topic: String,
    pub content: String,
}

/// Parts of a topic a `get` asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetFacet {
    Desc,
    Sub,
    Tags,
    Data,
}

impl GetFacet {
    pub fn as_str(self) -> &'static str {
        match self {
            GetFacet::Desc => "desc",
            GetFacet::Sub => "sub",
            GetFacet::Tags => "tags",
            GetFacet::Data => "data",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetCommand {
    pub topic: String,
    pub facets: Vec<GetFacet>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetCommand {
    pub topic: String,
    pub profile: ProfileInput,
    pub public: Option<String>,
    pub private: Option<String>,
    pub access: Option<AccessDefaults>,
    pub user: Option<String>,
    pub mode: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// Messages selected for deletion.
#[derive(Debug, Clone, PartialEq)]
pub enum SeqSelection {
    All,
    Ids(Vec<i32>),
}

/// What a `del` removes. Exactly one target per request.
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteTarget {
    Messages(SeqSelection),
    Subscription { user: Option<String> },
    Topic,
}

impl DeleteTarget {
    /// Resolve the `what` word and its optional parameter into a target.
    pub fn resolve(what: &str, param: Option<String>) -> Result<Self, CliError> {
        match what {
            "msg" => {
                let list = param.ok_or_else(|| {
                    CliError::invalid_command("message deletion requires --list")
                })?;
                Ok(DeleteTarget::Messages(parse_seq_selection(&list)?))
            }
            "sub" => Ok(DeleteTarget::Subscription { user: param }),
            "topic" => match param {
                None => Ok(DeleteTarget::Topic),
                Some(extra) => Err(CliError::invalid_command(format!(
                    "topic deletion takes no parameter, got '{extra}'"
                ))),
            },
            other => Err(CliError::invalid_command(format!(
                "unknown deletion target '{other}', expected msg, sub or topic"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteCommand {
    pub topic: String,
    pub target: DeleteTarget,
    pub hard: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum NoteKind {
    /// Key press
    Kp,
    /// Message read
    Read,
    /// Message received
    Recv,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NoteCommand {
    pub topic: String,
    pub what: NoteKind,
    pub seq: Option<i32>,
}

// =============================================================================
// TOKENIZER
// =============================================================================

/// Split a line into words using POSIX shell quoting rules.
pub fn tokenize(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err("unterminated single quote".to_string()),
                    }
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\' | '$' | '`')) => current.push(ch),
                            Some(ch) => {
                                current.push('\\');
                                current.push(ch);
                            }
                            None => return Err("unterminated double quote".to_string()),
                        },
                        Some(ch) => current.push(ch),
                        None => return Err("unterminated double quote".to_string()),
                    }
                }
            }
            '\\' => {
                in_token = true;
                match chars.next() {
                    Some(ch) => current.push(ch),
                    None => return Err("no character to escape".to_string()),
                }
            }
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

// =============================================================================
// VERB GRAMMARS
// =============================================================================

/// A clap record for one verb that validates into a [`Command`].
trait Grammar: Parser {
    fn into_command(self) -> Result<Command, CliError>;
}

fn parse_verb<G: Grammar>(tokens: &[String]) -> Result<Command, CliError> {
    let verb = tokens[0].as_str();
    let args = G::try_parse_from(tokens).map_err(|e| CliError::parse(verb, e.render()))?;
    args.into_command().map_err(|err| match err {
        CliError::Parse { reason, .. } | CliError::InvalidCommand { reason } => {
            let usage = G::command().error(ErrorKind::ValueValidation, reason);
            CliError::parse(verb, usage.render())
        }
        other => other,
    })
}

/// Assign positional words to the fields their flags left empty, in order.
fn fill_positionals(
    positionals: Vec<String>,
    slots: &mut [&mut Option<String>],
) -> Result<(), CliError> {
    let mut values = positionals.into_iter();
    for slot in slots.iter_mut().filter(|slot| slot.is_none()) {
        match values.next() {
            Some(value) => **slot = Some(value),
            None => break,
        }
    }
    match values.next() {
        Some(extra) => Err(CliError::invalid_command(format!(
            "unexpected argument '{extra}'"
        ))),
        None => Ok(()),
    }
}

fn require(value: Option<String>, name: &str) -> Result<String, CliError> {
    value.ok_or_else(|| CliError::invalid_command(format!("the <{name}> argument is required")))
}

/// Split a comma separated list; an empty list is no list at all.
fn split_csv(value: Option<String>) -> Option<Vec<String>> {
    let items: Vec<String> = value?
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect();
    if items.is_empty() { None } else { Some(items) }
}

/// Parse `method:value[,method:value...]`.
fn parse_credentials(value: Option<String>) -> Result<Option<Vec<Credential>>, CliError> {
    let Some(items) = split_csv(value) else {
        return Ok(None);
    };
    items
        .into_iter()
        .map(|item| match item.split_once(':') {
            Some((method, value)) => Ok(Credential {
                method: method.to_string(),
                value: value.to_string(),
            }),
            None => Err(CliError::invalid_command(format!(
                "credential '{item}' is not in method:value format"
            ))),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

fn parse_seq_selection(list: &str) -> Result<SeqSelection, CliError> {
    if list.trim() == "all" {
        return Ok(SeqSelection::All);
    }
    let ids = list
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse::<i32>()
                .map_err(|_| CliError::invalid_command(format!("invalid message id '{item}'")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if ids.is_empty() {
        return Err(CliError::invalid_command("empty message id list"));
    }
    Ok(SeqSelection::Ids(ids))
}

#[derive(Parser, Debug)]
#[command(name = "acc", about = "Create or alter an account")]
struct AccArgs {
    /// ID of the account to update
    #[arg(long, default_value = "new")]
    user: String,
    /// Authentication scheme
    #[arg(long, default_value = "basic")]
    scheme: String,
    /// Secret for authentication
    #[arg(long)]
    secret: Option<String>,
    /// User name for basic authentication
    #[arg(long)]
    uname: Option<String>,
    /// Password for basic authentication
    #[arg(long)]
    password: Option<String>,
    /// Login with the newly created account
    #[arg(long)]
    do_login: bool,
    /// Tags for user discovery, comma separated list without spaces
    #[arg(long)]
    tags: Option<String>,
    /// User's human name
    #[arg(long = "fn")]
    full_name: Option<String>,
    /// Avatar file name
    #[arg(long)]
    photo: Option<PathBuf>,
    /// User's private info
    #[arg(long)]
    private: Option<String>,
    /// Default access mode for authenticated users
    #[arg(long)]
    auth: Option<String>,
    /// Default access mode for anonymous users
    #[arg(long)]
    anon: Option<String>,
    /// Credentials, comma separated list in method:value format, e.g. email:test@example.com,tel:12345
    #[arg(long)]
    cred: Option<String>,
}

impl Grammar for AccArgs {
    fn into_command(self) -> Result<Command, CliError> {
        Ok(Command::Account(AccountCommand {
            user: self.user,
            scheme: self.scheme,
            secret: SecretSource {
                secret: self.secret.map(String::into_bytes),
                uname: self.uname,
                password: self.password,
            },
            login: self.do_login,
            tags: split_csv(self.tags),
            profile: ProfileInput {
                full_name: self.full_name,
                photo: self.photo,
            },
            private: self.private,
            access: AccessDefaults::from_options(self.auth, self.anon),
            cred: parse_credentials(self.cred)?,
        }))
    }
}

#[derive(Parser, Debug)]
#[command(name = "login", about = "Authenticate current session")]
struct LoginArgs {
    /// Authentication secret
    #[arg(value_name = "SECRET")]
    secret_arg: Option<String>,
    /// Authentication secret
    #[arg(long)]
    secret: Option<String>,
    /// Authentication scheme
    #[arg(long, default_value = "basic")]
    scheme: String,
    /// User name in basic authentication scheme
    #[arg(long)]
    uname: Option<String>,
    /// Password in basic authentication scheme
    #[arg(long)]
    password: Option<String>,
    /// Credentials, comma separated list in method:value format
    #[arg(long)]
    cred: Option<String>,
}

impl Grammar for LoginArgs {
    fn into_command(self) -> Result<Command, CliError> {
        let secret = self.secret.or(self.secret_arg);
        if secret.is_none() && self.uname.is_none() {
            return Err(CliError::invalid_command(
                "either <SECRET> or --uname is required",
            ));
        }
        Ok(Command::Login(LoginCommand {
            scheme: self.scheme,
            secret: SecretSource {
                secret: secret.map(String::into_bytes),
                uname: self.uname,
                password: self.password,
            },
            cred: parse_credentials(self.cred)?,
        }))
    }
}

#[derive(Parser, Debug)]
#[command(name = "sub", about = "Subscribe to topic")]
struct SubArgs {
    /// Topic to subscribe to
    #[arg(value_name = "TOPIC")]
    topic_arg: Option<String>,
    /// Topic to subscribe to
    #[arg(long)]
    topic: Option<String>,
    /// Topic's user-visible name
    #[arg(long = "fn")]
    full_name: Option<String>,
    /// Avatar file name
    #[arg(long)]
    photo: Option<PathBuf>,
    /// Topic's private info
    #[arg(long)]
    private: Option<String>,
    /// Default access mode for authenticated users
    #[arg(long)]
    auth: Option<String>,
    /// Default access mode for anonymous users
    #[arg(long)]
    anon: Option<String>,
    /// New value of access mode
    #[arg(long)]
    mode: Option<String>,
    /// Tags for topic discovery, comma separated list without spaces
    #[arg(long)]
    tags: Option<String>,
    /// Query for topic metadata or messages, comma separated list without spaces
    #[arg(long)]
    get_query: Option<String>,
}

impl Grammar for SubArgs {
    fn into_command(self) -> Result<Command, CliError> {
        Ok(Command::Subscribe(SubscribeCommand {
            topic: require(self.topic.or(self.topic_arg), "TOPIC")?,
            profile: ProfileInput {
                full_name: self.full_name,
                photo: self.photo,
            },
            private: self.private,
            access: AccessDefaults::from_options(self.auth, self.anon),
            mode: self.mode,
            tags: split_csv(self.tags),
            get_query: split_csv(self.get_query),
        }))
    }
}

#[derive(Parser, Debug)]
#[command(name = "leave", about = "Detach or unsubscribe from topic")]
struct LeaveArgs {
    /// Topic to detach from
    #[arg(value_name = "TOPIC")]
    topic_arg: Option<String>,
    /// Topic to detach from
    #[arg(long)]
    topic: Option<String>,
    /// Detach and unsubscribe from topic
    #[arg(long)]
    unsub: bool,
}

impl Grammar for LeaveArgs {
    fn into_command(self) -> Result<Command, CliError> {
        Ok(Command::Leave(LeaveCommand {
            topic: require(self.topic.or(self.topic_arg), "TOPIC")?,
            unsub: self.unsub,
        }))
    }
}

#[derive(Parser, Debug)]
#[command(name = "pub", about = "Send message to topic")]
struct PubArgs {
    /// Topic and message, when not given as flags
    #[arg(value_name = "TOPIC CONTENT", num_args = 0..=2)]
    positionals: Vec<String>,
    /// Topic to publish to
    #[arg(long)]
    topic: Option<String>,
    /// Message to send
    #[arg(long)]
    content: Option<String>,
}

impl Grammar for PubArgs {
    fn into_command(self) -> Result<Command, CliError> {
        let (mut topic, mut content) = (self.topic, self.content);
        fill_positionals(self.positionals, &mut [&mut topic, &mut content])?;
        Ok(Command::Publish(PublishCommand {
            topic: require(topic, "TOPIC")?,
            content: require(content, "CONTENT")?,
        }))
    }
}

#[derive(Parser, Debug)]
#[command(name = "get", about = "Query topic for messages or metadata")]
struct GetArgs {
    /// Topic to query
    #[arg(value_name = "TOPIC")]
    topic_arg: Option<String>,
    /// Topic to query
    #[arg(long)]
    topic: Option<String>,
    /// Query topic description
    #[arg(long)]
    desc: bool,
    /// Query topic subscriptions
    #[arg(long)]
    sub: bool,
    /// Query topic tags
    #[arg(long)]
    tags: bool,
    /// Query topic messages
    #[arg(long)]
    data: bool,
}

impl Grammar for GetArgs {
    fn into_command(self) -> Result<Command, CliError> {
        let facets = [
            (self.desc, GetFacet::Desc),
            (self.sub, GetFacet::Sub),
            (self.tags, GetFacet::Tags),
            (self.data, GetFacet::Data),
        ]
        .into_iter()
        .filter_map(|(requested, facet)| requested.then_some(facet))
        .collect();
        Ok(Command::Get(GetCommand {
            topic: require(self.topic.or(self.topic_arg), "TOPIC")?,
            facets,
        }))
    }
}

#[derive(Parser, Debug)]
#[command(name = "set", about = "Update topic metadata")]
struct SetArgs {
    /// Topic to update
    topic: String,
    /// Topic's name
    #[arg(long = "fn")]
    full_name: Option<String>,
    /// Avatar file name
    #[arg(long)]
    photo: Option<PathBuf>,
    /// Topic's public info, alternative to fn+photo
    #[arg(long)]
    public: Option<String>,
    /// Topic's private info
    #[arg(long)]
    private: Option<String>,
    /// Default access mode for authenticated users
    #[arg(long)]
    auth: Option<String>,
    /// Default access mode for anonymous users
    #[arg(long)]
    anon: Option<String>,
    /// ID of the account to update
    #[arg(long)]
    user: Option<String>,
    /// New value of access mode
    #[arg(long)]
    mode: Option<String>,
    /// Tags for topic discovery, comma separated list without spaces
    #[arg(long)]
    tags: Option<String>,
}

impl Grammar for SetArgs {
    fn into_command(self) -> Result<Command, CliError> {
        Ok(Command::Set(SetCommand {
            topic: self.topic,
            profile: ProfileInput {
                full_name: self.full_name,
                photo: self.photo,
            },
            public: self.public,
            private: self.private,
            access: AccessDefaults::from_options(self.auth, self.anon),
            user: self.user,
            mode: self.mode,
            tags: split_csv(self.tags),
        }))
    }
}

#[derive(Parser, Debug)]
#[command(name = "del", about = "Delete message(s), subscription or topic")]
struct DelArgs {
    /// [TOPIC] WHAT [PARAM], WHAT is one of msg, sub, topic
    #[arg(value_name = "ARGS", num_args = 0..=3)]
    positionals: Vec<String>,
    /// Topic being affected
    #[arg(long)]
    topic: Option<String>,
    /// Delete subscription with the given user id
    #[arg(long, conflicts_with = "list")]
    user: Option<String>,
    /// Comma separated list of message IDs to delete, or "all"
    #[arg(long)]
    list: Option<String>,
    /// Hard-delete messages
    #[arg(long)]
    hard: bool,
}

impl Grammar for DelArgs {
    fn into_command(self) -> Result<Command, CliError> {
        let mut topic = self.topic;
        let mut what = None;
        let mut param = None;
        fill_positionals(self.positionals, &mut [&mut topic, &mut what, &mut param])?;

        let (has_user, has_list) = (self.user.is_some(), self.list.is_some());
        let flag_param = match (has_user, has_list, what.as_deref()) {
            (true, _, Some("msg") | None) => {
                return Err(CliError::invalid_command("--user applies to 'del sub' only"));
            }
            (_, true, Some("sub" | "topic")) => {
                return Err(CliError::invalid_command("--list applies to 'del msg' only"));
            }
            _ => self.user.or(self.list),
        };
        let param = match (param, flag_param) {
            (Some(_), Some(_)) => {
                return Err(CliError::invalid_command(
                    "parameter given both as a flag and positionally",
                ));
            }
            (positional, flag) => positional.or(flag),
        };

        let what = what.unwrap_or_else(|| "msg".to_string());
        Ok(Command::Delete(DeleteCommand {
            topic: require(topic, "TOPIC")?,
            target: DeleteTarget::resolve(&what, param)?,
            hard: self.hard,
        }))
    }
}

#[derive(Parser, Debug)]
#[command(name = "note", about = "Send notification to topic, ex \"note kp\"")]
struct NoteArgs {
    /// Topic to notify
    topic: String,
    /// Notification type
    #[arg(value_enum, default_value_t = NoteKind::Kp)]
    what: NoteKind,
    /// Value being reported
    #[arg(long)]
    seq: Option<i32>,
}

impl Grammar for NoteArgs {
    fn into_command(self) -> Result<Command, CliError> {
        let seq = match self.what {
            NoteKind::Kp => None,
            NoteKind::Read | NoteKind::Recv => Some(self.seq.ok_or_else(|| {
                CliError::invalid_command("--seq is required for read and recv notifications")
            })?),
        };
        Ok(Command::Note(NoteCommand {
            topic: self.topic,
            what: self.what,
            seq,
        }))
    }
}
