//! Compiles prompt commands into `ClientMsg` envelopes.
//!
//! Opaque fields (`public`, `private`, vcards, message content) travel as
//! UTF-8 JSON. Anything the user did not supply stays absent on the wire
//! rather than being sent as an empty value.

use std::sync::Arc;

use serde::Serialize;
use tn_proto::client_del::What as DelWhat;
use tn_proto::client_msg::Message;
use tn_proto::del_query::Delete;
use tn_proto::{
    ClientAcc, ClientCred, ClientDel, ClientGet, ClientHi, ClientLeave, ClientLogin, ClientMsg,
    ClientNote, ClientPub, ClientSet, ClientSub, DefaultAcsMode, DelQuery, GetQuery, InfoNote,
    SeqRange, SetDesc, SetQuery, SetSub,
};

use crate::command::{
    AccessDefaults, AccountCommand, Command, Credential, DEL_RANGE_MAX, DeleteCommand,
    DeleteTarget, LoginCommand, NoteCommand, NoteKind, SecretSource, SeqSelection, SetCommand,
    SubscribeCommand,
};
use crate::correlator::Completion;
use crate::error::CliError;
use crate::vcard::{AvatarSource, FsAvatarSource, make_vcard};

pub const APP_NAME: &str = "tn-cli";
/// Wire protocol version announced in `{hi}`.
pub const PROTOCOL_VERSION: &str = "0.15";

/// An envelope ready to send, plus what to do when its reply arrives.
#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    pub message: ClientMsg,
    pub completion: Option<Completion>,
    /// Non-fatal problems hit while compiling, e.g. an unreadable avatar.
    pub warnings: Vec<CliError>,
}

impl Compiled {
    fn new(message: Message) -> Self {
        Self {
            message: ClientMsg {
                message: Some(message),
            },
            completion: None,
            warnings: Vec::new(),
        }
    }

    fn with_completion(mut self, completion: Completion) -> Self {
        self.completion = Some(completion);
        self
    }
}

#[derive(Clone)]
pub struct Compiler {
    avatars: Arc<dyn AvatarSource>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Compiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compiler").finish_non_exhaustive()
    }
}

impl Compiler {
    /// Compiler that reads avatar files from disk.
    pub fn new() -> Self {
        Self::with_avatar_source(Arc::new(FsAvatarSource))
    }

    pub fn with_avatar_source(avatars: Arc<dyn AvatarSource>) -> Self {
        Self { avatars }
    }

    /// The session greeting. Its reply carries the server parameters.
    pub fn hello(&self, id: &str) -> Compiled {
        Compiled::new(Message::Hi(ClientHi {
            id: id.to_string(),
            user_agent: format!("{APP_NAME}/{} gRPC-rust", env!("CARGO_PKG_VERSION")),
            ver: PROTOCOL_VERSION.to_string(),
            device_id: String::new(),
            lang: "EN".to_string(),
        }))
        .with_completion(Completion::PrintServerParams)
    }

    pub fn compile(&self, command: &Command, id: &str) -> Result<Compiled, CliError> {
        let id = id.to_string();
        match command {
            Command::Account(acc) => self.account(acc, id),
            Command::Login(login) => Ok(self.login(login, id)),
            Command::Subscribe(sub) => self.subscribe(sub, id),
            Command::Leave(leave) => Ok(Compiled::new(Message::Leave(ClientLeave {
                id,
                topic: leave.topic.clone(),
                unsub: leave.unsub,
            }))),
            Command::Publish(publish) => Ok(Compiled::new(Message::Pub(ClientPub {
                id,
                topic: publish.topic.clone(),
                no_echo: true,
                head: Default::default(),
                content: serde_json::to_vec(&publish.content)
                    .map_err(|e| CliError::from_json_error(e, "content"))?,
            }))),
            Command::Get(get) => Ok(Compiled::new(Message::Get(ClientGet {
                id,
                topic: get.topic.clone(),
                query: Some(GetQuery {
                    what: get
                        .facets
                        .iter()
                        .map(|facet| facet.as_str())
                        .collect::<Vec<_>>()
                        .join(" "),
                }),
            }))),
            Command::Set(set) => self.set(set, id),
            Command::Delete(del) => Ok(delete(del, id)),
            Command::Note(note) => Ok(notify(note, id)),
        }
    }

    fn account(&self, acc: &AccountCommand, id: String) -> Result<Compiled, CliError> {
        let mut warnings = Vec::new();
        let card = make_vcard(&acc.profile, self.avatars.as_ref(), &mut warnings);
        let desc = set_desc(
            encode_json(card.as_ref(), "public")?,
            encode_json(acc.private.as_ref(), "private")?,
            acc.access.as_ref(),
        );

        let mut compiled = Compiled::new(Message::Acc(ClientAcc {
            id,
            user_id: acc.user.clone(),
            scheme: acc.scheme.clone(),
            secret: derive_secret(&acc.secret),
            login: acc.login,
            tags: acc.tags.clone().unwrap_or_default(),
            desc,
            cred: to_proto_creds(acc.cred.as_deref()),
        }));
        compiled.warnings = warnings;
        // A successful login-on-create returns the same token a login would.
        if acc.login {
            compiled = compiled.with_completion(Completion::SaveCookie);
        }
        Ok(compiled)
    }

    fn login(&self, login: &LoginCommand, id: String) -> Compiled {
        Compiled::new(Message::Login(ClientLogin {
            id,
            scheme: login.scheme.clone(),
            secret: derive_secret(&login.secret),
            cred: to_proto_creds(login.cred.as_deref()),
        }))
        .with_completion(Completion::SaveCookie)
    }

    fn subscribe(&self, sub: &SubscribeCommand, id: String) -> Result<Compiled, CliError> {
        let mut warnings = Vec::new();
        let card = make_vcard(&sub.profile, self.avatars.as_ref(), &mut warnings);
        let desc = set_desc(
            encode_json(card.as_ref(), "public")?,
            encode_json(sub.private.as_ref(), "private")?,
            sub.access.as_ref(),
        );
        let mode = sub.mode.as_ref().map(|mode| SetSub {
            user_id: String::new(),
            mode: mode.clone(),
        });

        let mut compiled = Compiled::new(Message::Sub(ClientSub {
            id,
            topic: sub.topic.clone(),
            set_query: set_query(desc, mode, sub.tags.as_deref()),
            get_query: sub.get_query.as_ref().map(|what| GetQuery {
                what: what.join(" "),
            }),
        }));
        compiled.warnings = warnings;
        Ok(compiled)
    }

    fn set(&self, set: &SetCommand, id: String) -> Result<Compiled, CliError> {
        let mut warnings = Vec::new();
        let public = match &set.public {
            Some(public) => encode_json(Some(public), "public")?,
            None => {
                let card = make_vcard(&set.profile, self.avatars.as_ref(), &mut warnings);
                encode_json(card.as_ref(), "public")?
            }
        };
        let desc = set_desc(
            public,
            encode_json(set.private.as_ref(), "private")?,
            set.access.as_ref(),
        );
        let sub = (set.user.is_some() || set.mode.is_some()).then(|| SetSub {
            user_id: set.user.clone().unwrap_or_default(),
            mode: set.mode.clone().unwrap_or_default(),
        });

        let mut compiled = Compiled::new(Message::Set(ClientSet {
            id,
            topic: set.topic.clone(),
            query: set_query(desc, sub, set.tags.as_deref()),
        }));
        compiled.warnings = warnings;
        Ok(compiled)
    }
}

fn delete(del: &DeleteCommand, id: String) -> Compiled {
    let (what, del_seq, user_id) = match &del.target {
        DeleteTarget::Messages(selection) => {
            let del_seq = match selection {
                SeqSelection::All => vec![DelQuery {
                    delete: Some(Delete::Range(SeqRange {
                        low: 1,
                        hi: DEL_RANGE_MAX,
                    })),
                }],
                SeqSelection::Ids(ids) => ids
                    .iter()
                    .map(|seq| DelQuery {
                        delete: Some(Delete::SeqId(*seq)),
                    })
                    .collect(),
            };
            (DelWhat::Msg, del_seq, None)
        }
        DeleteTarget::Subscription { user } => (DelWhat::Sub, Vec::new(), user.clone()),
        DeleteTarget::Topic => (DelWhat::Topic, Vec::new(), None),
    };

    Compiled::new(Message::Del(ClientDel {
        id,
        topic: del.topic.clone(),
        what: what as i32,
        del_seq,
        user_id,
        hard: del.hard,
    }))
}

fn notify(note: &NoteCommand, id: String) -> Compiled {
    // `recv` has always gone out as a read notification.
    let (what, seq_id) = match note.what {
        NoteKind::Kp => (InfoNote::Kp, None),
        NoteKind::Read | NoteKind::Recv => (InfoNote::Read, note.seq),
    };
    Compiled::new(Message::Note(ClientNote {
        id,
        topic: note.topic.clone(),
        what: what as i32,
        seq_id,
    }))
}

/// Explicit secret wins; otherwise `uname:password` when a user name is given.
pub fn derive_secret(source: &SecretSource) -> Option<Vec<u8>> {
    if let Some(secret) = &source.secret {
        return Some(secret.clone());
    }
    source.uname.as_ref().map(|uname| {
        format!("{uname}:{}", source.password.as_deref().unwrap_or_default()).into_bytes()
    })
}

/// JSON-encode an optional value; absent stays absent.
pub fn encode_json<T: Serialize + ?Sized>(
    value: Option<&T>,
    context: &str,
) -> Result<Option<Vec<u8>>, CliError> {
    value
        .map(|value| serde_json::to_vec(value).map_err(|e| CliError::from_json_error(e, context)))
        .transpose()
}

fn to_proto_creds(cred: Option<&[Credential]>) -> Vec<ClientCred> {
    cred.unwrap_or_default()
        .iter()
        .map(|c| ClientCred {
            method: c.method.clone(),
            value: c.value.clone(),
            ..Default::default()
        })
        .collect()
}

fn set_desc(
    public: Option<Vec<u8>>,
    private: Option<Vec<u8>>,
    access: Option<&AccessDefaults>,
) -> Option<SetDesc> {
    if public.is_none() && private.is_none() && access.is_none() {
        return None;
    }
    Some(SetDesc {
        default_acs: access.map(|access| DefaultAcsMode {
            auth: access.auth.clone(),
            anon: access.anon.clone(),
        }),
        public,
        private,
    })
}

fn set_query(
    desc: Option<SetDesc>,
    sub: Option<SetSub>,
    tags: Option<&[String]>,
) -> Option<SetQuery> {
    if desc.is_none() && sub.is_none() && tags.is_none() {
        return None;
    }
    Some(SetQuery {
        desc,
        sub,
        tags: tags.map(<[String]>::to_vec).unwrap_or_default(),
    })
}

/// Transaction id carried by whichever variant the envelope holds.
pub fn transaction_id(msg: &ClientMsg) -> Option<&str> {
    let id = match msg.message.as_ref()? {
        Message::Hi(m) => &m.id,
        Message::Acc(m) => &m.id,
        Message::Login(m) => &m.id,
        Message::Sub(m) => &m.id,
        Message::Leave(m) => &m.id,
        Message::Pub(m) => &m.id,
        Message::Get(m) => &m.id,
        Message::Set(m) => &m.id,
        Message::Del(m) => &m.id,
        Message::Note(m) => &m.id,
    };
    Some(id.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcard::Vcard;
    use std::path::Path;

    struct StubAvatar;

    impl AvatarSource for StubAvatar {
        fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
            if path.ends_with("missing.png") {
                Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))
            } else {
                Ok(b"img".to_vec())
            }
        }
    }

    fn compile_line(line: &str) -> Compiled {
        let command = Command::parse(line).unwrap().unwrap();
        Compiler::with_avatar_source(Arc::new(StubAvatar))
            .compile(&command, "4242")
            .unwrap()
    }

    fn message(line: &str) -> Message {
        compile_line(line).message.message.unwrap()
    }

    fn card(public: &Option<Vec<u8>>) -> Vcard {
        serde_json::from_slice(public.as_deref().unwrap()).unwrap()
    }

    #[test]
    fn test_every_verb_yields_one_variant_with_id() {
        let lines = [
            "acc --uname bob",
            "login secret",
            "sub t",
            "leave t",
            "pub t hello",
            "get t --desc",
            "set t --fn X",
            "del t topic",
            "note t",
        ];
        for line in lines {
            let compiled = compile_line(line);
            assert_eq!(transaction_id(&compiled.message), Some("4242"), "{line}");
        }
    }

    #[test]
    fn test_hello() {
        let compiled = Compiler::new().hello("10001");
        assert_eq!(compiled.completion, Some(Completion::PrintServerParams));
        let Some(Message::Hi(hi)) = compiled.message.message else {
            panic!("expected hi");
        };
        assert_eq!(hi.id, "10001");
        assert_eq!(hi.ver, PROTOCOL_VERSION);
        assert_eq!(hi.lang, "EN");
        assert!(hi.user_agent.starts_with("tn-cli/"));
    }

    #[test]
    fn test_acc_secret_from_uname_password() {
        let Message::Acc(acc) = message("acc --uname bob --password hunter2") else {
            panic!("expected acc");
        };
        assert_eq!(acc.secret.as_deref(), Some(b"bob:hunter2".as_slice()));
        assert_eq!(acc.user_id, "new");
        assert_eq!(acc.scheme, "basic");
        assert_eq!(acc.desc, None);

        let Message::Acc(acc) = message("acc --uname bob") else {
            panic!("expected acc");
        };
        assert_eq!(acc.secret.as_deref(), Some(b"bob:".as_slice()));

        let Message::Acc(acc) = message("acc --secret xyz --uname bob --password p") else {
            panic!("expected acc");
        };
        assert_eq!(acc.secret.as_deref(), Some(b"xyz".as_slice()));

        let Message::Acc(acc) = message("acc") else {
            panic!("expected acc");
        };
        assert_eq!(acc.secret, None);
    }

    #[test]
    fn test_acc_desc_and_login_completion() {
        let compiled = compile_line(
            "acc --do-login --uname a --fn 'Ann Lee' --private note --auth JRWPA --cred email:a@b.c",
        );
        assert_eq!(compiled.completion, Some(Completion::SaveCookie));
        let Some(Message::Acc(acc)) = compiled.message.message else {
            panic!("expected acc");
        };
        assert!(acc.login);
        let desc = acc.desc.unwrap();
        assert_eq!(card(&desc.public).full_name.as_deref(), Some("Ann Lee"));
        assert_eq!(desc.private.as_deref(), Some(b"\"note\"".as_slice()));
        let acs = desc.default_acs.unwrap();
        assert_eq!(acs.auth.as_deref(), Some("JRWPA"));
        assert_eq!(acs.anon, None);
        assert_eq!(acc.cred.len(), 1);
        assert_eq!(acc.cred[0].method, "email");
        assert_eq!(acc.cred[0].value, "a@b.c");

        assert_eq!(compile_line("acc --uname a").completion, None);
    }

    #[test]
    fn test_login_registers_cookie_completion() {
        let compiled = compile_line("login --scheme token abc");
        assert_eq!(compiled.completion, Some(Completion::SaveCookie));
        let Some(Message::Login(login)) = compiled.message.message else {
            panic!("expected login");
        };
        assert_eq!(login.scheme, "token");
        assert_eq!(login.secret.as_deref(), Some(b"abc".as_slice()));
        assert!(login.cred.is_empty());
    }

    #[test]
    fn test_sub_vcard_and_tags() {
        let Message::Sub(sub) = message(r#"sub mytopic --fn "Alice" --tags a,b"#) else {
            panic!("expected sub");
        };
        assert_eq!(sub.topic, "mytopic");
        let query = sub.set_query.unwrap();
        assert_eq!(query.tags, vec!["a".to_string(), "b".to_string()]);
        let desc = query.desc.unwrap();
        assert_eq!(card(&desc.public).full_name.as_deref(), Some("Alice"));
        assert_eq!(desc.private, None);
        assert_eq!(desc.default_acs, None);
        assert_eq!(query.sub, None);
        assert_eq!(sub.get_query, None);
    }

    #[test]
    fn test_bare_sub_has_no_queries() {
        let Message::Sub(sub) = message("sub mytopic") else {
            panic!("expected sub");
        };
        assert_eq!(sub.set_query, None);
        assert_eq!(sub.get_query, None);
    }

    #[test]
    fn test_sub_get_query_space_joined() {
        let Message::Sub(sub) = message("sub grp --get-query desc,sub,data --mode JRWP") else {
            panic!("expected sub");
        };
        assert_eq!(sub.get_query.unwrap().what, "desc sub data");
        assert_eq!(sub.set_query.unwrap().sub.unwrap().mode, "JRWP");
    }

    #[test]
    fn test_sub_unreadable_photo_warns() {
        let compiled = compile_line("sub t --fn Al --photo missing.png");
        assert_eq!(compiled.warnings.len(), 1);
        let Some(Message::Sub(sub)) = compiled.message.message else {
            panic!("expected sub");
        };
        let desc = sub.set_query.unwrap().desc.unwrap();
        let vcard = card(&desc.public);
        assert_eq!(vcard.full_name.as_deref(), Some("Al"));
        assert_eq!(vcard.photo, None);
    }

    #[test]
    fn test_pub_content_is_json() {
        let Message::Pub(publish) = message("pub mytopic hello") else {
            panic!("expected pub");
        };
        assert_eq!(publish.topic, "mytopic");
        assert_eq!(publish.content, b"\"hello\"".to_vec());
        assert!(publish.no_echo);
    }

    #[test]
    fn test_get_facets() {
        let Message::Get(get) = message("get t --desc --sub --tags --data") else {
            panic!("expected get");
        };
        assert_eq!(get.query.unwrap().what, "desc sub tags data");
    }

    #[test]
    fn test_set_prefers_public_over_vcard() {
        let Message::Set(set) = message("set grp --public hi --fn ignored --photo a.png") else {
            panic!("expected set");
        };
        let desc = set.query.unwrap().desc.unwrap();
        assert_eq!(desc.public.as_deref(), Some(b"\"hi\"".as_slice()));

        let Message::Set(set) = message("set grp --photo a.gif --user usr1 --tags x") else {
            panic!("expected set");
        };
        let query = set.query.unwrap();
        let photo = card(&query.desc.unwrap().public).photo.unwrap();
        assert_eq!(photo.mime_type, "image/gif");
        assert_eq!(photo.data, "aW1n");
        let sub = query.sub.unwrap();
        assert_eq!(sub.user_id, "usr1");
        assert_eq!(sub.mode, "");
        assert_eq!(query.tags, vec!["x".to_string()]);
    }

    #[test]
    fn test_del_message_ids() {
        let Message::Del(del) = message("del mytopic msg --list 3,5,7") else {
            panic!("expected del");
        };
        assert_eq!(del.what, DelWhat::Msg as i32);
        let ids: Vec<i32> = del
            .del_seq
            .iter()
            .map(|q| match q.delete {
                Some(Delete::SeqId(seq)) => seq,
                ref other => panic!("unexpected entry {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec![3, 5, 7]);
        assert_eq!(del.user_id, None);
    }

    #[test]
    fn test_del_all_is_sentinel_range() {
        let Message::Del(del) = message("del mytopic msg --list all --hard") else {
            panic!("expected del");
        };
        assert!(del.hard);
        assert_eq!(
            del.del_seq,
            vec![DelQuery {
                delete: Some(Delete::Range(SeqRange {
                    low: 1,
                    hi: DEL_RANGE_MAX
                }))
            }]
        );
    }

    #[test]
    fn test_del_sub_and_topic() {
        let Message::Del(del) = message("del grp sub --user usr9") else {
            panic!("expected del");
        };
        assert_eq!(del.what, DelWhat::Sub as i32);
        assert_eq!(del.user_id.as_deref(), Some("usr9"));
        assert!(del.del_seq.is_empty());

        let Message::Del(del) = message("del grp sub") else {
            panic!("expected del");
        };
        assert_eq!(del.user_id, None);

        let Message::Del(del) = message("del grp topic") else {
            panic!("expected del");
        };
        assert_eq!(del.what, DelWhat::Topic as i32);
        assert_eq!(del.user_id, None);
        assert!(del.del_seq.is_empty());
    }

    #[test]
    fn test_note_recv_goes_out_as_read() {
        let Message::Note(note) = message("note grp recv --seq 15") else {
            panic!("expected note");
        };
        assert_eq!(note.what, InfoNote::Read as i32);
        assert_eq!(note.seq_id, Some(15));

        let Message::Note(note) = message("note grp") else {
            panic!("expected note");
        };
        assert_eq!(note.what, InfoNote::Kp as i32);
        assert_eq!(note.seq_id, None);
        assert_eq!(note.id, "4242");
    }

    #[test]
    fn test_encode_json_absent_stays_absent() {
        assert_eq!(encode_json::<String>(None, "private").unwrap(), None);
        assert_eq!(
            encode_json(Some("x"), "private").unwrap(),
            Some(b"\"x\"".to_vec())
        );
    }
}
