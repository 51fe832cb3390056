use std::time::Duration;

use clap::Parser;
use tempfile::TempDir;
use tn_cli::command::LoginCommand;
use tn_cli::config::{ClientArgs, StartupLogin};
use tn_cli::cookie::CookieStore;
use tn_cli::{CliError, Session};
use tn_proto::client_msg::Message;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::test_utilities::{MOCK_USER, MockNode, input_lines, start_test_server};

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

async fn run_session(
    node: &MockNode,
    cookies: CookieStore,
    args: &[&str],
    lines: &[&str],
) -> Result<(), CliError> {
    let (addr, server) = start_test_server(node.clone()).await;

    let mut argv = vec!["tn-cli", "--host", addr.as_str()];
    argv.extend_from_slice(args);
    let config = ClientArgs::try_parse_from(argv).unwrap();
    let login = config.startup_login(&cookies).map(Into::into);

    let client = tn_cli::connect(&config.host).await.unwrap();
    let session = Session::new(cookies);
    let result = tokio::time::timeout(TEST_TIMEOUT, session.run(client, login, input_lines(lines)))
        .await
        .expect("session did not finish");

    server.abort();
    result
}

#[test_log::test(tokio::test)]
async fn test_token_login_then_publish() {
    let dir = TempDir::new().unwrap();
    let cookies = CookieStore::new(dir.path().join("cookie.json"));
    let node = MockNode::default();

    run_session(
        &node,
        cookies.clone(),
        &["--login-token", "ABC123"],
        &["pub mytopic hello"],
    )
    .await
    .unwrap();

    assert_eq!(node.received_kinds(), vec!["hi", "login", "pub"]);
    let received = node.received();

    let Some(Message::Hi(hi)) = &received[0].message else {
        panic!("expected hi first");
    };
    assert_eq!(hi.ver, "0.15");
    assert!(hi.user_agent.starts_with("tn-cli/"));

    let Some(Message::Login(login)) = &received[1].message else {
        panic!("expected login second");
    };
    assert_eq!(login.scheme, "token");
    assert_eq!(login.secret.as_deref(), Some(b"ABC123".as_slice()));
    assert_ne!(login.id, hi.id);

    let Some(Message::Pub(publish)) = &received[2].message else {
        panic!("expected pub third");
    };
    assert_eq!(publish.topic, "mytopic");
    assert_eq!(publish.content, b"\"hello\"".to_vec());

    let cookie = cookies.load().unwrap();
    assert_eq!(cookie.user(), Some(MOCK_USER));
    assert_eq!(cookie.token_secret().unwrap(), b"ABC123".to_vec());
}

#[tokio::test]
async fn test_replies_handled_while_input_is_pending() {
    let dir = TempDir::new().unwrap();
    let cookies = CookieStore::new(dir.path().join("cookie.json"));
    let node = MockNode::default();
    let (addr, server) = start_test_server(node.clone()).await;
    let client = tn_cli::connect(&addr).await.unwrap();

    let (lines, input) = mpsc::channel::<std::io::Result<String>>(1);
    let login: Option<LoginCommand> = Some(StartupLogin::token(b"ABC123".to_vec()).into());
    let session = Session::new(cookies.clone());
    let running =
        tokio::spawn(async move { session.run(client, login, ReceiverStream::new(input)).await });

    // Nothing has been typed yet, the login reply must still be handled.
    tokio::time::timeout(TEST_TIMEOUT, async {
        while cookies.load().is_err() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("login reply was not handled while input was pending");
    assert_eq!(cookies.load().unwrap().user(), Some(MOCK_USER));
    assert_eq!(node.received_kinds(), vec!["hi", "login"]);
    assert!(!running.is_finished());

    lines.send(Ok("pub t hi".to_string())).await.unwrap();
    drop(lines);

    tokio::time::timeout(TEST_TIMEOUT, running)
        .await
        .expect("session did not finish")
        .unwrap()
        .unwrap();
    assert_eq!(node.received_kinds(), vec!["hi", "login", "pub"]);

    server.abort();
}

#[tokio::test]
async fn test_cookie_login_uses_saved_token() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cookie.json");
    std::fs::write(&path, br#"{"token":"U0FWRUQ=","user":"usrOld"}"#).unwrap();
    let node = MockNode::default();

    run_session(
        &node,
        CookieStore::new(&path),
        &["--login-cookie", "--login-basic", "bob:pw"],
        &[],
    )
    .await
    .unwrap();

    let received = node.received();
    let Some(Message::Login(login)) = &received[1].message else {
        panic!("expected login");
    };
    assert_eq!(login.scheme, "token");
    assert_eq!(login.secret.as_deref(), Some(b"SAVED".as_slice()));

    // The cookie is replaced by the new login reply.
    let cookie = CookieStore::new(&path).load().unwrap();
    assert_eq!(cookie.user(), Some(MOCK_USER));
}

#[tokio::test]
async fn test_rejected_login_leaves_no_cookie() {
    let dir = TempDir::new().unwrap();
    let cookies = CookieStore::new(dir.path().join("cookie.json"));
    let node = MockNode {
        login_code: 401,
        ..Default::default()
    };

    run_session(&node, cookies.clone(), &["--login-basic", "bob:wrong"], &[])
        .await
        .unwrap();

    assert_eq!(node.received_kinds(), vec!["hi", "login"]);
    assert!(!cookies.path().exists());
}

#[tokio::test]
async fn test_no_login_sends_only_hello_and_input() {
    let dir = TempDir::new().unwrap();
    let node = MockNode::default();

    run_session(
        &node,
        CookieStore::new(dir.path().join("cookie.json")),
        &["--no-login", "--login-token", "ABC123"],
        &["sub grp1 --get-query desc", "note grp1 kp", "leave grp1 --unsub"],
    )
    .await
    .unwrap();

    assert_eq!(node.received_kinds(), vec!["hi", "sub", "note", "leave"]);
}

#[tokio::test]
async fn test_bad_lines_are_skipped() {
    let dir = TempDir::new().unwrap();
    let node = MockNode::default();

    run_session(
        &node,
        CookieStore::new(dir.path().join("cookie.json")),
        &[],
        &[
            "frobnicate now",
            "",
            "pub",
            "del grp1 everything",
            "get grp1 --desc",
        ],
    )
    .await
    .unwrap();

    assert_eq!(node.received_kinds(), vec!["hi", "get"]);
}

#[tokio::test]
async fn test_exit_stops_reading_input() {
    let dir = TempDir::new().unwrap();
    let node = MockNode::default();

    run_session(
        &node,
        CookieStore::new(dir.path().join("cookie.json")),
        &[],
        &["get grp1 --sub", "exit", "pub grp1 never-sent"],
    )
    .await
    .unwrap();

    assert_eq!(node.received_kinds(), vec!["hi", "get"]);
}

#[tokio::test]
async fn test_transaction_ids_are_unique() {
    let dir = TempDir::new().unwrap();
    let node = MockNode::default();

    run_session(
        &node,
        CookieStore::new(dir.path().join("cookie.json")),
        &["--login-token", "ABC123"],
        &["pub t one", "pub t two", "get t --data", "del t msg 1,2"],
    )
    .await
    .unwrap();

    let mut ids: Vec<String> = node
        .received()
        .iter()
        .filter_map(|msg| tn_cli::compiler::transaction_id(msg).map(str::to_string))
        .collect();
    assert_eq!(ids.len(), 6);
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 6);
}

#[test_log::test(tokio::test)]
async fn test_stream_error_ends_session() {
    let dir = TempDir::new().unwrap();
    let node = MockNode {
        fail_after_hello: true,
        ..Default::default()
    };

    let result = run_session(
        &node,
        CookieStore::new(dir.path().join("cookie.json")),
        &[],
        &[],
    )
    .await;

    let err = result.unwrap_err();
    assert!(err.is_transport());
    assert!(err.to_string().contains("node shutting down"));
}

#[tokio::test]
async fn test_connect_to_closed_port_fails() {
    // Bind then drop to get a port nobody is listening on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let err = tn_cli::connect_with_timeout(&addr, Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(err.is_transport());
}
