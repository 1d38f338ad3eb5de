//! End-to-end SMTP conversations against the relay, with a mock provider

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use mockito::{Matcher, Mock, Server, ServerGuard};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use serde_json::json;
use smtp2notify::config::{Config, Settings};
use smtp2notify::message::MailParser;
use smtp2notify::notify::NotifyClient;
use smtp2notify::session::RelayBackend;
use smtp2notify::smtp::{ServerOptions, SmtpServer};
use smtp2notify::Listener;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use tempfile::NamedTempFile;

const USERNAME: &str = "relay_user";
const PASSWORD: &str = "relay_password_123";
const API_KEY: &str =
    "gcntfy-test-00000000-0000-4000-8000-000000000000-00000000-0000-4000-8000-000000000000";
const TEMPLATE_ID: &str = "00000000-0000-4000-8000-000000000000";
const PATH: &str = "/v2/notifications/email";

const MESSAGE: &str = "From: sender@example.com\r\n\
    To: a@example.com\r\n\
    Cc: c@example.com\r\n\
    Subject: Integration\r\n\
    \r\n\
    Hello from SMTP\r\n\
    ..dotted line\r\n\
    .\r\n";

/// Minimal line-oriented SMTP client over any stream
struct Client<S: Read + Write> {
    stream: S,
}

impl<S: Read + Write> Client<S> {
    fn connect(stream: S) -> (Self, String) {
        let mut client = Self { stream };
        let greeting = client.read_reply();
        (client, greeting)
    }

    fn read_line(&mut self) -> String {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        while self.stream.read(&mut byte).unwrap() == 1 {
            line.push(byte[0]);
            if byte[0] == b'\n' {
                break;
            }
        }
        String::from_utf8(line).unwrap().trim_end().to_string()
    }

    /// Reads a whole reply, joining multiline replies with '\n'
    fn read_reply(&mut self) -> String {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line();
            let last = line.as_bytes().get(3) != Some(&b'-');
            lines.push(line);
            if last {
                break;
            }
        }
        lines.join("\n")
    }

    fn send_raw(&mut self, data: &str) {
        self.stream.write_all(data.as_bytes()).unwrap();
        self.stream.flush().unwrap();
    }

    fn command(&mut self, command: &str) -> String {
        self.send_raw(&format!("{command}\r\n"));
        self.read_reply()
    }

    fn auth_plain(&mut self, username: &str, password: &str) -> String {
        let token = STANDARD.encode(format!("\0{username}\0{password}"));
        self.command(&format!("AUTH PLAIN {token}"))
    }

    /// MAIL, RCPT for each recipient, DATA and the message; returns the final reply
    fn transaction(&mut self, recipients: &[&str], message: &str) -> String {
        assert!(self.command("MAIL FROM:<sender@example.com>").starts_with("250"));
        for recipient in recipients {
            assert!(
                self.command(&format!("RCPT TO:<{recipient}>"))
                    .starts_with("250")
            );
        }
        assert!(self.command("DATA").starts_with("354"));
        self.send_raw(message);
        self.read_reply()
    }
}

fn settings(provider: &ServerGuard) -> Settings {
    Settings::from_pairs([
        ("SMTP_USERNAME", USERNAME),
        ("SMTP_PASSWORD", PASSWORD),
        ("NOTIFY_APIKEY", API_KEY),
        ("NOTIFY_TEMPLATE_ID", TEMPLATE_ID),
        ("NOTIFY_HOSTNAME", provider.url().as_str()),
        ("SMTP_HOSTNAME", "relay.test"),
    ])
}

fn start_listener(settings: &Settings) -> String {
    let config = Arc::new(Config::validate(settings).unwrap());
    let client = NotifyClient::new(config.notify.api_key.clone(), &config.notify.hostname).unwrap();
    let listener = Listener::new(config, Arc::new(client)).unwrap();

    let socket = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = socket.local_addr().unwrap().to_string();
    thread::spawn(move || {
        if let Err(e) = listener.serve(socket) {
            eprintln!("Error starting server: {e}");
        }
    });
    addr
}

fn connect_plain(addr: &str) -> Client<TcpStream> {
    let (client, greeting) = Client::connect(TcpStream::connect(addr).unwrap());
    assert_eq!(greeting, "220 relay.test ESMTP smtp2notify");
    client
}

fn accepting_provider(server: &mut ServerGuard, expected_calls: usize) -> Mock {
    server
        .mock("POST", PATH)
        .match_header("authorization", format!("ApiKey-v1 {API_KEY}").as_str())
        .match_header("content-type", "application/json")
        .with_status(201)
        .with_body(r#"{"id": "notification"}"#)
        .expect(expected_calls)
        .create()
}

#[test]
fn test_full_conversation_relays_each_recipient() {
    let mut provider = Server::new();
    let mock = provider
        .mock("POST", PATH)
        .match_header("authorization", format!("ApiKey-v1 {API_KEY}").as_str())
        .match_body(Matcher::PartialJson(json!({
            "template_id": TEMPLATE_ID,
            "personalisation": {"subject": "Integration"}
        })))
        .with_status(201)
        .expect(3)
        .create();
    let addr = start_listener(&settings(&provider));
    let mut client = connect_plain(&addr);

    let ehlo = client.command("EHLO client.test");
    assert!(ehlo.starts_with("250-relay.test"));
    assert!(ehlo.contains("AUTH PLAIN"));
    assert!(ehlo.contains("SIZE 10485760"));

    assert!(client.auth_plain(USERNAME, PASSWORD).starts_with("235"));
    let reply = client.transaction(&["a@example.com", "b@example.com"], MESSAGE);
    assert!(reply.starts_with("250"), "unexpected reply: {reply}");
    assert!(client.command("QUIT").starts_with("221"));

    mock.assert();
}

#[test]
fn test_each_recipient_gets_its_own_request() {
    let mut provider = Server::new();
    let mocks: Vec<Mock> = ["a@example.com", "b@example.com", "c@example.com"]
        .into_iter()
        .map(|address| {
            provider
                .mock("POST", PATH)
                .match_body(Matcher::PartialJson(json!({ "email_address": address })))
                .with_status(201)
                .expect(1)
                .create()
        })
        .collect();
    let addr = start_listener(&settings(&provider));
    let mut client = connect_plain(&addr);

    client.command("EHLO client.test");
    client.auth_plain(USERNAME, PASSWORD);
    let reply = client.transaction(&["a@example.com", "b@example.com"], MESSAGE);
    assert!(reply.starts_with("250"));

    for mock in &mocks {
        mock.assert();
    }
}

#[test]
fn test_commands_require_authentication() {
    let mut provider = Server::new();
    let mock = accepting_provider(&mut provider, 0);
    let addr = start_listener(&settings(&provider));
    let mut client = connect_plain(&addr);

    client.command("EHLO client.test");
    assert!(
        client
            .command("MAIL FROM:<sender@example.com>")
            .starts_with("530")
    );

    assert!(client.auth_plain(USERNAME, "wrong_password_000").starts_with("535"));
    assert!(
        client
            .command("MAIL FROM:<sender@example.com>")
            .starts_with("530")
    );

    mock.assert();
}

#[test]
fn test_null_sender_is_accepted() {
    let mut provider = Server::new();
    let mock = accepting_provider(&mut provider, 1);
    let addr = start_listener(&settings(&provider));
    let mut client = connect_plain(&addr);

    client.command("EHLO client.test");
    assert!(client.auth_plain(USERNAME, PASSWORD).starts_with("235"));
    assert!(client.command("MAIL FROM:<>").starts_with("250"));
    assert!(client.command("RCPT TO:<a@example.com>").starts_with("250"));
    assert!(client.command("DATA").starts_with("354"));
    client.send_raw("Subject: Bounce\r\n\r\nNo sender\r\n.\r\n");
    assert!(client.read_reply().starts_with("250"));

    mock.assert();
}

#[test]
fn test_auth_with_continuation() {
    let provider = Server::new();
    let addr = start_listener(&settings(&provider));
    let mut client = connect_plain(&addr);

    client.command("EHLO client.test");
    assert_eq!(client.command("AUTH PLAIN"), "334");
    let token = STANDARD.encode(format!("\0{USERNAME}\0{PASSWORD}"));
    assert!(client.command(&token).starts_with("235"));

    assert!(client.command("AUTH PLAIN").starts_with("334"));
    assert!(client.command("*").starts_with("501"));
}

#[test]
fn test_authentication_does_not_survive_a_transaction() {
    let mut provider = Server::new();
    // Two transactions, each to the envelope recipient plus the Cc
    let mock = accepting_provider(&mut provider, 4);
    let addr = start_listener(&settings(&provider));
    let mut client = connect_plain(&addr);

    client.command("EHLO client.test");
    client.auth_plain(USERNAME, PASSWORD);
    assert!(client.transaction(&["a@example.com"], MESSAGE).starts_with("250"));

    assert!(
        client
            .command("MAIL FROM:<sender@example.com>")
            .starts_with("530")
    );

    assert!(client.auth_plain(USERNAME, PASSWORD).starts_with("235"));
    assert!(client.transaction(&["b@example.com"], MESSAGE).starts_with("250"));
    mock.assert();
}

#[test]
fn test_rset_clears_authentication() {
    let provider = Server::new();
    let addr = start_listener(&settings(&provider));
    let mut client = connect_plain(&addr);

    client.command("EHLO client.test");
    client.auth_plain(USERNAME, PASSWORD);
    assert!(client.command("RSET").starts_with("250"));
    assert!(
        client
            .command("MAIL FROM:<sender@example.com>")
            .starts_with("530")
    );
}

#[test]
fn test_provider_rejection_is_reported() {
    let mut provider = Server::new();
    let first = provider
        .mock("POST", PATH)
        .with_status(400)
        .with_body(r#"{"errors": [{"error": "BadRequestError"}]}"#)
        .expect(1)
        .create();
    let addr = start_listener(&settings(&provider));
    let mut client = connect_plain(&addr);

    client.command("EHLO client.test");
    client.auth_plain(USERNAME, PASSWORD);
    let reply = client.transaction(&["a@example.com", "b@example.com"], MESSAGE);

    assert_eq!(reply, "554 5.0.0 unexpected status code: 400");
    first.assert();

    // The connection stays usable
    assert!(client.command("NOOP").starts_with("250"));
}

#[test]
fn test_unparseable_message_is_rejected() {
    let mut provider = Server::new();
    let mock = accepting_provider(&mut provider, 0);
    let addr = start_listener(&settings(&provider));
    let mut client = connect_plain(&addr);

    client.command("EHLO client.test");
    client.auth_plain(USERNAME, PASSWORD);
    let reply = client.transaction(
        &["a@example.com"],
        "Subject: Broken\r\n\
         Content-Type: text/plain\r\n\
         Content-Transfer-Encoding: base64\r\n\
         \r\n\
         !!!not base64!!!\r\n\
         .\r\n",
    );

    assert!(reply.starts_with("554 5.6.0"), "unexpected reply: {reply}");
    mock.assert();
}

#[test]
fn test_recipient_limit() {
    let provider = Server::new();
    let addr = start_listener(&settings(&provider));
    let mut client = connect_plain(&addr);

    client.command("EHLO client.test");
    client.auth_plain(USERNAME, PASSWORD);
    assert!(
        client
            .command("MAIL FROM:<sender@example.com>")
            .starts_with("250")
    );
    for i in 0..10 {
        let reply = client.command(&format!("RCPT TO:<user{i}@example.com>"));
        assert!(reply.starts_with("250"), "recipient {i}: {reply}");
    }
    assert!(
        client
            .command("RCPT TO:<overflow@example.com>")
            .starts_with("452")
    );
}

#[test]
fn test_insecure_auth_refused_without_tls() {
    let provider = Server::new();
    let config = Arc::new(Config::validate(&settings(&provider)).unwrap());
    let dispatcher = Arc::new(
        NotifyClient::new(config.notify.api_key.clone(), &config.notify.hostname).unwrap(),
    );
    let options = ServerOptions {
        domain: "relay.test".to_string(),
        allow_insecure_auth: false,
        ..ServerOptions::default()
    };
    let server = SmtpServer::new(
        options,
        RelayBackend::new(config, dispatcher, Arc::new(MailParser)),
    );

    let socket = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = socket.local_addr().unwrap().to_string();
    thread::spawn(move || {
        let _ = server.start_with_listener(socket);
    });

    let mut client = connect_plain(&addr);
    let ehlo = client.command("EHLO client.test");
    assert!(!ehlo.contains("AUTH"));
    assert!(client.auth_plain(USERNAME, PASSWORD).starts_with("538"));
}

#[test]
fn test_implicit_tls() {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let mut cert_file = NamedTempFile::new().unwrap();
    cert_file
        .write_all(certified.cert.pem().as_bytes())
        .unwrap();
    let mut key_file = NamedTempFile::new().unwrap();
    key_file
        .write_all(certified.key_pair.serialize_pem().as_bytes())
        .unwrap();

    let mut provider = Server::new();
    let mock = accepting_provider(&mut provider, 2);

    let mut settings = settings(&provider);
    settings
        .set("SMTP_USE_TLS", "true")
        .set("SMTP_TLS_CERT_FILE", cert_file.path().to_string_lossy())
        .set("SMTP_TLS_KEY_FILE", key_file.path().to_string_lossy());
    let addr = start_listener(&settings);

    let mut roots = RootCertStore::empty();
    roots.add(certified.cert.der().clone()).unwrap();
    let tls_config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_root_certificates(roots)
    .with_no_client_auth();
    let connection = ClientConnection::new(
        Arc::new(tls_config),
        ServerName::try_from("localhost").unwrap(),
    )
    .unwrap();
    let stream = StreamOwned::new(connection, TcpStream::connect(&addr).unwrap());

    let (mut client, greeting) = Client::connect(stream);
    assert_eq!(greeting, "220 relay.test ESMTP smtp2notify");

    let ehlo = client.command("EHLO client.test");
    assert!(ehlo.contains("AUTH PLAIN"));
    assert!(client.auth_plain(USERNAME, PASSWORD).starts_with("235"));
    assert!(client.transaction(&["a@example.com"], MESSAGE).starts_with("250"));
    assert!(client.command("QUIT").starts_with("221"));

    mock.assert();
}
