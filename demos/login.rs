//! Login - password or QR code login against a live server.
//!
//! This example demonstrates:
//! - Loading a `BotConfiguration` from JSON
//! - Answering login challenges from the terminal with a `LoginSolver`
//! - Watching `AuthEvent`s while the handler connects
//!
//! # Running
//!
//! ```text
//! RUST_LOG=sso_wire=debug cargo run --example login -- <uin> [password] [config.json]
//! ```
//!
//! Without a password the account logs in by QR code.

use std::sync::Arc;

use bytes::Bytes;
use sso_wire::auth::{AuthEvent, BotAccount, LoginSolver, QrCodeState};
use sso_wire::network::{ConnectionContext, NetworkHandler, TcpConnector};
use sso_wire::{BotConfiguration, BoxFuture};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

const SERVERS: [&str; 2] = ["msfwifi.3g.qq.com:8080", "42.81.172.81:80"];

/// Reads challenge answers from stdin.
struct Terminal;

async fn prompt(question: String) -> Option<String> {
    println!("{}", question);
    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await.ok()?;
    let answer = line.trim();
    (!answer.is_empty()).then(|| answer.to_string())
}

impl LoginSolver for Terminal {
    fn solve_picture_captcha(&self, uin: i64, image: Bytes) -> BoxFuture<'_, Option<String>> {
        Box::pin(async move {
            let path = std::env::temp_dir().join(format!("captcha-{}.png", uin));
            std::fs::write(&path, &image).ok()?;
            prompt(format!("captcha saved to {}; enter the text:", path.display())).await
        })
    }

    fn supports_slider(&self) -> bool {
        true
    }

    fn solve_slider_captcha(&self, _uin: i64, url: String) -> BoxFuture<'_, Option<String>> {
        Box::pin(prompt(format!("complete the slider at {} and paste the ticket:", url)))
    }

    fn confirm_unsafe_device(&self, _uin: i64, url: String) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            prompt(format!("verify the device at {} then press y:", url)).await.as_deref() == Some("y")
        })
    }

    fn confirm_device_lock(&self, _uin: i64, url: String) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            prompt(format!("unlock the device at {} then press y:", url)).await.as_deref() == Some("y")
        })
    }

    fn solve_sms(&self, _uin: i64, phone: String) -> BoxFuture<'_, Option<String>> {
        Box::pin(prompt(format!("enter the code sent to {}:", phone)))
    }

    fn show_qr_code(&self, uin: i64, image: Bytes) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let path = std::env::temp_dir().join(format!("qrcode-{}.png", uin));
            match std::fs::write(&path, &image) {
                Ok(()) => println!("scan the QR code at {}", path.display()),
                Err(e) => eprintln!("cannot save QR code: {}", e),
            }
        })
    }

    fn qr_state_changed(&self, _uin: i64, state: QrCodeState) -> BoxFuture<'_, ()> {
        Box::pin(async move { println!("QR code: {:?}", state) })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let uin: i64 = args.next().ok_or("usage: login <uin> [password] [config.json]")?.parse()?;
    let account = match args.next() {
        Some(password) if !password.is_empty() => BotAccount::with_password(uin, password),
        _ => BotAccount::with_qr_code(uin),
    };
    let config = match args.next() {
        Some(path) => BotConfiguration::from_reader(std::fs::File::open(path)?)?,
        None => BotConfiguration::default(),
    };

    let (ctx, _notices) = ConnectionContext::builder(config, account)
        .solver(Arc::new(Terminal))
        .build();

    let mut events = ctx.processor.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                AuthEvent::ChallengeIssued { kind, .. } => println!("server asks for {}", kind),
                AuthEvent::Succeeded { fast, .. } => println!("logged in (ticket login: {})", fast),
                AuthEvent::Failed { message, .. } => println!("login failed: {}", message),
            }
        }
    });

    let handler = NetworkHandler::new(ctx, Arc::new(TcpConnector::new(SERVERS)));
    handler.resume_connection().await?;
    println!("state: {}", handler.state());

    handler.logout().await?;
    Ok(())
}
