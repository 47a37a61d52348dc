//! Reconnect - a long-running bot behind a `Selector`.
//!
//! This example demonstrates:
//! - Routing server pushes with a `NoticeRouter`
//! - Sending requests through the selector, which replaces dead connections
//! - Observing connection state changes
//! - Shutting down on Ctrl-C
//!
//! # Running
//!
//! ```text
//! RUST_LOG=sso_wire=info cargo run --example reconnect -- <uin> <password>
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use sso_wire::auth::BotAccount;
use sso_wire::codec::Packet;
use sso_wire::network::{ConnectionContext, NoticeRouter, Selector, TcpConnector};
use sso_wire::{BotConfiguration, WireError};
use tracing_subscriber::EnvFilter;

const SERVERS: [&str; 2] = ["msfwifi.3g.qq.com:8080", "42.81.172.81:80"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let uin: i64 = args.next().ok_or("usage: reconnect <uin> <password>")?.parse()?;
    let password = args.next().ok_or("usage: reconnect <uin> <password>")?;

    let mut config = BotConfiguration::default();
    config.reconnection_retry_times = 10;
    let (ctx, notices) = ConnectionContext::builder(config, BotAccount::with_password(uin, password)).build();

    // Pushes are handled on their own task so the read loop never waits
    notices.spawn(
        NoticeRouter::new()
            .on("OnlinePush.ReqPush", |packet: Packet| async move {
                println!("push #{}: {:?}", packet.sequence_id, packet.body);
                Ok(())
            })
            .otherwise(|packet: Packet| async move {
                tracing::debug!(command = %packet.command, "unhandled push");
                Ok(())
            }),
        ctx.cancel.clone(),
    );

    let selector = Arc::new(Selector::new(ctx, Arc::new(TcpConnector::new(SERVERS))));

    let worker = {
        let selector = selector.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(30));
            loop {
                tick.tick().await;
                match selector.send_and_expect("StatSvc.GetOnlineStatus", Bytes::new()).await {
                    Ok(reply) => println!("online status: {:?}", reply.body),
                    Err(WireError::Cancelled) => break,
                    Err(e) if e.is_auth() => {
                        eprintln!("login rejected: {}", e);
                        break;
                    }
                    Err(e) => eprintln!("request failed: {}", e),
                }
                if let Some(handler) = selector.current().await {
                    println!("connection: {}", handler.state());
                }
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    selector.close().await;
    worker.await?;
    Ok(())
}
