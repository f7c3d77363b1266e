use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::mpsc,
};

use notify_relay::{
    assistant::HttpAssistant,
    broker::{BrokerSession, RELAY_QOS},
    capture::StdioBridge,
    config::{Config, Preferences},
    engine::{EngineCommand, EngineOptions, RelayEngine},
    events::{init_logging, EventEmitter},
    mqtt::MqttTransport,
    protocol::{ProtocolEnvelope, Topics},
};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::parse();
    init_logging(&cfg)?;
    let events = EventEmitter::new(cfg.json_output);

    let prefs_path = cfg.prefs_path();
    let prefs = Preferences::load(&prefs_path)?;
    let settings = prefs.relay_settings();
    if settings.device_id.is_empty() {
        tracing::warn!(
            target = "notify_relay::main",
            prefs = %prefs_path.display(),
            "no phone number configured; topics will have an empty device prefix"
        );
    }
    let topics = Topics::for_device(&settings.device_id);

    let (inbound_tx, mut inbound_rx) = mpsc::channel(64);
    let session = BrokerSession::new(
        Arc::new(MqttTransport),
        cfg.session_options(),
        inbound_tx,
        events.clone(),
    );
    session
        .subscribe(&topics.inbound, RELAY_QOS)
        .await
        .context("failed to record inbound subscription")?;

    let assistant = HttpAssistant::new(cfg.assistant_url.clone(), cfg.resolved_assistant_token())
        .with_lang(cfg.assistant_lang.clone());

    let (engine_tx, engine_rx) = mpsc::channel::<EngineCommand>(256);
    let mut options = EngineOptions::new(
        settings.clone(),
        prefs.channel_config(),
        Arc::new(session.clone()),
        Arc::new(assistant),
        engine_tx.clone(),
    );
    options.events = events.clone();
    options.max_greeted = cfg.max_greeted;
    let engine_task = tokio::spawn(RelayEngine::new(options).run(engine_rx));

    let forward_tx = engine_tx.clone();
    tokio::spawn(async move {
        while let Some(message) = inbound_rx.recv().await {
            if forward_tx.send(EngineCommand::Inbound(message)).await.is_err() {
                break;
            }
        }
    });

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ProtocolEnvelope<Value>>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(frame) = out_rx.recv().await {
            let mut line = match serde_json::to_string(&frame) {
                Ok(line) => line,
                Err(error) => {
                    tracing::error!(target = "notify_relay::main", error = %error, "failed to encode frame");
                    continue;
                }
            };
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
                break;
            }
        }
    });

    let bridge = StdioBridge::new(out_tx.clone());
    let _ = out_tx.send(ProtocolEnvelope::new(
        "ready",
        json!({
            "device_id": settings.device_id,
            "outbound_topic": topics.outbound,
            "inbound_topic": topics.inbound,
        }),
    ));
    drop(out_tx);

    // Starting the process is the listener coming up.
    engine_tx
        .send(EngineCommand::ListenerConnected)
        .await
        .context("engine stopped before startup")?;

    tracing::info!(target = "notify_relay::main", endpoint = %session.options().endpoint, "relay running; reading frames from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = sigterm.recv() => {
                tracing::info!(target = "notify_relay::main", "received SIGTERM, shutting down");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match bridge.parse_line(&line) {
                        Ok(EngineCommand::Shutdown) => break,
                        Ok(command) => {
                            if engine_tx.send(command).await.is_err() {
                                break;
                            }
                        }
                        Err(error) => {
                            tracing::warn!(target = "notify_relay::main", error = %error, "ignoring frame");
                        }
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    tracing::warn!(target = "notify_relay::main", error = %error, "stdin read failed");
                    break;
                }
            }
        }
    }

    let _ = engine_tx.send(EngineCommand::Shutdown).await;
    let _ = engine_task.await;
    drop(bridge);
    let _ = tokio::time::timeout(Duration::from_secs(2), writer).await;
    Ok(())
}
