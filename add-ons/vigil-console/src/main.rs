//! Vigil console: enrollment, login and continuous face authentication.
//!
//! Usage:
//!   cargo run -p vigil-console -- enroll --user alice --script scripts/alice.jsonl
//!   cargo run -p vigil-console -- run --script scripts/session.jsonl [--user alice] [--fps 30] [--loop]
//!
//! Frames come from a JSON-lines script (see `vigil_core::scripted`). Enrolled
//! embeddings live in `identity_db` (default users.json). Ctrl-C logs out and exits.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigil_core::{
    AuthEvent, ChannelObserver, JsonIdentityStore, LoopExit, ScriptedSensors, StatusReport,
    UserId, Vigil, VigilConfig,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const DEFAULT_FPS: u64 = 30;

#[derive(Debug, Default)]
struct Args {
    command: Option<String>,
    user: Option<String>,
    script: Option<String>,
    fps: Option<u64>,
    looping: bool,
}

fn parse_args() -> Args {
    let mut args = std::env::args().skip(1);
    let mut parsed = Args {
        command: args.next(),
        ..Default::default()
    };

    while let Some(a) = args.next() {
        match a.as_str() {
            "--user" => parsed.user = args.next(),
            "--script" => parsed.script = args.next(),
            "--fps" => parsed.fps = args.next().and_then(|v| v.parse().ok()),
            "--loop" => parsed.looping = true,
            other => warn!(arg = other, "ignoring unknown argument"),
        }
    }
    parsed
}

fn usage() {
    eprintln!("Vigil: continuous face authentication");
    eprintln!("  enroll --user NAME --script FILE   Enroll NAME from the first usable frame");
    eprintln!("  run --script FILE [--user NAME]    Log in and monitor until logout or Ctrl-C");
    eprintln!("      --fps N                        Script replay rate (default 30)");
    eprintln!("      --loop                         Restart the script at its end");
    eprintln!();
    eprintln!("Config: VIGIL_CONFIG (default config/vigil.toml), VIGIL_* env overrides.");
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[vigil-console] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args();
    let Some(script) = args.script.clone() else {
        usage();
        return Ok(());
    };

    let config = VigilConfig::load()?;
    let fps = args.fps.unwrap_or(DEFAULT_FPS).max(1);
    let sensors = Arc::new(
        ScriptedSensors::from_path(Path::new(&script))?
            .looping(args.looping)
            .with_frame_interval(Duration::from_millis(1000 / fps)),
    );
    let store = Arc::new(JsonIdentityStore::new(&config.identity_db));
    let (observer, events) = ChannelObserver::new();
    let vigil = Arc::new(Vigil::new(
        config,
        sensors.into_sensors(),
        store,
        Arc::new(observer),
    )?);

    match args.command.as_deref() {
        Some("enroll") => {
            let Some(name) = args.user.as_deref() else {
                usage();
                return Ok(());
            };
            let user = vigil.enroll(name)?;
            println!("✅ Signup successful: {}", user);
            Ok(())
        }
        Some("run") => run(vigil, args.user.map(UserId::from), events).await,
        _ => {
            usage();
            Ok(())
        }
    }
}

async fn run(
    vigil: Arc<Vigil>,
    claimed: Option<UserId>,
    events: UnboundedReceiver<AuthEvent>,
) -> Result<(), BoxError> {
    let printer = tokio::spawn(print_events(events));

    let found = vigil.login(claimed.as_ref())?;
    info!(identity = %found.identity, similarity = found.similarity, "login accepted");

    let monitor = vigil.spawn_monitor();
    let runner = Arc::clone(&vigil);
    let mut frame_loop = tokio::task::spawn_blocking(move || runner.continuous_auth());

    let exit = tokio::select! {
        exit = &mut frame_loop => exit?,
        _ = tokio::signal::ctrl_c() => {
            info!("CTRL-C received; logging out");
            vigil.request_stop();
            frame_loop.await?
        }
    };

    vigil.shutdown();
    if let Err(e) = monitor.await {
        warn!(error = %e, "security monitor task failed");
    }
    drop(vigil);

    // The printer ends once every observer handle is gone; give it a moment to drain.
    let _ = tokio::time::timeout(Duration::from_millis(250), printer).await;

    match exit {
        LoopExit::LoggedOut => println!("Session ended by the security monitor."),
        LoopExit::Stopped => println!("Session stopped."),
        LoopExit::SourceClosed => println!("Camera stream ended."),
    }
    Ok(())
}

async fn print_events(mut events: UnboundedReceiver<AuthEvent>) {
    let mut last: Option<StatusReport> = None;
    while let Some(event) = events.recv().await {
        match event {
            AuthEvent::LoggedIn { identity, timestamp } => {
                println!("✅ Welcome {}! ({})", identity, timestamp.with_timezone(&chrono::Local).format("%H:%M:%S"));
            }
            AuthEvent::BlinkPrompt { grace, .. } => {
                println!("⚠️ Please blink now! ({}s to respond)", grace.as_secs());
            }
            AuthEvent::LoggedOut { reason, timestamp, .. } => {
                println!(
                    "\n⚠️ {} at {}. Logging out...",
                    reason,
                    timestamp.with_timezone(&chrono::Local).format("%H:%M:%S")
                );
            }
            AuthEvent::Status(status) => {
                if last.as_ref() != Some(&status) {
                    println!(
                        "User: {} | Last blink: {}s ago | Hand: {}{}",
                        status.identity,
                        status.seconds_since_blink,
                        if status.hand_verified { "verified" } else { "not verified" },
                        if status.reverify_failing { " | identity check failing" } else { "" }
                    );
                    last = Some(status);
                }
            }
        }
    }
}
