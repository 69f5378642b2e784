//! Movesync Demo Server
//!
//! `movesync-server [loopback|udp] [config.json]`
//!
//! `loopback` (default) runs two clients and a server on a simulated lossy
//! link, twice, and checks both runs end in the same state. `udp` runs the
//! same peers over real sockets on localhost.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::info;
use tracing_subscriber::EnvFilter;

use movesync::{
    core::hash::short_hex,
    network::{LinkConditions, LoopbackSession, UdpTransport},
    ClientPeer, ServerPeer, SyncConfig, Transform, Vec2, Vec3, VERSION,
};

const DEMO_SEED: u64 = 12345;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Movesync Server v{}", VERSION);

    let mut args = std::env::args().skip(1);
    let mode = args.next().unwrap_or_else(|| "loopback".to_string());
    let config = match args.next() {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {}", path))?;
            SyncConfig::from_json(&text).with_context(|| format!("parsing config {}", path))?
        }
        None => SyncConfig::default(),
    };

    info!(
        "Server tick {:.1} Hz, client tick {:.1} Hz, input buffer {:.0} ms, \
         interpolation delay {:.0} ms",
        1.0 / config.server_tick_period,
        1.0 / config.client_tick_period,
        config.input_buffer_time * 1000.0,
        config.interpolation_delay * 1000.0
    );

    match mode.as_str() {
        "loopback" => demo_loopback(&config),
        "udp" => demo_udp(config).await,
        other => bail!("unknown mode `{}` (expected loopback or udp)", other),
    }
}

/// Circle strafe with a change of direction every couple of seconds.
fn demo_input(t: f64, phase: f64) -> Vec2 {
    let angle = (t * 0.8 + phase) as f32;
    Vec2::new(angle.sin(), angle.cos())
}

fn demo_loopback(config: &SyncConfig) -> Result<()> {
    info!("=== Loopback Session ===");
    let conditions = LinkConditions {
        latency: 0.06,
        jitter: 0.03,
        loss: 0.05,
        duplicate: 0.02,
    };

    let run = || {
        let mut session = LoopbackSession::new(config.clone(), conditions, DEMO_SEED);
        let a = session.add_client(Transform::at(Vec3::new(-5.0, 0.0, 0.0)));
        let b = session.add_client(Transform::at(Vec3::new(5.0, 0.0, 0.0)));

        let step = 0.25;
        let mut t = 0.0;
        while t < 8.0 {
            session.set_input(a, demo_input(t, 0.0));
            session.set_input(b, demo_input(t, 2.0));
            session.run_for(step);
            t += step;
        }
        session.set_input(a, Vec2::ZERO);
        session.set_input(b, Vec2::ZERO);
        session.run_for(2.0);
        session
    };

    let session = run();
    session.log_reports();

    let stats = session.stats();
    let link = session.link_stats();
    info!(
        "Link: {} sent, {} lost, {} duplicated, {} delivered",
        link.sent, link.lost, link.duplicated, link.delivered
    );
    info!(
        "Sync: {} corrections (max pop {:.4}), {} resyncs, {} synthetic commands, {} resends",
        stats.corrections,
        stats.max_pop,
        stats.resyncs,
        stats.synthetic_commands(),
        stats.commands_overwritten
    );

    info!("=== Verifying Determinism ===");
    let replay = run();
    let first: Vec<_> = session.reports().iter().map(|r| r.server_hash).collect();
    let second: Vec<_> = replay.reports().iter().map(|r| r.server_hash).collect();
    for (a, b) in first.iter().zip(&second) {
        info!("{} vs {}", short_hex(a), short_hex(b));
    }
    if first != second {
        bail!("DETERMINISM FAILURE: replayed session diverged");
    }
    info!("DETERMINISM VERIFIED: Hashes match!");
    Ok(())
}

async fn demo_udp(config: SyncConfig) -> Result<()> {
    info!("=== UDP Session ===");
    let server_transport = UdpTransport::bind("127.0.0.1:0").await?;
    let client_transport = UdpTransport::bind("127.0.0.1:0").await?;
    let server_addr = server_transport.local_addr();
    let client_addr = client_transport.local_addr();

    let spawn = Transform::default();
    let mut server = ServerPeer::new(config.clone(), server_transport);
    server.spawn(1, client_addr, spawn);
    let mut client = ClientPeer::new(config.clone(), client_transport, server_addr);
    client.possess(1, spawn);

    let moving = Duration::from_secs(4);
    let total = Duration::from_secs(6);
    let start = Instant::now();

    let server_period = Duration::from_secs_f32(config.server_tick_period);
    let server_task = tokio::spawn(async move {
        let mut ticker = interval(server_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        while start.elapsed() < total {
            ticker.tick().await;
            server.tick(start.elapsed().as_secs_f64());
        }
        server
    });

    let client_period = Duration::from_secs_f32(config.client_tick_period);
    let client_task = tokio::spawn(async move {
        let mut ticker = interval(client_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        while start.elapsed() < total {
            ticker.tick().await;
            let now = start.elapsed();
            let axis = if now < moving {
                demo_input(now.as_secs_f64(), 0.0)
            } else {
                Vec2::ZERO
            };
            client.tick(now.as_secs_f64(), axis);
        }
        client
    });

    let server = server_task.await.context("server task panicked")?;
    let client = client_task.await.context("client task panicked")?;

    let truth = server.transform(1).context("entity 1 missing on server")?;
    let predicted = client.transform(1).context("entity 1 missing on client")?;
    info!(
        "server {} client {} error {:.6}, rtt {:.1} ms",
        short_hex(&truth.state_hash()),
        short_hex(&predicted.state_hash()),
        truth.position.distance(predicted.position),
        client.rtt() * 1000.0
    );
    let stats = client.stats();
    info!("{} corrections, max pop {:.4}", stats.corrections, stats.max_pop);
    Ok(())
}
