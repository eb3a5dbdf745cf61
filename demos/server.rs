//! Demo RPC server: registers `add2` (signed byte addition) and serves
//! connections until interrupted.
//!
//! Usage: `tinyrpc-server [-p PORT]`

use anyhow::Context;
use log::info;
use tinyrpc::{Payload, Server};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let port = read_flag("-p")
        .map(|s| s.parse::<u16>().context("invalid -p value"))
        .transpose()?
        .unwrap_or(3000);

    let server = Server::init(port)
        .with_context(|| format!("failed to bind listening socket on port {port}"))?;

    server.register("add2", |payload| {
        let lhs = payload.data1 as i8;
        let rhs = payload
            .data2
            .as_ref()
            .and_then(|bytes| bytes.first())
            .copied()
            .unwrap_or(0) as i8;
        Some(Payload::scalar((lhs + rhs) as i32))
    })?;

    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("received interrupt, shutting down");
        shutdown.shutdown();
    })
    .context("failed to install SIGINT handler")?;

    info!("serving on port {port}");
    server.serve_all()?;
    info!("server exited cleanly");

    Ok(())
}

fn read_flag(flag: &str) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
