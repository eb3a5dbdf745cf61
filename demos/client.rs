//! Demo RPC client: calls `add2` five times with increasing operands, then
//! confirms `sub2` is not registered.
//!
//! Usage: `tinyrpc-client [-i HOST] [-p PORT]`

use std::thread;
use std::time::Duration;

use anyhow::{bail, Context};
use tinyrpc::{Client, Payload};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let host = read_flag("-i").unwrap_or_else(|| "::1".to_string());
    let port = read_flag("-p")
        .map(|s| s.parse::<u16>().context("invalid -p value"))
        .transpose()?
        .unwrap_or(3000);

    let mut client =
        Client::connect(&host, port).with_context(|| format!("failed to connect to {host}:{port}"))?;

    let add2 = client
        .find("add2")
        .context("function add2 does not exist")?;

    for i in 0..5 {
        thread::sleep(Duration::from_millis(500));

        let left_operand = i as i32;
        let right_operand: u8 = 100;
        println!("Calling add2 with {left_operand} and {right_operand}");

        let response = client
            .call(&add2, Payload {
                data1: left_operand,
                data2: Some(vec![right_operand]),
            })
            .context("function call of add2 failed")?;

        println!(
            "Result of adding {left_operand} and {right_operand}: {}",
            response.data1
        );
    }

    println!("Client correctly finds module on server");
    println!("Attempting to find a function not registered on the server...");

    if client.find("sub2").is_some() {
        bail!("function sub2 exists on server");
    }
    println!("Function sub2 does not exist on server");
    println!("Remote procedure is called correctly");

    client.close();
    Ok(())
}

fn read_flag(flag: &str) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
