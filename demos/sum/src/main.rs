use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use geerpc_client::xdial;
use geerpc_common::Options;
use geerpc_server::{Server, Service};

#[derive(Debug, Serialize, Deserialize)]
struct Args {
    num1: i32,
    num2: i32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let server = Server::new();
    server.register(Service::new("Foo")?.method(
        "Sum",
        |args: Args, reply: &mut i32| {
            *reply = args.num1 + args.num2;
            Ok(())
        },
    ))?;

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    println!("serving on http@{addr}");
    tokio::spawn(async move { server.serve_http(listener).await });

    let client = Arc::new(xdial(&format!("http@{addr}"), Options::default()).await?);

    let mut calls = tokio::task::JoinSet::new();
    for i in 0..5 {
        let client = Arc::clone(&client);
        calls.spawn(async move {
            let args = Args { num1: i, num2: i * i };
            let reply: i32 = client.call("Foo.Sum", &args).await?;
            println!("{} + {} = {}", args.num1, args.num2, reply);
            anyhow::Ok(())
        });
    }
    while let Some(res) = calls.join_next().await {
        res??;
    }

    client.close().await?;
    Ok(())
}
