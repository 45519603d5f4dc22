use {anyhow::Result, tokio_util::sync::CancellationToken};

use {
    wagate_client::GatewayClient,
    wagate_gateway::qr::render_terminal,
    wagate_protocol::GatewayEvent,
};

pub async fn status(client: &GatewayClient) -> Result<()> {
    let status = client.status().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

pub async fn qr(client: &GatewayClient) -> Result<()> {
    match client.pairing_code().await? {
        Some(code) => print_qr(&code),
        None => println!("no pairing code pending"),
    }
    Ok(())
}

pub async fn send(client: &GatewayClient, to: &str, text: &str) -> Result<()> {
    let reply = client.send(to, text).await?;
    println!("{}", serde_json::to_string(&reply)?);
    Ok(())
}

pub async fn reset(client: &GatewayClient) -> Result<()> {
    client.reset().await?;
    println!("credentials wiped, gateway is exiting");
    Ok(())
}

/// Print events until Ctrl-C, resubscribing whenever the gateway goes away.
pub async fn watch(client: &GatewayClient) -> Result<()> {
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    client
        .listen(
            |event| match event {
                GatewayEvent::Qr { data } => print_qr(&data),
                GatewayEvent::Status { data } => println!("status: {data}"),
                GatewayEvent::Message { from, text } => println!("{from}: {text}"),
            },
            cancel,
        )
        .await;
    Ok(())
}

fn print_qr(code: &str) {
    match render_terminal(code) {
        Ok(block) => println!("{block}"),
        Err(_) => println!("{code}"),
    }
}
