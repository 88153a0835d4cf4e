#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use connector_mcp::mcp::{ConnectorContext, McpConnectorTools};
use poem_mcpserver::McpServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().expect("valid directive")),
        )
        .init();

    let context = ConnectorContext::from_env()?;
    poem_mcpserver::stdio::stdio(McpServer::new().tools(McpConnectorTools::new(context.clone())))
        .await?;
    context.shutdown().await;
    Ok(())
}
