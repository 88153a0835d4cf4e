#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use connector_mcp::mcp::{ConnectorContext, McpConnectorTools};
use dotenv::dotenv;
use poem::{EndpointExt, Route, Server, listener::TcpListener, middleware::Tracing};
use poem_mcpserver::{McpServer, streamable_http};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().expect("valid directive")),
        )
        .init();

    let context = ConnectorContext::from_env()?;

    let mcp_port: u16 = std::env::var("MCP_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);
    let mcp_addr = format!("0.0.0.0:{}", mcp_port);
    info!("Starting MCP server on {}", mcp_addr);

    let tools_context = context.clone();
    let app = Route::new()
        .at(
            "/",
            streamable_http::endpoint(move |_| {
                McpServer::new().tools(McpConnectorTools::new(tools_context.clone()))
            }),
        )
        .with(Tracing);

    info!("Use connector_connect to open a shared connector service");

    Server::new(TcpListener::bind(mcp_addr))
        .name("Connector MCP Server")
        .run_with_graceful_shutdown(
            app,
            async {
                let _ = tokio::signal::ctrl_c().await;
            },
            None,
        )
        .await?;

    info!("Shutting down, disconnecting connector services");
    context.shutdown().await;

    Ok(())
}
