use clap::Parser;

use summon_mcp_runtime::server::serve_anonymous_stdio;

#[derive(Parser)]
#[command(
    name = "summon-mcp",
    version,
    about = "Summon MCP server — anonymous tool set over stdio"
)]
struct Cli {}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let _cli = Cli::parse();

    let code = serve_anonymous_stdio().await;
    std::process::exit(code);
}
