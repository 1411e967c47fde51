use anyhow::Result;
use chrono::Duration;
use colored::Colorize;
use modelsnap_core::Config;
use modelsnap_server::RemoteServer;
use std::net::SocketAddr;
use std::path::PathBuf;

pub async fn run(
    port: u16,
    data_dir: PathBuf,
    token: Option<String>,
    grant_ttl: u32,
    config: &Config,
) -> Result<()> {
    let token = token.or_else(|| config.remote_token());
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    println!("{}", "🚀 Starting modelsnap store...".bold().cyan());
    println!("   {}: {:?}", "Data".bold(), data_dir);
    println!("   {}: {}s", "Grant TTL".bold(), grant_ttl);

    let server = RemoteServer::bind(addr, data_dir, token.clone())
        .await?
        .with_grant_ttl(Duration::seconds(i64::from(grant_ttl)));

    println!(
        "   {}: {}",
        "API Server".bold(),
        format!("http://localhost:{}", port).green()
    );
    if token.is_none() {
        println!("   {}", "No access token set; anyone can request transfers".yellow());
    }
    println!();
    println!("{}", "Press Ctrl+C to stop".dimmed());
    println!();

    server.serve().await?;

    Ok(())
}
