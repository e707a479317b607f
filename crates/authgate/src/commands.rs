//! Implementations of the CLI subcommands

use crate::observer::TracingObserver;
use crate::{config, server};
use anyhow::{Context, Result};
use authgate_core::{Gateway, GatewayConfig, TokenRequest};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

/// Load, validate and build the gateway from a config file
pub fn load_gateway(path: &Path) -> Result<Gateway> {
    let config = config::load(path)?;
    build_gateway(&config).with_context(|| format!("Invalid configuration in {}", path.display()))
}

pub fn build_gateway(config: &GatewayConfig) -> Result<Gateway> {
    Ok(Gateway::from_config(config)?.with_observer(Arc::new(TracingObserver)))
}

pub async fn serve(path: &Path, listen: Option<SocketAddr>) -> Result<()> {
    let gateway = load_gateway(path)?;
    let listen = listen.unwrap_or_else(|| gateway.listen_addr());
    server::serve(Arc::new(gateway), listen).await
}

/// Validate the configuration and print a summary of the route table
pub fn check(path: &Path) -> Result<()> {
    let gateway = load_gateway(path)?;
    let routes = gateway.pipeline().routes();

    println!("Configuration OK: {}", path.display());
    println!(
        "  routes: {}, policies: {}, clusters: {}",
        routes.len(),
        gateway.pipeline().policies().len(),
        gateway.clusters().len()
    );
    println!();

    for route in routes.iter() {
        let methods = if route.methods.is_empty() {
            "*".to_string()
        } else {
            route.methods.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(",")
        };
        println!(
            "  {:<16} {:<10} {:<32} policy={:<16} cluster={}",
            route.id,
            methods,
            route.pattern,
            route.policy.as_deref().unwrap_or("anonymous"),
            route.cluster
        );
    }

    for (earlier, later) in routes.shadowed() {
        println!("  warning: route '{later}' is shadowed by '{earlier}'");
    }

    Ok(())
}

/// Print a signed test token
pub fn mint_token(path: &Path, request: TokenRequest) -> Result<()> {
    let gateway = load_gateway(path)?;
    let issuer = gateway
        .issuer()
        .context("token_issuer is disabled in this configuration")?;
    let issued = issuer.issue(&request).context("Failed to sign token")?;

    eprintln!("⚠️  FOR LOCAL TESTING ONLY\n");
    eprintln!("Role:    {}", issued.role);
    eprintln!("Scope:   {}", issued.scope);
    eprintln!("Expires: {}", issued.expires.to_rfc3339());
    eprintln!();
    println!("{}", issued.token);

    Ok(())
}
