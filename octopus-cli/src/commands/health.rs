use anyhow::{Context, Result};
use colored::Colorize;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    connections: usize,
    #[serde(default)]
    bundles: usize,
}

#[derive(Debug, Deserialize)]
struct DependencyStatus {
    healthy: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReadinessResponse {
    ready: bool,
    #[serde(default)]
    dependencies: HashMap<String, DependencyStatus>,
}

pub async fn execute(verbose: bool, url: String) -> Result<()> {
    println!("{}", "Checking service health...".bold());
    println!();

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
        .context("Failed to create HTTP client")?;

    let base_url = url.trim_end_matches('/');

    let health_url = format!("{}/health", base_url);
    print!("Health endpoint ({})... ", health_url);

    match fetch(&client, &health_url, verbose).await {
        Ok((_, body)) => {
            let health = parse_health(&body)?;
            println!("{}", "✓ OK".green().bold());
            if verbose {
                println!("  Status: {}", health.status);
                if let Some(version) = health.version {
                    println!("  Version: {}", version);
                }
            }
            println!(
                "  Connections: {}, bundles: {}",
                health.connections, health.bundles
            );
        }
        Err(e) => {
            println!("{}", "✗ FAILED".red().bold());
            println!("  Error: {}", e);
            return Err(e);
        }
    }

    let ready_url = format!("{}/ready", base_url);
    print!("Readiness endpoint ({})... ", ready_url);

    // 503 still carries a readiness body worth showing
    let (status, body) = match fetch(&client, &ready_url, verbose).await {
        Ok(response) => response,
        Err(e) => {
            println!("{}", "✗ FAILED".red().bold());
            println!("  Error: {}", e);
            return Err(e);
        }
    };
    let readiness = parse_readiness(&body)?;

    if readiness.ready {
        println!("{}", "✓ OK".green().bold());
    } else {
        println!("{} (HTTP {})", "✗ NOT READY".red().bold(), status);
    }

    let mut names: Vec<_> = readiness.dependencies.keys().collect();
    names.sort();
    for name in names {
        let dependency = &readiness.dependencies[name];
        let mark = if dependency.healthy {
            "✓".green()
        } else {
            "✗".red()
        };
        println!(
            "  {} {}: {}",
            mark,
            name,
            dependency.message.as_deref().unwrap_or("")
        );
    }

    if !readiness.ready {
        anyhow::bail!("Service is not ready");
    }

    println!();
    println!("{}", "Service is healthy and ready!".green().bold());

    Ok(())
}

async fn fetch(client: &reqwest::Client, url: &str, verbose: bool) -> Result<(u16, String)> {
    let response = client
        .get(url)
        .send()
        .await
        .context("Failed to send request")?;

    let status = response.status();

    if verbose {
        println!();
        println!("  HTTP Status: {}", status);
    }

    if !status.is_success() && status != reqwest::StatusCode::SERVICE_UNAVAILABLE {
        anyhow::bail!(
            "HTTP {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown")
        );
    }

    let body = response
        .text()
        .await
        .context("Failed to read response body")?;

    if verbose {
        println!("  Response: {}", body);
    }

    Ok((status.as_u16(), body))
}

fn parse_health(body: &str) -> Result<HealthResponse> {
    serde_json::from_str(body).with_context(|| format!("Unexpected response format: {}", body))
}

fn parse_readiness(body: &str) -> Result<ReadinessResponse> {
    serde_json::from_str(body).with_context(|| format!("Unexpected response format: {}", body))
}
