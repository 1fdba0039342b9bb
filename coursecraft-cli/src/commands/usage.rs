//! Provider usage command

use anyhow::Result;
use colored::*;
use coursecraft_client::OrchestratorClient;
use coursecraft_core::dto::provider::ProviderUsage;

/// Show per-provider counters
pub async fn show_usage(client: &OrchestratorClient) -> Result<()> {
    let usage = client.provider_usage().await?;

    if usage.is_empty() {
        println!("{}", "No providers configured.".yellow());
        return Ok(());
    }

    println!("{}", format!("{} provider(s):", usage.len()).bold());
    println!();
    for provider in &usage {
        print_provider(provider);
    }

    Ok(())
}

fn print_provider(usage: &ProviderUsage) {
    let state = if usage.cooling_down {
        "cooling down".yellow()
    } else if usage.consecutive_failures > 0 {
        format!("{} consecutive failures", usage.consecutive_failures).red()
    } else {
        "healthy".green()
    };

    println!("  {} {}  {}", "▸".cyan(), usage.provider_id.bold(), state);
    println!("    Requests: {} ({} failed)", usage.requests, usage.failures);
    println!(
        "    Tokens:   {} prompt / {} completion",
        usage.prompt_tokens, usage.completion_tokens
    );
    if let Some(avg) = average_latency_ms(usage) {
        println!("    Latency:  {} ms avg", avg);
    }
    println!();
}

fn average_latency_ms(usage: &ProviderUsage) -> Option<u64> {
    (usage.requests > 0).then(|| usage.total_latency_ms / usage.requests)
}
