use std::env;

use anyhow::{Context, Result};
use player_decrypter::{Config, Resolver};

fn usage(program: &str) -> ! {
    eprintln!("Usage:");
    eprintln!("  {} sts <player_url>", program);
    eprintln!("  {} decrypt <player_url> <encrypted_signature> <n_param>", program);
    eprintln!("  {} resolve <player_url> <stream_url> [encrypted_signature] [signature_key]", program);
    eprintln!("  player_url: full URL or a path such as /s/player/<id>/player_ias.vflset/en_US/base.js");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "player_decrypter=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("player-decrypter");
    if args.len() < 3 {
        usage(program);
    }

    let config = Config::from_env();
    let resolver = Resolver::from_config(&config).context("Failed to initialize resolver")?;
    let player_url = args[2].as_str();

    match args[1].as_str() {
        "sts" => {
            let sts = resolver.get_signature_timestamp(player_url).await?;
            println!("{}", sts);
        }
        "decrypt" => {
            let (Some(signature), Some(n)) = (args.get(3), args.get(4)) else {
                usage(program);
            };
            let (signature, n) = resolver.decrypt_signature(signature, n, player_url).await?;
            println!("signature: {}", signature);
            println!("n:         {}", n);
        }
        "resolve" => {
            let Some(stream_url) = args.get(3) else {
                usage(program);
            };
            let encrypted_signature = args.get(4).map(String::as_str);
            let signature_key = args
                .get(5)
                .map(String::as_str)
                .unwrap_or(player_decrypter::types::DEFAULT_SIGNATURE_KEY);
            let resolved = resolver
                .resolve_url(stream_url, player_url, encrypted_signature, signature_key, None)
                .await?;
            println!("{}", resolved);
        }
        other => {
            eprintln!("Unknown command: {}", other);
            usage(program);
        }
    }

    Ok(())
}
