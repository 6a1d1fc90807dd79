use clap::{Arg, Command};
use log::LevelFilter;
use qrguard::pipeline::{QrReport, ScanEngine, ScanReport};
use qrguard::{Config, ScanError};
use std::process;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let matches = Command::new("qrguard")
        .version(env!("CARGO_PKG_VERSION"))
        .about("URL and QR-code trust verdicts backed by reputation lookups and a fallback classifier")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/qrguard.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Test configuration validity")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("scan-url")
                .long("scan-url")
                .value_name("URL")
                .help("Scan a single URL and print the verdict as JSON")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("check-qr")
                .long("check-qr")
                .value_name("FILE")
                .help("Decode a QR image, scan its URL and print the verdict as JSON")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging of every pipeline stage")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("/etc/qrguard.yaml");

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            process::exit(1);
        }
    };

    if matches.get_flag("test-config") {
        println!("🔍 Testing configuration...");
        println!("  Listen address: {}", config.server.listen);
        println!(
            "  Reputation credential: {}",
            if config.has_reputation_credential() { "loaded" } else { "missing" }
        );
        println!("  Classifier: {}", config.classifier.base_url);
        println!(
            "  Thresholds: malicious>={} suspicious>={} harmless>={}",
            config.thresholds.malicious, config.thresholds.suspicious, config.thresholds.harmless
        );
        println!("✅ Configuration valid");
        return;
    }

    let engine = match ScanEngine::new(Arc::new(config)) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            eprintln!("Error creating scan engine: {e}");
            process::exit(1);
        }
    };

    if let Some(url) = matches.get_one::<String>("scan-url") {
        let result = engine.scan_url(url).await.map(|o| ScanReport::from(&o));
        print_result(result);
        return;
    }

    if let Some(image_path) = matches.get_one::<String>("check-qr") {
        let bytes = match std::fs::read(image_path) {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("❌ Error reading image file: {e}");
                process::exit(1);
            }
        };
        let mime = image::guess_format(&bytes)
            .map(|f| f.to_mime_type())
            .unwrap_or("application/octet-stream");
        let result = engine.check_qr(bytes, mime).await.map(|o| QrReport::from(&o));
        print_result(result);
        return;
    }

    if let Err(e) = qrguard::server::serve(engine).await {
        log::error!("Server error: {e}");
        process::exit(1);
    }
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    let mut config = if std::path::Path::new(path).exists() {
        Config::from_file(path)?
    } else {
        log::warn!("Configuration file '{path}' not found, using default configuration");
        Config::default()
    };
    config.apply_env();
    config.validate()?;
    Ok(config)
}

fn generate_default_config(path: &str) {
    let config = Config::default();
    match config.to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Set reputation.api_key (or VIRUSTOTAL_API_KEY) before serving.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e}");
            process::exit(1);
        }
    }
}

fn print_result<T: serde::Serialize>(result: Result<T, ScanError>) {
    match result {
        Ok(report) => match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("❌ Could not render report: {e}");
                process::exit(1);
            }
        },
        Err(e) => {
            eprintln!(
                "❌ {} (stage: {}, status {})",
                e,
                e.stage(),
                e.status_code()
            );
            process::exit(if e.is_client_error() { 2 } else { 1 });
        }
    }
}
