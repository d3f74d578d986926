use apex_cascade::config::Config;
use apex_cascade::context::EmailContext;
use apex_cascade::engine::ApexEngine;
use apex_cascade::verdict::{Action, Verdict};
use anyhow::Context;
use clap::{Arg, Command};
use log::LevelFilter;
use std::path::Path;
use std::process;
use std::str::FromStr;

#[tokio::main]
async fn main() {
    let matches = Command::new("apex-cascade")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Ensemble email threat scoring with a staged detector cascade")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/apex-cascade.yaml"),
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
                .help("Validate the configuration and show layer availability")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("test-email")
                .long("test-email")
                .value_name("FILE")
                .help("Analyze an email (EmailContext JSON or raw RFC 822 message)")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print the verdict as JSON")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("list-layers")
                .long("list-layers")
                .help("List configured detection layers and their status")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("stats")
                .long("stats")
                .help("Show engine statistics after analysis")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        init_logging(matches.get_flag("verbose"), "info");
        generate_default_config(generate_path);
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("/etc/apex-cascade.yaml");

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e:#}");
            process::exit(1);
        }
    };

    init_logging(matches.get_flag("verbose"), &config.logging.level);

    let engine = match ApexEngine::new(config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("❌ Configuration validation failed: {e}");
            process::exit(1);
        }
    };

    if matches.get_flag("test-config") {
        println!("🔍 Testing configuration...");
        println!();
        print_layers(&engine);
        println!();
        println!("✅ Configuration is valid");
        return;
    }

    if matches.get_flag("list-layers") {
        print_layers(&engine);
        return;
    }

    if let Some(email_file) = matches.get_one::<String>("test-email") {
        let email = match read_email(email_file) {
            Ok(email) => email,
            Err(e) => {
                eprintln!("❌ Error reading email file: {e:#}");
                process::exit(1);
            }
        };

        let verdict = engine.analyze(email).await;
        if matches.get_flag("json") {
            match verdict.to_json() {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("❌ Failed to serialize verdict: {e}");
                    process::exit(1);
                }
            }
        } else {
            print_verdict(&verdict);
        }

        if matches.get_flag("stats") {
            print_statistics(&engine);
        }
        return;
    }

    if matches.get_flag("stats") {
        print_statistics(&engine);
        return;
    }

    eprintln!("Nothing to do. Use --test-email FILE, --list-layers or --test-config.");
    process::exit(2);
}

fn init_logging(verbose: bool, configured_level: &str) {
    let log_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::from_str(configured_level).unwrap_or(LevelFilter::Info)
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    if Path::new(path).exists() {
        Config::load(path).with_context(|| format!("while loading {path}"))
    } else {
        log::warn!("Configuration file '{path}' not found, using default configuration");
        Ok(Config::default())
    }
}

fn generate_default_config(path: &str) {
    let result = Config::default()
        .to_yaml()
        .map_err(anyhow::Error::from)
        .and_then(|yaml| std::fs::write(path, yaml).map_err(anyhow::Error::from));

    match result {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Please edit the configuration file to suit your needs.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e}");
            process::exit(1);
        }
    }
}

/// JSON first, then a raw RFC 822 message.
fn read_email(path: &str) -> anyhow::Result<EmailContext> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("cannot read {path}"))?;

    if content.trim_start().starts_with('{') {
        let email: EmailContext = serde_json::from_str(&content)
            .with_context(|| format!("{path} is not a valid EmailContext document"))?;
        Ok(email.normalized())
    } else {
        Ok(EmailContext::from_raw(&content))
    }
}

fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}

fn print_layers(engine: &ApexEngine) {
    println!("🧩 Detection layers:");
    for layer in engine.layers() {
        println!(
            "  [{}] {:<16} {:<14} weight {:.2}, timeout {:>4.0}s  {}",
            layer.tier.stage(),
            truncate_string(&layer.name, 16),
            layer.availability,
            layer.weight,
            layer.timeout_seconds,
            layer.description
        );
    }
}

fn action_icon(action: Action) -> &'static str {
    match action {
        Action::Allow => "✅",
        Action::Tag => "🏷️",
        Action::Warn => "⚠️",
        Action::Quarantine => "🔒",
        Action::Block => "❌",
    }
}

fn print_verdict(verdict: &Verdict) {
    println!("📧 Email: {}", verdict.email_id);
    println!(
        "{} {} ({}) risk {:.1}/100, confidence {:.2}",
        action_icon(verdict.action),
        verdict.action,
        verdict.threat_level,
        verdict.risk_score,
        verdict.confidence
    );
    println!("   {}", verdict.explanation);

    if !verdict.threat_categories.is_empty() {
        println!("   Categories: {}", verdict.threat_categories.join(", "));
    }
    if !verdict.indicators.is_empty() {
        println!("   Indicators:");
        for indicator in &verdict.indicators {
            println!("     • {}", truncate_string(indicator, 100));
        }
    }
    if !verdict.reason_codes.is_empty() {
        println!("   Reason codes: {}", verdict.reason_codes.join(", "));
    }

    if !verdict.layers.is_empty() {
        println!();
        println!("🔍 Layers:");
        for layer in &verdict.layers {
            let status = match (&layer.error, layer.executed) {
                (Some(error), _) => format!("error: {}", truncate_string(error, 60)),
                (None, false) => "skipped".to_string(),
                (None, true) if layer.detected => "detected".to_string(),
                (None, true) => "clean".to_string(),
            };
            println!(
                "  [{}] {:<16} score {:.2} conf {:.2} {:>8.1}ms  {}",
                layer.tier.stage(),
                truncate_string(&layer.layer_name, 16),
                layer.score,
                layer.confidence,
                layer.duration_ms,
                status
            );
        }
    }
    println!();
    println!(
        "⏱️  {:.1}ms, {}",
        verdict.total_duration_ms, verdict.engine_version
    );
}

fn print_statistics(engine: &ApexEngine) {
    let stats = engine.statistics();
    let global = &stats.global;

    println!();
    println!("📊 {} Statistics", stats.version);
    println!("═══════════════════════════════════════");
    println!("  Active layers: {}", stats.active_layers.join(", "));
    println!(
        "  Whitelist entries: {}, blacklist entries: {}",
        stats.whitelist_size, stats.blacklist_size
    );
    println!("  Total Emails Processed: {}", global.total_emails);
    println!("  ├─ Allowed: {}", global.total_allows);
    println!("  ├─ Tagged: {}", global.total_tags);
    println!("  ├─ Warned: {}", global.total_warns);
    println!("  ├─ Quarantined: {}", global.total_quarantines);
    println!("  └─ Blocked: {}", global.total_blocks);
    println!(
        "  Short-circuits: {} pre-filter, {} critical",
        global.prefilter_short_circuits, global.critical_short_circuits
    );
    println!(
        "  Stage C runs: {}, stage D runs: {}, pipeline failures: {}",
        global.stage_c_runs, global.stage_d_runs, global.pipeline_failures
    );

    if !stats.layers.is_empty() {
        println!();
        println!("🎯 Layer Statistics:");
        for layer in &stats.layers {
            println!(
                "  {:<20} executions {:>5}, detections {:>5}, errors {:>5}",
                truncate_string(&layer.layer_name, 20),
                layer.executions,
                layer.detections,
                layer.errors
            );
        }
    }
}
