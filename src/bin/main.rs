use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "eoka-harvest")]
#[command(about = "Open a page's hidden panel and harvest its scroll-loaded timed lines")]
#[command(version)]
struct Cli {
    /// Config file to run
    config: PathBuf,

    /// Run in headless mode (overrides config)
    #[arg(long)]
    headless: bool,

    /// Set a parameter (can be used multiple times)
    #[arg(short = 'P', long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,

    /// Write timed records as JSON to this file
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Validate config without running
    #[arg(long)]
    check: bool,

    /// Quiet mode (only errors)
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> eoka_harvest::Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    let params = eoka_harvest::Params::from_args(&cli.params)?;
    let mut config = eoka_harvest::Config::load_with_params(&cli.config, &params)?;

    if cli.check {
        let profile = &config.profile;
        println!("Config valid: {}", config.name);
        println!("  Target: {}", config.target.url);
        println!(
            "  Trigger: {} patterns, {} rules",
            profile.trigger.patterns.len(),
            profile.trigger.rules.len()
        );
        if let Some(ref panel) = profile.panel {
            println!(
                "  Panel: {} patterns, {} rules",
                panel.patterns.len(),
                panel.rules.len()
            );
        }
        println!(
            "  Verify: {} of {} signals",
            profile.verify.quorum,
            profile.verify.signals.len()
        );
        println!(
            "  View: {}",
            profile
                .view
                .labels
                .iter()
                .map(|l| l.text.as_str())
                .collect::<Vec<_>>()
                .join(" / ")
        );
        println!(
            "  Harvest: {} item shapes, up to {}",
            profile.harvest.items.len(),
            profile.harvest.poll
        );
        if !config.params.is_empty() {
            println!("  Parameters: {}", config.params.len());
            for (name, def) in &config.params {
                let req = if def.required { " (required)" } else { "" };
                let desc = def.description.as_deref().unwrap_or("");
                println!("    - {}{}: {}", name, req, desc);
            }
        }
        if let Some(ref on_failure) = config.on_failure {
            if let Some(ref retry) = on_failure.retry {
                println!("  Retry attempts: {}", retry.attempts);
            }
        }
        return Ok(());
    }

    if cli.headless {
        config.browser.headless = true;
    }

    println!("Running: {}", config.name);

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, keeping what was collected...");
            on_ctrl_c.cancel();
        }
    });

    let mut runner = eoka_harvest::Runner::new(&config.browser).await?;
    let result = runner.run(&config, &cancel).await?;

    println!();
    if result.success {
        println!("✓ Success");
    } else {
        println!("✗ Failed");
        if let Some(ref error) = result.error {
            println!("  Error: {}", error);
        }
    }
    println!("  Records: {}", result.records.len());
    if let Some(status) = result.status {
        println!("  Status: {:?}", status);
    }
    println!("  Duration: {}ms", result.duration_ms);
    if result.retries > 0 {
        println!("  Retries: {}", result.retries);
    }

    if !result.records.is_empty() {
        match cli.output {
            Some(ref path) => {
                std::fs::write(path, serde_json::to_string_pretty(&result.records)?)?;
                println!("  Output: {}", path.display());
            }
            None => {
                for r in &result.records {
                    println!("{:>8.1}  {}", r.start, r.content);
                }
            }
        }
    }

    runner.close().await?;

    if !result.success {
        std::process::exit(1);
    }

    Ok(())
}
