//! HTTP/2 conformance checker.
//!
//! # Usage
//!
//! Run every case against a cleartext server:
//! ```bash
//! h2-conformance --host 127.0.0.1 --port 8080
//! ```
//!
//! Run one section over TLS:
//! ```bash
//! h2-conformance --host example.com --tls --section 8.1.2
//! ```
//!
//! List the cases:
//! ```bash
//! h2-conformance --list
//! ```
//!
//! # Exit Codes
//!
//! - 0: Every executed case passed
//! - 1: At least one case failed
//! - 2: Invalid configuration or internal error

use std::io::IsTerminal;
use std::time::Duration;

use clap::Parser;
use facet::Facet;
use h2_conformance::config::{DEFAULT_TIMEOUT, RunConfig, SectionFilter};
use h2_conformance::harness::TcpConnector;
use h2_conformance::report::Reporter;
use h2_conformance::runner::Runner;
use h2_conformance::tests;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "h2-conformance")]
#[command(about = "Checks that an HTTP/2 server rejects protocol violations correctly")]
struct Args {
    /// Target host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Target port (default 80, or 443 with --tls)
    #[arg(long)]
    port: Option<u16>,

    /// Connect over TLS and negotiate h2 via ALPN
    #[arg(long)]
    tls: bool,

    /// Per-case timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT.as_secs_f64())]
    timeout: f64,

    /// Sections or cases to run, comma separated (e.g. "4.2,8.1.2#1")
    #[arg(long)]
    section: Option<String>,

    /// List available cases
    #[arg(long)]
    list: bool,

    /// Output format (text, json)
    #[arg(long, default_value = "text")]
    format: String,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// JSON output for a case listing.
#[derive(Facet)]
struct CaseJson {
    id: String,
    description: String,
}

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    if args.format != "text" && args.format != "json" {
        eprintln!("error: unknown format {:?} (expected text or json)", args.format);
        std::process::exit(2);
    }

    if args.list {
        let filter = match args.section.as_deref().map(SectionFilter::parse).transpose() {
            Ok(filter) => filter.unwrap_or_default(),
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(2);
            }
        };
        list_cases(&filter, &args.format);
        return;
    }

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(2);
        }
    };

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to create runtime: {e}");
            std::process::exit(2);
        }
    };

    let code = rt.block_on(run(config, &args.format));
    std::process::exit(code);
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn build_config(args: &Args) -> Result<RunConfig, h2_conformance::HarnessError> {
    let port = args.port.unwrap_or(if args.tls { 443 } else { 80 });
    let mut config = RunConfig::new(args.host.clone(), port);
    config.secure = args.tls;

    if !args.timeout.is_finite() || args.timeout <= 0.0 {
        return Err(h2_conformance::HarnessError::Config(format!(
            "timeout must be a positive number of seconds, got {}",
            args.timeout
        )));
    }
    config.timeout = Duration::from_secs_f64(args.timeout);

    if let Some(section) = &args.section {
        config.filter = SectionFilter::parse(section)?;
    }
    config.validate()?;
    Ok(config)
}

async fn run(config: RunConfig, format: &str) -> i32 {
    tracing::info!(
        authority = %config.authority(),
        secure = config.secure,
        timeout = ?config.timeout,
        filter = %config.filter,
        "starting run"
    );

    let connector = TcpConnector::new(&config);
    let runner = Runner::new(config, connector);
    let suite = tests::suite();

    let json = format == "json";
    let stdout = std::io::stdout();
    let mut reporter = Reporter::new(stdout.lock())
        .with_color(stdout.is_terminal())
        .quiet(json);

    runner.run_suite(&suite, &mut reporter).await;
    let summary = reporter.finish();

    if json {
        println!("{}", summary.to_json());
    }
    summary.exit_code()
}

fn list_cases(filter: &SectionFilter, format: &str) {
    let cases = tests::list_selected(filter);

    if format == "json" {
        let output: Vec<CaseJson> = cases
            .iter()
            .map(|(id, description)| CaseJson {
                id: id.clone(),
                description: description.to_string(),
            })
            .collect();
        println!("{}", facet_json::to_string(&output));
        return;
    }

    for (id, title, depth) in tests::sections() {
        let in_section = |case_id: &String| case_id.split_once('#').is_some_and(|(s, _)| s == id);
        let listed: Vec<_> = cases.iter().filter(|(case_id, _)| in_section(case_id)).collect();
        let below = cases.iter().any(|(case_id, _)| {
            case_id
                .strip_prefix(id.as_str())
                .is_some_and(|rest| rest.starts_with('.'))
        });
        if listed.is_empty() && !below {
            continue;
        }

        let indent = "  ".repeat(depth);
        println!("{indent}{id}. {title}");
        for (case_id, description) in listed {
            println!("{indent}  {case_id}  {description}");
        }
    }

    println!("\nTotal: {} tests", cases.len());
}
