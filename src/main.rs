//! `hosts-doctor` command-line entry point.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hosts_doctor::config::parse_resolver;
use hosts_doctor::flush::SystemFlusher;
use hosts_doctor::probe::TcpProbe;
use hosts_doctor::prompt::{AssumeYes, Confirm, Prompt};
use hosts_doctor::resolver::{CandidateSource, SystemResolver, UpstreamResolver};
use hosts_doctor::workflow::{self, Diagnosis, Outcome, Report, RunOptions};
use hosts_doctor::{Config, DoctorError, HostsFile, Toolkit};

#[derive(Parser)]
#[command(name = "hosts-doctor", version)]
#[command(about = "Diagnose DNS pollution and pin working addresses in the hosts file.")]
struct CommandLine {
    #[command(subcommand)]
    command: Option<Commands>,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Hosts file to edit instead of the system one
    #[arg(long, global = true)]
    hosts_file: Option<PathBuf>,

    /// Trusted DNS server, e.g. 1.1.1.1 or 9.9.9.9:53
    #[arg(long, global = true, value_parser = resolver_arg)]
    resolver: Option<SocketAddr>,

    /// Domain to check (repeatable, replaces the list; needs a fallback entry)
    #[arg(long = "domain", global = true)]
    domains: Vec<String>,

    /// Continue without asking when the network path looks blocked
    #[arg(short, long, global = true)]
    yes: bool,

    /// Print what would change (block to write, or entries to remove) and change nothing
    #[arg(long, global = true)]
    dry_run: bool,

    /// Use the first candidate instead of ranking by latency
    #[arg(long, global = true)]
    no_rank: bool,

    /// Skip the DNS cache flush
    #[arg(long, global = true)]
    no_flush: bool,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Clone, Copy, Default)]
enum Commands {
    /// Diagnose, then rewrite the managed hosts block (default)
    #[default]
    Fix,
    /// Diagnose only, never touch the hosts file
    #[command(alias = "d")]
    Diagnose,
    /// List the entries in the managed hosts block
    Show,
    /// Remove the managed hosts block
    Remove,
}

fn resolver_arg(s: &str) -> Result<SocketAddr, String> {
    parse_resolver(s).map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    let cli = CommandLine::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            report_error(&e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(cli: &CommandLine) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    if !cli.domains.is_empty() {
        config = config.with_domains(cli.domains.iter().cloned());
    }
    if let Some(resolver) = cli.resolver {
        config = config.with_upstream(resolver);
    }
    if let Some(path) = &cli.hosts_file {
        config = config.with_hosts_path(path);
    }
    if cli.no_rank {
        config.rank_candidates = false;
    }
    if cli.no_flush {
        config.flush_dns = false;
    }

    config.validate()?;
    Ok(config)
}

fn run(cli: &CommandLine) -> anyhow::Result<ExitCode> {
    let config = load_config(cli)?;
    let hosts = HostsFile::with_path(&config.hosts_path);

    let upstream = UpstreamResolver::new(config.upstream_resolver, config.dns_timeout());
    let reachability = TcpProbe::new(config.probe_port, config.connect_timeout());
    let latency = TcpProbe::new(config.probe_port, config.latency_timeout());
    let toolkit = Toolkit {
        local: &SystemResolver,
        upstream: &upstream,
        reachability: &reachability,
        latency: &latency,
        flusher: &SystemFlusher,
    };

    match cli.command.unwrap_or_default() {
        Commands::Fix => {
            let mut confirm: Box<dyn Confirm> = if cli.yes {
                Box::new(AssumeYes)
            } else {
                Box::new(Prompt::stdio())
            };
            let options = RunOptions {
                dry_run: cli.dry_run,
            };
            let outcome = workflow::run(&config, &toolkit, &hosts, confirm.as_mut(), options)?;
            print_outcome(&config, &hosts, &outcome);
        }
        Commands::Diagnose => {
            let diagnosis = workflow::diagnose(&config, &toolkit)?;
            print_diagnosis(&config, &diagnosis);
        }
        Commands::Show => {
            let entries = hosts.managed_entries()?;
            if entries.is_empty() {
                println!("No managed block in {}", hosts.path().display());
            }
            for m in entries {
                println!("{}\t{}", m.address, m.domain);
            }
        }
        Commands::Remove => {
            let options = RunOptions {
                dry_run: cli.dry_run,
            };
            let removed = workflow::remove(&config, &hosts, &SystemFlusher, options)?;
            if !removed {
                println!("No managed block in {}", hosts.path().display());
            } else if cli.dry_run {
                println!(
                    "Dry run, {} was not modified. Would remove:",
                    hosts.path().display()
                );
                for m in hosts.managed_entries()? {
                    println!("{}\t{}", m.address, m.domain);
                }
            } else {
                println!("Removed the managed block from {}", hosts.path().display());
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_diagnosis(config: &Config, diagnosis: &Diagnosis) {
    println!(
        "{:<32} {:<16} {:<16} {}",
        "DOMAIN", "SYSTEM", "UPSTREAM", "STATUS"
    );
    for check in &diagnosis.comparison.checks {
        let r = &check.resolution;
        let status = match (r.polluted, check.source) {
            (true, _) => "polluted",
            (false, CandidateSource::Fallback) => "lookup failed, using fallback",
            (false, CandidateSource::Upstream) => "ok",
        };
        println!(
            "{:<32} {:<16} {:<16} {}",
            r.domain,
            r.local.map_or_else(|| "-".into(), |a| a.to_string()),
            r.reference.map_or_else(|| "-".into(), |a| a.to_string()),
            status
        );
    }
    println!();

    let addr = diagnosis.reachability.addr();
    if !diagnosis.reachability.is_reachable() {
        println!(
            "Network-level blocking: {addr}:{} did not accept a connection.",
            config.probe_port
        );
        println!("A hosts override cannot fix this. Try another network, a proxy or a VPN.");
    } else if diagnosis.polluted() {
        println!(
            "DNS pollution: the system resolver disagrees with {}.",
            config.upstream_resolver
        );
    } else {
        println!(
            "DNS answers agree and {addr}:{} is reachable. Stale hosts entries or CDN address rotation are likely.",
            config.probe_port
        );
    }
}

fn print_report(report: &Report) {
    println!();
    for m in &report.mappings {
        println!("{}\t{}", m.address, m.domain);
    }
}

fn print_outcome(config: &Config, hosts: &HostsFile, outcome: &Outcome) {
    match outcome {
        Outcome::Declined(diagnosis) => {
            print_diagnosis(config, diagnosis);
            println!("Aborted. {} was not modified.", hosts.path().display());
        }
        Outcome::DryRun { report, block } => {
            print_diagnosis(config, &report.diagnosis);
            println!("\nDry run, {} was not modified. Block:\n", hosts.path().display());
            print!("{block}");
        }
        Outcome::Applied(report) => {
            print_diagnosis(config, &report.diagnosis);
            print_report(report);
            println!();
            match &report.backup {
                Some(path) => println!("Backup: {}", path.display()),
                None => println!("Warning: no backup could be made."),
            }
            println!("Updated {}.", hosts.path().display());
            if config.flush_dns && !report.flushed {
                println!("Could not flush the DNS cache; changes apply once it expires.");
            }
        }
    }
}

fn report_error(e: &anyhow::Error) {
    eprintln!("error: {e:#}");
    if let Some(doctor) = e.downcast_ref::<DoctorError>() {
        if doctor.is_write_failure() || doctor.is_permission_denied() {
            eprintln!(
                "Re-run from an elevated shell (sudo / Run as administrator), \
                 or open the hosts file in an editor with administrator rights and edit it by hand."
            );
        }
    }
}
