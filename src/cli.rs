use crate::dns::commands::normalize_error_message;
use crate::dns::{
    self, AddressFamily, CommandRunner, Intent, ProfileSet, Report, SystemRunner,
    TargetSelection, get_current_dns, get_profiles_path, list_adapters, load_profiles, plan,
    render, select_all_up, select_named, write_sample_profiles,
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "dns-switcher", version, about = "Switch DNS resolvers on network adapters")]
pub struct Args {
    /// Profile override file (defaults to dns_profiles.json beside the
    /// executable, then the user config directory)
    #[arg(long = "profiles", global = true, value_name = "PATH")]
    pub profile_file: Option<PathBuf>,
    /// Tracing filter directive
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
    /// Print machine-readable JSON
    #[arg(long, global = true)]
    pub json: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List network adapters and their status
    Adapters,
    /// Inspect or create DNS profiles
    Profiles {
        #[command(subcommand)]
        action: ProfilesCommand,
    },
    /// Apply a DNS profile to active adapters
    Apply {
        /// Profile name (case-insensitive)
        profile: String,
        #[command(flatten)]
        targets: TargetArgs,
    },
    /// Revert adapters to automatic (DHCP) DNS
    Revert {
        #[command(flatten)]
        targets: TargetArgs,
    },
    /// Show the resolvers currently configured on active adapters
    Status {
        /// Adapter to inspect; repeat for several. Defaults to all active adapters
        #[arg(long = "adapter", value_name = "NAME")]
        adapters: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum ProfilesCommand {
    /// List built-in and override profiles
    List,
    /// Create a sample override file if none exists
    Init,
    /// Print the override file location
    Path,
}

#[derive(clap::Args)]
pub struct TargetArgs {
    /// Adapter to change; repeat for several. Defaults to all active adapters
    #[arg(long = "adapter", value_name = "NAME")]
    pub adapters: Vec<String>,
    /// Print the commands instead of running them
    #[arg(long)]
    pub dry_run: bool,
    /// Clear the resolver cache afterwards
    #[arg(long)]
    pub flush_cache: bool,
}

pub async fn run(args: Args) -> Result<ExitCode> {
    let runner = SystemRunner;
    match &args.command {
        Commands::Adapters => run_adapters(&runner, args.json).await,
        Commands::Profiles { action } => run_profiles(&args, action),
        Commands::Apply { profile, targets } => {
            let profiles = resolve_profiles(&args)?;
            let profile = profiles
                .get(profile)
                .cloned()
                .ok_or_else(|| anyhow!("unknown profile '{}'", profile))?;
            if profile.is_noop() {
                warn!(profile = %profile.name, "profile has no addresses, nothing will change");
            }
            info!(profile = %profile.name, "applying profile");
            run_change(&runner, Intent::SetProfile(profile), targets, args.json).await
        }
        Commands::Revert { targets } => {
            run_change(&runner, Intent::Revert, targets, args.json).await
        }
        Commands::Status { adapters } => run_status(&runner, adapters, args.json).await,
    }
}

fn profiles_path(args: &Args) -> Result<PathBuf> {
    match &args.profile_file {
        Some(path) => Ok(path.clone()),
        None => get_profiles_path().context("failed to locate profile file"),
    }
}

fn resolve_profiles(args: &Args) -> Result<ProfileSet> {
    let path = profiles_path(args)?;
    match load_profiles(&path) {
        Ok(profiles) => Ok(profiles),
        Err(e) => {
            warn!(
                "Failed to load {}, using built-in profiles: {}",
                path.display(),
                e
            );
            Ok(ProfileSet::builtin())
        }
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_adapters(runner: &impl CommandRunner, as_json: bool) -> Result<ExitCode> {
    let adapters = list_adapters(runner).await?;

    if as_json {
        print_json(&adapters)?;
    } else if adapters.is_empty() {
        println!("No network adapters found");
    } else {
        for adapter in &adapters {
            let kind = if adapter.physical { "" } else { " (virtual)" };
            println!("{:<14} {}{}", adapter.status, adapter.name, kind);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_profiles(args: &Args, action: &ProfilesCommand) -> Result<ExitCode> {
    match action {
        ProfilesCommand::List => {
            let profiles = resolve_profiles(args)?;
            if args.json {
                print_json(&profiles.iter().collect::<Vec<_>>())?;
            } else {
                for profile in profiles.iter() {
                    println!("{}", profile.name);
                    for family in AddressFamily::ALL {
                        let addresses = profile.addresses(family);
                        if !addresses.is_empty() {
                            println!("  {}: {}", family, addresses.join(", "));
                        }
                    }
                }
            }
        }
        ProfilesCommand::Init => {
            let path = profiles_path(args)?;
            let written = write_sample_profiles(&path)
                .with_context(|| format!("failed to write {}", path.display()))?;
            if written {
                println!("Created {}", path.display());
            } else {
                println!("{} already exists", path.display());
            }
        }
        ProfilesCommand::Path => println!("{}", profiles_path(args)?.display()),
    }
    Ok(ExitCode::SUCCESS)
}

async fn select_targets(
    runner: &impl CommandRunner,
    requested: &[String],
) -> Result<TargetSelection> {
    let inventory = list_adapters(runner).await?;
    let selection = if requested.is_empty() {
        select_all_up(&inventory)
    } else {
        select_named(&inventory, requested)
    };

    if selection.targets.is_empty() {
        warn!("No active adapters to change");
    }
    Ok(selection)
}

/// Sets an abort flag on Ctrl-C. The flag is only honoured between
/// commands, never in the middle of one.
fn abort_on_ctrl_c() -> Arc<AtomicBool> {
    let abort = Arc::new(AtomicBool::new(false));
    let flag = abort.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, skipping remaining commands");
            flag.store(true, Ordering::SeqCst);
        }
    });
    abort
}

async fn run_change(
    runner: &impl CommandRunner,
    intent: Intent,
    targets: &TargetArgs,
    as_json: bool,
) -> Result<ExitCode> {
    let selection = select_targets(runner, &targets.adapters).await?;

    if targets.dry_run {
        print_plan(&selection, &intent, as_json)?;
        return Ok(ExitCode::SUCCESS);
    }

    let abort = abort_on_ctrl_c();
    let report = dns::apply(runner, &selection, &intent, &abort).await;

    if targets.flush_cache
        && !abort.load(Ordering::SeqCst)
        && let Err(e) = dns::clear_dns_cache(runner).await
    {
        warn!("Failed to clear DNS cache: {}", e);
    }

    if as_json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn print_plan(selection: &TargetSelection, intent: &Intent, as_json: bool) -> Result<()> {
    let plans = plan(&selection.targets, intent);

    if as_json {
        let entries: Vec<_> = plans
            .iter()
            .map(|p| match &p.commands {
                Ok(commands) => json!({
                    "adapter": p.adapter,
                    "commands": commands
                        .iter()
                        .map(|spec| json!({ "spec": spec, "invocation": render(spec).to_string() }))
                        .collect::<Vec<_>>(),
                }),
                Err(reason) => json!({ "adapter": p.adapter, "error": reason }),
            })
            .collect();
        let skipped: Vec<_> = selection
            .skipped
            .iter()
            .map(|(name, reason)| json!({ "adapter": name, "skipped": reason }))
            .collect();
        return print_json(&json!({ "plans": entries, "skipped": skipped }));
    }

    for p in &plans {
        match &p.commands {
            Ok(commands) if commands.is_empty() => println!("{}: nothing to do", p.adapter),
            Ok(commands) => {
                println!("{}:", p.adapter);
                for spec in commands {
                    println!("  {}", render(spec));
                }
            }
            Err(reason) => println!("{}: rejected: {}", p.adapter, reason),
        }
    }
    for (name, reason) in &selection.skipped {
        println!("{}: skipped: {}", name, reason);
    }
    Ok(())
}

fn print_report(report: &Report) {
    if report.adapters.is_empty() {
        println!("No adapters changed");
        return;
    }

    for adapter in &report.adapters {
        match &adapter.reason {
            Some(reason) => println!("{}: {} ({})", adapter.adapter_name, adapter.outcome, reason),
            None => println!("{}: {}", adapter.adapter_name, adapter.outcome),
        }
        for detail in &adapter.details {
            let via = if detail.fallback { " (netsh)" } else { "" };
            if detail.succeeded {
                println!("  {} {:?}{}: ok", detail.family, detail.action, via);
            } else {
                println!(
                    "  {} {:?}{}: failed: {}",
                    detail.family,
                    detail.action,
                    via,
                    normalize_error_message(&detail.raw_output)
                );
            }
        }
    }
}

async fn run_status(
    runner: &impl CommandRunner,
    requested: &[String],
    as_json: bool,
) -> Result<ExitCode> {
    let selection = select_targets(runner, requested).await?;
    let mut entries = Vec::new();
    let mut all_ok = true;

    for adapter in &selection.targets {
        match get_current_dns(runner, adapter).await {
            Ok(state) => {
                if as_json {
                    entries.push(json!({ "adapter": adapter, "dns": state }));
                } else {
                    println!("{}", adapter);
                    for family in AddressFamily::ALL {
                        println!("  {}: {}", family, state.get_display(family));
                    }
                }
            }
            Err(e) => {
                all_ok = false;
                if as_json {
                    entries.push(json!({ "adapter": adapter, "error": e.to_string() }));
                } else {
                    println!("{}: {}", adapter, e);
                }
            }
        }
    }

    for (name, reason) in &selection.skipped {
        if as_json {
            entries.push(json!({ "adapter": name, "skipped": reason }));
        } else {
            println!("{}: skipped: {}", name, reason);
        }
    }

    if as_json {
        print_json(&entries)?;
    }

    Ok(if all_ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
