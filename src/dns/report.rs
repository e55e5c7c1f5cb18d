use crate::dns::commands::{
    build_adapter_commands, normalize_error_message, render, render_fallback,
};
use crate::dns::network::TargetSelection;
use crate::dns::runner::{CommandRunner, Invocation, ProcessOutput};
use crate::dns::types::{AdapterReport, CommandResult, CommandSpec, Intent, Outcome, Report};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Phrases that mark a failure even when the tool exits with status 0.
/// Compared case-insensitively.
const FAILURE_PHRASES: &[&str] = &[
    "the configured dns server is incorrect or does not exist",
    "the filename, directory name, or volume label syntax is incorrect",
    "the system cannot find the file specified",
    "element not found",
    "the requested operation requires elevation",
    "run as administrator",
    "access is denied",
    "is not a valid argument",
    "the parameter is incorrect",
    "there is no such interface",
    "no msft_netadapter objects found",
];

fn contains_failure_phrase(output: &str) -> bool {
    let lowered = output.to_lowercase();
    FAILURE_PHRASES.iter().any(|phrase| lowered.contains(phrase))
}

/// Turns the exit status and text of an executed command into a result.
/// Success needs a zero exit code and no known failure phrase.
pub fn classify(spec: &CommandSpec, exit_code: Option<i32>, output: &str) -> CommandResult {
    let succeeded = exit_code == Some(0) && !contains_failure_phrase(output);
    CommandResult {
        adapter_name: spec.adapter.clone(),
        family: spec.family,
        action: spec.action,
        succeeded,
        raw_output: output.to_string(),
        fallback: false,
    }
}

pub fn classify_output(spec: &CommandSpec, output: &ProcessOutput) -> CommandResult {
    classify(spec, output.code, &output.combined())
}

fn spawn_failure(spec: &CommandSpec, error: &std::io::Error) -> CommandResult {
    CommandResult {
        adapter_name: spec.adapter.clone(),
        family: spec.family,
        action: spec.action,
        succeeded: false,
        raw_output: format!("failed to start command: {}", error),
        fallback: false,
    }
}

/// Full when every planned command took effect (vacuously true for a no-op
/// profile), Partial when some did, Failed otherwise. A command whose
/// netsh retry succeeded counts as applied.
pub fn outcome_for(planned: usize, applied: usize) -> Outcome {
    if applied == planned {
        Outcome::Full
    } else if applied > 0 {
        Outcome::Partial
    } else {
        Outcome::Failed
    }
}

/// The commands one adapter needs, or the reason it was rejected.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AdapterPlan {
    pub adapter: String,
    pub commands: std::result::Result<Vec<CommandSpec>, String>,
}

/// Builds per-adapter plans so an invalid name only affects its own adapter.
pub fn plan(targets: &[String], intent: &Intent) -> Vec<AdapterPlan> {
    targets
        .iter()
        .map(|adapter| AdapterPlan {
            adapter: adapter.clone(),
            commands: build_adapter_commands(adapter, intent).map_err(|e| e.to_string()),
        })
        .collect()
}

async fn run_command(
    runner: &impl CommandRunner,
    spec: &CommandSpec,
    invocation: &Invocation,
) -> CommandResult {
    match runner.run(invocation).await {
        Ok(output) => classify_output(spec, &output),
        Err(e) => spawn_failure(spec, &e),
    }
}

fn log_failure(result: &CommandResult) {
    warn!(
        adapter = %result.adapter_name,
        family = %result.family,
        fallback = result.fallback,
        "command failed: {}",
        normalize_error_message(&result.raw_output)
    );
}

/// Retries a failed set through its netsh steps, stopping at the first
/// step that fails. Every step is recorded in `details`. Returns whether
/// all steps ran and succeeded.
async fn run_fallback(
    runner: &impl CommandRunner,
    spec: &CommandSpec,
    steps: &[Invocation],
    abort: &AtomicBool,
    details: &mut Vec<CommandResult>,
) -> bool {
    info!(adapter = %spec.adapter, family = %spec.family, "retrying with netsh");

    for step in steps {
        if abort.load(Ordering::SeqCst) {
            return false;
        }
        let mut result = run_command(runner, spec, step).await;
        result.fallback = true;
        let succeeded = result.succeeded;
        if !succeeded {
            log_failure(&result);
        }
        details.push(result);
        if !succeeded {
            return false;
        }
    }
    true
}

/// Runs the plans one command at a time. A failing adapter never stops the
/// others. `abort` is checked between commands; once set, nothing further
/// is started and untouched adapters are reported as skipped.
pub async fn execute(
    runner: &impl CommandRunner,
    plans: &[AdapterPlan],
    abort: &AtomicBool,
) -> Vec<AdapterReport> {
    let mut reports = Vec::with_capacity(plans.len());

    for plan in plans {
        let commands = match &plan.commands {
            Ok(commands) => commands,
            Err(reason) => {
                warn!(adapter = %plan.adapter, "{}", reason);
                reports.push(AdapterReport::rejected(&plan.adapter, reason));
                continue;
            }
        };

        let mut details = Vec::with_capacity(commands.len());
        let mut applied = 0;
        for spec in commands {
            if abort.load(Ordering::SeqCst) {
                break;
            }

            let result = run_command(runner, spec, &render(spec)).await;
            let mut succeeded = result.succeeded;
            if !succeeded {
                log_failure(&result);
            }
            details.push(result);

            if !succeeded {
                let steps = render_fallback(spec);
                if !steps.is_empty() {
                    succeeded = run_fallback(runner, spec, &steps, abort, &mut details).await;
                }
            }
            if succeeded {
                applied += 1;
            }
        }

        let report = if details.is_empty() && !commands.is_empty() {
            AdapterReport::skipped(&plan.adapter, "aborted")
        } else {
            AdapterReport {
                adapter_name: plan.adapter.clone(),
                outcome: outcome_for(commands.len(), applied),
                reason: None,
                details,
            }
        };
        info!(adapter = %report.adapter_name, outcome = %report.outcome, "adapter processed");
        reports.push(report);
    }

    reports
}

/// Plans and executes `intent` on the selected adapters and returns the
/// consolidated report: executed adapters first, then the skipped ones.
pub async fn apply(
    runner: &impl CommandRunner,
    selection: &TargetSelection,
    intent: &Intent,
    abort: &AtomicBool,
) -> Report {
    let plans = plan(&selection.targets, intent);
    let mut adapters = execute(runner, &plans, abort).await;

    for (name, reason) in &selection.skipped {
        info!(adapter = %name, "skipped: {}", reason);
        adapters.push(AdapterReport::skipped(name, reason));
    }

    Report { adapters }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::runner::tests_utils::{FakeRunner, exit, not_found, ok};
    use crate::dns::types::{Action, AddressFamily, DnsProfile};

    fn spec(adapter: &str, family: AddressFamily) -> CommandSpec {
        CommandSpec {
            adapter: adapter.to_string(),
            family,
            action: Action::SetStatic,
            addresses: vec!["1.1.1.1".to_string()],
        }
    }

    fn selection(targets: &[&str]) -> TargetSelection {
        TargetSelection {
            targets: targets.iter().map(|t| t.to_string()).collect(),
            skipped: Vec::new(),
        }
    }

    fn cloudflare() -> Intent {
        Intent::SetProfile(DnsProfile::new(
            "Cloudflare",
            &["1.1.1.1", "1.0.0.1"],
            &["2606:4700:4700::1111", "2606:4700:4700::1001"],
        ))
    }

    #[test]
    fn test_classify_exit_status() {
        let s = spec("Ethernet", AddressFamily::IPv4);
        assert!(classify(&s, Some(0), "").succeeded);
        assert!(!classify(&s, Some(1), "").succeeded);
        assert!(!classify(&s, None, "").succeeded);

        let result = classify(&s, Some(0), "Ok.");
        assert_eq!(result.adapter_name, "Ethernet");
        assert_eq!(result.family, AddressFamily::IPv4);
        assert_eq!(result.action, Action::SetStatic);
        assert_eq!(result.raw_output, "Ok.");
    }

    #[test]
    fn test_classify_failure_phrase_on_success_status() {
        let s = spec("Ethernet", AddressFamily::IPv4);
        let result = classify(
            &s,
            Some(0),
            "The configured DNS server is incorrect or does not exist.",
        );
        assert!(!result.succeeded);
        assert!(!classify(&s, Some(0), "ELEMENT NOT FOUND.").succeeded);
    }

    #[test]
    fn test_outcome_for() {
        assert_eq!(outcome_for(2, 2), Outcome::Full);
        assert_eq!(outcome_for(2, 1), Outcome::Partial);
        assert_eq!(outcome_for(2, 0), Outcome::Failed);
        assert_eq!(outcome_for(0, 0), Outcome::Full);
    }

    #[tokio::test]
    async fn test_one_family_failure_is_partial() {
        let runner = FakeRunner::succeeding().on(
            "-InterfaceAlias 'Wi-Fi' -ServerAddresses @('2606",
            exit(1, "Set-DnsClientServerAddress : The parameter is incorrect."),
        );
        let abort = AtomicBool::new(false);
        let report = apply(&runner, &selection(&["Ethernet", "Wi-Fi"]), &cloudflare(), &abort).await;

        assert_eq!(runner.call_count(), 4);
        assert_eq!(report.adapters.len(), 2);
        assert_eq!(report.find("Ethernet").map(|a| a.outcome), Some(Outcome::Full));
        let wifi = report.find("Wi-Fi").expect("wi-fi reported");
        assert_eq!(wifi.outcome, Outcome::Partial);
        assert!(wifi.details[0].succeeded);
        assert!(!wifi.details[1].succeeded);
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_invalid_name_does_not_affect_others() {
        let runner = FakeRunner::succeeding();
        let abort = AtomicBool::new(false);
        let report = apply(
            &runner,
            &selection(&["Ethernet", "Wi-Fi & del *", "VPN"]),
            &Intent::Revert,
            &abort,
        )
        .await;

        assert_eq!(runner.call_count(), 4);
        assert!(runner.rendered_calls().iter().all(|c| !c.contains("del *")));
        let bad = report.find("Wi-Fi & del *").expect("reported");
        assert_eq!(bad.outcome, Outcome::Failed);
        assert!(bad.details.is_empty());
        assert!(bad.reason.as_deref().is_some_and(|r| r.contains("Invalid adapter name")));
        assert_eq!(report.find("Ethernet").map(|a| a.outcome), Some(Outcome::Full));
        assert_eq!(report.find("VPN").map(|a| a.outcome), Some(Outcome::Full));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_recorded() {
        let runner = FakeRunner::succeeding().on("ipv4", not_found());
        let abort = AtomicBool::new(false);
        let report = apply(&runner, &selection(&["Ethernet"]), &Intent::Revert, &abort).await;

        let ethernet = report.find("Ethernet").expect("reported");
        assert_eq!(ethernet.outcome, Outcome::Partial);
        assert!(ethernet.details[0].raw_output.starts_with("failed to start command"));
        assert!(ethernet.details[1].succeeded);
    }

    #[tokio::test]
    async fn test_all_commands_fail() {
        let runner = FakeRunner::new().on("netsh", exit(1, "Access is denied."));
        let abort = AtomicBool::new(false);
        let report = apply(&runner, &selection(&["Ethernet"]), &Intent::Revert, &abort).await;
        assert_eq!(report.find("Ethernet").map(|a| a.outcome), Some(Outcome::Failed));
    }

    #[tokio::test]
    async fn test_noop_profile_runs_nothing() {
        let runner = FakeRunner::new();
        let abort = AtomicBool::new(false);
        let intent = Intent::SetProfile(DnsProfile::new("Empty", &[], &[]));
        let report = apply(&runner, &selection(&["Ethernet"]), &intent, &abort).await;
        assert_eq!(runner.call_count(), 0);
        assert_eq!(report.find("Ethernet").map(|a| a.outcome), Some(Outcome::Full));
    }

    #[tokio::test]
    async fn test_abort_skips_remaining() {
        let runner = FakeRunner::succeeding();
        let abort = AtomicBool::new(true);
        let report = apply(&runner, &selection(&["Ethernet", "Wi-Fi"]), &Intent::Revert, &abort).await;
        assert_eq!(runner.call_count(), 0);
        assert!(report.adapters.iter().all(|a| a.outcome == Outcome::Skipped));
        assert_eq!(report.adapters[0].reason.as_deref(), Some("aborted"));
    }

    #[tokio::test]
    async fn test_skipped_adapters_are_appended() {
        let runner = FakeRunner::succeeding();
        let abort = AtomicBool::new(false);
        let mut targets = selection(&["Ethernet"]);
        targets
            .skipped
            .push(("Wi-Fi".to_string(), "not up (Disconnected)".to_string()));
        let report = apply(&runner, &targets, &Intent::Revert, &abort).await;

        assert_eq!(report.adapters.len(), 2);
        assert_eq!(report.adapters[1].adapter_name, "Wi-Fi");
        assert_eq!(report.adapters[1].outcome, Outcome::Skipped);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_commands_run_in_order() {
        let runner = FakeRunner::succeeding();
        let abort = AtomicBool::new(false);
        apply(&runner, &selection(&["Ethernet", "Wi-Fi"]), &Intent::Revert, &abort).await;
        let calls = runner.rendered_calls();
        assert_eq!(calls.len(), 4);
        assert!(calls[0].contains("ipv4") && calls[0].contains("name=Ethernet"));
        assert!(calls[1].contains("ipv6") && calls[1].contains("name=Ethernet"));
        assert!(calls[2].contains("ipv4") && calls[2].contains("name=Wi-Fi"));
        assert!(calls[3].contains("ipv6") && calls[3].contains("name=Wi-Fi"));
    }

    #[tokio::test]
    async fn test_ok_output_with_text() {
        let runner = FakeRunner::new().on("netsh", ok("Ok.\r\n"));
        let abort = AtomicBool::new(false);
        let report = apply(&runner, &selection(&["Ethernet"]), &Intent::Revert, &abort).await;
        let ethernet = report.find("Ethernet").expect("reported");
        assert_eq!(ethernet.outcome, Outcome::Full);
        assert_eq!(ethernet.details[0].raw_output, "Ok.");
    }

    #[tokio::test]
    async fn test_failed_ipv4_set_retries_with_netsh() {
        let runner = FakeRunner::succeeding().on(
            "Set-DnsClientServerAddress -InterfaceAlias 'Ethernet' -ServerAddresses @('1.1.1.1'",
            exit(1, "Set-DnsClientServerAddress : No MSFT_DNSClientServerAddress objects found"),
        );
        let abort = AtomicBool::new(false);
        let report = apply(&runner, &selection(&["Ethernet"]), &cloudflare(), &abort).await;

        let calls = runner.rendered_calls();
        assert_eq!(calls.len(), 5);
        assert!(calls[0].contains("Set-DnsClientServerAddress"));
        assert_eq!(calls[1], "netsh interface ipv4 set dnsservers name=Ethernet source=dhcp");
        assert_eq!(
            calls[2],
            "netsh interface ipv4 set dnsservers name=Ethernet static 1.1.1.1 primary"
        );
        assert_eq!(calls[3], "netsh interface ipv4 add dnsservers name=Ethernet 1.0.0.1 index=2");
        assert!(calls[4].contains("@('2606:4700:4700::1111'"));

        let ethernet = report.find("Ethernet").expect("reported");
        assert_eq!(ethernet.outcome, Outcome::Full);
        assert_eq!(ethernet.details.len(), 5);
        assert!(!ethernet.details[0].succeeded);
        assert!(!ethernet.details[0].fallback);
        assert!(ethernet.details[1..4].iter().all(|d| d.fallback && d.succeeded));
        assert!(!ethernet.details[4].fallback);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_failed_netsh_retry_stops_at_first_failure() {
        let runner = FakeRunner::succeeding()
            .on("-InterfaceAlias 'Ethernet' -ServerAddresses @('1.1.1.1'", exit(1, "failed"))
            .on("static 1.1.1.1 primary", exit(1, "The parameter is incorrect."));
        let abort = AtomicBool::new(false);
        let report = apply(&runner, &selection(&["Ethernet"]), &cloudflare(), &abort).await;

        // PowerShell IPv4, netsh dhcp, netsh primary, PowerShell IPv6
        assert_eq!(runner.call_count(), 4);
        assert!(runner.rendered_calls().iter().all(|c| !c.contains("index=")));
        let ethernet = report.find("Ethernet").expect("reported");
        assert_eq!(ethernet.outcome, Outcome::Partial);
        assert_eq!(ethernet.details.iter().filter(|d| d.fallback).count(), 2);
    }

    #[tokio::test]
    async fn test_ipv6_set_failure_has_no_retry() {
        let runner = FakeRunner::succeeding().on("@('2606", exit(1, "failed"));
        let abort = AtomicBool::new(false);
        let report = apply(&runner, &selection(&["Ethernet"]), &cloudflare(), &abort).await;

        assert_eq!(runner.call_count(), 2);
        let ethernet = report.find("Ethernet").expect("reported");
        assert_eq!(ethernet.outcome, Outcome::Partial);
        assert!(ethernet.details.iter().all(|d| !d.fallback));
    }

    /// Delegates to a [`FakeRunner`] and raises `abort` once the given
    /// number of commands has run.
    struct AbortAfter<'a> {
        inner: FakeRunner,
        abort: &'a AtomicBool,
        after: usize,
    }

    impl CommandRunner for AbortAfter<'_> {
        async fn run(&self, invocation: &Invocation) -> std::io::Result<ProcessOutput> {
            let output = self.inner.run(invocation).await;
            if self.inner.call_count() >= self.after {
                self.abort.store(true, Ordering::SeqCst);
            }
            output
        }
    }

    #[tokio::test]
    async fn test_abort_mid_adapter_is_partial_and_skips_the_rest() {
        let abort = AtomicBool::new(false);
        let runner = AbortAfter {
            inner: FakeRunner::succeeding(),
            abort: &abort,
            after: 1,
        };
        let report = apply(&runner, &selection(&["Ethernet", "Wi-Fi"]), &Intent::Revert, &abort).await;

        assert_eq!(runner.inner.call_count(), 1);
        let ethernet = report.find("Ethernet").expect("reported");
        assert_eq!(ethernet.outcome, Outcome::Partial);
        assert_eq!(ethernet.reason, None);
        assert_eq!(ethernet.details.len(), 1);

        let wifi = report.find("Wi-Fi").expect("reported");
        assert_eq!(wifi.outcome, Outcome::Skipped);
        assert_eq!(wifi.reason.as_deref(), Some("aborted"));
        assert!(wifi.details.is_empty());
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_abort_between_adapters() {
        let abort = AtomicBool::new(false);
        let runner = AbortAfter {
            inner: FakeRunner::succeeding(),
            abort: &abort,
            after: 2,
        };
        let report = apply(&runner, &selection(&["Ethernet", "Wi-Fi"]), &Intent::Revert, &abort).await;

        assert_eq!(runner.inner.call_count(), 2);
        assert_eq!(report.find("Ethernet").map(|a| a.outcome), Some(Outcome::Full));
        assert_eq!(report.find("Wi-Fi").map(|a| a.outcome), Some(Outcome::Skipped));
        assert!(report.is_success());
    }
}
