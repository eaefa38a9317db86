//! # Pruner Console
//!
//! Operator console for the notes pruner. Every scenario runs against the
//! in-memory collaborators, so the scheduler is simulated: pending jobs are
//! popped and dispatched one at a time, exactly as the host would invoke
//! them, just without the 30 second wait between batch ticks.
//!
//! ## Scenarios
//!
//! ```text
//! demo         queue a ledger, drain it batch by batch, compact, notify
//! restore      prune, let someone edit the page, then restore the backup
//! monitor      walk free space down past the threshold and back up
//! interactive  REPL over the same operations
//! ```

use std::io::{self, Write};

use clap::{Parser, Subcommand};
use colored::*;
use pruner_ledger::{FreeSpace, LedgerDocument, UsernotesUsers};
use pruner_sdk::{
    BatchOutcome, CompactionSummary, InMemoryCollaborators, JobOutcome, JobTrigger,
    MonitorOutcome, MonitoringSettings, NotesPruner, PrunerConfigBuilder, CHECK_USER_BATCH_JOB,
    MONITORING_JOB,
};
use serde_json::json;

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "pruner-console")]
#[command(about = "Usernotes pruner operator console (simulated collaborators)")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Full prune: intake, batch ticks, compaction and the completion notice
    Demo {
        /// Users in the ledger
        #[arg(long, default_value_t = 120)]
        users: usize,
        /// Every n-th user is suspended
        #[arg(long, default_value_t = 7)]
        every: usize,
        /// Usernames checked per tick
        #[arg(long, default_value_t = 50)]
        batch_size: usize,
    },
    /// Prune, edit the page behind the pruner's back, restore the backup
    Restore,
    /// Free-space monitor hysteresis across several daily ticks
    Monitor {
        /// Alert threshold in percent
        #[arg(long, default_value_t = 10)]
        threshold: i64,
    },
    /// Interactive REPL for manual experimentation
    Interactive,
}

// ─── Sandbox: a pruner wired to inspectable collaborators ─────────────────

struct Sandbox {
    pruner: NotesPruner,
    memory: InMemoryCollaborators,
}

impl Sandbox {
    fn new(batch_size: usize, max_page_size: usize) -> Self {
        let config = PrunerConfigBuilder::new()
            .community("modtools")
            .batch_size(batch_size)
            .max_page_size(max_page_size)
            .build();
        let (pruner, memory) = NotesPruner::in_memory(config);
        Self { pruner, memory }
    }

    fn page(&self) -> String {
        self.pruner.config().page_name.clone()
    }

    fn content(&self) -> Option<String> {
        self.memory.ledger.content(&self.page())
    }

    fn users(&self) -> UsernotesUsers {
        self.content()
            .and_then(|content| LedgerDocument::parse(&content).ok())
            .map(|doc| doc.users().clone())
            .unwrap_or_default()
    }

    fn space(&self) -> FreeSpace {
        let content = self.content().unwrap_or_default();
        FreeSpace::with_limit(&content, self.pruner.config().max_page_size)
    }

    /// Write the page as a moderator using the ledger tool would.
    fn write_users(&self, users: &UsernotesUsers) {
        let content = match self
            .content()
            .and_then(|content| LedgerDocument::parse(&content).ok())
        {
            Some(doc) => doc.render_with(users),
            None => LedgerDocument::build(6, users),
        };
        match content {
            Ok(content) => {
                self.memory.ledger.put_page(&self.page(), content);
            }
            Err(e) => println!("  {} could not encode ledger: {}", "!".bright_red(), e),
        }
    }

    fn add_note(&self, username: &str, text: &str) {
        let mut users = self.users();
        users.insert(
            username,
            json!({ "ns": [{ "n": text, "t": 1_700_000_000, "m": 0, "w": 0 }] }),
        );
        self.write_users(&users);
    }

    fn seed(&self, count: usize, every: usize) -> Vec<String> {
        let mut users = self.users();
        let mut suspended = Vec::new();
        for i in 0..count {
            let name = format!("user{:04}", i);
            if every > 0 && i % every == every - 1 {
                suspended.push(name.clone());
            }
            users.insert(name, json!({ "ns": [{ "n": "spam", "t": 1_700_000_000 }] }));
        }
        self.write_users(&users);
        self.memory.oracle.mark_unreachable(suspended.iter().cloned());
        suspended
    }

    /// Dispatch pending one-shot jobs until none are left.
    async fn drive(&self, verbose: bool) -> usize {
        let mut ticks = 0;
        while let Some(job) = self.memory.scheduler.pop_next() {
            ticks += 1;
            let outcome = self.pruner.run_job(&job.name).await;
            if verbose {
                show_outcome(&job.name, &outcome);
            }
        }
        ticks
    }
}

// ─── Pretty printing ──────────────────────────────────────────────────────

fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

fn section(text: &str) {
    println!("\n{} {}", "▸".bright_yellow(), text.bold());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

fn toast(text: &str) {
    println!("  {} {}", "»".bright_magenta(), text.italic());
}

fn show_outcome(job: &str, outcome: &JobOutcome) {
    let label = format!("[{}]", job).bright_blue();
    match outcome {
        JobOutcome::Batch(BatchOutcome::Processed {
            checked,
            prunable,
            remaining,
        }) => println!(
            "  {} checked {:>3}, prunable {:>3}, {} left in queue",
            label,
            checked,
            prunable.to_string().bright_red(),
            remaining
        ),
        JobOutcome::Batch(BatchOutcome::Drained(summary)) => match summary {
            CompactionSummary::NoChanges => {
                println!("  {} queue drained, {}", label, "no changes".dimmed())
            }
            CompactionSummary::Pruned {
                removed, stats, ..
            } => println!(
                "  {} queue drained, removed {} users ({} → {} chars)",
                label,
                removed.len().to_string().bright_red().bold(),
                stats.size_before,
                stats.size_after
            ),
        },
        JobOutcome::Batch(BatchOutcome::Skipped { stage }) => {
            println!("  {} skipped (stage {:?})", label, stage)
        }
        JobOutcome::Monitor(outcome) => println!("  {} {:?}", label, outcome),
        JobOutcome::Failed { error, rescheduled } => println!(
            "  {} {} {}{}",
            label,
            "failed:".bright_red(),
            error,
            if *rescheduled { " (rescheduled)" } else { "" }
        ),
        JobOutcome::Unknown(name) => println!("  {} unknown job {}", label, name),
    }
}

fn show_ledger(sandbox: &Sandbox) {
    let border = "─".repeat(44);
    let users = sandbox.users();
    let space = sandbox.space();

    println!("  ┌{}┐", border);
    println!(
        "  │ {:^42} │",
        format!("Ledger: {} users, {}% free", users.len(), space.percent())
            .bright_yellow()
            .to_string()
    );
    println!("  ├{}┤", border);
    if users.is_empty() {
        println!("  │ {:^42} │", "(no notes)".dimmed().to_string());
    } else {
        let names = users.usernames();
        for chunk in names.chunks(4).take(6) {
            println!("  │ {:<42} │", chunk.join("  "));
        }
        if names.len() > 24 {
            println!(
                "  │ {:<42} │",
                format!("… and {} more", names.len() - 24).dimmed().to_string()
            );
        }
    }
    println!("  └{}┘", border);
}

fn show_notifications(sandbox: &Sandbox) {
    for message in sandbox.memory.notifier.sent() {
        println!(
            "  {} to /u/{}: {}",
            "✉".bright_cyan(),
            message.recipient,
            message.subject.bold()
        );
        for line in message.body.lines().filter(|l| !l.is_empty()) {
            println!("      {}", line);
        }
    }
}

// ─── Demo ──────────────────────────────────────────────────────────────────

async fn run_demo(users: usize, every: usize, batch_size: usize) {
    header("DEMO — Prune a usernotes ledger");
    let sandbox = Sandbox::new(batch_size, pruner_ledger::MAX_WIKI_PAGE_SIZE);

    section("Phase 1: Seed the ledger");
    let suspended = sandbox.seed(users, every);
    step(&format!(
        "{} users with notes, {} of them suspended",
        users,
        suspended.len()
    ));
    if users > 2 {
        sandbox.memory.oracle.mark_failing(["user0001"]);
        step("user0001 lookups time out (kept, never pruned)");
    }
    show_ledger(&sandbox);

    section("Phase 2: Operator starts a prune");
    match sandbox.pruner.request_prune().await {
        Ok(request) => toast(&request.message()),
        Err(e) => return println!("  {} {}", "!".bright_red(), e),
    }
    match sandbox.pruner.confirm_prune().await {
        Ok(start) => toast(&start.message()),
        Err(e) => return println!("  {} {}", "!".bright_red(), e),
    }

    section("Phase 3: Scheduler ticks");
    if let Some(job) = sandbox.memory.scheduler.pop_next() {
        let outcome = sandbox.pruner.run_job(&job.name).await;
        show_outcome(&job.name, &outcome);
        if let Ok(report) = sandbox.pruner.progress().await {
            toast(&report.message());
        }
    }
    let ticks = sandbox.drive(true).await;
    step(&format!("{} more ticks until idle", ticks));

    section("Phase 4: Result");
    show_ledger(&sandbox);
    show_notifications(&sandbox);
    if let Ok(Some(backup)) = sandbox.pruner.backup().await {
        step(&format!(
            "backup holds {} chars, paired with revision {}",
            backup.raw_ledger_content.len(),
            backup.revision_id_after_prune.bright_white()
        ));
    }
}

// ─── Restore ───────────────────────────────────────────────────────────────

async fn run_restore() {
    header("RESTORE — Full-replace restore from the pre-prune backup");
    let sandbox = Sandbox::new(50, pruner_ledger::MAX_WIKI_PAGE_SIZE);

    section("Phase 1: Nothing to restore yet");
    match sandbox.pruner.request_restore().await {
        Ok(request) => toast(&request.message()),
        Err(e) => println!("  {} {}", "!".bright_red(), e),
    }

    section("Phase 2: Prune a small ledger");
    sandbox.seed(6, 3);
    show_ledger(&sandbox);
    if let Err(e) = sandbox.pruner.confirm_prune().await {
        return println!("  {} {}", "!".bright_red(), e);
    }
    sandbox.drive(true).await;
    show_ledger(&sandbox);

    section("Phase 3: Restore prompt while the page is untouched");
    match sandbox.pruner.request_restore().await {
        Ok(request) => toast(&request.message()),
        Err(e) => println!("  {} {}", "!".bright_red(), e),
    }

    section("Phase 4: A moderator adds a note, then we restore anyway");
    sandbox.add_note("newcomer", "first warning");
    step("newcomer gets a note");
    match sandbox.pruner.request_restore().await {
        Ok(request) => toast(&request.message()),
        Err(e) => println!("  {} {}", "!".bright_red(), e),
    }
    match sandbox.pruner.confirm_restore().await {
        Ok(outcome) => toast(&outcome.message()),
        Err(e) => println!("  {} {}", "!".bright_red(), e),
    }
    show_ledger(&sandbox);
    if !sandbox.users().contains("newcomer") {
        step(&format!(
            "{}",
            "newcomer's note was lost: restore replaces, it does not merge".bright_red()
        ));
    }
}

// ─── Monitor ───────────────────────────────────────────────────────────────

/// Note text that zlib cannot squeeze much, so each note costs page space.
fn noisy_text(seed: u64) -> String {
    let mut x = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    (0..6)
        .map(|_| {
            x ^= x >> 30;
            x = x.wrapping_mul(0xBF58_476D_1CE4_E5B9);
            x ^= x >> 27;
            format!("{:016x}", x)
        })
        .collect()
}

#[derive(Clone, Copy)]
enum Fill {
    Roomy,
    Tight,
}

async fn run_monitor(threshold: i64) {
    header("MONITOR — Low free-space alerting with hysteresis");
    // A small page budget so a handful of notes moves the percentage.
    let sandbox = Sandbox::new(50, 4_000);
    sandbox.memory.settings.set_monitoring(MonitoringSettings {
        enable_monitoring: true,
        monitoring_threshold: Some(threshold),
    });
    sandbox.write_users(&UsernotesUsers::new());
    step(&format!("threshold {}%, page budget 4000 chars", threshold));

    if let Ok(report) = sandbox.pruner.on_install_or_upgrade().await {
        step(&format!("install scheduled monitor job {}", report.monitor_job_id));
    }

    let days = [
        ("day 1", Fill::Roomy),
        ("day 2", Fill::Tight),
        ("day 3", Fill::Tight),
        ("day 4", Fill::Roomy),
        ("day 5", Fill::Tight),
    ];
    let mut next_user = 0u64;
    for (day, fill) in days {
        section(day);
        match fill {
            Fill::Tight => {
                while sandbox.space().percent() >= threshold && next_user < 10_000 {
                    sandbox.add_note(&format!("user{:04}", next_user), &noisy_text(next_user));
                    next_user += 1;
                }
            }
            Fill::Roomy => {
                let mut users = sandbox.users();
                while sandbox.space().percent() < threshold + 20 && !users.is_empty() {
                    users = users.iter().skip(1).map(|(n, v)| (n.clone(), v.clone())).collect();
                    sandbox.write_users(&users);
                }
            }
        }
        step(&format!(
            "{} users on the page, {}% free",
            sandbox.users().len(),
            sandbox.space().percent()
        ));

        let outcome = sandbox.pruner.run_job(MONITORING_JOB).await;
        show_outcome(MONITORING_JOB, &outcome);
        if let JobOutcome::Monitor(MonitorOutcome::AlertSent { .. }) = outcome {
            step(&"alert sent".bright_red().to_string());
        }
    }

    section("Alerts delivered");
    show_notifications(&sandbox);
}

// ─── Interactive ───────────────────────────────────────────────────────────

async fn run_interactive() {
    header("INTERACTIVE — Notes Pruner REPL");
    let sandbox = Sandbox::new(5, 8_000);
    sandbox.memory.settings.set_monitoring(MonitoringSettings {
        enable_monitoring: true,
        monitoring_threshold: None,
    });

    println!("\n  {}:", "Commands".bold());
    println!("    {} <user> [text]            Add a note", "note".bright_cyan());
    println!("    {} <n> [every]              Seed n users", "seed".bright_cyan());
    println!("    {} <user>                Mark a user suspended", "suspend".bright_cyan());
    println!("    {} <user>                   Make lookups of a user fail", "flaky".bright_cyan());
    println!("    {}                          Show the ledger", "show".bright_cyan());
    println!("    {}                         Request and confirm a prune", "prune".bright_cyan());
    println!("    {}                          Run the next scheduled job", "tick".bright_cyan());
    println!("    {}                           Run jobs until idle", "run".bright_cyan());
    println!("    {}                        Show stage and progress", "status".bright_cyan());
    println!("    {}                          List scheduled jobs", "jobs".bright_cyan());
    println!("    {}                       Request and confirm a restore", "restore".bright_cyan());
    println!("    {}                       Run the free-space check", "monitor".bright_cyan());
    println!("    {}                       Simulate an app upgrade", "upgrade".bright_cyan());
    println!("    {}                          Show notifications", "mail".bright_cyan());
    println!("    {}                          Exit", "quit".bright_cyan());
    println!();

    loop {
        print!("{}", "pruner> ".bright_cyan().bold());
        if io::stdout().flush().is_err() {
            break;
        }

        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_err() || input.is_empty() {
            break;
        }
        let parts: Vec<&str> = input.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        match parts[0] {
            "note" | "n" => {
                let Some(user) = parts.get(1) else {
                    println!("  {} Usage: note <user> [text]", "!".bright_red());
                    continue;
                };
                let text = if parts.len() > 2 { parts[2..].join(" ") } else { "note".to_string() };
                sandbox.add_note(user, &text);
                step(&format!("noted {}", user));
            }

            "seed" => {
                let count = parts.get(1).and_then(|s| s.parse().ok()).unwrap_or(10);
                let every = parts.get(2).and_then(|s| s.parse().ok()).unwrap_or(3);
                let suspended = sandbox.seed(count, every);
                step(&format!("seeded {} users, {} suspended", count, suspended.len()));
            }

            "suspend" => match parts.get(1) {
                Some(user) => {
                    sandbox.memory.oracle.mark_unreachable([*user]);
                    step(&format!("{} is now suspended", user));
                }
                None => println!("  {} Usage: suspend <user>", "!".bright_red()),
            },

            "flaky" => match parts.get(1) {
                Some(user) => {
                    sandbox.memory.oracle.mark_failing([*user]);
                    step(&format!("lookups of {} now fail", user));
                }
                None => println!("  {} Usage: flaky <user>", "!".bright_red()),
            },

            "show" | "s" => show_ledger(&sandbox),

            "prune" | "p" => match sandbox.pruner.request_prune().await {
                Ok(request) => {
                    toast(&request.message());
                    if let pruner_sdk::PruneRequest::ConfirmationRequired { .. } = request {
                        match sandbox.pruner.confirm_prune().await {
                            Ok(start) => toast(&start.message()),
                            Err(e) => toast(&e.to_string()),
                        }
                    }
                }
                Err(e) => toast(&e.to_string()),
            },

            "tick" | "t" => match sandbox.memory.scheduler.pop_next() {
                Some(job) => {
                    let outcome = sandbox.pruner.run_job(&job.name).await;
                    show_outcome(&job.name, &outcome);
                }
                None => println!("  {}", "(no pending jobs)".dimmed()),
            },

            "run" | "r" => {
                let ticks = sandbox.drive(true).await;
                step(&format!("{} ticks", ticks));
            }

            "status" => {
                match sandbox.pruner.stage().await {
                    Ok(Some(stage)) => step(&format!("stage: {}", stage.to_string().bright_yellow())),
                    Ok(None) => step("stage: idle"),
                    Err(e) => println!("  {} {}", "!".bright_red(), e),
                }
                if let Ok(Some(_)) = sandbox.pruner.stage().await {
                    if let Ok(report) = sandbox.pruner.progress().await {
                        toast(&report.message());
                    }
                }
            }

            "jobs" => {
                let jobs = sandbox.memory.scheduler.jobs();
                if jobs.is_empty() {
                    println!("  {}", "(no jobs)".dimmed());
                }
                for job in jobs {
                    let when = match &job.trigger {
                        JobTrigger::RunAt(at) => at.format("%H:%M:%S").to_string(),
                        JobTrigger::Cron(expr) => format!("cron {}", expr),
                    };
                    let name = if job.name == CHECK_USER_BATCH_JOB {
                        job.name.bright_green()
                    } else {
                        job.name.bright_white()
                    };
                    println!("  {} {} {}", name, when, job.id.dimmed());
                }
            }

            "restore" => match sandbox.pruner.request_restore().await {
                Ok(request) => {
                    toast(&request.message());
                    if let pruner_sdk::RestoreRequest::ConfirmationRequired { .. } = request {
                        match sandbox.pruner.confirm_restore().await {
                            Ok(outcome) => toast(&outcome.message()),
                            Err(e) => toast(&e.to_string()),
                        }
                    }
                }
                Err(e) => toast(&e.to_string()),
            },

            "monitor" | "m" => {
                let outcome = sandbox.pruner.run_job(MONITORING_JOB).await;
                show_outcome(MONITORING_JOB, &outcome);
            }

            "upgrade" => match sandbox.pruner.on_install_or_upgrade().await {
                Ok(report) => step(&format!(
                    "cancelled {} jobs, monitor job {}",
                    report.cancelled.len(),
                    report.monitor_job_id
                )),
                Err(e) => println!("  {} {}", "!".bright_red(), e),
            },

            "mail" => show_notifications(&sandbox),

            "quit" | "exit" | "q" => {
                println!("  {}", "Goodbye!".dimmed());
                break;
            }

            "help" | "h" | "?" => {
                println!("  note <u> [text] | seed <n> [every] | suspend <u> | flaky <u> | show");
                println!("  prune | tick | run | status | jobs | restore | monitor | upgrade | mail | quit");
            }

            other => {
                println!(
                    "  {} Unknown command '{}' — type 'help'",
                    "?".bright_yellow(),
                    other
                );
            }
        }
    }
}

// ─── Entry point ───────────────────────────────────────────────────────────

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Demo {
            users,
            every,
            batch_size,
        } => run_demo(users, every, batch_size.max(1)).await,
        Commands::Restore => run_restore().await,
        Commands::Monitor { threshold } => run_monitor(threshold).await,
        Commands::Interactive => run_interactive().await,
    }
}
