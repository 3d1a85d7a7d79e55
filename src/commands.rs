// src/commands.rs

//! Command handlers for the Shelly CLI
//!
//! Three ways to run an operation:
//! - directly in this process (`run_direct`), answering questions on the
//!   terminal, automatically, or over the sideband channel when this
//!   process is itself a sideband child
//! - through a privileged structured worker (`run_rpc`)
//! - through a privileged sideband child (`run_sideband`)

use crate::cli::{Cli, Commands};
use anyhow::{Context, Result, bail};
use dialoguer::{Confirm, Password, Select};
use shelly::alpm::AlpmConnector;
use shelly::callback::{CallbackRelay, Question, question_bridge};
use shelly::progress::{self, CliProgress, LogProgress, ProgressReporter};
use shelly::relay::sideband::{self, Decision, Prompt, SidebandPrompter};
use shelly::relay::client::reap;
use shelly::relay::{ElevatedWorker, Elevation, Worker, auth, relay_for};
use shelly::session::Connector;
use shelly::{ClientConfig, PackageInfo, SyncClient, TransactionOutcome, UpdateInfo};
use std::io::{self, BufReader};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Who answers native questions in a direct run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answering {
    /// Prompt on the terminal
    Interactive,
    /// Keep the native defaults
    Automatic,
    /// Relay to the parent over tagged stderr lines
    Sideband,
}

// =============================================================================
// Shared operation dispatch
// =============================================================================

fn outcome_message(action: &str, outcome: TransactionOutcome) -> String {
    match outcome {
        TransactionOutcome::Committed => format!("{action} complete"),
        TransactionOutcome::NothingToDo => "there is nothing to do".to_string(),
    }
}

fn print_outcome(action: &str, outcome: TransactionOutcome) {
    println!("{}", outcome_message(action, outcome));
}

fn print_updates(updates: &[UpdateInfo]) {
    if updates.is_empty() {
        println!("All packages are up to date");
        return;
    }
    for update in updates {
        println!(
            "{} {} -> {} [{}]",
            update.name, update.current_version, update.new_version, update.repository
        );
    }
}

fn print_installed(packages: &[PackageInfo]) {
    for package in packages {
        println!("{} {}", package.name, package.version);
    }
    println!("\nTotal: {} package(s)", packages.len());
}

fn print_info(package: &PackageInfo) {
    println!("Repository     : {}", package.repository);
    println!("Name           : {}", package.name);
    println!("Version        : {}", package.version);
    println!(
        "Description    : {}",
        package.description.as_deref().unwrap_or("None")
    );
    println!("URL            : {}", package.url.as_deref().unwrap_or("None"));
    if !package.replaces.is_empty() {
        println!("Replaces       : {}", package.replaces.join("  "));
    }
    println!("Download Size  : {:.2} KiB", package.size as f64 / 1024.0);
}

/// Run one command against an in-process sync client
fn execute<C: Connector>(client: &mut SyncClient<C>, command: &Commands) -> Result<()> {
    client.initialize()?;
    match command {
        Commands::Sync { force } => {
            client.sync(*force)?;
            println!("Package databases synchronized");
        }
        Commands::Install { package } => print_outcome("Installation", client.install(package)?),
        Commands::Remove { package } => print_outcome("Removal", client.remove(package)?),
        Commands::Upgrade => print_outcome("System upgrade", client.update_all()?),
        Commands::Updates => print_updates(&client.packages_needing_update()?),
        Commands::List => print_installed(&client.installed_packages()?),
        Commands::Info { package } => print_info(&client.find_package(package)?),
        Commands::Worker => bail!("the worker command cannot run as an operation"),
    }
    client.shutdown();
    Ok(())
}

// =============================================================================
// Interactive answers
// =============================================================================

fn ask_on_terminal(question: &Question) -> Result<i32> {
    if question.is_selection() {
        let index = Select::new()
            .with_prompt(&question.prompt)
            .items(&question.providers)
            .default(usize::try_from(question.default_answer).unwrap_or(0))
            .interact()
            .context("Failed to show provider selection")?;
        Ok(i32::try_from(index)?)
    } else {
        let yes = Confirm::new()
            .with_prompt(&question.prompt)
            .default(question.default_answer != 0)
            .interact()
            .context("Failed to show confirmation")?;
        Ok(i32::from(yes))
    }
}

fn decide_on_terminal(prompt: &Prompt) -> Result<Decision> {
    match prompt {
        Prompt::YesNo { text } => {
            let yes = Confirm::new().with_prompt(text).default(true).interact()?;
            Ok(if yes { Decision::Yes } else { Decision::No })
        }
        Prompt::SelectProvider { name, options } => {
            let index = Select::new()
                .with_prompt(format!("There are {} providers available for {name}", options.len()))
                .items(options)
                .default(0)
                .interact()?;
            Ok(Decision::Index(index))
        }
    }
}

fn read_secret(elevation: &Elevation) -> Result<Option<Zeroizing<String>>> {
    if !elevation.needs_secret() {
        return Ok(None);
    }
    let secret = Password::new()
        .with_prompt("[sudo] password")
        .interact()
        .context("Failed to read password")?;
    Ok(Some(Zeroizing::new(secret)))
}

// =============================================================================
// Direct
// =============================================================================

/// Run the command in this process
pub fn run_direct(config: ClientConfig, command: &Commands, answering: Answering) -> Result<()> {
    match answering {
        Answering::Sideband => {
            let reporter: Arc<dyn ProgressReporter> = Arc::new(LogProgress::new());
            let prompter = SidebandPrompter::stdio();
            let relay = progress::attach(CallbackRelay::new(), reporter)
                .on_question(move |question| prompter.ask(question));
            let mut client = SyncClient::new(AlpmConnector, config, relay);
            execute(&mut client, command)
        }
        Answering::Automatic => {
            let reporter: Arc<dyn ProgressReporter> = Arc::new(CliProgress::new());
            let relay = progress::attach(CallbackRelay::new(), Arc::clone(&reporter));
            let mut client = SyncClient::new(AlpmConnector, config, relay);
            let result = execute(&mut client, command);
            reporter.finish();
            result
        }
        Answering::Interactive => run_interactive(config, command.clone()),
    }
}

/// Run the operation on a worker thread while this thread owns the terminal
fn run_interactive(config: ClientConfig, command: Commands) -> Result<()> {
    let bars = Arc::new(CliProgress::new());
    let (ask, questions) = question_bridge();
    let relay = progress::attach(CallbackRelay::new(), bars.clone()).on_question(ask);

    let operation = thread::spawn(move || {
        let mut client = SyncClient::new(AlpmConnector, config, relay);
        execute(&mut client, &command)
    });

    // Ends once the client, and with it the question handler, is dropped
    for pending in questions {
        match bars.suspend(|| ask_on_terminal(&pending.question)) {
            Ok(answer) => pending.answer(answer),
            Err(e) => {
                warn!("Using the default answer: {}", e);
                pending.answer_default();
            }
        }
    }

    let result = operation
        .join()
        .map_err(|_| anyhow::anyhow!("operation thread panicked"))?;
    bars.finish();
    result
}

// =============================================================================
// Worker
// =============================================================================

/// Serve the structured protocol on stdin/stdout
pub fn cmd_worker(config: ClientConfig) -> Result<()> {
    info!("Worker started");
    let writer = Arc::new(Mutex::new(io::stdout()));
    let client = SyncClient::new(AlpmConnector, config, relay_for(Arc::clone(&writer)));
    Worker::new(client).serve(io::stdin().lock(), &writer)?;
    info!("Worker finished");
    Ok(())
}

// =============================================================================
// Elevated
// =============================================================================

/// Run the command through a privileged structured worker
pub fn run_rpc(cli: &Cli, command: &Commands) -> Result<()> {
    let elevation = Elevation::detect()?;
    let secret = read_secret(&elevation)?;
    let program = std::env::current_exe().context("Failed to locate the shelly executable")?;
    let args = cli.child_args(None, &Commands::Worker);

    let bars = Arc::new(CliProgress::new());
    let relay = progress::attach(CallbackRelay::new(), bars.clone());
    let mut worker = ElevatedWorker::spawn(&elevation, &program, &args, secret.as_ref())?
        .on_event(move |record| match record.decode() {
            Ok(event) => {
                relay.dispatch(&event);
            }
            Err(e) => warn!("Ignoring malformed worker event: {}", e),
        });
    drop(secret);

    let result = (|| -> Result<()> {
        let client = worker.client();
        client.initialize()?;
        match command {
            Commands::Sync { force } => {
                client.sync(*force)?;
                println!("Package databases synchronized");
            }
            Commands::Install { package } => {
                client.install(package)?;
                println!("Installation complete");
            }
            Commands::Remove { package } => {
                client.remove(package)?;
                println!("Removal complete");
            }
            Commands::Upgrade => {
                client.update_all()?;
                println!("System upgrade complete");
            }
            Commands::Updates => print_updates(&client.packages_needing_update()?),
            Commands::List => print_installed(&client.installed_packages()?),
            Commands::Info { .. } | Commands::Worker => {
                bail!("this command is not available through the worker")
            }
        }
        Ok(())
    })();

    bars.finish();
    worker.shutdown()?;
    result
}

/// Run the command in a privileged sideband child
pub fn run_sideband(cli: &Cli, command: &Commands) -> Result<()> {
    let elevation = Elevation::detect()?;
    let secret = read_secret(&elevation)?;
    let program = std::env::current_exe().context("Failed to locate the shelly executable")?;
    let args = cli.child_args(Some("--sideband"), command);

    let mut child = auth::spawn_elevated(
        &elevation,
        &program,
        &args,
        Stdio::inherit(),
        Stdio::piped(),
        secret.as_ref(),
    )?;
    drop(secret);

    let (Some(mut input), Some(errors)) = (child.stdin.take(), child.stderr.take()) else {
        let status = reap(&mut child);
        bail!("sideband child pipes are missing ({status})");
    };

    let noconfirm = cli.noconfirm;
    let driven = sideband::drive(BufReader::new(errors), &mut input, &mut io::stderr(), |prompt| {
        if noconfirm {
            return Decision::automatic(prompt);
        }
        decide_on_terminal(prompt).unwrap_or_else(|e| {
            warn!("Answering automatically: {}", e);
            Decision::automatic(prompt)
        })
    });
    drop(input);

    if let Err(e) = driven {
        let status = reap(&mut child);
        return Err(e).with_context(|| format!("sideband child stopped ({status})"));
    }
    let status = child.wait()?;
    if !status.success() {
        bail!("privileged operation failed ({status})");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_messages() {
        assert_eq!(
            outcome_message("Installation", TransactionOutcome::Committed),
            "Installation complete"
        );
        assert_eq!(
            outcome_message("System upgrade", TransactionOutcome::NothingToDo),
            "there is nothing to do"
        );
    }
}
