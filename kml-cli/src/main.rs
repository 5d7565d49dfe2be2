//! `kml`: the first-party CLI surface over the session orchestrator (A4).
//!
//! A thin `clap`-derived binary layered directly over the library crates;
//! every library crate remains usable standalone by any other caller. The
//! interactive credential prompt, the `.env`/YAML config reader, and the
//! terminal command parser from the original system are out of scope (§1) —
//! this binary reads its configuration from the environment variables
//! documented in §6 instead.

mod config;
mod progress;

use std::collections::BTreeMap;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use kml_ai_runner::OutputRecord;
use kml_catalog::SessionCatalog;
use kml_core::error::{KmlError, Result};
use kml_core::recipe::{BuildRecipe, RailsRuntimeRecipe};
use kml_edge_client::EdgeClient;
use kml_orchestrator::{InstallStep, LifecycleEvent, Orchestrator, SessionConfig};
use kml_sandbox_client::SandboxProviderClient;
use kml_sandbox_manager::SandboxManager;

use config::EnvConfig;
use progress::Marker;

#[derive(Parser)]
#[command(name = "kml", about = "Provision and drive ephemeral AI coding sandboxes")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the service's base snapshot if it doesn't already exist.
    Deploy,
    /// Tear down every session and forget them, leaving the base snapshot intact.
    Destroy,
    /// Unconditionally rebuild the base snapshot.
    Snapshot,
    /// Delete the base snapshot, if present.
    SnapshotDelete,
    /// Session lifecycle and interaction commands.
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },
}

#[derive(Subcommand)]
enum SessionCommand {
    /// Create a catalog record and start a fresh sandbox for `slug`.
    New { slug: String },
    /// Send a prompt to the session's coding assistant.
    Prompt {
        slug: String,
        text: String,
        #[arg(short, long)]
        resume: Option<String>,
    },
    /// Print one session, or every session if `slug` is omitted.
    List { slug: Option<String> },
    /// Stop the session's sandbox.
    Stop { slug: String },
    /// Tear down and forget a session.
    Delete { slug: String },
    /// Print each process's `overmind` status.
    Ps { slug: String },
    /// Restart one named process under `overmind`.
    Restart { slug: String, process: String },
    /// Print (optionally follow) a process's captured output.
    Logs {
        slug: String,
        process: String,
        #[arg(short, long)]
        follow: bool,
        #[arg(short = 'n', long, default_value_t = 100)]
        lines: u32,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            progress::error(&err.to_string());
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<()> {
    let env = EnvConfig::from_env()?;
    let service_name = config::service_name_from_cwd()?;
    let catalog = SessionCatalog::at_cwd(std::env::current_dir()?);
    let provider = SandboxProviderClient::new(&env.daytona_api_url, &env.daytona_api_key);

    match command {
        Command::Deploy => {
            let edge = edge_client(&env)?;
            let manager = SandboxManager::new(&provider, &edge, &service_name);
            manager.deploy(&RailsRuntimeRecipe).await?;
            progress::step(&format!("deploy base snapshot for {service_name}"), Marker::Done);
            Ok(())
        }
        Command::Snapshot => {
            let edge = edge_client(&env)?;
            let manager = SandboxManager::new(&provider, &edge, &service_name);
            manager.snapshot_create(&RailsRuntimeRecipe).await?;
            progress::step(&format!("rebuild base snapshot for {service_name}"), Marker::Done);
            Ok(())
        }
        Command::SnapshotDelete => {
            let edge = edge_client(&env)?;
            let manager = SandboxManager::new(&provider, &edge, &service_name);
            manager.snapshot_delete().await?;
            progress::step(&format!("delete base snapshot for {service_name}"), Marker::Done);
            Ok(())
        }
        Command::Destroy => {
            let edge = edge_client(&env)?;
            let (_, _, _, domain) = env.cloudflare()?;
            let manager = SandboxManager::new(&provider, &edge, &service_name);
            manager
                .destroy(&catalog, &domain, |slug| {
                    catalog.delete(slug)?;
                    progress::step(&format!("destroy session {slug}"), Marker::Done);
                    Ok(())
                })
                .await?;
            Ok(())
        }
        Command::Session { command } => session_command(command, &env, &service_name, &catalog, &provider).await,
    }
}

fn edge_client(env: &EnvConfig) -> Result<EdgeClient> {
    let (token, account_id, zone_id, _domain) = env.cloudflare()?;
    Ok(EdgeClient::new("https://api.cloudflare.com/client/v4", token, account_id, zone_id))
}

async fn session_command(
    command: SessionCommand,
    env: &EnvConfig,
    service_name: &str,
    catalog: &SessionCatalog,
    provider: &SandboxProviderClient,
) -> Result<()> {
    match command {
        SessionCommand::New { slug } => {
            let record = catalog.create(&slug)?;
            progress::step(&format!("create catalog record for {slug}"), Marker::Done);

            let edge = edge_client(env)?;
            let (_, _, _, domain) = env.cloudflare()?;
            let orchestrator = Orchestrator::new(provider, &edge, catalog);

            let mut session_config = SessionConfig::new(&slug, service_name, &domain).with_resume_state(&record);
            session_config.git_repo = env.git_repo_url.clone();
            session_config.git_token = env.github_token.clone();
            let recipe = RailsRuntimeRecipe;
            session_config.install = recipe.default_install().into_iter().map(InstallStep::Command).collect();
            session_config.processes = recipe.default_processes();

            let catalog_for_events = catalog;
            let slug_for_events = slug.clone();
            let result = orchestrator
                .start(&session_config, |event| handle_lifecycle_event(catalog_for_events, &slug_for_events, event))
                .await;

            match result {
                Ok(()) => {
                    progress::step(&format!("start session {slug}"), Marker::Done);
                    Ok(())
                }
                Err(err) => {
                    progress::step(&format!("start session {slug}"), Marker::Warning);
                    Err(err)
                }
            }
        }
        SessionCommand::Prompt { slug, text, resume } => {
            let record = catalog.find(&slug).ok_or_else(|| no_such_session(&slug))?;
            let sandbox_id = record.record.sandbox_id.clone().ok_or_else(|| no_sandbox(&slug))?;

            let edge = edge_client(env)?;
            let orchestrator = Orchestrator::new(provider, &edge, catalog);

            let conversation_id = orchestrator
                .run(
                    &sandbox_id,
                    &env.anthropic_auth_token,
                    env.anthropic_base_url.as_deref(),
                    &text,
                    resume.as_deref(),
                    print_output_record,
                )
                .await?;

            match resume {
                Some(uuid) => catalog.update_conversation(&slug, &uuid, &text)?,
                None => catalog.add_conversation(&slug, &conversation_id, &text)?,
            }
            Ok(())
        }
        SessionCommand::List { slug } => {
            match slug {
                Some(slug) => match catalog.find(&slug) {
                    Some(record) => println!("{}", serde_json::to_string_pretty(&record).unwrap_or_default()),
                    None => return Err(no_such_session(&slug)),
                },
                None => {
                    let sessions = catalog.all();
                    println!("{}", serde_json::to_string_pretty(&sessions).unwrap_or_default());
                }
            }
            Ok(())
        }
        SessionCommand::Stop { slug } => {
            let record = catalog.find(&slug).ok_or_else(|| no_such_session(&slug))?;
            let edge = edge_client(env)?;
            let orchestrator = Orchestrator::new(provider, &edge, catalog);
            match record.record.sandbox_id {
                Some(sandbox_id) => {
                    orchestrator.stop(&sandbox_id).await?;
                    progress::step(&format!("stop session {slug}"), Marker::Done);
                }
                None => progress::step(&format!("stop session {slug}"), Marker::Skipped),
            }
            Ok(())
        }
        SessionCommand::Delete { slug } => {
            let record = catalog.find(&slug).ok_or_else(|| no_such_session(&slug))?;
            let (_, _, _, domain) = env.cloudflare()?;
            let edge = edge_client(env)?;
            let orchestrator = Orchestrator::new(provider, &edge, catalog);
            orchestrator
                .delete(
                    service_name,
                    &slug,
                    record.record.sandbox_id.as_deref(),
                    record.record.tunnel_id.as_deref(),
                    &domain,
                )
                .await;
            catalog.delete(&slug)?;
            progress::step(&format!("delete session {slug}"), Marker::Done);
            Ok(())
        }
        SessionCommand::Ps { slug } => {
            let record = catalog.find(&slug).ok_or_else(|| no_such_session(&slug))?;
            let sandbox_id = record.record.sandbox_id.ok_or_else(|| no_sandbox(&slug))?;
            let edge = edge_client(env)?;
            let orchestrator = Orchestrator::new(provider, &edge, catalog);
            let statuses: BTreeMap<String, String> = orchestrator.process_statuses(&sandbox_id).await?;
            for (name, status) in statuses {
                println!("{name} | {status}");
            }
            Ok(())
        }
        SessionCommand::Restart { slug, process } => {
            let record = catalog.find(&slug).ok_or_else(|| no_such_session(&slug))?;
            let sandbox_id = record.record.sandbox_id.ok_or_else(|| no_sandbox(&slug))?;
            let edge = edge_client(env)?;
            let orchestrator = Orchestrator::new(provider, &edge, catalog);
            orchestrator.restart_process(&sandbox_id, &process).await?;
            progress::step(&format!("restart {process} for {slug}"), Marker::Done);
            Ok(())
        }
        SessionCommand::Logs { slug, process, follow, lines } => {
            let record = catalog.find(&slug).ok_or_else(|| no_such_session(&slug))?;
            let sandbox_id = record.record.sandbox_id.ok_or_else(|| no_sandbox(&slug))?;
            let edge = edge_client(env)?;
            let orchestrator = Orchestrator::new(provider, &edge, catalog);
            if follow {
                use std::io::Write;
                orchestrator
                    .stream_process_logs(&sandbox_id, &process, &mut |chunk: &[u8]| {
                        let mut stdout = std::io::stdout();
                        let _ = stdout.write_all(chunk);
                        let _ = stdout.flush();
                    })
                    .await?;
            } else {
                let output = orchestrator.process_logs(&sandbox_id, &process, lines).await?;
                println!("{output}");
            }
            Ok(())
        }
    }
}

/// Persist each durable fact as it becomes known (§4.6), so a crash
/// mid-`start` still leaves the catalog able to clean up later (§7).
fn handle_lifecycle_event(catalog: &SessionCatalog, slug: &str, event: LifecycleEvent) {
    match event {
        LifecycleEvent::SandboxCreated { sandbox_id } => {
            let _ = catalog.update(slug, &serde_json::json!({ "sandbox_id": sandbox_id }));
        }
        LifecycleEvent::TunnelCreated { tunnel_id, tunnel_token } => {
            let _ = catalog.update(
                slug,
                &serde_json::json!({ "tunnel_id": tunnel_id, "tunnel_token": tunnel_token }),
            );
        }
        LifecycleEvent::InstallStart { name, command } => {
            progress::note(&format!("install {name} ({command})..."));
        }
        LifecycleEvent::InstallComplete { name, exit_code, .. } => {
            progress::step(
                &format!("install {name}"),
                if exit_code == 0 { Marker::Done } else { Marker::Warning },
            );
        }
    }
}

fn print_output_record(record: OutputRecord) {
    match record {
        OutputRecord::ProcessingStarted { input_tokens } => {
            println!("[processing, {input_tokens} input tokens]");
        }
        OutputRecord::TextLine(text) => println!("{text}"),
        OutputRecord::ToolAction(action) => println!("{action}"),
        OutputRecord::ResponseComplete { input_tokens, output_tokens } => {
            println!("[done, {input_tokens} in / {output_tokens} out]");
        }
        OutputRecord::ProcessExited { exit_code, signal: Some(signal) } => {
            eprintln!("[assistant process exited {exit_code} ({signal})]");
        }
        OutputRecord::ProcessExited { exit_code, signal: None } => {
            eprintln!("[assistant process exited {exit_code}]");
        }
    }
}

fn no_such_session(slug: &str) -> KmlError {
    KmlError::Precondition(format!("no session named '{slug}' in the catalog"))
}

fn no_sandbox(slug: &str) -> KmlError {
    KmlError::Precondition(format!("session '{slug}' has no sandbox yet — run `session new` first"))
}
