use std::io::stdout;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use atr_cli::commands::{
    cron, export, ingest, offline, recalc, register, report, sessions, status, update,
};
use atr_cli::{Cli, Commands, Config, IngestEvent, OfflineAction, RegisterAction};

/// Load config and open the stores, ensuring the parent directory exists.
fn open_stores(config_path: Option<&Path>) -> Result<(atr_db::Database, atr_db::LogDirectory, Config)> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    let db = atr_db::Database::open(&config.database_path).context("failed to open database")?;
    let directory = atr_db::LogDirectory::open(&config.database_path)
        .context("failed to open activity log")?;
    Ok((db, directory, config))
}

#[expect(
    clippy::too_many_lines,
    reason = "CLI command dispatch is inherently verbose"
)]
fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    match &cli.command {
        Some(Commands::Register { action }) => {
            let (db, _directory, _config) = open_stores(cli.config.as_deref())?;
            match action {
                RegisterAction::Create(options) => register::create(&db, options)?,
                RegisterAction::Edit { id, options } => register::edit(&db, *id, options)?,
                RegisterAction::List => register::list(&mut stdout(), &db)?,
                RegisterAction::Delete { id } => register::delete(&db, *id)?,
            }
        }
        Some(Commands::Ingest { event }) => {
            let (_db, directory, _config) = open_stores(cli.config.as_deref())?;
            match event {
                IngestEvent::Activity { user, course, at } => {
                    ingest::activity(&directory, *user, *course, at)?;
                }
                IngestEvent::User { id, name, group } => {
                    ingest::user(&directory, *id, name, *group)?;
                }
                IngestEvent::Login { user, at } => ingest::login(&directory, *user, at)?,
                IngestEvent::Course { id, category } => {
                    ingest::course(&directory, *id, *category)?;
                }
                IngestEvent::Link { course, linked } => {
                    ingest::link(&directory, *course, *linked)?;
                }
            }
        }
        Some(Commands::Update {
            register: register_id,
            user,
        }) => {
            let (mut db, directory, _config) = open_stores(cli.config.as_deref())?;
            update::run(&mut db, &directory, *register_id, *user)?;
        }
        Some(Commands::Recalc {
            register: register_id,
            user,
            keep_sessions,
            schedule,
        }) => {
            let (mut db, directory, _config) = open_stores(cli.config.as_deref())?;
            recalc::run(
                &mut db,
                &directory,
                *register_id,
                *user,
                *keep_sessions,
                *schedule,
            )?;
        }
        Some(Commands::Offline { action }) => {
            let (mut db, directory, _config) = open_stores(cli.config.as_deref())?;
            match action {
                OfflineAction::Add {
                    register: register_id,
                    user,
                    login,
                    logout,
                    course,
                    comment,
                    actor,
                } => offline::add(
                    &mut db,
                    &directory,
                    *register_id,
                    *user,
                    login,
                    logout,
                    *course,
                    comment.clone(),
                    *actor,
                )?,
                OfflineAction::Delete {
                    register: register_id,
                    user,
                    session,
                } => offline::delete(&mut db, &directory, *register_id, *user, *session)?,
            }
        }
        Some(Commands::Sessions {
            register: register_id,
            user,
        }) => {
            let (db, _directory, _config) = open_stores(cli.config.as_deref())?;
            sessions::run(&mut stdout(), &db, *register_id, *user)?;
        }
        Some(Commands::Report {
            register: register_id,
            json,
        }) => {
            let (db, directory, _config) = open_stores(cli.config.as_deref())?;
            report::run(&mut stdout(), &db, &directory, *register_id, *json)?;
        }
        Some(Commands::Status) => {
            let (db, directory, config) = open_stores(cli.config.as_deref())?;
            status::run(&mut stdout(), &db, &directory, &config.database_path)?;
        }
        Some(Commands::Cron) => {
            let (mut db, directory, _config) = open_stores(cli.config.as_deref())?;
            cron::run(&mut db, &directory)?;
        }
        Some(Commands::Export {
            register: register_id,
        }) => {
            let (db, _directory, _config) = open_stores(cli.config.as_deref())?;
            export::run(&mut stdout(), &db, *register_id)?;
        }
        None => {
            // No subcommand, show help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
