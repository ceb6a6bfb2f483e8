//! feedstore - timeline page merge CLI
//!
//! Main entry point for the feedstore command-line tool.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use colored::Colorize;
use serde_json::json;
use std::io;
use std::path::PathBuf;
use tracing::debug;

use feedstore::cli::{self, Cli, Commands, OutputFormat};
use feedstore::logging::{OperationGuard, init_cli_logging};
use feedstore::{
    CONTENT_DIVIDER_WIDTH, Config, EntityKey, FeedError, PageParser, PageRequest, PageVariant,
    Storage, format_error, format_number, format_number_usize, format_optional_date,
    format_relative_date, log_metric, plain_text,
};

/// Settings resolved from config file, environment and flags.
struct Settings {
    db_path: PathBuf,
    format: OutputFormat,
    quiet: bool,
    config: Config,
}

fn main() {
    let cli = Cli::parse();
    let config = Config::load();

    if !config.output.colors {
        colored::control::set_override(false);
    }
    init_cli_logging(cli.quiet, cli.verbose, config.output.colors);

    let format = cli.format.unwrap_or_else(|| {
        config.output.format.parse().unwrap_or_else(|_| {
            tracing::warn!("Unknown output format '{}', using text", config.output.format);
            OutputFormat::Text
        })
    });
    let ctx = Settings {
        db_path: cli.db.clone().unwrap_or_else(|| config.db_path()),
        format,
        quiet: cli.quiet || config.output.quiet,
        config,
    };

    let result = match &cli.command {
        Commands::Merge(args) => cmd_merge(&ctx, args),
        Commands::Timeline(args) => cmd_timeline(&ctx, args),
        Commands::Status(args) => cmd_status(&ctx, args),
        Commands::Stats => cmd_stats(&ctx),
        Commands::Config(args) => cmd_config(&ctx, args),
        Commands::Completions(args) => cmd_completions(args),
    };

    if let Err(err) = result {
        report_error(&err);
        std::process::exit(1);
    }
}

fn report_error(err: &anyhow::Error) {
    let feed_error = err.chain().find_map(|e| e.downcast_ref::<FeedError>());
    let explanation = err
        .chain()
        .skip(1)
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(": ");
    let mut suggestions: Vec<&str> = feed_error.and_then(FeedError::suggestion).into_iter().collect();
    if feed_error.is_some_and(FeedError::is_transient) {
        suggestions.push("This looks temporary; re-running the same command is safe.");
    }
    eprintln!("{}", format_error(&err.to_string(), &explanation, &suggestions));
}

fn require(value: Option<&String>, fallback: Option<&String>, what: &str) -> Result<String> {
    value.or(fallback).cloned().ok_or_else(|| {
        anyhow::Error::new(FeedError::InvalidArgument {
            reason: format!("no {what} given; pass --{what} or set [merge] {what} in the config file"),
        })
    })
}

fn print_json(ctx: &Settings, value: &serde_json::Value) -> Result<()> {
    let text = if ctx.format == OutputFormat::JsonPretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{text}");
    Ok(())
}

fn open_existing(ctx: &Settings) -> Result<Storage> {
    Ok(Storage::open_existing(&ctx.db_path)?)
}

fn cmd_merge(ctx: &Settings, args: &cli::MergeArgs) -> Result<()> {
    let domain = require(args.domain.as_ref(), ctx.config.merge.domain.as_ref(), "domain")?;
    let viewer = args.viewer.as_ref().or(ctx.config.merge.viewer.as_ref()).cloned();
    let variant = PageVariant::from(args.variant);

    let observed_at = match &args.observed_at {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| FeedError::InvalidArgument {
                reason: format!("--observed-at '{raw}' is not RFC 3339: {e}"),
            })?,
        None => Utc::now(),
    };

    let mut page = PageParser::new(&args.page).read_page()?;
    if let Some(anchor) = &args.anchor {
        page.query.max_id = Some(anchor.clone());
    }
    if variant == PageVariant::Home && viewer.is_none() {
        tracing::warn!("Home page merged without --viewer; no timeline rows will be written");
    }

    if let Some(parent) = ctx.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let mut storage = Storage::open(&ctx.db_path)?;
    storage.set_batch_size(ctx.config.merge.batch_size);

    let request = PageRequest {
        domain: &domain,
        viewer_id: viewer.as_deref(),
        query: &page.query,
        variant,
        entities: &page.statuses,
        observed_at,
    };

    let guard = OperationGuard::new(format!("merge {}", args.page.display()));
    let start = std::time::Instant::now();
    let outcome = match storage.merge_page(&request) {
        Ok(outcome) => {
            guard.complete();
            outcome
        }
        Err(err) => {
            guard.fail(&err);
            return Err(err).with_context(|| format!("Failed to merge {}", args.page.display()));
        }
    };
    log_metric!("merge_ms", u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX), "ms");

    let counts = outcome.counts;
    let field_writes: serde_json::Map<String, serde_json::Value> = outcome
        .field_writes
        .iter()
        .map(|(field, n)| (field.column().to_string(), json!(n)))
        .collect();

    match ctx.format {
        OutputFormat::Json | OutputFormat::JsonPretty => print_json(
            ctx,
            &json!({
                "domain": domain,
                "viewer": viewer,
                "variant": variant,
                "max_id": page.query.max_id,
                "statuses": page.statuses.len(),
                "created_count": counts.created_count,
                "merged_count": counts.merged_count,
                "created_authors": counts.created_authors,
                "merged_authors": counts.merged_authors,
                "field_writes": field_writes,
                "anchor_cleared": outcome.continuity.as_ref().is_some_and(|c| c.anchor_cleared),
                "has_more_status": outcome.continuity.as_ref().and_then(|c| c.flagged_status.clone()),
            }),
        )?,
        OutputFormat::Text => {
            if ctx.quiet {
                return Ok(());
            }
            println!(
                "{} Merged {} statuses into {}",
                "✓".green(),
                format_number_usize(page.statuses.len()),
                ctx.db_path.display()
            );
            println!(
                "  Statuses: {} created, {} merged",
                format_number_usize(counts.created_count).green(),
                format_number_usize(counts.merged_count)
            );
            println!(
                "  Authors:  {} created, {} merged",
                format_number_usize(counts.created_authors).green(),
                format_number_usize(counts.merged_authors)
            );
            if !outcome.field_writes.is_empty() {
                let fields: Vec<String> = outcome
                    .field_writes
                    .iter()
                    .map(|(field, n)| format!("{}×{n}", field.column()))
                    .collect();
                println!("  Updated:  {}", fields.join(", ").dimmed());
            }
            if let Some(continuity) = &outcome.continuity {
                if let Some(status) = &continuity.flagged_status {
                    println!("  {} Gap below status {}", "⋯".yellow(), status.bold());
                } else {
                    println!("  Timeline contiguous below this page");
                }
            }
        }
    }
    Ok(())
}

fn cmd_timeline(ctx: &Settings, args: &cli::TimelineArgs) -> Result<()> {
    let domain = require(args.domain.as_ref(), ctx.config.merge.domain.as_ref(), "domain")?;
    let viewer = require(args.viewer.as_ref(), ctx.config.merge.viewer.as_ref(), "viewer")?;
    let storage = open_existing(ctx)?;
    let entries = storage.home_timeline(&domain, &viewer, args.limit)?;
    debug!(entries = entries.len(), "Loaded timeline");

    match ctx.format {
        OutputFormat::Json | OutputFormat::JsonPretty => {
            let items: Vec<serde_json::Value> = entries
                .iter()
                .map(|entry| {
                    json!({
                        "row_id": entry.row.id,
                        "has_more": entry.row.has_more,
                        "status": entry.status,
                    })
                })
                .collect();
            print_json(ctx, &serde_json::Value::Array(items))?;
        }
        OutputFormat::Text => {
            if entries.is_empty() {
                println!("No timeline entries for viewer {viewer} on {domain}.");
                return Ok(());
            }
            println!(
                "{}",
                format!("Home timeline of {viewer} on {domain}").bold().cyan()
            );
            println!("{}", "─".repeat(CONTENT_DIVIDER_WIDTH));
            for entry in &entries {
                let status = &entry.status;
                let when = format_relative_date(status.created_at);
                match &status.reblog_id {
                    Some(reblog_id) => {
                        let wrapped = storage.get_status(&EntityKey::new(&domain, reblog_id))?;
                        println!(
                            "{} {} {} {}",
                            status.key.id.dimmed(),
                            format!("@{}", status.account_id).green(),
                            "reposted".yellow(),
                            when.dimmed()
                        );
                        if let Some(wrapped) = wrapped {
                            println!(
                                "    {} {}",
                                format!("@{}", wrapped.account_id).green(),
                                plain_text(&wrapped.content)
                            );
                        }
                    }
                    None => {
                        println!(
                            "{} {} {}",
                            status.key.id.dimmed(),
                            format!("@{}", status.account_id).green(),
                            when.dimmed()
                        );
                        println!("    {}", plain_text(&status.content));
                    }
                }
                if entry.row.has_more {
                    println!("{}", "  ⋯ older statuses not fetched yet".yellow());
                }
            }
        }
    }
    Ok(())
}

fn cmd_status(ctx: &Settings, args: &cli::StatusArgs) -> Result<()> {
    let domain = require(args.domain.as_ref(), ctx.config.merge.domain.as_ref(), "domain")?;
    let storage = open_existing(ctx)?;
    let key = EntityKey::new(&domain, &args.id);
    let status = storage
        .get_status(&key)?
        .ok_or_else(|| FeedError::not_found("Status", key.to_string()))?;
    let author = storage.get_account(&status.author_key())?;

    match ctx.format {
        OutputFormat::Json | OutputFormat::JsonPretty => {
            print_json(ctx, &json!({ "status": status, "author": author }))?;
        }
        OutputFormat::Text => {
            println!("{}", format!("Status {key}").bold().cyan());
            println!("{}", "─".repeat(CONTENT_DIVIDER_WIDTH));
            match &author {
                Some(author) => println!(
                    "  Author:     {} (@{})",
                    author.display_name.bold(),
                    author.acct
                ),
                None => println!("  Author:     @{}", status.account_id),
            }
            println!("  Created:    {}", status.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
            if let Some(edited) = status.edited_at {
                println!("  Edited:     {}", edited.format("%Y-%m-%d %H:%M:%S UTC"));
            }
            println!("  Observed:   {}", format_relative_date(status.updated_at));
            println!("  Visibility: {}", status.visibility.as_str());
            println!(
                "  Counts:     {} replies, {} reposts, {} favourites",
                format_number(status.replies_count),
                format_number(status.reblogs_count),
                format_number(status.favourites_count)
            );
            if let Some(reblog_id) = &status.reblog_id {
                println!("  Repost of:  {reblog_id}");
            }
            if let Some(deleted) = status.deleted_at {
                println!("  {} {}", "Deleted:".red(), format_relative_date(deleted));
            }
            println!("{}", "─".repeat(CONTENT_DIVIDER_WIDTH));
            if !status.spoiler_text.is_empty() {
                println!("  CW: {}", status.spoiler_text.yellow());
            }
            println!("  {}", plain_text(&status.content));
        }
    }
    Ok(())
}

fn cmd_stats(ctx: &Settings) -> Result<()> {
    let storage = open_existing(ctx)?;
    let stats = storage.stats()?;

    match ctx.format {
        OutputFormat::Json | OutputFormat::JsonPretty => {
            print_json(ctx, &serde_json::to_value(&stats)?)?;
        }
        OutputFormat::Text => {
            println!("{}", "Store Statistics".bold().cyan());
            println!("{}", "─".repeat(40));
            println!("  {:<20} {:>10}", "Statuses:", format_number(stats.statuses_count));
            println!("  {:<20} {:>10}", "Deleted:", format_number(stats.deleted_statuses_count));
            println!("  {:<20} {:>10}", "Accounts:", format_number(stats.accounts_count));
            println!(
                "  {:<20} {:>10}",
                "Timeline rows:",
                format_number(stats.timeline_rows_count)
            );
            println!("  {:<20} {:>10}", "Viewers:", format_number(stats.viewers_count));
            println!("{}", "─".repeat(40));
            println!("  Oldest status: {}", format_optional_date(stats.oldest_status_date).green());
            println!("  Newest status: {}", format_optional_date(stats.newest_status_date).green());
        }
    }
    Ok(())
}

fn cmd_config(ctx: &Settings, args: &cli::ConfigArgs) -> Result<()> {
    let config_path = Config::user_config_path();

    if args.path {
        match &config_path {
            Some(path) => println!("{}", path.display()),
            None => anyhow::bail!("Could not determine config directory"),
        }
    }

    if args.init {
        match &config_path {
            Some(path) if path.exists() => {
                println!("Config file already exists: {}", path.display());
            }
            _ => {
                let written = Config::default().save()?;
                println!("{} Wrote {}", "✓".green(), written.display());
            }
        }
    }

    if args.show || !(args.path || args.init) {
        match ctx.format {
            OutputFormat::Json | OutputFormat::JsonPretty => {
                print_json(
                    ctx,
                    &json!({
                        "config_file": config_path,
                        "db_path": ctx.db_path,
                        "format": ctx.format,
                        "config": ctx.config,
                    }),
                )?;
            }
            OutputFormat::Text => {
                println!("{}", "Current Configuration".bold().cyan());
                println!(
                    "  Config file: {}",
                    config_path.map_or_else(|| "(none)".to_string(), |p| p.display().to_string())
                );
                println!("  Database:    {}", ctx.db_path.display());
                println!(
                    "  Domain:      {}",
                    ctx.config.merge.domain.as_deref().unwrap_or("(unset)")
                );
                println!(
                    "  Viewer:      {}",
                    ctx.config.merge.viewer.as_deref().unwrap_or("(unset)")
                );
                println!("  Batch size:  {}", ctx.config.merge.batch_size);
                println!("  Colors:      {}", ctx.config.output.colors);
            }
        }
    }
    Ok(())
}

fn cmd_completions(args: &cli::CompletionsArgs) -> Result<()> {
    let mut cmd = Cli::command();
    generate(args.shell, &mut cmd, "feedstore", &mut io::stdout());
    Ok(())
}
