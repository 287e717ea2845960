//! Stratum CLI
//!
//! Command-line interface for direct memory management, bypassing the MCP
//! and HTTP boundaries. Runs single-threaded and synchronous throughout.

use clap::{Parser, Subcommand};

use stratum::error::Result;
use stratum::guard::{blocks_create, write_guard};
use stratum::memory;
use stratum::retrieval::{search_advanced, SearchFilters, SearchMode};
use stratum::vitality::{apply_vitality_decay, cleanup_candidates};
use stratum::Store;

#[derive(Parser)]
#[command(name = "stratum")]
#[command(about = "Hierarchical memory store CLI")]
#[command(version)]
struct Cli {
    /// Database path
    #[arg(long, env = "DATABASE_URL", default_value = "~/.local/share/stratum/memories.db")]
    db_path: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new memory
    Create {
        /// Parent path (empty for root)
        #[arg(long, default_value = "")]
        parent_path: String,
        /// Leaf path segment
        title: String,
        /// Content to remember
        content: String,
        #[arg(long, default_value = "core")]
        domain: String,
        #[arg(short, long, default_value = "0")]
        priority: i32,
    },
    /// Read a memory by path
    Get {
        path: String,
        #[arg(long, default_value = "core")]
        domain: String,
    },
    /// List children of a path (root if omitted)
    Children {
        #[arg(default_value = "")]
        path: String,
        #[arg(long, default_value = "core")]
        domain: String,
    },
    /// Search memories
    Search {
        query: String,
        #[arg(short, long, default_value = "10")]
        limit: usize,
        #[arg(short, long, default_value = "hybrid")]
        mode: String,
    },
    /// Remove a path (orphans the memory if it was the last one)
    Remove {
        path: String,
        #[arg(long, default_value = "core")]
        domain: String,
    },
    /// Show vitality cleanup candidates
    CleanupCandidates {
        #[arg(long, default_value = "0.2")]
        threshold: f64,
        #[arg(long, default_value = "30")]
        inactive_days: i64,
    },
    /// Run one vitality decay pass immediately
    Decay,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let db_path = shellexpand::tilde(&cli.db_path).to_string();
    let store = Store::open(&db_path)?;

    match cli.command {
        Commands::Create { parent_path, title, content, domain, priority } => {
            let decision = write_guard(&store, None, None, &content, Some(&domain), Some(&parent_path), None);
            if blocks_create(decision.action) {
                println!("write blocked: {} ({:?})", decision.reason, decision.action);
                return Ok(());
            }
            let created = memory::create_memory_with_disclosure(
                &store, &parent_path, &content, priority, &title, &domain, None,
            )?;
            println!("Created {}", created.uri);
        }

        Commands::Get { path, domain } => match memory::get_memory_by_path(&store, &path, &domain)? {
            Some(m) => println!("{}", serde_json::to_string_pretty(&m)?),
            None => println!("{domain}://{path} not found"),
        },

        Commands::Children { path, domain } => {
            let memory_id = if path.is_empty() {
                None
            } else {
                memory::get_memory_by_path(&store, &path, &domain)?.map(|m| m.id)
            };
            let children = memory::get_children(&store, memory_id, Some(&domain))?;
            for child in children {
                println!("{} [{}] {}", child.uri, child.memory_id, truncate(&child.content_snippet, 60));
            }
        }

        Commands::Search { query, limit, mode } => {
            let mode = mode.parse::<SearchMode>().unwrap_or(SearchMode::Hybrid);
            let response = search_advanced(&store, None, None, &query, mode, limit, 3, &SearchFilters::default(), None);
            for r in &response.results {
                println!("{} ({:.3}) - {}", r.uri, r.score, truncate(&r.content_snippet, 60));
            }
            if response.degraded {
                println!("(degraded: {})", response.degrade_reasons.join(", "));
            }
        }

        Commands::Remove { path, domain } => {
            let result = memory::remove_path(&store, &path, &domain)?;
            println!("Removed {domain}://{path}, orphaned={:?}", result.orphaned);
        }

        Commands::CleanupCandidates { threshold, inactive_days } => {
            let candidates = cleanup_candidates(&store, threshold, inactive_days, None, None, 100)?;
            for c in candidates {
                println!("{} vitality={:.3} inactive_days={} can_delete={}", c.uri, c.vitality_score, c.inactive_days, c.can_delete);
            }
        }

        Commands::Decay => {
            let touched = apply_vitality_decay(&store)?;
            println!("Decay applied to {touched} memories");
        }
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    let first_line = s.lines().next().unwrap_or(s);
    if first_line.chars().count() <= max {
        first_line.to_string()
    } else {
        let truncated: String = first_line.chars().take(max.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}
