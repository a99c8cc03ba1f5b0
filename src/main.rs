use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use onebox_triage::api::models::{Category, Email, EmailListParams};
use onebox_triage::config::Config;
use onebox_triage::search::{SearchFilters, SearchSession, SortConfig, SortDirection, SortField};
use onebox_triage::{FetchCache, HttpEmailApi, Inbox, QueryClient};

#[derive(Parser)]
#[command(name = "onebox-triage", version, about = "Triage the Onebox inbox from the terminal")]
struct Cli {
    /// Backend base URL (overrides ONEBOX_API_URL from the environment)
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List one page of the inbox
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,
        /// Page size, defaults to INBOX_PAGE_SIZE
        #[arg(long)]
        size: Option<u32>,
        /// Server-side search query
        #[arg(long)]
        query: Option<String>,
        /// Interested, Meeting Booked, Not Interested, Spam or Out of Office
        #[arg(long)]
        category: Option<String>,
        /// Only emails marked interested
        #[arg(long)]
        interested: bool,
    },
    /// Show a single email
    Show { id: String },
    /// Show the replies suggested for an email
    Replies { id: String },
    /// Pull new mail on the backend
    Sync,
    /// Mark an email as interesting
    Mark {
        id: String,
        /// Clear the flag instead
        #[arg(long)]
        not: bool,
    },
    /// Search the first inbox page locally
    Search {
        query: Vec<String>,
        /// timestamp, subject, sender, recipient or category
        #[arg(long)]
        sort: Option<String>,
        #[arg(long)]
        desc: bool,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        sender: Option<String>,
        #[arg(long)]
        interested: bool,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
    },
    /// Check that the backend is reachable
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with env filter; stdout is reserved for results
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::from_env()?;
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url;
    }
    info!("📝 Backend: {}", config.api_url);

    let api = HttpEmailApi::new(&config.api_url, config.http_timeout)?;
    let client = QueryClient::new(Arc::new(FetchCache::new()), config.query.clone());
    let inbox = Inbox::new(client, Arc::new(api.clone()));

    tokio::select! {
        result = run(cli.command, &config, &inbox, &api) => {
            if let Err(e) = &result {
                error!("❌ {}", e);
            }
            result
        }
        _ = signal::ctrl_c() => {
            info!("🛑 Received Ctrl+C signal");
            Ok(())
        }
    }
}

async fn run(command: Command, config: &Config, inbox: &Inbox, api: &HttpEmailApi) -> Result<()> {
    match command {
        Command::List {
            page,
            size,
            query,
            category,
            interested,
        } => {
            let mut params = EmailListParams::new(page, size.unwrap_or(config.page_size));
            if let Some(query) = query {
                params = params.with_query(&query);
            }
            if let Some(category) = category {
                params = params.with_category(&Category::normalize(&category));
            }
            if interested {
                params = params.with_interested(true);
            }
            let result = inbox.emails(&params).await.into_result()?;
            println!(
                "Page {}: {} of {} emails",
                params.page,
                result.emails.len(),
                result.total
            );
            for email in &result.emails {
                println!("{}", row(email));
            }
        }
        Command::Show { id } => {
            let email = inbox.email(&id).await.into_result()?;
            println!("ID:         {}", email.id);
            println!("From:       {}", email.sender);
            println!("To:         {}", email.recipient);
            println!("Date:       {}", email.timestamp);
            println!("Subject:    {}", email.subject);
            println!("Category:   {}", email.category.as_deref().unwrap_or("-"));
            println!("Interested: {}", if email.is_interested { "yes" } else { "no" });
            println!();
            println!("{}", email.content);
        }
        Command::Replies { id } => {
            let replies = inbox.suggested_replies(&id).await.into_result()?;
            if replies.is_empty() {
                println!("No suggestions for {}", id);
            }
            for (i, reply) in replies.iter().enumerate() {
                match reply.confidence {
                    Some(confidence) => println!("{}. ({:.0}%) {}", i + 1, confidence * 100.0, reply.text),
                    None => println!("{}. {}", i + 1, reply.text),
                }
            }
        }
        Command::Sync => {
            info!("📥 Syncing emails...");
            let response = inbox.sync().await?;
            println!("{}", response.message);
        }
        Command::Mark { id, not } => {
            let response = inbox.mark_interested(&id, !not).await?;
            println!("{}", response.message);
        }
        Command::Search {
            query,
            sort,
            desc,
            category,
            sender,
            interested,
            from,
            to,
        } => {
            let sort_config = match sort {
                Some(name) => {
                    let field = SortField::from_str(&name)
                        .ok_or_else(|| anyhow::anyhow!("Unknown sort field: {}", name))?;
                    SortConfig {
                        field,
                        direction: if desc { SortDirection::Desc } else { SortDirection::Asc },
                    }
                }
                None => SortConfig::default(),
            };
            let filters = SearchFilters {
                category: category.map(|c| Category::normalize(&c)),
                is_interested: interested.then_some(true),
                start_date: from,
                end_date: to,
                sender,
                subject: None,
            };

            let page = inbox
                .emails(&EmailListParams::new(1, config.page_size))
                .await
                .into_result()?;
            let session = SearchSession::new(config.search.clone(), page.emails.clone());
            session.set_filters(filters);
            session.set_sort(sort_config);
            session.set_query(&query.join(" "));
            session.flush();

            let results = session.results();
            info!("🔍 {} of {} emails match", results.len(), page.emails.len());
            for email in results.iter() {
                println!("{}", row(email));
            }
        }
        Command::Health => {
            let health = api.health().await?;
            println!("{} ({}) at {}", health.status, health.service, health.timestamp);
        }
    }
    Ok(())
}

fn row(email: &Email) -> String {
    format!(
        "{:<10} {:<20} {:<30} {}{}{}",
        email.id,
        email.timestamp,
        email.sender,
        if email.is_interested { "★ " } else { "" },
        email.subject,
        email
            .category
            .as_deref()
            .map(|c| format!("  [{}]", c))
            .unwrap_or_default()
    )
}
