use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use jobhunt_crm::cache::QueryState;
use jobhunt_crm::config;
use jobhunt_crm::events::{CoreEvent, NotificationLevel};
use jobhunt_crm::gateway::SqliteGateway;
use jobhunt_crm::model::{
    CatalogKind, FileAttachment, FilterOptions, NewCompany, NewFolder, NewMessage, Urgency,
};
use jobhunt_crm::mutation::{ChildKind, Operation};
use jobhunt_crm::Workspace;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write an example config file
    Init,
    /// List companies grouped by folder
    Companies {
        #[arg(long, default_value = "")]
        search: String,
        #[arg(long = "job-position")]
        job_positions: Vec<String>,
        #[arg(long)]
        urgency: Option<UrgencyArg>,
        #[arg(long)]
        in_progress_state: Option<String>,
        #[arg(long)]
        has_in_progress: bool,
        #[arg(long)]
        selector: Option<String>,
    },
    AddCompany {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "medium")]
        urgency: UrgencyArg,
        #[arg(long = "job-position")]
        job_positions: Vec<String>,
        #[arg(long)]
        in_progress: Option<String>,
        #[arg(long)]
        selector: Option<String>,
        #[arg(long)]
        folder: Option<String>,
    },
    DeleteCompany {
        id: String,
    },
    /// Attach an email, phone, contact or in-progress state to a company
    AddDetail {
        #[arg(long)]
        company: String,
        #[arg(long)]
        kind: DetailArg,
        value: String,
    },
    Messages {
        company: String,
    },
    AddMessage {
        #[arg(long)]
        company: String,
        #[arg(long, default_value = "")]
        content: String,
        #[arg(long, requires = "file_url")]
        file_name: Option<String>,
        #[arg(long, requires = "file_name")]
        file_url: Option<String>,
        #[arg(long, default_value = "application/octet-stream")]
        file_mime_type: String,
    },
    AddFolder {
        #[arg(long)]
        name: String,
        #[arg(long)]
        color: Option<String>,
    },
    DeleteFolder {
        id: String,
    },
    /// Move a company into a folder, or out of any folder without --folder
    Move {
        #[arg(long)]
        company: String,
        #[arg(long)]
        folder: Option<String>,
    },
    AddCatalog {
        #[arg(long)]
        kind: CatalogArg,
        name: String,
    },
    Catalog {
        #[arg(long)]
        kind: CatalogArg,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum UrgencyArg {
    Low,
    Medium,
    High,
}

impl From<UrgencyArg> for Urgency {
    fn from(u: UrgencyArg) -> Self {
        match u {
            UrgencyArg::Low => Urgency::Low,
            UrgencyArg::Medium => Urgency::Medium,
            UrgencyArg::High => Urgency::High,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DetailArg {
    Email,
    Phone,
    Contact,
    State,
}

impl From<DetailArg> for ChildKind {
    fn from(d: DetailArg) -> Self {
        match d {
            DetailArg::Email => ChildKind::Email,
            DetailArg::Phone => ChildKind::Phone,
            DetailArg::Contact => ChildKind::Contact,
            DetailArg::State => ChildKind::InProgressState,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CatalogArg {
    JobPositions,
    Selectors,
    InProgressStates,
}

impl From<CatalogArg> for CatalogKind {
    fn from(c: CatalogArg) -> Self {
        match c {
            CatalogArg::JobPositions => CatalogKind::JobPositions,
            CatalogArg::Selectors => CatalogKind::Selectors,
            CatalogArg::InProgressStates => CatalogKind::InProgressStates,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if let Command::Init = args.command {
        if args.config.exists() {
            bail!("{} already exists", args.config.display());
        }
        std::fs::write(&args.config, config::example())
            .with_context(|| format!("writing {}", args.config.display()))?;
        info!(path = %args.config.display(), "wrote example config");
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("loading {}", args.config.display()))?;
    cfg.ensure_dirs()?;

    let gateway = SqliteGateway::connect(&cfg.database_url()).await?;
    let mut ws = Workspace::new(Arc::new(gateway), cfg.user_id());
    if ws.user_id().is_none() {
        warn!("no session.user_id configured; nothing will be read or written");
    }

    let mut events = ws.events().subscribe();
    let listener = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(CoreEvent::Notification {
                    level: NotificationLevel::Success,
                    operation,
                    message,
                }) => info!(operation, "{message}"),
                Ok(CoreEvent::Notification {
                    level: NotificationLevel::Failure,
                    operation,
                    message,
                }) => warn!(operation, "{message}"),
                Ok(CoreEvent::EditMessageRequested { message_id }) => {
                    info!(message_id = %message_id, "edit requested")
                }
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "notification listener lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let result = dispatch(&mut ws, args.command).await;
    // Dropping the workspace closes the event channel so the listener drains.
    drop(ws);
    let _ = listener.await;
    result
}

async fn dispatch(ws: &mut Workspace, command: Command) -> Result<()> {
    match command {
        Command::Init => {}
        Command::Companies {
            search,
            job_positions,
            urgency,
            in_progress_state,
            has_in_progress,
            selector,
        } => {
            let options = FilterOptions {
                job_positions,
                urgency: urgency.map(Into::into),
                in_progress_state,
                has_in_progress,
                selector,
            };
            let state = ws.companies().await;
            report_error(&state)?;
            let grouping = ws.grouped(&search, &options).await;
            for bucket in &grouping.folders {
                let marker = if bucket.expanded { "-" } else { "+" };
                println!(
                    "{marker} [{}] {} ({})",
                    bucket.folder.id,
                    bucket.folder.name,
                    bucket.companies.len()
                );
                for c in &bucket.companies {
                    println!("    {}  {}  {}", c.id, c.name, c.urgency.as_str());
                }
            }
            println!("[unfiled] ({})", grouping.unfiled.len());
            for c in &grouping.unfiled {
                println!("    {}  {}  {}", c.id, c.name, c.urgency.as_str());
            }
        }
        Command::AddCompany {
            name,
            urgency,
            job_positions,
            in_progress,
            selector,
            folder,
        } => {
            let outcome = ws
                .run(Operation::CreateCompany(NewCompany {
                    name,
                    urgency: urgency.into(),
                    job_positions,
                    in_progress,
                    selector,
                    folder_id: folder,
                }))
                .await?;
            println!("{}", outcome.id.unwrap_or_default());
        }
        Command::DeleteCompany { id } => {
            ws.run(Operation::DeleteCompany { id }).await?;
        }
        Command::AddDetail {
            company,
            kind,
            value,
        } => {
            ws.run(Operation::AddChild {
                kind: kind.into(),
                company_id: company,
                value,
            })
            .await?;
        }
        Command::Messages { company } => {
            let state = ws.messages(&company).await;
            report_error(&state)?;
            for m in state.data.as_ref().and_then(|d| d.as_messages()).unwrap_or_default() {
                let file = m
                    .file_attachment
                    .as_ref()
                    .map(|f| format!("  [{}]", f.name))
                    .unwrap_or_default();
                println!("{}  {}  {}{}", m.timestamp.to_rfc3339(), m.id, m.content, file);
            }
        }
        Command::AddMessage {
            company,
            content,
            file_name,
            file_url,
            file_mime_type,
        } => {
            let file_attachment = match (file_name, file_url) {
                (Some(name), Some(url)) => Some(FileAttachment {
                    name,
                    url,
                    mime_type: file_mime_type,
                }),
                _ => None,
            };
            let outcome = ws
                .run(Operation::CreateMessage(NewMessage {
                    company_id: company,
                    content,
                    timestamp: None,
                    file_attachment,
                }))
                .await?;
            println!("{}", outcome.id.unwrap_or_default());
        }
        Command::AddFolder { name, color } => {
            let outcome = ws
                .run(Operation::CreateFolder(NewFolder { name, color }))
                .await?;
            println!("{}", outcome.id.unwrap_or_default());
        }
        Command::DeleteFolder { id } => {
            ws.delete_folder(&id).await?;
        }
        Command::Move { company, folder } => {
            ws.move_company_to_folder(&company, folder.as_deref()).await?;
        }
        Command::AddCatalog { kind, name } => {
            ws.run(Operation::AddCatalogEntry {
                kind: kind.into(),
                name,
            })
            .await?;
        }
        Command::Catalog { kind } => {
            let state = ws.catalog(kind.into()).await;
            report_error(&state)?;
            for name in state.data.as_ref().and_then(|d| d.as_catalog()).unwrap_or_default() {
                println!("{name}");
            }
        }
    }
    Ok(())
}

fn report_error(state: &QueryState) -> Result<()> {
    match (&state.error, &state.data) {
        (Some(err), None) => bail!("{err}"),
        (Some(err), Some(_)) => {
            warn!(%err, "showing cached data after failed refresh");
            Ok(())
        }
        _ => Ok(()),
    }
}
