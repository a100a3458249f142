use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use recsvc_client::{
    services::{Confirmer, DeleteOutcome},
    Config, ModelHandle, RecommendationService, TrainingParameters, UserInput,
};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "recsvc")]
#[command(about = "Train models and fetch recommendations from the recommendation service", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, global = true, env = "MODEL_ID", help = "Model to operate on")]
    model: Option<String>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    #[command(about = "List models on the service")]
    Models,

    #[command(about = "Show the model's current status")]
    Status,

    #[command(about = "Submit a new model for training")]
    Train {
        #[arg(help = "JSON file with training parameters")]
        params: PathBuf,

        #[arg(long, help = "Poll until training settles")]
        wait: bool,
    },

    #[command(about = "Item-to-item recommendations")]
    Items {
        #[arg(help = "Recommendations per item")]
        k: usize,

        #[arg(required = true, help = "Item ids")]
        items: Vec<String>,
    },

    #[command(about = "Recommendations for known users")]
    Users {
        #[arg(help = "Recommendations per user")]
        k: usize,

        #[arg(required = true, help = "User ids")]
        users: Vec<String>,
    },

    #[command(about = "Make the model the service default")]
    Default,

    #[command(about = "Delete the model")]
    Delete {
        #[arg(long, help = "Skip the confirmation prompt")]
        yes: bool,
    },
}

struct StdinConfirmer;

impl Confirmer for StdinConfirmer {
    fn confirm(&self, prompt: &str) -> bool {
        print!("{} [y/N] ", prompt);
        if std::io::stdout().flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Cancelled on Ctrl-C so a long training wait can be abandoned
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            child.cancel();
        }
    });
    token
}

async fn attach(
    service: &RecommendationService,
    model: Option<&str>,
    config: &Config,
) -> anyhow::Result<ModelHandle> {
    let model_id = model
        .or(config.model_id.as_deref())
        .ok_or_else(|| anyhow!("no model given; pass --model or set MODEL_ID"))?;
    Ok(service.attach(model_id).await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let service = RecommendationService::from_config(&config)?;
    let model = cli.model.as_deref();

    match cli.command {
        Command::Models => print_json(&service.list_models().await?)?,
        Command::Status => {
            let handle = attach(&service, model, &config).await?;
            print_json(handle.snapshot().await.as_ref())?;
        }
        Command::Train { params, wait } => {
            let raw = std::fs::read_to_string(&params)
                .with_context(|| format!("failed to read {}", params.display()))?;
            let parameters: TrainingParameters =
                serde_json::from_str(&raw).context("invalid training parameters")?;

            let (handle, state) = service
                .train(&parameters, wait, &interrupt_token())
                .await?;
            if state.is_timeout() {
                tracing::warn!(model_id = %handle.id(), "Training still running after poll budget");
            }
            print_json(handle.snapshot().await.as_ref())?;
        }
        Command::Items { k, items } => {
            let handle = attach(&service, model, &config).await?;
            print_json(&handle.item_recommendations(items, k).await?)?;
        }
        Command::Users { k, users } => {
            let handle = attach(&service, model, &config).await?;
            let table = handle
                .user_recommendations(UserInput::users(users), k)
                .await?;
            print_json(&table)?;
        }
        Command::Default => {
            attach(&service, model, &config).await?.set_default().await?;
        }
        Command::Delete { yes } => {
            let handle = attach(&service, model, &config).await?;
            let confirmer: Option<&dyn Confirmer> = if yes { None } else { Some(&StdinConfirmer) };
            if handle.delete(confirmer).await? == DeleteOutcome::Declined {
                println!("Deletion cancelled");
            }
        }
    }

    Ok(())
}
