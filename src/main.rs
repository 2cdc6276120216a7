use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use dattoham_ai::actions::{task_messages, Task, TaskContext};
use dattoham_ai::catalog::{self, missing_models};
use dattoham_ai::config::mask_secret;
use dattoham_ai::recovery::ProviderChoice;
use dattoham_ai::setup;
use dattoham_ai::{
    AssistantError, ChatMessage, ConfigStore, ConfigUpdate, Gateway, Generation,
    GenerationOptions, Provider,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "dattoham",
    about = "Coding assistant backed by a local model server or the Gemini API",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send a free-form prompt
    Ask(AskArgs),
    /// Generate code from requirements
    Generate(TaskArgs),
    /// Explain code
    Explain(TaskArgs),
    /// Optimize code
    Optimize(TaskArgs),
    /// Find and fix bugs
    Debug(TaskArgs),
    /// Write unit tests
    Test(TaskArgs),
    /// Review code
    Review(TaskArgs),
    /// Show or switch the active provider
    Provider { provider: Option<Provider> },
    /// Store a cloud API key
    Setup,
    /// List installed local models
    Models {
        /// Show catalog models that are not installed instead
        #[arg(long)]
        missing: bool,
    },
    /// Download a model into the local server
    Pull { model: String },
    /// Show the effective configuration
    Status,
}

#[derive(Args, Debug)]
struct GenerationArgs {
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    temperature: Option<f32>,
    #[arg(long)]
    max_tokens: Option<u32>,
    /// Fail instead of prompting when recovery needs input
    #[arg(long)]
    non_interactive: bool,
}

impl GenerationArgs {
    fn options(&self) -> GenerationOptions {
        GenerationOptions {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        }
    }
}

#[derive(Args, Debug)]
struct AskArgs {
    prompt: String,
    #[command(flatten)]
    generation: GenerationArgs,
}

#[derive(Args, Debug)]
struct TaskArgs {
    /// Source file to work on
    #[arg(long, conflicts_with = "text")]
    file: Option<PathBuf>,
    /// Inline code or requirements
    text: Option<String>,
    /// Language of inline text
    #[arg(long, default_value = "text")]
    language: String,
    /// Pick the local model from the catalog by task, language and size
    #[arg(long)]
    auto_model: bool,
    #[command(flatten)]
    generation: GenerationArgs,
}

impl TaskArgs {
    fn context(&self) -> Result<TaskContext> {
        match (&self.file, &self.text) {
            (Some(path), _) => {
                let code = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                Ok(TaskContext::for_file(path, code))
            }
            (None, Some(text)) => Ok(TaskContext::new(self.language.clone(), text.clone())),
            (None, None) => Err(anyhow!("pass --file <path> or inline text")),
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let store = ConfigStore::open_default()?;
    let gateway = Gateway::new(store.clone());

    match cli.command {
        Commands::Ask(args) => {
            let messages = vec![ChatMessage::user(args.prompt).stamped()];
            run_generation(&gateway, messages, &args.generation, None).await
        }
        Commands::Generate(args) => run_task(&gateway, Task::Generate, args).await,
        Commands::Explain(args) => run_task(&gateway, Task::Explain, args).await,
        Commands::Optimize(args) => run_task(&gateway, Task::Optimize, args).await,
        Commands::Debug(args) => run_task(&gateway, Task::Debug, args).await,
        Commands::Test(args) => run_task(&gateway, Task::Test, args).await,
        Commands::Review(args) => run_task(&gateway, Task::Review, args).await,
        Commands::Provider { provider } => switch_provider(&store, provider),
        Commands::Setup => {
            setup::run_setup(&store).map_err(|e| anyhow!(e))?;
            Ok(())
        }
        Commands::Models { missing } => list_models(&gateway, missing).await,
        Commands::Pull { model } => {
            eprintln!("  Pulling {} (this can take a while)...", model);
            report(gateway.local().pull_model(&model).await)?;
            println!("  ✓ {} is installed", model);
            Ok(())
        }
        Commands::Status => {
            print_status(&store);
            Ok(())
        }
    }
}

async fn run_task(gateway: &Gateway, task: Task, args: TaskArgs) -> Result<()> {
    let context = args.context()?;
    let messages = task_messages(task, &context);
    let auto_model = args.auto_model.then(|| {
        catalog::select_best_model(task, &context.language, context.code.len()).to_string()
    });
    run_generation(gateway, messages, &args.generation, auto_model).await
}

/// Run a generation, answering any suspension from the terminal
async fn run_generation(
    gateway: &Gateway,
    messages: Vec<ChatMessage>,
    args: &GenerationArgs,
    auto_model: Option<String>,
) -> Result<()> {
    let mut options = args.options();
    if options.model.is_none() && gateway.config().get().active_provider == Provider::Local {
        options.model = auto_model;
    }

    let outcome = gateway.generate(&messages, options).await;
    let outcome = if args.non_interactive {
        outcome
    } else {
        match outcome {
            Generation::NeedsProviderChoice(switch) => {
                let choice = setup::prompt_provider_choice(&switch).map_err(|e| anyhow!(e))?;
                if choice == ProviderChoice::ShowSetupInstructions {
                    setup::print_setup_instructions();
                }
                gateway.resume_provider_choice(switch, choice).await
            }
            Generation::NeedsCredential(request) => {
                let key = setup::prompt_credential(&request).map_err(|e| anyhow!(e))?;
                gateway.resume_credential(request, key).await
            }
            done => done,
        }
    };

    let reply = report(outcome.into_result())?;
    tracing::debug!(provider = %reply.provider, model = %reply.model, attempts = reply.attempts, "reply");
    println!("{}", reply.text);
    eprintln!("  ({} · {})", reply.provider, reply.model);
    Ok(())
}

/// Print the failure and its remedy, then hand it to anyhow
fn report<T>(result: Result<T, AssistantError>) -> Result<T> {
    result.map_err(|err| {
        eprintln!();
        eprintln!("  ✗ {}", err);
        eprintln!("    {}", err.remedy());
        eprintln!();
        anyhow!(err)
    })
}

fn switch_provider(store: &ConfigStore, provider: Option<Provider>) -> Result<()> {
    let Some(provider) = provider else {
        println!("{}", store.get().active_provider);
        return Ok(());
    };
    let config = report(store.update(ConfigUpdate::default().provider(provider)))?;
    println!("  ✓ Active provider: {}", config.active_provider);
    if provider == Provider::Cloud && !config.has_cloud_api_key() {
        println!("  No API key stored yet. Run 'dattoham setup' to add one.");
    }
    Ok(())
}

async fn list_models(gateway: &Gateway, missing: bool) -> Result<()> {
    let installed = report(gateway.local().check_availability().await)?;
    if missing {
        let absent = missing_models(&installed);
        if absent.is_empty() {
            println!("  ✓ All catalog models are installed");
        }
        for entry in absent {
            println!(
                "  {}  (context {}, {})",
                entry.name,
                entry.context_window,
                entry.performance.as_str()
            );
        }
        return Ok(());
    }
    for name in &installed {
        match catalog::get_model_info(name) {
            Some(entry) => println!("  {}  ({})", name, entry.specializations.join(", ")),
            None => println!("  {}", name),
        }
    }
    Ok(())
}

fn print_status(store: &ConfigStore) {
    let config = store.get();
    println!("  Provider:        {}", config.active_provider);
    println!("  Local endpoint:  {}", config.local_endpoint);
    println!("  Primary model:   {}", config.primary_model);
    println!("  Fallback models: {}", config.fallback_models.join(", "));
    println!("  Cloud endpoint:  {}", config.cloud_endpoint);
    println!("  Cloud model:     {}", config.cloud_model);
    println!(
        "  Cloud API key:   {} ({})",
        mask_secret(config.cloud_api_key.as_deref()),
        store.credentials_label()
    );
    println!("  Config file:     {}", ConfigStore::config_location());
}
