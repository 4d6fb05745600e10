use std::io::{self, BufRead, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use storyforge_core::config::{AppConfig, ModelConfig, ResearchConfig};
use storyforge_core::traits::ResearchService;
use storyforge_core::types::RunId;
use storyforge_engine::{
    RunController, RunResult, StoryState, SummaryMetrics, FORCED_APPROVAL_KEY,
};
use storyforge_workflows::keys;
use storyforge_workflows::text::{script_format, youtube_chapters};
use storyforge_workflows::types::read_list;
use storyforge_workflows::{
    Chapter, FableRequest, ImagePrompt, ReviewDecision, StoryRequest, StoryServices, Workflows,
    FABLE_WORKFLOW,
};

#[derive(Parser)]
#[command(name = "storyforge", version, about = "Multi-stage story and fable generation")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "storyforge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a story from a prompt
    Story {
        /// Historical, Terror or Moral & Reflection
        #[arg(long, default_value = "Moral & Reflection")]
        genre: String,
        /// Short, Medium or Long
        #[arg(long, default_value = "Medium")]
        length: String,
        /// Classic storytelling, Modern, Poetic or Conversational
        #[arg(long, default_value = "Classic storytelling")]
        style: String,
        /// Also print a voiceover script and chapter list
        #[arg(long)]
        script: bool,
        /// The story prompt (read from stdin when omitted)
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// Retell a classic fable as a modern micro-fable, with human review
    Fable {
        /// Read the fable from a file instead of stdin
        #[arg(long)]
        file: Option<PathBuf>,
        /// What the reader wants from the retelling
        #[arg(long, short, default_value = "")]
        message: String,
        /// Leave the run suspended at review instead of prompting
        #[arg(long)]
        no_review: bool,
    },
    /// Resume a run suspended at human review
    Resume {
        /// Run id printed when the run suspended
        run_id: String,
        /// Approve the current draft
        #[arg(long, conflicts_with = "reject")]
        approve: bool,
        /// Reject the current draft with these notes
        #[arg(long)]
        reject: Option<String>,
    },
    /// List runs waiting for review
    Pending,
    /// Discard a suspended run
    Abandon {
        run_id: String,
    },
    /// Print a workflow graph as a Mermaid diagram
    Graph {
        /// story or fable
        #[arg(default_value = "story")]
        workflow: String,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("storyforge=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "storyforge", &mut io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;

    if let Commands::Config = &cli.command {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let workspace = config.workspace_dir();
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("creating workspace {}", workspace.display()))?;

    let model = storyforge_llm::create_model(&config.model)?;
    let reasoning = match &config.reasoning_model {
        Some(mc) => storyforge_llm::create_model(mc)?,
        None => model.clone(),
    };
    let research: Option<Arc<dyn ResearchService>> =
        config.research.as_ref().map(storyforge_llm::create_research);
    let services = StoryServices {
        model,
        reasoning,
        research,
    };
    let workflows = Workflows::build(&services, &config.workflow)?;

    let store = storyforge_engine::open_checkpoint_store(&config)?;
    let summary = Arc::new(SummaryMetrics::new());
    let metrics = storyforge_engine::metrics_sink(&config, summary.clone());
    let controller = |graph| RunController::new(graph, store.clone(), metrics.clone());

    match cli.command {
        Commands::Story {
            genre,
            length,
            style,
            script,
            prompt,
        } => {
            let prompt = match prompt.join(" ") {
                p if p.trim().is_empty() => read_stdin()?,
                p => p,
            };
            if research_missing(&genre, &services) {
                warn!("No [research] configured; historical research will record failures");
            }
            let request = StoryRequest {
                prompt,
                genre,
                length,
                style,
            };
            let result = controller(workflows.story.clone())
                .start_run(request.into_state())
                .await?;
            print_story(&result, script);
        }
        Commands::Fable {
            file,
            message,
            no_review,
        } => {
            let fable = match file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                None => read_stdin()?,
            };
            let request = FableRequest {
                fable,
                user_message: message,
            };
            let fable_controller = controller(workflows.fable.clone());
            let result = fable_controller.start_run(request.into_state()).await?;
            let interactive = !no_review && io::stdin().is_terminal();
            review_loop(&fable_controller, result, interactive).await?;
        }
        Commands::Resume {
            run_id,
            approve,
            reject,
        } => {
            let run_id = RunId::from_string(&run_id);
            let checkpoint = store
                .load(&run_id)?
                .with_context(|| format!("no suspended run with id {}", run_id))?;
            let graph = workflows
                .by_name(&checkpoint.workflow)
                .with_context(|| format!("unknown workflow '{}'", checkpoint.workflow))?;
            let run_controller = controller(graph);

            let decision = match (approve, reject) {
                (true, _) => Some(ReviewDecision::Approve),
                (false, Some(notes)) => Some(ReviewDecision::Reject { notes }),
                (false, None) => None,
            };
            match decision {
                Some(decision) => {
                    let result = run_controller
                        .resume_run(&run_id, decision.into_state())
                        .await?;
                    review_loop(&run_controller, result, false).await?;
                }
                None => {
                    let suspended = RunResult::Suspended(storyforge_engine::SuspendedRun {
                        run_id: checkpoint.run_id,
                        pending_node: checkpoint.pending_node,
                        payload: checkpoint.payload,
                        state: checkpoint.state,
                        visited: checkpoint.visited,
                    });
                    review_loop(&run_controller, suspended, io::stdin().is_terminal()).await?;
                }
            }
        }
        Commands::Pending => {
            let pending = store.list()?;
            if pending.is_empty() {
                println!("No runs waiting for review.");
            }
            for cp in pending {
                println!(
                    "{}  {:<6} {:<14} {:?}  review #{}  {}",
                    cp.run_id,
                    cp.workflow,
                    cp.pending_node,
                    cp.status,
                    cp.payload["review_count"].as_u64().unwrap_or(0),
                    cp.created_at.format("%Y-%m-%d %H:%M"),
                );
            }
        }
        Commands::Abandon { run_id } => {
            let run_id = RunId::from_string(&run_id);
            let checkpoint = store
                .load(&run_id)?
                .with_context(|| format!("no suspended run with id {}", run_id))?;
            let graph = workflows
                .by_name(&checkpoint.workflow)
                .with_context(|| format!("unknown workflow '{}'", checkpoint.workflow))?;
            controller(graph).abandon_run(&run_id)?;
            println!("Abandoned {}", run_id);
        }
        Commands::Graph { workflow } => {
            let graph = workflows
                .by_name(&workflow)
                .with_context(|| format!("unknown workflow '{}'", workflow))?;
            println!("{}", graph.to_mermaid());
        }
        Commands::Config | Commands::Completions { .. } => {
            unreachable!("handled before workflow setup")
        }
    }

    let totals = summary.snapshot();
    if totals.completed + totals.suspended + totals.failed > 0 {
        eprintln!(
            "[runs: {} completed, {} suspended, {} failed | ~{} tokens, cost {:.4}]",
            totals.completed,
            totals.suspended,
            totals.failed,
            totals.total_tokens(),
            totals.total_cost()
        );
    }
    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    let home_config = dirs_home().map(|h| h.join(".storyforge").join("config.toml"));
    if let Some(home) = home_config.filter(|p| p.exists()) {
        info!(path = %home.display(), "Loading config from home directory");
        return Ok(AppConfig::load(&home)?);
    }
    eprintln!("Warning: No config file found. Set OPENAI_API_KEY or create storyforge.toml");
    create_env_config()
}

/// Minimal config from environment variables.
fn create_env_config() -> anyhow::Result<AppConfig> {
    let api_key = std::env::var("OPENAI_API_KEY")
        .context("OPENAI_API_KEY is not set and no config file was found")?;
    let model_id =
        std::env::var("STORYFORGE_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
    Ok(env_config(
        api_key,
        model_id,
        std::env::var("PERPLEXITY_API_KEY").ok(),
    ))
}

fn env_config(api_key: String, model_id: String, research_key: Option<String>) -> AppConfig {
    let mut model = ModelConfig::new("openai", model_id);
    model.api_key = Some(api_key);
    let mut config = AppConfig::new(model);
    config.research = research_key.map(ResearchConfig::new);
    config
}

fn research_missing(genre: &str, services: &StoryServices) -> bool {
    genre == storyforge_workflows::story::HISTORICAL && services.research.is_none()
}

fn read_stdin() -> anyhow::Result<String> {
    let input = io::stdin()
        .lock()
        .lines()
        .map_while(|l| l.ok())
        .collect::<Vec<_>>()
        .join("\n");
    if input.trim().is_empty() {
        bail!("no input given");
    }
    Ok(input)
}

fn print_story(result: &RunResult, script: bool) {
    let state = result.state();
    if let Some(error) = state.error() {
        eprintln!("[error: {}]", error);
        return;
    }
    println!("# {}\n", state.get_str(keys::FINAL_TITLE));
    println!("{}", state.get_str(keys::FINAL_STORY));
    if state.get_bool(FORCED_APPROVAL_KEY) {
        eprintln!(
            "\n[note: approved after {} revisions without critic sign-off]",
            state.get_u64(keys::REVISION_COUNT)
        );
    }
    if script {
        let chapters: Vec<Chapter> = read_list(state, keys::CHAPTERS);
        println!("\n{}", youtube_chapters(&chapters));
        println!("{}", script_format(state.get_str(keys::FINAL_STORY)));
    }
    eprintln!("\n[run {} | {} steps]", result.run_id(), result.visited().len());
}

fn print_fable(state: &StoryState) {
    if let Some(error) = state.error() {
        eprintln!("[error: {}]", error);
        return;
    }
    println!("{}", state.get_str(keys::FINAL_STORY));
    let scenes: Vec<ImagePrompt> = read_list(state, keys::IMAGE_PROMPTS);
    if !scenes.is_empty() {
        println!("\nIMAGE PROMPTS");
        for scene in scenes {
            println!(
                "\nSCENE {} (part {}): {}\n{}",
                scene.scene_number, scene.story_part, scene.title, scene.description
            );
        }
    }
}

fn print_review(run_id: &RunId, payload: &Value) {
    eprintln!("\n--- Review #{} for run {} ---", payload["review_count"], run_id);
    eprintln!("{}", payload["story"].as_str().unwrap_or(""));
    eprintln!(
        "\n[{} words | moral: {}]",
        payload["word_count"],
        payload["moral"].as_str().unwrap_or("")
    );
    if let Some(feedback) = payload["feedback"].as_str().filter(|f| !f.is_empty()) {
        eprintln!("[previous feedback: {}]", feedback);
    }
}

/// Prompt for a verdict on a blocking thread. `None` leaves the run suspended.
async fn ask_review() -> anyhow::Result<Option<ReviewDecision>> {
    tokio::task::spawn_blocking(|| -> anyhow::Result<Option<ReviewDecision>> {
        let choice = dialoguer::Select::new()
            .with_prompt("Your verdict")
            .items(&["Approve", "Request changes", "Decide later"])
            .default(0)
            .interact()?;
        Ok(match choice {
            0 => Some(ReviewDecision::Approve),
            1 => {
                let notes: String = dialoguer::Input::new()
                    .with_prompt("What should change?")
                    .interact_text()?;
                Some(ReviewDecision::Reject { notes })
            }
            _ => None,
        })
    })
    .await?
}

/// Drive a fable run through human review until it completes, or until the
/// reviewer (or a non-interactive caller) leaves it suspended.
async fn review_loop(
    controller: &RunController,
    mut result: RunResult,
    interactive: bool,
) -> anyhow::Result<()> {
    loop {
        match result {
            RunResult::Completed(run) => {
                if controller.graph().name() == FABLE_WORKFLOW {
                    print_fable(&run.state);
                } else {
                    print_story(&RunResult::Completed(run), false);
                }
                return Ok(());
            }
            RunResult::Suspended(run) => {
                print_review(&run.run_id, &run.payload);
                let decision = if interactive { ask_review().await? } else { None };
                match decision {
                    Some(decision) => {
                        result = controller
                            .resume_run(&run.run_id, decision.into_state())
                            .await?;
                    }
                    None => {
                        eprintln!(
                            "\nRun suspended. Continue with:\n  storyforge resume {} --approve\n  storyforge resume {} --reject \"notes\"",
                            run.run_id, run.run_id
                        );
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
