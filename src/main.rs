use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_serde_derive::ClapSerde;
use tokio::net::TcpListener;
use tracing::info;

use qa_runner::config::Config;
use qa_runner::exit_err;
use qa_runner::inference::loader::load_configured;
use qa_runner::inference::models::model::ModelBase;
use qa_runner::inference::task::answer::{AnswerHandler, AnswerRequest};
use qa_runner::server::{build_router, serve, AppState};
use qa_runner::telemetry::init_telemetry;

#[cfg(unix)]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

const DEFAULT_CONFIG_FILE: &str = "QaRunner.toml";

const EXAMPLE_QUESTION: &str = "Quel est le nom du panneau central du retable ?";
const EXAMPLE_CONTEXT: &str = "' ils se rapprochent du style que le maître déploie dans la version londonienne du panneau central du retable (La Vierge aux rochers) ; par ailleurs, les trois panneaux du retable témoignent de procédés techniques similaires — utilisation des doigts par exemple pour la finition des contours des figures — qui, pour certains, sont à l'origine de problèmes identiques — telles des craquelures de la couche picturale apparaissant dès le processus de séchage. ";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env, default_value = DEFAULT_CONFIG_FILE)]
    config_file: String,

    /// Write a Chrome trace of the run to this file
    #[arg(long)]
    chrome_trace: Option<PathBuf>,

    /// Runs the built-in example when omitted
    #[command(subcommand)]
    cmd: Option<Commands>,

    /// Configuration options
    #[command(flatten)]
    pub opt_config: <Config as ClapSerde>::Opt,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single question from the given context
    Ask {
        /// The question to answer
        #[arg(short, long)]
        question: String,

        /// The passage containing the answer
        #[arg(long)]
        context: String,
    },
    /// Serve answers over HTTP
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = Args::parse();
    let (config, config_error) = match Config::from_toml(&args.config_file) {
        Ok(conf) => (Config::from(conf).merge(&mut args.opt_config), None),
        Err(_) if args.config_file == DEFAULT_CONFIG_FILE => {
            (Config::from(&mut args.opt_config), None)
        }
        Err(err) => (Config::from(&mut args.opt_config), Some(err)),
    };

    let _telemetry = init_telemetry(
        &config.otel_endpoint(),
        config.console_log,
        args.chrome_trace.as_deref(),
    )?;
    if let Some(err) = config_error {
        exit_err!(
            1,
            "Failed to read configuration file {} with error: {:#}",
            args.config_file,
            err
        );
    }

    let (pipeline, device) = match load_configured(&config) {
        Ok(loaded) => loaded,
        Err(err) => exit_err!(1, "Failed to load the model: {:#}", anyhow::Error::from(err)),
    };

    match args.cmd {
        None => print_answer(&pipeline, EXAMPLE_QUESTION, EXAMPLE_CONTEXT),
        Some(Commands::Ask { question, context }) => print_answer(&pipeline, &question, &context),
        Some(Commands::Serve) => {
            let base = ModelBase::from_config(&config, &device, pipeline.tokenizer().max_length());
            let state = AppState {
                pipeline: Arc::new(pipeline),
                base: Arc::new(base),
                request_timeout: Duration::from_secs(config.request_timeout),
            };
            let listener = TcpListener::bind(format!("{}:{}", config.address, config.port)).await?;
            serve(listener, build_router(state)).await
        }
    }
}

/// Prints the span indices on one line and the decoded answer on the next.
fn print_answer(
    pipeline: &qa_runner::inference::qa_pipeline::QaPipeline,
    question: &str,
    context: &str,
) -> Result<()> {
    let response = pipeline.run_answer(AnswerRequest {
        question: question.into(),
        context: context.into(),
    })?;
    info!("Inference took {:.3}s", response.inference_time);

    let (start_index, end_index) = response.prediction.indices();
    println!("{start_index} {end_index}");
    println!("{}", response.prediction.text());
    Ok(())
}
