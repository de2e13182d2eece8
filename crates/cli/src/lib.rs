pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use dealflow_core::config::{ConfigOverrides, LoadOptions, LogFormat};

use commands::pipeline::{EditArgs, TransitionArgs};

#[derive(Debug, Parser)]
#[command(
    name = "dealflow",
    about = "Dealflow pipeline operator CLI",
    long_about = "Inspect pipeline trees, move items between stages, and manage the record store.",
    after_help = "Examples:\n  dealflow migrate\n  dealflow seed\n  dealflow stage pl-demo-fabrication negotiation\n  dealflow transition pl-demo-fabrication rfq <item-id> accept"
)]
pub struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    #[arg(long, global = true, help = "Path to a dealflow.toml config file")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override database.url")]
    database_url: Option<String>,
    #[arg(long, global = true, help = "Override logging.level")]
    log_level: Option<String>,
    #[arg(long, global = true, value_parser = parse_log_format, help = "compact, pretty or json")]
    log_format: Option<LogFormat>,
}

impl GlobalArgs {
    fn load_options(self) -> LoadOptions {
        LoadOptions {
            require_file: self.config.is_some(),
            config_path: self.config,
            overrides: ConfigOverrides {
                database_url: self.database_url,
                log_level: self.log_level,
                log_format: self.log_format,
                ..ConfigOverrides::default()
            },
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo pipeline tree, items and purchases (idempotent)")]
    Seed,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Print the pipeline forest with per-stage item counts")]
    Tree,
    #[command(about = "List the items of one stage of a pipeline")]
    Stage { pipeline: String, stage: String },
    #[command(about = "Create a pipeline, optionally under a parent")]
    CreatePipeline {
        name: String,
        #[arg(long)]
        parent: Option<String>,
    },
    #[command(about = "Create an RFQ item from an intake JSON document")]
    CreateItem {
        pipeline: String,
        #[arg(long = "intake", help = "Intake form as JSON")]
        intake_json: String,
    },
    #[command(about = "Apply accept, reject, close, convert or delete to an item")]
    Transition {
        pipeline: String,
        stage: String,
        item: String,
        verb: String,
        #[arg(long, help = "Required for reject and close")]
        reason: Option<String>,
    },
    #[command(about = "Apply an in-stage edit given as tagged JSON")]
    Edit {
        pipeline: String,
        stage: String,
        item: String,
        #[arg(long = "json", help = "Edit as tagged JSON, see `Edit` variants")]
        edit_json: String,
    },
    #[command(about = "Customer and supplier pending totals")]
    Totals {
        #[arg(long)]
        pipeline: Option<String>,
    },
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    value.parse::<LogFormat>().map_err(|error| error.to_string())
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = cli.global.load_options();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(options),
        Command::Seed => commands::seed::run(options),
        Command::Config => commands::config::run(options),
        Command::Tree => commands::pipeline::tree(options),
        Command::Stage { pipeline, stage } => commands::pipeline::stage(options, pipeline, stage),
        Command::CreatePipeline { name, parent } => {
            commands::pipeline::create_pipeline(options, name, parent)
        }
        Command::CreateItem { pipeline, intake_json } => {
            commands::pipeline::create_item(options, pipeline, intake_json)
        }
        Command::Transition { pipeline, stage, item, verb, reason } => {
            commands::pipeline::transition(
                options,
                TransitionArgs { pipeline, stage, item, verb, reason },
            )
        }
        Command::Edit { pipeline, stage, item, edit_json } => {
            commands::pipeline::edit(options, EditArgs { pipeline, stage, item, edit_json })
        }
        Command::Totals { pipeline } => commands::pipeline::totals(options, pipeline),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
