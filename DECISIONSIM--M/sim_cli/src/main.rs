use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use decisionsim_engine::{
    render_text, CompanyProfile, DecisionSimulator, DecisionView, NewCompany, SimulationError,
    SimulatorConfig,
};
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

/// Variable holding the tracing filter directive.
const LOG_ENV: &str = "DECISIONSIM_LOG";
/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "decisionsim.toml";

#[derive(Parser, Debug)]
#[command(name = "decisionsim", version, about = "Simulate business decisions against stored company context")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Overrides `storage.data_dir`.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Use the built-in offline backend instead of the configured endpoint.
    #[arg(long, global = true)]
    offline: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manages company context.
    #[command(subcommand)]
    Company(CompanyCommand),
    /// Simulates a decision and stores the assessment.
    Simulate {
        /// Company key.
        #[arg(long)]
        company: String,
        /// Decision scenario text.
        #[arg(long)]
        scenario: String,
        /// Author label (defaults to "Team").
        #[arg(long)]
        created_by: Option<String>,
    },
    /// Lists a company's decisions, newest first.
    Decisions {
        /// Company key.
        company: String,
        /// Number of entries to display.
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum CompanyCommand {
    /// Registers a company.
    Create(CreateArgs),
    /// Prints a company as JSON.
    Show {
        /// Company key.
        key: String,
    },
    /// Changes selected profile fields.
    Update(UpdateArgs),
}

#[derive(Args, Debug)]
struct CreateArgs {
    #[arg(long)]
    key: String,
    #[arg(long)]
    industry: String,
    #[arg(long)]
    size: String,
    #[arg(long)]
    model: String,
    #[arg(long)]
    sensitivity: String,
    #[arg(long)]
    priorities: String,
}

#[derive(Args, Debug)]
struct UpdateArgs {
    key: String,
    #[arg(long)]
    industry: Option<String>,
    #[arg(long)]
    size: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    sensitivity: Option<String>,
    #[arg(long)]
    priorities: Option<String>,
}

impl UpdateArgs {
    fn apply(self, mut profile: CompanyProfile) -> CompanyProfile {
        if let Some(industry) = self.industry {
            profile.industry = industry;
        }
        if let Some(size) = self.size {
            profile.size = size;
        }
        if let Some(model) = self.model {
            profile.operating_model = model;
        }
        if let Some(sensitivity) = self.sensitivity {
            profile.risk_sensitivity = sensitivity;
        }
        if let Some(priorities) = self.priorities {
            profile.priorities = priorities;
        }
        profile
    }
}

impl From<CreateArgs> for NewCompany {
    fn from(args: CreateArgs) -> Self {
        Self {
            company_key: args.key,
            profile: CompanyProfile {
                industry: args.industry,
                size: args.size,
                operating_model: args.model,
                risk_sensitivity: args.sensitivity,
                priorities: args.priorities,
            },
        }
    }
}

fn main() -> ExitCode {
    init_tracing();
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(sim) = err.downcast_ref::<SimulationError>() {
                tracing::debug!(kind = %sim.kind(), error = %sim, "command failed");
                eprintln!("error: {}", sim.user_message());
            } else {
                eprintln!("error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(cli.config.as_deref(), cli.data_dir, Path::new("."))?;
    let simulator = DecisionSimulator::from_config(&config, cli.offline)?;

    match cli.command {
        Commands::Company(CompanyCommand::Create(args)) => {
            let company = simulator.register_company(args.into())?;
            println!("registered {} ({})", company.company_key, company.id);
        }
        Commands::Company(CompanyCommand::Show { key }) => {
            let company = simulator.company(&key)?;
            println!("{}", serde_json::to_string_pretty(&company)?);
        }
        Commands::Company(CompanyCommand::Update(args)) => {
            let key = args.key.clone();
            let current = simulator.company(&key)?;
            let company = simulator.update_company(&key, args.apply(current.profile))?;
            println!("updated {}", company.company_key);
        }
        Commands::Simulate {
            company,
            scenario,
            created_by,
        } => {
            let runtime = Runtime::new().context("starting async runtime")?;
            let decision = runtime.block_on(simulator.simulate_for_key(
                &company,
                &scenario,
                created_by.as_deref(),
            ))?;
            print!("{}", render_text(&DecisionView::project(decision)));
        }
        Commands::Decisions {
            company,
            limit,
            json,
        } => {
            let workspace = simulator.workspace(&company)?;
            let views: Vec<&DecisionView> = workspace.decisions.iter().take(limit).collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&views)?);
            } else if views.is_empty() {
                println!("no decisions recorded for {company}");
            } else {
                for view in views {
                    println!("{}", render_text(view));
                }
            }
        }
    }
    Ok(())
}

/// Loads `--config`, else `decisionsim.toml` in `cwd` when present, else
/// defaults; then applies environment and `--data-dir` overrides.
fn resolve_config(
    explicit: Option<&Path>,
    data_dir: Option<PathBuf>,
    cwd: &Path,
) -> Result<SimulatorConfig> {
    let discovered = cwd.join(DEFAULT_CONFIG_FILE);
    let mut config = match explicit {
        Some(path) => SimulatorConfig::load(path)?,
        None if discovered.is_file() => SimulatorConfig::load(&discovered)?,
        None => SimulatorConfig::parse("", cwd)?,
    };
    config.apply_env();
    if let Some(dir) = data_dir {
        config.storage.data_dir = dir;
    }
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "decisionsim",
            "simulate",
            "--company",
            "acme",
            "--scenario",
            "Open a depot",
            "--offline",
            "--data-dir",
            "/tmp/sim",
        ])
        .unwrap();
        assert!(cli.offline);
        assert_eq!(cli.data_dir.as_deref(), Some(Path::new("/tmp/sim")));
        match cli.command {
            Commands::Simulate {
                company,
                created_by,
                ..
            } => {
                assert_eq!(company, "acme");
                assert!(created_by.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn company_create_requires_every_field() {
        assert!(Cli::try_parse_from(["decisionsim", "company", "create", "--key", "acme"]).is_err());
        let cli = Cli::try_parse_from([
            "decisionsim", "company", "create", "--key", "acme", "--industry", "Retail",
            "--size", "10", "--model", "D2C", "--sensitivity", "High", "--priorities", "Cash",
        ])
        .unwrap();
        let Commands::Company(CompanyCommand::Create(args)) = cli.command else {
            panic!("expected company create");
        };
        let company: NewCompany = args.into();
        assert_eq!(company.profile.operating_model, "D2C");
    }

    #[test]
    fn update_only_touches_given_fields() {
        let args = UpdateArgs {
            key: "acme".into(),
            industry: None,
            size: None,
            model: None,
            sensitivity: Some("Low".into()),
            priorities: None,
        };
        let profile = CompanyProfile {
            industry: "Retail".into(),
            size: "10".into(),
            operating_model: "D2C".into(),
            risk_sensitivity: "High".into(),
            priorities: "Cash".into(),
        };
        let updated = args.apply(profile.clone());
        assert_eq!(updated.risk_sensitivity, "Low");
        assert_eq!(updated.industry, profile.industry);
    }

    #[test]
    fn discovers_config_in_working_directory() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(DEFAULT_CONFIG_FILE),
            "[storage]\ndata_dir = \"store\"\n",
        )
        .unwrap();
        let config = resolve_config(None, None, dir.path()).unwrap();
        assert_eq!(config.storage.data_dir, dir.path().join("store"));

        let overridden = resolve_config(None, Some(PathBuf::from("/srv/sim")), dir.path()).unwrap();
        assert_eq!(overridden.storage.data_dir, PathBuf::from("/srv/sim"));
    }

    #[test]
    fn missing_config_file_defaults_relative_to_cwd() {
        let dir = tempdir().unwrap();
        let config = resolve_config(None, None, dir.path()).unwrap();
        assert_eq!(config.storage.data_dir, dir.path().join("data"));
        assert!(resolve_config(Some(dir.path().join("absent.toml").as_path()), None, dir.path()).is_err());
    }
}
