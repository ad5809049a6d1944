use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use nn_service::logging::init_logging;
use nn_service::{BackendSelection, Preference, ReferenceMode, ServiceConfig};
use nn_service_cli::{build_registry, run_smoke, SmokeOptions};

/// Inspect and exercise the neural network service.
#[derive(Parser)]
#[command(name = "nnsvc", version, about, long_about = None)]
struct Cli {
    /// Default log filter when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered backends in selection order
    Backends,

    /// Build, compile and execute a small graph end-to-end
    Smoke {
        /// Backend name or "auto"; overrides NN_SERVICE_BACKEND
        #[arg(short, long)]
        backend: Option<String>,

        /// Make the reference backend copy inputs to outputs
        #[arg(long)]
        passthrough: bool,

        #[arg(short, long, value_enum, default_value_t = PreferenceArg::FastSingleAnswer)]
        preference: PreferenceArg,

        /// Elements in the smoke tensor
        #[arg(short, long, default_value_t = 8)]
        elements: u32,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PreferenceArg {
    LowPower,
    FastSingleAnswer,
    SustainedSpeed,
}

impl From<PreferenceArg> for Preference {
    fn from(arg: PreferenceArg) -> Self {
        match arg {
            PreferenceArg::LowPower => Preference::LowPower,
            PreferenceArg::FastSingleAnswer => Preference::FastSingleAnswer,
            PreferenceArg::SustainedSpeed => Preference::SustainedSpeed,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log);
    let mut config = ServiceConfig::from_env().context("reading NN_SERVICE_* environment")?;

    match cli.command {
        Commands::Backends => {
            let registry = build_registry(&config);
            for name in registry.list_backends() {
                let status = match registry.create(&name) {
                    Some(Ok(_)) => "available".to_string(),
                    Some(Err(err)) => format!("unavailable: {err}"),
                    None => continue,
                };
                println!("{name:<12} {status}");
            }
        }
        Commands::Smoke {
            backend,
            passthrough,
            preference,
            elements,
        } => {
            if let Some(backend) = backend {
                config.backend = BackendSelection::from(backend);
            }
            if passthrough {
                config.reference_mode = ReferenceMode::Passthrough;
            }
            let options = SmokeOptions {
                preference: preference.into(),
                elements,
            };
            let report = run_smoke(config, &options).await?;
            println!("backend:    {}", report.backend);
            println!("preference: {}", report.preference);
            println!("input:      {:?}", report.input);
            println!("output:     {:?}", report.output);
            println!("echoed:     {}", report.echoed());
        }
    }
    Ok(())
}
