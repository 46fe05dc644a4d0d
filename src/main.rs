use anyhow::Context;
use crosstalk::{cli::parse_args, config::Config, logging::init_tracing, runner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args()?;
    let config = Config::load(&args.config_path)
        .with_context(|| format!("failed to load config from {}", args.config_path.display()))?;
    let _logging = init_tracing(&config.logging)?;

    runner::run(config, &args).await
}
