mod cli;
mod paths;
mod run;

use anyhow::Result;
use cli::Command;
use run::Settings;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    let settings = Settings::load(cli.config.as_deref(), cli.cache_dir.as_deref())?;
    match cli.command {
        Command::Inspect(args) => run::inspect(&settings, args),
        Command::Compile(args) => run::compile(&settings, args),
        Command::Cache(cache) => run::cache(&settings, cache.action),
    }
}
