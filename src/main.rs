use std::io::{self, Write};

use anyhow::{ensure, Context, Result};
use clap::Parser;
use log::info;

use anomaly_bridge::{
    init_logging,
    model::OnnxAnomalyModel,
    session::{run_loop, write_result_file, RunContext, SessionOptions},
    Config,
};

fn main() -> Result<()> {
    let config = Config::parse();
    init_logging(config.log_level);

    ensure!(
        config.model_path.exists(),
        "Model path does not exist: {}",
        config.model_path.display()
    );

    let options = SessionOptions::from_config(&config).context("Invalid overlay settings")?;
    let model = OnnxAnomalyModel::new(
        &config.model_path,
        config.device_id,
        config.input_size,
        &config.output_name,
        config.normalization,
    )
    .with_context(|| format!("Failed to load model: {}", config.model_path.display()))?;
    let ctx = RunContext::new(model, options);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "{}", ctx.banner())?;
    out.flush()?;

    let last = run_loop(&ctx, io::stdin().lock(), &mut out)?;

    if config.non_interactive {
        write_result_file(&config.result_file, last.as_ref())?;
        info!("wrote {}", config.result_file.display());
    }

    Ok(())
}
