use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = reactive_visuals::config::Config::parse();
    if cfg.list_devices {
        reactive_visuals::capture::list_input_devices()?;
        return Ok(());
    }

    reactive_visuals::app::run(cfg)
}
