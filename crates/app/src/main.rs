mod cli;
mod runner;

use crate::runner::Runner;
use bytesize::ByteSize;
use clap::Parser;
use cobalt::{Cobalt, Image, cores::Cores};
use eyre_pretty::{Context, Result};
use tracing::info;

fn setup_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or(EnvFilter::new("app=info,cobalt=info,cores=info,r4300jit=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(true))
        .with(env_filter)
        .init();
}

fn main() -> Result<()> {
    eyre_pretty::install()?;
    setup_tracing();

    let config = cli::Config::parse();

    let data = std::fs::read(&config.rom).context("reading rom")?;
    let image = Image::new(data).context("loading rom")?;
    info!(?image, "loaded rom");

    let cpu = cores::cpu_core(config.mode.into(), (&config.jit).into());
    let mut cobalt = Cobalt::new(
        Cores { cpu },
        cobalt::Config {
            vi_period: config.vi_period,
            ..Default::default()
        },
    );

    cobalt.start(&image);
    if let Some(path) = &config.restore {
        let data = std::fs::read(path).context("reading snapshot")?;
        cobalt.restore(&data).context("restoring snapshot")?;
        info!(size = %ByteSize(data.len() as u64), "restored snapshot");
    }

    let runner = Runner::new(cobalt).context("spawning emulation thread")?;
    match config.frames {
        Some(frames) => runner.frame_advance(frames),
        None => runner.run_cycles(config.cycles),
    }

    runner.wait();

    let snapshot = runner.with_state(|cobalt| {
        let sys = &cobalt.system;
        info!(
            elapsed = sys.scheduler.elapsed(),
            pc = ?sys.cpu.pc,
            stopped = sys.stopped,
            "run finished"
        );

        config.snapshot_out.is_some().then(|| cobalt.snapshot())
    });

    info!(frames = runner.frames(), "frames completed");
    runner.close();

    if let (Some(path), Some(snapshot)) = (&config.snapshot_out, snapshot) {
        std::fs::write(path, &snapshot).context("writing snapshot")?;
        info!(size = %ByteSize(snapshot.len() as u64), path = %path.display(), "wrote snapshot");
    }

    Ok(())
}
