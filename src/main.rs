//! nvm-emu: remote-memory latency emulation via uncore HA counters

use std::env;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;

use nvm_emu::config::Config;
use nvm_emu::emu::{Controller, PinnedInjector};
use nvm_emu::pci::SysfsBus;
use nvm_emu::pmon::{Monitor, PmonBox};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    let mut duration_secs: u64 = 0;
    let mut event_override = None;
    let mut dry_run = false;

    let mut iter = args[1..].iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--duration" | "-d" => {
                let value = iter
                    .next()
                    .context("--duration needs a value in seconds")?;
                duration_secs = value
                    .parse()
                    .with_context(|| format!("bad --duration value {value:?}"))?;
            }
            "--event" | "-e" => {
                let value = iter.next().context("--event needs a traffic class")?;
                event_override = Some(value.clone());
            }
            "--dry-run" => dry_run = true,
            "--sample-config" => {
                print!("{}", Config::sample_config());
                return Ok(());
            }
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            other => {
                print_usage();
                anyhow::bail!("unknown argument {other:?}");
            }
        }
    }

    let mut config = Config::get().clone();
    if event_override.is_some() {
        config.event = event_override;
    }

    let bus = Arc::new(SysfsBus::new());
    let unit = PmonBox::open(bus, config.socket(), config.ha_instance())
        .context("cannot open the home agent monitoring box")?;
    let monitor =
        Monitor::new(unit, config.pair()).context("cannot bind the counter pair")?;

    if dry_run {
        return dry_run_sample(monitor, &config);
    }

    let injector = PinnedInjector::spawn(config.target_cpu())
        .context("cannot start the delay worker")?;
    let controller = Controller::start(monitor, Box::new(injector), config.tuning())
        .context("cannot start the sampling controller")?;

    if duration_secs == 0 {
        log::info!("running until killed");
        loop {
            thread::sleep(Duration::from_secs(60));
        }
    }

    thread::sleep(Duration::from_secs(duration_secs));
    controller.stop();
    log::info!("emulation finished after {duration_secs}s");
    Ok(())
}

/// Program the box, take one sample, print it, and leave the box frozen
/// off. Useful for checking placement and permissions before a real run.
fn dry_run_sample(mut monitor: Monitor, config: &Config) -> anyhow::Result<()> {
    let event = config.traffic_class().descriptor();

    monitor.freeze()?;
    monitor.reset_controls()?;
    monitor.reset_counters()?;
    monitor.clear_overflow()?;
    monitor.disable_overflow()?;
    monitor.select_event(event)?;
    monitor.enable()?;
    monitor.unfreeze()?;

    thread::sleep(config.settle());

    monitor.freeze()?;
    let count = monitor.read_counter()?;
    monitor.disable()?;
    monitor.unfreeze()?;

    println!("{}: {} in {:?}", event.name, count, config.settle());
    Ok(())
}

fn print_usage() {
    println!("usage: nvm-emu [options]");
    println!();
    println!("  -d, --duration <secs>  stop after this many seconds (0 = run until killed)");
    println!("  -e, --event <class>    traffic class to monitor (see --sample-config)");
    println!("      --dry-run          program the box, print one sample, and exit");
    println!("      --sample-config    print an annotated configuration file");
    println!("  -h, --help             this text");
}
