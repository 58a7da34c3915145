use std::{future::Future, path::PathBuf, pin::Pin, time::Duration};

use anyhow::{anyhow, bail};
use clap::{Parser, Subcommand};
use indicatif::ProgressBar;
use windlass_control::{
    ConfigBuilder, Deployment, Events, FlashPreferences, Instant, PositionController, Retrieval,
    Windlass,
};
use windlass_physics::{LenExt as _, Vessel};
use windlass_protocol::{Cmd, Stage, Status};

use crate::{
    flash::FileFlash,
    simulator::{Helm, Motor, Simulation},
};

mod flash;
mod simulator;

const TICK: Duration = Duration::from_millis(50);

/// Simulated time per step of the main loop.
const STEP: Duration = Duration::from_millis(50);

/// Give up if a scenario runs for longer than this, in simulated time.
const GIVE_UP: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    scenario: Scenario,

    /// Where to keep the simulated flash.
    #[arg(long, default_value = "windlass-flash.bin")]
    flash: PathBuf,

    /// Simulated seconds per real second.
    #[arg(long, default_value_t = 20.0)]
    speedup: f64,

    /// How fast the winch really pays out, in ms per meter.
    #[arg(long, default_value_t = 1400.0)]
    down_speed: f32,

    /// How fast the winch really hauls in, in ms per meter.
    #[arg(long, default_value_t = 1800.0)]
    up_speed: f32,

    /// Gypsy circumference in meters.
    #[arg(long, default_value_t = 0.25)]
    gypsy: f32,
}

#[derive(Subcommand)]
enum Scenario {
    /// Anchor, letting out `scope` times the depth.
    Deploy {
        #[arg(long)]
        depth: f32,
        #[arg(long, default_value_t = 5.0)]
        scope: f32,
        /// Wind in knots. Leave it out to simulate a dead wind instrument.
        #[arg(long)]
        wind: Option<f32>,
    },
    /// Lie to `rode` meters of chain, then bring the anchor up.
    Retrieve {
        #[arg(long)]
        depth: f32,
        #[arg(long)]
        rode: f32,
    },
}

type SimWindlass = Windlass<Motor, FlashPreferences<FileFlash>>;

enum Outcome {
    Done,
    Interrupted,
}

struct Harbor {
    windlass: SimWindlass,
    sim: Simulation,
    now: Instant,
    interval: tokio::time::Interval,
    bar: ProgressBar,
    ctrl_c: Pin<Box<dyn Future<Output = std::io::Result<()>>>>,
}

impl Harbor {
    /// Sends a command the way it would arrive over the air.
    fn send(&mut self, cmd: Cmd) -> anyhow::Result<()> {
        let bytes = postcard::to_allocvec(&cmd)?;
        let cmd: Cmd = postcard::from_bytes(&bytes)?;
        self.windlass
            .handle(cmd, self.now)
            .map_err(|e| anyhow!("{cmd:?} refused: {e}"))
    }

    async fn run_until(
        &mut self,
        mut done: impl FnMut(&SimWindlass, &Events) -> bool,
    ) -> anyhow::Result<Outcome> {
        let deadline = self.now + GIVE_UP;
        loop {
            tokio::select! {
                _ = self.interval.tick() => {}
                res = &mut self.ctrl_c => {
                    res?;
                    self.windlass.stop_all(self.now);
                    self.bar.abandon_with_message("stopped");
                    return Ok(Outcome::Interrupted);
                }
            }

            self.now = self.now + STEP;
            for _ in 0..self.sim.advance(STEP) {
                self.windlass.pulse(self.now);
            }
            self.windlass.set_telemetry(self.sim.telemetry());
            let events = self.windlass.poll(self.now);
            self.report(&events);

            if done(&self.windlass, &events) {
                return Ok(Outcome::Done);
            }
            if self.now > deadline {
                self.windlass.stop_all(self.now);
                bail!("gave up after {} simulated minutes", GIVE_UP.as_secs() / 60);
            }
        }
    }

    fn report(&self, events: &Events) {
        let clock = self.now.as_millis() / 1000;
        if let Some(t) = events.stage {
            self.bar
                .println(format!("[{clock:>5}s] {}", t.to.display_name()));
        }
        if let Some(t) = events.retrieval {
            self.bar
                .println(format!("[{clock:>5}s] retrieval: {:?}", t.to));
        }
        if let Some(status) = events.status {
            self.bar.set_message(describe(&status, self.sim.distance));
        }
    }
}

fn describe(status: &Status, distance: f32) -> String {
    let stage = match status.stage {
        Stage::Idle => "",
        stage => stage.display_name(),
    };
    format!(
        "{stage} rode {:.1} m, slack {:.1} m, {:.1} m from the anchor ({})",
        status.rode,
        status.slack,
        distance,
        status.direction.label()
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();

    let depth = match args.scenario {
        Scenario::Deploy { depth, .. } | Scenario::Retrieve { depth, .. } => depth,
    };

    let flash = FileFlash::open(&args.flash)?;
    let prefs = FlashPreferences::new(flash, 0);
    let config = ConfigBuilder::default().build();
    let vessel = Vessel::default();
    let motor = Motor::default();
    let ctl = PositionController::new(config, vessel, motor.clone(), prefs);
    let calibration = *ctl.calibration();
    println!(
        "winch speeds: {:.0} ms/m down, {:.0} ms/m up",
        calibration.down_ms_per_m, calibration.up_ms_per_m
    );

    let now = Instant::from_millis(0);
    let windlass = Windlass::new(
        ctl,
        Deployment::default(),
        Retrieval::default(),
        args.gypsy.m(),
        now,
    );

    let mut sim = Simulation::new(motor, vessel, depth);
    sim.down_ms_per_m = args.down_speed;
    sim.up_ms_per_m = args.up_speed;
    sim.gypsy = args.gypsy;

    let bar = ProgressBar::new_spinner();
    bar.enable_steady_tick(TICK);
    let mut harbor = Harbor {
        windlass,
        sim,
        now,
        interval: tokio::time::interval(STEP.div_f64(args.speedup)),
        bar,
        ctrl_c: Box::pin(tokio::signal::ctrl_c()),
    };

    // The simulated chain starts in the locker.
    harbor.send(Cmd::ResetCounter)?;

    let outcome = match args.scenario {
        Scenario::Deploy { scope, wind, .. } => {
            harbor.sim.wind = wind;
            harbor.send(Cmd::Deploy { scope })?;
            harbor
                .run_until(|_, events| events.stage.is_some_and(|t| t.to == Stage::Idle))
                .await?
        }
        Scenario::Retrieve { rode, .. } => {
            harbor.bar.set_message(format!("letting out {rode:.1} m"));
            harbor.send(Cmd::PayOut(rode))?;
            let outcome = harbor
                .run_until(|windlass, _| !windlass.controller().is_active())
                .await?;
            match outcome {
                Outcome::Interrupted => outcome,
                Outcome::Done => {
                    harbor.sim.helm = Helm::Motoring;
                    harbor.send(Cmd::Retrieve)?;
                    harbor
                        .run_until(|windlass, _| !windlass.retrieval().is_running())
                        .await?
                }
            }
        }
    };

    if let Outcome::Done = outcome {
        let status = harbor.windlass.status();
        harbor
            .bar
            .finish_with_message(format!("done: {:.1} m of chain out", status.rode));
    }
    let calibration = harbor.windlass.controller().calibration();
    println!(
        "learned speeds: {:.0} ms/m down, {:.0} ms/m up",
        calibration.down_ms_per_m, calibration.up_ms_per_m
    );
    Ok(())
}
