// Headless loopback demo: one room and a few bot clients in one process,
// talking over delayed in-memory transports.
//
// Usage: rally-netsim [config.json] [map.txt]

use bevy::app::ScheduleRunnerPlugin;
use bevy::log::{LogPlugin, error, info};
use bevy::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rally_netsim::game_logic::{Clock, Input, SystemClock, Tile, TileGrid, TileKind};
use rally_netsim::{Client, Room, SimConfig, Transport};
use std::sync::Arc;
use std::time::Duration;

const BOT_COUNT: u64 = 2;
const RUN_SECONDS: f64 = 12.0;
const REPORT_INTERVAL: f64 = 1.0;
// when the first bot paints an oil slick onto the shared map
const EDIT_AT: f64 = 6.0;

struct Bot {
    client: Client,
    rng: StdRng,
    input: Input,
    hold: u32,
}

impl Bot {
    fn next_input(&mut self) -> Input {
        if self.hold == 0 {
            self.input = Input::new(
                self.rng.random_range(0.2..=1.0),
                self.rng.random_range(-1.0..=1.0),
                self.rng.random_bool(0.1),
            );
            self.hold = self.rng.random_range(20..90);
        } else {
            self.hold -= 1;
        }
        self.input
    }
}

#[derive(Resource)]
struct Sim {
    clock: Arc<SystemClock>,
    room: Room,
    bots: Vec<Bot>,
    next_report: f64,
    edited: bool,
}

impl Sim {
    fn new(config: &SimConfig, terrain: TileGrid) -> rally_netsim::Result<Self> {
        let clock = Arc::new(SystemClock::new());
        let mut room = Room::new(config, terrain.clone());
        let mut bots = Vec::new();
        for seed in 1..=BOT_COUNT {
            let (server_end, client_end) = Transport::pair(clock.clone(), config.latency);
            let client = Client::new(config, terrain.clone(), client_end, clock.clone());
            client.join()?;
            room.add_client(server_end)?;
            bots.push(Bot {
                client,
                rng: StdRng::seed_from_u64(seed),
                input: Input::NEUTRAL,
                hold: 0,
            });
        }
        Ok(Self {
            clock,
            room,
            bots,
            next_report: REPORT_INTERVAL,
            edited: false,
        })
    }
}

#[derive(Resource)]
struct Setup {
    config: SimConfig,
    terrain: TileGrid,
}

fn main() -> rally_netsim::Result<()> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => SimConfig::load(path)?,
        None => SimConfig::default(),
    };
    let terrain = match args.next() {
        Some(path) => TileGrid::load_from_file(path)?,
        None => TileGrid::parse(include_str!("../demos/oval.txt"))?,
    };
    let frame = Duration::from_secs_f64(0.5 / config.client_tick_rate);

    App::new()
        .add_plugins((
            MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(frame)),
            LogPlugin::default(),
        ))
        .insert_resource(Setup { config, terrain })
        .add_systems(Startup, start_sim)
        .add_systems(
            Update,
            (drive_bots, edit_terrain, advance_sim, report_positions, finish)
                .chain()
                .run_if(resource_exists::<Sim>),
        )
        .run();
    Ok(())
}

fn start_sim(mut commands: Commands, setup: Res<Setup>, mut exit: EventWriter<AppExit>) {
    match Sim::new(&setup.config, setup.terrain.clone()) {
        Ok(mut sim) => {
            let now = sim.clock.now();
            sim.room.start(now);
            for bot in &mut sim.bots {
                bot.client.start(now);
            }
            info!(
                "demo running for {RUN_SECONDS}s with {} bots, {:.0} ms one-way latency",
                sim.bots.len(),
                setup.config.latency * 1000.0
            );
            commands.insert_resource(sim);
        }
        Err(e) => {
            error!("could not start demo: {e}");
            exit.write(AppExit::error());
        }
    }
}

fn drive_bots(mut sim: ResMut<Sim>) {
    for bot in &mut sim.bots {
        let input = bot.next_input();
        bot.client.set_input(input);
    }
}

fn edit_terrain(mut sim: ResMut<Sim>) {
    if sim.edited || sim.clock.now() < EDIT_AT {
        return;
    }
    sim.edited = true;
    let Some(bot) = sim.bots.first() else {
        return;
    };
    let mut terrain = bot.client.terrain().clone();
    let middle = terrain.size() / 2;
    terrain.paint(
        (middle.saturating_sub(1), middle.saturating_sub(1)),
        (middle, middle),
        Tile::new(TileKind::Oil, 0),
    );
    if let Err(e) = bot.client.send_map_update(&terrain) {
        error!("map update failed: {e}");
    }
}

fn advance_sim(mut sim: ResMut<Sim>) {
    let now = sim.clock.now();
    sim.room.wake(now);
    for bot in &mut sim.bots {
        bot.client.wake(now);
    }
}

fn report_positions(mut sim: ResMut<Sim>) {
    let now = sim.clock.now();
    if now < sim.next_report {
        return;
    }
    sim.next_report += REPORT_INTERVAL;

    info!(
        "t={now:.1}s room tick {} with {} participants, checksum {:016x}",
        sim.room.ticks(),
        sim.room.participants().len(),
        sim.room.world().checksum()
    );
    for bot in &sim.bots {
        let (Some(id), Some(body)) = (bot.client.participant_id(), bot.client.local_body()) else {
            continue;
        };
        info!(
            "  {id} at ({:.1}, {:.1}, {:.2}) {:.1} m/s{}",
            body.x,
            body.y,
            body.z,
            body.speed(),
            if body.skidding { " skidding" } else { "" }
        );
    }
}

fn finish(mut sim: ResMut<Sim>, mut exit: EventWriter<AppExit>) {
    if sim.clock.now() < RUN_SECONDS {
        return;
    }
    for bot in &mut sim.bots {
        bot.client.stop();
        bot.client.leave();
    }
    sim.room.stop();
    exit.write(AppExit::Success);
}
