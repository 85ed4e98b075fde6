//! The authoritative session.
//!
//! A `Room` owns the one true `WorldState` and advances it on its own fixed
//! timestep. Clients talk to it only through their `Transport`; whatever
//! arrives is queued on a channel and applied at the start of the next tick.

use crate::config::{SimConfig, SpawnConfig, TerrainAuthority};
use crate::error::TransportError;
use crate::game_logic::{
    Body, FixedTimestep, Input, LoopHandler, ParticipantId, TerrainData, TileGrid, Tuning,
    WorldState, step_world,
};
use crate::net::{Message, Transport};
use bevy::log::{debug, info, trace, warn};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::mpsc::{Receiver, Sender, channel};

enum RoomEvent {
    Message(ParticipantId, Message),
    Departed(ParticipantId),
}

struct Participant {
    transport: Transport,
    // last-write-wins, never queued
    input: Input,
}

struct RoomState {
    participants: BTreeMap<ParticipantId, Participant>,
    next_id: u32,
    joined: usize,
    world: WorldState,
    terrain: TileGrid,
    tuning: Tuning,
    spawn: SpawnConfig,
    authority: TerrainAuthority,
    events_tx: Sender<RoomEvent>,
    events_rx: Mutex<Receiver<RoomEvent>>,
    ticks: u64,
}

impl RoomState {
    /// Pump delayed frames, then apply everything that arrived since the
    /// last tick in arrival order.
    fn poll(&mut self) {
        for participant in self.participants.values() {
            participant.transport.pump();
        }
        let events: Vec<RoomEvent> = {
            let rx = self
                .events_rx
                .get_mut()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            rx.try_iter().collect()
        };
        for event in events {
            match event {
                RoomEvent::Message(from, message) => self.handle_message(from, message),
                RoomEvent::Departed(id) => {
                    self.remove_participant(id);
                }
            }
        }
    }

    fn handle_message(&mut self, from: ParticipantId, message: Message) {
        let Some(participant) = self.participants.get_mut(&from) else {
            debug!("dropping {} from departed participant {from}", message.kind());
            return;
        };
        match message {
            Message::Join {} => debug!("{from} sent JOIN after being welcomed"),
            Message::Input(input) => participant.input = input.clamped(),
            Message::MapUpdate { terrain } => self.apply_map_update(from, terrain),
            other => warn!("ignoring server-bound {} from {from}", other.kind()),
        }
    }

    fn may_edit_terrain(&self, id: ParticipantId) -> bool {
        match self.authority {
            TerrainAuthority::Anyone => true,
            TerrainAuthority::FirstParticipant => self.participants.keys().next() == Some(&id),
        }
    }

    fn apply_map_update(&mut self, from: ParticipantId, terrain: TerrainData) {
        if !self.may_edit_terrain(from) {
            warn!("{from} is not allowed to edit terrain, MAP_UPDATE ignored");
            return;
        }
        match TileGrid::from_data(terrain.clone()) {
            Ok(grid) => {
                info!("{from} replaced terrain ({0}x{0} tiles)", grid.size());
                self.terrain = grid;
                self.broadcast(&Message::MapSync { terrain });
            }
            Err(e) => warn!("rejecting MAP_UPDATE from {from}: {e}"),
        }
    }

    fn add_participant(&mut self, transport: Transport) -> Result<ParticipantId, TransportError> {
        let id = ParticipantId(self.next_id);
        self.next_id += 1;

        let position = self.spawn.position(
            self.joined,
            &self.terrain,
            self.terrain.extent(),
            &self.tuning.vehicle,
        );
        self.joined += 1;
        self.world.push(Body::at(position, self.spawn.yaw).with_id(id));

        let tx = self.events_tx.clone();
        transport.on_receive(move |message| {
            // the room may already be gone
            let _ = tx.send(RoomEvent::Message(id, message));
        });
        let tx = self.events_tx.clone();
        transport.on_disconnect(move || {
            let _ = tx.send(RoomEvent::Departed(id));
        });

        self.participants.insert(
            id,
            Participant {
                transport: transport.clone(),
                input: Input::NEUTRAL,
            },
        );
        info!("{id} joined, {} in room", self.participants.len());

        let welcome = Message::Welcome {
            slot_id: id,
            initial_state: self.world.clone(),
        };
        if let Err(e) = transport.send(&welcome) {
            self.remove_participant(id);
            return Err(e);
        }
        Ok(id)
    }

    fn remove_participant(&mut self, id: ParticipantId) -> Option<Participant> {
        let participant = self.participants.remove(&id)?;
        self.world.remove(id);
        info!("{id} left, {} in room", self.participants.len());
        Some(participant)
    }

    /// Encode once and send the same frame to everyone. Ends that turn out
    /// to be unreachable are dropped from the room.
    fn broadcast(&mut self, message: &Message) {
        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("could not encode {}: {e}", message.kind());
                return;
            }
        };
        let mut unreachable = Vec::new();
        for (id, participant) in &self.participants {
            if participant.transport.send_frame(frame.clone()).is_err() {
                unreachable.push(*id);
            }
        }
        for id in unreachable {
            self.remove_participant(id);
        }
        trace!("{} sent to {} participants", message.kind(), self.participants.len());
    }
}

impl LoopHandler for RoomState {
    fn update(&mut self, dt: f64) {
        self.poll();

        let participants = &self.participants;
        self.world = step_world(
            &self.world,
            |body| {
                body.id
                    .and_then(|id| participants.get(&id))
                    .map_or(Input::NEUTRAL, |p| p.input)
            },
            dt,
            &self.terrain,
            &self.tuning,
        );
        self.ticks += 1;

        let state = Message::State {
            world_state: self.world.clone(),
        };
        self.broadcast(&state);
    }

    fn render(&mut self, _alpha: f64) {}
}

/// Authoritative session driving one shared world.
pub struct Room {
    ticker: FixedTimestep<RoomState>,
}

impl Room {
    pub fn new(config: &SimConfig, terrain: TileGrid) -> Self {
        let (events_tx, events_rx) = channel();
        let state = RoomState {
            participants: BTreeMap::new(),
            next_id: 1,
            joined: 0,
            world: WorldState::new(),
            terrain,
            tuning: config.tuning(),
            spawn: config.spawn.clone(),
            authority: config.terrain_authority,
            events_tx,
            events_rx: Mutex::new(events_rx),
            ticks: 0,
        };
        Self {
            ticker: FixedTimestep::new(state, config.server_tick_rate)
                .with_max_frame_time(config.max_frame_time),
        }
    }

    pub fn start(&mut self, now: f64) {
        if !self.ticker.is_running() {
            info!("room started at {} Hz", self.ticker.tick_rate());
        }
        self.ticker.start(now);
    }

    pub fn stop(&mut self) {
        if self.ticker.is_running() {
            info!("room stopped after {} ticks", self.ticker.ticks());
        }
        self.ticker.stop();
    }

    pub fn is_running(&self) -> bool {
        self.ticker.is_running()
    }

    /// Run whatever ticks are due at `now`. Returns how many ran.
    pub fn wake(&mut self, now: f64) -> usize {
        self.ticker.wake(now)
    }

    /// Run exactly one tick, whether or not the room is running.
    pub fn tick(&mut self) {
        let dt = self.ticker.dt();
        self.ticker.handler_mut().update(dt);
    }

    pub fn dt(&self) -> f64 {
        self.ticker.dt()
    }

    /// Admit a new participant: spawn its body, start listening on
    /// `transport` and send it WELCOME with the current world.
    pub fn add_client(&mut self, transport: Transport) -> Result<ParticipantId, TransportError> {
        self.ticker.handler_mut().add_participant(transport)
    }

    /// Remove a participant and its body, then close its transport.
    /// Returns false if the id is unknown.
    pub fn remove_client(&mut self, id: ParticipantId) -> bool {
        match self.ticker.handler_mut().remove_participant(id) {
            Some(participant) => {
                participant.transport.disconnect();
                true
            }
            None => false,
        }
    }

    /// Apply pending messages and departures without stepping the world.
    pub fn poll(&mut self) {
        self.ticker.handler_mut().poll();
    }

    pub fn world(&self) -> &WorldState {
        &self.ticker.handler().world
    }

    pub fn terrain(&self) -> &TileGrid {
        &self.ticker.handler().terrain
    }

    pub fn participants(&self) -> Vec<ParticipantId> {
        self.ticker.handler().participants.keys().copied().collect()
    }

    pub fn input_of(&self, id: ParticipantId) -> Option<Input> {
        self.ticker.handler().participants.get(&id).map(|p| p.input)
    }

    pub fn ticks(&self) -> u64 {
        self.ticker.handler().ticks
    }
}
