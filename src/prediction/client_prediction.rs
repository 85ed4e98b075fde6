use crate::config::SimConfig;
use crate::error::TransportError;
use crate::game_logic::{
    Body, Clock, FixedTimestep, Input, LoopHandler, ParticipantId, TileGrid, Tuning, WorldState,
    step_body,
};
use crate::net::{Message, Transport};
use crate::prediction::SnapshotBuffer;
use bevy::log::{debug, info, trace, warn};
use std::sync::mpsc::{Receiver, channel};
use std::sync::{Arc, Mutex};

/// Everything one client knows about the shared world
///
/// Three views of the world are kept side by side:
/// - `authoritative`: the last STATE received, untouched
/// - `predicted`: the same state with the local body stepped forward by
///   local input every client tick, so control feels immediate
/// - `snapshots`: recent authoritative states stamped with the local
///   receipt time, for rendering remote bodies a little in the past
///
/// Reconciliation is a plain overwrite: every STATE replaces both the
/// authoritative and the predicted world. Inputs sent but not yet
/// reflected by the room are not replayed.
struct ClientState {
    transport: Transport,
    clock: Arc<dyn Clock>,
    inbox: Mutex<Receiver<Message>>,

    participant: Option<ParticipantId>,
    input: Input,

    authoritative: WorldState,
    predicted: WorldState,
    snapshots: SnapshotBuffer,
    view: WorldState,

    terrain: TileGrid,
    tuning: Tuning,
    interpolation_delay: f64,
    states_received: u64,
}

impl ClientState {
    /// Pump delayed frames, then apply every message that has arrived.
    fn poll(&mut self) {
        self.transport.pump();
        let messages: Vec<Message> = {
            let rx = self
                .inbox
                .get_mut()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            rx.try_iter().collect()
        };
        for message in messages {
            self.handle_message(message);
        }
    }

    fn handle_message(&mut self, message: Message) {
        let now = self.clock.now();
        match message {
            Message::Welcome {
                slot_id,
                initial_state,
            } => {
                info!("joined as {slot_id} with {} bodies in play", initial_state.len());
                self.participant = Some(slot_id);
                self.accept_state(now, initial_state);
            }
            Message::State { world_state } => {
                self.states_received += 1;
                self.accept_state(now, world_state);
            }
            Message::MapSync { terrain } => match TileGrid::from_data(terrain) {
                Ok(grid) => {
                    info!("terrain replaced ({0}x{0} tiles)", grid.size());
                    self.terrain = grid;
                }
                Err(e) => warn!("keeping current terrain, bad MAP_SYNC: {e}"),
            },
            other => warn!("ignoring client-bound {}", other.kind()),
        }
    }

    fn accept_state(&mut self, now: f64, world: WorldState) {
        self.authoritative = world.clone();
        self.predicted = world.clone();
        self.snapshots.push(now, world);
    }

    fn predict(&mut self, dt: f64) {
        let Some(id) = self.participant else {
            return;
        };
        let Some(body) = self.predicted.body_mut(id) else {
            return;
        };
        *body = step_body(body, self.input, dt, &self.terrain, &self.tuning);
    }

    fn render_view(&self, now: f64) -> WorldState {
        let target = now - self.interpolation_delay;
        let mut view = self
            .snapshots
            .sample(target)
            .unwrap_or_else(|| self.predicted.clone());

        if let Some(id) = self.participant {
            if let Some(local) = self.predicted.body(id) {
                match view.body_mut(id) {
                    Some(slot) => *slot = local.clone(),
                    None => view.push(local.clone()),
                }
            }
        }
        view
    }

    fn local_body(&self) -> Option<&Body> {
        self.participant.and_then(|id| self.predicted.body(id))
    }
}

impl LoopHandler for ClientState {
    fn update(&mut self, dt: f64) {
        self.poll();
        if let Err(e) = self.transport.send(&Message::Input(self.input)) {
            trace!("input not sent: {e}");
        }
        self.predict(dt);
    }

    fn render(&mut self, _alpha: f64) {
        self.view = self.render_view(self.clock.now());
    }
}

/// Predicting, interpolating client bound to one transport.
pub struct Client {
    ticker: FixedTimestep<ClientState>,
}

impl Client {
    pub fn new(
        config: &SimConfig,
        terrain: TileGrid,
        transport: Transport,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (tx, rx) = channel();
        transport.on_receive(move |message| {
            let _ = tx.send(message);
        });
        transport.on_disconnect(|| debug!("client transport disconnected"));

        let state = ClientState {
            transport,
            clock,
            inbox: Mutex::new(rx),
            participant: None,
            input: Input::NEUTRAL,
            authoritative: WorldState::new(),
            predicted: WorldState::new(),
            snapshots: SnapshotBuffer::new(config.snapshot_capacity),
            view: WorldState::new(),
            terrain,
            tuning: config.tuning(),
            interpolation_delay: config.interpolation_delay,
            states_received: 0,
        };
        Self {
            ticker: FixedTimestep::new(state, config.client_tick_rate)
                .with_max_frame_time(config.max_frame_time),
        }
    }

    /// Announce ourselves to the room
    pub fn join(&self) -> Result<(), TransportError> {
        self.ticker.handler().transport.send(&Message::Join {})
    }

    /// Close the transport. The room drops our body when it notices.
    pub fn leave(&self) {
        self.ticker.handler().transport.disconnect();
    }

    /// Latest local control input; sent and predicted on every tick.
    pub fn set_input(&mut self, input: Input) {
        self.ticker.handler_mut().input = input.clamped();
    }

    pub fn input(&self) -> Input {
        self.ticker.handler().input
    }

    /// Ask the room to replace the shared terrain with `terrain`.
    pub fn send_map_update(&self, terrain: &TileGrid) -> Result<(), TransportError> {
        self.ticker.handler().transport.send(&Message::MapUpdate {
            terrain: terrain.to_data(),
        })
    }

    pub fn start(&mut self, now: f64) {
        self.ticker.start(now);
    }

    pub fn stop(&mut self) {
        self.ticker.stop();
    }

    pub fn is_running(&self) -> bool {
        self.ticker.is_running()
    }

    pub fn wake(&mut self, now: f64) -> usize {
        self.ticker.wake(now)
    }

    /// Run exactly one client tick, whether or not the loop is running.
    pub fn tick(&mut self) {
        let dt = self.ticker.dt();
        self.ticker.handler_mut().update(dt);
    }

    /// Apply whatever has arrived without predicting.
    pub fn poll(&mut self) {
        self.ticker.handler_mut().poll();
    }

    pub fn participant_id(&self) -> Option<ParticipantId> {
        self.ticker.handler().participant
    }

    pub fn authoritative(&self) -> &WorldState {
        &self.ticker.handler().authoritative
    }

    pub fn predicted(&self) -> &WorldState {
        &self.ticker.handler().predicted
    }

    pub fn local_body(&self) -> Option<&Body> {
        self.ticker.handler().local_body()
    }

    pub fn snapshots(&self) -> &SnapshotBuffer {
        &self.ticker.handler().snapshots
    }

    pub fn terrain(&self) -> &TileGrid {
        &self.ticker.handler().terrain
    }

    pub fn states_received(&self) -> u64 {
        self.ticker.handler().states_received
    }

    /// What to draw at `now`: remote bodies interpolated `interpolation_delay`
    /// seconds in the past, the local body at its predicted state.
    pub fn render_view(&self, now: f64) -> WorldState {
        self.ticker.handler().render_view(now)
    }

    /// The view computed by the last loop render
    pub fn view(&self) -> &WorldState {
        &self.ticker.handler().view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_logic::{ManualClock, TileKind};
    use bevy::math::DVec3;

    struct Harness {
        client: Client,
        server_end: Transport,
        clock: Arc<ManualClock>,
        sent: Arc<Mutex<Vec<Message>>>,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(0.0));
        let (server_end, client_end) = Transport::pair(clock.clone(), 0.0);
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = sent.clone();
        server_end.on_receive(move |m| sink.lock().unwrap().push(m));
        let client = Client::new(
            &SimConfig::default(),
            TileGrid::flat(32, 4.0, TileKind::Road, 0.0),
            client_end,
            clock.clone(),
        );
        Harness {
            client,
            server_end,
            clock,
            sent,
        }
    }

    fn world_with(id: u32, x: f64) -> WorldState {
        let mut world = WorldState::new();
        let z = SimConfig::default().vehicle.rest_height(crate::game_logic::GRAVITY);
        world.push(Body::at(DVec3::new(x, 64.0, z), 0.0).with_id(ParticipantId(id)));
        world
    }

    fn welcome(h: &Harness, id: u32) {
        h.server_end
            .send(&Message::Welcome {
                slot_id: ParticipantId(id),
                initial_state: world_with(id, 64.0),
            })
            .unwrap();
    }

    #[test]
    fn test_welcome_assigns_identity() {
        let mut h = harness();
        h.client.join().unwrap();
        welcome(&h, 7);
        h.client.poll();

        assert_eq!(h.client.participant_id(), Some(ParticipantId(7)));
        assert_eq!(h.client.authoritative().len(), 1);
        assert_eq!(h.client.snapshots().len(), 1);
        assert_eq!(h.sent.lock().unwrap()[0], Message::Join {});
    }

    #[test]
    fn test_tick_sends_input_and_predicts() {
        let mut h = harness();
        welcome(&h, 1);
        h.client.set_input(Input::new(1.0, 0.0, false));
        for _ in 0..10 {
            h.client.tick();
        }

        let inputs = h
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| matches!(m, Message::Input(i) if i.accel == 1.0))
            .count();
        assert_eq!(inputs, 10);

        let predicted = h.client.local_body().unwrap();
        let authoritative = h.client.authoritative().body(ParticipantId(1)).unwrap();
        assert!(predicted.x > authoritative.x, "local body moves ahead of the room");
    }

    #[test]
    fn test_state_overwrites_prediction() {
        let mut h = harness();
        welcome(&h, 1);
        h.client.set_input(Input::new(1.0, 0.5, false));
        for _ in 0..5 {
            h.client.tick();
        }

        let authoritative = world_with(1, 80.0);
        h.server_end
            .send(&Message::State {
                world_state: authoritative.clone(),
            })
            .unwrap();
        h.client.poll();

        assert_eq!(h.client.predicted(), &authoritative);
        assert_eq!(h.client.authoritative(), &authoritative);
        assert_eq!(h.client.states_received(), 1);
    }

    #[test]
    fn test_render_view_interpolates_remote_and_keeps_local() {
        let mut h = harness();
        welcome(&h, 1);
        h.client.poll();

        let mut at = |t: f64, remote_x: f64| {
            h.clock.set(t);
            let mut world = world_with(1, 64.0);
            world.push(world_with(2, remote_x).bodies[0].clone());
            h.server_end.send(&Message::State { world_state: world }).unwrap();
            h.client.poll();
        };
        at(1.0, 10.0);
        at(2.0, 20.0);

        h.client.set_input(Input::new(1.0, 0.0, false));
        h.client.tick();
        let local = h.client.local_body().unwrap().clone();

        // interpolation delay is 0.1 s
        let view = h.client.render_view(1.6);
        assert!((view.body(ParticipantId(2)).unwrap().x - 15.0).abs() < 1e-9);
        assert_eq!(view.body(ParticipantId(1)), Some(&local));

        let late = h.client.render_view(10.0);
        assert_eq!(late.body(ParticipantId(2)).unwrap().x, 20.0);
    }

    #[test]
    fn test_map_sync_replaces_terrain_unless_invalid() {
        let mut h = harness();
        let sand = TileGrid::flat(8, 4.0, TileKind::Sand, 1.0);
        h.server_end
            .send(&Message::MapSync {
                terrain: sand.to_data(),
            })
            .unwrap();
        h.client.poll();
        assert_eq!(h.client.terrain(), &sand);

        let mut broken = sand.to_data();
        broken.cells.clear();
        h.server_end.send(&Message::MapSync { terrain: broken }).unwrap();
        h.client.poll();
        assert_eq!(h.client.terrain(), &sand);
    }

    #[test]
    fn test_send_map_update() {
        let h = harness();
        let grid = TileGrid::flat(4, 4.0, TileKind::Dirt, 0.0);
        h.client.send_map_update(&grid).unwrap();
        assert_eq!(
            h.sent.lock().unwrap().last(),
            Some(&Message::MapUpdate {
                terrain: grid.to_data()
            })
        );
    }

    #[test]
    fn test_loop_renders_view() {
        let mut h = harness();
        welcome(&h, 3);
        h.client.start(0.0);
        h.clock.set(0.05);
        assert_eq!(h.client.wake(0.05), 3);
        assert!(h.client.view().body(ParticipantId(3)).is_some());
        h.client.stop();
        assert!(!h.client.is_running());
    }

    #[test]
    fn test_input_clamped() {
        let mut h = harness();
        h.client.set_input(Input::new(0.0, 0.0, false));
        h.client.set_input(Input {
            accel: 4.0,
            steer: -9.0,
            handbrake: false,
        });
        assert_eq!(h.client.input(), Input::new(1.0, -1.0, false));
    }
}
