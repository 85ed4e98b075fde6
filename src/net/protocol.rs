use crate::game_logic::{Input, ParticipantId, TerrainData, WorldState};
use serde::{Deserialize, Serialize};

/// Every message exchanged between a room and its clients.
///
/// On the wire each message is a JSON object `{"type": ..., "payload": ...}`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    // client -> server
    Join {},
    Input(Input),
    MapUpdate {
        terrain: TerrainData,
    },

    // server -> client
    Welcome {
        slot_id: ParticipantId,
        initial_state: WorldState,
    },
    State {
        world_state: WorldState,
    },
    MapSync {
        terrain: TerrainData,
    },
}

impl Message {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(frame: &str) -> Result<Message, serde_json::Error> {
        serde_json::from_str(frame)
    }

    /// Short tag for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Join {} => "JOIN",
            Message::Input(_) => "INPUT",
            Message::MapUpdate { .. } => "MAP_UPDATE",
            Message::Welcome { .. } => "WELCOME",
            Message::State { .. } => "STATE",
            Message::MapSync { .. } => "MAP_SYNC",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_logic::{Body, TileGrid, TileKind};
    use bevy::math::DVec3;

    #[test]
    fn test_wire_shape() {
        let frame = Message::Input(Input::new(0.5, -0.25, true)).encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "INPUT");
        assert_eq!(value["payload"]["accel"], 0.5);
        assert_eq!(value["payload"]["handbrake"], true);

        let join: serde_json::Value =
            serde_json::from_str(&Message::Join {}.encode().unwrap()).unwrap();
        assert_eq!(join["type"], "JOIN");
        assert_eq!(join["payload"], serde_json::json!({}));
        assert_eq!(
            Message::decode(r#"{"type":"JOIN","payload":{}}"#).unwrap(),
            Message::Join {}
        );
    }

    #[test]
    fn test_state_survives_the_wire_bit_exact() {
        let mut world = WorldState::new();
        world.push(
            Body::at(DVec3::new(0.1 + 0.2, 1.0 / 3.0, 0.515_937_5), 2.0_f64.sqrt())
                .with_id(ParticipantId(4)),
        );
        let sent = Message::State { world_state: world.clone() };
        let received = Message::decode(&sent.encode().unwrap()).unwrap();
        match received {
            Message::State { world_state } => assert_eq!(world_state.checksum(), world.checksum()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_terrain_payload_field_names() {
        let data = TileGrid::flat(1, 4.0, TileKind::Road, 0.0).to_data();
        let frame = Message::MapSync { terrain: data }.encode().unwrap();
        assert!(frame.contains(r#""type":"road""#));
        assert!(frame.contains("corner_heights"));
    }

    #[test]
    fn test_unknown_type_is_an_error() {
        assert!(Message::decode(r#"{"type":"TELEPORT","payload":{}}"#).is_err());
        assert!(Message::decode("not json").is_err());
    }
}
