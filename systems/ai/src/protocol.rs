//! Messages exchanged with execution contexts.

use serde::Serialize;
use serde_json::{json, Value};
use tank_arena_core::{AiDefinition, ControlState, Skin, Tank, TankId, TankState, Team};

/// Team description handed to an AI during initialisation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TeamInfo {
    /// Team name, or the tank's full name when it fights alone.
    pub name: String,
    /// Identifiers of every team member, including the tank itself.
    pub mates: Vec<TankId>,
}

impl TeamInfo {
    /// Describes the team of `tank`.
    ///
    /// Teams of a single member are described like a tank fighting alone.
    #[must_use]
    pub fn for_tank(tank: &Tank, team: Option<&Team>) -> Self {
        match team {
            Some(team) if team.size() > 1 => Self {
                name: team.name().to_owned(),
                mates: team.members().to_vec(),
            },
            _ => Self {
                name: tank.full_name(),
                mates: vec![tank.id()],
            },
        }
    }
}

pub(crate) fn init_request(
    seed: &str,
    tank: &Tank,
    team: &TeamInfo,
    definition: &AiDefinition,
) -> Value {
    let mut info = json!({ "id": tank.id(), "team": team });
    if let (Some(init_data), Value::Object(fields)) = (&definition.init_data, &mut info) {
        let _ = fields.insert("initData".to_owned(), init_data.clone());
    }

    json!({
        "command": "init",
        "seed": seed,
        "settings": { "SKIN": Skin::default().name() },
        "info": info,
        "code": definition.code,
    })
}

pub(crate) fn update_request(state: &TankState, control: &ControlState) -> Value {
    json!({
        "command": "update",
        "state": state,
        "control": control,
    })
}
