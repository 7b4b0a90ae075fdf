use serde::{Serialize, Serializer};
use serde_json::Value;

/// Sanitized control values produced by an AI for a single tick.
///
/// A new value replaces the previous one wholesale every tick. The previous
/// tick's value is what the AI receives as `control` in its next `update`
/// request, after [`ControlState::settled`] cleared the fire-and-forget parts.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ControlState {
    /// Forward/backward drive in `[-1, 1]`.
    pub throttle: f64,
    /// Boost flag, serialized as `0` or `1`.
    #[serde(serialize_with = "serialize_flag")]
    pub boost: bool,
    /// Hull rotation in `[-1, 1]`.
    pub turn: f64,
    /// Radar rotation in `[-1, 1]`.
    pub radar_turn: f64,
    /// Gun rotation in `[-1, 1]`.
    pub gun_turn: f64,
    /// Shot power in `[0, 1]`; zero means no shot.
    pub shoot: f64,
    /// Messages addressed to the tank's team.
    pub outbox: Vec<Value>,
    /// Free-form payload shown by debug renderers.
    pub debug: Value,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            throttle: 0.0,
            boost: false,
            turn: 0.0,
            radar_turn: 0.0,
            gun_turn: 0.0,
            shoot: 0.0,
            outbox: Vec::new(),
            debug: Value::Object(serde_json::Map::new()),
        }
    }
}

impl ControlState {
    /// Parses a raw AI response into clamped control values.
    ///
    /// Every numeric field is coerced like a script number conversion; values
    /// that do not convert become `0`. Steering fields clamp to `[-1, 1]`,
    /// `SHOOT` clamps to `[0, 1]` and `BOOST` follows script truthiness.
    /// Outbox entries are copied out of the response.
    #[must_use]
    pub fn from_response(raw: &Value) -> Self {
        let field = |name: &str| raw.get(name).unwrap_or(&Value::Null);

        Self {
            throttle: clamp_signed(coerce_number(field("THROTTLE"))),
            boost: is_truthy(field("BOOST")),
            turn: clamp_signed(coerce_number(field("TURN"))),
            radar_turn: clamp_signed(coerce_number(field("RADAR_TURN"))),
            gun_turn: clamp_signed(coerce_number(field("GUN_TURN"))),
            shoot: coerce_number(field("SHOOT")).clamp(0.0, 1.0),
            outbox: match field("OUTBOX") {
                Value::Array(items) => items.clone(),
                Value::Object(entries) => entries.values().cloned().collect(),
                _ => Vec::new(),
            },
            debug: field("DEBUG").clone(),
        }
    }

    /// Reports whether the control requests a shot.
    #[must_use]
    pub fn wants_to_shoot(&self) -> bool {
        self.shoot > 0.0
    }

    /// Returns the value carried into the next tick: no pending shot, no
    /// outgoing messages.
    #[must_use]
    pub fn settled(mut self) -> Self {
        self.shoot = 0.0;
        self.outbox.clear();
        self
    }
}

/// Converts a JSON value into a number following script conversion rules.
///
/// Returns `0.0` wherever the conversion would produce `NaN`.
#[must_use]
pub fn coerce_number(value: &Value) -> f64 {
    let number = match value {
        Value::Null => 0.0,
        Value::Bool(flag) => f64::from(u8::from(*flag)),
        Value::Number(number) => number.as_f64().unwrap_or(f64::NAN),
        Value::String(text) => parse_numeric_text(text),
        Value::Array(items) => match items.as_slice() {
            [] => 0.0,
            [single] => coerce_number(single),
            _ => f64::NAN,
        },
        Value::Object(_) => f64::NAN,
    };

    if number.is_nan() {
        0.0
    } else {
        number
    }
}

fn parse_numeric_text(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }

    if let Some(number) = parse_prefixed_integer(trimmed) {
        return number;
    }

    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ if trimmed.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => {
            f64::NAN
        }
        _ => trimmed.parse::<f64>().unwrap_or(f64::NAN),
    }
}

/// Unsigned `0x`, `0o` and `0b` literals; any other text yields `None`.
fn parse_prefixed_integer(text: &str) -> Option<f64> {
    let radix = match text.get(..2)? {
        "0x" | "0X" => 16,
        "0o" | "0O" => 8,
        "0b" | "0B" => 2,
        _ => return None,
    };
    let digits = &text[2..];
    if digits.is_empty() {
        return Some(f64::NAN);
    }
    let number = digits.chars().try_fold(0.0, |acc: f64, c| {
        c.to_digit(radix)
            .map(|digit| acc * f64::from(radix) + f64::from(digit))
    });
    Some(number.unwrap_or(f64::NAN))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map_or(false, |n| n != 0.0 && !n.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn clamp_signed(value: f64) -> f64 {
    value.clamp(-1.0, 1.0)
}

fn serialize_flag<S>(flag: &bool, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u8(u8::from(*flag))
}

#[cfg(test)]
mod tests {
    use super::{coerce_number, ControlState};
    use serde_json::json;

    #[test]
    fn coercion_follows_script_number_rules() {
        assert_eq!(coerce_number(&json!(null)), 0.0);
        assert_eq!(coerce_number(&json!(true)), 1.0);
        assert_eq!(coerce_number(&json!(" 0.25 ")), 0.25);
        assert_eq!(coerce_number(&json!("")), 0.0);
        assert_eq!(coerce_number(&json!("fast")), 0.0);
        assert_eq!(coerce_number(&json!("1e3")), 1000.0);
        assert_eq!(coerce_number(&json!("-Infinity")), f64::NEG_INFINITY);
        assert_eq!(coerce_number(&json!([0.5])), 0.5);
        assert_eq!(coerce_number(&json!([1, 2])), 0.0);
        assert_eq!(coerce_number(&json!({ "a": 1 })), 0.0);
    }

    #[test]
    fn prefixed_integer_text_is_read_in_its_radix() {
        assert_eq!(coerce_number(&json!("0x10")), 16.0);
        assert_eq!(coerce_number(&json!(" 0XfF ")), 255.0);
        assert_eq!(coerce_number(&json!("0b1")), 1.0);
        assert_eq!(coerce_number(&json!("0o7")), 7.0);
        assert_eq!(coerce_number(&json!("0x")), 0.0);
        assert_eq!(coerce_number(&json!("0b2")), 0.0);
        assert_eq!(coerce_number(&json!("-0x10")), 0.0);
    }

    #[test]
    fn response_values_are_clamped() {
        let control = ControlState::from_response(&json!({
            "THROTTLE": 7,
            "TURN": "-3",
            "RADAR_TURN": "Infinity",
            "GUN_TURN": "nope",
            "SHOOT": -0.5,
            "BOOST": "yes",
        }));

        assert_eq!(control.throttle, 1.0);
        assert_eq!(control.turn, -1.0);
        assert_eq!(control.radar_turn, 1.0);
        assert_eq!(control.gun_turn, 0.0);
        assert_eq!(control.shoot, 0.0);
        assert!(control.boost);
        assert!(control.outbox.is_empty());
    }

    #[test]
    fn outbox_accepts_arrays_and_keyed_objects() {
        let from_array = ControlState::from_response(&json!({ "OUTBOX": [{ "a": 1 }, 2] }));
        assert_eq!(from_array.outbox, vec![json!({ "a": 1 }), json!(2)]);

        let from_object = ControlState::from_response(&json!({ "OUTBOX": { "0": "hello" } }));
        assert_eq!(from_object.outbox, vec![json!("hello")]);
    }

    #[test]
    fn settled_control_never_keeps_a_shot() {
        let control = ControlState::from_response(&json!({ "SHOOT": 0.7, "OUTBOX": [1] }));
        assert!(control.wants_to_shoot());

        let settled = control.settled();
        assert_eq!(settled.shoot, 0.0);
        assert!(settled.outbox.is_empty());
        assert!(!settled.wants_to_shoot());
    }

    #[test]
    fn boost_serializes_as_numeric_flag() {
        let control = ControlState {
            boost: true,
            ..ControlState::default()
        };
        let json = serde_json::to_value(&control).expect("serialize");
        assert_eq!(json["BOOST"], json!(1));
        assert_eq!(json["RADAR_TURN"], json!(0.0));
        assert_eq!(json["DEBUG"], json!({}));
    }
}
