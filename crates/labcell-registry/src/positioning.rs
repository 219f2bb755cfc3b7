//! Position → coordinate calculation.
//!
//! Each deck type declares one of two strategies: a static table mapping
//! position names to fixed coordinates, or a parametrized call into the
//! deck driver's own positioning method. The indirection lets
//! slot-indexed, integer-indexed, and grid-indexed deck geometries share
//! one acquisition code path.
//!
//! Every failure here is a configuration error — unknown position,
//! unconvertible argument, non-coordinate return value — and is fatal
//! for the placement attempt, never retried.

use std::collections::HashMap;

use labcell_state::{Coordinate, PositionArgType, PositioningStrategy};

use crate::driver::DeckDriver;
use crate::error::{RegistryError, RegistryResult};

/// Compute the coordinate for a named position on a deck.
pub fn resolve_coordinate(
    strategy: &PositioningStrategy,
    deck: &dyn DeckDriver,
    position: &str,
) -> RegistryResult<Coordinate> {
    match strategy {
        PositioningStrategy::StaticTable { positions } => {
            positions.get(position).copied().ok_or_else(|| {
                RegistryError::Positioning(format!(
                    "position {position:?} is not in the static table"
                ))
            })
        }
        PositioningStrategy::MethodCall {
            method,
            position_arg,
            position_arg_type,
            fixed_args,
        } => {
            let mut args = fixed_args.clone();
            args.insert(
                position_arg.clone(),
                convert_position(position, *position_arg_type)?,
            );

            let value = deck.call_position_method(method, &args).map_err(|e| {
                RegistryError::Positioning(format!("method {method:?} failed: {e}"))
            })?;

            coerce_coordinate(&value).ok_or_else(|| {
                RegistryError::Positioning(format!(
                    "method {method:?} returned {value} instead of a coordinate"
                ))
            })
        }
    }
}

/// Convert a position name into the scalar the method expects.
fn convert_position(
    position: &str,
    arg_type: PositionArgType,
) -> RegistryResult<serde_json::Value> {
    match arg_type {
        PositionArgType::Str => Ok(serde_json::Value::String(position.to_string())),
        PositionArgType::Int => position
            .parse::<i64>()
            .map(serde_json::Value::from)
            .map_err(|_| {
                RegistryError::Positioning(format!(
                    "position {position:?} is not an integer index"
                ))
            }),
        PositionArgType::Float => position
            .parse::<f64>()
            .map(serde_json::Value::from)
            .map_err(|_| {
                RegistryError::Positioning(format!(
                    "position {position:?} is not a numeric offset"
                ))
            }),
    }
}

/// Accept a `{x, y, z}` object or a 3-element numeric array.
fn coerce_coordinate(value: &serde_json::Value) -> Option<Coordinate> {
    if let Some(obj) = value.as_object() {
        let x = obj.get("x")?.as_f64()?;
        let y = obj.get("y")?.as_f64()?;
        let z = obj.get("z")?.as_f64()?;
        return Some(Coordinate::new(x, y, z));
    }
    if let Some(arr) = value.as_array() {
        if arr.len() == 3 {
            let x = arr[0].as_f64()?;
            let y = arr[1].as_f64()?;
            let z = arr[2].as_f64()?;
            return Some(Coordinate::new(x, y, z));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverError;

    /// Deck stub whose positioning method echoes a canned value.
    struct StubDeck {
        reply: serde_json::Value,
        expects_method: &'static str,
    }

    impl DeckDriver for StubDeck {
        fn place(
            &self,
            _resource: &str,
            _position: Option<&str>,
            _coordinate: Coordinate,
        ) -> Result<(), DriverError> {
            Ok(())
        }
        fn remove(&self, _resource: &str) -> Result<bool, DriverError> {
            Ok(false)
        }
        fn clear(&self) {}
        fn occupants(&self) -> Vec<(String, Option<String>, Coordinate)> {
            Vec::new()
        }
        fn call_position_method(
            &self,
            method: &str,
            _args: &HashMap<String, serde_json::Value>,
        ) -> Result<serde_json::Value, DriverError> {
            if method != self.expects_method {
                return Err(DriverError::UnknownMethod(method.to_string()));
            }
            Ok(self.reply.clone())
        }
    }

    fn static_strategy() -> PositioningStrategy {
        let mut positions = HashMap::new();
        positions.insert("A1".to_string(), Coordinate::new(10.0, 20.0, 0.0));
        PositioningStrategy::StaticTable { positions }
    }

    fn method_strategy(arg_type: PositionArgType) -> PositioningStrategy {
        PositioningStrategy::MethodCall {
            method: "slot_center".to_string(),
            position_arg: "index".to_string(),
            position_arg_type: arg_type,
            fixed_args: HashMap::new(),
        }
    }

    fn no_deck() -> StubDeck {
        StubDeck {
            reply: serde_json::Value::Null,
            expects_method: "",
        }
    }

    #[test]
    fn static_table_lookup() {
        let coord =
            resolve_coordinate(&static_strategy(), &no_deck(), "A1").unwrap();
        assert_eq!(coord, Coordinate::new(10.0, 20.0, 0.0));
    }

    #[test]
    fn static_table_unknown_position_is_config_error() {
        assert!(matches!(
            resolve_coordinate(&static_strategy(), &no_deck(), "Z9"),
            Err(RegistryError::Positioning(_))
        ));
    }

    #[test]
    fn method_call_with_object_reply() {
        let deck = StubDeck {
            reply: serde_json::json!({"x": 1.0, "y": 2.0, "z": 3.0}),
            expects_method: "slot_center",
        };
        let coord =
            resolve_coordinate(&method_strategy(PositionArgType::Int), &deck, "4").unwrap();
        assert_eq!(coord, Coordinate::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn method_call_with_array_reply() {
        let deck = StubDeck {
            reply: serde_json::json!([5, 6.5, 0]),
            expects_method: "slot_center",
        };
        let coord =
            resolve_coordinate(&method_strategy(PositionArgType::Str), &deck, "B2").unwrap();
        assert_eq!(coord, Coordinate::new(5.0, 6.5, 0.0));
    }

    #[test]
    fn non_numeric_position_for_int_arg_is_config_error() {
        let deck = StubDeck {
            reply: serde_json::json!([0, 0, 0]),
            expects_method: "slot_center",
        };
        assert!(matches!(
            resolve_coordinate(&method_strategy(PositionArgType::Int), &deck, "A1"),
            Err(RegistryError::Positioning(_))
        ));
    }

    #[test]
    fn wrong_return_shape_is_config_error() {
        for reply in [
            serde_json::json!("not a coordinate"),
            serde_json::json!([1, 2]),
            serde_json::json!({"x": 1.0, "y": 2.0}),
            serde_json::json!([1, 2, "three"]),
        ] {
            let deck = StubDeck {
                reply,
                expects_method: "slot_center",
            };
            assert!(matches!(
                resolve_coordinate(&method_strategy(PositionArgType::Int), &deck, "1"),
                Err(RegistryError::Positioning(_))
            ));
        }
    }

    #[test]
    fn unknown_method_is_config_error() {
        let strategy = PositioningStrategy::MethodCall {
            method: "missing_method".to_string(),
            position_arg: "index".to_string(),
            position_arg_type: PositionArgType::Int,
            fixed_args: HashMap::new(),
        };
        let deck = StubDeck {
            reply: serde_json::json!([0, 0, 0]),
            expects_method: "slot_center",
        };
        assert!(matches!(
            resolve_coordinate(&strategy, &deck, "1"),
            Err(RegistryError::Positioning(_))
        ));
    }

    #[test]
    fn fixed_args_are_passed_through() {
        // Verified indirectly: the stub ignores args, so just check the
        // converted position argument type survives serialization.
        let value = convert_position("12", PositionArgType::Int).unwrap();
        assert_eq!(value, serde_json::json!(12));
        let value = convert_position("2.5", PositionArgType::Float).unwrap();
        assert_eq!(value, serde_json::json!(2.5));
        let value = convert_position("A1", PositionArgType::Str).unwrap();
        assert_eq!(value, serde_json::json!("A1"));
    }
}
