//! Checks on client input before it reaches a room or engine.

use thiserror::Error;

use crate::state::dice::DICE_COUNT;
use crate::state::room::{ROOM_CODE_ALPHABET, ROOM_CODE_LENGTH};

/// Visible characters allowed in a player name.
pub const MAX_NAME_LENGTH: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Player name cannot be empty")]
    EmptyName,
    #[error("Player name must be 20 characters or less")]
    NameTooLong,
    #[error("Dice indices must be an array")]
    DiceIndicesNotArray,
    #[error("Dice indices must be integers between 0 and 5")]
    DiceIndexOutOfRange,
    #[error("Invalid room code")]
    RoomCode,
}

/// Strip control characters and surrounding whitespace, then check length.
pub fn sanitize_player_name(raw: &str) -> Result<String, ValidationError> {
    let stripped: String = raw.chars().filter(|c| !is_stripped_control(*c)).collect();
    let name = stripped.trim();

    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(ValidationError::NameTooLong);
    }
    Ok(name.to_string())
}

fn is_stripped_control(c: char) -> bool {
    matches!(c, '\u{0}'..='\u{1f}' | '\u{7f}')
}

/// Dice slots from an untyped payload. Each must be an integer in `0..6`.
pub fn validate_dice_indices(raw: &serde_json::Value) -> Result<Vec<usize>, ValidationError> {
    let items = raw.as_array().ok_or(ValidationError::DiceIndicesNotArray)?;

    items
        .iter()
        .map(|item| {
            let index = match item.as_u64() {
                Some(n) => Some(n),
                // 2.0 is still an integer
                None => item
                    .as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= 0.0)
                    .map(|f| f as u64),
            };
            index
                .filter(|n| *n < DICE_COUNT as u64)
                .map(|n| n as usize)
                .ok_or(ValidationError::DiceIndexOutOfRange)
        })
        .collect()
}

/// Uppercase a room code and check its shape.
pub fn normalize_room_code(raw: &str) -> Result<String, ValidationError> {
    let code = raw.trim().to_uppercase();
    let well_formed = code.len() == ROOM_CODE_LENGTH
        && code.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b));

    if well_formed {
        Ok(code)
    } else {
        Err(ValidationError::RoomCode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_player_name("  Anne Bonny  ").unwrap(), "Anne Bonny");
        assert_eq!(sanitize_player_name("Calico\u{0}\u{7f} Jack\n").unwrap(), "Calico Jack");
        assert_eq!(sanitize_player_name("\t\r\n "), Err(ValidationError::EmptyName));
        assert_eq!(sanitize_player_name(""), Err(ValidationError::EmptyName));
    }

    #[test]
    fn test_name_length() {
        assert!(sanitize_player_name(&"x".repeat(20)).is_ok());
        assert_eq!(
            sanitize_player_name(&"x".repeat(21)),
            Err(ValidationError::NameTooLong)
        );
        // Counted in characters, not bytes
        assert!(sanitize_player_name(&"☠".repeat(20)).is_ok());
    }

    #[test]
    fn test_dice_indices() {
        assert_eq!(validate_dice_indices(&json!([0, 5, 2])).unwrap(), vec![0, 5, 2]);
        assert_eq!(validate_dice_indices(&json!([])).unwrap(), Vec::<usize>::new());
        assert_eq!(validate_dice_indices(&json!([3.0])).unwrap(), vec![3]);
    }

    #[test]
    fn test_bad_dice_indices() {
        assert_eq!(
            validate_dice_indices(&json!("0,1")),
            Err(ValidationError::DiceIndicesNotArray)
        );
        for bad in [json!([6]), json!([-1]), json!([1.5]), json!(["1"]), json!([null])] {
            assert_eq!(
                validate_dice_indices(&bad),
                Err(ValidationError::DiceIndexOutOfRange)
            );
        }
    }

    #[test]
    fn test_room_code() {
        assert_eq!(normalize_room_code(" abcde ").unwrap(), "ABCDE");
        assert_eq!(normalize_room_code("abc"), Err(ValidationError::RoomCode));
        assert_eq!(normalize_room_code("ABCD0"), Err(ValidationError::RoomCode));
        assert_eq!(normalize_room_code("ABCDI"), Err(ValidationError::RoomCode));
    }
}
