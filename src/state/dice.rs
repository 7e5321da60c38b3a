//! Dice and combo detection.
//!
//! Pure functions only; the caller owns the RNG.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Dice rolled each turn.
pub const DICE_COUNT: usize = 6;

/// Face count needed for mutiny or shipwreck.
pub const COMBO_THRESHOLD: usize = 3;

/// The six faces of a Booty die.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiceFace {
    /// Take 2 doubloons from the center
    Doubloon,
    /// Lose 2 doubloons to the treasure
    XMarksSpot,
    /// Steal up to 2 doubloons from a target
    JollyRoger,
    /// Deal 1 damage to a target
    Cutlass,
    /// Lose 1 life
    WalkPlank,
    /// Gain 1 shield
    Shield,
}

impl DiceFace {
    pub const ALL: [DiceFace; DICE_COUNT] = [
        Self::Doubloon,
        Self::XMarksSpot,
        Self::JollyRoger,
        Self::Cutlass,
        Self::WalkPlank,
        Self::Shield,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Doubloon => "doubloon",
            Self::XMarksSpot => "x_marks_spot",
            Self::JollyRoger => "jolly_roger",
            Self::Cutlass => "cutlass",
            Self::WalkPlank => "walk_plank",
            Self::Shield => "shield",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Doubloon => "Doubloon",
            Self::XMarksSpot => "X Marks the Spot",
            Self::JollyRoger => "Jolly Roger",
            Self::Cutlass => "Cutlass",
            Self::WalkPlank => "Walk the Plank",
            Self::Shield => "Shield",
        }
    }

    /// Draw a face uniformly at random.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }
}

/// A single die slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Die {
    /// Stable slot index, 0..6
    pub id: usize,
    pub face: DiceFace,
    /// Locked dice are kept when rolling
    pub locked: bool,
}

/// Combos, in detection priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combo {
    /// One of every face
    BlackbeardsCurse,
    /// Three or more walk the plank
    Mutiny,
    /// Three or more x marks the spot
    Shipwreck,
}

impl Combo {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BlackbeardsCurse => "blackbeards_curse",
            Self::Mutiny => "mutiny",
            Self::Shipwreck => "shipwreck",
        }
    }

    /// Banner text used in the game log.
    pub fn banner(&self) -> &'static str {
        match self {
            Self::BlackbeardsCurse => "BLACKBEARD'S CURSE",
            Self::Mutiny => "MUTINY",
            Self::Shipwreck => "SHIPWRECK",
        }
    }
}

/// Result of rolling the unlocked dice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiceRoll {
    pub dice: [Die; DICE_COUNT],
    pub combo: Option<Combo>,
    pub bonus_count: u32,
}

/// Six unlocked doubloons.
pub fn fresh_dice() -> [Die; DICE_COUNT] {
    std::array::from_fn(|id| Die {
        id,
        face: DiceFace::Doubloon,
        locked: false,
    })
}

/// Draw a face for every slot. Locked slots ignore their draw in [`settle`].
pub fn draw_faces<R: Rng + ?Sized>(rng: &mut R) -> [DiceFace; DICE_COUNT] {
    std::array::from_fn(|_| DiceFace::random(rng))
}

/// Roll every unlocked die.
pub fn roll<R: Rng + ?Sized>(dice: &[Die; DICE_COUNT], rng: &mut R) -> DiceRoll {
    settle(dice, draw_faces(rng))
}

/// Apply drawn faces to the unlocked dice and evaluate the result.
pub fn settle(dice: &[Die; DICE_COUNT], drawn: [DiceFace; DICE_COUNT]) -> DiceRoll {
    let mut next = *dice;
    for (die, face) in next.iter_mut().zip(drawn) {
        if !die.locked {
            die.face = face;
        }
    }

    let faces = faces_of(&next);
    let combo = detect_combo(&faces);
    let bonus_count = bonus_count(&faces, combo);

    DiceRoll {
        dice: next,
        combo,
        bonus_count,
    }
}

pub fn faces_of(dice: &[Die]) -> Vec<DiceFace> {
    dice.iter().map(|d| d.face).collect()
}

pub fn count_face(faces: &[DiceFace], face: DiceFace) -> usize {
    faces.iter().filter(|f| **f == face).count()
}

/// Detect the combo for a final set of faces. First match wins.
pub fn detect_combo(faces: &[DiceFace]) -> Option<Combo> {
    let all_distinct = DiceFace::ALL
        .iter()
        .all(|face| count_face(faces, *face) == 1);

    if faces.len() == DICE_COUNT && all_distinct {
        Some(Combo::BlackbeardsCurse)
    } else if count_face(faces, DiceFace::WalkPlank) >= COMBO_THRESHOLD {
        Some(Combo::Mutiny)
    } else if count_face(faces, DiceFace::XMarksSpot) >= COMBO_THRESHOLD {
        Some(Combo::Shipwreck)
    } else {
        None
    }
}

/// Faces beyond the combo threshold, used to scale mutiny and shipwreck.
pub fn bonus_count(faces: &[DiceFace], combo: Option<Combo>) -> u32 {
    let over = |face| count_face(faces, face).saturating_sub(COMBO_THRESHOLD) as u32;
    match combo {
        Some(Combo::Mutiny) => over(DiceFace::WalkPlank),
        Some(Combo::Shipwreck) => over(DiceFace::XMarksSpot),
        _ => 0,
    }
}

/// Human-readable face counts, in face order, e.g. `2x Doubloon, 4x Cutlass`.
pub fn describe(dice: &[Die]) -> String {
    let faces = faces_of(dice);
    DiceFace::ALL
        .iter()
        .filter_map(|face| match count_face(&faces, *face) {
            0 => None,
            n => Some(format!("{}x {}", n, face.display_name())),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use DiceFace::*;

    #[test]
    fn test_fresh_dice() {
        let dice = fresh_dice();
        for (i, die) in dice.iter().enumerate() {
            assert_eq!(die.id, i);
            assert_eq!(die.face, Doubloon);
            assert!(!die.locked);
        }
    }

    #[test]
    fn test_roll_keeps_locked() {
        let mut dice = fresh_dice();
        dice[0].locked = true;
        dice[3].locked = true;

        let result = settle(&dice, [Cutlass; DICE_COUNT]);

        assert_eq!(result.dice[0].face, Doubloon);
        assert_eq!(result.dice[3].face, Doubloon);
        assert!(result.dice[0].locked);
        for i in [1, 2, 4, 5] {
            assert_eq!(result.dice[i].face, Cutlass);
            assert!(!result.dice[i].locked);
        }
    }

    #[test]
    fn test_random_roll_covers_faces() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let result = roll(&fresh_dice(), &mut rng);
            seen.extend(result.dice.iter().map(|d| d.face));
        }
        assert_eq!(seen.len(), DICE_COUNT);
    }

    #[test]
    fn test_curse_any_order() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut faces = DiceFace::ALL.to_vec();
        for _ in 0..20 {
            faces.shuffle(&mut rng);
            assert_eq!(detect_combo(&faces), Some(Combo::BlackbeardsCurse));
            assert_eq!(bonus_count(&faces, Some(Combo::BlackbeardsCurse)), 0);
        }
    }

    #[test]
    fn test_mutiny() {
        let faces = [WalkPlank, WalkPlank, WalkPlank, Doubloon, Shield, Cutlass];
        assert_eq!(detect_combo(&faces), Some(Combo::Mutiny));
        assert_eq!(bonus_count(&faces, Some(Combo::Mutiny)), 0);

        let faces = [WalkPlank, WalkPlank, WalkPlank, WalkPlank, WalkPlank, Shield];
        assert_eq!(detect_combo(&faces), Some(Combo::Mutiny));
        assert_eq!(bonus_count(&faces, Some(Combo::Mutiny)), 2);
    }

    #[test]
    fn test_mutiny_beats_shipwreck() {
        let faces = [WalkPlank, WalkPlank, WalkPlank, XMarksSpot, XMarksSpot, XMarksSpot];
        assert_eq!(detect_combo(&faces), Some(Combo::Mutiny));
    }

    #[test]
    fn test_shipwreck() {
        let faces = [XMarksSpot, XMarksSpot, XMarksSpot, XMarksSpot, WalkPlank, WalkPlank];
        assert_eq!(detect_combo(&faces), Some(Combo::Shipwreck));
        assert_eq!(bonus_count(&faces, Some(Combo::Shipwreck)), 1);
    }

    #[test]
    fn test_no_combo() {
        assert_eq!(detect_combo(&[Doubloon; DICE_COUNT]), None);
        let faces = [WalkPlank, WalkPlank, XMarksSpot, XMarksSpot, Shield, Shield];
        assert_eq!(detect_combo(&faces), None);
        assert_eq!(bonus_count(&faces, None), 0);
    }

    #[test]
    fn test_describe() {
        let result = settle(
            &fresh_dice(),
            [Doubloon, Cutlass, Doubloon, Shield, Cutlass, Cutlass],
        );
        assert_eq!(describe(&result.dice), "2x Doubloon, 3x Cutlass, 1x Shield");
    }

    #[test]
    fn test_face_serializes_snake_case() {
        assert_eq!(serde_json::json!(XMarksSpot), serde_json::json!("x_marks_spot"));
        assert_eq!(
            serde_json::json!(Combo::BlackbeardsCurse),
            serde_json::json!("blackbeards_curse")
        );
    }
}
