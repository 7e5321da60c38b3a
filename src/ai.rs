//! AI seat decisions.
//!
//! A strategy only decides; the orchestrator applies its choices to the
//! engine and owns all pacing.

use std::cmp::Reverse;

use crate::state::dice::{count_face, faces_of, DiceFace, Die};
use crate::state::effects::TargetedFace;
use crate::state::engine::GameState;
use crate::state::player::Player;

/// Decisions an AI seat makes during its turn.
pub trait AiStrategy: Send + Sync {
    /// Dice slots to lock before the next roll. Replaces any earlier locks.
    fn decide_keep_indices(&self, dice: &[Die], me: &Player, state: &GameState) -> Vec<usize>;

    /// Whether to spend another roll.
    fn should_roll_again(
        &self,
        dice: &[Die],
        rolls_remaining: u8,
        me: &Player,
        state: &GameState,
    ) -> bool;

    /// Who to aim a cutlass or jolly roger at. `None` if nobody is left.
    fn select_target(&self, face: TargetedFace, me: &Player, state: &GameState) -> Option<String>;
}

/// Weighs each face and plays greedily.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicStrategy;

impl HeuristicStrategy {
    /// Faces worth at least this much are kept.
    const KEEP_THRESHOLD: i32 = 4;

    /// Locked value at which a single bad die is tolerated.
    const CONTENT_VALUE: i32 = 20;

    /// Opponent lives at which a mutiny looks worthwhile.
    const LOW_LIVES: i32 = 3;

    /// Combined opponent doubloons at which a shipwreck looks worthwhile.
    const RICH_OPPONENTS: u32 = 15;

    pub fn face_value(face: DiceFace) -> i32 {
        match face {
            DiceFace::Doubloon => 8,
            DiceFace::JollyRoger => 7,
            DiceFace::Shield => 5,
            DiceFace::Cutlass => 4,
            DiceFace::XMarksSpot => -3,
            DiceFace::WalkPlank => -5,
        }
    }

    fn opponents<'a>(me: &'a Player, state: &'a GameState) -> impl Iterator<Item = &'a Player> + 'a {
        state
            .players
            .iter()
            .filter(move |p| p.id != me.id && p.is_alive())
    }

    fn opponents_weak(me: &Player, state: &GameState) -> bool {
        Self::opponents(me, state).any(|p| p.lives <= Self::LOW_LIVES)
    }

    fn opponents_rich(me: &Player, state: &GameState) -> bool {
        Self::opponents(me, state).map(|p| p.doubloons).sum::<u32>() >= Self::RICH_OPPONENTS
    }
}

impl AiStrategy for HeuristicStrategy {
    fn decide_keep_indices(&self, dice: &[Die], me: &Player, state: &GameState) -> Vec<usize> {
        let faces = faces_of(dice);
        let chase_mutiny =
            count_face(&faces, DiceFace::WalkPlank) >= 2 && Self::opponents_weak(me, state);
        let chase_shipwreck =
            count_face(&faces, DiceFace::XMarksSpot) >= 2 && Self::opponents_rich(me, state);

        dice.iter()
            .filter(|die| match die.face {
                DiceFace::WalkPlank => chase_mutiny,
                DiceFace::XMarksSpot => chase_shipwreck,
                face => Self::face_value(face) >= Self::KEEP_THRESHOLD,
            })
            .map(|die| die.id)
            .collect()
    }

    fn should_roll_again(
        &self,
        dice: &[Die],
        rolls_remaining: u8,
        _me: &Player,
        _state: &GameState,
    ) -> bool {
        if rolls_remaining == 0 {
            return false;
        }

        let negative = dice
            .iter()
            .filter(|d| !d.locked && Self::face_value(d.face) < 0)
            .count();
        if negative >= 2 {
            return true;
        }

        let locked_value: i32 = dice
            .iter()
            .filter(|d| d.locked)
            .map(|d| Self::face_value(d.face))
            .sum();
        if locked_value >= Self::CONTENT_VALUE && negative <= 1 {
            return false;
        }

        negative >= 1
    }

    fn select_target(&self, face: TargetedFace, me: &Player, state: &GameState) -> Option<String> {
        let target = match face {
            // Finish off the vulnerable, then hit the leader
            TargetedFace::Cutlass => Self::opponents(me, state).min_by_key(|p| {
                let vulnerable = p.lives <= 2 && p.shields == 0;
                (!vulnerable, Reverse(p.doubloons))
            }),
            TargetedFace::JollyRoger => {
                Self::opponents(me, state).min_by_key(|p| Reverse(p.doubloons))
            }
        };
        target.map(|p| p.id.clone())
    }
}
