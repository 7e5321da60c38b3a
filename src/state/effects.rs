//! Effect resolution.
//!
//! Turns a finished roll into an ordered list of effects. Nothing is mutated
//! here; the engine applies the list in order.

use serde::{Deserialize, Serialize};

use super::dice::{self, Combo, DiceFace, Die};
use super::player::Player;

pub const DOUBLOON_GAIN: u32 = 2;
pub const TREASURE_LOSS: u32 = 2;
pub const PLANK_LOSS: u32 = 1;
pub const SHIELD_GAIN: u32 = 1;
pub const CUTLASS_DAMAGE: u32 = 1;
pub const STEAL_MAX: u32 = 2;
pub const CURSE_LIVES: u32 = 2;
pub const CURSE_DOUBLOONS: u32 = 5;
pub const MUTINY_BASE: u32 = 1;
pub const SHIPWRECK_BASE: u32 = 3;

/// Faces that need a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetedFace {
    Cutlass,
    JollyRoger,
}

impl TargetedFace {
    pub fn from_face(face: DiceFace) -> Option<Self> {
        match face {
            DiceFace::Cutlass => Some(Self::Cutlass),
            DiceFace::JollyRoger => Some(Self::JollyRoger),
            _ => None,
        }
    }
}

/// A targeting decision owed by the current player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAction {
    pub die_index: usize,
    pub face: TargetedFace,
    pub resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_player_id: Option<String>,
}

impl PendingAction {
    pub fn new(die_index: usize, face: TargetedFace) -> Self {
        Self {
            die_index,
            face,
            resolved: false,
            target_player_id: None,
        }
    }
}

/// One pending action per cutlass or jolly roger slot.
pub fn pending_actions_for(dice: &[Die]) -> Vec<PendingAction> {
    dice.iter()
        .enumerate()
        .filter_map(|(i, die)| TargetedFace::from_face(die.face).map(|f| PendingAction::new(i, f)))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    /// Blocked by shields
    Damage,
    CoinsLost,
    CoinsGained,
    ShieldGained,
    /// Ignores shields
    LifeLost,
}

/// What produced an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectCause {
    Doubloon,
    Treasure,
    Plank,
    Shield,
    Cutlass,
    Plunder,
    Mutiny,
    Shipwreck,
    BlackbeardsCurse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Effect {
    #[serde(rename = "type")]
    pub kind: EffectKind,
    pub cause: EffectCause,
    pub target_id: String,
    /// Set when another player caused the effect; such kills plunder
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    pub amount: u32,
    pub description: String,
}

impl Effect {
    fn on(
        kind: EffectKind,
        cause: EffectCause,
        target: &Player,
        amount: u32,
        description: String,
    ) -> Self {
        Self {
            kind,
            cause,
            target_id: target.id.clone(),
            source_id: None,
            amount,
            description,
        }
    }

    fn from_source(mut self, source: &Player) -> Self {
        self.source_id = Some(source.id.clone());
        self
    }
}

/// Compute the effects of the current player's final dice.
pub fn resolve(
    dice: &[Die],
    pending: &[PendingAction],
    current: &Player,
    players: &[Player],
) -> Vec<Effect> {
    use EffectCause as C;
    use EffectKind as K;

    let faces = dice::faces_of(dice);
    let combo = dice::detect_combo(&faces);
    let bonus = dice::bonus_count(&faces, combo);
    let others: Vec<&Player> = players
        .iter()
        .filter(|p| p.id != current.id && p.is_alive())
        .collect();

    let mut effects = Vec::new();

    match combo {
        Some(Combo::BlackbeardsCurse) => {
            for victim in &others {
                effects.push(
                    Effect::on(
                        K::LifeLost,
                        C::BlackbeardsCurse,
                        victim,
                        CURSE_LIVES,
                        format!("{} loses {} lives from Blackbeard's Curse!", victim.name, CURSE_LIVES),
                    )
                    .from_source(current),
                );
                effects.push(
                    Effect::on(
                        K::CoinsLost,
                        C::BlackbeardsCurse,
                        victim,
                        CURSE_DOUBLOONS,
                        format!(
                            "{} loses {} doubloons from Blackbeard's Curse!",
                            victim.name, CURSE_DOUBLOONS
                        ),
                    )
                    .from_source(current),
                );
            }
            // The curse replaces every individual die effect.
            return effects;
        }
        Some(Combo::Mutiny) => {
            let amount = MUTINY_BASE + bonus;
            for victim in &others {
                effects.push(
                    Effect::on(
                        K::LifeLost,
                        C::Mutiny,
                        victim,
                        amount,
                        format!("{} loses {} life from Mutiny!", victim.name, amount),
                    )
                    .from_source(current),
                );
            }
        }
        Some(Combo::Shipwreck) => {
            let amount = SHIPWRECK_BASE + bonus;
            for victim in &others {
                effects.push(Effect::on(
                    K::CoinsLost,
                    C::Shipwreck,
                    victim,
                    amount,
                    format!("{} loses {} doubloons from Shipwreck!", victim.name, amount),
                ));
            }
        }
        None => {}
    }

    for (index, die) in dice.iter().enumerate() {
        match die.face {
            DiceFace::WalkPlank if combo == Some(Combo::Mutiny) => {}
            DiceFace::XMarksSpot if combo == Some(Combo::Shipwreck) => {}

            DiceFace::Doubloon => effects.push(Effect::on(
                K::CoinsGained,
                C::Doubloon,
                current,
                DOUBLOON_GAIN,
                format!("{} gains {} doubloons", current.name, DOUBLOON_GAIN),
            )),
            DiceFace::XMarksSpot => effects.push(Effect::on(
                K::CoinsLost,
                C::Treasure,
                current,
                TREASURE_LOSS,
                format!("{} loses {} doubloons to the treasure", current.name, TREASURE_LOSS),
            )),
            DiceFace::WalkPlank => effects.push(Effect::on(
                K::LifeLost,
                C::Plank,
                current,
                PLANK_LOSS,
                format!("{} walks the plank and loses {} life", current.name, PLANK_LOSS),
            )),
            DiceFace::Shield => effects.push(Effect::on(
                K::ShieldGained,
                C::Shield,
                current,
                SHIELD_GAIN,
                format!("{} gains a shield", current.name),
            )),
            DiceFace::Cutlass => {
                let Some(target) = target_for(index, pending, players) else {
                    continue;
                };
                effects.push(
                    Effect::on(
                        K::Damage,
                        C::Cutlass,
                        target,
                        CUTLASS_DAMAGE,
                        format!("{} attacks {} with a cutlass!", current.name, target.name),
                    )
                    .from_source(current),
                );
            }
            DiceFace::JollyRoger => {
                let Some(target) = target_for(index, pending, players) else {
                    continue;
                };
                let stolen = STEAL_MAX.min(target.doubloons);
                if stolen == 0 {
                    continue;
                }
                effects.push(
                    Effect::on(
                        K::CoinsLost,
                        C::Plunder,
                        target,
                        stolen,
                        format!("{} steals {} doubloons from {}!", current.name, stolen, target.name),
                    )
                    .from_source(current),
                );
                effects.push(Effect::on(
                    K::CoinsGained,
                    C::Plunder,
                    current,
                    stolen,
                    format!("{} pockets {} stolen doubloons", current.name, stolen),
                ));
            }
        }
    }

    effects
}

/// The chosen target for a die slot, if one was picked and is seated.
fn target_for<'a>(index: usize, pending: &[PendingAction], players: &'a [Player]) -> Option<&'a Player> {
    let target_id = pending
        .iter()
        .find(|a| a.die_index == index)?
        .target_player_id
        .as_deref()?;
    players.iter().find(|p| p.id == target_id)
}
