use std::sync::Arc;

use crate::cell::CellId;
use crate::migration::MigrationSnapshot;
use crate::Guid;

/// The closed set of cross-cell message kinds the runtime understands.
/// Collaborators add new interactions by extending this enum, not by
/// inventing side channels — every cross-cell effect flows through a
/// cell's inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum MessageKind {
    SpellHit,
    MeleeDamage,
    Heal,
    AuraApply,
    AuraRemove,
    EntityEntering,
    EntityLeaving,
    PositionUpdate,
    HealthChanged,
    PowerChanged,
    AuraStateSync,
    CombatStateChanged,
    PhaseChanged,
    GhostCreate,
    GhostUpdate,
    GhostDestroy,
    MigrationRequest,
    MigrationAck,
    MigrationComplete,
    MigrationForward,
    ThreatUpdate,
    AggroRequest,
    CombatInitiated,
    TargetSwitch,
    EvadeTriggered,
    AssistanceRequest,
    PetRemoval,
}

impl MessageKind {
    /// Stable count used to size the per-kind stats table; update this
    /// alongside the enum.
    pub const COUNT: usize = 27;
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SpellHitPayload {
    pub spell_id: u32,
    pub effect_mask: u32,
    pub damage: i32,
    pub healing: i32,
    pub school_mask: u32,
    pub absorb: i32,
    pub resist: i32,
    pub blocked: i32,
    pub is_critical: bool,
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct MeleeDamagePayload {
    pub damage: i32,
    pub absorb: i32,
    pub resist: i32,
    pub blocked: i32,
    pub is_critical: bool,
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct HealPayload {
    pub amount: i32,
    pub overheal: i32,
    pub is_critical: bool,
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ThreatUpdatePayload {
    pub attacker_guid: Guid,
    pub victim_guid: Guid,
    pub threat_delta: f32,
    pub is_new_threat: bool,
    pub is_removal: bool,
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct AggroRequestPayload {
    pub creature_guid: Guid,
    pub creature_cell: CellId,
    pub creature_phase_mask: u32,
    pub creature_x: f32,
    pub creature_y: f32,
    pub creature_z: f32,
    pub max_range: f32,
    pub initial_threat: f32,
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct AssistanceRequestPayload {
    pub caller_guid: Guid,
    pub target_guid: Guid,
    pub caller_cell: CellId,
    pub caller_phase_mask: u32,
    pub caller_x: f32,
    pub caller_y: f32,
    pub caller_z: f32,
    pub radius: f32,
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PetRemovalPayload {
    pub pet_guid: Guid,
    pub owner_guid: Guid,
    pub save_to_stable: bool,
    pub return_reagent: bool,
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct MigrationRequestPayload {
    pub snapshot: MigrationSnapshot,
    pub migration_id: u64,
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct MigrationAckPayload {
    pub migration_id: u64,
    pub accepted: bool,
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct MigrationCompletePayload {
    pub migration_id: u64,
}

/// Envelope for a buffered message being replayed to the new owner after a
/// migration completes. Carries the original message so the receiving
/// cell can dispatch it exactly as it would have arrived directly,
/// preserving `kind`/`payload`/scratch fields.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct MigrationForwardPayload {
    pub migration_id: u64,
    pub original: Box<Message>,
}

/// The heavier, kind-specific data a [`Message`] may carry. Wrapped in
/// `Arc` at the message level so routing a message across cells is a
/// pointer copy regardless of payload size.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum MessagePayload {
    SpellHit(SpellHitPayload),
    MeleeDamage(MeleeDamagePayload),
    Heal(HealPayload),
    ThreatUpdate(ThreatUpdatePayload),
    AggroRequest(AggroRequestPayload),
    AssistanceRequest(AssistanceRequestPayload),
    PetRemoval(PetRemovalPayload),
    MigrationRequest(MigrationRequestPayload),
    MigrationAck(MigrationAckPayload),
    MigrationComplete(MigrationCompletePayload),
    MigrationForward(MigrationForwardPayload),
}

/// A cross-cell message. Small fixed `ints`/`floats` scratch fields cover
/// the common single-value cases (position deltas, health values) without
/// needing a payload allocation.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Message {
    pub kind: MessageKind,
    pub src_guid: Guid,
    pub dst_guid: Guid,
    pub src_cell: CellId,
    pub dst_cell: CellId,
    pub ints: [i32; 3],
    pub floats: [f32; 3],
    pub payload: Option<Arc<MessagePayload>>,
}

impl Message {
    pub fn new(kind: MessageKind, src_guid: Guid, dst_guid: Guid, src_cell: CellId, dst_cell: CellId) -> Self {
        Message {
            kind,
            src_guid,
            dst_guid,
            src_cell,
            dst_cell,
            ints: [0; 3],
            floats: [0.0; 3],
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: MessagePayload) -> Self {
        self.payload = Some(Arc::new(payload));
        self
    }
}

#[cfg(all(test, feature = "serialize"))]
mod serde_tests {
    use super::*;

    #[test]
    fn a_message_with_a_migration_forward_payload_round_trips_through_json() {
        let inner = Message::new(MessageKind::SpellHit, 1, 2, CellId(0), CellId(1));
        let msg = Message::new(MessageKind::MigrationForward, 1, 2, CellId(0), CellId(1))
            .with_payload(MessagePayload::MigrationForward(MigrationForwardPayload {
                migration_id: 7,
                original: Box::new(inner),
            }));

        let json = serde_json::to_string(&msg).unwrap();
        let decoded: Message = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded.kind, MessageKind::MigrationForward);
        match decoded.payload.as_deref() {
            Some(MessagePayload::MigrationForward(forward)) => {
                assert_eq!(forward.migration_id, 7);
                assert_eq!(forward.original.kind, MessageKind::SpellHit);
            }
            other => panic!("expected a MigrationForward payload, got {other:?}"),
        }
    }
}
