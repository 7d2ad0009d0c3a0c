//! # lineup-core
//!
//! Shared vocabulary for the draft allocation engine:
//!
//! - **Branded IDs**: [`ids::SessionId`], [`ids::ParticipantId`], [`ids::ChannelId`], [`ids::MessageId`]
//! - **Slots**: [`slots::SlotTable`] and its single mutation path, [`slots::SlotTable::try_claim`]
//! - **Events**: [`events::DraftEvent`] lifecycle notifications and [`events::DraftState`]
//! - **Errors**: [`errors::GatewayError`] for collaborator failures
//! - **Snapshots**: [`snapshot::DraftSnapshot`] read-only views of a session

pub mod errors;
pub mod events;
pub mod ids;
pub mod slots;
pub mod snapshot;
