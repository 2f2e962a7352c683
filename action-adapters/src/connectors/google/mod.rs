//! Google Workspace actions: Gmail drafts and Calendar events.

pub mod calendar;
pub mod gmail;

pub use calendar::CreateEventAdapter;
pub use gmail::{CreateDraftAdapter, DraftPayload};
