//! A stateless relay between fedlink participants and the federated server.
//!
//! Participants post their checkpoint to `/api/send-local-model`. The relay renames the file after
//! the participant (`client_{id}.pth`) and re-posts it, together with the round metadata, to the
//! `/api/upload-client-weights` endpoint of the federated server. The answer of the server is
//! translated back to the participant. The relay keeps no state and never retries.

pub mod forward;
pub mod rest;
pub mod settings;
