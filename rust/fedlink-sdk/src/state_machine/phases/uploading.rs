use async_trait::async_trait;
use tracing::{info, warn};

use crate::state_machine::{Advanced, Phase, RoundError, Step, TransitionOutcome};
use fedlink_core::storage::LocalCheckpoint;

/// Sending the checkpoint of the round to the relay.
///
/// A remote failure leaves the phase pending with its checkpoint and log rows intact, so that
/// the upload alone can be retried later.
#[derive(Debug)]
pub struct Uploading {
    pub checkpoint: LocalCheckpoint,
    /// Number of failed attempts
    pub attempts: u32,
    /// Why the last attempt failed
    pub last_error: Option<RoundError>,
}

impl Uploading {
    pub fn new(checkpoint: LocalCheckpoint) -> Self {
        Self {
            checkpoint,
            attempts: 0,
            last_error: None,
        }
    }
}

#[async_trait]
impl Step for Phase<Uploading> {
    async fn step(mut self) -> TransitionOutcome {
        let round = self.state.shared.round;
        let checkpoint = self.state.private.checkpoint.clone();
        let client_id = self.state.shared.client_id.clone();

        match self.io.upload_checkpoint(checkpoint, client_id, round).await {
            Ok(response) => {
                info!("checkpoint of round {} accepted", round);
                self.io.notify_round_advanced(round, round + 1);
                TransitionOutcome::Complete(self.into_phase(Advanced { response }).into())
            }
            Err(e) if e.is_remote() => {
                warn!("upload of round {} failed: {}", round, e);
                self.io.notify_upload_failed(round, &e);
                self.state.private.attempts += 1;
                self.state.private.last_error = Some(e);
                TransitionOutcome::Pending(self.into())
            }
            Err(e) => TransitionOutcome::Complete(self.roll_back(e).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        state_machine::tests::utils::{checkpoint, make_phase, shared_state},
        unwrap_step,
    };

    #[tokio::test]
    async fn test_upload_advances() {
        let mut phase = make_phase(shared_state(), Uploading::new(checkpoint(1)));
        phase.with_io_mock(|mock| {
            mock.expect_upload_checkpoint()
                .withf(|checkpoint, client_id, round| {
                    checkpoint.round() == 1 && client_id.as_str() == "c1" && *round == 1
                })
                .times(1)
                .returning(|_, _, _| Ok(json!({ "success": true })));
            mock.expect_notify_round_advanced()
                .withf(|round, next| *round == 1 && *next == 2)
                .times(1)
                .return_const(());
        });
        let phase = unwrap_step!(phase, complete, advanced);
        assert_eq!(phase.state.private.response, json!({ "success": true }));
    }

    #[tokio::test]
    async fn test_rejected_upload_stays_pending() {
        let mut phase = make_phase(shared_state(), Uploading::new(checkpoint(1)));
        phase.with_io_mock(|mock| {
            mock.expect_upload_checkpoint().times(1).returning(|_, _, _| {
                Err(RoundError::RemoteRejected {
                    status: 500,
                    body: "boom".into(),
                })
            });
            mock.expect_notify_upload_failed()
                .times(1)
                .return_const(());
            mock.expect_rollback_log().never();
        });
        let phase = unwrap_step!(phase, pending, uploading);
        assert_eq!(phase.state.private.attempts, 1);
        assert_eq!(
            phase.state.private.last_error,
            Some(RoundError::RemoteRejected {
                status: 500,
                body: "boom".into()
            })
        );
    }

    #[tokio::test]
    async fn test_missing_checkpoint_rolls_back() {
        let mut phase = make_phase(shared_state(), Uploading::new(checkpoint(1)));
        phase.with_io_mock(|mock| {
            mock.expect_upload_checkpoint()
                .times(1)
                .returning(|_, _, _| Err(RoundError::Storage("gone".into())));
            mock.expect_rollback_log().times(1).returning(|_| Ok(3));
            mock.expect_notify_round_rolled_back()
                .times(1)
                .return_const(());
        });
        let _phase = unwrap_step!(phase, complete, rolled_back);
    }
}
