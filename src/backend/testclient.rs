// Simulated backend for the reserved `test` client. Requests from this
// client never reach a carrier; a marker in the message body scripts the
// status sequence sent back, which lets client integrations exercise every
// status flow including out-of-order and duplicate sequences.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::emitter::ResponseEmitter;
use crate::types::{SmsStatus, StatusEvent};
use crate::validator::RequestContext;

/// Client id whose requests are handled by the simulated backend.
pub const TEST_CLIENT_ID: &str = "test";

/// Delay before the second event of a two-step script.
pub const SCRIPT_DELAY: Duration = Duration::from_millis(1500);

/// One scripted response: status, optional error text, delay before emission.
type Step = (SmsStatus, Option<&'static str>, bool);

const NO_MARKER_ERROR: &str = "Test body without S1D1 or other token";

/// Map a message body to its scripted response sequence. The first matching
/// marker wins; a body without any marker scripts a single INVALID.
fn script_for(body: &str) -> Vec<Step> {
    if body.contains("S0D0") {
        info!("S0D0: not responding");
        vec![]
    } else if body.contains("S0D1") {
        vec![(SmsStatus::Delivered, None, false)]
    } else if body.contains("S1D0") {
        vec![(SmsStatus::Sent, None, false)]
    } else if body.contains("S1DX") {
        vec![
            (SmsStatus::Sent, None, false),
            (SmsStatus::Failed, Some("failed after successful send"), true),
        ]
    } else if body.contains("S1D1") {
        vec![(SmsStatus::Sent, None, false), (SmsStatus::Delivered, None, true)]
    } else if body.contains("S2D0") {
        vec![(SmsStatus::Sent, None, false), (SmsStatus::Sent, None, true)]
    } else if body.contains("D1S1") {
        vec![(SmsStatus::Delivered, None, false), (SmsStatus::Sent, None, true)]
    } else if body.contains("DXS1") {
        vec![
            (
                SmsStatus::Failed,
                Some("reporting failed before reporting sent"),
                false,
            ),
            (SmsStatus::Sent, None, true),
        ]
    } else if body.contains("FAIL") {
        vec![(SmsStatus::Failed, Some("you requested this to FAIL"), true)]
    } else {
        vec![(SmsStatus::Invalid, Some(NO_MARKER_ERROR), false)]
    }
}

/// Emit the scripted responses for a test-client request. Delayed steps run
/// on their own task so the request flow is never held up.
pub async fn run_script(
    emitter: Arc<ResponseEmitter>,
    ctx: &RequestContext,
    body: &str,
    delay: Duration,
) {
    for (status, error_text, delayed) in script_for(body) {
        let mut event = StatusEvent::new(&ctx.client_id, &ctx.correl_id, status);
        if let Some(error_text) = error_text {
            event = event.with_error_text(error_text);
        }
        info!(
            correl_id = %ctx.correl_id,
            status = %status,
            delayed,
            "test client scripted response"
        );
        if delayed {
            let emitter = Arc::clone(&emitter);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                emitter.emit(event).await;
            });
        } else {
            emitter.emit(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_scripts() {
        assert!(script_for("body with S0D0 inside").is_empty());

        let script = script_for("S1D1");
        assert_eq!(script[0].0, SmsStatus::Sent);
        assert_eq!(script[1].0, SmsStatus::Delivered);
        assert!(script[1].2, "second step is delayed");

        let script = script_for("DXS1");
        assert_eq!(script[0].0, SmsStatus::Failed);
        assert_eq!(script[1].0, SmsStatus::Sent);

        let script = script_for("please FAIL this one");
        assert_eq!(
            script,
            vec![(SmsStatus::Failed, Some("you requested this to FAIL"), true)]
        );
    }

    #[test]
    fn no_marker_is_invalid() {
        let script = script_for("an ordinary message");
        assert_eq!(script.len(), 1);
        assert_eq!(script[0].0, SmsStatus::Invalid);
        assert_eq!(script[0].1, Some(NO_MARKER_ERROR));
    }

    #[test]
    fn first_marker_wins() {
        // S1DX checked before S1D1
        let script = script_for("S1DX S1D1");
        assert_eq!(script[1].0, SmsStatus::Failed);
    }
}
