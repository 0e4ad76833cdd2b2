use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::backend::testclient::{self, SCRIPT_DELAY, TEST_CLIENT_ID};
use crate::backend::SmsBackend;
use crate::emitter::ResponseEmitter;
use crate::error::GatewayResult;
use crate::message::SmsMessage;
use crate::metrics;
use crate::reducer::DeliveryStatusReducer;
use crate::types::{DeliveryNotification, SmsStatus, StatusEvent};
use crate::validator::{RequestContext, RequestValidator, Validation};

/// The request/notification processing pipeline.
///
/// Requests and notifications are handled independently and concurrently;
/// the correlation store behind the reducer is the only state they share.
pub struct GatewayService {
    validator: RequestValidator,
    backend: Arc<dyn SmsBackend>,
    reducer: DeliveryStatusReducer,
    emitter: Arc<ResponseEmitter>,
    test_script_delay: Duration,
}

impl GatewayService {
    pub fn new(
        validator: RequestValidator,
        backend: Arc<dyn SmsBackend>,
        reducer: DeliveryStatusReducer,
        emitter: Arc<ResponseEmitter>,
    ) -> Self {
        Self {
            validator,
            backend,
            reducer,
            emitter,
            test_script_delay: SCRIPT_DELAY,
        }
    }

    /// Shorten the simulated-backend delay (integration tests).
    pub fn with_test_script_delay(mut self, delay: Duration) -> Self {
        self.test_script_delay = delay;
        self
    }

    /// Handle one raw inbound request to completion: validate, dispatch,
    /// reduce, emit. Every path out of here emits at most one event; an
    /// unexpected error past validation is still answered with a generic
    /// FAILED, since by then the request is addressable.
    pub async fn handle_request(&self, raw: &str) {
        metrics::REQUESTS_TOTAL.inc();

        match self.validator.validate(raw).await {
            Validation::Dropped => {}
            Validation::Rejected {
                ctx,
                status,
                error_text,
            } => {
                let mut event = StatusEvent::new(&ctx.client_id, &ctx.correl_id, status);
                if let Some(error_text) = error_text {
                    event = event.with_error_text(error_text);
                }
                self.emitter.emit(event).await;
            }
            Validation::Accepted { ctx, message } => {
                if let Err(e) = self.process_accepted(&ctx, message).await {
                    error!(
                        client_id = %ctx.client_id,
                        correl_id = %ctx.correl_id,
                        error = %e,
                        "unexpected error while handling request"
                    );
                    self.emitter
                        .emit(
                            StatusEvent::new(&ctx.client_id, &ctx.correl_id, SmsStatus::Failed)
                                .with_error_text("an exception occurred while handling request"),
                        )
                        .await;
                }
            }
        }
    }

    async fn process_accepted(
        &self,
        ctx: &RequestContext,
        message: SmsMessage,
    ) -> GatewayResult<()> {
        if ctx.client_id == TEST_CLIENT_ID {
            info!(correl_id = %ctx.correl_id, "routing request to simulated backend");
            testclient::run_script(
                Arc::clone(&self.emitter),
                ctx,
                message.body(),
                self.test_script_delay,
            )
            .await;
            return Ok(());
        }

        let outcome = self.backend.submit(&message).await;
        if let Some(event) = self.reducer.reduce_submit(ctx, outcome).await {
            self.emitter.emit(event).await;
        }
        Ok(())
    }

    /// Handle one asynchronous delivery notification from the backend.
    pub async fn handle_notification(&self, notification: DeliveryNotification) {
        if let Some(event) = self.reducer.reduce_notification(notification).await {
            self.emitter.emit(event).await;
        }
    }
}
