use anyhow::Result;
use bytes::Bytes;
use http_body_util::Full;
use std::convert::Infallible;
use std::sync::Arc;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{body::Incoming as IncomingBody, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

pub mod backend;
pub mod config;
pub mod correlation;
pub mod crypto;
pub mod emitter;
pub mod error;
pub mod kafka;
pub mod message;
pub mod metrics;
pub mod reducer;
pub mod service;
pub mod types;
pub mod validator;

use backend::smpp::SmppBackend;
use backend::wasp::WaspBackend;
use backend::SmsBackend;
use config::{BackendKind, Config};
use correlation::CorrelationStore;
use crypto::KeyVault;
use emitter::ResponseEmitter;
use kafka::{KafkaCorrelationLog, RequestConsumer, StatusProducer};
use reducer::DeliveryStatusReducer;
use service::GatewayService;
use types::DeliveryNotification;
use validator::RequestValidator;

type HttpResult = Result<Response<Full<Bytes>>, Infallible>;

async fn ops_handler(req: Request<IncomingBody>) -> HttpResult {
    let response = match req.uri().path() {
        "/health" => Response::new(Full::new(Bytes::from("OK"))),
        "/metrics" => match metrics::gather_metrics() {
            Ok(metrics_data) => {
                let mut res = Response::new(Full::new(Bytes::from(metrics_data)));
                res.headers_mut()
                    .insert("Content-Type", "text/plain; version=0.0.4".parse().unwrap());
                res
            }
            Err(e) => {
                error!("failed to gather metrics: {}", e);
                let mut res = Response::new(Full::new(Bytes::from("Internal Server Error")));
                *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                res
            }
        },
        _ => {
            let mut not_found = Response::new(Full::new(Bytes::from("Not Found")));
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            not_found
        }
    };
    Ok(response)
}

async fn run_ops_server(port: u16) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("ops server listening on http://0.0.0.0:{}", port);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::task::spawn(async move {
            let service = service_fn(ops_handler);
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                error!("error serving ops connection: {:?}", err);
            }
        });
    }
}

/// Run the gateway until shutdown.
///
/// Startup order matters: the correlation store replays its whole log
/// before the first request or notification is consumed, so restarts do not
/// lose the recall-id mapping for in-flight messages.
pub async fn run(config: Config) -> Result<()> {
    let correlog = KafkaCorrelationLog::new(&config.kafka)?;
    let store = Arc::new(CorrelationStore::open(Box::new(correlog), config.correl_retry).await?);

    let vault = Arc::new(KeyVault::new(&config.key_dir));
    let validator = RequestValidator::new(config.allowed_clients.clone(), vault);

    // the WASP API answers synchronously and sends no delivery reports, so
    // its notification stream stays empty (the sender half is kept alive to
    // keep the stream open)
    let mut _wasp_notif_keepalive = None;
    let (carrier, mut notif_rx): (Arc<dyn SmsBackend>, mpsc::Receiver<DeliveryNotification>) =
        match config.backend {
            BackendKind::Smpp => {
                let (backend, notif_rx) = SmppBackend::start(config.smpp.clone());
                (Arc::new(backend), notif_rx)
            }
            BackendKind::Wasp => {
                let backend = WaspBackend::new(config.wasp.clone())?;
                let (tx, rx) = mpsc::channel(1);
                _wasp_notif_keepalive = Some(tx);
                (Arc::new(backend), rx)
            }
        };

    let producer = StatusProducer::new(&config.kafka)?;
    let mut emitter = ResponseEmitter::new(Box::new(producer.clone()));
    if let Some(dir) = &config.client_log_dir {
        emitter = emitter.with_client_log(dir);
    }
    let emitter = Arc::new(emitter);

    let reducer = DeliveryStatusReducer::new(Arc::clone(&store));
    let gateway = Arc::new(GatewayService::new(validator, carrier, reducer, emitter));

    let consumer = RequestConsumer::new(&config.kafka)?;

    let ops_server = tokio::spawn(run_ops_server(config.health_port));

    info!(backend = ?config.backend, "SMS gateway started");

    // requests and notifications are processed concurrently, one task per
    // message; offsets are committed on receipt (at-most-one submission
    // attempt per request, never a redelivered double-send)
    let request_loop = async {
        loop {
            match consumer.recv().await {
                Ok(raw) => {
                    if let Err(e) = consumer.commit() {
                        error!(error = %e, "failed to commit request offset");
                    }
                    let gateway = Arc::clone(&gateway);
                    tokio::spawn(async move { gateway.handle_request(&raw).await });
                }
                Err(e) => {
                    error!(error = %e, "error receiving request");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    };

    let notification_loop = async {
        while let Some(notification) = notif_rx.recv().await {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move { gateway.handle_notification(notification).await });
        }
        warn!("delivery notification stream ended");
    };

    tokio::select! {
        _ = request_loop => {}
        _ = notification_loop => {}
        _ = signal::ctrl_c() => {
            info!("shutdown signal received, shutting down");
        }
    }

    if let Err(e) = producer.flush(std::time::Duration::from_secs(5)) {
        warn!(error = %e, "failed to flush status producer on shutdown");
    }
    ops_server.abort();
    Ok(())
}
