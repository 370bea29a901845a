// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Websocket connection to the controller.
//!
//! Every outbound report, whether a watcher report or a command reply, goes
//! through one channel drained by a single writer.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use mesh_common_core::{
	sleep_or_stop, CancellationToken, CommandEnvelope, ReportEnvelope, ReportSink, SinkError,
};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use crate::backoff::jittered_delay;
use crate::config::AgentToken;
use crate::dispatch::Dispatcher;
use crate::error::TransportError;

pub const OUTBOUND_CAPACITY: usize = 256;

/// [`ReportSink`] feeding the connection's writer.
///
/// Reports are buffered while disconnected; when the buffer is full the
/// newest report is dropped.
#[derive(Clone)]
pub struct ChannelSink {
	tx: mpsc::Sender<ReportEnvelope>,
}

impl ChannelSink {
	pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ReportEnvelope>) {
		let (tx, rx) = mpsc::channel(capacity);
		(Self { tx }, rx)
	}
}

#[async_trait]
impl ReportSink for ChannelSink {
	async fn send(&self, report: ReportEnvelope) -> Result<(), SinkError> {
		match self.tx.try_send(report) {
			Ok(()) => Ok(()),
			Err(mpsc::error::TrySendError::Full(report)) => {
				warn!(kind = %report.kind, "outbound queue full, dropping report");
				Ok(())
			}
			Err(mpsc::error::TrySendError::Closed(_)) => Err(SinkError::Closed),
		}
	}
}

/// Parses one inbound text frame and dispatches it. Returns the reply to
/// send, if the command produced one.
pub async fn respond(dispatcher: &Dispatcher, text: &str) -> Option<ReportEnvelope> {
	let envelope: CommandEnvelope = match serde_json::from_str(text) {
		Ok(envelope) => envelope,
		Err(e) => {
			warn!(error = %e, "ignoring malformed controller message");
			return None;
		}
	};
	let data = dispatcher.dispatch(&envelope).await?;
	Some(ReportEnvelope::new(envelope.request_id, envelope.kind, data))
}

pub struct ControllerConnection {
	url: Url,
	token: AgentToken,
	dispatcher: Arc<Dispatcher>,
	replies: ChannelSink,
	outbound: mpsc::Receiver<ReportEnvelope>,
}

impl ControllerConnection {
	pub fn new(
		url: Url,
		token: AgentToken,
		dispatcher: Arc<Dispatcher>,
		replies: ChannelSink,
		outbound: mpsc::Receiver<ReportEnvelope>,
	) -> Self {
		Self {
			url,
			token,
			dispatcher,
			replies,
			outbound,
		}
	}

	/// Connects and reconnects with backoff until `stop` fires. Only a token
	/// that cannot be sent as a header is fatal.
	pub async fn run(mut self, stop: CancellationToken) -> Result<(), TransportError> {
		let mut attempt: u32 = 0;
		loop {
			if stop.is_cancelled() {
				break;
			}
			match self.session(&stop).await {
				Ok(()) => {
					attempt = 0;
					if stop.is_cancelled() {
						break;
					}
					info!("controller connection closed, reconnecting");
				}
				Err(TransportError::InvalidToken) => return Err(TransportError::InvalidToken),
				Err(e) => warn!(attempt, error = %e, "controller connection failed"),
			}

			attempt = attempt.saturating_add(1);
			let delay = jittered_delay(attempt);
			debug!(delay_ms = delay.as_millis() as u64, "waiting before reconnect");
			if sleep_or_stop(&stop, delay).await {
				break;
			}
		}
		info!("controller connection stopped");
		Ok(())
	}

	async fn session(&mut self, stop: &CancellationToken) -> Result<(), TransportError> {
		let mut request = self.url.as_str().into_client_request()?;
		let auth = HeaderValue::from_str(&format!("Bearer {}", self.token.expose()))
			.map_err(|_| TransportError::InvalidToken)?;
		request.headers_mut().insert(AUTHORIZATION, auth);

		let (ws_stream, _) = connect_async(request).await?;
		info!(url = %self.url, "connected to controller");
		let (mut write, mut read) = ws_stream.split();
		let dispatcher = self.dispatcher.clone();
		let replies = self.replies.clone();

		loop {
			tokio::select! {
				_ = stop.cancelled() => {
					// Reports queued before stop, such as the executor's final
					// results, still go out ahead of the close frame.
					let mut flushed = 0usize;
					while let Ok(report) = self.outbound.try_recv() {
						let text = serde_json::to_string(&report)?;
						write.send(Message::Text(text)).await?;
						flushed += 1;
					}
					if flushed > 0 {
						debug!(flushed, "flushed queued reports before closing");
					}
					if let Err(e) = write.send(Message::Close(None)).await {
						debug!(error = %e, "failed to send close frame");
					}
					return Ok(());
				}
				report = self.outbound.recv() => {
					let Some(report) = report else {
						return Ok(());
					};
					let text = serde_json::to_string(&report)?;
					write.send(Message::Text(text)).await?;
				}
				inbound = read.next() => match inbound {
					Some(Ok(Message::Text(text))) => spawn_dispatch(&dispatcher, &replies, text),
					Some(Ok(Message::Ping(data))) => write.send(Message::Pong(data)).await?,
					Some(Ok(Message::Close(frame))) => {
						debug!(frame = ?frame, "controller closed the connection");
						return Err(TransportError::Closed);
					}
					Some(Ok(_)) => {}
					Some(Err(e)) => return Err(e.into()),
					None => return Err(TransportError::Closed),
				},
			}
		}
	}
}

/// Commands run concurrently; replies queue behind the single writer.
fn spawn_dispatch(dispatcher: &Arc<Dispatcher>, replies: &ChannelSink, text: String) {
	let dispatcher = dispatcher.clone();
	let replies = replies.clone();
	tokio::spawn(async move {
		if let Some(reply) = respond(&dispatcher, &text).await {
			if let Err(e) = replies.send(reply).await {
				warn!(error = %e, "failed to queue command reply");
			}
		}
	});
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[tokio::test]
	async fn channel_sink_delivers_in_order() {
		let (sink, mut rx) = ChannelSink::new(4);
		sink.send(ReportEnvelope::unsolicited("A", json!([]))).await.unwrap();
		sink.send(ReportEnvelope::unsolicited("B", json!([]))).await.unwrap();
		assert_eq!(rx.recv().await.unwrap().kind, "A");
		assert_eq!(rx.recv().await.unwrap().kind, "B");
	}

	#[tokio::test]
	async fn full_queue_drops_instead_of_blocking() {
		let (sink, mut rx) = ChannelSink::new(1);
		sink.send(ReportEnvelope::unsolicited("A", json!([]))).await.unwrap();
		sink.send(ReportEnvelope::unsolicited("B", json!([]))).await.unwrap();
		assert_eq!(rx.recv().await.unwrap().kind, "A");
		assert!(rx.try_recv().is_err());
	}

	#[tokio::test]
	async fn closed_queue_is_an_error() {
		let (sink, rx) = ChannelSink::new(1);
		drop(rx);
		assert!(matches!(
			sink.send(ReportEnvelope::unsolicited("A", json!([]))).await,
			Err(SinkError::Closed)
		));
	}
}
