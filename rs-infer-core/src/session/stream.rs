use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use futures::stream::FusedStream;
use log::{debug, warn};
use tokio::task::{JoinHandle, spawn_blocking};
use tokio_util::sync::CancellationToken;

use super::generation::{Generation, PreparedGeneration, Step};
use super::progress::{FinishReason, GenerationSummary};
use crate::engine::{EngineError, NativeEngine};
use crate::error::SessionError;

enum Phase<E: NativeEngine> {
	/// Validated, no handle acquired yet.
	Prepared(PreparedGeneration<E>),
	/// Cursor and sampler being acquired on the blocking pool.
	Acquiring(JoinHandle<Result<Generation<E>, SessionError>>),
	/// Waiting for the consumer to ask for the next fragment.
	Ready(Generation<E>),
	/// One decode step running on the blocking pool.
	Decoding(JoinHandle<(Generation<E>, Result<Step, EngineError>)>),
	Finished,
}

/// Lazy stream of decoded fragments for one generation request.
///
/// Nothing runs until the stream is polled, and each poll performs at most
/// one decode step: the consumer's pace drives the engine. Fragments arrive
/// in decode order. The stream ends when the token budget or a stop phrase
/// is reached (the fragment triggering the stop is not delivered), after an
/// error item, or once cancelled.
///
/// The session stays locked for this request until the stream finishes or
/// is dropped. Dropping the stream (or cancelling its token) is a
/// cancellation: handles are released right away, or as soon as the decode
/// step in flight returns.
pub struct CompletionStream<E: NativeEngine + 'static> {
	phase: Phase<E>,
	cancel: CancellationToken,
	summary: Option<GenerationSummary>,
}

impl<E: NativeEngine + 'static> CompletionStream<E> {
	pub(crate) fn new(prepared: PreparedGeneration<E>) -> Self {
		Self {
			phase: Phase::Prepared(prepared),
			cancel: CancellationToken::new(),
			summary: None,
		}
	}

	/// Token cancelling this generation before its next decode step.
	pub fn cancellation_token(&self) -> CancellationToken {
		self.cancel.clone()
	}

	/// Summary of the generation, available once the stream ended without error.
	pub fn summary(&self) -> Option<&GenerationSummary> {
		self.summary.as_ref()
	}

	/// Ends the stream; dropping `generation` releases its handles.
	fn finish(&mut self, generation: Generation<E>, reason: FinishReason) {
		let summary = generation.summary(reason);
		drop(generation);
		debug!("generation finished: {:?}", summary);
		self.summary = Some(summary);
	}
}

impl<E: NativeEngine + 'static> Stream for CompletionStream<E> {
	type Item = Result<String, SessionError>;

	fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		let this = self.get_mut();

		loop {
			match std::mem::replace(&mut this.phase, Phase::Finished) {
				Phase::Prepared(prepared) => {
					if this.cancel.is_cancelled() {
						drop(prepared);
						this.summary = Some(GenerationSummary {
							tokens_decoded: 0,
							fragments_emitted: 0,
							finish_reason: FinishReason::Cancelled,
						});
						return Poll::Ready(None);
					}
					this.phase = Phase::Acquiring(spawn_blocking(move || prepared.acquire()));
				}
				Phase::Acquiring(mut task) => match Pin::new(&mut task).poll(cx) {
					Poll::Pending => {
						this.phase = Phase::Acquiring(task);
						return Poll::Pending;
					}
					Poll::Ready(Ok(Ok(generation))) => this.phase = Phase::Ready(generation),
					Poll::Ready(Ok(Err(err))) => {
						warn!("generation setup failed: {}", err);
						return Poll::Ready(Some(Err(err)));
					}
					Poll::Ready(Err(join)) => return Poll::Ready(Some(Err(join.into()))),
				},
				Phase::Ready(mut generation) => {
					if this.cancel.is_cancelled() {
						this.finish(generation, FinishReason::Cancelled);
						return Poll::Ready(None);
					}
					this.phase = Phase::Decoding(spawn_blocking(move || {
						let step = generation.step();
						(generation, step)
					}));
				}
				Phase::Decoding(mut task) => match Pin::new(&mut task).poll(cx) {
					Poll::Pending => {
						this.phase = Phase::Decoding(task);
						return Poll::Pending;
					}
					Poll::Ready(Ok((generation, Ok(Step::Emit(fragment))))) => {
						this.phase = Phase::Ready(generation);
						return Poll::Ready(Some(Ok(fragment)));
					}
					Poll::Ready(Ok((generation, Ok(Step::Stop(reason))))) => {
						this.finish(generation, reason);
						return Poll::Ready(None);
					}
					Poll::Ready(Ok((generation, Err(err)))) => {
						// Release before reporting
						drop(generation);
						warn!("decode step failed: {}", err);
						return Poll::Ready(Some(Err(SessionError::Decode(err))));
					}
					// The generation was dropped while the worker unwound
					Poll::Ready(Err(join)) => return Poll::Ready(Some(Err(join.into()))),
				},
				Phase::Finished => return Poll::Ready(None),
			}
		}
	}
}

impl<E: NativeEngine + 'static> FusedStream for CompletionStream<E> {
	fn is_terminated(&self) -> bool {
		matches!(self.phase, Phase::Finished)
	}
}
