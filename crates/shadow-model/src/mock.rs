// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Scripted provider for tests.
//!
//! Each call to [`StreamProvider::stream`] pops the next scripted chunk
//! sequence; each call to [`StreamProvider::complete_once`] pops the next
//! scripted completion.  Every request is recorded so tests can assert on
//! the history the kernel assembled.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::bail;
use async_trait::async_trait;

use crate::{
    provider::{ChunkStream, Completion},
    StreamChunk, StreamRequest,
};

#[derive(Default)]
pub struct MockProvider {
    model: String,
    streams: Mutex<VecDeque<Vec<StreamChunk>>>,
    completions: Mutex<VecDeque<Completion>>,
    requests: Mutex<Vec<StreamRequest>>,
}

impl MockProvider {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Queue a chunk sequence for the next `stream` call.
    pub fn script_stream(&self, chunks: Vec<StreamChunk>) {
        self.streams.lock().unwrap().push_back(chunks);
    }

    /// Queue a completion for the next `complete_once` call.
    pub fn script_completion(&self, completion: Completion) {
        self.completions.lock().unwrap().push_back(completion);
    }

    /// Every request seen so far, in call order.
    pub fn requests(&self) -> Vec<StreamRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl crate::StreamProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream(&self, req: StreamRequest) -> anyhow::Result<ChunkStream> {
        self.requests.lock().unwrap().push(req);
        let Some(chunks) = self.streams.lock().unwrap().pop_front() else {
            bail!("mock provider has no scripted stream left");
        };
        Ok(Box::pin(futures::stream::iter(
            chunks.into_iter().map(Ok),
        )))
    }

    async fn complete_once(&self, req: StreamRequest) -> anyhow::Result<Completion> {
        self.requests.lock().unwrap().push(req);
        let Some(completion) = self.completions.lock().unwrap().pop_front() else {
            bail!("mock provider has no scripted completion left");
        };
        Ok(completion)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::{FinishReason, Message, StreamProvider};

    #[tokio::test]
    async fn scripted_stream_plays_back_in_order() {
        let mock = MockProvider::new("mock-1");
        mock.script_stream(vec![
            StreamChunk::TextDelta("a".into()),
            StreamChunk::Finish(FinishReason::Stop),
        ]);
        let mut stream = mock
            .stream(StreamRequest {
                messages: vec![Message::user("hi")],
                ..Default::default()
            })
            .await
            .unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, StreamChunk::TextDelta("a".into()));
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second, StreamChunk::Finish(FinishReason::Stop));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn unscripted_stream_errors() {
        let mock = MockProvider::new("mock-1");
        assert!(mock.stream(StreamRequest::default()).await.is_err());
    }

    #[tokio::test]
    async fn requests_are_recorded() {
        let mock = MockProvider::new("mock-1");
        mock.script_completion(Completion {
            text: "Add health endpoint".into(),
            tool_calls: vec![],
        });
        let out = mock
            .complete_once(StreamRequest {
                messages: vec![Message::user("generate a title")],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(out.text, "Add health endpoint");
        assert_eq!(mock.request_count(), 1);
        assert_eq!(
            mock.requests()[0].messages[0].as_text(),
            Some("generate a title")
        );
    }
}
