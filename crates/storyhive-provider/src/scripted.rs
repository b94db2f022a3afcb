//! Replay provider that answers from a fixed queue of replies.
//!
//! Used for offline runs and tests: each call pops the next reply, streams its
//! text word by word and finishes with the reply's tool-use blocks.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio_stream::iter as stream_iter;

use crate::{ChunkStream, ContentBlock, LlmProvider, LlmRequest, LlmResponse, StreamChunk};

#[derive(Debug, Clone, Default)]
pub struct ScriptedReply {
    pub text: String,
    pub tool_calls: Vec<(String, serde_json::Value)>,
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: vec![],
        }
    }

    pub fn tool(name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            text: String::new(),
            tool_calls: vec![(name.into(), input)],
        }
    }

    pub fn with_tool(mut self, name: impl Into<String>, input: serde_json::Value) -> Self {
        self.tool_calls.push((name.into(), input));
        self
    }
}

#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedProvider {
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests seen so far, in call order.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Records the request and pops the next reply. An exhausted script
    /// answers with an empty end-of-turn.
    fn next_reply(&self, request: LlmRequest) -> Result<(ScriptedReply, usize)> {
        let mut requests = self
            .requests
            .lock()
            .map_err(|_| anyhow!("scripted provider lock poisoned"))?;
        requests.push(request);
        let call_no = requests.len();
        let reply = self
            .replies
            .lock()
            .map_err(|_| anyhow!("scripted provider lock poisoned"))?
            .pop_front()
            .unwrap_or_default();
        tracing::debug!(
            call_no,
            tool_calls = reply.tool_calls.len(),
            "scripted provider reply"
        );
        Ok((reply, call_no))
    }
}

fn reply_blocks(reply: &ScriptedReply, call_no: usize) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();
    if !reply.text.is_empty() {
        blocks.push(ContentBlock::Text {
            text: reply.text.clone(),
        });
    }
    for (i, (name, input)) in reply.tool_calls.iter().enumerate() {
        blocks.push(ContentBlock::ToolUse {
            id: format!("toolu_{call_no}_{i}"),
            name: name.clone(),
            input: input.clone(),
        });
    }
    blocks
}

fn stop_reason(reply: &ScriptedReply) -> &'static str {
    if reply.tool_calls.is_empty() {
        "end_turn"
    } else {
        "tool_use"
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        let (reply, call_no) = self.next_reply(request)?;
        Ok(LlmResponse {
            text: reply.text.clone(),
            content: reply_blocks(&reply, call_no),
            input_tokens: None,
            output_tokens: None,
            stop_reason: Some(stop_reason(&reply).into()),
        })
    }

    async fn stream(&self, request: LlmRequest) -> Result<ChunkStream> {
        let (reply, call_no) = self.next_reply(request)?;
        let mut chunks: Vec<Result<StreamChunk>> = reply
            .text
            .split_inclusive(' ')
            .map(|word| Ok(StreamChunk::text(word)))
            .collect();
        chunks.push(Ok(StreamChunk::finish(
            stop_reason(&reply),
            reply_blocks(&reply, call_no),
        )));
        Ok(Box::pin(stream_iter(chunks)))
    }
}
