// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Minimal SSE line assembly shared by both provider dialects.
//!
//! SSE lines can be split across TCP chunks, so a remainder buffer is
//! carried forward.  Only complete lines (terminated by `\n`) are parsed;
//! anything left over is prepended to the next chunk.

/// Accumulates raw bytes and yields complete `data:` payloads.
#[derive(Debug, Default)]
pub(crate) struct SseLineBuffer {
    buf: String,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk; returns every complete `data:` payload it
    /// finished.  Comment lines, `event:` lines, and keep-alive blanks are
    /// skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.push_str(&String::from_utf8_lossy(chunk));
        let mut out = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line = self.buf[..pos].trim_end_matches('\r').to_string();
            self.buf.drain(..=pos);
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    out.push(data.to_string());
                }
            }
        }
        out
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
