// Outbound transcoding shared between participants
//
// Every participant that hears the plain shared mix in the same wire format
// gets the same bytes, so the mix only has to be transcoded once per format
// per tick. Owned by the mixing thread alone.

use std::collections::HashMap;
use std::sync::Arc;

use colored::*;
use tracing::{info, warn};

use crate::audio::transcoding::{TranscodeError, Transcoder, TranscoderFactory};
use crate::audio::types::{AudioFormat, AudioFrame};

/// Outcome of [`TranscoderCache::get_or_build`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// A frame for this format was already published this tick
    Hit,
    /// A transcoder is available; transcode and publish
    Ready,
    /// Format seen only once so far; caller transcodes on its own
    Pending,
    /// Building a transcoder failed and the entry was dropped; caller falls back
    Failed,
}

struct CacheEntry {
    transcoder: Option<Box<dyn Transcoder>>,
    frame: Option<AudioFrame>,
    requests: u32,
}

impl CacheEntry {
    fn new() -> Self {
        Self {
            transcoder: None,
            frame: None,
            requests: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub builds: u64,
    pub build_failures: u64,
    pub hits: u64,
    pub generation: u64,
}

pub struct TranscoderCache {
    entries: HashMap<AudioFormat, CacheEntry>,
    factory: Arc<dyn TranscoderFactory>,
    generation: u64,
    builds: u64,
    build_failures: u64,
    hits: u64,
}

impl TranscoderCache {
    pub fn new(factory: Arc<dyn TranscoderFactory>) -> Self {
        Self {
            entries: HashMap::new(),
            factory,
            generation: 0,
            builds: 0,
            build_failures: 0,
            hits: 0,
        }
    }

    /// Register a request for `dst` and build its transcoder once the format
    /// has been asked for more than once.
    pub fn get_or_build(&mut self, dst: AudioFormat, src: AudioFormat) -> CacheStatus {
        let entry = self.entries.entry(dst).or_insert_with(CacheEntry::new);
        entry.requests = entry.requests.saturating_add(1);

        if entry.frame.as_ref().is_some_and(|f| f.format == dst) {
            self.hits += 1;
            return CacheStatus::Hit;
        }

        // Source rate moved without an invalidation; do not reuse.
        if entry
            .transcoder
            .as_ref()
            .is_some_and(|t| t.source() != src || t.destination() != dst)
        {
            entry.transcoder = None;
            entry.frame = None;
        }

        if entry.transcoder.is_some() {
            return CacheStatus::Ready;
        }
        if entry.requests <= 1 {
            return CacheStatus::Pending;
        }

        match self.factory.build(src, dst) {
            Ok(transcoder) => {
                entry.transcoder = Some(transcoder);
                self.builds += 1;
                info!(
                    "🧩 {}: Shared transcoder {} → {} built",
                    "TRANSCODER_CACHE".blue(),
                    src,
                    dst
                );
                CacheStatus::Ready
            }
            Err(e) => {
                self.entries.remove(&dst);
                self.build_failures += 1;
                warn!(
                    "{}: No shared transcoder {} → {}: {}",
                    "TRANSCODER_CACHE".yellow(),
                    src,
                    dst,
                    e
                );
                CacheStatus::Failed
            }
        }
    }

    /// Transcode `mix` with the entry's transcoder and publish the result.
    ///
    /// On failure nothing is published and the entry keeps its transcoder.
    pub fn transcode_and_publish(
        &mut self,
        dst: AudioFormat,
        mix: &AudioFrame,
    ) -> Result<AudioFrame, TranscodeError> {
        let entry = self
            .entries
            .get_mut(&dst)
            .ok_or(TranscodeError::Unsupported { src: mix.format, dst })?;
        let transcoder = entry
            .transcoder
            .as_mut()
            .ok_or(TranscodeError::Unsupported { src: mix.format, dst })?;

        let frame = transcoder.translate(mix)?;
        entry.frame = Some(frame.clone());
        Ok(frame)
    }

    /// Store the frame produced this tick for `dst`
    pub fn publish(&mut self, dst: AudioFormat, frame: AudioFrame) {
        let entry = self.entries.entry(dst).or_insert_with(CacheEntry::new);
        entry.frame = Some(frame);
    }

    /// Frame published this tick for `dst`, if any
    pub fn published(&self, dst: AudioFormat) -> Option<&AudioFrame> {
        self.entries.get(&dst).and_then(|e| e.frame.as_ref())
    }

    /// Drop last tick's frames, keep transcoders
    pub fn reset_tick(&mut self) {
        for entry in self.entries.values_mut() {
            entry.frame = None;
        }
    }

    /// Drop everything; transcoders were built for the old source rate
    pub fn invalidate_all(&mut self) {
        self.entries.clear();
        self.generation += 1;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_transcoder(&self, dst: AudioFormat) -> bool {
        self.entries
            .get(&dst)
            .is_some_and(|e| e.transcoder.is_some())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            builds: self.builds,
            build_failures: self.build_failures,
            hits: self.hits,
            generation: self.generation,
        }
    }
}
