//! Fixed-length audio framing
//!
//! The capture callback feeds samples in whatever chunk sizes the hardware
//! delivers; the server wants discrete frames of exactly 50 ms. `FrameBuffer`
//! sits between the two: it accumulates into a fixed slab and emits one
//! `AudioFrame` copy each time the slab fills, carrying any partial tail
//! over to the next frame.
//!
//! This runs inside the real-time audio callback, so the per-sample path is
//! branch-plus-store and the only allocation is the one copy made when a
//! frame completes.

/// Geometry of the frames sent to the recognition server.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Sample rate of the framed audio (the server's input rate).
    pub sample_rate: u32,
    /// Frame duration in milliseconds.
    pub frame_duration_ms: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_duration_ms: 50,
        }
    }
}

impl FrameConfig {
    /// Samples per emitted frame.
    pub fn samples_per_frame(&self) -> usize {
        (self.sample_rate * self.frame_duration_ms / 1000) as usize
    }
}

/// One fixed-length block of mono f32 samples, the atomic unit of
/// transmission. Immutable once emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
}

impl AudioFrame {
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Accumulator that turns an arbitrary sample stream into exact frames.
///
/// Not internally synchronized; owned by the audio callback.
#[derive(Debug)]
pub struct FrameBuffer {
    slab: Box<[f32]>,
    index: usize,
}

impl FrameBuffer {
    pub fn new(frame_len: usize) -> Self {
        Self {
            slab: vec![0.0; frame_len].into_boxed_slice(),
            index: 0,
        }
    }

    /// Append one sample. Returns a completed frame exactly when this sample
    /// fills the slab; the accumulation index then resets for the next frame.
    pub fn push_sample(&mut self, sample: f32) -> Option<AudioFrame> {
        self.slab[self.index] = sample;
        self.index += 1;

        if self.index == self.slab.len() {
            self.index = 0;
            Some(AudioFrame {
                samples: self.slab.to_vec(),
            })
        } else {
            None
        }
    }

    /// Append a chunk, handing each completed frame to `emit`.
    pub fn extend(&mut self, chunk: &[f32], mut emit: impl FnMut(AudioFrame)) {
        for &sample in chunk {
            if let Some(frame) = self.push_sample(sample) {
                emit(frame);
            }
        }
    }

    /// Samples currently held back waiting for the frame to fill.
    pub fn pending(&self) -> usize {
        self.index
    }

    /// Discard any partial tail, e.g. when capture is torn down.
    pub fn reset(&mut self) {
        self.index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_frames(chunks: &[&[f32]], frame_len: usize) -> (Vec<AudioFrame>, usize) {
        let mut buffer = FrameBuffer::new(frame_len);
        let mut frames = Vec::new();
        for chunk in chunks {
            buffer.extend(chunk, |f| frames.push(f));
        }
        (frames, buffer.pending())
    }

    #[test]
    fn default_geometry_is_800_samples() {
        let config = FrameConfig::default();
        // 16000 Hz * 50ms / 1000 = 800 samples
        assert_eq!(config.samples_per_frame(), 800);
    }

    #[test]
    fn emits_exactly_on_frame_boundary() {
        let mut buffer = FrameBuffer::new(4);
        assert!(buffer.push_sample(1.0).is_none());
        assert!(buffer.push_sample(2.0).is_none());
        assert!(buffer.push_sample(3.0).is_none());
        let frame = buffer.push_sample(4.0).expect("fourth sample completes the frame");
        assert_eq!(frame.samples(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn partial_tail_is_retained_not_emitted() {
        let (frames, pending) = collect_frames(&[&[0.0; 5]], 4);
        assert_eq!(frames.len(), 1);
        assert_eq!(pending, 1);
    }

    #[test]
    fn frame_length_is_exact_for_any_chunk_interleaving() {
        let input: Vec<f32> = (0..2500).map(|i| i as f32).collect();
        for chunk_sizes in [
            vec![1usize; 2500],
            vec![800, 800, 800, 100],
            vec![799, 2, 799, 900],
            vec![2500],
            vec![250; 10],
        ] {
            let mut buffer = FrameBuffer::new(800);
            let mut frames = Vec::new();
            let mut offset = 0;
            for size in chunk_sizes {
                buffer.extend(&input[offset..offset + size], |f| frames.push(f));
                offset += size;
            }
            assert_eq!(frames.len(), 3);
            assert!(frames.iter().all(|f| f.len() == 800));
            assert_eq!(buffer.pending(), 100);
        }
    }

    #[test]
    fn frames_preserve_input_order() {
        let input: Vec<f32> = (0..1600).map(|i| i as f32).collect();
        let (frames, _) = collect_frames(&[&input[..700], &input[700..1500], &input[1500..]], 800);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].samples()[0], 0.0);
        assert_eq!(frames[0].samples()[799], 799.0);
        assert_eq!(frames[1].samples()[0], 800.0);
        assert_eq!(frames[1].samples()[799], 1599.0);
    }

    #[test]
    fn reset_discards_partial_tail() {
        let mut buffer = FrameBuffer::new(4);
        buffer.push_sample(1.0);
        buffer.push_sample(2.0);
        buffer.reset();
        assert_eq!(buffer.pending(), 0);
        // Next frame starts clean
        let mut frames = Vec::new();
        buffer.extend(&[9.0, 9.0, 9.0, 9.0], |f| frames.push(f));
        assert_eq!(frames[0].samples(), &[9.0, 9.0, 9.0, 9.0]);
    }

    #[test]
    fn bounded_channel_drops_newest_when_full() {
        // The capture callback delivers frames with try_send; when the
        // consumer lags, the newest frame is the one discarded.
        let (tx, mut rx) = tokio::sync::mpsc::channel::<AudioFrame>(2);
        let mut buffer = FrameBuffer::new(2);
        let mut dropped = 0u64;
        buffer.extend(&[1.0, 1.0, 2.0, 2.0, 3.0, 3.0], |frame| {
            if tx.try_send(frame).is_err() {
                dropped += 1;
            }
        });
        assert_eq!(dropped, 1);
        assert_eq!(rx.try_recv().unwrap().samples(), &[1.0, 1.0]);
        assert_eq!(rx.try_recv().unwrap().samples(), &[2.0, 2.0]);
        assert!(rx.try_recv().is_err());
    }
}
