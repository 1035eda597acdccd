use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

/// Signal the mock base station puts on the data socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Waveform {
    /// Every sample is 0.0
    #[default]
    Zeros,
    /// Every channel carries the frame number
    Ramp,
    /// Channel i is a sine at 2 + 4*i Hz
    Sine,
}

/// Peak amplitude of the sine waveform, in volts. Roughly a strong EMG burst.
const SINE_AMPLITUDE: f32 = 0.002;

/// Samples of one frame.
pub fn frame_values(waveform: Waveform, frame: u64, frame_interval_secs: f32, channels: usize) -> Vec<f32> {
    match waveform {
        Waveform::Zeros => vec![0.0; channels],
        Waveform::Ramp => vec![frame as f32; channels],
        Waveform::Sine => {
            let t = frame as f32 * frame_interval_secs;
            (0..channels)
                .map(|i| {
                    let freq = 2.0 + i as f32 * 4.0;
                    (2.0 * PI * freq * t).sin() * SINE_AMPLITUDE
                })
                .collect()
        }
    }
}

/// Wire encoding of one frame.
pub fn encode_frame(values: &[f32], out: &mut Vec<u8>) {
    out.clear();
    out.extend(values.iter().flat_map(|v| v.to_le_bytes()));
}
