//! Host audio plumbing shared by playback and capture.
//!
//! # Real-time constraints
//!
//! cpal callbacks run on OS audio threads at elevated priority. They must not
//! block on a mutex, perform I/O, or grow a buffer per call. Both directions
//! therefore talk to the rest of the engine only through `ringbuf` SPSC halves
//! and atomics; resampling and encoding happen on the engine side.

pub mod capture;
pub mod device;
pub mod resample;
pub mod wav;

pub use capture::MicCapture;
pub use device::{list_devices, DeviceDirection, DeviceInfo};
pub use resample::RateConverter;
pub use wav::{read_wav_mono, WavRecorder};
