// crates/hap-media/src/lib.rs
//
// Threads, FFmpeg, and the audio backend live here, built on the pure
// time algebra in `hap-core`.

pub mod audio_decoder;
pub mod audio_output;
pub mod audio_resampler;
pub mod audio_thread;
pub mod block_decoder;
pub mod cache;
pub mod demuxer;
pub mod player;
pub mod ring_buffer;
pub mod texture;

pub use audio_decoder::{AudioDecoder, AudioFrame};
pub use audio_output::{AudioOutput, CpalAudioOutput, NullAudioOutput};
pub use audio_resampler::AudioResampler;
pub use audio_thread::{AudioThread, Fade, Fader};
pub use block_decoder::{decode_frame_blocks, BlockDecoder};
pub use cache::{AudioFrameCache, Cache, LockingPacketCache, PacketCache};
pub use demuxer::{Demuxer, Packet, PacketReceiver, PacketSource, StreamInfo, StreamKind};
pub use player::{LoopState, Player};
pub use ring_buffer::RingBuffer;
pub use texture::{CodecTag, DecodedTexture, ShaderProgram};
