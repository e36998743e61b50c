use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use crate::error::DecodeError;
use crate::models::DecodedBuffer;

/// File extension of a locator, ignoring URL query strings and fragments
pub fn locator_extension(locator: &str) -> Option<String> {
    let path = locator.split(['?', '#']).next().unwrap_or(locator);
    let name = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_lowercase())
    }
}

/// Decode a complete encoded file held in memory into interleaved f32 PCM.
///
/// Packets that fail to decode are skipped; the stream ends at EOF.
pub fn decode_bytes(locator: &str, bytes: Vec<u8>) -> Result<DecodedBuffer, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::EmptyStream);
    }

    let media_source = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let extension = locator_extension(locator);
    let mut hint = Hint::new();
    if let Some(ext) = extension.as_deref() {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, media_source, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| DecodeError::UnsupportedFormat {
            format: format!("{} ({})", extension.as_deref().unwrap_or("unknown"), e),
        })?;
    let mut format_reader = probed.format;

    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| DecodeError::UnsupportedFormat {
            format: "no audio track found".to_string(),
        })?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::UnsupportedFormat {
            format: format!("no decoder for codec ({})", e),
        })?;

    let mut samples: Vec<f32> = Vec::new();
    let mut channels = track.codec_params.channels.map(|c| c.count() as u16).unwrap_or(0);
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut skipped_packets = 0usize;

    loop {
        let packet = match format_reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                if samples.is_empty() {
                    return Err(DecodeError::CorruptedFile(format!("{}: {}", locator, e)));
                }
                log::warn!("Stopping decode of {} early: {}", locator, e);
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(audio_buf) => {
                let spec = *audio_buf.spec();
                let needs_new_buffer = sample_buf
                    .as_ref()
                    .map_or(true, |buf| buf.capacity() < audio_buf.capacity() * spec.channels.count());
                if needs_new_buffer {
                    sample_buf = Some(SampleBuffer::<f32>::new(audio_buf.capacity() as u64, spec));
                }
                if let Some(buf) = sample_buf.as_mut() {
                    buf.copy_interleaved_ref(audio_buf);
                    samples.extend_from_slice(buf.samples());
                }
                channels = spec.channels.count() as u16;
                sample_rate = spec.rate;
            }
            Err(SymphoniaError::DecodeError(err)) => {
                skipped_packets += 1;
                log::debug!("Skipping undecodable packet in {}: {}", locator, err);
            }
            Err(e) => {
                return Err(DecodeError::DecodeFailed(format!("{}: {}", locator, e)));
            }
        }
    }

    if skipped_packets > 0 {
        log::warn!("{}: skipped {} corrupt packets", locator, skipped_packets);
    }
    if samples.is_empty() || channels == 0 || sample_rate == 0 {
        return Err(DecodeError::EmptyStream);
    }

    Ok(DecodedBuffer::new(samples, channels, sample_rate))
}
