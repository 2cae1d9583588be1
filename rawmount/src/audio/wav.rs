//! RIFF/WAV rendering for recorded audio.
//!
//! Produces a 16-bit PCM WAV with an iXML chunk carrying the clip's speed
//! metadata (`MASTER_SPEED` / `CURRENT_SPEED` / `TIMECODE_RATE` as the
//! target frame rate's `num/den` fraction), which editing software uses to
//! conform the audio to the video cadence.

const IXML_TEMPLATE: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
<BWFXML>\
<IXML_VERSION>1.5</IXML_VERSION>\
<PROJECT>RAW Video</PROJECT>\
<NOTE>-</NOTE>\
<CIRCLED>FALSE</CIRCLED>\
<TAPE>1</TAPE>\
<SCENE>1</SCENE>\
<TAKE>1</TAKE>\
<SPEED>\
<MASTER_SPEED>{num}/{den}</MASTER_SPEED>\
<CURRENT_SPEED>{num}/{den}</CURRENT_SPEED>\
<TIMECODE_RATE>{num}/{den}</TIMECODE_RATE>\
<TIMECODE_FLAG>NDF</TIMECODE_FLAG>\
</SPEED>\
</BWFXML>";

/// Render interleaved 16-bit samples into a complete WAV file.
///
/// `fps_num`/`fps_den` is the fraction produced by
/// [`crate::timing::to_fraction`] for the source's target frame rate.
pub fn render_wav(
    samples: &[i16],
    num_channels: u16,
    sample_rate: u32,
    fps_num: i32,
    fps_den: i32,
) -> Vec<u8> {
    let ixml = IXML_TEMPLATE
        .replace("{num}", &fps_num.to_string())
        .replace("{den}", &fps_den.to_string());
    let mut ixml_bytes = ixml.into_bytes();
    if ixml_bytes.len() % 2 != 0 {
        ixml_bytes.push(0); // RIFF chunks are word aligned
    }

    let data_len = samples.len() * 2;
    let block_align = num_channels as u32 * 2;
    let byte_rate = sample_rate * block_align;

    // RIFF size: everything after the 8-byte RIFF header.
    let riff_size = 4 + (8 + 16) + (8 + ixml_bytes.len()) + (8 + data_len);

    let mut out = Vec::with_capacity(riff_size + 8);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(riff_size as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&num_channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&(block_align as u16).to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());

    out.extend_from_slice(b"iXML");
    out.extend_from_slice(&(ixml_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&ixml_bytes);

    out.extend_from_slice(b"data");
    out.extend_from_slice(&(data_len as u32).to_le_bytes());
    for &sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let wav = render_wav(&[0, 1, -1, 2], 2, 48000, 2997, 100);

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        let riff_size = u32::from_le_bytes([wav[4], wav[5], wav[6], wav[7]]) as usize;
        assert_eq!(riff_size + 8, wav.len());

        // fmt chunk directly after WAVE.
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(u32::from_le_bytes([wav[16], wav[17], wav[18], wav[19]]), 16);
        assert_eq!(u16::from_le_bytes([wav[20], wav[21]]), 1); // PCM
        assert_eq!(u16::from_le_bytes([wav[22], wav[23]]), 2); // channels
        assert_eq!(
            u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]),
            48000
        );
    }

    #[test]
    fn test_ixml_carries_speed_fraction() {
        let wav = render_wav(&[], 1, 44100, 2997, 100);
        let text = String::from_utf8_lossy(&wav);
        assert!(text.contains("<MASTER_SPEED>2997/100</MASTER_SPEED>"));
        assert!(text.contains("<TIMECODE_RATE>2997/100</TIMECODE_RATE>"));
    }

    #[test]
    fn test_data_chunk_holds_samples() {
        let samples = [100i16, -200, 300, -400];
        let wav = render_wav(&samples, 1, 8000, 30, 1);

        let data_pos = wav.windows(4).position(|w| w == b"data").unwrap();
        let len = u32::from_le_bytes([
            wav[data_pos + 4],
            wav[data_pos + 5],
            wav[data_pos + 6],
            wav[data_pos + 7],
        ]) as usize;
        assert_eq!(len, 8);

        let restored: Vec<i16> = wav[data_pos + 8..data_pos + 8 + len]
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(restored, samples);
    }

    #[test]
    fn test_ixml_chunk_is_word_aligned() {
        let wav = render_wav(&[], 1, 48000, 24, 1);
        let ixml_pos = wav.windows(4).position(|w| w == b"iXML").unwrap();
        let len = u32::from_le_bytes([
            wav[ixml_pos + 4],
            wav[ixml_pos + 5],
            wav[ixml_pos + 6],
            wav[ixml_pos + 7],
        ]);
        assert_eq!(len % 2, 0);
    }
}
