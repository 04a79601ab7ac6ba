use bytes::{BufMut, Bytes, BytesMut};
use ezk_h265::{
    H265Level, H265Profile,
    encoder::{
        H265EncodeError, H265EncodeJob, H265Encoder, H265EncoderBackend, H265EncoderCapabilities,
        H265EncoderConfig, H265Entrypoint, H265FramePattern, H265PackedHeaders,
        H265RateControlConfig, NalUnitType,
    },
};
use std::collections::HashSet;

#[derive(Debug, thiserror::Error)]
#[error("out of surfaces")]
struct OutOfSurfaces;

/// Backend which emits the packed headers followed by a dummy slice payload
#[derive(Default)]
struct RecordingBackend {
    next_surface: u64,
    live: HashSet<u64>,
    max_live: usize,
}

impl H265EncoderBackend for RecordingBackend {
    type Frame = u32;
    type Surface = u64;
    type Error = OutOfSurfaces;

    fn profiles(&mut self) -> Result<Vec<H265Profile>, OutOfSurfaces> {
        Ok(vec![H265Profile::Main])
    }

    fn entrypoints(&mut self, _profile: H265Profile) -> Result<Vec<H265Entrypoint>, OutOfSurfaces> {
        Ok(vec![H265Entrypoint::EncodeSlice])
    }

    fn capabilities(
        &mut self,
        _profile: H265Profile,
        _entrypoint: H265Entrypoint,
    ) -> Result<H265EncoderCapabilities, OutOfSurfaces> {
        Ok(H265EncoderCapabilities {
            max_l0_references: 2,
            max_l1_references: 1,
            max_slices: 4,
            packed_headers: H265PackedHeaders::all(),
        })
    }

    fn create_reconstructed_surface(&mut self) -> Result<u64, OutOfSurfaces> {
        if self.live.len() >= 8 {
            return Err(OutOfSurfaces);
        }

        let surface = self.next_surface;
        self.next_surface += 1;
        self.live.insert(surface);
        self.max_live = self.max_live.max(self.live.len());

        Ok(surface)
    }

    fn release_surface(&mut self, surface: u64) {
        assert!(self.live.remove(&surface), "surface released twice");
    }

    fn encode_picture(
        &mut self,
        job: H265EncodeJob<'_, u32, u64>,
    ) -> Result<Bytes, OutOfSurfaces> {
        assert_eq!(job.references.len(), job.picture.reference_frames.len());

        let mut out = BytesMut::new();

        for header in job.packed_headers {
            out.put_slice(&header.data);

            if matches!(
                header.nal_unit_type,
                NalUnitType::TrailN | NalUnitType::TrailR | NalUnitType::IdrWRadl
            ) {
                // slice_segment_data, never contains a zero byte
                out.put_u8(0x80 | *job.frame as u8);
            }
        }

        Ok(out.freeze())
    }
}

/// Split an Annex-B stream into the NAL unit types of its NAL units
fn nal_unit_types(data: &[u8]) -> Vec<u8> {
    let mut types = vec![];
    let mut i = 0;

    while i + 4 < data.len() {
        if data[i..i + 4] == [0, 0, 0, 1] {
            types.push((data[i + 4] >> 1) & 0x3F);
            i += 4;
        } else {
            i += 1;
        }
    }

    types
}

fn config() -> H265EncoderConfig {
    H265EncoderConfig {
        resolution: (1280, 720),
        frame_pattern: H265FramePattern {
            keyframe_period: 16,
            idr_period: 32,
            num_bframes: 3,
        },
        num_ref_frames: 2,
        num_slices: 2,
        rate_control: H265RateControlConfig::VariableBitRate {
            bitrate: Some(4000),
        },
        ..Default::default()
    }
}

#[test]
fn encode_ipb_sequence() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut encoder = H265Encoder::new(RecordingBackend::default(), config()).unwrap();

    let capabilities = encoder.capabilities().unwrap();
    assert_eq!(capabilities.profile, H265Profile::Main);
    assert!(capabilities.level <= H265Level::Level_4_1);

    let mut stream = vec![];

    for frame in 0..64 {
        encoder.encode_frame(frame).unwrap();

        while let Some(data) = encoder.poll_result() {
            stream.push(data);
        }
    }

    encoder.flush().unwrap();

    while let Some(data) = encoder.poll_result() {
        stream.push(data);
    }

    assert_eq!(stream.len(), 64);

    let types: Vec<Vec<u8>> = stream.iter().map(|data| nal_unit_types(data)).collect();

    // VPS, SPS, PPS & two IDR slices open the stream
    assert_eq!(types[0], vec![32, 33, 34, 19, 19]);

    let idr_count = types.iter().filter(|t| t.contains(&19)).count();
    assert_eq!(idr_count, 2);

    let sequence_count = types.iter().filter(|t| t.contains(&32)).count();
    assert_eq!(sequence_count, 1);

    // every picture is split into two slices
    for t in &types {
        let slices = t.iter().filter(|t| matches!(t, 0 | 1 | 19)).count();
        assert_eq!(slices, 2);
    }

    // every frame was coded exactly once
    let mut frames: Vec<u32> = stream
        .iter()
        .map(|data| u32::from(data[data.len() - 1] & 0x7F))
        .collect();
    frames.sort_unstable();
    assert_eq!(frames, (0..64).collect::<Vec<_>>());

    assert!(!encoder.cts_offset().is_zero());
    assert!(encoder.coded_buffer_size() > 1280 * 720);
    assert!(encoder.backend().max_live <= 4);
}

#[test]
fn codec_config_record() {
    let _ = env_logger::builder().is_test(true).try_init();

    let encoder = H265Encoder::new(RecordingBackend::default(), config()).unwrap();
    let record = encoder.codec_config().unwrap();

    assert_eq!(record[0], 1);
    assert_eq!(record[1] & 0x1F, 1);
    assert_eq!(record[21] & 0x03, 3);
    assert_eq!(record[22], 3);

    let mut pos = 23;
    let mut types = vec![];

    for _ in 0..record[22] {
        types.push(record[pos] & 0x3F);
        let num_nalus = u16::from_be_bytes([record[pos + 1], record[pos + 2]]);
        assert_eq!(num_nalus, 1);

        let len = u16::from_be_bytes([record[pos + 3], record[pos + 4]]) as usize;
        pos += 5 + len;
    }

    assert_eq!(types, vec![32, 33, 34]);
    assert_eq!(pos, record.len());
}

#[test]
fn reconfigure_between_sequences() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut encoder = H265Encoder::new(RecordingBackend::default(), config()).unwrap();

    for frame in 0..10 {
        encoder.encode_frame(frame).unwrap();
    }

    assert!(matches!(
        encoder.reconfigure(H265EncoderConfig::default()),
        Err(H265EncodeError::NotFlushed)
    ));

    encoder.flush().unwrap();
    let first_record = encoder.codec_config().unwrap();

    encoder.reconfigure(H265EncoderConfig::default()).unwrap();
    assert!(encoder.backend().live.is_empty());
    assert_ne!(encoder.codec_config().unwrap(), first_record);

    while encoder.poll_result().is_some() {}

    encoder.encode_frame(0).unwrap();

    let data = encoder.poll_result().unwrap();
    assert_eq!(nal_unit_types(&data), vec![32, 33, 34, 19]);
}
