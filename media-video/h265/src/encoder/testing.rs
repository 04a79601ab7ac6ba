use super::{
    H265EncodeJob, H265EncoderBackend, H265EncoderCapabilities, H265Entrypoint, H265PackedHeaders,
    NalUnitType,
};
use crate::H265Profile;
use bytes::Bytes;
use std::{cell::Cell, rc::Rc};

#[derive(Debug, thiserror::Error)]
#[error("fake backend failure")]
pub(crate) struct FakeError;

/// What the fake hardware saw of an encoded picture
#[derive(Debug, Clone)]
pub(crate) struct EncodedPicture {
    pub(crate) poc: u32,
    pub(crate) nal_unit_type: NalUnitType,
    pub(crate) with_sequence: bool,
    pub(crate) packed_headers: Vec<NalUnitType>,
    pub(crate) l0: Vec<u32>,
    pub(crate) l1: Vec<u32>,
    /// POCs signaled in the short-term reference picture set
    pub(crate) reference_set: Vec<u32>,
    pub(crate) num_slices: usize,
    pub(crate) num_references: usize,
}

pub(crate) struct FakeBackend {
    pub(crate) profiles: Vec<H265Profile>,
    pub(crate) entrypoints: Vec<H265Entrypoint>,
    pub(crate) capabilities: H265EncoderCapabilities,

    /// Fail the encode call with this index (counting from 0)
    pub(crate) fail_encode_at: Option<usize>,
    pub(crate) encode_calls: usize,
    pub(crate) encoded: Vec<EncodedPicture>,

    pub(crate) next_surface: u32,
    pub(crate) live_surfaces: Vec<u32>,
    /// Shared so it can be observed after the backend is gone
    pub(crate) released: Rc<Cell<usize>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            profiles: vec![H265Profile::Main, H265Profile::Main10],
            entrypoints: vec![H265Entrypoint::EncodeSlice, H265Entrypoint::EncodeSliceLowPower],
            capabilities: H265EncoderCapabilities {
                max_l0_references: 4,
                max_l1_references: 1,
                max_slices: 0,
                packed_headers: H265PackedHeaders::all(),
            },
            fail_encode_at: None,
            encode_calls: 0,
            encoded: vec![],
            next_surface: 0,
            live_surfaces: vec![],
            released: Rc::default(),
        }
    }
}

impl H265EncoderBackend for FakeBackend {
    type Frame = usize;
    type Surface = u32;
    type Error = FakeError;

    fn profiles(&mut self) -> Result<Vec<H265Profile>, FakeError> {
        Ok(self.profiles.clone())
    }

    fn entrypoints(&mut self, _profile: H265Profile) -> Result<Vec<H265Entrypoint>, FakeError> {
        Ok(self.entrypoints.clone())
    }

    fn capabilities(
        &mut self,
        _profile: H265Profile,
        _entrypoint: H265Entrypoint,
    ) -> Result<H265EncoderCapabilities, FakeError> {
        Ok(self.capabilities)
    }

    fn create_reconstructed_surface(&mut self) -> Result<u32, FakeError> {
        let surface = self.next_surface;
        self.next_surface += 1;
        self.live_surfaces.push(surface);

        Ok(surface)
    }

    fn release_surface(&mut self, surface: u32) {
        let index = self
            .live_surfaces
            .iter()
            .position(|s| *s == surface)
            .expect("released a surface twice");

        self.live_surfaces.swap_remove(index);
        self.released.set(self.released.get() + 1);
    }

    fn encode_picture(&mut self, job: H265EncodeJob<'_, usize, u32>) -> Result<Bytes, FakeError> {
        let call = self.encode_calls;
        self.encode_calls += 1;

        if self.fail_encode_at == Some(call) {
            return Err(FakeError);
        }

        assert!(self.live_surfaces.contains(job.reconstructed));

        let slice = &job.slices[0];

        for reference in slice.ref_pic_list0.iter().chain(slice.ref_pic_list1.iter()) {
            let surface = job.references[usize::from(reference.index)];
            assert!(self.live_surfaces.contains(surface));
        }

        self.encoded.push(EncodedPicture {
            poc: job.picture.poc,
            nal_unit_type: job.picture.nal_unit_type,
            with_sequence: job.sequence.is_some(),
            packed_headers: job.packed_headers.iter().map(|h| h.nal_unit_type).collect(),
            l0: slice.ref_pic_list0.iter().map(|r| r.poc).collect(),
            l1: slice.ref_pic_list1.iter().map(|r| r.poc).collect(),
            reference_set: job.picture.reference_frames.iter().map(|r| r.poc).collect(),
            num_slices: job.slices.len(),
            num_references: job.references.len(),
        });

        Ok(Bytes::from(vec![*job.frame as u8]))
    }
}
