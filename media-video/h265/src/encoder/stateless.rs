use super::{
    backend::{H265EncodeJob, H265EncoderBackend, H265PackedHeader, H265PackedHeaders},
    bitstream::{self, NalUnitType},
    capabilities::H265ResolvedCapabilities,
    codec_config::build_codec_config,
    config::H265EncoderConfig,
    context::EncoderContext,
    dpb::{RefList, ReferenceStore},
    error::{H265EncodeError, H265WriteError},
    params::{self, PictureParams, SequenceParams},
    reorder::{H265PictureType, Picture, ReorderPool},
};
use bytes::Bytes;
use std::{collections::VecDeque, mem::take, time::Duration};

/// Parameter sets of the current configuration, written once per (re)configuration
struct ParameterSets {
    sequence: SequenceParams,
    vps: Bytes,
    sps: Bytes,
    pps: Bytes,
    codec_config: Bytes,
}

impl ParameterSets {
    fn new(ctx: &EncoderContext) -> Result<Self, H265WriteError> {
        let sequence = SequenceParams::new(ctx);

        // The PPS only carries values which are equal for all pictures of a sequence
        let picture = PictureParams::new(ctx, 0, H265PictureType::I, true, RefList::new());

        let vps = bitstream::write_vps(&sequence)?;
        let sps = bitstream::write_sps(&sequence)?;
        let pps = bitstream::write_pps(&picture)?;

        let codec_config = build_codec_config(&sequence, &vps, &sps, &pps);

        Ok(Self {
            sequence,
            vps,
            sps,
            pps,
            codec_config,
        })
    }
}

/// Configured session, replaced as a whole on reconfiguration
struct Session<F, S> {
    ctx: EncoderContext,
    parameter_sets: ParameterSets,
    reorder: ReorderPool<F>,
    references: ReferenceStore<S>,
}

/// Encoder driving a stateless hardware backend
///
/// Frames are submitted in display order with [`H265Encoder::encode_frame`], the coded pictures are returned
/// in decode order by [`H265Encoder::poll_result`] as Annex-B data.
pub struct H265Encoder<B: H265EncoderBackend> {
    backend: B,
    session: Option<Session<B::Frame, B::Surface>>,

    /// VPS & SPS must be sent with the next I picture
    config_changed: bool,
    force_keyframe: bool,

    output: VecDeque<Bytes>,
}

impl<B: H265EncoderBackend> H265Encoder<B> {
    pub fn new(mut backend: B, config: H265EncoderConfig) -> Result<Self, H265EncodeError<B::Error>> {
        let session = Self::create_session(&mut backend, &config)?;

        Ok(Self {
            backend,
            session: Some(session),
            config_changed: true,
            force_keyframe: false,
            output: VecDeque::new(),
        })
    }

    fn create_session(
        backend: &mut B,
        config: &H265EncoderConfig,
    ) -> Result<Session<B::Frame, B::Surface>, H265EncodeError<B::Error>> {
        let ctx = EncoderContext::new(backend, config)?;
        let parameter_sets = ParameterSets::new(&ctx)?;

        let max_poc = ctx.max_pic_order_cnt();

        log::debug!(
            "Configured encoder: {}x{} ({}x{} CTUs of {}), keyframe period {}, IDR period {}, {} B-Frames, {} reference frames, {} slices",
            ctx.luma_width,
            ctx.luma_height,
            ctx.ctu_width,
            ctx.ctu_height,
            ctx.ctu_size,
            ctx.keyframe_period,
            ctx.idr_period,
            ctx.num_bframes,
            ctx.num_ref_frames,
            ctx.num_slices,
        );

        Ok(Session {
            reorder: ReorderPool::new(ctx.keyframe_period, ctx.idr_period, ctx.num_bframes, max_poc),
            references: ReferenceStore::new(ctx.max_reflist0_count, ctx.max_reflist1_count, max_poc),
            parameter_sets,
            ctx,
        })
    }

    /// Apply a new configuration
    ///
    /// All pending frames must have been flushed. The next frame starts a new coded video sequence.
    /// If the configuration is rejected the encoder stays unusable until a valid configuration is applied.
    pub fn reconfigure(&mut self, config: H265EncoderConfig) -> Result<(), H265EncodeError<B::Error>> {
        if let Some(session) = &mut self.session {
            if session.reorder.pending() > 0 {
                return Err(H265EncodeError::NotFlushed);
            }

            session
                .references
                .clear(|surface| self.backend.release_surface(surface));
        }

        self.session = None;

        let session = Self::create_session(&mut self.backend, &config)?;

        self.session = Some(session);
        self.config_changed = true;
        self.force_keyframe = false;

        Ok(())
    }

    /// Force the next submitted frame to be coded as a keyframe
    pub fn request_keyframe(&mut self) {
        self.force_keyframe = true;
    }

    /// Submit the next frame in display order
    ///
    /// Depending on the frame pattern the frame may be held back until a later frame is submitted.
    /// If a picture fails to encode it is dropped, the first error is returned after all ready pictures have
    /// been processed.
    pub fn encode_frame(&mut self, frame: B::Frame) -> Result<(), H265EncodeError<B::Error>> {
        let Some(session) = &mut self.session else {
            return Err(H265EncodeError::NotConfigured);
        };

        let force_keyframe = take(&mut self.force_keyframe);

        let mut result = Ok(());

        if let Some(picture) = session.reorder.submit(frame, force_keyframe) {
            result = result.and(self.encode_picture(picture));
        }

        while let Some(picture) = self.session.as_mut().and_then(|s| s.reorder.pop()) {
            result = result.and(self.encode_picture(picture));
        }

        result
    }

    /// Encode all frames that are held back and release all reference pictures
    ///
    /// Afterwards the encoder starts over with an IDR picture.
    pub fn flush(&mut self) -> Result<(), H265EncodeError<B::Error>> {
        if self.session.is_none() {
            return Err(H265EncodeError::NotConfigured);
        }

        let mut result = Ok(());

        while let Some(picture) = self.session.as_mut().and_then(|s| s.reorder.flush()) {
            result = result.and(self.encode_picture(picture));
        }

        if let Some(session) = &mut self.session {
            session
                .references
                .clear(|surface| self.backend.release_surface(surface));
        }

        result
    }

    /// Take the next coded picture in decode order
    pub fn poll_result(&mut self) -> Option<Bytes> {
        self.output.pop_front()
    }

    /// `HEVCDecoderConfigurationRecord` of the current configuration
    pub fn codec_config(&self) -> Option<Bytes> {
        self.session
            .as_ref()
            .map(|session| session.parameter_sets.codec_config.clone())
    }

    /// Offset between presentation and decode timestamps introduced by B-Frames
    pub fn cts_offset(&self) -> Duration {
        self.session
            .as_ref()
            .map(|session| session.ctx.cts_offset)
            .unwrap_or_default()
    }

    /// Size of the buffer required to hold a single coded picture
    pub fn coded_buffer_size(&self) -> usize {
        self.session
            .as_ref()
            .map(|session| session.ctx.coded_buffer_size())
            .unwrap_or_default()
    }

    pub fn capabilities(&self) -> Option<&H265ResolvedCapabilities> {
        self.session
            .as_ref()
            .map(|session| &session.ctx.capabilities)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    fn encode_picture(&mut self, picture: Picture<B::Frame>) -> Result<(), H265EncodeError<B::Error>> {
        let Some(session) = &mut self.session else {
            return Err(H265EncodeError::NotConfigured);
        };

        let ctx = &session.ctx;
        let parameter_sets = &session.parameter_sets;
        let seq = &parameter_sets.sequence;

        log::debug!(
            "Encode picture poc={} type={:?} idr={}",
            picture.poc,
            picture.picture_type,
            picture.is_idr
        );

        let (l0, l1) = session
            .references
            .build_lists(picture.poc, picture.picture_type);

        log::trace!("\tRefPicList0 = {:?}", l0.iter().map(|r| r.poc).collect::<Vec<_>>());
        log::trace!("\tRefPicList1 = {:?}", l1.iter().map(|r| r.poc).collect::<Vec<_>>());

        let mut pic = PictureParams::new(
            ctx,
            picture.poc,
            picture.picture_type,
            picture.is_idr,
            session.references.reference_frames(),
        );

        let slices = params::build_slices(ctx, picture.picture_type, &l0, &l1);
        pic.collocated_ref_pic_index = params::collocated_ref_pic_index(&slices);

        let is_intra = picture.picture_type == H265PictureType::I;
        let send_sequence = is_intra && self.config_changed;

        let supported = ctx.capabilities.hardware.packed_headers;
        let mut packed_headers = Vec::with_capacity(3 + slices.len());

        if send_sequence && supported.contains(H265PackedHeaders::SEQUENCE) {
            packed_headers.push(H265PackedHeader {
                nal_unit_type: NalUnitType::Vps,
                data: parameter_sets.vps.clone(),
            });
            packed_headers.push(H265PackedHeader {
                nal_unit_type: NalUnitType::Sps,
                data: parameter_sets.sps.clone(),
            });
        }

        if is_intra && supported.contains(H265PackedHeaders::PICTURE) {
            packed_headers.push(H265PackedHeader {
                nal_unit_type: NalUnitType::Pps,
                data: parameter_sets.pps.clone(),
            });
        }

        if supported.contains(H265PackedHeaders::SLICE) {
            for slice in &slices {
                match bitstream::write_slice_header(seq, &pic, slice) {
                    Ok(data) => packed_headers.push(H265PackedHeader {
                        nal_unit_type: pic.nal_unit_type,
                        data,
                    }),
                    Err(e) => {
                        log::error!("Dropping picture poc={}: {e}", picture.poc);
                        self.force_keyframe |= picture.picture_type != H265PictureType::B;
                        return Err(e.into());
                    }
                }
            }
        }

        let reconstructed = match self.backend.create_reconstructed_surface() {
            Ok(surface) => surface,
            Err(e) => {
                log::error!("Dropping picture poc={}, failed to create reconstructed surface", picture.poc);
                self.force_keyframe |= picture.picture_type != H265PictureType::B;
                return Err(H265EncodeError::Allocation(e));
            }
        };

        let references = session.references.surfaces();

        let result = self.backend.encode_picture(H265EncodeJob {
            frame: &picture.frame,
            sequence: send_sequence.then_some(seq),
            picture: &pic,
            slices: &slices,
            rate_control: &ctx.rate_control,
            packed_headers: &packed_headers,
            reconstructed: &reconstructed,
            references: &references,
        });

        drop(references);

        match result {
            Ok(data) => {
                session
                    .references
                    .update(&picture, reconstructed, |surface| {
                        self.backend.release_surface(surface)
                    });

                if send_sequence {
                    self.config_changed = false;
                }

                self.output.push_back(data);

                Ok(())
            }
            Err(e) => {
                log::error!("Dropping picture poc={}, hardware failed to encode it", picture.poc);

                self.backend.release_surface(reconstructed);

                // Following pictures cannot reference the lost picture
                self.force_keyframe |= picture.picture_type != H265PictureType::B;

                Err(H265EncodeError::Backend(e))
            }
        }
    }
}

impl<B: H265EncoderBackend> Drop for H265Encoder<B> {
    fn drop(&mut self) {
        if let Some(session) = &mut self.session {
            session
                .references
                .clear(|surface| self.backend.release_surface(surface));
        }
    }
}
